// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ISA-form PID with anti-windup, output rate limit and bumpless transfer.

use serde::{Deserialize, Serialize};

/// Controller tuning and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidConfig {
    pub kp: f64,
    /// Integral gain per second.
    pub ki: f64,
    /// Derivative gain in seconds.
    pub kd: f64,
    pub setpoint: f64,
    pub out_min: f64,
    pub out_max: f64,
    /// Maximum output change per second; 0 disables the limit.
    pub rate_limit: f64,
    /// Reverse acting: error sign flips (cooling-type loops).
    pub reverse: bool,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            kp: 1.0,
            ki: 0.0,
            kd: 0.0,
            setpoint: 0.0,
            out_min: 0.0,
            out_max: 100.0,
            rate_limit: 0.0,
            reverse: false,
        }
    }
}

/// Auto computes; manual holds the operator's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PidMode {
    Auto,
    Manual,
}

#[derive(Debug)]
pub struct PidLoop {
    config: PidConfig,
    mode: PidMode,
    integrator: f64,
    last_pv: Option<f64>,
    last_output: f64,
    /// Set while an interlock holds this loop's actuator.
    frozen: bool,
}

impl PidLoop {
    pub fn new(config: PidConfig) -> Self {
        let initial = config.out_min;
        Self {
            config,
            mode: PidMode::Auto,
            integrator: 0.0,
            last_pv: None,
            last_output: initial,
            frozen: false,
        }
    }

    pub fn mode(&self) -> PidMode {
        self.mode
    }

    pub fn setpoint(&self) -> f64 {
        self.config.setpoint
    }

    pub fn set_setpoint(&mut self, setpoint: f64) {
        self.config.setpoint = setpoint;
    }

    pub fn last_output(&self) -> f64 {
        self.last_output
    }

    /// Freeze/unfreeze the integrator (interlock holding the actuator).
    pub fn set_frozen(&mut self, frozen: bool) {
        self.frozen = frozen;
    }

    /// Switch to manual with the given output.
    pub fn set_manual(&mut self, output: f64) {
        self.mode = PidMode::Manual;
        self.last_output = output.clamp(self.config.out_min, self.config.out_max);
    }

    /// Switch to auto; the integrator is re-seeded so the first auto scan
    /// continues from the manual output (bumpless transfer).
    pub fn set_auto(&mut self, current_pv: f64) {
        if self.mode == PidMode::Auto {
            return;
        }
        self.mode = PidMode::Auto;
        let error = self.error(current_pv);
        // Solve out = kp*e + I for I at the held output.
        self.integrator = self.last_output - self.config.kp * error;
        self.last_pv = Some(current_pv);
    }

    fn error(&self, pv: f64) -> f64 {
        let e = self.config.setpoint - pv;
        if self.config.reverse {
            -e
        } else {
            e
        }
    }

    /// One scan step; `dt` is the scan period in seconds.
    pub fn step(&mut self, pv: f64, dt: f64) -> f64 {
        if self.mode == PidMode::Manual {
            self.last_pv = Some(pv);
            return self.last_output;
        }
        let error = self.error(pv);

        if !self.frozen {
            self.integrator += self.config.ki * error * dt;
            // Anti-windup: keep the integrator inside what the output can
            // express.
            let p = self.config.kp * error;
            self.integrator = self
                .integrator
                .clamp(self.config.out_min - p, self.config.out_max - p);
        }

        // Derivative on measurement (no setpoint kick).
        let derivative = match self.last_pv {
            Some(last) if dt > 0.0 && !self.frozen => {
                let d_pv = (pv - last) / dt;
                let sign = if self.config.reverse { 1.0 } else { -1.0 };
                sign * self.config.kd * d_pv
            }
            _ => 0.0,
        };
        self.last_pv = Some(pv);

        let mut output = (self.config.kp * error + self.integrator + derivative)
            .clamp(self.config.out_min, self.config.out_max);

        if self.config.rate_limit > 0.0 && dt > 0.0 {
            let max_step = self.config.rate_limit * dt;
            output = output.clamp(self.last_output - max_step, self.last_output + max_step);
            output = output.clamp(self.config.out_min, self.config.out_max);
        }
        self.last_output = output;
        output
    }
}
