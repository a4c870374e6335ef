// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The control scan: interlocks, PIDs, sequencers, output publication.

use super::interlock::InterlockSet;
use super::pid::{PidLoop, PidMode};
use super::sequencer::Sequencer;
use crate::registry::CascadeLink;
use std::collections::HashMap;
use std::time::Instant;

/// A PID loop bound to its process variable and actuator tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopBinding {
    /// Sensor tag the loop reads ("station:slot").
    pub pv_tag: String,
    /// Actuator tag the loop drives.
    pub out_tag: String,
}

/// One actuator write produced by a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorWrite {
    pub target: String,
    pub value: f64,
}

/// Result of one scan.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub writes: Vec<ActuatorWrite>,
    /// Actuators currently held in their safe state.
    pub held: Vec<String>,
}

pub struct ControlEngine {
    interlocks: InterlockSet,
    loops: Vec<(String, PidLoop, LoopBinding)>,
    sequencers: Vec<Sequencer>,
    cascades: Vec<CascadeLink>,
    last_scan: Option<Instant>,
}

impl ControlEngine {
    pub fn new(interlocks: InterlockSet) -> Self {
        Self {
            interlocks,
            loops: Vec::new(),
            sequencers: Vec::new(),
            cascades: Vec::new(),
            last_scan: None,
        }
    }

    pub fn add_loop(&mut self, name: impl Into<String>, pid: PidLoop, binding: LoopBinding) {
        self.loops.push((name.into(), pid, binding));
    }

    pub fn add_sequencer(&mut self, sequencer: Sequencer) {
        self.sequencers.push(sequencer);
    }

    /// Wire declared cascades (outer output feeds inner set-point).
    pub fn set_cascades(&mut self, cascades: Vec<CascadeLink>) {
        self.cascades = cascades;
    }

    pub fn set_setpoint(&mut self, loop_name: &str, setpoint: f64) -> bool {
        for (name, pid, _) in &mut self.loops {
            if name == loop_name {
                pid.set_setpoint(setpoint);
                return true;
            }
        }
        false
    }

    pub fn set_mode(&mut self, loop_name: &str, mode: PidMode, manual_output: f64, pv: f64) -> bool {
        for (name, pid, _) in &mut self.loops {
            if name == loop_name {
                match mode {
                    PidMode::Manual => pid.set_manual(manual_output),
                    PidMode::Auto => pid.set_auto(pv),
                }
                return true;
            }
        }
        false
    }

    pub fn setpoint_of(&self, loop_name: &str) -> Option<f64> {
        self.loops
            .iter()
            .find(|(name, _, _)| name == loop_name)
            .map(|(_, pid, _)| pid.setpoint())
    }

    pub fn last_output_of(&self, loop_name: &str) -> Option<f64> {
        self.loops
            .iter()
            .find(|(name, _, _)| name == loop_name)
            .map(|(_, pid, _)| pid.last_output())
    }

    /// One deterministic scan.
    ///
    /// 1. snapshot sensor values (caller supplies them)
    /// 2. interlocks
    /// 3. PID loops (integrator frozen while interlocked; cascade wiring
    ///    applied outer-to-inner)
    /// 4. sequencers
    /// 5. outputs, with interlock holds overriding everything
    pub fn scan(&mut self, values: &HashMap<String, f64>, now: Instant) -> ScanResult {
        let dt = match self.last_scan {
            Some(last) => now.duration_since(last).as_secs_f64(),
            None => 0.0,
        };
        self.last_scan = Some(now);

        let held = self.interlocks.evaluate(values, now);
        let mut writes: HashMap<String, f64> = HashMap::new();

        // Cascade wiring: outer loop outputs become inner set-points before
        // the inner loop steps. Loop vector order is configuration order;
        // cascades reference by name so the outer must be stepped first --
        // resolve by stepping in two passes when a cascade exists.
        let cascade_inner: Vec<&str> = self.cascades.iter().map(|c| c.inner_loop.as_str()).collect();

        // Pass 1: non-inner loops (includes every cascade outer).
        let mut outer_outputs: HashMap<String, f64> = HashMap::new();
        for (name, pid, binding) in &mut self.loops {
            if cascade_inner.contains(&name.as_str()) {
                continue;
            }
            let frozen = self.interlocks.holds(&binding.out_tag);
            pid.set_frozen(frozen);
            if let Some(pv) = values.get(&binding.pv_tag) {
                let out = pid.step(*pv, dt);
                outer_outputs.insert(name.clone(), out);
                writes.insert(binding.out_tag.clone(), out);
            }
        }

        // Apply cascade set-points.
        for cascade in &self.cascades {
            if let Some(outer_out) = outer_outputs.get(&cascade.outer_loop) {
                let outer_out = *outer_out;
                for (name, pid, _) in &mut self.loops {
                    if *name == cascade.inner_loop {
                        pid.set_setpoint(outer_out);
                    }
                }
            }
        }

        // Pass 2: cascade inner loops.
        for (name, pid, binding) in &mut self.loops {
            if !cascade_inner.contains(&name.as_str()) {
                continue;
            }
            let frozen = self.interlocks.holds(&binding.out_tag);
            pid.set_frozen(frozen);
            if let Some(pv) = values.get(&binding.pv_tag) {
                let out = pid.step(*pv, dt);
                writes.insert(binding.out_tag.clone(), out);
            }
        }

        // Sequencers.
        for sequencer in &mut self.sequencers {
            for action in sequencer.scan(values, now) {
                writes.insert(action.target, action.value);
            }
        }

        // Interlock holds override everything.
        for (target, safe_value) in &held {
            writes.insert(target.clone(), *safe_value);
        }

        ScanResult {
            writes: writes
                .into_iter()
                .map(|(target, value)| ActuatorWrite { target, value })
                .collect(),
            held: held.keys().cloned().collect(),
        }
    }
}
