// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Alarm rule definitions and condition evaluation.

use serde::{Deserialize, Serialize};

/// Alarm severity (ISA-101 color mapping is the HMI's business).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum Severity {
    Info = 0,
    Warn = 1,
    Crit = 2,
    Emerg = 3,
}

/// Trip condition kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum AlarmCondition {
    Hi = 0,
    Lo = 1,
    HiHi = 2,
    LoLo = 3,
    /// Rate of change, units per second.
    Roc = 4,
    /// Deviation from the reference (set-point).
    Dev = 5,
}

/// One configured alarm rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlarmRule {
    pub rule_id: u32,
    /// Sensor tag ("station:slot").
    pub tag: String,
    pub condition: AlarmCondition,
    pub threshold: f64,
    pub hysteresis: f64,
    pub delay_ms: u64,
    pub severity: Severity,
    pub enabled: bool,
    /// Reference value for DEV rules.
    #[serde(default)]
    pub reference: f64,
}

impl AlarmRule {
    /// Trip check. `rate` is the derived units-per-second slope for ROC.
    pub fn trips(&self, value: f64, rate: f64) -> bool {
        match self.condition {
            AlarmCondition::Hi | AlarmCondition::HiHi => value > self.threshold,
            AlarmCondition::Lo | AlarmCondition::LoLo => value < self.threshold,
            AlarmCondition::Roc => rate.abs() > self.threshold,
            AlarmCondition::Dev => (value - self.reference).abs() > self.threshold,
        }
    }

    /// Clear check, hysteresis respected.
    pub fn clears(&self, value: f64, rate: f64) -> bool {
        match self.condition {
            AlarmCondition::Hi | AlarmCondition::HiHi => value < self.threshold - self.hysteresis,
            AlarmCondition::Lo | AlarmCondition::LoLo => value > self.threshold + self.hysteresis,
            AlarmCondition::Roc => rate.abs() < (self.threshold - self.hysteresis).max(0.0),
            AlarmCondition::Dev => {
                (value - self.reference).abs() < (self.threshold - self.hysteresis).max(0.0)
            }
        }
    }

    /// Station half of the tag.
    pub fn station(&self) -> &str {
        self.tag.split(':').next().unwrap_or(&self.tag)
    }

    /// Slot half of the tag (0 when absent).
    pub fn slot(&self) -> u16 {
        self.tag
            .split(':')
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(condition: AlarmCondition, threshold: f64, hysteresis: f64) -> AlarmRule {
        AlarmRule {
            rule_id: 1,
            tag: "intake-rtu-01:4".into(),
            condition,
            threshold,
            hysteresis,
            delay_ms: 0,
            severity: Severity::Warn,
            enabled: true,
            reference: 7.0,
        }
    }

    #[test]
    fn test_hi_with_hysteresis() {
        let r = rule(AlarmCondition::Hi, 8.5, 0.3);
        assert!(!r.trips(8.5, 0.0));
        assert!(r.trips(8.6, 0.0));
        // Inside the hysteresis band: neither trips nor clears.
        assert!(!r.trips(8.4, 0.0));
        assert!(!r.clears(8.4, 0.0));
        assert!(r.clears(8.1, 0.0));
    }

    #[test]
    fn test_lo_with_hysteresis() {
        let r = rule(AlarmCondition::Lo, 2.0, 0.5);
        assert!(r.trips(1.9, 0.0));
        assert!(!r.clears(2.3, 0.0));
        assert!(r.clears(2.6, 0.0));
    }

    #[test]
    fn test_roc_uses_rate() {
        let r = rule(AlarmCondition::Roc, 1.0, 0.2);
        assert!(!r.trips(100.0, 0.5));
        assert!(r.trips(0.0, 1.5));
        assert!(r.trips(0.0, -1.5));
        assert!(r.clears(0.0, 0.5));
    }

    #[test]
    fn test_dev_from_reference() {
        let r = rule(AlarmCondition::Dev, 1.0, 0.2);
        assert!(!r.trips(7.5, 0.0));
        assert!(r.trips(8.5, 0.0));
        assert!(r.trips(5.5, 0.0));
        assert!(r.clears(7.1, 0.0));
    }

    #[test]
    fn test_tag_split() {
        let r = rule(AlarmCondition::Hi, 8.5, 0.0);
        assert_eq!(r.station(), "intake-rtu-01");
        assert_eq!(r.slot(), 4);
    }
}
