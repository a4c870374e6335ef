// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! User-defined step sequencers.
//!
//! A sequencer walks a step table: entering a step fires its entry
//! actions; the step holds until its hold condition passes and its exit
//! guard allows; then the next step enters. The last step's exit wraps to
//! the first when `cyclic`, otherwise the sequencer parks there.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Condition over the sensor snapshot / elapsed step time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Condition {
    Always,
    SensorAbove { tag: String, value: f64 },
    SensorBelow { tag: String, value: f64 },
    /// Time in the current step.
    ElapsedMs(u64),
}

impl Condition {
    fn satisfied(&self, values: &HashMap<String, f64>, in_step: Duration) -> bool {
        match self {
            Condition::Always => true,
            Condition::SensorAbove { tag, value } => {
                values.get(tag).map(|v| *v > *value).unwrap_or(false)
            }
            Condition::SensorBelow { tag, value } => {
                values.get(tag).map(|v| *v < *value).unwrap_or(false)
            }
            Condition::ElapsedMs(ms) => in_step >= Duration::from_millis(*ms),
        }
    }
}

/// Entry action: write an actuator tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepAction {
    pub target: String,
    pub value: f64,
}

/// One step of the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub entry_actions: Vec<StepAction>,
    /// Must pass before the exit guard is even consulted.
    pub hold: Condition,
    pub exit: Condition,
}

#[derive(Debug)]
pub struct Sequencer {
    name: String,
    steps: Vec<Step>,
    cyclic: bool,
    current: usize,
    entered_at: Option<Instant>,
}

impl Sequencer {
    pub fn new(name: impl Into<String>, steps: Vec<Step>, cyclic: bool) -> Self {
        Self {
            name: name.into(),
            steps,
            cyclic,
            current: 0,
            entered_at: None,
        }
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.steps.get(self.current)
    }

    /// Advance one scan; returns entry actions fired this scan.
    pub fn scan(&mut self, values: &HashMap<String, f64>, now: Instant) -> Vec<StepAction> {
        if self.steps.is_empty() {
            return Vec::new();
        }
        let mut fired = Vec::new();

        // First scan enters step 0.
        if self.entered_at.is_none() {
            self.entered_at = Some(now);
            fired.extend(self.steps[self.current].entry_actions.iter().cloned());
            log::debug!(
                "[Sequencer] {} entered step '{}'",
                self.name,
                self.steps[self.current].name
            );
        }

        let in_step = now.duration_since(self.entered_at.unwrap_or(now));
        let step = &self.steps[self.current];
        if step.hold.satisfied(values, in_step) && step.exit.satisfied(values, in_step) {
            let next = self.current + 1;
            let next = if next >= self.steps.len() {
                if self.cyclic {
                    0
                } else {
                    return fired; // park on the final step
                }
            } else {
                next
            };
            self.current = next;
            self.entered_at = Some(now);
            fired.extend(self.steps[self.current].entry_actions.iter().cloned());
            log::debug!(
                "[Sequencer] {} entered step '{}'",
                self.name,
                self.steps[self.current].name
            );
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backwash_steps() -> Vec<Step> {
        vec![
            Step {
                name: "drain".into(),
                entry_actions: vec![StepAction {
                    target: "filter-valve".into(),
                    value: 0.0,
                }],
                hold: Condition::ElapsedMs(100),
                exit: Condition::SensorBelow {
                    tag: "filter-level".into(),
                    value: 0.2,
                },
            },
            Step {
                name: "rinse".into(),
                entry_actions: vec![StepAction {
                    target: "rinse-pump".into(),
                    value: 100.0,
                }],
                hold: Condition::ElapsedMs(200),
                exit: Condition::Always,
            },
        ]
    }

    fn values(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_first_scan_enters_step_zero() {
        let mut seq = Sequencer::new("backwash", backwash_steps(), false);
        let fired = seq.scan(&values(&[]), Instant::now());
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].target, "filter-valve");
        assert_eq!(seq.current_step().expect("step").name, "drain");
    }

    #[test]
    fn test_hold_blocks_until_elapsed() {
        let mut seq = Sequencer::new("backwash", backwash_steps(), false);
        let t0 = Instant::now();
        seq.scan(&values(&[("filter-level", 0.1)]), t0);
        // Exit guard passes, but the 100 ms hold has not elapsed.
        let fired = seq.scan(&values(&[("filter-level", 0.1)]), t0 + Duration::from_millis(50));
        assert!(fired.is_empty());
        assert_eq!(seq.current_step().expect("step").name, "drain");
        // Both conditions pass: advance.
        let fired = seq.scan(&values(&[("filter-level", 0.1)]), t0 + Duration::from_millis(150));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].target, "rinse-pump");
    }

    #[test]
    fn test_exit_guard_blocks() {
        let mut seq = Sequencer::new("backwash", backwash_steps(), false);
        let t0 = Instant::now();
        seq.scan(&values(&[("filter-level", 1.0)]), t0);
        let fired = seq.scan(&values(&[("filter-level", 1.0)]), t0 + Duration::from_millis(500));
        assert!(fired.is_empty(), "exit guard not met, stay in drain");
    }

    #[test]
    fn test_acyclic_parks_on_last_step() {
        let mut seq = Sequencer::new("backwash", backwash_steps(), false);
        let t0 = Instant::now();
        seq.scan(&values(&[("filter-level", 0.1)]), t0);
        seq.scan(&values(&[("filter-level", 0.1)]), t0 + Duration::from_millis(150));
        assert_eq!(seq.current_step().expect("step").name, "rinse");
        // Rinse holds 200 ms then exits Always; acyclic: parks.
        let fired = seq.scan(&values(&[]), t0 + Duration::from_millis(400));
        assert!(fired.is_empty());
        assert_eq!(seq.current_step().expect("step").name, "rinse");
    }

    #[test]
    fn test_cyclic_wraps_to_first() {
        let mut seq = Sequencer::new("backwash", backwash_steps(), true);
        let t0 = Instant::now();
        seq.scan(&values(&[("filter-level", 0.1)]), t0);
        seq.scan(&values(&[("filter-level", 0.1)]), t0 + Duration::from_millis(150));
        let fired = seq.scan(&values(&[]), t0 + Duration::from_millis(400));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].target, "filter-valve");
        assert_eq!(seq.current_step().expect("step").name, "drain");
    }
}
