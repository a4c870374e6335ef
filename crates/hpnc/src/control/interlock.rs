// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Interlock rules: force an actuator to its safe state on a sensor trip.
//!
//! A rule trips after its condition holds continuously for the trip delay.
//! Multiple rules on the same actuator OR-combine -- any tripped rule wins
//! and the safe state is applied.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Which side of the threshold trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TripDirection {
    Above,
    Below,
}

/// One interlock rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterlockRule {
    pub id: u32,
    /// Sensor tag ("station:slot").
    pub sensor: String,
    pub threshold: f64,
    pub direction: TripDirection,
    /// Actuator tag forced on trip.
    pub target: String,
    /// Safe-state value written while tripped.
    pub safe_value: f64,
    pub trip_delay_ms: u64,
}

impl InterlockRule {
    fn condition_met(&self, value: f64) -> bool {
        match self.direction {
            TripDirection::Above => value > self.threshold,
            TripDirection::Below => value < self.threshold,
        }
    }
}

#[derive(Debug, Default)]
struct RuleState {
    pending_since: Option<Instant>,
    tripped: bool,
}

/// The configured rule set plus per-rule runtime state.
#[derive(Debug, Default)]
pub struct InterlockSet {
    rules: Vec<InterlockRule>,
    states: Vec<RuleState>,
}

impl InterlockSet {
    pub fn new(rules: Vec<InterlockRule>) -> Self {
        let states = rules.iter().map(|_| RuleState::default()).collect();
        Self { rules, states }
    }

    pub fn rules(&self) -> &[InterlockRule] {
        &self.rules
    }

    /// Evaluate every rule against the sensor snapshot.
    ///
    /// Returns the actuators currently held: target tag -> safe value.
    /// A sensor missing from the snapshot keeps its rule's previous trip
    /// state (fail-safe: a tripped rule does not release on data loss).
    pub fn evaluate(
        &mut self,
        values: &HashMap<String, f64>,
        now: Instant,
    ) -> HashMap<String, f64> {
        let mut held = HashMap::new();
        for (rule, state) in self.rules.iter().zip(self.states.iter_mut()) {
            if let Some(value) = values.get(&rule.sensor) {
                if rule.condition_met(*value) {
                    let since = *state.pending_since.get_or_insert(now);
                    if now.duration_since(since) >= Duration::from_millis(rule.trip_delay_ms) {
                        if !state.tripped {
                            log::warn!(
                                "[Interlock] rule {} tripped sensor={} value={} target={}",
                                rule.id,
                                rule.sensor,
                                value,
                                rule.target
                            );
                        }
                        state.tripped = true;
                    }
                } else {
                    state.pending_since = None;
                    if state.tripped {
                        log::info!("[Interlock] rule {} released target={}", rule.id, rule.target);
                    }
                    state.tripped = false;
                }
            }

            if state.tripped {
                // OR-combination: safe state wins; for conflicting safe
                // values the lowest (most conservative) applies.
                held.entry(rule.target.clone())
                    .and_modify(|v: &mut f64| *v = v.min(rule.safe_value))
                    .or_insert(rule.safe_value);
            }
        }
        held
    }

    /// Whether any rule currently holds the given actuator.
    pub fn holds(&self, target: &str) -> bool {
        self.rules
            .iter()
            .zip(self.states.iter())
            .any(|(rule, state)| state.tripped && rule.target == target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: u32, sensor: &str, target: &str, delay_ms: u64) -> InterlockRule {
        InterlockRule {
            id,
            sensor: sensor.to_string(),
            threshold: 8.5,
            direction: TripDirection::Above,
            target: target.to_string(),
            safe_value: 0.0,
            trip_delay_ms: delay_ms,
        }
    }

    fn values(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_trip_after_delay() {
        let mut set = InterlockSet::new(vec![rule(1, "ph", "dosing-pump", 100)]);
        let t0 = Instant::now();
        // Condition met but delay not elapsed.
        assert!(set.evaluate(&values(&[("ph", 9.0)]), t0).is_empty());
        // Still pending at +50ms.
        assert!(set
            .evaluate(&values(&[("ph", 9.0)]), t0 + Duration::from_millis(50))
            .is_empty());
        // Tripped at +150ms.
        let held = set.evaluate(&values(&[("ph", 9.0)]), t0 + Duration::from_millis(150));
        assert_eq!(held.get("dosing-pump"), Some(&0.0));
        assert!(set.holds("dosing-pump"));
    }

    #[test]
    fn test_release_resets_delay() {
        let mut set = InterlockSet::new(vec![rule(1, "ph", "dosing-pump", 100)]);
        let t0 = Instant::now();
        set.evaluate(&values(&[("ph", 9.0)]), t0);
        // Condition clears before the delay elapses: pending resets.
        set.evaluate(&values(&[("ph", 7.0)]), t0 + Duration::from_millis(50));
        let held = set.evaluate(&values(&[("ph", 9.0)]), t0 + Duration::from_millis(120));
        assert!(held.is_empty(), "delay must restart after a release");
    }

    #[test]
    fn test_or_combination_on_shared_actuator() {
        let mut set = InterlockSet::new(vec![
            rule(1, "ph", "dosing-pump", 0),
            InterlockRule {
                id: 2,
                sensor: "turbidity".into(),
                threshold: 4.0,
                direction: TripDirection::Above,
                target: "dosing-pump".into(),
                safe_value: 5.0,
                trip_delay_ms: 0,
            },
        ]);
        let now = Instant::now();
        // Only the second rule trips: its safe value applies.
        let held = set.evaluate(&values(&[("ph", 7.0), ("turbidity", 5.0)]), now);
        assert_eq!(held.get("dosing-pump"), Some(&5.0));
        // Both trip: the most conservative (lowest) safe value wins.
        let held = set.evaluate(&values(&[("ph", 9.0), ("turbidity", 5.0)]), now);
        assert_eq!(held.get("dosing-pump"), Some(&0.0));
    }

    #[test]
    fn test_missing_sensor_keeps_trip_state() {
        let mut set = InterlockSet::new(vec![rule(1, "ph", "dosing-pump", 0)]);
        let now = Instant::now();
        assert!(!set.evaluate(&values(&[("ph", 9.0)]), now).is_empty());
        // Sensor vanished from the snapshot: the hold stays.
        assert!(!set.evaluate(&HashMap::new(), now).is_empty());
    }

    #[test]
    fn test_below_direction() {
        let mut set = InterlockSet::new(vec![InterlockRule {
            id: 3,
            sensor: "level".into(),
            threshold: 1.0,
            direction: TripDirection::Below,
            target: "intake-pump".into(),
            safe_value: 0.0,
            trip_delay_ms: 0,
        }]);
        let now = Instant::now();
        assert!(set.evaluate(&values(&[("level", 2.0)]), now).is_empty());
        assert!(!set.evaluate(&values(&[("level", 0.5)]), now).is_empty());
    }
}
