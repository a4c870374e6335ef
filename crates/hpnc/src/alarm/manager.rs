// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Alarm manager: evaluation, operator actions, shelving, flood detection.

use super::rules::{AlarmCondition, AlarmRule};
use super::{Alarm, AlarmState};
use crate::config::AlarmConfig;
use crate::diag::{DiagCode, DiagEvent, DiagHub, DiagSeverity};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Flood benchmark window (ISA-18.2: alarms per 10 minutes).
const FLOOD_WINDOW_NS: i64 = 600 * 1_000_000_000;

/// Operator/audit actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Ack,
    Shelve,
    Unshelve,
    Suppress,
    Unsuppress,
    OutOfService,
    ReturnToService,
}

/// One audit-trail entry.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub timestamp_ns: i64,
    pub rule_id: u32,
    pub action: AuditAction,
    pub operator: String,
    pub reason: String,
}

#[derive(Debug, Default)]
struct RuleRuntime {
    /// Condition continuously satisfied since (sample time).
    pending_since_ns: Option<i64>,
    shelved_until_ns: i64,
    suppressed: bool,
    out_of_service: bool,
}

pub struct AlarmManager {
    rules: Vec<AlarmRule>,
    runtime: HashMap<u32, RuleRuntime>,
    /// Live alarms by rule id (one instance per rule at a time).
    active: HashMap<u32, Alarm>,
    /// Closed alarms, bounded.
    history: VecDeque<Alarm>,
    audit: VecDeque<AuditEntry>,
    /// Trip timestamps inside the rolling flood window.
    flood_trips: VecDeque<i64>,
    flood_raised: bool,
    /// Last sample per tag for ROC slopes.
    last_sample: HashMap<String, (f64, i64)>,
    next_alarm_id: u32,
    config: AlarmConfig,
    diag: Arc<DiagHub>,
}

impl AlarmManager {
    pub fn new(rules: Vec<AlarmRule>, config: AlarmConfig, diag: Arc<DiagHub>) -> Self {
        let runtime = rules
            .iter()
            .map(|r| (r.rule_id, RuleRuntime::default()))
            .collect();
        Self {
            rules,
            runtime,
            active: HashMap::new(),
            history: VecDeque::new(),
            audit: VecDeque::new(),
            flood_trips: VecDeque::new(),
            flood_raised: false,
            last_sample: HashMap::new(),
            next_alarm_id: 1,
            config,
            diag,
        }
    }

    /// Evaluate every rule targeting `tag` against a new sample.
    pub fn process_sample(&mut self, tag: &str, value: f64, timestamp_ns: i64) {
        let rate = match self.last_sample.get(tag) {
            Some((last_value, last_ts)) if timestamp_ns > *last_ts => {
                (value - last_value) / ((timestamp_ns - last_ts) as f64 / 1e9)
            }
            _ => 0.0,
        };
        self.last_sample.insert(tag.to_string(), (value, timestamp_ns));

        // Indices first; the borrow of rules must end before mutation.
        let rule_ids: Vec<u32> = self
            .rules
            .iter()
            .filter(|r| r.enabled && r.tag == tag)
            .map(|r| r.rule_id)
            .collect();

        for rule_id in rule_ids {
            self.evaluate_rule(rule_id, value, rate, timestamp_ns);
        }
    }

    fn evaluate_rule(&mut self, rule_id: u32, value: f64, rate: f64, timestamp_ns: i64) {
        let Some(rule) = self.rules.iter().find(|r| r.rule_id == rule_id).cloned() else {
            return;
        };
        let (out_of_service, suppressed, shelved_until) = {
            let runtime = self.runtime.entry(rule_id).or_default();
            (
                runtime.out_of_service,
                runtime.suppressed,
                runtime.shelved_until_ns,
            )
        };
        if out_of_service || suppressed {
            return;
        }
        let shelved = shelved_until > timestamp_ns;

        let state = self.active.get(&rule_id).map(|a| a.state);
        match state {
            None | Some(AlarmState::Normal) => {
                if rule.trips(value, rate) {
                    let since = {
                        let runtime = self.runtime.entry(rule_id).or_default();
                        *runtime.pending_since_ns.get_or_insert(timestamp_ns)
                    };
                    if timestamp_ns - since >= rule.delay_ms as i64 * 1_000_000 {
                        if let Some(runtime) = self.runtime.get_mut(&rule_id) {
                            runtime.pending_since_ns = None;
                        }
                        self.trip(&rule, value, timestamp_ns, shelved, shelved_until);
                    }
                } else if let Some(runtime) = self.runtime.get_mut(&rule_id) {
                    runtime.pending_since_ns = None;
                }
            }
            Some(AlarmState::ActiveUnack) => {
                if rule.clears(value, rate) {
                    self.transition(rule_id, AlarmState::ClearedUnack, timestamp_ns, "");
                }
            }
            Some(AlarmState::ActiveAck) => {
                if rule.clears(value, rate) {
                    self.transition(rule_id, AlarmState::Normal, timestamp_ns, "");
                }
            }
            Some(AlarmState::ClearedUnack) => {
                // Re-trip while awaiting ack: a fresh activation.
                if rule.trips(value, rate) {
                    self.close_to_history(rule_id);
                    self.trip(&rule, value, timestamp_ns, shelved, shelved_until);
                }
            }
        }
    }

    fn trip(
        &mut self,
        rule: &AlarmRule,
        value: f64,
        timestamp_ns: i64,
        shelved: bool,
        shelved_until_ns: i64,
    ) {
        let alarm = Alarm {
            id: self.next_alarm_id,
            rule_id: rule.rule_id,
            rtu: rule.station().to_string(),
            slot: rule.slot(),
            severity: rule.severity,
            condition: rule.condition,
            state: AlarmState::ActiveUnack,
            trip_ts_ns: timestamp_ns,
            clear_ts_ns: 0,
            ack_ts_ns: 0,
            trip_value: value,
            operator: String::new(),
            shelved_until_ns,
        };
        self.next_alarm_id += 1;
        log::warn!(
            "[Alarm] rule {} tripped tag={} value={} severity={:?}{}",
            rule.rule_id,
            rule.tag,
            value,
            rule.severity,
            if shelved { " (shelved)" } else { "" }
        );
        self.active.insert(rule.rule_id, alarm);
        if !shelved {
            self.note_flood_trip(timestamp_ns);
        }
    }

    /// Guarded state write; anything outside the table is refused with a
    /// diagnostic.
    fn transition(&mut self, rule_id: u32, next: AlarmState, timestamp_ns: i64, operator: &str) -> bool {
        let Some(alarm) = self.active.get_mut(&rule_id) else {
            return false;
        };
        if !alarm.state.can_transition_to(next) {
            self.diag.raise(
                DiagEvent::new(
                    DiagCode::AlarmTransitionDenied,
                    DiagSeverity::Warning,
                    "Alarm",
                    "illegal alarm state transition refused",
                )
                .with("rule", rule_id)
                .with("from", alarm.state)
                .with("to", next),
            );
            return false;
        }
        log::info!(
            "[Alarm] rule {} {} -> {}",
            rule_id,
            alarm.state,
            next
        );
        match next {
            AlarmState::ActiveAck => {
                alarm.ack_ts_ns = timestamp_ns;
                alarm.operator = operator.to_string();
            }
            AlarmState::ClearedUnack => {
                alarm.clear_ts_ns = timestamp_ns;
            }
            AlarmState::Normal => {
                if alarm.clear_ts_ns == 0 {
                    alarm.clear_ts_ns = timestamp_ns;
                }
                if !operator.is_empty() {
                    alarm.ack_ts_ns = timestamp_ns;
                    alarm.operator = operator.to_string();
                }
            }
            AlarmState::ActiveUnack => {}
        }
        alarm.state = next;
        if next == AlarmState::Normal {
            self.close_to_history(rule_id);
        }
        true
    }

    fn close_to_history(&mut self, rule_id: u32) {
        if let Some(mut alarm) = self.active.remove(&rule_id) {
            if alarm.state != AlarmState::Normal {
                alarm.state = AlarmState::Normal;
            }
            self.history.push_back(alarm);
            while self.history.len() > self.config.history_capacity {
                self.history.pop_front();
            }
        }
    }

    // ===== Operator actions =====

    /// Acknowledge: ACTIVE_UNACK -> ACTIVE_ACK, CLEARED_UNACK -> NORMAL.
    pub fn acknowledge(&mut self, rule_id: u32, operator: &str, timestamp_ns: i64) -> bool {
        let next = match self.active.get(&rule_id).map(|a| a.state) {
            Some(AlarmState::ActiveUnack) => AlarmState::ActiveAck,
            Some(AlarmState::ClearedUnack) => AlarmState::Normal,
            _ => {
                self.diag.raise(
                    DiagEvent::new(
                        DiagCode::AlarmTransitionDenied,
                        DiagSeverity::Warning,
                        "Alarm",
                        "acknowledge without an acknowledgeable alarm",
                    )
                    .with("rule", rule_id),
                );
                return false;
            }
        };
        let ok = self.transition(rule_id, next, timestamp_ns, operator);
        if ok {
            self.push_audit(rule_id, AuditAction::Ack, operator, "", timestamp_ns);
        }
        ok
    }

    /// Shelve: time-boxed suppression, audited, duration capped by config.
    pub fn shelve(
        &mut self,
        rule_id: u32,
        minutes: u32,
        operator: &str,
        reason: &str,
        timestamp_ns: i64,
    ) -> bool {
        if reason.is_empty() {
            return false;
        }
        let minutes = minutes.min(self.config.max_shelve_minutes);
        let Some(runtime) = self.runtime.get_mut(&rule_id) else {
            return false;
        };
        runtime.shelved_until_ns = timestamp_ns + i64::from(minutes) * 60 * 1_000_000_000;
        if let Some(alarm) = self.active.get_mut(&rule_id) {
            alarm.shelved_until_ns = runtime.shelved_until_ns;
        }
        self.push_audit(rule_id, AuditAction::Shelve, operator, reason, timestamp_ns);
        true
    }

    pub fn unshelve(&mut self, rule_id: u32, operator: &str, timestamp_ns: i64) -> bool {
        let Some(runtime) = self.runtime.get_mut(&rule_id) else {
            return false;
        };
        runtime.shelved_until_ns = 0;
        if let Some(alarm) = self.active.get_mut(&rule_id) {
            alarm.shelved_until_ns = 0;
        }
        self.push_audit(rule_id, AuditAction::Unshelve, operator, "", timestamp_ns);
        true
    }

    /// Suppress by design; requires a reason, always audited.
    pub fn suppress(&mut self, rule_id: u32, operator: &str, reason: &str, timestamp_ns: i64) -> bool {
        if reason.is_empty() {
            return false;
        }
        let Some(runtime) = self.runtime.get_mut(&rule_id) else {
            return false;
        };
        runtime.suppressed = true;
        self.push_audit(rule_id, AuditAction::Suppress, operator, reason, timestamp_ns);
        true
    }

    pub fn unsuppress(&mut self, rule_id: u32, operator: &str, timestamp_ns: i64) -> bool {
        let Some(runtime) = self.runtime.get_mut(&rule_id) else {
            return false;
        };
        runtime.suppressed = false;
        self.push_audit(rule_id, AuditAction::Unsuppress, operator, "", timestamp_ns);
        true
    }

    /// Out-of-service: rule disabled with reason.
    pub fn out_of_service(&mut self, rule_id: u32, operator: &str, reason: &str, timestamp_ns: i64) -> bool {
        if reason.is_empty() {
            return false;
        }
        let Some(runtime) = self.runtime.get_mut(&rule_id) else {
            return false;
        };
        runtime.out_of_service = true;
        self.push_audit(rule_id, AuditAction::OutOfService, operator, reason, timestamp_ns);
        true
    }

    pub fn return_to_service(&mut self, rule_id: u32, operator: &str, timestamp_ns: i64) -> bool {
        let Some(runtime) = self.runtime.get_mut(&rule_id) else {
            return false;
        };
        runtime.out_of_service = false;
        self.push_audit(rule_id, AuditAction::ReturnToService, operator, "", timestamp_ns);
        true
    }

    fn push_audit(&mut self, rule_id: u32, action: AuditAction, operator: &str, reason: &str, timestamp_ns: i64) {
        self.audit.push_back(AuditEntry {
            timestamp_ns,
            rule_id,
            action,
            operator: operator.to_string(),
            reason: reason.to_string(),
        });
        while self.audit.len() > self.config.history_capacity {
            self.audit.pop_front();
        }
    }

    // ===== Flood detection =====

    fn note_flood_trip(&mut self, timestamp_ns: i64) {
        self.flood_trips.push_back(timestamp_ns);
        while let Some(front) = self.flood_trips.front() {
            if timestamp_ns - front > FLOOD_WINDOW_NS {
                self.flood_trips.pop_front();
            } else {
                break;
            }
        }
        if self.flood_trips.len() as u32 > self.config.flood_per_10min {
            if !self.flood_raised {
                self.flood_raised = true;
                self.diag.raise(
                    DiagEvent::new(
                        DiagCode::AlarmFlood,
                        DiagSeverity::Error,
                        "Alarm",
                        "alarm rate above the flood benchmark",
                    )
                    .with("count", self.flood_trips.len())
                    .with("window_min", 10),
                );
            }
        } else {
            self.flood_raised = false;
        }
    }

    // ===== Accessors =====

    pub fn state_of(&self, rule_id: u32) -> AlarmState {
        self.active
            .get(&rule_id)
            .map(|a| a.state)
            .unwrap_or(AlarmState::Normal)
    }

    pub fn active_alarm(&self, rule_id: u32) -> Option<&Alarm> {
        self.active.get(&rule_id)
    }

    /// Active alarms, unshelved first, severity-descending inside each
    /// group (export order for the shared-state block).
    pub fn active_alarms(&self) -> Vec<&Alarm> {
        let mut alarms: Vec<&Alarm> = self.active.values().collect();
        alarms.sort_by(|a, b| {
            let a_shelved = a.shelved_until_ns != 0;
            let b_shelved = b.shelved_until_ns != 0;
            a_shelved
                .cmp(&b_shelved)
                .then(b.severity.cmp(&a.severity))
                .then(a.trip_ts_ns.cmp(&b.trip_ts_ns))
        });
        alarms
    }

    pub fn history(&self) -> impl Iterator<Item = &Alarm> {
        self.history.iter()
    }

    pub fn audit_trail(&self) -> impl Iterator<Item = &AuditEntry> {
        self.audit.iter()
    }
}
