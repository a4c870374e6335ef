// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Supervisory coordinator: health, failover, load balancing, cascade.
//!
//! Runs at normal priority on its own thread; each heartbeat interval it
//! reads the AR summaries, updates RTU health, and -- in automatic mode --
//! fails a primary's workload over to its secondary after three missed
//! heartbeats or a sustained FAULT. Hot-standby pairs keep both ARs live;
//! the coordinator only moves the trusted-feedback designation.

use super::authority::AuthorityTable;
use super::{RtuHealth, RtuRegistry, RtuRole};
use crate::ar::{ArManager, ArState};
use crate::config::{BalancePolicy, CoordinatorConfig, FailoverMode, FAILOVER_MISSED_HEARTBEATS};
use crate::diag::{DiagCode, DiagEvent, DiagHub, DiagSeverity};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Events other subsystems subscribe to (set-point reissue after a
/// promotion happens in the control engine).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    /// Secondary promoted; commands must re-target it.
    Promoted {
        failed: String,
        promoted: String,
        authority_generation: u64,
    },
    /// Health changed (operator alert in manual mode).
    HealthChanged { station: String, health: RtuHealth },
}

/// Declared cascade pairing: the outer loop's output feeds the inner
/// loop's set-point. Wired at runtime by the control engine.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CascadeLink {
    pub outer_loop: String,
    pub inner_loop: String,
}

pub struct Coordinator {
    registry: Arc<RtuRegistry>,
    manager: Arc<ArManager>,
    authority: Arc<AuthorityTable>,
    diag: Arc<DiagHub>,
    config: CoordinatorConfig,
    events: Sender<CoordinatorEvent>,
    cascades: Vec<CascadeLink>,
    round_robin: Mutex<usize>,
}

impl Coordinator {
    pub fn new(
        registry: Arc<RtuRegistry>,
        manager: Arc<ArManager>,
        authority: Arc<AuthorityTable>,
        diag: Arc<DiagHub>,
        config: CoordinatorConfig,
        events: Sender<CoordinatorEvent>,
    ) -> Self {
        Self {
            registry,
            manager,
            authority,
            diag,
            config,
            events,
            cascades: Vec::new(),
            round_robin: Mutex::new(0),
        }
    }

    pub fn with_cascades(mut self, cascades: Vec<CascadeLink>) -> Self {
        self.cascades = cascades;
        self
    }

    pub fn cascades(&self) -> &[CascadeLink] {
        &self.cascades
    }

    /// One heartbeat evaluation pass. Called from the coordinator thread
    /// at `heartbeat_interval`; exposed for deterministic tests.
    pub fn heartbeat_tick(&self, now: Instant) {
        let summaries = self.manager.snapshot();
        let heartbeat_interval = Duration::from_millis(self.config.heartbeat_interval_ms);
        let failover_timeout = Duration::from_millis(self.config.failover_timeout_ms);

        for rtu in self.registry.snapshot() {
            let summary = rtu
                .ar
                .and_then(|ar| summaries.iter().find(|s| s.id == ar));

            let (health, beating) = match summary {
                Some(s) => match s.state {
                    ArState::Run => {
                        // A live AR heartbeats through its cyclic input.
                        let fresh = s
                            .last_input_age
                            .map(|age| age <= heartbeat_interval)
                            .unwrap_or(false);
                        if fresh {
                            (RtuHealth::Healthy, true)
                        } else {
                            (RtuHealth::Degraded, false)
                        }
                    }
                    ArState::Fault => {
                        let faulted_long = s
                            .fault_since
                            .map(|t| now.duration_since(t) >= failover_timeout)
                            .unwrap_or(false);
                        (
                            if faulted_long {
                                RtuHealth::Failed
                            } else {
                                RtuHealth::Degraded
                            },
                            false,
                        )
                    }
                    _ => (RtuHealth::Unknown, false),
                },
                None => (RtuHealth::Unknown, false),
            };

            if beating {
                self.registry.heartbeat(&rtu.station_name, now);
            } else {
                let missed = self.registry.record_missed_heartbeat(&rtu.station_name);
                log::debug!(
                    "[Coordinator] station={} missed heartbeat #{}",
                    rtu.station_name,
                    missed
                );
            }

            if health != rtu.health {
                self.registry.set_health(&rtu.station_name, health);
                let _ = self.events.send(CoordinatorEvent::HealthChanged {
                    station: rtu.station_name.clone(),
                    health,
                });
                log::info!(
                    "[Coordinator] station={} health {:?} -> {:?}",
                    rtu.station_name,
                    rtu.health,
                    health
                );
            }
        }

        if self.config.failover_mode != FailoverMode::Manual {
            self.evaluate_failovers(now);
        }
    }

    fn evaluate_failovers(&self, now: Instant) {
        for rtu in self.registry.snapshot() {
            if rtu.role != RtuRole::Primary {
                continue;
            }
            let Some(partner) = rtu.partner.clone() else {
                continue;
            };

            let heartbeats_gone = rtu.missed_heartbeats >= FAILOVER_MISSED_HEARTBEATS;
            let ar_failed = rtu.health == RtuHealth::Failed;
            if !heartbeats_gone && !ar_failed {
                continue;
            }

            // The secondary must be able to take the load.
            let Some(secondary) = self.registry.get(&partner) else {
                continue;
            };
            if secondary.health == RtuHealth::Failed {
                log::warn!(
                    "[Coordinator] primary {} failed but secondary {} is down too",
                    rtu.station_name,
                    partner
                );
                continue;
            }

            self.promote(&rtu.station_name, &partner, now);
        }
    }

    /// Promote `secondary`, retiring `primary`. Bumps the authority
    /// generation so in-flight commands for the old primary die stale.
    fn promote(&self, primary: &str, secondary: &str, _now: Instant) {
        self.registry.set_health(primary, RtuHealth::Failed);
        self.registry.set_role(primary, RtuRole::Secondary);
        self.registry.set_role(secondary, RtuRole::Primary);
        let generation = self.authority.bump(primary);

        self.diag.raise(
            DiagEvent::new(
                DiagCode::FailoverPromoted,
                DiagSeverity::Warning,
                "Coordinator",
                "primary failed, secondary promoted",
            )
            .with("failed", primary)
            .with("promoted", secondary)
            .with("generation", generation),
        );
        let _ = self.events.send(CoordinatorEvent::Promoted {
            failed: primary.to_string(),
            promoted: secondary.to_string(),
            authority_generation: generation,
        });
    }

    /// Pick the station the next command for a balanced group goes to.
    pub fn select_balanced_target(&self) -> Option<String> {
        let peers = self.registry.balanced_peers();
        if peers.is_empty() {
            return None;
        }
        match self.config.balance_policy {
            BalancePolicy::RoundRobin => {
                let mut cursor = self.round_robin.lock();
                let pick = peers[*cursor % peers.len()].clone();
                *cursor = cursor.wrapping_add(1);
                Some(pick)
            }
            BalancePolicy::LeastLoaded => {
                // Load proxy: cycle age of the AR's last input; the
                // freshest input wins (error-rate folding happens upstream
                // in health).
                let summaries = self.manager.snapshot();
                peers
                    .into_iter()
                    .min_by_key(|name| {
                        self.registry
                            .get(name)
                            .and_then(|r| r.ar)
                            .and_then(|ar| summaries.iter().find(|s| s.id == ar))
                            .and_then(|s| s.last_input_age)
                            .unwrap_or(Duration::MAX)
                    })
            }
        }
    }

    /// Blocking coordinator loop.
    pub fn run(&self, stop: &std::sync::atomic::AtomicBool) {
        let interval = Duration::from_millis(self.config.heartbeat_interval_ms);
        log::info!(
            "[Coordinator] started mode={:?} interval={:?}",
            self.config.failover_mode,
            interval
        );
        while !stop.load(std::sync::atomic::Ordering::Acquire) {
            let started = Instant::now();
            self.heartbeat_tick(started);
            let elapsed = started.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        log::info!("[Coordinator] stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::RtuRecord;
    use crate::rpc::RpcClient;
    use crate::transport::udp::PairEndpoint;
    use crossbeam_channel::unbounded;

    fn coordinator(
        mode: FailoverMode,
    ) -> (
        Coordinator,
        Arc<RtuRegistry>,
        Arc<AuthorityTable>,
        crossbeam_channel::Receiver<CoordinatorEvent>,
    ) {
        let registry = Arc::new(RtuRegistry::new());
        let (ctrl, _dev) = PairEndpoint::pair();
        let manager = Arc::new(ArManager::new(
            Arc::new(RpcClient::new(Arc::new(ctrl))),
            Arc::new(DiagHub::new()),
        ));
        let authority = Arc::new(AuthorityTable::new(Duration::from_millis(500)));
        let (events_tx, events_rx) = unbounded();
        let config = CoordinatorConfig {
            failover_mode: mode,
            ..CoordinatorConfig::default()
        };
        let coordinator = Coordinator::new(
            Arc::clone(&registry),
            manager,
            Arc::clone(&authority),
            Arc::new(DiagHub::new()),
            config,
            events_tx,
        );
        (coordinator, registry, authority, events_rx)
    }

    fn paired_rtus(registry: &RtuRegistry) {
        registry.add(RtuRecord::new("intake-rtu-01", RtuRole::Primary).with_partner("intake-rtu-02"));
        registry.add(RtuRecord::new("intake-rtu-02", RtuRole::Secondary).with_partner("intake-rtu-01"));
        registry.set_health("intake-rtu-02", RtuHealth::Healthy);
    }

    #[test]
    fn test_automatic_failover_after_missed_heartbeats() {
        let (coordinator, registry, authority, events) = coordinator(FailoverMode::Automatic);
        paired_rtus(&registry);
        assert_eq!(authority.current("intake-rtu-01"), 1);

        // No AR at all: every tick is a missed heartbeat. Third miss
        // promotes.
        let now = Instant::now();
        coordinator.heartbeat_tick(now);
        coordinator.heartbeat_tick(now);
        assert_eq!(
            registry.get("intake-rtu-01").expect("record").role,
            RtuRole::Primary,
            "two misses are not enough"
        );
        coordinator.heartbeat_tick(now);

        assert_eq!(
            registry.get("intake-rtu-02").expect("record").role,
            RtuRole::Primary
        );
        assert_eq!(
            registry.get("intake-rtu-01").expect("record").role,
            RtuRole::Secondary
        );
        assert_eq!(authority.current("intake-rtu-01"), 2);

        let promoted = events
            .try_iter()
            .find_map(|e| match e {
                CoordinatorEvent::Promoted {
                    failed,
                    promoted,
                    authority_generation,
                } => Some((failed, promoted, authority_generation)),
                _ => None,
            })
            .expect("promotion event");
        assert_eq!(promoted.0, "intake-rtu-01");
        assert_eq!(promoted.1, "intake-rtu-02");
        assert_eq!(promoted.2, 2);
    }

    #[test]
    fn test_manual_mode_only_alerts() {
        let (coordinator, registry, authority, events) = coordinator(FailoverMode::Manual);
        paired_rtus(&registry);

        let now = Instant::now();
        for _ in 0..5 {
            coordinator.heartbeat_tick(now);
        }
        assert_eq!(
            registry.get("intake-rtu-01").expect("record").role,
            RtuRole::Primary,
            "manual mode never promotes"
        );
        assert_eq!(authority.current("intake-rtu-01"), 1);
        // Health alerts still flow.
        assert!(events
            .try_iter()
            .any(|e| matches!(e, CoordinatorEvent::HealthChanged { .. })));
    }

    #[test]
    fn test_no_failover_without_healthy_secondary() {
        let (coordinator, registry, _authority, _events) = coordinator(FailoverMode::Automatic);
        paired_rtus(&registry);
        registry.set_health("intake-rtu-02", RtuHealth::Failed);

        let now = Instant::now();
        for _ in 0..4 {
            coordinator.heartbeat_tick(now);
        }
        assert_eq!(
            registry.get("intake-rtu-01").expect("record").role,
            RtuRole::Primary,
            "no promotion onto a dead secondary"
        );
    }

    #[test]
    fn test_round_robin_balancing() {
        let (coordinator, registry, _authority, _events) = coordinator(FailoverMode::Automatic);
        registry.add(RtuRecord::new("lb-1", RtuRole::LoadBalancedPeer));
        registry.add(RtuRecord::new("lb-2", RtuRole::LoadBalancedPeer));
        registry.set_health("lb-1", RtuHealth::Healthy);
        registry.set_health("lb-2", RtuHealth::Healthy);

        let first = coordinator.select_balanced_target().expect("target");
        let second = coordinator.select_balanced_target().expect("target");
        let third = coordinator.select_balanced_target().expect("target");
        assert_ne!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn test_cascade_config_exposed() {
        let (coordinator, _registry, _authority, _events) = coordinator(FailoverMode::Automatic);
        let coordinator = coordinator.with_cascades(vec![CascadeLink {
            outer_loop: "basin-level".into(),
            inner_loop: "intake-flow".into(),
        }]);
        assert_eq!(coordinator.cascades().len(), 1);
        assert_eq!(coordinator.cascades()[0].outer_loop, "basin-level");
    }
}
