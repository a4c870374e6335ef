// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTU registry and supervisory coordinator.
//!
//! The registry is the canonical directory of configured RTUs -- an RTU
//! survives reconnects; its AR handle is recreated each time. The
//! coordinator watches health, orchestrates failover between redundant
//! RTUs, enforces command authority generations, and balances load between
//! equivalent peers.

mod authority;
mod coordinator;

pub use authority::{AuthorityTable, AuthorityVerdict};
pub use coordinator::{CascadeLink, Coordinator, CoordinatorEvent};

use crate::ar::ArId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Instant;

/// Role an RTU plays in its redundancy group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RtuRole {
    Primary,
    Secondary,
    HotStandby,
    LoadBalancedPeer,
}

/// Coarse health as exported to collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtuHealth {
    Healthy,
    Degraded,
    Failed,
    Unknown,
}

impl RtuHealth {
    pub fn as_u8(self) -> u8 {
        match self {
            RtuHealth::Healthy => 0,
            RtuHealth::Degraded => 1,
            RtuHealth::Failed => 2,
            RtuHealth::Unknown => 3,
        }
    }
}

/// One configured RTU.
#[derive(Debug, Clone)]
pub struct RtuRecord {
    pub station_name: String,
    pub role: RtuRole,
    /// Partner in the redundancy pair (secondary for a primary and vice
    /// versa); empty for standalone RTUs.
    pub partner: Option<String>,
    pub ar: Option<ArId>,
    pub health: RtuHealth,
    pub last_heartbeat: Option<Instant>,
    pub missed_heartbeats: u32,
}

impl RtuRecord {
    pub fn new(station_name: impl Into<String>, role: RtuRole) -> Self {
        Self {
            station_name: station_name.into(),
            role,
            partner: None,
            ar: None,
            health: RtuHealth::Unknown,
            last_heartbeat: None,
            missed_heartbeats: 0,
        }
    }

    pub fn with_partner(mut self, partner: impl Into<String>) -> Self {
        self.partner = Some(partner.into());
        self
    }
}

/// Directory of configured RTUs, keyed by station name.
pub struct RtuRegistry {
    rtus: RwLock<HashMap<String, RtuRecord>>,
}

impl RtuRegistry {
    pub fn new() -> Self {
        Self {
            rtus: RwLock::new(HashMap::new()),
        }
    }

    pub fn add(&self, record: RtuRecord) {
        log::info!(
            "[Registry] rtu added station={} role={:?}",
            record.station_name,
            record.role
        );
        self.rtus.write().insert(record.station_name.clone(), record);
    }

    pub fn get(&self, station_name: &str) -> Option<RtuRecord> {
        self.rtus.read().get(station_name).cloned()
    }

    pub fn set_ar(&self, station_name: &str, ar: Option<ArId>) {
        if let Some(record) = self.rtus.write().get_mut(station_name) {
            record.ar = ar;
        }
    }

    pub fn set_health(&self, station_name: &str, health: RtuHealth) {
        if let Some(record) = self.rtus.write().get_mut(station_name) {
            record.health = health;
        }
    }

    pub fn set_role(&self, station_name: &str, role: RtuRole) {
        if let Some(record) = self.rtus.write().get_mut(station_name) {
            record.role = role;
        }
    }

    pub fn heartbeat(&self, station_name: &str, at: Instant) {
        if let Some(record) = self.rtus.write().get_mut(station_name) {
            record.last_heartbeat = Some(at);
            record.missed_heartbeats = 0;
        }
    }

    pub fn record_missed_heartbeat(&self, station_name: &str) -> u32 {
        let mut rtus = self.rtus.write();
        match rtus.get_mut(station_name) {
            Some(record) => {
                record.missed_heartbeats += 1;
                record.missed_heartbeats
            }
            None => 0,
        }
    }

    pub fn snapshot(&self) -> Vec<RtuRecord> {
        let mut list: Vec<RtuRecord> = self.rtus.read().values().cloned().collect();
        list.sort_by(|a, b| a.station_name.cmp(&b.station_name));
        list
    }

    pub fn len(&self) -> usize {
        self.rtus.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rtus.read().is_empty()
    }

    /// Stations sharing the load-balanced role.
    pub fn balanced_peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self
            .rtus
            .read()
            .values()
            .filter(|r| r.role == RtuRole::LoadBalancedPeer && r.health == RtuHealth::Healthy)
            .map(|r| r.station_name.clone())
            .collect();
        peers.sort();
        peers
    }
}

impl Default for RtuRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_roundtrip() {
        let registry = RtuRegistry::new();
        registry.add(RtuRecord::new("intake-rtu-01", RtuRole::Primary).with_partner("intake-rtu-02"));
        registry.add(RtuRecord::new("intake-rtu-02", RtuRole::Secondary).with_partner("intake-rtu-01"));

        let record = registry.get("intake-rtu-01").expect("record");
        assert_eq!(record.role, RtuRole::Primary);
        assert_eq!(record.partner.as_deref(), Some("intake-rtu-02"));
        assert_eq!(record.health, RtuHealth::Unknown);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_heartbeat_resets_missed_count() {
        let registry = RtuRegistry::new();
        registry.add(RtuRecord::new("intake-rtu-01", RtuRole::Primary));
        assert_eq!(registry.record_missed_heartbeat("intake-rtu-01"), 1);
        assert_eq!(registry.record_missed_heartbeat("intake-rtu-01"), 2);
        registry.heartbeat("intake-rtu-01", Instant::now());
        let record = registry.get("intake-rtu-01").expect("record");
        assert_eq!(record.missed_heartbeats, 0);
        assert!(record.last_heartbeat.is_some());
    }

    #[test]
    fn test_balanced_peers_filters_health() {
        let registry = RtuRegistry::new();
        registry.add(RtuRecord::new("lb-1", RtuRole::LoadBalancedPeer));
        registry.add(RtuRecord::new("lb-2", RtuRole::LoadBalancedPeer));
        registry.add(RtuRecord::new("solo", RtuRole::Primary));
        registry.set_health("lb-1", RtuHealth::Healthy);
        registry.set_health("lb-2", RtuHealth::Failed);
        assert_eq!(registry.balanced_peers(), vec!["lb-1".to_string()]);
    }
}
