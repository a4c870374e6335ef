// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Device cache keyed by station name.

use crate::core::types::{IpParams, MacAddr};
use crate::diag::{DiagCode, DiagEvent, DiagHub, DiagSeverity};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One discovered (or manually added) device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub station_name: String,
    pub vendor_id: u16,
    pub device_id: u16,
    pub mac: MacAddr,
    pub ip: IpParams,
    pub last_seen: Instant,
}

/// Set of known devices keyed by station name.
///
/// Writers are brief (identify responses, manual adds); readers are the AR
/// manager and the coordinator.
pub struct DeviceCache {
    devices: RwLock<HashMap<String, DeviceInfo>>,
    /// 0 = no ageing; entries live until purged by the operator.
    ttl: Duration,
    diag: Arc<DiagHub>,
}

impl DeviceCache {
    pub fn new(ttl: Duration, diag: Arc<DiagHub>) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            ttl,
            diag,
        }
    }

    /// Insert or refresh a device.
    ///
    /// A different MAC under an existing name is a misconfiguration on the
    /// segment: the later entry wins and a warning event is raised.
    pub fn upsert(&self, info: DeviceInfo) {
        let mut devices = self.devices.write();
        if let Some(existing) = devices.get(&info.station_name) {
            if existing.mac != info.mac {
                self.diag.raise(
                    DiagEvent::new(
                        DiagCode::DuplicateStationName,
                        DiagSeverity::Warning,
                        "DeviceCache",
                        "two devices report the same station name; later one wins",
                    )
                    .with("station", &info.station_name)
                    .with("old_mac", existing.mac)
                    .with("new_mac", info.mac),
                );
            }
        }
        devices.insert(info.station_name.clone(), info);
    }

    pub fn get(&self, station_name: &str) -> Option<DeviceInfo> {
        self.devices.read().get(station_name).cloned()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    pub fn snapshot(&self) -> Vec<DeviceInfo> {
        let mut list: Vec<DeviceInfo> = self.devices.read().values().cloned().collect();
        list.sort_by(|a, b| a.station_name.cmp(&b.station_name));
        list
    }

    /// Drop entries older than the TTL. No-op when ageing is disabled.
    pub fn expire(&self) -> usize {
        if self.ttl.is_zero() {
            return 0;
        }
        let now = Instant::now();
        let mut devices = self.devices.write();
        let before = devices.len();
        devices.retain(|_, d| now.duration_since(d.last_seen) < self.ttl);
        before - devices.len()
    }

    /// Operator purge of one entry.
    pub fn remove(&self, station_name: &str) -> bool {
        self.devices.write().remove(station_name).is_some()
    }
}
