// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HPNC Global Configuration - Single Source of Truth
//!
//! This module centralizes ALL PROFINET constants and runtime configuration.
//! **NEVER hardcode elsewhere!**
//!
//! # Architecture
//!
//! - **Level 1 (Static)**: Compile-time constants (IEC 61158-6 wire values,
//!   ports, timing units, shared-memory capacities)
//! - **Level 2 (Dynamic)**: `ControllerConfig` for runtime configuration
//!   (interface, RTU roster, loop/alarm/historian tables)

use crate::core::types::MacAddr;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// =======================================================================
// PROFINET wire constants (IEC 61158-6)
// =======================================================================

/// EtherType for PROFINET real-time traffic.
///
/// **NEVER hardcode 0x8892 elsewhere!**
pub const PN_ETHERTYPE: u16 = 0x8892;

/// EtherType for 802.1Q VLAN tags (RT frames may arrive tagged).
pub const VLAN_ETHERTYPE: u16 = 0x8100;

/// UDP port for PROFINET Context Manager RPC (connect/control/release).
pub const PN_RPC_PORT: u16 = 34964;

/// DCP identify multicast destination.
pub const DCP_MULTICAST: MacAddr = MacAddr::DCP_MULTICAST;

// =======================================================================
// Frame-id windows (IEC 61158-6 Sec. frame classification)
// =======================================================================

/// RT Class 1 cyclic data, inclusive lower bound.
pub const FRAME_ID_RT_C1_MIN: u16 = 0x0001;
/// RT Class 1 cyclic data, inclusive upper bound.
pub const FRAME_ID_RT_C1_MAX: u16 = 0x7FFF;
/// DCP Hello.
pub const FRAME_ID_DCP_HELLO: u16 = 0xFEFC;
/// DCP Get/Set.
pub const FRAME_ID_DCP_GETSET: u16 = 0xFEFD;
/// DCP Identify request.
pub const FRAME_ID_DCP_IDENT_REQ: u16 = 0xFEFE;
/// DCP Identify response.
pub const FRAME_ID_DCP_IDENT_RSP: u16 = 0xFEFF;

/// High-priority alarm frame id.
pub const FRAME_ID_ALARM_HIGH: u16 = 0xFC01;
/// Low-priority alarm frame id.
pub const FRAME_ID_ALARM_LOW: u16 = 0xFE01;

// =======================================================================
// Cycle timing (IEC 61158-6 Sec. send clock)
// =======================================================================

/// Base unit of the send clock: 31.25 microseconds.
pub const SEND_CLOCK_BASE_NS: u64 = 31_250;

/// Default send-clock factor (32 x 31.25 us = 1 ms).
pub const DEFAULT_SEND_CLOCK_FACTOR: u16 = 32;
/// Default reduction ratio (every send-clock tick).
pub const DEFAULT_REDUCTION_RATIO: u16 = 1;
/// Default watchdog factor (3 missed cycles fault the AR).
pub const DEFAULT_WATCHDOG_FACTOR: u16 = 3;
/// Default data-hold factor.
pub const DEFAULT_DATA_HOLD_FACTOR: u16 = 3;
/// Default RT alarm timeout factor (x 100 ms).
pub const DEFAULT_RTA_TIMEOUT_FACTOR: u16 = 100;
/// Default RT alarm retry count.
pub const DEFAULT_RTA_RETRIES: u16 = 3;

// =======================================================================
// RPC timeouts (spec'd per-operation, not global)
// =======================================================================

/// Connect request timeout.
pub const RPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Control (PrmEnd / ApplicationReady response) timeout.
pub const RPC_CONTROL_TIMEOUT: Duration = Duration::from_secs(3);
/// Acyclic record read/write timeout.
pub const RPC_READ_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
/// Release timeout; also the REL_SENT -> CLOSED fallback.
pub const RPC_RELEASE_TIMEOUT: Duration = Duration::from_secs(3);

/// Whole-process shutdown budget; sockets are force-closed afterwards.
pub const SHUTDOWN_BUDGET: Duration = Duration::from_secs(10);

// =======================================================================
// Supervisory defaults
// =======================================================================

/// Missed heartbeats before automatic failover triggers.
pub const FAILOVER_MISSED_HEARTBEATS: u32 = 3;

/// Window within which a previous-generation command is still accepted
/// (clock-skew tolerance across a failover).
pub const STALE_COMMAND_WINDOW: Duration = Duration::from_millis(500);

/// Alarm flood benchmark: more than this many new alarms per 10 minutes
/// raises `ALARM_FLOOD` (ISA-18.2 benchmark default).
pub const ALARM_FLOOD_PER_10MIN: u32 = 10;

/// Sustained scheduler overrun ratio that raises `SCHEDULER_OVERLOADED`.
pub const OVERRUN_ALERT_RATIO: f64 = 0.10;

// =======================================================================
// Shared-state block (the stable IPC contract, see shm::layout)
// =======================================================================

/// Magic tag at offset 0 of the shared segment ("WTC" + format 1).
pub const SHM_MAGIC: u32 = 0x5754_4301;
/// Current schema version.
pub const SHM_VERSION: u32 = 3;
/// Default segment name under /dev/shm.
pub const SHM_DEFAULT_NAME: &str = "/hpnc_state";

/// Maximum RTUs tracked in the shared block.
pub const MAX_RTUS: usize = 64;
/// Maximum slots per RTU in the sensor/actuator matrices.
pub const MAX_SLOTS: usize = 247;
/// Maximum concurrently active alarms exported.
pub const MAX_ACTIVE_ALARMS: usize = 256;
/// Command ring capacity (power of two).
pub const COMMAND_RING_SLOTS: usize = 1024;
/// Response ring capacity (power of two).
pub const RESPONSE_RING_SLOTS: usize = 256;
/// Opaque payload bytes per command slot.
pub const COMMAND_PAYLOAD_LEN: usize = 64;

// =======================================================================
// Runtime configuration
// =======================================================================

/// Cycle timing parameters negotiated per AR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleTiming {
    /// Units of 31.25 us; >= 1.
    pub send_clock_factor: u16,
    /// Power of two divisor of the send clock.
    pub reduction_ratio: u16,
    /// Missed update periods before the watchdog trips.
    pub watchdog_factor: u16,
    /// Data-hold factor forwarded to the device.
    pub data_hold_factor: u16,
    /// RT alarm timeout factor (x 100 ms).
    pub rta_timeout_factor: u16,
    /// RT alarm retries.
    pub rta_retries: u16,
}

impl Default for CycleTiming {
    fn default() -> Self {
        Self {
            send_clock_factor: DEFAULT_SEND_CLOCK_FACTOR,
            reduction_ratio: DEFAULT_REDUCTION_RATIO,
            watchdog_factor: DEFAULT_WATCHDOG_FACTOR,
            data_hold_factor: DEFAULT_DATA_HOLD_FACTOR,
            rta_timeout_factor: DEFAULT_RTA_TIMEOUT_FACTOR,
            rta_retries: DEFAULT_RTA_RETRIES,
        }
    }
}

impl CycleTiming {
    /// Transmission period: send clock x reduction ratio.
    pub fn cycle_period(&self) -> Duration {
        Duration::from_nanos(
            SEND_CLOCK_BASE_NS * u64::from(self.send_clock_factor) * u64::from(self.reduction_ratio),
        )
    }

    /// Watchdog deadline: watchdog_factor x cycle period.
    pub fn watchdog_period(&self) -> Duration {
        self.cycle_period() * u32::from(self.watchdog_factor)
    }

    /// Cycle-counter increment per emitted frame (counter counts send-clock
    /// units, not transmissions).
    pub fn counter_increment(&self) -> u16 {
        self.send_clock_factor.wrapping_mul(self.reduction_ratio)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.send_clock_factor == 0 {
            return Err("send_clock_factor must be >= 1".into());
        }
        if self.reduction_ratio == 0 || !self.reduction_ratio.is_power_of_two() {
            return Err(format!(
                "reduction_ratio {} must be a power of two",
                self.reduction_ratio
            ));
        }
        if self.watchdog_factor == 0 {
            return Err("watchdog_factor must be >= 1".into());
        }
        Ok(())
    }
}

/// Failover behavior of the coordinator (spec: manual / automatic / hot-standby).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailoverMode {
    /// Health events alert the operator; nothing moves automatically.
    Manual,
    /// Promote the secondary after consecutive missed heartbeats or AR FAULT.
    Automatic,
    /// Secondary holds a live AR; outputs are written to both.
    HotStandby,
}

impl Default for FailoverMode {
    fn default() -> Self {
        FailoverMode::Automatic
    }
}

/// Load-balancing policy between equivalent RTUs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BalancePolicy {
    RoundRobin,
    LeastLoaded,
}

impl Default for BalancePolicy {
    fn default() -> Self {
        BalancePolicy::RoundRobin
    }
}

/// Coordinator tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub failover_mode: FailoverMode,
    /// Heartbeat evaluation interval.
    pub heartbeat_interval_ms: u64,
    /// AR in FAULT at least this long also triggers failover.
    pub failover_timeout_ms: u64,
    pub balance_policy: BalancePolicy,
    /// Re-evaluation period for least-loaded balancing.
    pub rebalance_interval_ms: u64,
    pub stale_command_window_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            failover_mode: FailoverMode::default(),
            heartbeat_interval_ms: 500,
            failover_timeout_ms: 2_000,
            balance_policy: BalancePolicy::default(),
            rebalance_interval_ms: 5_000,
            stale_command_window_ms: STALE_COMMAND_WINDOW.as_millis() as u64,
        }
    }
}

/// Control engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Deterministic scan period.
    pub scan_period_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { scan_period_ms: 100 }
    }
}

/// Historian tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorianConfig {
    /// Per-tag ring capacity (samples) before flush/overwrite.
    pub ring_capacity: usize,
    /// Flush interval for the persistence thread.
    pub flush_interval_ms: u64,
    /// SQLite database path; None keeps the historian memory-only.
    pub db_path: Option<String>,
    /// Deflate chunks before persisting.
    pub compress_chunks: bool,
    /// Days of retention enforced at flush time.
    pub retention_days: u32,
}

impl Default for HistorianConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 4_096,
            flush_interval_ms: 2_000,
            db_path: None,
            compress_chunks: false,
            retention_days: 365,
        }
    }
}

/// Alarm manager tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmConfig {
    /// Maximum shelve duration an operator may request.
    pub max_shelve_minutes: u32,
    /// Flood threshold per 10-minute window.
    pub flood_per_10min: u32,
    /// Closed-alarm history kept in memory.
    pub history_capacity: usize,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            max_shelve_minutes: 8 * 60,
            flood_per_10min: ALARM_FLOOD_PER_10MIN,
            history_capacity: 2_048,
        }
    }
}

/// One configured RTU in the roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtuEntry {
    pub station_name: String,
    pub role: crate::registry::RtuRole,
    /// Redundancy partner station, if any.
    #[serde(default)]
    pub partner: Option<String>,
    /// Slot configuration as the device declares it.
    pub slots: Vec<crate::protocol::blocks::ExpectedSlot>,
    /// Per-RTU timing override.
    #[serde(default)]
    pub timing: Option<CycleTiming>,
}

/// One configured PID loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PidLoopEntry {
    pub name: String,
    pub pid: crate::control::PidConfig,
    /// Process-variable tag ("station:slot").
    pub pv_tag: String,
    /// Actuator tag the loop drives.
    pub out_tag: String,
}

/// One configured sequencer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceEntry {
    pub name: String,
    pub cyclic: bool,
    pub steps: Vec<crate::control::Step>,
}

/// Root configuration struct the runtime is composed from.
///
/// The outer layers own the file format; the core only consumes this tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Our own station name announced in connect blocks.
    pub controller_name: String,
    /// Network interface carrying the PROFINET segment (e.g. "eth1").
    pub interface: String,
    /// Set SO_PRIORITY=6 on the RT socket.
    pub socket_priority: bool,
    /// Default timing applied to ARs without a per-RTU override.
    pub timing: CycleTiming,
    /// Device-cache entry TTL in seconds; 0 = no ageing (operator purge).
    pub device_ttl_secs: u64,
    pub coordinator: CoordinatorConfig,
    pub control: ControlConfig,
    pub historian: HistorianConfig,
    pub alarms: AlarmConfig,
    /// Shared-memory segment name.
    pub shm_name: String,
    /// Configured RTU roster (devices may also arrive via discovery).
    pub rtus: Vec<RtuEntry>,
    pub pid_loops: Vec<PidLoopEntry>,
    pub interlocks: Vec<crate::control::InterlockRule>,
    pub sequences: Vec<SequenceEntry>,
    pub cascades: Vec<crate::registry::CascadeLink>,
    pub alarm_rules: Vec<crate::alarm::AlarmRule>,
    /// Historian per-tag configuration.
    pub historian_tags: Vec<crate::historian::TagConfig>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            controller_name: "hpnc-controller".into(),
            interface: "eth0".into(),
            socket_priority: true,
            timing: CycleTiming::default(),
            device_ttl_secs: 0,
            coordinator: CoordinatorConfig::default(),
            control: ControlConfig::default(),
            historian: HistorianConfig::default(),
            alarms: AlarmConfig::default(),
            shm_name: SHM_DEFAULT_NAME.into(),
            rtus: Vec::new(),
            pid_loops: Vec::new(),
            interlocks: Vec::new(),
            sequences: Vec::new(),
            cascades: Vec::new(),
            alarm_rules: Vec::new(),
            historian_tags: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timing_is_one_millisecond() {
        let timing = CycleTiming::default();
        assert_eq!(timing.cycle_period(), Duration::from_millis(1));
        assert_eq!(timing.watchdog_period(), Duration::from_millis(3));
        assert_eq!(timing.counter_increment(), 32);
    }

    #[test]
    fn test_minimum_cycle_time() {
        let timing = CycleTiming {
            send_clock_factor: 1,
            reduction_ratio: 1,
            ..CycleTiming::default()
        };
        assert_eq!(timing.cycle_period(), Duration::from_nanos(31_250));
    }

    #[test]
    fn test_timing_validation() {
        let mut timing = CycleTiming::default();
        assert!(timing.validate().is_ok());
        timing.reduction_ratio = 3;
        assert!(timing.validate().is_err());
        timing.reduction_ratio = 16;
        assert!(timing.validate().is_ok());
        timing.send_clock_factor = 0;
        assert!(timing.validate().is_err());
    }

    #[test]
    fn test_controller_config_defaults() {
        let config = ControllerConfig::default();
        assert_eq!(config.shm_name, SHM_DEFAULT_NAME);
        assert_eq!(config.coordinator.failover_mode, FailoverMode::Automatic);
        assert_eq!(config.alarms.flood_per_10min, 10);
        assert_eq!(config.control.scan_period_ms, 100);
    }
}
