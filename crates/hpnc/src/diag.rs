// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Structured diagnostic events with stable codes.
//!
//! Every failure path in the stack surfaces through one of these records;
//! the codes are part of the external contract and must not be renamed.
//! Events fan out to subscriber channels (lossy for slow consumers) and are
//! mirrored to the log.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::fmt;
use std::time::SystemTime;

/// Stable diagnostic identifiers.
///
/// The string form (`as_str`) is what collaborators see in the shared state
/// and in exported logs; treat it as frozen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagCode {
    /// RPC connect attempt exceeded its timeout.
    PnConnectTimeout,
    /// PNIO error status in a response.
    PnConnectRejected,
    /// Connect response carried a Module-Difference block.
    DiffWarning,
    /// Cyclic input stopped arriving (or cycle counter froze).
    WatchdogExpired,
    /// Command carried an outdated authority generation.
    StaleCommandRejected,
    /// Raw-socket or interface capability missing at init.
    CapabilityMissing,
    /// Sustained cyclic overrun ratio above threshold.
    SchedulerOverloaded,
    /// Alarm rate above the ISA-18.2 flood benchmark.
    AlarmFlood,
    /// Persistent historian store unreachable; ring continues.
    HistorianPersistFail,
    /// AR/alarm/command table full.
    ResourceExhausted,
    /// Malformed frame dropped at the codec layer.
    FrameDropped,
    /// Two devices answered identify with the same station name.
    DuplicateStationName,
    /// Primary failed over to secondary.
    FailoverPromoted,
    /// AR entered FAULT.
    ArFault,
    /// Release handshake did not complete in time.
    ReleaseTimeout,
    /// Illegal alarm state transition was requested and refused.
    AlarmTransitionDenied,
    /// Invariant violation; orderly shutdown follows.
    InvariantViolated,
}

impl DiagCode {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagCode::PnConnectTimeout => "PN_CONNECT_TIMEOUT",
            DiagCode::PnConnectRejected => "PN_CONNECT_REJECTED",
            DiagCode::DiffWarning => "DIFF_WARNING",
            DiagCode::WatchdogExpired => "WATCHDOG_EXPIRED",
            DiagCode::StaleCommandRejected => "STALE_COMMAND_REJECTED",
            DiagCode::CapabilityMissing => "CAPABILITY_MISSING",
            DiagCode::SchedulerOverloaded => "SCHEDULER_OVERLOADED",
            DiagCode::AlarmFlood => "ALARM_FLOOD",
            DiagCode::HistorianPersistFail => "HISTORIAN_PERSIST_FAIL",
            DiagCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            DiagCode::FrameDropped => "FRAME_DROPPED",
            DiagCode::DuplicateStationName => "DUPLICATE_STATION_NAME",
            DiagCode::FailoverPromoted => "FAILOVER_PROMOTED",
            DiagCode::ArFault => "AR_FAULT",
            DiagCode::ReleaseTimeout => "RELEASE_TIMEOUT",
            DiagCode::AlarmTransitionDenied => "ALARM_TRANSITION_DENIED",
            DiagCode::InvariantViolated => "INVARIANT_VIOLATED",
        }
    }
}

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a diagnostic record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagSeverity {
    Info,
    Warning,
    Error,
    Fatal,
}

impl DiagSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            DiagSeverity::Info => "INFO",
            DiagSeverity::Warning => "WARN",
            DiagSeverity::Error => "ERROR",
            DiagSeverity::Fatal => "FATAL",
        }
    }
}

/// One structured diagnostic record.
#[derive(Debug, Clone)]
pub struct DiagEvent {
    pub code: DiagCode,
    pub severity: DiagSeverity,
    /// Emitting component, e.g. "Dcp", "ArManager".
    pub source: &'static str,
    pub message: String,
    /// Free-form key-value context ("station=intake-rtu-01").
    pub context: Vec<(String, String)>,
    pub timestamp: SystemTime,
}

impl DiagEvent {
    pub fn new(
        code: DiagCode,
        severity: DiagSeverity,
        source: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            severity,
            source,
            message: message.into(),
            context: Vec::new(),
            timestamp: SystemTime::now(),
        }
    }

    pub fn with(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.context.push((key.to_string(), value.to_string()));
        self
    }
}

impl fmt::Display for DiagEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}: {}",
            self.source,
            self.severity.as_str(),
            self.code,
            self.message
        )?;
        for (k, v) in &self.context {
            write!(f, " {}={}", k, v)?;
        }
        Ok(())
    }
}

/// Fan-out hub for diagnostic events.
///
/// Emitters call `raise()`; interested components subscribe and drain their
/// own bounded channel. A full subscriber channel drops the event for that
/// subscriber only.
pub struct DiagHub {
    subscribers: Mutex<Vec<Sender<DiagEvent>>>,
}

impl DiagHub {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe with the given channel capacity.
    pub fn subscribe(&self, cap: usize) -> Receiver<DiagEvent> {
        let (tx, rx) = bounded(cap);
        self.subscribers.lock().push(tx);
        rx
    }

    /// Broadcast an event to all subscribers and mirror it to the log.
    pub fn raise(&self, event: DiagEvent) {
        match event.severity {
            DiagSeverity::Info => log::info!("{}", event),
            DiagSeverity::Warning => log::warn!("{}", event),
            DiagSeverity::Error | DiagSeverity::Fatal => log::error!("{}", event),
        }

        let mut subs = self.subscribers.lock();
        subs.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => true, // lossy, keep subscriber
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

impl Default for DiagHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable_strings() {
        assert_eq!(DiagCode::PnConnectTimeout.as_str(), "PN_CONNECT_TIMEOUT");
        assert_eq!(DiagCode::WatchdogExpired.as_str(), "WATCHDOG_EXPIRED");
        assert_eq!(
            DiagCode::StaleCommandRejected.as_str(),
            "STALE_COMMAND_REJECTED"
        );
        assert_eq!(DiagCode::AlarmFlood.as_str(), "ALARM_FLOOD");
        assert_eq!(
            DiagCode::HistorianPersistFail.as_str(),
            "HISTORIAN_PERSIST_FAIL"
        );
    }

    #[test]
    fn test_hub_broadcast_and_drop_disconnected() {
        let hub = DiagHub::new();
        let rx1 = hub.subscribe(4);
        let rx2 = hub.subscribe(4);

        hub.raise(DiagEvent::new(
            DiagCode::ArFault,
            DiagSeverity::Error,
            "test",
            "ar faulted",
        ));
        assert_eq!(rx1.try_recv().expect("rx1 should get event").code, DiagCode::ArFault);
        assert_eq!(rx2.try_recv().expect("rx2 should get event").code, DiagCode::ArFault);

        drop(rx2);
        hub.raise(DiagEvent::new(
            DiagCode::ArFault,
            DiagSeverity::Error,
            "test",
            "again",
        ));
        assert_eq!(hub.subscribers.lock().len(), 1);
    }

    #[test]
    fn test_event_display_includes_context() {
        let event = DiagEvent::new(
            DiagCode::WatchdogExpired,
            DiagSeverity::Error,
            "Cyclic",
            "input stalled",
        )
        .with("station", "intake-rtu-01")
        .with("age_ms", 4);
        let text = event.to_string();
        assert!(text.contains("WATCHDOG_EXPIRED"));
        assert!(text.contains("station=intake-rtu-01"));
        assert!(text.contains("age_ms=4"));
    }

    #[test]
    fn test_full_subscriber_is_lossy_not_fatal() {
        let hub = DiagHub::new();
        let rx = hub.subscribe(1);
        for _ in 0..3 {
            hub.raise(DiagEvent::new(
                DiagCode::FrameDropped,
                DiagSeverity::Info,
                "test",
                "drop",
            ));
        }
        // One event buffered, the rest dropped, subscriber still registered.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.subscribers.lock().len(), 1);
    }
}
