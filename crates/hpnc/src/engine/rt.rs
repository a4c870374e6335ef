// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Platform hooks for real-time thread priority.
//!
//! The contract is "the scheduler meets its deadlines on the reference
//! platform"; how is a platform choice. On Linux we ask for SCHED_FIFO and
//! fall back gracefully when the privilege is missing -- the overrun
//! counters then tell the operator what that costs.

/// Relative priority tiers for the controller's threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtPriority {
    /// Cyclic sender/receiver.
    High,
    /// Control engine scan.
    Medium,
}

/// Request a real-time scheduling class for the calling thread.
///
/// Returns whether the request took effect.
#[cfg(target_os = "linux")]
pub fn set_realtime_priority(priority: RtPriority) -> bool {
    let sched_priority = match priority {
        RtPriority::High => 80,
        RtPriority::Medium => 50,
    };
    let param = libc::sched_param { sched_priority };
    // SAFETY: pid 0 targets the calling thread; param is a valid
    // sched_param for SCHED_FIFO.
    let rc = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if rc != 0 {
        log::warn!(
            "[Rt] SCHED_FIFO prio {} denied: {} (running best-effort)",
            sched_priority,
            std::io::Error::last_os_error()
        );
        return false;
    }
    log::info!("[Rt] SCHED_FIFO prio {} active", sched_priority);
    true
}

#[cfg(not(target_os = "linux"))]
pub fn set_realtime_priority(_priority: RtPriority) -> bool {
    false
}
