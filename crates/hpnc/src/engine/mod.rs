// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cyclic I/O engine: the real-time heartbeat.
//!
//! Two cooperating threads at elevated priority: the sender wakes every
//! send-clock x reduction-ratio and emits one RT frame per AR in RUN; the
//! receiver loops on the link with a short poll and demultiplexes by
//! frame-id window. Watchdog evaluation rides the sender tick.

mod cyclic;
mod demux;
mod rt;

pub use cyclic::{CyclicEngine, InputEvent};
pub use demux::{classify_frame_id, FrameClass};
pub use rt::{set_realtime_priority, RtPriority};
