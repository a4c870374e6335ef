// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # HPNC - PROFINET supervisory controller for water treatment
//!
//! A pure Rust PROFINET IO controller with the supervisory layers a small
//! treatment plant runs on: DCP discovery, RPC-based AR establishment,
//! RT Class 1 cyclic exchange, multi-RTU coordination with failover, a
//! deterministic control engine, an ISA-18.2 alarm manager, and a
//! time-series historian. Outer layers (HTTP API, HMI) consume a
//! fixed-layout shared-memory block and submit work through its command
//! ring.
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------------+
//! |                      Supervisory layer                             |
//! |  RTU registry | Coordinator (failover, authority) | Control engine |
//! |  Alarm manager | Historian           -> shared state + cmd ring   |
//! +--------------------------------------------------------------------+
//! |                      Session layer                                 |
//! |  AR manager (state machine, IOCR buffers) | RPC client + server    |
//! +--------------------------------------------------------------------+
//! |                      Real-time layer                               |
//! |  Cyclic sender/receiver | frame-id demux | watchdog | DCP worker   |
//! +--------------------------------------------------------------------+
//! |                      Wire layer                                    |
//! |  Frame codec | DCP | DCE/RPC + NDR | PNIO blocks | CRC             |
//! +--------------------------------------------------------------------+
//! |                      Transport                                     |
//! |  Link trait: AF_PACKET raw socket / loopback | UDP 34964           |
//! +--------------------------------------------------------------------+
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use hpnc::{Controller, ControllerConfig};
//!
//! fn main() -> hpnc::Result<()> {
//!     let mut config = ControllerConfig::default();
//!     config.interface = "eth1".into();
//!     let controller = Controller::start_on_system(config)?;
//!     // ... runs until shutdown is requested
//!     controller.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! Deterministic embedding (tests, simulators) injects a loopback
//! [`transport::Link`] and a heap-backed [`shm::Segment`] instead.

pub mod alarm;
pub mod ar;
pub mod config;
pub mod control;
pub mod core;
pub mod diag;
pub mod discovery;
pub mod engine;
mod error;
pub mod historian;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod rpc;
mod runtime;
pub mod shm;
pub mod telemetry;
pub mod transport;

pub use config::{ControllerConfig, CycleTiming, FailoverMode};
pub use diag::{DiagCode, DiagEvent, DiagHub, DiagSeverity};
pub use error::{Error, Result};
pub use runtime::Controller;
