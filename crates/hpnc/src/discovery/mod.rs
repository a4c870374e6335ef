// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DCP device discovery: worker and device cache.
//!
//! The worker broadcasts identify requests and performs unicast set
//! operations; responses arrive through the frame demultiplexer (the cyclic
//! receiver forwards everything in the DCP frame-id window here). The cache
//! is the canonical directory of discovered devices, keyed by station name.

mod cache;
mod worker;

pub use cache::{DeviceCache, DeviceInfo};
pub use worker::DcpWorker;

use crate::core::ser::SerError;
use crate::transport::LinkError;
use std::fmt;

/// DCP operation errors.
#[derive(Debug)]
pub enum DcpError {
    /// No reply inside the response window.
    Timeout,
    /// Device rejected the set with a DCP error code.
    Rejected(u8),
    /// Malformed PDU.
    Codec(SerError),
    /// Link below us failed.
    Link(LinkError),
}

impl fmt::Display for DcpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DcpError::Timeout => write!(f, "dcp timeout"),
            DcpError::Rejected(code) => write!(f, "dcp rejected with error {:#04x}", code),
            DcpError::Codec(e) => write!(f, "dcp codec: {}", e),
            DcpError::Link(e) => write!(f, "dcp link: {}", e),
        }
    }
}

impl std::error::Error for DcpError {}

impl From<SerError> for DcpError {
    fn from(e: SerError) -> Self {
        DcpError::Codec(e)
    }
}

impl From<LinkError> for DcpError {
    fn from(e: LinkError) -> Self {
        DcpError::Link(e)
    }
}

pub type DcpResult<T> = std::result::Result<T, DcpError>;
