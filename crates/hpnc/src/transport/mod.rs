// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport layer: Layer-2 links and the UDP endpoint for RPC.
//!
//! Raw sockets and OS capabilities stay behind the [`Link`] trait so the
//! protocol layers never touch a file descriptor. The loopback
//! implementation backs the deterministic tests; the AF_PACKET
//! implementation backs production on Linux.
//!
//! # Modules
//!
//! - `raw` - AF_PACKET link bound to one interface (Linux)
//! - `loopback` - in-memory link pair for tests and conformance harnesses
//! - `udp` - socket2-based UDP endpoint plus an in-memory pair

pub mod loopback;
#[cfg(target_os = "linux")]
pub mod raw;
pub mod udp;

use crate::core::types::MacAddr;
use std::fmt;
use std::time::Duration;

/// Transport error taxonomy.
#[derive(Debug)]
pub enum LinkError {
    /// Raw-socket capability denied or interface missing. Fatal at startup
    /// for the PROFINET subsystem; never masked by a fake healthy state.
    CapabilityMissing(String),
    /// Send failed below us.
    SendFailed(std::io::Error),
    /// Receive failed below us.
    RecvFailed(std::io::Error),
    /// The link peer is gone (loopback harness torn down).
    Disconnected,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::CapabilityMissing(what) => write!(f, "capability missing: {}", what),
            LinkError::SendFailed(e) => write!(f, "send failed: {}", e),
            LinkError::RecvFailed(e) => write!(f, "recv failed: {}", e),
            LinkError::Disconnected => write!(f, "link disconnected"),
        }
    }
}

impl std::error::Error for LinkError {}

pub type LinkResult<T> = std::result::Result<T, LinkError>;

/// A Layer-2 frame as received from a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthFrame {
    pub data: Vec<u8>,
}

/// Abstraction over a raw Ethernet attachment.
///
/// One implementation per platform plus the loopback pair; everything above
/// this trait is platform-free.
pub trait Link: Send + Sync {
    /// Transmit one complete Ethernet frame (header included, no FCS).
    fn send_frame(&self, frame: &[u8]) -> LinkResult<()>;

    /// Wait up to `timeout` for one frame; `Ok(None)` on timeout.
    fn poll(&self, timeout: Duration) -> LinkResult<Option<EthFrame>>;

    /// MAC address frames from this link originate from.
    fn local_mac(&self) -> MacAddr;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_error_display() {
        let err = LinkError::CapabilityMissing("CAP_NET_RAW on eth1".into());
        assert_eq!(err.to_string(), "capability missing: CAP_NET_RAW on eth1");
        assert_eq!(LinkError::Disconnected.to_string(), "link disconnected");
    }
}
