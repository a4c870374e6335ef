// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RPC engine error type.

use crate::core::ser::SerError;
use std::fmt;
use std::io;

#[derive(Debug)]
pub enum RpcError {
    /// No response inside the per-operation timeout.
    Timeout,
    /// Device answered with a fault/reject packet or PNIO error status.
    Rejected { pnio_status: u32 },
    /// Every configured connect strategy failed.
    StrategiesExhausted,
    /// Malformed packet.
    Codec(SerError),
    /// Socket below us failed.
    Io(io::Error),
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::Timeout => write!(f, "rpc timeout"),
            RpcError::Rejected { pnio_status } => {
                write!(f, "rpc rejected, pnio status {:#010x}", pnio_status)
            }
            RpcError::StrategiesExhausted => write!(f, "all connect strategies exhausted"),
            RpcError::Codec(e) => write!(f, "rpc codec: {}", e),
            RpcError::Io(e) => write!(f, "rpc io: {}", e),
        }
    }
}

impl std::error::Error for RpcError {}

impl From<SerError> for RpcError {
    fn from(e: SerError) -> Self {
        RpcError::Codec(e)
    }
}

impl From<io::Error> for RpcError {
    fn from(e: io::Error) -> Self {
        RpcError::Io(e)
    }
}

pub type RpcResult<T> = std::result::Result<T, RpcError>;
