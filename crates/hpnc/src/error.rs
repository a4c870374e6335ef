// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate-level error type.
//!
//! Subsystems keep their own error enums (`SerError`, `LinkError`,
//! `RpcError`, ...); this one wraps them at the composition boundary so
//! embedders handle a single type.

use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// Frame/block codec failure.
    Ser(crate::core::ser::SerError),
    /// Layer-2 link failure (including missing raw-socket capability).
    Link(crate::transport::LinkError),
    /// DCP operation failure.
    Dcp(crate::discovery::DcpError),
    /// RPC operation failure.
    Rpc(crate::rpc::RpcError),
    /// Shared-memory failure.
    Shm(crate::shm::ShmError),
    /// Historian store failure.
    Store(crate::historian::StoreError),
    /// Invalid configuration.
    Config(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Ser(e) => write!(f, "codec: {}", e),
            Error::Link(e) => write!(f, "link: {}", e),
            Error::Dcp(e) => write!(f, "dcp: {}", e),
            Error::Rpc(e) => write!(f, "rpc: {}", e),
            Error::Shm(e) => write!(f, "shm: {}", e),
            Error::Store(e) => write!(f, "store: {}", e),
            Error::Config(reason) => write!(f, "config: {}", reason),
        }
    }
}

impl std::error::Error for Error {}

impl From<crate::core::ser::SerError> for Error {
    fn from(e: crate::core::ser::SerError) -> Self {
        Error::Ser(e)
    }
}

impl From<crate::transport::LinkError> for Error {
    fn from(e: crate::transport::LinkError) -> Self {
        Error::Link(e)
    }
}

impl From<crate::discovery::DcpError> for Error {
    fn from(e: crate::discovery::DcpError) -> Self {
        Error::Dcp(e)
    }
}

impl From<crate::rpc::RpcError> for Error {
    fn from(e: crate::rpc::RpcError) -> Self {
        Error::Rpc(e)
    }
}

impl From<crate::shm::ShmError> for Error {
    fn from(e: crate::shm::ShmError) -> Self {
        Error::Shm(e)
    }
}

impl From<crate::historian::StoreError> for Error {
    fn from(e: crate::historian::StoreError) -> Self {
        Error::Store(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
