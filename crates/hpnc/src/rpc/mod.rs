// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Context-Manager RPC engine over UDP/34964.
//!
//! The client side drives Connect / Control / Read / Write / Release with
//! per-operation timeouts and a strategy iterator for the wire variants
//! fielded device stacks disagree on (NDR wrapping, UUID byte order). The
//! server side answers device-originated requests -- the ApplicationReady
//! callback arrives here.

mod client;
mod error;
mod server;
mod strategy;

pub use client::RpcClient;
pub use error::{RpcError, RpcResult};
pub use server::{RpcServer, ServerEvent};
pub use strategy::{ConnectStrategy, NdrMode, OpnumVariant, SlotScope, TimingProfile, UuidFormat};

#[cfg(test)]
mod tests;
