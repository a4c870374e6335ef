// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RPC server: answers device-originated Context-Manager requests.
//!
//! The one exchange a device initiates during AR bring-up is
//! ApplicationReady: after PrmEnd the device calls back with an IOX control
//! request, and we must echo a Done response before it starts producing
//! cyclic data. The server answers in the same NDR dialect the request
//! used and hands the event to the AR manager.

use super::error::RpcResult;
use crate::core::ser::{Cursor, CursorMut};
use crate::protocol::blocks::{ControlBlock, CONTROL_CMD_APP_READY};
use crate::protocol::constants::{
    BLOCK_IOX_CONTROL_APP_READY_REQ, RPC_OPNUM_CONTROL, RPC_PT_REQUEST,
};
use crate::protocol::rpc::{detect_ndr, NdrDetect, NdrResponseHeader, RpcHeader};
use crate::transport::udp::Endpoint;
use crossbeam_channel::Sender;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Poll granularity; the stop flag is honored at this cadence.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Device-originated event surfaced to the AR manager.
#[derive(Debug, Clone)]
pub struct ServerEvent {
    pub peer: SocketAddr,
    pub block: ControlBlock,
}

pub struct RpcServer {
    endpoint: Arc<dyn Endpoint>,
    events: Sender<ServerEvent>,
    stop: Arc<AtomicBool>,
}

impl RpcServer {
    pub fn new(
        endpoint: Arc<dyn Endpoint>,
        events: Sender<ServerEvent>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            endpoint,
            events,
            stop,
        }
    }

    /// Blocking serve loop; returns when the stop flag is raised.
    pub fn run(&self) {
        log::info!("[RpcServer] serving device callbacks");
        while !self.stop.load(Ordering::Acquire) {
            match self.poll_once(POLL_TIMEOUT) {
                Ok(()) => {}
                Err(e) => {
                    log::warn!("[RpcServer] poll error: {}", e);
                }
            }
        }
        log::info!("[RpcServer] stopped");
    }

    /// Process at most one datagram. Exposed for deterministic tests.
    pub fn poll_once(&self, timeout: Duration) -> RpcResult<()> {
        let Some((packet, peer)) = self.endpoint.recv_from(timeout)? else {
            return Ok(());
        };
        let mut cursor = Cursor::new(&packet);
        let header = match RpcHeader::read(&mut cursor) {
            Ok(h) => h,
            Err(e) => {
                log::debug!("[RpcServer] dropping malformed packet from {}: {}", peer, e);
                return Ok(());
            }
        };
        if header.packet_type != RPC_PT_REQUEST || header.opnum != RPC_OPNUM_CONTROL {
            return Ok(());
        }

        let body = &packet[cursor.offset()..];
        let (block_body, wrapped) = match detect_ndr(body, false) {
            Ok(NdrDetect::Bare) => (body, false),
            Ok(NdrDetect::Wrapped(skip)) => (&body[skip..], true),
            Err(e) => {
                log::debug!("[RpcServer] undecodable body from {}: {}", peer, e);
                return Ok(());
            }
        };
        let block = match ControlBlock::parse(block_body) {
            Ok(b) => b,
            Err(e) => {
                log::debug!("[RpcServer] bad control block from {}: {}", peer, e);
                return Ok(());
            }
        };

        if block.block_type == BLOCK_IOX_CONTROL_APP_READY_REQ
            || block.command == CONTROL_CMD_APP_READY
        {
            log::debug!(
                "[RpcServer] application-ready from {} session={}",
                peer,
                block.session_key
            );
            self.respond_app_ready(&header, &block, peer, wrapped)?;
            let _ = self.events.send(ServerEvent { peer, block });
        }
        Ok(())
    }

    /// Echo the control request with command Done.
    fn respond_app_ready(
        &self,
        request: &RpcHeader,
        block: &ControlBlock,
        peer: SocketAddr,
        wrapped: bool,
    ) -> RpcResult<()> {
        let mut body = [0u8; 128];
        let body_len =
            ControlBlock::app_ready_response(block.ar_uuid, block.session_key).write(&mut body)?;

        let ndr_len = if wrapped {
            crate::protocol::constants::NDR_RESPONSE_HEADER_LEN
        } else {
            0
        };
        let header = RpcHeader::response_to(request, (ndr_len + body_len) as u16);

        let mut out = vec![0u8; crate::protocol::constants::RPC_HEADER_LEN + ndr_len + body_len];
        let mut cursor = CursorMut::new(&mut out);
        header.write(&mut cursor)?;
        if wrapped {
            NdrResponseHeader::ok(body_len as u32).write(&mut cursor)?;
        }
        cursor.write_bytes(&body[..body_len])?;
        self.endpoint.send_to(&out, peer)?;
        Ok(())
    }
}
