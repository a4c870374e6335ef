// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RPC client: Connect / Control / Read / Write / Release.
//!
//! One client per controller; the AR manager drives it. Requests are
//! idempotent and matched to responses by (activity UUID, sequence number).

use super::error::{RpcError, RpcResult};
use super::strategy::{ConnectStrategy, NdrMode, UuidFormat};
use crate::config::{
    RPC_CONNECT_TIMEOUT, RPC_CONTROL_TIMEOUT, RPC_READ_WRITE_TIMEOUT, RPC_RELEASE_TIMEOUT,
};
use crate::core::ser::{Cursor, CursorMut};
use crate::core::types::PnUuid;
use crate::protocol::blocks::{
    build_connect_request, parse_connect_response, ConnectParams, ConnectResponse, ControlBlock,
    RecordHeader,
};
use crate::protocol::constants::{
    BLOCK_IOD_READ_REQ, BLOCK_IOD_WRITE_REQ, RPC_OPNUM_CONNECT, RPC_OPNUM_CONTROL,
    RPC_OPNUM_READ, RPC_OPNUM_RELEASE, RPC_OPNUM_WRITE, RPC_PT_FAULT, RPC_PT_REJECT,
    RPC_PT_RESPONSE,
};
use crate::protocol::rpc::{detect_ndr, NdrDetect, NdrRequestHeader, RpcHeader};
use crate::transport::udp::Endpoint;
use std::net::SocketAddr;
use std::process;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Buffer large enough for the biggest connect request we assemble.
const TX_BUF_LEN: usize = 4096;

pub struct RpcClient {
    endpoint: Arc<dyn Endpoint>,
    activity: PnUuid,
    sequence: AtomicU32,
}

impl RpcClient {
    pub fn new(endpoint: Arc<dyn Endpoint>) -> Self {
        Self {
            endpoint,
            activity: local_activity_uuid(),
            sequence: AtomicU32::new(1),
        }
    }

    pub fn activity_uuid(&self) -> PnUuid {
        self.activity
    }

    fn next_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    /// Attempt a connect under one strategy.
    pub fn connect(
        &self,
        peer: SocketAddr,
        object: PnUuid,
        interface: PnUuid,
        params: &ConnectParams,
        strategy: ConnectStrategy,
    ) -> RpcResult<ConnectResponse> {
        let mut body = vec![0u8; TX_BUF_LEN];
        let len = build_connect_request(&mut body, params)?;
        body.truncate(len);

        let timeout = strategy.timing_profile.scale(RPC_CONNECT_TIMEOUT);
        let response_body = self.call(
            peer,
            object,
            interface,
            RPC_OPNUM_CONNECT,
            &body,
            strategy,
            timeout,
        )?;
        Ok(parse_connect_response(&response_body)?)
    }

    /// Iterate strategies until one connect succeeds.
    ///
    /// Returns the response together with the strategy that worked so the
    /// AR keeps speaking the same dialect for the rest of its life.
    pub fn connect_with_strategies(
        &self,
        peer: SocketAddr,
        object: PnUuid,
        interface: PnUuid,
        params: &ConnectParams,
        strategies: &[ConnectStrategy],
    ) -> RpcResult<(ConnectResponse, ConnectStrategy)> {
        for (i, strategy) in strategies.iter().enumerate() {
            log::debug!(
                "[Rpc] connect attempt {}/{} peer={} {}",
                i + 1,
                strategies.len(),
                peer,
                strategy
            );
            match self.connect(peer, object, interface, params, *strategy) {
                Ok(response) => return Ok((response, *strategy)),
                Err(RpcError::Timeout) | Err(RpcError::Rejected { .. }) => {
                    log::warn!(
                        "[Rpc] connect attempt {}/{} failed, trying next strategy",
                        i + 1,
                        strategies.len()
                    );
                }
                Err(other) => return Err(other),
            }
        }
        Err(RpcError::StrategiesExhausted)
    }

    /// PrmEnd or other controller-initiated control exchange.
    pub fn control(
        &self,
        peer: SocketAddr,
        object: PnUuid,
        interface: PnUuid,
        block: ControlBlock,
        strategy: ConnectStrategy,
    ) -> RpcResult<ControlBlock> {
        let mut body = vec![0u8; 256];
        let len = block.write(&mut body)?;
        body.truncate(len);

        let opnum = match strategy.opnum_variant {
            super::strategy::OpnumVariant::Control => RPC_OPNUM_CONTROL,
            super::strategy::OpnumVariant::WriteControl => RPC_OPNUM_WRITE,
        };
        let timeout = strategy.timing_profile.scale(RPC_CONTROL_TIMEOUT);
        let response_body =
            self.call(peer, object, interface, opnum, &body, strategy, timeout)?;
        Ok(ControlBlock::parse(&response_body)?)
    }

    /// Release the AR; the 3 s timeout doubles as the REL_SENT fallback.
    pub fn release(
        &self,
        peer: SocketAddr,
        object: PnUuid,
        interface: PnUuid,
        ar_uuid: PnUuid,
        session_key: u16,
        strategy: ConnectStrategy,
    ) -> RpcResult<()> {
        let block = ControlBlock::release(ar_uuid, session_key);
        let mut body = vec![0u8; 256];
        let len = block.write(&mut body)?;
        body.truncate(len);

        let timeout = strategy.timing_profile.scale(RPC_RELEASE_TIMEOUT);
        self.call(
            peer,
            object,
            interface,
            RPC_OPNUM_RELEASE,
            &body,
            strategy,
            timeout,
        )?;
        Ok(())
    }

    /// Acyclic record read; returns the record data after the response
    /// header block.
    pub fn read_record(
        &self,
        peer: SocketAddr,
        object: PnUuid,
        interface: PnUuid,
        header: RecordHeader,
        strategy: ConnectStrategy,
    ) -> RpcResult<Vec<u8>> {
        let mut body = vec![0u8; 256];
        let len = header.write(&mut body, BLOCK_IOD_READ_REQ)?;
        body.truncate(len);

        let timeout = strategy.timing_profile.scale(RPC_READ_WRITE_TIMEOUT);
        let response_body = self.call(
            peer,
            object,
            interface,
            RPC_OPNUM_READ,
            &body,
            strategy,
            timeout,
        )?;
        let (_, response_header) = RecordHeader::parse(&response_body)?;
        let header_len = 64usize.min(response_body.len());
        let data_len = (response_header.record_data_length as usize)
            .min(response_body.len() - header_len);
        Ok(response_body[header_len..header_len + data_len].to_vec())
    }

    /// Acyclic record write: header block followed by the record data.
    pub fn write_record(
        &self,
        peer: SocketAddr,
        object: PnUuid,
        interface: PnUuid,
        mut header: RecordHeader,
        data: &[u8],
        strategy: ConnectStrategy,
    ) -> RpcResult<()> {
        header.record_data_length = data.len() as u32;
        let mut body = vec![0u8; 256 + data.len()];
        let len = header.write(&mut body, BLOCK_IOD_WRITE_REQ)?;
        body.truncate(len);
        body.extend_from_slice(data);

        let timeout = strategy.timing_profile.scale(RPC_READ_WRITE_TIMEOUT);
        self.call(
            peer,
            object,
            interface,
            RPC_OPNUM_WRITE,
            &body,
            strategy,
            timeout,
        )?;
        Ok(())
    }

    /// Send one request and wait for the matching response body (NDR header
    /// already stripped).
    #[allow(clippy::too_many_arguments)]
    fn call(
        &self,
        peer: SocketAddr,
        object: PnUuid,
        interface: PnUuid,
        opnum: u16,
        body: &[u8],
        strategy: ConnectStrategy,
        timeout: Duration,
    ) -> RpcResult<Vec<u8>> {
        let sequence = self.next_sequence();
        let datagram = self.assemble(object, interface, opnum, sequence, body, strategy)?;
        self.endpoint.send_to(&datagram, peer)?;

        let wire_activity = wire_uuid(self.activity, strategy.uuid_format);
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(RpcError::Timeout);
            }
            let Some((packet, _from)) = self.endpoint.recv_from(deadline - now)? else {
                return Err(RpcError::Timeout);
            };
            let mut cursor = Cursor::new(&packet);
            let header = match RpcHeader::read(&mut cursor) {
                Ok(h) => h,
                Err(e) => {
                    log::debug!("[Rpc] dropping malformed packet: {}", e);
                    continue;
                }
            };
            // Activity may arrive in either byte order; accept both.
            if header.activity != wire_activity && header.activity != self.activity {
                continue;
            }
            if header.sequence != sequence {
                continue;
            }
            match header.packet_type {
                RPC_PT_RESPONSE => {
                    let body_start = cursor.offset();
                    let response_body = &packet[body_start..];
                    return Ok(strip_ndr(response_body)?);
                }
                RPC_PT_FAULT | RPC_PT_REJECT => {
                    let body_start = cursor.offset();
                    let status = fault_status(&packet[body_start..]);
                    return Err(RpcError::Rejected {
                        pnio_status: status,
                    });
                }
                _ => continue,
            }
        }
    }

    fn assemble(
        &self,
        object: PnUuid,
        interface: PnUuid,
        opnum: u16,
        sequence: u32,
        body: &[u8],
        strategy: ConnectStrategy,
    ) -> RpcResult<Vec<u8>> {
        let ndr_len = match strategy.ndr_mode {
            NdrMode::Wrapped => crate::protocol::constants::NDR_REQUEST_HEADER_LEN,
            NdrMode::Bare => 0,
        };
        let fragment_len = (ndr_len + body.len()) as u16;

        let mut header = RpcHeader::request(
            wire_uuid(object, strategy.uuid_format),
            wire_uuid(interface, strategy.uuid_format),
            wire_uuid(self.activity, strategy.uuid_format),
            sequence,
            opnum,
        );
        header.fragment_len = fragment_len;

        let mut out = vec![0u8; crate::protocol::constants::RPC_HEADER_LEN + ndr_len + body.len()];
        let mut cursor = CursorMut::new(&mut out);
        header.write(&mut cursor)?;
        if strategy.ndr_mode == NdrMode::Wrapped {
            NdrRequestHeader::for_body(body.len() as u32).write(&mut cursor)?;
        }
        cursor.write_bytes(body)?;
        Ok(out)
    }
}

/// Apply the strategy's UUID wire format.
fn wire_uuid(uuid: PnUuid, format: UuidFormat) -> PnUuid {
    match format {
        UuidFormat::Stored => uuid,
        UuidFormat::Swapped => uuid.swapped(),
    }
}

/// Strip a detected NDR response header, returning the PNIO body.
fn strip_ndr(body: &[u8]) -> RpcResult<Vec<u8>> {
    match detect_ndr(body, true)? {
        NdrDetect::Bare => Ok(body.to_vec()),
        NdrDetect::Wrapped(skip) => {
            // The leading word of the NDR response header is the PNIO
            // status; non-zero means the op failed even with a RESPONSE
            // packet type.
            let mut cursor = Cursor::new(body);
            let status = cursor.read_u32_le()?;
            if status != 0 {
                return Err(RpcError::Rejected {
                    pnio_status: status,
                });
            }
            Ok(body[skip..].to_vec())
        }
    }
}

/// Best-effort PNIO status out of a fault body.
fn fault_status(body: &[u8]) -> u32 {
    let mut cursor = Cursor::new(body);
    cursor.read_u32_le().unwrap_or(0xFFFF_FFFF)
}

/// Activity UUID unique to this controller process.
fn local_activity_uuid() -> PnUuid {
    let mut uuid = [0u8; 16];
    uuid[0..4].copy_from_slice(&0xA1C7_0001u32.to_be_bytes());
    uuid[4..8].copy_from_slice(&process::id().to_be_bytes());
    let since_epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    uuid[8..16].copy_from_slice(&since_epoch.to_be_bytes());
    PnUuid(uuid)
}
