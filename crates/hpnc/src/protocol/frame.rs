// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ethernet and PROFINET RT frame codec.
//!
//! An RT Class 1 frame on the wire:
//!
//! ```text
//! dst MAC (6) | src MAC (6) | [802.1Q tag (4)] | EtherType 0x8892 (2)
//! frame-id (2, BE) | C_SDU payload (n) | cycle counter (2, BE)
//! data status (1) | transfer status (1)
//! ```
//!
//! The C_SDU of a cyclic frame is the IOCR data buffer: per-slot data bytes
//! each followed by the IOPS status byte, then one IOCS byte per consumed
//! slot. The codec treats the C_SDU as opaque; slot layout is the IOCR's
//! business (see [`crate::ar::iocr`]).

use crate::config::{PN_ETHERTYPE, VLAN_ETHERTYPE};
use crate::core::ser::{Cursor, CursorMut, SerError, SerResult};
use crate::core::types::MacAddr;

/// Minimum Ethernet frame length on the wire without FCS.
pub const ETH_MIN_FRAME: usize = 60;
/// Ethernet header length without VLAN tag.
pub const ETH_HEADER_LEN: usize = 14;
/// Minimum C_SDU length PROFINET RT mandates (short payloads are padded).
pub const RT_MIN_CSDU: usize = 40;
/// RT trailer: cycle counter + data status + transfer status.
pub const RT_TRAILER_LEN: usize = 4;

/// Parsed Ethernet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthHeader {
    pub dst: MacAddr,
    pub src: MacAddr,
    /// VLAN id + PCP bits when the frame arrived tagged.
    pub vlan_tci: Option<u16>,
    pub ethertype: u16,
}

impl EthHeader {
    pub fn new(dst: MacAddr, src: MacAddr, ethertype: u16) -> Self {
        Self {
            dst,
            src,
            vlan_tci: None,
            ethertype,
        }
    }

    /// Emit the header; VLAN tag included only when `vlan_tci` is set.
    pub fn write(&self, cursor: &mut CursorMut<'_>) -> SerResult<()> {
        self.dst.write(cursor)?;
        self.src.write(cursor)?;
        if let Some(tci) = self.vlan_tci {
            cursor.write_u16_be(VLAN_ETHERTYPE)?;
            cursor.write_u16_be(tci)?;
        }
        cursor.write_u16_be(self.ethertype)
    }

    /// Consume the header, transparently unwrapping one 802.1Q tag.
    pub fn read(cursor: &mut Cursor<'_>) -> SerResult<Self> {
        let dst = MacAddr::read(cursor)?;
        let src = MacAddr::read(cursor)?;
        let mut ethertype = cursor.read_u16_be()?;
        let mut vlan_tci = None;
        if ethertype == VLAN_ETHERTYPE {
            vlan_tci = Some(cursor.read_u16_be()?);
            ethertype = cursor.read_u16_be()?;
        }
        Ok(Self {
            dst,
            src,
            vlan_tci,
            ethertype,
        })
    }
}

/// APDU status trailer of an RT frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApduStatus {
    pub cycle_counter: u16,
    pub data_status: u8,
    pub transfer_status: u8,
}

/// A parsed RT frame (borrowing the C_SDU from the receive buffer).
#[derive(Debug)]
pub struct RtFrame<'a> {
    pub header: EthHeader,
    pub frame_id: u16,
    pub payload: &'a [u8],
    pub status: ApduStatus,
}

/// Build a complete RT Class 1 frame into `out`; returns the wire length.
///
/// Pads the C_SDU to [`RT_MIN_CSDU`] and the whole frame to [`ETH_MIN_FRAME`]
/// as the hardware would.
pub fn build_rt_frame(
    out: &mut [u8],
    dst: MacAddr,
    src: MacAddr,
    frame_id: u16,
    payload: &[u8],
    status: ApduStatus,
) -> SerResult<usize> {
    let mut cursor = CursorMut::new(out);
    EthHeader::new(dst, src, PN_ETHERTYPE).write(&mut cursor)?;
    cursor.write_u16_be(frame_id)?;
    cursor.write_bytes(payload)?;
    if payload.len() < RT_MIN_CSDU {
        // Zero padding is already in place for a fresh buffer, but the send
        // buffers are reused; write explicitly.
        for _ in payload.len()..RT_MIN_CSDU {
            cursor.write_u8(0)?;
        }
    }
    cursor.write_u16_be(status.cycle_counter)?;
    cursor.write_u8(status.data_status)?;
    cursor.write_u8(status.transfer_status)?;

    let mut len = cursor.offset();
    while len < ETH_MIN_FRAME {
        cursor.write_u8(0)?;
        len += 1;
    }
    Ok(len)
}

/// Parse an RT frame from a raw capture.
///
/// Fails (frame dropped upstream, counter incremented) when the EtherType is
/// not PROFINET or the buffer cannot hold the trailer.
pub fn parse_rt_frame(raw: &[u8]) -> SerResult<RtFrame<'_>> {
    let mut cursor = Cursor::new(raw);
    let header = EthHeader::read(&mut cursor)?;
    if header.ethertype != PN_ETHERTYPE {
        return Err(SerError::InvalidData {
            reason: format!("ethertype {:#06x} is not PROFINET", header.ethertype),
        });
    }
    let frame_id = cursor.read_u16_be()?;

    let remaining = cursor.remaining();
    if remaining < RT_TRAILER_LEN {
        return Err(SerError::ReadFailed {
            offset: cursor.offset(),
            reason: "frame too short for APDU trailer".into(),
        });
    }
    let payload = cursor.read_bytes(remaining - RT_TRAILER_LEN)?;
    let cycle_counter = cursor.read_u16_be()?;
    let data_status = cursor.read_u8()?;
    let transfer_status = cursor.read_u8()?;

    Ok(RtFrame {
        header,
        frame_id,
        payload,
        status: ApduStatus {
            cycle_counter,
            data_status,
            transfer_status,
        },
    })
}
