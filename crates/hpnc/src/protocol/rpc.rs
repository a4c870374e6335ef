// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DCE/RPC connectionless (v4) header codec and NDR auto-detection.
//!
//! The Context-Manager RPC header is 80 bytes at the IEC 61158-6 layout.
//! Multi-byte fields follow the DREP in the header; we always emit
//! little-endian + ASCII and accept either on receive.
//!
//! Some device stacks wrap the PNIO payload in an NDR args header (20 bytes
//! on requests, 24 on responses), some don't. [`detect_ndr`] sniffs the
//! first word: PNIO block types live in a known window, anything else is an
//! NDR prefix to skip.

use crate::core::ser::{Cursor, CursorMut, SerError, SerResult};
use crate::core::types::PnUuid;
use crate::protocol::constants::*;

/// Fixed-size DCE/RPC v4 header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcHeader {
    pub packet_type: u8,
    pub flags1: u8,
    pub flags2: u8,
    /// Data representation; byte 0 carries integer/character encoding.
    pub drep: [u8; 3],
    pub serial_high: u8,
    pub object: PnUuid,
    pub interface: PnUuid,
    pub activity: PnUuid,
    pub server_boot_time: u32,
    pub interface_version: u32,
    pub sequence: u32,
    pub opnum: u16,
    pub interface_hint: u16,
    pub activity_hint: u16,
    pub fragment_len: u16,
    pub fragment_num: u16,
    pub auth_protocol: u8,
    pub serial_low: u8,
}

impl RpcHeader {
    /// Fresh idempotent request header.
    pub fn request(
        object: PnUuid,
        interface: PnUuid,
        activity: PnUuid,
        sequence: u32,
        opnum: u16,
    ) -> Self {
        Self {
            packet_type: RPC_PT_REQUEST,
            flags1: RPC_FLAG1_IDEMPOTENT,
            flags2: 0,
            drep: [RPC_DREP_LE_ASCII, 0, 0],
            serial_high: RPC_SERIAL_NONE,
            object,
            interface,
            activity,
            server_boot_time: 0,
            interface_version: 1,
            sequence,
            opnum,
            interface_hint: 0xFFFF,
            activity_hint: 0xFFFF,
            fragment_len: 0,
            fragment_num: 0,
            auth_protocol: 0,
            serial_low: RPC_SERIAL_NONE,
        }
    }

    /// Response header echoing a request's identity fields.
    pub fn response_to(request: &RpcHeader, fragment_len: u16) -> Self {
        Self {
            packet_type: RPC_PT_RESPONSE,
            flags1: RPC_FLAG1_IDEMPOTENT,
            fragment_len,
            ..*request
        }
    }

    pub fn is_little_endian(&self) -> bool {
        // Upper nibble of DREP byte 0: 0x1 = little-endian integers.
        self.drep[0] & 0xF0 == 0x10
    }

    /// Encode at the fixed 80-byte layout; `fragment_len` must already be
    /// set to the body length.
    pub fn write(&self, cursor: &mut CursorMut<'_>) -> SerResult<()> {
        cursor.write_u8(RPC_VERSION)?;
        cursor.write_u8(self.packet_type)?;
        cursor.write_u8(self.flags1)?;
        cursor.write_u8(self.flags2)?;
        cursor.write_bytes(&self.drep)?;
        cursor.write_u8(self.serial_high)?;
        self.object.write(cursor)?;
        self.interface.write(cursor)?;
        self.activity.write(cursor)?;
        cursor.write_u32_le(self.server_boot_time)?;
        cursor.write_u32_le(self.interface_version)?;
        cursor.write_u32_le(self.sequence)?;
        cursor.write_u16_le(self.opnum)?;
        cursor.write_u16_le(self.interface_hint)?;
        cursor.write_u16_le(self.activity_hint)?;
        cursor.write_u16_le(self.fragment_len)?;
        cursor.write_u16_le(self.fragment_num)?;
        cursor.write_u8(self.auth_protocol)?;
        cursor.write_u8(self.serial_low)
    }

    /// Decode and validate the version byte; honors the sender's DREP for
    /// the scalar fields.
    pub fn read(cursor: &mut Cursor<'_>) -> SerResult<Self> {
        let version = cursor.read_u8()?;
        if version != RPC_VERSION {
            return Err(SerError::InvalidData {
                reason: format!("rpc version {} unsupported", version),
            });
        }
        let packet_type = cursor.read_u8()?;
        let flags1 = cursor.read_u8()?;
        let flags2 = cursor.read_u8()?;
        let mut drep = [0u8; 3];
        drep.copy_from_slice(cursor.read_bytes(3)?);
        let serial_high = cursor.read_u8()?;
        let object = PnUuid::read(cursor)?;
        let interface = PnUuid::read(cursor)?;
        let activity = PnUuid::read(cursor)?;

        let le = drep[0] & 0xF0 == 0x10;
        let read_u32 = |c: &mut Cursor<'_>| -> SerResult<u32> {
            if le {
                c.read_u32_le()
            } else {
                c.read_u32_be()
            }
        };
        let read_u16 = |c: &mut Cursor<'_>| -> SerResult<u16> {
            if le {
                c.read_u16_le()
            } else {
                c.read_u16_be()
            }
        };

        let server_boot_time = read_u32(cursor)?;
        let interface_version = read_u32(cursor)?;
        let sequence = read_u32(cursor)?;
        let opnum = read_u16(cursor)?;
        let interface_hint = read_u16(cursor)?;
        let activity_hint = read_u16(cursor)?;
        let fragment_len = read_u16(cursor)?;
        let fragment_num = read_u16(cursor)?;
        let auth_protocol = cursor.read_u8()?;
        let serial_low = cursor.read_u8()?;

        Ok(Self {
            packet_type,
            flags1,
            flags2,
            drep,
            serial_high,
            object,
            interface,
            activity,
            server_boot_time,
            interface_version,
            sequence,
            opnum,
            interface_hint,
            activity_hint,
            fragment_len,
            fragment_num,
            auth_protocol,
            serial_low,
        })
    }
}

/// 20-byte little-endian NDR args header on requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdrRequestHeader {
    pub args_maximum: u32,
    pub args_length: u32,
    pub max_count: u32,
    pub offset: u32,
    pub actual_count: u32,
}

impl NdrRequestHeader {
    pub fn for_body(len: u32) -> Self {
        Self {
            args_maximum: NDR_ARGS_MAX,
            args_length: len,
            max_count: NDR_ARGS_MAX,
            offset: 0,
            actual_count: len,
        }
    }

    pub fn write(&self, cursor: &mut CursorMut<'_>) -> SerResult<()> {
        cursor.write_u32_le(self.args_maximum)?;
        cursor.write_u32_le(self.args_length)?;
        cursor.write_u32_le(self.max_count)?;
        cursor.write_u32_le(self.offset)?;
        cursor.write_u32_le(self.actual_count)
    }

    pub fn read(cursor: &mut Cursor<'_>) -> SerResult<Self> {
        Ok(Self {
            args_maximum: cursor.read_u32_le()?,
            args_length: cursor.read_u32_le()?,
            max_count: cursor.read_u32_le()?,
            offset: cursor.read_u32_le()?,
            actual_count: cursor.read_u32_le()?,
        })
    }
}

/// 24-byte little-endian NDR args header on responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdrResponseHeader {
    pub pnio_status: u32,
    pub args_length: u32,
    pub max_count: u32,
    pub offset: u32,
    pub actual_count: u32,
    pub reserved: u32,
}

impl NdrResponseHeader {
    pub fn ok(len: u32) -> Self {
        Self {
            pnio_status: 0,
            args_length: len,
            max_count: len,
            offset: 0,
            actual_count: len,
            reserved: 0,
        }
    }

    pub fn write(&self, cursor: &mut CursorMut<'_>) -> SerResult<()> {
        cursor.write_u32_le(self.pnio_status)?;
        cursor.write_u32_le(self.args_length)?;
        cursor.write_u32_le(self.max_count)?;
        cursor.write_u32_le(self.offset)?;
        cursor.write_u32_le(self.actual_count)?;
        cursor.write_u32_le(self.reserved)
    }

    pub fn read(cursor: &mut Cursor<'_>) -> SerResult<Self> {
        Ok(Self {
            pnio_status: cursor.read_u32_le()?,
            args_length: cursor.read_u32_le()?,
            max_count: cursor.read_u32_le()?,
            offset: cursor.read_u32_le()?,
            actual_count: cursor.read_u32_le()?,
            reserved: cursor.read_u32_le()?,
        })
    }
}

/// NDR sniffing result: offset of the first PNIO block within the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NdrDetect {
    /// Body starts directly with a PNIO block.
    Bare,
    /// Body starts with an NDR header of the given length.
    Wrapped(usize),
}

/// Sniff the body of a received RPC packet for an NDR prefix.
///
/// PNIO block types occupy 0x0101-0x010F on requests and 0x8101-0x810F on
/// responses (plus the IOD read/write headers); the first big-endian word of
/// a bare body always falls in those windows. Anything else is the
/// ArgsMaximum / status field of an NDR header.
pub fn detect_ndr(body: &[u8], is_response: bool) -> SerResult<NdrDetect> {
    let cursor = Cursor::new(body);
    let first = cursor.peek_u16_be()?;
    // The control/release family (0x0110/0x0112/0x0114 and mirrors) sits
    // just past the detect window and must be recognized as bare too.
    let bare = if is_response {
        (BLOCK_RSP_DETECT_MIN..=BLOCK_RSP_DETECT_MAX).contains(&first)
            || matches!(
                first,
                BLOCK_IOD_READ_RSP
                    | BLOCK_IOD_WRITE_RSP
                    | BLOCK_IOD_CONTROL_PRM_END_RSP
                    | BLOCK_IOX_CONTROL_APP_READY_RSP
                    | BLOCK_RELEASE_RSP
            )
    } else {
        (BLOCK_REQ_DETECT_MIN..=BLOCK_REQ_DETECT_MAX).contains(&first)
            || matches!(
                first,
                BLOCK_IOD_READ_REQ
                    | BLOCK_IOD_WRITE_REQ
                    | BLOCK_IOD_CONTROL_PRM_END_REQ
                    | BLOCK_IOX_CONTROL_APP_READY_REQ
                    | BLOCK_RELEASE_REQ
            )
    };
    if bare {
        return Ok(NdrDetect::Bare);
    }
    let skip = if is_response {
        NDR_RESPONSE_HEADER_LEN
    } else {
        NDR_REQUEST_HEADER_LEN
    };
    if body.len() < skip {
        return Err(SerError::InvalidData {
            reason: format!(
                "body of {} bytes too short for {}-byte ndr header",
                body.len(),
                skip
            ),
        });
    }
    Ok(NdrDetect::Wrapped(skip))
}
