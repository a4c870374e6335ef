// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! DCP (Discovery and Configuration Protocol) codec.
//!
//! DCP rides directly on Layer 2 behind the DCP frame-ids. PDU layout:
//!
//! ```text
//! service-id (1) | service-type (1) | xid (4, BE)
//! response-delay (2, BE) | dcp-data-length (2, BE) | blocks...
//! ```
//!
//! Each block is a TLV: option (1), suboption (1), length (2, BE), payload,
//! padded to even length. Response blocks carry a 2-byte BlockInfo/status
//! word before the payload; set-request blocks carry a BlockQualifier.

use crate::core::ser::{Cursor, CursorMut, SerError, SerResult};
use crate::core::types::{IpParams, MacAddr, StationName};
use crate::protocol::constants::*;

/// Parsed DCP PDU header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DcpHeader {
    pub service_id: u8,
    pub service_type: u8,
    pub xid: u32,
    pub response_delay: u16,
    pub data_length: u16,
}

/// One decoded DCP block (response direction).
#[derive(Debug, Clone, PartialEq)]
pub enum DcpBlock {
    /// Option IP / suboption IP parameter.
    IpParam { info: u16, params: IpParams },
    /// Option device / suboption name of station.
    NameOfStation { info: u16, name: String },
    /// Option device / suboption vendor name.
    VendorName { info: u16, name: String },
    /// Option device / suboption device id.
    DeviceId {
        info: u16,
        vendor_id: u16,
        device_id: u16,
    },
    /// Option device / suboption role.
    DeviceRole { info: u16, role: u8 },
    /// Option control / suboption response: set confirmation or rejection.
    ControlResponse {
        option: u8,
        suboption: u8,
        error: u8,
    },
    /// Anything we do not interpret; kept for diagnostics.
    Other {
        option: u8,
        suboption: u8,
        payload: Vec<u8>,
    },
}

/// A fully decoded DCP PDU.
#[derive(Debug, Clone, PartialEq)]
pub struct DcpPacket {
    pub header: DcpHeader,
    pub blocks: Vec<DcpBlock>,
}

// ===== Builders (request direction) =====

fn write_dcp_header(
    cursor: &mut CursorMut<'_>,
    service_id: u8,
    xid: u32,
    response_delay: u16,
) -> SerResult<usize> {
    cursor.write_u8(service_id)?;
    cursor.write_u8(DCP_TYPE_REQUEST)?;
    cursor.write_u32_be(xid)?;
    cursor.write_u16_be(response_delay)?;
    let len_at = cursor.offset();
    cursor.write_u16_be(0)?; // patched once the blocks are in
    Ok(len_at)
}

fn finish_dcp(cursor: &mut CursorMut<'_>, len_at: usize) -> SerResult<usize> {
    let data_len = cursor.offset() - (len_at + 2);
    cursor.patch_u16_be(len_at, data_len as u16)?;
    Ok(cursor.offset())
}

/// Identify-All request: option ALL / suboption ALL, no payload.
pub fn build_identify_all(out: &mut [u8], xid: u32) -> SerResult<usize> {
    let mut cursor = CursorMut::new(out);
    let len_at = write_dcp_header(
        &mut cursor,
        DCP_SERVICE_IDENTIFY,
        xid,
        DCP_RESPONSE_DELAY_DEFAULT,
    )?;
    cursor.write_u8(DCP_OPTION_ALL)?;
    cursor.write_u8(DCP_SUB_ALL)?;
    cursor.write_u16_be(0)?;
    finish_dcp(&mut cursor, len_at)
}

/// Identify request filtered by station name (verification after set-name).
pub fn build_identify_by_name(out: &mut [u8], xid: u32, name: &StationName) -> SerResult<usize> {
    let mut cursor = CursorMut::new(out);
    let len_at = write_dcp_header(
        &mut cursor,
        DCP_SERVICE_IDENTIFY,
        xid,
        DCP_RESPONSE_DELAY_DEFAULT,
    )?;
    cursor.write_u8(DCP_OPTION_DEVICE)?;
    cursor.write_u8(DCP_SUB_DEV_NAME_OF_STATION)?;
    cursor.write_u16_be(name.as_bytes().len() as u16)?;
    cursor.write_bytes(name.as_bytes())?;
    if name.as_bytes().len() % 2 != 0 {
        cursor.write_u8(0)?;
    }
    finish_dcp(&mut cursor, len_at)
}

/// Set NameOfStation request (unicast to the target MAC).
pub fn build_set_name(
    out: &mut [u8],
    xid: u32,
    name: &StationName,
    permanent: bool,
) -> SerResult<usize> {
    let mut cursor = CursorMut::new(out);
    let len_at = write_dcp_header(&mut cursor, DCP_SERVICE_SET, xid, 0)?;
    let qualifier = if permanent {
        DCP_QUALIFIER_PERMANENT
    } else {
        DCP_QUALIFIER_TEMPORARY
    };
    cursor.write_u8(DCP_OPTION_DEVICE)?;
    cursor.write_u8(DCP_SUB_DEV_NAME_OF_STATION)?;
    cursor.write_u16_be((2 + name.as_bytes().len()) as u16)?;
    cursor.write_u16_be(qualifier)?;
    cursor.write_bytes(name.as_bytes())?;
    if name.as_bytes().len() % 2 != 0 {
        cursor.write_u8(0)?;
    }
    finish_dcp(&mut cursor, len_at)
}

/// Set IP-parameter request (unicast to the target MAC).
pub fn build_set_ip(
    out: &mut [u8],
    xid: u32,
    params: &IpParams,
    permanent: bool,
) -> SerResult<usize> {
    let mut cursor = CursorMut::new(out);
    let len_at = write_dcp_header(&mut cursor, DCP_SERVICE_SET, xid, 0)?;
    let qualifier = if permanent {
        DCP_QUALIFIER_PERMANENT
    } else {
        DCP_QUALIFIER_TEMPORARY
    };
    cursor.write_u8(DCP_OPTION_IP)?;
    cursor.write_u8(DCP_SUB_IP_PARAM)?;
    cursor.write_u16_be(2 + 12)?;
    cursor.write_u16_be(qualifier)?;
    params.write(&mut cursor)?;
    finish_dcp(&mut cursor, len_at)
}

/// Signal request: flash the device link LED for field identification.
pub fn build_signal(out: &mut [u8], xid: u32) -> SerResult<usize> {
    let mut cursor = CursorMut::new(out);
    let len_at = write_dcp_header(&mut cursor, DCP_SERVICE_SET, xid, 0)?;
    cursor.write_u8(DCP_OPTION_CONTROL)?;
    cursor.write_u8(DCP_SUB_CTRL_SIGNAL)?;
    cursor.write_u16_be(2 + 2)?;
    cursor.write_u16_be(DCP_QUALIFIER_TEMPORARY)?;
    cursor.write_u16_be(DCP_SIGNAL_FLASH_ONCE)?;
    finish_dcp(&mut cursor, len_at)
}

// ===== Parser =====

/// Parse a DCP PDU (the Ethernet payload after the DCP frame-id).
pub fn parse_dcp(raw: &[u8]) -> SerResult<DcpPacket> {
    let mut cursor = Cursor::new(raw);
    let service_id = cursor.read_u8()?;
    let service_type = cursor.read_u8()?;
    let xid = cursor.read_u32_be()?;
    let response_delay = cursor.read_u16_be()?;
    let data_length = cursor.read_u16_be()?;

    if usize::from(data_length) > cursor.remaining() {
        return Err(SerError::InvalidData {
            reason: format!(
                "dcp data length {} exceeds remaining {}",
                data_length,
                cursor.remaining()
            ),
        });
    }

    let header = DcpHeader {
        service_id,
        service_type,
        xid,
        response_delay,
        data_length,
    };

    let mut blocks = Vec::new();
    let block_region = cursor.read_bytes(usize::from(data_length))?;
    let mut bc = Cursor::new(block_region);
    let is_response = service_type != DCP_TYPE_REQUEST;

    while bc.remaining() >= 4 {
        let option = bc.read_u8()?;
        let suboption = bc.read_u8()?;
        let block_len = usize::from(bc.read_u16_be()?);
        if block_len > bc.remaining() {
            return Err(SerError::InvalidData {
                reason: format!(
                    "dcp block {}/{} length {} exceeds remaining {}",
                    option,
                    suboption,
                    block_len,
                    bc.remaining()
                ),
            });
        }
        let body = bc.read_bytes(block_len)?;
        // Blocks are padded to even length.
        if block_len % 2 != 0 && bc.remaining() > 0 {
            bc.skip(1)?;
        }
        blocks.push(decode_block(option, suboption, body, is_response)?);
    }

    Ok(DcpPacket { header, blocks })
}

fn decode_block(option: u8, suboption: u8, body: &[u8], is_response: bool) -> SerResult<DcpBlock> {
    let mut cursor = Cursor::new(body);
    // Response blocks lead with a BlockInfo word; the control-response block
    // has its own shape.
    match (option, suboption) {
        (DCP_OPTION_IP, DCP_SUB_IP_PARAM) => {
            let info = if is_response { cursor.read_u16_be()? } else { 0 };
            let params = IpParams::read(&mut cursor)?;
            Ok(DcpBlock::IpParam { info, params })
        }
        (DCP_OPTION_DEVICE, DCP_SUB_DEV_NAME_OF_STATION) => {
            let info = if is_response { cursor.read_u16_be()? } else { 0 };
            let raw = cursor.read_bytes(cursor.remaining())?;
            let name = String::from_utf8_lossy(raw).into_owned();
            Ok(DcpBlock::NameOfStation { info, name })
        }
        (DCP_OPTION_DEVICE, DCP_SUB_DEV_VENDOR) => {
            let info = if is_response { cursor.read_u16_be()? } else { 0 };
            let raw = cursor.read_bytes(cursor.remaining())?;
            let name = String::from_utf8_lossy(raw).into_owned();
            Ok(DcpBlock::VendorName { info, name })
        }
        (DCP_OPTION_DEVICE, DCP_SUB_DEV_ID) => {
            let info = if is_response { cursor.read_u16_be()? } else { 0 };
            let vendor_id = cursor.read_u16_be()?;
            let device_id = cursor.read_u16_be()?;
            Ok(DcpBlock::DeviceId {
                info,
                vendor_id,
                device_id,
            })
        }
        (DCP_OPTION_DEVICE, DCP_SUB_DEV_ROLE) => {
            let info = if is_response { cursor.read_u16_be()? } else { 0 };
            let role = cursor.read_u8()?;
            Ok(DcpBlock::DeviceRole { info, role })
        }
        (DCP_OPTION_CONTROL, DCP_SUB_CTRL_RESPONSE) => {
            // Payload: echoed option, echoed suboption, error code.
            let echoed_option = cursor.read_u8()?;
            let echoed_suboption = cursor.read_u8()?;
            let error = cursor.read_u8()?;
            Ok(DcpBlock::ControlResponse {
                option: echoed_option,
                suboption: echoed_suboption,
                error,
            })
        }
        _ => Ok(DcpBlock::Other {
            option,
            suboption,
            payload: body.to_vec(),
        }),
    }
}

/// Build a set/control response PDU -- used by simulated devices in tests
/// and by the loopback conformance harness.
pub fn build_control_response(
    out: &mut [u8],
    xid: u32,
    echoed_option: u8,
    echoed_suboption: u8,
    error: u8,
) -> SerResult<usize> {
    let mut cursor = CursorMut::new(out);
    cursor.write_u8(DCP_SERVICE_SET)?;
    cursor.write_u8(DCP_TYPE_RESPONSE_SUCCESS)?;
    cursor.write_u32_be(xid)?;
    cursor.write_u16_be(0)?;
    let len_at = cursor.offset();
    cursor.write_u16_be(0)?;
    cursor.write_u8(DCP_OPTION_CONTROL)?;
    cursor.write_u8(DCP_SUB_CTRL_RESPONSE)?;
    cursor.write_u16_be(3)?;
    cursor.write_u8(echoed_option)?;
    cursor.write_u8(echoed_suboption)?;
    cursor.write_u8(error)?;
    cursor.write_u8(0)?; // pad to even
    finish_dcp(&mut cursor, len_at)
}

/// Identify-response summary a responding device announces.
///
/// Used by the test harness's simulated RTU and folded into the device cache
/// by the discovery worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifyResponse {
    pub name: String,
    pub vendor_id: u16,
    pub device_id: u16,
    pub mac: MacAddr,
    pub ip: IpParams,
}

/// Build an identify response PDU for a simulated device.
pub fn build_identify_response(
    out: &mut [u8],
    xid: u32,
    response: &IdentifyResponse,
) -> SerResult<usize> {
    let mut cursor = CursorMut::new(out);
    cursor.write_u8(DCP_SERVICE_IDENTIFY)?;
    cursor.write_u8(DCP_TYPE_RESPONSE_SUCCESS)?;
    cursor.write_u32_be(xid)?;
    cursor.write_u16_be(0)?;
    let len_at = cursor.offset();
    cursor.write_u16_be(0)?;

    // NameOfStation
    cursor.write_u8(DCP_OPTION_DEVICE)?;
    cursor.write_u8(DCP_SUB_DEV_NAME_OF_STATION)?;
    cursor.write_u16_be((2 + response.name.len()) as u16)?;
    cursor.write_u16_be(0)?; // BlockInfo
    cursor.write_bytes(response.name.as_bytes())?;
    if response.name.len() % 2 != 0 {
        cursor.write_u8(0)?;
    }

    // DeviceId
    cursor.write_u8(DCP_OPTION_DEVICE)?;
    cursor.write_u8(DCP_SUB_DEV_ID)?;
    cursor.write_u16_be(6)?;
    cursor.write_u16_be(0)?;
    cursor.write_u16_be(response.vendor_id)?;
    cursor.write_u16_be(response.device_id)?;

    // IP parameters
    cursor.write_u8(DCP_OPTION_IP)?;
    cursor.write_u8(DCP_SUB_IP_PARAM)?;
    cursor.write_u16_be(2 + 12)?;
    cursor.write_u16_be(0)?;
    response.ip.write(&mut cursor)?;

    finish_dcp(&mut cursor, len_at)
}
