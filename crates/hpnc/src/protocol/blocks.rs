// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! PNIO block codec: AR, IOCR, Alarm CR, Expected Submodule, control,
//! release, and acyclic read/write record headers.
//!
//! Block framing: type (u16 BE), length (u16 BE, counts everything after
//! the length field), version high/low (u8 each). All scalar fields inside
//! blocks are big-endian. A connect request is the concatenation
//! AR -> IOCR(input) -> IOCR(output) -> Alarm CR -> Expected Submodule.

use crate::config::PN_RPC_PORT;
use crate::core::ser::{Cursor, CursorMut, SerError, SerResult};
use crate::core::types::{MacAddr, PnUuid, StationName};
use crate::protocol::constants::*;

/// Direction of a configured submodule's cyclic data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IoDirection {
    Input,
    Output,
}

/// One expected (slot, subslot) entry as the device declared it.
///
/// The controller adapts to the device's configuration; nothing here is
/// hardcoded to a module family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExpectedSlot {
    pub slot: u16,
    pub subslot: u16,
    pub module_ident: u32,
    pub submodule_ident: u32,
    pub direction: IoDirection,
    pub data_length: u16,
}

// ===== Block header helpers =====

/// Write a block header with a length placeholder; returns the patch offset.
fn begin_block(cursor: &mut CursorMut<'_>, block_type: u16) -> SerResult<usize> {
    cursor.write_u16_be(block_type)?;
    let len_at = cursor.offset();
    cursor.write_u16_be(0)?;
    cursor.write_u8(BLOCK_VERSION_HIGH)?;
    cursor.write_u8(BLOCK_VERSION_LOW)?;
    Ok(len_at)
}

fn end_block(cursor: &mut CursorMut<'_>, len_at: usize) -> SerResult<()> {
    let len = cursor.offset() - (len_at + 2);
    cursor.patch_u16_be(len_at, len as u16)
}

/// Parsed block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub block_type: u16,
    pub length: u16,
    pub version_high: u8,
    pub version_low: u8,
}

impl BlockHeader {
    pub fn read(cursor: &mut Cursor<'_>) -> SerResult<Self> {
        let block_type = cursor.read_u16_be()?;
        let length = cursor.read_u16_be()?;
        let version_high = cursor.read_u8()?;
        let version_low = cursor.read_u8()?;
        if usize::from(length) < 2 {
            return Err(SerError::InvalidData {
                reason: format!("block {:#06x} length {} below minimum", block_type, length),
            });
        }
        Ok(Self {
            block_type,
            length,
            version_high,
            version_low,
        })
    }

    /// Body length after the version bytes.
    pub fn body_len(&self) -> usize {
        usize::from(self.length) - 2
    }
}

// ===== Connect request =====

/// Everything the connect assembler needs to know about the local side.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub ar_uuid: PnUuid,
    pub session_key: u16,
    pub cmi_mac: MacAddr,
    pub cmi_object: PnUuid,
    pub station_name: StationName,
    pub send_clock_factor: u16,
    pub reduction_ratio: u16,
    pub watchdog_factor: u16,
    pub data_hold_factor: u16,
    pub rta_timeout_factor: u16,
    pub rta_retries: u16,
    /// Slots the device declared, input and output mixed; the assembler
    /// splits them per IOCR.
    pub slots: Vec<ExpectedSlot>,
}

impl ConnectParams {
    fn slots_in(&self, direction: IoDirection) -> impl Iterator<Item = &ExpectedSlot> {
        self.slots.iter().filter(move |s| s.direction == direction)
    }

    /// C_SDU length of one direction: data bytes + one IOPS per provided
    /// slot + one IOCS per consumed slot (invariant I1).
    pub fn iocr_data_length(&self, direction: IoDirection) -> u16 {
        let provided: u16 = self
            .slots_in(direction)
            .map(|s| s.data_length + 1)
            .sum();
        let consumed = self
            .slots_in(opposite(direction))
            .count() as u16;
        provided + consumed
    }
}

fn opposite(direction: IoDirection) -> IoDirection {
    match direction {
        IoDirection::Input => IoDirection::Output,
        IoDirection::Output => IoDirection::Input,
    }
}

fn write_ar_block(cursor: &mut CursorMut<'_>, p: &ConnectParams) -> SerResult<()> {
    let len_at = begin_block(cursor, BLOCK_AR_REQ)?;
    cursor.write_u16_be(AR_TYPE_SINGLE)?;
    p.ar_uuid.write(cursor)?;
    cursor.write_u16_be(p.session_key)?;
    p.cmi_mac.write(cursor)?;
    p.cmi_object.write(cursor)?;
    cursor.write_u32_be(AR_PROPERTIES_DEFAULT)?;
    // CMI activity timeout in 100ms units.
    cursor.write_u16_be(600)?;
    cursor.write_u16_be(PN_RPC_PORT)?;
    cursor.write_u16_be(p.station_name.as_bytes().len() as u16)?;
    cursor.write_bytes(p.station_name.as_bytes())?;
    end_block(cursor, len_at)
}

fn write_iocr_block(
    cursor: &mut CursorMut<'_>,
    p: &ConnectParams,
    direction: IoDirection,
    iocr_ref: u16,
) -> SerResult<()> {
    let len_at = begin_block(cursor, BLOCK_IOCR_REQ)?;
    let iocr_type = match direction {
        IoDirection::Input => IOCR_TYPE_INPUT,
        IoDirection::Output => IOCR_TYPE_OUTPUT,
    };
    cursor.write_u16_be(iocr_type)?;
    cursor.write_u16_be(iocr_ref)?;
    cursor.write_u16_be(IOCR_LT_FIELD)?;
    cursor.write_u32_be(IOCR_PROPERTIES_RT_CLASS1)?;
    cursor.write_u16_be(p.iocr_data_length(direction).max(40))?;
    // Frame id 0xFFFF: device assigns and echoes its pick in the response.
    cursor.write_u16_be(0xFFFF)?;
    cursor.write_u16_be(p.send_clock_factor)?;
    cursor.write_u16_be(p.reduction_ratio)?;
    cursor.write_u16_be(1)?; // phase
    cursor.write_u16_be(0)?; // sequence
    cursor.write_u32_be(0xFFFF_FFFF)?; // frame send offset: best effort
    cursor.write_u16_be(p.watchdog_factor)?;
    cursor.write_u16_be(p.data_hold_factor)?;
    cursor.write_u16_be(0xC000)?; // IOCR tag header: priority 6, VLAN 0
    MacAddr::default().write(cursor)?; // multicast MAC unused for unicast RT

    // One API with the IO data objects (provider side of this IOCR) and the
    // IOCS entries (consumer side).
    cursor.write_u16_be(1)?; // number of APIs
    cursor.write_u32_be(0)?; // API 0

    let provider: Vec<&ExpectedSlot> = p.slots_in(direction).collect();
    let consumer: Vec<&ExpectedSlot> = p.slots_in(opposite(direction)).collect();

    cursor.write_u16_be(provider.len() as u16)?;
    let mut frame_offset: u16 = 0;
    for slot in &provider {
        cursor.write_u16_be(slot.slot)?;
        cursor.write_u16_be(slot.subslot)?;
        cursor.write_u16_be(frame_offset)?;
        frame_offset += slot.data_length + 1; // data + IOPS
    }
    cursor.write_u16_be(consumer.len() as u16)?;
    for slot in &consumer {
        cursor.write_u16_be(slot.slot)?;
        cursor.write_u16_be(slot.subslot)?;
        cursor.write_u16_be(frame_offset)?;
        frame_offset += 1; // IOCS
    }
    end_block(cursor, len_at)
}

fn write_alarm_cr_block(cursor: &mut CursorMut<'_>, p: &ConnectParams) -> SerResult<()> {
    let len_at = begin_block(cursor, BLOCK_ALARM_CR_REQ)?;
    cursor.write_u16_be(ALARM_CR_TYPE)?;
    cursor.write_u16_be(IOCR_LT_FIELD)?;
    cursor.write_u32_be(ALARM_CR_PROPERTIES)?;
    cursor.write_u16_be(p.rta_timeout_factor)?;
    cursor.write_u16_be(p.rta_retries)?;
    cursor.write_u16_be(0x0001)?; // local alarm reference
    cursor.write_u16_be(200)?; // max alarm data length
    cursor.write_u16_be(0xC000)?; // high prio tag header
    cursor.write_u16_be(0xA000)?; // low prio tag header
    end_block(cursor, len_at)
}

fn write_expected_submodule_block(cursor: &mut CursorMut<'_>, p: &ConnectParams) -> SerResult<()> {
    let len_at = begin_block(cursor, BLOCK_EXPECTED_SUBMODULE_REQ)?;
    // One API entry per slot keeps the encoding simple and matches what the
    // fielded RTUs emit in their GSDML.
    cursor.write_u16_be(p.slots.len() as u16)?; // NumberOfAPIs entries
    for slot in &p.slots {
        cursor.write_u32_be(0)?; // API
        cursor.write_u16_be(slot.slot)?;
        cursor.write_u32_be(slot.module_ident)?;
        cursor.write_u16_be(0)?; // module properties
        cursor.write_u16_be(1)?; // number of submodules
        cursor.write_u16_be(slot.subslot)?;
        cursor.write_u32_be(slot.submodule_ident)?;
        // Submodule properties: bit 0-1 type = input(1)/output(2).
        let props = match slot.direction {
            IoDirection::Input => 0x0001u16,
            IoDirection::Output => 0x0002u16,
        };
        cursor.write_u16_be(props)?;
        // Data description: type, length, IOPS length, IOCS length.
        let desc_type = match slot.direction {
            IoDirection::Input => 0x0001u16,
            IoDirection::Output => 0x0002u16,
        };
        cursor.write_u16_be(desc_type)?;
        cursor.write_u16_be(slot.data_length)?;
        cursor.write_u8(1)?; // IOPS length
        cursor.write_u8(1)?; // IOCS length
    }
    end_block(cursor, len_at)
}

/// Assemble the full connect request body (block order per IEC 61158-6).
pub fn build_connect_request(out: &mut [u8], p: &ConnectParams) -> SerResult<usize> {
    let mut cursor = CursorMut::new(out);
    write_ar_block(&mut cursor, p)?;
    write_iocr_block(&mut cursor, p, IoDirection::Input, 1)?;
    write_iocr_block(&mut cursor, p, IoDirection::Output, 2)?;
    write_alarm_cr_block(&mut cursor, p)?;
    write_expected_submodule_block(&mut cursor, p)?;
    Ok(cursor.offset())
}

// ===== Connect response =====

/// AR block of a connect response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArBlockRes {
    pub ar_type: u16,
    pub ar_uuid: PnUuid,
    pub session_key: u16,
    pub device_mac: MacAddr,
    pub udp_port: u16,
}

/// IOCR block of a connect response: the device's frame-id assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IocrBlockRes {
    pub iocr_type: u16,
    pub iocr_ref: u16,
    pub frame_id: u16,
}

/// One mismatch reported by a Module Difference block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleDiff {
    pub slot: u16,
    pub module_ident: u32,
    pub module_state: u16,
}

/// Fully parsed connect response.
#[derive(Debug, Clone, Default)]
pub struct ConnectResponse {
    pub ar: Option<ArBlockRes>,
    pub iocrs: Vec<IocrBlockRes>,
    pub alarm_cr_ok: bool,
    /// Non-fatal: reported as DIFF_WARNING upstream.
    pub module_diffs: Vec<ModuleDiff>,
}

impl ConnectResponse {
    pub fn frame_id_for(&self, iocr_type: u16) -> Option<u16> {
        self.iocrs
            .iter()
            .find(|i| i.iocr_type == iocr_type)
            .map(|i| i.frame_id)
    }
}

/// Parse the body of a connect response (after any NDR header).
pub fn parse_connect_response(body: &[u8]) -> SerResult<ConnectResponse> {
    let mut cursor = Cursor::new(body);
    let mut out = ConnectResponse::default();

    while cursor.remaining() >= 6 {
        let header = BlockHeader::read(&mut cursor)?;
        let body_len = header.body_len();
        if body_len > cursor.remaining() {
            return Err(SerError::InvalidData {
                reason: format!(
                    "block {:#06x} length {} exceeds remaining {}",
                    header.block_type,
                    body_len,
                    cursor.remaining()
                ),
            });
        }
        let block_body = cursor.read_bytes(body_len)?;
        let mut bc = Cursor::new(block_body);
        match header.block_type {
            BLOCK_AR_RSP => {
                let ar_type = bc.read_u16_be()?;
                let ar_uuid = PnUuid::read(&mut bc)?;
                let session_key = bc.read_u16_be()?;
                let device_mac = MacAddr::read(&mut bc)?;
                let udp_port = bc.read_u16_be()?;
                out.ar = Some(ArBlockRes {
                    ar_type,
                    ar_uuid,
                    session_key,
                    device_mac,
                    udp_port,
                });
            }
            BLOCK_IOCR_RSP => {
                let iocr_type = bc.read_u16_be()?;
                let iocr_ref = bc.read_u16_be()?;
                let frame_id = bc.read_u16_be()?;
                out.iocrs.push(IocrBlockRes {
                    iocr_type,
                    iocr_ref,
                    frame_id,
                });
            }
            BLOCK_ALARM_CR_RSP => {
                out.alarm_cr_ok = true;
            }
            BLOCK_MODULE_DIFF => {
                parse_module_diff(&mut bc, &mut out.module_diffs)?;
            }
            _ => {
                // Unknown response block: tolerated, skipped.
            }
        }
    }
    Ok(out)
}

fn parse_module_diff(bc: &mut Cursor<'_>, out: &mut Vec<ModuleDiff>) -> SerResult<()> {
    let num_apis = bc.read_u16_be()?;
    for _ in 0..num_apis {
        bc.read_u32_be()?; // API
        let num_modules = bc.read_u16_be()?;
        for _ in 0..num_modules {
            let slot = bc.read_u16_be()?;
            let module_ident = bc.read_u32_be()?;
            let module_state = bc.read_u16_be()?;
            let num_submodules = bc.read_u16_be()?;
            // Submodule detail is not acted on; skip (subslot u16 +
            // submodule ident u32 + state u16 each).
            bc.skip(usize::from(num_submodules) * 8)?;
            out.push(ModuleDiff {
                slot,
                module_ident,
                module_state,
            });
        }
    }
    Ok(())
}

/// Build a connect response body -- the simulated device side.
pub fn build_connect_response(
    out: &mut [u8],
    ar: &ArBlockRes,
    iocrs: &[IocrBlockRes],
    diffs: &[ModuleDiff],
) -> SerResult<usize> {
    let mut cursor = CursorMut::new(out);

    let len_at = begin_block(&mut cursor, BLOCK_AR_RSP)?;
    cursor.write_u16_be(ar.ar_type)?;
    ar.ar_uuid.write(&mut cursor)?;
    cursor.write_u16_be(ar.session_key)?;
    ar.device_mac.write(&mut cursor)?;
    cursor.write_u16_be(ar.udp_port)?;
    end_block(&mut cursor, len_at)?;

    for iocr in iocrs {
        let len_at = begin_block(&mut cursor, BLOCK_IOCR_RSP)?;
        cursor.write_u16_be(iocr.iocr_type)?;
        cursor.write_u16_be(iocr.iocr_ref)?;
        cursor.write_u16_be(iocr.frame_id)?;
        end_block(&mut cursor, len_at)?;
    }

    let len_at = begin_block(&mut cursor, BLOCK_ALARM_CR_RSP)?;
    cursor.write_u16_be(ALARM_CR_TYPE)?;
    cursor.write_u16_be(0x0001)?; // remote alarm reference
    cursor.write_u16_be(200)?; // max alarm data length
    end_block(&mut cursor, len_at)?;

    if !diffs.is_empty() {
        let len_at = begin_block(&mut cursor, BLOCK_MODULE_DIFF)?;
        cursor.write_u16_be(1)?; // one API
        cursor.write_u32_be(0)?;
        cursor.write_u16_be(diffs.len() as u16)?;
        for diff in diffs {
            cursor.write_u16_be(diff.slot)?;
            cursor.write_u32_be(diff.module_ident)?;
            cursor.write_u16_be(diff.module_state)?;
            cursor.write_u16_be(0)?; // no submodule detail
        }
        end_block(&mut cursor, len_at)?;
    }

    Ok(cursor.offset())
}

// ===== Control (PrmEnd / ApplicationReady) and Release =====

/// Control commands carried by IOD/IOX control blocks.
pub const CONTROL_CMD_PRM_END: u16 = 0x0001;
pub const CONTROL_CMD_APP_READY: u16 = 0x0002;
pub const CONTROL_CMD_RELEASE: u16 = 0x0004;
pub const CONTROL_CMD_DONE: u16 = 0x0008;

/// An IOD/IOX control or release block (they share one layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlBlock {
    pub block_type: u16,
    pub ar_uuid: PnUuid,
    pub session_key: u16,
    pub command: u16,
}

impl ControlBlock {
    pub fn prm_end(ar_uuid: PnUuid, session_key: u16) -> Self {
        Self {
            block_type: BLOCK_IOD_CONTROL_PRM_END_REQ,
            ar_uuid,
            session_key,
            command: CONTROL_CMD_PRM_END,
        }
    }

    pub fn app_ready_response(ar_uuid: PnUuid, session_key: u16) -> Self {
        Self {
            block_type: BLOCK_IOX_CONTROL_APP_READY_RSP,
            ar_uuid,
            session_key,
            command: CONTROL_CMD_DONE,
        }
    }

    pub fn release(ar_uuid: PnUuid, session_key: u16) -> Self {
        Self {
            block_type: BLOCK_RELEASE_REQ,
            ar_uuid,
            session_key,
            command: CONTROL_CMD_RELEASE,
        }
    }

    pub fn write(&self, out: &mut [u8]) -> SerResult<usize> {
        let mut cursor = CursorMut::new(out);
        let len_at = begin_block(&mut cursor, self.block_type)?;
        cursor.write_u16_be(0)?; // reserved
        self.ar_uuid.write(&mut cursor)?;
        cursor.write_u16_be(self.session_key)?;
        cursor.write_u16_be(0)?; // alarm sequence number / reserved
        cursor.write_u16_be(self.command)?;
        cursor.write_u16_be(0)?; // control block properties
        end_block(&mut cursor, len_at)?;
        Ok(cursor.offset())
    }

    pub fn parse(body: &[u8]) -> SerResult<Self> {
        let mut cursor = Cursor::new(body);
        let header = BlockHeader::read(&mut cursor)?;
        cursor.read_u16_be()?; // reserved
        let ar_uuid = PnUuid::read(&mut cursor)?;
        let session_key = cursor.read_u16_be()?;
        cursor.read_u16_be()?; // reserved
        let command = cursor.read_u16_be()?;
        Ok(Self {
            block_type: header.block_type,
            ar_uuid,
            session_key,
            command,
        })
    }
}

// ===== Acyclic record read/write =====

/// IOD read/write request header addressed by (API, slot, subslot, index).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub seq_number: u16,
    pub ar_uuid: PnUuid,
    pub api: u32,
    pub slot: u16,
    pub subslot: u16,
    pub index: u16,
    pub record_data_length: u32,
}

impl RecordHeader {
    /// Encode as a read (`BLOCK_IOD_READ_REQ`) or write
    /// (`BLOCK_IOD_WRITE_REQ`) request header. Record data, if any, follows
    /// the header in the RPC body.
    pub fn write(&self, out: &mut [u8], block_type: u16) -> SerResult<usize> {
        let mut cursor = CursorMut::new(out);
        let len_at = begin_block(&mut cursor, block_type)?;
        cursor.write_u16_be(self.seq_number)?;
        self.ar_uuid.write(&mut cursor)?;
        cursor.write_u32_be(self.api)?;
        cursor.write_u16_be(self.slot)?;
        cursor.write_u16_be(self.subslot)?;
        cursor.write_u16_be(0)?; // padding
        cursor.write_u16_be(self.index)?;
        cursor.write_u32_be(self.record_data_length)?;
        // Pad the block to the fixed 64-byte record header size.
        while cursor.offset() < 64 {
            cursor.write_u8(0)?;
        }
        end_block(&mut cursor, len_at)?;
        Ok(cursor.offset())
    }

    pub fn parse(body: &[u8]) -> SerResult<(u16, Self)> {
        let mut cursor = Cursor::new(body);
        let header = BlockHeader::read(&mut cursor)?;
        let seq_number = cursor.read_u16_be()?;
        let ar_uuid = PnUuid::read(&mut cursor)?;
        let api = cursor.read_u32_be()?;
        let slot = cursor.read_u16_be()?;
        let subslot = cursor.read_u16_be()?;
        cursor.read_u16_be()?; // padding
        let index = cursor.read_u16_be()?;
        let record_data_length = cursor.read_u32_be()?;
        Ok((
            header.block_type,
            Self {
                seq_number,
                ar_uuid,
                api,
                slot,
                subslot,
                index,
                record_data_length,
            },
        ))
    }
}
