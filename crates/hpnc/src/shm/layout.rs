// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed shared-state layout -- the stable contract with collaborators.
//!
//! Everything is packed little-endian at fixed offsets so a reader in any
//! language can map the segment. Layout, in order:
//!
//! ```text
//! offset 0      header        (64 B: magic, version, writer-seq, timestamp)
//! RTU_ARRAY     64 records    (64 B each: name, state, health, ip, ts)
//! SENSOR_MATRIX 64 x 247      (16 B cells: f64 value, u16 quality, u32 ms)
//! ACTUATOR_MATRIX  same shape
//! ALARM_ARRAY   256 records   (128 B each)
//! CMD_RING      header + 1024 slots (128 B each)
//! RSP_RING      header + 256 slots  (128 B each)
//! ```
//!
//! Concurrency: the header's writer-sequence is a seqlock over everything
//! outside the rings; the rings carry their own atomic indices. Any layout
//! change bumps [`crate::config::SHM_VERSION`].

use crate::config::{
    COMMAND_PAYLOAD_LEN, COMMAND_RING_SLOTS, MAX_ACTIVE_ALARMS, MAX_RTUS, MAX_SLOTS,
    RESPONSE_RING_SLOTS,
};

// ===== Record sizes =====

pub const HEADER_LEN: usize = 64;
pub const RTU_RECORD_LEN: usize = 64;
pub const SENSOR_CELL_LEN: usize = 16;
pub const ALARM_RECORD_LEN: usize = 128;
pub const RING_HEADER_LEN: usize = 64;
pub const COMMAND_SLOT_LEN: usize = 128;

/// Station-name field width inside records (NUL-padded).
pub const NAME_FIELD_LEN: usize = 32;
/// Operator field width inside alarm records.
pub const OPERATOR_FIELD_LEN: usize = 16;

// ===== Header field offsets =====

pub const HDR_MAGIC: usize = 0;
pub const HDR_VERSION: usize = 4;
/// Seqlock word (u64, atomic).
pub const HDR_WRITER_SEQ: usize = 8;
pub const HDR_TIMESTAMP_NS: usize = 16;
pub const HDR_RTU_COUNT: usize = 24;
pub const HDR_ALARM_COUNT: usize = 28;

// ===== Region offsets =====

pub const RTU_ARRAY: usize = HEADER_LEN;
pub const SENSOR_MATRIX: usize = RTU_ARRAY + MAX_RTUS * RTU_RECORD_LEN;
pub const ACTUATOR_MATRIX: usize = SENSOR_MATRIX + MAX_RTUS * MAX_SLOTS * SENSOR_CELL_LEN;
pub const ALARM_ARRAY: usize = ACTUATOR_MATRIX + MAX_RTUS * MAX_SLOTS * SENSOR_CELL_LEN;
pub const CMD_RING: usize = ALARM_ARRAY + MAX_ACTIVE_ALARMS * ALARM_RECORD_LEN;
pub const RSP_RING: usize = CMD_RING + RING_HEADER_LEN + COMMAND_RING_SLOTS * COMMAND_SLOT_LEN;
/// Total segment size.
pub const SEGMENT_LEN: usize = RSP_RING + RING_HEADER_LEN + RESPONSE_RING_SLOTS * COMMAND_SLOT_LEN;

// ===== RTU record field offsets (relative) =====

pub const RTU_NAME: usize = 0;
pub const RTU_STATE: usize = 32;
pub const RTU_HEALTH: usize = 33;
pub const RTU_IP: usize = 36;
pub const RTU_LAST_UPDATE_NS: usize = 40;

// ===== Sensor cell field offsets (relative) =====

pub const CELL_VALUE: usize = 0;
pub const CELL_QUALITY: usize = 8;
pub const CELL_LAST_UPDATE_MS: usize = 12;

// ===== Alarm record field offsets (relative) =====

pub const ALM_ID: usize = 0;
pub const ALM_RULE_ID: usize = 4;
pub const ALM_RTU: usize = 8; // 32 bytes
pub const ALM_SLOT: usize = 40;
pub const ALM_SEVERITY: usize = 42;
pub const ALM_STATE: usize = 43;
pub const ALM_CONDITION: usize = 44;
pub const ALM_TRIP_TS_NS: usize = 48;
pub const ALM_CLEAR_TS_NS: usize = 56;
pub const ALM_ACK_TS_NS: usize = 64;
pub const ALM_TRIP_VALUE: usize = 72;
pub const ALM_OPERATOR: usize = 80; // 16 bytes
pub const ALM_SHELVED_UNTIL_NS: usize = 96;

// ===== Ring header field offsets (relative) =====

/// Producer cursor (u64, atomic, CAS-claimed).
pub const RING_WRITE_IDX: usize = 0;
/// Consumer cursor (u64, atomic, single consumer).
pub const RING_READ_IDX: usize = 8;

// ===== Command slot field offsets (relative) =====

pub const CMD_SEQ: usize = 0;
pub const CMD_TIMESTAMP_NS: usize = 8;
pub const CMD_AUTHORITY_GEN: usize = 16;
pub const CMD_KIND: usize = 24;
/// Ready flag, written last by the producer (atomic u8).
pub const CMD_READY: usize = 25;
/// Status byte on response slots (accepted / rejection reason).
pub const CMD_STATUS: usize = 26;
pub const CMD_TARGET: usize = 32; // 32 bytes
pub const CMD_PAYLOAD: usize = 64; // 64 bytes

/// Command kinds (stable wire values).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandKind {
    ActuatorSet = 1,
    SetPointSet = 2,
    PidMode = 3,
    AlarmAck = 4,
    AddRtu = 5,
    ConnectRtu = 6,
    DcpDiscover = 7,
}

impl CommandKind {
    pub fn from_wire(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(CommandKind::ActuatorSet),
            2 => Some(CommandKind::SetPointSet),
            3 => Some(CommandKind::PidMode),
            4 => Some(CommandKind::AlarmAck),
            5 => Some(CommandKind::AddRtu),
            6 => Some(CommandKind::ConnectRtu),
            7 => Some(CommandKind::DcpDiscover),
            _ => None,
        }
    }
}

/// Response status values (stable wire values).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandStatus {
    Accepted = 0,
    StaleRejected = 1,
    BadTarget = 2,
    BadPayload = 3,
    ResourceExhausted = 4,
}

// Compile-time layout checks: fields stay inside their records and the
// atomic words are 8-byte aligned.
const _: () = {
    assert!(RTU_LAST_UPDATE_NS + 8 <= RTU_RECORD_LEN);
    assert!(CELL_LAST_UPDATE_MS + 4 <= SENSOR_CELL_LEN);
    assert!(ALM_SHELVED_UNTIL_NS + 8 <= ALARM_RECORD_LEN);
    assert!(CMD_PAYLOAD + COMMAND_PAYLOAD_LEN <= COMMAND_SLOT_LEN);
    assert!(HDR_WRITER_SEQ % 8 == 0);
    assert!((CMD_RING + RING_WRITE_IDX) % 8 == 0);
    assert!((RSP_RING + RING_WRITE_IDX) % 8 == 0);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regions_do_not_overlap() {
        assert!(RTU_ARRAY >= HEADER_LEN);
        assert!(SENSOR_MATRIX > RTU_ARRAY);
        assert!(ACTUATOR_MATRIX > SENSOR_MATRIX);
        assert!(ALARM_ARRAY > ACTUATOR_MATRIX);
        assert!(CMD_RING > ALARM_ARRAY);
        assert!(RSP_RING > CMD_RING);
        assert!(SEGMENT_LEN > RSP_RING);
    }

    #[test]
    fn test_segment_size_is_stable() {
        // The collaborators' mapping size; changing it is a schema bump.
        let expected = 64
            + 64 * 64
            + 2 * (64 * 247 * 16)
            + 256 * 128
            + 64
            + 1024 * 128
            + 64
            + 256 * 128;
        assert_eq!(SEGMENT_LEN, expected);
    }

    #[test]
    fn test_command_kind_wire_values() {
        assert_eq!(CommandKind::ActuatorSet as u8, 1);
        assert_eq!(CommandKind::DcpDiscover as u8, 7);
        assert_eq!(CommandKind::from_wire(4), Some(CommandKind::AlarmAck));
        assert_eq!(CommandKind::from_wire(0), None);
        assert_eq!(CommandKind::from_wire(8), None);
    }
}
