// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Seqlock readers of the shared-state snapshot area.
//!
//! Readers never write. A read retries while the writer sequence is odd or
//! changes underneath; with no writer active the first pass succeeds, so
//! the retry loop always terminates.

use super::layout::{
    ALARM_ARRAY, ALARM_RECORD_LEN, ALM_ACK_TS_NS, ALM_CLEAR_TS_NS, ALM_CONDITION, ALM_ID,
    ALM_OPERATOR, ALM_RTU, ALM_RULE_ID, ALM_SEVERITY, ALM_SHELVED_UNTIL_NS, ALM_SLOT, ALM_STATE,
    ALM_TRIP_TS_NS, ALM_TRIP_VALUE, CELL_LAST_UPDATE_MS, CELL_QUALITY, CELL_VALUE, HDR_ALARM_COUNT,
    HDR_MAGIC, HDR_RTU_COUNT, HDR_TIMESTAMP_NS, HDR_VERSION, HDR_WRITER_SEQ, NAME_FIELD_LEN,
    OPERATOR_FIELD_LEN, RTU_ARRAY, RTU_HEALTH, RTU_IP, RTU_LAST_UPDATE_NS, RTU_NAME,
    RTU_RECORD_LEN, RTU_STATE, SENSOR_CELL_LEN, SENSOR_MATRIX,
};
use super::{Region, Segment, ShmError, ShmResult};
use crate::config::{MAX_ACTIVE_ALARMS, MAX_RTUS, MAX_SLOTS, SHM_MAGIC, SHM_VERSION};
use crate::core::types::Quality;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// RTU row as read back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRtu {
    pub station_name: String,
    pub state: u8,
    pub health: u8,
    pub ip: [u8; 4],
    pub last_update_ns: u64,
}

/// Active-alarm row as read back.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotAlarm {
    pub id: u32,
    pub rule_id: u32,
    pub rtu: String,
    pub slot: u16,
    pub severity: u8,
    pub state: u8,
    pub condition: u8,
    pub trip_ts_ns: i64,
    pub clear_ts_ns: i64,
    pub ack_ts_ns: i64,
    pub trip_value: f64,
    pub operator: String,
    pub shelved_until_ns: i64,
}

/// Consistent snapshot of the header + RTU + alarm areas.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub timestamp_ns: i64,
    pub rtus: Vec<SnapshotRtu>,
    pub alarms: Vec<SnapshotAlarm>,
}

pub struct ShmReader {
    region: Region,
}

impl ShmReader {
    /// Open a mapped segment, validating magic and schema version.
    pub fn open(segment: Arc<dyn Segment>) -> ShmResult<Self> {
        let region = Region::new(segment)?;
        let magic = region.read_u32(HDR_MAGIC);
        let version = region.read_u32(HDR_VERSION);
        if magic != SHM_MAGIC || version != SHM_VERSION {
            return Err(ShmError::SchemaMismatch { magic, version });
        }
        Ok(Self { region })
    }

    /// Take a consistent snapshot (seqlock retry loop).
    pub fn snapshot(&self) -> Snapshot {
        loop {
            let seq = self.region.atomic_u64(HDR_WRITER_SEQ);
            let before = seq.load(Ordering::Acquire);
            if before % 2 != 0 {
                std::hint::spin_loop();
                continue;
            }

            let snapshot = self.read_unguarded();

            if seq.load(Ordering::Acquire) == before {
                return snapshot;
            }
            std::hint::spin_loop();
        }
    }

    /// One sensor cell under the seqlock.
    pub fn sensor(&self, rtu_index: usize, slot_index: usize) -> Option<(f64, Quality, u32)> {
        if rtu_index >= MAX_RTUS || slot_index >= MAX_SLOTS {
            return None;
        }
        let base = SENSOR_MATRIX + (rtu_index * MAX_SLOTS + slot_index) * SENSOR_CELL_LEN;
        loop {
            let seq = self.region.atomic_u64(HDR_WRITER_SEQ);
            let before = seq.load(Ordering::Acquire);
            if before % 2 != 0 {
                std::hint::spin_loop();
                continue;
            }
            let value = self.region.read_f64(base + CELL_VALUE);
            let quality = Quality::from_wire(self.region.read_u16(base + CELL_QUALITY));
            let ms = self.region.read_u32(base + CELL_LAST_UPDATE_MS);
            if seq.load(Ordering::Acquire) == before {
                return Some((value, quality, ms));
            }
            std::hint::spin_loop();
        }
    }

    fn read_unguarded(&self) -> Snapshot {
        let timestamp_ns = self.region.read_i64(HDR_TIMESTAMP_NS);
        let rtu_count = (self.region.read_u32(HDR_RTU_COUNT) as usize).min(MAX_RTUS);
        let alarm_count = (self.region.read_u32(HDR_ALARM_COUNT) as usize).min(MAX_ACTIVE_ALARMS);

        let rtus = (0..rtu_count)
            .map(|i| {
                let base = RTU_ARRAY + i * RTU_RECORD_LEN;
                let mut ip = [0u8; 4];
                self.region.read_bytes(base + RTU_IP, &mut ip);
                SnapshotRtu {
                    station_name: self.region.read_name(base + RTU_NAME, NAME_FIELD_LEN),
                    state: self.region.read_u8(base + RTU_STATE),
                    health: self.region.read_u8(base + RTU_HEALTH),
                    ip,
                    last_update_ns: self.region.read_u64(base + RTU_LAST_UPDATE_NS),
                }
            })
            .collect();

        let alarms = (0..alarm_count)
            .map(|i| {
                let base = ALARM_ARRAY + i * ALARM_RECORD_LEN;
                SnapshotAlarm {
                    id: self.region.read_u32(base + ALM_ID),
                    rule_id: self.region.read_u32(base + ALM_RULE_ID),
                    rtu: self.region.read_name(base + ALM_RTU, NAME_FIELD_LEN),
                    slot: self.region.read_u16(base + ALM_SLOT),
                    severity: self.region.read_u8(base + ALM_SEVERITY),
                    state: self.region.read_u8(base + ALM_STATE),
                    condition: self.region.read_u8(base + ALM_CONDITION),
                    trip_ts_ns: self.region.read_i64(base + ALM_TRIP_TS_NS),
                    clear_ts_ns: self.region.read_i64(base + ALM_CLEAR_TS_NS),
                    ack_ts_ns: self.region.read_i64(base + ALM_ACK_TS_NS),
                    trip_value: self.region.read_f64(base + ALM_TRIP_VALUE),
                    operator: self.region.read_name(base + ALM_OPERATOR, OPERATOR_FIELD_LEN),
                    shelved_until_ns: self.region.read_i64(base + ALM_SHELVED_UNTIL_NS),
                }
            })
            .collect();

        Snapshot {
            timestamp_ns,
            rtus,
            alarms,
        }
    }
}
