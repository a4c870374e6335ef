// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Single writer of the shared-state snapshot area.
//!
//! Publication protocol (seqlock): bump the writer sequence to odd, mutate,
//! bump back to even. Readers that catch an odd or changed sequence retry.
//! `ShmWriter` is deliberately not `Clone`; ownership enforces the single
//! writer.

use super::layout::{
    ALARM_ARRAY, ALARM_RECORD_LEN, ALM_ACK_TS_NS, ALM_CLEAR_TS_NS, ALM_CONDITION, ALM_ID,
    ALM_OPERATOR, ALM_RTU, ALM_RULE_ID, ALM_SEVERITY, ALM_SHELVED_UNTIL_NS, ALM_SLOT, ALM_STATE,
    ALM_TRIP_TS_NS, ALM_TRIP_VALUE, CELL_LAST_UPDATE_MS, CELL_QUALITY, CELL_VALUE, HDR_ALARM_COUNT,
    HDR_MAGIC, HDR_RTU_COUNT, HDR_TIMESTAMP_NS, HDR_VERSION, HDR_WRITER_SEQ, NAME_FIELD_LEN,
    OPERATOR_FIELD_LEN, RTU_ARRAY, RTU_HEALTH, RTU_IP, RTU_LAST_UPDATE_NS, RTU_NAME, RTU_RECORD_LEN,
    RTU_STATE, SENSOR_CELL_LEN, SENSOR_MATRIX, ACTUATOR_MATRIX,
};
use super::{Region, Segment, ShmResult};
use crate::config::{MAX_ACTIVE_ALARMS, MAX_RTUS, MAX_SLOTS, SHM_MAGIC, SHM_VERSION};
use crate::core::types::Quality;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// One RTU row as exported.
#[derive(Debug, Clone)]
pub struct RtuExport {
    pub station_name: String,
    pub state: u8,
    pub health: u8,
    pub ip: [u8; 4],
    pub last_update_ns: u64,
}

/// One active-alarm row as exported.
#[derive(Debug, Clone)]
pub struct AlarmExport {
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

pub struct ShmWriter {
    region: Region,
}

impl ShmWriter {
    /// Initialize the segment header and take writer ownership.
    pub fn create(segment: Arc<dyn Segment>) -> ShmResult<Self> {
        let region = Region::new(segment)?;
        region.write_u32(HDR_MAGIC, SHM_MAGIC);
        region.write_u32(HDR_VERSION, SHM_VERSION);
        region.atomic_u64(HDR_WRITER_SEQ).store(0, Ordering::Release);
        Ok(Self { region })
    }

    /// Run one publication inside the seqlock critical section.
    ///
    /// Keep the closure short; readers spin while the sequence is odd.
    pub fn publish<F: FnOnce(&mut Publication<'_>)>(&mut self, f: F) {
        let seq = self.region.atomic_u64(HDR_WRITER_SEQ);
        seq.fetch_add(1, Ordering::AcqRel); // odd: writer active
        {
            let mut publication = Publication {
                region: &self.region,
            };
            f(&mut publication);
            self.region
                .write_i64(HDR_TIMESTAMP_NS, now_ns());
        }
        seq.fetch_add(1, Ordering::AcqRel); // even: consistent
    }
}

/// Mutation surface available inside a publication.
pub struct Publication<'a> {
    region: &'a Region,
}

impl Publication<'_> {
    /// Rewrite the RTU array (capped at the layout's 64 rows).
    pub fn set_rtus(&mut self, rtus: &[RtuExport]) {
        let count = rtus.len().min(MAX_RTUS);
        self.region.write_u32(HDR_RTU_COUNT, count as u32);
        for (i, rtu) in rtus.iter().take(MAX_RTUS).enumerate() {
            let base = RTU_ARRAY + i * RTU_RECORD_LEN;
            self.region
                .write_name(base + RTU_NAME, NAME_FIELD_LEN, &rtu.station_name);
            self.region.write_u8(base + RTU_STATE, rtu.state);
            self.region.write_u8(base + RTU_HEALTH, rtu.health);
            self.region.write_bytes(base + RTU_IP, &rtu.ip);
            self.region
                .write_u64(base + RTU_LAST_UPDATE_NS, rtu.last_update_ns);
        }
    }

    /// Update one sensor cell.
    pub fn set_sensor(
        &mut self,
        rtu_index: usize,
        slot_index: usize,
        value: f64,
        quality: Quality,
        last_update_ms: u32,
    ) {
        if rtu_index >= MAX_RTUS || slot_index >= MAX_SLOTS {
            return;
        }
        let base =
            SENSOR_MATRIX + (rtu_index * MAX_SLOTS + slot_index) * SENSOR_CELL_LEN;
        self.region.write_f64(base + CELL_VALUE, value);
        self.region.write_u16(base + CELL_QUALITY, quality as u16);
        self.region
            .write_u32(base + CELL_LAST_UPDATE_MS, last_update_ms);
    }

    /// Update one actuator cell (current commanded value).
    pub fn set_actuator(
        &mut self,
        rtu_index: usize,
        slot_index: usize,
        value: f64,
        quality: Quality,
        last_update_ms: u32,
    ) {
        if rtu_index >= MAX_RTUS || slot_index >= MAX_SLOTS {
            return;
        }
        let base =
            ACTUATOR_MATRIX + (rtu_index * MAX_SLOTS + slot_index) * SENSOR_CELL_LEN;
        self.region.write_f64(base + CELL_VALUE, value);
        self.region.write_u16(base + CELL_QUALITY, quality as u16);
        self.region
            .write_u32(base + CELL_LAST_UPDATE_MS, last_update_ms);
    }

    /// Rewrite the active-alarm array (capped at 256 rows).
    pub fn set_alarms(&mut self, alarms: &[AlarmExport]) {
        let count = alarms.len().min(MAX_ACTIVE_ALARMS);
        self.region.write_u32(HDR_ALARM_COUNT, count as u32);
        for (i, alarm) in alarms.iter().take(MAX_ACTIVE_ALARMS).enumerate() {
            let base = ALARM_ARRAY + i * ALARM_RECORD_LEN;
            self.region.write_u32(base + ALM_ID, alarm.id);
            self.region.write_u32(base + ALM_RULE_ID, alarm.rule_id);
            self.region
                .write_name(base + ALM_RTU, NAME_FIELD_LEN, &alarm.rtu);
            self.region.write_u16(base + ALM_SLOT, alarm.slot);
            self.region.write_u8(base + ALM_SEVERITY, alarm.severity);
            self.region.write_u8(base + ALM_STATE, alarm.state);
            self.region.write_u8(base + ALM_CONDITION, alarm.condition);
            self.region.write_i64(base + ALM_TRIP_TS_NS, alarm.trip_ts_ns);
            self.region
                .write_i64(base + ALM_CLEAR_TS_NS, alarm.clear_ts_ns);
            self.region.write_i64(base + ALM_ACK_TS_NS, alarm.ack_ts_ns);
            self.region
                .write_f64(base + ALM_TRIP_VALUE, alarm.trip_value);
            self.region
                .write_name(base + ALM_OPERATOR, OPERATOR_FIELD_LEN, &alarm.operator);
            self.region
                .write_i64(base + ALM_SHELVED_UNTIL_NS, alarm.shelved_until_ns);
        }
    }
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
