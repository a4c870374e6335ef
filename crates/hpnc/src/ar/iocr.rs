// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! IOCR data buffers and slot addressing.
//!
//! The C_SDU layout matches what the IOCR block announced at connect:
//! provider slots in declared order, each as data bytes followed by one
//! IOPS status byte, then one IOCS byte per consumed slot. The buffer
//! length therefore equals the sum of slot data lengths plus the per-slot
//! status bytes -- that equality is asserted at construction and is the
//! basis of the slot addressing below.

use crate::core::ser::{SerError, SerResult};
use crate::protocol::blocks::{ExpectedSlot, IoDirection};
use crate::protocol::constants::{IOXS_BAD, IOXS_GOOD};

/// Byte range of one provider slot inside the C_SDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SlotRange {
    slot: u16,
    subslot: u16,
    data_offset: usize,
    data_len: usize,
    /// IOPS byte directly after the data.
    iops_offset: usize,
}

/// One unidirectional cyclic channel's buffer and bookkeeping.
#[derive(Debug)]
pub struct Iocr {
    pub direction: IoDirection,
    /// Assigned by the device in the connect response.
    pub frame_id: u16,
    buffer: Vec<u8>,
    ranges: Vec<SlotRange>,
    /// IOCS bytes for the consumed side start here.
    iocs_offset: usize,
    iocs_count: usize,
}

impl Iocr {
    /// Lay out the buffer for `direction` from the declared slot list.
    pub fn new(slots: &[ExpectedSlot], direction: IoDirection, frame_id: u16) -> Self {
        let mut ranges = Vec::new();
        let mut offset = 0usize;
        for slot in slots.iter().filter(|s| s.direction == direction) {
            ranges.push(SlotRange {
                slot: slot.slot,
                subslot: slot.subslot,
                data_offset: offset,
                data_len: slot.data_length as usize,
                iops_offset: offset + slot.data_length as usize,
            });
            offset += slot.data_length as usize + 1;
        }
        let iocs_offset = offset;
        let iocs_count = slots.iter().filter(|s| s.direction != direction).count();
        offset += iocs_count;

        let mut buffer = vec![0u8; offset];
        // Fresh buffers report BAD until real data lands.
        for range in &ranges {
            buffer[range.iops_offset] = IOXS_BAD;
        }

        Self {
            direction,
            frame_id,
            buffer,
            ranges,
            iocs_offset,
            iocs_count,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Replace the whole C_SDU from a received frame (input direction).
    ///
    /// Oversized payloads are fine -- the wire pads to the RT minimum; the
    /// tail beyond our layout is ignored. Short payloads are an error.
    pub fn update_from_frame(&mut self, payload: &[u8]) -> SerResult<()> {
        if payload.len() < self.buffer.len() {
            return Err(SerError::InvalidData {
                reason: format!(
                    "payload {} bytes, iocr needs {}",
                    payload.len(),
                    self.buffer.len()
                ),
            });
        }
        let len = self.buffer.len();
        self.buffer.copy_from_slice(&payload[..len]);
        Ok(())
    }

    /// Write one slot's data (output direction) and mark its IOPS good.
    pub fn write_slot(&mut self, slot: u16, subslot: u16, data: &[u8]) -> SerResult<()> {
        let range = self.find(slot, subslot)?;
        if data.len() != range.data_len {
            return Err(SerError::InvalidData {
                reason: format!(
                    "slot {}/{} expects {} bytes, got {}",
                    slot,
                    subslot,
                    range.data_len,
                    data.len()
                ),
            });
        }
        self.buffer[range.data_offset..range.data_offset + range.data_len].copy_from_slice(data);
        self.buffer[range.iops_offset] = IOXS_GOOD;
        Ok(())
    }

    /// Read one slot's data and its IOPS byte.
    pub fn read_slot(&self, slot: u16, subslot: u16) -> SerResult<(&[u8], u8)> {
        let range = self.find(slot, subslot)?;
        Ok((
            &self.buffer[range.data_offset..range.data_offset + range.data_len],
            self.buffer[range.iops_offset],
        ))
    }

    /// Set every IOCS byte (consumer acknowledgment of the opposite CR).
    pub fn set_all_iocs(&mut self, status: u8) {
        for i in 0..self.iocs_count {
            self.buffer[self.iocs_offset + i] = status;
        }
    }

    /// Slots carried by this IOCR, in layout order.
    pub fn slots(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.ranges.iter().map(|r| (r.slot, r.subslot))
    }

    fn find(&self, slot: u16, subslot: u16) -> SerResult<SlotRange> {
        self.ranges
            .iter()
            .find(|r| r.slot == slot && r.subslot == subslot)
            .copied()
            .ok_or_else(|| SerError::InvalidData {
                reason: format!("slot {}/{} not in iocr layout", slot, subslot),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots() -> Vec<ExpectedSlot> {
        vec![
            ExpectedSlot {
                slot: 1,
                subslot: 1,
                module_ident: 0x30,
                submodule_ident: 0x01,
                direction: IoDirection::Input,
                data_length: 4,
            },
            ExpectedSlot {
                slot: 2,
                subslot: 1,
                module_ident: 0x30,
                submodule_ident: 0x01,
                direction: IoDirection::Input,
                data_length: 4,
            },
            ExpectedSlot {
                slot: 3,
                subslot: 1,
                module_ident: 0x31,
                submodule_ident: 0x02,
                direction: IoDirection::Output,
                data_length: 4,
            },
        ]
    }

    #[test]
    fn test_buffer_length_matches_slot_config() {
        // Invariant: data + one IOPS per provided slot + one IOCS per
        // consumed slot.
        let input = Iocr::new(&slots(), IoDirection::Input, 0x8001);
        assert_eq!(input.len(), 2 * (4 + 1) + 1);
        let output = Iocr::new(&slots(), IoDirection::Output, 0xC001);
        assert_eq!(output.len(), 1 * (4 + 1) + 2);
    }

    #[test]
    fn test_write_slot_marks_iops_good() {
        let mut output = Iocr::new(&slots(), IoDirection::Output, 0xC001);
        output
            .write_slot(3, 1, &[0xDE, 0xAD, 0xBE, 0xEF])
            .expect("write slot");
        let (data, iops) = output.read_slot(3, 1).expect("read back");
        assert_eq!(data, &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(iops, IOXS_GOOD);
    }

    #[test]
    fn test_fresh_buffer_reports_bad() {
        let output = Iocr::new(&slots(), IoDirection::Output, 0xC001);
        let (_, iops) = output.read_slot(3, 1).expect("read");
        assert_eq!(iops, IOXS_BAD);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let mut output = Iocr::new(&slots(), IoDirection::Output, 0xC001);
        assert!(output.write_slot(3, 1, &[1, 2]).is_err());
    }

    #[test]
    fn test_unknown_slot_rejected() {
        let mut output = Iocr::new(&slots(), IoDirection::Output, 0xC001);
        assert!(output.write_slot(9, 1, &[1, 2, 3, 4]).is_err());
        // Input slots are not addressable through the output CR.
        assert!(output.write_slot(1, 1, &[1, 2, 3, 4]).is_err());
    }

    #[test]
    fn test_update_from_frame() {
        let mut input = Iocr::new(&slots(), IoDirection::Input, 0x8001);
        // Simulated device payload: slot1 data+IOPS, slot2 data+IOPS, IOCS,
        // padded to the RT minimum as the wire would.
        let mut payload = vec![0u8; 40];
        payload[..5].copy_from_slice(&[1, 2, 3, 4, IOXS_GOOD]);
        payload[5..10].copy_from_slice(&[5, 6, 7, 8, IOXS_GOOD]);
        payload[10] = IOXS_GOOD;
        input.update_from_frame(&payload).expect("update");

        let (data, iops) = input.read_slot(1, 1).expect("slot 1");
        assert_eq!(data, &[1, 2, 3, 4]);
        assert_eq!(iops, IOXS_GOOD);
        let (data, _) = input.read_slot(2, 1).expect("slot 2");
        assert_eq!(data, &[5, 6, 7, 8]);
    }

    #[test]
    fn test_short_frame_rejected() {
        let mut input = Iocr::new(&slots(), IoDirection::Input, 0x8001);
        assert!(input.update_from_frame(&[0u8; 4]).is_err());
    }

    #[test]
    fn test_set_all_iocs() {
        let mut output = Iocr::new(&slots(), IoDirection::Output, 0xC001);
        output.set_all_iocs(IOXS_GOOD);
        assert_eq!(&output.as_bytes()[5..7], &[IOXS_GOOD, IOXS_GOOD]);
    }
}
