// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Command and response rings.
//!
//! Producers (the API backend, possibly several threads) claim a slot by
//! CAS on the write index, fill it, and flip the ready byte last. The
//! single consumer (the core) drains in claim order and posts rejections
//! to the response ring, where the roles reverse.

use super::layout::{
    CommandKind, CommandStatus, CMD_AUTHORITY_GEN, CMD_KIND, CMD_PAYLOAD, CMD_READY, CMD_RING,
    CMD_SEQ, CMD_STATUS, CMD_TARGET, CMD_TIMESTAMP_NS, COMMAND_SLOT_LEN, NAME_FIELD_LEN,
    RING_HEADER_LEN, RING_READ_IDX, RING_WRITE_IDX, RSP_RING,
};
use super::{Region, Segment, ShmError, ShmResult};
use crate::config::{COMMAND_PAYLOAD_LEN, COMMAND_RING_SLOTS, RESPONSE_RING_SLOTS};
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// A drained command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub seq: u64,
    pub kind: CommandKind,
    pub target: String,
    pub payload: [u8; COMMAND_PAYLOAD_LEN],
    pub authority_generation: u64,
    pub timestamp_ns: i64,
}

/// A posted response (acceptance or rejection).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub seq: u64,
    pub status: CommandStatus,
    pub target: String,
}

struct Ring {
    region: Region,
    base: usize,
    slots: usize,
}

impl Ring {
    fn command(region: Region) -> Self {
        Self {
            region,
            base: CMD_RING,
            slots: COMMAND_RING_SLOTS,
        }
    }

    fn response(region: Region) -> Self {
        Self {
            region,
            base: RSP_RING,
            slots: RESPONSE_RING_SLOTS,
        }
    }

    fn slot_offset(&self, claim: u64) -> usize {
        self.base + RING_HEADER_LEN + (claim as usize % self.slots) * COMMAND_SLOT_LEN
    }

    /// Claim the next slot; fails when the ring is full.
    fn claim(&self) -> ShmResult<u64> {
        let write_idx = self.region.atomic_u64(self.base + RING_WRITE_IDX);
        let read_idx = self.region.atomic_u64(self.base + RING_READ_IDX);
        loop {
            let w = write_idx.load(Ordering::Acquire);
            let r = read_idx.load(Ordering::Acquire);
            if w.wrapping_sub(r) >= self.slots as u64 {
                return Err(ShmError::RingFull);
            }
            if write_idx
                .compare_exchange_weak(w, w + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(w);
            }
        }
    }

    /// Slot offset of the next unconsumed entry, if it is ready.
    fn peek(&self) -> Option<(u64, usize)> {
        let read_idx = self.region.atomic_u64(self.base + RING_READ_IDX);
        let r = read_idx.load(Ordering::Acquire);
        let offset = self.slot_offset(r);
        let ready = self.region.atomic_u8(offset + CMD_READY);
        if ready.load(Ordering::Acquire) == 0 {
            return None;
        }
        if self.region.read_u64(offset + CMD_SEQ) != r {
            // Slot carries a stale generation (ring wrapped before the
            // producer finished); wait for the ready flip of our claim.
            return None;
        }
        Some((r, offset))
    }

    /// Mark the peeked slot consumed.
    fn advance(&self, claim: u64, offset: usize) {
        self.region.atomic_u8(offset + CMD_READY).store(0, Ordering::Release);
        self.region
            .atomic_u64(self.base + RING_READ_IDX)
            .store(claim + 1, Ordering::Release);
    }
}

/// Producer handle for the command ring (collaborator side).
pub struct CommandProducer {
    ring: Ring,
}

impl CommandProducer {
    pub fn new(segment: Arc<dyn Segment>) -> ShmResult<Self> {
        Ok(Self {
            ring: Ring::command(Region::new(segment)?),
        })
    }

    /// Reserve a slot, fill it, flip ready last. Returns the sequence.
    pub fn submit(
        &self,
        kind: CommandKind,
        target: &str,
        payload: &[u8],
        authority_generation: u64,
        timestamp_ns: i64,
    ) -> ShmResult<u64> {
        if payload.len() > COMMAND_PAYLOAD_LEN {
            return Err(ShmError::TooSmall {
                have: COMMAND_PAYLOAD_LEN,
                need: payload.len(),
            });
        }
        let claim = self.ring.claim()?;
        let offset = self.ring.slot_offset(claim);
        let region = &self.ring.region;

        region.write_u64(offset + CMD_SEQ, claim);
        region.write_i64(offset + CMD_TIMESTAMP_NS, timestamp_ns);
        region.write_u64(offset + CMD_AUTHORITY_GEN, authority_generation);
        region.write_u8(offset + CMD_KIND, kind as u8);
        region.write_u8(offset + CMD_STATUS, 0);
        region.write_name(offset + CMD_TARGET, NAME_FIELD_LEN, target);
        let mut padded = [0u8; COMMAND_PAYLOAD_LEN];
        padded[..payload.len()].copy_from_slice(payload);
        region.write_bytes(offset + CMD_PAYLOAD, &padded);

        region.atomic_u8(offset + CMD_READY).store(1, Ordering::Release);
        Ok(claim)
    }
}

/// Consumer handle: drains commands, posts responses (core side).
pub struct CommandConsumer {
    commands: Ring,
    responses: Ring,
}

impl CommandConsumer {
    pub fn new(segment: Arc<dyn Segment>) -> ShmResult<Self> {
        let region = Region::new(segment)?;
        Ok(Self {
            commands: Ring::command(region.clone()),
            responses: Ring::response(region),
        })
    }

    /// Drain the next command in claim order, if any.
    pub fn pop(&self) -> Option<Command> {
        let (claim, offset) = self.commands.peek()?;
        let region = &self.commands.region;

        let kind_raw = region.read_u8(offset + CMD_KIND);
        let command = CommandKind::from_wire(kind_raw).map(|kind| {
            let mut payload = [0u8; COMMAND_PAYLOAD_LEN];
            region.read_bytes(offset + CMD_PAYLOAD, &mut payload);
            Command {
                seq: claim,
                kind,
                target: region.read_name(offset + CMD_TARGET, NAME_FIELD_LEN),
                payload,
                authority_generation: region.read_u64(offset + CMD_AUTHORITY_GEN),
                timestamp_ns: region.read_i64(offset + CMD_TIMESTAMP_NS),
            }
        });
        self.commands.advance(claim, offset);
        if command.is_none() {
            log::warn!("[Shm] dropping command with unknown kind {}", kind_raw);
        }
        command
    }

    /// Post a response; a full response ring drops the oldest information
    /// (the collaborator polls state anyway).
    pub fn respond(&self, seq: u64, status: CommandStatus, target: &str) {
        let claim = match self.responses.claim() {
            Ok(claim) => claim,
            Err(_) => {
                log::warn!("[Shm] response ring full, dropping response seq={}", seq);
                return;
            }
        };
        let offset = self.responses.slot_offset(claim);
        let region = &self.responses.region;
        region.write_u64(offset + CMD_SEQ, seq);
        region.write_u8(offset + CMD_STATUS, status as u8);
        region.write_name(offset + CMD_TARGET, NAME_FIELD_LEN, target);
        region.atomic_u8(offset + CMD_READY).store(1, Ordering::Release);
    }
}

/// Response drain for the collaborator side (and the tests).
pub struct ResponseConsumer {
    ring: Ring,
}

impl ResponseConsumer {
    pub fn new(segment: Arc<dyn Segment>) -> ShmResult<Self> {
        Ok(Self {
            ring: Ring::response(Region::new(segment)?),
        })
    }

    pub fn pop(&self) -> Option<Response> {
        let (claim, offset) = self.ring.peek()?;
        let region = &self.ring.region;
        let status = match region.read_u8(offset + CMD_STATUS) {
            0 => CommandStatus::Accepted,
            1 => CommandStatus::StaleRejected,
            2 => CommandStatus::BadTarget,
            3 => CommandStatus::BadPayload,
            _ => CommandStatus::ResourceExhausted,
        };
        let response = Response {
            seq: region.read_u64(offset + CMD_SEQ),
            status,
            target: region.read_name(offset + CMD_TARGET, NAME_FIELD_LEN),
        };
        self.ring.advance(claim, offset);
        Some(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::layout::SEGMENT_LEN;
    use crate::shm::HeapSegment;

    fn segment() -> Arc<dyn Segment> {
        Arc::new(HeapSegment::new(SEGMENT_LEN))
    }

    #[test]
    fn test_submit_pop_in_order() {
        let segment = segment();
        let producer = CommandProducer::new(Arc::clone(&segment)).expect("producer");
        let consumer = CommandConsumer::new(Arc::clone(&segment)).expect("consumer");

        producer
            .submit(CommandKind::ActuatorSet, "intake-rtu-01", &[1, 2, 3, 4], 1, 1_000)
            .expect("submit 1");
        producer
            .submit(CommandKind::AlarmAck, "alarm-42", &[], 1, 2_000)
            .expect("submit 2");

        let first = consumer.pop().expect("first command");
        assert_eq!(first.seq, 0);
        assert_eq!(first.kind, CommandKind::ActuatorSet);
        assert_eq!(first.target, "intake-rtu-01");
        assert_eq!(&first.payload[..4], &[1, 2, 3, 4]);
        assert_eq!(first.authority_generation, 1);

        let second = consumer.pop().expect("second command");
        assert_eq!(second.seq, 1);
        assert_eq!(second.kind, CommandKind::AlarmAck);

        assert!(consumer.pop().is_none());
    }

    #[test]
    fn test_ring_full_rejected() {
        let segment = segment();
        let producer = CommandProducer::new(Arc::clone(&segment)).expect("producer");
        for i in 0..COMMAND_RING_SLOTS {
            producer
                .submit(CommandKind::ActuatorSet, "t", &[], 1, i as i64)
                .expect("fill ring");
        }
        assert!(matches!(
            producer.submit(CommandKind::ActuatorSet, "t", &[], 1, 0),
            Err(ShmError::RingFull)
        ));
    }

    #[test]
    fn test_ring_wraps_after_drain() {
        let segment = segment();
        let producer = CommandProducer::new(Arc::clone(&segment)).expect("producer");
        let consumer = CommandConsumer::new(Arc::clone(&segment)).expect("consumer");

        for round in 0..3 {
            for i in 0..COMMAND_RING_SLOTS {
                producer
                    .submit(CommandKind::SetPointSet, "loop-1", &[i as u8], 1, round)
                    .expect("submit");
            }
            for _ in 0..COMMAND_RING_SLOTS {
                consumer.pop().expect("pop");
            }
        }
        assert!(consumer.pop().is_none());
    }

    #[test]
    fn test_response_roundtrip() {
        let segment = segment();
        let consumer = CommandConsumer::new(Arc::clone(&segment)).expect("consumer");
        let responses = ResponseConsumer::new(Arc::clone(&segment)).expect("responses");

        consumer.respond(7, CommandStatus::StaleRejected, "valve-7");
        let response = responses.pop().expect("response");
        assert_eq!(response.seq, 7);
        assert_eq!(response.status, CommandStatus::StaleRejected);
        assert_eq!(response.target, "valve-7");
        assert!(responses.pop().is_none());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let segment = segment();
        let producer = CommandProducer::new(segment).expect("producer");
        let oversized = [0u8; COMMAND_PAYLOAD_LEN + 1];
        assert!(producer
            .submit(CommandKind::ActuatorSet, "t", &oversized, 1, 0)
            .is_err());
    }

    #[test]
    fn test_concurrent_producers_serialize() {
        let segment = segment();
        let consumer = CommandConsumer::new(Arc::clone(&segment)).expect("consumer");
        let mut handles = Vec::new();
        for t in 0..4 {
            let segment = Arc::clone(&segment);
            handles.push(std::thread::spawn(move || {
                let producer = CommandProducer::new(segment).expect("producer");
                for _ in 0..50 {
                    producer
                        .submit(
                            CommandKind::ActuatorSet,
                            &format!("t{}", t),
                            &[fastrand::u8(..)],
                            1,
                            0,
                        )
                        .expect("submit");
                    if fastrand::bool() {
                        std::thread::yield_now();
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().expect("producer thread");
        }

        let mut seen = Vec::new();
        while let Some(command) = consumer.pop() {
            seen.push(command.seq);
        }
        assert_eq!(seen.len(), 200);
        // Claim order is total across producers.
        for (i, seq) in seen.iter().enumerate() {
            assert_eq!(*seq, i as u64);
        }
    }
}
