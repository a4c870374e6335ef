// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Versioned shared-state block and command rings (IPC with collaborators).
//!
//! One fixed-layout segment (see [`layout`]) carries RTU summaries, the
//! sensor/actuator matrices, active alarms, and two SPSC-drained rings.
//! The core process is the single writer of the snapshot area, publishing
//! under a seqlock; collaborators (HTTP API, HMI) map the segment
//! read-mostly and submit work through the command ring.

pub mod layout;
mod reader;
mod rings;
mod segment;
mod writer;

pub use layout::{CommandKind, CommandStatus};
pub use reader::{ShmReader, Snapshot, SnapshotAlarm, SnapshotRtu};
pub use rings::{Command, CommandConsumer, CommandProducer, Response, ResponseConsumer};
#[cfg(target_os = "linux")]
pub use segment::ShmSegment;
pub use segment::{HeapSegment, Segment};
pub use writer::{AlarmExport, RtuExport, ShmWriter};

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, AtomicU8};
use std::sync::Arc;

/// Shared-memory errors.
#[derive(Debug)]
pub enum ShmError {
    InvalidName(String),
    SegmentCreate(io::Error),
    SegmentOpen(io::Error),
    Mmap(io::Error),
    /// Magic/version mismatch on open.
    SchemaMismatch { magic: u32, version: u32 },
    /// Segment smaller than the layout requires.
    TooSmall { have: usize, need: usize },
    /// Ring cannot accept another command right now.
    RingFull,
}

impl fmt::Display for ShmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShmError::InvalidName(name) => write!(f, "invalid segment name '{}'", name),
            ShmError::SegmentCreate(e) => write!(f, "segment create: {}", e),
            ShmError::SegmentOpen(e) => write!(f, "segment open: {}", e),
            ShmError::Mmap(e) => write!(f, "mmap: {}", e),
            ShmError::SchemaMismatch { magic, version } => {
                write!(f, "schema mismatch magic={:#010x} version={}", magic, version)
            }
            ShmError::TooSmall { have, need } => {
                write!(f, "segment too small: {} < {}", have, need)
            }
            ShmError::RingFull => write!(f, "command ring full"),
        }
    }
}

impl std::error::Error for ShmError {}

pub type ShmResult<T> = std::result::Result<T, ShmError>;

/// Bounds-checked little-endian accessors over a segment.
///
/// Scalars go through byte copies (no alignment requirement); the seqlock
/// word and ring indices get atomic views, which the layout keeps 8-byte
/// aligned.
#[derive(Clone)]
pub(crate) struct Region {
    segment: Arc<dyn Segment>,
}

impl Region {
    pub(crate) fn new(segment: Arc<dyn Segment>) -> ShmResult<Self> {
        if segment.len() < layout::SEGMENT_LEN {
            return Err(ShmError::TooSmall {
                have: segment.len(),
                need: layout::SEGMENT_LEN,
            });
        }
        Ok(Self { segment })
    }

    fn check(&self, offset: usize, len: usize) {
        assert!(
            offset + len <= self.segment.len(),
            "shm access {}+{} beyond segment {}",
            offset,
            len,
            self.segment.len()
        );
    }

    pub(crate) fn write_bytes(&self, offset: usize, data: &[u8]) {
        self.check(offset, data.len());
        // SAFETY: bounds checked above; the layout guarantees only one
        // writer mutates snapshot fields (seqlock) or a claimed ring slot.
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.segment.ptr().add(offset),
                data.len(),
            );
        }
    }

    pub(crate) fn read_bytes(&self, offset: usize, out: &mut [u8]) {
        self.check(offset, out.len());
        // SAFETY: bounds checked above; concurrent writes are tolerated --
        // the seqlock/ready protocols detect torn reads.
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.segment.ptr().add(offset),
                out.as_mut_ptr(),
                out.len(),
            );
        }
    }

    pub(crate) fn write_u32(&self, offset: usize, value: u32) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    pub(crate) fn read_u32(&self, offset: usize) -> u32 {
        let mut buf = [0u8; 4];
        self.read_bytes(offset, &mut buf);
        u32::from_le_bytes(buf)
    }

    pub(crate) fn write_u16(&self, offset: usize, value: u16) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    pub(crate) fn read_u16(&self, offset: usize) -> u16 {
        let mut buf = [0u8; 2];
        self.read_bytes(offset, &mut buf);
        u16::from_le_bytes(buf)
    }

    pub(crate) fn write_u64(&self, offset: usize, value: u64) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    pub(crate) fn read_u64(&self, offset: usize) -> u64 {
        let mut buf = [0u8; 8];
        self.read_bytes(offset, &mut buf);
        u64::from_le_bytes(buf)
    }

    pub(crate) fn write_i64(&self, offset: usize, value: i64) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    pub(crate) fn read_i64(&self, offset: usize) -> i64 {
        let mut buf = [0u8; 8];
        self.read_bytes(offset, &mut buf);
        i64::from_le_bytes(buf)
    }

    pub(crate) fn write_f64(&self, offset: usize, value: f64) {
        self.write_bytes(offset, &value.to_bits().to_le_bytes());
    }

    pub(crate) fn read_f64(&self, offset: usize) -> f64 {
        f64::from_bits(self.read_u64(offset))
    }

    pub(crate) fn write_u8(&self, offset: usize, value: u8) {
        self.write_bytes(offset, &[value]);
    }

    pub(crate) fn read_u8(&self, offset: usize) -> u8 {
        let mut buf = [0u8; 1];
        self.read_bytes(offset, &mut buf);
        buf[0]
    }

    /// Atomic view of an 8-byte-aligned u64 (seqlock word, ring indices).
    pub(crate) fn atomic_u64(&self, offset: usize) -> &AtomicU64 {
        self.check(offset, 8);
        assert!(offset % 8 == 0, "atomic u64 at unaligned offset {}", offset);
        // SAFETY: bounds and alignment checked; AtomicU64 has the same
        // layout as u64 and the segment outlives the Region (Arc).
        unsafe { &*(self.segment.ptr().add(offset) as *const AtomicU64) }
    }

    /// Atomic view of one byte (ready flags).
    pub(crate) fn atomic_u8(&self, offset: usize) -> &AtomicU8 {
        self.check(offset, 1);
        // SAFETY: bounds checked; AtomicU8 has the same layout as u8.
        unsafe { &*(self.segment.ptr().add(offset) as *const AtomicU8) }
    }

    /// NUL-padded string field.
    pub(crate) fn write_name(&self, offset: usize, width: usize, name: &str) {
        let mut field = vec![0u8; width];
        let take = name.len().min(width);
        field[..take].copy_from_slice(&name.as_bytes()[..take]);
        self.write_bytes(offset, &field);
    }

    pub(crate) fn read_name(&self, offset: usize, width: usize) -> String {
        let mut field = vec![0u8; width];
        self.read_bytes(offset, &mut field);
        let end = field.iter().position(|b| *b == 0).unwrap_or(width);
        String::from_utf8_lossy(&field[..end]).into_owned()
    }
}

#[cfg(test)]
mod region_tests {
    use super::*;

    fn region() -> Region {
        Region::new(Arc::new(HeapSegment::new(layout::SEGMENT_LEN))).expect("region")
    }

    #[test]
    fn test_scalar_roundtrip() {
        let r = region();
        r.write_u32(0, 0x5754_4301);
        assert_eq!(r.read_u32(0), 0x5754_4301);
        r.write_f64(16, 7.25);
        assert!((r.read_f64(16) - 7.25).abs() < f64::EPSILON);
        r.write_i64(24, -42);
        assert_eq!(r.read_i64(24), -42);
    }

    #[test]
    fn test_little_endian_on_the_wire() {
        let r = region();
        r.write_u32(0, 0x0102_0304);
        let mut raw = [0u8; 4];
        r.read_bytes(0, &mut raw);
        assert_eq!(raw, [0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn test_name_field_roundtrip() {
        let r = region();
        r.write_name(100, 32, "intake-rtu-01");
        assert_eq!(r.read_name(100, 32), "intake-rtu-01");
        // Over-long names truncate at the field width.
        let long = "x".repeat(64);
        r.write_name(200, 32, &long);
        assert_eq!(r.read_name(200, 32).len(), 32);
    }

    #[test]
    fn test_undersized_segment_rejected() {
        let result = Region::new(Arc::new(HeapSegment::new(64)));
        assert!(matches!(result, Err(ShmError::TooSmall { .. })));
    }
}
