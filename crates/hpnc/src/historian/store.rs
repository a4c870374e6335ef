// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Persistent store abstraction and the chunk wire format.
//!
//! Chunks are append-only, grouped by day. On the wire (the BLOB layout a
//! non-Rust reader would parse):
//!
//! ```text
//! magic "HPNH" (4) | format 1 (1) | compression tag (1) | algo (1) |
//! reserved (1) | sample count (4, LE) | records...
//! record: tag-id u32 | timestamp-ns i64 | value f64 | quality u8  (21 B, LE)
//! ```
//!
//! `compression tag` 1 marks a deflate-compressed record section.

use crate::core::types::{Quality, Sample};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use std::io::{Read, Write};

pub const CHUNK_MAGIC: &[u8; 4] = b"HPNH";
pub const CHUNK_HEADER_LEN: usize = 12;
pub const RECORD_LEN: usize = 21;

/// One day's worth of samples for one tag.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub tag: u32,
    /// Days since the Unix epoch.
    pub day: i64,
    /// Compression algorithm that produced these samples (wire tag of
    /// [`crate::historian::Compression`]).
    pub algorithm: u8,
    pub samples: Vec<Sample>,
}

/// Store error; the historian continues on ring data when this fails.
#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Corrupt(String),
    #[cfg(feature = "sqlite")]
    Sqlite(rusqlite::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "store io: {}", e),
            StoreError::Corrupt(what) => write!(f, "store corrupt: {}", what),
            #[cfg(feature = "sqlite")]
            StoreError::Sqlite(e) => write!(f, "store sqlite: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Persistence backend. SQLite ships in-tree; a columnar store is another
/// implementation of this trait.
pub trait ChunkStore: Send {
    fn append(&mut self, chunk: &Chunk) -> StoreResult<()>;

    /// All persisted samples for `tag` in `[start, end]`, oldest first.
    fn query(&self, tag: u32, start_ns: i64, end_ns: i64) -> StoreResult<Vec<Sample>>;

    /// Drop chunks older than the retention horizon (days since epoch).
    fn evict_before(&mut self, day: i64) -> StoreResult<usize>;
}

/// Encode a chunk body (header + records, optional deflate).
pub fn encode_chunk(chunk: &Chunk, compress: bool) -> StoreResult<Vec<u8>> {
    let mut records = Vec::with_capacity(chunk.samples.len() * RECORD_LEN);
    for sample in &chunk.samples {
        records.extend_from_slice(&sample.tag.to_le_bytes());
        records.extend_from_slice(&sample.timestamp_ns.to_le_bytes());
        records.extend_from_slice(&sample.value.to_le_bytes());
        records.push(match sample.quality {
            Quality::Good => 0,
            Quality::Uncertain => 1,
            Quality::Bad => 2,
        });
    }

    let body = if compress {
        let mut encoder = DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&records)?;
        encoder.finish()?
    } else {
        records
    };

    let mut out = Vec::with_capacity(CHUNK_HEADER_LEN + body.len());
    out.extend_from_slice(CHUNK_MAGIC);
    out.push(1); // format
    out.push(u8::from(compress));
    out.push(chunk.algorithm);
    out.push(0); // reserved
    out.extend_from_slice(&(chunk.samples.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode a chunk body produced by [`encode_chunk`].
pub fn decode_chunk(tag: u32, day: i64, raw: &[u8]) -> StoreResult<Chunk> {
    if raw.len() < CHUNK_HEADER_LEN || &raw[0..4] != CHUNK_MAGIC {
        return Err(StoreError::Corrupt("bad chunk magic".into()));
    }
    let format = raw[4];
    if format != 1 {
        return Err(StoreError::Corrupt(format!("unknown chunk format {}", format)));
    }
    let compressed = raw[5] != 0;
    let algorithm = raw[6];
    let count = u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]) as usize;

    let records = if compressed {
        let mut decoder = DeflateDecoder::new(&raw[CHUNK_HEADER_LEN..]);
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        out
    } else {
        raw[CHUNK_HEADER_LEN..].to_vec()
    };

    if records.len() != count * RECORD_LEN {
        return Err(StoreError::Corrupt(format!(
            "record section {} bytes, expected {}",
            records.len(),
            count * RECORD_LEN
        )));
    }

    let mut samples = Vec::with_capacity(count);
    for record in records.chunks_exact(RECORD_LEN) {
        let tag_id = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&record[4..12]);
        let mut value = [0u8; 8];
        value.copy_from_slice(&record[12..20]);
        samples.push(Sample {
            tag: tag_id,
            timestamp_ns: i64::from_le_bytes(ts),
            value: f64::from_le_bytes(value),
            quality: match record[20] {
                0 => Quality::Good,
                1 => Quality::Uncertain,
                _ => Quality::Bad,
            },
        });
    }

    Ok(Chunk {
        tag,
        day,
        algorithm,
        samples,
    })
}

/// Day index of a timestamp (days since the Unix epoch).
pub fn day_of(timestamp_ns: i64) -> i64 {
    timestamp_ns.div_euclid(86_400 * 1_000_000_000)
}

/// In-memory store for tests and store-less deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    chunks: Vec<(u32, i64, Vec<u8>)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }
}

impl ChunkStore for MemoryStore {
    fn append(&mut self, chunk: &Chunk) -> StoreResult<()> {
        let encoded = encode_chunk(chunk, false)?;
        self.chunks.push((chunk.tag, chunk.day, encoded));
        Ok(())
    }

    fn query(&self, tag: u32, start_ns: i64, end_ns: i64) -> StoreResult<Vec<Sample>> {
        let mut out = Vec::new();
        for (chunk_tag, day, raw) in &self.chunks {
            if *chunk_tag != tag {
                continue;
            }
            let chunk = decode_chunk(*chunk_tag, *day, raw)?;
            out.extend(
                chunk
                    .samples
                    .into_iter()
                    .filter(|s| s.timestamp_ns >= start_ns && s.timestamp_ns <= end_ns),
            );
        }
        out.sort_by_key(|s| s.timestamp_ns);
        Ok(out)
    }

    fn evict_before(&mut self, day: i64) -> StoreResult<usize> {
        let before = self.chunks.len();
        self.chunks.retain(|(_, chunk_day, _)| *chunk_day >= day);
        Ok(before - self.chunks.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<Sample> {
        (0..50)
            .map(|i| Sample {
                tag: 7,
                timestamp_ns: i * 1_000_000_000,
                value: (i as f64).sin(),
                quality: if i % 10 == 0 {
                    Quality::Uncertain
                } else {
                    Quality::Good
                },
            })
            .collect()
    }

    #[test]
    fn test_chunk_roundtrip_plain() {
        let chunk = Chunk {
            tag: 7,
            day: 0,
            algorithm: 1,
            samples: samples(),
        };
        let encoded = encode_chunk(&chunk, false).expect("encode");
        assert_eq!(&encoded[0..4], CHUNK_MAGIC);
        assert_eq!(encoded.len(), CHUNK_HEADER_LEN + 50 * RECORD_LEN);
        let decoded = decode_chunk(7, 0, &encoded).expect("decode");
        assert_eq!(decoded, chunk);
    }

    #[test]
    fn test_chunk_roundtrip_compressed() {
        let chunk = Chunk {
            tag: 7,
            day: 1,
            algorithm: 2,
            samples: samples(),
        };
        let encoded = encode_chunk(&chunk, true).expect("encode");
        assert_eq!(encoded[5], 1, "compression tag set in header");
        let decoded = decode_chunk(7, 1, &encoded).expect("decode");
        assert_eq!(decoded, chunk);
    }

    #[test]
    fn test_corrupt_chunk_rejected() {
        let chunk = Chunk {
            tag: 7,
            day: 0,
            algorithm: 0,
            samples: samples(),
        };
        let mut encoded = encode_chunk(&chunk, false).expect("encode");
        encoded[0] = b'X';
        assert!(decode_chunk(7, 0, &encoded).is_err());

        let encoded = encode_chunk(&chunk, false).expect("encode");
        assert!(decode_chunk(7, 0, &encoded[..encoded.len() - 5]).is_err());
    }

    #[test]
    fn test_day_of() {
        assert_eq!(day_of(0), 0);
        assert_eq!(day_of(86_400 * 1_000_000_000 - 1), 0);
        assert_eq!(day_of(86_400 * 1_000_000_000), 1);
        assert_eq!(day_of(-1), -1);
    }

    #[test]
    fn test_memory_store_query_and_evict() {
        let mut store = MemoryStore::new();
        store
            .append(&Chunk {
                tag: 7,
                day: 0,
                algorithm: 0,
                samples: samples(),
            })
            .expect("append");
        store
            .append(&Chunk {
                tag: 8,
                day: 1,
                algorithm: 0,
                samples: vec![Sample {
                    tag: 8,
                    timestamp_ns: 100 * 1_000_000_000,
                    value: 1.0,
                    quality: Quality::Good,
                }],
            })
            .expect("append");

        let hits = store
            .query(7, 10 * 1_000_000_000, 20 * 1_000_000_000)
            .expect("query");
        assert_eq!(hits.len(), 11);
        assert!(store.query(9, 0, i64::MAX).expect("query").is_empty());

        assert_eq!(store.evict_before(1).expect("evict"), 1);
        assert!(store.query(7, 0, i64::MAX).expect("query").is_empty());
    }
}
