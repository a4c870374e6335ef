// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SQLite chunk store (WAL mode).
//!
//! Schema: one row per chunk, BLOB payload in the wire format of
//! [`super::store`]. Day grouping makes retention eviction a range delete.

use super::store::{decode_chunk, encode_chunk, Chunk, ChunkStore, StoreResult};
use crate::core::types::Sample;
use rusqlite::{params, Connection};
use std::path::Path;

pub struct SqliteStore {
    conn: Connection,
    compress: bool,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>, compress: bool) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY,
                tag INTEGER NOT NULL,
                day INTEGER NOT NULL,
                first_ts INTEGER NOT NULL,
                last_ts INTEGER NOT NULL,
                data BLOB NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_chunks_tag_time ON chunks(tag, first_ts, last_ts)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_chunks_day ON chunks(day)",
            [],
        )?;
        Ok(Self { conn, compress })
    }
}

impl ChunkStore for SqliteStore {
    fn append(&mut self, chunk: &Chunk) -> StoreResult<()> {
        if chunk.samples.is_empty() {
            return Ok(());
        }
        let encoded = encode_chunk(chunk, self.compress)?;
        let first_ts = chunk.samples.first().map(|s| s.timestamp_ns).unwrap_or(0);
        let last_ts = chunk.samples.last().map(|s| s.timestamp_ns).unwrap_or(0);
        self.conn.execute(
            "INSERT INTO chunks (tag, day, first_ts, last_ts, data) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![chunk.tag, chunk.day, first_ts, last_ts, encoded],
        )?;
        Ok(())
    }

    fn query(&self, tag: u32, start_ns: i64, end_ns: i64) -> StoreResult<Vec<Sample>> {
        let mut stmt = self.conn.prepare(
            "SELECT day, data FROM chunks
             WHERE tag = ?1 AND last_ts >= ?2 AND first_ts <= ?3
             ORDER BY first_ts",
        )?;
        let rows = stmt.query_map(params![tag, start_ns, end_ns], |row| {
            let day: i64 = row.get(0)?;
            let data: Vec<u8> = row.get(1)?;
            Ok((day, data))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (day, data) = row?;
            let chunk = decode_chunk(tag, day, &data)?;
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
        let removed = self
            .conn
            .execute("DELETE FROM chunks WHERE day < ?1", params![day])?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Quality;

    fn samples(base_ns: i64, count: usize) -> Vec<Sample> {
        (0..count)
            .map(|i| Sample {
                tag: 3,
                timestamp_ns: base_ns + i as i64 * 1_000_000_000,
                value: i as f64 * 0.5,
                quality: Quality::Good,
            })
            .collect()
    }

    #[test]
    fn test_sqlite_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store =
            SqliteStore::open(dir.path().join("historian.db"), false).expect("open store");

        store
            .append(&Chunk {
                tag: 3,
                day: 0,
                algorithm: 1,
                samples: samples(0, 100),
            })
            .expect("append");

        let hits = store
            .query(3, 10 * 1_000_000_000, 19 * 1_000_000_000)
            .expect("query");
        assert_eq!(hits.len(), 10);
        assert_eq!(hits[0].value, 5.0);
        assert!(store.query(4, 0, i64::MAX).expect("query").is_empty());
    }

    #[test]
    fn test_sqlite_compressed_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store =
            SqliteStore::open(dir.path().join("historian.db"), true).expect("open store");
        store
            .append(&Chunk {
                tag: 3,
                day: 2,
                algorithm: 2,
                samples: samples(2 * 86_400 * 1_000_000_000, 500),
            })
            .expect("append");
        let hits = store.query(3, 0, i64::MAX).expect("query");
        assert_eq!(hits.len(), 500);
    }

    #[test]
    fn test_sqlite_retention_eviction() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store =
            SqliteStore::open(dir.path().join("historian.db"), false).expect("open store");
        for day in 0..5i64 {
            store
                .append(&Chunk {
                    tag: 3,
                    day,
                    algorithm: 0,
                    samples: samples(day * 86_400 * 1_000_000_000, 10),
                })
                .expect("append");
        }
        assert_eq!(store.evict_before(3).expect("evict"), 3);
        let remaining = store.query(3, 0, i64::MAX).expect("query");
        assert_eq!(remaining.len(), 20);
    }

    #[test]
    fn test_reopen_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("historian.db");
        {
            let mut store = SqliteStore::open(&path, false).expect("open store");
            store
                .append(&Chunk {
                    tag: 3,
                    day: 0,
                    algorithm: 0,
                    samples: samples(0, 10),
                })
                .expect("append");
        }
        let store = SqliteStore::open(&path, false).expect("reopen store");
        assert_eq!(store.query(3, 0, i64::MAX).expect("query").len(), 10);
    }
}
