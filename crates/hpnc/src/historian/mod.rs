// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Historian: ring-buffered time series with compression and a pluggable
//! persistent store.
//!
//! The cyclic path only ever touches the ring (bounded, overwriting);
//! persistence runs on the alarm/historian thread. If the store is
//! unreachable the rings keep serving recent data, `HISTORIAN_PERSIST_FAIL`
//! is raised, and the oldest unflushed samples are overwritten rather than
//! blocking control.

mod compress;
mod ring;
mod store;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use compress::{Compression, Filter};
pub use ring::SampleRing;
pub use store::{day_of, Chunk, ChunkStore, MemoryStore, StoreError, StoreResult};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use crate::core::types::Sample;
use crate::diag::{DiagCode, DiagEvent, DiagHub, DiagSeverity};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Per-tag archive configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagConfig {
    pub tag: u32,
    /// Human name ("intake-rtu-01:4 pH").
    pub name: String,
    pub sample_interval_ms: u64,
    pub compression: Compression,
    pub retention_days: u32,
}

struct TagState {
    config: TagConfig,
    filter: Filter,
    ring: SampleRing,
    /// Newest accepted timestamp; enforces per-tag monotonicity and the
    /// configured sample interval.
    last_ts_ns: i64,
}

impl TagState {
    fn interval_ns(&self) -> i64 {
        self.config.sample_interval_ms as i64 * 1_000_000
    }
}

pub struct Historian {
    tags: HashMap<u32, TagState>,
    store: Option<Box<dyn ChunkStore>>,
    compress_chunks: bool,
    ring_capacity: usize,
    diag: Arc<DiagHub>,
    /// Non-monotonic samples dropped (I4).
    out_of_order_dropped: u64,
}

impl Historian {
    pub fn new(
        store: Option<Box<dyn ChunkStore>>,
        ring_capacity: usize,
        compress_chunks: bool,
        diag: Arc<DiagHub>,
    ) -> Self {
        Self {
            tags: HashMap::new(),
            store,
            compress_chunks,
            ring_capacity,
            diag,
            out_of_order_dropped: 0,
        }
    }

    pub fn add_tag(&mut self, config: TagConfig) {
        let filter = Filter::new(config.compression);
        self.tags.insert(
            config.tag,
            TagState {
                config,
                filter,
                ring: SampleRing::new(self.ring_capacity),
                last_ts_ns: i64::MIN,
            },
        );
    }

    pub fn has_tag(&self, tag: u32) -> bool {
        self.tags.contains_key(&tag)
    }

    /// Record one sample; the tag's sample interval thins the stream and
    /// compression decides what the ring retains.
    ///
    /// Samples that would run time backwards for their tag are dropped
    /// (timestamps are monotonic per tag).
    pub fn record(&mut self, sample: Sample) {
        let Some(state) = self.tags.get_mut(&sample.tag) else {
            return;
        };
        if sample.timestamp_ns < state.last_ts_ns {
            self.out_of_order_dropped += 1;
            log::debug!(
                "[Historian] dropped out-of-order sample tag={} ts={} last={}",
                sample.tag,
                sample.timestamp_ns,
                state.last_ts_ns
            );
            return;
        }
        // Cyclic data arrives far faster than any archive rate; thin to the
        // configured interval before the filter sees it.
        if state.last_ts_ns != i64::MIN
            && sample.timestamp_ns - state.last_ts_ns < state.interval_ns()
        {
            return;
        }
        state.last_ts_ns = sample.timestamp_ns;
        for kept in state.filter.offer(sample) {
            state.ring.push(kept);
        }
    }

    /// Query `[start, end]`: persisted history first, then ring samples
    /// newer than the flush watermark. Finite, materialized by the caller.
    pub fn query(&self, tag: u32, start_ns: i64, end_ns: i64) -> Vec<Sample> {
        let Some(state) = self.tags.get(&tag) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        if let Some(store) = &self.store {
            match store.query(tag, start_ns, end_ns) {
                Ok(persisted) => out.extend(persisted),
                Err(e) => {
                    log::warn!("[Historian] store query failed tag={}: {}", tag, e);
                }
            }
        }
        let ring_floor = state.ring.flushed_up_to();
        out.extend(
            state
                .ring
                .query(start_ns.max(ring_floor.saturating_add(1)), end_ns),
        );
        out
    }

    /// Flush unflushed ring samples to the store, day-grouped.
    ///
    /// Store failures raise `HISTORIAN_PERSIST_FAIL` and leave the rings
    /// serving; sample loss shows up as overwrite counts.
    pub fn flush(&mut self) {
        let Some(store) = self.store.as_mut() else {
            return;
        };
        let mut failed = false;
        let mut lost_total = 0u64;

        for state in self.tags.values_mut() {
            lost_total += state.ring.take_overwritten();
            let unflushed = state.ring.peek_unflushed();
            if unflushed.is_empty() {
                continue;
            }

            // Group by day for the append-only layout. The watermark only
            // advances past what actually landed in the store.
            let mut by_day: HashMap<i64, Vec<Sample>> = HashMap::new();
            for sample in unflushed {
                by_day.entry(day_of(sample.timestamp_ns)).or_default().push(sample);
            }
            let mut days: Vec<i64> = by_day.keys().copied().collect();
            days.sort_unstable();
            for day in days {
                let samples = by_day.remove(&day).unwrap_or_default();
                let last_ts = samples.last().map(|s| s.timestamp_ns);
                let chunk = Chunk {
                    tag: state.config.tag,
                    day,
                    algorithm: state.config.compression.as_wire(),
                    samples,
                };
                match store.append(&chunk) {
                    Ok(()) => {
                        if let Some(ts) = last_ts {
                            state.ring.mark_flushed(ts);
                        }
                    }
                    Err(e) => {
                        failed = true;
                        log::warn!(
                            "[Historian] persist failed tag={} day={}: {}",
                            state.config.tag,
                            day,
                            e
                        );
                        break;
                    }
                }
            }
        }

        if failed || lost_total > 0 {
            let severity = if failed {
                DiagSeverity::Error
            } else {
                DiagSeverity::Warning
            };
            self.diag.raise(
                DiagEvent::new(
                    DiagCode::HistorianPersistFail,
                    severity,
                    "Historian",
                    if failed {
                        "persistent store unreachable, serving from rings"
                    } else {
                        "ring overflow before flush, oldest samples lost"
                    },
                )
                .with("lost", lost_total),
            );
        }
    }

    /// Enforce retention across the store.
    pub fn evict_expired(&mut self, now_ns: i64) {
        let Some(store) = self.store.as_mut() else {
            return;
        };
        let min_retention = self
            .tags
            .values()
            .map(|s| s.config.retention_days)
            .min()
            .unwrap_or(0);
        if min_retention == 0 {
            return;
        }
        let horizon = day_of(now_ns) - i64::from(min_retention);
        match store.evict_before(horizon) {
            Ok(removed) if removed > 0 => {
                log::info!("[Historian] evicted {} expired chunks", removed);
            }
            Ok(_) => {}
            Err(e) => log::warn!("[Historian] eviction failed: {}", e),
        }
    }

    pub fn out_of_order_dropped(&self) -> u64 {
        self.out_of_order_dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Quality;

    const SEC: i64 = 1_000_000_000;

    fn sample(tag: u32, ts_ns: i64, value: f64) -> Sample {
        Sample {
            tag,
            timestamp_ns: ts_ns,
            value,
            quality: Quality::Good,
        }
    }

    fn tag_config(tag: u32, compression: Compression) -> TagConfig {
        TagConfig {
            tag,
            name: format!("tag-{}", tag),
            sample_interval_ms: 1_000,
            compression,
            retention_days: 30,
        }
    }

    fn historian(store: Option<Box<dyn ChunkStore>>) -> Historian {
        Historian::new(store, 1_024, false, Arc::new(DiagHub::new()))
    }

    #[test]
    fn test_write_then_query_returns_uncompressed_samples() {
        let mut h = historian(Some(Box::new(MemoryStore::new())));
        h.add_tag(tag_config(1, Compression::None));
        for i in 0..100 {
            h.record(sample(1, i * SEC, i as f64));
        }
        h.flush();
        let hits = h.query(1, 10 * SEC, 19 * SEC);
        assert_eq!(hits.len(), 10);
        assert_eq!(hits[0].value, 10.0);
    }

    #[test]
    fn test_query_merges_store_and_ring() {
        let mut h = historian(Some(Box::new(MemoryStore::new())));
        h.add_tag(tag_config(1, Compression::None));
        for i in 0..10 {
            h.record(sample(1, i * SEC, i as f64));
        }
        h.flush();
        // Newer samples not yet flushed live only in the ring.
        for i in 10..15 {
            h.record(sample(1, i * SEC, i as f64));
        }
        let hits = h.query(1, 0, i64::MAX);
        assert_eq!(hits.len(), 15);
        // No duplicates at the flush boundary.
        let unique: std::collections::HashSet<i64> =
            hits.iter().map(|s| s.timestamp_ns).collect();
        assert_eq!(unique.len(), 15);
    }

    #[test]
    fn test_deadband_retention_queryable() {
        let mut h = historian(Some(Box::new(MemoryStore::new())));
        h.add_tag(tag_config(2, Compression::Deadband { deadband: 0.5 }));
        h.record(sample(2, 0, 10.0));
        h.record(sample(2, SEC, 10.1)); // absorbed
        h.record(sample(2, 2 * SEC, 11.0)); // kept
        h.flush();
        let hits = h.query(2, 0, i64::MAX);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn test_monotonicity_enforced_per_tag() {
        let mut h = historian(None);
        h.add_tag(tag_config(1, Compression::None));
        h.record(sample(1, 10 * SEC, 1.0));
        h.record(sample(1, 5 * SEC, 2.0)); // time runs backwards: dropped
        h.record(sample(1, 11 * SEC, 3.0));
        assert_eq!(h.out_of_order_dropped(), 1);
        let hits = h.query(1, 0, i64::MAX);
        assert_eq!(hits.len(), 2);
        assert!(hits.windows(2).all(|w| w[0].timestamp_ns <= w[1].timestamp_ns));
    }

    #[test]
    fn test_store_failure_raises_diag_and_keeps_serving() {
        struct FailingStore;
        impl ChunkStore for FailingStore {
            fn append(&mut self, _chunk: &Chunk) -> StoreResult<()> {
                Err(StoreError::Corrupt("disk gone".into()))
            }
            fn query(&self, _tag: u32, _s: i64, _e: i64) -> StoreResult<Vec<Sample>> {
                Err(StoreError::Corrupt("disk gone".into()))
            }
            fn evict_before(&mut self, _day: i64) -> StoreResult<usize> {
                Ok(0)
            }
        }

        let diag = Arc::new(DiagHub::new());
        let events = diag.subscribe(8);
        let mut h = Historian::new(Some(Box::new(FailingStore)), 64, false, diag);
        h.add_tag(tag_config(1, Compression::None));
        for i in 0..10 {
            h.record(sample(1, i * SEC, i as f64));
        }
        h.flush();

        assert!(events
            .try_iter()
            .any(|e| e.code == DiagCode::HistorianPersistFail));
        // Ring still answers for recent data.
        assert_eq!(h.query(1, 0, i64::MAX).len(), 10);
    }

    #[test]
    fn test_unknown_tag_ignored() {
        let mut h = historian(None);
        h.record(sample(99, 0, 1.0));
        assert!(h.query(99, 0, i64::MAX).is_empty());
    }

    #[test]
    fn test_sample_interval_thins_fast_input() {
        let mut h = historian(None);
        h.add_tag(tag_config(1, Compression::None));
        // 1 ms cadence against a 1 s archive rate.
        for i in 0..3_000 {
            h.record(sample(1, i * 1_000_000, i as f64));
        }
        let kept = h.query(1, 0, i64::MAX);
        assert_eq!(kept.len(), 3, "one sample per configured second");
    }
}
