// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Command authority generations.
//!
//! Every command carries the generation it was issued under. A failover
//! bumps the target's generation; commands still in flight with the old
//! generation are rejected -- except inside a short grace window after the
//! bump, which absorbs clock skew between the issuing layer and the core.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Outcome of an authority check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityVerdict {
    Accepted,
    /// Previous generation inside the grace window.
    AcceptedInGrace,
    Stale,
}

struct TargetAuthority {
    generation: u64,
    bumped_at: Instant,
}

/// Per-target authority generations.
pub struct AuthorityTable {
    targets: RwLock<HashMap<String, TargetAuthority>>,
    grace: Duration,
}

impl AuthorityTable {
    pub fn new(grace: Duration) -> Self {
        Self {
            targets: RwLock::new(HashMap::new()),
            grace,
        }
    }

    /// Current generation for a target (targets start at generation 1).
    pub fn current(&self, target: &str) -> u64 {
        self.targets.read().get(target).map(|t| t.generation).unwrap_or(1)
    }

    /// Increment the target's generation (failover handoff). Returns the
    /// new generation.
    pub fn bump(&self, target: &str) -> u64 {
        let mut targets = self.targets.write();
        let entry = targets.entry(target.to_string()).or_insert(TargetAuthority {
            generation: 1,
            bumped_at: Instant::now(),
        });
        entry.generation += 1;
        entry.bumped_at = Instant::now();
        log::info!(
            "[Authority] target={} generation={} (handoff)",
            target,
            entry.generation
        );
        entry.generation
    }

    /// Validate a command's generation against the target's current one.
    pub fn validate(&self, target: &str, generation: u64) -> AuthorityVerdict {
        let targets = self.targets.read();
        let Some(entry) = targets.get(target) else {
            // Never bumped: only the initial generation is valid.
            return if generation == 1 {
                AuthorityVerdict::Accepted
            } else {
                AuthorityVerdict::Stale
            };
        };
        if generation == entry.generation {
            return AuthorityVerdict::Accepted;
        }
        if generation + 1 == entry.generation && entry.bumped_at.elapsed() <= self.grace {
            return AuthorityVerdict::AcceptedInGrace;
        }
        AuthorityVerdict::Stale
    }
}
