// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Time-series compression: deadband, swinging-door, boxcar.
//!
//! Each filter answers one question per incoming sample: which sample, if
//! any, must be retained so the archive can reproduce the trend within the
//! configured tolerance.

use crate::core::types::Sample;
use serde::{Deserialize, Serialize};

/// Per-tag compression selection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Compression {
    /// Keep everything.
    None,
    /// Keep samples that moved more than the deadband from the last kept.
    Deadband { deadband: f64 },
    /// Trend-preserving swinging-door with the given deviation.
    SwingingDoor { deviation: f64 },
    /// Deadband plus a maximum interval between kept samples.
    Boxcar { deadband: f64, max_interval_ms: u64 },
}

impl Compression {
    pub fn as_wire(&self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Deadband { .. } => 1,
            Compression::SwingingDoor { .. } => 2,
            Compression::Boxcar { .. } => 3,
        }
    }
}

/// Runtime state of one tag's filter.
#[derive(Debug)]
pub enum Filter {
    None,
    Deadband {
        deadband: f64,
        last_kept: Option<f64>,
    },
    SwingingDoor(SdtState),
    Boxcar {
        deadband: f64,
        max_interval_ns: i64,
        last_kept: Option<Sample>,
    },
}

impl Filter {
    pub fn new(compression: Compression) -> Self {
        match compression {
            Compression::None => Filter::None,
            Compression::Deadband { deadband } => Filter::Deadband {
                deadband,
                last_kept: None,
            },
            Compression::SwingingDoor { deviation } => Filter::SwingingDoor(SdtState::new(deviation)),
            Compression::Boxcar {
                deadband,
                max_interval_ms,
            } => Filter::Boxcar {
                deadband,
                max_interval_ns: max_interval_ms as i64 * 1_000_000,
                last_kept: None,
            },
        }
    }

    /// Feed one sample; returns the samples to retain (0, 1 or 2 -- the
    /// swinging door emits the held pivot plus possibly the current).
    pub fn offer(&mut self, sample: Sample) -> Vec<Sample> {
        match self {
            Filter::None => vec![sample],
            Filter::Deadband {
                deadband,
                last_kept,
            } => match last_kept {
                Some(last) if (sample.value - *last).abs() <= *deadband => Vec::new(),
                _ => {
                    *last_kept = Some(sample.value);
                    vec![sample]
                }
            },
            Filter::SwingingDoor(state) => state.offer(sample),
            Filter::Boxcar {
                deadband,
                max_interval_ns,
                last_kept,
            } => match last_kept {
                Some(last)
                    if (sample.value - last.value).abs() <= *deadband
                        && sample.timestamp_ns - last.timestamp_ns < *max_interval_ns =>
                {
                    Vec::new()
                }
                _ => {
                    *last_kept = Some(sample);
                    vec![sample]
                }
            },
        }
    }

    /// Flush any held sample (shutdown or tag retirement).
    pub fn finish(&mut self) -> Option<Sample> {
        match self {
            Filter::SwingingDoor(state) => state.finish(),
            _ => None,
        }
    }
}

/// Swinging-door trend compression (SDT).
///
/// A kept sample opens a "door": the envelope of slopes from the kept
/// sample through (candidate ± deviation). Each new sample narrows the
/// envelope; when it closes (max < min), the previously seen sample is
/// retained and a new door opens from it.
#[derive(Debug)]
pub struct SdtState {
    deviation: f64,
    kept: Option<Sample>,
    held: Option<Sample>,
    slope_max: f64,
    slope_min: f64,
}

impl SdtState {
    fn new(deviation: f64) -> Self {
        Self {
            deviation,
            kept: None,
            held: None,
            slope_max: f64::INFINITY,
            slope_min: f64::NEG_INFINITY,
        }
    }

    fn offer(&mut self, sample: Sample) -> Vec<Sample> {
        let Some(kept) = self.kept else {
            // First sample is always retained and opens the first door.
            self.kept = Some(sample);
            self.slope_max = f64::INFINITY;
            self.slope_min = f64::NEG_INFINITY;
            return vec![sample];
        };

        let dt = (sample.timestamp_ns - kept.timestamp_ns) as f64 / 1e9;
        if dt <= 0.0 {
            // Out-of-order or duplicate timestamp: retain defensively.
            return vec![sample];
        }
        let upper = (sample.value + self.deviation - kept.value) / dt;
        let lower = (sample.value - self.deviation - kept.value) / dt;
        let new_max = self.slope_max.min(upper);
        let new_min = self.slope_min.max(lower);

        if new_max < new_min {
            // Door closed: the held sample becomes a pivot, the current
            // sample opens the next door.
            let pivot = self.held.unwrap_or(sample);
            self.kept = Some(pivot);
            self.held = Some(sample);
            // Envelope from the new pivot through the current sample.
            let dt = (sample.timestamp_ns - pivot.timestamp_ns) as f64 / 1e9;
            if dt > 0.0 {
                self.slope_max = (sample.value + self.deviation - pivot.value) / dt;
                self.slope_min = (sample.value - self.deviation - pivot.value) / dt;
            } else {
                self.slope_max = f64::INFINITY;
                self.slope_min = f64::NEG_INFINITY;
            }
            vec![pivot]
        } else {
            self.slope_max = new_max;
            self.slope_min = new_min;
            self.held = Some(sample);
            Vec::new()
        }
    }

    fn finish(&mut self) -> Option<Sample> {
        self.held.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Quality;

    fn sample(ts_ms: i64, value: f64) -> Sample {
        Sample {
            tag: 1,
            timestamp_ns: ts_ms * 1_000_000,
            value,
            quality: Quality::Good,
        }
    }

    #[test]
    fn test_none_keeps_everything() {
        let mut f = Filter::new(Compression::None);
        assert_eq!(f.offer(sample(0, 1.0)).len(), 1);
        assert_eq!(f.offer(sample(1, 1.0)).len(), 1);
    }

    #[test]
    fn test_deadband_drops_small_moves() {
        let mut f = Filter::new(Compression::Deadband { deadband: 0.5 });
        assert_eq!(f.offer(sample(0, 10.0)).len(), 1);
        assert!(f.offer(sample(1, 10.3)).is_empty());
        assert!(f.offer(sample(2, 9.6)).is_empty());
        assert_eq!(f.offer(sample(3, 10.6)).len(), 1);
        // Reference moves with the kept sample.
        assert!(f.offer(sample(4, 10.7)).is_empty());
    }

    #[test]
    fn test_boxcar_time_limit_forces_keep() {
        let mut f = Filter::new(Compression::Boxcar {
            deadband: 1.0,
            max_interval_ms: 100,
        });
        assert_eq!(f.offer(sample(0, 5.0)).len(), 1);
        assert!(f.offer(sample(50, 5.1)).is_empty());
        // Unchanged value but the interval elapsed.
        assert_eq!(f.offer(sample(150, 5.1)).len(), 1);
    }

    #[test]
    fn test_sdt_keeps_line_endpoints_only() {
        // A perfect straight line: only the first sample is kept until the
        // trend breaks.
        let mut f = Filter::new(Compression::SwingingDoor { deviation: 0.5 });
        let kept: usize = (0..10)
            .map(|i| f.offer(sample(i * 100, i as f64)).len())
            .sum();
        assert_eq!(kept, 1, "a straight line keeps its opening sample only");

        // Sharp direction change closes the door.
        let kept_on_break = f.offer(sample(1_000, 0.0));
        assert!(!kept_on_break.is_empty(), "trend break must retain a pivot");
    }

    #[test]
    fn test_sdt_respects_deviation_band() {
        // Small wiggles inside the deviation stay compressed.
        let mut f = Filter::new(Compression::SwingingDoor { deviation: 1.0 });
        f.offer(sample(0, 10.0));
        let mut kept = 0;
        for i in 1..20 {
            let wiggle = if i % 2 == 0 { 0.2 } else { -0.2 };
            kept += f.offer(sample(i * 100, 10.0 + wiggle)).len();
        }
        assert_eq!(kept, 0, "wiggles inside the band are absorbed");
    }

    #[test]
    fn test_sdt_finish_flushes_held() {
        let mut f = Filter::new(Compression::SwingingDoor { deviation: 0.5 });
        f.offer(sample(0, 0.0));
        f.offer(sample(100, 1.0));
        assert!(f.finish().is_some());
    }
}
