//! Rolling statistics window
//!
//! The window is a ring of `rolling_window_buckets` counters, each covering
//! `rolling_window / rolling_window_buckets` of time. A slot is tagged with the
//! epoch (bucket number since the window's anchor) it was last written in.
//!
//! ```text
//!   epoch:   7       8       9       10      11
//!        ||_______|_______|_______|_______|_______||
//!   slot:    2       3       4       0       1        (epoch % 5)
//!                                                ^ now
//! ```
//!
//! Writing into a slot whose epoch differs from the current one clears it
//! first, and reads skip slots older than the window, so stale counts are
//! never observed. No background timer is needed.

use crate::OutcomeKind;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    epoch: Option<u64>,
    successes: u64,
    failures: u64,
    timeouts: u64,
}

impl Bucket {
    fn reset(&mut self, epoch: u64) {
        *self = Bucket {
            epoch: Some(epoch),
            ..Bucket::default()
        };
    }
}

/// Aggregated counts over the live part of the window
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WindowSnapshot {
    pub volume: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    /// (failures + timeouts) / volume * 100, or 0 when volume is 0
    pub error_percentage: f64,
}

impl WindowSnapshot {
    pub fn errors(&self) -> u64 {
        self.failures + self.timeouts
    }
}

/// Bucketed sliding window of call outcomes
///
/// Not synchronized on its own; the state machine owns it and the breaker
/// guards both with one lock.
#[derive(Debug, Clone)]
pub struct StatsWindow {
    buckets: Vec<Bucket>,
    bucket_nanos: u128,
    anchor: Instant,
}

impl StatsWindow {
    /// Create a window anchored at the current instant
    ///
    /// `bucket_count` must be at least 1 and `window` must hold at least one
    /// nanosecond per bucket (guaranteed by `BreakerConfig::validate`).
    pub fn new(window: Duration, bucket_count: u32) -> Self {
        Self::anchored(window, bucket_count, Instant::now())
    }

    /// Create a window whose epochs are counted from `anchor`
    pub fn anchored(window: Duration, bucket_count: u32, anchor: Instant) -> Self {
        let count = bucket_count.max(1);
        let bucket_nanos = (window.as_nanos() / u128::from(count)).max(1);
        Self {
            buckets: vec![Bucket::default(); count as usize],
            bucket_nanos,
            anchor,
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn epoch_of(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.anchor).as_nanos();
        (elapsed / self.bucket_nanos) as u64
    }

    /// Count one outcome in the bucket covering `now`
    pub fn record(&mut self, kind: OutcomeKind, now: Instant) {
        let epoch = self.epoch_of(now);
        let idx = (epoch % self.buckets.len() as u64) as usize;
        let bucket = &mut self.buckets[idx];

        // A late write never clears a newer slot; it is counted there instead
        if bucket.epoch.is_none_or(|current| current < epoch) {
            bucket.reset(epoch);
        }

        match kind {
            OutcomeKind::Success => bucket.successes += 1,
            OutcomeKind::Failure => bucket.failures += 1,
            OutcomeKind::Timeout => bucket.timeouts += 1,
        }
    }

    /// Sum every bucket whose epoch lies within the window ending at `now`
    pub fn snapshot(&self, now: Instant) -> WindowSnapshot {
        let current = self.epoch_of(now);
        let span = self.buckets.len() as u64;

        let mut snap = WindowSnapshot::default();
        for bucket in &self.buckets {
            let Some(epoch) = bucket.epoch else {
                continue;
            };
            // Buckets "from the future" only appear if a caller passes an
            // instant older than an earlier write; they are not counted.
            if epoch > current || current - epoch >= span {
                continue;
            }
            snap.successes += bucket.successes;
            snap.failures += bucket.failures;
            snap.timeouts += bucket.timeouts;
        }

        snap.volume = snap.successes + snap.failures + snap.timeouts;
        snap.error_percentage = if snap.volume == 0 {
            0.0
        } else {
            snap.errors() as f64 / snap.volume as f64 * 100.0
        };
        snap
    }

    /// Zero every bucket immediately
    pub fn reset(&mut self) {
        self.buckets.fill(Bucket::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window_at(anchor: Instant) -> StatsWindow {
        StatsWindow::anchored(Duration::from_secs(10), 10, anchor)
    }

    #[test]
    fn test_empty_window_has_zero_error_percentage() {
        let anchor = Instant::now();
        let window = window_at(anchor);

        let snap = window.snapshot(anchor);
        assert_eq!(snap.volume, 0);
        assert_eq!(snap.error_percentage, 0.0);
    }

    #[test]
    fn test_record_and_snapshot() {
        let anchor = Instant::now();
        let mut window = window_at(anchor);

        window.record(OutcomeKind::Success, anchor);
        window.record(OutcomeKind::Failure, anchor + Duration::from_millis(500));
        window.record(OutcomeKind::Failure, anchor + Duration::from_secs(2));
        window.record(OutcomeKind::Timeout, anchor + Duration::from_secs(3));

        let snap = window.snapshot(anchor + Duration::from_secs(3));
        assert_eq!(snap.volume, 4);
        assert_eq!(snap.successes, 1);
        assert_eq!(snap.failures, 2);
        assert_eq!(snap.timeouts, 1);
        assert_eq!(snap.errors(), 3);
        assert_eq!(snap.error_percentage, 75.0);
    }

    #[test]
    fn test_snapshot_is_idempotent() {
        let anchor = Instant::now();
        let mut window = window_at(anchor);
        window.record(OutcomeKind::Failure, anchor);
        window.record(OutcomeKind::Success, anchor);

        let now = anchor + Duration::from_secs(1);
        assert_eq!(window.snapshot(now), window.snapshot(now));
    }

    #[test]
    fn test_old_buckets_fall_out_of_window() {
        let anchor = Instant::now();
        let mut window = window_at(anchor);

        window.record(OutcomeKind::Failure, anchor);
        window.record(OutcomeKind::Success, anchor + Duration::from_secs(5));

        // Epoch 0 is still inside a window ending in epoch 9
        let snap = window.snapshot(anchor + Duration::from_millis(9_999));
        assert_eq!(snap.volume, 2);

        // At epoch 10 the first bucket has aged out
        let snap = window.snapshot(anchor + Duration::from_secs(10));
        assert_eq!(snap.volume, 1);
        assert_eq!(snap.failures, 0);

        let snap = window.snapshot(anchor + Duration::from_secs(60));
        assert_eq!(snap.volume, 0);
    }

    #[test]
    fn test_reused_slot_is_cleared_before_write() {
        let anchor = Instant::now();
        let mut window = window_at(anchor);

        for _ in 0..5 {
            window.record(OutcomeKind::Failure, anchor + Duration::from_millis(100));
        }

        // Same slot (epoch 10 % 10 == 0), one full rotation later
        window.record(OutcomeKind::Success, anchor + Duration::from_secs(10));

        let snap = window.snapshot(anchor + Duration::from_secs(10));
        assert_eq!(snap.volume, 1);
        assert_eq!(snap.successes, 1);
        assert_eq!(snap.error_percentage, 0.0);
    }

    #[test]
    fn test_late_write_keeps_newer_slot() {
        let anchor = Instant::now();
        let mut window = StatsWindow::anchored(Duration::from_secs(1), 1, anchor);

        window.record(OutcomeKind::Success, anchor + Duration::from_millis(1_000));
        window.record(OutcomeKind::Failure, anchor + Duration::from_millis(999));

        let snap = window.snapshot(anchor + Duration::from_millis(1_000));
        assert_eq!(snap.volume, 2);
        assert_eq!(snap.successes, 1);
        assert_eq!(snap.failures, 1);
    }

    #[test]
    fn test_late_write_across_slots_keeps_both() {
        let anchor = Instant::now();
        let mut window = window_at(anchor);

        window.record(OutcomeKind::Failure, anchor + Duration::from_millis(2_000));
        window.record(OutcomeKind::Success, anchor + Duration::from_millis(1_999));

        let snap = window.snapshot(anchor + Duration::from_secs(2));
        assert_eq!(snap.volume, 2);
        assert_eq!(snap.error_percentage, 50.0);
    }

    #[test]
    fn test_reset_clears_everything() {
        let anchor = Instant::now();
        let mut window = window_at(anchor);
        window.record(OutcomeKind::Failure, anchor);
        window.record(OutcomeKind::Timeout, anchor);

        window.reset();

        assert_eq!(window.snapshot(anchor).volume, 0);
    }

    #[test]
    fn test_single_bucket_window() {
        let anchor = Instant::now();
        let mut window = StatsWindow::anchored(Duration::from_secs(1), 1, anchor);

        window.record(OutcomeKind::Failure, anchor + Duration::from_millis(200));
        assert_eq!(
            window.snapshot(anchor + Duration::from_millis(900)).volume,
            1
        );
        assert_eq!(window.snapshot(anchor + Duration::from_secs(1)).volume, 0);
    }

    #[test]
    fn test_instant_before_anchor_maps_to_first_epoch() {
        let anchor = Instant::now() + Duration::from_secs(5);
        let mut window = window_at(anchor);

        window.record(OutcomeKind::Failure, anchor - Duration::from_secs(1));
        assert_eq!(window.snapshot(anchor).failures, 1);
    }
}
