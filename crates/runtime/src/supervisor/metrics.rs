//! In-process counters and the query duration histogram backing
//! [`crate::metrics::SupervisorMetrics`] snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::metrics::HistogramSnapshot;

const BUCKET_BOUNDS_MS: [u64; 9] = [50, 100, 250, 500, 1_000, 2_000, 5_000, 10_000, 30_000];

/// Fixed-bucket histogram, cumulative like Prometheus `le` buckets.
pub struct Histogram {
    bucket_counts: Vec<AtomicU64>,
    count: AtomicU64,
    sum_ms: AtomicU64,
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            bucket_counts: BUCKET_BOUNDS_MS.iter().map(|_| AtomicU64::new(0)).collect(),
            count: AtomicU64::new(0),
            sum_ms: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value_ms: u64) {
        for (bound, counter) in BUCKET_BOUNDS_MS.iter().zip(&self.bucket_counts) {
            if value_ms <= *bound {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(value_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            bucket_bounds: BUCKET_BOUNDS_MS.to_vec(),
            bucket_counts: self
                .bucket_counts
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
            count: self.count.load(Ordering::Relaxed),
            sum_ms: self.sum_ms.load(Ordering::Relaxed),
        }
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters and histogram the supervisor updates on every admission and
/// completion; gauges (`active_queries`, `pending_queries`) are read live
/// from the supervisor itself rather than tracked here.
#[derive(Default)]
pub struct SupervisorMetricsRecorder {
    pub queries_started: AtomicU64,
    pub queries_completed: AtomicU64,
    pub queries_failed: AtomicU64,
    pub queries_start_failed: AtomicU64,
    pub query_duration_ms: Histogram,
}

impl SupervisorMetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_started(&self) {
        self.queries_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_start_failed(&self) {
        self.queries_start_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self, success: bool, duration_ms: u64) {
        self.queries_completed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.queries_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.query_duration_ms.observe(duration_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histogram_buckets_are_cumulative() {
        let hist = Histogram::new();
        hist.observe(10);
        hist.observe(420);
        hist.observe(9_000);

        let snap = hist.snapshot();
        assert_eq!(snap.count, 3);
        assert_eq!(snap.sum_ms, 9_430);
        // 10 falls in every bucket from 50 upward.
        assert_eq!(snap.bucket_counts[0], 1);
        // 420 falls in every bucket from 500 upward.
        assert_eq!(snap.bucket_counts[3], 2);
        // 9000 falls only in the 10_000 and 30_000 buckets.
        assert_eq!(snap.bucket_counts[7], 3);
        assert_eq!(snap.bucket_counts[2], 1);
    }

    #[test]
    fn recorder_tracks_failures_within_completions() {
        let recorder = SupervisorMetricsRecorder::new();
        recorder.record_started();
        recorder.record_completed(false, 100);
        assert_eq!(recorder.queries_completed.load(Ordering::Relaxed), 1);
        assert_eq!(recorder.queries_failed.load(Ordering::Relaxed), 1);
    }
}
