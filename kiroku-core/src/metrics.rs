//! # Metrics and Monitoring
//!
//! Lightweight metrics collection for the indexer. Counters are atomic and
//! the handle is cheap to clone, so producers, the ingest worker, and
//! observers can all share one collector.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Default)]
struct MetricsInner {
    // Ingest metrics
    events_submitted: AtomicU64,
    events_dropped: AtomicU64,
    deletes_submitted: AtomicU64,
    codec_errors: AtomicU64,

    // Shard metrics
    batches_flushed: AtomicU64,
    shards_rotated: AtomicU64,

    // Query metrics
    queries_executed: AtomicU64,
    query_errors: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted insert submission
    pub fn record_submit(&self) {
        self.inner.events_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a submission dropped under backpressure
    pub fn record_drop(&self) {
        self.inner.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an accepted delete submission
    pub fn record_delete(&self) {
        self.inner.deletes_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a payload the codec refused
    pub fn record_codec_error(&self) {
        self.inner.codec_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a committed batch
    pub fn record_flush(&self) {
        self.inner.batches_flushed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a shard rotation
    pub fn record_rotation(&self) {
        self.inner.shards_rotated.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a query execution
    pub fn record_query(&self) {
        self.inner.queries_executed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a query error
    pub fn record_query_error(&self) {
        self.inner.query_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_submitted: self.inner.events_submitted.load(Ordering::Relaxed),
            events_dropped: self.inner.events_dropped.load(Ordering::Relaxed),
            deletes_submitted: self.inner.deletes_submitted.load(Ordering::Relaxed),
            codec_errors: self.inner.codec_errors.load(Ordering::Relaxed),
            batches_flushed: self.inner.batches_flushed.load(Ordering::Relaxed),
            shards_rotated: self.inner.shards_rotated.load(Ordering::Relaxed),
            queries_executed: self.inner.queries_executed.load(Ordering::Relaxed),
            query_errors: self.inner.query_errors.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub events_submitted: u64,
    pub events_dropped: u64,
    pub deletes_submitted: u64,
    pub codec_errors: u64,
    pub batches_flushed: u64,
    pub shards_rotated: u64,
    pub queries_executed: u64,
    pub query_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_across_clones() {
        let metrics = Metrics::new();
        let clone = metrics.clone();

        metrics.record_submit();
        clone.record_submit();
        clone.record_drop();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.events_submitted, 2);
        assert_eq!(snapshot.events_dropped, 1);
        assert_eq!(snapshot.batches_flushed, 0);
    }
}
