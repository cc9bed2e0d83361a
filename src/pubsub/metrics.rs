//! Subscriber counters.
//!
//! Batch sizes are tracked as a running total (`batched_ids` over
//! `batches_submitted`, reported as the average) plus the largest batch seen.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every task of one subscriber
#[derive(Debug, Default)]
pub struct SubscriberMetrics {
    /// Messages returned by pull calls
    pub messages_pulled: AtomicU64,
    /// Pull calls that failed
    pub pull_errors: AtomicU64,
    /// Messages skipped because their ack deadline had already passed
    pub messages_failfast: AtomicU64,
    /// Handler invocations that returned an error
    pub handler_errors: AtomicU64,
    /// Ack ids submitted in successful acknowledge calls
    pub messages_acked: AtomicU64,
    /// Ack ids submitted in successful nack calls
    pub messages_nacked: AtomicU64,
    pub ack_batch_failures: AtomicU64,
    pub nack_batch_failures: AtomicU64,
    /// Ids discarded because a batch exceeded the size cap
    pub dropped_ids: AtomicU64,
    /// Batches submitted, successful or not
    pub batches_submitted: AtomicU64,
    /// Sum of submitted batch sizes
    pub batched_ids: AtomicU64,
    /// Size of the largest batch submitted so far
    pub largest_batch: AtomicU64,
}

/// Point-in-time copy of [`SubscriberMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_pulled: u64,
    pub pull_errors: u64,
    pub messages_failfast: u64,
    pub handler_errors: u64,
    pub messages_acked: u64,
    pub messages_nacked: u64,
    pub ack_batch_failures: u64,
    pub nack_batch_failures: u64,
    pub dropped_ids: u64,
    pub batches_submitted: u64,
    pub batched_ids: u64,
    pub largest_batch: u64,
}

impl SubscriberMetrics {
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        Self::add(counter, 1);
    }

    /// Count one submitted batch of `size` ids
    pub(crate) fn record_batch(&self, size: u64) {
        Self::incr(&self.batches_submitted);
        Self::add(&self.batched_ids, size);
        self.largest_batch.fetch_max(size, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_pulled: self.messages_pulled.load(Ordering::Relaxed),
            pull_errors: self.pull_errors.load(Ordering::Relaxed),
            messages_failfast: self.messages_failfast.load(Ordering::Relaxed),
            handler_errors: self.handler_errors.load(Ordering::Relaxed),
            messages_acked: self.messages_acked.load(Ordering::Relaxed),
            messages_nacked: self.messages_nacked.load(Ordering::Relaxed),
            ack_batch_failures: self.ack_batch_failures.load(Ordering::Relaxed),
            nack_batch_failures: self.nack_batch_failures.load(Ordering::Relaxed),
            dropped_ids: self.dropped_ids.load(Ordering::Relaxed),
            batches_submitted: self.batches_submitted.load(Ordering::Relaxed),
            batched_ids: self.batched_ids.load(Ordering::Relaxed),
            largest_batch: self.largest_batch.load(Ordering::Relaxed),
        }
    }

    /// Get a formatted summary of metrics
    pub fn summary(&self) -> String {
        let s = self.snapshot();
        let avg_batch = if s.batches_submitted == 0 {
            0.0
        } else {
            s.batched_ids as f64 / s.batches_submitted as f64
        };

        format!(
            "Messages - Pulled: {}, Acked: {}, Nacked: {}, FailFast: {}, HandlerErrors: {}, \
             Batches: {} (avg {:.1} ids, max {}), BatchFailures: {}/{}, Dropped: {}",
            s.messages_pulled,
            s.messages_acked,
            s.messages_nacked,
            s.messages_failfast,
            s.handler_errors,
            s.batches_submitted,
            avg_batch,
            s.largest_batch,
            s.ack_batch_failures,
            s.nack_batch_failures,
            s.dropped_ids
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_and_summary() {
        let metrics = SubscriberMetrics::default();
        SubscriberMetrics::add(&metrics.messages_pulled, 5);
        metrics.record_batch(4);
        metrics.record_batch(6);
        metrics.record_batch(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_pulled, 5);
        assert_eq!(snapshot.batches_submitted, 3);
        assert_eq!(snapshot.batched_ids, 12);
        assert_eq!(snapshot.largest_batch, 6);
        assert!(metrics.summary().contains("Pulled: 5"));
        assert!(metrics.summary().contains("avg 4.0 ids, max 6"));
    }
}
