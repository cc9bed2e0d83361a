//! Background loops that turn queued ack ids into batched API calls.
//!
//! A batcher blocks for the first id, then keeps draining its queue until the
//! batching window closes. Batches above [`ACK_IDS_MAX_BATCH_SIZE`] lose their
//! oldest ids. Submission is best effort: a failed call is logged and counted,
//! and its ids are not retried; Pub/Sub redelivers them once their deadline
//! passes. Cancellation discards whatever was collected so far.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::PullBackend;
use super::error::SubscriberError;
use super::metrics::SubscriberMetrics;
use super::queue::JoinQueue;

/// Largest number of ack ids Pub/Sub accepts in one call
pub const ACK_IDS_MAX_BATCH_SIZE: usize = 2500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    /// `acknowledge`
    Ack,
    /// `modifyAckDeadline` to zero, for immediate redelivery
    Nack,
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BatchKind::Ack => "acker",
            BatchKind::Nack => "nacker",
        })
    }
}

pub struct Batcher {
    kind: BatchKind,
    subscription: String,
    backend: Arc<dyn PullBackend>,
    queue: Arc<JoinQueue<String>>,
    window: Duration,
    metrics: Arc<SubscriberMetrics>,
}

impl Batcher {
    pub fn new(
        kind: BatchKind,
        subscription: impl Into<String>,
        backend: Arc<dyn PullBackend>,
        queue: Arc<JoinQueue<String>>,
        window: Duration,
        metrics: Arc<SubscriberMetrics>,
    ) -> Self {
        Self {
            kind,
            subscription: subscription.into(),
            backend,
            queue,
            window,
            metrics,
        }
    }

    /// Run until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), SubscriberError> {
        info!(kind = %self.kind, subscription = %self.subscription, "Batcher started");

        loop {
            let first = tokio::select! {
                _ = cancel.cancelled() => break,
                id = self.queue.get() => id,
            };

            let mut ack_ids = vec![first];
            let window_end = Instant::now() + self.window;
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(kind = %self.kind, pending = ack_ids.len(), "Discarding unsubmitted batch");
                        info!(kind = %self.kind, "Batcher stopped");
                        return Ok(());
                    }
                    _ = sleep_until(window_end) => break,
                    id = self.queue.get() => ack_ids.push(id),
                }
            }

            self.submit(ack_ids).await;
        }

        info!(kind = %self.kind, "Batcher stopped");
        Ok(())
    }

    async fn submit(&self, mut ack_ids: Vec<String>) {
        let taken = ack_ids.len();

        if ack_ids.len() > ACK_IDS_MAX_BATCH_SIZE {
            let excess = ack_ids.len() - ACK_IDS_MAX_BATCH_SIZE;
            ack_ids.drain(..excess);
            SubscriberMetrics::add(&self.metrics.dropped_ids, excess as u64);
            warn!(
                kind = %self.kind,
                dropped = excess,
                "Batch exceeded {} ids, dropped the oldest",
                ACK_IDS_MAX_BATCH_SIZE
            );
        }

        let result = match self.kind {
            BatchKind::Ack => self.backend.acknowledge(&self.subscription, &ack_ids).await,
            BatchKind::Nack => {
                self.backend
                    .modify_ack_deadline(&self.subscription, &ack_ids, 0)
                    .await
            }
        };

        self.metrics.record_batch(ack_ids.len() as u64);

        match result {
            Ok(()) => {
                let counter = match self.kind {
                    BatchKind::Ack => &self.metrics.messages_acked,
                    BatchKind::Nack => &self.metrics.messages_nacked,
                };
                SubscriberMetrics::add(counter, ack_ids.len() as u64);
                debug!(kind = %self.kind, count = ack_ids.len(), "Submitted batch");
            }
            Err(e) => {
                let counter = match self.kind {
                    BatchKind::Ack => &self.metrics.ack_batch_failures,
                    BatchKind::Nack => &self.metrics.nack_batch_failures,
                };
                SubscriberMetrics::incr(counter);
                warn!(kind = %self.kind, count = ack_ids.len(), error = %e, "Batch submission failed");
            }
        }

        self.queue.tasks_done(taken);
    }
}
