use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::client::PullBackend;
use super::consumer::PulledMessage;
use super::error::SubscriberError;
use super::metrics::SubscriberMetrics;
use super::queue::JoinQueue;
use crate::core::backoff::Backoff;

/// Pulls messages into one consumer's queue.
///
/// The next pull is only issued once the consumer has taken everything from
/// the previous one, so at most `max_messages` pulled messages wait per pair.
pub struct Producer {
    pub(crate) id: usize,
    pub(crate) subscription: String,
    pub(crate) backend: Arc<dyn PullBackend>,
    pub(crate) queue: Arc<JoinQueue<PulledMessage>>,
    pub(crate) max_messages: usize,
    pub(crate) pull_timeout: Duration,
    pub(crate) metrics: Arc<SubscriberMetrics>,
}

impl Producer {
    pub fn new(
        id: usize,
        subscription: impl Into<String>,
        backend: Arc<dyn PullBackend>,
        queue: Arc<JoinQueue<PulledMessage>>,
        max_messages: usize,
        pull_timeout: Duration,
        metrics: Arc<SubscriberMetrics>,
    ) -> Self {
        Self {
            id,
            subscription: subscription.into(),
            backend,
            queue,
            max_messages,
            pull_timeout,
            metrics,
        }
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<(), SubscriberError> {
        info!(producer = self.id, subscription = %self.subscription, "Producer started");
        let mut backoff = Backoff::default();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.queue.join() => {}
            }

            let pulled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                pulled = self
                    .backend
                    .pull(&self.subscription, self.max_messages, self.pull_timeout) => pulled,
            };

            let messages = match pulled {
                Ok(messages) => {
                    backoff.reset();
                    messages
                }
                Err(e) => {
                    SubscriberMetrics::incr(&self.metrics.pull_errors);
                    e.log();
                    let delay = backoff.next_delay();
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            };

            if messages.is_empty() {
                continue;
            }

            let pulled_at = Instant::now();
            SubscriberMetrics::add(&self.metrics.messages_pulled, messages.len() as u64);
            debug!(producer = self.id, count = messages.len(), "Pulled messages");

            let mut pending = messages.into_iter();
            while let Some(message) = pending.next() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        // Hand the rest over anyway; the consumer decides what happens to them
                        self.queue.push(PulledMessage::new(message, pulled_at));
                        for message in pending {
                            self.queue.push(PulledMessage::new(message, pulled_at));
                        }
                        info!(producer = self.id, "Producer stopped");
                        return Ok(());
                    }
                    reservation = self.queue.reserve() => {
                        reservation.put(PulledMessage::new(message, pulled_at));
                    }
                }
            }
        }

        info!(producer = self.id, "Producer stopped");
        Ok(())
    }
}
