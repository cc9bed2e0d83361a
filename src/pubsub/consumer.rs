//! Consumer side of the subscriber pipeline.
//!
//! A consumer takes pulled messages off its queue and runs the user handler on
//! each one in its own task, with at most `max_tasks` handlers in flight.
//! Messages whose ack deadline already passed while they waited in the queue
//! are skipped: Pub/Sub has handed them to someone else by now.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::deadline::AckDeadlineCache;
use super::error::SubscriberError;
use super::message::SubscriberMessage;
use super::metrics::SubscriberMetrics;
use super::queue::JoinQueue;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Processes one message. `Ok` acks it; `Err` nacks it when nacking is enabled.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: SubscriberMessage) -> Result<(), HandlerError>;
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct HandlerFn<F>(F);

pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(SubscriberMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> MessageHandler for HandlerFn<F>
where
    F: Fn(SubscriberMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, message: SubscriberMessage) -> Result<(), HandlerError> {
        (self.0)(message).await
    }
}

/// A message plus the instant it came back from `pull`.
#[derive(Debug, Clone)]
pub struct PulledMessage {
    pub message: SubscriberMessage,
    pub pulled_at: Instant,
}

impl PulledMessage {
    pub fn new(message: SubscriberMessage, pulled_at: Instant) -> Self {
        Self { message, pulled_at }
    }
}

pub struct Consumer {
    pub(crate) id: usize,
    pub(crate) queue: Arc<JoinQueue<PulledMessage>>,
    pub(crate) handler: Arc<dyn MessageHandler>,
    pub(crate) ack_queue: Arc<JoinQueue<String>>,
    pub(crate) nack_queue: Option<Arc<JoinQueue<String>>>,
    pub(crate) deadline_cache: Arc<AckDeadlineCache>,
    pub(crate) max_tasks: usize,
    pub(crate) shutdown_timeout: Duration,
    pub(crate) metrics: Arc<SubscriberMetrics>,
}

impl Consumer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        queue: Arc<JoinQueue<PulledMessage>>,
        handler: Arc<dyn MessageHandler>,
        ack_queue: Arc<JoinQueue<String>>,
        nack_queue: Option<Arc<JoinQueue<String>>>,
        deadline_cache: Arc<AckDeadlineCache>,
        max_tasks: usize,
        metrics: Arc<SubscriberMetrics>,
    ) -> Self {
        Self {
            id,
            queue,
            handler,
            ack_queue,
            nack_queue,
            deadline_cache,
            max_tasks: max_tasks.max(1),
            shutdown_timeout: Duration::from_secs(30),
            metrics,
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Consume until `cancel` fires, then drain in-flight handlers and the
    /// ack/nack queues.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), SubscriberError> {
        info!(consumer = self.id, max_tasks = self.max_tasks, "Consumer started");

        let slots = Arc::new(Semaphore::new(self.max_tasks));
        let mut tasks = JoinSet::new();

        loop {
            let slot = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                slot = slots.clone().acquire_owned() => match slot {
                    Ok(slot) => slot,
                    Err(_) => break,
                },
            };

            let pulled = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                pulled = self.queue.get() => pulled,
            };

            while let Some(finished) = tasks.try_join_next() {
                Self::report_task(self.id, finished);
            }

            if self.deadline_cache.is_expired(pulled.pulled_at).await {
                SubscriberMetrics::incr(&self.metrics.messages_failfast);
                warn!(
                    consumer = self.id,
                    ack_id = %pulled.message.ack_id,
                    waited_ms = pulled.pulled_at.elapsed().as_millis() as u64,
                    "Ack deadline passed before processing, skipping message"
                );
                self.queue.task_done();
                continue;
            }

            let handler = self.handler.clone();
            let ack_queue = self.ack_queue.clone();
            let nack_queue = self.nack_queue.clone();
            let metrics = self.metrics.clone();
            let consumer = self.id;
            tasks.spawn(async move {
                let _slot = slot;
                let ack_id = pulled.message.ack_id.clone();
                match handler.handle(pulled.message).await {
                    Ok(()) => ack_queue.push(ack_id),
                    Err(e) => {
                        SubscriberMetrics::incr(&metrics.handler_errors);
                        warn!(consumer, %ack_id, error = %e, "Message handler failed");
                        if let Some(nack_queue) = nack_queue {
                            nack_queue.push(ack_id);
                        }
                    }
                }
            });
            self.queue.task_done();
        }

        debug!(consumer = self.id, in_flight = tasks.len(), "Consumer draining");
        let drain = async {
            while let Some(finished) = tasks.join_next().await {
                Self::report_task(self.id, finished);
            }
            self.ack_queue.join().await;
            if let Some(nack_queue) = &self.nack_queue {
                nack_queue.join().await;
            }
        };

        if tokio::time::timeout(self.shutdown_timeout, drain).await.is_err() {
            warn!(
                consumer = self.id,
                timeout_secs = self.shutdown_timeout.as_secs_f64(),
                "Consumer shutdown timed out, abandoning in-flight work"
            );
            tasks.abort_all();
        }

        info!(consumer = self.id, "Consumer stopped");
        Ok(())
    }

    fn report_task(consumer: usize, finished: Result<(), tokio::task::JoinError>) {
        if let Err(e) = finished {
            if e.is_panic() {
                error!(consumer, error = %e, "Message handler panicked");
            }
        }
    }
}
