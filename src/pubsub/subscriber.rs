//! Subscriber supervisor.
//!
//! Starts `num_producers` producer/consumer pairs, one acker and (optionally)
//! one nacker, then waits. Pipeline tasks are only supposed to end when they
//! are told to, so the first one that finishes on its own takes the whole
//! subscriber down. Shutdown always runs in the same order: producers stop
//! pulling, consumers drain their in-flight handlers and wait for the ack/nack
//! queues to empty, and only then are the batchers stopped.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::batcher::{BatchKind, Batcher};
use super::client::PullBackend;
use super::consumer::{Consumer, MessageHandler};
use super::deadline::AckDeadlineCache;
use super::error::SubscriberError;
use super::metrics::SubscriberMetrics;
use super::producer::Producer;
use super::queue::JoinQueue;
use crate::config::SubscriberConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Producer(usize),
    Consumer(usize),
    Batcher(BatchKind),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Producer(id) => write!(f, "producer-{id}"),
            Stage::Consumer(id) => write!(f, "consumer-{id}"),
            Stage::Batcher(kind) => write!(f, "{kind}"),
        }
    }
}

type TaskResult = (Stage, Result<(), SubscriberError>);

/// One group of pipeline tasks that is cancelled and awaited together.
struct TaskGroup {
    tasks: JoinSet<TaskResult>,
    stages: HashMap<Id, Stage>,
    cancel: CancellationToken,
}

impl TaskGroup {
    fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            stages: HashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    fn spawn<F>(&mut self, stage: Stage, task: F)
    where
        F: Future<Output = Result<(), SubscriberError>> + Send + 'static,
    {
        let handle = self.tasks.spawn(async move { (stage, task.await) });
        self.stages.insert(handle.id(), stage);
    }

    fn failure(&self, finished: Result<TaskResult, JoinError>) -> SubscriberError {
        match finished {
            Ok((stage, Ok(()))) => SubscriberError::Cancelled {
                stage: stage.to_string(),
            },
            Ok((stage, Err(e))) => {
                error!(%stage, error = %e, "Subscriber task failed");
                e
            }
            Err(e) => {
                let stage = self
                    .stages
                    .get(&e.id())
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "unknown".to_string());
                SubscriberError::TaskFailed {
                    stage,
                    message: e.to_string(),
                }
            }
        }
    }

    async fn shutdown(&mut self) {
        self.cancel.cancel();
        while let Some(finished) = self.tasks.join_next().await {
            match finished {
                Ok((_, Ok(()))) => {}
                Ok((stage, Err(e))) => warn!(%stage, error = %e, "Task failed during shutdown"),
                Err(e) => warn!(error = %e, "Task panicked during shutdown"),
            }
        }
    }
}

/// A configured subscription pipeline.
pub struct Subscriber {
    subscription: String,
    backend: Arc<dyn PullBackend>,
    handler: Arc<dyn MessageHandler>,
    config: SubscriberConfig,
    metrics: Arc<SubscriberMetrics>,
}

impl Subscriber {
    /// # Errors
    ///
    /// `SubscriberError::Config` when `config` fails validation.
    pub fn new(
        subscription: impl Into<String>,
        backend: Arc<dyn PullBackend>,
        handler: Arc<dyn MessageHandler>,
        config: SubscriberConfig,
    ) -> Result<Self, SubscriberError> {
        config.validate()?;
        Ok(Self {
            subscription: subscription.into(),
            backend,
            handler,
            config,
            metrics: Arc::new(SubscriberMetrics::default()),
        })
    }

    /// Shared counters, readable while the subscriber runs.
    pub fn metrics(&self) -> Arc<SubscriberMetrics> {
        self.metrics.clone()
    }

    /// Run until `stop` fires or a pipeline task ends on its own.
    ///
    /// Returns `Ok(())` after a requested stop. Otherwise returns the error of
    /// the task that ended, or `SubscriberError::Cancelled` naming it when it
    /// returned without one.
    pub async fn run(self, stop: CancellationToken) -> Result<(), SubscriberError> {
        let config = &self.config;
        info!(
            subscription = %self.subscription,
            num_producers = config.num_producers,
            max_messages = config.max_messages_per_producer,
            tasks_per_consumer = config.num_tasks_per_consumer,
            enable_nack = config.enable_nack,
            "Starting subscriber"
        );

        let mut producers = TaskGroup::new();
        let mut consumers = TaskGroup::new();
        let mut batchers = TaskGroup::new();

        let ack_queue = Arc::new(JoinQueue::unbounded());
        let acker = Batcher::new(
            BatchKind::Ack,
            &self.subscription,
            self.backend.clone(),
            ack_queue.clone(),
            config.ack_window,
            self.metrics.clone(),
        );
        batchers.spawn(
            Stage::Batcher(BatchKind::Ack),
            acker.run(batchers.cancel.clone()),
        );

        let nack_queue = if config.enable_nack {
            let nack_queue = Arc::new(JoinQueue::unbounded());
            let nacker = Batcher::new(
                BatchKind::Nack,
                &self.subscription,
                self.backend.clone(),
                nack_queue.clone(),
                config.nack_window,
                self.metrics.clone(),
            );
            batchers.spawn(
                Stage::Batcher(BatchKind::Nack),
                nacker.run(batchers.cancel.clone()),
            );
            Some(nack_queue)
        } else {
            None
        };

        let deadline_cache = Arc::new(AckDeadlineCache::new(
            self.backend.clone(),
            &self.subscription,
            config.ack_deadline_cache_timeout,
        ));

        for id in 0..config.num_producers {
            let queue = Arc::new(JoinQueue::bounded(config.max_messages_per_producer));

            let consumer = Consumer::new(
                id,
                queue.clone(),
                self.handler.clone(),
                ack_queue.clone(),
                nack_queue.clone(),
                deadline_cache.clone(),
                config.num_tasks_per_consumer,
                self.metrics.clone(),
            )
            .with_shutdown_timeout(config.shutdown_timeout);
            consumers.spawn(Stage::Consumer(id), consumer.run(consumers.cancel.clone()));

            let producer = Producer::new(
                id,
                &self.subscription,
                self.backend.clone(),
                queue,
                config.max_messages_per_producer,
                config.pull_timeout,
                self.metrics.clone(),
            );
            producers.spawn(Stage::Producer(id), producer.run(producers.cancel.clone()));
        }

        let outcome = tokio::select! {
            _ = stop.cancelled() => {
                info!(subscription = %self.subscription, "Stop requested");
                Ok(())
            }
            Some(finished) = producers.tasks.join_next() => Err(producers.failure(finished)),
            Some(finished) = consumers.tasks.join_next() => Err(consumers.failure(finished)),
            Some(finished) = batchers.tasks.join_next() => Err(batchers.failure(finished)),
        };

        if let Err(e) = &outcome {
            error!(subscription = %self.subscription, error = %e, "Subscriber task ended, shutting down");
        }

        producers.shutdown().await;
        consumers.shutdown().await;
        batchers.shutdown().await;

        info!(
            subscription = %self.subscription,
            metrics = %self.metrics.summary(),
            "Subscriber stopped"
        );
        outcome
    }
}

/// Build a [`Subscriber`] and run it until `stop` fires or it fails.
pub async fn subscribe(
    subscription: impl Into<String>,
    backend: Arc<dyn PullBackend>,
    handler: Arc<dyn MessageHandler>,
    config: SubscriberConfig,
    stop: CancellationToken,
) -> Result<(), SubscriberError> {
    Subscriber::new(subscription, backend, handler, config)?
        .run(stop)
        .await
}
