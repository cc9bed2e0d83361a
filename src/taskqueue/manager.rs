use std::sync::Arc;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::client::LeaseBackend;
use super::deadletter::{DeadLetterRecord, DeadLetterSink, Disposition, classify};
use super::error::{TaskQueueError, WorkerError};
use super::lease::LeaseManager;
use super::pool::WorkerPool;
use super::task::Task;
use super::worker::TaskWorker;
use crate::config::TaskManagerConfig;
use crate::core::backoff::Backoff;

/// Counts from one lease-and-process cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkSummary {
    pub leased: usize,
    pub completed: usize,
    pub retried: usize,
    pub dead_lettered: usize,
}

impl WorkSummary {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Completed => self.completed += 1,
            Outcome::Retried => self.retried += 1,
            Outcome::DeadLettered => self.dead_lettered += 1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Completed,
    Retried,
    DeadLettered,
}

enum State {
    Leasing,
    Processing(Vec<Task>),
    Backoff,
}

/// Leases tasks from a pull queue and runs them through a [`TaskWorker`].
///
/// Every leased task keeps its lease renewed while the worker runs. Success
/// deletes the task, a retryable failure hands the lease back, and a terminal
/// failure goes to the dead-letter sink before the task is deleted.
pub struct TaskManager {
    backend: Arc<dyn LeaseBackend>,
    worker: Arc<dyn TaskWorker>,
    deadletter: Option<Arc<dyn DeadLetterSink>>,
    pool: WorkerPool,
    config: TaskManagerConfig,
}

impl TaskManager {
    pub fn new(
        backend: Arc<dyn LeaseBackend>,
        worker: Arc<dyn TaskWorker>,
        config: TaskManagerConfig,
    ) -> Result<Self, TaskQueueError> {
        config.validate()?;
        let pool = WorkerPool::new(config.max_concurrent_workers);

        Ok(Self {
            backend,
            worker,
            deadletter: None,
            pool,
            config,
        })
    }

    pub fn with_deadletter(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.deadletter = Some(sink);
        self
    }

    pub fn config(&self) -> &TaskManagerConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Lease one batch and process it to completion.
    pub async fn find_and_process_work(&self) -> Result<WorkSummary, TaskQueueError> {
        let tasks = self
            .backend
            .lease(self.config.batch_size, self.config.lease_duration())
            .await?;
        Ok(self.process_batch(tasks).await)
    }

    /// Poll until `cancel` fires.
    ///
    /// Empty leases and lease errors back off; any leased work resets the
    /// backoff. A batch that is already processing finishes before the loop
    /// exits, then the worker pool is shut down.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), TaskQueueError> {
        info!(
            queue = %self.backend.queue_name(),
            batch_size = self.config.batch_size,
            lease_seconds = self.config.lease_seconds,
            "Task manager started"
        );

        let mut backoff = Backoff::new(
            self.config.backoff_base,
            self.config.backoff_factor,
            self.config.backoff_max_value,
        );
        let mut state = State::Leasing;

        loop {
            state = match state {
                State::Leasing => {
                    let leased = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        leased = self
                            .backend
                            .lease(self.config.batch_size, self.config.lease_duration()) => leased,
                    };

                    match leased {
                        Ok(tasks) if !tasks.is_empty() => {
                            backoff.reset();
                            State::Processing(tasks)
                        }
                        Ok(_) => State::Backoff,
                        Err(e) => {
                            e.log();
                            State::Backoff
                        }
                    }
                }
                State::Processing(tasks) => {
                    let summary = self.process_batch(tasks).await;
                    debug!(
                        leased = summary.leased,
                        completed = summary.completed,
                        retried = summary.retried,
                        dead_lettered = summary.dead_lettered,
                        "Processed batch"
                    );
                    State::Leasing
                }
                State::Backoff => {
                    let delay = backoff.next_delay();
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    State::Leasing
                }
            };
        }

        self.pool.shutdown();
        info!(queue = %self.backend.queue_name(), "Task manager stopped");
        Ok(())
    }

    async fn process_batch(&self, tasks: Vec<Task>) -> WorkSummary {
        let mut summary = WorkSummary {
            leased: tasks.len(),
            ..WorkSummary::default()
        };

        let outcomes = join_all(tasks.into_iter().map(|task| self.process_task(task))).await;
        for outcome in outcomes {
            summary.record(outcome);
        }
        summary
    }

    async fn process_task(&self, task: Task) -> Outcome {
        let lease = LeaseManager::start(
            self.backend.clone(),
            task.clone(),
            self.config.lease_duration(),
        );

        let result = match task.payload_json() {
            Ok(payload) => {
                let worker = self.worker.clone();
                match self.pool.run(move || worker.process(payload)).await {
                    Ok(result) => result,
                    Err(e) => Err(WorkerError::retryable_from(&e)),
                }
            }
            Err(e) => Err(WorkerError::fail_fast_from(&e)),
        };

        let latest = lease.stop().await;

        match result {
            Ok(()) => {
                debug!(task = %latest.id(), "Task completed");
                self.delete(&latest).await;
                Outcome::Completed
            }
            Err(err) => match classify(&err, latest.attempts(), self.config.retry_limit) {
                Disposition::Retry => {
                    warn!(
                        task = %latest.id(),
                        attempts = latest.attempts(),
                        error = %err,
                        "Task failed, releasing lease for redelivery"
                    );
                    self.cancel_lease(&latest).await;
                    Outcome::Retried
                }
                Disposition::Terminal => self.dead_letter(&latest, &err).await,
            },
        }
    }

    async fn dead_letter(&self, task: &Task, err: &WorkerError) -> Outcome {
        error!(
            task = %task.id(),
            attempts = task.attempts(),
            kind = err.kind(),
            error = %err,
            "Task failed permanently"
        );

        let Some(sink) = &self.deadletter else {
            warn!(task = %task.id(), "No dead-letter sink configured, deleting task");
            self.delete(task).await;
            return Outcome::DeadLettered;
        };

        let record = DeadLetterRecord::new(task, self.backend.queue_name(), err);
        let name = record.name.clone();
        if sink.upsert(&name, record.into_properties()).await {
            self.delete(task).await;
            Outcome::DeadLettered
        } else {
            error!(task = %task.id(), "Dead-letter upsert failed, keeping task for redelivery");
            self.cancel_lease(task).await;
            Outcome::Retried
        }
    }

    async fn delete(&self, task: &Task) {
        if let Err(e) = self.backend.delete(task).await {
            warn!(task = %task.id(), error = %e, "Failed to delete task");
        }
    }

    async fn cancel_lease(&self, task: &Task) {
        if let Err(e) = self.backend.cancel(task).await {
            warn!(task = %task.id(), error = %e, "Failed to cancel lease");
        }
    }
}
