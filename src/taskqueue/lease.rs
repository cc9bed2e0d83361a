use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::client::LeaseBackend;
use super::task::Task;

/// Keeps one task's lease alive while its worker runs.
///
/// The renewal loop sleeps for half the lease, renews, and repeats. A failed
/// renewal ends the loop for good; the lease then lapses on its own.
pub struct LeaseManager {
    cancel: CancellationToken,
    handle: JoinHandle<Task>,
    initial: Task,
}

impl LeaseManager {
    pub fn start(backend: Arc<dyn LeaseBackend>, task: Task, lease_duration: Duration) -> Self {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(renew_loop(
            backend,
            task.clone(),
            lease_duration,
            cancel.clone(),
        ));

        Self {
            cancel,
            handle,
            initial: task,
        }
    }

    /// Stop renewing and return the most recent task record.
    pub async fn stop(self) -> Task {
        self.cancel.cancel();
        match self.handle.await {
            Ok(task) => task,
            Err(e) => {
                warn!(task = %self.initial.id(), error = %e, "Lease renewal task failed");
                self.initial
            }
        }
    }

    /// Whether the renewal loop has ended, either stopped or after a failure.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

async fn renew_loop(
    backend: Arc<dyn LeaseBackend>,
    mut task: Task,
    lease_duration: Duration,
    cancel: CancellationToken,
) -> Task {
    let interval = lease_duration / 2;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return task,
            _ = tokio::time::sleep(interval) => {}
        }

        match backend.renew(&task, lease_duration).await {
            Ok(renewed) => {
                debug!(
                    task = %renewed.id(),
                    schedule_time = renewed.schedule_time.as_deref().unwrap_or(""),
                    "Renewed lease"
                );
                task = renewed;
            }
            Err(e) => {
                warn!(task = %task.id(), error = %e, "Lease renewal failed, no further renewals");
                cancel.cancel();
                return task;
            }
        }
    }
}
