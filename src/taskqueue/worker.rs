use serde_json::Value;

use super::error::WorkerError;

/// Synchronous task body, run on the manager's worker pool.
///
/// Return [`WorkerError::FailFast`] for payloads that can never succeed.
pub trait TaskWorker: Send + Sync + 'static {
    fn process(&self, payload: Value) -> Result<(), WorkerError>;
}

/// Adapter turning a closure into a [`TaskWorker`].
pub struct WorkerFn<F>(F);

impl<F> TaskWorker for WorkerFn<F>
where
    F: Fn(Value) -> Result<(), WorkerError> + Send + Sync + 'static,
{
    fn process(&self, payload: Value) -> Result<(), WorkerError> {
        (self.0)(payload)
    }
}

pub fn worker_fn<F>(f: F) -> WorkerFn<F>
where
    F: Fn(Value) -> Result<(), WorkerError> + Send + Sync + 'static,
{
    WorkerFn(f)
}
