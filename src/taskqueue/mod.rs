//! Cloud Tasks pull queue client and task manager.

pub mod client;
pub mod deadletter;
pub mod error;
pub mod lease;
pub mod manager;
pub mod pool;
pub mod task;
pub mod worker;

pub use client::{DEFAULT_API_ROOT, LeaseBackend, ListTasksResponse, TaskQueue, queue_path};
pub use deadletter::{
    DeadLetterRecord, DeadLetterSink, Disposition, TRACEBACK_MAX_CHARS, classify,
};
pub use error::{TaskQueueError, WorkerError};
pub use lease::LeaseManager;
pub use manager::{TaskManager, WorkSummary};
pub use pool::WorkerPool;
pub use task::{PullMessage, Task, TaskStatus};
pub use worker::{TaskWorker, WorkerFn, worker_fn};
