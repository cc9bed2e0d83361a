use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;

use crate::config::ConfigError;
use crate::errors::{AuthError, SessionError};

/// Task queue client and manager errors
#[derive(Debug, thiserror::Error)]
pub enum TaskQueueError {
    #[error("Task queue request failed: {0}")]
    Session(#[from] SessionError),

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// The task payload is not base64-encoded JSON
    #[error("Invalid task payload: {0}")]
    InvalidPayload(String),

    /// The worker pool was shut down before the work could start
    #[error("Worker pool is closed")]
    PoolClosed,

    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl TaskQueueError {
    pub fn is_retryable(&self) -> bool {
        match self {
            TaskQueueError::Session(e) => e.is_retryable(),
            TaskQueueError::Auth(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Log the error at the appropriate level
    pub fn log(&self) {
        if self.is_retryable() {
            tracing::warn!("{}", self);
        } else {
            tracing::error!("{}", self);
        }
    }
}

/// Failure reported by a task worker
///
/// `FailFast` means retrying cannot help and the task goes straight to the
/// dead-letter sink. `Retryable` failures are redelivered until the retry
/// limit is reached.
///
/// Every error carries a `trace`: the `source()` chain of the error it was
/// built from, followed by the stack at construction when `RUST_BACKTRACE`
/// enables capture.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    #[error("{message}")]
    FailFast { message: String, trace: String },

    #[error("{message}")]
    Retryable { message: String, trace: String },
}

impl WorkerError {
    pub fn fail_fast(message: impl Into<String>) -> Self {
        WorkerError::FailFast {
            message: message.into(),
            trace: render_trace(None),
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        WorkerError::Retryable {
            message: message.into(),
            trace: render_trace(None),
        }
    }

    /// Fail-fast error keeping `error`'s cause chain
    pub fn fail_fast_from(error: &(dyn StdError + 'static)) -> Self {
        WorkerError::FailFast {
            message: error.to_string(),
            trace: render_trace(Some(error)),
        }
    }

    /// Retryable error keeping `error`'s cause chain
    pub fn retryable_from(error: &(dyn StdError + 'static)) -> Self {
        WorkerError::Retryable {
            message: error.to_string(),
            trace: render_trace(Some(error)),
        }
    }

    pub fn is_fail_fast(&self) -> bool {
        matches!(self, WorkerError::FailFast { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkerError::FailFast { .. } => "fail_fast",
            WorkerError::Retryable { .. } => "retryable",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            WorkerError::FailFast { message, .. } | WorkerError::Retryable { message, .. } => {
                message
            }
        }
    }

    pub fn trace(&self) -> &str {
        match self {
            WorkerError::FailFast { trace, .. } | WorkerError::Retryable { trace, .. } => trace,
        }
    }
}

fn render_trace(error: Option<&(dyn StdError + 'static)>) -> String {
    let mut lines = Vec::new();
    let mut cause = error.and_then(|e| e.source());
    while let Some(e) = cause {
        lines.push(format!("Caused by: {e}"));
        cause = e.source();
    }

    let backtrace = Backtrace::capture();
    if backtrace.status() == BacktraceStatus::Captured {
        lines.push(format!("Stack backtrace:\n{backtrace}"));
    }
    lines.join("\n")
}
