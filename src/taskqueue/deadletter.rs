//! Terminal failure routing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::error::WorkerError;
use super::task::Task;

/// Longest traceback stored with a record; the tail is kept.
pub const TRACEBACK_MAX_CHARS: usize = 1500;

/// External store for tasks that will not be retried.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Write the record; `false` means it was not stored.
    async fn upsert(&self, name: &str, properties: Map<String, Value>) -> bool;
}

/// What happens to a task after its worker failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Release the lease so the queue redelivers it
    Retry,
    /// Dead-letter the task and remove it from the queue
    Terminal,
}

/// Fail-fast errors are terminal regardless of budget. Retryable errors turn
/// terminal once `attempts` reaches `retry_limit`.
pub fn classify(error: &WorkerError, attempts: u32, retry_limit: Option<u32>) -> Disposition {
    if error.is_fail_fast() {
        return Disposition::Terminal;
    }
    match retry_limit {
        Some(limit) if attempts >= limit => Disposition::Terminal,
        _ => Disposition::Retry,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetterRecord {
    pub name: String,
    pub error: String,
    pub error_kind: &'static str,
    pub traceback: String,
    pub queue: String,
    pub payload: Option<Value>,
    pub attempts: u32,
    pub created_at: Option<String>,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn new(task: &Task, queue: &str, error: &WorkerError) -> Self {
        Self {
            name: task.id().to_string(),
            error: error.to_string(),
            error_kind: error.kind(),
            traceback: truncate_tail(&traceback(error), TRACEBACK_MAX_CHARS),
            queue: queue.to_string(),
            payload: task.payload_json().ok(),
            attempts: task.attempts(),
            created_at: task.create_time.clone(),
            failed_at: Utc::now(),
        }
    }

    /// Flattened property map handed to the sink
    pub fn into_properties(self) -> Map<String, Value> {
        let mut props = Map::new();
        props.insert("error".into(), Value::String(self.error));
        props.insert("error_kind".into(), Value::String(self.error_kind.into()));
        props.insert("traceback".into(), Value::String(self.traceback));
        props.insert("queue".into(), Value::String(self.queue));
        props.insert("attempts".into(), Value::from(self.attempts));
        props.insert("failed_at".into(), Value::String(self.failed_at.to_rfc3339()));
        if let Some(created_at) = self.created_at {
            props.insert("created_at".into(), Value::String(created_at));
        }
        if let Some(payload) = self.payload {
            props.insert("payload".into(), payload);
        }
        props
    }
}

fn traceback(error: &WorkerError) -> String {
    let head = format!("{}: {}", error.kind(), error.message());
    if error.trace().is_empty() {
        head
    } else {
        format!("{head}\n{}", error.trace())
    }
}

fn truncate_tail(text: &str, max_chars: usize) -> String {
    let count = text.chars().count();
    if count <= max_chars {
        return text.to_string();
    }
    text.chars().skip(count - max_chars).collect()
}
