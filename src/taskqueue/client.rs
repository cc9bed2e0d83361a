//! Cloud Tasks v2beta2 pull queue client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::error::TaskQueueError;
use super::task::Task;
use crate::auth::TokenProvider;
use crate::core::session::{HttpRequest, Session};
use crate::errors::SessionError;

pub const DEFAULT_API_ROOT: &str = "https://cloudtasks.googleapis.com/v2beta2";

const RESPONSE_VIEW: &str = "FULL";

/// Full resource name of a queue.
pub fn queue_path(project: &str, location: &str, queue: &str) -> String {
    format!("projects/{project}/locations/{location}/queues/{queue}")
}

/// `leaseDuration` wire format.
fn duration_string(duration: Duration) -> String {
    format!("{}s", duration.as_secs())
}

/// The lease lifecycle calls the task manager depends on.
#[async_trait]
pub trait LeaseBackend: Send + Sync {
    /// Full resource name of the queue tasks are leased from.
    fn queue_name(&self) -> &str;

    async fn lease(
        &self,
        max_tasks: u32,
        lease_duration: Duration,
    ) -> Result<Vec<Task>, TaskQueueError>;

    /// Extend the lease; returns the task with its new `scheduleTime`.
    async fn renew(&self, task: &Task, lease_duration: Duration) -> Result<Task, TaskQueueError>;

    /// Give the task back to the queue for immediate redelivery.
    async fn cancel(&self, task: &Task) -> Result<Task, TaskQueueError>;

    async fn delete(&self, task: &Task) -> Result<(), TaskQueueError>;
}

#[derive(Debug, Default, Deserialize)]
struct LeaseTasksResponse {
    #[serde(default)]
    tasks: Vec<Task>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTasksResponse {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// A single pull queue.
#[derive(Clone)]
pub struct TaskQueue {
    session: Arc<dyn Session>,
    token: Arc<dyn TokenProvider>,
    api_root: String,
    queue: String,
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("api_root", &self.api_root)
            .field("queue", &self.queue)
            .finish()
    }
}

impl TaskQueue {
    pub fn new(
        session: Arc<dyn Session>,
        token: Arc<dyn TokenProvider>,
        project: &str,
        location: &str,
        queue: &str,
    ) -> Self {
        Self::with_api_root(
            session,
            token,
            DEFAULT_API_ROOT,
            queue_path(project, location, queue),
        )
    }

    pub fn with_api_root(
        session: Arc<dyn Session>,
        token: Arc<dyn TokenProvider>,
        api_root: impl Into<String>,
        queue: impl Into<String>,
    ) -> Self {
        Self {
            session,
            token,
            api_root: api_root.into().trim_end_matches('/').to_string(),
            queue: queue.into(),
        }
    }

    async fn send(&self, request: HttpRequest) -> Result<Value, TaskQueueError> {
        let token = self.token.get_token().await?;
        let response = self.session.send(request.bearer(&token)).await?;
        if response.body.is_empty() {
            return Ok(Value::Null);
        }
        Ok(response.json()?)
    }

    fn task_url(&self, task: &Task, verb: &str) -> String {
        format!("{}/{}:{}", self.api_root, task.name, verb)
    }

    fn parse<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T, TaskQueueError> {
        serde_json::from_value(value)
            .map_err(|e| TaskQueueError::Session(SessionError::Json(e)))
    }

    /// Add a pull task carrying `payload` as JSON.
    pub async fn insert(&self, payload: &Value, tag: Option<&str>) -> Result<Task, TaskQueueError> {
        let task = Task::with_payload(payload, tag)?;
        let request = HttpRequest::post(format!("{}/{}/tasks", self.api_root, self.queue))
            .json(&json!({ "task": task, "responseView": RESPONSE_VIEW }))?;
        let created: Task = Self::parse(self.send(request).await?)?;
        debug!(task = %created.id(), queue = %self.queue, "Inserted task");
        Ok(created)
    }

    pub async fn get(&self, name: &str) -> Result<Task, TaskQueueError> {
        let request = HttpRequest::get(format!("{}/{}", self.api_root, name))
            .query("responseView", RESPONSE_VIEW);
        Self::parse(self.send(request).await?)
    }

    pub async fn list(
        &self,
        page_size: Option<u32>,
        page_token: Option<&str>,
    ) -> Result<ListTasksResponse, TaskQueueError> {
        let mut request = HttpRequest::get(format!("{}/{}/tasks", self.api_root, self.queue))
            .query("responseView", RESPONSE_VIEW);
        if let Some(size) = page_size {
            request = request.query("pageSize", size.to_string());
        }
        if let Some(token) = page_token {
            request = request.query("pageToken", token);
        }

        let value = self.send(request).await?;
        if value.is_null() {
            return Ok(ListTasksResponse::default());
        }
        Self::parse(value)
    }
}

#[async_trait]
impl LeaseBackend for TaskQueue {
    fn queue_name(&self) -> &str {
        &self.queue
    }

    async fn lease(
        &self,
        max_tasks: u32,
        lease_duration: Duration,
    ) -> Result<Vec<Task>, TaskQueueError> {
        let request = HttpRequest::post(format!("{}/{}/tasks:lease", self.api_root, self.queue))
            .json(&json!({
                "maxTasks": max_tasks,
                "leaseDuration": duration_string(lease_duration),
                "responseView": RESPONSE_VIEW,
            }))?;

        let value = self.send(request).await?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        let response: LeaseTasksResponse = Self::parse(value)?;
        Ok(response.tasks)
    }

    async fn renew(&self, task: &Task, lease_duration: Duration) -> Result<Task, TaskQueueError> {
        let request = HttpRequest::post(self.task_url(task, "renewLease")).json(&json!({
            "scheduleTime": task.schedule_time,
            "leaseDuration": duration_string(lease_duration),
            "responseView": RESPONSE_VIEW,
        }))?;
        Self::parse(self.send(request).await?)
    }

    async fn cancel(&self, task: &Task) -> Result<Task, TaskQueueError> {
        let request = HttpRequest::post(self.task_url(task, "cancelLease")).json(&json!({
            "scheduleTime": task.schedule_time,
            "responseView": RESPONSE_VIEW,
        }))?;
        Self::parse(self.send(request).await?)
    }

    async fn delete(&self, task: &Task) -> Result<(), TaskQueueError> {
        let request = HttpRequest::delete(format!("{}/{}", self.api_root, task.name));
        self.send(request).await?;
        Ok(())
    }
}
