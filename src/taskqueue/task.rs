use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::TaskQueueError;

/// A Cloud Tasks v2beta2 pull task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// For leased tasks this is the lease expiry; renew and cancel calls must echo it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_message: Option<PullMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullMessage {
    /// Base64-encoded bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    #[serde(default)]
    pub attempt_dispatch_count: u32,
    #[serde(default)]
    pub attempt_response_count: u32,
}

impl Task {
    /// A new pull task carrying `payload` as JSON, ready for insertion
    pub fn with_payload(payload: &Value, tag: Option<&str>) -> Result<Self, TaskQueueError> {
        let bytes = serde_json::to_vec(payload)
            .map_err(|e| TaskQueueError::InvalidPayload(e.to_string()))?;
        Ok(Self {
            pull_message: Some(PullMessage {
                payload: Some(STANDARD.encode(bytes)),
                tag: tag.map(str::to_string),
            }),
            ..Self::default()
        })
    }

    /// Last segment of the resource name
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Delivery attempts so far
    pub fn attempts(&self) -> u32 {
        self.status
            .as_ref()
            .map(|s| s.attempt_dispatch_count)
            .unwrap_or(0)
    }

    pub fn payload_bytes(&self) -> Result<Vec<u8>, TaskQueueError> {
        let encoded = self
            .pull_message
            .as_ref()
            .and_then(|m| m.payload.as_deref())
            .unwrap_or("");
        STANDARD
            .decode(encoded)
            .map_err(|e| TaskQueueError::InvalidPayload(format!("task {}: {e}", self.id())))
    }

    pub fn payload_json(&self) -> Result<Value, TaskQueueError> {
        let bytes = self.payload_bytes()?;
        serde_json::from_slice(&bytes)
            .map_err(|e| TaskQueueError::InvalidPayload(format!("task {}: {e}", self.id())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_task_from_lease_response() {
        let task: Task = serde_json::from_value(json!({
            "name": "projects/p/locations/us-central1/queues/q/tasks/1234",
            "scheduleTime": "2024-05-01T12:01:00Z",
            "createTime": "2024-05-01T12:00:00Z",
            "view": "FULL",
            "pullMessage": {"payload": "eyJqb2IiOiAxfQ==", "tag": "batch"},
            "status": {"attemptDispatchCount": 2}
        }))
        .unwrap();

        assert_eq!(task.id(), "1234");
        assert_eq!(task.attempts(), 2);
        assert_eq!(task.payload_json().unwrap(), json!({"job": 1}));
    }

    #[test]
    fn test_with_payload_round_trips_payload() {
        let task = Task::with_payload(&json!({"n": [1, 2]}), Some("t")).unwrap();
        assert_eq!(task.payload_json().unwrap(), json!({"n": [1, 2]}));

        let wire = serde_json::to_value(&task).unwrap();
        assert!(wire.get("name").is_none());
        assert_eq!(wire["pullMessage"]["tag"], "t");
    }

    #[test]
    fn test_invalid_payload() {
        let task = Task {
            name: "tasks/x".to_string(),
            pull_message: Some(PullMessage {
                payload: Some(STANDARD.encode(b"not json")),
                tag: None,
            }),
            ..Task::default()
        };

        assert!(matches!(
            task.payload_json(),
            Err(TaskQueueError::InvalidPayload(_))
        ));
        assert_eq!(task.attempts(), 0);
    }
}
