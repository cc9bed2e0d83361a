use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::error::SubscriberError;

/// `projects.subscriptions.pull` response body
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    #[serde(default)]
    pub received_messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessage {
    pub ack_id: String,
    pub message: PubsubMessage,
    #[serde(default)]
    pub delivery_attempt: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubsubMessage {
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub publish_time: Option<String>,
    #[serde(default)]
    pub ordering_key: Option<String>,
}

/// A pulled message as handed to message handlers
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberMessage {
    pub ack_id: String,
    pub message_id: String,
    pub data: Vec<u8>,
    pub attributes: HashMap<String, String>,
    pub publish_time: Option<DateTime<Utc>>,
    pub ordering_key: Option<String>,
    /// Only populated when the subscription has a dead-letter policy
    pub delivery_attempt: Option<u32>,
}

impl SubscriberMessage {
    /// A message with the given ack id and payload, everything else empty
    pub fn new(ack_id: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            ack_id: ack_id.into(),
            message_id: String::new(),
            data: data.into(),
            attributes: HashMap::new(),
            publish_time: None,
            ordering_key: None,
            delivery_attempt: None,
        }
    }

    pub fn data_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.data).ok()
    }
}

impl TryFrom<ReceivedMessage> for SubscriberMessage {
    type Error = SubscriberError;

    fn try_from(received: ReceivedMessage) -> Result<Self, Self::Error> {
        let message = received.message;
        let data = STANDARD.decode(message.data.as_bytes()).map_err(|e| {
            SubscriberError::InvalidMessage(format!(
                "message {} has undecodable data: {e}",
                message.message_id
            ))
        })?;
        let publish_time = message
            .publish_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc));

        Ok(Self {
            ack_id: received.ack_id,
            message_id: message.message_id,
            data,
            attributes: message.attributes,
            publish_time,
            ordering_key: message.ordering_key.filter(|k| !k.is_empty()),
            delivery_attempt: received.delivery_attempt,
        })
    }
}
