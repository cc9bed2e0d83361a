//! Pub/Sub REST calls used by the subscriber pipeline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::error::SubscriberError;
use super::message::{PullResponse, SubscriberMessage};
use crate::auth::TokenProvider;
use crate::core::emulator::{Service, api_root};
use crate::core::session::{HttpRequest, Session};

/// Full resource name of a subscription.
pub fn subscription_path(project: &str, subscription: &str) -> String {
    format!("projects/{project}/subscriptions/{subscription}")
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_ack_deadline")]
    pub ack_deadline_seconds: u64,
}

fn default_ack_deadline() -> u64 {
    10
}

/// The subset of the Pub/Sub API the subscriber needs.
#[async_trait]
pub trait PullBackend: Send + Sync {
    /// Pull up to `max_messages`. A pull that times out yields an empty batch.
    async fn pull(
        &self,
        subscription: &str,
        max_messages: usize,
        timeout: Duration,
    ) -> Result<Vec<SubscriberMessage>, SubscriberError>;

    async fn acknowledge(&self, subscription: &str, ack_ids: &[String])
    -> Result<(), SubscriberError>;

    async fn modify_ack_deadline(
        &self,
        subscription: &str,
        ack_ids: &[String],
        ack_deadline_seconds: u32,
    ) -> Result<(), SubscriberError>;

    async fn get_subscription(&self, subscription: &str)
    -> Result<SubscriptionInfo, SubscriberError>;
}

/// Subscriber-side client for `pubsub.googleapis.com`.
///
/// When `PUBSUB_EMULATOR_HOST` is set requests go to the emulator and carry no
/// authorization header.
#[derive(Clone)]
pub struct SubscriberClient {
    session: Arc<dyn Session>,
    token: Option<Arc<dyn TokenProvider>>,
    api_root: String,
}

impl std::fmt::Debug for SubscriberClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberClient")
            .field("api_root", &self.api_root)
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

impl SubscriberClient {
    pub fn new(session: Arc<dyn Session>, token: Arc<dyn TokenProvider>) -> Self {
        let root = api_root(Service::PubSub);
        let token = if root.is_emulator {
            debug!(api_root = %root.url, "Using Pub/Sub emulator, requests are unauthenticated");
            None
        } else {
            Some(token)
        };

        Self {
            session,
            token,
            api_root: root.url,
        }
    }

    /// Point the client at an explicit API root.
    pub fn with_api_root(
        session: Arc<dyn Session>,
        token: Option<Arc<dyn TokenProvider>>,
        api_root: impl Into<String>,
    ) -> Self {
        Self {
            session,
            token,
            api_root: api_root.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    async fn authorize(&self, request: HttpRequest) -> Result<HttpRequest, SubscriberError> {
        match &self.token {
            Some(token) => Ok(request.bearer(&token.get_token().await?)),
            None => Ok(request),
        }
    }

    fn url(&self, subscription: &str, verb: Option<&str>) -> String {
        match verb {
            Some(verb) => format!("{}/{}:{}", self.api_root, subscription, verb),
            None => format!("{}/{}", self.api_root, subscription),
        }
    }
}

#[async_trait]
impl PullBackend for SubscriberClient {
    async fn pull(
        &self,
        subscription: &str,
        max_messages: usize,
        timeout: Duration,
    ) -> Result<Vec<SubscriberMessage>, SubscriberError> {
        let request = HttpRequest::post(self.url(subscription, Some("pull")))
            .json(&json!({ "maxMessages": max_messages }))?
            .timeout(timeout);
        let request = self.authorize(request).await?;

        let response = match self.session.send(request).await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                debug!(subscription, "Pull timed out with no messages");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let body: PullResponse = response.json()?;
        let mut messages = Vec::with_capacity(body.received_messages.len());
        for received in body.received_messages {
            match SubscriberMessage::try_from(received) {
                Ok(message) => messages.push(message),
                // Left unacked so it is redelivered once its deadline passes
                Err(e) => warn!(subscription, error = %e, "Skipping undecodable message"),
            }
        }
        Ok(messages)
    }

    async fn acknowledge(
        &self,
        subscription: &str,
        ack_ids: &[String],
    ) -> Result<(), SubscriberError> {
        let request = HttpRequest::post(self.url(subscription, Some("acknowledge")))
            .json(&json!({ "ackIds": ack_ids }))?;
        let request = self.authorize(request).await?;
        self.session.send(request).await?;
        Ok(())
    }

    async fn modify_ack_deadline(
        &self,
        subscription: &str,
        ack_ids: &[String],
        ack_deadline_seconds: u32,
    ) -> Result<(), SubscriberError> {
        let request = HttpRequest::post(self.url(subscription, Some("modifyAckDeadline")))
            .json(&json!({
                "ackIds": ack_ids,
                "ackDeadlineSeconds": ack_deadline_seconds,
            }))?;
        let request = self.authorize(request).await?;
        self.session.send(request).await?;
        Ok(())
    }

    async fn get_subscription(
        &self,
        subscription: &str,
    ) -> Result<SubscriptionInfo, SubscriberError> {
        let request = self
            .authorize(HttpRequest::get(self.url(subscription, None)))
            .await?;
        let response = self.session.send(request).await?;
        Ok(response.json()?)
    }
}
