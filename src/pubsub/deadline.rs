//! Cached subscription ack deadline.
//!
//! Consumers compare how long a message waited since its pull against the
//! subscription's ack deadline. Reading the deadline is a `GET` on the
//! subscription, so it is cached and re-read at most once per
//! `cache_timeout`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::client::PullBackend;

#[derive(Debug, Default)]
struct CachedDeadline {
    deadline: Option<Duration>,
    refreshed_at: Option<Instant>,
}

/// The subscription's ack deadline, re-read at most once per `cache_timeout`.
///
/// Lookups never fail: a failed refresh keeps the previous value (or none)
/// and still counts as a refresh for the next `cache_timeout`.
pub struct AckDeadlineCache {
    backend: Arc<dyn PullBackend>,
    subscription: String,
    cache_timeout: Duration,
    state: Mutex<CachedDeadline>,
}

impl AckDeadlineCache {
    pub fn new(
        backend: Arc<dyn PullBackend>,
        subscription: impl Into<String>,
        cache_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            subscription: subscription.into(),
            cache_timeout,
            state: Mutex::new(CachedDeadline::default()),
        }
    }

    /// Current deadline; `None` while it has never been fetched successfully.
    pub async fn get(&self) -> Option<Duration> {
        let mut state = self.state.lock().await;

        let stale = state
            .refreshed_at
            .is_none_or(|at| at.elapsed() >= self.cache_timeout);
        if stale {
            match self.backend.get_subscription(&self.subscription).await {
                Ok(info) => {
                    debug!(
                        subscription = %self.subscription,
                        ack_deadline_seconds = info.ack_deadline_seconds,
                        "Refreshed ack deadline"
                    );
                    state.deadline = Some(Duration::from_secs(info.ack_deadline_seconds));
                }
                Err(e) => {
                    warn!(
                        subscription = %self.subscription,
                        error = %e,
                        "Failed to refresh ack deadline, keeping previous value"
                    );
                }
            }
            state.refreshed_at = Some(Instant::now());
        }

        state.deadline
    }

    /// Whether a message pulled at `pulled_at` has outlived the ack deadline.
    pub async fn is_expired(&self, pulled_at: Instant) -> bool {
        match self.get().await {
            Some(deadline) => pulled_at.elapsed() >= deadline,
            None => false,
        }
    }
}
