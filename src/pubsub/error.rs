use crate::config::ConfigError;
use crate::errors::{AuthError, SessionError};

/// Pub/Sub subscriber errors
#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    /// A pipeline task returned although nobody asked it to stop
    #[error("Subscriber task '{stage}' exited unexpectedly")]
    Cancelled { stage: String },

    /// A pipeline task panicked or was aborted
    #[error("Subscriber task '{stage}' failed: {message}")]
    TaskFailed { stage: String, message: String },

    #[error("Pub/Sub request failed: {0}")]
    Session(#[from] SessionError),

    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SubscriberError {
    /// Whether the failed call may succeed when repeated
    pub fn is_retryable(&self) -> bool {
        match self {
            SubscriberError::Session(e) => e.is_retryable(),
            SubscriberError::Auth(e) => e.is_retryable(),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_follows_session_error() {
        let err = SubscriberError::from(SessionError::Status {
            status: 503,
            body: String::new(),
        });
        assert!(err.is_retryable());

        let err = SubscriberError::from(SessionError::Status {
            status: 404,
            body: "subscription not found".to_string(),
        });
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = SubscriberError::Cancelled {
            stage: "producer-0".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Subscriber task 'producer-0' exited unexpectedly"
        );
    }
}
