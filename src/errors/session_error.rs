//! Errors raised by the HTTP session layer.

use std::time::Duration;

/// Error types for outbound HTTP calls made through a [`Session`](crate::core::session::Session).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The server answered with a non-2xx status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The request did not complete within its timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection could not be established (DNS, refused, TLS)
    #[error("Connection failed: {0}")]
    Connection(String),

    /// Any other transport level failure
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body was not the JSON we expected
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Request could not be built (bad URL, bad header)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The blocking transport thread died before returning a response
    #[error("Blocking transport failed: {0}")]
    Blocking(String),
}

impl SessionError {
    /// Numeric status code, when the server responded at all
    pub fn status(&self) -> Option<u16> {
        match self {
            SessionError::Status { status, .. } => Some(*status),
            SessionError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            SessionError::Timeout(_) => true,
            SessionError::Http(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Transient failures: timeouts, connection problems, 429 and 5xx
    pub fn is_retryable(&self) -> bool {
        if self.is_timeout() {
            return true;
        }
        match self {
            SessionError::Status { status, .. } => *status == 429 || *status >= 500,
            SessionError::Connection(_) => true,
            SessionError::Http(e) => e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// Cap the body carried in an error so a misbehaving server cannot flood logs
    pub(crate) fn from_status(status: u16, body: &[u8]) -> Self {
        const MAX_ERROR_BODY_LEN: usize = 500;
        let text = String::from_utf8_lossy(body);
        let body = if text.len() > MAX_ERROR_BODY_LEN {
            let mut end = MAX_ERROR_BODY_LEN;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated)", &text[..end])
        } else {
            text.into_owned()
        };
        SessionError::Status { status, body }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let not_found = SessionError::Status {
            status: 404,
            body: String::new(),
        };
        assert_eq!(not_found.status(), Some(404));
        assert!(!not_found.is_retryable());

        let throttled = SessionError::Status {
            status: 429,
            body: String::new(),
        };
        assert!(throttled.is_retryable());

        let unavailable = SessionError::Status {
            status: 503,
            body: String::new(),
        };
        assert!(unavailable.is_retryable());
    }

    #[test]
    fn test_timeout_is_retryable() {
        let err = SessionError::Timeout(Duration::from_secs(5));
        assert!(err.is_timeout());
        assert!(err.is_retryable());
        assert_eq!(err.status(), None);
    }

    #[test]
    fn test_error_body_is_capped() {
        let body = "x".repeat(2_000);
        let err = SessionError::from_status(500, body.as_bytes());
        match err {
            SessionError::Status { status, body } => {
                assert_eq!(status, 500);
                assert!(body.ends_with("... (truncated)"));
                assert!(body.len() < 600);
            }
            other => panic!("Expected Status, got {other:?}"),
        }
    }
}
