use super::session_error::SessionError;

/// Error codes for structured error reporting
pub mod error_codes {
    pub const CONFIG_ERROR: &str = "config_error";
    pub const MISSING_SCOPES: &str = "missing_scopes";
    pub const CREDENTIAL_FILE: &str = "credential_file";
    pub const UNSUPPORTED_CREDENTIAL: &str = "unsupported_credential";
    pub const JWT_SIGNING_ERROR: &str = "jwt_signing_error";
    pub const TOKEN_EXCHANGE: &str = "token_exchange";
    pub const HTTP_ERROR: &str = "http_error";
}

/// Authentication error types
///
/// Cloneable so that one failed token acquisition can be reported to every
/// caller that was waiting on it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AuthError {
    /// Configuration error (malformed credential descriptor, bad settings)
    #[error("Auth configuration error: {0}")]
    ConfigError(String),

    /// Service account credentials were loaded without any scopes
    #[error("Service account credentials require at least one scope")]
    MissingScopes,

    /// An explicitly requested credential file could not be read or parsed
    #[error("Credential file '{path}' is unusable: {reason}")]
    CredentialFile { path: String, reason: String },

    /// The credential descriptor has a `type` this library cannot exchange
    #[error("Unsupported credential type '{0}'")]
    UnsupportedCredentialType(String),

    /// JWT signing operation failed
    #[error("JWT signing error: {0}")]
    JwtSigningError(String),

    /// The token endpoint answered with something other than a token
    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    /// HTTP request error, with the status code when one was received
    #[error("HTTP error ({status:?}): {message}")]
    Http {
        status: Option<u16>,
        message: String,
        retryable: bool,
    },
}

impl AuthError {
    /// Get the error code for structured error reporting
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::ConfigError(_) => error_codes::CONFIG_ERROR,
            AuthError::MissingScopes => error_codes::MISSING_SCOPES,
            AuthError::CredentialFile { .. } => error_codes::CREDENTIAL_FILE,
            AuthError::UnsupportedCredentialType(_) => error_codes::UNSUPPORTED_CREDENTIAL,
            AuthError::JwtSigningError(_) => error_codes::JWT_SIGNING_ERROR,
            AuthError::TokenExchange(_) => error_codes::TOKEN_EXCHANGE,
            AuthError::Http { .. } => error_codes::HTTP_ERROR,
        }
    }

    /// Whether another acquisition attempt could succeed without operator action
    pub fn is_retryable(&self) -> bool {
        matches!(self, AuthError::Http { retryable: true, .. })
    }

    /// Whether this error means the credential setup itself is broken
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AuthError::ConfigError(_)
                | AuthError::MissingScopes
                | AuthError::CredentialFile { .. }
                | AuthError::UnsupportedCredentialType(_)
                | AuthError::JwtSigningError(_)
        )
    }

    /// Log the error at the appropriate level
    pub fn log(&self) {
        match self {
            AuthError::Http {
                retryable: true, ..
            } => {
                tracing::warn!("{}", self);
            }
            AuthError::Http { .. } | AuthError::TokenExchange(_) => {
                tracing::error!("{}", self);
            }
            // Misconfiguration is never going to heal by itself
            _ => {
                tracing::error!(code = self.error_code(), "{}", self);
            }
        }
    }
}

impl From<SessionError> for AuthError {
    fn from(err: SessionError) -> Self {
        AuthError::Http {
            status: err.status(),
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}

// Result type alias for convenience
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AuthError::MissingScopes.error_code(),
            error_codes::MISSING_SCOPES
        );
        assert_eq!(
            AuthError::ConfigError("x".to_string()).error_code(),
            error_codes::CONFIG_ERROR
        );
        assert_eq!(
            AuthError::TokenExchange("x".to_string()).error_code(),
            error_codes::TOKEN_EXCHANGE
        );
    }

    #[test]
    fn test_session_error_conversion_keeps_status() {
        let err: AuthError = SessionError::Status {
            status: 503,
            body: "backend unavailable".to_string(),
        }
        .into();

        match &err {
            AuthError::Http {
                status, retryable, ..
            } => {
                assert_eq!(*status, Some(503));
                assert!(*retryable);
            }
            other => panic!("Expected Http error, got {other:?}"),
        }
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_client_errors_are_not_retryable() {
        let err: AuthError = SessionError::Status {
            status: 400,
            body: "invalid_grant".to_string(),
        }
        .into();

        assert!(!err.is_retryable());
    }

    #[test]
    fn test_configuration_errors_are_fatal() {
        assert!(AuthError::MissingScopes.is_fatal());
        assert!(AuthError::UnsupportedCredentialType("external_account".to_string()).is_fatal());
        assert!(
            AuthError::CredentialFile {
                path: "/nope.json".to_string(),
                reason: "not found".to_string(),
            }
            .is_fatal()
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(
            AuthError::MissingScopes.to_string(),
            "Service account credentials require at least one scope"
        );
        assert_eq!(
            AuthError::UnsupportedCredentialType("external_account".to_string()).to_string(),
            "Unsupported credential type 'external_account'"
        );
    }
}
