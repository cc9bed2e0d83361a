use crate::errors::auth_error::{AuthError, AuthResult};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};

/// Lifetime requested for service account assertions, in seconds.
pub const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Grant type for exchanging a signed assertion at the token endpoint.
pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Claims of a service account assertion (RFC 7523)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionClaims {
    /// Audience - the token endpoint that will accept the assertion
    pub aud: String,
    /// Issuer - the service account email
    pub iss: String,
    /// Space-separated OAuth scopes
    pub scope: String,
    /// Issued at - Unix timestamp when the assertion was created
    pub iat: i64,
    /// Expiration time - Unix timestamp when the assertion expires
    pub exp: i64,
}

impl AssertionClaims {
    /// Create claims issued now, valid for one hour
    pub fn new(token_uri: &str, client_email: &str, scopes: &[String]) -> Self {
        let now = chrono::Utc::now().timestamp();

        Self {
            aud: token_uri.to_string(),
            iss: client_email.to_string(),
            scope: scopes.join(" "),
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        }
    }
}

/// Parse a PEM-encoded RSA private key as found in service account files
///
/// # Returns
/// * `AuthResult<EncodingKey>` - The encoding key, or `JwtSigningError` if the PEM is unusable
pub fn load_private_key(pem: &str) -> AuthResult<EncodingKey> {
    EncodingKey::from_rsa_pem(pem.as_bytes())
        .map_err(|e| AuthError::JwtSigningError(format!("Invalid service account key: {e}")))
}

/// Sign an assertion with RS256, tagging the header with the key id when known
pub fn sign_assertion(
    claims: &AssertionClaims,
    encoding_key: &EncodingKey,
    key_id: Option<&str>,
) -> AuthResult<String> {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = key_id.map(str::to_string);

    encode(&header, claims, encoding_key)
        .map_err(|e| AuthError::JwtSigningError(format!("Failed to sign assertion: {e}")))
}
