//! OAuth2 access token manager.
//!
//! [`Token`] holds one credential set and hands out bearer tokens, refreshing
//! them once half of their advertised lifetime has elapsed. Concurrent callers
//! that arrive while a refresh is running all await the same in-flight
//! acquisition; at most one exchange request is ever outstanding per `Token`.

use std::env;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use jsonwebtoken::EncodingKey;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::credentials::{CredentialKind, CredentialSource, ServiceFile};
use super::jwt::{AssertionClaims, JWT_BEARER_GRANT, load_private_key, sign_assertion};
use crate::core::backoff::{Backoff, check_params};
use crate::core::session::{HttpRequest, Session};
use crate::errors::{AuthError, AuthResult};

pub const DEFAULT_METADATA_BASE_URL: &str = "http://metadata.google.internal/computeMetadata/v1";

/// Overrides the metadata server host (`host[:port]`), mainly for tests.
pub const GCE_METADATA_HOST: &str = "GCE_METADATA_HOST";

/// Environment variables consulted by [`Token::get_project`], in order.
pub const PROJECT_ENV_VARS: [&str; 3] = ["GOOGLE_CLOUD_PROJECT", "GCLOUD_PROJECT", "APPLICATION_ID"];

const METADATA_FLAVOR: (&str, &str) = ("metadata-flavor", "Google");

/// Tuning for a [`Token`].
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// OAuth scopes requested for service account credentials.
    pub scopes: Vec<String>,
    /// Fraction of `expires_in` after which a cached token is refreshed.
    pub refresh_ratio: f64,
    /// Attempts per acquisition before the error is surfaced.
    pub max_attempts: u32,
    pub retry_base: f64,
    pub retry_factor: f64,
    pub retry_max_value: f64,
    pub metadata_base_url: String,
    /// Project id returned by [`Token::get_project`] ahead of any discovery.
    pub project_override: Option<String>,
}

impl Default for TokenConfig {
    fn default() -> Self {
        let metadata_base_url = match env::var(GCE_METADATA_HOST) {
            Ok(host) if !host.trim().is_empty() => {
                format!("http://{}/computeMetadata/v1", host.trim())
            }
            _ => DEFAULT_METADATA_BASE_URL.to_string(),
        };

        Self {
            scopes: Vec::new(),
            refresh_ratio: 0.5,
            max_attempts: 5,
            retry_base: 2.0,
            retry_factor: 1.0,
            retry_max_value: 10.0,
            metadata_base_url,
            project_override: None,
        }
    }
}

impl TokenConfig {
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }
}

/// Successful token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

/// A token together with the instant it was obtained.
#[derive(Debug, Clone)]
pub struct CachedToken {
    pub value: String,
    pub expires_in: Duration,
    pub acquired_at: Instant,
}

impl CachedToken {
    pub fn new(access: AccessToken, acquired_at: Instant) -> Self {
        Self {
            value: access.access_token,
            expires_in: Duration::from_secs(access.expires_in),
            acquired_at,
        }
    }

    /// Whether the token may still be handed out at `now`.
    ///
    /// Stale from `acquired_at + expires_in * ratio` onwards.
    pub fn is_fresh_at(&self, now: Instant, ratio: f64) -> bool {
        let elapsed = now.saturating_duration_since(self.acquired_at);
        elapsed.as_secs_f64() < self.expires_in.as_secs_f64() * ratio
    }
}

type Acquisition = Shared<BoxFuture<'static, AuthResult<CachedToken>>>;

#[derive(Default)]
struct TokenState {
    cached: Option<CachedToken>,
    in_flight: Option<Acquisition>,
}

struct TokenInner {
    service: ServiceFile,
    session: Arc<dyn Session>,
    config: TokenConfig,
    signing_key: Option<EncodingKey>,
    state: Mutex<TokenState>,
}

/// Cloneable handle to one credential set and its cached access token.
#[derive(Clone)]
pub struct Token {
    inner: Arc<TokenInner>,
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("kind", &self.inner.service.kind)
            .field("scopes", &self.inner.config.scopes)
            .finish()
    }
}

impl Token {
    /// Resolve credentials from `source` and build a token manager.
    ///
    /// # Errors
    ///
    /// Any credential discovery error, an unusable service account key, or
    /// `AuthError::MissingScopes` for service accounts configured without scopes.
    pub fn new(
        source: &CredentialSource,
        session: Arc<dyn Session>,
        config: TokenConfig,
    ) -> AuthResult<Self> {
        let service = ServiceFile::load(source)?;
        Self::with_service(service, session, config)
    }

    /// Build a token manager from an already parsed descriptor.
    pub fn with_service(
        service: ServiceFile,
        session: Arc<dyn Session>,
        config: TokenConfig,
    ) -> AuthResult<Self> {
        check_params(
            config.retry_base,
            config.retry_factor,
            config.retry_max_value,
        )
        .map_err(AuthError::ConfigError)?;

        let signing_key = match service.kind {
            CredentialKind::ServiceAccount => {
                if config.scopes.is_empty() {
                    return Err(AuthError::MissingScopes);
                }
                let pem = service.private_key.as_deref().ok_or_else(|| {
                    AuthError::ConfigError("service account has no private key".to_string())
                })?;
                Some(load_private_key(pem)?)
            }
            _ => None,
        };

        info!(kind = %service.kind, "Initialized token manager");

        Ok(Self {
            inner: Arc::new(TokenInner {
                service,
                session,
                config,
                signing_key,
                state: Mutex::new(TokenState::default()),
            }),
        })
    }

    pub fn kind(&self) -> CredentialKind {
        self.inner.service.kind
    }

    pub fn service(&self) -> &ServiceFile {
        &self.inner.service
    }

    /// Return a fresh access token, refreshing it if needed.
    ///
    /// # Errors
    ///
    /// The last acquisition error once retries are exhausted. Every caller that
    /// was waiting on the failed acquisition sees the same error; the next call
    /// starts a new one.
    pub async fn get(&self) -> AuthResult<String> {
        let acquisition = {
            let mut state = self.inner.state.lock();
            match state.in_flight.clone() {
                Some(in_flight) => in_flight,
                None => {
                    let now = Instant::now();
                    if let Some(cached) = state
                        .cached
                        .as_ref()
                        .filter(|c| c.is_fresh_at(now, self.inner.config.refresh_ratio))
                    {
                        return Ok(cached.value.clone());
                    }

                    let acquisition = Self::start_acquisition(self.inner.clone());
                    state.in_flight = Some(acquisition.clone());
                    acquisition
                }
            }
        };

        acquisition.await.map(|token| token.value)
    }

    fn start_acquisition(inner: Arc<TokenInner>) -> Acquisition {
        async move {
            let result = inner.acquire_with_retry().await;

            let mut state = inner.state.lock();
            if let Ok(token) = &result {
                state.cached = Some(token.clone());
            }
            state.in_flight = None;
            result
        }
        .boxed()
        .shared()
    }

    /// Resolve the project id these credentials belong to.
    ///
    /// Returns `Ok(None)` when no source knows the project; a failing metadata
    /// lookup is logged and treated the same way.
    pub async fn get_project(&self) -> AuthResult<Option<String>> {
        if let Some(project) = &self.inner.config.project_override {
            return Ok(Some(project.clone()));
        }

        for var in PROJECT_ENV_VARS {
            if let Ok(project) = env::var(var) {
                if !project.is_empty() {
                    return Ok(Some(project));
                }
            }
        }

        if let Some(project) = &self.inner.service.project_id {
            return Ok(Some(project.clone()));
        }

        if self.inner.service.kind != CredentialKind::GceMetadata {
            return Ok(None);
        }

        let url = format!("{}/project/project-id", self.inner.config.metadata_base_url);
        let request = HttpRequest::get(url).header(METADATA_FLAVOR.0, METADATA_FLAVOR.1);
        match self.inner.session.send(request).await {
            Ok(response) => {
                let project = response.text().trim().to_string();
                Ok((!project.is_empty()).then_some(project))
            }
            Err(e) => {
                warn!(error = %e, "Could not read project id from metadata server");
                Ok(None)
            }
        }
    }
}

impl TokenInner {
    async fn acquire_with_retry(&self) -> AuthResult<CachedToken> {
        let mut backoff = Backoff::new(
            self.config.retry_base,
            self.config.retry_factor,
            self.config.retry_max_value,
        );
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let delay = backoff.next_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match self.acquire().await {
                Ok(access) => {
                    debug!(
                        kind = %self.service.kind,
                        expires_in = access.expires_in,
                        attempt,
                        "Acquired access token"
                    );
                    return Ok(CachedToken::new(access, Instant::now()));
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(error = %e, attempt, max_attempts, "Token acquisition failed, retrying");
                }
                Err(e) => {
                    e.log();
                    return Err(e);
                }
            }
        }
    }

    async fn acquire(&self) -> AuthResult<AccessToken> {
        let request = match self.service.kind {
            CredentialKind::AuthorizedUser => self.refresh_grant_request()?,
            CredentialKind::ServiceAccount => self.jwt_bearer_request()?,
            CredentialKind::GceMetadata => self.metadata_request(),
        };

        let response = self.session.send(request).await?;
        response.json::<AccessToken>().map_err(|e| {
            AuthError::TokenExchange(format!("unexpected token response: {e}"))
        })
    }

    fn refresh_grant_request(&self) -> AuthResult<HttpRequest> {
        let field = |value: &Option<String>, name: &str| {
            value.clone().ok_or_else(|| {
                AuthError::ConfigError(format!("authorized_user credentials are missing '{name}'"))
            })
        };
        let client_id = field(&self.service.client_id, "client_id")?;
        let client_secret = field(&self.service.client_secret, "client_secret")?;
        let refresh_token = field(&self.service.refresh_token, "refresh_token")?;

        Ok(HttpRequest::post(&self.service.token_uri).form(&[
            ("grant_type", "refresh_token"),
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
        ]))
    }

    fn jwt_bearer_request(&self) -> AuthResult<HttpRequest> {
        let key = self.signing_key.as_ref().ok_or_else(|| {
            AuthError::ConfigError("service account signing key not loaded".to_string())
        })?;
        let email = self.service.client_email.as_deref().ok_or_else(|| {
            AuthError::ConfigError("service_account credentials are missing 'client_email'".to_string())
        })?;

        let claims = AssertionClaims::new(&self.service.token_uri, email, &self.config.scopes);
        let assertion = sign_assertion(&claims, key, self.service.private_key_id.as_deref())?;

        Ok(HttpRequest::post(&self.service.token_uri).form(&[
            ("grant_type", JWT_BEARER_GRANT),
            ("assertion", assertion.as_str()),
        ]))
    }

    fn metadata_request(&self) -> HttpRequest {
        HttpRequest::get(format!(
            "{}/instance/service-accounts/default/token",
            self.config.metadata_base_url
        ))
        .query("recursive", "true")
        .header(METADATA_FLAVOR.0, METADATA_FLAVOR.1)
    }
}

/// Trait for providing OAuth2 access tokens for Google Cloud APIs.
///
/// Clients depend on this rather than on [`Token`] so emulator setups and tests
/// can supply a fixed token.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Retrieves a valid access token.
    ///
    /// # Errors
    ///
    /// Whatever the underlying acquisition reports.
    async fn get_token(&self) -> AuthResult<String>;
}

#[async_trait]
impl TokenProvider for Token {
    async fn get_token(&self) -> AuthResult<String> {
        self.get().await
    }
}

/// A provider that always returns the same token.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(&self) -> AuthResult<String> {
        Ok(self.token.clone())
    }
}
