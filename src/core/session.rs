//! HTTP session abstraction.
//!
//! Every outbound call in this crate goes through the [`Session`] trait. Two
//! implementations exist and are chosen at construction time through
//! [`SessionKind`]:
//!
//! - [`AsyncSession`]: a pooled `reqwest::Client`, fully non-blocking.
//! - [`BlockingSession`]: a `reqwest::blocking::Client` driven from tokio's
//!   blocking thread pool, for hosts that need synchronous transport.
//!
//! Both variants return [`SessionError::Status`] for non-2xx responses so the
//! caller can inspect the numeric status code.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::SessionError;

/// Timeout applied to requests that do not carry their own.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// A transport-independent request description.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::Put, url)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::Patch, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::Delete, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Attach `authorization: Bearer <token>`.
    pub fn bearer(self, token: &str) -> Self {
        self.header("authorization", format!("Bearer {token}"))
    }

    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, SessionError> {
        self.body = Some(serde_json::to_vec(body)?);
        Ok(self.header("content-type", "application/json"))
    }

    /// Form-encode `fields` as the request body.
    pub fn form(mut self, fields: &[(&str, &str)]) -> Self {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        self.body = Some(encoded.into_bytes());
        self.header("content-type", "application/x-www-form-urlencoded")
    }

    pub fn body(mut self, bytes: Vec<u8>) -> Self {
        self.body = Some(bytes);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, SessionError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Capability to issue HTTP requests.
#[async_trait]
pub trait Session: Send + Sync + fmt::Debug {
    /// Sends `request`, returning the body of any 2xx response.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Status`] for non-2xx responses
    /// - [`SessionError::Timeout`] when the request exceeds its timeout
    /// - [`SessionError::Connection`] / [`SessionError::Http`] for transport failures
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SessionError>;
}

/// Which transport a [`Session`] should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionKind {
    #[default]
    Async,
    Blocking,
}

impl FromStr for SessionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "async" | "nonblocking" | "non-blocking" => Ok(SessionKind::Async),
            "blocking" | "sync" => Ok(SessionKind::Blocking),
            other => Err(format!(
                "Unknown session kind '{other}'. Expected 'async' or 'blocking'"
            )),
        }
    }
}

/// Build the session variant selected by `kind`.
pub fn build_session(
    kind: SessionKind,
    timeout: Duration,
) -> Result<Arc<dyn Session>, SessionError> {
    debug!(?kind, ?timeout, "Building HTTP session");
    Ok(match kind {
        SessionKind::Async => Arc::new(AsyncSession::new(timeout)?),
        SessionKind::Blocking => Arc::new(BlockingSession::new(timeout)?),
    })
}

fn classify(err: reqwest::Error, timeout: Duration) -> SessionError {
    if err.is_timeout() {
        SessionError::Timeout(timeout)
    } else if err.is_connect() {
        SessionError::Connection(err.to_string())
    } else if err.is_builder() {
        SessionError::InvalidRequest(err.to_string())
    } else {
        SessionError::Http(err)
    }
}

fn finish(status: u16, body: Vec<u8>) -> Result<HttpResponse, SessionError> {
    if (200..300).contains(&status) {
        Ok(HttpResponse { status, body })
    } else {
        Err(SessionError::from_status(status, &body))
    }
}

/// Non-blocking session backed by a shared, pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct AsyncSession {
    client: reqwest::Client,
    timeout: Duration,
}

impl AsyncSession {
    pub fn new(timeout: Duration) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .build()?;
        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl Session for AsyncSession {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SessionError> {
        let timeout = request.timeout.unwrap_or(self.timeout);
        let mut builder = self
            .client
            .request(request.method.into(), &request.url)
            .timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| classify(e, timeout))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| classify(e, timeout))?
            .to_vec();
        finish(status, body)
    }
}

/// Session backed by `reqwest::blocking`, run on tokio's blocking pool.
///
/// The blocking client owns an internal runtime, so it is built and dropped
/// on plain OS threads, never on an async worker.
pub struct BlockingSession {
    client: Option<reqwest::blocking::Client>,
    timeout: Duration,
}

impl fmt::Debug for BlockingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingSession")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl BlockingSession {
    pub fn new(timeout: Duration) -> Result<Self, SessionError> {
        let client = std::thread::spawn(|| reqwest::blocking::Client::builder().build())
            .join()
            .map_err(|_| SessionError::Blocking("client builder thread panicked".to_string()))??;
        Ok(Self {
            client: Some(client),
            timeout,
        })
    }
}

impl Drop for BlockingSession {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            std::thread::spawn(move || drop(client));
        }
    }
}

#[async_trait]
impl Session for BlockingSession {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SessionError> {
        let client = self
            .client
            .clone()
            .ok_or_else(|| SessionError::Blocking("session already closed".to_string()))?;
        let timeout = request.timeout.unwrap_or(self.timeout);

        tokio::task::spawn_blocking(move || {
            let mut builder = client
                .request(request.method.into(), &request.url)
                .timeout(timeout);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if !request.query.is_empty() {
                builder = builder.query(&request.query);
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().map_err(|e| classify(e, timeout))?;
            let status = response.status().as_u16();
            let body = response
                .bytes()
                .map_err(|e| classify(e, timeout))?
                .to_vec();
            finish(status, body)
        })
        .await
        .map_err(|e| SessionError::Blocking(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_string, header, method, path, query_param},
    };

    #[tokio::test]
    async fn test_async_session_sends_headers_query_and_json() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/items"))
            .and(query_param("view", "FULL"))
            .and(header("authorization", "Bearer abc"))
            .and(header("content-type", "application/json"))
            .and(body_string(r#"{"k":"v"}"#))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
            .expect(1)
            .mount(&mock_server)
            .await;

        let session = AsyncSession::new(DEFAULT_TIMEOUT).unwrap();
        let request = HttpRequest::post(format!("{}/v1/items", mock_server.uri()))
            .query("view", "FULL")
            .bearer("abc")
            .json(&serde_json::json!({"k": "v"}))
            .unwrap();

        let response = session.send(request).await.unwrap();
        let body: serde_json::Value = response.json().unwrap();
        assert_eq!(body["ok"], true);
    }

    #[tokio::test]
    async fn test_non_2xx_is_status_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("missing"))
            .mount(&mock_server)
            .await;

        let session = AsyncSession::new(DEFAULT_TIMEOUT).unwrap();
        let err = session
            .send(HttpRequest::get(mock_server.uri()))
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(404));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_request_timeout_is_reported() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&mock_server)
            .await;

        let session = AsyncSession::new(DEFAULT_TIMEOUT).unwrap();
        let err = session
            .send(HttpRequest::get(mock_server.uri()).timeout(Duration::from_millis(50)))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_form_body_is_url_encoded() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string("grant_type=refresh_token&client_id=a+b"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let session = AsyncSession::new(DEFAULT_TIMEOUT).unwrap();
        session
            .send(
                HttpRequest::post(mock_server.uri())
                    .form(&[("grant_type", "refresh_token"), ("client_id", "a b")]),
            )
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_session_round_trip() {
        let mock_server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/thing"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let session = build_session(SessionKind::Blocking, DEFAULT_TIMEOUT).unwrap();
        let response = session
            .send(HttpRequest::delete(format!("{}/thing", mock_server.uri())))
            .await
            .unwrap();
        assert_eq!(response.status, 204);
    }

    #[test]
    fn test_session_kind_from_str() {
        assert_eq!("async".parse::<SessionKind>(), Ok(SessionKind::Async));
        assert_eq!("Blocking".parse::<SessionKind>(), Ok(SessionKind::Blocking));
        assert!("threads".parse::<SessionKind>().is_err());
    }
}
