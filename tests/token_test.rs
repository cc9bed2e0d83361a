use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use serial_test::serial;
use tempfile::TempDir;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_string_contains, header, method, path},
};

use gcloud_aio::AuthError;
use gcloud_aio::auth::{CredentialKind, CredentialSource, Token, TokenConfig, TokenProvider};
use gcloud_aio::core::{AsyncSession, Session};

const TEST_RSA_PRIVATE_KEY: &str = include_str!("fixtures/test_rsa_key.pem");

fn clear_env() {
    unsafe {
        env::remove_var("GOOGLE_APPLICATION_CREDENTIALS");
        env::remove_var("CLOUDSDK_CONFIG");
        env::remove_var("GOOGLE_CLOUD_PROJECT");
        env::remove_var("GCLOUD_PROJECT");
        env::remove_var("APPLICATION_ID");
    }
}

fn session() -> Arc<dyn Session> {
    Arc::new(AsyncSession::new(Duration::from_secs(5)).unwrap())
}

fn config(server: &MockServer) -> TokenConfig {
    TokenConfig {
        retry_factor: 0.001,
        retry_max_value: 0.01,
        metadata_base_url: format!("{}/computeMetadata/v1", server.uri()),
        ..TokenConfig::default()
    }
}

fn write_json(dir: &Path, name: &str, value: serde_json::Value) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, value.to_string()).unwrap();
    path
}

async fn mount_token_endpoint(server: &MockServer, grant: &str, access_token: &str) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains(grant))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": access_token, "expires_in": 3600})),
        )
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
#[serial]
async fn test_env_var_credentials_drive_refresh_grant() {
    clear_env();
    let server = MockServer::start().await;
    mount_token_endpoint(&server, "grant_type=refresh_token", "ya29.from-env").await;

    let dir = TempDir::new().unwrap();
    let file = write_json(
        dir.path(),
        "user.json",
        json!({
            "type": "authorized_user",
            "client_id": "client",
            "client_secret": "secret",
            "refresh_token": "refresh",
            "quota_project_id": "quota-project",
            "token_uri": format!("{}/token", server.uri())
        }),
    );
    unsafe {
        env::set_var("GOOGLE_APPLICATION_CREDENTIALS", &file);
    }

    let token = Token::new(&CredentialSource::Discover, session(), config(&server)).unwrap();
    assert_eq!(token.kind(), CredentialKind::AuthorizedUser);
    assert_eq!(token.get_token().await.unwrap(), "ya29.from-env");
    assert_eq!(
        token.get_project().await.unwrap().as_deref(),
        Some("quota-project")
    );

    clear_env();
}

#[tokio::test]
#[serial]
async fn test_explicit_service_account_file() {
    clear_env();
    let server = MockServer::start().await;
    mount_token_endpoint(
        &server,
        "grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer",
        "ya29.service",
    )
    .await;

    let dir = TempDir::new().unwrap();
    let file = write_json(
        dir.path(),
        "sa.json",
        json!({
            "type": "service_account",
            "project_id": "sa-project",
            "private_key_id": "key-1",
            "private_key": TEST_RSA_PRIVATE_KEY,
            "client_email": "worker@sa-project.iam.gserviceaccount.com",
            "token_uri": format!("{}/token", server.uri())
        }),
    );

    let token = Token::new(
        &CredentialSource::FilePath(file),
        session(),
        config(&server).with_scopes(["https://www.googleapis.com/auth/pubsub"]),
    )
    .unwrap();

    assert_eq!(token.kind(), CredentialKind::ServiceAccount);
    assert_eq!(token.get().await.unwrap(), "ya29.service");
    assert_eq!(token.get_project().await.unwrap().as_deref(), Some("sa-project"));
}

#[tokio::test]
#[serial]
async fn test_no_credentials_fall_back_to_metadata() {
    clear_env();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(
            "/computeMetadata/v1/instance/service-accounts/default/token",
        ))
        .and(header("metadata-flavor", "Google"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "ya29.gce", "expires_in": 3599})),
        )
        .expect(1)
        .mount(&server)
        .await;

    // An empty SDK config directory has no default credentials
    let sdk_dir = TempDir::new().unwrap();
    unsafe {
        env::set_var("CLOUDSDK_CONFIG", sdk_dir.path());
    }

    let token = Token::new(&CredentialSource::Discover, session(), config(&server)).unwrap();
    assert_eq!(token.kind(), CredentialKind::GceMetadata);
    assert_eq!(token.get().await.unwrap(), "ya29.gce");

    clear_env();
}

#[tokio::test]
#[serial]
async fn test_missing_explicit_file_is_an_error() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.json");

    let err = Token::new(
        &CredentialSource::FilePath(missing),
        session(),
        TokenConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, AuthError::CredentialFile { .. }));
}

#[tokio::test]
#[serial]
async fn test_service_account_requires_scopes() {
    clear_env();
    let dir = TempDir::new().unwrap();
    let file = write_json(
        dir.path(),
        "sa.json",
        json!({
            "type": "service_account",
            "private_key": TEST_RSA_PRIVATE_KEY,
            "client_email": "worker@example.iam.gserviceaccount.com"
        }),
    );

    let err = Token::new(
        &CredentialSource::FilePath(file),
        session(),
        TokenConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, AuthError::MissingScopes));
}
