use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gcloud_aio::auth::{CredentialSource, Token, TokenConfig, TokenProvider};
use gcloud_aio::core::{SessionKind, build_session};
use gcloud_aio::pubsub::{
    HandlerError, SubscriberClient, handler_fn, subscribe, subscription_path,
};
use gcloud_aio::taskqueue::{TaskManager, TaskQueue, worker_fn};
use gcloud_aio::{SubscriberConfig, TaskManagerConfig};

const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const PUBSUB_SCOPE: &str = "https://www.googleapis.com/auth/pubsub";
const CLOUD_TASKS_SCOPE: &str = "https://www.googleapis.com/auth/cloud-tasks";
const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

const USAGE: &str = "Usage: gcloud-aio [--session async|blocking] [--credentials <path>] <command>

Commands:
  token                                  Print an access token
  subscribe <subscription>               Log messages from a Pub/Sub subscription
  taskqueue <project> <location> <queue> Log payloads leased from a pull queue";

struct Options {
    session: SessionKind,
    credentials: CredentialSource,
    command: Vec<String>,
}

fn parse_args() -> anyhow::Result<Options> {
    let mut session = SessionKind::default();
    let mut credentials = CredentialSource::Discover;
    let mut command = Vec::new();

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--session" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("--session requires a value (async or blocking)"))?;
                session = value.parse().map_err(|e: String| anyhow!(e))?;
            }
            "--credentials" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("--credentials requires a file path"))?;
                credentials = CredentialSource::from_setting(&value);
            }
            "-h" | "--help" => {
                println!("{USAGE}");
                std::process::exit(0);
            }
            _ => command.push(arg),
        }
    }

    Ok(Options {
        session,
        credentials,
        command,
    })
}

/// Cancelled on Ctrl+C
fn shutdown_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }
        info!("Shutdown requested");
        trigger.cancel();
    });
    token
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = parse_args()?;
    let session = build_session(options.session, HTTP_TIMEOUT)?;
    let args: Vec<&str> = options.command.iter().map(String::as_str).collect();

    match args.as_slice() {
        ["token"] => {
            let token = Token::new(
                &options.credentials,
                session,
                TokenConfig::default().with_scopes([CLOUD_PLATFORM_SCOPE]),
            )?;
            println!("{}", token.get().await?);
        }
        ["subscribe", subscription] => {
            let config = SubscriberConfig::from_env()?;
            let token = Token::new(
                &options.credentials,
                session.clone(),
                TokenConfig::default().with_scopes([PUBSUB_SCOPE]),
            )?;

            let subscription = if subscription.starts_with("projects/") {
                subscription.to_string()
            } else {
                let project = token
                    .get_project()
                    .await?
                    .context("No project configured; pass a full subscription path")?;
                subscription_path(&project, subscription)
            };

            let client = SubscriberClient::new(session, Arc::new(token));

            let handler = handler_fn(|message| async move {
                info!(
                    message_id = %message.message_id,
                    bytes = message.data.len(),
                    "Received message"
                );
                Ok::<(), HandlerError>(())
            });

            subscribe(
                subscription,
                Arc::new(client),
                Arc::new(handler),
                config,
                shutdown_signal(),
            )
            .await?;
        }
        ["taskqueue", project, location, queue] => {
            let config = TaskManagerConfig::from_env()?;
            let token: Arc<dyn TokenProvider> = Arc::new(Token::new(
                &options.credentials,
                session.clone(),
                TokenConfig::default().with_scopes([CLOUD_TASKS_SCOPE]),
            )?);

            let queue = TaskQueue::new(session, token, project, location, queue);
            let worker = worker_fn(|payload| {
                info!(%payload, "Processing task");
                Ok(())
            });

            let manager = TaskManager::new(Arc::new(queue), Arc::new(worker), config)?;
            manager.run(shutdown_signal()).await?;
        }
        [] => {
            println!("{USAGE}");
        }
        other => {
            anyhow::bail!("Unknown command '{}'.\n\n{USAGE}", other.join(" "));
        }
    }

    Ok(())
}
