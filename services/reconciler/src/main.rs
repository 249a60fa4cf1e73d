//! azvnet Reconciler
//!
//! Reads requests as newline-delimited JSON on stdin, one
//! `{"subject": ..., "body": ...}` object per line, and writes exactly one
//! response line of the same shape to stdout for each of them.
//!
//! ## Architecture
//!
//! - **Reader**: Parses request lines and spawns one task per request
//! - **Handler**: Decodes, validates and dispatches to a resource reconciler
//! - **Writer**: Serializes response lines onto stdout

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use azvnet_events::{error_subject, NetworkEvent};
use azvnet_reconciler::{
    config::{Backend, Config},
    credentials::{AzureIdentity, CredentialResolver},
    handler::{Handler, Response},
    provider::{ArmProviderFactory, InMemoryIdentity, InMemoryProvider, ProviderFactory},
    resources::ResourceRegistry,
};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Deserialize)]
struct Request {
    subject: String,
    #[serde(default)]
    body: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct Reply {
    subject: String,
    body: serde_json::Value,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to AZVNET_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    info!("Starting azvnet reconciler");
    info!(
        backend = ?config.backend,
        arm_endpoint = %config.arm_endpoint,
        encrypted_credentials = !config.crypto_key.is_empty(),
        "Configuration loaded"
    );

    let handler = build_handler(&config)?;

    let (out_tx, out_rx) = mpsc::channel::<String>(256);
    let writer = tokio::spawn(write_replies(out_rx));

    let mut input = BufReader::new(tokio::io::stdin());
    let mut buf = Vec::new();
    let mut requests = JoinSet::new();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Received shutdown signal");
                break;
            }
            read = input.read_until(b'\n', &mut buf) => {
                match read {
                    Ok(0) if buf.is_empty() => {
                        info!("Input closed");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "Failed to read input");
                        break;
                    }
                }

                // a cancelled read leaves its partial line in `buf`
                let raw = std::mem::take(&mut buf);
                let Some(request) = parse_request(&raw) else {
                    continue;
                };

                let handler = handler.clone();
                let out_tx = out_tx.clone();
                let timeout = config.request_timeout;
                requests.spawn(async move {
                    let response = serve(&handler, request, timeout).await;
                    match reply_line(response) {
                        Ok(line) => {
                            if out_tx.send(line).await.is_err() {
                                error!("Response writer is gone");
                            }
                        }
                        Err(e) => error!(error = %e, "Failed to serialize response"),
                    }
                });
            }
            Some(joined) = requests.join_next(), if !requests.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "Request task panicked");
                }
            }
        }
    }

    // Let in-flight requests finish
    info!(in_flight = requests.len(), "Waiting for requests to finish...");
    let drain = async { while requests.join_next().await.is_some() {} };
    if tokio::time::timeout(config.request_timeout, drain).await.is_err() {
        warn!("Requests did not finish in time");
    }
    requests.shutdown().await;

    drop(out_tx);
    match writer.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Response writer failed"),
        Err(e) => error!(error = %e, "Response writer panicked"),
    }

    info!("Reconciler shutdown complete");
    Ok(())
}

fn build_handler(config: &Config) -> Result<Handler> {
    let (resolver, providers): (CredentialResolver, Arc<dyn ProviderFactory>) =
        match config.backend {
            Backend::Arm => (
                CredentialResolver::new(Arc::new(AzureIdentity::new(
                    config.authority_host.clone(),
                    config.arm_endpoint.clone(),
                )?)),
                Arc::new(ArmProviderFactory::new(config.arm_endpoint.clone())?),
            ),
            Backend::Memory => {
                warn!("Using in-memory provider (dev mode)");
                (
                    CredentialResolver::new(Arc::new(InMemoryIdentity::new())),
                    Arc::new(InMemoryProvider::new()),
                )
            }
        };

    let registry = ResourceRegistry::with_defaults(providers, config.poll_policy());
    Ok(Handler::new(resolver, registry, config.crypto_key.clone())
        .with_unknown_actions(config.unknown_actions))
}

/// Parse one raw input line. Blank and unreadable lines yield `None`.
fn parse_request(raw: &[u8]) -> Option<Request> {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line.trim(),
        Err(e) => {
            warn!(error = %e, "Dropping request line that is not UTF-8");
            return None;
        }
    };
    if line.is_empty() {
        return None;
    }

    match serde_json::from_str(line) {
        Ok(request) => Some(request),
        Err(e) => {
            warn!(error = %e, "Dropping unreadable request line");
            None
        }
    }
}

/// Handle one request, bounded by `timeout`.
async fn serve(handler: &Handler, request: Request, timeout: Duration) -> Response {
    let body = request.body.to_string().into_bytes();

    match tokio::time::timeout(timeout, handler.handle(&request.subject, &body)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(subject = %request.subject, ?timeout, "Request timed out");
            let mut event = NetworkEvent::decode(&request.subject, &body, "")
                .unwrap_or_else(|_| NetworkEvent::empty(request.subject.as_str(), ""));
            event.fail(format!("request timed out after {timeout:?}"));
            Response {
                subject: error_subject(&request.subject),
                body: event.encode().unwrap_or_default(),
            }
        }
    }
}

fn reply_line(response: Response) -> serde_json::Result<String> {
    let body = serde_json::from_slice(&response.body)?;
    serde_json::to_string(&Reply {
        subject: response.subject,
        body,
    })
}

async fn write_replies(mut replies: mpsc::Receiver<String>) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(line) = replies.recv().await {
        stdout.write_all(line.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }
    Ok(())
}
