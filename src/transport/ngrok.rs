//! ngrok subprocess management.
//!
//! The public URL is read from the local agent API rather than parsed out of
//! process output, which survives ngrok's log format changes.

use crate::transport::{shutdown_process, with_startup_timeout};
use anyhow::Result;
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tracing::warn;

const API_POLL_INTERVAL: Duration = Duration::from_millis(200);
const AGENT_API_URL: &str = "http://127.0.0.1:4040/api/tunnels";

#[derive(Deserialize)]
struct TunnelsResponse {
    tunnels: Vec<TunnelInfo>,
}

#[derive(Deserialize)]
struct TunnelInfo {
    public_url: String,
    config: TunnelConfig,
}

#[derive(Deserialize)]
struct TunnelConfig {
    addr: String,
}

/// Active ngrok process and resolved public URL.
pub struct NgrokTunnel {
    process: Child,
    url: String,
}

#[derive(Debug, Error)]
enum NgrokError {
    #[error("ngrok binary not found")]
    BinaryMissing,
    #[error("ngrok exited before URL became available (status: {0})")]
    ProcessExited(String),
    #[error("ngrok rejected the session: missing or invalid authtoken")]
    AuthTokenMissing,
    #[error("timed out waiting for ngrok tunnel URL")]
    UrlTimeout,
    #[error("ngrok startup failed: {0}")]
    StartupFailed(String),
}

fn map_start_error(err: NgrokError) -> anyhow::Error {
    match err {
        NgrokError::BinaryMissing => anyhow::anyhow!(
            "ngrok is not installed.\n\n\
             Install it from https://ngrok.com/download\n\n\
             Or use a different tunnel provider."
        ),
        NgrokError::AuthTokenMissing => anyhow::anyhow!(
            "ngrok requires an auth token.\n\n\
             Get one at https://dashboard.ngrok.com/get-started/your-authtoken\n\
             Then run: ngrok config add-authtoken <your-token>"
        ),
        NgrokError::ProcessExited(status) => anyhow::anyhow!(
            "ngrok exited before the tunnel URL became available (status: {status}).\n\n\
             If you have not configured an authtoken, run:\n\
             ngrok config add-authtoken <your-token>\n\n\
             Or use a different tunnel provider."
        ),
        NgrokError::UrlTimeout => anyhow::anyhow!(
            "Timed out waiting for the ngrok tunnel URL.\n\n\
             Check your internet connection and firewall settings, then try again.\n\n\
             Or use a different tunnel provider."
        ),
        NgrokError::StartupFailed(msg) => anyhow::anyhow!(
            "Failed to start ngrok: {msg}\n\n\
             Or use a different tunnel provider."
        ),
    }
}

impl NgrokTunnel {
    #[tracing::instrument(fields(local_port))]
    pub async fn start(local_port: u16) -> Result<Self> {
        Self::start_once(local_port).await.map_err(map_start_error)
    }

    async fn start_once(local_port: u16) -> std::result::Result<Self, NgrokError> {
        let mut child = Command::new("ngrok")
            .args(["http", &local_port.to_string(), "--log", "stderr"])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    NgrokError::BinaryMissing
                } else {
                    NgrokError::StartupFailed(err.to_string())
                }
            })?;

        // Watch the log stream for the authtoken rejection; everything else
        // is just forwarded for debugging.
        let (auth_failure_tx, mut auth_failure_rx) = tokio::sync::oneshot::channel();
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(watch_stderr(stderr, auth_failure_tx));
        }

        let url = tokio::select! {
            result = with_startup_timeout(wait_for_url(local_port, &mut child)) => match result {
                Ok(Ok(url)) => url,
                Ok(Err(err)) => {
                    if let Err(kill_err) = child.kill().await {
                        warn!("failed to kill ngrok process after startup failure: {kill_err}");
                    }
                    return Err(err);
                }
                Err(_) => {
                    if let Err(kill_err) = child.kill().await {
                        warn!("failed to kill ngrok process after startup timeout: {kill_err}");
                    }
                    return Err(NgrokError::UrlTimeout);
                }
            },
            _ = &mut auth_failure_rx => {
                if let Err(kill_err) = child.kill().await {
                    warn!("failed to kill ngrok process after auth failure: {kill_err}");
                }
                return Err(NgrokError::AuthTokenMissing);
            }
        };

        Ok(Self {
            process: child,
            url,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        shutdown_process(&mut self.process).await
    }
}

async fn wait_for_url(
    local_port: u16,
    child: &mut Child,
) -> std::result::Result<String, NgrokError> {
    let client = reqwest::Client::new();
    let local_suffix = format!(":{local_port}");

    loop {
        if let Some(status) = child
            .try_wait()
            .map_err(|err| NgrokError::StartupFailed(err.to_string()))?
        {
            return Err(NgrokError::ProcessExited(status.to_string()));
        }

        // Errors are expected while the agent API is still coming up.
        if let Ok(res) = client.get(AGENT_API_URL).send().await {
            if let Ok(json) = res.json::<TunnelsResponse>().await {
                if let Some(url) = pick_tunnel_url(&json, &local_suffix) {
                    return Ok(url);
                }
            }
        }

        tokio::time::sleep(API_POLL_INTERVAL).await;
    }
}

/// Picks the tunnel forwarding to our port; a lingering agent can report
/// tunnels from other sessions.
fn pick_tunnel_url(response: &TunnelsResponse, local_suffix: &str) -> Option<String> {
    response
        .tunnels
        .iter()
        .find(|t| t.config.addr.ends_with(local_suffix) && !t.public_url.is_empty())
        .map(|t| t.public_url.clone())
}

async fn watch_stderr(stderr: ChildStderr, auth_failure: tokio::sync::oneshot::Sender<()>) {
    let mut lines = BufReader::new(stderr).lines();
    let mut auth_failure = Some(auth_failure);

    while let Some(line) = lines.next_line().await.ok().flatten() {
        let lowercase = line.to_lowercase();
        if lowercase.contains("authtoken") || lowercase.contains("err_ngrok_4018") {
            if let Some(tx) = auth_failure.take() {
                let _ = tx.send(());
            }
        }
        if lowercase.contains("error") || lowercase.contains("fatal") {
            tracing::error!("ngrok stderr: {line}");
        }
    }
}
