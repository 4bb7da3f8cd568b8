//! localtunnel (`lt`) subprocess management.

use crate::transport::{shutdown_process, with_startup_timeout};
use anyhow::Result;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::warn;

/// Active localtunnel process and resolved public URL.
pub struct LocaltunnelTunnel {
    process: Child,
    url: String,
}

#[derive(Debug, Error)]
enum LocaltunnelError {
    #[error("lt binary not found")]
    BinaryMissing,
    #[error("lt exited before URL became available (status: {0})")]
    ProcessExited(String),
    #[error("timed out waiting for localtunnel URL")]
    UrlTimeout,
    #[error("localtunnel startup failed: {0}")]
    StartupFailed(String),
}

fn map_start_error(err: LocaltunnelError) -> anyhow::Error {
    match err {
        LocaltunnelError::BinaryMissing => anyhow::anyhow!(
            "localtunnel is not installed.\n\n\
             Install it with: npm install -g localtunnel\n\n\
             Or use a different tunnel provider."
        ),
        LocaltunnelError::ProcessExited(status) => anyhow::anyhow!(
            "lt exited before the tunnel URL became available (status: {status}).\n\n\
             Try again, or use a different tunnel provider."
        ),
        LocaltunnelError::UrlTimeout => anyhow::anyhow!(
            "Timed out waiting for the localtunnel URL.\n\n\
             This may indicate a network issue or a localtunnel outage.\n\
             Check your internet connection, then try again.\n\n\
             Or use a different tunnel provider."
        ),
        LocaltunnelError::StartupFailed(msg) => anyhow::anyhow!(
            "Failed to start localtunnel: {msg}\n\n\
             Or use a different tunnel provider."
        ),
    }
}

impl LocaltunnelTunnel {
    #[tracing::instrument(fields(local_port))]
    pub async fn start(local_port: u16) -> Result<Self> {
        Self::start_once(local_port).await.map_err(map_start_error)
    }

    async fn start_once(local_port: u16) -> std::result::Result<Self, LocaltunnelError> {
        let mut child = Command::new("lt")
            .args(["--port", &local_port.to_string()])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    LocaltunnelError::BinaryMissing
                } else {
                    LocaltunnelError::StartupFailed(err.to_string())
                }
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LocaltunnelError::StartupFailed("no stdout pipe".to_string()))?;

        let url = match with_startup_timeout(wait_for_url(stdout, &mut child)).await {
            Ok(Ok(url)) => url,
            Ok(Err(err)) => {
                if let Err(kill_err) = child.kill().await {
                    warn!("failed to kill lt process after startup failure: {kill_err}");
                }
                return Err(err);
            }
            Err(_) => {
                if let Err(kill_err) = child.kill().await {
                    warn!("failed to kill lt process after startup timeout: {kill_err}");
                }
                return Err(LocaltunnelError::UrlTimeout);
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

// lt announces the tunnel on stdout as "your url is: https://<subdomain>.loca.lt".
async fn wait_for_url(
    stdout: ChildStdout,
    child: &mut Child,
) -> std::result::Result<String, LocaltunnelError> {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(url) = parse_url_line(&line) {
                    return Ok(url.to_string());
                }
            }
            Ok(None) => {
                // stdout closed: the process is exiting.
                let status = match child.wait().await {
                    Ok(status) => status.to_string(),
                    Err(err) => format!("unknown ({err})"),
                };
                return Err(LocaltunnelError::ProcessExited(status));
            }
            Err(err) => return Err(LocaltunnelError::StartupFailed(err.to_string())),
        }
    }
}

fn parse_url_line(line: &str) -> Option<&str> {
    line.trim()
        .strip_prefix("your url is: ")
        .map(str::trim)
        .filter(|url| url.starts_with("http"))
}
