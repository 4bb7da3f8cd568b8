//! Tunnel providers for internet-mode sharing.
//!
//! Each provider exposes a locally bound port as a public URL by managing an
//! external process. New backends are added as new enum variants.

pub mod localtunnel;
pub mod ngrok;

use anyhow::Result;
use clap::ValueEnum;
use std::fmt;
use std::time::Duration;

pub(crate) const STARTUP_TIMEOUT: Duration = Duration::from_secs(15);

/// Closed set of supported tunnel backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TunnelProvider {
    Localtunnel,
    Ngrok,
}

impl fmt::Display for TunnelProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelProvider::Localtunnel => write!(f, "localtunnel"),
            TunnelProvider::Ngrok => write!(f, "ngrok"),
        }
    }
}

/// An established tunnel: public URL plus the resources backing it.
///
/// Lifetime is bounded by the share session: created after the listener is
/// bound, shut down no later than session close.
pub enum Tunnel {
    Localtunnel(localtunnel::LocaltunnelTunnel),
    Ngrok(ngrok::NgrokTunnel),
}

impl Tunnel {
    pub async fn start(provider: TunnelProvider, local_port: u16) -> Result<Self> {
        match provider {
            TunnelProvider::Localtunnel => localtunnel::LocaltunnelTunnel::start(local_port)
                .await
                .map(Tunnel::Localtunnel),
            TunnelProvider::Ngrok => ngrok::NgrokTunnel::start(local_port)
                .await
                .map(Tunnel::Ngrok),
        }
    }

    /// Externally reachable URL for the tunneled port.
    pub fn url(&self) -> &str {
        match self {
            Tunnel::Localtunnel(t) => t.url(),
            Tunnel::Ngrok(t) => t.url(),
        }
    }

    /// Releases provider resources. Safe to call once; must be awaited
    /// before process exit.
    pub async fn shutdown(&mut self) -> Result<()> {
        match self {
            Tunnel::Localtunnel(t) => t.shutdown().await,
            Tunnel::Ngrok(t) => t.shutdown().await,
        }
    }
}

/// Bounds any single step of tunnel startup.
pub(crate) async fn with_startup_timeout<F>(future: F) -> Result<F::Output, tokio::time::error::Elapsed>
where
    F: std::future::Future,
{
    tokio::time::timeout(STARTUP_TIMEOUT, future).await
}

/// Gracefully stops a managed tunnel process: kill, then bounded wait.
pub(crate) async fn shutdown_process(process: &mut tokio::process::Child) -> Result<()> {
    use anyhow::Context;

    if let Err(err) = process.kill().await {
        // A failed kill usually means the process is already dead.
        tracing::warn!("failed to signal tunnel process: {err}");
        return Ok(());
    }

    match tokio::time::timeout(Duration::from_secs(5), process.wait()).await {
        Ok(Ok(status)) => {
            tracing::info!("tunnel process exited with status: {status}");
            Ok(())
        }
        Ok(Err(err)) => Err(err).context("Failed to wait for tunnel process"),
        Err(_) => {
            tracing::warn!("tunnel process did not exit after 5 seconds, may be stuck");
            Ok(())
        }
    }
}
