//! Share session lifecycle: port selection, server and tunnel startup, the
//! confirmation wait, and teardown.

use crate::configs::ConfigDescriptor;
use crate::output::{
    finish_spinner_error, finish_spinner_success, highlight, print_divider, print_info,
    print_success, spinner,
};
use crate::share::routes::{create_share_router, ShareState};
use crate::share::session::{Phase, TransferSession};
use crate::transport::{Tunnel, TunnelProvider};
use anyhow::{Context, Result};
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

/// Bounded retry budget for "port in use" failures.
const PORT_RETRY_BUDGET: u16 = 10;

/// How long the session waits for `/confirm` after the stream finishes
/// before assuming the transfer succeeded.
pub const CONFIRM_TIMEOUT: Duration = Duration::from_secs(30);

/// How a share session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareOutcome {
    /// Receiver called `/confirm`.
    Confirmed,
    /// Confirmation window elapsed after a finished stream.
    ConfirmedAssumed,
    /// Operator interrupted before completion.
    Interrupted,
    /// Archive build or stream I/O failed.
    Failed,
}

pub struct ShareOptions {
    pub requested_port: u16,
    /// `None` serves the LAN directly; `Some` exposes the port via a tunnel.
    pub provider: Option<TunnelProvider>,
}

/// Binds a listener on `requested_port`, retrying consecutive ports on
/// "address in use" up to the retry budget.
pub fn bind_with_retries(requested_port: u16, loopback: bool) -> Result<TcpListener> {
    let host = if loopback { [127, 0, 0, 1] } else { [0, 0, 0, 0] };
    for offset in 0..PORT_RETRY_BUDGET {
        let Some(port) = requested_port.checked_add(offset) else {
            break;
        };
        let addr = SocketAddr::from((host, port));
        match TcpListener::bind(addr) {
            Ok(listener) => {
                if offset > 0 {
                    tracing::info!("port {requested_port} busy, bound {port} instead");
                }
                return Ok(listener);
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => continue,
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to bind port {port}"));
            }
        }
    }
    anyhow::bail!(
        "Could not find an available port after {PORT_RETRY_BUDGET} attempts starting at {requested_port}"
    )
}

/// Best-effort local non-loopback IP discovery for the share URL.
pub fn get_local_ip() -> Result<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").context("Failed to bind socket for IP detection")?;
    socket
        .connect("8.8.8.8:80")
        .context("Failed to connect socket for IP detection")?;
    let local_addr = socket.local_addr().context("Failed to get local address")?;
    Ok(local_addr.ip().to_string())
}

/// Starts the listener (and tunnel, if requested), serves exactly one
/// transfer, and tears everything down.
pub async fn start_share(selected: Vec<ConfigDescriptor>, options: ShareOptions) -> Result<ShareOutcome> {
    anyhow::ensure!(!selected.is_empty(), "No configs selected to share");

    // Tunnel mode serves loopback only; the tunnel is the public face.
    let listener = bind_with_retries(options.requested_port, options.provider.is_some())?;
    listener
        .set_nonblocking(true)
        .context("Failed to set listener to non-blocking mode")?;
    let port = listener.local_addr()?.port();

    let session = Arc::new(TransferSession::new());
    let state = ShareState::new(session.clone(), selected.clone());
    let app = create_share_router(state);

    let server_handle = axum_server::Handle::new();
    let serve_handle = server_handle.clone();
    tokio::spawn(async move {
        if let Err(err) = axum_server::from_tcp(listener)
            .handle(serve_handle)
            .serve(app.into_make_service())
            .await
        {
            tracing::error!("share server error: {err}");
        }
    });

    let mut tunnel = None;
    let share_url = match options.provider {
        Some(provider) => {
            let pb = spinner(&format!("Starting {provider} tunnel..."));
            match Tunnel::start(provider, port).await {
                Ok(t) => {
                    finish_spinner_success(&pb, "Tunnel established");
                    let url = t.url().trim_end_matches('/').to_string();
                    tunnel = Some(t);
                    url
                }
                Err(err) => {
                    finish_spinner_error(&pb, "Failed to establish tunnel");
                    server_handle.shutdown();
                    return Err(err);
                }
            }
        }
        None => {
            let local_ip = get_local_ip().unwrap_or_else(|_| "127.0.0.1".to_string());
            format!("http://{local_ip}:{port}")
        }
    };

    print_banner(&selected, &share_url, port);

    let outcome = run_session_loop(session.clone(), CONFIRM_TIMEOUT).await;
    session.close();

    if let Some(tunnel) = tunnel.as_mut() {
        if let Err(err) = tunnel.shutdown().await {
            tracing::warn!("tunnel shutdown failed: {err:#}");
        }
    }
    server_handle.shutdown();

    report_outcome(outcome);
    Ok(outcome)
}

/// Drives the session to a terminal phase. The confirmation timer only runs
/// while the session is awaiting confirmation; Ctrl-C unblocks every wait.
pub async fn run_session_loop(
    session: Arc<TransferSession>,
    confirm_timeout: Duration,
) -> ShareOutcome {
    let mut phase_rx = session.subscribe();
    loop {
        let phase = *phase_rx.borrow_and_update();
        match phase {
            Phase::Confirmed { assumed: false } => return ShareOutcome::Confirmed,
            Phase::Confirmed { assumed: true } => return ShareOutcome::ConfirmedAssumed,
            Phase::Failed => return ShareOutcome::Failed,
            Phase::Closed => return ShareOutcome::Interrupted,
            Phase::AwaitingConfirmation => {
                tokio::select! {
                    changed = phase_rx.changed() => {
                        if changed.is_err() {
                            return ShareOutcome::Failed;
                        }
                    }
                    () = tokio::time::sleep(confirm_timeout) => {
                        session.timeout_fired();
                    }
                    _ = tokio::signal::ctrl_c() => {
                        session.interrupt_requested();
                    }
                }
            }
            Phase::Listening | Phase::Sending => {
                tokio::select! {
                    changed = phase_rx.changed() => {
                        if changed.is_err() {
                            return ShareOutcome::Failed;
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        session.interrupt_requested();
                    }
                }
            }
        }
    }
}

fn print_banner(selected: &[ConfigDescriptor], share_url: &str, port: u16) {
    println!();
    print_divider();
    print_info("Sharing configs:");
    for config in selected {
        println!("   - {} ({})", config.label, config.directory);
    }
    println!();
    print_info(&format!("Port: {}", highlight(&port.to_string())));
    print_info(&format!("URL:  {}", highlight(share_url)));
    println!();
    println!("  Run this command on the receiving machine:");
    println!();
    println!("  $ cursor-kit receive {share_url}");
    println!();
    print_divider();
    print_info("Waiting for connection... (Press Ctrl+C to cancel)");
}

fn report_outcome(outcome: ShareOutcome) {
    println!();
    match outcome {
        ShareOutcome::Confirmed => print_success("Transfer complete, confirmed by receiver."),
        ShareOutcome::ConfirmedAssumed => {
            print_success("Transfer complete (no confirmation received, assuming success).")
        }
        ShareOutcome::Interrupted => print_info("Server stopped."),
        ShareOutcome::Failed => {}
    }
}
