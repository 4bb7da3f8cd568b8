//! Receive engine: download, metadata introspection, conflict resolution,
//! extraction, and the completion handshake.

use crate::configs::{ConfigDescriptor, ConfigKind};
use crate::manifest::{TransferManifest, MANIFEST_ENTRY_NAME};
use crate::output::{
    finish_spinner_error, finish_spinner_success, format_bytes, highlight, print_info, spinner,
};
use crate::receive::extract::extract_with_strategy;
use anyhow::{Context, Result};
use clap::ValueEnum;
use reqwest::{StatusCode, Url};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// How conflicting target directories are handled. Chosen once per receive
/// invocation and applied uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ConflictStrategy {
    /// Delete each conflicting directory, then extract.
    Overwrite,
    /// Keep existing files; only extract files that do not exist locally.
    Merge,
    /// Abort without touching the filesystem.
    Cancel,
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictStrategy::Overwrite => write!(f, "overwrite"),
            ConflictStrategy::Merge => write!(f, "merge"),
            ConflictStrategy::Cancel => write!(f, "cancel"),
        }
    }
}

pub struct ReceiveOptions {
    /// Skip the conflict prompt and overwrite.
    pub force: bool,
    /// Pre-selected strategy for non-interactive use; prompts when `None`
    /// and conflicts exist.
    pub strategy: Option<ConflictStrategy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyAction {
    Added,
    Replaced,
    Merged,
}

impl fmt::Display for ApplyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyAction::Added => write!(f, "added"),
            ApplyAction::Replaced => write!(f, "replaced"),
            ApplyAction::Merged => write!(f, "merged"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppliedConfig {
    pub kind: ConfigKind,
    pub label: &'static str,
    pub action: ApplyAction,
}

#[derive(Debug)]
pub enum ReceiveOutcome {
    Applied {
        configs: Vec<AppliedConfig>,
        bytes_received: u64,
    },
    /// Operator chose `cancel`; no filesystem mutation happened.
    Cancelled,
}

/// Network failures remapped to a fixed set of operator-facing causes.
#[derive(Debug, Error)]
pub enum NetworkFailure {
    #[error("Connection refused. Make sure the share server is running.")]
    Refused,
    #[error("Connection timed out. Check the URL and network connection.")]
    TimedOut,
    #[error("Host not found. Check the URL and network connection.")]
    HostNotFound,
    #[error("Connection was reset. The server may have closed unexpectedly.")]
    Reset,
    #[error("Network error: {0}")]
    Other(String),
}

/// Downloads a share, resolves conflicts, extracts, and confirms.
///
/// The temporary download file is removed on every exit path, success or
/// failure. Confirmation delivery is best-effort: the files are already
/// written, so a failed `/confirm` is only logged.
pub async fn receive(
    url: &str,
    destination: &Path,
    options: ReceiveOptions,
) -> Result<ReceiveOutcome> {
    let base = validate_share_url(url)?;

    print_info(&format!("Source: {}", highlight(base.as_str())));
    print_info(&format!("Destination: {}", highlight(&destination.display().to_string())));
    println!();

    let client = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .context("Failed to build HTTP client")?;

    let pb = spinner("Connecting to server...");
    let (download, bytes_received) = match download_archive(&client, &base).await {
        Ok(result) => result,
        Err(err) => {
            finish_spinner_error(&pb, "Download failed");
            return Err(err);
        }
    };
    finish_spinner_success(
        &pb,
        &format!("Downloaded {}", format_bytes(bytes_received)),
    );

    let manifest = read_manifest(download.path()).await?;
    let configs: Vec<ConfigDescriptor> = manifest
        .configs
        .iter()
        .map(|kind| ConfigDescriptor::resolve(*kind, destination))
        .collect();

    print_info("Configs in this share:");
    for config in &configs {
        let hint = if config.exists { " (exists)" } else { "" };
        println!("   - {} ({}){hint}", config.label, config.directory);
    }
    println!();

    let conflicts: Vec<&ConfigDescriptor> = configs.iter().filter(|c| c.exists).collect();

    let strategy = if conflicts.is_empty() || options.force {
        ConflictStrategy::Overwrite
    } else {
        match options.strategy {
            Some(strategy) => strategy,
            None => prompt_strategy(conflicts.len()).await?,
        }
    };

    if strategy == ConflictStrategy::Cancel {
        // Drop of `download` removes the temp file; nothing was written.
        return Ok(ReceiveOutcome::Cancelled);
    }

    let pb = spinner("Extracting configs...");
    if let Err(err) = extract_with_strategy(download.path(), destination, &configs, strategy).await
    {
        finish_spinner_error(&pb, "Extraction failed");
        return Err(err);
    }
    finish_spinner_success(&pb, "Configs extracted");

    confirm_transfer(&client, &base).await;

    let applied = configs
        .iter()
        .map(|config| AppliedConfig {
            kind: config.kind,
            label: config.label,
            action: if !config.exists {
                ApplyAction::Added
            } else if strategy == ConflictStrategy::Merge {
                ApplyAction::Merged
            } else {
                ApplyAction::Replaced
            },
        })
        .collect();

    Ok(ReceiveOutcome::Applied {
        configs: applied,
        bytes_received,
    })
}

/// Rejects anything but a well-formed http(s) URL before any network I/O.
/// Tunnel providers hand out https URLs, so both schemes are accepted.
fn validate_share_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).with_context(|| {
        format!("Invalid URL '{raw}'. Provide a share URL like http://192.168.1.15:8080")
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => anyhow::bail!(
            "Unsupported URL scheme '{other}'. Provide a share URL like http://192.168.1.15:8080"
        ),
    }
}

/// Temp file holding the downloaded archive. Removed on drop.
struct TempDownload {
    path: PathBuf,
}

impl TempDownload {
    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDownload {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to remove temp download");
        }
    }
}

async fn download_archive(client: &reqwest::Client, base: &Url) -> Result<(TempDownload, u64)> {
    let mut response = client
        .get(base.clone())
        .send()
        .await
        .map_err(map_network_error)?;

    anyhow::ensure!(
        response.status() == StatusCode::OK,
        "Server returned status {}",
        response.status()
    );

    let path = std::env::temp_dir().join(format!("cursor-kit-receive-{}.zip", Uuid::new_v4()));
    let mut file = tokio::fs::File::create(&path)
        .await
        .with_context(|| format!("Failed to create temp file {}", path.display()))?;
    // Guard created before the first write so every failure path cleans up.
    let download = TempDownload { path };

    let mut bytes_received = 0u64;
    while let Some(chunk) = response.chunk().await.map_err(map_network_error)? {
        file.write_all(&chunk)
            .await
            .context("Failed to write download to temp file")?;
        bytes_received += chunk.len() as u64;
    }
    file.flush().await.context("Failed to flush temp file")?;

    Ok((download, bytes_received))
}

/// Reads only the manifest entry, deciding what the archive contains before
/// committing to any filesystem writes.
async fn read_manifest(path: &Path) -> Result<TransferManifest> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open downloaded archive {}", path.display()))?;
        let mut zip = zip::ZipArchive::new(file)
            .context("This doesn't appear to be a valid cursor-kit share (not a zip archive)")?;
        let mut entry = zip.by_name(MANIFEST_ENTRY_NAME).map_err(|_| {
            anyhow::anyhow!("This doesn't appear to be a valid cursor-kit share: the metadata entry is missing")
        })?;
        let mut bytes = Vec::new();
        std::io::Read::read_to_end(&mut entry, &mut bytes)
            .context("Failed to read share metadata")?;
        TransferManifest::parse(&bytes)
    })
    .await
    .context("Metadata read task failed")?
}

/// Numbered stdin prompt for the conflict strategy. EOF (non-interactive
/// stdin) cancels rather than guessing.
async fn prompt_strategy(conflict_count: usize) -> Result<ConflictStrategy> {
    println!(
        "{conflict_count} existing config(s) found. How do you want to handle conflicts?"
    );
    println!("  (1) Overwrite - replace all conflicting files");
    println!("  (2) Merge - keep existing files, add new only");
    println!("  (3) Cancel - abort the operation");

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);

    loop {
        print!("> ");
        use std::io::Write;
        std::io::stdout().flush().ok();

        let mut input = String::new();
        let read = reader
            .read_line(&mut input)
            .await
            .context("Failed to read strategy choice")?;
        if read == 0 {
            return Ok(ConflictStrategy::Cancel);
        }

        match input.trim().to_lowercase().as_str() {
            "1" | "overwrite" => return Ok(ConflictStrategy::Overwrite),
            "2" | "merge" => return Ok(ConflictStrategy::Merge),
            "3" | "cancel" => return Ok(ConflictStrategy::Cancel),
            other => println!("Unrecognized choice '{other}', enter 1, 2, or 3."),
        }
    }
}

/// Best-effort completion handshake.
async fn confirm_transfer(client: &reqwest::Client, base: &Url) {
    let confirm_url = match base.join("confirm") {
        Ok(url) => url,
        Err(err) => {
            tracing::warn!("could not build confirm URL: {err}");
            return;
        }
    };

    match client.get(confirm_url).send().await {
        Ok(response) if response.status() == StatusCode::OK => {
            tracing::debug!("confirmation delivered");
        }
        Ok(response) => {
            tracing::warn!("confirmation returned status {}", response.status());
        }
        Err(err) => {
            tracing::warn!("failed to deliver confirmation: {err}");
        }
    }
}

fn map_network_error(err: reqwest::Error) -> anyhow::Error {
    let text = error_chain_text(&err);

    let failure = if err.is_timeout() || text.contains("timed out") {
        NetworkFailure::TimedOut
    } else if text.contains("refused") {
        NetworkFailure::Refused
    } else if text.contains("dns") || text.contains("failed to lookup") {
        NetworkFailure::HostNotFound
    } else if text.contains("reset") || text.contains("aborted") {
        NetworkFailure::Reset
    } else {
        NetworkFailure::Other(err.to_string())
    };

    anyhow::Error::new(failure)
}

fn error_chain_text(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = err.to_string().to_lowercase();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string().to_lowercase());
        source = cause.source();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_http_and_https_urls() {
        assert!(validate_share_url("http://192.168.1.15:8080").is_ok());
        assert!(validate_share_url("https://tame-owl-12.loca.lt").is_ok());
    }

    #[test]
    fn rejects_non_http_schemes_before_any_io() {
        let err = validate_share_url("ftp://192.168.1.15:8080").unwrap_err();
        assert!(err.to_string().contains("scheme"));
        assert!(validate_share_url("not a url").is_err());
    }

    #[test]
    fn temp_download_is_removed_on_drop() {
        let path = std::env::temp_dir().join(format!("cursor-kit-test-{}.zip", Uuid::new_v4()));
        std::fs::write(&path, b"zip bytes").unwrap();
        let download = TempDownload { path: path.clone() };
        assert!(path.exists());
        drop(download);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_manifest_entry_rejects_the_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-manifest.zip");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file(".cursor/settings.json", options).unwrap();
        std::io::Write::write_all(&mut writer, b"{}").unwrap();
        writer.finish().unwrap();

        let err = read_manifest(&path).await.unwrap_err();
        assert!(err.to_string().contains("metadata"));
    }

    #[tokio::test]
    async fn garbage_download_is_not_a_valid_share() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.zip");
        std::fs::write(&path, b"<html>404</html>").unwrap();

        let err = read_manifest(&path).await.unwrap_err();
        assert!(err.to_string().contains("valid cursor-kit share"));
    }
}
