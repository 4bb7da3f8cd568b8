//! Builds the share archive: one manifest entry first, then the recursive
//! contents of each selected config directory under its fixed name.

use crate::configs::ConfigDescriptor;
use crate::manifest::{TransferManifest, MANIFEST_ENTRY_NAME};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

/// Moderate deflate level: transfers are network-bound, so maximum
/// compression buys little for its CPU cost.
const COMPRESSION_LEVEL: i64 = 6;

/// Temp file holding one built archive. Removed on drop.
#[derive(Debug)]
pub struct TempArchive {
    path: PathBuf,
}

impl TempArchive {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempArchive {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to remove temp share archive");
        }
    }
}

/// Builds a zip archive for the selected configs in a blocking task.
///
/// The manifest entry is always written first so the receive side can learn
/// what the archive contains without scanning past the first entry. Any
/// enumeration or read failure is a build error; the caller must treat it as
/// fatal to the in-flight transfer since partial output cannot be retracted.
pub async fn build_share_archive(selected: &[ConfigDescriptor]) -> Result<TempArchive> {
    anyhow::ensure!(!selected.is_empty(), "No configs selected for the share archive");

    let archive_path = std::env::temp_dir().join(format!("cursor-kit-share-{}.zip", Uuid::new_v4()));
    let archive = TempArchive {
        path: archive_path.clone(),
    };

    let configs = selected.to_vec();
    tokio::task::spawn_blocking(move || write_archive(&archive_path, &configs))
        .await
        .context("Archive build task failed")??;

    Ok(archive)
}

fn write_archive(archive_path: &Path, configs: &[ConfigDescriptor]) -> Result<()> {
    let file = File::create(archive_path)
        .with_context(|| format!("Failed to create archive {}", archive_path.display()))?;
    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .compression_level(Some(COMPRESSION_LEVEL));

    let manifest = TransferManifest::new(configs.iter().map(|c| c.kind).collect());
    writer
        .start_file(MANIFEST_ENTRY_NAME, options)
        .context("Failed to start manifest entry")?;
    writer
        .write_all(manifest.to_json()?.as_bytes())
        .context("Failed to write manifest entry")?;

    for config in configs {
        add_directory_tree(&mut writer, config, options)?;
    }

    writer.finish().context("Failed to finalize share archive")?;
    Ok(())
}

fn add_directory_tree(
    writer: &mut zip::ZipWriter<File>,
    config: &ConfigDescriptor,
    options: SimpleFileOptions,
) -> Result<()> {
    for entry in WalkDir::new(&config.path) {
        let entry = entry.with_context(|| {
            format!("Failed to enumerate {} ({})", config.label, config.path.display())
        })?;

        let rel = entry
            .path()
            .strip_prefix(&config.path)
            .unwrap_or(entry.path());
        let name = Path::new(config.directory)
            .join(rel)
            .to_string_lossy()
            .replace('\\', "/");

        if entry.file_type().is_dir() {
            writer
                .add_directory(name.as_str(), options)
                .with_context(|| format!("Failed to add directory entry {name}"))?;
        } else if entry.file_type().is_file() {
            let mut source = File::open(entry.path())
                .with_context(|| format!("Failed to open {}", entry.path().display()))?;
            writer
                .start_file(name.as_str(), options)
                .with_context(|| format!("Failed to start archive entry {name}"))?;
            io::copy(&mut source, writer)
                .with_context(|| format!("Failed to add {} to archive", entry.path().display()))?;
        }
        // Symlinks and other special files are not carried by config shares.
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::ConfigKind;
    use std::fs;

    fn cursor_fixture() -> (tempfile::TempDir, ConfigDescriptor) {
        let dir = tempfile::tempdir().unwrap();
        let cursor = dir.path().join(".cursor");
        fs::create_dir_all(cursor.join("rules")).unwrap();
        fs::write(cursor.join("rules").join("style.mdc"), b"be terse").unwrap();
        fs::write(cursor.join("settings.json"), b"{}").unwrap();
        let desc = ConfigDescriptor::resolve(ConfigKind::Cursor, dir.path());
        (dir, desc)
    }

    #[tokio::test]
    async fn manifest_is_the_first_entry() {
        let (_dir, desc) = cursor_fixture();
        let archive = build_share_archive(&[desc]).await.unwrap();

        let file = File::open(archive.path()).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        let first = zip.by_index(0).unwrap();
        assert_eq!(first.name(), MANIFEST_ENTRY_NAME);
    }

    #[tokio::test]
    async fn manifest_round_trips_through_reader() {
        let (_dir, desc) = cursor_fixture();
        let archive = build_share_archive(&[desc]).await.unwrap();

        let file = File::open(archive.path()).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        let mut entry = zip.by_name(MANIFEST_ENTRY_NAME).unwrap();
        let mut bytes = Vec::new();
        io::Read::read_to_end(&mut entry, &mut bytes).unwrap();

        let manifest = TransferManifest::parse(&bytes).unwrap();
        assert_eq!(manifest.configs, vec![ConfigKind::Cursor]);
    }

    #[tokio::test]
    async fn archive_places_files_under_config_directory() {
        let (_dir, desc) = cursor_fixture();
        let archive = build_share_archive(&[desc]).await.unwrap();

        let file = File::open(archive.path()).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        assert!(zip.by_name(".cursor/rules/style.mdc").is_ok());
        assert!(zip.by_name(".cursor/settings.json").is_ok());
    }

    #[tokio::test]
    async fn vanished_source_directory_is_a_build_error() {
        let dir = tempfile::tempdir().unwrap();
        // Descriptor resolved, directory never created.
        let desc = ConfigDescriptor::resolve(ConfigKind::Cursor, dir.path());
        let err = build_share_archive(&[desc]).await.unwrap_err();
        assert!(err.to_string().contains("enumerate"));
    }

    #[tokio::test]
    async fn empty_selection_is_rejected() {
        assert!(build_share_archive(&[]).await.is_err());
    }

    #[tokio::test]
    async fn temp_file_is_removed_on_drop() {
        let (_dir, desc) = cursor_fixture();
        let archive = build_share_archive(&[desc]).await.unwrap();
        let path = archive.path().to_path_buf();
        assert!(path.exists());
        drop(archive);
        assert!(!path.exists());
    }
}
