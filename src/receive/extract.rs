//! Selective extraction of a share archive into the working directory.

use crate::configs::ConfigDescriptor;
use crate::manifest::MANIFEST_ENTRY_NAME;
use crate::receive::engine::ConflictStrategy;
use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Applies the chosen strategy and extracts the archive.
///
/// `Overwrite` deletes each conflicting target directory up front; `Merge`
/// keeps existing files and only writes new ones. Filesystem errors abort the
/// run with the failing stage in the error; files already written stay.
pub async fn extract_with_strategy(
    archive: &Path,
    destination: &Path,
    configs: &[ConfigDescriptor],
    strategy: ConflictStrategy,
) -> Result<()> {
    debug_assert_ne!(strategy, ConflictStrategy::Cancel);

    if strategy == ConflictStrategy::Overwrite {
        for config in configs.iter().filter(|c| c.exists) {
            tokio::fs::remove_dir_all(&config.path)
                .await
                .with_context(|| {
                    format!("Failed to remove existing {} directory", config.directory)
                })?;
        }
    }

    let archive = archive.to_path_buf();
    let destination = destination.to_path_buf();
    let known_dirs: HashSet<String> = configs
        .iter()
        .map(|c| c.directory.to_string())
        .collect();
    let merge = strategy == ConflictStrategy::Merge;

    tokio::task::spawn_blocking(move || extract_entries(&archive, &destination, &known_dirs, merge))
        .await
        .context("Extraction task failed")?
}

fn extract_entries(
    archive: &Path,
    destination: &Path,
    known_dirs: &HashSet<String>,
    merge: bool,
) -> Result<()> {
    let file = File::open(archive)
        .with_context(|| format!("Failed to open downloaded archive {}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file).context("Downloaded file is not a valid archive")?;

    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .with_context(|| format!("Failed to read archive entry {index}"))?;

        if entry.name() == MANIFEST_ENTRY_NAME {
            continue;
        }

        // Also rejects absolute paths and `..` traversal.
        let Some(rel) = entry.enclosed_name() else {
            tracing::warn!(entry = entry.name(), "skipping archive entry with unsafe path");
            continue;
        };
        if !top_level_is_known(&rel, known_dirs) {
            tracing::warn!(entry = entry.name(), "skipping entry outside shared config directories");
            continue;
        }

        let target = destination.join(&rel);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create directory {}", target.display()))?;
            continue;
        }

        if merge && target.exists() {
            continue;
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let mut out = File::create(&target)
            .with_context(|| format!("Failed to create {}", target.display()))?;
        io::copy(&mut entry, &mut out)
            .with_context(|| format!("Failed to write {}", target.display()))?;
    }

    Ok(())
}

fn top_level_is_known(rel: &PathBuf, known_dirs: &HashSet<String>) -> bool {
    match rel.components().next() {
        Some(Component::Normal(first)) => first
            .to_str()
            .map(|name| known_dirs.contains(name))
            .unwrap_or(false),
        _ => false,
    }
}
