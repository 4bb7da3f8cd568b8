//! The closed set of supported AI-IDE config kinds and their on-disk locations.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// One supported AI-IDE configuration directory type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigKind {
    Cursor,
    GoogleAntigravity,
    GithubCopilot,
}

impl ConfigKind {
    pub const ALL: [ConfigKind; 3] = [
        ConfigKind::Cursor,
        ConfigKind::GoogleAntigravity,
        ConfigKind::GithubCopilot,
    ];

    /// Human-facing name shown in status output.
    pub fn label(self) -> &'static str {
        match self {
            ConfigKind::Cursor => "Cursor",
            ConfigKind::GoogleAntigravity => "Google AntiGravity",
            ConfigKind::GithubCopilot => "GitHub Copilot",
        }
    }

    /// Top-level directory name, both on disk and inside the share archive.
    pub fn directory(self) -> &'static str {
        match self {
            ConfigKind::Cursor => ".cursor",
            ConfigKind::GoogleAntigravity => ".agent",
            ConfigKind::GithubCopilot => ".github",
        }
    }

    /// Whether this kind has shareable content under `cwd`.
    ///
    /// Copilot is special-cased: the `.github` directory is shared whole, but
    /// it only counts as a Copilot config when the instructions file or
    /// directory is present.
    pub fn is_shareable(self, cwd: &Path) -> bool {
        match self {
            ConfigKind::Cursor | ConfigKind::GoogleAntigravity => {
                cwd.join(self.directory()).is_dir()
            }
            ConfigKind::GithubCopilot => {
                cwd.join(".github").join("copilot-instructions.md").is_file()
                    || cwd.join(".github").join("instructions").is_dir()
            }
        }
    }
}

impl fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigKind::Cursor => "cursor",
            ConfigKind::GoogleAntigravity => "google-antigravity",
            ConfigKind::GithubCopilot => "github-copilot",
        };
        write!(f, "{name}")
    }
}

/// A config kind resolved against a working directory.
///
/// Built fresh on every share or receive invocation and never persisted.
#[derive(Debug, Clone)]
pub struct ConfigDescriptor {
    pub kind: ConfigKind,
    pub label: &'static str,
    pub directory: &'static str,
    /// Absolute local path of the config directory.
    pub path: PathBuf,
    /// True when the directory already exists locally (a conflict on receive).
    pub exists: bool,
}

impl ConfigDescriptor {
    pub fn resolve(kind: ConfigKind, cwd: &Path) -> Self {
        let path = cwd.join(kind.directory());
        let exists = path.is_dir();
        Self {
            kind,
            label: kind.label(),
            directory: kind.directory(),
            path,
            exists,
        }
    }
}

/// Configs present under `cwd` that can be offered for sharing.
pub fn detect_available(cwd: &Path) -> Vec<ConfigDescriptor> {
    ConfigKind::ALL
        .iter()
        .copied()
        .filter(|kind| kind.is_shareable(cwd))
        .map(|kind| ConfigDescriptor::resolve(kind, cwd))
        .collect()
}
