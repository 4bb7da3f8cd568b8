//! Share manifest: the metadata record written first into every archive.

use crate::configs::ConfigKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Fixed name of the metadata entry inside the share archive.
pub const MANIFEST_ENTRY_NAME: &str = ".cursor-kit-share.json";

/// Current manifest format revision.
pub const MANIFEST_VERSION: u32 = 1;

/// Describes which config kinds a share archive contains.
///
/// Every kind listed here corresponds to exactly one top-level directory in
/// the archive. An archive without this entry, or with an empty `configs`
/// list, is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferManifest {
    pub version: u32,
    pub configs: Vec<ConfigKind>,
}

impl TransferManifest {
    pub fn new(configs: Vec<ConfigKind>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            configs,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize share manifest")
    }

    /// Parses and validates manifest bytes read from an archive.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let manifest: TransferManifest =
            serde_json::from_slice(bytes).context("Share manifest is not valid JSON")?;
        if manifest.configs.is_empty() {
            anyhow::bail!("Share manifest lists no configs");
        }
        Ok(manifest)
    }
}
