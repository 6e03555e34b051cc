//! Snapshot manifest types and serialization.
//!
//! The manifest is the source of truth for a snapshot's contents:
//! - Snapshot metadata (name, type, creation time, software version)
//! - The logical items actually captured (may be fewer than requested)
//! - Every archived file with its SHA-256 and size

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BundleError, Result};

/// Current snapshot format version.
pub const SNAPSHOT_FORMAT_VERSION: &str = "1.0.0";

/// Manifest file name within the archive.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Prefix under which item payloads live in the archive.
pub const ITEMS_PREFIX: &str = "items";

/// Whether an item was captured from a single file or a directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Dir,
}

/// One archived file, relative to its item root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Relative path inside the item (`/`-separated). For file items this
    /// is the source file name.
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

/// One logical item (e.g. `config`, `database`, `install`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemEntry {
    pub name: String,
    pub kind: ItemKind,
    /// Where the item was read from at capture time.
    pub source_path: String,
    pub files: Vec<FileEntry>,
}

impl ItemEntry {
    /// Archive path of one of this item's files.
    pub fn archive_path(&self, file: &FileEntry) -> String {
        format!("{}/{}/{}", ITEMS_PREFIX, self.name, file.path)
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|f| f.bytes).sum()
    }
}

/// Snapshot manifest containing metadata and per-file checksums.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub format_version: String,
    pub name: String,
    /// `daily`, `weekly` or `manual`.
    pub backup_type: String,
    pub created_at: DateTime<Utc>,
    pub software_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub items: Vec<ItemEntry>,
}

impl SnapshotManifest {
    pub fn new(
        name: impl Into<String>,
        backup_type: impl Into<String>,
        software_version: impl Into<String>,
    ) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION.to_string(),
            name: name.into(),
            backup_type: backup_type.into(),
            created_at: Utc::now(),
            software_version: software_version.into(),
            description: None,
            items: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn find_item(&self, name: &str) -> Option<&ItemEntry> {
        self.items.iter().find(|i| i.name == name)
    }

    /// Names of the items actually captured, in archive order.
    pub fn item_names(&self) -> Vec<String> {
        self.items.iter().map(|i| i.name.clone()).collect()
    }

    pub fn file_count(&self) -> usize {
        self.items.iter().map(|i| i.files.len()).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.items.iter().map(ItemEntry::total_bytes).sum()
    }

    /// Sort items and files for deterministic output.
    pub fn sort(&mut self) {
        self.items.sort_by(|a, b| a.name.cmp(&b.name));
        for item in &mut self.items {
            item.files.sort_by(|a, b| a.path.cmp(&b.path));
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Structural checks run when a snapshot is opened.
    pub fn validate(&self) -> Result<()> {
        if self.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(BundleError::UnsupportedVersion {
                version: self.format_version.clone(),
                supported: SNAPSHOT_FORMAT_VERSION.to_string(),
            });
        }
        if self.name.is_empty() {
            return Err(BundleError::CorruptedManifest("empty snapshot name".into()));
        }

        let mut seen = std::collections::HashSet::new();
        for item in &self.items {
            if item.name.is_empty() || item.name.contains('/') || item.name == ".." {
                return Err(BundleError::CorruptedManifest(format!(
                    "invalid item name '{}'",
                    item.name
                )));
            }
            if !seen.insert(item.name.as_str()) {
                return Err(BundleError::CorruptedManifest(format!(
                    "duplicate item '{}'",
                    item.name
                )));
            }
            if item.kind == ItemKind::File && item.files.len() != 1 {
                return Err(BundleError::CorruptedManifest(format!(
                    "file item '{}' lists {} files",
                    item.name,
                    item.files.len()
                )));
            }
            for file in &item.files {
                if file.sha256.len() != 64 {
                    return Err(BundleError::CorruptedManifest(format!(
                        "bad checksum for '{}/{}'",
                        item.name, file.path
                    )));
                }
            }
        }
        Ok(())
    }
}
