//! Integrity hashing and archive handling for gatewarden.
//!
//! This crate provides the byte-level layer under backups and updates:
//! - SHA-256 hashing of files, streams and buffers, plus verification
//! - Snapshot archives: a ZIP holding named items and a manifest with a
//!   checksum for every file
//! - Update package extraction for `.zip` and `.tar.gz` packages
//!
//! # Snapshot Format
//!
//! ```text
//! daily_backup_20260115_020000.zip
//! ├── items/config/config.json
//! ├── items/certificates/ca/root.pem
//! └── manifest.json
//! ```
//!
//! # Example
//!
//! ```no_run
//! use gw_bundle::{SnapshotReader, SnapshotWriter};
//! use std::path::Path;
//!
//! let mut writer = SnapshotWriter::new("manual_backup_20260115_120000", "manual", "1.0.0");
//! writer.add_source("config", Path::new("/opt/parking-client/config.json"));
//! writer.write(Path::new("/opt/parking-client/backups/manual.zip")).unwrap();
//!
//! let mut reader = SnapshotReader::open(Path::new("/opt/parking-client/backups/manual.zip")).unwrap();
//! assert!(reader.verify_all().is_empty());
//! ```

pub mod error;
pub mod integrity;
pub mod manifest;
pub mod package;
pub mod paths;
pub mod reader;
pub mod writer;

pub use error::{BundleError, Result};
pub use integrity::{digests_match, hash_bytes, hash_file, verify_file, HashingWriter};
pub use manifest::{FileEntry, ItemEntry, ItemKind, SnapshotManifest, SNAPSHOT_FORMAT_VERSION};
pub use package::{extract_package, ExtractedPackage, PackageFormat};
pub use reader::{ExtractedItem, SnapshotReader};
pub use writer::{Exclusions, SnapshotWriter};
