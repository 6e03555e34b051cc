//! Error types for archive and integrity operations.

use thiserror::Error;

/// Errors that can occur while hashing, writing or reading archives.
#[derive(Error, Debug)]
pub enum BundleError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// ZIP archive error
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Checksum verification failed
    #[error("checksum mismatch for '{subject}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        subject: String,
        expected: String,
        actual: String,
    },

    /// The archive could not be opened as an archive at all
    #[error("archive unreadable: {path}: {reason}")]
    Unreadable { path: String, reason: String },

    /// The archive opened but holds no entries
    #[error("archive has no entries: {0}")]
    Empty(String),

    /// Missing required file in archive
    #[error("missing required file: {0}")]
    MissingFile(String),

    /// Unknown or unsupported snapshot format version
    #[error("unsupported snapshot format: {version} (supported: {supported})")]
    UnsupportedVersion { version: String, supported: String },

    /// Corrupted manifest
    #[error("corrupted manifest: {0}")]
    CorruptedManifest(String),

    /// Item not present in the snapshot
    #[error("item not found in snapshot: {0}")]
    ItemNotFound(String),

    /// Entry would land outside the extraction root
    #[error("unsafe entry path: {0}")]
    UnsafePath(String),

    /// Package extension has no matching reader
    #[error("unsupported package format: {0}")]
    UnsupportedPackage(String),
}

/// Result type alias for archive operations.
pub type Result<T> = std::result::Result<T, BundleError>;

impl BundleError {
    /// Whether this failure means the bytes on disk cannot be trusted.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            BundleError::ChecksumMismatch { .. }
                | BundleError::Unreadable { .. }
                | BundleError::Empty(_)
                | BundleError::Zip(_)
                | BundleError::MissingFile(_)
                | BundleError::CorruptedManifest(_)
                | BundleError::UnsupportedVersion { .. }
                | BundleError::UnsafePath(_)
        )
    }
}

impl From<BundleError> for gw_common::Error {
    fn from(err: BundleError) -> Self {
        match err {
            BundleError::Io(e) => gw_common::Error::Io(e),
            BundleError::Json(e) => gw_common::Error::Json(e),
            BundleError::ChecksumMismatch {
                subject,
                expected,
                actual,
            } => gw_common::Error::ChecksumMismatch {
                subject,
                expected,
                actual,
            },
            BundleError::Empty(path) => gw_common::Error::ArchiveEmpty(path),
            BundleError::ItemNotFound(name) => gw_common::Error::NotFound(name),
            other => gw_common::Error::ArchiveUnreadable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_maps_to_integrity_code() {
        let err = BundleError::ChecksumMismatch {
            subject: "a.zip".into(),
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert!(err.is_integrity());

        let common: gw_common::Error = err.into();
        assert_eq!(common.code(), 20);
        assert_eq!(common.category(), gw_common::ErrorCategory::Integrity);
    }

    #[test]
    fn test_unsupported_package_is_not_integrity() {
        let err = BundleError::UnsupportedPackage("update.rar".into());
        assert!(!err.is_integrity());
        let common: gw_common::Error = err.into();
        assert_eq!(common.code(), 21);
    }
}
