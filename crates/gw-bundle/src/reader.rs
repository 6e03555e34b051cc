//! Snapshot reader for opening, verifying and extracting archives.

use std::fs::{self, File};
use std::io::{self, Read, Seek};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::integrity::{digests_match, hash_reader, HashingWriter};
use crate::manifest::{ItemEntry, ItemKind, SnapshotManifest, MANIFEST_FILE_NAME};
use crate::paths::safe_relative;
use crate::{BundleError, Result};

/// An item written out of a snapshot.
#[derive(Debug, Clone)]
pub struct ExtractedItem {
    pub name: String,
    pub kind: ItemKind,
    /// Extracted file (file items) or directory root (dir items).
    pub path: PathBuf,
    /// Where the item lived when it was captured.
    pub source_path: PathBuf,
}

/// Reader for snapshot archives with verification.
pub struct SnapshotReader<R: Read + Seek> {
    manifest: SnapshotManifest,
    archive: ZipArchive<R>,
    label: String,
}

impl SnapshotReader<File> {
    /// Open a snapshot from a file path.
    ///
    /// Fails with [`BundleError::Unreadable`] when the file is not a ZIP
    /// archive and [`BundleError::Empty`] when it holds no entries.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(file, path.display().to_string())
    }
}

impl<R: Read + Seek> SnapshotReader<R> {
    pub fn from_reader(reader: R, label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        let mut archive = ZipArchive::new(reader).map_err(|e| BundleError::Unreadable {
            path: label.clone(),
            reason: e.to_string(),
        })?;

        if archive.is_empty() {
            return Err(BundleError::Empty(label));
        }

        let manifest = Self::read_manifest(&mut archive)?;
        manifest.validate()?;

        debug!(
            snapshot = %manifest.name,
            items = manifest.items.len(),
            files = manifest.file_count(),
            "Snapshot opened"
        );

        Ok(Self {
            manifest,
            archive,
            label,
        })
    }

    fn read_manifest(archive: &mut ZipArchive<R>) -> Result<SnapshotManifest> {
        let mut file = archive
            .by_name(MANIFEST_FILE_NAME)
            .map_err(|_| BundleError::MissingFile(MANIFEST_FILE_NAME.to_string()))?;

        let mut json = String::new();
        file.read_to_string(&mut json)?;
        SnapshotManifest::from_json(&json)
            .map_err(|e| BundleError::CorruptedManifest(e.to_string()))
    }

    pub fn manifest(&self) -> &SnapshotManifest {
        &self.manifest
    }

    /// Check every listed file against its recorded digest without writing
    /// anything.
    ///
    /// Returns the archive paths that failed.
    pub fn verify_all(&mut self) -> Vec<String> {
        let failures: Vec<String> = self
            .check_entries()
            .into_iter()
            .map(|(path, _)| path)
            .collect();
        if failures.is_empty() {
            info!(snapshot = %self.manifest.name, "All entries verified");
        }
        failures
    }

    /// Like [`verify_all`](Self::verify_all) but returns the first failure
    /// as an error.
    pub fn verify(&mut self) -> Result<()> {
        match self.check_entries().into_iter().next() {
            None => Ok(()),
            Some((_, err)) => Err(err),
        }
    }

    fn check_entries(&mut self) -> Vec<(String, BundleError)> {
        let mut failures = Vec::new();
        let items = self.manifest.items.clone();

        for item in &items {
            for file in &item.files {
                let archive_path = item.archive_path(file);
                let outcome = self
                    .archive
                    .by_name(&archive_path)
                    .map_err(|_| BundleError::MissingFile(archive_path.clone()))
                    .and_then(|mut entry| Ok(hash_reader(&mut entry)?));

                match outcome {
                    Ok((digest, _)) if digests_match(&file.sha256, &digest) => {}
                    Ok((digest, _)) => {
                        warn!(
                            snapshot = %self.label,
                            path = %archive_path,
                            expected = %file.sha256,
                            actual = %digest,
                            "Entry checksum mismatch"
                        );
                        let err = BundleError::ChecksumMismatch {
                            subject: archive_path.clone(),
                            expected: file.sha256.clone(),
                            actual: digest,
                        };
                        failures.push((archive_path, err));
                    }
                    Err(e) => {
                        warn!(snapshot = %self.label, path = %archive_path, error = %e, "Entry unreadable");
                        failures.push((archive_path, e));
                    }
                }
            }
        }
        failures
    }

    /// Extract one item beneath `dest`, verifying every file as it is
    /// written. The item lands in `dest/<name>/`.
    pub fn extract_item(&mut self, name: &str, dest: &Path) -> Result<ExtractedItem> {
        let item = self
            .manifest
            .find_item(name)
            .cloned()
            .ok_or_else(|| BundleError::ItemNotFound(name.to_string()))?;

        let item_root = dest.join(&item.name);
        fs::create_dir_all(&item_root)?;

        for file in &item.files {
            let rel = safe_relative(&file.path)?;
            let target = item_root.join(&rel);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            self.extract_entry(&item, &file.path, &file.sha256, &target)?;
        }

        let path = match item.kind {
            ItemKind::Dir => item_root,
            ItemKind::File => match item.files.first() {
                Some(file) => item_root.join(safe_relative(&file.path)?),
                None => {
                    return Err(BundleError::CorruptedManifest(format!(
                        "file item '{}' has no payload",
                        item.name
                    )))
                }
            },
        };

        debug!(item = %item.name, path = %path.display(), "Item extracted");
        Ok(ExtractedItem {
            name: item.name.clone(),
            kind: item.kind,
            path,
            source_path: PathBuf::from(&item.source_path),
        })
    }

    fn extract_entry(
        &mut self,
        item: &ItemEntry,
        rel: &str,
        expected: &str,
        target: &Path,
    ) -> Result<()> {
        let archive_path = format!("{}/{}/{}", crate::manifest::ITEMS_PREFIX, item.name, rel);
        let mut entry = self
            .archive
            .by_name(&archive_path)
            .map_err(|_| BundleError::MissingFile(archive_path.clone()))?;

        let out = File::create(target)?;
        let mut sink = HashingWriter::new(out);
        io::copy(&mut entry, &mut sink)?;
        let (out, actual, _) = sink.finish()?;
        out.sync_all()?;

        if !digests_match(expected, &actual) {
            return Err(BundleError::ChecksumMismatch {
                subject: archive_path,
                expected: expected.to_string(),
                actual,
            });
        }
        Ok(())
    }

    /// Extract several items. Stops at the first failure.
    pub fn extract_items(&mut self, names: &[String], dest: &Path) -> Result<Vec<ExtractedItem>> {
        names
            .iter()
            .map(|name| self.extract_item(name, dest))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::SnapshotWriter;
    use std::io::Write;
    use tempfile::TempDir;

    fn snapshot(temp: &TempDir) -> PathBuf {
        let db = temp.path().join("monitoring.db");
        fs::write(&db, b"sqlite bytes").unwrap();
        let captures = temp.path().join("captures");
        fs::create_dir_all(captures.join("2026-01-15")).unwrap();
        fs::write(captures.join("2026-01-15").join("a.jpg"), vec![7u8; 4096]).unwrap();

        let mut writer = SnapshotWriter::new("manual_backup_20260115_120000", "manual", "1.0.0");
        writer.add_source("database", &db);
        writer.add_source("critical_images", &captures);
        let path = temp.path().join("manual_backup_20260115_120000.zip");
        writer.write(&path).unwrap();
        path
    }

    #[test]
    fn test_open_and_verify() {
        let temp = TempDir::new().unwrap();
        let path = snapshot(&temp);

        let mut reader = SnapshotReader::open(&path).unwrap();
        assert_eq!(reader.manifest().items.len(), 2);
        assert!(reader.verify_all().is_empty());
        assert!(reader.verify().is_ok());
    }

    #[test]
    fn test_extract_reproduces_bytes() {
        let temp = TempDir::new().unwrap();
        let path = snapshot(&temp);
        let staging = temp.path().join("staging");

        let mut reader = SnapshotReader::open(&path).unwrap();
        let items = reader
            .extract_items(&["database".into(), "critical_images".into()], &staging)
            .unwrap();

        assert_eq!(fs::read(&items[0].path).unwrap(), b"sqlite bytes");
        assert_eq!(items[0].kind, ItemKind::File);
        assert_eq!(
            fs::read(items[1].path.join("2026-01-15").join("a.jpg")).unwrap(),
            vec![7u8; 4096]
        );
    }

    #[test]
    fn test_unknown_item() {
        let temp = TempDir::new().unwrap();
        let path = snapshot(&temp);
        let mut reader = SnapshotReader::open(&path).unwrap();

        assert!(matches!(
            reader.extract_item("logs", temp.path()),
            Err(BundleError::ItemNotFound(_))
        ));
    }

    #[test]
    fn test_not_a_zip_is_unreadable() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("junk.zip");
        fs::write(&path, b"definitely not a zip archive").unwrap();

        assert!(matches!(
            SnapshotReader::open(&path),
            Err(BundleError::Unreadable { .. })
        ));
    }

    #[test]
    fn test_missing_manifest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bare.zip");
        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        let options: zip::write::FileOptions<'_, ()> = zip::write::FileOptions::default();
        zip.start_file("hello.txt", options).unwrap();
        zip.write_all(b"hi").unwrap();
        zip.finish().unwrap();

        assert!(matches!(
            SnapshotReader::open(&path),
            Err(BundleError::MissingFile(_))
        ));
    }
}
