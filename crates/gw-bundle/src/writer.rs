//! Snapshot writer.
//!
//! Streams named sources from disk into a ZIP archive, hashing each file as
//! it is compressed, and finishes with `manifest.json`. The archive is
//! written to `<name>.partial` and renamed into place only once complete,
//! so a crash never leaves a truncated archive under the final name.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::write::{FileOptions, ZipWriter};
use zip::CompressionMethod;

use crate::integrity::HashingWriter;
use crate::manifest::{FileEntry, ItemEntry, ItemKind, SnapshotManifest, MANIFEST_FILE_NAME};
use crate::paths::to_archive_string;
use crate::Result;

/// Paths and name suffixes left out of a directory capture.
#[derive(Debug, Clone, Default)]
pub struct Exclusions {
    paths: Vec<PathBuf>,
    suffixes: Vec<String>,
}

impl Exclusions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip this path and everything beneath it.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.push(path.into());
        self
    }

    /// Skip files whose name ends with `suffix` (e.g. `.log`).
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffixes.push(suffix.into());
        self
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        if self.paths.iter().any(|p| path.starts_with(p)) {
            return true;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        self.suffixes.iter().any(|s| name.ends_with(s.as_str()))
    }
}

#[derive(Debug)]
struct PendingItem {
    name: String,
    kind: ItemKind,
    source: PathBuf,
    exclusions: Exclusions,
}

/// Builder for snapshot archives.
pub struct SnapshotWriter {
    manifest: SnapshotManifest,
    pending: Vec<PendingItem>,
}

impl SnapshotWriter {
    pub fn new(
        name: impl Into<String>,
        backup_type: impl Into<String>,
        software_version: impl Into<String>,
    ) -> Self {
        Self {
            manifest: SnapshotManifest::new(name, backup_type, software_version),
            pending: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.manifest = self.manifest.with_description(description);
        self
    }

    /// Queue a named source. Returns `false` (and queues nothing) when the
    /// source path does not exist.
    pub fn add_source(&mut self, name: impl Into<String>, path: &Path) -> bool {
        self.add_tree(name, path, Exclusions::default())
    }

    /// Queue a named source with exclusions applied beneath it.
    pub fn add_tree(&mut self, name: impl Into<String>, path: &Path, exclusions: Exclusions) -> bool {
        let name = name.into();
        let kind = match fs::metadata(path) {
            Ok(meta) if meta.is_dir() => ItemKind::Dir,
            Ok(_) => ItemKind::File,
            Err(e) => {
                warn!(item = %name, path = %path.display(), error = %e, "Backup source missing, skipping");
                return false;
            }
        };
        debug!(item = %name, path = %path.display(), ?kind, "Queued backup source");
        self.pending.push(PendingItem {
            name,
            kind,
            source: path.to_path_buf(),
            exclusions,
        });
        true
    }

    /// Names queued so far.
    pub fn item_names(&self) -> Vec<&str> {
        self.pending.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn manifest(&self) -> &SnapshotManifest {
        &self.manifest
    }

    /// Write the archive to `path`.
    pub fn write(mut self, path: &Path) -> Result<SnapshotManifest> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let partial = partial_path(path);

        self.pending.sort_by(|a, b| a.name.cmp(&b.name));
        if self.pending.is_empty() {
            warn!(path = %path.display(), "Writing snapshot with no items");
        }

        let result = self.write_archive(&partial);
        let manifest = match result {
            Ok(manifest) => manifest,
            Err(e) => {
                let _ = fs::remove_file(&partial);
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&partial, path) {
            let _ = fs::remove_file(&partial);
            return Err(e.into());
        }

        info!(
            path = %path.display(),
            items = manifest.items.len(),
            files = manifest.file_count(),
            bytes = manifest.total_bytes(),
            "Snapshot written"
        );
        Ok(manifest)
    }

    fn write_archive(&self, partial: &Path) -> Result<SnapshotManifest> {
        let file = File::create(partial)?;
        let mut zip = ZipWriter::new(file);

        let options: FileOptions<'_, ()> = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644);

        let mut manifest = self.manifest.clone();
        for item in &self.pending {
            let mut entry = ItemEntry {
                name: item.name.clone(),
                kind: item.kind,
                source_path: item.source.display().to_string(),
                files: Vec::new(),
            };

            let files = match item.kind {
                ItemKind::File => {
                    let file_name = item
                        .source
                        .file_name()
                        .map(PathBuf::from)
                        .unwrap_or_else(|| PathBuf::from(&item.name));
                    vec![(item.source.clone(), file_name)]
                }
                ItemKind::Dir => {
                    let mut found = Vec::new();
                    collect_files(&item.source, &item.source, &item.exclusions, &mut found)?;
                    found.sort_by(|a, b| a.1.cmp(&b.1));
                    found
                }
            };

            for (abs, rel) in files {
                let rel = to_archive_string(&rel);
                let archive_path = format!("{}/{}/{}", crate::manifest::ITEMS_PREFIX, item.name, rel);
                zip.start_file(archive_path.as_str(), options)?;

                let mut src = File::open(&abs)?;
                let mut sink = HashingWriter::new(&mut zip);
                io::copy(&mut src, &mut sink)?;
                let (_, sha256, bytes) = sink.finish()?;

                entry.files.push(FileEntry {
                    path: rel,
                    sha256,
                    bytes,
                });
            }

            debug!(item = %entry.name, files = entry.files.len(), "Item archived");
            manifest.items.push(entry);
        }

        manifest.sort();
        zip.start_file(MANIFEST_FILE_NAME, options)?;
        io::Write::write_all(&mut zip, manifest.to_json()?.as_bytes())?;

        let file = zip.finish()?;
        file.sync_all()?;
        Ok(manifest)
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

/// Regular files beneath `dir`, as (absolute, relative-to-root) pairs.
///
/// Symlinks are not followed.
fn collect_files(
    root: &Path,
    dir: &Path,
    exclusions: &Exclusions,
    out: &mut Vec<(PathBuf, PathBuf)>,
) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if exclusions.is_excluded(&path) {
            continue;
        }
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(root, &path, exclusions, out)?;
        } else if file_type.is_file() {
            let rel = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            out.push((path, rel));
        } else {
            debug!(path = %path.display(), "Skipping non-regular file");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_source_is_skipped() {
        let temp = TempDir::new().unwrap();
        let mut writer = SnapshotWriter::new("manual_backup_x", "manual", "1.0.0");

        assert!(!writer.add_source("security", &temp.path().join("api.key")));
        assert!(writer.item_names().is_empty());
    }

    #[test]
    fn test_exclusions() {
        let ex = Exclusions::new()
            .with_path("/opt/app/backups")
            .with_suffix(".log");

        assert!(ex.is_excluded(Path::new("/opt/app/backups/daily.zip")));
        assert!(ex.is_excluded(Path::new("/opt/app/run/camera.log")));
        assert!(!ex.is_excluded(Path::new("/opt/app/main.py")));
        assert!(!ex.is_excluded(Path::new("/opt/app/backups-old/x")));
    }

    #[test]
    fn test_write_records_items_and_hashes() {
        let temp = TempDir::new().unwrap();
        let config = temp.path().join("config.json");
        fs::write(&config, br#"{"camera": 1}"#).unwrap();
        let certs = temp.path().join("certs");
        fs::create_dir_all(certs.join("ca")).unwrap();
        fs::write(certs.join("server.pem"), b"server").unwrap();
        fs::write(certs.join("ca").join("root.pem"), b"root").unwrap();

        let mut writer = SnapshotWriter::new("daily_backup_20260115_020000", "daily", "1.0.0");
        assert!(writer.add_source("config", &config));
        assert!(writer.add_source("certificates", &certs));

        let out = temp.path().join("backups").join("daily_backup_20260115_020000.zip");
        let manifest = writer.write(&out).unwrap();

        assert!(out.exists());
        assert!(!partial_path(&out).exists());
        assert_eq!(manifest.item_names(), vec!["certificates", "config"]);

        let certs_item = manifest.find_item("certificates").unwrap();
        assert_eq!(certs_item.kind, ItemKind::Dir);
        let paths: Vec<_> = certs_item.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["ca/root.pem", "server.pem"]);

        let config_item = manifest.find_item("config").unwrap();
        assert_eq!(config_item.files[0].path, "config.json");
        assert_eq!(
            config_item.files[0].sha256,
            crate::integrity::hash_bytes(br#"{"camera": 1}"#)
        );
    }

    #[test]
    fn test_tree_exclusions_applied() {
        let temp = TempDir::new().unwrap();
        let install = temp.path().join("install");
        fs::create_dir_all(install.join("backups")).unwrap();
        fs::write(install.join("main.py"), b"print()").unwrap();
        fs::write(install.join("client.log"), b"noise").unwrap();
        fs::write(install.join("backups").join("old.zip"), b"zip").unwrap();

        let mut writer = SnapshotWriter::new("pre_update_v1.2.0", "manual", "1.0.0");
        writer.add_tree(
            "install",
            &install,
            Exclusions::new()
                .with_path(install.join("backups"))
                .with_suffix(".log"),
        );
        let manifest = writer.write(&temp.path().join("snap.zip")).unwrap();

        let files: Vec<_> = manifest.items[0]
            .files
            .iter()
            .map(|f| f.path.as_str())
            .collect();
        assert_eq!(files, vec!["main.py"]);
    }
}
