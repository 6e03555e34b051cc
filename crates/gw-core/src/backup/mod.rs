//! Archive backups of device state.
//!
//! A backup is one snapshot archive (see `gw_bundle`) holding a set of named
//! sources from the registry in [`BackupSettings::sources`], plus a row in
//! the sqlite metadata store next to the archives.
//!
//! Restores verify first. The archive checksum recorded at creation, the
//! manifest and every per-file hash must all check out before the service is
//! stopped or any destination is touched.

pub mod record;
pub mod retention;
pub mod scheduler;
pub mod store;

pub use record::{
    BackupListing, BackupRecord, BackupStats, BackupType, NewBackup, RecordStatus, RestoreEvent,
};
pub use retention::{plan_cleanup, RetentionPolicy};
pub use scheduler::{BackupSchedule, ScheduledJob};
pub use store::{MetadataStore, METADATA_DB_NAME};

use chrono::{Local, Utc};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use gw_bundle::{
    hash_file, verify_file, BundleError, Exclusions, ExtractedItem, ItemKind, SnapshotManifest,
    SnapshotReader, SnapshotWriter,
};
use gw_common::{timestamped_name, BackupId};
use gw_config::{BackupSettings, Config};

use crate::controllers::ServiceController;
use crate::fsutil;
use crate::logging::event_names;
use crate::version::read_version;

/// Errors from backup, verify and restore.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error(transparent)]
    Bundle(#[from] BundleError),

    #[error("metadata store error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("backup not found: {0}")]
    NotFound(String),

    #[error("nothing restored from {0}")]
    RestoreIncomplete(String),
}

impl BackupError {
    /// Whether the archive itself failed verification.
    pub fn is_integrity(&self) -> bool {
        match self {
            BackupError::Bundle(e) => e.is_integrity(),
            _ => false,
        }
    }
}

impl From<BackupError> for gw_common::Error {
    fn from(err: BackupError) -> Self {
        match err {
            BackupError::Bundle(e) => e.into(),
            BackupError::Storage(e) => gw_common::Error::Storage(e.to_string()),
            BackupError::Io(e) => gw_common::Error::Io(e),
            BackupError::NotFound(what) => gw_common::Error::NotFound(what),
            BackupError::RestoreIncomplete(what) => {
                gw_common::Error::NotFound(format!("restorable items in {what}"))
            }
        }
    }
}

pub type BackupResult<T> = Result<T, BackupError>;

/// Which archive to restore or verify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreTarget {
    Id(BackupId),
    Path(PathBuf),
}

impl FromStr for RestoreTarget {
    type Err = std::convert::Infallible;

    /// A bare integer is an id; anything else is a path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.parse::<BackupId>() {
            Ok(id) => RestoreTarget::Id(id),
            Err(_) => RestoreTarget::Path(PathBuf::from(s)),
        })
    }
}

impl std::fmt::Display for RestoreTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestoreTarget::Id(id) => write!(f, "backup #{id}"),
            RestoreTarget::Path(path) => write!(f, "{}", path.display()),
        }
    }
}

/// How directory items land on their destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestoreMode {
    /// The destination directory is replaced by the archived one.
    #[default]
    Replace,
    /// Archived files are copied over the destination; files the archive
    /// does not know about are left alone.
    Overlay,
}

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub mode: RestoreMode,
    /// Stop the service before writing and start it afterwards.
    pub manage_service: bool,
    /// Restored files with these suffixes are made executable.
    pub executable_suffixes: Vec<String>,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            mode: RestoreMode::Replace,
            manage_service: true,
            executable_suffixes: Vec::new(),
        }
    }
}

/// An archive that passed every integrity check.
#[derive(Debug, Clone)]
pub struct VerifiedBackup {
    pub record: Option<BackupRecord>,
    pub path: PathBuf,
    pub manifest: SnapshotManifest,
}

/// Creates, retains and restores backups.
pub struct BackupManager {
    settings: BackupSettings,
    store: MetadataStore,
    service: Arc<dyn ServiceController>,
    version_file: PathBuf,
}

impl std::fmt::Debug for BackupManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackupManager")
            .field("backup_dir", &self.settings.backup_dir)
            .finish_non_exhaustive()
    }
}

impl BackupManager {
    /// Open the store at `<backup_dir>/backup_metadata.db`, creating the
    /// directory if needed.
    pub fn open(config: &Config, service: Arc<dyn ServiceController>) -> BackupResult<Self> {
        fs::create_dir_all(&config.backup.backup_dir)?;
        let store = MetadataStore::open(&config.backup.backup_dir.join(METADATA_DB_NAME))?;
        Ok(Self::with_store(
            config.backup.clone(),
            store,
            service,
            config.version_file(),
        ))
    }

    pub fn with_store(
        settings: BackupSettings,
        store: MetadataStore,
        service: Arc<dyn ServiceController>,
        version_file: PathBuf,
    ) -> Self {
        Self {
            settings,
            store,
            service,
            version_file,
        }
    }

    pub fn settings(&self) -> &BackupSettings {
        &self.settings
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// Physical path registered for a logical item name.
    pub fn registry_path(&self, name: &str) -> Option<&Path> {
        self.settings.sources.get(name).map(|s| s.path.as_path())
    }

    pub fn create_daily(&self) -> BackupResult<BackupRecord> {
        let items = self.settings.daily_items.clone();
        self.create(&items, BackupType::Daily, Some("Scheduled daily backup"))
    }

    /// Every registered source.
    pub fn create_weekly(&self) -> BackupResult<BackupRecord> {
        let items: Vec<String> = self.settings.sources.keys().cloned().collect();
        self.create(&items, BackupType::Weekly, Some("Scheduled weekly full backup"))
    }

    pub fn create_manual(&self, description: Option<&str>) -> BackupResult<BackupRecord> {
        let items = self.settings.manual_items.clone();
        self.create(&items, BackupType::Manual, description)
    }

    /// Archive the named registry items.
    ///
    /// Unknown names and missing paths are skipped; the record is marked
    /// partial when fewer items made it into the archive than were asked for.
    /// Retention runs after every successful create.
    pub fn create(
        &self,
        items: &[String],
        kind: BackupType,
        description: Option<&str>,
    ) -> BackupResult<BackupRecord> {
        let prefix = format!("{}_backup", kind.as_str());
        let (name, path) = self.unique_archive(&prefix)?;

        let mut writer = SnapshotWriter::new(&name, kind.as_str(), read_version(&self.version_file));
        if let Some(desc) = description {
            writer = writer.with_description(desc);
        }

        let mut added = 0usize;
        for item in items {
            match self.registry_path(item) {
                Some(src) => {
                    if writer.add_source(item.as_str(), src) {
                        added += 1;
                    }
                }
                None => warn!(item = %item, "Unknown backup item, skipping"),
            }
        }

        let status = if added < items.len() {
            RecordStatus::Partial
        } else {
            RecordStatus::Completed
        };

        let record = self
            .finish(writer, &name, &path, kind, status, description)
            .map_err(|e| {
                error!(target: event_names::BACKUP_FAILED, name = %name, error = %e, "Backup failed");
                e
            })?;

        if status == RecordStatus::Partial {
            warn!(
                target: event_names::BACKUP_PARTIAL,
                name = %record.name,
                requested = items.len(),
                archived = added,
                "Backup is missing some items"
            );
        }

        if let Err(e) = self.cleanup() {
            warn!(error = %e, "Retention cleanup failed");
        }
        Ok(record)
    }

    /// Archive a whole directory tree as a single item named `install`.
    ///
    /// Used for pre-update snapshots; the archive name is
    /// `<prefix>_<timestamp>` and the record type is manual.
    pub fn snapshot_tree(
        &self,
        prefix: &str,
        root: &Path,
        exclusions: Exclusions,
        description: &str,
    ) -> BackupResult<BackupRecord> {
        let (name, path) = self.unique_archive(prefix)?;
        let mut writer =
            SnapshotWriter::new(&name, BackupType::Manual.as_str(), read_version(&self.version_file))
                .with_description(description);

        if !writer.add_tree("install", root, exclusions) {
            return Err(BackupError::NotFound(root.display().to_string()));
        }

        let record = self.finish(
            writer,
            &name,
            &path,
            BackupType::Manual,
            RecordStatus::Completed,
            Some(description),
        )?;
        if let Err(e) = self.cleanup() {
            warn!(error = %e, "Retention cleanup failed");
        }
        Ok(record)
    }

    fn unique_archive(&self, prefix: &str) -> BackupResult<(String, PathBuf)> {
        fs::create_dir_all(&self.settings.backup_dir)?;
        let base = timestamped_name(prefix, &Local::now());
        let mut name = base.clone();
        let mut n = 1;
        loop {
            let path = self.settings.backup_dir.join(format!("{name}.zip"));
            if !path.exists() {
                return Ok((name, path));
            }
            n += 1;
            name = format!("{base}_{n}");
        }
    }

    fn finish(
        &self,
        writer: SnapshotWriter,
        name: &str,
        path: &Path,
        kind: BackupType,
        status: RecordStatus,
        description: Option<&str>,
    ) -> BackupResult<BackupRecord> {
        let manifest = writer.write(path)?;
        let checksum = hash_file(path)?;
        let size_bytes = fs::metadata(path)?.len();

        let record = self.store.insert_backup(&NewBackup {
            backup_type: kind,
            name: name.to_string(),
            file_path: path.to_path_buf(),
            created_at: Utc::now().timestamp(),
            size_bytes,
            checksum: Some(checksum),
            status,
            description: description.map(str::to_string),
        })?;

        info!(
            target: event_names::BACKUP_CREATED,
            id = %record.id,
            name = %record.name,
            backup_type = %kind,
            items = manifest.items.len(),
            bytes = size_bytes,
            "Backup created"
        );
        Ok(record)
    }

    /// Run every integrity check without restoring anything.
    pub fn verify(&self, target: &RestoreTarget) -> BackupResult<VerifiedBackup> {
        self.open_verified(target).map(|(verified, _)| verified)
    }

    fn resolve(&self, target: &RestoreTarget) -> BackupResult<(Option<BackupRecord>, PathBuf)> {
        match target {
            RestoreTarget::Id(id) => {
                let record = self
                    .store
                    .get_backup(*id)?
                    .ok_or_else(|| BackupError::NotFound(format!("backup #{id}")))?;
                let path = record.file_path.clone();
                Ok((Some(record), path))
            }
            RestoreTarget::Path(path) => Ok((self.store.find_by_path(path)?, path.clone())),
        }
    }

    fn open_verified(
        &self,
        target: &RestoreTarget,
    ) -> BackupResult<(VerifiedBackup, SnapshotReader<File>)> {
        let (record, path) = self.resolve(target)?;
        let result = Self::verify_archive(record.as_ref(), &path);
        match result {
            Ok(reader) => {
                let manifest = reader.manifest().clone();
                Ok((
                    VerifiedBackup {
                        record,
                        path,
                        manifest,
                    },
                    reader,
                ))
            }
            Err(e) => {
                error!(
                    target: event_names::BACKUP_VERIFY_FAIL,
                    archive = %path.display(),
                    error = %e,
                    "Backup failed verification"
                );
                Err(e)
            }
        }
    }

    fn verify_archive(
        record: Option<&BackupRecord>,
        path: &Path,
    ) -> BackupResult<SnapshotReader<File>> {
        if !path.is_file() {
            return Err(BackupError::NotFound(path.display().to_string()));
        }

        if let Some(expected) = record.and_then(|r| r.checksum.as_deref()) {
            verify_file(path, expected)?;
        }

        let mut reader = SnapshotReader::open(path)?;
        reader.verify()?;
        Ok(reader)
    }

    /// Restore with default options: replace destinations and bounce the
    /// service around the writes.
    pub fn restore(
        &self,
        target: &RestoreTarget,
        items: Option<&[String]>,
    ) -> BackupResult<RestoreEvent> {
        self.restore_with(target, items, &RestoreOptions::default())
    }

    /// Verify, extract to staging, then write each item over its destination
    /// after taking a `.backup` safety copy.
    ///
    /// Nothing outside the staging directory is written until verification
    /// and extraction have both succeeded.
    pub fn restore_with(
        &self,
        target: &RestoreTarget,
        items: Option<&[String]>,
        options: &RestoreOptions,
    ) -> BackupResult<RestoreEvent> {
        let (verified, mut reader) = self.open_verified(target)?;
        let backup_id = verified.record.as_ref().map(|r| r.id);

        let names: Vec<String> = match items {
            Some(subset) => subset
                .iter()
                .filter(|name| {
                    let known = verified.manifest.find_item(name).is_some();
                    if !known {
                        warn!(item = %name, archive = %verified.path.display(), "Item not in backup");
                    }
                    known
                })
                .cloned()
                .collect(),
            None => verified
                .manifest
                .items
                .iter()
                .map(|i| i.name.clone())
                .collect(),
        };
        if names.is_empty() {
            return Err(BackupError::RestoreIncomplete(target.to_string()));
        }

        info!(
            target: event_names::BACKUP_RESTORE_STARTED,
            archive = %verified.path.display(),
            items = ?names,
            "Restore started"
        );

        let staging = self.settings.backup_dir.join(format!(
            ".restore_{}_{}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            std::process::id()
        ));
        fsutil::remove_path(&staging)?;
        let extracted = match reader.extract_items(&names, &staging) {
            Ok(extracted) => extracted,
            Err(e) => {
                let _ = fsutil::remove_path(&staging);
                error!(
                    target: event_names::BACKUP_RESTORE_FAILED,
                    archive = %verified.path.display(),
                    error = %e,
                    "Extraction failed, nothing restored"
                );
                return Err(e.into());
            }
        };

        if options.manage_service {
            if let Err(e) = self.service.stop() {
                warn!(error = %e, "Could not stop service before restore");
            }
        }

        let mut restored = Vec::new();
        for item in &extracted {
            let dest = self
                .registry_path(&item.name)
                .map(Path::to_path_buf)
                .unwrap_or_else(|| item.source_path.clone());
            match self.place_item(item, &dest, options) {
                Ok(()) => {
                    debug!(item = %item.name, dest = %dest.display(), "Item restored");
                    restored.push(item.name.clone());
                }
                Err(e) => {
                    warn!(item = %item.name, dest = %dest.display(), error = %e, "Item restore failed");
                }
            }
        }

        if options.manage_service {
            if let Err(e) = self.service.start() {
                warn!(error = %e, "Could not start service after restore");
            }
        }
        if let Err(e) = fsutil::remove_path(&staging) {
            debug!(path = %staging.display(), error = %e, "Staging cleanup failed");
        }

        let status = if restored.is_empty() {
            RecordStatus::Failed
        } else if restored.len() < names.len() {
            RecordStatus::Partial
        } else {
            RecordStatus::Completed
        };

        let mut event = RestoreEvent {
            id: None,
            backup_id,
            restored_at: Utc::now().timestamp(),
            status,
            notes: restored,
        };
        match self.store.insert_restore(&event) {
            Ok(id) => event.id = Some(id),
            Err(e) => warn!(error = %e, "Could not record restore history"),
        }

        if status == RecordStatus::Failed {
            error!(
                target: event_names::BACKUP_RESTORE_FAILED,
                archive = %verified.path.display(),
                "No item could be restored"
            );
            return Err(BackupError::RestoreIncomplete(target.to_string()));
        }

        info!(
            target: event_names::BACKUP_RESTORE_COMPLETE,
            archive = %verified.path.display(),
            status = %status,
            items = ?event.notes,
            "Restore complete"
        );
        Ok(event)
    }

    fn place_item(
        &self,
        item: &ExtractedItem,
        dest: &Path,
        options: &RestoreOptions,
    ) -> io::Result<()> {
        match (item.kind, options.mode) {
            (ItemKind::File, _) => {
                fsutil::make_safety_copy(dest)?;
                if dest.is_dir() {
                    fsutil::remove_path(dest)?;
                }
                let exec = fsutil::is_executable(dest) || wants_exec(dest, options);
                fsutil::atomic_replace(&item.path, dest, exec)
            }
            (ItemKind::Dir, RestoreMode::Replace) => {
                fsutil::make_safety_copy(dest)?;
                fsutil::remove_path(dest)?;
                fsutil::copy_tree(&item.path, dest).map(|_| ())
            }
            (ItemKind::Dir, RestoreMode::Overlay) => {
                let safety_root = fsutil::safety_copy_path(dest);
                fsutil::remove_path(&safety_root)?;
                for rel in fsutil::relative_files(&item.path)? {
                    let target = dest.join(&rel);
                    if target.is_file() {
                        let copy = safety_root.join(&rel);
                        if let Some(parent) = copy.parent() {
                            fs::create_dir_all(parent)?;
                        }
                        fs::copy(&target, &copy)?;
                    }
                    let exec = fsutil::is_executable(&target) || wants_exec(&target, options);
                    fsutil::atomic_replace(&item.path.join(&rel), &target, exec)?;
                }
                Ok(())
            }
        }
    }

    /// Apply retention now.
    pub fn cleanup(&self) -> BackupResult<Vec<BackupId>> {
        self.cleanup_at(Utc::now().timestamp())
    }

    pub fn cleanup_at(&self, now: i64) -> BackupResult<Vec<BackupId>> {
        let records = self.store.list_backups(None, None)?;
        let doomed = plan_cleanup(&records, RetentionPolicy::from_settings(&self.settings), now);
        for id in &doomed {
            if let Some(record) = records.iter().find(|r| r.id == *id) {
                self.delete_record(record)?;
            }
        }
        Ok(doomed)
    }

    /// Keep the newest `keep` records whose name starts with `prefix`.
    pub fn prune_prefix(&self, prefix: &str, keep: usize) -> BackupResult<Vec<BackupId>> {
        let records = self.store.list_by_name_prefix(prefix)?;
        let mut pruned = Vec::new();
        for record in records.iter().skip(keep) {
            self.delete_record(record)?;
            pruned.push(record.id);
        }
        Ok(pruned)
    }

    fn delete_record(&self, record: &BackupRecord) -> BackupResult<()> {
        match fs::remove_file(&record.file_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %record.file_path.display(), "Archive already gone");
            }
            Err(e) => {
                warn!(path = %record.file_path.display(), error = %e, "Could not delete archive");
            }
        }
        self.store.delete_backup(record.id)?;
        info!(
            target: event_names::BACKUP_PRUNED,
            id = %record.id,
            name = %record.name,
            backup_type = %record.backup_type,
            "Backup removed"
        );
        Ok(())
    }

    pub fn list(&self, kind: Option<BackupType>, limit: Option<usize>) -> BackupResult<Vec<BackupListing>> {
        Ok(self
            .store
            .list_backups(kind, limit)?
            .into_iter()
            .map(|record| {
                let exists = record.file_path.exists();
                BackupListing { record, exists }
            })
            .collect())
    }

    pub fn get(&self, id: BackupId) -> BackupResult<Option<BackupListing>> {
        Ok(self.store.get_backup(id)?.map(|record| {
            let exists = record.file_path.exists();
            BackupListing { record, exists }
        }))
    }

    pub fn stats(&self) -> BackupResult<BackupStats> {
        Ok(self.store.stats()?)
    }

    pub fn history(&self, limit: Option<usize>) -> BackupResult<Vec<RestoreEvent>> {
        Ok(self.store.restore_history(limit)?)
    }
}

fn wants_exec(path: &Path, options: &RestoreOptions) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    options
        .executable_suffixes
        .iter()
        .any(|s| name.ends_with(s.as_str()))
}
