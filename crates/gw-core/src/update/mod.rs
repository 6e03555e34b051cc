//! Over-the-air updates.
//!
//! One run walks `CheckingUpdate → Downloading → Verifying → Extracting →
//! Applying → VerifyingApplied → Succeeded | RollingBack` and always ends
//! back in `Idle`. Runs are single flight: an in-process flag plus an
//! advisory lock on `state/update.lock` so a CLI-triggered update cannot
//! overlap the daemon's.
//!
//! Nothing in the install tree is touched before the package has been
//! downloaded, verified and extracted, a service restart has been reserved
//! from the shared budget, and (when enabled) a pre-update snapshot exists.
//! A failure after files were written rolls back from that snapshot.

pub mod client;
pub mod instructions;
pub mod lock;
pub mod state;

pub use client::{
    CheckRequest, CheckResponse, HttpUpdateSource, NoUpdateServer, UpdateOffer, UpdateSource,
};
pub use state::{UpdatePhase, UpdateReport, UpdateStatus};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use gw_bundle::{
    digests_match, extract_package, BundleError, Exclusions, ExtractedPackage, HashingWriter,
};
use gw_config::{save_config, Config, ConfigError, LiveConfig};

use crate::alert::{Alert, AlertSink};
use crate::backup::{
    BackupError, BackupManager, BackupRecord, RestoreMode, RestoreOptions, RestoreTarget,
};
use crate::budget::{BudgetExhausted, RestartPermit, ServiceRestartBudget};
use crate::controllers::command::run_checked;
use crate::controllers::{ControlError, ServiceController};
use crate::fsutil;
use crate::logging::event_names;
use crate::version::{read_version, write_version};

use instructions::{write_recovery_instructions, RollbackFailure, RECOVERY_FILE_NAME};
use lock::UpdateLock;

/// Name prefix of pre-update snapshots in the backup store.
pub const SNAPSHOT_PREFIX: &str = "pre_update_";

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("update already in progress")]
    AlreadyInProgress,

    #[error("no update available")]
    NoUpdateAvailable,

    #[error("{0} is not configured")]
    NotConfigured(String),

    #[error("{0}")]
    Network(String),

    #[error("checksum mismatch")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("package error: {0}")]
    Package(#[from] BundleError),

    #[error("pre-update snapshot failed: {0}")]
    Snapshot(#[source] BackupError),

    #[error(transparent)]
    Budget(#[from] BudgetExhausted),

    #[error("version mismatch after apply: expected {expected}, found {actual}")]
    VersionMismatch { expected: String, actual: String },

    #[error("sanity check failed: {0}")]
    SanityCheck(String),

    #[error("post-update hook failed: {0}")]
    Hook(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<UpdateError> for gw_common::Error {
    fn from(err: UpdateError) -> Self {
        match err {
            UpdateError::AlreadyInProgress => gw_common::Error::AlreadyInProgress("update".into()),
            UpdateError::NoUpdateAvailable => gw_common::Error::NotFound("available update".into()),
            UpdateError::NotConfigured(what) => gw_common::Error::NotConfigured(what),
            UpdateError::Network(msg) => gw_common::Error::Network(msg),
            UpdateError::ChecksumMismatch { expected, actual } => {
                gw_common::Error::ChecksumMismatch {
                    subject: "update package".into(),
                    expected,
                    actual,
                }
            }
            UpdateError::Package(e) => e.into(),
            UpdateError::Snapshot(e) => e.into(),
            UpdateError::Budget(e) => e.into(),
            UpdateError::Io(e) => gw_common::Error::Io(e),
            other @ (UpdateError::VersionMismatch { .. }
            | UpdateError::SanityCheck(_)
            | UpdateError::Hook(_)) => gw_common::Error::CommandFailed {
                command: "update apply".into(),
                detail: other.to_string(),
            },
        }
    }
}

/// How a run ended. Failures of the update itself are outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpdateOutcome {
    NoUpdate,
    /// Found but not installed because auto-update is off.
    Available { version: String },
    Succeeded { from: String, to: String },
    Failed {
        version: String,
        reason: String,
        rolled_back: bool,
    },
}

/// Resets the single-flight state when a run ends, however it ends.
struct FlightGuard<'a> {
    manager: &'a UpdateManager,
    _lock: Option<UpdateLock>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.manager.edit_status(|s| {
            s.phase = UpdatePhase::Idle;
            s.update_in_progress = false;
        });
        self.manager.in_flight.store(false, Ordering::SeqCst);
    }
}

/// Download and extraction area, removed on drop.
struct TempWorkspace {
    root: PathBuf,
}

impl TempWorkspace {
    fn create(root: &Path) -> io::Result<Self> {
        fsutil::remove_path(root)?;
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }
}

impl Drop for TempWorkspace {
    fn drop(&mut self) {
        match fsutil::remove_path(&self.root) {
            Ok(()) => debug!(path = %self.root.display(), "Temporary files removed"),
            Err(e) => warn!(
                path = %self.root.display(),
                error = %e,
                "Could not remove temporary files"
            ),
        }
    }
}

/// What one run has done so far, for the failure path.
#[derive(Default)]
struct Attempt<'a> {
    permit: Option<RestartPermit<'a>>,
    snapshot: Option<BackupRecord>,
    apply_started: bool,
    /// Files that did not exist before apply; removed on rollback.
    added: Vec<PathBuf>,
}

pub struct UpdateManager {
    live: Arc<LiveConfig>,
    config_path: Option<PathBuf>,
    backups: Arc<BackupManager>,
    source: Arc<dyn UpdateSource>,
    service: Arc<dyn ServiceController>,
    budget: Arc<ServiceRestartBudget>,
    alerts: Arc<dyn AlertSink>,
    status: Mutex<UpdateStatus>,
    in_flight: AtomicBool,
}

impl std::fmt::Debug for UpdateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateManager")
            .field("in_flight", &self.in_flight.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl UpdateManager {
    pub fn new(
        live: Arc<LiveConfig>,
        backups: Arc<BackupManager>,
        source: Arc<dyn UpdateSource>,
        service: Arc<dyn ServiceController>,
        budget: Arc<ServiceRestartBudget>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let status = UpdateStatus::load(&Self::status_path(&live.load())).unwrap_or_default();
        Self {
            live,
            config_path: None,
            backups,
            source,
            service,
            budget,
            alerts,
            status: Mutex::new(status),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Config file that `set_auto_update` writes back to.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    fn status_path(config: &Config) -> PathBuf {
        config.state_dir().join("update.json")
    }

    fn lock_path(config: &Config) -> PathBuf {
        config.state_dir().join("update.lock")
    }

    fn lock_status(&self) -> MutexGuard<'_, UpdateStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn edit_status<F: FnOnce(&mut UpdateStatus)>(&self, edit: F) {
        let mut status = self.lock_status();
        edit(&mut status);
        let path = Self::status_path(&self.live.load());
        if let Err(e) = status.save(&path) {
            warn!(path = %path.display(), error = %e, "Could not persist update status");
        }
    }

    fn set_phase(&self, phase: UpdatePhase) {
        debug!(phase = %phase, "Update phase");
        self.edit_status(|s| s.phase = phase);
    }

    pub fn status(&self) -> UpdateStatus {
        self.lock_status().clone()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn report(&self) -> UpdateReport {
        let config = self.live.load();
        UpdateReport {
            current_version: read_version(&config.version_file()),
            auto_update_enabled: config.update.auto_update,
            update_server: self.source.server(),
            status: self.status(),
        }
    }

    fn begin(&self) -> Result<FlightGuard<'_>, UpdateError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!(target: event_names::UPDATE_BUSY, "Update already in progress");
            return Err(UpdateError::AlreadyInProgress);
        }

        let lock_path = Self::lock_path(&self.live.load());
        let lock = match UpdateLock::try_acquire(&lock_path) {
            Ok(Some(lock)) => Some(lock),
            Ok(None) => {
                self.in_flight.store(false, Ordering::SeqCst);
                warn!(
                    target: event_names::UPDATE_BUSY,
                    lock = %lock_path.display(),
                    "Update already in progress in another process"
                );
                return Err(UpdateError::AlreadyInProgress);
            }
            Err(e) => {
                warn!(
                    lock = %lock_path.display(),
                    error = %e,
                    "Update lock unavailable, relying on in-process guard"
                );
                None
            }
        };

        self.edit_status(|s| s.update_in_progress = true);
        Ok(FlightGuard {
            manager: self,
            _lock: lock,
        })
    }

    /// Ask the server whether an update exists; never installs.
    pub fn check_now(&self) -> Result<Option<UpdateOffer>, UpdateError> {
        let _guard = self.begin()?;
        self.check(&self.live.load())
    }

    /// One scheduled tick: check, then install if auto-update is on.
    pub fn poll(&self) -> Result<UpdateOutcome, UpdateError> {
        let _guard = self.begin()?;
        let config = self.live.load();
        match self.check(&config)? {
            None => Ok(UpdateOutcome::NoUpdate),
            Some(offer) if !config.update.auto_update => {
                info!(version = %offer.version, "Auto-update disabled, manual update required");
                Ok(UpdateOutcome::Available {
                    version: offer.version,
                })
            }
            Some(offer) => Ok(self.run(&config, &offer)),
        }
    }

    /// Operator-triggered update. Without `force` a previous check must
    /// have seen an update; either way the server is asked again first.
    pub fn apply(&self, force: bool) -> Result<UpdateOutcome, UpdateError> {
        let _guard = self.begin()?;
        if !force && self.status().available_version.is_none() {
            return Err(UpdateError::NoUpdateAvailable);
        }
        let config = self.live.load();
        match self.check(&config)? {
            Some(offer) => Ok(self.run(&config, &offer)),
            None => Err(UpdateError::NoUpdateAvailable),
        }
    }

    /// Flip auto-update in the live config and, when known, the config file.
    pub fn set_auto_update(&self, enabled: bool) -> Result<(), ConfigError> {
        let config = self.live.update(|cfg| cfg.update.auto_update = enabled);
        if let Some(path) = &self.config_path {
            save_config(path, &config)?;
        }
        info!(enabled, "Auto-update toggled");
        Ok(())
    }

    fn check(&self, config: &Config) -> Result<Option<UpdateOffer>, UpdateError> {
        self.set_phase(UpdatePhase::CheckingUpdate);
        let request = CheckRequest {
            camera_id: config.device.id.clone(),
            current_version: read_version(&config.version_file()),
            platform: config.device.platform.clone(),
            timestamp: Utc::now(),
        };
        debug!(
            target: event_names::UPDATE_CHECK,
            current = %request.current_version,
            "Checking for updates"
        );

        let response = match self.source.check(&request) {
            Ok(response) => response,
            Err(e) => {
                warn!(target: event_names::UPDATE_CHECK, error = %e, "Update check failed");
                return Err(e);
            }
        };

        let offer = match (response.update_available, response.version) {
            (true, Some(version)) => {
                let download_url = response
                    .download_url
                    .or_else(|| self.source.default_download_url(&version))
                    .ok_or_else(|| {
                        UpdateError::Network("check response has no download url".into())
                    })?;
                Some(UpdateOffer {
                    version,
                    download_url,
                    checksum: response.checksum.filter(|c| !c.trim().is_empty()),
                })
            }
            _ => None,
        };

        let now = Utc::now();
        match &offer {
            Some(offer) => {
                info!(
                    target: event_names::UPDATE_FOUND,
                    version = %offer.version,
                    current = %request.current_version,
                    "Update available"
                );
                self.edit_status(|s| {
                    s.last_check_at = Some(now);
                    s.available_version = Some(offer.version.clone());
                    s.phase = UpdatePhase::UpdateFound;
                });
            }
            None => {
                debug!(target: event_names::UPDATE_CHECK, "No update available");
                self.edit_status(|s| {
                    s.last_check_at = Some(now);
                    s.available_version = None;
                    s.phase = UpdatePhase::NoUpdate;
                });
            }
        }
        Ok(offer)
    }

    fn run(&self, config: &Config, offer: &UpdateOffer) -> UpdateOutcome {
        let from = read_version(&config.version_file());
        info!(from = %from, to = %offer.version, "Starting update");

        let mut attempt = Attempt::default();
        let result = TempWorkspace::create(&config.update.temp_dir)
            .map_err(UpdateError::from)
            .and_then(|workspace| self.execute(config, offer, &from, &workspace, &mut attempt));

        match result {
            Ok(()) => self.succeed(&from, offer, attempt),
            Err(err) => self.fail(config, &from, offer, err, attempt),
        }
    }

    fn execute<'a>(
        &'a self,
        config: &Config,
        offer: &UpdateOffer,
        from: &str,
        workspace: &TempWorkspace,
        attempt: &mut Attempt<'a>,
    ) -> Result<(), UpdateError> {
        self.set_phase(UpdatePhase::Downloading);
        let (package, digest) = self.download(offer, workspace)?;

        self.set_phase(UpdatePhase::Verifying);
        match &offer.checksum {
            Some(expected) if !digests_match(expected, &digest) => {
                error!(
                    target: event_names::UPDATE_VERIFY_FAIL,
                    expected = %expected,
                    actual = %digest,
                    "Package checksum mismatch"
                );
                return Err(UpdateError::ChecksumMismatch {
                    expected: expected.clone(),
                    actual: digest,
                });
            }
            Some(_) => info!(
                target: event_names::UPDATE_VERIFY_OK,
                sha256 = %digest,
                "Package verified"
            ),
            None => warn!(
                target: event_names::UPDATE_VERIFY_SKIPPED,
                sha256 = %digest,
                "Server sent no checksum, package not verified"
            ),
        }

        self.set_phase(UpdatePhase::Extracting);
        let extracted = extract_package(&package, &workspace.root.join("extracted"))?;

        self.set_phase(UpdatePhase::Applying);
        attempt.permit = Some(self.budget.reserve("update")?);

        if config.update.backup_before_update {
            let snapshot = self.take_snapshot(config, from, &offer.version)?;
            attempt.snapshot = Some(snapshot);
        }

        self.apply_files(config, offer, &extracted, attempt)?;

        self.set_phase(UpdatePhase::VerifyingApplied);
        self.verify_applied(config, &offer.version)
    }

    fn download(
        &self,
        offer: &UpdateOffer,
        workspace: &TempWorkspace,
    ) -> Result<(PathBuf, String), UpdateError> {
        let dir = workspace.root.join("download");
        fs::create_dir_all(&dir)?;
        let file_name = package_file_name(&offer.download_url, &offer.version);
        let path = dir.join(&file_name);
        let partial = dir.join(format!("{file_name}.part"));

        let result = (|| -> Result<(String, u64), UpdateError> {
            let mut sink = HashingWriter::new(File::create(&partial)?);
            self.source.download(&offer.download_url, &mut sink)?;
            let (file, digest, bytes) = sink.finish()?;
            file.sync_all()?;
            Ok((digest, bytes))
        })();

        let (digest, bytes) = match result {
            Ok(done) => done,
            Err(e) => {
                let _ = fs::remove_file(&partial);
                warn!(
                    target: event_names::UPDATE_DOWNLOAD,
                    url = %offer.download_url,
                    error = %e,
                    "Download failed"
                );
                return Err(e);
            }
        };
        fs::rename(&partial, &path)?;
        info!(
            target: event_names::UPDATE_DOWNLOAD,
            url = %offer.download_url,
            bytes,
            "Package downloaded"
        );
        Ok((path, digest))
    }

    fn take_snapshot(
        &self,
        config: &Config,
        from: &str,
        to: &str,
    ) -> Result<BackupRecord, UpdateError> {
        let mut exclusions = Exclusions::new()
            .with_path(&config.backup.backup_dir)
            .with_path(&config.update.temp_dir)
            .with_path(config.state_dir());
        for suffix in &config.update.snapshot_exclude_suffixes {
            exclusions = exclusions.with_suffix(suffix.as_str());
        }

        let record = self
            .backups
            .snapshot_tree(
                &format!("{SNAPSHOT_PREFIX}{from}"),
                &config.device.install_dir,
                exclusions,
                &format!("pre-update snapshot {from} -> {to}"),
            )
            .map_err(UpdateError::Snapshot)?;
        info!(
            target: event_names::UPDATE_SNAPSHOT,
            id = %record.id,
            name = %record.name,
            "Pre-update snapshot taken"
        );

        if let Err(e) = self
            .backups
            .prune_prefix(SNAPSHOT_PREFIX, config.update.keep_snapshots)
        {
            warn!(error = %e, "Could not prune old pre-update snapshots");
        }
        Ok(record)
    }

    fn apply_files(
        &self,
        config: &Config,
        offer: &UpdateOffer,
        extracted: &ExtractedPackage,
        attempt: &mut Attempt<'_>,
    ) -> Result<(), UpdateError> {
        info!(
            target: event_names::UPDATE_APPLY,
            version = %offer.version,
            files = extracted.files.len(),
            "Applying update"
        );
        if let Err(e) = self.service.stop() {
            warn!(error = %e, "Could not stop service before apply");
        }
        attempt.apply_started = true;

        let install = &config.device.install_dir;
        for rel in &extracted.files {
            let dest = install.join(rel);
            if !dest.exists() {
                attempt.added.push(dest.clone());
            }
            let exec = has_suffix(rel, &config.update.script_suffixes);
            fsutil::atomic_replace(&extracted.root.join(rel), &dest, exec)?;
        }

        let version_file = config.version_file();
        if !version_file.exists() {
            attempt.added.push(version_file.clone());
        }
        write_version(&version_file, &offer.version)?;

        let hook = &config.update.post_update_hook;
        if !hook.is_empty() && extracted.contains(hook) {
            let script = extracted.root.join(hook).to_string_lossy().into_owned();
            info!(hook = %hook, "Running post-update hook");
            run_checked(
                "bash",
                &[script.as_str()],
                Some(install),
                Duration::from_secs(config.update.hook_timeout_secs),
            )
            .map_err(|e: ControlError| UpdateError::Hook(e.to_string()))?;
        }
        Ok(())
    }

    fn verify_applied(&self, config: &Config, expected: &str) -> Result<(), UpdateError> {
        let actual = read_version(&config.version_file());
        if actual != expected {
            return Err(UpdateError::VersionMismatch {
                expected: expected.to_string(),
                actual,
            });
        }

        let entry = config.device.install_dir.join(&config.update.entry_artifact);
        let argv = &config.update.sanity_command;
        if config.update.entry_artifact.is_empty() || !entry.is_file() || argv.is_empty() {
            debug!(entry = %entry.display(), "No sanity check to run");
            return Ok(());
        }

        let entry = entry.to_string_lossy();
        let argv: Vec<String> = argv.iter().map(|a| a.replace("{entry}", &entry)).collect();
        let args: Vec<&str> = argv[1..].iter().map(String::as_str).collect();
        run_checked(
            &argv[0],
            &args,
            Some(&config.device.install_dir),
            Duration::from_secs(config.update.hook_timeout_secs),
        )
        .map_err(|e| UpdateError::SanityCheck(e.to_string()))?;
        Ok(())
    }

    fn succeed(&self, from: &str, offer: &UpdateOffer, mut attempt: Attempt<'_>) -> UpdateOutcome {
        self.set_phase(UpdatePhase::Succeeded);
        let restarted = match self.service.restart() {
            Ok(()) => true,
            Err(e) => {
                error!(error = %e, "Service restart after update failed");
                false
            }
        };
        // A verified update hands its restart back; only failed or
        // unhealthy runs count against recovery.
        if let Some(permit) = attempt.permit.take() {
            if !restarted {
                permit.commit();
            }
        }

        let now = Utc::now();
        self.edit_status(|s| {
            s.update_result = Some("success".to_string());
            s.last_update_at = Some(now);
            s.available_version = None;
        });
        info!(
            target: event_names::UPDATE_SUCCEEDED,
            from = %from,
            to = %offer.version,
            "Update complete"
        );
        UpdateOutcome::Succeeded {
            from: from.to_string(),
            to: offer.version.clone(),
        }
    }

    fn fail(
        &self,
        config: &Config,
        from: &str,
        offer: &UpdateOffer,
        err: UpdateError,
        mut attempt: Attempt<'_>,
    ) -> UpdateOutcome {
        let reason = err.to_string();
        error!(
            target: event_names::UPDATE_FAILED,
            version = %offer.version,
            error = %reason,
            "Update failed"
        );

        let mut rolled_back = false;
        if attempt.apply_started {
            match &attempt.snapshot {
                Some(snapshot) => {
                    self.set_phase(UpdatePhase::RollingBack);
                    match self.rollback(config, snapshot, &attempt.added) {
                        Ok(()) => rolled_back = true,
                        Err(rb) => {
                            self.rollback_failed(config, from, offer, &reason, &rb, snapshot)
                        }
                    }
                }
                None => error!(
                    version = %offer.version,
                    "No pre-update snapshot; install tree left as applied"
                ),
            }

            // The service was stopped for apply.
            if let Err(e) = self.service.restart() {
                error!(error = %e, "Service restart after failed update failed");
            }
            if let Some(permit) = attempt.permit.take() {
                permit.commit();
            }
        }

        self.edit_status(|s| s.update_result = Some(format!("failed: {reason}")));
        UpdateOutcome::Failed {
            version: offer.version.clone(),
            reason,
            rolled_back,
        }
    }

    fn rollback(
        &self,
        config: &Config,
        snapshot: &BackupRecord,
        added: &[PathBuf],
    ) -> Result<(), BackupError> {
        warn!(
            target: event_names::UPDATE_ROLLBACK_START,
            snapshot = %snapshot.name,
            "Rolling back to pre-update snapshot"
        );
        let options = RestoreOptions {
            mode: RestoreMode::Overlay,
            manage_service: false,
            executable_suffixes: config.update.script_suffixes.clone(),
        };
        self.backups
            .restore_with(&RestoreTarget::Id(snapshot.id), None, &options)?;

        for path in added {
            if let Err(e) = fsutil::remove_path(path) {
                warn!(path = %path.display(), error = %e, "Could not remove file added by update");
            }
        }
        info!(
            target: event_names::UPDATE_ROLLBACK_COMPLETE,
            snapshot = %snapshot.name,
            removed = added.len(),
            "Rollback complete"
        );
        Ok(())
    }

    fn rollback_failed(
        &self,
        config: &Config,
        from: &str,
        offer: &UpdateOffer,
        reason: &str,
        rollback_error: &BackupError,
        snapshot: &BackupRecord,
    ) {
        error!(
            target: event_names::UPDATE_ROLLBACK_FAILED,
            snapshot = %snapshot.name,
            error = %rollback_error,
            "Rollback failed, manual intervention required"
        );

        let notes = config.device.data_dir.join(RECOVERY_FILE_NAME);
        let rollback_error = rollback_error.to_string();
        let failure = RollbackFailure {
            from_version: from,
            target_version: &offer.version,
            update_error: reason,
            rollback_error: &rollback_error,
            snapshot: Some(&snapshot.file_path),
            install_dir: &config.device.install_dir,
            service_name: &config.device.service_name,
        };
        match write_recovery_instructions(&notes, &failure) {
            Ok(()) => warn!(path = %notes.display(), "Recovery instructions written"),
            Err(e) => error!(
                path = %notes.display(),
                error = %e,
                "Could not write recovery instructions"
            ),
        }

        self.alerts.push(&Alert::critical(
            &config.device.id,
            "update_rollback_failed",
            serde_json::json!({
                "from_version": from,
                "target_version": offer.version,
                "update_error": reason,
                "rollback_error": rollback_error,
                "snapshot": snapshot.file_path.display().to_string(),
            }),
        ));
    }
}

/// Last path segment of the download URL, or `update_<version>` when the
/// URL has none.
fn package_file_name(url: &str, version: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let segment = path
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && *s != "." && *s != "..")
        .filter(|_| path.contains('/'));
    match segment {
        Some(name) => name.to_string(),
        None => format!("update_{version}"),
    }
}

fn has_suffix(path: &Path, suffixes: &[String]) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    suffixes.iter().any(|s| name.ends_with(s.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::RecordingAlertSink;
    use crate::backup::MetadataStore;
    use crate::controllers::mock::MockService;
    use std::io::Write;
    use tempfile::TempDir;

    /// Serves one package from memory.
    struct FakeSource {
        version: Option<String>,
        package: Vec<u8>,
        url: String,
        checksum: Option<String>,
        /// Drop the connection after half the package.
        cut_download: bool,
    }

    impl UpdateSource for FakeSource {
        fn check(&self, _request: &CheckRequest) -> Result<CheckResponse, UpdateError> {
            Ok(CheckResponse {
                update_available: self.version.is_some(),
                version: self.version.clone(),
                download_url: Some(self.url.clone()),
                checksum: self.checksum.clone(),
            })
        }

        fn download(&self, _url: &str, sink: &mut dyn Write) -> Result<u64, UpdateError> {
            if self.cut_download {
                sink.write_all(&self.package[..self.package.len() / 2])?;
                return Err(UpdateError::Network("connection reset".into()));
            }
            sink.write_all(&self.package)?;
            Ok(self.package.len() as u64)
        }
    }

    fn zip_package(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut cursor);
            let options: zip::write::FileOptions<'_, ()> = zip::write::FileOptions::default();
            for (name, body) in files {
                zip.start_file(*name, options).unwrap();
                zip.write_all(body).unwrap();
            }
            zip.finish().unwrap();
        }
        cursor.into_inner()
    }

    struct Fixture {
        temp: TempDir,
        config: Config,
        service: Arc<MockService>,
        alerts: Arc<RecordingAlertSink>,
        budget: Arc<ServiceRestartBudget>,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.device.install_dir = temp.path().join("install");
        config.device.data_dir = temp.path().join("data");
        config.backup.backup_dir = temp.path().join("backups");
        config.update.temp_dir = temp.path().join("tmp");
        config.update.sanity_command = Vec::new();
        config.update.auto_update = true;

        fs::create_dir_all(&config.device.install_dir).unwrap();
        fs::write(config.device.install_dir.join("main.py"), b"v1").unwrap();
        write_version(&config.version_file(), "1.0.0").unwrap();

        Fixture {
            temp,
            config,
            service: Arc::new(MockService::default()),
            alerts: Arc::new(RecordingAlertSink::default()),
            budget: Arc::new(ServiceRestartBudget::new(3)),
        }
    }

    fn manager(fx: &Fixture, source: FakeSource) -> UpdateManager {
        let backups = BackupManager::with_store(
            fx.config.backup.clone(),
            MetadataStore::open_in_memory().unwrap(),
            fx.service.clone(),
            fx.config.version_file(),
        );
        UpdateManager::new(
            Arc::new(LiveConfig::new(fx.config.clone())),
            Arc::new(backups),
            Arc::new(source),
            fx.service.clone(),
            fx.budget.clone(),
            fx.alerts.clone(),
        )
    }

    fn offer(package: Vec<u8>, checksum: Option<String>) -> FakeSource {
        FakeSource {
            version: Some("1.2.0".into()),
            package,
            url: "http://server/api/client/updates/download/update-1.2.0.zip".into(),
            checksum,
            cut_download: false,
        }
    }

    #[test]
    fn test_successful_update() {
        let fx = fixture();
        let package = zip_package(&[("main.py", b"v2"), ("lib/extra.py", b"x")]);
        let checksum = gw_bundle::hash_bytes(&package);
        let updater = manager(&fx, offer(package, Some(checksum)));

        let outcome = updater.poll().unwrap();
        assert_eq!(
            outcome,
            UpdateOutcome::Succeeded {
                from: "1.0.0".into(),
                to: "1.2.0".into()
            }
        );
        assert_eq!(read_version(&fx.config.version_file()), "1.2.0");
        assert_eq!(fx.service.count("restart"), 1);
        assert_eq!(updater.status().update_result.as_deref(), Some("success"));
        assert_eq!(updater.status().phase, UpdatePhase::Idle);
        assert!(!fx.config.update.temp_dir.exists());
        assert_eq!(fx.budget.usage().used, 0);
        #[cfg(unix)]
        assert!(fsutil::is_executable(
            &fx.config.device.install_dir.join("lib").join("extra.py")
        ));
    }

    #[test]
    fn test_checksum_mismatch_touches_nothing() {
        let fx = fixture();
        let package = zip_package(&[("main.py", b"v2")]);
        let updater = manager(&fx, offer(package, Some("00".repeat(32))));

        let outcome = updater.poll().unwrap();
        assert!(matches!(
            outcome,
            UpdateOutcome::Failed { rolled_back: false, .. }
        ));
        assert_eq!(
            updater.status().update_result.as_deref(),
            Some("failed: checksum mismatch")
        );
        assert_eq!(read_version(&fx.config.version_file()), "1.0.0");
        assert!(fx.service.calls().is_empty());
        assert_eq!(fx.budget.usage().used, 0);
        assert!(!fx.config.update.temp_dir.exists());
    }

    #[test]
    fn test_missing_checksum_is_accepted() {
        let fx = fixture();
        let updater = manager(&fx, offer(zip_package(&[("main.py", b"v2")]), None));
        assert!(matches!(updater.poll().unwrap(), UpdateOutcome::Succeeded { .. }));
    }

    #[test]
    fn test_failed_sanity_check_rolls_back() {
        let mut fx = fixture();
        fx.config.update.entry_artifact = "main.py".into();
        fx.config.update.sanity_command = vec!["false".into()];
        let package = zip_package(&[("main.py", b"v2"), ("new_module.py", b"n")]);
        let updater = manager(&fx, offer(package, None));

        let outcome = updater.poll().unwrap();
        match outcome {
            UpdateOutcome::Failed {
                rolled_back,
                reason,
                ..
            } => {
                assert!(rolled_back);
                assert!(reason.starts_with("sanity check failed"), "{reason}");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        let install = &fx.config.device.install_dir;
        assert_eq!(fs::read(install.join("main.py")).unwrap(), b"v1");
        assert!(!install.join("new_module.py").exists());
        assert_eq!(read_version(&fx.config.version_file()), "1.0.0");
        assert!(updater
            .status()
            .update_result
            .unwrap()
            .starts_with("failed:"));
        assert_eq!(fx.service.calls(), vec!["stop", "restart"]);
    }

    #[test]
    fn test_unknown_package_extension_fails_before_apply() {
        let fx = fixture();
        let mut source = offer(b"not an archive".to_vec(), None);
        source.url = "http://server/pkg.rar".into();
        let updater = manager(&fx, source);

        let outcome = updater.poll().unwrap();
        assert!(matches!(outcome, UpdateOutcome::Failed { rolled_back: false, .. }));
        assert!(fx.service.calls().is_empty());
    }

    #[test]
    fn test_exhausted_budget_blocks_update() {
        let fx = fixture();
        for _ in 0..3 {
            fx.budget.reserve("camera").unwrap().commit();
        }
        let updater = manager(&fx, offer(zip_package(&[("main.py", b"v2")]), None));

        let outcome = updater.poll().unwrap();
        assert!(matches!(outcome, UpdateOutcome::Failed { rolled_back: false, .. }));
        assert_eq!(read_version(&fx.config.version_file()), "1.0.0");
    }

    #[test]
    fn test_interrupted_download_leaves_nothing_behind() {
        let fx = fixture();
        let mut source = offer(zip_package(&[("main.py", b"v2")]), None);
        source.cut_download = true;
        let updater = manager(&fx, source);

        let outcome = updater.poll().unwrap();
        assert!(matches!(outcome, UpdateOutcome::Failed { rolled_back: false, .. }));
        assert!(!fx.config.update.temp_dir.exists());
        assert!(fx.service.calls().is_empty());
        assert_eq!(fx.budget.usage().used, 0);
        assert_eq!(read_version(&fx.config.version_file()), "1.0.0");
        assert_eq!(
            fs::read(fx.config.device.install_dir.join("main.py")).unwrap(),
            b"v1"
        );
        assert!(updater
            .status()
            .update_result
            .unwrap()
            .starts_with("failed:"));
    }

    #[test]
    fn test_healthy_updates_do_not_drain_budget() {
        let fx = fixture();
        let updater = manager(&fx, offer(zip_package(&[("main.py", b"v2")]), None));

        for _ in 0..4 {
            assert!(matches!(updater.poll().unwrap(), UpdateOutcome::Succeeded { .. }));
        }
        assert_eq!(fx.service.count("restart"), 4);
        assert_eq!(fx.budget.usage().used, 0);
        assert!(fx.budget.reserve("camera").is_ok());
    }

    #[test]
    fn test_failed_update_keeps_its_restart() {
        let mut fx = fixture();
        fx.config.update.entry_artifact = "main.py".into();
        fx.config.update.sanity_command = vec!["false".into()];
        let updater = manager(&fx, offer(zip_package(&[("main.py", b"v2")]), None));

        assert!(matches!(updater.poll().unwrap(), UpdateOutcome::Failed { rolled_back: true, .. }));
        assert_eq!(fx.budget.usage().used, 1);
    }

    #[test]
    fn test_only_newest_snapshots_are_kept() {
        let fx = fixture();
        let updater = manager(&fx, offer(zip_package(&[("main.py", b"v2")]), None));

        for _ in 0..6 {
            assert!(matches!(updater.poll().unwrap(), UpdateOutcome::Succeeded { .. }));
        }
        let snapshots: Vec<_> = updater
            .backups
            .list(None, None)
            .unwrap()
            .into_iter()
            .filter(|l| l.record.name.starts_with(SNAPSHOT_PREFIX))
            .collect();
        assert_eq!(snapshots.len(), fx.config.update.keep_snapshots);
        assert_eq!(snapshots.len(), 5);
        assert!(snapshots.iter().all(|l| l.exists));
    }

    #[test]
    fn test_auto_update_off_only_reports() {
        let mut fx = fixture();
        fx.config.update.auto_update = false;
        let updater = manager(&fx, offer(zip_package(&[("main.py", b"v2")]), None));

        assert_eq!(
            updater.poll().unwrap(),
            UpdateOutcome::Available {
                version: "1.2.0".into()
            }
        );
        assert_eq!(updater.status().available_version.as_deref(), Some("1.2.0"));
        assert_eq!(read_version(&fx.config.version_file()), "1.0.0");
    }

    #[test]
    fn test_apply_without_known_update_needs_force() {
        let fx = fixture();
        let updater = manager(&fx, offer(zip_package(&[("main.py", b"v2")]), None));
        assert!(matches!(updater.apply(false), Err(UpdateError::NoUpdateAvailable)));
        assert!(matches!(updater.apply(true), Ok(UpdateOutcome::Succeeded { .. })));
    }

    #[test]
    fn test_busy_caller_is_turned_away() {
        let fx = fixture();
        let updater = manager(&fx, offer(Vec::new(), None));
        let _guard = updater.begin().unwrap();
        let before = updater.status();
        assert!(matches!(updater.poll(), Err(UpdateError::AlreadyInProgress)));
        assert_eq!(updater.status(), before);
    }

    #[test]
    fn test_status_persisted_for_other_processes() {
        let fx = fixture();
        let updater = manager(&fx, offer(zip_package(&[("main.py", b"v2")]), None));
        updater.poll().unwrap();

        let on_disk = UpdateStatus::load(&fx.config.state_dir().join("update.json")).unwrap();
        assert_eq!(on_disk.update_result.as_deref(), Some("success"));
        assert!(!on_disk.update_in_progress);
        assert!(fx.temp.path().join("install").join("main.py").exists());
    }

    #[test]
    fn test_package_file_name() {
        assert_eq!(
            package_file_name("http://s/dl/update-1.2.0.tar.gz?token=x", "1.2.0"),
            "update-1.2.0.tar.gz"
        );
        assert_eq!(package_file_name("http://s/dl/", "1.2.0"), "update_1.2.0");
        assert_eq!(package_file_name("pkg", "1.2.0"), "update_1.2.0");
    }
}
