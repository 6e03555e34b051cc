//! Typed configuration for the controller.
//!
//! Every section carries `#[serde(default)]` so a config file only has to
//! name the values it overrides.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Top-level configuration document (`gatewarden.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub schema_version: String,
    pub device: DeviceSettings,
    pub server: ServerSettings,
    pub backup: BackupSettings,
    pub update: UpdateSettings,
    pub recovery: RecoverySettings,
    pub features: FeatureFlags,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: crate::CONFIG_SCHEMA_VERSION.to_string(),
            device: DeviceSettings::default(),
            server: ServerSettings::default(),
            backup: BackupSettings::default(),
            update: UpdateSettings::default(),
            recovery: RecoverySettings::default(),
            features: FeatureFlags::default(),
        }
    }
}

impl Config {
    /// Directory holding persisted daemon state (status files, locks, reset requests).
    pub fn state_dir(&self) -> PathBuf {
        self.device.data_dir.join("state")
    }

    /// Path of the version marker inside the install tree.
    pub fn version_file(&self) -> PathBuf {
        self.device.install_dir.join(&self.device.version_file)
    }
}

/// Identity and layout of this device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    /// Device identifier reported to the server.
    pub id: String,
    /// Platform string sent with update checks.
    pub platform: String,
    /// Root of the installed application tree.
    pub install_dir: PathBuf,
    /// Data directory for state files.
    pub data_dir: PathBuf,
    /// systemd unit of the capture service.
    pub service_name: String,
    /// Version marker file name, relative to `install_dir`.
    pub version_file: String,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            id: "unknown".to_string(),
            platform: "raspberry_pi".to_string(),
            install_dir: PathBuf::from("/opt/parking-client"),
            data_dir: PathBuf::from("/var/lib/gatewarden"),
            service_name: "parking-camera".to_string(),
            version_file: "VERSION".to_string(),
        }
    }
}

/// Remote server endpoints shared by alerts, health probes and updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Base URL; empty disables every remote call.
    pub url: String,
    pub health_path: String,
    pub alert_path: String,
    pub update_check_path: String,
    pub health_timeout_secs: u64,
    pub alert_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            url: String::new(),
            health_path: "/health".to_string(),
            alert_path: "/api/camera/alert".to_string(),
            update_check_path: "/api/client/updates/check".to_string(),
            health_timeout_secs: 5,
            alert_timeout_secs: 10,
        }
    }
}

impl ServerSettings {
    /// Join the base URL and a path, tolerating a trailing slash on the base.
    pub fn endpoint(&self, path: &str) -> Option<String> {
        if self.url.is_empty() {
            return None;
        }
        Some(format!("{}{}", self.url.trim_end_matches('/'), path))
    }
}

/// Whether a backup source is a single file or a directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    File,
    Dir,
}

/// One logical backup source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub path: PathBuf,
    /// Optional hint; when absent the kind is taken from the filesystem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SourceKind>,
}

impl SourceSpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            kind: None,
        }
    }
}

/// Backup store layout, retention and schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    pub backup_dir: PathBuf,
    pub retention_days: u32,
    pub max_local_backups: u32,
    /// Local time of the daily backup, `HH:MM`.
    pub daily_time: String,
    /// Lowercase weekday name of the weekly full backup.
    pub weekly_day: String,
    pub schedule_check_secs: u64,
    pub daily_items: Vec<String>,
    pub manual_items: Vec<String>,
    /// Logical name → physical path.
    pub sources: BTreeMap<String, SourceSpec>,
}

impl Default for BackupSettings {
    fn default() -> Self {
        let root = PathBuf::from("/opt/parking-client");
        let mut sources = BTreeMap::new();
        sources.insert("config".to_string(), SourceSpec::new(root.join("config.json")));
        sources.insert("security".to_string(), SourceSpec::new(root.join("api.key")));
        sources.insert("certificates".to_string(), SourceSpec::new(root.join("certs")));
        sources.insert("critical_images".to_string(), SourceSpec::new(root.join("captures")));
        sources.insert(
            "parking_images".to_string(),
            SourceSpec::new(root.join("parking_captures")),
        );
        sources.insert("exit_images".to_string(), SourceSpec::new(root.join("exit_captures")));
        sources.insert("database".to_string(), SourceSpec::new(root.join("monitoring.db")));
        sources.insert("logs".to_string(), SourceSpec::new("/var/log/parking-client"));

        Self {
            backup_dir: root.join("backups"),
            retention_days: 30,
            max_local_backups: 10,
            daily_time: "02:00".to_string(),
            weekly_day: "sunday".to_string(),
            schedule_check_secs: 60,
            daily_items: vec!["config".into(), "security".into(), "database".into()],
            manual_items: vec![
                "config".into(),
                "security".into(),
                "database".into(),
                "critical_images".into(),
            ],
            sources,
        }
    }
}

/// Over-the-air update behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateSettings {
    pub check_interval_secs: u64,
    pub auto_update: bool,
    pub backup_before_update: bool,
    /// Working directory for downloads and extraction.
    pub temp_dir: PathBuf,
    /// Pre-update snapshots kept after pruning.
    pub keep_snapshots: usize,
    pub check_timeout_secs: u64,
    pub download_timeout_secs: u64,
    /// Files with these suffixes are marked executable on apply.
    pub script_suffixes: Vec<String>,
    /// Files with these suffixes are left out of pre-update snapshots.
    pub snapshot_exclude_suffixes: Vec<String>,
    /// Main artifact checked after apply, relative to the install dir.
    pub entry_artifact: String,
    /// Sanity check argv; `{entry}` is replaced by the entry artifact path.
    pub sanity_command: Vec<String>,
    pub post_update_hook: String,
    pub hook_timeout_secs: u64,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            check_interval_secs: 3600,
            auto_update: false,
            backup_before_update: true,
            temp_dir: PathBuf::from("/tmp/parking-client-update"),
            keep_snapshots: 5,
            check_timeout_secs: 30,
            download_timeout_secs: 300,
            script_suffixes: vec![".sh".into(), ".py".into()],
            snapshot_exclude_suffixes: vec![".log".into()],
            entry_artifact: "pi_camera_client.py".to_string(),
            sanity_command: vec![
                "python3".into(),
                "-m".into(),
                "py_compile".into(),
                "{entry}".into(),
            ],
            post_update_hook: "post_update.sh".to_string(),
            hook_timeout_secs: 300,
        }
    }
}

/// Memory thresholds in percent of total memory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryThresholds {
    pub warning: f64,
    pub cleanup: f64,
    pub critical: f64,
}

impl Default for MemoryThresholds {
    fn default() -> Self {
        Self {
            warning: 80.0,
            cleanup: 85.0,
            critical: 90.0,
        }
    }
}

/// A media directory pruned by age when the disk fills up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaCategory {
    pub name: String,
    pub path: PathBuf,
    pub max_age_days: u32,
}

/// Command templates for the camera collaborator.
///
/// `{camera}` expands to `entrance`/`exit` and `{index}` to the device index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraCommands {
    pub restart_one: Option<String>,
    pub restart_all: Option<String>,
    pub reinitialize: Option<String>,
    pub health_check: Option<String>,
}

/// Failure escalation tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoverySettings {
    pub check_interval_secs: u64,
    /// Minimum spacing between two attempts on the same domain.
    pub recovery_interval_secs: u64,
    pub max_camera_retries: u32,
    pub max_network_retries: u32,
    pub max_memory_retries: u32,
    pub max_disk_retries: u32,
    pub max_service_restarts: u32,
    pub memory: MemoryThresholds,
    pub disk_threshold: f64,
    /// Mount point whose usage is watched.
    pub disk_path: PathBuf,
    pub media: Vec<MediaCategory>,
    pub log_dir: PathBuf,
    pub log_retention_days: u32,
    pub vacuum_journal: bool,
    pub network_interface: String,
    pub camera_module: String,
    /// Base of the linear backoff used by the first network attempts.
    pub network_backoff_secs: u64,
    /// Idle per-domain state older than this is dropped.
    pub state_horizon_secs: u64,
    pub command_timeout_secs: u64,
    pub camera: CameraCommands,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        let root = PathBuf::from("/opt/parking-client");
        Self {
            check_interval_secs: 60,
            recovery_interval_secs: 30,
            max_camera_retries: 5,
            max_network_retries: 10,
            max_memory_retries: 5,
            max_disk_retries: 3,
            max_service_restarts: 3,
            memory: MemoryThresholds::default(),
            disk_threshold: 90.0,
            disk_path: PathBuf::from("/"),
            media: vec![
                MediaCategory {
                    name: "captures".into(),
                    path: root.join("captures"),
                    max_age_days: 3,
                },
                MediaCategory {
                    name: "parking_captures".into(),
                    path: root.join("parking_captures"),
                    max_age_days: 2,
                },
                MediaCategory {
                    name: "exit_captures".into(),
                    path: root.join("exit_captures"),
                    max_age_days: 2,
                },
            ],
            log_dir: PathBuf::from("/var/log/parking-client"),
            log_retention_days: 7,
            vacuum_journal: true,
            network_interface: "wlan0".to_string(),
            camera_module: "bcm2835_v4l2".to_string(),
            network_backoff_secs: 5,
            state_horizon_secs: 3600,
            command_timeout_secs: 60,
            camera: CameraCommands::default(),
        }
    }
}

/// Features the escalator may switch off at runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub entrance_detection: bool,
    pub exit_detection: bool,
    pub remote_alerts: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            entrance_detection: true,
            exit_detection: true,
            remote_alerts: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_uses_defaults() {
        let cfg: Config = serde_json::from_str(
            r#"{"device": {"id": "cam-7"}, "backup": {"max_local_backups": 3}}"#,
        )
        .unwrap();

        assert_eq!(cfg.device.id, "cam-7");
        assert_eq!(cfg.device.service_name, "parking-camera");
        assert_eq!(cfg.backup.max_local_backups, 3);
        assert_eq!(cfg.backup.retention_days, 30);
        assert_eq!(cfg.recovery.max_camera_retries, 5);
        assert_eq!(cfg.recovery.max_network_retries, 10);
    }

    #[test]
    fn test_default_registry_names() {
        let cfg = BackupSettings::default();
        let names: Vec<_> = cfg.sources.keys().cloned().collect();
        assert_eq!(
            names,
            vec![
                "certificates",
                "config",
                "critical_images",
                "database",
                "exit_images",
                "logs",
                "parking_images",
                "security"
            ]
        );
        for item in cfg.daily_items.iter().chain(cfg.manual_items.iter()) {
            assert!(cfg.sources.contains_key(item), "{item} missing from registry");
        }
    }

    #[test]
    fn test_endpoint_join() {
        let mut server = ServerSettings::default();
        assert_eq!(server.endpoint("/health"), None);

        server.url = "https://api.example.test/".into();
        assert_eq!(
            server.endpoint("/health").as_deref(),
            Some("https://api.example.test/health")
        );
    }

    #[test]
    fn test_source_kind_serde() {
        let spec: SourceSpec = serde_json::from_str(r#"{"path": "/x", "kind": "dir"}"#).unwrap();
        assert_eq!(spec.kind, Some(SourceKind::Dir));

        let json = serde_json::to_string(&SourceSpec::new("/y")).unwrap();
        assert!(!json.contains("kind"));
    }
}
