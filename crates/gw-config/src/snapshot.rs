//! Immutable configuration snapshots and the live handle that swaps them.
//!
//! Readers take an `Arc<Config>` and keep using it for the rest of their
//! iteration; writers build a whole new `Config` and publish it with a single
//! pointer swap, so nobody ever observes a half-applied change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

use crate::resolve::ConfigSource;
use crate::settings::Config;

/// Audit record describing the configuration in force at some moment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub taken_at: DateTime<Utc>,
    pub schema_version: String,
    pub source: ConfigSource,
    #[serde(default)]
    pub path: Option<String>,
    /// SHA-256 over the canonical JSON of the effective config.
    pub content_hash: String,
    pub summary: ConfigSummary,
}

/// Key values for quick reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub device_id: String,
    pub install_dir: String,
    pub server_configured: bool,
    pub auto_update: bool,
    pub retention_days: u32,
    pub max_local_backups: u32,
    pub max_service_restarts: u32,
    pub entrance_detection: bool,
    pub exit_detection: bool,
}

impl ConfigSnapshot {
    pub fn capture(config: &Config, source: ConfigSource, path: Option<&std::path::Path>) -> Self {
        Self {
            taken_at: Utc::now(),
            schema_version: config.schema_version.clone(),
            source,
            path: path.map(|p| p.display().to_string()),
            content_hash: content_hash(config),
            summary: ConfigSummary {
                device_id: config.device.id.clone(),
                install_dir: config.device.install_dir.display().to_string(),
                server_configured: !config.server.url.is_empty(),
                auto_update: config.update.auto_update,
                retention_days: config.backup.retention_days,
                max_local_backups: config.backup.max_local_backups,
                max_service_restarts: config.recovery.max_service_restarts,
                entrance_detection: config.features.entrance_detection,
                exit_detection: config.features.exit_detection,
            },
        }
    }
}

/// Hash the effective configuration.
pub fn content_hash(config: &Config) -> String {
    let json = serde_json::to_vec(config).unwrap_or_default();
    hex::encode(Sha256::digest(&json))
}

/// Shared, atomically swappable configuration.
#[derive(Debug)]
pub struct LiveConfig {
    current: RwLock<Arc<Config>>,
    generation: AtomicU64,
}

impl LiveConfig {
    pub fn new(config: Config) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
            generation: AtomicU64::new(0),
        }
    }

    /// Current snapshot. Cheap; clones an `Arc`.
    pub fn load(&self) -> Arc<Config> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Publish a complete replacement.
    pub fn replace(&self, config: Config) -> u64 {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(config);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(target: "config.swapped", generation, "Configuration snapshot replaced");
        generation
    }

    /// Copy the current config, edit the copy, publish it.
    ///
    /// Runs under the write lock so two concurrent edits cannot lose each
    /// other's changes.
    pub fn update<F>(&self, edit: F) -> Arc<Config>
    where
        F: FnOnce(&mut Config),
    {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Config::clone(&guard);
        edit(&mut next);
        let next = Arc::new(next);
        *guard = next.clone();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(target: "config.swapped", generation, "Configuration snapshot updated");
        next
    }

    /// Number of swaps since construction.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_snapshot_capture() {
        let config = Config::default();
        let snapshot = ConfigSnapshot::capture(&config, ConfigSource::BuiltinDefault, None);

        assert_eq!(snapshot.content_hash.len(), 64);
        assert_eq!(snapshot.summary.device_id, "unknown");
        assert!(!snapshot.summary.server_configured);
    }

    #[test]
    fn test_content_hash_tracks_changes() {
        let a = Config::default();
        let mut b = Config::default();
        assert_eq!(content_hash(&a), content_hash(&b));

        b.features.exit_detection = false;
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_old_readers_keep_their_snapshot() {
        let live = LiveConfig::new(Config::default());
        let before = live.load();

        live.update(|cfg| cfg.features.entrance_detection = false);

        assert!(before.features.entrance_detection);
        assert!(!live.load().features.entrance_detection);
        assert_eq!(live.generation(), 1);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let live = Arc::new(LiveConfig::new(Config::default()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let live = Arc::clone(&live);
                thread::spawn(move || {
                    for _ in 0..25 {
                        live.update(|cfg| cfg.backup.retention_days += 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(live.load().backup.retention_days, 30 + 200);
        assert_eq!(live.generation(), 200);
    }
}
