//! Age-based pruning for the disk domain.

use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use gw_config::RecoverySettings;

use crate::controllers::command::run_checked;
use crate::fsutil;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PruneStats {
    pub files: u64,
    pub bytes: u64,
}

impl std::ops::AddAssign for PruneStats {
    fn add_assign(&mut self, other: Self) {
        self.files += other.files;
        self.bytes += other.bytes;
    }
}

/// Delete every regular file under `dir` last modified before `now - max_age`.
///
/// A missing directory prunes nothing. Files that vanish or refuse deletion
/// are skipped.
pub fn prune_older_than(dir: &Path, max_age: Duration, now: SystemTime) -> io::Result<PruneStats> {
    let mut stats = PruneStats::default();
    if !dir.is_dir() {
        return Ok(stats);
    }
    let cutoff = now.checked_sub(max_age).unwrap_or(SystemTime::UNIX_EPOCH);

    for rel in fsutil::relative_files(dir)? {
        let path = dir.join(&rel);
        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(_) => continue,
        };
        let modified = meta.modified().unwrap_or(now);
        if modified >= cutoff {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                stats.files += 1;
                stats.bytes += meta.len();
            }
            Err(e) => debug!(path = %path.display(), error = %e, "Could not prune file"),
        }
    }
    Ok(stats)
}

/// Free space: old media per category, then old logs.
pub fn free_space(settings: &RecoverySettings, now: SystemTime) -> PruneStats {
    let mut total = PruneStats::default();

    for category in &settings.media {
        let max_age = DAY * category.max_age_days;
        match prune_older_than(&category.path, max_age, now) {
            Ok(stats) => {
                if stats.files > 0 {
                    info!(
                        category = %category.name,
                        files = stats.files,
                        bytes = stats.bytes,
                        "Pruned old media"
                    );
                }
                total += stats;
            }
            Err(e) => warn!(category = %category.name, error = %e, "Media pruning failed"),
        }
    }

    if settings.log_dir.is_dir() {
        if settings.vacuum_journal {
            let arg = format!("--vacuum-time={}d", settings.log_retention_days);
            if let Err(e) = run_checked(
                "journalctl",
                &[arg.as_str()],
                None,
                Duration::from_secs(settings.command_timeout_secs),
            ) {
                warn!(error = %e, "Journal vacuum failed");
            }
        }
        let max_age = DAY * settings.log_retention_days;
        match prune_older_than(&settings.log_dir, max_age, now) {
            Ok(stats) => total += stats,
            Err(e) => warn!(dir = %settings.log_dir.display(), error = %e, "Log trimming failed"),
        }
    }

    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use filetime::{set_file_mtime, FileTime};
    use gw_config::MediaCategory;
    use tempfile::TempDir;

    fn aged(path: &Path, days: u64, now: SystemTime) {
        fs::write(path, b"frame").unwrap();
        let when = now - DAY * days as u32;
        set_file_mtime(path, FileTime::from_system_time(when)).unwrap();
    }

    #[test]
    fn test_prunes_only_old_files() {
        let temp = TempDir::new().unwrap();
        let now = SystemTime::now();
        fs::create_dir_all(temp.path().join("2026-01-10")).unwrap();
        aged(&temp.path().join("2026-01-10").join("old.jpg"), 5, now);
        aged(&temp.path().join("new.jpg"), 1, now);

        let stats = prune_older_than(temp.path(), DAY * 3, now).unwrap();
        assert_eq!(stats.files, 1);
        assert_eq!(stats.bytes, 5);
        assert!(temp.path().join("new.jpg").exists());
        assert!(!temp.path().join("2026-01-10").join("old.jpg").exists());
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let stats =
            prune_older_than(Path::new("/nonexistent/gatewarden"), DAY, SystemTime::now()).unwrap();
        assert_eq!(stats, PruneStats::default());
    }

    #[test]
    fn test_free_space_uses_per_category_ages() {
        let temp = TempDir::new().unwrap();
        let now = SystemTime::now();
        let captures = temp.path().join("captures");
        let exits = temp.path().join("exit_captures");
        fs::create_dir_all(&captures).unwrap();
        fs::create_dir_all(&exits).unwrap();
        aged(&captures.join("a.jpg"), 2, now);
        aged(&exits.join("b.jpg"), 2, now);

        let settings = RecoverySettings {
            media: vec![
                MediaCategory {
                    name: "captures".into(),
                    path: captures.clone(),
                    max_age_days: 3,
                },
                MediaCategory {
                    name: "exit_captures".into(),
                    path: exits.clone(),
                    max_age_days: 1,
                },
            ],
            log_dir: temp.path().join("no-logs"),
            vacuum_journal: false,
            ..RecoverySettings::default()
        };

        let stats = free_space(&settings, now);
        assert_eq!(stats.files, 1);
        assert!(captures.join("a.jpg").exists());
        assert!(!exits.join("b.jpg").exists());
    }
}
