//! Identifiers and generated names.

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Row id of a backup record in the metadata store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupId(pub i64);

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for BackupId {
    fn from(id: i64) -> Self {
        BackupId(id)
    }
}

impl std::str::FromStr for BackupId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(BackupId)
    }
}

/// Correlation id for one process invocation.
///
/// Format: `run-` followed by the first 12 characters of a v4 UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        let uuid = uuid::Uuid::new_v4().to_string();
        RunId(format!("run-{}", &uuid[..12]))
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Build a name of the form `<prefix>_<YYYYmmdd_HHMMSS>`.
///
/// Used for backup archives (`daily_backup_20260115_020000`) and
/// pre-update snapshots.
pub fn timestamped_name<Tz: TimeZone>(prefix: &str, at: &DateTime<Tz>) -> String
where
    Tz::Offset: fmt::Display,
{
    format!("{}_{}", prefix, at.format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_backup_id_parse() {
        assert_eq!("42".parse::<BackupId>().unwrap(), BackupId(42));
        assert_eq!(" 7 ".parse::<BackupId>().unwrap(), BackupId(7));
        assert!("abc".parse::<BackupId>().is_err());
    }

    #[test]
    fn test_run_id_format() {
        let id = RunId::new();
        assert!(id.0.starts_with("run-"));
        assert_eq!(id.0.len(), 16);
        assert_ne!(id, RunId::new());
    }

    #[test]
    fn test_timestamped_name() {
        let at = Utc.with_ymd_and_hms(2026, 1, 15, 2, 0, 5).unwrap();
        assert_eq!(
            timestamped_name("daily_backup", &at),
            "daily_backup_20260115_020005"
        );
    }
}
