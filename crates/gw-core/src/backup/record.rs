//! Backup metadata rows and restore audit entries.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use gw_common::BackupId;

/// Backup kind; weekly backups are exempt from age-based retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Daily,
    Weekly,
    Manual,
}

impl BackupType {
    pub fn as_str(self) -> &'static str {
        match self {
            BackupType::Daily => "daily",
            BackupType::Weekly => "weekly",
            BackupType::Manual => "manual",
        }
    }
}

impl std::fmt::Display for BackupType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "daily" => Ok(BackupType::Daily),
            "weekly" => Ok(BackupType::Weekly),
            "manual" => Ok(BackupType::Manual),
            other => Err(format!("unknown backup type: {}", other)),
        }
    }
}

impl ToSql for BackupType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for BackupType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// Outcome recorded on a backup or restore row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Completed,
    /// Some requested items were missing or failed.
    Partial,
    Failed,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Completed => "completed",
            RecordStatus::Partial => "partial",
            RecordStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for RecordStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for RecordStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "completed" => Ok(RecordStatus::Completed),
            "partial" => Ok(RecordStatus::Partial),
            "failed" => Ok(RecordStatus::Failed),
            other => Err(FromSqlError::Other(
                format!("unknown status: {}", other).into(),
            )),
        }
    }
}

/// One archive known to the metadata store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: BackupId,
    pub backup_type: BackupType,
    pub name: String,
    pub file_path: PathBuf,
    /// Unix epoch seconds.
    pub created_at: i64,
    pub size_bytes: u64,
    /// Hex SHA-256 of the whole archive file.
    pub checksum: Option<String>,
    pub status: RecordStatus,
    pub description: Option<String>,
}

impl BackupRecord {
    pub fn created_at_utc(&self) -> DateTime<Utc> {
        epoch_to_utc(self.created_at)
    }
}

/// Insert form of [`BackupRecord`].
#[derive(Debug, Clone)]
pub struct NewBackup {
    pub backup_type: BackupType,
    pub name: String,
    pub file_path: PathBuf,
    pub created_at: i64,
    pub size_bytes: u64,
    pub checksum: Option<String>,
    pub status: RecordStatus,
    pub description: Option<String>,
}

/// Restore audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestoreEvent {
    pub id: Option<i64>,
    /// Absent when the archive was restored by path and is not in the store.
    pub backup_id: Option<BackupId>,
    pub restored_at: i64,
    pub status: RecordStatus,
    /// Logical item names actually restored.
    pub notes: Vec<String>,
}

/// A record plus whether its archive is still on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupListing {
    #[serde(flatten)]
    pub record: BackupRecord,
    pub exists: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestBackup {
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupStats {
    pub by_type: BTreeMap<String, u64>,
    pub total_size_bytes: u64,
    pub latest_backup: Option<LatestBackup>,
    pub total_restores: u64,
}

pub(crate) fn epoch_to_utc(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or_default()
}
