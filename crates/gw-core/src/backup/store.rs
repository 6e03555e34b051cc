//! SQLite metadata store for backups and restore history.

use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use gw_common::BackupId;

use super::record::{
    epoch_to_utc, BackupRecord, BackupStats, BackupType, LatestBackup, NewBackup, RestoreEvent,
};

/// File name of the store inside the backup directory.
pub const METADATA_DB_NAME: &str = "backup_metadata.db";

const BACKUP_COLUMNS: &str =
    "id, backup_type, backup_name, file_path, created_at, size_bytes, checksum, status, description";

pub struct MetadataStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore").finish_non_exhaustive()
    }
}

impl MetadataStore {
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS backups (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                backup_type TEXT NOT NULL,
                backup_name TEXT NOT NULL,
                file_path TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL,
                checksum TEXT,
                status TEXT NOT NULL,
                description TEXT
            );

            CREATE TABLE IF NOT EXISTS restore_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                backup_id INTEGER,
                restored_at INTEGER NOT NULL,
                status TEXT NOT NULL,
                notes TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_backups_created_at ON backups(created_at);
            CREATE INDEX IF NOT EXISTS idx_backups_type ON backups(backup_type);
            "#,
        )
    }

    fn row_to_record(row: &Row<'_>) -> rusqlite::Result<BackupRecord> {
        let file_path: String = row.get(3)?;
        let size: i64 = row.get(5)?;
        Ok(BackupRecord {
            id: BackupId(row.get(0)?),
            backup_type: row.get(1)?,
            name: row.get(2)?,
            file_path: PathBuf::from(file_path),
            created_at: row.get(4)?,
            size_bytes: size.max(0) as u64,
            checksum: row.get(6)?,
            status: row.get(7)?,
            description: row.get(8)?,
        })
    }

    pub fn insert_backup(&self, new: &NewBackup) -> rusqlite::Result<BackupRecord> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO backups
             (backup_type, backup_name, file_path, created_at, size_bytes, checksum, status, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                new.backup_type,
                new.name,
                new.file_path.to_string_lossy().into_owned(),
                new.created_at,
                new.size_bytes as i64,
                new.checksum,
                new.status,
                new.description,
            ],
        )?;
        Ok(BackupRecord {
            id: BackupId(conn.last_insert_rowid()),
            backup_type: new.backup_type,
            name: new.name.clone(),
            file_path: new.file_path.clone(),
            created_at: new.created_at,
            size_bytes: new.size_bytes,
            checksum: new.checksum.clone(),
            status: new.status,
            description: new.description.clone(),
        })
    }

    pub fn get_backup(&self, id: BackupId) -> rusqlite::Result<Option<BackupRecord>> {
        self.conn()
            .query_row(
                &format!("SELECT {BACKUP_COLUMNS} FROM backups WHERE id = ?1"),
                params![id.0],
                Self::row_to_record,
            )
            .optional()
    }

    pub fn find_by_path(&self, path: &Path) -> rusqlite::Result<Option<BackupRecord>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {BACKUP_COLUMNS} FROM backups WHERE file_path = ?1 ORDER BY id DESC LIMIT 1"
                ),
                params![path.to_string_lossy().into_owned()],
                Self::row_to_record,
            )
            .optional()
    }

    /// Newest first, optionally filtered by type.
    pub fn list_backups(
        &self,
        kind: Option<BackupType>,
        limit: Option<usize>,
    ) -> rusqlite::Result<Vec<BackupRecord>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let conn = self.conn();
        let rows = match kind {
            Some(kind) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {BACKUP_COLUMNS} FROM backups WHERE backup_type = ?1
                     ORDER BY created_at DESC, id DESC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![kind, limit], Self::row_to_record)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {BACKUP_COLUMNS} FROM backups ORDER BY created_at DESC, id DESC LIMIT ?1"
                ))?;
                let rows = stmt.query_map(params![limit], Self::row_to_record)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(rows)
    }

    /// Records whose name starts with `prefix`, newest first.
    pub fn list_by_name_prefix(&self, prefix: &str) -> rusqlite::Result<Vec<BackupRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {BACKUP_COLUMNS} FROM backups WHERE substr(backup_name, 1, ?2) = ?1
             ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map(
            params![prefix, prefix.chars().count() as i64],
            Self::row_to_record,
        )?;
        rows.collect()
    }

    pub fn delete_backup(&self, id: BackupId) -> rusqlite::Result<bool> {
        let changed = self
            .conn()
            .execute("DELETE FROM backups WHERE id = ?1", params![id.0])?;
        Ok(changed > 0)
    }

    pub fn insert_restore(&self, event: &RestoreEvent) -> rusqlite::Result<i64> {
        let notes = serde_json::to_string(&event.notes).unwrap_or_else(|_| "[]".to_string());
        let conn = self.conn();
        conn.execute(
            "INSERT INTO restore_history (backup_id, restored_at, status, notes)
             VALUES (?1, ?2, ?3, ?4)",
            params![event.backup_id.map(|id| id.0), event.restored_at, event.status, notes],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Newest first.
    pub fn restore_history(&self, limit: Option<usize>) -> rusqlite::Result<Vec<RestoreEvent>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, backup_id, restored_at, status, notes FROM restore_history
             ORDER BY restored_at DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| {
            let notes: Option<String> = row.get(4)?;
            Ok(RestoreEvent {
                id: Some(row.get(0)?),
                backup_id: row.get::<_, Option<i64>>(1)?.map(BackupId),
                restored_at: row.get(2)?,
                status: row.get(3)?,
                notes: notes
                    .and_then(|n| serde_json::from_str(&n).ok())
                    .unwrap_or_default(),
            })
        })?;
        rows.collect()
    }

    pub fn stats(&self) -> rusqlite::Result<BackupStats> {
        let conn = self.conn();
        let mut stats = BackupStats::default();

        let mut stmt = conn.prepare("SELECT backup_type, COUNT(*) FROM backups GROUP BY backup_type")?;
        let by_type = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for entry in by_type {
            let (kind, count) = entry?;
            stats.by_type.insert(kind, count.max(0) as u64);
        }

        let total: Option<i64> =
            conn.query_row("SELECT SUM(size_bytes) FROM backups", [], |row| row.get(0))?;
        stats.total_size_bytes = total.unwrap_or(0).max(0) as u64;

        stats.latest_backup = conn
            .query_row(
                "SELECT backup_name, created_at FROM backups ORDER BY created_at DESC, id DESC LIMIT 1",
                [],
                |row| {
                    Ok(LatestBackup {
                        name: row.get(0)?,
                        created_at: epoch_to_utc(row.get(1)?),
                    })
                },
            )
            .optional()?;

        let restores: i64 =
            conn.query_row("SELECT COUNT(*) FROM restore_history", [], |row| row.get(0))?;
        stats.total_restores = restores.max(0) as u64;

        Ok(stats)
    }
}
