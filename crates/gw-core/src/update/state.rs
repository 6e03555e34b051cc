//! Update state machine phases and the persisted status document.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

/// Where the updater currently is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePhase {
    #[default]
    Idle,
    CheckingUpdate,
    UpdateFound,
    NoUpdate,
    Downloading,
    Verifying,
    Extracting,
    Applying,
    VerifyingApplied,
    Succeeded,
    RollingBack,
}

impl UpdatePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            UpdatePhase::Idle => "idle",
            UpdatePhase::CheckingUpdate => "checking_update",
            UpdatePhase::UpdateFound => "update_found",
            UpdatePhase::NoUpdate => "no_update",
            UpdatePhase::Downloading => "downloading",
            UpdatePhase::Verifying => "verifying",
            UpdatePhase::Extracting => "extracting",
            UpdatePhase::Applying => "applying",
            UpdatePhase::VerifyingApplied => "verifying_applied",
            UpdatePhase::Succeeded => "succeeded",
            UpdatePhase::RollingBack => "rolling_back",
        }
    }
}

impl std::fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide update status, persisted to `state/update.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateStatus {
    pub phase: UpdatePhase,
    pub last_check_at: Option<DateTime<Utc>>,
    pub available_version: Option<String>,
    pub update_in_progress: bool,
    pub last_update_at: Option<DateTime<Utc>>,
    /// `success` or `failed: <reason>`.
    pub update_result: Option<String>,
}

impl UpdateStatus {
    pub fn load(path: &Path) -> Option<Self> {
        let text = fs::read_to_string(path).ok()?;
        serde_json::from_str(&text).ok()
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        let temp = path.with_extension("json.tmp");
        fs::write(&temp, json)?;
        fs::rename(&temp, path)
    }
}

/// What `update status` prints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateReport {
    pub current_version: String,
    pub auto_update_enabled: bool,
    pub update_server: Option<String>,
    #[serde(flatten)]
    pub status: UpdateStatus,
}
