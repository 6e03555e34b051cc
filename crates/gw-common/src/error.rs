//! Error taxonomy for the update and recovery subsystem.
//!
//! Every failure the subsystem can surface falls into one of a small set of
//! categories:
//! - `integrity`: a hash or archive check failed; nothing destructive ran
//! - `io`: filesystem or metadata store failure
//! - `network`: remote check, download, alert or health probe failed
//! - `concurrency`: another update is already in flight
//! - `budget`: the shared service-restart budget is exhausted
//!
//! plus `config` and `control` (a subprocess or collaborator refused).
//!
//! # Human-Facing Output
//!
//! ```text
//! ✗ Integrity Check Failed
//!   Reason: checksum mismatch for 'daily_backup_20260115_020000.zip': expected ab12.., got 9f0c..
//!   Fix: The archive is corrupted. Do not restore it; pick an older backup with 'gatewarden backup list'.
//! ```
//!
//! # Agent-Facing Output
//!
//! ```json
//! {
//!   "code": 20,
//!   "category": "integrity",
//!   "message": "checksum mismatch for ...",
//!   "recoverable": false,
//!   "suggested_action": "manual_intervention"
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for subsystem operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration file errors.
    Config,
    /// Hash or archive verification failures.
    Integrity,
    /// File I/O, serialization and metadata store errors.
    Io,
    /// Remote endpoint failures, including timeouts.
    Network,
    /// Single-flight violations.
    Concurrency,
    /// Shared retry/restart budget exhausted.
    Budget,
    /// Subprocess or collaborator failures.
    Control,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Integrity => write!(f, "integrity"),
            ErrorCategory::Io => write!(f, "io"),
            ErrorCategory::Network => write!(f, "network"),
            ErrorCategory::Concurrency => write!(f, "concurrency"),
            ErrorCategory::Budget => write!(f, "budget"),
            ErrorCategory::Control => write!(f, "control"),
        }
    }
}

/// Suggested actions for operators and automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    /// Retry the operation (possibly with backoff).
    Retry,
    /// Run `config validate` and fix the file.
    RunCheck,
    /// Wait for the in-flight operation to finish.
    Wait,
    /// Request elevated privileges.
    Elevate,
    /// Reset the exhausted budget or domain.
    Reset,
    /// Abort the operation.
    Abort,
    /// Manual intervention required.
    ManualIntervention,
}

impl std::fmt::Display for SuggestedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SuggestedAction::Retry => write!(f, "retry"),
            SuggestedAction::RunCheck => write!(f, "run_check"),
            SuggestedAction::Wait => write!(f, "wait"),
            SuggestedAction::Elevate => write!(f, "elevate"),
            SuggestedAction::Reset => write!(f, "reset"),
            SuggestedAction::Abort => write!(f, "abort"),
            SuggestedAction::ManualIntervention => write!(f, "manual_intervention"),
        }
    }
}

/// Unified error type surfaced at the CLI boundary.
///
/// Component crates keep their own richer error enums and convert into this
/// one when a failure has to leave the process (exit codes, JSON output).
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (10-19)
    #[error("configuration error: {0}")]
    Config(String),

    // Integrity errors (20-29)
    #[error("checksum mismatch for '{subject}': expected {expected}, got {actual}")]
    ChecksumMismatch {
        subject: String,
        expected: String,
        actual: String,
    },

    #[error("archive unreadable: {0}")]
    ArchiveUnreadable(String),

    #[error("archive is empty: {0}")]
    ArchiveEmpty(String),

    // I/O errors (30-39)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("metadata store error: {0}")]
    Storage(String),

    #[error("not found: {0}")]
    NotFound(String),

    // Network errors (40-49)
    #[error("network error: {0}")]
    Network(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    // Concurrency errors (50-59)
    #[error("{0} already in progress")]
    AlreadyInProgress(String),

    // Budget errors (60-69)
    #[error("{resource} budget exhausted ({used}/{max})")]
    BudgetExceeded {
        resource: String,
        used: u32,
        max: u32,
    },

    // Control errors (70-79)
    #[error("command '{command}' failed: {detail}")]
    CommandFailed { command: String, detail: String },

    #[error("collaborator not configured: {0}")]
    NotConfigured(String),
}

impl Error {
    /// Returns the stable error code.
    ///
    /// Codes are grouped by category:
    /// - 10-19: Configuration
    /// - 20-29: Integrity
    /// - 30-39: I/O
    /// - 40-49: Network
    /// - 50-59: Concurrency
    /// - 60-69: Budget
    /// - 70-79: Control
    pub fn code(&self) -> u32 {
        match self {
            Error::Config(_) => 10,
            Error::ChecksumMismatch { .. } => 20,
            Error::ArchiveUnreadable(_) => 21,
            Error::ArchiveEmpty(_) => 22,
            Error::Io(_) => 30,
            Error::Json(_) => 31,
            Error::Storage(_) => 32,
            Error::NotFound(_) => 33,
            Error::Network(_) => 40,
            Error::Timeout { .. } => 41,
            Error::AlreadyInProgress(_) => 50,
            Error::BudgetExceeded { .. } => 60,
            Error::CommandFailed { .. } => 70,
            Error::NotConfigured(_) => 71,
        }
    }

    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_) => ErrorCategory::Config,

            Error::ChecksumMismatch { .. } | Error::ArchiveUnreadable(_) | Error::ArchiveEmpty(_) => {
                ErrorCategory::Integrity
            }

            Error::Io(_) | Error::Json(_) | Error::Storage(_) | Error::NotFound(_) => {
                ErrorCategory::Io
            }

            Error::Network(_) | Error::Timeout { .. } => ErrorCategory::Network,

            Error::AlreadyInProgress(_) => ErrorCategory::Concurrency,

            Error::BudgetExceeded { .. } => ErrorCategory::Budget,

            Error::CommandFailed { .. } | Error::NotConfigured(_) => ErrorCategory::Control,
        }
    }

    /// Returns whether retrying later may succeed without operator action.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Config(_) => false,

            // Corrupted bytes do not heal
            Error::ChecksumMismatch { .. } => false,
            Error::ArchiveUnreadable(_) => false,
            Error::ArchiveEmpty(_) => false,

            Error::Io(_) => true,
            Error::Json(_) => false,
            Error::Storage(_) => true,
            Error::NotFound(_) => false,

            Error::Network(_) => true,
            Error::Timeout { .. } => true,

            Error::AlreadyInProgress(_) => true,

            // Only an explicit reset refills the budget
            Error::BudgetExceeded { .. } => false,

            Error::CommandFailed { .. } => true,
            Error::NotConfigured(_) => false,
        }
    }

    /// Returns the suggested action.
    pub fn suggested_action(&self) -> SuggestedAction {
        match self {
            Error::Config(_) => SuggestedAction::RunCheck,

            Error::ChecksumMismatch { .. } => SuggestedAction::ManualIntervention,
            Error::ArchiveUnreadable(_) => SuggestedAction::ManualIntervention,
            Error::ArchiveEmpty(_) => SuggestedAction::ManualIntervention,

            Error::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                SuggestedAction::Elevate
            }
            Error::Io(_) => SuggestedAction::Retry,
            Error::Json(_) => SuggestedAction::ManualIntervention,
            Error::Storage(_) => SuggestedAction::Retry,
            Error::NotFound(_) => SuggestedAction::Abort,

            Error::Network(_) => SuggestedAction::Retry,
            Error::Timeout { .. } => SuggestedAction::Retry,

            Error::AlreadyInProgress(_) => SuggestedAction::Wait,

            Error::BudgetExceeded { .. } => SuggestedAction::Reset,

            Error::CommandFailed { .. } => SuggestedAction::Retry,
            Error::NotConfigured(_) => SuggestedAction::RunCheck,
        }
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Config(_) => {
                "Run 'gatewarden config validate' and fix the reported fields."
            }
            Error::ChecksumMismatch { .. } => {
                "The archive is corrupted. Do not restore it; pick an older backup with 'gatewarden backup list'."
            }
            Error::ArchiveUnreadable(_) => {
                "The archive cannot be opened. Check the backup directory and pick another backup."
            }
            Error::ArchiveEmpty(_) => {
                "The archive has no entries. It was probably truncated while being written."
            }
            Error::Io(_) => {
                "Check disk space, permissions, and that the data directory exists. Retry the operation."
            }
            Error::Json(_) => {
                "Invalid JSON. Check the file syntax with 'jq .' or restore it from a backup."
            }
            Error::Storage(_) => {
                "The backup metadata database could not be read or written. Check the data directory."
            }
            Error::NotFound(_) => {
                "List the available entries with 'gatewarden backup list'."
            }
            Error::Network(_) => {
                "Check connectivity to the server. The next polling cycle will retry automatically."
            }
            Error::Timeout { .. } => {
                "The remote side or subprocess did not answer in time. The next cycle will retry."
            }
            Error::AlreadyInProgress(_) => {
                "Wait for the running update to finish, then check 'gatewarden update status'."
            }
            Error::BudgetExceeded { .. } => {
                "Service restarts are exhausted. Inspect the device, then run 'gatewarden recovery reset service'."
            }
            Error::CommandFailed { .. } => {
                "Run the command by hand to see its output. It may need root privileges."
            }
            Error::NotConfigured(_) => {
                "Configure the missing command or endpoint in gatewarden.json."
            }
        }
    }

    /// Returns a short headline for human-readable output.
    pub fn headline(&self) -> &'static str {
        match self {
            Error::Config(_) => "Configuration Error",
            Error::ChecksumMismatch { .. } => "Integrity Check Failed",
            Error::ArchiveUnreadable(_) => "Archive Unreadable",
            Error::ArchiveEmpty(_) => "Archive Empty",
            Error::Io(_) => "I/O Error",
            Error::Json(_) => "JSON Parse Error",
            Error::Storage(_) => "Metadata Store Error",
            Error::NotFound(_) => "Not Found",
            Error::Network(_) => "Network Error",
            Error::Timeout { .. } => "Timeout",
            Error::AlreadyInProgress(_) => "Already In Progress",
            Error::BudgetExceeded { .. } => "Restart Budget Exhausted",
            Error::CommandFailed { .. } => "Command Failed",
            Error::NotConfigured(_) => "Not Configured",
        }
    }
}

/// Structured error response for JSON output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// Stable error code.
    pub code: u32,

    /// Error category for grouping.
    pub category: ErrorCategory,

    /// Human-readable error message.
    pub message: String,

    /// Whether the error is potentially recoverable.
    pub recoverable: bool,

    /// Suggested action.
    pub suggested_action: SuggestedAction,

    /// Additional structured context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl From<&Error> for StructuredError {
    fn from(err: &Error) -> Self {
        let mut context = HashMap::new();

        match err {
            Error::ChecksumMismatch {
                subject,
                expected,
                actual,
            } => {
                context.insert("subject".to_string(), serde_json::json!(subject));
                context.insert("expected".to_string(), serde_json::json!(expected));
                context.insert("actual".to_string(), serde_json::json!(actual));
            }
            Error::Timeout { operation, seconds } => {
                context.insert("operation".to_string(), serde_json::json!(operation));
                context.insert("timeout_seconds".to_string(), serde_json::json!(seconds));
            }
            Error::BudgetExceeded {
                resource,
                used,
                max,
            } => {
                context.insert("resource".to_string(), serde_json::json!(resource));
                context.insert("used".to_string(), serde_json::json!(used));
                context.insert("max".to_string(), serde_json::json!(max));
            }
            _ => {}
        }

        StructuredError {
            code: err.code(),
            category: err.category(),
            message: err.to_string(),
            recoverable: err.is_recoverable(),
            suggested_action: err.suggested_action(),
            context,
        }
    }
}

impl StructuredError {
    /// Add additional context to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"code":{},"error":"serialization_failed"}}"#, self.code)
        })
    }
}

/// Format an error for human-readable stderr output.
///
/// ```text
/// ✗ [Headline]
///   Reason: [Error message]
///   Fix: [Remediation hint]
/// ```
pub fn format_error_human(err: &Error, use_color: bool) -> String {
    let (red, cyan, reset) = if use_color {
        ("\x1b[31m", "\x1b[36m", "\x1b[0m")
    } else {
        ("", "", "")
    };

    format!(
        "{red}✗{reset} {headline}\n  Reason: {message}\n  {cyan}Fix:{reset} {remediation}",
        headline = err.headline(),
        message = err,
        remediation = err.remediation()
    )
}
