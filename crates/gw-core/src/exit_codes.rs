//! Exit codes for the gatewarden CLI.
//!
//! Exit codes communicate operation outcome without requiring output parsing.
//!
//! Exit code ranges:
//! - 0-3: Operational outcomes
//! - 10-19: User/environment errors (recoverable by user action)
//! - 20-29: Subsystem failures

use gw_common::{Error, ErrorCategory};

/// Exit codes for gatewarden operations.
///
/// These codes are a stable contract for automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    // ========================================================================
    // Operational Outcomes (0-3)
    // ========================================================================
    /// Success
    Clean = 0,

    /// Check found an update that has not been applied yet
    UpdateAvailable = 1,

    /// Backup written but some sources were missing
    Partial = 2,

    /// An update ran, failed, and was rolled back
    RolledBack = 3,

    // ========================================================================
    // User / Environment Errors (10-19)
    // ========================================================================
    /// Invalid arguments
    ArgsError = 10,

    /// Configuration missing or invalid
    ConfigError = 11,

    /// Permission denied
    PermissionError = 12,

    /// Another update holds the single-flight guard
    LockError = 14,

    /// Backup or domain not found
    NotFound = 15,

    // ========================================================================
    // Subsystem Failures (20-29)
    // ========================================================================
    /// Internal error (bug - please report)
    InternalError = 20,

    /// I/O or metadata store error
    IoError = 21,

    /// Network call failed or timed out
    NetworkError = 22,

    /// Checksum or archive verification failed
    IntegrityError = 23,

    /// Shared restart budget exhausted
    BudgetExceeded = 24,

    /// Collaborator command failed
    ControlError = 25,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Check if this exit code indicates success (codes 0-2).
    pub fn is_success(self) -> bool {
        matches!(
            self,
            ExitCode::Clean | ExitCode::UpdateAvailable | ExitCode::Partial
        )
    }

    pub fn is_error(self) -> bool {
        (self as i32) >= 10
    }

    /// Get the code name as a string constant (for JSON output).
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Clean => "OK_CLEAN",
            ExitCode::UpdateAvailable => "OK_UPDATE_AVAILABLE",
            ExitCode::Partial => "OK_PARTIAL",
            ExitCode::RolledBack => "ERR_ROLLED_BACK",
            ExitCode::ArgsError => "ERR_ARGS",
            ExitCode::ConfigError => "ERR_CONFIG",
            ExitCode::PermissionError => "ERR_PERMISSION",
            ExitCode::LockError => "ERR_LOCK",
            ExitCode::NotFound => "ERR_NOT_FOUND",
            ExitCode::InternalError => "ERR_INTERNAL",
            ExitCode::IoError => "ERR_IO",
            ExitCode::NetworkError => "ERR_NETWORK",
            ExitCode::IntegrityError => "ERR_INTEGRITY",
            ExitCode::BudgetExceeded => "ERR_BUDGET",
            ExitCode::ControlError => "ERR_CONTROL",
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl From<&Error> for ExitCode {
    fn from(err: &Error) -> Self {
        match err {
            Error::NotFound(_) => ExitCode::NotFound,
            Error::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                ExitCode::PermissionError
            }
            _ => match err.category() {
                ErrorCategory::Config => ExitCode::ConfigError,
                ErrorCategory::Integrity => ExitCode::IntegrityError,
                ErrorCategory::Io => ExitCode::IoError,
                ErrorCategory::Network => ExitCode::NetworkError,
                ErrorCategory::Concurrency => ExitCode::LockError,
                ErrorCategory::Budget => ExitCode::BudgetExceeded,
                ErrorCategory::Control => ExitCode::ControlError,
            },
        }
    }
}
