//! Stable event names.
//!
//! Every significant log line carries one of these as its `tracing` target so
//! JSONL consumers can filter on it without parsing messages.

pub mod event_names {
    // Daemon lifecycle
    pub const DAEMON_STARTED: &str = "daemon.started";
    pub const DAEMON_STOPPING: &str = "daemon.stopping";
    pub const DAEMON_STOPPED: &str = "daemon.stopped";
    pub const LOOP_ITERATION_FAILED: &str = "daemon.iteration_failed";
    pub const LOOP_JOIN_TIMEOUT: &str = "daemon.join_timeout";

    // Backups
    pub const BACKUP_CREATED: &str = "backup.created";
    pub const BACKUP_PARTIAL: &str = "backup.partial";
    pub const BACKUP_FAILED: &str = "backup.failed";
    pub const BACKUP_SCHEDULED: &str = "backup.scheduled";
    pub const BACKUP_VERIFY_FAIL: &str = "backup.verify_fail";
    pub const BACKUP_RESTORE_STARTED: &str = "backup.restore_started";
    pub const BACKUP_RESTORE_COMPLETE: &str = "backup.restore_complete";
    pub const BACKUP_RESTORE_FAILED: &str = "backup.restore_failed";
    pub const BACKUP_PRUNED: &str = "backup.pruned";

    // Updates
    pub const UPDATE_CHECK: &str = "update.check";
    pub const UPDATE_FOUND: &str = "update.found";
    pub const UPDATE_BUSY: &str = "update.busy";
    pub const UPDATE_DOWNLOAD: &str = "update.download";
    pub const UPDATE_VERIFY_OK: &str = "update.verify_ok";
    pub const UPDATE_VERIFY_SKIPPED: &str = "update.verify_skipped";
    pub const UPDATE_VERIFY_FAIL: &str = "update.verify_fail";
    pub const UPDATE_SNAPSHOT: &str = "update.snapshot";
    pub const UPDATE_APPLY: &str = "update.apply";
    pub const UPDATE_SUCCEEDED: &str = "update.succeeded";
    pub const UPDATE_FAILED: &str = "update.failed";
    pub const UPDATE_ROLLBACK_START: &str = "update.rollback_start";
    pub const UPDATE_ROLLBACK_COMPLETE: &str = "update.rollback_complete";
    pub const UPDATE_ROLLBACK_FAILED: &str = "update.rollback_failed";

    // Recovery
    pub const RECOVERY_DEBOUNCED: &str = "recovery.debounced";
    pub const RECOVERY_ATTEMPT: &str = "recovery.attempt";
    pub const RECOVERY_RECOVERED: &str = "recovery.recovered";
    pub const RECOVERY_STILL_FAILING: &str = "recovery.still_failing";
    pub const RECOVERY_CRITICAL: &str = "recovery.critical";
    pub const RECOVERY_RESET: &str = "recovery.reset";
    pub const RECOVERY_BUDGET_EXHAUSTED: &str = "recovery.budget_exhausted";
    pub const RECOVERY_PRUNED: &str = "recovery.pruned";

    // Alerts
    pub const ALERT_SENT: &str = "alert.sent";
    pub const ALERT_FAILED: &str = "alert.failed";

    // Config
    pub const CONFIG_FEATURE_DISABLED: &str = "config.feature_disabled";
    pub const CONFIG_FEATURE_ENABLED: &str = "config.feature_enabled";
}
