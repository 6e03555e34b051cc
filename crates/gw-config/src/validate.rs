//! Semantic validation of a parsed configuration.
//!
//! Serde already enforces shape and types; these checks catch values that
//! parse fine but would make the loops misbehave.

use thiserror::Error;

use crate::settings::Config;

/// A single semantic problem, tied to the offending field.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Unknown backup item '{item}' in {field}")]
    UnknownItem { field: String, item: String },

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: String, actual: String },
}

impl ValidationError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        ValidationError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

const WEEKDAYS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

/// Parse `HH:MM` into hours and minutes.
pub fn parse_daily_time(value: &str) -> Option<(u32, u32)> {
    let (h, m) = value.trim().split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    (hour < 24 && minute < 60).then_some((hour, minute))
}

/// Collect every semantic problem in the configuration.
///
/// An empty vector means the configuration is usable.
pub fn validate_config(config: &Config) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.schema_version != crate::CONFIG_SCHEMA_VERSION {
        errors.push(ValidationError::VersionMismatch {
            expected: crate::CONFIG_SCHEMA_VERSION.to_string(),
            actual: config.schema_version.clone(),
        });
    }

    // Backup
    let backup = &config.backup;
    if backup.max_local_backups == 0 {
        errors.push(ValidationError::invalid(
            "backup.max_local_backups",
            "must be at least 1",
        ));
    }
    if parse_daily_time(&backup.daily_time).is_none() {
        errors.push(ValidationError::invalid(
            "backup.daily_time",
            format!("expected HH:MM, got '{}'", backup.daily_time),
        ));
    }
    if !WEEKDAYS.contains(&backup.weekly_day.to_lowercase().as_str()) {
        errors.push(ValidationError::invalid(
            "backup.weekly_day",
            format!("'{}' is not a weekday name", backup.weekly_day),
        ));
    }
    for (field, items) in [
        ("backup.daily_items", &backup.daily_items),
        ("backup.manual_items", &backup.manual_items),
    ] {
        for item in items {
            if !backup.sources.contains_key(item) {
                errors.push(ValidationError::UnknownItem {
                    field: field.to_string(),
                    item: item.clone(),
                });
            }
        }
    }

    // Update
    let update = &config.update;
    if update.check_interval_secs == 0 {
        errors.push(ValidationError::invalid(
            "update.check_interval_secs",
            "must be greater than 0",
        ));
    }
    if update.keep_snapshots == 0 {
        errors.push(ValidationError::invalid(
            "update.keep_snapshots",
            "must be at least 1",
        ));
    }
    if update.download_timeout_secs == 0 || update.check_timeout_secs == 0 {
        errors.push(ValidationError::invalid(
            "update.*_timeout_secs",
            "network timeouts must be greater than 0",
        ));
    }

    // Recovery
    let recovery = &config.recovery;
    if recovery.check_interval_secs == 0 {
        errors.push(ValidationError::invalid(
            "recovery.check_interval_secs",
            "must be greater than 0",
        ));
    }
    let mem = recovery.memory;
    if !(mem.warning < mem.cleanup && mem.cleanup < mem.critical && mem.critical <= 100.0) {
        errors.push(ValidationError::invalid(
            "recovery.memory",
            format!(
                "thresholds must satisfy warning < cleanup < critical <= 100 (got {}/{}/{})",
                mem.warning, mem.cleanup, mem.critical
            ),
        ));
    }
    if !(recovery.disk_threshold > 0.0 && recovery.disk_threshold <= 100.0) {
        errors.push(ValidationError::invalid(
            "recovery.disk_threshold",
            "must be in (0, 100]",
        ));
    }
    if recovery.max_camera_retries == 0 || recovery.max_network_retries == 0 {
        errors.push(ValidationError::invalid(
            "recovery.max_*_retries",
            "camera and network retries must be at least 1",
        ));
    }
    for category in &recovery.media {
        if category.max_age_days == 0 {
            errors.push(ValidationError::invalid(
                "recovery.media",
                format!("category '{}' would delete every file", category.name),
            ));
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(validate_config(&Config::default()).is_empty());
    }

    #[test]
    fn test_parse_daily_time() {
        assert_eq!(parse_daily_time("02:00"), Some((2, 0)));
        assert_eq!(parse_daily_time("23:59"), Some((23, 59)));
        assert_eq!(parse_daily_time("24:00"), None);
        assert_eq!(parse_daily_time("2"), None);
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = Config::default();
        config.backup.max_local_backups = 0;
        config.backup.weekly_day = "caturday".into();
        config.recovery.memory.cleanup = 95.0;

        let errors = validate_config(&config);
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_unknown_item() {
        let mut config = Config::default();
        config.backup.daily_items.push("firmware".into());

        let errors = validate_config(&config);
        assert_eq!(
            errors,
            vec![ValidationError::UnknownItem {
                field: "backup.daily_items".into(),
                item: "firmware".into()
            }]
        );
    }
}
