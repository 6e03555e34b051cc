//! Gatewarden configuration loading and validation.
//!
//! This crate provides:
//! - Typed Rust structs for `gatewarden.json`
//! - Config resolution (CLI → env → XDG → /etc → defaults)
//! - Semantic validation
//! - Immutable snapshots and a live handle that swaps them atomically

pub mod resolve;
pub mod settings;
pub mod snapshot;
pub mod validate;

pub use resolve::{load_config, save_config, ConfigError, ConfigOptions, ConfigSource, ResolvedConfig};
pub use settings::{
    BackupSettings, CameraCommands, Config, DeviceSettings, FeatureFlags, MediaCategory,
    MemoryThresholds, RecoverySettings, ServerSettings, SourceKind, SourceSpec, UpdateSettings,
};
pub use snapshot::{ConfigSnapshot, LiveConfig};
pub use validate::{parse_daily_time, validate_config, ValidationError};

/// Schema version for configuration files.
pub const CONFIG_SCHEMA_VERSION: &str = "1.0.0";
