//! Configuration resolution and loading.
//!
//! Resolution order: CLI argument → environment variables → XDG paths →
//! /etc → built-in defaults.

use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::settings::Config;
use crate::validate::{validate_config, ValidationError};

/// Environment variable naming the config file directly.
pub const ENV_CONFIG_PATH: &str = "GW_CONFIG";
/// Environment variable naming a directory holding `gatewarden.json`.
pub const ENV_CONFIG_DIR: &str = "GW_CONFIG_DIR";

/// Standard config file name.
pub const CONFIG_FILENAME: &str = "gatewarden.json";

/// Application name for XDG and /etc directories.
const APP_NAME: &str = "gatewarden";

/// Errors that can occur during config loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Invalid JSON in config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error on {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Semantic validation failed: {}", format_validation(.0))]
    Invalid(Vec<ValidationError>),
}

fn format_validation(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Where the configuration file was found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    /// Explicitly provided via CLI argument.
    CliArgument,
    /// Set via environment variable.
    Environment,
    /// Found in XDG config directory.
    XdgConfig,
    /// Found in /etc/gatewarden/.
    SystemConfig,
    /// Using built-in defaults.
    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CliArgument => write!(f, "CLI argument"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::XdgConfig => write!(f, "XDG config"),
            ConfigSource::SystemConfig => write!(f, "system config"),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// Configuration resolution options.
#[derive(Debug, Default, Clone)]
pub struct ConfigOptions {
    /// Explicit config file (highest priority). Must exist when given.
    pub config_path: Option<PathBuf>,
}

/// Loaded configuration with provenance information.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: Config,
    /// Path the config was read from (None when using defaults).
    pub path: Option<PathBuf>,
    pub source: ConfigSource,
    /// SHA-256 of the file bytes (None when using defaults).
    pub file_hash: Option<String>,
}

/// Locate the config file.
///
/// 1. Explicit CLI path
/// 2. `GW_CONFIG`
/// 3. `GW_CONFIG_DIR` + `gatewarden.json`
/// 4. XDG config directory (~/.config/gatewarden/)
/// 5. System config (/etc/gatewarden/)
/// 6. Built-in defaults (None)
pub fn resolve_config_path(cli_path: Option<&Path>) -> (Option<PathBuf>, ConfigSource) {
    if let Some(path) = cli_path {
        return (Some(path.to_path_buf()), ConfigSource::CliArgument);
    }

    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return (Some(path), ConfigSource::Environment);
        }
    }

    if let Ok(config_dir) = std::env::var(ENV_CONFIG_DIR) {
        let path = PathBuf::from(config_dir).join(CONFIG_FILENAME);
        if path.exists() {
            return (Some(path), ConfigSource::Environment);
        }
    }

    if let Some(xdg_config) = dirs::config_dir() {
        let path = xdg_config.join(APP_NAME).join(CONFIG_FILENAME);
        if path.exists() {
            return (Some(path), ConfigSource::XdgConfig);
        }
    }

    let system_path = system_config_dir().join(CONFIG_FILENAME);
    if system_path.exists() {
        return (Some(system_path), ConfigSource::SystemConfig);
    }

    (None, ConfigSource::BuiltinDefault)
}

/// Load, parse and validate the configuration.
pub fn load_config(options: &ConfigOptions) -> Result<ResolvedConfig, ConfigError> {
    let (path, source) = resolve_config_path(options.config_path.as_deref());

    let Some(path) = path else {
        debug!(target: "config.default_used", "No config file found, using defaults");
        let config = Config::default();
        return Ok(ResolvedConfig {
            config,
            path: None,
            source,
            file_hash: None,
        });
    };

    if !path.exists() {
        return Err(ConfigError::NotFound { path });
    }

    let bytes = fs::read(&path).map_err(|source| ConfigError::IoError {
        path: path.clone(),
        source,
    })?;
    let config: Config = serde_json::from_slice(&bytes).map_err(|source| ConfigError::ParseError {
        path: path.clone(),
        source,
    })?;

    let errors = validate_config(&config);
    if !errors.is_empty() {
        return Err(ConfigError::Invalid(errors));
    }

    let file_hash = hex::encode(Sha256::digest(&bytes));
    info!(
        target: "config.loaded",
        path = %path.display(),
        source = %source,
        hash = %file_hash,
        "Configuration loaded"
    );

    Ok(ResolvedConfig {
        config,
        path: Some(path),
        source,
        file_hash: Some(file_hash),
    })
}

/// Write the configuration back to disk via temp file + rename.
pub fn save_config(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let io_err = |source: std::io::Error| ConfigError::IoError {
        path: path.to_path_buf(),
        source,
    };

    let json = serde_json::to_string_pretty(config).map_err(|source| ConfigError::ParseError {
        path: path.to_path_buf(),
        source,
    })?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(io_err)?;
    let temp_path = dir.join(format!(".{}.tmp.{}", CONFIG_FILENAME, std::process::id()));

    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result.map_err(io_err)
}

/// Get the XDG config directory for gatewarden.
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Get the system config directory.
pub fn system_config_dir() -> PathBuf {
    PathBuf::from("/etc").join(APP_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_source_display() {
        assert_eq!(ConfigSource::CliArgument.to_string(), "CLI argument");
        assert_eq!(ConfigSource::BuiltinDefault.to_string(), "builtin default");
    }

    #[test]
    fn test_cli_path_wins() {
        let (path, source) = resolve_config_path(Some(Path::new("/nonexistent/gw.json")));
        assert_eq!(path, Some(PathBuf::from("/nonexistent/gw.json")));
        assert_eq!(source, ConfigSource::CliArgument);
    }

    #[test]
    fn test_missing_cli_path_is_error() {
        let options = ConfigOptions {
            config_path: Some(PathBuf::from("/nonexistent/gw.json")),
        };
        assert!(matches!(
            load_config(&options),
            Err(ConfigError::NotFound { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILENAME);
        fs::write(&path, r#"{"device": {"id": "gate-3"}}"#).unwrap();

        let resolved = load_config(&ConfigOptions {
            config_path: Some(path.clone()),
        })
        .unwrap();

        assert_eq!(resolved.config.device.id, "gate-3");
        assert_eq!(resolved.path, Some(path));
        assert_eq!(resolved.file_hash.as_deref().map(str::len), Some(64));
    }

    #[test]
    fn test_parse_error_names_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILENAME);
        fs::write(&path, "{not json").unwrap();

        let err = load_config(&ConfigOptions {
            config_path: Some(path),
        })
        .unwrap_err();
        assert!(err.to_string().contains(CONFIG_FILENAME));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(CONFIG_FILENAME);
        fs::write(&path, r#"{"backup": {"max_local_backups": 0}}"#).unwrap();

        let err = load_config(&ConfigOptions {
            config_path: Some(path),
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("max_local_backups"));
    }

    #[test]
    fn test_save_then_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join(CONFIG_FILENAME);

        let mut config = Config::default();
        config.update.auto_update = true;
        save_config(&path, &config).unwrap();

        let resolved = load_config(&ConfigOptions {
            config_path: Some(path),
        })
        .unwrap();
        assert!(resolved.config.update.auto_update);
    }

    #[test]
    fn test_system_config_dir() {
        assert_eq!(system_config_dir(), PathBuf::from("/etc/gatewarden"));
    }
}
