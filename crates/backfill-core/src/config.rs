//! Configuration management for backfill
//!
//! Handles loading and validation of `backfill.toml` configuration files.
//!
//! ```toml
//! [storage]
//! db_path = "backfill.db"
//! busy_timeout_ms = 5000
//!
//! [migration]
//! batch_size = 1000
//! dry_run = false
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use crate::error::{ConfigError, Error, Result};
use crate::logging::LogConfig;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Storage settings
    pub storage: StorageConfig,

    /// Migration settings
    pub migration: MigrationConfig,

    /// Logging settings
    pub logging: LogConfig,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path
    pub db_path: PathBuf,

    /// How long a write waits on a locked database before failing
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("backfill.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

impl StorageConfig {
    #[must_use]
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Migration run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Rows per scan chunk; each chunk is applied in one transaction
    pub batch_size: usize,

    /// Compute and report corrections without writing them
    pub dry_run: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: 1_000,
            dry_run: false,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-friendly output
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Invalid(format!("unknown log format: {other}"))),
        }
    }
}

fn invalid(message: impl Into<String>) -> Error {
    ConfigError::Invalid(message.into()).into()
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::ReadFailed(path.display().to_string(), e.to_string())
        })?;
        Self::from_toml_str(&raw)
    }

    /// Load from `path` when given, defaults otherwise
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => Ok(Self::default()),
        }
    }

    /// Reject values the migration cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.migration.batch_size == 0 {
            return Err(invalid("migration.batch_size must be > 0"));
        }
        if self.storage.db_path.as_os_str().is_empty() {
            return Err(invalid("storage.db_path must not be empty"));
        }
        if EnvFilter::try_new(&self.logging.level).is_err() {
            return Err(invalid(format!(
                "logging.level is not a valid filter: {}",
                self.logging.level
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.migration.batch_size, 1_000);
        assert!(!config.migration.dry_run);
        assert_eq!(config.storage.busy_timeout(), Duration::from_secs(5));
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [migration]
            batch_size = 25
            "#,
        )
        .unwrap();
        assert_eq!(config.migration.batch_size, 25);
        assert_eq!(config.storage.db_path, PathBuf::from("backfill.db"));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn full_toml_parses() {
        let config = Config::from_toml_str(
            r#"
            [storage]
            db_path = "/var/lib/mirror/importer.db"
            busy_timeout_ms = 250

            [migration]
            batch_size = 10
            dry_run = true

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.storage.db_path,
            PathBuf::from("/var/lib/mirror/importer.db")
        );
        assert_eq!(config.storage.busy_timeout_ms, 250);
        assert!(config.migration.dry_run);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = Config::from_toml_str("[migration]\nbatch_size = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Invalid(_))));
    }

    #[test]
    fn logging_level_accepts_filter_directives() {
        let config = Config::from_toml_str(
            "[logging]\nlevel = \"info,backfill_core=debug\"\n",
        )
        .unwrap();
        assert_eq!(config.logging.level, "info,backfill_core=debug");

        let err = Config::from_toml_str("[logging]\nlevel = \"backfill_core=loud\"\n")
            .unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Invalid(_))));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = Config::from_toml_str("[migration\n").unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::ParseFailed(_))));
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = Config::load_from(Path::new("/nonexistent/backfill.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::ReadFailed(_, _))));
    }

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("yaml".parse::<LogFormat>().is_err());
    }
}
