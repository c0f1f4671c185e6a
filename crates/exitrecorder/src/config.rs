//! Configuration management for exitrecorder.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "exitrecorder";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "records.db";

/// Default directory name for JSON records.
const RECORDS_DIR_NAME: &str = "records";

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "EXITRECORDER_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `EXITRECORDER_`, sections split by `__`)
/// 2. TOML config file at `~/.config/exitrecorder/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Tracker configuration.
    pub tracker: TrackerConfig,
    /// Persistence retry configuration.
    pub persistence: PersistenceConfig,
    /// Airport catalog configuration.
    pub airports: AirportsConfig,
}

/// Which record store to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// One JSON file per record.
    #[default]
    Files,
    /// One row per record in a `SQLite` database.
    Sqlite,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Files => write!(f, "files"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Record store backend.
    pub backend: StorageBackend,
    /// Root directory of the file store.
    /// Defaults to `~/.local/share/exitrecorder/records`
    pub records_dir: Option<PathBuf>,
    /// Path to the database file.
    /// Defaults to `~/.local/share/exitrecorder/records.db`
    pub database_path: Option<PathBuf>,
}

/// Tracker-related configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Seconds between feed polls.
    pub poll_interval_secs: u64,
    /// Cycles a flight may go unreported before it is dropped.
    pub stale_after_cycles: u64,
    /// Batches buffered between the fetch task and the tracker.
    pub channel_capacity: usize,
}

/// Persistence retry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Attempts per save before the record goes to the backlog.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled on each further attempt.
    pub initial_backoff_ms: u64,
}

/// Airport catalog configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AirportsConfig {
    /// TOML file with extra `[[airports]]` entries, merged over the built-ins.
    pub catalog_path: Option<PathBuf>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
            stale_after_cycles: 10,
            channel_capacity: 16,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);
        Self::figment(&config_file).extract::<Self>()?.validated()
    }

    /// The layered figment used to load configuration.
    #[must_use]
    pub fn figment(config_file: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| {
            Err(Error::ConfigValidation {
                message: message.to_string(),
            })
        };

        if self.tracker.poll_interval_secs == 0 {
            return invalid("poll_interval_secs must be greater than 0");
        }
        if self.tracker.stale_after_cycles == 0 {
            return invalid("stale_after_cycles must be greater than 0");
        }
        if self.tracker.channel_capacity == 0 {
            return invalid("channel_capacity must be greater than 0");
        }
        if self.persistence.max_attempts == 0 {
            return invalid("max_attempts must be greater than 0");
        }

        Ok(())
    }

    /// Get the records directory, resolving defaults if not set.
    #[must_use]
    pub fn records_dir(&self) -> PathBuf {
        self.storage
            .records_dir
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(RECORDS_DIR_NAME))
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Where the configured backend keeps its records.
    #[must_use]
    pub fn storage_location(&self) -> PathBuf {
        match self.storage.backend {
            StorageBackend::Files => self.records_dir(),
            StorageBackend::Sqlite => self.database_path(),
        }
    }

    /// Get the poll interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.tracker.poll_interval_secs)
    }

    /// Get the first retry delay as a Duration.
    #[must_use]
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.persistence.initial_backoff_ms)
    }

    /// Render the effective configuration as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be serialized.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
