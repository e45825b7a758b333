//! Store configuration.
//!
//! Loaded from TOML; every field except `path` has a default.
//!
//! ```toml
//! path = "/var/lib/spool/identity.db"
//! busy_timeout_ms = 5000
//! journal_mode = "wal"
//! sync_mode = "normal"
//! recovery_age_ms = 300000
//! reaper_interval_ms = 60000
//! idle_poll_ms = 1000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_RECOVERY_AGE_MS: u64 = 5 * 60 * 1_000;
const DEFAULT_REAPER_INTERVAL_MS: u64 = 60_000;
const DEFAULT_IDLE_POLL_MS: u64 = 1_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JournalMode {
    #[default]
    Wal,
    Delete,
}

impl JournalMode {
    pub fn pragma_value(self) -> &'static str {
        match self {
            JournalMode::Wal => "wal",
            JournalMode::Delete => "delete",
        }
    }
}

/// SQLite synchronous mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    Normal,
    Full,
}

impl SyncMode {
    pub fn pragma_value(self) -> &'static str {
        match self {
            SyncMode::Normal => "normal",
            SyncMode::Full => "full",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file holding every tenant's queue tables.
    pub path: PathBuf,

    /// How long a connection waits on a locked database before giving up.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default)]
    pub journal_mode: JournalMode,

    #[serde(default)]
    pub sync_mode: SyncMode,

    /// Reservations older than this are treated as abandoned by the reaper.
    #[serde(default = "default_recovery_age_ms")]
    pub recovery_age_ms: u64,

    #[serde(default = "default_reaper_interval_ms")]
    pub reaper_interval_ms: u64,

    /// Longest a worker sleeps when nothing is scheduled.
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

fn default_recovery_age_ms() -> u64 {
    DEFAULT_RECOVERY_AGE_MS
}

fn default_reaper_interval_ms() -> u64 {
    DEFAULT_REAPER_INTERVAL_MS
}

fn default_idle_poll_ms() -> u64 {
    DEFAULT_IDLE_POLL_MS
}

impl StoreConfig {
    /// Config with defaults for everything but the database path.
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: JournalMode::default(),
            sync_mode: SyncMode::default(),
            recovery_age_ms: DEFAULT_RECOVERY_AGE_MS,
            reaper_interval_ms: DEFAULT_REAPER_INTERVAL_MS,
            idle_poll_ms: DEFAULT_IDLE_POLL_MS,
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: StoreConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("path must not be empty".to_string()));
        }
        if self.path.is_dir() {
            return Err(ConfigError::Invalid(format!(
                "path {} is a directory",
                self.path.display()
            )));
        }
        for (name, value) in [
            ("busy_timeout_ms", self.busy_timeout_ms),
            ("recovery_age_ms", self.recovery_age_ms),
            ("reaper_interval_ms", self.reaper_interval_ms),
            ("idle_poll_ms", self.idle_poll_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn recovery_age(&self) -> Duration {
        Duration::from_millis(self.recovery_age_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}
