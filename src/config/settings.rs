//! Application settings

use crate::core::at::DEFAULT_BUFFER_CAPACITY;
use crate::core::command::DEFAULT_QUEUE_DEPTH;
use crate::core::transport::SerialConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No platform config directory
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// File could not be read or written
    #[error("Config I/O error on {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// File is not valid TOML for [`AppConfig`]
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config could not be serialized
    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Serial link to the modem
    pub serial: SerialConfig,
    /// Modem worker settings
    pub modem: ModemConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load config from `path`, or from the default location.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_path()?,
        };

        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Save config to `path`, or to the default location
    pub fn save(&self, path: Option<&Path>) -> Result<(), ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_path()?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content).map_err(|source| ConfigError::Io { path, source })
    }
}

fn default_path() -> Result<PathBuf, ConfigError> {
    super::config_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoConfigDir)
}

/// Modem worker settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemConfig {
    /// Transaction buffer capacity in bytes
    pub buffer_capacity: usize,
    /// Request queue depth
    pub queue_depth: usize,
    /// Carrier profile the modem must be set to
    pub carrier_profile: String,
    /// Short response budget (polls)
    pub rx_timeout_min: u32,
    /// Default response budget (polls)
    pub rx_timeout_default: u32,
    /// Delays and periods
    pub timings: ModemTimings,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            carrier_profile: "verizon".to_string(),
            rx_timeout_min: 250,
            rx_timeout_default: 2500,
            timings: ModemTimings::default(),
        }
    }
}

/// Delays and periods, in milliseconds unless noted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemTimings {
    /// Boot quiescence before the first escape
    pub settle_delay_ms: u64,
    /// Response budget for the escape sequence (polls)
    pub escape_timeout: u32,
    /// Pause before retrying the escape after failed probes
    pub recovery_delay_ms: u64,
    /// Pause after the escape retries
    pub post_recovery_delay_ms: u64,
    /// Worker loop period
    pub task_period_ms: u64,
    /// Registration poll period
    pub registration_period_ms: u64,
    /// Sleep between byte-arrival polls
    pub poll_interval_ms: u64,
}

impl Default for ModemTimings {
    fn default() -> Self {
        Self {
            settle_delay_ms: 1050,
            escape_timeout: 1050,
            recovery_delay_ms: 1050,
            post_recovery_delay_ms: 550,
            task_period_ms: 2,
            registration_period_ms: 500,
            poll_interval_ms: 1,
        }
    }
}

impl ModemTimings {
    /// No delays; one-millisecond loop period. For simulation and tests.
    pub fn immediate() -> Self {
        Self {
            settle_delay_ms: 0,
            escape_timeout: 3,
            recovery_delay_ms: 0,
            post_recovery_delay_ms: 0,
            task_period_ms: 1,
            registration_period_ms: 20,
            poll_interval_ms: 0,
        }
    }

    /// Worker loop period
    pub fn task_period(&self) -> Duration {
        Duration::from_millis(self.task_period_ms)
    }

    /// Sleep between byte-arrival polls
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (e.g. "info", "modemlink_core=debug")
    pub level: String,
    /// Emit JSON lines instead of text
    pub json: bool,
    /// Also write to this file
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}
