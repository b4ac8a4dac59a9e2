//! Configuration module
//!
//! Handles serial, modem and logging settings

mod settings;

pub use settings::{AppConfig, ConfigError, LoggingConfig, ModemConfig, ModemTimings};

use directories::ProjectDirs;
use std::path::PathBuf;

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "modemlink", "Modemlink").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the log directory
pub fn log_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "modemlink", "Modemlink").map(|dirs| dirs.data_dir().join("logs"))
}
