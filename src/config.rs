//! Configuration management
//!
//! This module handles loading and managing configuration from:
//! - Command-line arguments
//! - Configuration files (TOML)
//! - Defaults

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Execution engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Capacity of the bounded inbound event queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Length of one wait slice while blocked on the queue, in milliseconds
    #[serde(default = "default_poll_slice_ms")]
    pub poll_slice_ms: u64,

    /// Wait for an explicit step signal before each transition
    #[serde(default)]
    pub debug_mode: bool,
}

/// Cross-test data store settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// JSON file the store is loaded from and saved to
    pub path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions

fn default_queue_capacity() -> usize {
    50
}

fn default_poll_slice_ms() -> u64 {
    2000
}

fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            poll_slice_ms: default_poll_slice_ms(),
            debug_mode: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl EngineConfig {
    pub fn poll_slice(&self) -> Duration {
        Duration::from_millis(self.poll_slice_ms)
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("Failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config file {:?}: {}", path, e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from default locations
    ///
    /// Searches in order:
    /// 1. ./interop-fsm.toml
    /// 2. ~/.interop-fsm/config.toml
    /// 3. /etc/interop-fsm/config.toml
    pub fn load() -> Result<Self> {
        let paths = vec![
            PathBuf::from("interop-fsm.toml"),
            dirs::home_dir()
                .map(|h| h.join(".interop-fsm").join("config.toml"))
                .unwrap_or_else(|| PathBuf::from("/dev/null")),
            PathBuf::from("/etc/interop-fsm/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                tracing::info!("Loading config from {:?}", path);
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }

    fn validate(&self) -> Result<()> {
        if self.engine.queue_capacity == 0 {
            return Err(Error::Config(
                "engine.queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.engine.poll_slice_ms == 0 {
            return Err(Error::Config(
                "engine.poll_slice_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
