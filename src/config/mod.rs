//! Configuration for BulkIO ports
//!
//! Port tuning lives in plain serde structs so it can be loaded from a TOML
//! or JSON file and handed to [`InPort::with_config`] and
//! [`OutPort::with_config`]:
//!
//! - [`InPortConfig`] - queue depth and statistics for input ports
//! - [`OutPortConfig`] - transfer budget, error-log suppression and default
//!   output stream buffering
//! - [`LoggingConfig`] - tracing filter and optional log file for binaries
//!
//! # Example
//!
//! ```ignore
//! use bulkio_rs::config::BulkioConfig;
//!
//! let config = BulkioConfig::load("bulkio.toml")?;
//! let port = InFloatPort::with_config("dataFloat_in", &config.input);
//! ```
//!
//! [`InPort::with_config`]: crate::input::InPort::with_config
//! [`OutPort::with_config`]: crate::output::OutPort::with_config

use crate::error::{BulkioError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default input queue depth, in packets
pub const DEFAULT_MAX_QUEUE_DEPTH: i32 = 100;

/// Default transport payload limit in bytes (the usual 2 MiB giop limit)
pub const DEFAULT_MAX_TRANSFER_BYTES: usize = 2 * 1024 * 1024;

/// Fraction of the payload limit used for sample data; the rest is left
/// for protocol headers
pub const DEFAULT_TRANSFER_MARGIN: f64 = 0.9;

/// Consecutive transport errors logged per connection before suppression
pub const DEFAULT_MAX_LOGGED_CONNECTION_ERRORS: u64 = 10;

fn default_max_queue_depth() -> i32 {
    DEFAULT_MAX_QUEUE_DEPTH
}

fn default_true() -> bool {
    true
}

fn default_history_window() -> usize {
    crate::statistics::DEFAULT_HISTORY_WINDOW
}

fn default_max_transfer_bytes() -> usize {
    DEFAULT_MAX_TRANSFER_BYTES
}

fn default_transfer_margin() -> f64 {
    DEFAULT_TRANSFER_MARGIN
}

fn default_max_logged_connection_errors() -> u64 {
    DEFAULT_MAX_LOGGED_CONNECTION_ERRORS
}

fn default_log_filter() -> String {
    "info,bulkio_rs=debug".to_string()
}

/// Input port settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InPortConfig {
    /// Maximum queued packets; 0 drops everything, negative is unbounded
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: i32,

    /// Whether statistics are collected
    #[serde(default = "default_true")]
    pub statistics_enabled: bool,

    /// Number of pushes kept in the statistics window
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

impl Default for InPortConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: DEFAULT_MAX_QUEUE_DEPTH,
            statistics_enabled: true,
            history_window: default_history_window(),
        }
    }
}

/// Output port settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutPortConfig {
    /// Hard transport payload limit in bytes
    #[serde(default = "default_max_transfer_bytes")]
    pub max_transfer_bytes: usize,

    /// Fraction of `max_transfer_bytes` usable for data
    #[serde(default = "default_transfer_margin")]
    pub transfer_margin: f64,

    /// Consecutive errors logged per connection before going quiet
    #[serde(default = "default_max_logged_connection_errors")]
    pub max_logged_connection_errors: u64,

    /// Buffer size (real samples) for newly created output streams; 0 disables
    #[serde(default)]
    pub default_buffer_size: usize,

    /// Number of pushes kept in each connection's statistics window
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

impl Default for OutPortConfig {
    fn default() -> Self {
        Self {
            max_transfer_bytes: DEFAULT_MAX_TRANSFER_BYTES,
            transfer_margin: DEFAULT_TRANSFER_MARGIN,
            max_logged_connection_errors: DEFAULT_MAX_LOGGED_CONNECTION_ERRORS,
            default_buffer_size: 0,
            history_window: default_history_window(),
        }
    }
}

impl OutPortConfig {
    /// Usable payload bytes per push after the protocol margin
    pub fn payload_bytes(&self) -> usize {
        (self.max_transfer_bytes as f64 * self.transfer_margin) as usize
    }
}

/// Logging settings for binaries built on the crate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Directory for a daily rolling log file, if any
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            log_dir: None,
        }
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkioConfig {
    #[serde(default)]
    pub input: InPortConfig,

    #[serde(default)]
    pub output: OutPortConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl BulkioConfig {
    /// Load from a `.toml` or `.json` file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BulkioError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_toml_str(&content),
        }
        .map_err(|e| e.with_context(format!("Loading {:?}", path)))
    }

    /// Load, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| BulkioError::Config(format!("Failed to parse TOML config: {}", e)))
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| BulkioError::Config(format!("Failed to parse JSON config: {}", e)))
    }

    /// Save as pretty-printed JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| BulkioError::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| BulkioError::Config(format!("Failed to write config: {}", e)))
    }
}
