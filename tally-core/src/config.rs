//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/tally/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/tally/` (~/.config/tally/)
//! - Data: `$XDG_DATA_HOME/tally/` (~/.local/share/tally/)
//! - State/Logs: `$XDG_STATE_HOME/tally/` (~/.local/state/tally/)

use crate::error::{Error, Result};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Dispatch worker configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Runtime debug mode.
///
/// Debug modes shrink batches so every event is validated on its own, and
/// `DebugOnly` asks the collector not to persist what it receives.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DebugMode {
    /// Production behaviour
    #[default]
    Off,
    /// Validate events server-side without storing them (`Dry-Run: true`)
    DebugOnly,
    /// Validate events and store them
    DebugAndTrack,
}

impl DebugMode {
    /// Whether any debug mode is active
    pub fn is_debug(&self) -> bool {
        !matches!(self, DebugMode::Off)
    }

    /// Whether flushes carry the dry-run marker header
    pub fn is_dry_run(&self) -> bool {
        matches!(self, DebugMode::DebugOnly)
    }
}

/// What the worker does with non-fatal per-command errors.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Log and keep running
    #[default]
    Lenient,
    /// Escalate to a worker fault
    Strict,
}

/// Dispatch worker configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    /// Collector endpoint receiving batches (POST)
    pub server_url: Option<String>,

    /// Endpoint serving the remote configure document (GET)
    pub configure_url: Option<String>,

    /// Debug mode
    #[serde(default)]
    pub debug_mode: DebugMode,

    /// Handling of non-fatal errors
    #[serde(default)]
    pub error_policy: ErrorPolicy,

    /// Rows per batch in normal mode
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Rows per batch in debug modes
    #[serde(default = "default_debug_batch_size")]
    pub debug_batch_size: usize,

    /// Row ceiling for the queue store
    #[serde(default = "default_max_queue_rows")]
    pub max_queue_rows: usize,

    /// Delay used for coalesced background flushes
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            configure_url: None,
            debug_mode: DebugMode::default(),
            error_policy: ErrorPolicy::default(),
            batch_size: default_batch_size(),
            debug_batch_size: default_debug_batch_size(),
            max_queue_rows: default_max_queue_rows(),
            flush_interval_ms: default_flush_interval(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_batch_size() -> usize {
    1000
}

fn default_debug_batch_size() -> usize {
    1
}

fn default_max_queue_rows() -> usize {
    10_000
}

fn default_flush_interval() -> u64 {
    15_000
}

fn default_timeout() -> u64 {
    30
}

impl DispatchConfig {
    /// Rows read per flush pass for the current debug mode
    pub fn effective_batch_size(&self) -> usize {
        if self.debug_mode.is_debug() {
            self.debug_batch_size
        } else {
            self.batch_size
        }
    }

    /// Background flush delay
    pub fn flush_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.flush_interval_ms)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config(
                "dispatch.batch_size must be at least 1".to_string(),
            ));
        }
        if self.debug_batch_size == 0 {
            return Err(Error::Config(
                "dispatch.debug_batch_size must be at least 1".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "dispatch.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.max_queue_rows == 0 {
            return Err(Error::Config(
                "dispatch.max_queue_rows must be at least 1".to_string(),
            ));
        }
        for (field, url) in [
            ("server_url", &self.server_url),
            ("configure_url", &self.configure_url),
        ] {
            if let Some(url) = url {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(Error::Config(format!(
                        "dispatch.{} must be an http(s) URL, got {:?}",
                        field, url
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.dispatch.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/tally/config.toml` (~/.config/tally/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("tally").join("config.toml")
    }

    /// Returns the data directory path (for queue databases)
    ///
    /// `$XDG_DATA_HOME/tally/` (~/.local/share/tally/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("tally")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/tally/` (~/.local/state/tally/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("tally")
    }

    /// Returns today's log file path
    ///
    /// Logs rotate daily (UTC) as `tally.<YYYY-MM-DD>.log`.
    pub fn log_path() -> PathBuf {
        Self::log_path_for(Utc::now().date_naive())
    }

    /// Log file written on `date`
    pub fn log_path_for(date: NaiveDate) -> PathBuf {
        Self::state_dir().join(format!("tally.{}.log", date.format("%Y-%m-%d")))
    }
}
