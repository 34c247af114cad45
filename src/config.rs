/*!
 * Configuration types for the transfer engine
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, TransferError};

/// Smallest chunk read from or written to a local file
pub const MIN_CHUNK_SIZE: usize = 64 * 1024;

/// Largest chunk read from or written to a local file
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Process-wide engine configuration
///
/// Every field has a default, so an empty TOML file or an init block that
/// only carries `log_path` is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Tokio worker threads backing all transfers
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    /// Directory for rotated log files (None or missing directory = stdout)
    #[serde(default)]
    pub log_path: Option<PathBuf>,

    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines instead of text
    #[serde(default)]
    pub log_json: bool,

    /// Chunk size in bytes for streaming file I/O
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Minimum fraction change between two progress samples
    #[serde(default = "default_progress_min_delta")]
    pub progress_min_delta: f64,

    /// Backoff between attempts
    #[serde(default)]
    pub retry: RetryConfig,

    /// How long an attempt may go without moving a body byte, in seconds
    ///
    /// Covers the wait for response headers too. There is no limit on the
    /// total length of an attempt that keeps making progress.
    #[serde(default = "default_idle_timeout", alias = "attempt_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// TCP/TLS connect timeout, in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// How long shutdown waits for cancelled transfers to report
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

/// Backoff settings shared by every transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Delay before the second attempt, in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay, in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Random extra delay as a fraction of the computed delay (0.0-1.0)
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            log_path: None,
            log_level: LogLevel::Info,
            log_json: false,
            chunk_size: default_chunk_size(),
            progress_min_delta: default_progress_min_delta(),
            retry: RetryConfig::default(),
            idle_timeout_secs: default_idle_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_worker_threads() -> usize {
    8
}

fn default_chunk_size() -> usize {
    256 * 1024 // 256 KB
}

fn default_progress_min_delta() -> f64 {
    0.01
}

fn default_initial_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_jitter_factor() -> f64 {
    0.3
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_shutdown_grace() -> u64 {
    5
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| TransferError::Config(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&contents)
            .map_err(|e| TransferError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Parse the JSON init block handed over by the embedding layer
    pub fn from_init_json(params: &str) -> Result<Self> {
        let mut config: EngineConfig = serde_json::from_str(params)
            .map_err(|e| TransferError::Config(format!("parse init params failed: {}", e)))?;
        // The boundary sends "" for "not set"
        if config
            .log_path
            .as_ref()
            .is_some_and(|p| p.as_os_str().is_empty())
        {
            config.log_path = None;
        }
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(TransferError::Config(
                "worker_threads must be at least 1".to_string(),
            ));
        }

        if !(0.0..1.0).contains(&self.progress_min_delta) {
            return Err(TransferError::Config(format!(
                "progress_min_delta {} must be in [0, 1)",
                self.progress_min_delta
            )));
        }

        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(TransferError::Config(format!(
                "retry.jitter_factor {} must be in [0, 1]",
                self.retry.jitter_factor
            )));
        }

        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(TransferError::Config(format!(
                "retry.initial_delay_ms {} exceeds retry.max_delay_ms {}",
                self.retry.initial_delay_ms, self.retry.max_delay_ms
            )));
        }

        if self.idle_timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err(TransferError::Config(
                "timeouts must be at least one second".to_string(),
            ));
        }

        Ok(())
    }

    /// Chunk size clamped to the supported range
    pub fn effective_chunk_size(&self) -> usize {
        self.chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
