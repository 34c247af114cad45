/*!
 * Logging and tracing initialization
 */

use std::path::Path;
use sysinfo::System;
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::EngineConfig;
use crate::error::{Result, TransferError};

/// File name prefix for rotated log files
pub const LOG_FILE_PREFIX: &str = "orbit-s3.log";

/// Initialize structured logging based on configuration
///
/// Logs go to a daily-rotated file when `log_path` names an existing
/// directory, to stdout otherwise. The returned guard flushes the file
/// writer and must be kept alive for as long as logging is needed.
/// Installing a second subscriber is a no-op.
pub fn init_logging(config: &EngineConfig) -> Result<Option<WorkerGuard>> {
    let log_level = config.log_level.to_tracing_level();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            EnvFilter::try_new(format!(
                "orbit_s3_transfer={},orbit_s3={}",
                log_level, log_level
            ))
        })
        .map_err(|e| TransferError::Config(format!("Failed to create log filter: {}", e)))?;

    match config.log_path.as_deref().filter(|p| p.is_dir()) {
        Some(dir) => Ok(init_file_logging(dir, config.log_json, env_filter)),
        None => {
            init_stdout_logging(config.log_json, env_filter);
            Ok(None)
        }
    }
}

/// Initialize logging to stdout
fn init_stdout_logging(json: bool, env_filter: EnvFilter) {
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if json {
        registry
            .with(fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::NONE)
                    .compact(),
            )
            .try_init()
    };

    if installed.is_err() {
        debug!("tracing subscriber already installed");
    }
}

/// Initialize logging to a daily-rotated file
fn init_file_logging(dir: &Path, json: bool, env_filter: EnvFilter) -> Option<WorkerGuard> {
    let file_appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_target(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_ansi(false),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_target(true)
                    .with_thread_names(true)
                    .with_ansi(false), // No ANSI colors in file
            )
            .try_init()
    };

    match installed {
        Ok(()) => Some(guard),
        Err(_) => {
            debug!("tracing subscriber already installed");
            None
        }
    }
}

/// Log a one-line summary of the host the engine runs on
pub fn log_host_summary() {
    let mut system = System::new_all();
    system.refresh_all();

    info!(
        system_name = %System::name().unwrap_or_default(),
        kernel_version = %System::kernel_version().unwrap_or_default(),
        os_version = %System::os_version().unwrap_or_default(),
        host_name = %System::host_name().unwrap_or_default(),
        total_memory = system.total_memory(),
        used_memory = system.used_memory(),
        "host summary"
    );
}

/// Initialize logging with custom format for testing
#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("orbit_s3_transfer=debug"));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok(); // Ignore error if already initialized
    });
}
