/*!
 * End-to-end execution of one transfer request
 */

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use super::dispatch::TransferResult;
use super::progress::ProgressAggregator;
use super::request::TransferRequest;
use super::retry::{RetryController, RetryPolicy};
use crate::config::{EngineConfig, RetryConfig};
use crate::error::TransferError;
use crate::protocol::s3::object::ObjectTransfer;
use crate::protocol::s3::transport::Transport;

/// Engine settings every transfer runs with
#[derive(Debug, Clone, PartialEq)]
pub struct TransferSettings {
    pub chunk_size: usize,
    pub idle_timeout: Duration,
    pub retry: RetryConfig,
}

impl TransferSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            chunk_size: config.effective_chunk_size(),
            idle_timeout: config.idle_timeout(),
            retry: config.retry.clone(),
        }
    }
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Drive `request` to a terminal result
///
/// Invalid requests fail before any network attempt. Never panics on
/// transfer errors; every outcome is folded into the returned result.
pub async fn execute(
    request: TransferRequest,
    transport: Arc<dyn Transport>,
    settings: &TransferSettings,
    progress: Option<Arc<ProgressAggregator>>,
    cancel: CancellationToken,
) -> TransferResult {
    let span = info_span!(
        "transfer",
        direction = %request.direction,
        bucket = %request.bucket,
        key = %request.key,
    );

    async move {
        let started = Instant::now();
        let max_attempts = request.max_attempts;

        let policy = RetryPolicy::from_config(max_attempts, &settings.retry);
        let mut controller = RetryController::new(policy, settings.idle_timeout, cancel);

        let mut transfer = match ObjectTransfer::new(request, transport, settings.chunk_size) {
            Ok(transfer) => transfer,
            Err(e) => {
                error!(error = %e, "rejected before first attempt");
                return TransferResult::failure(failure_message(&e, 0, max_attempts));
            }
        };
        if let Err(e) = transfer.preflight().await {
            error!(error = %e, "rejected before first attempt");
            return TransferResult::failure(failure_message(&e, 0, max_attempts));
        }
        transfer = transfer.with_heartbeat(controller.heartbeat());
        if let Some(progress) = progress {
            transfer = transfer.with_progress(progress);
        }
        let transfer = &transfer;

        match controller.run(|n| transfer.attempt(n)).await {
            Ok(bytes) => {
                info!(
                    bytes,
                    attempts = controller.attempts(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "transfer complete"
                );
                TransferResult::success()
            }
            Err(e) => {
                error!(
                    error = %e,
                    attempts = controller.attempts(),
                    max_attempts,
                    "transfer failed"
                );
                TransferResult::failure(failure_message(
                    &e,
                    controller.attempts(),
                    max_attempts,
                ))
            }
        }
    }
    .instrument(span)
    .await
}

/// Terminal message: error kind, reason and how many attempts were made
pub fn failure_message(error: &TransferError, attempts: u32, max_attempts: u32) -> String {
    if attempts == 0 {
        format!("{}: {}", error.kind(), error)
    } else {
        format!(
            "{}: {} (attempt {} of {})",
            error.kind(),
            error,
            attempts,
            max_attempts
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message_format() {
        let err = TransferError::Network("connection reset".to_string());
        assert_eq!(
            failure_message(&err, 3, 3),
            "NetworkError: Network error: connection reset (attempt 3 of 3)"
        );

        let err = TransferError::Config("bucket is required".to_string());
        assert_eq!(
            failure_message(&err, 0, 1),
            "ConfigurationError: Invalid configuration: bucket is required"
        );
    }

    #[test]
    fn test_settings_clamp_chunk_size() {
        let config = EngineConfig {
            chunk_size: 1,
            ..Default::default()
        };
        let settings = TransferSettings::from_config(&config);
        assert_eq!(settings.chunk_size, crate::config::MIN_CHUNK_SIZE);
        assert_eq!(settings.idle_timeout, Duration::from_secs(60));
    }
}
