/*!
 * Retry controller with exponential backoff
 *
 * Drives the attempts of one transfer strictly one after another. An
 * attempt times out only when it stops making progress for the idle limit;
 * a slow but steady body may take as long as it needs. Cancellation is
 * observed both while an attempt is in flight and while waiting out a
 * backoff delay.
 */

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::error::{Result, TransferError};

/// How many attempts to make and how long to wait between them
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,

    /// Delay after the first failed attempt
    pub initial_delay: Duration,

    /// Maximum delay between attempts
    pub max_delay: Duration,

    /// Jitter factor (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(1, &RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(max_attempts: u32, config: &RetryConfig) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_factor: config.jitter_factor.clamp(0.0, 1.0),
        }
    }

    /// Delay after failed attempt number `attempt` (1-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let base_delay = self.initial_delay.saturating_mul(2_u32.pow(exponent));

        // Cap at max_delay
        let capped_delay = base_delay.min(self.max_delay);

        if self.jitter_factor > 0.0 {
            let jitter = rand::rng().random_range(0.0..self.jitter_factor);
            let jitter_amount = capped_delay.as_secs_f64() * jitter;
            capped_delay + Duration::from_secs_f64(jitter_amount)
        } else {
            capped_delay
        }
    }
}

/// Last time an attempt moved body bytes
///
/// Cloned into whatever reads or writes the payload; every clone shares one
/// timestamp.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    last: Arc<Mutex<Instant>>,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            last: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Record progress now
    pub fn beat(&self) {
        *self.lock() = Instant::now();
    }

    pub fn last(&self) -> Instant {
        *self.lock()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Instant> {
        match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Resolve once no beat has arrived for `limit`
    pub async fn stalled(&self, limit: Duration) {
        loop {
            let deadline = self.last() + limit;
            if Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep_until(deadline).await;
        }
    }
}

/// Where a transfer is in its attempt lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Attempting(u32),
    /// Waiting out the backoff before the given attempt
    Retrying(u32),
    Succeeded,
    Failed,
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Succeeded | TransferState::Failed)
    }
}

/// Classified result of one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Bytes transferred
    Success(u64),
    RetryableFailure(TransferError),
    FatalFailure(TransferError),
}

impl AttemptOutcome {
    pub fn classify(result: Result<u64>) -> Self {
        match result {
            Ok(bytes) => AttemptOutcome::Success(bytes),
            Err(e) if e.is_retryable() => AttemptOutcome::RetryableFailure(e),
            Err(e) => AttemptOutcome::FatalFailure(e),
        }
    }
}

/// State machine driving the attempts of one transfer
#[derive(Debug)]
pub struct RetryController {
    policy: RetryPolicy,
    idle_timeout: Duration,
    heartbeat: Heartbeat,
    cancel: CancellationToken,
    state: TransferState,
    attempts: u32,
    history: Vec<TransferState>,
}

impl RetryController {
    /// `idle_timeout` bounds how long an attempt may go without a beat on
    /// [`RetryController::heartbeat`]; that includes waiting for response
    /// headers.
    pub fn new(policy: RetryPolicy, idle_timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            policy,
            idle_timeout,
            heartbeat: Heartbeat::new(),
            cancel,
            state: TransferState::Idle,
            attempts: 0,
            history: vec![TransferState::Idle],
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Attempts started so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    /// Progress signal the attempts report to
    pub fn heartbeat(&self) -> Heartbeat {
        self.heartbeat.clone()
    }

    /// Every state the controller has passed through, in order
    pub fn history(&self) -> &[TransferState] {
        &self.history
    }

    /// Run attempts until one succeeds, a fatal error occurs, the budget is
    /// spent, or the transfer is cancelled
    ///
    /// `attempt` receives the 1-based attempt number and must start from a
    /// clean slate each time (fresh file handle, fresh signature).
    pub async fn run<F, Fut>(&mut self, mut attempt: F) -> Result<u64>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<u64>>,
    {
        let cancel = self.cancel.clone();
        let heartbeat = self.heartbeat.clone();
        let idle = self.idle_timeout;
        let mut n = 1;
        loop {
            if cancel.is_cancelled() {
                return self.fail(TransferError::Cancelled(
                    "cancelled before attempt started".to_string(),
                ));
            }

            self.transition(TransferState::Attempting(n));
            self.attempts = n;
            debug!(attempt = n, max_attempts = self.policy.max_attempts, "starting attempt");
            heartbeat.beat();

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => AttemptOutcome::FatalFailure(
                    TransferError::Cancelled("cancelled during attempt".to_string()),
                ),
                result = attempt(n) => AttemptOutcome::classify(result),
                _ = heartbeat.stalled(idle) => AttemptOutcome::RetryableFailure(
                    TransferError::Timeout(format!("no progress for {:?}", idle)),
                ),
            };

            match outcome {
                AttemptOutcome::Success(bytes) => {
                    self.transition(TransferState::Succeeded);
                    return Ok(bytes);
                }
                AttemptOutcome::FatalFailure(e) => return self.fail(e),
                AttemptOutcome::RetryableFailure(e) if n >= self.policy.max_attempts => {
                    return self.fail(e);
                }
                AttemptOutcome::RetryableFailure(e) => {
                    let delay = self.policy.calculate_delay(n);
                    warn!(
                        attempt = n,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "attempt failed, retrying"
                    );
                    self.transition(TransferState::Retrying(n + 1));

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            return self.fail(TransferError::Cancelled(
                                "cancelled during retry backoff".to_string(),
                            ));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    n += 1;
                }
            }
        }
    }

    fn fail(&mut self, error: TransferError) -> Result<u64> {
        self.transition(TransferState::Failed);
        Err(error)
    }

    fn transition(&mut self, next: TransferState) {
        self.state = next;
        self.history.push(next);
    }
}
