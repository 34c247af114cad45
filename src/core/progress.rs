/*!
 * Upload progress aggregation
 *
 * Turns raw byte counts from the upload stream into throttled, monotonic
 * fraction-complete samples. Samples are delivered while the aggregator
 * lock is held, so once `close()` or `finish()` returns no further sample
 * can reach the caller.
 */

use std::sync::{Arc, Mutex, MutexGuard};

use super::dispatch::CallbackGate;

/// Caller-visible progress callback, invoked with a fraction in [0, 1]
///
/// Must not call back into the aggregator that invokes it.
pub type ProgressCallback = Box<dyn Fn(f64) + Send + Sync>;

/// Throttled, monotonic progress reporting for one transfer
pub struct ProgressAggregator {
    min_delta: f64,
    gate: Option<Arc<CallbackGate>>,
    state: Mutex<ProgressState>,
}

struct ProgressState {
    callback: Option<ProgressCallback>,
    last: Option<f64>,
}

impl ProgressAggregator {
    pub fn new(callback: ProgressCallback, min_delta: f64) -> Self {
        Self {
            min_delta: min_delta.max(0.0),
            gate: None,
            state: Mutex::new(ProgressState {
                callback: Some(callback),
                last: None,
            }),
        }
    }

    /// Suppress delivery once the engine has shut down
    pub fn with_gate(mut self, gate: Arc<CallbackGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Record `bytes` of `total` done
    ///
    /// Never emits `1.0`; only a confirmed success does that, through
    /// [`finish`](Self::finish). Lower values than the last sample (a retry
    /// restarting from zero) are ignored.
    pub fn update(&self, bytes: u64, total: u64) {
        if total == 0 {
            return;
        }
        let fraction = (bytes as f64 / total as f64).clamp(0.0, 1.0);
        if fraction >= 1.0 {
            return;
        }

        let mut state = self.lock();
        let last = state.last.unwrap_or(0.0);
        if fraction <= last || fraction - last < self.min_delta {
            return;
        }
        if self.emit(&state, fraction) {
            state.last = Some(fraction);
        }
    }

    /// Emit the final `1.0` and close
    pub fn finish(&self) {
        let mut state = self.lock();
        if state.last != Some(1.0) && self.emit(&state, 1.0) {
            state.last = Some(1.0);
        }
        state.callback = None;
    }

    /// Stop delivering samples; later updates are dropped
    pub fn close(&self) {
        self.lock().callback = None;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().callback.is_none()
    }

    /// Last fraction handed to the callback
    pub fn last_emitted(&self) -> Option<f64> {
        self.lock().last
    }

    fn emit(&self, state: &ProgressState, fraction: f64) -> bool {
        let Some(callback) = state.callback.as_ref() else {
            return false;
        };
        match &self.gate {
            Some(gate) => gate.deliver(|| callback(fraction)),
            None => {
                callback(fraction);
                true
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
