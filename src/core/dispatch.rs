/*!
 * Exactly-once delivery of the terminal result
 */

use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, warn};

use super::progress::ProgressAggregator;
use crate::error::ErrorKind;

/// Terminal outcome of one transfer request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferResult {
    pub success: bool,
    pub message: String,
}

impl TransferResult {
    /// Successful transfer; the message is empty as at the boundary
    pub fn success() -> Self {
        Self {
            success: true,
            message: String::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl fmt::Display for TransferResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.success {
            f.write_str("success")
        } else {
            write!(f, "failure: {}", self.message)
        }
    }
}

/// Caller-visible terminal callback: `(success, message)`
pub type ResultCallback = Box<dyn FnOnce(bool, String) + Send>;

/// Engine-wide switch that stops callback delivery at shutdown
///
/// Deliveries hold a read lock for the duration of the callback; `close`
/// takes the write lock, so it waits for callbacks already running and no
/// callback starts after it returns. A callback must not shut the engine
/// down from inside itself.
#[derive(Debug)]
pub struct CallbackGate {
    open: RwLock<bool>,
}

impl CallbackGate {
    pub fn new() -> Self {
        Self {
            open: RwLock::new(true),
        }
    }

    pub fn close(&self) {
        let mut open = match self.open.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *open = false;
    }

    pub fn is_open(&self) -> bool {
        match self.open.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Run `f` if the gate is open; returns whether it ran
    pub fn deliver<F: FnOnce()>(&self, f: F) -> bool {
        let open = match self.open.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *open {
            f();
            true
        } else {
            false
        }
    }
}

impl Default for CallbackGate {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot latch around the terminal callback
///
/// The first `dispatch` wins; every later call is a no-op. A dispatcher
/// dropped without a verdict (its task torn down with the runtime) reports
/// a cancellation failure, so no request ends without its callback.
pub struct CallbackDispatcher {
    callback: Mutex<Option<ResultCallback>>,
    progress: Option<Arc<ProgressAggregator>>,
    gate: Option<Arc<CallbackGate>>,
}

impl CallbackDispatcher {
    pub fn new(callback: ResultCallback) -> Self {
        Self {
            callback: Mutex::new(Some(callback)),
            progress: None,
            gate: None,
        }
    }

    /// Progress stream to close before the result is delivered
    pub fn with_progress(mut self, progress: Arc<ProgressAggregator>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_gate(mut self, gate: Arc<CallbackGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Deliver the result; returns false if a result was already delivered
    pub fn dispatch(&self, result: TransferResult) -> bool {
        let callback = {
            let mut slot = match self.callback.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot.take()
        };
        let Some(callback) = callback else {
            debug!("terminal result already delivered, dropping {}", result);
            return false;
        };

        // Final progress sample precedes the result; none may follow it
        if let Some(progress) = &self.progress {
            if result.success {
                progress.finish();
            } else {
                progress.close();
            }
        }

        let TransferResult { success, message } = result;
        let delivered = match &self.gate {
            Some(gate) => gate.deliver(move || callback(success, message)),
            None => {
                callback(success, message);
                true
            }
        };
        if !delivered {
            debug!("engine shut down, terminal callback suppressed");
        }
        true
    }

    pub fn has_fired(&self) -> bool {
        match self.callback.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

impl Drop for CallbackDispatcher {
    fn drop(&mut self) {
        if !self.has_fired() {
            warn!("transfer dropped before completion");
            self.dispatch(TransferResult::failure(format!(
                "{}: transfer dropped before completion",
                ErrorKind::Cancellation
            )));
        }
    }
}

impl fmt::Debug for CallbackDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackDispatcher")
            .field("fired", &self.has_fired())
            .finish()
    }
}
