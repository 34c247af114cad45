/*!
 * Core transfer engine
 *
 * Protocol-independent pieces of a transfer: the typed request, streaming
 * file I/O, the retry state machine, progress aggregation and the one-shot
 * result dispatcher.
 */

pub mod dispatch;
pub mod progress;
pub mod request;
pub mod retry;
pub mod stream;
pub mod transfer;

pub use dispatch::{CallbackDispatcher, CallbackGate, ResultCallback, TransferResult};
pub use progress::{ProgressAggregator, ProgressCallback};
pub use request::{Direction, TransferRequest};
pub use retry::{AttemptOutcome, Heartbeat, RetryController, RetryPolicy, TransferState};
pub use stream::{DownloadSink, DownloadSummary, UploadSource, UploadSummary};
pub use transfer::{execute, TransferSettings};
