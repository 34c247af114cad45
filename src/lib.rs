/*!
 * Orbit S3 - single-object transfer engine
 *
 * Moves one file to or from an S3-compatible bucket with:
 * - AWS Signature V4 signing, re-signed for every attempt
 * - Streaming bodies with bounded memory and MD5/ETag verification
 * - Bounded retries with exponential backoff and jitter
 * - Throttled, monotonic upload progress
 * - Exactly-once terminal callbacks, including on cancellation and shutdown
 *
 * Version: 0.6.0
 * Author: Shane Wall <shaneawall@gmail.com>
 */

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod logging;
pub mod params;
pub mod protocol;

// Re-export commonly used types
pub use config::EngineConfig;
pub use core::{Direction, TransferRequest, TransferResult};
pub use engine::{download, init, uninit, upload, Engine, TransferHandle};
pub use error::{ErrorKind, Result, TransferError};
pub use params::TransferParams;
pub use protocol::s3::{Credentials, HttpTransport, Transport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
