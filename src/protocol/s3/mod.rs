//! S3 wire protocol for single-object transfers
//!
//! Talks to any S3-compatible endpoint over plain HTTP(S) with AWS
//! Signature Version 4. Only the request shaping needed for one-shot PUT
//! and GET lives here; retries, progress and callbacks are driven from
//! [`crate::core`].
//!
//! # Layout
//!
//! - [`credentials`] - per-request credential context
//! - [`endpoint`] - endpoint, bucket and key to URL
//! - [`signer`] - SigV4 signing with per-attempt timestamps
//! - [`transport`] - the [`Transport`] seam and its reqwest implementation
//! - [`object`] - one PUT or GET attempt

pub mod credentials;
pub mod endpoint;
pub mod object;
pub mod signer;
pub mod transport;

pub use credentials::Credentials;
pub use endpoint::{ObjectLocation, DEFAULT_REGION};
pub use object::ObjectTransfer;
pub use signer::{SignedHeaders, SigningClock, SigningRequest};
pub use transport::{HttpTransport, Method, RequestBody, Response, SignedRequest, Transport};
