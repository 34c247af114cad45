/*!
 * Error types for S3 object transfers
 */

use std::fmt;
use std::io;
use std::path::Path;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransferError>;

/// Process exit codes for the command-line tool
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;

/// Errors that can occur while moving one object to or from a bucket
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// Bad or missing parameters; no network attempt is made
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Credentials rejected by the remote service
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Bucket or object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Server asked us to slow down
    #[error("Request throttled: {0}")]
    Throttled(String),

    /// Server-side failure (5xx)
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Connection refused, reset, TLS handshake failure, broken stream
    #[error("Network error: {0}")]
    Network(String),

    /// Attempt exceeded its time budget
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// User-initiated or shutdown-initiated cancellation
    #[error("Transfer cancelled: {0}")]
    Cancelled(String),

    /// Local file open/read/write failure
    #[error("Local I/O error: {0}")]
    LocalIo(String),

    /// Payload digest disagrees with the ETag returned by the server
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Any other client error the server returned
    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Coarse error kind surfaced in terminal messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Authentication,
    NotFound,
    Throttling,
    Server,
    Network,
    Timeout,
    Cancellation,
    LocalIo,
    Integrity,
    Rejected,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Configuration => "ConfigurationError",
            ErrorKind::Authentication => "AuthenticationError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::Throttling => "ThrottlingError",
            ErrorKind::Server => "ServerError",
            ErrorKind::Network => "NetworkError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::Cancellation => "CancellationError",
            ErrorKind::LocalIo => "LocalIOError",
            ErrorKind::Integrity => "IntegrityError",
            ErrorKind::Rejected => "RequestRejectedError",
        };
        f.write_str(name)
    }
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::Config(_) => ErrorKind::Configuration,
            TransferError::Authentication(_) => ErrorKind::Authentication,
            TransferError::NotFound(_) => ErrorKind::NotFound,
            TransferError::Throttled(_) => ErrorKind::Throttling,
            TransferError::Server { .. } => ErrorKind::Server,
            TransferError::Network(_) => ErrorKind::Network,
            TransferError::Timeout(_) => ErrorKind::Timeout,
            TransferError::Cancelled(_) => ErrorKind::Cancellation,
            TransferError::LocalIo(_) => ErrorKind::LocalIo,
            TransferError::ChecksumMismatch { .. } => ErrorKind::Integrity,
            TransferError::Rejected { .. } => ErrorKind::Rejected,
        }
    }

    /// Check if another attempt could succeed
    ///
    /// Local I/O problems are fatal: retrying cannot fix a bad path or a
    /// permission issue.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::Throttled(_)
                | TransferError::Server { .. }
                | TransferError::Network(_)
                | TransferError::Timeout(_)
                | TransferError::ChecksumMismatch { .. }
        )
    }

    /// Attach a local path to an I/O error
    pub fn local_io(path: &Path, err: io::Error) -> Self {
        TransferError::LocalIo(format!("{}: {}", path.display(), err))
    }

    /// Classify a transport-level failure from reqwest
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        let detail = error_chain(err);
        if err.is_timeout() {
            TransferError::Timeout(detail)
        } else if err.is_builder() {
            TransferError::Config(detail)
        } else {
            TransferError::Network(detail)
        }
    }

    /// Classify a non-2xx response using its status and the S3 error code
    pub fn from_status(status: u16, code: Option<&str>, message: &str) -> Self {
        let detail = match (code, message.is_empty()) {
            (Some(code), false) => format!("{}: {}", code, message),
            (Some(code), true) => code.to_string(),
            (None, false) => message.to_string(),
            (None, true) => reqwest::StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("unexpected status")
                .to_string(),
        };

        match (status, code) {
            // A fresh signature timestamp on the next attempt can cure skew
            (_, Some("RequestTimeTooSkewed")) => TransferError::Server {
                status,
                message: detail,
            },
            (_, Some("SlowDown")) | (429, _) => TransferError::Throttled(detail),
            (_, Some("RequestTimeout")) | (408, _) => TransferError::Timeout(detail),
            (
                _,
                Some(
                    "AccessDenied"
                    | "ExpiredToken"
                    | "InvalidAccessKeyId"
                    | "InvalidToken"
                    | "SignatureDoesNotMatch",
                ),
            )
            | (401 | 403, _) => TransferError::Authentication(detail),
            (_, Some("NoSuchBucket" | "NoSuchKey")) | (404, _) => TransferError::NotFound(detail),
            (
                400,
                Some(
                    "InvalidArgument"
                    | "InvalidBucketName"
                    | "KeyTooLongError"
                    | "InvalidRequest"
                    | "MissingContentLength",
                ),
            ) => TransferError::Config(detail),
            (500..=599, _) => TransferError::Server {
                status,
                message: detail,
            },
            _ => TransferError::Rejected {
                status,
                message: detail,
            },
        }
    }
}

// Convert io::Error to TransferError
impl From<io::Error> for TransferError {
    fn from(err: io::Error) -> Self {
        TransferError::LocalIo(err.to_string())
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(err: serde_json::Error) -> Self {
        TransferError::Config(format!("JSON parse error: {}", err))
    }
}

/// Flatten an error and its sources into one line
fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_errors() {
        assert!(TransferError::Network("connection reset".to_string()).is_retryable());
        assert!(TransferError::Timeout("30s elapsed".to_string()).is_retryable());
        assert!(TransferError::Throttled("slow down".to_string()).is_retryable());
        assert!(TransferError::Server {
            status: 503,
            message: "unavailable".to_string()
        }
        .is_retryable());
        assert!(TransferError::ChecksumMismatch {
            expected: "a".to_string(),
            actual: "b".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(!TransferError::Config("bad".to_string()).is_retryable());
        assert!(!TransferError::Authentication("denied".to_string()).is_retryable());
        assert!(!TransferError::NotFound("gone".to_string()).is_retryable());
        assert!(!TransferError::Cancelled("user".to_string()).is_retryable());
        assert!(!TransferError::LocalIo("permission denied".to_string()).is_retryable());
        assert!(!TransferError::Rejected {
            status: 409,
            message: "conflict".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(
            TransferError::from_status(403, Some("AccessDenied"), "Access Denied").kind(),
            ErrorKind::Authentication
        );
        assert_eq!(
            TransferError::from_status(400, Some("ExpiredToken"), "expired").kind(),
            ErrorKind::Authentication
        );
        assert_eq!(
            TransferError::from_status(404, Some("NoSuchBucket"), "").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            TransferError::from_status(503, Some("SlowDown"), "reduce rate").kind(),
            ErrorKind::Throttling
        );
        assert_eq!(
            TransferError::from_status(429, None, "").kind(),
            ErrorKind::Throttling
        );
        assert_eq!(
            TransferError::from_status(400, Some("RequestTimeout"), "idle").kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            TransferError::from_status(500, Some("InternalError"), "oops").kind(),
            ErrorKind::Server
        );
        assert_eq!(
            TransferError::from_status(400, Some("InvalidArgument"), "bad header").kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            TransferError::from_status(409, Some("OperationAborted"), "conflict").kind(),
            ErrorKind::Rejected
        );
    }

    #[test]
    fn test_clock_skew_is_retryable() {
        let err = TransferError::from_status(403, Some("RequestTimeTooSkewed"), "skew");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_status_message_falls_back_to_reason() {
        let err = TransferError::from_status(502, None, "");
        assert_eq!(err.to_string(), "Server error (502): Bad Gateway");

        let err = TransferError::from_status(404, Some("NoSuchKey"), "The key does not exist");
        assert_eq!(err.to_string(), "Not found: NoSuchKey: The key does not exist");
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::Configuration.to_string(), "ConfigurationError");
        assert_eq!(ErrorKind::LocalIo.to_string(), "LocalIOError");
        assert_eq!(ErrorKind::Cancellation.to_string(), "CancellationError");
    }

    #[test]
    fn test_local_io_carries_path() {
        let err = TransferError::local_io(
            Path::new("/missing/file.bin"),
            io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        );
        assert_eq!(
            err.to_string(),
            "Local I/O error: /missing/file.bin: No such file or directory"
        );
        assert_eq!(err.kind(), ErrorKind::LocalIo);
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: TransferError = json_err.into();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }
}
