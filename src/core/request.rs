/*!
 * Typed transfer request handed to the engine
 */

use std::fmt;
use std::path::PathBuf;

use crate::error::{Result, TransferError};
use crate::protocol::s3::credentials::Credentials;
use crate::protocol::s3::endpoint::{ObjectLocation, DEFAULT_REGION};

/// Which way the bytes move
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Upload,
    Download,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

/// One single-object transfer
///
/// Immutable once handed to the engine. The credentials live exactly as
/// long as the request.
#[derive(Debug)]
pub struct TransferRequest {
    pub direction: Direction,
    pub bucket: String,
    /// Object key, already URL-decoded
    pub key: String,
    /// Upload source or download destination
    pub file_path: PathBuf,
    pub credentials: Credentials,
    pub region: String,
    pub endpoint: Option<String>,
    pub ca_certs_path: Option<PathBuf>,
    pub max_attempts: u32,
    pub force_path_style: bool,
}

impl TransferRequest {
    pub fn new(
        direction: Direction,
        bucket: impl Into<String>,
        key: impl Into<String>,
        file_path: impl Into<PathBuf>,
        credentials: Credentials,
    ) -> Self {
        Self {
            direction,
            bucket: bucket.into(),
            key: key.into(),
            file_path: file_path.into(),
            credentials,
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            ca_certs_path: None,
            max_attempts: 1,
            force_path_style: false,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_ca_certs_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_certs_path = Some(path.into());
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_path_style(mut self, force: bool) -> Self {
        self.force_path_style = force;
        self
    }

    /// Check everything that can be checked without touching the network
    pub fn validate(&self) -> Result<()> {
        if self.bucket.trim().is_empty() {
            return Err(TransferError::Config("bucket is required".to_string()));
        }
        if self.key.is_empty() {
            return Err(TransferError::Config("object key is required".to_string()));
        }
        if self.file_path.as_os_str().is_empty() {
            return Err(TransferError::Config("file_path is required".to_string()));
        }
        if self.region.trim().is_empty() {
            return Err(TransferError::Config("region must not be empty".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(TransferError::Config(
                "tries must be at least 1".to_string(),
            ));
        }
        self.credentials.validate()?;
        self.location().map(|_| ())
    }

    /// Where the object lives
    pub fn location(&self) -> Result<ObjectLocation> {
        ObjectLocation::resolve(
            self.endpoint.as_deref(),
            &self.region,
            &self.bucket,
            &self.key,
            self.force_path_style,
        )
    }
}
