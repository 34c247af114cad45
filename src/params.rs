/*!
 * Boundary parameter block
 *
 * The JSON object an embedding application hands to `upload`/`download`,
 * parsed and validated into a typed [`TransferRequest`] before the engine
 * sees it.
 */

use std::fmt;
use std::path::PathBuf;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Deserializer};

use crate::core::request::{Direction, TransferRequest};
use crate::error::{Result, TransferError};
use crate::protocol::s3::credentials::Credentials;
use crate::protocol::s3::endpoint::DEFAULT_REGION;

/// Every field the boundary recognizes
///
/// Optional fields sent as empty strings are treated as absent.
#[derive(Clone, Default, Deserialize)]
pub struct TransferParams {
    pub bucket: String,
    /// Object key, URL-encoded
    pub object: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub session_token: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub security_token: Option<String>,
    pub file_path: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub region: Option<String>,
    /// Maximum attempts; absent means one
    #[serde(default)]
    pub tries: Option<u32>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub endpoint: Option<String>,
    #[serde(default, alias = "ca_cert_path", deserialize_with = "empty_as_none")]
    pub ca_certs_path: Option<String>,
}

impl TransferParams {
    pub fn from_json(params: &str) -> Result<Self> {
        serde_json::from_str(params)
            .map_err(|e| TransferError::Config(format!("parse params failed: {}", e)))
    }

    /// Decode and validate into a request for `direction`
    pub fn into_request(self, direction: Direction) -> Result<TransferRequest> {
        let key = percent_decode_str(&self.object)
            .decode_utf8()
            .map_err(|e| TransferError::Config(format!("url decode param object failed: {}", e)))?
            .into_owned();

        let mut credentials = Credentials::new(self.access_key_id, self.secret_access_key);
        if let Some(token) = self.session_token {
            credentials = credentials.with_session_token(token);
        }
        if let Some(token) = self.security_token {
            credentials = credentials.with_security_token(token);
        }

        let mut request = TransferRequest::new(
            direction,
            self.bucket,
            key,
            PathBuf::from(self.file_path),
            credentials,
        )
        .with_region(self.region.unwrap_or_else(|| DEFAULT_REGION.to_string()))
        .with_max_attempts(self.tries.unwrap_or(1));

        if let Some(endpoint) = self.endpoint {
            request = request.with_endpoint(endpoint);
        }
        if let Some(path) = self.ca_certs_path {
            request = request.with_ca_certs_path(path);
        }

        request.validate()?;
        Ok(request)
    }
}

impl fmt::Debug for TransferParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferParams")
            .field("bucket", &self.bucket)
            .field("object", &self.object)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("session_token", &self.session_token.as_ref().map(|_| "[REDACTED]"))
            .field("security_token", &self.security_token.as_ref().map(|_| "[REDACTED]"))
            .field("file_path", &self.file_path)
            .field("region", &self.region)
            .field("tries", &self.tries)
            .field("endpoint", &self.endpoint)
            .field("ca_certs_path", &self.ca_certs_path)
            .finish()
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.is_empty()))
}
