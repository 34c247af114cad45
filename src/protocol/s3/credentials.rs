//! Credential context for one transfer request

use crate::error::{Result, TransferError};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;

/// Already-resolved credentials for a single transfer
///
/// Held for the lifetime of one request only; never cached by the engine.
/// Secret material is redacted from `Debug` output.
pub struct Credentials {
    access_key_id: String,
    secret_access_key: SecretString,
    session_token: Option<SecretString>,
    security_token: Option<SecretString>,
}

impl Credentials {
    /// Create credentials from an access key pair
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: SecretString::from(secret_access_key.into()),
            session_token: None,
            security_token: None,
        }
    }

    /// Temporary-credential session token, sent as `x-amz-security-token`
    ///
    /// An empty string means "not set".
    pub fn with_session_token(mut self, token: impl Into<String>) -> Self {
        self.session_token = non_empty_secret(token.into());
        self
    }

    /// Upload token, attached to uploads as `x-amz-meta-token`
    ///
    /// An empty string means "not set".
    pub fn with_security_token(mut self, token: impl Into<String>) -> Self {
        self.security_token = non_empty_secret(token.into());
        self
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub(crate) fn secret_access_key(&self) -> &str {
        self.secret_access_key.expose_secret()
    }

    pub(crate) fn session_token(&self) -> Option<&str> {
        self.session_token.as_ref().map(|t| t.expose_secret())
    }

    pub(crate) fn security_token(&self) -> Option<&str> {
        self.security_token.as_ref().map(|t| t.expose_secret())
    }

    /// Check that the fields required for SigV4 signing are present
    pub fn validate(&self) -> Result<()> {
        if self.access_key_id.trim().is_empty() {
            return Err(TransferError::Config(
                "access_key_id is required for request signing".to_string(),
            ));
        }
        if self.secret_access_key.expose_secret().is_empty() {
            return Err(TransferError::Config(
                "secret_access_key is required for request signing".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .field("session_token", &self.session_token.as_ref().map(|_| "[REDACTED]"))
            .field("security_token", &self.security_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn non_empty_secret(value: String) -> Option<SecretString> {
    if value.is_empty() {
        None
    } else {
        Some(SecretString::from(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secrets() {
        let creds = Credentials::new("AKIDEXAMPLE", "super-secret")
            .with_session_token("session-abc")
            .with_security_token("upload-xyz");
        let debug = format!("{:?}", creds);

        assert!(debug.contains("AKIDEXAMPLE"));
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("session-abc"));
        assert!(!debug.contains("upload-xyz"));
    }

    #[test]
    fn test_empty_tokens_are_absent() {
        let creds = Credentials::new("AKID", "secret")
            .with_session_token("")
            .with_security_token("");
        assert!(creds.session_token().is_none());
        assert!(creds.security_token().is_none());
    }

    #[test]
    fn test_validate_requires_key_pair() {
        assert!(Credentials::new("AKID", "secret").validate().is_ok());
        assert!(matches!(
            Credentials::new("", "secret").validate(),
            Err(TransferError::Config(_))
        ));
        assert!(matches!(
            Credentials::new("AKID", "").validate(),
            Err(TransferError::Config(_))
        ));
    }
}
