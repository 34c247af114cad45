//! Request addressing: endpoint, bucket and key to URL

use crate::error::{Result, TransferError};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::{Host, Url};

/// Region used when the request does not name one
pub const DEFAULT_REGION: &str = "ap-southeast-1";

/// Everything outside the SigV4 unreserved set is percent-encoded
const KEY_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Resolved location of one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    scheme: String,
    host: String,
    path: String,
}

impl ObjectLocation {
    /// Resolve where an object lives
    ///
    /// Without an endpoint override the AWS regional endpoint is used.
    /// Virtual-hosted addressing (`bucket.host`) is the default; path-style
    /// (`host/bucket`) is used when forced, when the bucket name contains a
    /// dot, or when the endpoint is an IP address or `localhost`.
    ///
    /// Keys with `.` or `..` segments are rejected: HTTP clients collapse
    /// them, so the path on the wire would differ from the signed one.
    pub fn resolve(
        endpoint: Option<&str>,
        region: &str,
        bucket: &str,
        key: &str,
        force_path_style: bool,
    ) -> Result<Self> {
        if key.split('/').any(|segment| segment == "." || segment == "..") {
            return Err(TransferError::Config(format!(
                "object key must not contain '.' or '..' segments: {}",
                key
            )));
        }

        let base = match endpoint.map(str::trim).filter(|e| !e.is_empty()) {
            Some(raw) => {
                let with_scheme = if raw.contains("://") {
                    raw.to_string()
                } else {
                    format!("https://{}", raw)
                };
                Url::parse(&with_scheme).map_err(|e| {
                    TransferError::Config(format!("invalid endpoint {}: {}", raw, e))
                })?
            }
            None => Url::parse(&format!("https://s3.{}.amazonaws.com", region))
                .map_err(|e| TransferError::Config(format!("invalid region {}: {}", region, e)))?,
        };

        let scheme = base.scheme().to_string();
        if scheme != "https" && scheme != "http" {
            return Err(TransferError::Config(format!(
                "unsupported endpoint scheme: {}",
                scheme
            )));
        }

        let host = base
            .host_str()
            .ok_or_else(|| TransferError::Config(format!("endpoint has no host: {}", base)))?;

        // Url::port() is None for the scheme's default port
        let authority = match base.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };

        let literal_host = matches!(base.host(), Some(Host::Ipv4(_) | Host::Ipv6(_)))
            || host.eq_ignore_ascii_case("localhost");
        let path_style = force_path_style || literal_host || bucket.contains('.');

        let prefix = base.path().trim_end_matches('/');
        let encoded_key = encode_key(key);

        let (host, path) = if path_style {
            (
                authority,
                format!("{}/{}/{}", prefix, encode_segment(bucket), encoded_key),
            )
        } else {
            (
                format!("{}.{}", bucket, authority),
                format!("{}/{}", prefix, encoded_key),
            )
        };

        Ok(Self { scheme, host, path })
    }

    /// Full request URL
    pub fn url(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.path)
    }

    /// Value of the `Host` header
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Already-encoded path, identical in the URL and the canonical request
    pub fn canonical_path(&self) -> &str {
        &self.path
    }
}

/// Percent-encode an object key, keeping `/` separators
pub fn encode_key(key: &str) -> String {
    key.split('/')
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join("/")
}

fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, KEY_SEGMENT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_endpoint_is_virtual_hosted() {
        let loc =
            ObjectLocation::resolve(None, "us-west-2", "my-bucket", "dir/file.txt", false).unwrap();
        assert_eq!(loc.host(), "my-bucket.s3.us-west-2.amazonaws.com");
        assert_eq!(loc.canonical_path(), "/dir/file.txt");
        assert_eq!(
            loc.url(),
            "https://my-bucket.s3.us-west-2.amazonaws.com/dir/file.txt"
        );
    }

    #[test]
    fn test_endpoint_without_scheme_assumes_https() {
        let loc =
            ObjectLocation::resolve(Some("nos-eastchina1.126.net"), "r", "bkt", "a", false)
                .unwrap();
        assert_eq!(loc.url(), "https://bkt.nos-eastchina1.126.net/a");
    }

    #[test]
    fn test_ip_endpoint_uses_path_style() {
        let loc = ObjectLocation::resolve(
            Some("http://127.0.0.1:9000"),
            "us-east-1",
            "bucket",
            "k",
            false,
        )
        .unwrap();
        assert_eq!(loc.host(), "127.0.0.1:9000");
        assert_eq!(loc.url(), "http://127.0.0.1:9000/bucket/k");
    }

    #[test]
    fn test_dotted_bucket_uses_path_style() {
        let loc = ObjectLocation::resolve(None, "eu-west-1", "my.dotted.bucket", "k", false)
            .unwrap();
        assert_eq!(loc.host(), "s3.eu-west-1.amazonaws.com");
        assert_eq!(loc.canonical_path(), "/my.dotted.bucket/k");
    }

    #[test]
    fn test_forced_path_style_with_prefix() {
        let loc = ObjectLocation::resolve(
            Some("https://storage.example.com/s3/"),
            "r",
            "bucket",
            "k",
            true,
        )
        .unwrap();
        assert_eq!(loc.url(), "https://storage.example.com/s3/bucket/k");
    }

    #[test]
    fn test_key_encoding() {
        assert_eq!(encode_key("photos/2024/a b+c.jpg"), "photos/2024/a%20b%2Bc.jpg");
        assert_eq!(encode_key("unreserved-_.~"), "unreserved-_.~");
        assert_eq!(encode_key("日本"), "%E6%97%A5%E6%9C%AC");
    }

    #[test]
    fn test_rejects_dot_segments() {
        for key in ["logs/../secret.txt", "./a", "a/.", "..", "a/./b"] {
            let err = ObjectLocation::resolve(None, "us-east-1", "b", key, false).unwrap_err();
            assert!(matches!(err, TransferError::Config(_)), "{}", key);
        }
        // Dots inside a segment are ordinary characters
        let loc = ObjectLocation::resolve(None, "us-east-1", "b", "a/..b/.c/v1.2", false).unwrap();
        assert_eq!(loc.canonical_path(), "/a/..b/.c/v1.2");
    }

    #[test]
    fn test_rejects_unsupported_scheme() {
        let err = ObjectLocation::resolve(Some("ftp://example.com"), "r", "b", "k", false)
            .unwrap_err();
        assert!(matches!(err, TransferError::Config(_)));
    }
}
