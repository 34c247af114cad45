//! HTTP transport for signed S3 requests

use crate::error::{Result, TransferError};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Largest error body read to extract the S3 error code
const MAX_ERROR_BODY: usize = 64 * 1024;

/// Stream of body bytes flowing through the transport
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully signed request, ready to go on the wire
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
}

impl SignedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Request payload
pub enum RequestBody {
    Empty,
    /// Body pulled chunk by chunk while the request is in flight
    Stream {
        content_length: u64,
        stream: ByteStream,
    },
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Stream { content_length, .. } => f
                .debug_struct("Stream")
                .field("content_length", content_length)
                .finish(),
        }
    }
}

/// Status, headers and streaming body of one response
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ByteStream,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// ETag without its surrounding quotes
    pub fn etag(&self) -> Option<&str> {
        self.header("etag").map(|v| v.trim().trim_matches('"'))
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header("content-length")
            .and_then(|v| v.trim().parse().ok())
    }

    /// Turn a non-2xx response into a classified error
    ///
    /// Reads at most 64 KiB of the body looking for the S3 `<Code>` and
    /// `<Message>` elements.
    pub async fn into_error(self) -> TransferError {
        let status = self.status;
        let mut body = self.body;
        let mut buf = BytesMut::new();

        while buf.len() < MAX_ERROR_BODY {
            match body.next().await {
                Some(Ok(chunk)) => {
                    let room = MAX_ERROR_BODY - buf.len();
                    buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
                }
                // Keep whatever arrived; the status alone still classifies
                Some(Err(_)) | None => break,
            }
        }

        let text = String::from_utf8_lossy(&buf);
        let code = extract_xml_tag(&text, "Code");
        let message = extract_xml_tag(&text, "Message").unwrap_or_default();
        debug!(status, code = ?code, "error response");

        TransferError::from_status(status, code.as_deref(), &message)
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Issues one signed request
///
/// Dropping the returned future aborts the request, which is how attempts
/// are cancelled and timed out.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: SignedRequest, body: RequestBody) -> Result<Response>;
}

/// Transport over HTTPS (or plain HTTP for local endpoints) using reqwest
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a client trusting either the platform roots or the PEM bundle
    /// at `ca_certs_path`
    pub fn new(ca_certs_path: Option<&Path>, connect_timeout: Duration) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("orbit-s3/", env!("CARGO_PKG_VERSION")));

        if let Some(path) = ca_certs_path {
            let pem = std::fs::read(path).map_err(|e| {
                TransferError::Config(format!("CA bundle {}: {}", path.display(), e))
            })?;
            let certs = reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| {
                TransferError::Config(format!("CA bundle {}: {}", path.display(), e))
            })?;
            if certs.is_empty() {
                return Err(TransferError::Config(format!(
                    "CA bundle {} contains no certificates",
                    path.display()
                )));
            }

            builder = builder.tls_built_in_root_certs(false);
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        let client = builder
            .build()
            .map_err(|e| TransferError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: SignedRequest, body: RequestBody) -> Result<Response> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Put => reqwest::Method::PUT,
        };

        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Stream {
                content_length,
                stream,
            } => builder
                .header(reqwest::header::CONTENT_LENGTH, content_length)
                .body(reqwest::Body::wrap_stream(stream)),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| TransferError::from_reqwest(&e))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes_stream()
            .map_err(|e| TransferError::from_reqwest(&e))
            .boxed();

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Text content of the first `<tag>...</tag>` element
pub fn extract_xml_tag(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml[start..end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn response(status: u16, headers: Vec<(&str, &str)>, body: &'static str) -> Response {
        Response {
            status,
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: stream::iter(vec![Ok(Bytes::from_static(body.as_bytes()))]).boxed(),
        }
    }

    #[test]
    fn test_extract_xml_tag() {
        let xml = "<?xml version=\"1.0\"?><Error><Code>NoSuchKey</Code>\
                   <Message>The specified key does not exist.</Message></Error>";
        assert_eq!(extract_xml_tag(xml, "Code").as_deref(), Some("NoSuchKey"));
        assert_eq!(
            extract_xml_tag(xml, "Message").as_deref(),
            Some("The specified key does not exist.")
        );
        assert_eq!(extract_xml_tag(xml, "RequestId"), None);
    }

    #[test]
    fn test_response_headers() {
        let resp = response(
            200,
            vec![("ETag", "\"9e107d9d372bb6826bd81d3542a419d6\""), ("Content-Length", "43")],
            "",
        );
        assert!(resp.is_success());
        assert_eq!(resp.etag(), Some("9e107d9d372bb6826bd81d3542a419d6"));
        assert_eq!(resp.content_length(), Some(43));
    }

    #[tokio::test]
    async fn test_into_error_classifies_by_code() {
        let resp = response(
            403,
            vec![],
            "<Error><Code>SignatureDoesNotMatch</Code><Message>bad sig</Message></Error>",
        );
        let err = resp.into_error().await;
        assert_eq!(
            err,
            TransferError::Authentication("SignatureDoesNotMatch: bad sig".to_string())
        );
    }

    #[tokio::test]
    async fn test_into_error_without_body() {
        let err = response(503, vec![], "").into_error().await;
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "Server error (503): Service Unavailable");
    }

    #[test]
    fn test_missing_ca_bundle_is_config_error() {
        let err = HttpTransport::new(
            Some(Path::new("/no/such/ca-bundle.pem")),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, TransferError::Config(_)));
    }

    #[test]
    fn test_ca_bundle_without_certificates_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.pem");
        std::fs::write(&path, b"no certificates here\n").unwrap();

        assert!(HttpTransport::new(Some(&path), Duration::from_secs(1)).is_err());
    }
}
