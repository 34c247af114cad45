//! Single-object PUT and GET
//!
//! One call to [`ObjectTransfer::attempt`] is one HTTP exchange: it opens a
//! fresh file handle, signs with a fresh timestamp and streams the payload.
//! Deciding whether to try again is left to the retry controller.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info};

use super::endpoint::ObjectLocation;
use super::signer::{self, SigningClock, SigningRequest, EMPTY_PAYLOAD_SHA256, UNSIGNED_PAYLOAD};
use super::transport::{Method, RequestBody, Response, SignedRequest, Transport};
use crate::core::progress::ProgressAggregator;
use crate::core::request::{Direction, TransferRequest};
use crate::core::retry::Heartbeat;
use crate::core::stream::{DownloadSink, UploadSource, UploadSummary};
use crate::error::{Result, TransferError};

/// Metadata header carrying the caller's upload token
pub const UPLOAD_TOKEN_HEADER: &str = "x-amz-meta-token";

/// Largest object one PUT may carry
pub const MAX_SINGLE_PUT_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// MD5 of zero bytes
const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

const SSE_HEADER: &str = "x-amz-server-side-encryption";
const SSE_CUSTOMER_ALGORITHM_HEADER: &str = "x-amz-server-side-encryption-customer-algorithm";

/// Attempt runner for one transfer request
pub struct ObjectTransfer {
    request: TransferRequest,
    location: ObjectLocation,
    transport: Arc<dyn Transport>,
    clock: SigningClock,
    chunk_size: usize,
    progress: Option<Arc<ProgressAggregator>>,
    heartbeat: Option<Heartbeat>,
}

impl ObjectTransfer {
    pub fn new(
        request: TransferRequest,
        transport: Arc<dyn Transport>,
        chunk_size: usize,
    ) -> Result<Self> {
        request.validate()?;
        let location = request.location()?;

        Ok(Self {
            request,
            location,
            transport,
            clock: SigningClock::new(),
            chunk_size: chunk_size.max(1),
            progress: None,
            heartbeat: None,
        })
    }

    /// Upload progress sink; ignored for downloads
    pub fn with_progress(mut self, progress: Arc<ProgressAggregator>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Beat on every body chunk read for upload or received for download
    pub fn with_heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    pub fn request(&self) -> &TransferRequest {
        &self.request
    }

    pub fn location(&self) -> &ObjectLocation {
        &self.location
    }

    /// Checks that need the local file but no network
    ///
    /// An upload source that is missing or too large for a single PUT fails
    /// here, before the first attempt.
    pub async fn preflight(&self) -> Result<()> {
        if self.request.direction == Direction::Upload {
            let source = UploadSource::open_for_read(&self.request.file_path).await?;
            check_put_size(&self.request.file_path, source.total_size())?;
        }
        Ok(())
    }

    /// Run attempt number `n`, returning the bytes moved
    pub async fn attempt(&self, n: u32) -> Result<u64> {
        debug!(attempt = n, url = %self.location.url(), "sending request");
        let bytes = match self.request.direction {
            Direction::Upload => self.put_object().await?,
            Direction::Download => self.get_object().await?,
        };
        info!(attempt = n, bytes, "attempt succeeded");
        Ok(bytes)
    }

    /// Sign a request for this object with a fresh timestamp
    pub fn sign(
        &self,
        method: Method,
        headers: Vec<(String, String)>,
        payload_hash: &str,
    ) -> Result<SignedRequest> {
        let signed = signer::sign(
            &self.request.credentials,
            &SigningRequest {
                method: method.as_str(),
                host: self.location.host(),
                canonical_path: self.location.canonical_path(),
                headers: &headers,
                payload_hash,
                region: &self.request.region,
                timestamp: self.clock.next(),
            },
        )?;

        Ok(SignedRequest {
            method,
            url: self.location.url(),
            headers: signed.headers,
        })
    }

    async fn put_object(&self) -> Result<u64> {
        let mut source = UploadSource::open_for_read(&self.request.file_path).await?;
        if let Some(progress) = &self.progress {
            source = source.with_progress(progress.clone());
        }
        if let Some(heartbeat) = &self.heartbeat {
            source = source.with_heartbeat(heartbeat.clone());
        }
        let total = source.total_size();
        // The file may have grown since the preflight
        check_put_size(&self.request.file_path, total)?;

        let mut headers = Vec::new();
        if let Some(token) = self.request.credentials.security_token() {
            headers.push((UPLOAD_TOKEN_HEADER.to_string(), token.to_string()));
        }
        let signed = self.sign(Method::Put, headers, UNSIGNED_PAYLOAD)?;

        let (stream, mut summary) = source.into_body_stream(self.chunk_size);
        let body = RequestBody::Stream {
            content_length: total,
            stream,
        };

        let response = match self.transport.send(signed, body).await {
            Ok(response) => response,
            // A local read failure surfaces as a broken body; report the cause
            Err(e) => return Err(local_failure(&mut summary).unwrap_or(e)),
        };
        if !response.is_success() {
            if let Some(local) = local_failure(&mut summary) {
                return Err(local);
            }
            return Err(response.into_error().await);
        }

        let sent = match summary.await {
            Ok(result) => result?,
            Err(_) if total == 0 => UploadSummary {
                bytes: 0,
                md5_hex: EMPTY_MD5.to_string(),
            },
            Err(_) => {
                return Err(TransferError::Network(format!(
                    "server accepted the request before the body was fully sent ({} bytes)",
                    total
                )))
            }
        };

        verify_etag(content_etag(&response), &sent.md5_hex)?;
        Ok(sent.bytes)
    }

    async fn get_object(&self) -> Result<u64> {
        let signed = self.sign(Method::Get, Vec::new(), EMPTY_PAYLOAD_SHA256)?;
        let response = self.transport.send(signed, RequestBody::Empty).await?;
        if !response.is_success() {
            return Err(response.into_error().await);
        }

        let expected_len = response.content_length();
        let etag = content_etag(&response).map(str::to_string);
        let Response { mut body, .. } = response;

        // Opened only now so an error response never clobbers the file
        let mut sink = DownloadSink::open_for_write(&self.request.file_path).await?;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            if let Some(heartbeat) = &self.heartbeat {
                heartbeat.beat();
            }
            for piece in chunk.chunks(self.chunk_size) {
                sink.write_chunk(piece).await?;
            }
        }
        let received = sink.finish().await?;

        if let Some(expected) = expected_len {
            if received.bytes != expected {
                return Err(TransferError::Network(format!(
                    "response body ended after {} of {} bytes",
                    received.bytes, expected
                )));
            }
        }

        verify_etag(etag.as_deref(), &received.md5_hex)?;
        Ok(received.bytes)
    }
}

fn check_put_size(path: &std::path::Path, size: u64) -> Result<()> {
    if size > MAX_SINGLE_PUT_SIZE {
        return Err(TransferError::Config(format!(
            "{} is {} bytes; a single PUT is limited to {} bytes (5 GiB)",
            path.display(),
            size,
            MAX_SINGLE_PUT_SIZE
        )));
    }
    Ok(())
}

fn local_failure(
    summary: &mut tokio::sync::oneshot::Receiver<Result<UploadSummary>>,
) -> Option<TransferError> {
    match summary.try_recv() {
        Ok(Err(e)) => Some(e),
        _ => None,
    }
}

/// The response ETag when it can be a digest of the payload
///
/// Objects encrypted with SSE-KMS or customer keys get an opaque ETag that
/// still looks like 32 hex digits.
fn content_etag(response: &Response) -> Option<&str> {
    let kms = response
        .header(SSE_HEADER)
        .map(str::trim)
        .is_some_and(|v| {
            v.eq_ignore_ascii_case("aws:kms") || v.eq_ignore_ascii_case("aws:kms:dsse")
        });
    if kms || response.header(SSE_CUSTOMER_ALGORITHM_HEADER).is_some() {
        debug!("server-side encrypted object, ETag not compared");
        return None;
    }
    response.etag()
}

/// Compare a payload digest with the ETag when the ETag is a plain MD5
///
/// Multipart ETags carry a `-<parts>` suffix and are not checked.
pub fn verify_etag(etag: Option<&str>, md5_hex: &str) -> Result<()> {
    let Some(etag) = etag else {
        return Ok(());
    };
    let is_plain_md5 = etag.len() == 32 && etag.bytes().all(|b| b.is_ascii_hexdigit());
    if is_plain_md5 && !etag.eq_ignore_ascii_case(md5_hex) {
        return Err(TransferError::ChecksumMismatch {
            expected: etag.to_string(),
            actual: md5_hex.to_string(),
        });
    }
    Ok(())
}
