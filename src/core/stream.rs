/*!
 * Streaming file I/O for transfers
 *
 * Memory use is bounded by the chunk size, never by the file size. Both
 * directions keep a running MD5 of the content so the payload can be
 * checked against the object's ETag without reading the file twice.
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, StreamExt};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::oneshot;

use super::progress::ProgressAggregator;
use super::retry::Heartbeat;
use crate::error::{Result, TransferError};
use crate::protocol::s3::transport::ByteStream;

/// What an upload stream actually sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSummary {
    pub bytes: u64,
    pub md5_hex: String,
}

/// What a download sink actually wrote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    pub bytes: u64,
    pub md5_hex: String,
}

/// Read side of an upload: one handle per attempt, always from offset 0
pub struct UploadSource {
    path: PathBuf,
    file: File,
    total: u64,
    bytes_read: u64,
    hasher: md5::Context,
    progress: Option<Arc<ProgressAggregator>>,
    heartbeat: Option<Heartbeat>,
}

impl UploadSource {
    /// Open `path` and record its size
    pub async fn open_for_read(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .await
            .map_err(|e| TransferError::local_io(path, e))?;
        let metadata = file
            .metadata()
            .await
            .map_err(|e| TransferError::local_io(path, e))?;
        if !metadata.is_file() {
            return Err(TransferError::LocalIo(format!(
                "{}: not a regular file",
                path.display()
            )));
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            total: metadata.len(),
            bytes_read: 0,
            hasher: md5::Context::new(),
            progress: None,
            heartbeat: None,
        })
    }

    pub fn with_progress(mut self, progress: Arc<ProgressAggregator>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: Heartbeat) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    pub fn total_size(&self) -> u64 {
        self.total
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Read up to `max_size` bytes; `None` once the recorded size is reached
    ///
    /// A file that shrinks while it is being read is a local I/O error.
    pub async fn read_chunk(&mut self, max_size: usize) -> Result<Option<Bytes>> {
        let remaining = self.total - self.bytes_read;
        if remaining == 0 {
            return Ok(None);
        }

        let want = (max_size.max(1) as u64).min(remaining) as usize;
        let mut buf = vec![0u8; want];
        let mut filled = 0;
        while filled < want {
            let n = self
                .file
                .read(&mut buf[filled..])
                .await
                .map_err(|e| TransferError::local_io(&self.path, e))?;
            if n == 0 {
                return Err(TransferError::LocalIo(format!(
                    "{}: file shrank to {} bytes during upload (expected {})",
                    self.path.display(),
                    self.bytes_read + filled as u64,
                    self.total
                )));
            }
            filled += n;
        }

        self.hasher.consume(&buf);
        self.bytes_read += want as u64;
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.beat();
        }
        if let Some(progress) = &self.progress {
            progress.update(self.bytes_read, self.total);
        }

        Ok(Some(Bytes::from(buf)))
    }

    pub fn summary(&self) -> UploadSummary {
        UploadSummary {
            bytes: self.bytes_read,
            md5_hex: format!("{:x}", self.hasher.clone().compute()),
        }
    }

    /// Turn the source into a request body of `chunk_size` pieces
    ///
    /// The receiver yields the summary once the last byte was read, or the
    /// local error that stopped the stream. It is cancelled if the body is
    /// dropped before the end, e.g. when the server answers early.
    pub fn into_body_stream(
        self,
        chunk_size: usize,
    ) -> (ByteStream, oneshot::Receiver<Result<UploadSummary>>) {
        let (tx, rx) = oneshot::channel();

        let body = stream::unfold((self, Some(tx)), move |(mut source, tx)| async move {
            let tx = tx?;
            match source.read_chunk(chunk_size).await {
                // Report as soon as the last byte is read; the consumer
                // may never poll for the end of a sized body
                Ok(Some(chunk)) if source.bytes_read() == source.total_size() => {
                    let _ = tx.send(Ok(source.summary()));
                    Some((Ok(chunk), (source, None)))
                }
                Ok(Some(chunk)) => Some((Ok(chunk), (source, Some(tx)))),
                Ok(None) => {
                    let _ = tx.send(Ok(source.summary()));
                    None
                }
                Err(e) => {
                    let _ = tx.send(Err(e.clone()));
                    Some((Err(e), (source, None)))
                }
            }
        })
        .boxed();

        (body, rx)
    }
}

/// Write side of a download
///
/// On failure the partially written file is left in place.
pub struct DownloadSink {
    path: PathBuf,
    file: File,
    bytes_written: u64,
    hasher: md5::Context,
}

impl DownloadSink {
    /// Create or truncate `path`
    pub async fn open_for_write(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .await
            .map_err(|e| TransferError::local_io(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            bytes_written: 0,
            hasher: md5::Context::new(),
        })
    }

    pub async fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        self.file
            .write_all(data)
            .await
            .map_err(|e| TransferError::local_io(&self.path, e))?;
        self.hasher.consume(data);
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Flush and sync to disk, releasing the handle
    pub async fn finish(mut self) -> Result<DownloadSummary> {
        self.file
            .flush()
            .await
            .map_err(|e| TransferError::local_io(&self.path, e))?;
        self.file
            .sync_all()
            .await
            .map_err(|e| TransferError::local_io(&self.path, e))?;

        Ok(DownloadSummary {
            bytes: self.bytes_written,
            md5_hex: format!("{:x}", self.hasher.compute()),
        })
    }
}
