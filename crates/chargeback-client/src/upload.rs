//! Sequential chunked file upload over the claim channel.
//!
//! A file is cut into fixed-size ranges, each encoded as a base64 data URI
//! and emitted as one `upload_file_chunk` event. Chunk `i + 1` is never
//! read before chunk `i` has been handed to the channel. The first failure
//! aborts the job; chunks already sent are not recalled.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use chargeback_proto::{ClaimId, ClientEvent, FileChunk};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::transport::{ChannelError, EventSink};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("chunk {chunk} not sent: {source}")]
    Channel {
        chunk: u32,
        #[source]
        source: ChannelError,
    },
    #[error("chunk {chunk} could not be read: {source}")]
    EncodeFailed {
        chunk: u32,
        #[source]
        source: io::Error,
    },
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    #[error("file needs {0} chunks, more than a job can carry")]
    TooManyChunks(u64),
}

/// Byte source for one upload.
#[async_trait]
pub trait ChunkSource: Send + Sync {
    fn name(&self) -> &str;

    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads exactly `len` bytes starting at `offset`.
    async fn read_range(&self, offset: u64, len: usize) -> io::Result<Bytes>;
}

#[derive(Debug, Clone)]
pub struct InMemoryFile {
    name: String,
    data: Bytes,
}

impl InMemoryFile {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

#[async_trait]
impl ChunkSource for InMemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_range(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset out of range"))?;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "range past end of file"))?;
        Ok(self.data.slice(start..end))
    }
}

/// File on disk, read range by range.
pub struct DiskFile {
    name: String,
    len: u64,
    file: Mutex<tokio::fs::File>,
}

impl DiskFile {
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            name,
            len,
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl ChunkSource for DiskFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> u64 {
        self.len
    }

    async fn read_range(&self, offset: u64, len: usize) -> io::Result<Bytes> {
        let mut file = self.file.lock().await;
        file.seek(io::SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

/// Cursor over one file's chunk ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadJob {
    pub filename: String,
    pub total_size: u64,
    pub chunk_size: usize,
    pub chunk_index: u32,
    pub total_chunks: u32,
}

impl UploadJob {
    pub fn new(
        filename: impl Into<String>,
        total_size: u64,
        chunk_size: usize,
    ) -> Result<Self, UploadError> {
        if chunk_size == 0 {
            return Err(UploadError::InvalidChunkSize);
        }
        let needed = total_size.div_ceil(chunk_size as u64);
        let total_chunks = u32::try_from(needed).map_err(|_| UploadError::TooManyChunks(needed))?;
        Ok(Self {
            filename: filename.into(),
            total_size,
            chunk_size,
            chunk_index: 0,
            total_chunks,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.chunk_index >= self.total_chunks
    }

    /// Offset and length of the current chunk, or `None` once every chunk
    /// has been handed out.
    pub fn current_range(&self) -> Option<(u64, usize)> {
        if self.is_finished() {
            return None;
        }
        let offset = u64::from(self.chunk_index) * self.chunk_size as u64;
        let remaining = self.total_size - offset;
        let len = remaining.min(self.chunk_size as u64) as usize;
        Some((offset, len))
    }

    fn advance(&mut self) -> f64 {
        self.chunk_index += 1;
        f64::from(self.chunk_index) / f64::from(self.total_chunks)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UploadReport {
    pub chunks_sent: u32,
    pub bytes_sent: u64,
}

pub struct Uploader<'a, S: EventSink + ?Sized> {
    sink: &'a S,
    chunk_size: usize,
}

impl<'a, S: EventSink + ?Sized> Uploader<'a, S> {
    pub fn new(sink: &'a S, chunk_size: usize) -> Self {
        Self { sink, chunk_size }
    }

    pub async fn upload_file<F>(&self, claim_id: ClaimId, file: &F) -> Result<UploadReport, UploadError>
    where
        F: ChunkSource + ?Sized,
    {
        self.upload_file_with_progress(claim_id, file, |_| {}).await
    }

    /// Uploads every chunk in order. `on_progress` receives
    /// `(index + 1) / total` after each chunk, ending at exactly `1.0`.
    pub async fn upload_file_with_progress<F, P>(
        &self,
        claim_id: ClaimId,
        file: &F,
        mut on_progress: P,
    ) -> Result<UploadReport, UploadError>
    where
        F: ChunkSource + ?Sized,
        P: FnMut(f64) + Send,
    {
        let mut job = UploadJob::new(file.name(), file.len(), self.chunk_size)?;
        let mime = guess_mime(&job.filename);
        let mut report = UploadReport::default();
        info!(
            target = "chargeback.upload",
            claim_id = %claim_id,
            filename = %job.filename,
            bytes = job.total_size,
            chunks = job.total_chunks,
            "upload started"
        );

        while let Some((offset, len)) = job.current_range() {
            let chunk = job.chunk_index;
            let bytes = file
                .read_range(offset, len)
                .await
                .map_err(|source| UploadError::EncodeFailed { chunk, source })?;
            let data = format!("data:{mime};base64,{}", STANDARD.encode(&bytes));

            let event = ClientEvent::UploadFileChunk {
                data: FileChunk {
                    filename: job.filename.clone(),
                    claim_id,
                    data,
                    chunk,
                    total_chunks: job.total_chunks,
                },
            };
            if let Err(source) = self.sink.emit(event) {
                warn!(target = "chargeback.upload", chunk, total = job.total_chunks, error = %source, "upload aborted");
                return Err(UploadError::Channel { chunk, source });
            }

            report.chunks_sent += 1;
            report.bytes_sent += bytes.len() as u64;
            let progress = job.advance();
            debug!(target = "chargeback.upload", chunk, progress, "chunk sent");
            on_progress(progress);
        }

        info!(
            target = "chargeback.upload",
            filename = %job.filename,
            chunks = report.chunks_sent,
            bytes = report.bytes_sent,
            "upload finished"
        );
        Ok(report)
    }
}

/// Media type for a data URI, from the filename extension.
pub fn guess_mime(filename: &str) -> &'static str {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("txt") => "text/plain",
        Some("csv") => "text/csv",
        Some("html") | Some("htm") => "text/html",
        Some("json") => "application/json",
        Some("doc") => "application/msword",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}
