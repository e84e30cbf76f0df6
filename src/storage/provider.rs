use async_trait::async_trait;
use bytes::Bytes;
use std::io::Cursor;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{AppError, Result};
use crate::models::{AttachmentMetadata, BackendKind, InstancePayload};

/// Lazy, single-pass byte source handed between backends
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Buffer used for every backend-to-backend copy.
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// What a backend reports after accepting bytes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOutcome {
    /// Location assigned by the backend, when it chooses one (blob CDN handles).
    pub uri: Option<String>,
    /// Metadata the backend returned alongside the write.
    pub payload: Option<InstancePayload>,
}

/// What a backend knows about an object without downloading it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteDescription {
    pub metadata: AttachmentMetadata,
    pub payload: InstancePayload,
}

/// Storage backend trait
///
/// Keys are backend-relative: a relative path for local disk and the object
/// store, a handle URL for the blob CDN.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Whether something is stored at `key`. Absence is `Ok(false)`, never an error.
    async fn present(&self, key: &str) -> Result<bool>;

    /// Size in bytes of the object at `key`; `NotFound` when absent.
    async fn size_of(&self, key: &str) -> Result<u64>;

    /// Open the object at `key` for reading.
    async fn read_stream(&self, key: &str) -> Result<ByteStream>;

    /// Store `data` at `key`, replacing whatever is there.
    async fn write_stream(
        &self,
        key: &str,
        _data: ByteStream,
        _size: Option<u64>,
    ) -> Result<WriteOutcome> {
        Err(AppError::Unsupported(format!(
            "{} is read-only, can't write {}",
            self.kind(),
            key
        )))
    }

    /// URL a client can fetch the object from directly, if the backend has one.
    async fn public_url(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    /// Move an object within the backend.
    async fn rename(&self, from: &str, _to: &str) -> Result<()> {
        Err(AppError::Unsupported(format!(
            "{} can't move {}",
            self.kind(),
            from
        )))
    }

    /// Remove the object at `key`. Removing something absent succeeds.
    async fn delete(&self, key: &str) -> Result<()> {
        Err(AppError::Unsupported(format!(
            "{} can't delete {}",
            self.kind(),
            key
        )))
    }

    /// Describe the object from backend-side metadata.
    async fn describe(&self, key: &str) -> Result<RemoteDescription> {
        Err(AppError::Unsupported(format!(
            "{} can't describe {}",
            self.kind(),
            key
        )))
    }
}

/// Wrap in-memory bytes as a stream.
pub fn bytes_stream(data: Bytes) -> ByteStream {
    Box::pin(Cursor::new(data))
}

/// Copy a stream into a writer through a bounded buffer, returning the byte count.
pub async fn copy_stream<W>(reader: ByteStream, writer: &mut W) -> Result<u64>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut reader = BufReader::with_capacity(COPY_BUFFER_SIZE, reader);
    let copied = tokio::io::copy_buf(&mut reader, writer).await?;
    writer.flush().await?;
    Ok(copied)
}

/// Drain a stream into memory. Only for small payloads and tests.
pub async fn read_all(mut stream: ByteStream) -> Result<Bytes> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    Ok(Bytes::from(buf))
}
