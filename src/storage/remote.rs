//! Read-only attachment providers seen through the backend interface.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::{AttachmentMetadata, BackendKind, InstancePayload};
use crate::storage::{bytes_stream, ByteStream, RemoteDescription, StorageBackend};

/// Uri recorded for attachments that are only reachable through their metadata.
pub const REMOTE_ATTACHMENT_URI: &str = "remote-attachment-metadata";

/// Fetches attachment bytes and metadata from an email/API provider.
///
/// Implementations own the provider-specific payload format.
#[async_trait]
pub trait AttachmentSource: Send + Sync {
    async fn fetch_bytes(&self, payload: &InstancePayload) -> Result<Bytes>;

    async fn describe_metadata(&self, payload: &InstancePayload) -> Result<AttachmentMetadata>;

    async fn public_url(&self, _payload: &InstancePayload) -> Result<Option<String>> {
        Ok(None)
    }

    /// Uri to record for the provider instance; `None` when the payload
    /// points at nothing fetchable.
    fn resource_uri(&self, _payload: &InstancePayload) -> Option<String> {
        Some(REMOTE_ATTACHMENT_URI.to_string())
    }

    /// Body bytes shipped inside the payload itself.
    fn inline_bytes(&self, _payload: &InstancePayload) -> Result<Option<Bytes>> {
        Ok(None)
    }
}

/// One provider instance bound to its payload.
///
/// The provider decides where bytes come from, so the key is only checked
/// for being a claim at all.
pub struct ProviderStorage {
    kind: BackendKind,
    source: Arc<dyn AttachmentSource>,
    payload: InstancePayload,
}

impl ProviderStorage {
    pub fn new(kind: BackendKind, source: Arc<dyn AttachmentSource>, payload: InstancePayload) -> Self {
        Self {
            kind,
            source,
            payload,
        }
    }
}

#[async_trait]
impl StorageBackend for ProviderStorage {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn present(&self, key: &str) -> Result<bool> {
        Ok(!key.is_empty())
    }

    async fn size_of(&self, key: &str) -> Result<u64> {
        self.source
            .describe_metadata(&self.payload)
            .await?
            .size
            .ok_or_else(|| AppError::NotFound(format!("{} reported no size for {}", self.kind, key)))
    }

    async fn read_stream(&self, key: &str) -> Result<ByteStream> {
        let data = self.source.fetch_bytes(&self.payload).await?;
        tracing::debug!("Fetched {} bytes of {} from {}", data.len(), key, self.kind);
        Ok(bytes_stream(data))
    }

    async fn public_url(&self, _key: &str) -> Result<Option<String>> {
        self.source.public_url(&self.payload).await
    }

    async fn describe(&self, _key: &str) -> Result<RemoteDescription> {
        Ok(RemoteDescription {
            metadata: self.source.describe_metadata(&self.payload).await?,
            payload: self.payload.clone(),
        })
    }
}
