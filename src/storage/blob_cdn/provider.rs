use async_trait::async_trait;

use super::client::{extract_handle, BlobCdnClient};
use crate::config::{BlobCdnConfig, TransportConfig};
use crate::error::{AppError, Result};
use crate::models::{AttachmentMetadata, BackendKind, InstancePayload};
use crate::storage::http::build_client;
use crate::storage::{ByteStream, RemoteDescription, RetryPolicy, StorageBackend, WriteOutcome};

/// Handle-addressed blob CDN backend.
///
/// Keys are handle URLs. Writing with an empty key uploads new content and
/// returns the assigned URL; writing with a URL overwrites that handle.
pub struct BlobCdnStorage {
    client: BlobCdnClient,
    retry: RetryPolicy,
}

impl BlobCdnStorage {
    pub fn new(config: &BlobCdnConfig, transport: &TransportConfig) -> Result<Self> {
        let http = build_client(transport)?;
        Ok(Self {
            client: BlobCdnClient::new(config, http),
            retry: transport.retry_policy(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn client(&self) -> &BlobCdnClient {
        &self.client
    }
}

#[async_trait]
impl StorageBackend for BlobCdnStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::BlobCdn
    }

    async fn present(&self, key: &str) -> Result<bool> {
        let handle = extract_handle(key)?;
        match self
            .retry
            .run("blob CDN metadata", || self.client.metadata(&handle))
            .await
        {
            Ok(_) => Ok(true),
            Err(AppError::RemoteGone(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn size_of(&self, key: &str) -> Result<u64> {
        let handle = extract_handle(key)?;
        let metadata = match self
            .retry
            .run("blob CDN metadata", || self.client.metadata(&handle))
            .await
        {
            Err(AppError::RemoteGone(_)) => {
                return Err(AppError::NotFound(format!("Blob not found: {}", key)))
            }
            other => other?,
        };
        metadata
            .size
            .ok_or_else(|| AppError::NotFound(format!("Blob CDN reported no size for {}", key)))
    }

    async fn read_stream(&self, key: &str) -> Result<ByteStream> {
        self.retry
            .run("blob CDN download", || self.client.download(key))
            .await
    }

    async fn write_stream(
        &self,
        key: &str,
        data: ByteStream,
        size: Option<u64>,
    ) -> Result<WriteOutcome> {
        let metadata = if key.is_empty() {
            let stored = self.client.store(data, size, None, None).await?;
            tracing::info!("Uploaded new blob to CDN: {:?}", stored.url);
            stored
        } else {
            let handle = extract_handle(key)?;
            let stored = self.client.overwrite(&handle, data, size).await?;
            tracing::info!("Overwrote blob CDN handle {}", handle);
            stored
        };

        let uri = metadata
            .url
            .clone()
            .filter(|u| !u.is_empty())
            .or_else(|| Some(key.to_string()).filter(|k| !k.is_empty()))
            .ok_or_else(|| AppError::Transport("Blob CDN returned no url for the upload".into()))?;

        Ok(WriteOutcome {
            uri: Some(uri),
            payload: Some(InstancePayload::blob_cdn(
                metadata,
                Some(self.client.api_key().to_string()),
            )),
        })
    }

    async fn public_url(&self, key: &str) -> Result<Option<String>> {
        self.client.public_url(key).map(Some)
    }

    async fn describe(&self, key: &str) -> Result<RemoteDescription> {
        let handle = extract_handle(key)?;
        let fpfile = self
            .retry
            .run("blob CDN metadata", || self.client.metadata(&handle))
            .await?;
        Ok(RemoteDescription {
            metadata: AttachmentMetadata {
                size: fpfile.size,
                mimetype: fpfile.mimetype.clone(),
                filename: fpfile.filename.clone(),
            },
            payload: InstancePayload::blob_cdn(fpfile, Some(self.client.api_key().to_string())),
        })
    }
}
