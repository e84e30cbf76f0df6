use async_trait::async_trait;

use super::client::ObjectStoreClient;
use crate::config::{ObjectStoreConfig, TransportConfig};
use crate::error::{AppError, Result};
use crate::models::BackendKind;
use crate::storage::http::build_client;
use crate::storage::{ByteStream, RetryPolicy, StorageBackend, WriteOutcome};

/// Public-bucket object store backend
pub struct ObjectStoreStorage {
    config: ObjectStoreConfig,
    client: ObjectStoreClient,
    retry: RetryPolicy,
}

impl ObjectStoreStorage {
    pub fn new(config: ObjectStoreConfig, transport: &TransportConfig) -> Result<Self> {
        let http = build_client(transport)?;
        let client = ObjectStoreClient::new(
            &config.endpoint_url(),
            &config.secret_id,
            &config.secret_key,
            http,
        )?;
        Ok(Self {
            config,
            client,
            retry: transport.retry_policy(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Bucket key for a relative path: `[base_path/][data_profile/]path`.
    pub fn object_key(&self, path: &str) -> String {
        let mut key = String::new();
        for prefix in [&self.config.base_path, &self.config.data_profile] {
            let prefix = prefix.trim_matches('/');
            if !prefix.is_empty() {
                key.push_str(prefix);
                key.push('/');
            }
        }
        key.push_str(path.trim_start_matches('/'));
        key
    }

    /// Public URL of a relative path under `public_base_url`.
    ///
    /// `s3://` bases are published as protocol-relative hosts and served over
    /// https. Test data profiles share the public prefix of their real profile.
    pub fn public_url_for(&self, base: &str, path: &str) -> String {
        let mut url = base.replacen("s3://", "//", 1);
        if url.starts_with("//") {
            url.insert_str(0, "https:");
        }
        let mut url = url.trim_end_matches('/').to_string();

        let profile = self.config.data_profile.trim_matches('/');
        let profile = profile.strip_prefix("test-").unwrap_or(profile);
        for segment in [self.config.base_path.trim_matches('/'), profile] {
            if !segment.is_empty() {
                url.push('/');
                url.push_str(segment);
            }
        }

        let encoded = urlencoding::encode(path.trim_start_matches('/')).replace("%2F", "/");
        format!("{}/{}", url, encoded)
    }
}

#[async_trait]
impl StorageBackend for ObjectStoreStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::ObjectStore
    }

    async fn present(&self, key: &str) -> Result<bool> {
        let object_key = self.object_key(key);
        let size = self
            .retry
            .run("object store HEAD", || self.client.head_object(&object_key))
            .await?;
        Ok(size.is_some())
    }

    async fn size_of(&self, key: &str) -> Result<u64> {
        let object_key = self.object_key(key);
        self.retry
            .run("object store HEAD", || self.client.head_object(&object_key))
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Object not found: {}", object_key)))
    }

    async fn read_stream(&self, key: &str) -> Result<ByteStream> {
        let object_key = self.object_key(key);
        self.retry
            .run("object store GET", || self.client.get_object(&object_key))
            .await
    }

    async fn write_stream(
        &self,
        key: &str,
        data: ByteStream,
        size: Option<u64>,
    ) -> Result<WriteOutcome> {
        let object_key = self.object_key(key);
        let size = size.ok_or_else(|| AppError::SizeUnknown(object_key.clone()))?;
        let content_type = mime_guess::from_path(key).first_or_octet_stream();

        // A consumed stream can't be replayed, so uploads are not retried here.
        self.client
            .put_object(&object_key, data, size, content_type.essence_str())
            .await?;
        tracing::info!("Uploaded {} bytes to object store: {}", size, object_key);
        Ok(WriteOutcome::default())
    }

    async fn public_url(&self, key: &str) -> Result<Option<String>> {
        if let Some(expire) = self.config.presign_seconds {
            return self
                .client
                .presigned_url(&self.object_key(key), expire)
                .map(Some);
        }
        let url = match self.config.public_base_url.as_deref().filter(|b| !b.is_empty()) {
            Some(base) => self.public_url_for(base, key),
            None => {
                let object_key = self.object_key(key);
                self.client.url_from_path(&self.client.path_from_key(&object_key))
            }
        };
        Ok(Some(url))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from_key = self.object_key(from);
        let to_key = self.object_key(to);
        self.retry
            .run("object store COPY", || self.client.copy_object(&from_key, &to_key))
            .await?;
        self.retry
            .run("object store DELETE", || self.client.delete_object(&from_key))
            .await?;
        tracing::debug!("Moved object {} to {}", from_key, to_key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let object_key = self.object_key(key);
        self.retry
            .run("object store DELETE", || self.client.delete_object(&object_key))
            .await?;
        tracing::debug!("Deleted from object store: {}", object_key);
        Ok(())
    }
}
