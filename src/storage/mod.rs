pub mod blob_cdn;
pub mod http;
pub mod local;
pub mod memory;
pub mod object_store;
pub mod provider;
pub mod remote;
pub mod retry;

pub use blob_cdn::BlobCdnStorage;
pub use local::*;
pub use memory::*;
pub use object_store::ObjectStoreStorage;
pub use provider::*;
pub use remote::*;
pub use retry::*;

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::{BackendKind, FileInstance};

/// Resolves backend kinds to configured backends
pub struct StorageManager {
    local: Arc<dyn StorageBackend>,
    remotes: HashMap<BackendKind, Arc<dyn StorageBackend>>,
    sources: HashMap<BackendKind, Arc<dyn AttachmentSource>>,
}

impl StorageManager {
    /// Manager with only a local backend; add the rest with the `with_*` builders.
    pub fn new(local: Arc<dyn StorageBackend>) -> Self {
        Self {
            local,
            remotes: HashMap::new(),
            sources: HashMap::new(),
        }
    }

    /// Build every backend the configuration enables.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut manager = Self::new(Arc::new(LocalStorage::new(&config.local.base_path)));

        if config.object_store.is_enabled() {
            let storage = ObjectStoreStorage::new(config.object_store.clone(), &config.transport)?;
            manager = manager.with_backend(Arc::new(storage))?;
            tracing::info!("Object store enabled: {}", config.object_store.endpoint_url());
        }
        if config.blob_cdn.is_enabled() {
            let storage = BlobCdnStorage::new(&config.blob_cdn, &config.transport)?;
            manager = manager.with_backend(Arc::new(storage))?;
            tracing::info!("Blob CDN enabled: {}", config.blob_cdn.api_base);
        }

        Ok(manager)
    }

    /// Register a writable remote backend under its own kind.
    pub fn with_backend(mut self, backend: Arc<dyn StorageBackend>) -> Result<Self> {
        match backend.kind() {
            BackendKind::ObjectStore | BackendKind::BlobCdn => {
                self.remotes.insert(backend.kind(), backend);
                Ok(self)
            }
            other => Err(AppError::Config(format!(
                "{} can't be registered as a remote backend",
                other
            ))),
        }
    }

    /// Register the source that serves a read-only provider kind.
    pub fn with_attachment_source(
        mut self,
        kind: BackendKind,
        source: Arc<dyn AttachmentSource>,
    ) -> Result<Self> {
        if !kind.is_attachment_provider() {
            return Err(AppError::Config(format!(
                "{} is not an attachment provider",
                kind
            )));
        }
        self.sources.insert(kind, source);
        Ok(self)
    }

    pub fn local(&self) -> Arc<dyn StorageBackend> {
        self.local.clone()
    }

    /// Writable backend for a kind.
    pub fn backend(&self, kind: BackendKind) -> Result<Arc<dyn StorageBackend>> {
        match kind {
            BackendKind::Local => Ok(self.local()),
            BackendKind::ObjectStore | BackendKind::BlobCdn => {
                self.remotes.get(&kind).cloned().ok_or_else(|| {
                    AppError::Config(format!("Storage backend {} is not configured", kind))
                })
            }
            BackendKind::BlobCdnPending
            | BackendKind::RemoteProviderA
            | BackendKind::RemoteProviderB => Err(AppError::Unsupported(format!(
                "{} is not a writable backend",
                kind
            ))),
        }
    }

    pub fn attachment_source(&self, kind: BackendKind) -> Result<Arc<dyn AttachmentSource>> {
        self.sources.get(&kind).cloned().ok_or_else(|| {
            AppError::Config(format!("No attachment source configured for {}", kind))
        })
    }

    /// Backend able to serve one instance's claim.
    pub fn provider_for(&self, instance: &FileInstance) -> Result<Arc<dyn StorageBackend>> {
        match instance.kind {
            BackendKind::Local | BackendKind::ObjectStore | BackendKind::BlobCdn => {
                self.backend(instance.kind)
            }
            BackendKind::RemoteProviderA | BackendKind::RemoteProviderB => {
                let source = self.attachment_source(instance.kind)?;
                Ok(Arc::new(ProviderStorage::new(
                    instance.kind,
                    source,
                    instance.payload.clone(),
                )))
            }
            BackendKind::BlobCdnPending => Err(AppError::Unsupported(
                "pending blob CDN uploads hold no readable copy".to_string(),
            )),
        }
    }
}
