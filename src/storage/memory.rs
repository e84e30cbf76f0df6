use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{AppError, Result};
use crate::models::{AttachmentMetadata, BackendKind};
use crate::storage::{
    bytes_stream, copy_stream, ByteStream, RemoteDescription, StorageBackend, WriteOutcome,
};

/// In-memory backend that can stand in for any writable kind.
///
/// Counts reads and writes so callers can assert that a copy was (or was not)
/// transferred.
pub struct MemoryStorage {
    kind: BackendKind,
    objects: RwLock<HashMap<String, Bytes>>,
    gone: RwLock<HashSet<String>>,
    handle_prefix: Option<String>,
    public_base: Option<String>,
    next_handle: AtomicUsize,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryStorage {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            objects: RwLock::new(HashMap::new()),
            gone: RwLock::new(HashSet::new()),
            handle_prefix: None,
            public_base: None,
            next_handle: AtomicUsize::new(1),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Assign a handle `<prefix>/<n>` when written with an empty key, the way
    /// the blob CDN does.
    pub fn with_handles(mut self, prefix: impl Into<String>) -> Self {
        self.handle_prefix = Some(prefix.into());
        self
    }

    /// Report `<base>/<key>` as the public URL of every object.
    pub fn with_public_base(mut self, base: impl Into<String>) -> Self {
        self.public_base = Some(base.into());
        self
    }

    pub fn insert(&self, key: impl Into<String>, data: Bytes) {
        self.objects.write().insert(key.into(), data);
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.read().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Make `key` answer like a remote object that was deleted behind our back.
    pub fn mark_gone(&self, key: impl Into<String>) {
        let key = key.into();
        self.objects.write().remove(&key);
        self.gone.write().insert(key);
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn missing(&self, key: &str) -> AppError {
        if self.gone.read().contains(key) {
            AppError::RemoteGone(key.to_string())
        } else {
            AppError::NotFound(format!("Object not found: {}", key))
        }
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn present(&self, key: &str) -> Result<bool> {
        Ok(self.contains(key))
    }

    async fn size_of(&self, key: &str) -> Result<u64> {
        self.get(key)
            .map(|data| data.len() as u64)
            .ok_or_else(|| self.missing(key))
    }

    async fn read_stream(&self, key: &str) -> Result<ByteStream> {
        let data = self.get(key).ok_or_else(|| self.missing(key))?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(bytes_stream(data))
    }

    async fn write_stream(
        &self,
        key: &str,
        data: ByteStream,
        _size: Option<u64>,
    ) -> Result<WriteOutcome> {
        let key = match (&self.handle_prefix, key.is_empty()) {
            (Some(prefix), true) => format!(
                "{}/{}",
                prefix,
                self.next_handle.fetch_add(1, Ordering::SeqCst)
            ),
            (None, true) => return Err(AppError::InvalidKey(String::new())),
            (_, false) => key.to_string(),
        };

        let mut buf = Vec::new();
        copy_stream(data, &mut buf).await?;
        self.insert(key.clone(), Bytes::from(buf));
        self.gone.write().remove(&key);
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(WriteOutcome {
            uri: self.handle_prefix.as_ref().map(|_| key),
            payload: None,
        })
    }

    async fn public_url(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .public_base
            .as_ref()
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), key)))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let mut objects = self.objects.write();
        let data = objects
            .remove(from)
            .ok_or_else(|| AppError::NotFound(format!("Object not found: {}", from)))?;
        objects.insert(to.to_string(), data);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.objects.write().remove(key);
        Ok(())
    }

    async fn describe(&self, key: &str) -> Result<RemoteDescription> {
        let size = self.size_of(key).await?;
        Ok(RemoteDescription {
            metadata: AttachmentMetadata {
                size: Some(size),
                ..Default::default()
            },
            ..Default::default()
        })
    }
}
