//! Reconciliation of a file's copies across backends.

use bytes::Bytes;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::{BackendKind, File, FileInstance, InstancePayload};
use crate::services::delivery::Delivery;
use crate::services::integrity::{IntegrityCheck, SizeCheck};
use crate::services::locks::KeyedLocks;
use crate::services::metadata;
use crate::services::path_policy::{self, correct_path, PathAddressable};
use crate::services::repository::FileRepository;
use crate::services::selector::{first_available, instances_in_order};
use crate::storage::{bytes_stream, ByteStream, StorageBackend, StorageManager};

/// Materializes copies of files on demand and keeps their records honest.
///
/// Every operation that moves bytes for a file runs under that file's lock.
/// Once a caller holds the lock its `File` is brought up to date with the
/// stored record, so callers queued behind a fetch find the copy in place.
pub struct Engine {
    storage: Arc<StorageManager>,
    repository: Arc<dyn FileRepository>,
    integrity: Arc<dyn IntegrityCheck>,
    locks: KeyedLocks,
}

fn file_id(file: &File) -> Result<String> {
    file.id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or(AppError::IdentityNotAssigned)
}

impl Engine {
    pub fn new(storage: Arc<StorageManager>, repository: Arc<dyn FileRepository>) -> Self {
        Self {
            storage,
            repository,
            integrity: Arc::new(SizeCheck),
            locks: KeyedLocks::new(),
        }
    }

    pub fn with_integrity_check(mut self, integrity: Arc<dyn IntegrityCheck>) -> Self {
        self.integrity = integrity;
        self
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    pub fn repository(&self) -> &dyn FileRepository {
        self.repository.as_ref()
    }

    /// Assign an identity if needed and bring `file.path` up to date.
    pub async fn ensure_correct_path(&self, file: &mut File) -> Result<String> {
        path_policy::ensure_correct_path(file, self.repository.as_ref()).await
    }

    /// Make sure a verified local copy sits at the file's correct path.
    ///
    /// Returns the local key. Idempotent: when the copy is already in place no
    /// backend is read.
    pub async fn ensure_local(&self, file: &mut File) -> Result<String> {
        let id = file_id(file)?;
        let _guard = self.locks.lock(&id).await;
        self.refresh(&id, file).await?;
        self.materialize_local(file).await
    }

    /// Make sure `kind` holds a verified copy, pushing the local one if needed.
    ///
    /// Returns the remote key: a relative path for the object store, the
    /// handle URL for the blob CDN.
    pub async fn ensure_remote(&self, file: &mut File, kind: BackendKind) -> Result<String> {
        let id = file_id(file)?;
        let _guard = self.locks.lock(&id).await;
        self.refresh(&id, file).await?;
        match kind {
            BackendKind::ObjectStore => self.materialize_at_path(file, kind).await,
            BackendKind::BlobCdn => self.materialize_by_handle(file, kind).await,
            other => Err(AppError::Unsupported(format!(
                "Copies can't be pushed to {}",
                other
            ))),
        }
    }

    /// Replace the file's content with `data`.
    pub async fn put_contents(&self, file: &mut File, data: Bytes) -> Result<()> {
        let size = data.len() as u64;
        self.put_stream(file, bytes_stream(data), Some(size)).await
    }

    /// Replace the file's content with whatever `data` yields.
    ///
    /// The local copy is rewritten and its metadata determined afresh; the
    /// file's name is kept.
    pub async fn put_stream(&self, file: &mut File, data: ByteStream, size: Option<u64>) -> Result<()> {
        let path = self.ensure_correct_path(file).await?;
        let id = file_id(file)?;
        let _guard = self.locks.lock(&id).await;

        let local = self.storage.local();
        let previous = file
            .local_instance()
            .and_then(|i| i.uri())
            .filter(|uri| *uri != path)
            .map(str::to_owned);
        local.delete(&path).await?;
        local.write_stream(&path, data, size).await?;

        file.size = None;
        file.mimetype = None;
        metadata::determine_file_metadata(file, local.as_ref(), &path).await?;
        self.verify(file, local.as_ref(), &path).await?;
        tracing::info!("Stored {} bytes for file {} at {}", file.size.unwrap_or(0), id, path);
        if let Some(previous) = previous {
            tracing::debug!("Removing previous local copy of file {} at {}", id, previous);
            local.delete(&previous).await?;
        }

        let mut instance = file
            .instances
            .get(BackendKind::Local)
            .cloned()
            .unwrap_or_else(|| FileInstance::new(BackendKind::Local));
        instance.set_uri(path);
        self.repository.save_instance(&id, &mut instance).await?;
        file.instances.insert(instance);
        self.repository.save_file(file).await
    }

    /// Fill unset mimetype, size and name from the local copy.
    pub async fn determine_file_metadata(&self, file: &mut File) -> Result<()> {
        let key = file
            .local_instance()
            .and_then(|i| i.uri())
            .or(file.path.as_deref())
            .map(str::to_owned)
            .ok_or(AppError::PathNotSet)?;
        let local = self.storage.local();
        metadata::determine_file_metadata(file, local.as_ref(), &key).await
    }

    /// Public URL of the most trusted claim that has one, or `None` when no
    /// claim can give a URL.
    pub async fn absolute_url(&self, file: &File) -> Result<Option<String>> {
        for instance in instances_in_order(file) {
            let Some(uri) = instance.uri() else {
                continue;
            };
            let backend = self.storage.provider_for(instance)?;
            if let Some(url) = backend.public_url(uri).await? {
                tracing::debug!("Public url of {:?} comes from {}", file.id, instance.kind);
                return Ok(Some(url));
            }
        }
        Ok(None)
    }

    /// Redirect to a public URL when some claim has one, otherwise stream
    /// the local copy.
    pub async fn deliver_contents(&self, file: &mut File) -> Result<Delivery> {
        if let Some(url) = self.absolute_url(file).await? {
            return Ok(Delivery::Redirect(url));
        }

        let stream = self.open_contents(file).await?;
        Ok(Delivery::Stream {
            stream,
            mimetype: file.mimetype.clone(),
            filename: file.filename.clone(),
            size: file.size,
        })
    }

    /// Materialize the local copy and open it for reading.
    pub async fn open_contents(&self, file: &mut File) -> Result<ByteStream> {
        let key = self.ensure_local(file).await?;
        self.storage.local().read_stream(&key).await
    }

    /// Build a file from a read-only provider's attachment.
    ///
    /// The provider instance is only recorded when the source names a
    /// fetchable resource; body bytes shipped in the payload are stored
    /// locally right away.
    pub async fn create_file_from_attachment(
        &self,
        kind: BackendKind,
        payload: InstancePayload,
    ) -> Result<File> {
        let source = self.storage.attachment_source(kind)?;
        let described = source.describe_metadata(&payload).await?;

        let mut file = File::new();
        file.apply_attachment_metadata(&described);
        self.ensure_correct_path(&mut file).await?;
        let id = file_id(&file)?;

        if let Some(data) = source.inline_bytes(&payload)? {
            self.put_contents(&mut file, data).await?;
        }

        if let Some(uri) = source.resource_uri(&payload) {
            let mut instance = FileInstance::new(kind).with_uri(uri).with_payload(payload);
            self.repository.save_instance(&id, &mut instance).await?;
            file.instances.insert(instance);
        }

        self.repository.save_file(&file).await?;
        tracing::info!("Created file {} from {} attachment", id, kind);
        Ok(file)
    }

    /// Build a file from an existing blob CDN URL, reading its metadata from the CDN.
    pub async fn create_file_from_blob_cdn_url(&self, url: &str) -> Result<File> {
        let backend = self.storage.backend(BackendKind::BlobCdn)?;
        let described = backend.describe(url).await?;

        let mut file = File::new();
        file.apply_attachment_metadata(&described.metadata);
        self.ensure_correct_path(&mut file).await?;
        let id = file_id(&file)?;

        let mut instance = FileInstance::new(BackendKind::BlobCdn)
            .with_uri(url)
            .with_payload(described.payload);
        self.repository.save_instance(&id, &mut instance).await?;
        file.instances.insert(instance);
        self.repository.save_file(&file).await?;
        Ok(file)
    }

    /// Local reconciliation; the caller holds the file's lock.
    async fn materialize_local(&self, file: &mut File) -> Result<String> {
        let id = file_id(file)?;
        let local = self.storage.local();

        let mut instance = file
            .instances
            .get(BackendKind::Local)
            .cloned()
            .unwrap_or_else(|| FileInstance::new(BackendKind::Local));
        let key = match instance.uri() {
            Some(uri) => uri.to_string(),
            None => correct_path(file)?,
        };

        if !self.claim_holds(local.as_ref(), &key, file.size).await? {
            let selection = first_available(file, &self.storage)?;
            if selection.kind == BackendKind::Local {
                return Err(AppError::CircularSelection(id));
            }

            tracing::info!(
                "Fetching file {} from {} at {} into {}",
                id,
                selection.kind,
                selection.location,
                key
            );
            let stream = selection.backend.read_stream(&selection.location).await?;
            local.write_stream(&key, stream, file.size).await?;
            metadata::determine_file_metadata(file, local.as_ref(), &key).await?;
        } else {
            tracing::debug!("Local copy of file {} at {} is valid", id, key);
        }
        instance.set_uri(key.clone());

        let correct = correct_path(file)?;
        if key != correct {
            tracing::debug!("Moving local copy of file {} from {} to {}", id, key, correct);
            local.delete(&correct).await?;
            local.rename(&key, &correct).await?;
            instance.set_uri(correct.clone());
        }

        self.verify(file, local.as_ref(), &correct).await?;
        file.set_path(correct.clone());

        self.repository.save_instance(&id, &mut instance).await?;
        file.instances.insert(instance);
        self.repository.save_file(file).await?;
        Ok(correct)
    }

    /// Push to a path-addressed backend, then move the copy to the correct path.
    async fn materialize_at_path(&self, file: &mut File, kind: BackendKind) -> Result<String> {
        let id = file_id(file)?;
        let backend = self.storage.backend(kind)?;

        let mut instance = file
            .instances
            .get(kind)
            .cloned()
            .unwrap_or_else(|| FileInstance::new(kind));
        let key = match instance.uri() {
            Some(uri) => uri.to_string(),
            None => correct_path(file)?,
        };

        if !self.claim_holds(backend.as_ref(), &key, file.size).await? {
            let local_key = self.materialize_local(file).await?;
            backend.delete(&key).await?;
            let stream = self.storage.local().read_stream(&local_key).await?;
            backend.write_stream(&key, stream, file.size).await?;
            tracing::info!("Uploaded file {} to {} at {}", id, kind, key);
        }
        instance.set_uri(key.clone());

        let correct = correct_path(file)?;
        if key != correct {
            tracing::debug!("Moving {} copy of file {} from {} to {}", kind, id, key, correct);
            backend.delete(&correct).await?;
            backend.rename(&key, &correct).await?;
            instance.set_uri(correct.clone());
        }

        self.verify(file, backend.as_ref(), &correct).await?;
        file.set_path(correct.clone());

        self.repository.save_instance(&id, &mut instance).await?;
        file.instances.insert(instance);
        self.repository.save_file(file).await?;
        Ok(correct)
    }

    /// Push to a handle-addressed backend. Handles are assigned by the backend
    /// and never moved.
    async fn materialize_by_handle(&self, file: &mut File, kind: BackendKind) -> Result<String> {
        let id = file_id(file)?;
        let backend = self.storage.backend(kind)?;

        let mut instance = file
            .instances
            .get(kind)
            .cloned()
            .unwrap_or_else(|| FileInstance::new(kind));

        let mut existing = instance.uri().map(str::to_owned);
        if let Some(uri) = &existing {
            if !self.still_present(backend.as_ref(), uri).await? {
                tracing::debug!("{} handle {} of file {} is gone", kind, uri, id);
                existing = None;
            }
        }

        let holds = match &existing {
            Some(uri) => self.claim_holds(backend.as_ref(), uri, file.size).await?,
            None => false,
        };

        let uri = if holds {
            existing.unwrap_or_default()
        } else {
            let local_key = self.materialize_local(file).await?;
            let stream = self.storage.local().read_stream(&local_key).await?;
            let target = existing.clone().unwrap_or_default();
            let outcome = backend.write_stream(&target, stream, file.size).await?;
            if let Some(payload) = outcome.payload {
                instance.payload = payload;
            }
            let uri = outcome
                .uri
                .or(existing)
                .ok_or_else(|| AppError::Transport(format!("{} assigned no handle", kind)))?;
            tracing::info!("Uploaded file {} to {} as {}", id, kind, uri);
            self.verify(file, backend.as_ref(), &uri).await?;
            uri
        };
        instance.set_uri(uri.clone());

        self.repository.save_instance(&id, &mut instance).await?;
        file.instances.insert(instance);
        self.repository.save_file(file).await?;
        Ok(uri)
    }

    /// Merge what an earlier lock holder persisted into the caller's copy.
    ///
    /// The stored size and local claim win. Name, mimetype and remote claims
    /// only fill gaps, so a claim the caller is about to repair is kept.
    async fn refresh(&self, id: &str, file: &mut File) -> Result<()> {
        let Some(stored) = self.repository.load_file(id).await? else {
            return Ok(());
        };
        if stored.size.is_some() {
            file.size = stored.size;
        }
        if file.mimetype.is_none() {
            file.mimetype = stored.mimetype;
        }
        if file.filename.is_none() {
            if let Some(filename) = stored.filename {
                file.rename(filename);
            }
        }
        for instance in stored.instances.iter().filter(|i| i.has_uri()) {
            if instance.kind == BackendKind::Local || !file.instances.contains(instance.kind) {
                file.instances.insert(instance.clone());
            }
        }
        Ok(())
    }

    /// Whether the claim at `key` can be trusted. Unknown size never can.
    async fn claim_holds(
        &self,
        backend: &dyn StorageBackend,
        key: &str,
        size: Option<u64>,
    ) -> Result<bool> {
        if size.is_none() {
            return Ok(false);
        }
        match self.integrity.matches(backend, key, size).await {
            Ok(matches) => Ok(matches),
            Err(e) if e.is_absent() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn still_present(&self, backend: &dyn StorageBackend, key: &str) -> Result<bool> {
        match backend.present(key).await {
            Ok(present) => Ok(present),
            Err(e) if e.is_absent() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn verify(&self, file: &File, backend: &dyn StorageBackend, key: &str) -> Result<()> {
        if self.integrity.matches(backend, key, file.size).await? {
            return Ok(());
        }

        let actual = backend.size_of(key).await.ok();
        let file_id = file.id.clone().unwrap_or_default();
        tracing::error!(
            file_id = %file_id,
            backend = %backend.kind(),
            location = %key,
            expected = ?file.size,
            actual = ?actual,
            filename = ?file.filename,
            mimetype = ?file.mimetype,
            "Copy did not verify after reconciliation"
        );
        Err(AppError::ReconciliationFailed {
            file_id,
            backend: backend.kind(),
            location: key.to_string(),
            expected: file.size,
            actual,
        })
    }
}
