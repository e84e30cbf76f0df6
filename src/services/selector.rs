//! Which instance is authoritative for a file.

use std::fmt;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::{BackendKind, File, FileInstance};
use crate::storage::{StorageBackend, StorageManager};

/// Remote kinds in the order they are trusted. Pending uploads never appear.
pub const REMOTE_PRIORITY: [BackendKind; 4] = [
    BackendKind::BlobCdn,
    BackendKind::RemoteProviderA,
    BackendKind::RemoteProviderB,
    BackendKind::ObjectStore,
];

/// Chosen source of a file's bytes
pub struct Selection {
    pub kind: BackendKind,
    pub location: String,
    pub backend: Arc<dyn StorageBackend>,
}

impl fmt::Debug for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selection")
            .field("kind", &self.kind)
            .field("location", &self.location)
            .finish()
    }
}

fn describe(file: &File) -> String {
    file.id
        .clone()
        .or_else(|| file.filename.clone())
        .unwrap_or_else(|| "<unsaved>".to_string())
}

/// First remote instance with a claim, in priority order. Presence is not re-verified.
pub fn first_remote_instance(file: &File) -> Option<&FileInstance> {
    REMOTE_PRIORITY
        .iter()
        .filter_map(|kind| file.instances.get(*kind))
        .find(|instance| instance.has_uri())
}

/// Remote claims first, then the local one.
pub fn first_instance(file: &File) -> Option<&FileInstance> {
    first_remote_instance(file).or_else(|| file.local_instance().filter(|i| i.has_uri()))
}

/// Every claim, most trusted first.
pub fn instances_in_order(file: &File) -> impl Iterator<Item = &FileInstance> {
    REMOTE_PRIORITY
        .iter()
        .chain(std::iter::once(&BackendKind::Local))
        .filter_map(|kind| file.instances.get(*kind))
        .filter(|instance| instance.has_uri())
}

fn select(file: &File, instance: Option<&FileInstance>, storage: &StorageManager) -> Result<Selection> {
    let instance = instance.ok_or_else(|| AppError::NoAvailableStorage(describe(file)))?;
    let location = instance
        .uri()
        .ok_or_else(|| AppError::NoAvailableStorage(describe(file)))?
        .to_string();
    Ok(Selection {
        kind: instance.kind,
        location,
        backend: storage.provider_for(instance)?,
    })
}

pub fn first_available_remote(file: &File, storage: &StorageManager) -> Result<Selection> {
    select(file, first_remote_instance(file), storage)
}

pub fn first_available(file: &File, storage: &StorageManager) -> Result<Selection> {
    select(file, first_instance(file), storage)
}
