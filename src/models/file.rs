use serde::Serialize;

use super::{AttachmentMetadata, BackendKind, FileInstance, FileInstances};
use crate::services::metadata::MetadataHolder;
use crate::services::path_policy::{self, PathAddressable};
use crate::services::selector::REMOTE_PRIORITY;

/// Logical file whose bytes may live in several backends
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct File {
    pub id: Option<String>,
    pub filename: Option<String>,
    pub original_filename: Option<String>,
    pub mimetype: Option<String>,
    pub size: Option<u64>,
    pub path: Option<String>,
    pub instances: FileInstances,
}

impl File {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(filename: impl Into<String>) -> Self {
        let filename = filename.into();
        Self {
            original_filename: Some(filename.clone()),
            filename: Some(filename),
            ..Self::default()
        }
    }

    /// Change the display name and re-apply the canonical path when it can
    /// already be computed.
    pub fn rename(&mut self, filename: impl Into<String>) {
        self.filename = Some(filename.into());
        self.reapply_path();
    }

    fn reapply_path(&mut self) {
        if self.id.is_some() {
            self.path = path_policy::correct_path(self).ok();
        }
    }

    /// Fill name, mimetype and size from a provider's description.
    pub fn apply_attachment_metadata(&mut self, metadata: &AttachmentMetadata) {
        if let Some(size) = metadata.size {
            self.size = Some(size);
        }
        if let Some(mimetype) = metadata.mimetype.as_deref().filter(|m| !m.is_empty()) {
            self.mimetype = Some(mimetype.to_string());
        }
        if let Some(filename) = metadata.filename.as_deref().filter(|f| !f.is_empty()) {
            self.original_filename = Some(filename.to_string());
            self.rename(filename);
        }
    }

    pub fn local_instance(&self) -> Option<&FileInstance> {
        self.instances.get(BackendKind::Local)
    }

    pub fn public_instance(&self) -> Option<&FileInstance> {
        self.instances.get(BackendKind::ObjectStore)
    }

    /// Upload started but the blob CDN has not confirmed a handle yet.
    pub fn pending_instance(&self) -> Option<&FileInstance> {
        self.instances.get(BackendKind::BlobCdnPending)
    }

    /// First remote instance in selection order, with or without a uri.
    pub fn remote_instance(&self) -> Option<&FileInstance> {
        REMOTE_PRIORITY
            .iter()
            .find_map(|kind| self.instances.get(*kind))
    }
}

impl PathAddressable for File {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    fn set_path(&mut self, path: String) {
        self.path = Some(path);
    }
}

impl MetadataHolder for File {
    fn mimetype(&self) -> Option<&str> {
        self.mimetype.as_deref().filter(|m| !m.is_empty())
    }

    fn set_mimetype(&mut self, mimetype: Option<String>) {
        self.mimetype = mimetype;
    }

    fn size(&self) -> Option<u64> {
        self.size
    }

    fn set_size(&mut self, size: Option<u64>) {
        self.size = size;
    }

    fn name(&self) -> Option<&str> {
        self.filename.as_deref().filter(|f| !f.is_empty())
    }

    fn set_name(&mut self, filename: Option<String>) {
        match filename {
            Some(name) => self.rename(name),
            None => self.filename = None,
        }
    }
}
