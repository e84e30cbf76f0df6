//! Persistence of files and their instances.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{AppError, Result};
use crate::models::{BackendKind, File, FileInstance};

#[async_trait]
pub trait FileRepository: Send + Sync {
    /// Give an unsaved file its permanent id and store it.
    async fn assign_identity(&self, file: &mut File) -> Result<String>;

    /// Store the file's own fields; instances are saved separately.
    async fn save_file(&self, file: &File) -> Result<()>;

    /// Upsert the instance of `file_id` for the instance's kind, assigning its id.
    async fn save_instance(&self, file_id: &str, instance: &mut FileInstance) -> Result<()>;

    /// Load a file together with its instances.
    async fn load_file(&self, id: &str) -> Result<Option<File>>;
}

#[derive(Default)]
struct MemoryState {
    files: HashMap<String, File>,
    instances: HashMap<(String, BackendKind), FileInstance>,
}

/// Repository kept in process memory
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
    next_id: AtomicUsize,
    file_saves: AtomicUsize,
    instance_saves: AtomicUsize,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_saves(&self) -> usize {
        self.file_saves.load(Ordering::SeqCst)
    }

    pub fn instance_saves(&self) -> usize {
        self.instance_saves.load(Ordering::SeqCst)
    }

    pub fn stored_instance(&self, file_id: &str, kind: BackendKind) -> Option<FileInstance> {
        self.state
            .lock()
            .instances
            .get(&(file_id.to_string(), kind))
            .cloned()
    }

    fn store_file(&self, file: &File) {
        let mut stored = file.clone();
        stored.instances = Default::default();
        if let Some(id) = &file.id {
            self.state.lock().files.insert(id.clone(), stored);
        }
        self.file_saves.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl FileRepository for MemoryRepository {
    async fn assign_identity(&self, file: &mut File) -> Result<String> {
        if let Some(id) = file.id.as_deref().filter(|id| !id.is_empty()) {
            return Ok(id.to_string());
        }
        let id = (self.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string();
        file.id = Some(id.clone());
        self.store_file(file);
        Ok(id)
    }

    async fn save_file(&self, file: &File) -> Result<()> {
        if file.id.is_none() {
            return Err(AppError::IdentityNotAssigned);
        }
        self.store_file(file);
        Ok(())
    }

    async fn save_instance(&self, file_id: &str, instance: &mut FileInstance) -> Result<()> {
        let mut state = self.state.lock();
        let key = (file_id.to_string(), instance.kind);
        let existing_id = state.instances.get(&key).and_then(|i| i.id.clone());
        if instance.id.is_none() {
            instance.id = Some(existing_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()));
        }
        state.instances.insert(key, instance.clone());
        self.instance_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load_file(&self, id: &str) -> Result<Option<File>> {
        let state = self.state.lock();
        let Some(file) = state.files.get(id) else {
            return Ok(None);
        };
        let mut file = file.clone();
        file.instances = state
            .instances
            .iter()
            .filter(|((file_id, _), _)| file_id == id)
            .map(|(_, instance)| instance.clone())
            .collect();
        Ok(Some(file))
    }
}
