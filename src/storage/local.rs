use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

use crate::error::{AppError, Result};
use crate::models::BackendKind;
use crate::storage::{copy_stream, ByteStream, StorageBackend, WriteOutcome};

/// Local file system storage
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Absolute path of `key`, for callers that need to hand the file to another tool.
    pub fn absolute_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if key.is_empty() || escapes {
            return Err(AppError::InvalidKey(key.to_string()));
        }
        Ok(self.base_path.join(relative))
    }

    fn not_found(key: &str) -> impl FnOnce(std::io::Error) -> AppError + '_ {
        move |e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::NotFound(format!("File not found: {}", key))
            } else {
                AppError::Io(e)
            }
        }
    }

    /// Remove directories left empty under the base path, walking upwards from `start`.
    async fn prune_empty_dirs(&self, start: Option<&Path>) -> Result<()> {
        let mut current_dir = start.map(Path::to_path_buf);
        while let Some(dir) = current_dir {
            if dir == self.base_path || !dir.starts_with(&self.base_path) {
                break;
            }
            match fs::read_dir(&dir).await {
                Ok(mut entries) => {
                    if entries.next_entry().await?.is_some() {
                        break;
                    }
                    let _ = fs::remove_dir(&dir).await;
                }
                Err(_) => break,
            }
            current_dir = dir.parent().map(Path::to_path_buf);
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn present(&self, key: &str) -> Result<bool> {
        let full_path = self.absolute_path(key)?;
        match fs::metadata(&full_path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn size_of(&self, key: &str) -> Result<u64> {
        let full_path = self.absolute_path(key)?;
        let meta = fs::metadata(&full_path).await.map_err(Self::not_found(key))?;
        if !meta.is_file() {
            return Err(AppError::NotFound(format!("Not a file: {}", key)));
        }
        Ok(meta.len())
    }

    async fn read_stream(&self, key: &str) -> Result<ByteStream> {
        let full_path = self.absolute_path(key)?;
        let file = fs::File::open(&full_path)
            .await
            .map_err(Self::not_found(key))?;
        Ok(Box::pin(file))
    }

    async fn write_stream(
        &self,
        key: &str,
        data: ByteStream,
        _size: Option<u64>,
    ) -> Result<WriteOutcome> {
        let full_path = self.absolute_path(key)?;
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write next to the target and rename, so readers never see a partial file.
        let file_name = full_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file");
        let temp_path =
            full_path.with_file_name(format!(".{}.{}.part", file_name, uuid::Uuid::new_v4()));

        let written = async {
            let mut file = fs::File::create(&temp_path).await?;
            let copied = copy_stream(data, &mut file).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, &full_path).await?;
            Ok::<u64, AppError>(copied)
        }
        .await;

        match written {
            Ok(copied) => {
                tracing::debug!("Wrote {} bytes to {:?}", copied, full_path);
                Ok(WriteOutcome::default())
            }
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(e)
            }
        }
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let from_path = self.absolute_path(from)?;
        let to_path = self.absolute_path(to)?;
        if let Some(parent) = to_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&from_path, &to_path)
            .await
            .map_err(Self::not_found(from))?;
        tracing::debug!("Moved {:?} to {:?}", from_path, to_path);
        self.prune_empty_dirs(from_path.parent()).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full_path = self.absolute_path(key)?;
        match fs::remove_file(&full_path).await {
            Ok(()) => {
                tracing::debug!("Deleted file {:?}", full_path);
                self.prune_empty_dirs(full_path.parent()).await
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{bytes_stream, read_all};
    use bytes::Bytes;

    async fn write(storage: &LocalStorage, key: &str, data: &'static [u8]) {
        storage
            .write_stream(key, bytes_stream(Bytes::from_static(data)), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_write_read_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        assert!(!storage.present("42/report.pdf").await.unwrap());
        write(&storage, "42/report.pdf", b"%PDF-1.4").await;

        assert!(storage.present("42/report.pdf").await.unwrap());
        assert_eq!(storage.size_of("42/report.pdf").await.unwrap(), 8);
        let data = read_all(storage.read_stream("42/report.pdf").await.unwrap())
            .await
            .unwrap();
        assert_eq!(&data[..], b"%PDF-1.4");
    }

    #[tokio::test]
    async fn test_write_replaces_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        write(&storage, "1/a.txt", b"longer content").await;
        write(&storage, "1/a.txt", b"short").await;

        assert_eq!(storage.size_of("1/a.txt").await.unwrap(), 5);
        let entries: Vec<_> = std::fs::read_dir(dir.path().join("1")).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        assert!(matches!(storage.size_of("nope").await, Err(AppError::NotFound(_))));
        assert!(matches!(storage.read_stream("nope").await, Err(AppError::NotFound(_))));
        storage.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_rename_moves_and_prunes() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        write(&storage, "old/name.pdf", b"data").await;

        storage.rename("old/name.pdf", "42/report.pdf").await.unwrap();
        assert!(!storage.present("old/name.pdf").await.unwrap());
        assert!(storage.present("42/report.pdf").await.unwrap());
        assert!(!dir.path().join("old").exists());
    }

    #[tokio::test]
    async fn test_keys_cannot_escape_base_path() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        assert!(matches!(storage.present("../x").await, Err(AppError::InvalidKey(_))));
        assert!(matches!(storage.present("/etc/passwd").await, Err(AppError::InvalidKey(_))));
    }
}
