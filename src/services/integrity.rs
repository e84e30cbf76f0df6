//! Decide whether a location holds the expected copy.

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::storage::StorageBackend;

#[async_trait]
pub trait IntegrityCheck: Send + Sync {
    /// `Ok(false)` when nothing is stored at `key` or it does not match.
    async fn matches(
        &self,
        backend: &dyn StorageBackend,
        key: &str,
        expected_size: Option<u64>,
    ) -> Result<bool>;
}

/// Size-only comparison.
///
/// Two different files of identical size are indistinguishable; there is no
/// content hash to tell them apart.
#[derive(Debug, Default, Clone, Copy)]
pub struct SizeCheck;

#[async_trait]
impl IntegrityCheck for SizeCheck {
    async fn matches(
        &self,
        backend: &dyn StorageBackend,
        key: &str,
        expected_size: Option<u64>,
    ) -> Result<bool> {
        if !backend.present(key).await? {
            tracing::debug!("{} has nothing at {}", backend.kind(), key);
            return Ok(false);
        }

        let expected = expected_size.ok_or_else(|| AppError::SizeUnknown(key.to_string()))?;

        let actual = match backend.size_of(key).await {
            Ok(size) => size,
            // Removed between the two calls.
            Err(e) if e.is_absent() => return Ok(false),
            Err(e) => return Err(e),
        };

        if actual != expected {
            tracing::debug!(
                "{} copy at {} has size {}, expected {}",
                backend.kind(),
                key,
                actual,
                expected
            );
        }
        Ok(actual == expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BackendKind;
    use crate::storage::MemoryStorage;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_absent_is_false_even_without_size() {
        let storage = MemoryStorage::new(BackendKind::Local);
        assert!(!SizeCheck.matches(&storage, "42/report.pdf", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_size_is_an_error_when_present() {
        let storage = MemoryStorage::new(BackendKind::Local);
        storage.insert("42/report.pdf", Bytes::from_static(b"abc"));
        let err = SizeCheck.matches(&storage, "42/report.pdf", None).await.unwrap_err();
        assert!(matches!(err, AppError::SizeUnknown(k) if k == "42/report.pdf"));
    }

    #[tokio::test]
    async fn test_compares_sizes() {
        let storage = MemoryStorage::new(BackendKind::Local);
        storage.insert("k", Bytes::from_static(b"abc"));
        assert!(SizeCheck.matches(&storage, "k", Some(3)).await.unwrap());
        assert!(!SizeCheck.matches(&storage, "k", Some(4)).await.unwrap());
    }

    #[tokio::test]
    async fn test_same_size_different_content_is_accepted() {
        // Known limitation: the check cannot see content.
        let storage = MemoryStorage::new(BackendKind::Local);
        storage.insert("k", Bytes::from_static(b"aaaa"));
        let expected_len = b"bbbb".len() as u64;
        assert!(SizeCheck.matches(&storage, "k", Some(expected_len)).await.unwrap());
    }
}
