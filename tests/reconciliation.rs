use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tempfile::TempDir;

use stateless_files::error::{AppError, Result};
use stateless_files::models::{AttachmentMetadata, BackendKind, File, FileInstance, InstancePayload};
use stateless_files::services::{
    Delivery, Engine, FileRepository, IntegrityCheck, MemoryRepository, SizeCheck,
};
use stateless_files::storage::{
    bytes_stream, read_all, AttachmentSource, LocalStorage, MemoryStorage, StorageBackend,
    StorageManager, REMOTE_ATTACHMENT_URI,
};

const CDN_HANDLES: &str = "https://www.filestackapi.com/api/file";

struct Harness {
    _dir: TempDir,
    local: Arc<LocalStorage>,
    object_store: Arc<MemoryStorage>,
    blob_cdn: Arc<MemoryStorage>,
    repository: Arc<MemoryRepository>,
    engine: Arc<Engine>,
}

fn harness() -> Harness {
    harness_with(MemoryStorage::new(BackendKind::ObjectStore), |storage| storage)
}

fn harness_with(
    object_store: MemoryStorage,
    extend: impl FnOnce(StorageManager) -> StorageManager,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let local = Arc::new(LocalStorage::new(dir.path()));
    let object_store = Arc::new(object_store);
    let blob_cdn = Arc::new(MemoryStorage::new(BackendKind::BlobCdn).with_handles(CDN_HANDLES));

    let storage = StorageManager::new(local.clone())
        .with_backend(object_store.clone())
        .unwrap()
        .with_backend(blob_cdn.clone())
        .unwrap();
    let storage = Arc::new(extend(storage));
    let repository = Arc::new(MemoryRepository::new());
    let engine = Arc::new(Engine::new(storage, repository.clone()));

    Harness {
        _dir: dir,
        local,
        object_store,
        blob_cdn,
        repository,
        engine,
    }
}

fn report(size: Option<u64>) -> File {
    let mut file = File::named("report.pdf");
    file.id = Some("42".into());
    file.size = size;
    file
}

fn content(len: usize) -> Bytes {
    Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
}

async fn local_bytes(h: &Harness, key: &str) -> Bytes {
    read_all(h.local.read_stream(key).await.unwrap()).await.unwrap()
}

#[tokio::test]
async fn test_no_instances_means_no_available_storage() {
    let h = harness();
    let mut file = report(None);

    let err = h.engine.ensure_local(&mut file).await.unwrap_err();
    assert!(matches!(err, AppError::NoAvailableStorage(id) if id == "42"));
    assert!(file.local_instance().is_none());
    assert_eq!(h.repository.instance_saves(), 0);
    assert_eq!(h.repository.file_saves(), 0);
}

#[tokio::test]
async fn test_fetches_from_object_store() {
    let h = harness();
    h.object_store.insert("42/report.pdf", content(1024));
    let mut file = report(Some(1024));
    file.instances
        .insert(FileInstance::new(BackendKind::ObjectStore).with_uri("42/report.pdf"));

    let key = h.engine.ensure_local(&mut file).await.unwrap();

    assert_eq!(key, "42/report.pdf");
    assert!(SizeCheck
        .matches(h.local.as_ref(), "42/report.pdf", Some(1024))
        .await
        .unwrap());
    assert_eq!(local_bytes(&h, "42/report.pdf").await, content(1024));
    assert_eq!(file.path.as_deref(), Some("42/report.pdf"));
    assert_eq!(file.local_instance().unwrap().uri(), Some("42/report.pdf"));
    assert_eq!(h.object_store.read_count(), 1);

    let stored = h.repository.stored_instance("42", BackendKind::Local).unwrap();
    assert_eq!(stored.uri(), Some("42/report.pdf"));
}

#[tokio::test]
async fn test_ensure_local_is_idempotent() {
    let h = harness();
    h.object_store.insert("42/report.pdf", content(1024));
    let mut file = report(Some(1024));
    file.instances
        .insert(FileInstance::new(BackendKind::ObjectStore).with_uri("42/report.pdf"));

    h.engine.ensure_local(&mut file).await.unwrap();
    let after_first = file.clone();
    h.engine.ensure_local(&mut file).await.unwrap();

    assert_eq!(h.object_store.read_count(), 1);
    assert_eq!(file.path, after_first.path);
    assert_eq!(file.size, after_first.size);
}

#[tokio::test]
async fn test_unknown_size_refetches_then_settles() {
    let h = harness();
    h.object_store.insert("42/report.pdf", Bytes::from_static(b"%PDF-1.4 tiny"));
    let mut file = report(None);
    file.instances
        .insert(FileInstance::new(BackendKind::ObjectStore).with_uri("42/report.pdf"));

    h.engine.ensure_local(&mut file).await.unwrap();
    assert_eq!(file.size, Some(13));
    assert_eq!(file.mimetype.as_deref(), Some("application/pdf"));

    h.engine.ensure_local(&mut file).await.unwrap();
    assert_eq!(h.object_store.read_count(), 1);
}

#[tokio::test]
async fn test_moves_local_copy_to_correct_path() {
    let h = harness();
    let data = content(300);
    h.local
        .write_stream("old/name.pdf", bytes_stream(data.clone()), None)
        .await
        .unwrap();
    let mut file = report(Some(300));
    file.instances
        .insert(FileInstance::new(BackendKind::Local).with_uri("old/name.pdf"));

    let key = h.engine.ensure_local(&mut file).await.unwrap();

    assert_eq!(key, "42/report.pdf");
    assert_eq!(file.local_instance().unwrap().uri(), Some("42/report.pdf"));
    assert!(!h.local.present("old/name.pdf").await.unwrap());
    assert_eq!(local_bytes(&h, "42/report.pdf").await, data);
}

#[tokio::test]
async fn test_local_cannot_be_its_own_source() {
    let h = harness();
    h.local
        .write_stream("42/report.pdf", bytes_stream(Bytes::from_static(b"abc")), None)
        .await
        .unwrap();
    let mut file = report(Some(10));
    file.instances
        .insert(FileInstance::new(BackendKind::Local).with_uri("42/report.pdf"));

    let err = h.engine.ensure_local(&mut file).await.unwrap_err();
    assert!(matches!(err, AppError::CircularSelection(id) if id == "42"));
}

#[tokio::test]
async fn test_remote_gone_is_reported_and_nothing_is_saved() {
    let h = harness();
    h.object_store.mark_gone("42/report.pdf");
    let mut file = report(Some(10));
    file.instances
        .insert(FileInstance::new(BackendKind::ObjectStore).with_uri("42/report.pdf"));

    let err = h.engine.ensure_local(&mut file).await.unwrap_err();
    assert!(matches!(err, AppError::RemoteGone(_)));
    assert!(!err.is_retryable());
    assert!(file.local_instance().is_none());
    assert_eq!(h.repository.instance_saves(), 0);
}

#[tokio::test]
async fn test_concurrent_callers_fetch_once() {
    let h = harness();
    h.object_store.insert("42/report.pdf", content(4096));
    let mut file = report(Some(4096));
    file.instances
        .insert(FileInstance::new(BackendKind::ObjectStore).with_uri("42/report.pdf"));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let engine = h.engine.clone();
        let mut file = file.clone();
        tasks.push(tokio::spawn(async move {
            engine.ensure_local(&mut file).await.map(|_| file)
        }));
    }
    for task in tasks {
        let file = task.await.unwrap().unwrap();
        assert_eq!(file.path.as_deref(), Some("42/report.pdf"));
    }

    assert_eq!(h.object_store.read_count(), 1);
    assert_eq!(local_bytes(&h, "42/report.pdf").await, content(4096));
}

#[tokio::test]
async fn test_concurrent_callers_of_unsized_file_fetch_once() {
    let h = harness();
    h.object_store.insert("42/report.pdf", content(2048));
    let mut file = report(None);
    file.instances
        .insert(FileInstance::new(BackendKind::ObjectStore).with_uri("42/report.pdf"));

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let engine = h.engine.clone();
        let mut file = file.clone();
        tasks.push(tokio::spawn(async move {
            engine.ensure_local(&mut file).await.map(|_| file)
        }));
    }
    for task in tasks {
        let file = task.await.unwrap().unwrap();
        assert_eq!(file.size, Some(2048));
        assert_eq!(file.local_instance().unwrap().uri(), Some("42/report.pdf"));
    }

    assert_eq!(h.object_store.read_count(), 1);
    assert_eq!(local_bytes(&h, "42/report.pdf").await, content(2048));
}

#[tokio::test]
async fn test_stale_caller_picks_up_stored_local_copy() {
    let h = harness();
    h.object_store.insert("42/report.pdf", content(64));
    let mut first = report(None);
    first
        .instances
        .insert(FileInstance::new(BackendKind::ObjectStore).with_uri("42/report.pdf"));
    let mut stale = first.clone();

    h.engine.ensure_local(&mut first).await.unwrap();
    h.engine.ensure_local(&mut stale).await.unwrap();

    assert_eq!(h.object_store.read_count(), 1);
    assert_eq!(stale.size, Some(64));
    assert_eq!(stale.local_instance(), first.local_instance());
}

#[tokio::test]
async fn test_put_contents_round_trip() {
    let h = harness();
    let mut file = File::named("notes.txt");

    h.engine
        .put_contents(&mut file, Bytes::from_static(b"hello world"))
        .await
        .unwrap();
    assert_eq!(file.id.as_deref(), Some("1"));
    assert_eq!(file.size, Some(11));
    assert_eq!(file.mimetype.as_deref(), Some("text/plain"));
    assert_eq!(file.path.as_deref(), Some("1/notes.txt"));

    match h.engine.deliver_contents(&mut file).await.unwrap() {
        Delivery::Stream {
            stream,
            mimetype,
            filename,
            size,
        } => {
            assert_eq!(read_all(stream).await.unwrap(), Bytes::from_static(b"hello world"));
            assert_eq!(mimetype.as_deref(), Some("text/plain"));
            assert_eq!(filename.as_deref(), Some("notes.txt"));
            assert_eq!(size, Some(11));
        }
        other => panic!("expected a stream, got {:?}", other),
    }
}

#[tokio::test]
async fn test_put_contents_replaces_previous_content() {
    let h = harness();
    let mut file = File::named("notes.txt");
    h.engine
        .put_contents(&mut file, Bytes::from_static(b"first version"))
        .await
        .unwrap();
    h.engine
        .put_contents(&mut file, Bytes::from_static(b"second"))
        .await
        .unwrap();

    assert_eq!(file.size, Some(6));
    assert_eq!(local_bytes(&h, "1/notes.txt").await, Bytes::from_static(b"second"));
    let loaded = h.repository.load_file("1").await.unwrap().unwrap();
    assert_eq!(loaded.size, Some(6));
}

#[tokio::test]
async fn test_put_contents_removes_misplaced_local_copy() {
    let h = harness();
    h.local
        .write_stream("legacy/notes.txt", bytes_stream(Bytes::from_static(b"old")), None)
        .await
        .unwrap();
    let mut file = File::named("notes.txt");
    file.instances
        .insert(FileInstance::new(BackendKind::Local).with_uri("legacy/notes.txt"));

    h.engine
        .put_contents(&mut file, Bytes::from_static(b"new"))
        .await
        .unwrap();

    assert_eq!(file.local_instance().unwrap().uri(), Some("1/notes.txt"));
    assert!(!h.local.present("legacy/notes.txt").await.unwrap());
    assert_eq!(local_bytes(&h, "1/notes.txt").await, Bytes::from_static(b"new"));
}

#[tokio::test]
async fn test_ensure_remote_object_store() {
    let h = harness();
    let mut file = File::named("notes.txt");
    h.engine
        .put_contents(&mut file, Bytes::from_static(b"hello world"))
        .await
        .unwrap();

    let key = h
        .engine
        .ensure_remote(&mut file, BackendKind::ObjectStore)
        .await
        .unwrap();
    assert_eq!(key, "1/notes.txt");
    assert_eq!(h.object_store.get("1/notes.txt").unwrap(), Bytes::from_static(b"hello world"));
    assert_eq!(
        h.repository
            .stored_instance("1", BackendKind::ObjectStore)
            .unwrap()
            .uri(),
        Some("1/notes.txt")
    );

    h.engine
        .ensure_remote(&mut file, BackendKind::ObjectStore)
        .await
        .unwrap();
    assert_eq!(h.object_store.write_count(), 1);
}

#[tokio::test]
async fn test_ensure_remote_moves_misplaced_object() {
    let h = harness();
    let mut file = File::named("notes.txt");
    h.engine
        .put_contents(&mut file, Bytes::from_static(b"hello world"))
        .await
        .unwrap();
    h.object_store
        .insert("legacy/notes.txt", Bytes::from_static(b"hello world"));
    file.instances
        .insert(FileInstance::new(BackendKind::ObjectStore).with_uri("legacy/notes.txt"));

    let key = h
        .engine
        .ensure_remote(&mut file, BackendKind::ObjectStore)
        .await
        .unwrap();
    assert_eq!(key, "1/notes.txt");
    assert!(!h.object_store.contains("legacy/notes.txt"));
    assert!(h.object_store.contains("1/notes.txt"));
    assert_eq!(h.object_store.write_count(), 0);
}

#[tokio::test]
async fn test_ensure_remote_blob_cdn_keeps_handle() {
    let h = harness();
    let mut file = File::named("notes.txt");
    h.engine
        .put_contents(&mut file, Bytes::from_static(b"hello world"))
        .await
        .unwrap();

    let handle = h
        .engine
        .ensure_remote(&mut file, BackendKind::BlobCdn)
        .await
        .unwrap();
    assert_eq!(handle, format!("{}/1", CDN_HANDLES));
    assert_eq!(file.instances.get(BackendKind::BlobCdn).unwrap().uri(), Some(handle.as_str()));

    h.engine
        .ensure_remote(&mut file, BackendKind::BlobCdn)
        .await
        .unwrap();
    assert_eq!(h.blob_cdn.write_count(), 1);
    assert_eq!(file.path.as_deref(), Some("1/notes.txt"));
}

#[tokio::test]
async fn test_ensure_remote_blob_cdn_overwrites_stale_handle() {
    let h = harness();
    let mut file = File::named("notes.txt");
    h.engine
        .put_contents(&mut file, Bytes::from_static(b"hello world"))
        .await
        .unwrap();
    let handle = format!("{}/h1", CDN_HANDLES);
    h.blob_cdn.insert(handle.clone(), Bytes::from_static(b"old"));
    file.instances
        .insert(FileInstance::new(BackendKind::BlobCdn).with_uri(handle.clone()));

    let uri = h
        .engine
        .ensure_remote(&mut file, BackendKind::BlobCdn)
        .await
        .unwrap();
    assert_eq!(uri, handle);
    assert_eq!(h.blob_cdn.get(&handle).unwrap(), Bytes::from_static(b"hello world"));
}

#[tokio::test]
async fn test_ensure_remote_blob_cdn_reuploads_gone_handle() {
    let h = harness();
    let mut file = File::named("notes.txt");
    h.engine
        .put_contents(&mut file, Bytes::from_static(b"hello world"))
        .await
        .unwrap();
    let first = h
        .engine
        .ensure_remote(&mut file, BackendKind::BlobCdn)
        .await
        .unwrap();

    h.blob_cdn.mark_gone(first.clone());
    let second = h
        .engine
        .ensure_remote(&mut file, BackendKind::BlobCdn)
        .await
        .unwrap();

    assert_ne!(first, second);
    assert_eq!(h.blob_cdn.write_count(), 2);
    assert_eq!(h.blob_cdn.get(&second).unwrap(), Bytes::from_static(b"hello world"));
}

#[tokio::test]
async fn test_ensure_remote_rejects_read_only_kinds() {
    let h = harness();
    let mut file = report(Some(1));
    for kind in [
        BackendKind::Local,
        BackendKind::BlobCdnPending,
        BackendKind::RemoteProviderA,
        BackendKind::RemoteProviderB,
    ] {
        let err = h.engine.ensure_remote(&mut file, kind).await.unwrap_err();
        assert!(matches!(err, AppError::Unsupported(_)), "{} gave {:?}", kind, err);
    }
}

#[tokio::test]
async fn test_public_urls_and_redirects() {
    let h = harness_with(
        MemoryStorage::new(BackendKind::ObjectStore).with_public_base("https://files.example.com"),
        |storage| storage,
    );
    h.object_store.insert("42/report.pdf", content(10));
    let mut file = report(Some(10));

    assert_eq!(h.engine.absolute_url(&file).await.unwrap(), None);

    file.instances
        .insert(FileInstance::new(BackendKind::ObjectStore).with_uri("42/report.pdf"));
    assert_eq!(
        h.engine.absolute_url(&file).await.unwrap().as_deref(),
        Some("https://files.example.com/42/report.pdf")
    );
    match h.engine.deliver_contents(&mut file).await.unwrap() {
        Delivery::Redirect(url) => assert_eq!(url, "https://files.example.com/42/report.pdf"),
        other => panic!("expected a redirect, got {:?}", other),
    }
    assert_eq!(h.object_store.read_count(), 0);
}

#[tokio::test]
async fn test_determine_file_metadata_needs_a_location() {
    let h = harness();
    let mut file = report(None);
    assert!(matches!(
        h.engine.determine_file_metadata(&mut file).await,
        Err(AppError::PathNotSet)
    ));

    h.engine
        .put_contents(&mut file, Bytes::from_static(b"plain words"))
        .await
        .unwrap();
    file.mimetype = None;
    file.size = None;
    h.engine.determine_file_metadata(&mut file).await.unwrap();
    assert_eq!(file.size, Some(11));
    assert_eq!(file.mimetype.as_deref(), Some("application/pdf"));
}

struct FakeProvider {
    data: Bytes,
    inline: bool,
}

#[async_trait]
impl AttachmentSource for FakeProvider {
    async fn fetch_bytes(&self, _payload: &InstancePayload) -> Result<Bytes> {
        Ok(self.data.clone())
    }

    async fn describe_metadata(&self, payload: &InstancePayload) -> Result<AttachmentMetadata> {
        let filename = payload
            .attachment_metadata()
            .and_then(|m| m.get("name"))
            .and_then(|n| n.as_str())
            .map(str::to_owned);
        Ok(AttachmentMetadata {
            size: Some(self.data.len() as u64),
            mimetype: Some("text/plain".into()),
            filename,
        })
    }

    fn resource_uri(&self, _payload: &InstancePayload) -> Option<String> {
        if self.inline {
            None
        } else {
            Some(REMOTE_ATTACHMENT_URI.to_string())
        }
    }

    fn inline_bytes(&self, _payload: &InstancePayload) -> Result<Option<Bytes>> {
        Ok(self.inline.then(|| self.data.clone()))
    }
}

fn provider_harness(kind: BackendKind, inline: bool) -> Harness {
    let source = Arc::new(FakeProvider {
        data: Bytes::from_static(b"attached text"),
        inline,
    });
    harness_with(MemoryStorage::new(BackendKind::ObjectStore), move |storage| {
        storage.with_attachment_source(kind, source).unwrap()
    })
}

#[tokio::test]
async fn test_file_from_provider_attachment_is_fetched_lazily() {
    let h = provider_harness(BackendKind::RemoteProviderA, false);
    let payload = InstancePayload::attachment(serde_json::json!({"name": "memo.txt", "messageId": "m-1"}));

    let mut file = h
        .engine
        .create_file_from_attachment(BackendKind::RemoteProviderA, payload.clone())
        .await
        .unwrap();
    assert_eq!(file.filename.as_deref(), Some("memo.txt"));
    assert_eq!(file.size, Some(13));
    let instance = file.instances.get(BackendKind::RemoteProviderA).unwrap();
    assert_eq!(instance.uri(), Some(REMOTE_ATTACHMENT_URI));
    assert_eq!(instance.payload, payload);
    assert!(file.local_instance().is_none());

    let key = h.engine.ensure_local(&mut file).await.unwrap();
    assert_eq!(key, format!("{}/memo.txt", file.id.as_deref().unwrap()));
    assert_eq!(local_bytes(&h, &key).await, Bytes::from_static(b"attached text"));
}

#[tokio::test]
async fn test_inline_attachment_is_stored_without_provider_instance() {
    let h = provider_harness(BackendKind::RemoteProviderB, true);
    let payload = InstancePayload::attachment(serde_json::json!({"name": "inline.txt"}));

    let file = h
        .engine
        .create_file_from_attachment(BackendKind::RemoteProviderB, payload)
        .await
        .unwrap();
    assert!(file.instances.get(BackendKind::RemoteProviderB).is_none());
    assert_eq!(file.local_instance().unwrap().uri(), Some("1/inline.txt"));
    assert_eq!(local_bytes(&h, "1/inline.txt").await, Bytes::from_static(b"attached text"));
}

#[tokio::test]
async fn test_unconfigured_provider_is_a_config_error() {
    let h = harness();
    let err = h
        .engine
        .create_file_from_attachment(BackendKind::RemoteProviderA, InstancePayload::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[tokio::test]
async fn test_absolute_url_falls_through_to_a_claim_with_a_url() {
    let source = Arc::new(FakeProvider {
        data: Bytes::from_static(b"attached text"),
        inline: false,
    });
    let h = harness_with(
        MemoryStorage::new(BackendKind::ObjectStore).with_public_base("https://files.example.com"),
        move |storage| {
            storage
                .with_attachment_source(BackendKind::RemoteProviderB, source)
                .unwrap()
        },
    );
    h.object_store.insert("42/report.pdf", content(13));
    let mut file = report(Some(13));
    file.instances.insert(
        FileInstance::new(BackendKind::RemoteProviderB)
            .with_uri(REMOTE_ATTACHMENT_URI)
            .with_payload(InstancePayload::attachment(serde_json::json!({"name": "report.pdf"}))),
    );
    file.instances
        .insert(FileInstance::new(BackendKind::ObjectStore).with_uri("42/report.pdf"));

    assert_eq!(
        h.engine.absolute_url(&file).await.unwrap().as_deref(),
        Some("https://files.example.com/42/report.pdf")
    );
    match h.engine.deliver_contents(&mut file).await.unwrap() {
        Delivery::Redirect(url) => assert_eq!(url, "https://files.example.com/42/report.pdf"),
        other => panic!("expected a redirect, got {:?}", other),
    }

    // Without the object store claim nothing has a url.
    file.instances.remove(BackendKind::ObjectStore);
    assert_eq!(h.engine.absolute_url(&file).await.unwrap(), None);
}
