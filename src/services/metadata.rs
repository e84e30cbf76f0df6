//! Mimetype, size and name discovery from stored bytes.

use std::path::Path;
use tokio::io::AsyncReadExt;

use crate::error::Result;
use crate::storage::StorageBackend;

/// Bytes read from the head of a file for content sniffing.
const SNIFF_BYTES: u64 = 8192;

/// Something that carries the metadata the engine keeps trustworthy.
pub trait MetadataHolder {
    fn mimetype(&self) -> Option<&str>;
    fn set_mimetype(&mut self, mimetype: Option<String>);
    fn size(&self) -> Option<u64>;
    fn set_size(&mut self, size: Option<u64>);
    fn name(&self) -> Option<&str>;
    fn set_name(&mut self, name: Option<String>);
}

/// Guess a mimetype from leading bytes, falling back to the name's extension.
pub fn sniff_mimetype(head: &[u8], name_hint: Option<&str>) -> String {
    if let Some(kind) = infer::get(head) {
        return kind.mime_type().to_string();
    }

    if let Some(name) = name_hint {
        if let Some(guess) = mime_guess::from_path(name).first() {
            return guess.essence_str().to_string();
        }
    }

    if !head.is_empty() && std::str::from_utf8(head).is_ok() {
        return mime::TEXT_PLAIN.essence_str().to_string();
    }

    mime::APPLICATION_OCTET_STREAM.essence_str().to_string()
}

/// Fill whichever of mimetype, size and name is unset from the copy at `key`.
///
/// Fields that already hold a value are left alone.
pub async fn determine_file_metadata<M>(
    file: &mut M,
    backend: &dyn StorageBackend,
    key: &str,
) -> Result<()>
where
    M: MetadataHolder + ?Sized,
{
    if file.mimetype().is_none() {
        let mut head = Vec::with_capacity(SNIFF_BYTES as usize);
        let stream = backend.read_stream(key).await?;
        stream.take(SNIFF_BYTES).read_to_end(&mut head).await?;
        let hint = file.name().map(str::to_owned).unwrap_or_else(|| key.to_string());
        let mimetype = sniff_mimetype(&head, Some(&hint));
        tracing::debug!("Determined mimetype {} for {}", mimetype, key);
        file.set_mimetype(Some(mimetype));
    }

    if file.size().is_none() {
        let size = backend.size_of(key).await?;
        tracing::debug!("Determined size {} for {}", size, key);
        file.set_size(Some(size));
    }

    if file.name().is_none() {
        if let Some(stem) = Path::new(key).file_stem().and_then(|s| s.to_str()) {
            file.set_name(Some(stem.to_string()));
        }
    }

    Ok(())
}
