use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::AppError;

/// Storage backend a file instance lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BackendKind {
    Local,
    ObjectStore,
    BlobCdn,
    BlobCdnPending,
    RemoteProviderA,
    RemoteProviderB,
}

impl BackendKind {
    pub const ALL: [BackendKind; 6] = [
        BackendKind::Local,
        BackendKind::ObjectStore,
        BackendKind::BlobCdn,
        BackendKind::BlobCdnPending,
        BackendKind::RemoteProviderA,
        BackendKind::RemoteProviderB,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Local => "local",
            BackendKind::ObjectStore => "object-store",
            BackendKind::BlobCdn => "blob-cdn",
            BackendKind::BlobCdnPending => "blob-cdn-pending",
            BackendKind::RemoteProviderA => "remote-readonly-provider-A",
            BackendKind::RemoteProviderB => "remote-readonly-provider-B",
        }
    }

    /// Parse a persisted kind, accepting the names older rows were written with.
    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "local" => Ok(BackendKind::Local),
            "object-store" | "public-files-s3" => Ok(BackendKind::ObjectStore),
            "blob-cdn" | "filestack" | "filepicker" => Ok(BackendKind::BlobCdn),
            "blob-cdn-pending" | "filestack-pending" => Ok(BackendKind::BlobCdnPending),
            "remote-readonly-provider-A" | "context-io" => Ok(BackendKind::RemoteProviderA),
            "remote-readonly-provider-B" | "gmail-api" => Ok(BackendKind::RemoteProviderB),
            other => Err(AppError::UnknownBackendKind(other.to_string())),
        }
    }

    /// Backends the engine can push a copy into.
    pub fn is_writable(&self) -> bool {
        matches!(
            self,
            BackendKind::Local | BackendKind::ObjectStore | BackendKind::BlobCdn
        )
    }

    /// Read-only providers reached through attachment fetches.
    pub fn is_attachment_provider(&self) -> bool {
        matches!(
            self,
            BackendKind::RemoteProviderA | BackendKind::RemoteProviderB
        )
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendKind::parse(s)
    }
}

impl TryFrom<String> for BackendKind {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        BackendKind::parse(&value)
    }
}

impl From<BackendKind> for String {
    fn from(kind: BackendKind) -> Self {
        kind.as_str().to_string()
    }
}

/// File metadata as reported by the blob CDN
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlobCdnMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// Backend-specific payload of an instance, tagged by `payloadKind`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "payloadKind", rename_all = "kebab-case")]
pub enum TaggedPayload {
    #[default]
    None,
    BlobCdn {
        fpfile: BlobCdnMetadata,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fpkey: Option<String>,
    },
    Attachment {
        metadata: serde_json::Value,
    },
}

/// Opaque payload stored next to an instance.
///
/// Rows written before payloads were tagged come back as `Legacy` and are
/// written back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InstancePayload {
    Tagged(TaggedPayload),
    Legacy(serde_json::Value),
}

impl Default for InstancePayload {
    fn default() -> Self {
        InstancePayload::Tagged(TaggedPayload::None)
    }
}

#[derive(Deserialize)]
struct LegacyBlobCdnPayload {
    fpfile: BlobCdnMetadata,
    #[serde(default)]
    fpkey: Option<String>,
}

impl InstancePayload {
    pub fn blob_cdn(fpfile: BlobCdnMetadata, fpkey: Option<String>) -> Self {
        InstancePayload::Tagged(TaggedPayload::BlobCdn { fpfile, fpkey })
    }

    pub fn attachment(metadata: serde_json::Value) -> Self {
        InstancePayload::Tagged(TaggedPayload::Attachment { metadata })
    }

    /// Parse a stored payload column. Unreadable text is kept as a raw string.
    pub fn from_stored(raw: Option<&str>) -> Self {
        match raw {
            None => InstancePayload::default(),
            Some(s) if s.trim().is_empty() || s.trim() == "null" => InstancePayload::default(),
            Some(s) => serde_json::from_str(s)
                .unwrap_or_else(|_| InstancePayload::Legacy(serde_json::Value::String(s.to_string()))),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, InstancePayload::Tagged(TaggedPayload::None))
    }

    /// Blob CDN metadata, from a tagged payload or an untagged `{fpfile, fpkey}` row.
    pub fn blob_cdn_metadata(&self) -> Option<BlobCdnMetadata> {
        match self {
            InstancePayload::Tagged(TaggedPayload::BlobCdn { fpfile, .. }) => Some(fpfile.clone()),
            InstancePayload::Legacy(value) => {
                serde_json::from_value::<LegacyBlobCdnPayload>(value.clone())
                    .ok()
                    .map(|p| p.fpfile)
            }
            _ => None,
        }
    }

    /// Provider metadata JSON: the tagged attachment body or the raw legacy value.
    pub fn attachment_metadata(&self) -> Option<&serde_json::Value> {
        match self {
            InstancePayload::Tagged(TaggedPayload::Attachment { metadata }) => Some(metadata),
            InstancePayload::Legacy(value) => Some(value),
            _ => None,
        }
    }
}

/// Record that one backend holds (or is believed to hold) a copy of a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInstance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "storageComponentKind")]
    pub kind: BackendKind,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(rename = "opaquePayload", default)]
    pub payload: InstancePayload,
}

impl FileInstance {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            id: None,
            kind,
            uri: None,
            payload: InstancePayload::default(),
        }
    }

    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.uri = Some(uri.into());
        self
    }

    pub fn with_payload(mut self, payload: InstancePayload) -> Self {
        self.payload = payload;
        self
    }

    /// The claimed location, if any. Empty strings count as no claim.
    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref().filter(|u| !u.is_empty())
    }

    pub fn has_uri(&self) -> bool {
        self.uri().is_some()
    }

    pub fn set_uri(&mut self, uri: impl Into<String>) {
        self.uri = Some(uri.into());
    }
}

/// Instances of one file, at most one per backend kind
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FileInstances(BTreeMap<BackendKind, FileInstance>);

impl FileInstances {
    pub fn get(&self, kind: BackendKind) -> Option<&FileInstance> {
        self.0.get(&kind)
    }

    pub fn get_mut(&mut self, kind: BackendKind) -> Option<&mut FileInstance> {
        self.0.get_mut(&kind)
    }

    pub fn contains(&self, kind: BackendKind) -> bool {
        self.0.contains_key(&kind)
    }

    /// Insert or replace the instance for its kind, returning the previous one.
    pub fn insert(&mut self, instance: FileInstance) -> Option<FileInstance> {
        self.0.insert(instance.kind, instance)
    }

    pub fn get_or_create(&mut self, kind: BackendKind) -> &mut FileInstance {
        self.0.entry(kind).or_insert_with(|| FileInstance::new(kind))
    }

    pub fn remove(&mut self, kind: BackendKind) -> Option<FileInstance> {
        self.0.remove(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileInstance> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<FileInstance> for FileInstances {
    fn from_iter<I: IntoIterator<Item = FileInstance>>(iter: I) -> Self {
        let mut instances = FileInstances::default();
        for instance in iter {
            instances.insert(instance);
        }
        instances
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_backend_kind_accepts_legacy_names() {
        assert_eq!(BackendKind::parse("public-files-s3").unwrap(), BackendKind::ObjectStore);
        assert_eq!(BackendKind::parse("filepicker").unwrap(), BackendKind::BlobCdn);
        assert_eq!(BackendKind::parse("filestack-pending").unwrap(), BackendKind::BlobCdnPending);
        assert_eq!(BackendKind::parse("gmail-api").unwrap(), BackendKind::RemoteProviderB);
        for kind in BackendKind::ALL {
            assert_eq!(BackendKind::parse(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_backend_kind_is_an_error() {
        let err = BackendKind::parse("dropbox").unwrap_err();
        assert!(matches!(err, AppError::UnknownBackendKind(s) if s == "dropbox"));
    }

    #[test]
    fn test_instance_serializes_to_persisted_layout() {
        let instance = FileInstance::new(BackendKind::BlobCdn)
            .with_uri("https://www.filestackapi.com/api/file/abc")
            .with_payload(InstancePayload::blob_cdn(
                BlobCdnMetadata {
                    size: Some(12),
                    ..Default::default()
                },
                Some("key".into()),
            ));
        let value = serde_json::to_value(&instance).unwrap();
        assert_eq!(value["storageComponentKind"], "blob-cdn");
        assert_eq!(value["opaquePayload"]["payloadKind"], "blob-cdn");
        assert_eq!(value["opaquePayload"]["fpfile"]["size"], 12);
    }

    #[test]
    fn test_untagged_rows_read_as_legacy() {
        let payload = InstancePayload::from_stored(Some(
            r#"{"fpfile":{"size":7,"mimetype":"text/plain"},"fpkey":"k"}"#,
        ));
        assert!(matches!(payload, InstancePayload::Legacy(_)));
        let meta = payload.blob_cdn_metadata().unwrap();
        assert_eq!(meta.size, Some(7));
        assert_eq!(meta.mimetype.as_deref(), Some("text/plain"));

        let garbage = InstancePayload::from_stored(Some("not json"));
        assert_eq!(garbage, InstancePayload::Legacy(json!("not json")));
        assert!(InstancePayload::from_stored(None).is_none());
    }

    #[test]
    fn test_one_instance_per_kind() {
        let mut instances = FileInstances::default();
        instances.insert(FileInstance::new(BackendKind::Local).with_uri("a"));
        let previous = instances.insert(FileInstance::new(BackendKind::Local).with_uri("b"));
        assert_eq!(previous.unwrap().uri(), Some("a"));
        assert_eq!(instances.len(), 1);
        assert_eq!(instances.get(BackendKind::Local).unwrap().uri(), Some("b"));
    }

    #[test]
    fn test_empty_uri_is_no_claim() {
        let instance = FileInstance::new(BackendKind::ObjectStore).with_uri("");
        assert!(!instance.has_uri());
    }
}
