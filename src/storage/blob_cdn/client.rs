use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, Url};

use super::security::CdnSecurity;
use crate::config::BlobCdnConfig;
use crate::error::{AppError, Result};
use crate::models::BlobCdnMetadata;
use crate::storage::http::{check_status, download_remote_to_stream, stream_body};
use crate::storage::ByteStream;

/// Origin hosts and the CDN hosts that serve the same paths.
const CDN_HOSTS: [(&str, &str); 2] = [
    ("www.filestackapi.com", "cdn.filestackcontent.com"),
    ("www.filepicker.io", "cdn.filepicker.io"),
];

/// Rewrite an origin URL to its CDN host, then to `cdn.<custom_domain>` when set.
pub fn cdn_url(url: &str, custom_domain: Option<&str>) -> String {
    let mut cdn = url.to_string();
    for (origin, host) in CDN_HOSTS {
        cdn = cdn.replace(origin, host);
    }
    if let Some(domain) = custom_domain.filter(|d| !d.is_empty()) {
        let custom = format!("cdn.{}", domain);
        for (_, host) in CDN_HOSTS {
            cdn = cdn.replace(host, &custom);
        }
    }
    cdn
}

/// Handle from `.../api/file/<handle>` or `.../<handle>`.
pub fn extract_handle(url: &str) -> Result<String> {
    let parsed = Url::parse(url).map_err(|e| AppError::InvalidUrl(format!("{}: {}", url, e)))?;
    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.collect())
        .unwrap_or_default();

    let handle = match segments.as_slice() {
        ["api", "file", handle, ..] => Some(*handle),
        [handle] => Some(*handle),
        _ => None,
    };

    handle
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::InvalidUrl(format!("No blob CDN handle in {}", url)))
}

/// REST client for the blob CDN
#[derive(Debug, Clone)]
pub struct BlobCdnClient {
    api_key: String,
    api_base: String,
    custom_domain: Option<String>,
    security: Option<CdnSecurity>,
    http: Client,
}

impl BlobCdnClient {
    pub fn new(config: &BlobCdnConfig, http: Client) -> Self {
        let security = config
            .api_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|secret| CdnSecurity::new(secret, config.policy_ttl_seconds));
        Self {
            api_key: config.api_key.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            custom_domain: config.custom_domain.clone(),
            security,
            http,
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    fn sign(&self, url: &str) -> Result<String> {
        match &self.security {
            Some(security) => security.sign_url(url),
            None => Ok(url.to_string()),
        }
    }

    /// Signed CDN URL clients can be sent to.
    pub fn public_url(&self, url: &str) -> Result<String> {
        Ok(cdn_url(&self.sign(url)?, self.custom_domain.as_deref()))
    }

    pub async fn metadata(&self, handle: &str) -> Result<BlobCdnMetadata> {
        let url = self.sign(&format!("{}/api/file/{}/metadata", self.api_base, handle))?;
        let resp = self.http.get(&url).send().await.map_err(transport_error)?;
        let resp = check_status(resp, handle)?;
        Ok(resp.json().await?)
    }

    /// Upload new content; the response carries the new handle URL.
    pub async fn store(
        &self,
        data: ByteStream,
        size: Option<u64>,
        mimetype: Option<&str>,
        filename: Option<&str>,
    ) -> Result<BlobCdnMetadata> {
        let mut url = format!("{}/api/store/S3?key={}", self.api_base, self.api_key);
        if let Some(filename) = filename {
            url.push_str(&format!("&filename={}", urlencoding::encode(filename)));
        }
        if let Some(mimetype) = mimetype {
            url.push_str(&format!("&mimetype={}", urlencoding::encode(mimetype)));
        }
        self.post(&self.sign(&url)?, data, size, mimetype, "blob CDN store").await
    }

    /// Replace the content behind an existing handle.
    pub async fn overwrite(
        &self,
        handle: &str,
        data: ByteStream,
        size: Option<u64>,
    ) -> Result<BlobCdnMetadata> {
        let url = format!("{}/api/file/{}?key={}", self.api_base, handle, self.api_key);
        self.post(&self.sign(&url)?, data, size, None, handle).await
    }

    async fn post(
        &self,
        url: &str,
        data: ByteStream,
        size: Option<u64>,
        mimetype: Option<&str>,
        what: &str,
    ) -> Result<BlobCdnMetadata> {
        let mut req = self
            .http
            .post(url)
            .header(
                CONTENT_TYPE,
                mimetype.unwrap_or(mime::APPLICATION_OCTET_STREAM.essence_str()),
            )
            .body(stream_body(data));
        if let Some(size) = size {
            req = req.header(CONTENT_LENGTH, size);
        }
        let resp = req.send().await.map_err(transport_error)?;
        let resp = check_status(resp, what)?;
        Ok(resp.json().await?)
    }

    pub async fn download(&self, url: &str) -> Result<ByteStream> {
        download_remote_to_stream(&self.http, &self.public_url(url)?).await
    }
}

fn transport_error(e: reqwest::Error) -> AppError {
    if e.is_builder() {
        AppError::InvalidUrl(e.to_string())
    } else {
        AppError::Transport(e.to_string())
    }
}
