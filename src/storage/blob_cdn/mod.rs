//! Filestack-style blob CDN backend.

pub mod client;
pub mod provider;
pub mod security;

pub use client::{cdn_url, extract_handle, BlobCdnClient};
pub use provider::BlobCdnStorage;
pub use security::CdnSecurity;
