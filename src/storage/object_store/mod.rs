//! S3/COS-compatible object store backend.

pub mod client;
pub mod provider;
pub mod signer;

pub use client::ObjectStoreClient;
pub use provider::ObjectStoreStorage;
