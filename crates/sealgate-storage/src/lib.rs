//! sealgate-storage: versioned object store for ciphertext blobs
//!
//! Objects are opaque. The store only promises that every put creates a new
//! version, that delete leaves older versions in place behind a delete
//! marker, and that any kept version can be brought back as latest.

pub mod health;
pub mod memory;
pub mod opendal_store;
pub mod operator;

pub use health::{check_health, is_healthy};
pub use memory::MemoryObjectStore;
pub use opendal_store::OpendalStore;
pub use operator::{build_from_core_config, build_operator, S3Settings};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Content type of every ciphertext object
pub const CONTENT_TYPE: &str = "application/octet-stream";

/// Version id reported when the backend does not version objects
pub const NULL_VERSION: &str = "null";

/// Outcome of a put
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResult {
    pub version_id: String,
    pub location: String,
    pub checksum: String,
    pub is_latest: bool,
    pub is_delete_marker: bool,
}

/// `exists == false` is the not-found answer; it is not an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStat {
    pub exists: bool,
    pub version_id: String,
    pub is_delete_marker: bool,
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectVersion {
    pub key: String,
    pub version_id: String,
    pub is_latest: bool,
    pub is_delete_marker: bool,
    pub size: u64,
}

/// Returned (inside `anyhow::Error`) when an object or version is absent.
#[derive(Debug, thiserror::Error)]
#[error("object not found: {bucket}/{key}")]
pub struct ObjectNotFound {
    pub bucket: String,
    pub key: String,
}

/// True if `err` is, or wraps, an [`ObjectNotFound`].
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<ObjectNotFound>())
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<PutResult>;

    /// Latest version. Fails if absent or if the latest version is a delete marker.
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// One specific version, even if it is no longer the latest. Fails if
    /// that version is absent or is a delete marker.
    async fn get_version(&self, bucket: &str, key: &str, version_id: &str) -> Result<Vec<u8>>;

    async fn stat(&self, bucket: &str, key: &str) -> Result<ObjectStat>;

    /// Replace the content of an existing key; the backend keeps the old version.
    async fn put_replace(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<PutResult> {
        self.put(bucket, key, body).await
    }

    /// Soft delete: a delete marker hides the object, versions are kept.
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;

    /// Make `version_id` the latest version again.
    async fn restore(&self, bucket: &str, key: &str, version_id: &str) -> Result<PutResult>;

    /// Keys whose latest version is live.
    async fn list(&self, bucket: &str) -> Result<Vec<String>>;

    async fn list_versions(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectVersion>>;

    /// Cheap reachability probe for readiness checks.
    async fn check_health(&self, bucket: &str) -> Result<()>;
}
