//! [`ObjectStore`] over OpenDAL operators, one per bucket

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use opendal::{EntryMode, ErrorKind, Metadata, Operator};
use parking_lot::RwLock;

use crate::operator::{build_operator, S3Settings};
use crate::{
    health, ObjectNotFound, ObjectStat, ObjectStore, ObjectVersion, PutResult, CONTENT_TYPE,
    NULL_VERSION,
};

pub struct OpendalStore {
    settings: Option<S3Settings>,
    operators: RwLock<HashMap<String, Operator>>,
    location_base: String,
}

impl OpendalStore {
    /// Operators are built lazily per bucket from `settings`.
    pub fn s3(settings: S3Settings) -> Self {
        let location_base = settings.endpoint.trim_end_matches('/').to_owned();
        Self {
            settings: Some(settings),
            operators: RwLock::new(HashMap::new()),
            location_base,
        }
    }

    /// Serve exactly one bucket from a ready operator.
    pub fn with_operator(bucket: &str, op: Operator, location_base: &str) -> Self {
        let mut operators = HashMap::new();
        operators.insert(bucket.to_owned(), op);
        Self {
            settings: None,
            operators: RwLock::new(operators),
            location_base: location_base.trim_end_matches('/').to_owned(),
        }
    }

    fn operator(&self, bucket: &str) -> Result<Operator> {
        if let Some(op) = self.operators.read().get(bucket) {
            return Ok(op.clone());
        }
        let settings = self
            .settings
            .as_ref()
            .with_context(|| format!("no operator configured for bucket {bucket}"))?;
        let op = build_operator(&settings.for_bucket(bucket))?;
        self.operators
            .write()
            .entry(bucket.to_owned())
            .or_insert_with(|| op.clone());
        Ok(op)
    }

    fn location(&self, bucket: &str, key: &str) -> String {
        format!("{}/{bucket}/{key}", self.location_base)
    }

    fn put_result(&self, bucket: &str, key: &str, meta: &Metadata) -> PutResult {
        PutResult {
            version_id: meta.version().unwrap_or(NULL_VERSION).to_owned(),
            location: self.location(bucket, key),
            checksum: checksum_of(meta),
            is_latest: meta.is_current().unwrap_or(true),
            is_delete_marker: meta.is_deleted(),
        }
    }

    fn versions_supported(op: &Operator) -> bool {
        let cap = op.info().full_capability();
        cap.read_with_version && cap.list_with_versions
    }
}

fn checksum_of(meta: &Metadata) -> String {
    meta.content_md5()
        .or_else(|| meta.etag())
        .map(|s| s.trim_matches('"').to_owned())
        .unwrap_or_default()
}

fn not_found(bucket: &str, key: &str) -> anyhow::Error {
    ObjectNotFound {
        bucket: bucket.to_owned(),
        key: key.to_owned(),
    }
    .into()
}

#[async_trait]
impl ObjectStore for OpendalStore {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<PutResult> {
        let op = self.operator(bucket)?;
        let size = body.len();
        let meta = op
            .write_with(key, body)
            .content_type(CONTENT_TYPE)
            .await
            .with_context(|| format!("put {bucket}/{key}"))?;
        let result = self.put_result(bucket, key, &meta);
        tracing::debug!(bucket, key, size, version_id = %result.version_id, "object stored");
        Ok(result)
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let op = self.operator(bucket)?;
        match op.read(key).await {
            Ok(buf) => Ok(buf.to_vec()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found(bucket, key)),
            Err(e) => Err(anyhow::Error::new(e).context(format!("get {bucket}/{key}"))),
        }
    }

    async fn get_version(&self, bucket: &str, key: &str, version_id: &str) -> Result<Vec<u8>> {
        let op = self.operator(bucket)?;
        // Unversioned backends keep exactly one version
        if version_id == NULL_VERSION || !Self::versions_supported(&op) {
            return self.get(bucket, key).await;
        }
        match op.read_with(key).version(version_id).await {
            Ok(buf) => Ok(buf.to_vec()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(not_found(bucket, key)),
            Err(e) => Err(anyhow::Error::new(e)
                .context(format!("get {bucket}/{key} version {version_id}"))),
        }
    }

    async fn stat(&self, bucket: &str, key: &str) -> Result<ObjectStat> {
        let op = self.operator(bucket)?;
        match op.stat(key).await {
            Ok(meta) => Ok(ObjectStat {
                exists: !meta.is_deleted(),
                version_id: meta.version().unwrap_or(NULL_VERSION).to_owned(),
                is_delete_marker: meta.is_deleted(),
                checksum: checksum_of(&meta),
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // A HEAD on a delete-marked key answers 404; the version list tells them apart
                if Self::versions_supported(&op) {
                    let versions = self.list_versions(bucket, key).await?;
                    if let Some(latest) = versions.iter().find(|v| v.key == key && v.is_latest) {
                        return Ok(ObjectStat {
                            exists: false,
                            version_id: latest.version_id.clone(),
                            is_delete_marker: latest.is_delete_marker,
                            checksum: String::new(),
                        });
                    }
                }
                Ok(ObjectStat::default())
            }
            Err(e) => Err(anyhow::Error::new(e).context(format!("stat {bucket}/{key}"))),
        }
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let op = self.operator(bucket)?;
        op.delete(key)
            .await
            .with_context(|| format!("delete {bucket}/{key}"))?;
        tracing::debug!(bucket, key, "object delete-marked");
        Ok(())
    }

    async fn restore(&self, bucket: &str, key: &str, version_id: &str) -> Result<PutResult> {
        let op = self.operator(bucket)?;
        if !Self::versions_supported(&op) {
            anyhow::bail!("backend for bucket {bucket} does not keep object versions");
        }
        let body = self.get_version(bucket, key, version_id).await?;
        let result = self.put(bucket, key, body).await?;
        tracing::info!(bucket, key, from = version_id, to = %result.version_id, "object version restored");
        Ok(result)
    }

    async fn list(&self, bucket: &str) -> Result<Vec<String>> {
        let op = self.operator(bucket)?;
        let entries = op
            .list_with("")
            .recursive(true)
            .await
            .with_context(|| format!("list {bucket}"))?;
        let mut keys: Vec<String> = entries
            .into_iter()
            .filter(|e| e.metadata().mode() == EntryMode::FILE)
            .map(|e| e.path().to_owned())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn list_versions(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectVersion>> {
        let op = self.operator(bucket)?;
        let entries = if Self::versions_supported(&op) {
            op.list_with(prefix)
                .recursive(true)
                .versions(true)
                .deleted(true)
                .await
        } else {
            op.list_with(prefix).recursive(true).await
        }
        .with_context(|| format!("list versions {bucket}/{prefix}"))?;

        Ok(entries
            .into_iter()
            .filter(|e| e.metadata().mode() != EntryMode::DIR)
            .map(|e| {
                let meta = e.metadata();
                ObjectVersion {
                    key: e.path().to_owned(),
                    version_id: meta.version().unwrap_or(NULL_VERSION).to_owned(),
                    is_latest: meta.is_current().unwrap_or(true),
                    is_delete_marker: meta.is_deleted(),
                    size: meta.content_length(),
                }
            })
            .collect())
    }

    async fn check_health(&self, bucket: &str) -> Result<()> {
        let op = self.operator(bucket)?;
        health::check_health(&op).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_bucket_without_settings() {
        let op = Operator::new(opendal::services::Memory::default())
            .expect("memory operator")
            .finish();
        let store = OpendalStore::with_operator("files", op, "memory://local");
        assert!(store.operator("files").is_ok());
        assert!(store.operator("other").is_err());
        assert_eq!(store.location("files", "a.enc"), "memory://local/files/a.enc");
    }

    #[test]
    fn test_s3_builds_operators_lazily() {
        let store = OpendalStore::s3(S3Settings {
            endpoint: "http://localhost:9000/".into(),
            region: "us-east-1".into(),
            bucket: "files".into(),
            access_key_id: "k".into(),
            secret_access_key: "s".into(),
        });
        assert!(store.operator("archive").is_ok());
        assert_eq!(store.location("archive", "x.enc"), "http://localhost:9000/archive/x.enc");
    }
}
