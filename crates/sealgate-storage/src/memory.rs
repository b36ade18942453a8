//! Versioned in-memory [`ObjectStore`] with fault injection

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::{ObjectNotFound, ObjectStat, ObjectStore, ObjectVersion, PutResult};

struct Version {
    id: String,
    /// `None` marks a delete marker
    body: Option<Vec<u8>>,
    checksum: String,
}

/// Buckets map keys to their version history, oldest first.
#[derive(Default)]
pub struct MemoryObjectStore {
    buckets: Mutex<HashMap<String, BTreeMap<String, Vec<Version>>>>,
    fail_puts: AtomicBool,
    fail_gets: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every put (and restore) fail until cleared.
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_gets(&self, fail: bool) {
        self.fail_gets.store(fail, Ordering::SeqCst);
    }

    /// Live (non delete-marked) object count in `bucket`
    pub fn live_count(&self, bucket: &str) -> usize {
        self.buckets
            .lock()
            .get(bucket)
            .map(|keys| {
                keys.values()
                    .filter(|v| v.last().is_some_and(|latest| latest.body.is_some()))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Rewrite the latest version's body in place, keeping its version id.
    /// Returns false when there is no live object at `key`.
    pub fn tamper(&self, bucket: &str, key: &str, edit: impl FnOnce(&mut Vec<u8>)) -> bool {
        let mut buckets = self.buckets.lock();
        let Some(body) = buckets
            .get_mut(bucket)
            .and_then(|keys| keys.get_mut(key))
            .and_then(|versions| versions.last_mut())
            .and_then(|latest| latest.body.as_mut())
        else {
            return false;
        };
        edit(body);
        true
    }

    fn location(bucket: &str, key: &str) -> String {
        format!("memory://{bucket}/{key}")
    }

    fn push_version(&self, bucket: &str, key: &str, body: Vec<u8>) -> PutResult {
        let checksum = hex::encode(Sha256::digest(&body));
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.buckets
            .lock()
            .entry(bucket.to_owned())
            .or_default()
            .entry(key.to_owned())
            .or_default()
            .push(Version {
                id: id.clone(),
                body: Some(body),
                checksum: checksum.clone(),
            });
        PutResult {
            version_id: id,
            location: Self::location(bucket, key),
            checksum,
            is_latest: true,
            is_delete_marker: false,
        }
    }
}

fn not_found(bucket: &str, key: &str) -> anyhow::Error {
    ObjectNotFound {
        bucket: bucket.to_owned(),
        key: key.to_owned(),
    }
    .into()
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<PutResult> {
        if self.fail_puts.load(Ordering::SeqCst) {
            anyhow::bail!("injected: put {bucket}/{key} failed");
        }
        Ok(self.push_version(bucket, key, body))
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        if self.fail_gets.load(Ordering::SeqCst) {
            anyhow::bail!("injected: get {bucket}/{key} failed");
        }
        let buckets = self.buckets.lock();
        buckets
            .get(bucket)
            .and_then(|keys| keys.get(key))
            .and_then(|versions| versions.last())
            .and_then(|latest| latest.body.clone())
            .ok_or_else(|| not_found(bucket, key))
    }

    async fn get_version(&self, bucket: &str, key: &str, version_id: &str) -> Result<Vec<u8>> {
        if self.fail_gets.load(Ordering::SeqCst) {
            anyhow::bail!("injected: get {bucket}/{key}@{version_id} failed");
        }
        let buckets = self.buckets.lock();
        buckets
            .get(bucket)
            .and_then(|keys| keys.get(key))
            .and_then(|versions| versions.iter().find(|v| v.id == version_id))
            .and_then(|v| v.body.clone())
            .ok_or_else(|| not_found(bucket, key))
    }

    async fn stat(&self, bucket: &str, key: &str) -> Result<ObjectStat> {
        let buckets = self.buckets.lock();
        let latest = buckets
            .get(bucket)
            .and_then(|keys| keys.get(key))
            .and_then(|versions| versions.last());
        Ok(match latest {
            Some(v) => ObjectStat {
                exists: v.body.is_some(),
                version_id: v.id.clone(),
                is_delete_marker: v.body.is_none(),
                checksum: v.checksum.clone(),
            },
            None => ObjectStat::default(),
        })
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let mut buckets = self.buckets.lock();
        let Some(versions) = buckets.get_mut(bucket).and_then(|keys| keys.get_mut(key)) else {
            return Ok(());
        };
        if versions.last().is_some_and(|latest| latest.body.is_some()) {
            versions.push(Version {
                id: uuid::Uuid::new_v4().simple().to_string(),
                body: None,
                checksum: String::new(),
            });
        }
        Ok(())
    }

    async fn restore(&self, bucket: &str, key: &str, version_id: &str) -> Result<PutResult> {
        if self.fail_puts.load(Ordering::SeqCst) {
            anyhow::bail!("injected: restore {bucket}/{key} failed");
        }
        let body = {
            let buckets = self.buckets.lock();
            buckets
                .get(bucket)
                .and_then(|keys| keys.get(key))
                .and_then(|versions| versions.iter().find(|v| v.id == version_id))
                .and_then(|v| v.body.clone())
                .ok_or_else(|| not_found(bucket, key))?
        };
        Ok(self.push_version(bucket, key, body))
    }

    async fn list(&self, bucket: &str) -> Result<Vec<String>> {
        let buckets = self.buckets.lock();
        Ok(buckets
            .get(bucket)
            .map(|keys| {
                keys.iter()
                    .filter(|(_, v)| v.last().is_some_and(|latest| latest.body.is_some()))
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_versions(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectVersion>> {
        let buckets = self.buckets.lock();
        let Some(keys) = buckets.get(bucket) else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for (key, versions) in keys.iter().filter(|(k, _)| k.starts_with(prefix)) {
            let last = versions.len().saturating_sub(1);
            for (i, v) in versions.iter().enumerate().rev() {
                out.push(ObjectVersion {
                    key: key.clone(),
                    version_id: v.id.clone(),
                    is_latest: i == last,
                    is_delete_marker: v.body.is_none(),
                    size: v.body.as_ref().map(|b| b.len() as u64).unwrap_or(0),
                });
            }
        }
        Ok(out)
    }

    async fn check_health(&self, _bucket: &str) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::is_not_found;

    #[tokio::test]
    async fn test_put_get_versions() {
        let store = MemoryObjectStore::new();
        let first = store.put("b", "k.enc", b"one".to_vec()).await.unwrap();
        let second = store.put_replace("b", "k.enc", b"two".to_vec()).await.unwrap();
        assert_ne!(first.version_id, second.version_id);
        assert_eq!(second.location, "memory://b/k.enc");
        assert_eq!(store.get("b", "k.enc").await.unwrap(), b"two");
        assert_eq!(store.list_versions("b", "k").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_get_version_reads_superseded_content() {
        let store = MemoryObjectStore::new();
        let first = store.put("b", "k.enc", b"one".to_vec()).await.unwrap();
        let second = store.put_replace("b", "k.enc", b"two".to_vec()).await.unwrap();
        assert_eq!(store.get_version("b", "k.enc", &first.version_id).await.unwrap(), b"one");
        assert_eq!(store.get_version("b", "k.enc", &second.version_id).await.unwrap(), b"two");

        let err = store.get_version("b", "k.enc", "no-such-version").await.unwrap_err();
        assert!(is_not_found(&err));
    }

    #[tokio::test]
    async fn test_delete_and_restore() {
        let store = MemoryObjectStore::new();
        let put = store.put("b", "k.enc", b"data".to_vec()).await.unwrap();
        store.delete("b", "k.enc").await.unwrap();

        let stat = store.stat("b", "k.enc").await.unwrap();
        assert!(!stat.exists);
        assert!(stat.is_delete_marker);
        let err = store.get("b", "k.enc").await.unwrap_err();
        assert!(is_not_found(&err));
        assert!(store.list("b").await.unwrap().is_empty());

        store.restore("b", "k.enc", &put.version_id).await.unwrap();
        assert_eq!(store.get("b", "k.enc").await.unwrap(), b"data");
        assert!(store.stat("b", "k.enc").await.unwrap().exists);
        assert_eq!(store.live_count("b"), 1);
    }

    #[tokio::test]
    async fn test_stat_absent_is_not_an_error() {
        let store = MemoryObjectStore::new();
        let stat = store.stat("b", "nope").await.unwrap();
        assert_eq!(stat, ObjectStat::default());
        assert!(store.restore("b", "nope", "v1").await.is_err());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = MemoryObjectStore::new();
        tokio_test::block_on(async {
            store.delete("b", "absent.enc").await.unwrap();
            store.put("b", "k.enc", b"x".to_vec()).await.unwrap();
            store.delete("b", "k.enc").await.unwrap();
            store.delete("b", "k.enc").await.unwrap();
        });
        // one data version plus a single delete marker
        let versions = tokio_test::block_on(store.list_versions("b", "k")).unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions[0].is_delete_marker && versions[0].is_latest);
        assert_eq!(store.live_count("b"), 0);
    }

    #[tokio::test]
    async fn test_fail_puts() {
        let store = MemoryObjectStore::new();
        store.set_fail_puts(true);
        assert!(store.put("b", "k", b"x".to_vec()).await.is_err());
        assert_eq!(store.live_count("b"), 0);
        store.set_fail_puts(false);
        assert!(store.put("b", "k", b"x".to_vec()).await.is_ok());
    }
}
