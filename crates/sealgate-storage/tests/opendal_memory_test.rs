//! OpendalStore against OpenDAL's in-memory service.
//!
//! The memory service keeps no versions: puts report the "null" version and
//! restore is refused.

use opendal::Operator;
use sealgate_storage::{is_not_found, ObjectStore, OpendalStore, NULL_VERSION};

fn memory_store() -> OpendalStore {
    let op = Operator::new(opendal::services::Memory::default())
        .expect("memory operator")
        .finish();
    OpendalStore::with_operator("files", op, "memory://local")
}

#[tokio::test]
async fn put_get_stat_roundtrip() {
    let store = memory_store();
    let put = store
        .put("files", "abc.enc", b"ciphertext".to_vec())
        .await
        .unwrap();
    assert_eq!(put.version_id, NULL_VERSION);
    assert_eq!(put.location, "memory://local/files/abc.enc");
    assert!(put.is_latest);
    assert!(!put.is_delete_marker);

    assert_eq!(store.get("files", "abc.enc").await.unwrap(), b"ciphertext");

    let stat = store.stat("files", "abc.enc").await.unwrap();
    assert!(stat.exists);
    assert!(!stat.is_delete_marker);
}

#[tokio::test]
async fn missing_object() {
    let store = memory_store();
    let stat = store.stat("files", "missing.enc").await.unwrap();
    assert!(!stat.exists);

    let err = store.get("files", "missing.enc").await.unwrap_err();
    assert!(is_not_found(&err), "expected ObjectNotFound, got: {err:#}");
}

#[tokio::test]
async fn delete_and_list() {
    let store = memory_store();
    store.put("files", "a.enc", vec![1]).await.unwrap();
    store.put("files", "b.enc", vec![2]).await.unwrap();
    assert_eq!(
        store.list("files").await.unwrap(),
        vec!["a.enc".to_string(), "b.enc".to_string()]
    );

    store.delete("files", "a.enc").await.unwrap();
    assert_eq!(store.list("files").await.unwrap(), vec!["b.enc".to_string()]);
    assert!(!store.stat("files", "a.enc").await.unwrap().exists);
}

#[tokio::test]
async fn restore_requires_versioning() {
    let store = memory_store();
    store.put("files", "a.enc", vec![1]).await.unwrap();
    let err = store
        .restore("files", "a.enc", NULL_VERSION)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("versions"));
}

#[tokio::test]
async fn health_check() {
    let store = memory_store();
    assert!(store.check_health("files").await.is_ok());
    assert!(store.check_health("other").await.is_err());
}

#[tokio::test]
async fn get_version_on_unversioned_backend_reads_latest() {
    let store = memory_store();
    let put = store.put("files", "a.enc", vec![1, 2]).await.unwrap();
    assert_eq!(
        store.get_version("files", "a.enc", &put.version_id).await.unwrap(),
        vec![1, 2]
    );
    let err = store
        .get_version("files", "gone.enc", NULL_VERSION)
        .await
        .unwrap_err();
    assert!(is_not_found(&err));
}
