use std::collections::HashMap;

use chrono::Utc;
use sealgate_core::types::{
    ActorType, AuditAction, AuditEntry, CryptoMetadata, FileRecord, ListQuery,
};
use sealgate_core::GatewayError;
use sealgate_meta::{AdminDirectory, AppDirectory, AuditLog, MemoryStore, MetadataStore};
use uuid::Uuid;

fn file(app_id: Uuid, name: &str, size: i64) -> FileRecord {
    let now = Utc::now();
    FileRecord {
        id: Uuid::new_v4(),
        name: name.into(),
        app_id,
        mime_type: "text/plain; charset=utf-8".into(),
        size,
        location: format!("memory://sealgate/{name}"),
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}

fn meta(file_id: Uuid, key_uid: Option<&str>, enc_key: &str) -> CryptoMetadata {
    let now = Utc::now();
    CryptoMetadata {
        id: Uuid::new_v4(),
        file_id,
        hash: "qUiQTy8PR5uPgZdpSzAYSw0u0cHNKh7A+4XSmaGSpEc=".into(),
        enc_hash: None,
        key_uid: key_uid.map(String::from),
        enc_key: enc_key.into(),
        key_algo: "AES256-GCM".into(),
        version_id: "v1".into(),
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}

async fn seed(store: &MemoryStore, app_id: Uuid, name: &str, size: i64) -> FileRecord {
    let f = file(app_id, name, size);
    store
        .create_file_with_metadata(&f, &meta(f.id, None, "wrapped"))
        .await
        .unwrap();
    f
}

fn entry(action: AuditAction, ip: &str) -> AuditEntry {
    AuditEntry {
        actor_id: "client-a".into(),
        actor_type: ActorType::Client,
        file_id: None,
        action,
        ip: Some(ip.into()),
        user_agent: Some("curl/8".into()),
        metadata: serde_json::json!({}),
    }
}

#[tokio::test]
async fn test_create_and_fetch_scoped_by_app() {
    let store = MemoryStore::new();
    let app_a = Uuid::new_v4();
    let app_b = Uuid::new_v4();
    let f = seed(&store, app_a, "a.txt", 12).await;

    let stored = store.get_metadata_by_app_and_file(app_a, f.id).await.unwrap();
    assert_eq!(stored.file.name, "a.txt");
    assert_eq!(stored.meta.file_id, f.id);

    let err = store.get_metadata_by_app_and_file(app_b, f.id).await.unwrap_err();
    assert!(matches!(err, GatewayError::FileNotFound));

    let dup = store
        .create_file_with_metadata(&f, &meta(f.id, None, "wrapped"))
        .await
        .unwrap_err();
    assert!(matches!(dup, GatewayError::FileAlreadyExists));
}

#[tokio::test]
async fn test_delete_restore_cycle() {
    let store = MemoryStore::new();
    let app = Uuid::new_v4();
    let f = seed(&store, app, "doc.pdf", 100).await;

    store.delete(f.id).await.unwrap();
    assert!(matches!(
        store.get_metadata_by_app_and_file(app, f.id).await,
        Err(GatewayError::FileNotFound)
    ));
    let deleted = store.get_deleted_metadata_by_app_and_file(app, f.id).await.unwrap();
    assert!(deleted.file.is_deleted());
    assert!(deleted.meta.deleted_at.is_some());

    // Deleting twice is not an error; the file existed
    store.delete(f.id).await.unwrap();

    store.restore(f.id).await.unwrap();
    assert!(store.get_metadata_by_app_and_file(app, f.id).await.is_ok());
    assert!(matches!(store.restore(f.id).await, Err(GatewayError::FileNotFound)));

    assert!(matches!(
        store.delete(Uuid::new_v4()).await,
        Err(GatewayError::FileNotFound)
    ));
}

#[tokio::test]
async fn test_update_requires_live_file() {
    let store = MemoryStore::new();
    let app = Uuid::new_v4();
    let mut f = seed(&store, app, "a.txt", 1).await;

    f.name = "b.txt".into();
    f.size = 2;
    let mut m = meta(f.id, None, "rewrapped");
    m.version_id = "v2".into();
    store.update_file_and_metadata(&f, &m).await.unwrap();

    let stored = store.get_metadata_by_file(f.id).await.unwrap();
    assert_eq!(stored.file.name, "b.txt");
    assert_eq!(stored.meta.version_id, "v2");
    assert_eq!(stored.meta.enc_key, "rewrapped");

    store.delete(f.id).await.unwrap();
    assert!(matches!(
        store.update_file_and_metadata(&f, &m).await,
        Err(GatewayError::FileNotFound)
    ));
}

#[tokio::test]
async fn test_list_sorting_and_pagination() {
    let store = MemoryStore::new();
    let app = Uuid::new_v4();
    let other = Uuid::new_v4();
    seed(&store, app, "b.txt", 30).await;
    seed(&store, app, "a.txt", 10).await;
    seed(&store, app, "c.txt", 20).await;
    seed(&store, other, "z.txt", 99).await;

    let by_name = store
        .list_files(app, &ListQuery::new(0, 10).sorted("name", "asc"))
        .await
        .unwrap();
    let names: Vec<_> = by_name.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["a.txt", "b.txt", "c.txt"]);

    let by_size = store
        .list_files(app, &ListQuery::new(1, 1).sorted("size", "desc"))
        .await
        .unwrap();
    assert_eq!(by_size.len(), 1);
    assert_eq!(by_size[0].size, 20);

    // Unknown column falls back to the default instead of failing
    let fallback = store
        .list_files(app, &ListQuery::new(0, 10).sorted("size; DROP TABLE files", "asc"))
        .await
        .unwrap();
    assert_eq!(fallback.len(), 3);

    assert_eq!(store.list_files_all(&ListQuery::new(0, 0)).await.unwrap().len(), 4);
    assert_eq!(store.count_files(Some(app)).await.unwrap(), 3);
    assert_eq!(store.count_files(None).await.unwrap(), 4);
}

#[tokio::test]
async fn test_batch_update_enc_keys_by_key_uid() {
    let store = MemoryStore::new();
    let app = Uuid::new_v4();
    for (name, uid) in [("a", "uid-1"), ("b", "uid-1"), ("c", "uid-2")] {
        let f = file(app, name, 1);
        store
            .create_file_with_metadata(&f, &meta(f.id, Some(uid), ""))
            .await
            .unwrap();
    }
    seed(&store, app, "local", 1).await;

    let uids = store.all_key_uids().await.unwrap();
    assert_eq!(uids, ["uid-1", "uid-2"]);

    let wrapped = HashMap::from([("uid-1".to_string(), "wrapped-1".to_string())]);
    assert_eq!(store.batch_update_enc_keys(&wrapped).await.unwrap(), 2);

    let live = store.list_live_metadata().await.unwrap();
    let rewrapped = live.iter().filter(|s| s.meta.enc_key == "wrapped-1").count();
    assert_eq!(rewrapped, 2);
}

#[tokio::test]
async fn test_injected_write_failure() {
    let store = MemoryStore::new();
    store.set_fail_writes(true);
    let f = file(Uuid::new_v4(), "x", 1);
    let err = store
        .create_file_with_metadata(&f, &meta(f.id, None, "w"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Database(_)));
    assert_eq!(store.file_count(), 0);
}

#[tokio::test]
async fn test_audit_log_stamps_and_sorts() {
    let store = MemoryStore::new();
    store.create(&entry(AuditAction::Upload, "10.0.0.2")).await.unwrap();
    store.create(&entry(AuditAction::Download, "10.0.0.1")).await.unwrap();

    let newest_first = store.list_logs(&ListQuery::new(0, 10)).await.unwrap();
    assert_eq!(newest_first.len(), 2);
    assert_eq!(newest_first[0].entry.action, AuditAction::Download);
    assert!(newest_first[0].timestamp >= newest_first[1].timestamp);

    let by_ip = store
        .list_logs(&ListQuery::new(0, 10).sorted("ip", "asc"))
        .await
        .unwrap();
    assert_eq!(by_ip[0].entry.ip.as_deref(), Some("10.0.0.1"));

    store.set_fail_audit(true);
    assert!(store.create(&entry(AuditAction::Delete, "10.0.0.3")).await.is_err());
    assert_eq!(store.audit_entries().len(), 2);
}

#[tokio::test]
async fn test_app_and_admin_directories() {
    let store = MemoryStore::new();
    let id = store.register_app("client-a", "App A", true);
    store.add_admin("root");

    let app = store.find_app_by_client_id("client-a").await.unwrap();
    assert_eq!(app.id, id);
    assert!(app.is_active);
    assert!(matches!(
        store.find_app_by_client_id("nobody").await,
        Err(GatewayError::AppNotFound)
    ));

    store.set_app_active("client-a", false);
    assert!(!store.find_app_by_client_id("client-a").await.unwrap().is_active);
    assert_eq!(store.list_admin_ids().await.unwrap(), ["root"]);
}
