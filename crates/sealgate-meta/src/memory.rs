//! In-memory implementation of every meta trait, with fault injection

use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use sealgate_core::types::{
    App, AuditEntry, AuditRecord, CryptoMetadata, FileRecord, ListQuery, StoredFile,
};
use sealgate_core::{GatewayError, GatewayResult};
use uuid::Uuid;

use crate::sort::{resolve, Direction, SortEntity};
use crate::{AdminDirectory, AppDirectory, AuditLog, MetadataStore};

#[derive(Default)]
struct Tables {
    files: HashMap<Uuid, FileRecord>,
    /// Keyed by `file_id`
    metadata: HashMap<Uuid, CryptoMetadata>,
    logs: Vec<AuditRecord>,
    apps: HashMap<String, App>,
    admins: BTreeSet<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    fail_writes: AtomicBool,
    fail_audit: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an application; returns its id.
    pub fn register_app(&self, client_id: &str, name: &str, is_active: bool) -> Uuid {
        let app = App {
            id: Uuid::new_v4(),
            client_id: client_id.to_owned(),
            name: name.to_owned(),
            is_active,
        };
        let id = app.id;
        self.tables.write().apps.insert(client_id.to_owned(), app);
        id
    }

    pub fn set_app_active(&self, client_id: &str, is_active: bool) {
        if let Some(app) = self.tables.write().apps.get_mut(client_id) {
            app.is_active = is_active;
        }
    }

    pub fn add_admin(&self, admin_id: &str) {
        self.tables.write().admins.insert(admin_id.to_owned());
    }

    /// Make every metadata write fail until cleared.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every audit append fail until cleared.
    pub fn set_fail_audit(&self, fail: bool) {
        self.fail_audit.store(fail, Ordering::SeqCst);
    }

    /// Raw row access for tests, deleted rows included.
    pub fn raw_metadata(&self, file_id: Uuid) -> Option<CryptoMetadata> {
        self.tables.read().metadata.get(&file_id).cloned()
    }

    pub fn file_count(&self) -> usize {
        self.tables.read().files.len()
    }

    pub fn audit_entries(&self) -> Vec<AuditRecord> {
        self.tables.read().logs.clone()
    }

    fn check_writable(&self) -> GatewayResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(GatewayError::Database("injected: metadata write failed".into()));
        }
        Ok(())
    }

    fn stored(tables: &Tables, file_id: Uuid) -> Option<StoredFile> {
        let file = tables.files.get(&file_id)?;
        let meta = tables.metadata.get(&file_id)?;
        Some(StoredFile {
            file: file.clone(),
            meta: meta.clone(),
        })
    }

    fn is_live(stored: &StoredFile) -> bool {
        !stored.file.is_deleted() && stored.meta.deleted_at.is_none()
    }

    fn list_where(&self, app_id: Option<Uuid>, query: &ListQuery) -> Vec<FileRecord> {
        let sort = resolve(SortEntity::Files, query.sort_by.as_deref(), query.order.as_deref());
        let tables = self.tables.read();
        let mut files: Vec<FileRecord> = tables
            .files
            .values()
            .filter(|f| !f.is_deleted())
            .filter(|f| app_id.map_or(true, |a| f.app_id == a))
            .cloned()
            .collect();

        files.sort_by(|a, b| {
            let primary = match sort.column {
                "name" => a.name.cmp(&b.name),
                "size" => a.size.cmp(&b.size),
                _ => a.created_at.cmp(&b.created_at),
            };
            apply_direction(primary.then_with(|| a.id.cmp(&b.id)), sort.direction)
        });
        paginate(files, query)
    }
}

fn apply_direction(ord: CmpOrdering, direction: Direction) -> CmpOrdering {
    match direction {
        Direction::Asc => ord,
        Direction::Desc => ord.reverse(),
    }
}

fn paginate<T>(items: Vec<T>, query: &ListQuery) -> Vec<T> {
    items
        .into_iter()
        .skip(query.effective_offset() as usize)
        .take(query.effective_limit() as usize)
        .collect()
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn create_file_with_metadata(
        &self,
        file: &FileRecord,
        meta: &CryptoMetadata,
    ) -> GatewayResult<()> {
        self.check_writable()?;
        let mut tables = self.tables.write();
        if tables.files.contains_key(&file.id) {
            return Err(GatewayError::FileAlreadyExists);
        }
        let now = Utc::now();
        let mut file = file.clone();
        file.created_at = now;
        file.updated_at = now;
        let mut meta = meta.clone();
        meta.file_id = file.id;
        meta.created_at = now;
        meta.updated_at = now;
        tables.metadata.insert(file.id, meta);
        tables.files.insert(file.id, file);
        Ok(())
    }

    async fn get_metadata_by_app_and_file(
        &self,
        app_id: Uuid,
        file_id: Uuid,
    ) -> GatewayResult<StoredFile> {
        let tables = self.tables.read();
        Self::stored(&tables, file_id)
            .filter(|s| s.file.app_id == app_id && Self::is_live(s))
            .ok_or(GatewayError::FileNotFound)
    }

    async fn get_deleted_metadata_by_app_and_file(
        &self,
        app_id: Uuid,
        file_id: Uuid,
    ) -> GatewayResult<StoredFile> {
        let tables = self.tables.read();
        Self::stored(&tables, file_id)
            .filter(|s| s.file.app_id == app_id)
            .ok_or(GatewayError::FileNotFound)
    }

    async fn get_metadata_by_file(&self, file_id: Uuid) -> GatewayResult<StoredFile> {
        let tables = self.tables.read();
        Self::stored(&tables, file_id)
            .filter(Self::is_live)
            .ok_or(GatewayError::FileNotFound)
    }

    async fn update_file_and_metadata(
        &self,
        file: &FileRecord,
        meta: &CryptoMetadata,
    ) -> GatewayResult<()> {
        self.check_writable()?;
        let mut tables = self.tables.write();
        let live = Self::stored(&tables, file.id).is_some_and(|s| Self::is_live(&s));
        if !live {
            return Err(GatewayError::FileNotFound);
        }
        let now = Utc::now();
        if let Some(row) = tables.files.get_mut(&file.id) {
            row.name = file.name.clone();
            row.mime_type = file.mime_type.clone();
            row.size = file.size;
            row.location = file.location.clone();
            row.updated_at = now;
        }
        if let Some(row) = tables.metadata.get_mut(&file.id) {
            row.hash = meta.hash.clone();
            row.enc_hash = meta.enc_hash.clone();
            row.key_uid = meta.key_uid.clone();
            row.enc_key = meta.enc_key.clone();
            row.key_algo = meta.key_algo.clone();
            row.version_id = meta.version_id.clone();
            row.updated_at = now;
        }
        Ok(())
    }

    async fn delete(&self, file_id: Uuid) -> GatewayResult<()> {
        self.check_writable()?;
        let mut tables = self.tables.write();
        if !tables.files.contains_key(&file_id) {
            return Err(GatewayError::FileNotFound);
        }
        let now = Utc::now();
        if let Some(meta) = tables.metadata.get_mut(&file_id) {
            meta.deleted_at.get_or_insert(now);
        }
        if let Some(file) = tables.files.get_mut(&file_id) {
            file.deleted_at.get_or_insert(now);
        }
        Ok(())
    }

    async fn restore(&self, file_id: Uuid) -> GatewayResult<()> {
        self.check_writable()?;
        let mut tables = self.tables.write();
        let mut restored = false;
        if let Some(file) = tables.files.get_mut(&file_id) {
            restored |= file.deleted_at.take().is_some();
        }
        if let Some(meta) = tables.metadata.get_mut(&file_id) {
            restored |= meta.deleted_at.take().is_some();
        }
        if !restored {
            return Err(GatewayError::FileNotFound);
        }
        Ok(())
    }

    async fn list_files(&self, app_id: Uuid, query: &ListQuery) -> GatewayResult<Vec<FileRecord>> {
        Ok(self.list_where(Some(app_id), query))
    }

    async fn list_files_all(&self, query: &ListQuery) -> GatewayResult<Vec<FileRecord>> {
        Ok(self.list_where(None, query))
    }

    async fn count_files(&self, app_id: Option<Uuid>) -> GatewayResult<i64> {
        let tables = self.tables.read();
        let count = tables
            .files
            .values()
            .filter(|f| !f.is_deleted())
            .filter(|f| app_id.map_or(true, |a| f.app_id == a))
            .count();
        Ok(count as i64)
    }

    async fn all_key_uids(&self) -> GatewayResult<Vec<String>> {
        let tables = self.tables.read();
        let uids: BTreeSet<String> = tables
            .metadata
            .values()
            .filter_map(|m| m.key_uid.clone())
            .filter(|uid| !uid.is_empty())
            .collect();
        Ok(uids.into_iter().collect())
    }

    async fn batch_update_enc_keys(&self, wrapped: &HashMap<String, String>) -> GatewayResult<u64> {
        self.check_writable()?;
        let mut tables = self.tables.write();
        let now = Utc::now();
        let mut updated = 0;
        for meta in tables.metadata.values_mut() {
            let Some(enc_key) = meta.key_uid.as_ref().and_then(|uid| wrapped.get(uid)) else {
                continue;
            };
            meta.enc_key = enc_key.clone();
            meta.updated_at = now;
            updated += 1;
        }
        Ok(updated)
    }

    async fn list_live_metadata(&self) -> GatewayResult<Vec<StoredFile>> {
        let tables = self.tables.read();
        let mut live: Vec<StoredFile> = tables
            .files
            .keys()
            .filter_map(|id| Self::stored(&tables, *id))
            .filter(Self::is_live)
            .collect();
        live.sort_by(|a, b| {
            a.file
                .created_at
                .cmp(&b.file.created_at)
                .then_with(|| a.file.id.cmp(&b.file.id))
        });
        Ok(live)
    }
}

#[async_trait]
impl AuditLog for MemoryStore {
    async fn create(&self, entry: &AuditEntry) -> GatewayResult<()> {
        if self.fail_audit.load(Ordering::SeqCst) {
            return Err(GatewayError::Database("injected: audit append failed".into()));
        }
        let mut tables = self.tables.write();
        let id = tables.logs.len() as i64 + 1;
        tables.logs.push(AuditRecord {
            id,
            timestamp: Utc::now(),
            entry: entry.clone(),
        });
        Ok(())
    }

    async fn list_logs(&self, query: &ListQuery) -> GatewayResult<Vec<AuditRecord>> {
        let sort = resolve(SortEntity::Logs, query.sort_by.as_deref(), query.order.as_deref());
        let mut logs = self.tables.read().logs.clone();
        logs.sort_by(|a, b| {
            let primary = match sort.column {
                "file_id" => a.entry.file_id.cmp(&b.entry.file_id),
                "action" => a.entry.action.as_str().cmp(b.entry.action.as_str()),
                "ip" => a.entry.ip.cmp(&b.entry.ip),
                "user_agent" => a.entry.user_agent.cmp(&b.entry.user_agent),
                _ => a.timestamp.cmp(&b.timestamp),
            };
            apply_direction(primary.then_with(|| a.id.cmp(&b.id)), sort.direction)
        });
        Ok(paginate(logs, query))
    }
}

#[async_trait]
impl AppDirectory for MemoryStore {
    async fn find_app_by_client_id(&self, client_id: &str) -> GatewayResult<App> {
        self.tables
            .read()
            .apps
            .get(client_id)
            .cloned()
            .ok_or(GatewayError::AppNotFound)
    }
}

#[async_trait]
impl AdminDirectory for MemoryStore {
    async fn list_admin_ids(&self) -> GatewayResult<Vec<String>> {
        Ok(self.tables.read().admins.iter().cloned().collect())
    }
}
