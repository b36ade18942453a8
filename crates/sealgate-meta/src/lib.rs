//! sealgate-meta: relational state behind the pipeline
//!
//! Four seams, each with a PostgreSQL implementation ([`PgStore`]) and an
//! in-memory one ([`MemoryStore`]):
//!
//! - [`MetadataStore`]: file rows and their crypto metadata, always written
//!   together in one transaction
//! - [`AuditLog`]: append-only action log, timestamped by the store
//! - [`AppDirectory`]: client id to application lookup
//! - [`AdminDirectory`]: admin ids for the admin cache

pub mod memory;
pub mod postgres;
pub mod schema;
pub mod sort;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use sort::{resolve, Direction, Sort, SortEntity};

use std::collections::HashMap;

use async_trait::async_trait;
use sealgate_core::types::{App, AuditEntry, AuditRecord, CryptoMetadata, FileRecord, ListQuery, StoredFile};
use sealgate_core::GatewayResult;
use uuid::Uuid;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert the file row and its metadata row in one transaction.
    async fn create_file_with_metadata(
        &self,
        file: &FileRecord,
        meta: &CryptoMetadata,
    ) -> GatewayResult<()>;

    /// Live file of `app_id`. `FileNotFound` if missing, deleted, or owned by
    /// another application.
    async fn get_metadata_by_app_and_file(
        &self,
        app_id: Uuid,
        file_id: Uuid,
    ) -> GatewayResult<StoredFile>;

    /// Like [`get_metadata_by_app_and_file`](Self::get_metadata_by_app_and_file)
    /// but soft-deleted rows are returned too.
    async fn get_deleted_metadata_by_app_and_file(
        &self,
        app_id: Uuid,
        file_id: Uuid,
    ) -> GatewayResult<StoredFile>;

    /// Live file regardless of owner (admin path).
    async fn get_metadata_by_file(&self, file_id: Uuid) -> GatewayResult<StoredFile>;

    /// Update both rows of a live file in one transaction.
    async fn update_file_and_metadata(
        &self,
        file: &FileRecord,
        meta: &CryptoMetadata,
    ) -> GatewayResult<()>;

    /// Soft-delete both rows. `FileNotFound` only if the file never existed.
    async fn delete(&self, file_id: Uuid) -> GatewayResult<()>;

    /// Clear `deleted_at` on both rows. `FileNotFound` if neither is deleted.
    async fn restore(&self, file_id: Uuid) -> GatewayResult<()>;

    async fn list_files(&self, app_id: Uuid, query: &ListQuery) -> GatewayResult<Vec<FileRecord>>;

    /// All applications' live files (admin path).
    async fn list_files_all(&self, query: &ListQuery) -> GatewayResult<Vec<FileRecord>>;

    /// Live files of one application, or of all when `app_id` is `None`.
    async fn count_files(&self, app_id: Option<Uuid>) -> GatewayResult<i64>;

    /// Distinct non-empty `key_uid`s, deleted rows included.
    async fn all_key_uids(&self) -> GatewayResult<Vec<String>>;

    /// Set `enc_key` for every row whose `key_uid` is a key of `wrapped`, in
    /// a single statement. Returns rows updated.
    async fn batch_update_enc_keys(&self, wrapped: &HashMap<String, String>) -> GatewayResult<u64>;

    /// Every live file with its metadata (consistency checks).
    async fn list_live_metadata(&self) -> GatewayResult<Vec<StoredFile>>;
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Append one entry; the store supplies the timestamp.
    async fn create(&self, entry: &AuditEntry) -> GatewayResult<()>;

    async fn list_logs(&self, query: &ListQuery) -> GatewayResult<Vec<AuditRecord>>;
}

#[async_trait]
pub trait AppDirectory: Send + Sync {
    /// `AppNotFound` if no live application has `client_id`.
    async fn find_app_by_client_id(&self, client_id: &str) -> GatewayResult<App>;
}

#[async_trait]
pub trait AdminDirectory: Send + Sync {
    async fn list_admin_ids(&self) -> GatewayResult<Vec<String>>;
}
