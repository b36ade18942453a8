//! PostgreSQL implementation of every meta trait

use std::collections::HashMap;

use async_trait::async_trait;
use sealgate_core::config::DatabaseConfig;
use sealgate_core::types::{
    App, AuditEntry, AuditRecord, CryptoMetadata, FileRecord, ListQuery, StoredFile,
};
use sealgate_core::{GatewayError, GatewayResult};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use uuid::Uuid;

use crate::schema::SCHEMA_SQL;
use crate::sort::{resolve, SortEntity};
use crate::{AdminDirectory, AppDirectory, AuditLog, MetadataStore};

const SELECT_STORED: &str = r#"
    SELECT f.id, f.name, f.app_id, f.mime_type, f.size, f.location,
           f.created_at, f.updated_at, f.deleted_at,
           m.id AS meta_id, m.hash, m.enc_hash, m.key_uid, m.enc_key, m.key_algo,
           m.version_id, m.created_at AS meta_created_at,
           m.updated_at AS meta_updated_at, m.deleted_at AS meta_deleted_at
    FROM files f
    JOIN metadata m ON m.file_id = f.id
"#;

const SELECT_FILES: &str = r#"
    SELECT f.id, f.name, f.app_id, f.mime_type, f.size, f.location,
           f.created_at, f.updated_at, f.deleted_at
    FROM files f
"#;

const UNIQUE_VIOLATION: &str = "23505";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using `[database]`; `DATABASE_URL` is resolved by the caller.
    pub async fn connect(cfg: &DatabaseConfig) -> GatewayResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .connect(&cfg.url)
            .await
            .map_err(db_err("connect"))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create missing tables and indexes.
    pub async fn ensure_schema(&self) -> GatewayResult<()> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(db_err("ensure schema"))?;
        Ok(())
    }

    pub async fn ping(&self) -> GatewayResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err("ping"))?;
        Ok(())
    }

    async fn fetch_stored(&self, sql: &str, file_id: Uuid, app_id: Option<Uuid>) -> GatewayResult<StoredFile> {
        let mut query = sqlx::query(sql).bind(file_id);
        if let Some(app_id) = app_id {
            query = query.bind(app_id);
        }
        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("load file metadata"))?
            .ok_or(GatewayError::FileNotFound)?;
        stored_file(&row).map_err(db_err("decode file metadata"))
    }

    async fn list_files_where(
        &self,
        app_id: Option<Uuid>,
        query: &ListQuery,
    ) -> GatewayResult<Vec<FileRecord>> {
        let sort = resolve(SortEntity::Files, query.sort_by.as_deref(), query.order.as_deref());
        let mut qb = QueryBuilder::<Postgres>::new(SELECT_FILES);
        qb.push(" WHERE f.deleted_at IS NULL");
        if let Some(app_id) = app_id {
            qb.push(" AND f.app_id = ").push_bind(app_id);
        }
        qb.push(" ORDER BY ").push(sort.order_by("f"));
        qb.push(" LIMIT ").push_bind(query.effective_limit());
        qb.push(" OFFSET ").push_bind(query.effective_offset());

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("list files"))?;
        rows.iter()
            .map(file_record)
            .collect::<Result<_, _>>()
            .map_err(db_err("decode files"))
    }
}

fn db_err(context: &'static str) -> impl Fn(sqlx::Error) -> GatewayError {
    move |e| GatewayError::Database(format!("{context}: {e}"))
}

fn insert_err(e: sqlx::Error) -> GatewayError {
    let unique = e
        .as_database_error()
        .and_then(|d| d.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION);
    if unique {
        GatewayError::FileAlreadyExists
    } else {
        GatewayError::Database(format!("insert file: {e}"))
    }
}

fn file_record(row: &PgRow) -> Result<FileRecord, sqlx::Error> {
    Ok(FileRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        app_id: row.try_get("app_id")?,
        mime_type: row.try_get("mime_type")?,
        size: row.try_get("size")?,
        location: row.try_get("location")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn stored_file(row: &PgRow) -> Result<StoredFile, sqlx::Error> {
    let file = file_record(row)?;
    let meta = CryptoMetadata {
        id: row.try_get("meta_id")?,
        file_id: file.id,
        hash: row.try_get("hash")?,
        enc_hash: row.try_get("enc_hash")?,
        key_uid: row.try_get("key_uid")?,
        enc_key: row.try_get("enc_key")?,
        key_algo: row.try_get("key_algo")?,
        version_id: row.try_get("version_id")?,
        created_at: row.try_get("meta_created_at")?,
        updated_at: row.try_get("meta_updated_at")?,
        deleted_at: row.try_get("meta_deleted_at")?,
    };
    Ok(StoredFile { file, meta })
}

fn audit_record(row: &PgRow) -> GatewayResult<AuditRecord> {
    let decode = db_err("decode audit entry");
    let actor_type: String = row.try_get("actor_type").map_err(&decode)?;
    let action: String = row.try_get("action").map_err(&decode)?;
    Ok(AuditRecord {
        id: row.try_get("id").map_err(&decode)?,
        timestamp: row.try_get("timestamp").map_err(&decode)?,
        entry: AuditEntry {
            actor_id: row.try_get("actor_id").map_err(&decode)?,
            actor_type: actor_type.parse()?,
            file_id: row.try_get("file_id").map_err(&decode)?,
            action: action.parse()?,
            ip: row.try_get("ip").map_err(&decode)?,
            user_agent: row.try_get("user_agent").map_err(&decode)?,
            metadata: row.try_get("metadata").map_err(&decode)?,
        },
    })
}

#[async_trait]
impl MetadataStore for PgStore {
    async fn create_file_with_metadata(
        &self,
        file: &FileRecord,
        meta: &CryptoMetadata,
    ) -> GatewayResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err("begin"))?;

        sqlx::query(
            r#"
            INSERT INTO files (id, name, app_id, mime_type, size, location, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            "#,
        )
        .bind(file.id)
        .bind(&file.name)
        .bind(file.app_id)
        .bind(&file.mime_type)
        .bind(file.size)
        .bind(&file.location)
        .execute(&mut *tx)
        .await
        .map_err(insert_err)?;

        sqlx::query(
            r#"
            INSERT INTO metadata (id, file_id, hash, enc_hash, key_uid, enc_key, key_algo,
                                  version_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW(), NOW())
            "#,
        )
        .bind(meta.id)
        .bind(file.id)
        .bind(&meta.hash)
        .bind(&meta.enc_hash)
        .bind(&meta.key_uid)
        .bind(&meta.enc_key)
        .bind(&meta.key_algo)
        .bind(&meta.version_id)
        .execute(&mut *tx)
        .await
        .map_err(insert_err)?;

        tx.commit().await.map_err(db_err("commit create"))?;
        Ok(())
    }

    async fn get_metadata_by_app_and_file(
        &self,
        app_id: Uuid,
        file_id: Uuid,
    ) -> GatewayResult<StoredFile> {
        let sql = format!(
            "{} WHERE f.id = $1 AND f.app_id = $2 AND f.deleted_at IS NULL AND m.deleted_at IS NULL",
            SELECT_STORED
        );
        self.fetch_stored(&sql, file_id, Some(app_id)).await
    }

    async fn get_deleted_metadata_by_app_and_file(
        &self,
        app_id: Uuid,
        file_id: Uuid,
    ) -> GatewayResult<StoredFile> {
        let sql = format!("{} WHERE f.id = $1 AND f.app_id = $2", SELECT_STORED);
        self.fetch_stored(&sql, file_id, Some(app_id)).await
    }

    async fn get_metadata_by_file(&self, file_id: Uuid) -> GatewayResult<StoredFile> {
        let sql = format!(
            "{} WHERE f.id = $1 AND f.deleted_at IS NULL AND m.deleted_at IS NULL",
            SELECT_STORED
        );
        self.fetch_stored(&sql, file_id, None).await
    }

    async fn update_file_and_metadata(
        &self,
        file: &FileRecord,
        meta: &CryptoMetadata,
    ) -> GatewayResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err("begin"))?;

        let updated = sqlx::query(
            r#"
            UPDATE files
            SET name = $2, mime_type = $3, size = $4, location = $5, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(file.id)
        .bind(&file.name)
        .bind(&file.mime_type)
        .bind(file.size)
        .bind(&file.location)
        .execute(&mut *tx)
        .await
        .map_err(db_err("update file"))?
        .rows_affected();
        if updated == 0 {
            return Err(GatewayError::FileNotFound);
        }

        sqlx::query(
            r#"
            UPDATE metadata
            SET hash = $2, enc_hash = $3, key_uid = $4, enc_key = $5, key_algo = $6,
                version_id = $7, updated_at = NOW()
            WHERE file_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(file.id)
        .bind(&meta.hash)
        .bind(&meta.enc_hash)
        .bind(&meta.key_uid)
        .bind(&meta.enc_key)
        .bind(&meta.key_algo)
        .bind(&meta.version_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err("update metadata"))?;

        tx.commit().await.map_err(db_err("commit update"))?;
        Ok(())
    }

    async fn delete(&self, file_id: Uuid) -> GatewayResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err("begin"))?;

        sqlx::query(
            "UPDATE metadata SET deleted_at = NOW(), updated_at = NOW() \
             WHERE file_id = $1 AND deleted_at IS NULL",
        )
        .bind(file_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err("soft-delete metadata"))?;

        let deleted = sqlx::query(
            "UPDATE files SET deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(file_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err("soft-delete file"))?
        .rows_affected();

        if deleted == 0 {
            let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM files WHERE id = $1)")
                .bind(file_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(db_err("check file"))?;
            if !exists {
                return Err(GatewayError::FileNotFound);
            }
        }

        tx.commit().await.map_err(db_err("commit delete"))?;
        Ok(())
    }

    async fn restore(&self, file_id: Uuid) -> GatewayResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err("begin"))?;

        let files = sqlx::query(
            "UPDATE files SET deleted_at = NULL, updated_at = NOW() \
             WHERE id = $1 AND deleted_at IS NOT NULL",
        )
        .bind(file_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err("restore file"))?
        .rows_affected();

        let metas = sqlx::query(
            "UPDATE metadata SET deleted_at = NULL, updated_at = NOW() \
             WHERE file_id = $1 AND deleted_at IS NOT NULL",
        )
        .bind(file_id)
        .execute(&mut *tx)
        .await
        .map_err(db_err("restore metadata"))?
        .rows_affected();

        if files + metas == 0 {
            return Err(GatewayError::FileNotFound);
        }

        tx.commit().await.map_err(db_err("commit restore"))?;
        Ok(())
    }

    async fn list_files(&self, app_id: Uuid, query: &ListQuery) -> GatewayResult<Vec<FileRecord>> {
        self.list_files_where(Some(app_id), query).await
    }

    async fn list_files_all(&self, query: &ListQuery) -> GatewayResult<Vec<FileRecord>> {
        self.list_files_where(None, query).await
    }

    async fn count_files(&self, app_id: Option<Uuid>) -> GatewayResult<i64> {
        let count: i64 = match app_id {
            Some(app_id) => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM files WHERE app_id = $1 AND deleted_at IS NULL",
                )
                .bind(app_id)
                .fetch_one(&self.pool)
                .await
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE deleted_at IS NULL")
                    .fetch_one(&self.pool)
                    .await
            }
        }
        .map_err(db_err("count files"))?;
        Ok(count)
    }

    async fn all_key_uids(&self) -> GatewayResult<Vec<String>> {
        sqlx::query_scalar(
            "SELECT DISTINCT key_uid FROM metadata \
             WHERE key_uid IS NOT NULL AND key_uid <> '' ORDER BY key_uid",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err("list key uids"))
    }

    async fn batch_update_enc_keys(&self, wrapped: &HashMap<String, String>) -> GatewayResult<u64> {
        if wrapped.is_empty() {
            return Ok(0);
        }

        // Two array binds regardless of batch size; per-key binds overflow
        // the protocol's 65535 parameter limit.
        let (key_uids, enc_keys): (Vec<&str>, Vec<&str>) = wrapped
            .iter()
            .map(|(uid, key)| (uid.as_str(), key.as_str()))
            .unzip();
        let result = sqlx::query(
            r#"
            UPDATE metadata m
            SET enc_key = v.enc_key, updated_at = NOW()
            FROM UNNEST($1::text[], $2::text[]) AS v(key_uid, enc_key)
            WHERE m.key_uid = v.key_uid
            "#,
        )
        .bind(key_uids)
        .bind(enc_keys)
        .execute(&self.pool)
        .await
        .map_err(db_err("batch update enc_key"))?;
        Ok(result.rows_affected())
    }

    async fn list_live_metadata(&self) -> GatewayResult<Vec<StoredFile>> {
        let sql = format!(
            "{} WHERE f.deleted_at IS NULL AND m.deleted_at IS NULL ORDER BY f.created_at, f.id",
            SELECT_STORED
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("list live metadata"))?;
        rows.iter()
            .map(stored_file)
            .collect::<Result<_, _>>()
            .map_err(db_err("decode file metadata"))
    }
}

#[async_trait]
impl AuditLog for PgStore {
    async fn create(&self, entry: &AuditEntry) -> GatewayResult<()> {
        sqlx::query(
            r#"
            INSERT INTO file_logs (actor_id, actor_type, file_id, action, ip, user_agent, metadata, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            "#,
        )
        .bind(&entry.actor_id)
        .bind(entry.actor_type.as_str())
        .bind(entry.file_id)
        .bind(entry.action.as_str())
        .bind(&entry.ip)
        .bind(&entry.user_agent)
        .bind(&entry.metadata)
        .execute(&self.pool)
        .await
        .map_err(db_err("append audit entry"))?;
        Ok(())
    }

    async fn list_logs(&self, query: &ListQuery) -> GatewayResult<Vec<AuditRecord>> {
        let sort = resolve(SortEntity::Logs, query.sort_by.as_deref(), query.order.as_deref());
        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT l.id, l.actor_id, l.actor_type, l.file_id, l.action, l.ip, l.user_agent, \
             l.metadata, l.timestamp FROM file_logs l ORDER BY ",
        );
        qb.push(sort.order_by("l"));
        qb.push(" LIMIT ").push_bind(query.effective_limit());
        qb.push(" OFFSET ").push_bind(query.effective_offset());

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("list audit entries"))?;
        rows.iter().map(audit_record).collect()
    }
}

#[async_trait]
impl AppDirectory for PgStore {
    async fn find_app_by_client_id(&self, client_id: &str) -> GatewayResult<App> {
        let row = sqlx::query(
            "SELECT id, client_id, name, is_active FROM apps \
             WHERE client_id = $1 AND deleted_at IS NULL",
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err("find app"))?
        .ok_or(GatewayError::AppNotFound)?;

        let decode = db_err("decode app");
        Ok(App {
            id: row.try_get("id").map_err(&decode)?,
            client_id: row.try_get("client_id").map_err(&decode)?,
            name: row.try_get("name").map_err(&decode)?,
            is_active: row.try_get("is_active").map_err(&decode)?,
        })
    }
}

#[async_trait]
impl AdminDirectory for PgStore {
    async fn list_admin_ids(&self) -> GatewayResult<Vec<String>> {
        sqlx::query_scalar("SELECT id FROM admins WHERE deleted_at IS NULL ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("list admins"))
    }
}
