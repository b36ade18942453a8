//! The file pipeline: every client and admin operation end to end
//!
//! Upload: read → sniff + hash → obtain DEK → seal → wrap DEK →
//! [put `<file_uid>.enc` → insert file + metadata] (deferred) → audit.
//!
//! Download: metadata (scoped to the app) → stat → audit → get the version
//! recorded in metadata → verify `enc_hash` → unwrap DEK → open → verify `hash`.
//!
//! Metadata is written only after the object put succeeds, so a failed put
//! never leaves a row pointing at nothing. A metadata failure after a
//! successful put leaves an unreferenced object, which is harmless.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sealgate_core::config::SealgateConfig;
use sealgate_core::types::{
    ActorType, App, AuditAction, AuditEntry, AuditRecord, CryptoMetadata, FileRecord, HashMethod,
    ListQuery, RequestInfo, StoredFile,
};
use sealgate_core::{GatewayError, GatewayResult};
use sealgate_crypto::{compare_hash, decrypt, detect_mime, encrypt, hash};
use sealgate_meta::{AdminDirectory, AppDirectory, AuditLog, MetadataStore};
use sealgate_storage::{is_not_found, ObjectStore, NULL_VERSION};
use serde_json::json;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::admin_cache::AdminCache;
use crate::commit::{CommitHandle, CommitTracker};
use crate::key_manager::{Dek, KeyManager};
use crate::metrics::PipelineMetrics;

/// Pipeline policy, resolved from [`SealgateConfig`]
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub bucket: String,
    pub hash_method: HashMethod,
    pub hash_encrypted_file: bool,
    pub encryption_method: String,
    pub async_persistence: bool,
    pub commit_timeout: Duration,
}

impl PipelineSettings {
    pub fn from_config(cfg: &SealgateConfig) -> Self {
        Self {
            bucket: cfg.storage.bucket.clone(),
            hash_method: cfg.crypto.hash_method,
            hash_encrypted_file: cfg.crypto.hash_encrypted_file,
            encryption_method: cfg.crypto.encryption_method.clone(),
            async_persistence: cfg.pipeline.async_persistence,
            commit_timeout: Duration::from_secs(cfg.pipeline.commit_timeout_secs.max(1)),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&SealgateConfig::default())
    }
}

/// External systems the pipeline coordinates
#[derive(Clone)]
pub struct Backends {
    pub objects: Arc<dyn ObjectStore>,
    pub files: Arc<dyn MetadataStore>,
    pub audit: Arc<dyn AuditLog>,
    pub apps: Arc<dyn AppDirectory>,
    pub admins: Arc<dyn AdminDirectory>,
}

impl Backends {
    /// All relational seams served by one store.
    pub fn with_store<S>(store: Arc<S>, objects: Arc<dyn ObjectStore>) -> Self
    where
        S: MetadataStore + AuditLog + AppDirectory + AdminDirectory + 'static,
    {
        Self {
            objects,
            files: store.clone(),
            audit: store.clone(),
            apps: store.clone(),
            admins: store,
        }
    }
}

#[derive(Debug)]
pub struct Upload {
    pub file_uid: Uuid,
    /// Accepted is not committed: await this to know the file is durable.
    pub commit: CommitHandle,
}

#[derive(Debug)]
pub struct Encrypted {
    pub file_uid: Uuid,
    pub ciphertext: Vec<u8>,
}

#[derive(Debug)]
pub struct Plaintext {
    /// Original filename
    pub name: String,
    pub mime_type: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RekeyReport {
    /// UID the KMS created for the rotated key
    pub successor_uid: String,
    /// Metadata rows whose `enc_key` was rewritten
    pub rewrapped: u64,
    /// Key UIDs that could not be exported or wrapped
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Live rows with an object location that were checked
    pub checked: usize,
    /// Live rows whose ciphertext object is absent or delete-marked
    pub missing: Vec<Uuid>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Output of sealing one plaintext
struct Sealed {
    ciphertext: Vec<u8>,
    mime_type: &'static str,
    size: i64,
    hash: String,
    enc_hash: Option<String>,
}

pub fn object_key(file_uid: Uuid) -> String {
    format!("{file_uid}.enc")
}

pub struct FilePipeline {
    settings: PipelineSettings,
    keys: KeyManager,
    objects: Arc<dyn ObjectStore>,
    files: Arc<dyn MetadataStore>,
    audit: Arc<dyn AuditLog>,
    apps: Arc<dyn AppDirectory>,
    admins: AdminCache,
    commits: CommitTracker,
    metrics: PipelineMetrics,
}

impl FilePipeline {
    pub fn new(
        settings: PipelineSettings,
        keys: KeyManager,
        backends: Backends,
        metrics: PipelineMetrics,
    ) -> Self {
        let commits = CommitTracker::new(settings.commit_timeout);
        Self {
            keys,
            objects: backends.objects,
            files: backends.files,
            audit: backends.audit,
            apps: backends.apps,
            admins: AdminCache::new(backends.admins),
            commits,
            metrics,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn admins(&self) -> &AdminCache {
        &self.admins
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Wait for every deferred commit still in flight.
    pub async fn drain(&self) {
        let pending = self.commits.in_flight();
        if pending > 0 {
            info!(pending, "draining deferred commits");
        }
        self.commits.drain().await;
    }

    // ── Client operations ───────────────────────────────────────────────

    /// Encrypt and store a new file. Returns once the file is accepted; with
    /// `async_persistence` the put and metadata commit finish later.
    pub async fn upload<R>(
        &self,
        client_id: &str,
        name: &str,
        input: R,
        req: &RequestInfo,
    ) -> GatewayResult<Upload>
    where
        R: AsyncRead + Unpin + Send,
    {
        let result = self.run_upload(client_id, name, input, req).await;
        self.observe("upload", result)
    }

    pub async fn download(
        &self,
        client_id: &str,
        file_uid: Uuid,
        req: &RequestInfo,
    ) -> GatewayResult<Plaintext> {
        let result: GatewayResult<Plaintext> = async {
            let app = self.resolve_app(client_id).await?;
            let stored = self.files.get_metadata_by_app_and_file(app.id, file_uid).await?;
            self.fetch_and_open(&stored, &app.client_id, ActorType::Client, req)
                .await
        }
        .await;
        self.observe("download", result)
    }

    /// Seal a file and hand the ciphertext back instead of storing it. The
    /// metadata is persisted before returning so the caller can decrypt later.
    pub async fn encrypt<R>(
        &self,
        client_id: &str,
        name: &str,
        input: R,
        req: &RequestInfo,
    ) -> GatewayResult<Encrypted>
    where
        R: AsyncRead + Unpin + Send,
    {
        let result = self.run_encrypt(client_id, name, input, req).await;
        self.observe("encrypt", result)
    }

    /// Open ciphertext supplied by the caller using the file's stored key.
    pub async fn decrypt(
        &self,
        client_id: &str,
        file_uid: Uuid,
        ciphertext: &[u8],
        req: &RequestInfo,
    ) -> GatewayResult<Plaintext> {
        let result: GatewayResult<Plaintext> = async {
            if ciphertext.is_empty() {
                return Err(GatewayError::FileEmpty);
            }
            let app = self.resolve_app(client_id).await?;
            let stored = self.files.get_metadata_by_app_and_file(app.id, file_uid).await?;
            let body = self.open(&stored.meta, ciphertext).await?;
            self.record(
                &app.client_id,
                ActorType::Client,
                Some(file_uid),
                AuditAction::Decrypt,
                req,
                json!({ "size": body.len() }),
            )
            .await;
            Ok(Plaintext {
                name: stored.file.name,
                mime_type: stored.file.mime_type,
                body,
            })
        }
        .await;
        self.observe("decrypt", result)
    }

    /// Replace a file's content, re-sealing with its existing DEK. `name`
    /// renames the file when given.
    pub async fn update<R>(
        &self,
        client_id: &str,
        file_uid: Uuid,
        name: Option<&str>,
        input: R,
        req: &RequestInfo,
    ) -> GatewayResult<Upload>
    where
        R: AsyncRead + Unpin + Send,
    {
        let result = self.run_update(client_id, file_uid, name, input, req).await;
        self.observe("update", result)
    }

    /// Soft delete: the object gets a delete marker, both rows get `deleted_at`.
    pub async fn delete(
        &self,
        client_id: &str,
        file_uid: Uuid,
        req: &RequestInfo,
    ) -> GatewayResult<()> {
        let result: GatewayResult<()> = async {
            let app = self.resolve_app(client_id).await?;
            let stored = self.files.get_metadata_by_app_and_file(app.id, file_uid).await?;

            if !stored.file.location.is_empty() {
                self.objects
                    .delete(&self.settings.bucket, &object_key(file_uid))
                    .await
                    .map_err(storage_err("delete object"))?;
            }
            self.files.delete(file_uid).await?;
            info!(file_uid = %file_uid, app_id = %app.id, "file deleted");

            self.record(
                &app.client_id,
                ActorType::Client,
                Some(file_uid),
                AuditAction::Delete,
                req,
                json!({}),
            )
            .await;
            Ok(())
        }
        .await;
        self.observe("delete", result)
    }

    /// Undo a soft delete. `FileAlreadyExists` if the file is not deleted.
    pub async fn recover(
        &self,
        client_id: &str,
        file_uid: Uuid,
        req: &RequestInfo,
    ) -> GatewayResult<()> {
        let result: GatewayResult<()> = async {
            let app = self.resolve_app(client_id).await?;
            let stored = self
                .files
                .get_deleted_metadata_by_app_and_file(app.id, file_uid)
                .await?;
            if !stored.file.is_deleted() && stored.meta.deleted_at.is_none() {
                return Err(GatewayError::FileAlreadyExists);
            }

            if !stored.file.location.is_empty() {
                self.objects
                    .restore(
                        &self.settings.bucket,
                        &object_key(file_uid),
                        &stored.meta.version_id,
                    )
                    .await
                    .map_err(storage_err("restore object"))?;
            }
            self.files.restore(file_uid).await?;
            info!(
                file_uid = %file_uid,
                version_id = %stored.meta.version_id,
                "file recovered"
            );

            self.record(
                &app.client_id,
                ActorType::Client,
                Some(file_uid),
                AuditAction::Recover,
                req,
                json!({ "version_id": stored.meta.version_id }),
            )
            .await;
            Ok(())
        }
        .await;
        self.observe("recover", result)
    }

    pub async fn list_files(
        &self,
        client_id: &str,
        query: &ListQuery,
    ) -> GatewayResult<Vec<FileRecord>> {
        let app = self.resolve_app(client_id).await?;
        self.files.list_files(app.id, query).await
    }

    pub async fn count_files(&self, client_id: &str) -> GatewayResult<i64> {
        let app = self.resolve_app(client_id).await?;
        self.files.count_files(Some(app.id)).await
    }

    // ── Admin operations ────────────────────────────────────────────────

    pub async fn admin_download(
        &self,
        admin_id: &str,
        file_uid: Uuid,
        req: &RequestInfo,
    ) -> GatewayResult<Plaintext> {
        let result: GatewayResult<Plaintext> = async {
            self.require_admin(admin_id).await?;
            let stored = self.files.get_metadata_by_file(file_uid).await?;
            self.fetch_and_open(&stored, admin_id, ActorType::Admin, req)
                .await
        }
        .await;
        self.observe("admin_download", result)
    }

    pub async fn list_all_files(
        &self,
        admin_id: &str,
        query: &ListQuery,
    ) -> GatewayResult<Vec<FileRecord>> {
        self.require_admin(admin_id).await?;
        self.files.list_files_all(query).await
    }

    pub async fn count_all_files(&self, admin_id: &str) -> GatewayResult<i64> {
        self.require_admin(admin_id).await?;
        self.files.count_files(None).await
    }

    pub async fn list_logs(
        &self,
        admin_id: &str,
        query: &ListQuery,
    ) -> GatewayResult<Vec<AuditRecord>> {
        self.require_admin(admin_id).await?;
        self.audit.list_logs(query).await
    }

    /// Rotate `key_uid` in the KMS, then re-export every key referenced by
    /// metadata and store it wrapped under the KEK in one batch update.
    ///
    /// Keys that fail to export are skipped and reported. Nothing is
    /// written if the rotation itself fails.
    pub async fn rekey(
        &self,
        admin_id: &str,
        key_uid: &str,
        req: &RequestInfo,
    ) -> GatewayResult<RekeyReport> {
        let result = self.run_rekey(admin_id, key_uid, req).await;
        self.observe("rekey", result)
    }

    /// Stat the object behind every live metadata row that has one.
    pub async fn verify_consistency(&self) -> GatewayResult<ConsistencyReport> {
        let mut report = ConsistencyReport::default();
        for stored in self.files.list_live_metadata().await? {
            if stored.file.location.is_empty() {
                continue;
            }
            report.checked += 1;
            let stat = self
                .objects
                .stat(&self.settings.bucket, &object_key(stored.file.id))
                .await
                .map_err(storage_err("stat object"))?;
            if !stat.exists || stat.is_delete_marker {
                warn!(
                    file_uid = %stored.file.id,
                    app_id = %stored.file.app_id,
                    location = %stored.file.location,
                    "metadata row has no ciphertext object"
                );
                report.missing.push(stored.file.id);
            }
        }
        Ok(report)
    }

    // ── Operation bodies ────────────────────────────────────────────────

    async fn run_upload<R>(
        &self,
        client_id: &str,
        name: &str,
        input: R,
        req: &RequestInfo,
    ) -> GatewayResult<Upload>
    where
        R: AsyncRead + Unpin + Send,
    {
        require_name(name)?;
        let app = self.resolve_app(client_id).await?;
        let file_uid = Uuid::new_v4();
        let plaintext = read_plaintext(input).await?;

        let dek = self.keys.obtain_dek(file_uid).await?;
        let sealed = self.seal(&dek, &plaintext)?;
        let enc_key = self.keys.wrap_for_storage(&dek)?;
        let key_uid = dek.key_uid().map(String::from);
        drop(dek);

        let (file, meta) = self.new_rows(file_uid, app.id, name, &sealed, key_uid, enc_key);
        meta.ensure_readable()?;
        let size = sealed.size;

        let objects = self.objects.clone();
        let files = self.files.clone();
        let bucket = self.settings.bucket.clone();
        let commit = self.persist(
            "upload",
            file_uid,
            commit_new(objects, files, bucket, file, meta, sealed.ciphertext),
        )
        .await?;

        debug!(file_uid = %file_uid, app_id = %app.id, size, "upload accepted");
        self.record(
            &app.client_id,
            ActorType::Client,
            Some(file_uid),
            AuditAction::Upload,
            req,
            json!({ "name": name, "size": size }),
        )
        .await;

        Ok(Upload { file_uid, commit })
    }

    async fn run_encrypt<R>(
        &self,
        client_id: &str,
        name: &str,
        input: R,
        req: &RequestInfo,
    ) -> GatewayResult<Encrypted>
    where
        R: AsyncRead + Unpin + Send,
    {
        require_name(name)?;
        let app = self.resolve_app(client_id).await?;
        let file_uid = Uuid::new_v4();
        let plaintext = read_plaintext(input).await?;

        let dek = self.keys.obtain_dek(file_uid).await?;
        let sealed = self.seal(&dek, &plaintext)?;
        let enc_key = self.keys.wrap_for_storage(&dek)?;
        let key_uid = dek.key_uid().map(String::from);
        drop(dek);

        let (file, meta) = self.new_rows(file_uid, app.id, name, &sealed, key_uid, enc_key);
        meta.ensure_readable()?;
        self.files.create_file_with_metadata(&file, &meta).await?;

        self.record(
            &app.client_id,
            ActorType::Client,
            Some(file_uid),
            AuditAction::Encrypt,
            req,
            json!({ "name": name, "size": sealed.size }),
        )
        .await;

        Ok(Encrypted {
            file_uid,
            ciphertext: sealed.ciphertext,
        })
    }

    async fn run_update<R>(
        &self,
        client_id: &str,
        file_uid: Uuid,
        name: Option<&str>,
        input: R,
        req: &RequestInfo,
    ) -> GatewayResult<Upload>
    where
        R: AsyncRead + Unpin + Send,
    {
        if let Some(name) = name {
            require_name(name)?;
        }
        let app = self.resolve_app(client_id).await?;
        let stored = self.files.get_metadata_by_app_and_file(app.id, file_uid).await?;
        let plaintext = read_plaintext(input).await?;

        let dek = self.keys.unwrap_dek(&stored.meta).await?;
        let sealed = self.seal(&dek, &plaintext)?;
        drop(dek);

        let StoredFile {
            mut file,
            mut meta,
        } = stored;
        if let Some(name) = name {
            file.name = name.to_owned();
        }
        file.mime_type = sealed.mime_type.to_owned();
        file.size = sealed.size;
        meta.hash = sealed.hash;
        meta.enc_hash = sealed.enc_hash;
        let size = sealed.size;

        let objects = self.objects.clone();
        let files = self.files.clone();
        let bucket = self.settings.bucket.clone();
        let commit = self.persist(
            "update",
            file_uid,
            commit_replace(objects, files, bucket, file, meta, sealed.ciphertext),
        )
        .await?;

        self.record(
            &app.client_id,
            ActorType::Client,
            Some(file_uid),
            AuditAction::Update,
            req,
            json!({ "size": size }),
        )
        .await;

        Ok(Upload { file_uid, commit })
    }

    async fn run_rekey(
        &self,
        admin_id: &str,
        key_uid: &str,
        req: &RequestInfo,
    ) -> GatewayResult<RekeyReport> {
        let Some(kms) = self.keys.kms() else {
            return Err(GatewayError::InvalidInput(
                "re-key requires KMS mode".into(),
            ));
        };
        self.require_admin(admin_id).await?;
        if key_uid.trim().is_empty() {
            return Err(GatewayError::InvalidInput("key_uid must not be empty".into()));
        }

        let successor_uid = kms
            .rekey(key_uid)
            .await
            .map_err(|e| GatewayError::KeyGenerationFailed(format!("re-key {key_uid}: {e}")))?;
        info!(key_uid, successor_uid = %successor_uid, "key rotated in KMS");

        let mut wrapped = HashMap::new();
        let mut skipped = Vec::new();
        for uid in self.files.all_key_uids().await? {
            match self.keys.rewrap(&uid).await {
                Ok(enc_key) => {
                    wrapped.insert(uid, enc_key);
                }
                Err(e) => {
                    warn!(key_uid = %uid, error = %e, "re-key: skipping key");
                    self.metrics.record_rekey_skipped();
                    skipped.push(uid);
                }
            }
        }

        let rewrapped = if wrapped.is_empty() {
            0
        } else {
            self.files.batch_update_enc_keys(&wrapped).await?
        };
        info!(
            key_uid,
            rewrapped,
            skipped = skipped.len(),
            "re-key complete"
        );

        self.record(
            admin_id,
            ActorType::Admin,
            None,
            AuditAction::ReKey,
            req,
            json!({
                "key_uid": key_uid,
                "successor_uid": successor_uid,
                "rewrapped": rewrapped,
                "skipped": skipped,
            }),
        )
        .await;

        Ok(RekeyReport {
            successor_uid,
            rewrapped,
            skipped,
        })
    }

    async fn fetch_and_open(
        &self,
        stored: &StoredFile,
        actor_id: &str,
        actor_type: ActorType,
        req: &RequestInfo,
    ) -> GatewayResult<Plaintext> {
        let file_uid = stored.file.id;
        let key = object_key(file_uid);

        let stat = self
            .objects
            .stat(&self.settings.bucket, &key)
            .await
            .map_err(storage_err("stat object"))?;
        if !stat.exists || stat.is_delete_marker {
            return Err(GatewayError::FileNotFound);
        }

        self.record(
            actor_id,
            actor_type,
            Some(file_uid),
            AuditAction::Download,
            req,
            json!({}),
        )
        .await;

        // The row's hash describes the version it recorded, not whatever is latest
        let version_id = stored.meta.version_id.as_str();
        let ciphertext = if version_id.is_empty() || version_id == NULL_VERSION {
            self.objects.get(&self.settings.bucket, &key).await
        } else {
            self.objects
                .get_version(&self.settings.bucket, &key, version_id)
                .await
        }
        .map_err(storage_err("get object"))?;
        let body = self.open(&stored.meta, &ciphertext).await?;

        Ok(Plaintext {
            name: stored.file.name.clone(),
            mime_type: stored.file.mime_type.clone(),
            body,
        })
    }

    // ── Helpers ─────────────────────────────────────────────────────────

    fn seal(&self, dek: &Dek, plaintext: &[u8]) -> GatewayResult<Sealed> {
        let method = self.settings.hash_method;
        let ciphertext = encrypt(dek.keyset(), plaintext)
            .map_err(|e| GatewayError::EncryptFailed(e.to_string()))?;
        let enc_hash = self
            .settings
            .hash_encrypted_file
            .then(|| hash(method, &ciphertext));
        Ok(Sealed {
            mime_type: detect_mime(plaintext),
            size: plaintext.len() as i64,
            hash: hash(method, plaintext),
            enc_hash,
            ciphertext,
        })
    }

    /// Verify, unwrap and open. The DEK lives only inside this call.
    async fn open(&self, meta: &CryptoMetadata, ciphertext: &[u8]) -> GatewayResult<Vec<u8>> {
        let method = self.settings.hash_method;
        if let Some(enc_hash) = &meta.enc_hash {
            if !compare_hash(method, ciphertext, enc_hash) {
                return Err(GatewayError::HashMismatch);
            }
        }

        let dek = self.keys.unwrap_dek(meta).await?;
        let plaintext = decrypt(dek.keyset(), ciphertext)
            .map_err(|e| GatewayError::DecryptFailed(e.to_string()))?;
        drop(dek);

        if !compare_hash(method, &plaintext, &meta.hash) {
            return Err(GatewayError::HashMismatch);
        }
        Ok(plaintext)
    }

    fn new_rows(
        &self,
        file_uid: Uuid,
        app_id: Uuid,
        name: &str,
        sealed: &Sealed,
        key_uid: Option<String>,
        enc_key: String,
    ) -> (FileRecord, CryptoMetadata) {
        let now = Utc::now();
        let file = FileRecord {
            id: file_uid,
            name: name.to_owned(),
            app_id,
            mime_type: sealed.mime_type.to_owned(),
            size: sealed.size,
            location: String::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        let meta = CryptoMetadata {
            id: Uuid::new_v4(),
            file_id: file_uid,
            hash: sealed.hash.clone(),
            enc_hash: sealed.enc_hash.clone(),
            key_uid,
            enc_key,
            key_algo: self.settings.encryption_method.clone(),
            version_id: String::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        (file, meta)
    }

    /// Run `commit` inline or detached, per `async_persistence`. Either way it
    /// is ordered after earlier commits for the same file.
    async fn persist<F>(
        &self,
        operation: &'static str,
        file_uid: Uuid,
        commit: F,
    ) -> GatewayResult<CommitHandle>
    where
        F: Future<Output = GatewayResult<()>> + Send + 'static,
    {
        let metrics = self.metrics.clone();
        let logged = async move {
            let result = commit.await;
            match &result {
                Ok(()) => {
                    metrics.record_commit(true);
                    debug!(file_uid = %file_uid, operation, "commit complete");
                }
                Err(e) => {
                    metrics.record_commit(false);
                    error!(file_uid = %file_uid, operation, error = %e, "commit failed");
                }
            }
            result
        };

        if self.settings.async_persistence {
            Ok(self.commits.spawn(file_uid, logged))
        } else {
            self.commits.run_inline(file_uid, logged).await?;
            Ok(CommitHandle::Committed)
        }
    }

    async fn resolve_app(&self, client_id: &str) -> GatewayResult<App> {
        if client_id.trim().is_empty() {
            return Err(GatewayError::InvalidInput("client_id must not be empty".into()));
        }
        let app = self.apps.find_app_by_client_id(client_id).await?;
        if !app.is_active {
            return Err(GatewayError::AppInactive);
        }
        Ok(app)
    }

    async fn require_admin(&self, admin_id: &str) -> GatewayResult<()> {
        if admin_id.trim().is_empty() || !self.admins.is_admin(admin_id).await? {
            return Err(GatewayError::AdminRequired);
        }
        Ok(())
    }

    /// Append an audit entry. Failures are logged, never returned.
    async fn record(
        &self,
        actor_id: &str,
        actor_type: ActorType,
        file_id: Option<Uuid>,
        action: AuditAction,
        req: &RequestInfo,
        metadata: serde_json::Value,
    ) {
        let entry = AuditEntry {
            actor_id: actor_id.to_owned(),
            actor_type,
            file_id,
            action,
            ip: req.ip.clone(),
            user_agent: req.user_agent.clone(),
            metadata,
        };
        if let Err(e) = self.audit.create(&entry).await {
            warn!(
                action = action.as_str(),
                file_id = ?file_id,
                error = %e,
                "audit append failed"
            );
        }
    }

    fn observe<T>(&self, operation: &str, result: GatewayResult<T>) -> GatewayResult<T> {
        match &result {
            Ok(_) => self.metrics.record_ok(operation),
            Err(e) => self.metrics.record_failure(operation, e.kind()),
        }
        result
    }
}

async fn commit_new(
    objects: Arc<dyn ObjectStore>,
    files: Arc<dyn MetadataStore>,
    bucket: String,
    mut file: FileRecord,
    mut meta: CryptoMetadata,
    ciphertext: Vec<u8>,
) -> GatewayResult<()> {
    let put = objects
        .put(&bucket, &object_key(file.id), ciphertext)
        .await
        .map_err(storage_err("put object"))?;
    file.location = put.location;
    meta.version_id = put.version_id;
    files.create_file_with_metadata(&file, &meta).await
}

async fn commit_replace(
    objects: Arc<dyn ObjectStore>,
    files: Arc<dyn MetadataStore>,
    bucket: String,
    mut file: FileRecord,
    mut meta: CryptoMetadata,
    ciphertext: Vec<u8>,
) -> GatewayResult<()> {
    let put = objects
        .put_replace(&bucket, &object_key(file.id), ciphertext)
        .await
        .map_err(storage_err("replace object"))?;
    file.location = put.location;
    meta.version_id = put.version_id;
    files.update_file_and_metadata(&file, &meta).await
}

async fn read_plaintext<R: AsyncRead + Unpin>(mut input: R) -> GatewayResult<Vec<u8>> {
    let mut plaintext = Vec::new();
    input
        .read_to_end(&mut plaintext)
        .await
        .map_err(|e| GatewayError::ReadFailed(e.to_string()))?;
    if plaintext.is_empty() {
        return Err(GatewayError::FileEmpty);
    }
    Ok(plaintext)
}

fn require_name(name: &str) -> GatewayResult<()> {
    if name.trim().is_empty() {
        return Err(GatewayError::InvalidInput("file name must not be empty".into()));
    }
    Ok(())
}

fn storage_err(context: &'static str) -> impl FnOnce(anyhow::Error) -> GatewayError {
    move |e| {
        if is_not_found(&e) {
            GatewayError::FileNotFound
        } else {
            GatewayError::Storage(format!("{context}: {e:#}"))
        }
    }
}
