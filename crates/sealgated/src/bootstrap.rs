//! Wire configuration into a running gateway: database, bucket, KEK, pipeline

use anyhow::{Context, Result};
use prometheus_client::registry::Registry;
use sealgate_core::config::SealgateConfig;
use sealgate_kms::{KeyServer, KmipClient};
use sealgate_meta::PgStore;
use sealgate_pipeline::{
    Backends, FilePipeline, Kek, KeyManager, PipelineMetrics, PipelineSettings,
};
use sealgate_storage::{ObjectStore, OpendalStore};
use std::sync::Arc;
use tracing::info;

/// Everything the daemon and the admin commands share
pub struct Gateway {
    pub pipeline: Arc<FilePipeline>,
    pub objects: Arc<dyn ObjectStore>,
    pub registry: Arc<Registry>,
    pub bucket: String,
}

pub async fn build(config: &SealgateConfig) -> Result<Gateway> {
    config.validate().context("invalid configuration")?;

    // ── Metadata store ───────────────────────────────────────────────────
    let store = Arc::new(
        PgStore::connect(&config.database)
            .await
            .context("connecting to PostgreSQL")?,
    );
    store
        .ensure_schema()
        .await
        .context("creating database schema")?;
    info!(max_connections = config.database.max_connections, "PostgreSQL: connected");

    // ── Object store ─────────────────────────────────────────────────────
    let access_key = std::env::var("AWS_ACCESS_KEY_ID")
        .or_else(|_| std::env::var("SEALGATE_ACCESS_KEY_ID"))
        .context("S3 credentials not set: export AWS_ACCESS_KEY_ID")?;
    let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY")
        .or_else(|_| std::env::var("SEALGATE_SECRET_ACCESS_KEY"))
        .context("AWS_SECRET_ACCESS_KEY not set")?;
    let settings =
        sealgate_storage::build_from_core_config(&config.storage, &access_key, &secret_key)
            .context("building storage settings")?;
    let objects: Arc<dyn ObjectStore> = Arc::new(OpendalStore::s3(settings));

    // ── Keys ─────────────────────────────────────────────────────────────
    let keys = if config.kms.enabled {
        let kms: Arc<dyn KeyServer> =
            Arc::new(KmipClient::from_config(&config.kms).context("building KMS client")?);
        let kek_uid = config.kms.key_uid.as_deref().unwrap_or_default();
        let kek = Kek::from_kms(kms.as_ref(), kek_uid)
            .await
            .context("importing KEK from KMS")?;
        info!(endpoint = %config.kms.endpoint, save_key = config.crypto.save_key, "KMS mode");
        KeyManager::with_kms(kek, kms, config.crypto.save_key)
    } else {
        let path = config
            .crypto
            .kek_path
            .as_deref()
            .context("crypto.kek_path is required when KMS is disabled")?;
        let kek = Kek::from_file(path).context("loading local KEK")?;
        info!(kek_path = %path.display(), "local key mode");
        KeyManager::local(kek)
    };

    // ── Pipeline ─────────────────────────────────────────────────────────
    let mut registry = Registry::default();
    let metrics = PipelineMetrics::new(&mut registry);
    let settings = PipelineSettings::from_config(config);
    let bucket = settings.bucket.clone();
    let pipeline = FilePipeline::new(
        settings,
        keys,
        Backends::with_store(store, objects.clone()),
        metrics,
    );

    Ok(Gateway {
        pipeline: Arc::new(pipeline),
        objects,
        registry: Arc::new(registry),
        bucket,
    })
}
