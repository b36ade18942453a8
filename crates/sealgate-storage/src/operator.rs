//! OpenDAL Operator factory for S3-compatible backends

use anyhow::{Context, Result};
use opendal::Operator;

/// Everything needed to build an operator for one bucket
#[derive(Clone)]
pub struct S3Settings {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Settings")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

impl S3Settings {
    pub fn for_bucket(&self, bucket: &str) -> Self {
        Self {
            bucket: bucket.to_owned(),
            ..self.clone()
        }
    }
}

/// Build an OpenDAL Operator for an S3-compatible endpoint with versioning on.
///
/// Path-style addressing (the opendal default) works for MinIO, SeaweedFS and
/// AWS alike.
pub fn build_operator(cfg: &S3Settings) -> Result<Operator> {
    let builder = opendal::services::S3::default()
        .endpoint(&cfg.endpoint)
        .region(&cfg.region)
        .bucket(&cfg.bucket)
        .access_key_id(&cfg.access_key_id)
        .secret_access_key(&cfg.secret_access_key)
        .enable_versioning(true);

    let op = Operator::new(builder)
        .with_context(|| format!("creating OpenDAL S3 operator for bucket {}", cfg.bucket))?
        .layer(opendal::layers::LoggingLayer::default())
        .finish();

    Ok(op)
}

/// Settings from `[storage]` plus credentials.
///
/// If `enforce_tls` is true and the endpoint uses HTTP, this returns an error.
/// Otherwise, a warning is logged for non-HTTPS endpoints.
pub fn build_from_core_config(
    storage: &sealgate_core::config::StorageConfig,
    access_key_id: &str,
    secret_access_key: &str,
) -> Result<S3Settings> {
    if storage.endpoint.starts_with("http://") {
        if storage.enforce_tls {
            anyhow::bail!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                storage.endpoint
            );
        }
        tracing::warn!(
            endpoint = %storage.endpoint,
            "S3 endpoint uses plaintext HTTP; ciphertext and credentials travel unprotected"
        );
    }

    Ok(S3Settings {
        endpoint: storage.endpoint.clone(),
        region: storage.region.clone(),
        bucket: storage.bucket.clone(),
        access_key_id: access_key_id.to_string(),
        secret_access_key: secret_access_key.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> S3Settings {
        S3Settings {
            endpoint: "http://localhost:9000".to_string(),
            region: "us-east-1".to_string(),
            bucket: "files".to_string(),
            access_key_id: "test-key".to_string(),
            secret_access_key: "test-secret".to_string(),
        }
    }

    #[test]
    fn test_build_operator_valid() {
        assert!(build_operator(&settings()).is_ok());
    }

    #[test]
    fn test_for_bucket_keeps_credentials() {
        let other = settings().for_bucket("archive");
        assert_eq!(other.bucket, "archive");
        assert_eq!(other.access_key_id, "test-key");
    }

    #[test]
    fn test_debug_redacts_secret() {
        let dbg = format!("{:?}", settings());
        assert!(!dbg.contains("test-secret"));
    }

    #[test]
    fn test_http_with_enforce_tls_fails() {
        let storage = sealgate_core::config::StorageConfig {
            endpoint: "http://insecure:9000".into(),
            enforce_tls: true,
            ..Default::default()
        };
        let err = build_from_core_config(&storage, "key", "secret").unwrap_err();
        assert!(err.to_string().contains("enforce_tls"));
    }

    #[test]
    fn test_http_without_enforce_tls_warns_only() {
        let storage = sealgate_core::config::StorageConfig {
            endpoint: "http://localhost:9000".into(),
            enforce_tls: false,
            ..Default::default()
        };
        assert!(build_from_core_config(&storage, "key", "secret").is_ok());
    }

    #[test]
    fn test_https_with_enforce_tls() {
        let storage = sealgate_core::config::StorageConfig {
            endpoint: "https://s3.example.com".into(),
            enforce_tls: true,
            ..Default::default()
        };
        let s = build_from_core_config(&storage, "key", "secret").unwrap();
        assert_eq!(s.bucket, "sealgate");
    }
}
