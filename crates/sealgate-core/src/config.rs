use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{GatewayError, GatewayResult};
use crate::types::HashMethod;

/// Top-level gateway configuration (loaded from sealgate.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SealgateConfig {
    pub daemon: DaemonConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub kms: KmsConfig,
    pub crypto: CryptoConfig,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Prometheus metrics + health endpoint (default: 127.0.0.1:9310)
    pub metrics_addr: Option<String>,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL (DATABASE_URL overrides)
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// S3-compatible endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket holding `<file_uid>.enc` objects. Versioning must be enabled.
    pub bucket: String,
    /// Refuse plaintext HTTP endpoints
    pub enforce_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KmsConfig {
    /// Obtain DEKs from the KMS instead of generating them locally
    pub enabled: bool,
    /// KMIP JSON endpoint, e.g. https://kms.internal:9998/kmip/2_1
    pub endpoint: String,
    /// UID of the KEK held by the KMS
    pub key_uid: Option<String>,
    /// PEM client certificate for mutual TLS
    pub client_cert: Option<PathBuf>,
    /// PEM private key for the client certificate
    pub client_key: Option<PathBuf>,
    /// Optional PEM CA bundle used to verify the KMS
    pub ca_cert: Option<PathBuf>,
    /// Per-call timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Local KEK file (required when KMS is disabled)
    pub kek_path: Option<PathBuf>,
    /// Persist the wrapped DEK next to the metadata
    pub save_key: bool,
    pub hash_method: HashMethod,
    /// Also hash the ciphertext and store it as `enc_hash`
    pub hash_encrypted_file: bool,
    /// Algorithm label written to `key_algo`
    pub encryption_method: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Return from upload/update before the object put and metadata commit finish
    pub async_persistence: bool,
    /// Upper bound for one deferred commit, in seconds
    pub commit_timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            metrics_addr: Some("127.0.0.1:9310".into()),
            log_level: "info".into(),
            log_format: "json".into(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://sealgate@localhost:5432/sealgate".into(),
            max_connections: 10,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:9000".into(),
            region: "us-east-1".into(),
            bucket: "sealgate".into(),
            enforce_tls: false,
        }
    }
}

impl Default for KmsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::new(),
            key_uid: None,
            client_cert: None,
            client_key: None,
            ca_cert: None,
            timeout_secs: 30,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            kek_path: None,
            save_key: true,
            hash_method: HashMethod::Sha256,
            hash_encrypted_file: false,
            encryption_method: "AES256-GCM".into(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            async_persistence: true,
            commit_timeout_secs: 300,
        }
    }
}

impl SealgateConfig {
    /// Cross-section checks that serde defaults cannot express.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.kms.enabled {
            if self.kms.key_uid.as_deref().unwrap_or("").is_empty() {
                return Err(GatewayError::Config(
                    "kms.enabled requires kms.key_uid (the KEK UID)".into(),
                ));
            }
            if self.kms.endpoint.is_empty() {
                return Err(GatewayError::Config(
                    "kms.enabled requires kms.endpoint".into(),
                ));
            }
            if self.kms.client_cert.is_some() != self.kms.client_key.is_some() {
                return Err(GatewayError::Config(
                    "kms.client_cert and kms.client_key must be set together".into(),
                ));
            }
        } else if self.crypto.kek_path.is_none() {
            return Err(GatewayError::Config(
                "crypto.kek_path is required when KMS is disabled".into(),
            ));
        }

        if self.storage.bucket.is_empty() {
            return Err(GatewayError::Config("storage.bucket must not be empty".into()));
        }

        if self.crypto.hash_method == HashMethod::Md5 {
            tracing::warn!(
                "crypto.hash_method = \"MD5\" is kept for legacy compatibility only; \
                 configure \"SHA-256\" for new deployments"
            );
        }

        if !self.kms.enabled && !self.crypto.save_key {
            tracing::warn!(
                "crypto.save_key = false has no effect without KMS: local DEKs are always wrapped"
            );
        }

        Ok(())
    }
}
