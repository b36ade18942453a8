//! Key manager: where a file's DEK comes from and how it is persisted
//!
//! ```text
//! obtain_dek(file_uid)
//!   kms on   → generate_symmetric(file_uid) → export → import_raw   (key_uid set)
//!   kms off  → generate_keyset                                     (no key_uid)
//!
//! unwrap_dek(meta)
//!   enc_key set              → unwrap under the KEK
//!   enc_key empty, key_uid   → export from KMS → import_raw
//!   both empty               → UnreadableRecord
//! ```

use std::path::Path;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use sealgate_core::types::CryptoMetadata;
use sealgate_core::{GatewayError, GatewayResult};
use sealgate_crypto::{generate_keyset, import_raw, unwrap_keyset, wrap_keyset, Keyset};
use sealgate_kms::KeyServer;
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;
use zeroize::Zeroizing;

/// The process-wide key encryption key. Immutable after bootstrap.
pub struct Kek {
    keyset: Keyset,
}

impl Kek {
    pub fn from_keyset(keyset: Keyset) -> Self {
        Self { keyset }
    }

    /// Import the KEK held by the KMS under `key_uid`.
    pub async fn from_kms(kms: &dyn KeyServer, key_uid: &str) -> GatewayResult<Self> {
        let keyset = export_keyset(kms, key_uid).await?;
        tracing::info!(key_uid, "KEK imported from KMS");
        Ok(Self { keyset })
    }

    /// Load a local KEK file holding either an encoded keyset or a base64
    /// raw 32-byte key.
    pub fn from_file(path: &Path) -> GatewayResult<Self> {
        let content = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!("reading KEK file {}: {e}", path.display()))
        })?);
        let text = content.trim();
        if text.is_empty() {
            return Err(GatewayError::Config(format!(
                "KEK file {} is empty",
                path.display()
            )));
        }

        if let Ok(keyset) = Keyset::from_encoded(&SecretString::from(text.to_owned())) {
            return Ok(Self { keyset });
        }

        let raw = Zeroizing::new(STANDARD.decode(text).map_err(|_| {
            GatewayError::Config(format!(
                "KEK file {} is neither a keyset nor a base64 key",
                path.display()
            ))
        })?);
        let keyset = import_raw(&raw)
            .map_err(|e| GatewayError::Config(format!("KEK file {}: {e}", path.display())))?;
        Ok(Self { keyset })
    }

    /// A fresh KEK in the encoded keyset form [`Kek::from_file`] reads.
    pub fn generate_encoded() -> SecretString {
        generate_keyset().to_encoded()
    }

    pub fn wrap(&self, dek: &Dek) -> GatewayResult<String> {
        wrap_keyset(&self.keyset, &dek.keyset)
            .map_err(|e| GatewayError::EncryptFailed(format!("wrapping DEK: {e}")))
    }

    pub fn unwrap(&self, enc_key: &str) -> GatewayResult<Keyset> {
        unwrap_keyset(&self.keyset, enc_key)
            .map_err(|e| GatewayError::DecryptFailed(format!("unwrapping DEK: {e}")))
    }
}

impl std::fmt::Debug for Kek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kek").field("keyset", &"[REDACTED]").finish()
    }
}

/// An unwrapped data encryption key.
///
/// Not `Clone`: the key material is zeroized when the handle drops, which
/// happens at the end of the operation that obtained it.
#[derive(Debug)]
pub struct Dek {
    keyset: Keyset,
    key_uid: Option<String>,
}

impl Dek {
    pub fn key_uid(&self) -> Option<&str> {
        self.key_uid.as_deref()
    }

    pub(crate) fn keyset(&self) -> &Keyset {
        &self.keyset
    }
}

pub struct KeyManager {
    kek: Kek,
    kms: Option<Arc<dyn KeyServer>>,
    save_key: bool,
}

impl KeyManager {
    /// Local mode: DEKs are generated in process and always wrapped.
    pub fn local(kek: Kek) -> Self {
        Self {
            kek,
            kms: None,
            save_key: true,
        }
    }

    /// KMS mode: DEKs are created by the key server. With `save_key` the
    /// wrapped DEK is also stored; without it every read re-exports.
    pub fn with_kms(kek: Kek, kms: Arc<dyn KeyServer>, save_key: bool) -> Self {
        Self {
            kek,
            kms: Some(kms),
            save_key,
        }
    }

    pub fn kms_enabled(&self) -> bool {
        self.kms.is_some()
    }

    pub fn kms(&self) -> Option<&Arc<dyn KeyServer>> {
        self.kms.as_ref()
    }

    pub fn kek(&self) -> &Kek {
        &self.kek
    }

    /// A new DEK for `file_uid`.
    pub async fn obtain_dek(&self, file_uid: Uuid) -> GatewayResult<Dek> {
        let Some(kms) = &self.kms else {
            return Ok(Dek {
                keyset: generate_keyset(),
                key_uid: None,
            });
        };

        let tag = file_uid.to_string();
        let key_uid = kms
            .generate_symmetric(&tag)
            .await
            .map_err(|e| GatewayError::KmsGenerateFailed(e.to_string()))?;
        let keyset = export_keyset(kms.as_ref(), &key_uid).await?;
        tracing::debug!(file_uid = %file_uid, key_uid = %key_uid, "DEK created in KMS");

        Ok(Dek {
            keyset,
            key_uid: Some(key_uid),
        })
    }

    /// The `enc_key` column for `dek`: the wrapped DEK, or empty when the
    /// DEK is only kept by the KMS.
    pub fn wrap_for_storage(&self, dek: &Dek) -> GatewayResult<String> {
        if self.kms.is_some() && !self.save_key {
            return Ok(String::new());
        }
        self.kek.wrap(dek)
    }

    /// Recover the DEK a metadata row was sealed with.
    pub async fn unwrap_dek(&self, meta: &CryptoMetadata) -> GatewayResult<Dek> {
        meta.ensure_readable()?;

        if meta.has_wrapped_key() {
            return Ok(Dek {
                keyset: self.kek.unwrap(&meta.enc_key)?,
                key_uid: meta.key_uid.clone(),
            });
        }

        let key_uid = meta.key_uid.as_deref().unwrap_or_default();
        let kms = self.kms.as_ref().ok_or_else(|| {
            GatewayError::KmsExportFailed(format!(
                "key {key_uid} is held by the KMS but no KMS is configured"
            ))
        })?;
        Ok(Dek {
            keyset: export_keyset(kms.as_ref(), key_uid).await?,
            key_uid: Some(key_uid.to_owned()),
        })
    }

    /// Export `key_uid` and wrap it under the KEK (re-key pass).
    pub async fn rewrap(&self, key_uid: &str) -> GatewayResult<String> {
        let kms = self
            .kms
            .as_ref()
            .ok_or_else(|| GatewayError::InvalidInput("KMS is not enabled".into()))?;
        let dek = Dek {
            keyset: export_keyset(kms.as_ref(), key_uid).await?,
            key_uid: Some(key_uid.to_owned()),
        };
        self.kek.wrap(&dek)
    }
}

async fn export_keyset(kms: &dyn KeyServer, key_uid: &str) -> GatewayResult<Keyset> {
    let key_hex = kms
        .export(key_uid)
        .await
        .map_err(|e| GatewayError::KmsExportFailed(e.to_string()))?;
    let raw = Zeroizing::new(
        hex::decode(key_hex.as_bytes())
            .map_err(|e| GatewayError::KmsExportFailed(format!("key {key_uid}: {e}")))?,
    );
    import_raw(&raw).map_err(|e| GatewayError::KeyGenerationFailed(format!("key {key_uid}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sealgate_kms::MemoryKeyServer;

    fn meta(key_uid: Option<&str>, enc_key: String) -> CryptoMetadata {
        let now = Utc::now();
        CryptoMetadata {
            id: Uuid::new_v4(),
            file_id: Uuid::new_v4(),
            hash: String::new(),
            enc_hash: None,
            key_uid: key_uid.map(String::from),
            enc_key,
            key_algo: "AES256-GCM".into(),
            version_id: "null".into(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn test_kek() -> Kek {
        Kek::from_keyset(import_raw(&[0x11; 32]).unwrap())
    }

    #[tokio::test]
    async fn test_local_mode_always_wraps() {
        let km = KeyManager::local(test_kek());
        let dek = km.obtain_dek(Uuid::new_v4()).await.unwrap();
        assert!(dek.key_uid().is_none());

        let enc_key = km.wrap_for_storage(&dek).unwrap();
        assert!(!enc_key.is_empty());

        let sealed = sealgate_crypto::encrypt(dek.keyset(), b"body").unwrap();
        let unwrapped = km.unwrap_dek(&meta(None, enc_key)).await.unwrap();
        assert_eq!(sealgate_crypto::decrypt(unwrapped.keyset(), &sealed).unwrap(), b"body");
    }

    #[tokio::test]
    async fn test_kms_mode_without_save_key_reexports() {
        let kms = Arc::new(MemoryKeyServer::new());
        let km = KeyManager::with_kms(test_kek(), kms.clone(), false);

        let dek = km.obtain_dek(Uuid::new_v4()).await.unwrap();
        let key_uid = dek.key_uid().unwrap().to_owned();
        assert!(km.wrap_for_storage(&dek).unwrap().is_empty());

        let sealed = sealgate_crypto::encrypt(dek.keyset(), b"body").unwrap();
        let before = kms.export_count();
        let again = km.unwrap_dek(&meta(Some(&key_uid), String::new())).await.unwrap();
        assert_eq!(kms.export_count(), before + 1);
        assert_eq!(sealgate_crypto::decrypt(again.keyset(), &sealed).unwrap(), b"body");
    }

    #[tokio::test]
    async fn test_unreadable_record_rejected() {
        let km = KeyManager::local(test_kek());
        let err = km.unwrap_dek(&meta(None, String::new())).await.unwrap_err();
        assert!(matches!(err, GatewayError::UnreadableRecord));
    }

    #[tokio::test]
    async fn test_kms_failures_map_to_kms_kinds() {
        let kms = Arc::new(MemoryKeyServer::new());
        let km = KeyManager::with_kms(test_kek(), kms.clone(), true);

        kms.set_fail_generate(true);
        let err = km.obtain_dek(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, GatewayError::KmsGenerateFailed(_)));
        assert!(err.is_retryable());

        let err = km
            .unwrap_dek(&meta(Some("missing-uid"), String::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::KmsExportFailed(_)));
    }

    #[tokio::test]
    async fn test_kek_from_kms_matches_material() {
        let kms = MemoryKeyServer::new();
        let uid = kms.import_symmetric("kek", [0x11; 32]);
        let from_kms = Kek::from_kms(&kms, &uid).await.unwrap();

        let km = KeyManager::local(test_kek());
        let dek = km.obtain_dek(Uuid::new_v4()).await.unwrap();
        let wrapped = km.wrap_for_storage(&dek).unwrap();
        assert!(from_kms.unwrap(&wrapped).is_ok(), "same material must unwrap");
    }

    #[test]
    fn test_kek_from_file_accepts_both_forms() {
        let dir = tempfile::tempdir().unwrap();

        let keyset_path = dir.path().join("kek.keyset");
        std::fs::write(&keyset_path, Kek::generate_encoded().expose_secret()).unwrap();
        assert!(Kek::from_file(&keyset_path).is_ok());

        let raw_path = dir.path().join("kek.raw");
        std::fs::write(&raw_path, format!("{}\n", STANDARD.encode([7u8; 32]))).unwrap();
        assert!(Kek::from_file(&raw_path).is_ok());

        let bad_path = dir.path().join("kek.bad");
        std::fs::write(&bad_path, STANDARD.encode([7u8; 16])).unwrap();
        assert!(matches!(Kek::from_file(&bad_path), Err(GatewayError::Config(_))));

        assert!(Kek::from_file(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_kek_debug_redacts() {
        assert_eq!(format!("{:?}", test_kek()), "Kek { keyset: \"[REDACTED]\" }");
    }
}
