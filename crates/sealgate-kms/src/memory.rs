//! In-process key server with fault injection

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{KmsError, KmsResult};
use crate::{require_hex, require_non_empty, EncryptOutput, KeyPairUids, KeyServer};

const GCM_TAG_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyState {
    Active,
    Revoked,
}

struct StoredKey {
    material: Zeroizing<[u8; 32]>,
    tags: Vec<String>,
    state: KeyState,
    symmetric: bool,
}

#[derive(Default)]
struct Faults {
    fail_generate: bool,
    fail_rekey: bool,
    fail_export: HashSet<String>,
}

/// Keeps keys in a process-local map.
///
/// `rekey` follows KMIP: a successor key with fresh material is created
/// under a new UID and the old key stays exportable, so data sealed under
/// it remains readable.
#[derive(Default)]
pub struct MemoryKeyServer {
    keys: Mutex<HashMap<String, StoredKey>>,
    faults: Mutex<Faults>,
    exports: AtomicUsize,
}

impl MemoryKeyServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register existing material under a fresh UID (e.g. a KEK for tests).
    pub fn import_symmetric(&self, tag: &str, material: [u8; 32]) -> String {
        let uid = uuid::Uuid::new_v4().to_string();
        self.keys.lock().insert(
            uid.clone(),
            StoredKey {
                material: Zeroizing::new(material),
                tags: vec![tag.to_owned()],
                state: KeyState::Active,
                symmetric: true,
            },
        );
        uid
    }

    /// Make every `export(key_uid)` fail with a transport error.
    pub fn fail_export_for(&self, key_uid: &str) {
        self.faults.lock().fail_export.insert(key_uid.to_owned());
    }

    pub fn set_fail_generate(&self, fail: bool) {
        self.faults.lock().fail_generate = fail;
    }

    pub fn set_fail_rekey(&self, fail: bool) {
        self.faults.lock().fail_rekey = fail;
    }

    pub fn clear_faults(&self) {
        *self.faults.lock() = Faults::default();
    }

    /// Number of successful exports so far
    pub fn export_count(&self) -> usize {
        self.exports.load(Ordering::Relaxed)
    }

    pub fn contains(&self, key_uid: &str) -> bool {
        self.keys.lock().contains_key(key_uid)
    }

    fn insert_random(&self, tag: &str, symmetric: bool) -> String {
        let mut material = Zeroizing::new([0u8; 32]);
        rand::thread_rng().fill_bytes(&mut material[..]);
        let uid = uuid::Uuid::new_v4().to_string();
        self.keys.lock().insert(
            uid.clone(),
            StoredKey {
                material,
                tags: vec![tag.to_owned()],
                state: KeyState::Active,
                symmetric,
            },
        );
        uid
    }

    fn active_cipher(&self, key_uid: &str) -> KmsResult<Aes256Gcm> {
        let keys = self.keys.lock();
        let key = keys
            .get(key_uid)
            .ok_or_else(|| KmsError::KeyNotFound(key_uid.to_owned()))?;
        if key.state != KeyState::Active || !key.symmetric {
            return Err(KmsError::InvalidInput(format!(
                "key {key_uid} cannot be used for encryption"
            )));
        }
        Aes256Gcm::new_from_slice(&key.material[..])
            .map_err(|e| KmsError::InvalidInput(format!("key {key_uid}: {e}")))
    }
}

fn decode_hex(field: &str, value: &str) -> KmsResult<Vec<u8>> {
    hex::decode(value).map_err(|e| KmsError::InvalidInput(format!("{field}: {e}")))
}

#[async_trait]
impl KeyServer for MemoryKeyServer {
    async fn generate_symmetric(&self, tag: &str) -> KmsResult<String> {
        require_non_empty("tag", tag)?;
        if self.faults.lock().fail_generate {
            return Err(KmsError::Transport("injected: generate failed".into()));
        }
        Ok(self.insert_random(tag, true))
    }

    async fn generate_keypair(&self, tag: &str) -> KmsResult<KeyPairUids> {
        require_non_empty("tag", tag)?;
        if self.faults.lock().fail_generate {
            return Err(KmsError::Transport("injected: generate failed".into()));
        }
        Ok(KeyPairUids {
            private_uid: self.insert_random(tag, false),
            public_uid: self.insert_random(tag, false),
        })
    }

    async fn export(&self, key_uid: &str) -> KmsResult<Zeroizing<String>> {
        require_non_empty("key_uid", key_uid)?;
        if self.faults.lock().fail_export.contains(key_uid) {
            return Err(KmsError::Transport(format!(
                "injected: export of {key_uid} failed"
            )));
        }
        let keys = self.keys.lock();
        let key = keys
            .get(key_uid)
            .ok_or_else(|| KmsError::KeyNotFound(key_uid.to_owned()))?;
        self.exports.fetch_add(1, Ordering::Relaxed);
        Ok(Zeroizing::new(hex::encode_upper(&key.material[..])))
    }

    async fn locate(&self, tag: &str) -> KmsResult<Vec<String>> {
        require_non_empty("tag", tag)?;
        let mut uids: Vec<String> = self
            .keys
            .lock()
            .iter()
            .filter(|(_, key)| key.tags.iter().any(|t| t == tag))
            .map(|(uid, _)| uid.clone())
            .collect();
        uids.sort();
        Ok(uids)
    }

    async fn encrypt(&self, key_uid: &str, plaintext_hex: &str) -> KmsResult<EncryptOutput> {
        require_hex("plaintext", plaintext_hex)?;
        let cipher = self.active_cipher(key_uid)?;
        let plaintext = Zeroizing::new(decode_hex("plaintext", plaintext_hex)?);

        let mut iv = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut iv);
        let mut sealed = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_slice())
            .map_err(|e| KmsError::InvalidInput(format!("encrypt: {e}")))?;
        let tag = sealed.split_off(sealed.len() - GCM_TAG_LEN);

        Ok(EncryptOutput {
            ciphertext_hex: hex::encode_upper(sealed),
            iv_hex: hex::encode_upper(iv),
            tag_hex: hex::encode_upper(tag),
        })
    }

    async fn decrypt(
        &self,
        key_uid: &str,
        ciphertext_hex: &str,
        iv_hex: &str,
        tag_hex: &str,
    ) -> KmsResult<Zeroizing<String>> {
        require_hex("ciphertext", ciphertext_hex)?;
        require_hex("iv", iv_hex)?;
        require_hex("tag", tag_hex)?;
        let cipher = self.active_cipher(key_uid)?;

        let iv = decode_hex("iv", iv_hex)?;
        if iv.len() != 12 {
            return Err(KmsError::InvalidInput(format!(
                "iv must be 12 bytes, got {}",
                iv.len()
            )));
        }
        let mut sealed = decode_hex("ciphertext", ciphertext_hex)?;
        sealed.extend_from_slice(&decode_hex("tag", tag_hex)?);

        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(&iv), sealed.as_slice())
                .map_err(|_| KmsError::InvalidInput("decrypt: authentication failed".into()))?,
        );
        Ok(Zeroizing::new(hex::encode_upper(plaintext.as_slice())))
    }

    async fn rekey(&self, key_uid: &str) -> KmsResult<String> {
        require_non_empty("key_uid", key_uid)?;
        if self.faults.lock().fail_rekey {
            return Err(KmsError::Transport("injected: rekey failed".into()));
        }
        let tags = {
            let keys = self.keys.lock();
            let key = keys
                .get(key_uid)
                .ok_or_else(|| KmsError::KeyNotFound(key_uid.to_owned()))?;
            if !key.symmetric {
                return Err(KmsError::InvalidInput(format!(
                    "key {key_uid} is not a symmetric key"
                )));
            }
            key.tags.clone()
        };
        let tag = tags.first().map(String::as_str).unwrap_or("rekeyed");
        Ok(self.insert_random(tag, true))
    }

    async fn revoke(&self, key_uid: &str) -> KmsResult<()> {
        require_non_empty("key_uid", key_uid)?;
        let mut keys = self.keys.lock();
        let key = keys
            .get_mut(key_uid)
            .ok_or_else(|| KmsError::KeyNotFound(key_uid.to_owned()))?;
        key.state = KeyState::Revoked;
        Ok(())
    }

    async fn destroy(&self, key_uid: &str) -> KmsResult<()> {
        require_non_empty("key_uid", key_uid)?;
        let mut keys = self.keys.lock();
        match keys.get(key_uid).map(|k| k.state) {
            None => Err(KmsError::KeyNotFound(key_uid.to_owned())),
            Some(KeyState::Active) => Err(KmsError::InvalidInput(format!(
                "key {key_uid} must be revoked before it is destroyed"
            ))),
            Some(KeyState::Revoked) => {
                keys.remove(key_uid);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generate_export_roundtrip() {
        let kms = MemoryKeyServer::new();
        let uid = kms.generate_symmetric("file-1").await.unwrap();
        let hex_key = kms.export(&uid).await.unwrap();
        assert_eq!(hex::decode(hex_key.as_str()).unwrap().len(), 32);
        assert_eq!(kms.export_count(), 1);
        assert_eq!(kms.locate("file-1").await.unwrap(), vec![uid]);
        assert!(kms.locate("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_encrypt_decrypt() {
        let kms = MemoryKeyServer::new();
        let uid = kms.generate_symmetric("t").await.unwrap();
        let out = kms.encrypt(&uid, &hex::encode(b"secret")).await.unwrap();
        assert_eq!(out.iv_hex.len(), 24);
        assert_eq!(out.tag_hex.len(), 32);
        let pt = kms
            .decrypt(&uid, &out.ciphertext_hex, &out.iv_hex, &out.tag_hex)
            .await
            .unwrap();
        assert_eq!(hex::decode(pt.as_str()).unwrap(), b"secret");

        let flipped = if out.tag_hex.starts_with("00") { "01" } else { "00" };
        let bad_tag = format!("{flipped}{}", &out.tag_hex[2..]);
        assert!(kms
            .decrypt(&uid, &out.ciphertext_hex, &out.iv_hex, &bad_tag)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_rekey_keeps_old_material() {
        let kms = MemoryKeyServer::new();
        let uid = kms.generate_symmetric("f").await.unwrap();
        let before = kms.export(&uid).await.unwrap();
        let successor = kms.rekey(&uid).await.unwrap();
        assert_ne!(successor, uid);
        assert_eq!(kms.export(&uid).await.unwrap().as_str(), before.as_str());
        assert_ne!(kms.export(&successor).await.unwrap().as_str(), before.as_str());
        assert_eq!(kms.locate("f").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let kms = MemoryKeyServer::new();
        let uid = kms.generate_symmetric("f").await.unwrap();
        kms.fail_export_for(&uid);
        assert!(matches!(kms.export(&uid).await, Err(KmsError::Transport(_))));
        kms.set_fail_generate(true);
        assert!(kms.generate_symmetric("g").await.is_err());
        kms.clear_faults();
        assert!(kms.export(&uid).await.is_ok());
        assert!(kms.generate_symmetric("g").await.is_ok());
    }

    #[tokio::test]
    async fn test_revoke_then_destroy() {
        let kms = MemoryKeyServer::new();
        let uid = kms.generate_symmetric("f").await.unwrap();
        assert!(matches!(kms.destroy(&uid).await, Err(KmsError::InvalidInput(_))));
        kms.revoke(&uid).await.unwrap();
        assert!(kms.encrypt(&uid, "00").await.is_err());
        kms.destroy(&uid).await.unwrap();
        assert!(matches!(kms.export(&uid).await, Err(KmsError::KeyNotFound(_))));
        assert!(matches!(kms.revoke("missing").await, Err(KmsError::KeyNotFound(_))));
    }

    #[tokio::test]
    async fn test_input_validation() {
        let kms = MemoryKeyServer::new();
        assert!(matches!(kms.generate_symmetric("").await, Err(KmsError::InvalidInput(_))));
        let uid = kms.generate_symmetric("t").await.unwrap();
        assert!(matches!(kms.encrypt(&uid, "xyz").await, Err(KmsError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_keypair() {
        let kms = MemoryKeyServer::new();
        let pair = kms.generate_keypair("ecdh").await.unwrap();
        assert_ne!(pair.private_uid, pair.public_uid);
        assert!(kms.rekey(&pair.private_uid).await.is_err());
    }
}
