//! Keysets: serialized containers of AES-256-GCM keys
//!
//! Wire form (base64 of this JSON):
//! ```json
//! {"primaryKeyId": 2843211, "key": [{"keyId": 2843211, "status": "ENABLED",
//!   "typeUrl": "type.googleapis.com/google.crypto.tink.AesGcmKey", "value": "<base64 32 bytes>"}]}
//! ```
//!
//! A [`Keyset`] keeps its key bytes in page-locked buffers that are zeroized
//! on drop (see [`LockedKey`]). It is neither
//! `Clone` nor `Copy`: a DEK unwrapped for one request cannot be duplicated
//! out of the scope that acquired it.

use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use crate::kdf::DerivedKey;
use crate::locked::LockedKey;
use crate::KEY_SIZE;

/// Type URL recorded for AES-256-GCM keys
pub const AES_GCM_TYPE_URL: &str = "type.googleapis.com/google.crypto.tink.AesGcmKey";

const STATUS_ENABLED: &str = "ENABLED";

/// One AES-256 key inside a keyset
struct KeyMaterial {
    id: u32,
    bytes: LockedKey,
}

/// An in-memory keyset with a primary key used for encryption.
pub struct Keyset {
    primary: u32,
    keys: Vec<KeyMaterial>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeysetDoc {
    primary_key_id: u32,
    key: Vec<KeyDoc>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyDoc {
    key_id: u32,
    status: String,
    type_url: String,
    value: String,
}

impl Drop for KeyDoc {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

impl Keyset {
    fn single(bytes: LockedKey) -> Self {
        let id = key_id_for(bytes.as_bytes());
        Self {
            primary: id,
            keys: vec![KeyMaterial { id, bytes }],
        }
    }

    /// Parse a base64 keyset (the form stored wrapped in `enc_key`).
    pub fn from_encoded(encoded: &SecretString) -> anyhow::Result<Self> {
        let json = Zeroizing::new(
            STANDARD
                .decode(encoded.expose_secret().trim())
                .map_err(|e| anyhow::anyhow!("keyset is not valid base64: {e}"))?,
        );
        let doc: KeysetDoc = serde_json::from_slice(&json)
            .map_err(|e| anyhow::anyhow!("keyset is malformed: {e}"))?;

        let mut keys = Vec::with_capacity(doc.key.len());
        for key in &doc.key {
            if key.type_url != AES_GCM_TYPE_URL {
                anyhow::bail!("unsupported key type in keyset: {}", key.type_url);
            }
            if key.status != STATUS_ENABLED {
                continue;
            }
            let raw = Zeroizing::new(
                STANDARD
                    .decode(&key.value)
                    .map_err(|e| anyhow::anyhow!("key {} is not valid base64: {e}", key.key_id))?,
            );
            if raw.len() != KEY_SIZE {
                anyhow::bail!(
                    "key {} has wrong size: {} bytes (expected {})",
                    key.key_id,
                    raw.len(),
                    KEY_SIZE
                );
            }
            keys.push(KeyMaterial {
                id: key.key_id,
                bytes: LockedKey::from_slice(&raw)?,
            });
        }

        if !keys.iter().any(|k| k.id == doc.primary_key_id) {
            anyhow::bail!("keyset primary key {} is missing or disabled", doc.primary_key_id);
        }

        Ok(Self {
            primary: doc.primary_key_id,
            keys,
        })
    }

    /// Serialize to the base64 wire form.
    pub fn to_encoded(&self) -> SecretString {
        let doc = KeysetDoc {
            primary_key_id: self.primary,
            key: self
                .keys
                .iter()
                .map(|k| KeyDoc {
                    key_id: k.id,
                    status: STATUS_ENABLED.into(),
                    type_url: AES_GCM_TYPE_URL.into(),
                    value: STANDARD.encode(k.bytes.as_bytes()),
                })
                .collect(),
        };
        // Serializing plain strings and integers cannot fail
        let json = Zeroizing::new(serde_json::to_vec(&doc).unwrap_or_default());
        SecretString::from(STANDARD.encode(json.as_slice()))
    }

    /// Id of the key new ciphertexts are sealed with
    pub fn primary_id(&self) -> u32 {
        self.primary
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub(crate) fn primary_key(&self) -> &[u8; KEY_SIZE] {
        // Construction guarantees the primary is present
        self.key(self.primary)
            .unwrap_or_else(|| unreachable!("keyset without primary key"))
    }

    pub(crate) fn key(&self, id: u32) -> Option<&[u8; KEY_SIZE]> {
        self.keys.iter().find(|k| k.id == id).map(|k| k.bytes.as_bytes())
    }

    /// Build a single-key keyset from an HKDF output.
    pub fn from_derived(key: &DerivedKey) -> Self {
        let mut bytes = LockedKey::zeroed();
        bytes.as_mut_bytes().copy_from_slice(key.as_bytes());
        Self::single(bytes)
    }

    /// True when every key in the set is pinned in RAM.
    pub fn is_locked(&self) -> bool {
        self.keys.iter().all(|k| k.bytes.is_locked())
    }
}

impl std::fmt::Debug for Keyset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyset")
            .field("primary", &self.primary)
            .field("keys", &self.keys.len())
            .field("material", &"[REDACTED]")
            .finish()
    }
}

/// Generate a fresh keyset holding one random 256-bit key.
pub fn generate_keyset() -> Keyset {
    let mut bytes = LockedKey::zeroed();
    rand::thread_rng().fill_bytes(bytes.as_mut_bytes());
    Keyset::single(bytes)
}

/// Wrap a raw 32-byte key (e.g. exported from the KMS) into a keyset.
pub fn import_raw(raw: &[u8]) -> anyhow::Result<Keyset> {
    if raw.len() != KEY_SIZE {
        anyhow::bail!(
            "raw key has wrong size: {} bytes (expected {})",
            raw.len(),
            KEY_SIZE
        );
    }
    Ok(Keyset::single(LockedKey::from_slice(raw)?))
}

/// Key ids are a fingerprint of the material, so re-importing the same raw
/// key (a KEK on every boot, a KMS-held DEK on every read) yields a keyset
/// that opens ciphertexts sealed by an earlier import.
fn key_id_for(bytes: &[u8; KEY_SIZE]) -> u32 {
    let digest = Sha256::new()
        .chain_update(b"sealgate-key-id")
        .chain_update(bytes)
        .finalize();
    let id = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    // Zero is reserved so an all-zero prefix never names a real key
    id.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_distinct() {
        let a = generate_keyset();
        let b = generate_keyset();
        assert_ne!(a.primary_key(), b.primary_key(), "random keys must differ");
        assert_eq!(a.len(), 1);
    }

    #[test]
    fn test_encoded_roundtrip_preserves_material() {
        let ks = generate_keyset();
        let parsed = Keyset::from_encoded(&ks.to_encoded()).unwrap();
        assert_eq!(parsed.primary_id(), ks.primary_id());
        assert_eq!(parsed.primary_key(), ks.primary_key());
    }

    #[test]
    fn test_import_raw_rejects_wrong_length() {
        assert!(import_raw(&[7u8; 31]).is_err());
        assert!(import_raw(&[7u8; 33]).is_err());
        assert!(import_raw(&[]).is_err());
        let ks = import_raw(&[7u8; 32]).unwrap();
        assert_eq!(ks.primary_key(), &[7u8; 32]);
    }

    #[test]
    fn test_from_encoded_rejects_garbage() {
        assert!(Keyset::from_encoded(&SecretString::from("not base64!!")).is_err());
        let json_b64 = STANDARD.encode(br#"{"primaryKeyId":1,"key":[]}"#);
        assert!(Keyset::from_encoded(&SecretString::from(json_b64)).is_err());
    }

    #[test]
    fn test_from_encoded_rejects_foreign_key_type() {
        let doc = format!(
            r#"{{"primaryKeyId":9,"key":[{{"keyId":9,"status":"ENABLED","typeUrl":"type.googleapis.com/google.crypto.tink.HmacKey","value":"{}"}}]}}"#,
            STANDARD.encode([1u8; 32])
        );
        let err = Keyset::from_encoded(&SecretString::from(STANDARD.encode(doc))).unwrap_err();
        assert!(err.to_string().contains("unsupported key type"));
    }

    #[test]
    fn test_import_raw_key_id_is_stable() {
        let a = import_raw(&[3u8; 32]).unwrap();
        let b = import_raw(&[3u8; 32]).unwrap();
        let c = import_raw(&[4u8; 32]).unwrap();
        assert_eq!(a.primary_id(), b.primary_id());
        assert_ne!(a.primary_id(), c.primary_id());
        assert_ne!(a.primary_id(), 0);
    }

    #[test]
    fn test_key_material_is_locked() {
        let reference = LockedKey::zeroed();
        let ks = generate_keyset();
        assert_eq!(ks.is_locked(), reference.is_locked());
        let parsed = Keyset::from_encoded(&ks.to_encoded()).unwrap();
        assert_eq!(parsed.is_locked(), reference.is_locked());
    }

    #[test]
    fn test_debug_redacts_material() {
        let ks = import_raw(&[0x41u8; 32]).unwrap();
        let dbg = format!("{ks:?}");
        assert!(dbg.contains("[REDACTED]"));
        assert!(!dbg.contains("QUFB"));
    }
}
