//! sealgate-kms: key server access
//!
//! [`KeyServer`] is the seam the key manager talks to. [`KmipClient`] speaks
//! KMIP JSON over HTTPS with a client certificate; [`MemoryKeyServer`] keeps
//! keys in process for tests and local development.

pub mod client;
pub mod error;
pub mod memory;
pub mod requests;
pub mod ttlv;

pub use client::KmipClient;
pub use error::{KmsError, KmsResult};
pub use memory::MemoryKeyServer;
pub use ttlv::Ttlv;

use async_trait::async_trait;
use zeroize::Zeroizing;

/// Result of a server-side AEAD encryption, all hex-encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptOutput {
    pub ciphertext_hex: String,
    pub iv_hex: String,
    pub tag_hex: String,
}

/// Private/public UID pair returned by key-pair creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPairUids {
    pub private_uid: String,
    pub public_uid: String,
}

/// Operations the gateway needs from a KMIP-style key server.
#[async_trait]
pub trait KeyServer: Send + Sync {
    /// Create an AES-256 key tagged with `tag`; returns its UID.
    async fn generate_symmetric(&self, tag: &str) -> KmsResult<String>;

    /// Create an ECDH Curve25519 key pair tagged with `tag`.
    async fn generate_keypair(&self, tag: &str) -> KmsResult<KeyPairUids>;

    /// Raw key material, hex-encoded.
    async fn export(&self, key_uid: &str) -> KmsResult<Zeroizing<String>>;

    async fn locate(&self, tag: &str) -> KmsResult<Vec<String>>;

    async fn encrypt(&self, key_uid: &str, plaintext_hex: &str) -> KmsResult<EncryptOutput>;

    /// Returns the plaintext, hex-encoded.
    async fn decrypt(
        &self,
        key_uid: &str,
        ciphertext_hex: &str,
        iv_hex: &str,
        tag_hex: &str,
    ) -> KmsResult<Zeroizing<String>>;

    /// Rotate `key_uid`; returns the UID of the replacement key.
    async fn rekey(&self, key_uid: &str) -> KmsResult<String>;

    async fn revoke(&self, key_uid: &str) -> KmsResult<()>;

    async fn destroy(&self, key_uid: &str) -> KmsResult<()>;
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> KmsResult<()> {
    if value.trim().is_empty() {
        return Err(KmsError::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(())
}

pub(crate) fn require_hex(field: &str, value: &str) -> KmsResult<()> {
    require_non_empty(field, value)?;
    if value.len() % 2 != 0 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(KmsError::InvalidInput(format!("{field} is not valid hex")));
    }
    Ok(())
}
