//! Key derivation: HKDF-SHA256 for admin-secret wrapping

use hkdf::Hkdf;
use sha2::Sha256;

use crate::locked::LockedKey;
use crate::KEY_SIZE;

const ADMIN_SECRET_INFO: &[u8] = b"sealgate-admin-secret";

/// A 256-bit key derived via HKDF.
///
/// Held in a page-locked buffer, zeroized on drop. Not `Clone`.
pub struct DerivedKey {
    bytes: LockedKey,
}

impl DerivedKey {
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        self.bytes.as_bytes()
    }

    pub fn is_locked(&self) -> bool {
        self.bytes.is_locked()
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive a 256-bit key from `input` keying material and `salt`.
///
/// An empty salt is allowed (HKDF then uses a zero-filled salt) but the
/// input must not be empty.
pub fn derive_key(input: &[u8], salt: &[u8]) -> anyhow::Result<DerivedKey> {
    if input.is_empty() {
        anyhow::bail!("key derivation input must not be empty");
    }
    let salt = if salt.is_empty() { None } else { Some(salt) };
    let hkdf = Hkdf::<Sha256>::new(salt, input);
    let mut bytes = LockedKey::zeroed();
    hkdf.expand(ADMIN_SECRET_INFO, bytes.as_mut_bytes())
        .map_err(|e| anyhow::anyhow!("HKDF expand failed: {e}"))?;
    Ok(DerivedKey { bytes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aead::{decrypt_string, encrypt_string};
    use crate::keyset::Keyset;
    use secrecy::ExposeSecret;

    #[test]
    fn test_derive_deterministic() {
        let a = derive_key(b"admin-password", b"salt-1").unwrap();
        let b = derive_key(b"admin-password", b"salt-1").unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes(), "derivation must be deterministic");
    }

    #[test]
    fn test_derive_salt_and_input_matter() {
        let base = derive_key(b"admin-password", b"salt-1").unwrap();
        let other_salt = derive_key(b"admin-password", b"salt-2").unwrap();
        let other_input = derive_key(b"admin-passw0rd", b"salt-1").unwrap();
        assert_ne!(base.as_bytes(), other_salt.as_bytes());
        assert_ne!(base.as_bytes(), other_input.as_bytes());
    }

    #[test]
    fn test_derive_rejects_empty_input() {
        assert!(derive_key(b"", b"salt").is_err());
        assert!(derive_key(b"input", b"").is_ok());
    }

    #[test]
    fn test_derived_key_wraps_secret() {
        let key = derive_key(b"admin-password", b"admin-id-42").unwrap();
        let ks = Keyset::from_derived(&key);
        let sealed = encrypt_string(&ks, "client-secret").unwrap();

        let again = Keyset::from_derived(&derive_key(b"admin-password", b"admin-id-42").unwrap());
        assert_eq!(decrypt_string(&again, &sealed).unwrap().expose_secret(), "client-secret");

        let wrong = Keyset::from_derived(&derive_key(b"wrong-password", b"admin-id-42").unwrap());
        assert!(decrypt_string(&wrong, &sealed).is_err());
    }

    #[test]
    fn test_derived_key_is_locked_like_other_keys() {
        let reference = LockedKey::zeroed();
        let key = derive_key(b"admin-password", b"salt").unwrap();
        assert_eq!(key.is_locked(), reference.is_locked());
    }

    #[test]
    fn test_debug_redacted() {
        let key = derive_key(b"x", b"y").unwrap();
        assert!(format!("{key:?}").contains("[REDACTED]"));
    }
}
