//! Whole-buffer AES-256-GCM sealing over a [`Keyset`]
//!
//! Output: `[0x01][key id, 4 bytes BE][12-byte nonce][ciphertext + 16-byte tag]`

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use secrecy::SecretString;
use zeroize::Zeroizing;

use crate::keyset::Keyset;
use crate::{NONCE_SIZE, PREFIX_SIZE, TAG_SIZE};

const FORMAT_VERSION: u8 = 0x01;

/// Encrypt `plaintext` under the keyset's primary key with a fresh random nonce.
pub fn encrypt(keyset: &Keyset, plaintext: &[u8]) -> anyhow::Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(keyset.primary_key())
        .map_err(|e| anyhow::anyhow!("cipher init failed: {e}"))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| anyhow::anyhow!("encryption failed: {e}"))?;

    let mut out = Vec::with_capacity(PREFIX_SIZE + NONCE_SIZE + ciphertext.len());
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&keyset.primary_id().to_be_bytes());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt the output of [`encrypt`]. Fails on tag mismatch, unknown key id
/// or a malformed envelope.
pub fn decrypt(keyset: &Keyset, sealed: &[u8]) -> anyhow::Result<Vec<u8>> {
    if sealed.len() < PREFIX_SIZE + NONCE_SIZE + TAG_SIZE {
        anyhow::bail!(
            "ciphertext too short: {} bytes (minimum {})",
            sealed.len(),
            PREFIX_SIZE + NONCE_SIZE + TAG_SIZE
        );
    }
    if sealed[0] != FORMAT_VERSION {
        anyhow::bail!("unsupported ciphertext format version: {:#04x}", sealed[0]);
    }

    let mut id_bytes = [0u8; 4];
    id_bytes.copy_from_slice(&sealed[1..PREFIX_SIZE]);
    let key_id = u32::from_be_bytes(id_bytes);
    let key = keyset
        .key(key_id)
        .ok_or_else(|| anyhow::anyhow!("ciphertext was sealed with key {key_id}, not in keyset"))?;

    let (nonce_bytes, ciphertext) = sealed[PREFIX_SIZE..].split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|e| anyhow::anyhow!("cipher init failed: {e}"))?;

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| anyhow::anyhow!("decryption failed: invalid key or corrupted data"))
}

/// Encrypt a short string; returns base64.
pub fn encrypt_string(keyset: &Keyset, plaintext: &str) -> anyhow::Result<String> {
    let sealed = encrypt(keyset, plaintext.as_bytes())?;
    Ok(STANDARD.encode(sealed))
}

/// Decrypt the output of [`encrypt_string`].
pub fn decrypt_string(keyset: &Keyset, sealed_b64: &str) -> anyhow::Result<SecretString> {
    let sealed = STANDARD
        .decode(sealed_b64.trim())
        .map_err(|e| anyhow::anyhow!("sealed string is not valid base64: {e}"))?;
    let plaintext = Zeroizing::new(decrypt(keyset, &sealed)?);
    let text = std::str::from_utf8(&plaintext)
        .map_err(|_| anyhow::anyhow!("decrypted string is not valid UTF-8"))?;
    Ok(SecretString::from(text.to_owned()))
}

/// Wrap a keyset (typically a DEK) under another (the KEK).
pub fn wrap_keyset(kek: &Keyset, dek: &Keyset) -> anyhow::Result<String> {
    use secrecy::ExposeSecret;
    encrypt_string(kek, dek.to_encoded().expose_secret())
}

/// Unwrap the output of [`wrap_keyset`].
pub fn unwrap_keyset(kek: &Keyset, wrapped_b64: &str) -> anyhow::Result<Keyset> {
    let encoded = decrypt_string(kek, wrapped_b64)?;
    Keyset::from_encoded(&encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyset::{generate_keyset, import_raw};
    use proptest::prelude::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let ks = generate_keyset();
        let plaintext = b"hello world\n";
        let sealed = encrypt(&ks, plaintext).unwrap();
        assert_ne!(&sealed[..], &plaintext[..]);
        assert_eq!(decrypt(&ks, &sealed).unwrap(), plaintext);
    }

    #[test]
    fn test_sealed_size() {
        let ks = generate_keyset();
        let sealed = encrypt(&ks, &[0u8; 1000]).unwrap();
        // prefix (5) + nonce (12) + plaintext (1000) + tag (16)
        assert_eq!(sealed.len(), 5 + 12 + 1000 + 16);
    }

    #[test]
    fn test_nonce_is_fresh() {
        let ks = generate_keyset();
        let a = encrypt(&ks, b"same input").unwrap();
        let b = encrypt(&ks, b"same input").unwrap();
        assert_ne!(a, b, "two encryptions must use different nonces");
    }

    #[test]
    fn test_decrypt_wrong_keyset() {
        let a = generate_keyset();
        let b = generate_keyset();
        let sealed = encrypt(&a, b"secret").unwrap();
        let err = decrypt(&b, &sealed).unwrap_err();
        assert!(err.to_string().contains("not in keyset"));
    }

    #[test]
    fn test_reimported_raw_key_opens_old_ciphertext() {
        let a = import_raw(&[9u8; 32]).unwrap();
        let sealed = encrypt(&a, b"secret").unwrap();
        drop(a);
        let b = import_raw(&[9u8; 32]).unwrap();
        assert_eq!(decrypt(&b, &sealed).unwrap(), b"secret");
    }

    #[test]
    fn test_tampered_ciphertext() {
        let ks = generate_keyset();
        let mut sealed = encrypt(&ks, b"secret data").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(decrypt(&ks, &sealed).is_err(), "tampered tag must fail");

        let mut sealed = encrypt(&ks, b"secret data").unwrap();
        sealed[PREFIX_SIZE + NONCE_SIZE] ^= 0xFF;
        assert!(decrypt(&ks, &sealed).is_err(), "tampered body must fail");
    }

    #[test]
    fn test_malformed_input() {
        let ks = generate_keyset();
        assert!(decrypt(&ks, b"").is_err());
        assert!(decrypt(&ks, &[0x01; 20]).is_err());
        let mut sealed = encrypt(&ks, b"x").unwrap();
        sealed[0] = 0x02;
        assert!(decrypt(&ks, &sealed).unwrap_err().to_string().contains("version"));
    }

    #[test]
    fn test_string_roundtrip() {
        use secrecy::ExposeSecret;
        let ks = generate_keyset();
        let sealed = encrypt_string(&ks, "admin-secret").unwrap();
        assert!(STANDARD.decode(&sealed).is_ok());
        assert_eq!(decrypt_string(&ks, &sealed).unwrap().expose_secret(), "admin-secret");
    }

    #[test]
    fn test_wrap_unwrap_keyset() {
        let kek = generate_keyset();
        let dek = generate_keyset();
        let wrapped = wrap_keyset(&kek, &dek).unwrap();
        let unwrapped = unwrap_keyset(&kek, &wrapped).unwrap();

        let sealed = encrypt(&dek, b"file body").unwrap();
        assert_eq!(decrypt(&unwrapped, &sealed).unwrap(), b"file body");

        let other = generate_keyset();
        assert!(unwrap_keyset(&other, &wrapped).is_err());
    }

    proptest! {
        #[test]
        fn prop_roundtrip(data in proptest::collection::vec(any::<u8>(), 1..4096)) {
            let ks = generate_keyset();
            let sealed = encrypt(&ks, &data).unwrap();
            prop_assert_ne!(&sealed, &data);
            prop_assert_eq!(decrypt(&ks, &sealed).unwrap(), data);
        }
    }
}
