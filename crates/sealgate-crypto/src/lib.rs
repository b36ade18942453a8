//! sealgate-crypto: the gateway's crypto primitive
//!
//! Every file is sealed with its own data encryption key (DEK). DEKs and the
//! process-wide key encryption key (KEK) travel as *keysets*: a serialized,
//! base64-encoded container of AES-256-GCM keys with one primary.
//!
//! ```text
//! KEK keyset (KMS export or local file)
//!   └── wraps DEK keyset  → metadata.enc_key   (encrypt_string, base64)
//!         └── seals file  → <file_uid>.enc     (encrypt, whole-file AEAD)
//! ```
//!
//! Ciphertext layout (binary):
//! ```text
//! [1 byte: format version 0x01][4 bytes: key id, BE][12 bytes: nonce][N bytes: ciphertext][16 bytes: tag]
//! ```
//! Associated data is always empty.

pub mod aead;
pub mod hash;
pub mod kdf;
pub mod keyset;
pub mod locked;
pub mod sniff;

pub use aead::{decrypt, decrypt_string, encrypt, encrypt_string, unwrap_keyset, wrap_keyset};
pub use hash::{compare_hash, hash};
pub use kdf::{derive_key, DerivedKey};
pub use keyset::{generate_keyset, import_raw, Keyset};
pub use locked::LockedKey;
pub use sniff::detect_mime;

/// Size of an AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Version byte + key id
pub const PREFIX_SIZE: usize = 5;

/// Algorithm label recorded in `metadata.key_algo`
pub const KEY_ALGO: &str = "AES256-GCM";
