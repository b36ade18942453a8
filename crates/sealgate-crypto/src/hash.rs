//! Content hashing (base64 output) and constant-time comparison

use base64::{engine::general_purpose::STANDARD, Engine};
use md5::Md5;
use sealgate_core::types::HashMethod;
use sha2::{Digest, Sha256};

/// Hash `data` with `method`, returning standard base64.
pub fn hash(method: HashMethod, data: &[u8]) -> String {
    match method {
        HashMethod::Sha256 => STANDARD.encode(Sha256::digest(data)),
        HashMethod::Md5 => STANDARD.encode(Md5::digest(data)),
    }
}

/// Recompute the hash of `data` and compare it against `expected_b64` in
/// constant time. Malformed `expected_b64` compares unequal.
pub fn compare_hash(method: HashMethod, data: &[u8], expected_b64: &str) -> bool {
    let Ok(expected) = STANDARD.decode(expected_b64.trim()) else {
        return false;
    };
    let actual: Vec<u8> = match method {
        HashMethod::Sha256 => Sha256::digest(data).to_vec(),
        HashMethod::Md5 => Md5::digest(data).to_vec(),
    };
    constant_time_eq(&actual, &expected)
}

/// Length leaks; contents do not.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
