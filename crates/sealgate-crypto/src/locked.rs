//! Page-locked key storage
//!
//! Every raw 256-bit key the gateway holds (KEK, unwrapped DEKs, HKDF
//! outputs) lives in a [`LockedKey`]: a heap buffer pinned with `mlock` so it
//! is never written to swap, zeroized and unlocked on drop. A failed `mlock`
//! (e.g. `RLIMIT_MEMLOCK` exhausted) is logged and the key stays usable.

use zeroize::Zeroize;

use crate::KEY_SIZE;

pub struct LockedKey {
    bytes: Box<[u8; KEY_SIZE]>,
    locked: bool,
}

impl LockedKey {
    /// A zero-filled, locked buffer to write key material into.
    pub fn zeroed() -> Self {
        let bytes = Box::new([0u8; KEY_SIZE]);
        let locked = lock(bytes.as_ptr());
        Self { bytes, locked }
    }

    /// Copy `raw` into a fresh locked buffer. `raw` must be `KEY_SIZE` bytes.
    pub fn from_slice(raw: &[u8]) -> anyhow::Result<Self> {
        if raw.len() != KEY_SIZE {
            anyhow::bail!(
                "key has wrong size: {} bytes (expected {})",
                raw.len(),
                KEY_SIZE
            );
        }
        let mut key = Self::zeroed();
        key.bytes.copy_from_slice(raw);
        Ok(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8; KEY_SIZE] {
        &mut self.bytes
    }

    /// False when the OS refused to pin the page.
    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

impl Drop for LockedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
        if self.locked {
            unlock(self.bytes.as_ptr());
        }
    }
}

impl std::fmt::Debug for LockedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockedKey")
            .field("bytes", &"[REDACTED]")
            .field("locked", &self.locked)
            .finish()
    }
}

#[cfg(unix)]
fn lock(ptr: *const u8) -> bool {
    // SAFETY: `ptr` points at a live heap allocation of KEY_SIZE bytes owned
    // by the caller; mlock does not read or write through it.
    let ret = unsafe { libc::mlock(ptr as *const libc::c_void, KEY_SIZE) };
    if ret != 0 {
        tracing::warn!("mlock failed: {}", std::io::Error::last_os_error());
        return false;
    }
    true
}

#[cfg(unix)]
fn unlock(ptr: *const u8) {
    // SAFETY: same allocation that was passed to `lock`, still alive.
    let ret = unsafe { libc::munlock(ptr as *const libc::c_void, KEY_SIZE) };
    if ret != 0 {
        tracing::warn!("munlock failed: {}", std::io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn lock(_ptr: *const u8) -> bool {
    false
}

#[cfg(not(unix))]
fn unlock(_ptr: *const u8) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_slice_copies_and_checks_length() {
        let key = LockedKey::from_slice(&[7u8; KEY_SIZE]).unwrap();
        assert_eq!(key.as_bytes(), &[7u8; KEY_SIZE]);
        assert!(LockedKey::from_slice(&[7u8; 31]).is_err());
        assert!(LockedKey::from_slice(&[]).is_err());
    }

    #[cfg(unix)]
    fn memlock_limit() -> u64 {
        let mut limit = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // SAFETY: getrlimit writes into the struct we own
        if unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, &mut limit) } != 0 {
            return 0;
        }
        limit.rlim_cur as u64
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_then_drop() {
        let mut key = LockedKey::zeroed();
        if memlock_limit() >= 64 * 1024 {
            assert!(key.is_locked(), "mlock of one key page should succeed");
        }
        key.as_mut_bytes().copy_from_slice(&[0xAB; KEY_SIZE]);
        assert_eq!(key.as_bytes()[0], 0xAB);
        drop(key);

        let keys: Vec<LockedKey> = (0..64)
            .map(|i| LockedKey::from_slice(&[i as u8; KEY_SIZE]).unwrap())
            .collect();
        if memlock_limit() >= 1024 * 1024 {
            assert!(keys.iter().all(LockedKey::is_locked));
        }
        drop(keys);
    }

    #[test]
    fn test_debug_redacts() {
        let key = LockedKey::from_slice(&[0x41; KEY_SIZE]).unwrap();
        let dbg = format!("{key:?}");
        assert!(dbg.contains("[REDACTED]"));
        assert!(!dbg.contains("65"));
    }
}
