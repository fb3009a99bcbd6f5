//! Key buffers: master key snapshots and per-file raw keys

use zeroize::Zeroize;

use fcrypt_core::{FcryptError, FcryptResult, MAX_KEY_SIZE};

/// A per-file raw key. Only the first `len` bytes are meaningful.
///
/// Zeroized on drop, on every exit path of whoever owns it.
pub struct RawKey {
    bytes: [u8; MAX_KEY_SIZE],
    len: usize,
}

impl RawKey {
    pub fn from_slice(key: &[u8]) -> FcryptResult<Self> {
        if key.len() > MAX_KEY_SIZE {
            return Err(FcryptError::KeyRejected(format!(
                "raw key is {} bytes (max {MAX_KEY_SIZE})",
                key.len()
            )));
        }
        let mut bytes = [0u8; MAX_KEY_SIZE];
        bytes[..key.len()].copy_from_slice(key);
        Ok(Self {
            bytes,
            len: key.len(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub(crate) fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.bytes[..self.len]
    }

    /// The first `key_size` bytes; derived material longer than the
    /// cipher's key is truncated.
    pub fn truncated(&self, key_size: usize) -> FcryptResult<&[u8]> {
        if key_size > self.len {
            return Err(FcryptError::KeyRejected(format!(
                "cipher needs {key_size} key bytes, only {} available",
                self.len
            )));
        }
        Ok(&self.bytes[..key_size])
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for RawKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
        self.len = 0;
    }
}

impl std::fmt::Debug for RawKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawKey")
            .field("len", &self.len)
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A master key copied out of the credential store.
///
/// Zeroized on drop to prevent secrets lingering in memory.
pub struct MasterKey {
    mode: u32,
    raw: [u8; MAX_KEY_SIZE],
    size: usize,
}

impl MasterKey {
    /// `raw` may be the full 64-byte record field; only `size` bytes are
    /// the key.
    pub fn new(mode: u32, raw: &[u8; MAX_KEY_SIZE], size: usize) -> FcryptResult<Self> {
        if size > MAX_KEY_SIZE {
            return Err(FcryptError::KeyRejected(format!(
                "key size incorrect: {size}"
            )));
        }
        Ok(Self {
            mode,
            raw: *raw,
            size,
        })
    }

    pub fn from_slice(mode: u32, key: &[u8]) -> FcryptResult<Self> {
        if key.len() > MAX_KEY_SIZE {
            return Err(FcryptError::KeyRejected(format!(
                "key size incorrect: {}",
                key.len()
            )));
        }
        let mut raw = [0u8; MAX_KEY_SIZE];
        raw[..key.len()].copy_from_slice(key);
        let key = Self::new(mode, &raw, key.len());
        raw.zeroize();
        key
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// The meaningful key bytes (`raw[..size]`).
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw[..self.size]
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.raw.zeroize();
        self.size = 0;
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("mode", &self.mode)
            .field("size", &self.size)
            .field("raw", &"[REDACTED]")
            .finish()
    }
}
