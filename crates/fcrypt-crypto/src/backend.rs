//! Cipher backend seam.
//!
//! fcrypt never implements block ciphers itself: every transform is obtained
//! by name from a [`CipherBackend`], keyed, used, and dropped. Dropping a
//! boxed transform is its destruction.

use fcrypt_core::FcryptResult;

/// A keyed symmetric cipher operating on whole buffers (ECB, CBC, CTS, XTS).
pub trait SkCipher: Send + Sync {
    /// Algorithm name this transform was allocated under, e.g. `xts(aes)`.
    fn algorithm(&self) -> &str;

    /// Permit keys the backend would otherwise refuse as weak (e.g. XTS keys
    /// with identical halves). Backends without a weak-key notion ignore it.
    fn allow_weak_keys(&mut self) {}

    /// Key the transform. A weak key that is not permitted yields
    /// `FcryptError::KeyRejected`; any other failure `CryptoBackend`.
    fn set_key(&mut self, key: &[u8]) -> FcryptResult<()>;

    /// Length of the key currently set, if any.
    fn key_size(&self) -> Option<usize>;

    /// Encrypt `buf` in place. `iv` is ignored by modes that take none.
    fn encrypt(&self, iv: &[u8], buf: &mut [u8]) -> FcryptResult<()>;

    /// Decrypt `buf` in place.
    fn decrypt(&self, iv: &[u8], buf: &mut [u8]) -> FcryptResult<()>;
}

/// A single-block cipher (used for ESSIV IV generation).
pub trait BlockCipher: Send + Sync {
    fn algorithm(&self) -> &str;
    fn set_key(&mut self, key: &[u8]) -> FcryptResult<()>;
    fn key_size(&self) -> Option<usize>;
    fn encrypt_block(&self, block: &mut [u8; 16]) -> FcryptResult<()>;
}

/// An unkeyed hash.
pub trait Shash: Send + Sync {
    fn algorithm(&self) -> &str;
    fn digest_size(&self) -> usize;

    /// Write the digest of `data` into `out`, which must be exactly
    /// `digest_size()` bytes.
    fn digest(&self, data: &[u8], out: &mut [u8]) -> FcryptResult<()>;
}

/// Allocates transforms by algorithm name.
pub trait CipherBackend: Send + Sync {
    fn alloc_skcipher(&self, name: &str) -> FcryptResult<Box<dyn SkCipher>>;
    fn alloc_cipher(&self, name: &str) -> FcryptResult<Box<dyn BlockCipher>>;
    fn alloc_shash(&self, name: &str) -> FcryptResult<Box<dyn Shash>>;
}
