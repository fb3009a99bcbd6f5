//! ESSIV: encrypted salt-sector IVs for CBC contents
//!
//! ```text
//! salt = SHA-256(raw_key[..key_size])
//! IV(lblk) = AES-256(salt, le64(lblk) || 0^8)
//! ```
//!
//! The salt is always 32 bytes, so IV generation uses AES-256 even when the
//! contents cipher is AES-128.

use std::sync::OnceLock;

use zeroize::Zeroizing;

use fcrypt_core::{FcryptError, FcryptResult, AES_BLOCK_SIZE};

use crate::backend::{BlockCipher, CipherBackend, Shash};
use crate::rustcrypto::{ALG_AES, ALG_SHA256};

pub const ESSIV_SALT_SIZE: usize = 32;

/// Shared SHA-256 transform, created on first use.
///
/// Concurrent first users may each allocate one; the first to install it
/// wins and the others drop theirs. One instance serves every context built
/// by its owner (a `KeyManager`, which lives as long as the encryption layer
/// itself) and is dropped only with that owner.
#[derive(Default)]
pub struct EssivHash {
    tfm: OnceLock<Box<dyn Shash>>,
}

impl EssivHash {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.tfm.get().is_some()
    }

    pub fn get_or_init(&self, backend: &dyn CipherBackend) -> FcryptResult<&dyn Shash> {
        if let Some(tfm) = self.tfm.get() {
            return Ok(tfm.as_ref());
        }

        let tfm = backend.alloc_shash(ALG_SHA256).map_err(|e| {
            tracing::warn!("error allocating SHA-256 transform: {e}");
            e
        })?;
        if tfm.digest_size() != ESSIV_SALT_SIZE {
            return Err(FcryptError::CryptoBackend(format!(
                "{ALG_SHA256} digest is {} bytes",
                tfm.digest_size()
            )));
        }
        if self.tfm.set(tfm).is_err() {
            tracing::trace!("lost SHA-256 transform init race, using the installed one");
        }

        self.tfm
            .get()
            .map(|tfm| tfm.as_ref())
            .ok_or_else(|| FcryptError::CryptoBackend("SHA-256 transform missing".into()))
    }
}

impl std::fmt::Debug for EssivHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EssivHash")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

pub fn derive_essiv_salt(
    hash: &dyn Shash,
    key: &[u8],
) -> FcryptResult<Zeroizing<[u8; ESSIV_SALT_SIZE]>> {
    let mut salt = Zeroizing::new([0u8; ESSIV_SALT_SIZE]);
    hash.digest(key, &mut salt[..])?;
    Ok(salt)
}

/// IV generator keyed with the ESSIV salt.
pub struct EssivGenerator {
    tfm: Box<dyn BlockCipher>,
}

impl EssivGenerator {
    pub fn iv_for(&self, lblk: u64) -> FcryptResult<[u8; AES_BLOCK_SIZE]> {
        let mut iv = plain_iv(lblk);
        self.tfm.encrypt_block(&mut iv)?;
        Ok(iv)
    }

    pub fn key_size(&self) -> Option<usize> {
        self.tfm.key_size()
    }
}

impl std::fmt::Debug for EssivGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EssivGenerator")
            .field("algorithm", &self.tfm.algorithm())
            .finish()
    }
}

/// Build the ESSIV cipher for `raw_key` (already truncated to the contents
/// key size). The salt never outlives this call.
pub fn init_essiv(
    backend: &dyn CipherBackend,
    hash: &EssivHash,
    raw_key: &[u8],
) -> FcryptResult<EssivGenerator> {
    let mut tfm = backend.alloc_cipher(ALG_AES)?;
    let salt = derive_essiv_salt(hash.get_or_init(backend)?, raw_key)?;
    tfm.set_key(&salt[..])?;
    Ok(EssivGenerator { tfm })
}

/// IV for modes without ESSIV: the logical block number, little-endian,
/// zero-padded to one block.
pub fn plain_iv(lblk: u64) -> [u8; AES_BLOCK_SIZE] {
    let mut iv = [0u8; AES_BLOCK_SIZE];
    iv[..8].copy_from_slice(&lblk.to_le_bytes());
    iv
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rustcrypto::RustCryptoBackend;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};

    #[test]
    fn test_salt_is_sha256_of_key() {
        let hash = EssivHash::new();
        let tfm = hash.get_or_init(&RustCryptoBackend).unwrap();
        let salt = derive_essiv_salt(tfm, b"abc").unwrap();
        assert_eq!(
            salt.to_vec(),
            hex::decode("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
                .unwrap()
        );
    }

    #[test]
    fn test_essiv_uses_aes256_and_is_deterministic() {
        let hash = EssivHash::new();
        let a = init_essiv(&RustCryptoBackend, &hash, &[0x10; 16]).unwrap();
        let b = init_essiv(&RustCryptoBackend, &hash, &[0x10; 16]).unwrap();
        let c = init_essiv(&RustCryptoBackend, &hash, &[0x11; 16]).unwrap();

        assert_eq!(a.key_size(), Some(32));
        assert_eq!(a.iv_for(5).unwrap(), b.iv_for(5).unwrap());
        assert_ne!(a.iv_for(5).unwrap(), a.iv_for(6).unwrap());
        assert_ne!(a.iv_for(5).unwrap(), c.iv_for(5).unwrap());
        assert_ne!(a.iv_for(5).unwrap(), plain_iv(5));
    }

    #[test]
    fn test_plain_iv_layout() {
        let iv = plain_iv(0x0102);
        assert_eq!(&iv[..2], &[0x02, 0x01]);
        assert_eq!(&iv[2..], &[0u8; 14]);
    }

    /// Backend that counts SHA-256 transforms allocated and dropped.
    struct CountingHashBackend {
        allocated: Arc<AtomicUsize>,
        dropped: Arc<AtomicUsize>,
    }

    struct CountedHash {
        inner: Box<dyn Shash>,
        dropped: Arc<AtomicUsize>,
    }

    impl Drop for CountedHash {
        fn drop(&mut self) {
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Shash for CountedHash {
        fn algorithm(&self) -> &str {
            self.inner.algorithm()
        }
        fn digest_size(&self) -> usize {
            self.inner.digest_size()
        }
        fn digest(&self, data: &[u8], out: &mut [u8]) -> FcryptResult<()> {
            self.inner.digest(data, out)
        }
    }

    impl CipherBackend for CountingHashBackend {
        fn alloc_skcipher(&self, name: &str) -> FcryptResult<Box<dyn crate::SkCipher>> {
            RustCryptoBackend.alloc_skcipher(name)
        }
        fn alloc_cipher(&self, name: &str) -> FcryptResult<Box<dyn BlockCipher>> {
            RustCryptoBackend.alloc_cipher(name)
        }
        fn alloc_shash(&self, name: &str) -> FcryptResult<Box<dyn Shash>> {
            self.allocated.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountedHash {
                inner: RustCryptoBackend.alloc_shash(name)?,
                dropped: Arc::clone(&self.dropped),
            }))
        }
    }

    #[test]
    fn test_concurrent_init_installs_one_transform() {
        let allocated = Arc::new(AtomicUsize::new(0));
        let dropped = Arc::new(AtomicUsize::new(0));
        let backend = Arc::new(CountingHashBackend {
            allocated: Arc::clone(&allocated),
            dropped: Arc::clone(&dropped),
        });
        let hash = Arc::new(EssivHash::new());
        let barrier = Arc::new(Barrier::new(16));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let backend = Arc::clone(&backend);
                let hash = Arc::clone(&hash);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    init_essiv(backend.as_ref(), &hash, &[1u8; 16])
                        .unwrap()
                        .iv_for(0)
                        .unwrap()
                })
            })
            .collect();

        let ivs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ivs.windows(2).all(|w| w[0] == w[1]));
        assert!(hash.is_initialized());

        // Every redundant transform was dropped; exactly one is still alive.
        let alive = allocated.load(Ordering::SeqCst) - dropped.load(Ordering::SeqCst);
        assert_eq!(alive, 1);

        drop(hash);
        assert_eq!(allocated.load(Ordering::SeqCst), dropped.load(Ordering::SeqCst));
    }
}
