//! Per-inode crypt context and its reference-counted lifecycle.
//!
//! ```text
//! new (count 1, Live) ──acquire──▶ count+1
//!        │                 ◀──release── count-1
//!        └── count hits 0 ──▶ Freeing ──▶ resources dropped (once)
//! ```
//!
//! The count and the status share one mutex, so no `acquire` can observe a
//! zero count and then race with teardown. Resources are dropped outside
//! that mutex.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use fcrypt_core::{
    CryptMode, EncryptionMode, FcryptError, FcryptResult, AES_BLOCK_SIZE, KEY_DESCRIPTOR_SIZE,
};
use fcrypt_crypto::{plain_iv, EssivGenerator, RawKey, SkCipher};

use crate::bounce::{BouncePage, BouncePool};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextStatus {
    Live,
    Freeing,
}

#[derive(Debug)]
struct Lifecycle {
    count: usize,
    status: ContextStatus,
}

/// Identity fields fixed when a context is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextIdentity {
    pub ino: u64,
    pub data_mode: EncryptionMode,
    pub filename_mode: EncryptionMode,
    pub crypt_mode: CryptMode,
    pub flags: u8,
    pub master_key_descriptor: [u8; KEY_DESCRIPTOR_SIZE],
}

/// Transforms and key material owned by a context.
#[derive(Default)]
pub(crate) struct ContextResources {
    pub(crate) contents: Option<Box<dyn SkCipher>>,
    pub(crate) essiv: Option<EssivGenerator>,
    /// Raw key handed to an inline encryption engine (`Private` mode).
    pub(crate) inline_key: Option<RawKey>,
}

impl ContextResources {
    fn iv_for(&self, lblk: u64) -> FcryptResult<[u8; AES_BLOCK_SIZE]> {
        match &self.essiv {
            Some(essiv) => essiv.iv_for(lblk),
            None => Ok(plain_iv(lblk)),
        }
    }

    fn contents(&self) -> FcryptResult<&dyn SkCipher> {
        self.contents.as_deref().ok_or_else(|| {
            FcryptError::CryptoBackend("context has no software contents cipher".into())
        })
    }
}

pub struct CryptContext {
    identity: ContextIdentity,
    lifecycle: Mutex<Lifecycle>,
    resources: RwLock<Option<ContextResources>>,
}

impl CryptContext {
    /// A new live context holding one reference, owned by the caller.
    pub fn new(identity: ContextIdentity) -> Arc<Self> {
        Arc::new(Self {
            identity,
            lifecycle: Mutex::new(Lifecycle {
                count: 1,
                status: ContextStatus::Live,
            }),
            resources: RwLock::new(Some(ContextResources::default())),
        })
    }

    /// Take a reference, unless the context is already being freed.
    pub fn acquire(self: &Arc<Self>) -> Option<ContextHandle> {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        if lifecycle.status == ContextStatus::Freeing {
            return None;
        }
        lifecycle.count += 1;
        Some(ContextHandle {
            ctx: Arc::clone(self),
        })
    }

    /// Drop one reference. The last one marks the context `Freeing` and
    /// destroys its resources.
    pub(crate) fn release(&self) {
        let last = {
            let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
            if lifecycle.count == 0 {
                tracing::error!(ino = self.identity.ino, "crypt context released too many times");
                return;
            }
            lifecycle.count -= 1;
            if lifecycle.count == 0 {
                lifecycle.status = ContextStatus::Freeing;
                true
            } else {
                false
            }
        };

        if last {
            let resources = self
                .resources
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            drop(resources);
            tracing::trace!(ino = self.identity.ino, "crypt context freed");
        }
    }

    /// Mutate resources while the context is still private to its builder.
    pub(crate) fn with_resources<T>(&self, f: impl FnOnce(&mut ContextResources) -> T) -> Option<T> {
        self.resources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
            .map(f)
    }

    pub fn identity(&self) -> &ContextIdentity {
        &self.identity
    }

    pub fn ino(&self) -> u64 {
        self.identity.ino
    }

    pub fn data_mode(&self) -> EncryptionMode {
        self.identity.data_mode
    }

    pub fn filename_mode(&self) -> EncryptionMode {
        self.identity.filename_mode
    }

    pub fn crypt_mode(&self) -> CryptMode {
        self.identity.crypt_mode
    }

    pub fn flags(&self) -> u8 {
        self.identity.flags
    }

    pub fn master_key_descriptor(&self) -> &[u8; KEY_DESCRIPTOR_SIZE] {
        &self.identity.master_key_descriptor
    }

    pub fn ref_count(&self) -> usize {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner).count
    }

    pub fn status(&self) -> ContextStatus {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner).status
    }

    /// True once the resources have been destroyed.
    pub fn is_torn_down(&self) -> bool {
        self.resources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl std::fmt::Debug for CryptContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptContext")
            .field("ino", &self.identity.ino)
            .field("data_mode", &self.identity.data_mode)
            .field("filename_mode", &self.identity.filename_mode)
            .field("crypt_mode", &self.identity.crypt_mode)
            .field("status", &self.status())
            .finish()
    }
}

/// One counted reference to a [`CryptContext`]. Released on drop.
pub struct ContextHandle {
    ctx: Arc<CryptContext>,
}

impl ContextHandle {
    pub fn context(&self) -> &Arc<CryptContext> {
        &self.ctx
    }

    pub fn release(self) {
        drop(self);
    }

    fn with_resources<T>(
        &self,
        f: impl FnOnce(&ContextResources) -> FcryptResult<T>,
    ) -> FcryptResult<T> {
        let guard = self
            .ctx
            .resources
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let resources = guard
            .as_ref()
            .ok_or_else(|| FcryptError::CryptoBackend("crypt context already freed".into()))?;
        f(resources)
    }

    /// Key size of the contents (or filenames) cipher, if one was built.
    pub fn contents_key_size(&self) -> Option<usize> {
        self.with_resources(|r| Ok(r.contents.as_ref().and_then(|c| c.key_size())))
            .ok()
            .flatten()
    }

    pub fn has_contents_cipher(&self) -> bool {
        self.with_resources(|r| Ok(r.contents.is_some()))
            .unwrap_or(false)
    }

    pub fn has_essiv(&self) -> bool {
        self.with_resources(|r| Ok(r.essiv.is_some())).unwrap_or(false)
    }

    pub fn has_inline_key(&self) -> bool {
        self.with_resources(|r| Ok(r.inline_key.is_some()))
            .unwrap_or(false)
    }

    /// Encrypt one logical block in place.
    pub fn encrypt_block(&self, lblk: u64, buf: &mut [u8]) -> FcryptResult<()> {
        self.with_resources(|r| {
            let iv = r.iv_for(lblk)?;
            r.contents()?.encrypt(&iv, buf)
        })
    }

    pub fn decrypt_block(&self, lblk: u64, buf: &mut [u8]) -> FcryptResult<()> {
        self.with_resources(|r| {
            let iv = r.iv_for(lblk)?;
            r.contents()?.decrypt(&iv, buf)
        })
    }

    /// Encrypt `src` into a page taken from `pool`, leaving `src` untouched.
    pub fn encrypt_page(
        &self,
        pool: &Arc<BouncePool>,
        lblk: u64,
        src: &[u8],
    ) -> FcryptResult<BouncePage> {
        let mut page = pool.get()?;
        self.encrypt_block(lblk, page.fill(src)?)?;
        Ok(page)
    }
}

impl std::ops::Deref for ContextHandle {
    type Target = CryptContext;

    fn deref(&self) -> &CryptContext {
        &self.ctx
    }
}

impl Drop for ContextHandle {
    fn drop(&mut self) {
        self.ctx.release();
    }
}

impl std::fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ContextHandle").field(&self.ctx).finish()
    }
}
