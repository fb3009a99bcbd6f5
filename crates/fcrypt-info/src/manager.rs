//! Encryption-info orchestration for inodes.
//!
//! `ensure_encryption_info` runs, for an inode without a published context:
//!
//! 1. lazy process-wide setup (bounce page pool)
//! 2. policy context from the filesystem, or the dummy policy
//! 3. format/flags validation
//! 4. context allocation, cipher resolution
//! 5. master key lookup (primary prefix, then the alternate)
//! 6. raw key derivation (or master key copy for `Private`)
//! 7. contents cipher, plus ESSIV for AES-128-CBC regular files
//! 8. publication; a concurrent winner makes us release ours
//!
//! A missing master key is not an error: nothing is published and the call
//! succeeds, so operations that need no file contents keep working.

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use fcrypt_core::config::FcryptConfig;
use fcrypt_core::{
    CryptMode, EncryptionMode, FcryptError, FcryptResult, FileType, PolicyContext,
};
use fcrypt_crypto::{
    assign_raw_key, data_crypt_mode, init_essiv, resolve, CipherBackend, EssivHash,
};
use fcrypt_keyring::{lookup_with_fallback, CredentialStore};

use crate::bounce::BouncePool;
use crate::context::{ContextHandle, ContextIdentity, CryptContext};
use crate::slot::CryptSlot;

/// Filesystem flag: the filesystem supplies its own pages for encrypted
/// writes, so no bounce pool is needed.
pub const FS_CFLG_OWN_PAGES: u32 = 1;

/// An inode that may carry encryption state.
pub trait EncryptedInode: Send + Sync {
    fn ino(&self) -> u64;
    fn file_type(&self) -> FileType;
    /// The inode has the on-disk "encrypted" flag set.
    fn is_encrypted(&self) -> bool;
    fn crypt_slot(&self) -> &CryptSlot;
}

/// Per-filesystem hooks.
pub trait FsCryptOps: Send + Sync {
    /// The raw policy context stored for `inode`.
    fn get_context(&self, inode: &dyn EncryptedInode) -> FcryptResult<Vec<u8>>;

    /// Filesystem-specific key description prefix, tried after the primary.
    fn key_prefix(&self) -> Option<&str> {
        None
    }

    fn dummy_context_enabled(&self) -> bool {
        false
    }

    fn inline_crypt_capable(&self) -> bool {
        false
    }

    fn flags(&self) -> u32 {
        0
    }
}

/// Owner of the encryption layer's process-wide state: the ESSIV hash and
/// the bounce pool. Create one per process and keep it for as long as any
/// filesystem uses encryption; dropping it tears that state down.
pub struct KeyManager {
    config: FcryptConfig,
    backend: Arc<dyn CipherBackend>,
    keyring: Arc<dyn CredentialStore>,
    essiv_hash: EssivHash,
    bounce_pool: OnceLock<Arc<BouncePool>>,
    init_lock: Mutex<()>,
}

impl KeyManager {
    pub fn new(
        config: FcryptConfig,
        backend: Arc<dyn CipherBackend>,
        keyring: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            config,
            backend,
            keyring,
            essiv_hash: EssivHash::new(),
            bounce_pool: OnceLock::new(),
            init_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &FcryptConfig {
        &self.config
    }

    pub fn essiv_hash(&self) -> &EssivHash {
        &self.essiv_hash
    }

    /// The bounce pool, once some filesystem without its own pages needed it.
    pub fn bounce_pool(&self) -> Option<&Arc<BouncePool>> {
        self.bounce_pool.get()
    }

    /// Set up process-wide state for a filesystem with `fs_flags`.
    pub fn initialize(&self, fs_flags: u32) -> FcryptResult<()> {
        if fs_flags & FS_CFLG_OWN_PAGES != 0 || self.bounce_pool.get().is_some() {
            return Ok(());
        }

        let _guard = self.init_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.bounce_pool.get().is_some() {
            return Ok(());
        }
        let pages = self.config.crypto.bounce_pages;
        if pages == 0 {
            return Err(FcryptError::ResourceExhausted(
                "crypto.bounce_pages is 0; no bounce pool can be created".into(),
            ));
        }
        if self.bounce_pool.set(BouncePool::new(pages)).is_err() {
            tracing::trace!("bounce pool already initialized");
        }
        tracing::debug!(pages, "allocated bounce page pool");
        Ok(())
    }

    /// Make sure `inode` has a published crypt context if its key is
    /// available. Idempotent.
    pub fn ensure_encryption_info(
        &self,
        inode: &dyn EncryptedInode,
        fs: &dyn FsCryptOps,
    ) -> FcryptResult<()> {
        let slot = inode.crypt_slot();
        if slot.is_set() {
            return Ok(());
        }

        // Process-wide setup precedes policy validation, so a bad policy on a
        // filesystem without its own pages still leaves the bounce pool behind.
        self.initialize(fs.flags())?;

        let policy = self.policy_for(inode, fs)?;
        policy.validate()?;

        let ino = inode.ino();
        let file_type = inode.file_type();
        let inline = fs.inline_crypt_capable() || self.config.crypto.inline_crypt;
        let ctx = CryptContext::new(ContextIdentity {
            ino,
            data_mode: data_crypt_mode(policy.contents_mode, inline),
            filename_mode: policy.filenames_mode,
            crypt_mode: if file_type.is_regular() {
                CryptMode::Data
            } else {
                CryptMode::Filename
            },
            flags: policy.flags,
            master_key_descriptor: policy.master_key_descriptor,
        });

        match self.build(&ctx, file_type, fs, &policy) {
            Ok(()) => {}
            Err(e) if e.is_key_not_found() => {
                tracing::debug!(ino, "master key not available: {e}");
                ctx.release();
                return Ok(());
            }
            Err(e) => {
                ctx.release();
                return Err(e);
            }
        }

        match slot.publish(Arc::clone(&ctx)) {
            Ok(()) => {
                tracing::debug!(
                    ino,
                    mode = %ctx.data_mode(),
                    crypt_mode = ?ctx.crypt_mode(),
                    "published crypt context"
                );
            }
            Err(ours) => {
                tracing::trace!(ino, "lost crypt context publish race");
                ours.release();
            }
        }
        Ok(())
    }

    fn policy_for(
        &self,
        inode: &dyn EncryptedInode,
        fs: &dyn FsCryptOps,
    ) -> FcryptResult<PolicyContext> {
        match fs.get_context(inode) {
            Ok(bytes) => PolicyContext::from_bytes(&bytes),
            Err(e) => {
                let dummy = fs.dummy_context_enabled() || self.config.policy.dummy_context;
                if !dummy || inode.is_encrypted() {
                    return Err(e);
                }
                tracing::debug!(ino = inode.ino(), "using dummy policy for unencrypted inode");
                Ok(PolicyContext::dummy())
            }
        }
    }

    /// Fill `ctx` with transforms. On error whatever was installed is torn
    /// down by the caller's release.
    fn build(
        &self,
        ctx: &CryptContext,
        file_type: FileType,
        fs: &dyn FsCryptOps,
        policy: &PolicyContext,
    ) -> FcryptResult<()> {
        let ino = ctx.ino();
        let resolved = resolve(ino, file_type, ctx.data_mode(), ctx.filename_mode())?;

        let alternate = fs
            .key_prefix()
            .or(self.config.keyring.alternate_prefix.as_deref());
        let master = lookup_with_fallback(
            self.keyring.as_ref(),
            &policy.master_key_descriptor,
            &self.config.keyring.key_prefix,
            alternate,
            resolved.key_size,
        )?;

        let mode = match resolved.crypt_mode {
            CryptMode::Data => ctx.data_mode(),
            CryptMode::Filename => ctx.filename_mode(),
        };
        let raw_key = assign_raw_key(self.backend.as_ref(), mode, &policy.nonce, &master)?;
        drop(master);

        if mode == EncryptionMode::Private {
            tracing::debug!(ino, "contents handled by inline encryption");
            ctx.with_resources(|r| r.inline_key = Some(raw_key));
            return Ok(());
        }

        let mut tfm = self
            .backend
            .alloc_skcipher(resolved.cipher_str)
            .map_err(|e| {
                tracing::debug!(ino, cipher = resolved.cipher_str, "error allocating crypto tfm: {e}");
                e
            })?;
        tfm.allow_weak_keys();
        // Derived material longer than the cipher key is truncated.
        tfm.set_key(raw_key.truncated(resolved.key_size)?)?;
        ctx.with_resources(|r| r.contents = Some(tfm));

        if file_type.is_regular() && ctx.data_mode() == EncryptionMode::Aes128Cbc {
            let essiv = init_essiv(
                self.backend.as_ref(),
                &self.essiv_hash,
                raw_key.truncated(resolved.key_size)?,
            )
            .map_err(|e| {
                tracing::debug!(ino, "error allocating essiv tfm: {e}");
                e
            })?;
            ctx.with_resources(|r| r.essiv = Some(essiv));
        }
        Ok(())
    }

    /// Detach and release the inode's context (inode eviction).
    pub fn release_encryption_info(&self, inode: &dyn EncryptedInode) {
        if let Some(ctx) = inode.crypt_slot().take() {
            ctx.release();
        }
    }

    /// A counted reference to the inode's context, for use beyond one call.
    pub fn acquire_context(&self, inode: &dyn EncryptedInode) -> Option<ContextHandle> {
        inode.crypt_slot().current()?.acquire()
    }

    pub fn release_context(&self, handle: ContextHandle) {
        handle.release();
    }

    /// Encrypt `src` for logical block `lblk` into a bounce page.
    pub fn encrypt_page(
        &self,
        inode: &dyn EncryptedInode,
        lblk: u64,
        src: &[u8],
    ) -> FcryptResult<crate::bounce::BouncePage> {
        let pool = self.bounce_pool.get().ok_or_else(|| {
            FcryptError::ResourceExhausted("no bounce pool for this filesystem".into())
        })?;
        let handle = self.acquire_context(inode).ok_or_else(|| {
            FcryptError::KeyNotFound(format!("inode {} has no crypt context", inode.ino()))
        })?;
        handle.encrypt_page(pool, lblk, src)
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("key_prefix", &self.config.keyring.key_prefix)
            .field("essiv_hash", &self.essiv_hash)
            .field("bounce_pool", &self.bounce_pool.get())
            .finish()
    }
}
