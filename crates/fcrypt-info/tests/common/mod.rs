//! Shared fixtures for the fcrypt-info integration tests.
//!
//! `CountingBackend` wraps the RustCrypto backend and tracks every transform
//! allocated and dropped, so tests can assert that nothing leaks and nothing
//! is destroyed twice. `FakeInode` / `FakeFs` stand in for a filesystem.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use fcrypt_core::config::FcryptConfig;
use fcrypt_core::{
    EncryptionMode, FcryptError, FcryptResult, FileType, PolicyContext, CONTEXT_FORMAT_V1,
};
use fcrypt_crypto::{BlockCipher, CipherBackend, RustCryptoBackend, Shash, SkCipher};
use fcrypt_info::{CryptSlot, EncryptedInode, FsCryptOps, KeyManager, FS_CFLG_OWN_PAGES};
use fcrypt_keyring::{install_master_key, MemoryKeyring};

pub const DESCRIPTOR: [u8; 8] = [0x10, 0x32, 0x54, 0x76, 0x98, 0xba, 0xdc, 0xfe];
pub const NONCE: [u8; 16] = [0x5c; 16];

// ── Counting backend ─────────────────────────────────────────────────────────

#[derive(Default)]
pub struct Counters {
    allocated: AtomicUsize,
    dropped: AtomicUsize,
    by_name: Mutex<HashMap<String, usize>>,
}

#[derive(Default)]
pub struct CountingBackend {
    counters: Arc<Counters>,
    fail_on: Mutex<Vec<String>>,
}

impl CountingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make allocations of `name` fail from now on.
    pub fn fail_on(&self, name: &str) {
        self.fail_on.lock().unwrap().push(name.to_string());
    }

    pub fn allocated(&self) -> usize {
        self.counters.allocated.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> usize {
        self.counters.dropped.load(Ordering::SeqCst)
    }

    /// Transforms currently alive.
    pub fn live(&self) -> usize {
        self.allocated() - self.dropped()
    }

    pub fn allocations_of(&self, name: &str) -> usize {
        self.counters
            .by_name
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    fn record(&self, name: &str) -> FcryptResult<Arc<Counters>> {
        if self.fail_on.lock().unwrap().iter().any(|n| n == name) {
            return Err(FcryptError::CryptoBackend(format!("injected failure for {name}")));
        }
        self.counters.allocated.fetch_add(1, Ordering::SeqCst);
        *self
            .counters
            .by_name
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default() += 1;
        Ok(Arc::clone(&self.counters))
    }
}

struct Counted<T: ?Sized> {
    inner: Box<T>,
    counters: Arc<Counters>,
}

impl<T: ?Sized> Drop for Counted<T> {
    fn drop(&mut self) {
        self.counters.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

impl SkCipher for Counted<dyn SkCipher> {
    fn algorithm(&self) -> &str {
        self.inner.algorithm()
    }
    fn allow_weak_keys(&mut self) {
        self.inner.allow_weak_keys()
    }
    fn set_key(&mut self, key: &[u8]) -> FcryptResult<()> {
        self.inner.set_key(key)
    }
    fn key_size(&self) -> Option<usize> {
        self.inner.key_size()
    }
    fn encrypt(&self, iv: &[u8], buf: &mut [u8]) -> FcryptResult<()> {
        self.inner.encrypt(iv, buf)
    }
    fn decrypt(&self, iv: &[u8], buf: &mut [u8]) -> FcryptResult<()> {
        self.inner.decrypt(iv, buf)
    }
}

impl BlockCipher for Counted<dyn BlockCipher> {
    fn algorithm(&self) -> &str {
        self.inner.algorithm()
    }
    fn set_key(&mut self, key: &[u8]) -> FcryptResult<()> {
        self.inner.set_key(key)
    }
    fn key_size(&self) -> Option<usize> {
        self.inner.key_size()
    }
    fn encrypt_block(&self, block: &mut [u8; 16]) -> FcryptResult<()> {
        self.inner.encrypt_block(block)
    }
}

impl Shash for Counted<dyn Shash> {
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

impl CipherBackend for CountingBackend {
    fn alloc_skcipher(&self, name: &str) -> FcryptResult<Box<dyn SkCipher>> {
        let inner = RustCryptoBackend.alloc_skcipher(name)?;
        let counters = self.record(name)?;
        Ok(Box::new(Counted { inner, counters }))
    }

    fn alloc_cipher(&self, name: &str) -> FcryptResult<Box<dyn BlockCipher>> {
        let inner = RustCryptoBackend.alloc_cipher(name)?;
        let counters = self.record(name)?;
        Ok(Box::new(Counted { inner, counters }))
    }

    fn alloc_shash(&self, name: &str) -> FcryptResult<Box<dyn Shash>> {
        let inner = RustCryptoBackend.alloc_shash(name)?;
        let counters = self.record(name)?;
        Ok(Box::new(Counted { inner, counters }))
    }
}

// ── Fake filesystem ──────────────────────────────────────────────────────────

pub struct FakeInode {
    pub ino: u64,
    pub file_type: FileType,
    pub encrypted: bool,
    pub slot: CryptSlot,
}

impl FakeInode {
    pub fn new(ino: u64, file_type: FileType) -> Self {
        Self {
            ino,
            file_type,
            encrypted: true,
            slot: CryptSlot::new(),
        }
    }

    pub fn unencrypted(ino: u64, file_type: FileType) -> Self {
        Self {
            encrypted: false,
            ..Self::new(ino, file_type)
        }
    }
}

impl EncryptedInode for FakeInode {
    fn ino(&self) -> u64 {
        self.ino
    }
    fn file_type(&self) -> FileType {
        self.file_type
    }
    fn is_encrypted(&self) -> bool {
        self.encrypted
    }
    fn crypt_slot(&self) -> &CryptSlot {
        &self.slot
    }
}

#[derive(Default)]
pub struct FakeFs {
    contexts: Mutex<HashMap<u64, Vec<u8>>>,
    pub key_prefix: Option<String>,
    pub dummy: bool,
    pub inline: bool,
    pub flags: u32,
    pub get_context_calls: AtomicUsize,
}

impl FakeFs {
    pub fn new() -> Self {
        Self {
            flags: FS_CFLG_OWN_PAGES,
            ..Self::default()
        }
    }

    /// Filesystem-specific key prefix, tried after the primary one.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.key_prefix = Some(prefix.to_string());
        self
    }

    pub fn with_dummy(mut self) -> Self {
        self.dummy = true;
        self
    }

    pub fn with_inline(mut self) -> Self {
        self.inline = true;
        self
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn set_context(&self, ino: u64, raw: Vec<u8>) {
        self.contexts.lock().unwrap().insert(ino, raw);
    }

    pub fn set_policy(&self, ino: u64, contents: EncryptionMode, filenames: EncryptionMode) {
        self.set_context(ino, policy(contents, filenames).to_bytes().to_vec());
    }
}

impl FsCryptOps for FakeFs {
    fn get_context(&self, inode: &dyn EncryptedInode) -> FcryptResult<Vec<u8>> {
        self.get_context_calls.fetch_add(1, Ordering::SeqCst);
        self.contexts
            .lock()
            .unwrap()
            .get(&inode.ino())
            .cloned()
            .ok_or_else(|| FcryptError::InvalidPolicy(format!("inode {} has no context", inode.ino())))
    }

    fn key_prefix(&self) -> Option<&str> {
        self.key_prefix.as_deref()
    }

    fn dummy_context_enabled(&self) -> bool {
        self.dummy
    }

    fn inline_crypt_capable(&self) -> bool {
        self.inline
    }

    fn flags(&self) -> u32 {
        self.flags
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

pub fn policy(contents: EncryptionMode, filenames: EncryptionMode) -> PolicyContext {
    PolicyContext {
        format: CONTEXT_FORMAT_V1,
        contents_mode: contents,
        filenames_mode: filenames,
        flags: 0,
        master_key_descriptor: DESCRIPTOR,
        nonce: NONCE,
    }
}

pub fn keyring_with(prefix: &str, descriptor: &[u8; 8], key: &[u8]) -> Arc<MemoryKeyring> {
    let ring = Arc::new(MemoryKeyring::new());
    install_master_key(&ring, prefix, descriptor, 0, key).unwrap();
    ring
}

pub fn manager(backend: &Arc<CountingBackend>, keyring: &Arc<MemoryKeyring>) -> KeyManager {
    manager_with(FcryptConfig::default(), backend, keyring)
}

pub fn manager_with(
    config: FcryptConfig,
    backend: &Arc<CountingBackend>,
    keyring: &Arc<MemoryKeyring>,
) -> KeyManager {
    KeyManager::new(config, backend.clone(), keyring.clone())
}
