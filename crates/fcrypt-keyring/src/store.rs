//! Credential store seam and an in-memory logon keyring.
//!
//! An entry's payload sits behind the entry's own `RwLock`. Readers validate
//! and copy under the read lock; revocation takes the write lock and clears
//! the payload, so a reader either sees the whole payload or none.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use secrecy::SecretSlice;

use fcrypt_core::{FcryptError, FcryptResult};

/// Key types a store can hold. Only `Logon` keys (payload unreadable from
/// user space) are accepted as master keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Logon,
    User,
}

pub struct KeyEntry {
    description: String,
    key_type: KeyType,
    payload: RwLock<Option<SecretSlice<u8>>>,
}

impl KeyEntry {
    pub fn new(description: impl Into<String>, key_type: KeyType, payload: Vec<u8>) -> Self {
        Self {
            description: description.into(),
            key_type,
            payload: RwLock::new(Some(SecretSlice::from(payload))),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Read-lock the payload. `None` means the key was revoked.
    pub fn read(&self) -> RwLockReadGuard<'_, Option<SecretSlice<u8>>> {
        self.payload.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop the payload; later readers see a revoked key.
    pub fn revoke(&self) {
        let mut payload = self.payload.write().unwrap_or_else(PoisonError::into_inner);
        *payload = None;
    }

    pub fn is_revoked(&self) -> bool {
        self.read().is_none()
    }
}

impl std::fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyEntry")
            .field("description", &self.description)
            .field("key_type", &self.key_type)
            .field("revoked", &self.is_revoked())
            .finish()
    }
}

/// Resolves a key description to an entry.
pub trait CredentialStore: Send + Sync {
    /// Fails with `KeyNotFound` when nothing is registered under
    /// `description`.
    fn request_key(&self, description: &str) -> FcryptResult<Arc<KeyEntry>>;
}

/// Process-local keyring. Entries are reference counted, so a caller that
/// resolved an entry keeps it alive across a concurrent `unlink`.
#[derive(Debug, Default)]
pub struct MemoryKeyring {
    entries: RwLock<HashMap<String, Arc<KeyEntry>>>,
}

impl MemoryKeyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a key, replacing any entry with the same description.
    pub fn add_key(
        &self,
        description: impl Into<String>,
        key_type: KeyType,
        payload: Vec<u8>,
    ) -> Arc<KeyEntry> {
        let entry = Arc::new(KeyEntry::new(description, key_type, payload));
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries
            .insert(entry.description().to_string(), Arc::clone(&entry))
            .is_some()
        {
            tracing::debug!(description = entry.description(), "replaced keyring entry");
        }
        entry
    }

    /// Revoke a key in place. Returns false if no such key exists.
    pub fn revoke(&self, description: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        match entries.get(description) {
            Some(entry) => {
                entry.revoke();
                tracing::debug!(description, "revoked key");
                true
            }
            None => false,
        }
    }

    pub fn unlink(&self, description: &str) -> Option<Arc<KeyEntry>> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(description)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CredentialStore for MemoryKeyring {
    fn request_key(&self, description: &str) -> FcryptResult<Arc<KeyEntry>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(description)
            .cloned()
            .ok_or_else(|| FcryptError::KeyNotFound(description.to_string()))
    }
}
