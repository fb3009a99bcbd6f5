//! fcrypt-info: per-inode crypt contexts
//!
//! A filesystem calls [`KeyManager::ensure_encryption_info`] before touching
//! an encrypted inode, holds a [`ContextHandle`] for in-flight I/O, and calls
//! [`KeyManager::release_encryption_info`] on eviction.

pub mod bounce;
pub mod context;
pub mod manager;
pub mod slot;

pub use bounce::{BouncePage, BouncePool, PAGE_SIZE};
pub use context::{ContextHandle, ContextIdentity, ContextStatus, CryptContext};
pub use manager::{EncryptedInode, FsCryptOps, KeyManager, FS_CFLG_OWN_PAGES};
pub use slot::CryptSlot;
