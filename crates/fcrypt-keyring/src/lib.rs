//! fcrypt-keyring: master key resolution
//!
//! Master keys live in a credential store under a description built from a
//! prefix and the policy's key descriptor:
//!   `fscrypt:` + hex(descriptor)  (e.g. `fscrypt:4242424242424242`)
//!
//! Lookup order:
//!   1. primary prefix (`[keyring] key_prefix`, default `fscrypt:`)
//!   2. the filesystem's own prefix, if it has one (e.g. `ext4:`)
//!
//! Each entry is a logon key whose payload is a 72-byte master key record.

pub mod lookup;
pub mod store;

pub use lookup::{
    decode_master_key_record, encode_master_key_record, install_master_key, key_description,
    lookup_master_key, lookup_with_fallback,
};
pub use store::{CredentialStore, KeyEntry, KeyType, MemoryKeyring};
