//! fcrypt-core: shared types for the fcrypt per-inode encryption layer
//!
//! - `types`: on-disk policy context (v1), encryption modes, file types,
//!   master-key record layout
//! - `error`: the error taxonomy shared by every fcrypt crate
//! - `config`: `fcrypt.toml` schema

pub mod config;
pub mod error;
pub mod types;

pub use error::{FcryptError, FcryptResult};
pub use types::{
    CryptMode, EncryptionMode, FileType, PolicyContext, AES_BLOCK_SIZE, CONTEXT_FORMAT_V1,
    KEY_DESCRIPTOR_SIZE, KEY_DESC_PREFIX, MASTER_KEY_RECORD_SIZE, MAX_KEY_SIZE, NONCE_SIZE,
    POLICY_FLAGS_VALID,
};
