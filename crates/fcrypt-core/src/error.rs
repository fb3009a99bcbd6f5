use thiserror::Error;

use crate::types::EncryptionMode;

pub type FcryptResult<T> = Result<T, FcryptError>;

#[derive(Debug, Error)]
pub enum FcryptError {
    #[error("invalid encryption policy: {0}")]
    InvalidPolicy(String),

    #[error("unsupported encryption modes (contents mode {contents:?}, filenames mode {filenames:?})")]
    InvalidMode {
        contents: EncryptionMode,
        filenames: EncryptionMode,
    },

    #[error("inode {ino} is not encryptable (file type {file_type})")]
    NotEncryptable { ino: u64, file_type: String },

    #[error("required key not available: {0}")]
    KeyNotFound(String),

    #[error("key '{0}' is not a logon key")]
    WrongKeyType(String),

    #[error("key '{0}' has been revoked")]
    KeyRevoked(String),

    #[error("malformed master key payload: {actual} bytes (expected {expected})")]
    MalformedKey { expected: usize, actual: usize },

    #[error("master key rejected: {0}")]
    KeyRejected(String),

    #[error("crypto backend error: {0}")]
    CryptoBackend(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FcryptError {
    /// True for the "no key in the keyring" condition, which callers may
    /// treat as a soft failure.
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, FcryptError::KeyNotFound(_))
    }
}
