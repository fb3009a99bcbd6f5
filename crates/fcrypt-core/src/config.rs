use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{FcryptError, FcryptResult};
use crate::types::KEY_DESC_PREFIX;

/// Top-level configuration (loaded from fcrypt.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FcryptConfig {
    pub keyring: KeyringConfig,
    pub policy: PolicyConfig,
    pub crypto: CryptoConfig,
    pub log: LogConfig,
}

impl FcryptConfig {
    /// Load from a TOML file, or return defaults if the file does not exist.
    pub fn load(path: &Path) -> FcryptResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| FcryptError::Config(format!("parsing config {}: {e}", path.display())))
    }

    pub fn from_toml(s: &str) -> FcryptResult<Self> {
        toml::from_str(s).map_err(|e| FcryptError::Config(e.to_string()))
    }
}

/// Master key lookup in the credential store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyringConfig {
    /// Primary key description prefix (default: "fscrypt:")
    pub key_prefix: String,
    /// Filesystem-specific prefix tried when the primary lookup fails (e.g. "ext4:")
    pub alternate_prefix: Option<String>,
}

/// Handling of inodes that carry no policy context
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Synthesize a default policy for unencrypted directories (test_dummy_encryption)
    pub dummy_context: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// The block device has an inline encryption engine; contents use the
    /// master key directly ("private" mode)
    pub inline_crypt: bool,
    /// Bounce pages preallocated for filesystems that do not manage their own
    /// (default: 32)
    pub bounce_pages: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for KeyringConfig {
    fn default() -> Self {
        Self {
            key_prefix: KEY_DESC_PREFIX.into(),
            alternate_prefix: None,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            inline_crypt: false,
            bounce_pages: 32,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}
