use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{FcryptError, FcryptResult};

/// The only on-disk policy context format accepted.
pub const CONTEXT_FORMAT_V1: u8 = 1;

/// Filename padding flags (0x00..=0x03); no other policy flags are recognized.
pub const POLICY_FLAGS_PAD_MASK: u8 = 0x03;
pub const POLICY_FLAGS_VALID: u8 = POLICY_FLAGS_PAD_MASK;

/// Size of the master key descriptor stored in each policy context.
pub const KEY_DESCRIPTOR_SIZE: usize = 8;

/// Size of the per-file nonce; also the AES-128 key size used for derivation.
pub const NONCE_SIZE: usize = 16;

/// Largest key any supported mode consumes (AES-256-XTS: two 256-bit keys).
pub const MAX_KEY_SIZE: usize = 64;

pub const AES_BLOCK_SIZE: usize = 16;

/// Default key description prefix in the credential store.
pub const KEY_DESC_PREFIX: &str = "fscrypt:";

/// Byte length of a serialized master key record:
/// `mode: u32 LE | raw: [u8; 64] | size: u32 LE`.
pub const MASTER_KEY_RECORD_SIZE: usize = 4 + MAX_KEY_SIZE + 4;

/// Encryption modes as numbered in the on-disk policy context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum EncryptionMode {
    Invalid = 0,
    Aes256Xts = 1,
    Aes256Gcm = 2,
    Aes256Cbc = 3,
    Aes256Cts = 4,
    Aes128Cbc = 5,
    Aes128Cts = 6,
    Speck128_256Xts = 7,
    Speck128_256Cts = 8,
    /// Contents are encrypted by an inline (hardware) engine using the
    /// master key directly.
    Private = 127,
}

impl EncryptionMode {
    pub const ALL: [EncryptionMode; 10] = [
        EncryptionMode::Invalid,
        EncryptionMode::Aes256Xts,
        EncryptionMode::Aes256Gcm,
        EncryptionMode::Aes256Cbc,
        EncryptionMode::Aes256Cts,
        EncryptionMode::Aes128Cbc,
        EncryptionMode::Aes128Cts,
        EncryptionMode::Speck128_256Xts,
        EncryptionMode::Speck128_256Cts,
        EncryptionMode::Private,
    ];

    pub fn from_u8(v: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| *m as u8 == v)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Canonical lowercase name, as accepted by `FromStr`.
    pub fn name(self) -> &'static str {
        match self {
            EncryptionMode::Invalid => "invalid",
            EncryptionMode::Aes256Xts => "aes-256-xts",
            EncryptionMode::Aes256Gcm => "aes-256-gcm",
            EncryptionMode::Aes256Cbc => "aes-256-cbc",
            EncryptionMode::Aes256Cts => "aes-256-cts",
            EncryptionMode::Aes128Cbc => "aes-128-cbc",
            EncryptionMode::Aes128Cts => "aes-128-cts",
            EncryptionMode::Speck128_256Xts => "speck128-256-xts",
            EncryptionMode::Speck128_256Cts => "speck128-256-cts",
            EncryptionMode::Private => "private",
        }
    }
}

impl fmt::Display for EncryptionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EncryptionMode {
    type Err = FcryptError;

    fn from_str(s: &str) -> FcryptResult<Self> {
        let lowered = s.to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.name() == lowered)
            .ok_or_else(|| FcryptError::InvalidPolicy(format!("unknown encryption mode '{s}'")))
    }
}

/// File type of the inode a context is being built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    /// Device nodes, fifos, sockets: never encryptable. Carries the raw
    /// `S_IFMT` bits for diagnostics.
    Other(u32),
}

impl FileType {
    pub fn is_regular(self) -> bool {
        matches!(self, FileType::Regular)
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileType::Regular => f.write_str("regular"),
            FileType::Directory => f.write_str("directory"),
            FileType::Symlink => f.write_str("symlink"),
            FileType::Other(bits) => write!(f, "{bits:#o}"),
        }
    }
}

/// Whether a context encrypts file contents or file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptMode {
    Data,
    Filename,
}

/// On-disk encryption policy context, format v1.
///
/// Layout (28 bytes):
/// ```text
/// [format: u8][contents_mode: u8][filenames_mode: u8][flags: u8]
/// [master_key_descriptor: 8 bytes][nonce: 16 bytes]
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct PolicyContext {
    pub format: u8,
    pub contents_mode: EncryptionMode,
    pub filenames_mode: EncryptionMode,
    pub flags: u8,
    pub master_key_descriptor: [u8; KEY_DESCRIPTOR_SIZE],
    pub nonce: [u8; NONCE_SIZE],
}

impl PolicyContext {
    pub const SIZE: usize = 4 + KEY_DESCRIPTOR_SIZE + NONCE_SIZE;

    /// Descriptor used by the implicit default policy.
    pub const DUMMY_DESCRIPTOR: [u8; KEY_DESCRIPTOR_SIZE] = [0x42; KEY_DESCRIPTOR_SIZE];

    /// The implicit policy synthesized for a not-yet-encrypted directory
    /// when the filesystem permits it.
    pub fn dummy() -> Self {
        Self {
            format: CONTEXT_FORMAT_V1,
            contents_mode: EncryptionMode::Aes256Xts,
            filenames_mode: EncryptionMode::Aes256Cts,
            flags: 0,
            master_key_descriptor: Self::DUMMY_DESCRIPTOR,
            nonce: [0u8; NONCE_SIZE],
        }
    }

    /// Parse a raw context as returned by the filesystem's metadata provider.
    ///
    /// Only the length is checked here; call [`PolicyContext::validate`] for
    /// format and flags. Mode bytes with no known meaning decode as
    /// [`EncryptionMode::Invalid`].
    pub fn from_bytes(buf: &[u8]) -> FcryptResult<Self> {
        if buf.len() != Self::SIZE {
            return Err(FcryptError::InvalidPolicy(format!(
                "policy context is {} bytes (expected {})",
                buf.len(),
                Self::SIZE
            )));
        }

        let mode = |b: u8| {
            EncryptionMode::from_u8(b).unwrap_or_else(|| {
                tracing::debug!(mode = b, "unknown encryption mode in policy context");
                EncryptionMode::Invalid
            })
        };

        let mut master_key_descriptor = [0u8; KEY_DESCRIPTOR_SIZE];
        master_key_descriptor.copy_from_slice(&buf[4..4 + KEY_DESCRIPTOR_SIZE]);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&buf[4 + KEY_DESCRIPTOR_SIZE..]);

        Ok(Self {
            format: buf[0],
            contents_mode: mode(buf[1]),
            filenames_mode: mode(buf[2]),
            flags: buf[3],
            master_key_descriptor,
            nonce,
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0] = self.format;
        out[1] = self.contents_mode.as_u8();
        out[2] = self.filenames_mode.as_u8();
        out[3] = self.flags;
        out[4..4 + KEY_DESCRIPTOR_SIZE].copy_from_slice(&self.master_key_descriptor);
        out[4 + KEY_DESCRIPTOR_SIZE..].copy_from_slice(&self.nonce);
        out
    }

    /// Reject any format other than v1 and any unrecognized flag bit.
    pub fn validate(&self) -> FcryptResult<()> {
        if self.format != CONTEXT_FORMAT_V1 {
            return Err(FcryptError::InvalidPolicy(format!(
                "unsupported context format {}",
                self.format
            )));
        }
        if self.flags & !POLICY_FLAGS_VALID != 0 {
            return Err(FcryptError::InvalidPolicy(format!(
                "unrecognized policy flags {:#04x}",
                self.flags
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for PolicyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyContext")
            .field("format", &self.format)
            .field("contents_mode", &self.contents_mode)
            .field("filenames_mode", &self.filenames_mode)
            .field("flags", &self.flags)
            .field("master_key_descriptor", &self.master_key_descriptor)
            .field("nonce", &"[REDACTED]")
            .finish()
    }
}
