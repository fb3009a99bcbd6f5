//! Cipher mode table and per-inode mode resolution

use fcrypt_core::{CryptMode, EncryptionMode, FcryptError, FcryptResult, FileType};

use crate::rustcrypto::{ALG_CBC_AES, ALG_CTS_CBC_AES, ALG_XTS_AES};

/// Cipher algorithm and key size for one encryption mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeSpec {
    pub cipher_str: &'static str,
    pub key_size: usize,
}

static AVAILABLE_MODES: [(EncryptionMode, ModeSpec); 6] = [
    (
        EncryptionMode::Aes256Xts,
        ModeSpec { cipher_str: ALG_XTS_AES, key_size: 64 },
    ),
    (
        EncryptionMode::Aes256Cts,
        ModeSpec { cipher_str: ALG_CTS_CBC_AES, key_size: 32 },
    ),
    (
        EncryptionMode::Aes128Cbc,
        ModeSpec { cipher_str: ALG_CBC_AES, key_size: 16 },
    ),
    (
        EncryptionMode::Aes128Cts,
        ModeSpec { cipher_str: ALG_CTS_CBC_AES, key_size: 16 },
    ),
    (
        EncryptionMode::Speck128_256Xts,
        ModeSpec { cipher_str: "xts(speck128)", key_size: 64 },
    ),
    (
        EncryptionMode::Speck128_256Cts,
        ModeSpec { cipher_str: "cts(cbc(speck128))", key_size: 32 },
    ),
];

/// (contents, filenames) pairs that may be combined in one policy.
static VALID_COMBINATIONS: [(EncryptionMode, EncryptionMode); 4] = [
    (EncryptionMode::Aes128Cbc, EncryptionMode::Aes128Cts),
    (EncryptionMode::Aes256Xts, EncryptionMode::Aes256Cts),
    (EncryptionMode::Speck128_256Xts, EncryptionMode::Speck128_256Cts),
    (EncryptionMode::Private, EncryptionMode::Aes256Cts),
];

/// Table entry for `mode`, or `None` if the mode has no software cipher.
pub fn mode_spec(mode: EncryptionMode) -> Option<&'static ModeSpec> {
    AVAILABLE_MODES
        .iter()
        .find(|(m, _)| *m == mode)
        .map(|(_, spec)| spec)
}

/// Every mode with a table entry, in table order.
pub fn available_modes() -> impl Iterator<Item = (EncryptionMode, &'static ModeSpec)> {
    AVAILABLE_MODES.iter().map(|(m, spec)| (*m, spec))
}

pub fn valid_combinations() -> &'static [(EncryptionMode, EncryptionMode)] {
    &VALID_COMBINATIONS
}

pub fn valid_enc_modes(contents: EncryptionMode, filenames: EncryptionMode) -> bool {
    VALID_COMBINATIONS.contains(&(contents, filenames))
}

/// Contents mode actually used for an inode: filesystems with an inline
/// encryption engine run every valid contents mode as `Private`.
pub fn data_crypt_mode(mode: EncryptionMode, inline_capable: bool) -> EncryptionMode {
    match mode {
        EncryptionMode::Invalid => EncryptionMode::Invalid,
        _ if inline_capable => EncryptionMode::Private,
        other => other,
    }
}

/// Outcome of [`resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedCipher {
    /// Mode the table lookup was made with (`Private` appears as `Aes256Xts`).
    pub mode: EncryptionMode,
    pub cipher_str: &'static str,
    pub key_size: usize,
    pub crypt_mode: CryptMode,
}

/// Pick the cipher for an inode: regular files use the contents mode,
/// directories and symlinks the filenames mode.
pub fn resolve(
    ino: u64,
    file_type: FileType,
    contents: EncryptionMode,
    filenames: EncryptionMode,
) -> FcryptResult<ResolvedCipher> {
    if !valid_enc_modes(contents, filenames) {
        tracing::warn!(
            ino,
            contents = %contents,
            filenames = %filenames,
            "inode uses unsupported encryption modes"
        );
        return Err(FcryptError::InvalidMode {
            contents,
            filenames,
        });
    }

    let (crypt_mode, mode) = match file_type {
        FileType::Regular => {
            let mode = match contents {
                EncryptionMode::Private => EncryptionMode::Aes256Xts,
                other => other,
            };
            (CryptMode::Data, mode)
        }
        FileType::Directory | FileType::Symlink => (CryptMode::Filename, filenames),
        FileType::Other(_) => {
            tracing::error!(
                ino,
                file_type = %file_type,
                "tried to load encryption info for an inode which is not encryptable"
            );
            return Err(FcryptError::NotEncryptable {
                ino,
                file_type: file_type.to_string(),
            });
        }
    };

    let spec = mode_spec(mode).ok_or(FcryptError::InvalidMode {
        contents,
        filenames,
    })?;

    Ok(ResolvedCipher {
        mode,
        cipher_str: spec.cipher_str,
        key_size: spec.key_size,
        crypt_mode,
    })
}
