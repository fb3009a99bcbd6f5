//! RustCrypto-backed [`CipherBackend`].
//!
//! Algorithm names follow the kernel crypto API spelling so policies and
//! the mode table stay backend-agnostic:
//!
//! | name            | key sizes    | notes                                   |
//! |-----------------|--------------|-----------------------------------------|
//! | `ecb(aes)`      | 16 / 24 / 32 | whole blocks only, IV ignored           |
//! | `cbc(aes)`      | 16 / 24 / 32 | whole blocks only, 16-byte IV           |
//! | `cts(cbc(aes))` | 16 / 24 / 32 | CBC-CS3, at least one block             |
//! | `xts(aes)`      | 32 / 64      | IV is the tweak; identical halves weak  |
//! | `aes`           | 16 / 24 / 32 | single-block cipher                     |
//! | `sha256`        | n/a          | 32-byte digest                          |
//!
//! Speck is not provided; allocating it fails like any unknown algorithm.

use aes::cipher::consts::U16;
use aes::cipher::inout::InOutBuf;
use aes::cipher::{
    generic_array::GenericArray, BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut,
    BlockSizeUser, InnerIvInit, KeyInit,
};
use aes::{Aes128, Aes192, Aes256, Block};
use sha2::{Digest, Sha256};
use xts_mode::Xts128;

use fcrypt_core::{FcryptError, FcryptResult, AES_BLOCK_SIZE};

use crate::backend::{BlockCipher, CipherBackend, Shash, SkCipher};

pub const ALG_ECB_AES: &str = "ecb(aes)";
pub const ALG_CBC_AES: &str = "cbc(aes)";
pub const ALG_CTS_CBC_AES: &str = "cts(cbc(aes))";
pub const ALG_XTS_AES: &str = "xts(aes)";
pub const ALG_AES: &str = "aes";
pub const ALG_SHA256: &str = "sha256";

/// Backend over the RustCrypto `aes`, `cbc`, `xts-mode` and `sha2` crates.
#[derive(Debug, Default, Clone, Copy)]
pub struct RustCryptoBackend;

impl RustCryptoBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CipherBackend for RustCryptoBackend {
    fn alloc_skcipher(&self, name: &str) -> FcryptResult<Box<dyn SkCipher>> {
        let mode = match name {
            ALG_ECB_AES => ChainMode::Ecb,
            ALG_CBC_AES => ChainMode::Cbc,
            ALG_CTS_CBC_AES => ChainMode::Cts,
            ALG_XTS_AES => return Ok(Box::new(XtsAes::default())),
            _ => return Err(unavailable(name)),
        };
        Ok(Box::new(AesSkcipher { mode, key: None }))
    }

    fn alloc_cipher(&self, name: &str) -> FcryptResult<Box<dyn BlockCipher>> {
        match name {
            ALG_AES => Ok(Box::new(AesBlockCipher { key: None })),
            _ => Err(unavailable(name)),
        }
    }

    fn alloc_shash(&self, name: &str) -> FcryptResult<Box<dyn Shash>> {
        match name {
            ALG_SHA256 => Ok(Box::new(Sha256Hash)),
            _ => Err(unavailable(name)),
        }
    }
}

fn unavailable(name: &str) -> FcryptError {
    FcryptError::CryptoBackend(format!("algorithm '{name}' not available"))
}

fn no_key(name: &str) -> FcryptError {
    FcryptError::CryptoBackend(format!("{name}: no key set"))
}

// ── AES key schedule ─────────────────────────────────────────────────────────

/// Expanded AES key of any supported size. The `aes` crate zeroizes the
/// round keys on drop.
enum AesKey {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl AesKey {
    fn new(name: &str, key: &[u8]) -> FcryptResult<Self> {
        let bad = |_| FcryptError::CryptoBackend(format!("{name}: bad key length {}", key.len()));
        match key.len() {
            16 => Ok(Self::Aes128(Aes128::new_from_slice(key).map_err(bad)?)),
            24 => Ok(Self::Aes192(Aes192::new_from_slice(key).map_err(bad)?)),
            32 => Ok(Self::Aes256(Aes256::new_from_slice(key).map_err(bad)?)),
            n => Err(FcryptError::CryptoBackend(format!(
                "{name}: bad key length {n}"
            ))),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Aes128(_) => 16,
            Self::Aes192(_) => 24,
            Self::Aes256(_) => 32,
        }
    }

    fn encrypt_block(&self, block: &mut [u8]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            Self::Aes128(c) => c.encrypt_block(block),
            Self::Aes192(c) => c.encrypt_block(block),
            Self::Aes256(c) => c.encrypt_block(block),
        }
    }

    fn decrypt_block(&self, block: &mut [u8]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            Self::Aes128(c) => c.decrypt_block(block),
            Self::Aes192(c) => c.decrypt_block(block),
            Self::Aes256(c) => c.decrypt_block(block),
        }
    }

    /// `buf` must be whole blocks.
    fn cbc_encrypt(&self, iv: &[u8; AES_BLOCK_SIZE], buf: &mut [u8]) {
        match self {
            Self::Aes128(c) => cbc_encrypt_with(c, iv, buf),
            Self::Aes192(c) => cbc_encrypt_with(c, iv, buf),
            Self::Aes256(c) => cbc_encrypt_with(c, iv, buf),
        }
    }

    fn cbc_decrypt(&self, iv: &[u8; AES_BLOCK_SIZE], buf: &mut [u8]) {
        match self {
            Self::Aes128(c) => cbc_decrypt_with(c, iv, buf),
            Self::Aes192(c) => cbc_decrypt_with(c, iv, buf),
            Self::Aes256(c) => cbc_decrypt_with(c, iv, buf),
        }
    }
}

/// CBC over whole blocks of `buf`, chaining from `iv`.
fn cbc_encrypt_with<C>(cipher: &C, iv: &[u8; AES_BLOCK_SIZE], buf: &mut [u8])
where
    C: BlockEncrypt + aes::cipher::BlockCipher + BlockSizeUser<BlockSize = U16> + Clone,
{
    let mut cbc = cbc::Encryptor::<C>::inner_iv_init(cipher.clone(), iv.into());
    let inout: InOutBuf<'_, '_, u8> = buf.into();
    let (mut blocks, tail): (InOutBuf<'_, '_, Block>, _) = inout.into_chunks();
    debug_assert_eq!(tail.len(), 0);
    cbc.encrypt_blocks_mut(blocks.get_out());
}

fn cbc_decrypt_with<C>(cipher: &C, iv: &[u8; AES_BLOCK_SIZE], buf: &mut [u8])
where
    C: BlockDecrypt + aes::cipher::BlockCipher + BlockSizeUser<BlockSize = U16> + Clone,
{
    let mut cbc = cbc::Decryptor::<C>::inner_iv_init(cipher.clone(), iv.into());
    let inout: InOutBuf<'_, '_, u8> = buf.into();
    let (mut blocks, tail): (InOutBuf<'_, '_, Block>, _) = inout.into_chunks();
    debug_assert_eq!(tail.len(), 0);
    cbc.decrypt_blocks_mut(blocks.get_out());
}

fn read_iv(name: &str, iv: &[u8]) -> FcryptResult<[u8; AES_BLOCK_SIZE]> {
    iv.try_into().map_err(|_| {
        FcryptError::CryptoBackend(format!("{name}: IV must be {AES_BLOCK_SIZE} bytes, got {}", iv.len()))
    })
}

// ── ECB / CBC / CTS ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainMode {
    Ecb,
    Cbc,
    Cts,
}

impl ChainMode {
    fn name(self) -> &'static str {
        match self {
            ChainMode::Ecb => ALG_ECB_AES,
            ChainMode::Cbc => ALG_CBC_AES,
            ChainMode::Cts => ALG_CTS_CBC_AES,
        }
    }
}

struct AesSkcipher {
    mode: ChainMode,
    key: Option<AesKey>,
}

impl AesSkcipher {
    fn key(&self) -> FcryptResult<&AesKey> {
        self.key.as_ref().ok_or_else(|| no_key(self.mode.name()))
    }

    fn check_whole_blocks(&self, len: usize) -> FcryptResult<()> {
        if len % AES_BLOCK_SIZE != 0 {
            return Err(FcryptError::CryptoBackend(format!(
                "{}: length {len} is not a multiple of the block size",
                self.mode.name()
            )));
        }
        Ok(())
    }
}

/// CBC ciphertext stealing, CS3 variant: the last two blocks are always
/// swapped when there is more than one block.
fn cts_encrypt(key: &AesKey, iv: &[u8; AES_BLOCK_SIZE], buf: &mut [u8]) {
    let len = buf.len();
    if len == AES_BLOCK_SIZE {
        key.cbc_encrypt(iv, buf);
        return;
    }
    let full = len.div_ceil(AES_BLOCK_SIZE) - 1;
    let tail = len - full * AES_BLOCK_SIZE;
    let (head, last) = buf.split_at_mut(full * AES_BLOCK_SIZE);
    key.cbc_encrypt(iv, head);

    let prev_at = (full - 1) * AES_BLOCK_SIZE;
    let mut prev = [0u8; AES_BLOCK_SIZE];
    prev.copy_from_slice(&head[prev_at..]);

    // Zero-padded final block, chained from C(n-1).
    let mut stolen = [0u8; AES_BLOCK_SIZE];
    stolen[..tail].copy_from_slice(last);
    key.cbc_encrypt(&prev, &mut stolen);

    head[prev_at..].copy_from_slice(&stolen);
    last.copy_from_slice(&prev[..tail]);
}

fn cts_decrypt(key: &AesKey, iv: &[u8; AES_BLOCK_SIZE], buf: &mut [u8]) {
    let len = buf.len();
    if len == AES_BLOCK_SIZE {
        key.cbc_decrypt(iv, buf);
        return;
    }
    let full = len.div_ceil(AES_BLOCK_SIZE) - 1;
    let tail = len - full * AES_BLOCK_SIZE;
    let (head, last) = buf.split_at_mut(full * AES_BLOCK_SIZE);
    let prev_at = (full - 1) * AES_BLOCK_SIZE;

    let mut cn = [0u8; AES_BLOCK_SIZE];
    cn.copy_from_slice(&head[prev_at..]);

    // D(Cn) = C(n-1) ^ (Pn || 0): its trailing bytes are the stolen part of C(n-1).
    let mut prev = cn;
    key.decrypt_block(&mut prev);
    prev[..tail].copy_from_slice(last);

    let mut plain = cn;
    key.cbc_decrypt(&prev, &mut plain);

    head[prev_at..].copy_from_slice(&prev);
    last.copy_from_slice(&plain[..tail]);
    key.cbc_decrypt(iv, head);
}

impl SkCipher for AesSkcipher {
    fn algorithm(&self) -> &str {
        self.mode.name()
    }

    fn set_key(&mut self, key: &[u8]) -> FcryptResult<()> {
        self.key = Some(AesKey::new(self.mode.name(), key)?);
        Ok(())
    }

    fn key_size(&self) -> Option<usize> {
        self.key.as_ref().map(AesKey::len)
    }

    fn encrypt(&self, iv: &[u8], buf: &mut [u8]) -> FcryptResult<()> {
        let key = self.key()?;
        match self.mode {
            ChainMode::Ecb => {
                self.check_whole_blocks(buf.len())?;
                buf.chunks_exact_mut(AES_BLOCK_SIZE)
                    .for_each(|block| key.encrypt_block(block));
            }
            ChainMode::Cbc => {
                self.check_whole_blocks(buf.len())?;
                key.cbc_encrypt(&read_iv(self.mode.name(), iv)?, buf);
            }
            ChainMode::Cts => {
                check_min_len(self.mode.name(), buf.len())?;
                cts_encrypt(key, &read_iv(self.mode.name(), iv)?, buf);
            }
        }
        Ok(())
    }

    fn decrypt(&self, iv: &[u8], buf: &mut [u8]) -> FcryptResult<()> {
        let key = self.key()?;
        match self.mode {
            ChainMode::Ecb => {
                self.check_whole_blocks(buf.len())?;
                buf.chunks_exact_mut(AES_BLOCK_SIZE)
                    .for_each(|block| key.decrypt_block(block));
            }
            ChainMode::Cbc => {
                self.check_whole_blocks(buf.len())?;
                key.cbc_decrypt(&read_iv(self.mode.name(), iv)?, buf);
            }
            ChainMode::Cts => {
                check_min_len(self.mode.name(), buf.len())?;
                cts_decrypt(key, &read_iv(self.mode.name(), iv)?, buf);
            }
        }
        Ok(())
    }
}

fn check_min_len(name: &str, len: usize) -> FcryptResult<()> {
    if len < AES_BLOCK_SIZE {
        return Err(FcryptError::CryptoBackend(format!(
            "{name}: length {len} is shorter than one block"
        )));
    }
    Ok(())
}

// ── XTS ──────────────────────────────────────────────────────────────────────

enum XtsKey {
    Aes128(Xts128<Aes128>),
    Aes256(Xts128<Aes256>),
}

#[derive(Default)]
struct XtsAes {
    key: Option<XtsKey>,
    allow_weak: bool,
}

impl SkCipher for XtsAes {
    fn algorithm(&self) -> &str {
        ALG_XTS_AES
    }

    fn allow_weak_keys(&mut self) {
        self.allow_weak = true;
    }

    fn set_key(&mut self, key: &[u8]) -> FcryptResult<()> {
        let half = key.len() / 2;
        if key.len() != 32 && key.len() != 64 {
            return Err(FcryptError::CryptoBackend(format!(
                "{ALG_XTS_AES}: bad key length {}",
                key.len()
            )));
        }
        if !self.allow_weak && key[..half] == key[half..] {
            return Err(FcryptError::KeyRejected(format!(
                "{ALG_XTS_AES}: data and tweak keys are identical"
            )));
        }
        let bad = |_| FcryptError::CryptoBackend(format!("{ALG_XTS_AES}: bad key length"));
        self.key = Some(if half == 16 {
            XtsKey::Aes128(Xts128::new(
                Aes128::new_from_slice(&key[..half]).map_err(bad)?,
                Aes128::new_from_slice(&key[half..]).map_err(bad)?,
            ))
        } else {
            XtsKey::Aes256(Xts128::new(
                Aes256::new_from_slice(&key[..half]).map_err(bad)?,
                Aes256::new_from_slice(&key[half..]).map_err(bad)?,
            ))
        });
        Ok(())
    }

    fn key_size(&self) -> Option<usize> {
        self.key.as_ref().map(|k| match k {
            XtsKey::Aes128(_) => 32,
            XtsKey::Aes256(_) => 64,
        })
    }

    fn encrypt(&self, iv: &[u8], buf: &mut [u8]) -> FcryptResult<()> {
        let key = self.key.as_ref().ok_or_else(|| no_key(ALG_XTS_AES))?;
        check_min_len(ALG_XTS_AES, buf.len())?;
        let tweak = read_iv(ALG_XTS_AES, iv)?;
        match key {
            XtsKey::Aes128(x) => x.encrypt_sector(buf, tweak),
            XtsKey::Aes256(x) => x.encrypt_sector(buf, tweak),
        }
        Ok(())
    }

    fn decrypt(&self, iv: &[u8], buf: &mut [u8]) -> FcryptResult<()> {
        let key = self.key.as_ref().ok_or_else(|| no_key(ALG_XTS_AES))?;
        check_min_len(ALG_XTS_AES, buf.len())?;
        let tweak = read_iv(ALG_XTS_AES, iv)?;
        match key {
            XtsKey::Aes128(x) => x.decrypt_sector(buf, tweak),
            XtsKey::Aes256(x) => x.decrypt_sector(buf, tweak),
        }
        Ok(())
    }
}

// ── single block / hash ──────────────────────────────────────────────────────

struct AesBlockCipher {
    key: Option<AesKey>,
}

impl BlockCipher for AesBlockCipher {
    fn algorithm(&self) -> &str {
        ALG_AES
    }

    fn set_key(&mut self, key: &[u8]) -> FcryptResult<()> {
        self.key = Some(AesKey::new(ALG_AES, key)?);
        Ok(())
    }

    fn key_size(&self) -> Option<usize> {
        self.key.as_ref().map(AesKey::len)
    }

    fn encrypt_block(&self, block: &mut [u8; 16]) -> FcryptResult<()> {
        let key = self.key.as_ref().ok_or_else(|| no_key(ALG_AES))?;
        key.encrypt_block(block);
        Ok(())
    }
}

struct Sha256Hash;

impl Shash for Sha256Hash {
    fn algorithm(&self) -> &str {
        ALG_SHA256
    }

    fn digest_size(&self) -> usize {
        32
    }

    fn digest(&self, data: &[u8], out: &mut [u8]) -> FcryptResult<()> {
        if out.len() != self.digest_size() {
            return Err(FcryptError::CryptoBackend(format!(
                "{ALG_SHA256}: output buffer is {} bytes",
                out.len()
            )));
        }
        out.copy_from_slice(&Sha256::digest(data));
        Ok(())
    }
}
