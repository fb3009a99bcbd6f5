//! Master key lookup and validation.
//!
//! Record layout (72 bytes, little-endian):
//! ```text
//! mode: u32 | raw: [u8; 64] | size: u32
//! ```
//! Only `raw[..size]` is key material.

use secrecy::ExposeSecret;
use zeroize::Zeroizing;

use fcrypt_core::{
    FcryptError, FcryptResult, AES_BLOCK_SIZE, KEY_DESCRIPTOR_SIZE, MASTER_KEY_RECORD_SIZE,
    MAX_KEY_SIZE,
};
use fcrypt_crypto::MasterKey;

use crate::store::{CredentialStore, KeyType, MemoryKeyring};

const RAW_OFFSET: usize = 4;
const SIZE_OFFSET: usize = RAW_OFFSET + MAX_KEY_SIZE;

/// `prefix` followed by the descriptor as lowercase hex.
pub fn key_description(prefix: &str, descriptor: &[u8; KEY_DESCRIPTOR_SIZE]) -> String {
    format!("{prefix}{}", hex::encode(descriptor))
}

/// Serialize a master key record. `key` must fit in the 64-byte raw field.
pub fn encode_master_key_record(mode: u32, key: &[u8]) -> FcryptResult<Zeroizing<Vec<u8>>> {
    if key.len() > MAX_KEY_SIZE {
        return Err(FcryptError::KeyRejected(format!(
            "key size incorrect: {}",
            key.len()
        )));
    }
    let mut record = Zeroizing::new(vec![0u8; MASTER_KEY_RECORD_SIZE]);
    record[..RAW_OFFSET].copy_from_slice(&mode.to_le_bytes());
    record[RAW_OFFSET..RAW_OFFSET + key.len()].copy_from_slice(key);
    record[SIZE_OFFSET..].copy_from_slice(&(key.len() as u32).to_le_bytes());
    Ok(record)
}

/// Parse a record without bounds-checking `size` against a cipher.
pub fn decode_master_key_record(payload: &[u8]) -> FcryptResult<MasterKey> {
    let (mode, raw, size) = split_record(payload)?;
    MasterKey::new(mode, raw, size as usize)
}

fn split_record(payload: &[u8]) -> FcryptResult<(u32, &[u8; MAX_KEY_SIZE], u32)> {
    if payload.len() != MASTER_KEY_RECORD_SIZE {
        return Err(FcryptError::MalformedKey {
            expected: MASTER_KEY_RECORD_SIZE,
            actual: payload.len(),
        });
    }
    let field = |range: std::ops::Range<usize>| -> FcryptResult<[u8; 4]> {
        payload[range].try_into().map_err(|_| FcryptError::MalformedKey {
            expected: MASTER_KEY_RECORD_SIZE,
            actual: payload.len(),
        })
    };
    let mode = u32::from_le_bytes(field(0..RAW_OFFSET)?);
    let size = u32::from_le_bytes(field(SIZE_OFFSET..MASTER_KEY_RECORD_SIZE)?);
    let raw: &[u8; MAX_KEY_SIZE] = payload[RAW_OFFSET..SIZE_OFFSET]
        .try_into()
        .map_err(|_| FcryptError::MalformedKey {
            expected: MASTER_KEY_RECORD_SIZE,
            actual: payload.len(),
        })?;
    Ok((mode, raw, size))
}

/// Store `key` as a logon key under `prefix` + hex(`descriptor`).
pub fn install_master_key(
    keyring: &MemoryKeyring,
    prefix: &str,
    descriptor: &[u8; KEY_DESCRIPTOR_SIZE],
    mode: u32,
    key: &[u8],
) -> FcryptResult<String> {
    let description = key_description(prefix, descriptor);
    let record = encode_master_key_record(mode, key)?;
    keyring.add_key(description.clone(), KeyType::Logon, record.to_vec());
    Ok(description)
}

/// Resolve and validate the master key for `descriptor` under one prefix.
///
/// The key is copied out while the entry's read lock is held; nothing
/// borrowed from the store outlives this call.
pub fn lookup_master_key(
    store: &dyn CredentialStore,
    descriptor: &[u8; KEY_DESCRIPTOR_SIZE],
    prefix: &str,
    min_key_size: usize,
) -> FcryptResult<MasterKey> {
    let description = key_description(prefix, descriptor);
    let entry = store.request_key(&description)?;
    let payload = entry.read();

    if entry.key_type() != KeyType::Logon {
        tracing::warn!(description = %description, "key type must be logon");
        return Err(FcryptError::WrongKeyType(description));
    }
    let Some(payload) = payload.as_ref() else {
        return Err(FcryptError::KeyRevoked(description));
    };

    let (mode, raw, size) = split_record(payload.expose_secret())?;
    let size = size as usize;
    if size == 0 || size < min_key_size || size > MAX_KEY_SIZE || size % AES_BLOCK_SIZE != 0 {
        tracing::warn!(description = %description, size, min_key_size, "key size incorrect");
        return Err(FcryptError::KeyRejected(format!(
            "{description}: key size incorrect: {size}"
        )));
    }

    MasterKey::new(mode, raw, size)
}

/// [`lookup_master_key`] under `primary`, retried once under `alternate`.
///
/// When both attempts fail, "not found" from the alternate is reported as
/// `KeyNotFound`; any other alternate failure reports the primary's error.
pub fn lookup_with_fallback(
    store: &dyn CredentialStore,
    descriptor: &[u8; KEY_DESCRIPTOR_SIZE],
    primary: &str,
    alternate: Option<&str>,
    min_key_size: usize,
) -> FcryptResult<MasterKey> {
    let primary_err = match lookup_master_key(store, descriptor, primary, min_key_size) {
        Ok(key) => return Ok(key),
        Err(e) => e,
    };
    let Some(alternate) = alternate else {
        return Err(primary_err);
    };

    tracing::debug!(primary, alternate, "primary key lookup failed: {primary_err}");
    match lookup_master_key(store, descriptor, alternate, min_key_size) {
        Ok(key) => Ok(key),
        Err(e) if e.is_key_not_found() => Err(e),
        Err(e) => {
            tracing::debug!(alternate, "alternate key lookup failed: {e}");
            Err(primary_err)
        }
    }
}
