//! Per-file key derivation: AES-128-ECB(nonce, master key)
//!
//! The per-file nonce is used as an AES-128 key and the master key bytes are
//! encrypted under it. One master key thereby yields a distinct raw key per
//! file without storing per-file secrets anywhere.

use fcrypt_core::{EncryptionMode, FcryptError, FcryptResult, NONCE_SIZE};

use crate::backend::CipherBackend;
use crate::keys::{MasterKey, RawKey};
use crate::rustcrypto::ALG_ECB_AES;

/// Derive a raw per-file key from `source` using `deriving_key` (the
/// per-file nonce) as an AES-128-ECB key.
///
/// The output has the same length as the master key. Weak deriving keys are
/// permitted; a backend that still rejects one surfaces `KeyRejected`.
pub fn derive_key(
    backend: &dyn CipherBackend,
    deriving_key: &[u8; NONCE_SIZE],
    source: &MasterKey,
) -> FcryptResult<RawKey> {
    let mut tfm = backend.alloc_skcipher(ALG_ECB_AES)?;
    tfm.allow_weak_keys();
    tfm.set_key(deriving_key).map_err(|e| match e {
        FcryptError::KeyRejected(msg) => {
            tracing::warn!("derivation key rejected as weak: {msg}");
            FcryptError::KeyRejected(msg)
        }
        other => other,
    })?;

    let mut derived = RawKey::from_slice(source.as_bytes())?;
    tfm.encrypt(&[], derived.as_mut_bytes())?;
    Ok(derived)
}

/// Produce the raw key for a context operating in `mode`: a verbatim copy of
/// the master key for `Private` (the inline engine derives its own key),
/// otherwise [`derive_key`].
pub fn assign_raw_key(
    backend: &dyn CipherBackend,
    mode: EncryptionMode,
    nonce: &[u8; NONCE_SIZE],
    master: &MasterKey,
) -> FcryptResult<RawKey> {
    if mode == EncryptionMode::Private {
        RawKey::from_slice(master.as_bytes())
    } else {
        derive_key(backend, nonce, master)
    }
}
