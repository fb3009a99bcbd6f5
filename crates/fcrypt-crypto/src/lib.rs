//! fcrypt-crypto: key derivation, cipher mode resolution and ESSIV
//!
//! Every transform comes from a [`CipherBackend`]; [`RustCryptoBackend`] is
//! the default implementation over the RustCrypto crates.
//!
//! Key flow for one inode:
//! ```text
//! master key (credential store, <= 64 bytes)
//!   └── raw key = AES-128-ECB(key = per-file nonce, data = master key)
//!         ├── contents / filenames cipher, keyed with raw[..key_size]
//!         └── ESSIV (AES-128-CBC contents only):
//!               salt = SHA-256(raw[..key_size]), IV = AES-256(salt, lblk)
//! ```
//! Inline-crypto contents skip derivation and keep the master key as-is.

pub mod backend;
pub mod derive;
pub mod essiv;
pub mod keys;
pub mod modes;
pub mod rustcrypto;

pub use backend::{BlockCipher, CipherBackend, Shash, SkCipher};
pub use derive::{assign_raw_key, derive_key};
pub use essiv::{derive_essiv_salt, init_essiv, plain_iv, EssivGenerator, EssivHash};
pub use keys::{MasterKey, RawKey};
pub use modes::{
    available_modes, data_crypt_mode, mode_spec, resolve, valid_combinations, valid_enc_modes,
    ModeSpec, ResolvedCipher,
};
pub use rustcrypto::RustCryptoBackend;
