//! Encryption layer for ChronicleSync.
//!
//! Provides the two leaf components of the history sync core:
//! - **KeyDerivation** ([`identity`]): a BIP39 recovery phrase becomes a public
//!   [`ClientId`](chronicle_types::ClientId) and a private 256-bit data key
//! - **RecordCipher** ([`cipher`]): XChaCha20-Poly1305 authenticated encryption
//!   of individual record fields, tagged with a format version
//!
//! # Architecture
//!
//! Derivation is deterministic and stateless. Every device that holds the same
//! phrase computes the same identity without talking to anyone:
//!
//! 1. **Seed**: the standard BIP39 seed of the normalized phrase.
//! 2. **Client id**: a domain-separated SHA-256 of the seed, truncated to 128 bits.
//! 3. **Data key**: Argon2id over the seed with a distinct domain salt.
//!
//! The client id can be handed to a server; the data key never leaves memory
//! and is zeroized on drop.

pub mod cipher;
mod error;
pub mod identity;
mod key;

pub use cipher::{
    decrypt, decrypt_string, decrypt_with_aad, encrypt, encrypt_string, encrypt_with_aad,
    EncryptedData, FORMAT_V1, NONCE_SIZE, TAG_SIZE,
};
pub use error::{CryptoError, CryptoResult};
pub use identity::{
    derive_identity, derive_identity_with_params, generate_secret_phrase, normalize_phrase,
    Identity, SECRET_WORD_COUNT,
};
pub use key::{derive_key, generate_random_key, DerivedKey, KdfParams, Salt, KEY_SIZE, SALT_SIZE};
