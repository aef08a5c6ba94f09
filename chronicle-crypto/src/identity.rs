//! Recovery-phrase identity.
//!
//! Turns a 12-word BIP39 phrase into the stable [`ClientId`] every device of
//! one user shares, plus the symmetric key that encrypts history fields.
//! Derivation is pure: no storage, no network, no randomness.

use crate::error::{CryptoError, CryptoResult};
use crate::key::{derive_key, DerivedKey, KdfParams, Salt};
use chronicle_types::ClientId;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

/// Number of words a recovery phrase must have.
pub const SECRET_WORD_COUNT: usize = 12;

/// Hash domain for the public client id.
const CLIENT_ID_DOMAIN: &[u8] = b"chronicle/client-id/v1";

/// Argon2id salt for the data key. Distinct from the client id domain.
const DATA_KEY_SALT: [u8; 16] = *b"chronicle-dkey1\0";

/// The derived identity of one logical user.
///
/// Constructed once from the recovery phrase and passed explicitly to the
/// stores and engines that need it.
pub struct Identity {
    client_id: ClientId,
    key: DerivedKey,
}

impl Identity {
    /// Assembles an identity from already-derived parts.
    pub fn from_parts(client_id: ClientId, key: DerivedKey) -> Self {
        Self { client_id, key }
    }

    /// Public partition key, safe to send to a server.
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// Symmetric key for record encryption. Never persist or transmit.
    pub fn key(&self) -> &DerivedKey {
        &self.key
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("client_id", &self.client_id)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Lowercases a phrase and collapses all whitespace runs to single spaces.
pub fn normalize_phrase(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Derives the identity for a recovery phrase with the standard parameters.
pub fn derive_identity(phrase: &str) -> CryptoResult<Identity> {
    derive_identity_with_params(phrase, &KdfParams::default())
}

/// Derives the identity with explicit Argon2id parameters.
///
/// Devices only converge if they use identical parameters.
pub fn derive_identity_with_params(phrase: &str, params: &KdfParams) -> CryptoResult<Identity> {
    let normalized = Zeroizing::new(normalize_phrase(phrase));

    let words = normalized.split(' ').filter(|w| !w.is_empty()).count();
    if words != SECRET_WORD_COUNT {
        return Err(CryptoError::InvalidSecret(format!(
            "expected {SECRET_WORD_COUNT} words, got {words}"
        )));
    }

    let mnemonic: bip39::Mnemonic = normalized
        .parse()
        .map_err(|e: bip39::Error| CryptoError::InvalidSecret(e.to_string()))?;

    let seed = Zeroizing::new(mnemonic.to_seed_normalized(""));

    let mut hasher = Sha256::new();
    hasher.update(CLIENT_ID_DOMAIN);
    hasher.update(seed.as_slice());
    let digest = hasher.finalize();
    let client_id = ClientId::from_hex(hex::encode(&digest[..ClientId::HEX_LEN / 2]));

    let key = derive_key(seed.as_slice(), &Salt::from_bytes(DATA_KEY_SALT), params)?;

    Ok(Identity { client_id, key })
}

/// Generates a fresh 12-word recovery phrase (128 bits of entropy).
///
/// Shown to the user once; the core never stores it.
pub fn generate_secret_phrase() -> CryptoResult<String> {
    let mut entropy = Zeroizing::new([0u8; 16]);
    rand::rng().fill_bytes(&mut entropy[..]);

    let mnemonic = bip39::Mnemonic::from_entropy(&entropy[..])
        .map_err(|e| CryptoError::KeyDerivation(format!("mnemonic generation failed: {e}")))?;

    Ok(mnemonic.to_string())
}
