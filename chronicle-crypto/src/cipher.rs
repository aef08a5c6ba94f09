//! Authenticated encryption of record fields.
//!
//! Format version 1 is XChaCha20-Poly1305 with a fresh 192-bit random nonce
//! per call and a detached 128-bit tag. The 24-byte nonce keeps the chance of a
//! repeat under one key negligible even for very large histories.
//!
//! This module only sees bytes. How fields are serialized before encryption
//! is up to the caller.

use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use chacha20poly1305::aead::{AeadCore, AeadInPlace, KeyInit, OsRng};
use chacha20poly1305::{Key, Tag, XChaCha20Poly1305, XNonce};
use serde::{Deserialize, Serialize};

/// Format tag for XChaCha20-Poly1305 blobs.
pub const FORMAT_V1: u8 = 1;

/// Nonce size for [`FORMAT_V1`] in bytes.
pub const NONCE_SIZE: usize = 24;

/// Authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// One encrypted payload, as stored at rest and sent over the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    /// Cipher format tag. Unknown values are refused, never guessed.
    pub version: u8,
    #[serde(with = "b64_array")]
    pub nonce: [u8; NONCE_SIZE],
    #[serde(with = "b64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "b64_array")]
    pub tag: [u8; TAG_SIZE],
}

/// Encrypts `plaintext` under `key` with no associated data.
pub fn encrypt(key: &DerivedKey, plaintext: &[u8]) -> CryptoResult<EncryptedData> {
    encrypt_with_aad(key, plaintext, &[])
}

/// Decrypts a blob produced by [`encrypt`].
pub fn decrypt(key: &DerivedKey, data: &EncryptedData) -> CryptoResult<Vec<u8>> {
    decrypt_with_aad(key, data, &[])
}

/// Encrypts `plaintext`, binding `aad` into the tag.
///
/// The same `aad` must be supplied to decrypt.
pub fn encrypt_with_aad(
    key: &DerivedKey,
    plaintext: &[u8],
    aad: &[u8],
) -> CryptoResult<EncryptedData> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(&nonce, aad, &mut buffer)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes.copy_from_slice(nonce.as_slice());
    let mut tag_bytes = [0u8; TAG_SIZE];
    tag_bytes.copy_from_slice(tag.as_slice());

    Ok(EncryptedData {
        version: FORMAT_V1,
        nonce: nonce_bytes,
        ciphertext: buffer,
        tag: tag_bytes,
    })
}

/// Decrypts and verifies a blob.
///
/// Fails with [`CryptoError::UnsupportedVersion`] for unknown format tags and
/// with [`CryptoError::AuthenticationFailure`] when the tag does not verify.
pub fn decrypt_with_aad(
    key: &DerivedKey,
    data: &EncryptedData,
    aad: &[u8],
) -> CryptoResult<Vec<u8>> {
    if data.version != FORMAT_V1 {
        return Err(CryptoError::UnsupportedVersion(data.version));
    }

    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let mut buffer = data.ciphertext.clone();
    cipher
        .decrypt_in_place_detached(
            XNonce::from_slice(&data.nonce),
            aad,
            &mut buffer,
            Tag::from_slice(&data.tag),
        )
        .map_err(|_| CryptoError::AuthenticationFailure)?;

    Ok(buffer)
}

/// Encrypts a UTF-8 string field.
pub fn encrypt_string(key: &DerivedKey, value: &str, aad: &[u8]) -> CryptoResult<EncryptedData> {
    encrypt_with_aad(key, value.as_bytes(), aad)
}

/// Decrypts a UTF-8 string field.
pub fn decrypt_string(key: &DerivedKey, data: &EncryptedData, aad: &[u8]) -> CryptoResult<String> {
    let bytes = decrypt_with_aad(key, data, aad)?;
    String::from_utf8(bytes).map_err(|e| CryptoError::Decryption(format!("invalid UTF-8: {e}")))
}

mod b64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

mod b64_array {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let encoded = String::deserialize(deserializer)?;
        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)?;
        let len = bytes.len();
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::invalid_length(len, &"a fixed-size byte field"))
    }
}
