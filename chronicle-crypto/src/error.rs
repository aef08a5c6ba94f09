//! Crypto error types.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors raised by key derivation and record encryption.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The recovery phrase is malformed: wrong word count, unknown word or bad checksum.
    #[error("invalid secret phrase: {0}")]
    InvalidSecret(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    /// The blob could not be interpreted (bad encoding, truncated, not UTF-8).
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// The authentication tag did not verify. The record is corrupt or tampered.
    #[error("authentication failed: record is corrupted or was tampered with")]
    AuthenticationFailure,

    #[error("unsupported cipher format version {0}")]
    UnsupportedVersion(u8),

    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },
}

impl CryptoError {
    /// True for errors that mean a stored or received record cannot be read.
    ///
    /// These are never retried: the same bytes will fail the same way.
    pub fn is_record_corruption(&self) -> bool {
        matches!(
            self,
            CryptoError::Decryption(_)
                | CryptoError::AuthenticationFailure
                | CryptoError::UnsupportedVersion(_)
        )
    }
}
