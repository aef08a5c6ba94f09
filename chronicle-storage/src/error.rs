//! Storage error types.

use chronicle_crypto::CryptoError;
use chronicle_types::VisitId;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] duckdb::Error),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("entry {0} not found")]
    NotFound(VisitId),

    /// A tombstoned entry was edited without an explicit undelete.
    #[error("entry {0} is deleted")]
    Tombstoned(VisitId),

    #[error("invalid entry: {0}")]
    InvalidEntry(String),

    #[error("store lock poisoned")]
    LockPoisoned,
}

impl StorageError {
    /// True when a record was refused because its encrypted fields could not be read.
    pub fn is_record_corruption(&self) -> bool {
        match self {
            StorageError::Crypto(e) => e.is_record_corruption(),
            _ => false,
        }
    }

    /// True when a remote record was refused on its own merits.
    ///
    /// Redelivering the same record fails the same way, so callers count it
    /// and move on. Every other error is a local failure worth retrying.
    pub fn is_rejected_record(&self) -> bool {
        matches!(self, StorageError::InvalidEntry(_)) || self.is_record_corruption()
    }
}
