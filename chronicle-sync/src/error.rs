//! Sync error types.

use chronicle_storage::StorageError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while syncing.
///
/// Transport-class failures (`Transport`, `Timeout`, `Http`, `Status`) are
/// routine: the affected entries stay pending and are retried next cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transport failed: {0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server responded with status {code}")]
    Status { code: u16 },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("sync service is not running")]
    ChannelClosed,

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    /// True for failures that leave entries pending and are retried next cycle.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SyncError::Transport(_)
                | SyncError::Timeout(_)
                | SyncError::Http(_)
                | SyncError::Status { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_types::VisitId;
    use std::time::Duration;

    #[test]
    fn transport_class_errors() {
        assert!(SyncError::Transport("reset".into()).is_transport());
        assert!(SyncError::Timeout(Duration::from_secs(1)).is_transport());
        assert!(SyncError::Status { code: 503 }.is_transport());
        assert!(!SyncError::ChannelClosed.is_transport());
        assert!(!SyncError::Config("bad".into()).is_transport());
    }

    #[test]
    fn storage_errors_convert() {
        let err: SyncError = StorageError::Tombstoned(VisitId::from("v1")).into();
        assert!(matches!(err, SyncError::Storage(StorageError::Tombstoned(_))));
        assert_eq!(err.to_string(), "storage error: entry v1 is deleted");
    }
}
