//! The transport seam between the engine and whatever carries entries.
//!
//! Entries cross the transport in their encrypted form; a transport never
//! sees plaintext and needs no key.

use crate::error::SyncResult;
use async_trait::async_trait;
use chronicle_storage::HistoryEntry;
use chronicle_types::VisitId;
use serde::{Deserialize, Serialize};

/// Per-entry answer to a push.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushAck {
    pub visit_id: VisitId,
    pub version: u64,
    pub accepted: bool,
}

impl PushAck {
    pub fn accepted(entry: &HistoryEntry) -> Self {
        Self {
            visit_id: entry.visit_id.clone(),
            version: entry.version,
            accepted: true,
        }
    }

    pub fn refused(entry: &HistoryEntry) -> Self {
        Self {
            accepted: false,
            ..Self::accepted(entry)
        }
    }
}

/// Entries changed on the remote side since a cursor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullBatch {
    pub entries: Vec<HistoryEntry>,
    /// High-water mark to pass as `since` on the next pull.
    #[serde(default)]
    pub cursor: Option<i64>,
}

/// Moves encrypted history entries to and from a remote.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Offers a batch of entries. Acks may cover a subset of the batch;
    /// entries without an accepted ack are retried later.
    async fn push(&self, entries: &[HistoryEntry]) -> SyncResult<Vec<PushAck>>;

    /// Fetches entries changed after `since` (everything when `None`).
    async fn pull(&self, since: Option<i64>) -> SyncResult<PullBatch>;
}
