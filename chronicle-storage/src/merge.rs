//! Last-writer-wins merge rule for versioned history entries.
//!
//! The rule is a total order over `(version, deleted, last_modified, device_id,
//! content_hash)`: the greater side wins. Because every replica evaluates the
//! same order, exchanging entries in any order, any number of times, ends in
//! the same state.
//!
//! Tombstones rank above live entries at equal version, so a delete at
//! version N is never undone by a concurrent edit at version N.

use crate::entry::HistoryEntry;
use chronicle_types::DeviceId;
use std::cmp::Ordering;

/// What happened when a remote entry was offered to the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MergeOutcome {
    /// No local copy existed; the remote entry was adopted.
    Inserted,
    /// The remote entry won and replaced the local copy.
    Replaced,
    /// The local copy won: the remote is stale or lost the tie-break.
    KeptLocal,
    /// The remote entry is identical to the local copy.
    Unchanged,
}

impl MergeOutcome {
    /// True when local state now reflects the remote entry's content.
    pub fn changed_local_state(self) -> bool {
        matches!(self, MergeOutcome::Inserted | MergeOutcome::Replaced)
    }
}

/// Counts of merge results across a batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub applied: usize,
    pub unchanged: usize,
    pub kept_local: usize,
    pub rejected: usize,
}

impl MergeSummary {
    pub fn record(&mut self, outcome: MergeOutcome) {
        match outcome {
            MergeOutcome::Inserted | MergeOutcome::Replaced => self.applied += 1,
            MergeOutcome::Unchanged => self.unchanged += 1,
            MergeOutcome::KeptLocal => self.kept_local += 1,
        }
    }

    pub fn record_rejected(&mut self) {
        self.rejected += 1;
    }

    pub fn total(&self) -> usize {
        self.applied + self.unchanged + self.kept_local + self.rejected
    }
}

/// The fields of one entry that take part in conflict resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MergeKey<'a> {
    pub version: u64,
    pub deleted: bool,
    pub last_modified: i64,
    pub device_id: &'a DeviceId,
    /// Hash of the decrypted canonical content.
    pub content_hash: [u8; 32],
}

impl<'a> MergeKey<'a> {
    pub fn of(entry: &'a HistoryEntry, content_hash: [u8; 32]) -> Self {
        Self {
            version: entry.version,
            deleted: entry.deleted,
            last_modified: entry.last_modified,
            device_id: &entry.device_id,
            content_hash,
        }
    }

    fn rank(&self) -> (u64, bool, i64, &DeviceId, [u8; 32]) {
        (
            self.version,
            self.deleted,
            self.last_modified,
            self.device_id,
            self.content_hash,
        )
    }
}

/// Decides how a remote entry relates to the local copy (if any).
pub fn resolve(local: Option<&MergeKey<'_>>, remote: &MergeKey<'_>) -> MergeOutcome {
    let Some(local) = local else {
        return MergeOutcome::Inserted;
    };
    match remote.rank().cmp(&local.rank()) {
        Ordering::Greater => MergeOutcome::Replaced,
        Ordering::Less => MergeOutcome::KeptLocal,
        Ordering::Equal => MergeOutcome::Unchanged,
    }
}
