//! Versioned, encrypted history storage for ChronicleSync.
//!
//! Holds the authoritative per-device view of every history entry and decides
//! how remote copies of the same visit merge into it.
//!
//! # Architecture
//!
//! - Entries are persisted one per visit id through a [`KvStore`] collaborator;
//!   `url` and `title` only ever reach it as encrypted blobs
//! - Every mutation bumps a per-visit version; deletes are tombstones
//! - Remote entries merge with a deterministic last-writer-wins rule
//!   ([`merge::resolve`]) so replicas converge regardless of delivery order
//! - A single mutex serializes every read-modify-write on the store

mod entry;
mod error;
mod history_store;
mod kv;
pub mod merge;

pub use entry::{EntryFilter, HistoryEntry, HistoryPatch, HistoryVisit};
pub use error::{StorageError, StorageResult};
pub use history_store::{HistoryStore, PendingEntries};
pub use kv::{DuckDbKvStore, KvStore, MemoryKvStore};
pub use merge::{MergeOutcome, MergeSummary};
