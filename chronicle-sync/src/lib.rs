//! Sync engine for ChronicleSync.
//!
//! Provides multi-device reconciliation of the history store with:
//! - Pull/merge/push cycles over a pluggable [`SyncTransport`]
//! - Per-entry acknowledgement and a retry queue for unacknowledged pushes
//! - An HTTP transport for the ChronicleSync server
//! - A typed command service with periodic sync and failure backoff

pub mod config;
pub mod engine;
pub mod error;
pub mod http_transport;
pub mod retry;
pub mod service;
pub mod transport;

pub use config::SyncConfig;
pub use engine::{SyncEngine, SyncReport};
pub use error::{SyncError, SyncResult};
pub use http_transport::HttpTransport;
pub use retry::{RetryQueue, RetryState};
pub use service::{create_sync_service, SyncCommand, SyncEvent, SyncHandle, SyncService};
pub use transport::{PullBatch, PushAck, SyncTransport};
