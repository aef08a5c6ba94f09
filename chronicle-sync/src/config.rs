//! Sync configuration.

use crate::error::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the sync engine and service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between periodic sync cycles.
    pub sync_interval_secs: u64,

    /// Upper bound on a single push or pull request.
    pub request_timeout_secs: u64,

    /// Maximum entries per push request.
    pub max_batch_size: usize,

    /// Ceiling for the periodic interval after repeated failed cycles.
    pub max_backoff_secs: u64,

    /// Base URL of the sync server (e.g., "https://sync.example.com/api").
    /// Only required by the HTTP transport.
    pub endpoint: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: 300, // 5 minutes
            request_timeout_secs: 30,
            max_batch_size: 100,
            max_backoff_secs: 3600,
            endpoint: None,
        }
    }
}

impl SyncConfig {
    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> SyncResult<()> {
        if self.sync_interval_secs == 0 {
            return Err(SyncError::Config("sync_interval_secs must be > 0".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(SyncError::Config("request_timeout_secs must be > 0".into()));
        }
        if self.max_batch_size == 0 {
            return Err(SyncError::Config("max_batch_size must be > 0".into()));
        }
        if self.max_backoff_secs < self.sync_interval_secs {
            return Err(SyncError::Config(
                "max_backoff_secs must be >= sync_interval_secs".into(),
            ));
        }
        Ok(())
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}
