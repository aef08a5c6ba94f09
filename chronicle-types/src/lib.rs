//! Shared identifiers and value types for ChronicleSync.
//!
//! These are plain data types with no behavior beyond construction,
//! formatting and ordering. Every other crate in the workspace depends on them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Globally unique identifier of one history visit.
///
/// Usually a random UUID, but any stable string (for example a content hash)
/// is accepted so that visits imported from other sources keep their ids.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VisitId(String);

impl VisitId {
    /// Creates a fresh random visit id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VisitId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for VisitId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for VisitId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for VisitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one device (browser profile) participating in sync.
///
/// Ordered lexicographically; the order is part of the merge tie-break.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a fresh random device id. Callers persist it once per profile.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Public partition key for one logical user, derived from the recovery phrase.
///
/// Safe to send to a server: it is a truncated one-way hash and reveals
/// nothing about the phrase or the encryption key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Length of a client id in hex characters.
    pub const HEX_LEN: usize = 32;

    /// Wraps an already-derived hex string.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether the current version of an entry has been acknowledged remotely.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Local mutation not yet acknowledged by any peer or server.
    Pending,
    /// Acknowledged, or adopted from a remote.
    Synced,
}

/// Descriptive information about a device seen in sync.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_id: DeviceId,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub browser_name: String,
    #[serde(default)]
    pub browser_version: String,
    /// Epoch millis of the last time this device was observed.
    #[serde(default)]
    pub last_seen: i64,
}

impl DeviceInfo {
    /// Minimal record for a device known only by id.
    pub fn unnamed(device_id: DeviceId, last_seen: i64) -> Self {
        Self {
            device_id,
            platform: String::new(),
            browser_name: String::new(),
            browser_version: String::new(),
            last_seen,
        }
    }
}
