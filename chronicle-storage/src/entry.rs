//! History entry model: the encrypted at-rest/wire form, the decrypted view,
//! and local patches.

use crate::error::{StorageError, StorageResult};
use chronicle_crypto::{decrypt_string, encrypt_string, DerivedKey, EncryptedData};
use chronicle_types::{DeviceId, SyncStatus, VisitId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One versioned history visit as persisted and exchanged with peers.
///
/// `url` and `title` are encrypted blobs bound to this visit id. A tombstone
/// (`deleted = true`) carries neither.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub visit_id: VisitId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<EncryptedData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<EncryptedData>,
    /// Epoch millis of the visit itself. Never changes after creation.
    pub visit_time: i64,
    pub version: u64,
    /// Epoch millis of the mutation that produced `version`.
    pub last_modified: i64,
    /// Device that produced `version`.
    pub device_id: DeviceId,
    pub sync_status: SyncStatus,
    #[serde(default)]
    pub deleted: bool,
}

impl HistoryEntry {
    /// Checks structural invariants of an entry received from elsewhere.
    pub fn validate(&self) -> StorageResult<()> {
        if self.version == 0 {
            return Err(StorageError::InvalidEntry(format!(
                "{}: version must be at least 1",
                self.visit_id
            )));
        }
        if self.deleted {
            if self.url.is_some() || self.title.is_some() {
                return Err(StorageError::InvalidEntry(format!(
                    "{}: tombstone carries payload",
                    self.visit_id
                )));
            }
        } else if self.url.is_none() || self.title.is_none() {
            return Err(StorageError::InvalidEntry(format!(
                "{}: live entry is missing encrypted fields",
                self.visit_id
            )));
        }
        Ok(())
    }
}

/// Decrypted view of an entry, for the UI layer only. Never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryVisit {
    pub visit_id: VisitId,
    pub url: String,
    pub title: String,
    pub visit_time: i64,
    pub version: u64,
    pub last_modified: i64,
    pub device_id: DeviceId,
    pub sync_status: SyncStatus,
    pub deleted: bool,
}

/// A local edit to one visit.
///
/// `visit_time` only applies when the patch creates the entry.
/// `deleted = Some(true)` tombstones the entry; `Some(false)` undeletes it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HistoryPatch {
    pub url: Option<String>,
    pub title: Option<String>,
    pub visit_time: Option<i64>,
    pub deleted: Option<bool>,
}

impl HistoryPatch {
    /// Patch describing a newly observed visit.
    pub fn visit(url: impl Into<String>, title: impl Into<String>, visit_time: i64) -> Self {
        Self {
            url: Some(url.into()),
            title: Some(title.into()),
            visit_time: Some(visit_time),
            deleted: None,
        }
    }

    pub fn tombstone() -> Self {
        Self {
            deleted: Some(true),
            ..Self::default()
        }
    }

    pub fn undelete() -> Self {
        Self {
            deleted: Some(false),
            ..Self::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Selection for [`HistoryStore::entries`](crate::HistoryStore::entries).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntryFilter {
    /// Only entries whose current version came from this device.
    pub device_id: Option<DeviceId>,
    /// Only visits at or after this epoch millis.
    pub since: Option<i64>,
    pub include_deleted: bool,
    pub limit: Option<usize>,
}

/// Canonical plaintext content of an entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Content {
    pub url: String,
    pub title: String,
    pub visit_time: i64,
    pub deleted: bool,
}

impl Content {
    /// SHA-256 over length-prefixed canonical fields.
    ///
    /// Ciphertexts differ on every encryption, so equality of content is
    /// decided on this hash, never on blob bytes.
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update((self.url.len() as u64).to_be_bytes());
        hasher.update(self.url.as_bytes());
        hasher.update((self.title.len() as u64).to_be_bytes());
        hasher.update(self.title.as_bytes());
        hasher.update(self.visit_time.to_be_bytes());
        hasher.update([self.deleted as u8]);
        hasher.finalize().into()
    }

    /// Decrypts the content of an entry.
    pub fn open(entry: &HistoryEntry, key: &DerivedKey) -> StorageResult<Self> {
        if entry.deleted {
            return Ok(Self {
                visit_time: entry.visit_time,
                deleted: true,
                ..Self::default()
            });
        }
        let (Some(url), Some(title)) = (&entry.url, &entry.title) else {
            return Err(StorageError::InvalidEntry(format!(
                "{}: live entry is missing encrypted fields",
                entry.visit_id
            )));
        };
        Ok(Self {
            url: decrypt_string(key, url, &field_aad(&entry.visit_id, "url"))?,
            title: decrypt_string(key, title, &field_aad(&entry.visit_id, "title"))?,
            visit_time: entry.visit_time,
            deleted: false,
        })
    }

    /// Encrypts the payload fields for `visit_id`. Tombstones yield no blobs.
    pub fn seal(
        &self,
        visit_id: &VisitId,
        key: &DerivedKey,
    ) -> StorageResult<(Option<EncryptedData>, Option<EncryptedData>)> {
        if self.deleted {
            return Ok((None, None));
        }
        let url = encrypt_string(key, &self.url, &field_aad(visit_id, "url"))?;
        let title = encrypt_string(key, &self.title, &field_aad(visit_id, "title"))?;
        Ok((Some(url), Some(title)))
    }
}

/// Associated data binding a field blob to its visit and field name.
pub(crate) fn field_aad(visit_id: &VisitId, field: &str) -> Vec<u8> {
    format!("{visit_id}:{field}").into_bytes()
}

pub(crate) fn to_visit(entry: &HistoryEntry, content: Content) -> HistoryVisit {
    HistoryVisit {
        visit_id: entry.visit_id.clone(),
        url: content.url,
        title: content.title,
        visit_time: entry.visit_time,
        version: entry.version,
        last_modified: entry.last_modified,
        device_id: entry.device_id.clone(),
        sync_status: entry.sync_status,
        deleted: entry.deleted,
    }
}
