//! The authoritative per-device history store.
//!
//! All reads and writes go through one mutex, held only for the duration of a
//! read-modify-write and never across network I/O. Local mutations and remote
//! merges of the same visit therefore never interleave.

use crate::entry::{to_visit, Content, EntryFilter, HistoryEntry, HistoryPatch, HistoryVisit};
use crate::error::{StorageError, StorageResult};
use crate::kv::KvStore;
use crate::merge::{resolve, MergeKey, MergeOutcome, MergeSummary};
use chronicle_crypto::Identity;
use chronicle_types::{now_millis, ClientId, DeviceId, DeviceInfo, SyncStatus, VisitId};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct StoreState {
    entries: BTreeMap<VisitId, HistoryEntry>,
    devices: BTreeMap<DeviceId, DeviceInfo>,
}

/// Versioned, encrypted history records for one identity on one device.
pub struct HistoryStore {
    kv: Arc<dyn KvStore>,
    identity: Arc<Identity>,
    device_id: DeviceId,
    state: Mutex<StoreState>,
}

impl HistoryStore {
    /// Opens the store for `identity`, loading every persisted entry.
    ///
    /// `device_id` identifies this device in every mutation it produces.
    pub fn open(
        kv: Arc<dyn KvStore>,
        identity: Arc<Identity>,
        device_id: DeviceId,
    ) -> StorageResult<Self> {
        let store = Self {
            kv,
            identity,
            device_id,
            state: Mutex::new(StoreState::default()),
        };

        let mut loaded = store.load()?;
        if !loaded.devices.contains_key(&store.device_id) {
            let own = DeviceInfo::unnamed(store.device_id.clone(), now_millis());
            loaded.devices.insert(store.device_id.clone(), own);
            store.persist_devices(&loaded.devices)?;
        }

        info!(
            "history store opened for client {} ({} entries, {} devices)",
            store.identity.client_id(),
            loaded.entries.len(),
            loaded.devices.len()
        );
        *store.lock()? = loaded;
        Ok(store)
    }

    pub fn client_id(&self) -> &ClientId {
        self.identity.client_id()
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    // ── Local mutations ─────────────────────────────────────────

    /// Applies a local edit, bumping the version and marking the entry pending.
    ///
    /// Creates the entry at version 1 if the visit is unknown, which requires
    /// a url unless the patch is a tombstone. Editing a
    /// tombstone fails with [`StorageError::Tombstoned`] unless the patch is
    /// an explicit undelete; deleting a tombstone again is a no-op.
    pub fn apply_local_mutation(
        &self,
        visit_id: &VisitId,
        patch: HistoryPatch,
    ) -> StorageResult<HistoryEntry> {
        let key = self.identity.key();
        let mut state = self.lock()?;
        let now = now_millis();

        let (version, visit_time, mut content, is_new) = match state.entries.get(visit_id) {
            None if patch.url.is_none() && patch.deleted != Some(true) => {
                return Err(StorageError::InvalidEntry(format!(
                    "{visit_id}: a new visit needs a url"
                )));
            }
            None => (1, patch.visit_time.unwrap_or(now), Content::default(), true),
            Some(current) => {
                if current.deleted {
                    match patch.deleted {
                        Some(true) => return Ok(current.clone()),
                        Some(false) => {}
                        None => return Err(StorageError::Tombstoned(visit_id.clone())),
                    }
                }
                let content = Content::open(current, key)?;
                (current.version + 1, current.visit_time, content, false)
            }
        };

        if patch.deleted == Some(false) {
            content.deleted = false;
        }
        if let Some(url) = patch.url {
            content.url = url;
        }
        if let Some(title) = patch.title {
            content.title = title;
        }
        if patch.deleted == Some(true) {
            content = Content {
                deleted: true,
                ..Content::default()
            };
        }
        content.visit_time = visit_time;

        let (url, title) = content.seal(visit_id, key)?;
        let entry = HistoryEntry {
            visit_id: visit_id.clone(),
            url,
            title,
            visit_time,
            version,
            last_modified: now,
            device_id: self.device_id.clone(),
            sync_status: SyncStatus::Pending,
            deleted: content.deleted,
        };

        self.persist_entry(&state, &entry, is_new)?;
        state.entries.insert(visit_id.clone(), entry.clone());
        debug!(visit_id = %visit_id, version, deleted = entry.deleted, "applied local mutation");
        Ok(entry)
    }

    /// Records a newly observed visit under a fresh id.
    pub fn record_visit(
        &self,
        url: impl Into<String>,
        title: impl Into<String>,
        visit_time: i64,
    ) -> StorageResult<HistoryEntry> {
        self.apply_local_mutation(&VisitId::new(), HistoryPatch::visit(url, title, visit_time))
    }

    /// Tombstones an existing entry.
    pub fn delete_entry(&self, visit_id: &VisitId) -> StorageResult<HistoryEntry> {
        if !self.lock()?.entries.contains_key(visit_id) {
            return Err(StorageError::NotFound(visit_id.clone()));
        }
        self.apply_local_mutation(visit_id, HistoryPatch::tombstone())
    }

    // ── Remote merge ────────────────────────────────────────────

    /// Merges one entry received from a peer or server.
    ///
    /// Entries whose blobs fail to decrypt or authenticate are rejected with
    /// the underlying error and leave local state untouched.
    pub fn apply_remote_entry(&self, remote: HistoryEntry) -> StorageResult<MergeOutcome> {
        let key = self.identity.key();
        let remote_hash = match remote.validate().and_then(|()| Content::open(&remote, key)) {
            Ok(content) => content.hash(),
            Err(e) => {
                warn!(
                    visit_id = %remote.visit_id,
                    version = remote.version,
                    "rejected remote entry: {e}"
                );
                return Err(e);
            }
        };

        let mut state = self.lock()?;
        let outcome = {
            let local_key = match state.entries.get(&remote.visit_id) {
                // The content hash only matters when versions tie.
                Some(local) if local.version == remote.version => {
                    Some(MergeKey::of(local, Content::open(local, key)?.hash()))
                }
                Some(local) => Some(MergeKey::of(local, [0u8; 32])),
                None => None,
            };
            resolve(local_key.as_ref(), &MergeKey::of(&remote, remote_hash))
        };

        match outcome {
            MergeOutcome::Inserted | MergeOutcome::Replaced => {
                let mut adopted = remote;
                adopted.sync_status = SyncStatus::Synced;
                self.persist_entry(&state, &adopted, outcome == MergeOutcome::Inserted)?;
                debug!(visit_id = %adopted.visit_id, version = adopted.version, ?outcome, "merged remote entry");
                state.entries.insert(adopted.visit_id.clone(), adopted);
            }
            MergeOutcome::Unchanged => {
                // A remote holding our exact version counts as an acknowledgement.
                let pending = state
                    .entries
                    .get(&remote.visit_id)
                    .is_some_and(|local| local.sync_status == SyncStatus::Pending);
                if pending {
                    self.set_synced(&mut state, &remote.visit_id)?;
                }
            }
            MergeOutcome::KeptLocal => {
                debug!(visit_id = %remote.visit_id, version = remote.version, "remote entry is stale");
            }
        }
        Ok(outcome)
    }

    /// Merges a batch entry by entry.
    ///
    /// Malformed or unreadable entries are counted as rejected. Any other
    /// failure stops the batch and is returned; entries merged before it stay
    /// merged, so redelivering the whole batch is safe.
    pub fn apply_remote_batch(
        &self,
        entries: impl IntoIterator<Item = HistoryEntry>,
    ) -> StorageResult<MergeSummary> {
        let mut summary = MergeSummary::default();
        for entry in entries {
            match self.apply_remote_entry(entry) {
                Ok(outcome) => summary.record(outcome),
                Err(e) if e.is_rejected_record() => summary.record_rejected(),
                Err(e) => return Err(e),
            }
        }
        Ok(summary)
    }

    // ── Sync bookkeeping ────────────────────────────────────────

    /// Lazily enumerates entries awaiting acknowledgement.
    ///
    /// The set of candidate ids is fixed when this is called; each entry is
    /// re-read under the lock as the iterator advances, so entries synced in
    /// the meantime are skipped and newer versions are yielded as they are.
    /// Call again to restart.
    pub fn pending_for_sync(&self) -> StorageResult<PendingEntries<'_>> {
        let state = self.lock()?;
        let ids: Vec<VisitId> = state
            .entries
            .values()
            .filter(|e| e.sync_status == SyncStatus::Pending)
            .map(|e| e.visit_id.clone())
            .collect();
        Ok(PendingEntries {
            store: self,
            ids: ids.into_iter(),
        })
    }

    /// Marks `visit_id` synced if its stored version is still `version`.
    ///
    /// Returns false when the entry is unknown or has been mutated since.
    pub fn mark_synced(&self, visit_id: &VisitId, version: u64) -> StorageResult<bool> {
        let mut state = self.lock()?;
        let (current, pending) = match state.entries.get(visit_id) {
            Some(entry) => (entry.version, entry.sync_status == SyncStatus::Pending),
            None => return Ok(false),
        };
        if current != version {
            debug!(visit_id = %visit_id, acked = version, current, "ack is for an older version");
            return Ok(false);
        }
        if pending {
            self.set_synced(&mut state, visit_id)?;
        }
        Ok(true)
    }

    pub fn pending_count(&self) -> StorageResult<usize> {
        let state = self.lock()?;
        Ok(state
            .entries
            .values()
            .filter(|e| e.sync_status == SyncStatus::Pending)
            .count())
    }

    // ── Reads ───────────────────────────────────────────────────

    /// Returns the stored (encrypted) form of an entry.
    pub fn get_entry(&self, visit_id: &VisitId) -> StorageResult<Option<HistoryEntry>> {
        Ok(self.lock()?.entries.get(visit_id).cloned())
    }

    /// Returns the decrypted view of an entry.
    pub fn get_visit(&self, visit_id: &VisitId) -> StorageResult<Option<HistoryVisit>> {
        let Some(entry) = self.get_entry(visit_id)? else {
            return Ok(None);
        };
        let content = Content::open(&entry, self.identity.key())?;
        Ok(Some(to_visit(&entry, content)))
    }

    /// Decrypted entries matching `filter`, newest visit first.
    ///
    /// Entries that fail to decrypt are logged and left out.
    pub fn entries(&self, filter: &EntryFilter) -> StorageResult<Vec<HistoryVisit>> {
        let mut selected: Vec<HistoryEntry> = {
            let state = self.lock()?;
            state
                .entries
                .values()
                .filter(|e| filter.include_deleted || !e.deleted)
                .filter(|e| filter.device_id.as_ref().is_none_or(|d| &e.device_id == d))
                .filter(|e| filter.since.is_none_or(|since| e.visit_time >= since))
                .cloned()
                .collect()
        };

        selected.sort_by(|a, b| {
            b.visit_time
                .cmp(&a.visit_time)
                .then_with(|| a.visit_id.cmp(&b.visit_id))
        });
        if let Some(limit) = filter.limit {
            selected.truncate(limit);
        }

        let key = self.identity.key();
        let mut visits = Vec::with_capacity(selected.len());
        for entry in selected {
            match Content::open(&entry, key) {
                Ok(content) => visits.push(to_visit(&entry, content)),
                Err(e) => warn!(visit_id = %entry.visit_id, "skipping unreadable entry: {e}"),
            }
        }
        Ok(visits)
    }

    pub fn len(&self) -> StorageResult<usize> {
        Ok(self.lock()?.entries.len())
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    // ── Devices ─────────────────────────────────────────────────

    /// Inserts or updates descriptive info for a device.
    pub fn register_device(&self, info: DeviceInfo) -> StorageResult<()> {
        let mut state = self.lock()?;
        let mut next = state.devices.clone();
        let last_seen = next
            .get(&info.device_id)
            .map_or(info.last_seen, |known| known.last_seen.max(info.last_seen));
        next.insert(info.device_id.clone(), DeviceInfo { last_seen, ..info });
        self.persist_devices(&next)?;
        state.devices = next;
        Ok(())
    }

    /// Notes that `device_id` was seen at `seen_at`, creating a record if needed.
    pub fn touch_device(&self, device_id: &DeviceId, seen_at: i64) -> StorageResult<()> {
        let mut state = self.lock()?;
        if state
            .devices
            .get(device_id)
            .is_some_and(|known| known.last_seen >= seen_at)
        {
            return Ok(());
        }
        let mut next = state.devices.clone();
        next.entry(device_id.clone())
            .and_modify(|known| known.last_seen = seen_at)
            .or_insert_with(|| DeviceInfo::unnamed(device_id.clone(), seen_at));
        self.persist_devices(&next)?;
        state.devices = next;
        Ok(())
    }

    pub fn devices(&self) -> StorageResult<Vec<DeviceInfo>> {
        Ok(self.lock()?.devices.values().cloned().collect())
    }

    // ── Internals ───────────────────────────────────────────────

    fn lock(&self) -> StorageResult<MutexGuard<'_, StoreState>> {
        self.state.lock().map_err(|_| StorageError::LockPoisoned)
    }

    fn entry_key(&self, visit_id: &VisitId) -> String {
        format!("history/{}/entry/{}", self.identity.client_id(), visit_id)
    }

    fn index_key(&self) -> String {
        format!("history/{}/index", self.identity.client_id())
    }

    fn devices_key(&self) -> String {
        format!("history/{}/devices", self.identity.client_id())
    }

    fn load(&self) -> StorageResult<StoreState> {
        let mut state = StoreState::default();

        if let Some(raw) = self.kv.get(&self.index_key())? {
            let ids: Vec<VisitId> = serde_json::from_slice(&raw)?;
            for id in ids {
                match self.kv.get(&self.entry_key(&id))? {
                    Some(bytes) => match serde_json::from_slice::<HistoryEntry>(&bytes) {
                        Ok(entry) => {
                            state.entries.insert(id, entry);
                        }
                        Err(e) => warn!(visit_id = %id, "skipping unreadable stored entry: {e}"),
                    },
                    None => warn!(visit_id = %id, "index lists an entry that is not stored"),
                }
            }
        }

        if let Some(raw) = self.kv.get(&self.devices_key())? {
            let devices: Vec<DeviceInfo> = serde_json::from_slice(&raw)?;
            state.devices = devices
                .into_iter()
                .map(|d| (d.device_id.clone(), d))
                .collect();
        }

        Ok(state)
    }

    /// Writes an entry before memory is updated.
    ///
    /// New ids go into the index first. If the entry write then fails, the
    /// index names an entry that is not stored, which `load` logs and skips.
    fn persist_entry(
        &self,
        state: &StoreState,
        entry: &HistoryEntry,
        is_new: bool,
    ) -> StorageResult<()> {
        let bytes = serde_json::to_vec(entry)?;
        if is_new {
            let mut ids: Vec<&VisitId> = state.entries.keys().collect();
            ids.push(&entry.visit_id);
            self.kv.set(&self.index_key(), &serde_json::to_vec(&ids)?)?;
        }
        self.kv.set(&self.entry_key(&entry.visit_id), &bytes)
    }

    fn persist_devices(&self, devices: &BTreeMap<DeviceId, DeviceInfo>) -> StorageResult<()> {
        let list: Vec<&DeviceInfo> = devices.values().collect();
        self.kv.set(&self.devices_key(), &serde_json::to_vec(&list)?)
    }

    fn set_synced(&self, state: &mut StoreState, visit_id: &VisitId) -> StorageResult<()> {
        let Some(current) = state.entries.get(visit_id) else {
            return Ok(());
        };
        let mut synced = current.clone();
        synced.sync_status = SyncStatus::Synced;
        self.persist_entry(state, &synced, false)?;
        state.entries.insert(visit_id.clone(), synced);
        Ok(())
    }
}

/// Iterator returned by [`HistoryStore::pending_for_sync`].
pub struct PendingEntries<'a> {
    store: &'a HistoryStore,
    ids: std::vec::IntoIter<VisitId>,
}

impl Iterator for PendingEntries<'_> {
    type Item = HistoryEntry;

    fn next(&mut self) -> Option<HistoryEntry> {
        for id in self.ids.by_ref() {
            let state = match self.store.state.lock() {
                Ok(state) => state,
                Err(_) => {
                    error!("history store lock poisoned while enumerating pending entries");
                    return None;
                }
            };
            if let Some(entry) = state.entries.get(&id) {
                if entry.sync_status == SyncStatus::Pending {
                    return Some(entry.clone());
                }
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.ids.len()))
    }
}
