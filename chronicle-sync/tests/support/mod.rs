//! Shared helpers for sync integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chronicle_crypto::{derive_identity_with_params, Identity, KdfParams};
use chronicle_storage::{
    HistoryEntry, HistoryStore, KvStore, MemoryKvStore, StorageError, StorageResult,
};
use chronicle_sync::{PullBatch, PushAck, SyncConfig, SyncEngine, SyncError, SyncResult, SyncTransport};
use chronicle_types::{DeviceId, VisitId};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

pub const PHRASE: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chronicle_sync=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// One identity shared by every device in a test (derived once per binary).
pub fn identity() -> Arc<Identity> {
    static IDENTITY: OnceLock<Arc<Identity>> = OnceLock::new();
    IDENTITY
        .get_or_init(|| {
            Arc::new(derive_identity_with_params(PHRASE, &KdfParams::testing()).unwrap())
        })
        .clone()
}

pub fn test_config() -> SyncConfig {
    SyncConfig {
        sync_interval_secs: 3600,
        request_timeout_secs: 1,
        max_batch_size: 100,
        max_backoff_secs: 3600,
        endpoint: None,
    }
}

pub fn open_store(device: &str) -> Arc<HistoryStore> {
    Arc::new(
        HistoryStore::open(
            Arc::new(MemoryKvStore::new()),
            identity(),
            DeviceId::from(device),
        )
        .unwrap(),
    )
}

/// A device: its store plus an engine talking to `transport`.
pub struct Device {
    pub store: Arc<HistoryStore>,
    pub engine: SyncEngine,
}

pub fn device(name: &str, transport: Arc<dyn SyncTransport>) -> Device {
    device_with_config(name, transport, test_config())
}

pub fn device_with_config(
    name: &str,
    transport: Arc<dyn SyncTransport>,
    config: SyncConfig,
) -> Device {
    let store = open_store(name);
    let engine = SyncEngine::new(store.clone(), transport, config);
    Device { store, engine }
}

/// Memory-backed KV store whose writes can be switched to fail, like a full disk.
#[derive(Default)]
pub struct FlakyKv {
    inner: MemoryKvStore,
    fail_writes: AtomicBool,
}

impl FlakyKv {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl KvStore for FlakyKv {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("disk full".into()));
        }
        self.inner.set(key, value)
    }
}

// ── In-memory server ─────────────────────────────────────────────

#[derive(Default)]
struct ServerState {
    /// Latest entry per visit, with the sequence number it was stored at.
    entries: BTreeMap<VisitId, (i64, HistoryEntry)>,
    last_seq: i64,
    fail_pushes: usize,
    fail_pulls: usize,
    hang_pulls: bool,
    refuse: HashSet<VisitId>,
    push_calls: usize,
    pull_calls: usize,
    batch_sizes: Vec<usize>,
}

/// A sync server holding encrypted entries for one client.
///
/// Applies last-writer-wins on metadata alone (it cannot decrypt) and hands
/// out a monotonically increasing sequence number as the pull cursor.
#[derive(Default)]
pub struct InMemoryServer {
    state: Mutex<ServerState>,
}

impl InMemoryServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Stores an entry as if another client had pushed it.
    pub fn seed(&self, entry: HistoryEntry) {
        let mut state = self.state.lock().unwrap();
        state.last_seq += 1;
        let seq = state.last_seq;
        state.entries.insert(entry.visit_id.clone(), (seq, entry));
    }

    pub fn fail_next_pushes(&self, n: usize) {
        self.state.lock().unwrap().fail_pushes = n;
    }

    pub fn fail_next_pulls(&self, n: usize) {
        self.state.lock().unwrap().fail_pulls = n;
    }

    pub fn hang_pulls(&self, hang: bool) {
        self.state.lock().unwrap().hang_pulls = hang;
    }

    pub fn refuse(&self, visit_id: &VisitId) {
        self.state.lock().unwrap().refuse.insert(visit_id.clone());
    }

    pub fn entry(&self, visit_id: &VisitId) -> Option<HistoryEntry> {
        let state = self.state.lock().unwrap();
        state.entries.get(visit_id).map(|(_, e)| e.clone())
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    pub fn push_calls(&self) -> usize {
        self.state.lock().unwrap().push_calls
    }

    pub fn pull_calls(&self) -> usize {
        self.state.lock().unwrap().pull_calls
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.state.lock().unwrap().batch_sizes.clone()
    }
}

fn rank(entry: &HistoryEntry) -> (u64, bool, i64, DeviceId) {
    (
        entry.version,
        entry.deleted,
        entry.last_modified,
        entry.device_id.clone(),
    )
}

#[async_trait]
impl SyncTransport for InMemoryServer {
    async fn push(&self, entries: &[HistoryEntry]) -> SyncResult<Vec<PushAck>> {
        let mut state = self.state.lock().unwrap();
        state.push_calls += 1;
        if state.fail_pushes > 0 {
            state.fail_pushes -= 1;
            return Err(SyncError::Transport("connection reset".into()));
        }
        state.batch_sizes.push(entries.len());

        let mut acks = Vec::with_capacity(entries.len());
        for entry in entries {
            if state.refuse.contains(&entry.visit_id) {
                acks.push(PushAck::refused(entry));
                continue;
            }
            let current = state.entries.get(&entry.visit_id).map(|(_, e)| rank(e));
            match current {
                Some(stored) if stored > rank(entry) => acks.push(PushAck::refused(entry)),
                Some(stored) if stored == rank(entry) => acks.push(PushAck::accepted(entry)),
                _ => {
                    state.last_seq += 1;
                    let seq = state.last_seq;
                    state
                        .entries
                        .insert(entry.visit_id.clone(), (seq, entry.clone()));
                    acks.push(PushAck::accepted(entry));
                }
            }
        }
        Ok(acks)
    }

    async fn pull(&self, since: Option<i64>) -> SyncResult<PullBatch> {
        let hang = {
            let mut state = self.state.lock().unwrap();
            state.pull_calls += 1;
            if state.fail_pulls > 0 {
                state.fail_pulls -= 1;
                return Err(SyncError::Status { code: 503 });
            }
            state.hang_pulls
        };
        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }

        let state = self.state.lock().unwrap();
        let since = since.unwrap_or(0);
        let mut changed: Vec<&(i64, HistoryEntry)> = state
            .entries
            .values()
            .filter(|(seq, _)| *seq > since)
            .collect();
        changed.sort_by_key(|(seq, _)| *seq);
        Ok(PullBatch {
            entries: changed.into_iter().map(|(_, e)| e.clone()).collect(),
            cursor: (state.last_seq > 0).then_some(state.last_seq),
        })
    }
}
