//! One sync cycle: pull, merge, push, acknowledge.
//!
//! The store lock is never held across network I/O. Each cycle works on a
//! snapshot of pending entries; acknowledgements only mark an entry synced if
//! its version is still the one that was pushed, so overlapping cycles and
//! concurrent local edits cannot lose an update.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::retry::{RetryQueue, RetryState};
use crate::transport::{PushAck, SyncTransport};
use chronicle_storage::{HistoryEntry, HistoryStore, MergeSummary, StorageResult};
use chronicle_types::{DeviceId, VisitId};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Counts describing one sync cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Entries received from the remote.
    pub pulled: usize,
    pub applied: usize,
    pub unchanged: usize,
    pub kept_local: usize,
    /// Pulled entries refused as corrupt or malformed.
    pub rejected: usize,
    /// Entries offered to the remote.
    pub pushed: usize,
    /// Pushed entries the remote accepted.
    pub acknowledged: usize,
    /// Pushed entries the remote refused or did not mention.
    pub refused: usize,
    /// Entries still awaiting acknowledgement after the cycle.
    pub pending: usize,
    /// Push or pull requests that failed outright.
    pub transport_errors: usize,
}

impl SyncReport {
    fn absorb(&mut self, merge: MergeSummary) {
        self.applied += merge.applied;
        self.unchanged += merge.unchanged;
        self.kept_local += merge.kept_local;
        self.rejected += merge.rejected;
    }

    /// True when every request in the cycle reached the remote.
    pub fn is_healthy(&self) -> bool {
        self.transport_errors == 0
    }
}

/// State carried between cycles. Holding its lock serializes cycles.
#[derive(Default)]
struct CycleState {
    cursor: Option<i64>,
    retry: RetryQueue,
}

/// Reconciles a [`HistoryStore`] with a remote through a [`SyncTransport`].
pub struct SyncEngine {
    store: Arc<HistoryStore>,
    transport: Arc<dyn SyncTransport>,
    config: SyncConfig,
    state: Mutex<CycleState>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<HistoryStore>,
        transport: Arc<dyn SyncTransport>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            transport,
            config,
            state: Mutex::new(CycleState::default()),
        }
    }

    pub fn store(&self) -> &Arc<HistoryStore> {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Runs one full cycle.
    ///
    /// Transport failures are counted in the report rather than returned;
    /// an `Err` means the local store itself failed. In that case the pull
    /// cursor is left where it was, so the next cycle pulls the same entries
    /// again. A cycle started while another is running waits for it to finish.
    pub async fn run_sync_cycle(&self) -> SyncResult<SyncReport> {
        let mut state = self.state.lock().await;
        let mut report = SyncReport::default();

        self.pull_and_apply(&mut state, &mut report).await?;
        self.push_pending(&mut state, &mut report).await?;

        report.pending = self.store.pending_count()?;
        info!(
            "sync cycle: pulled {} (applied {}, rejected {}), pushed {} (acked {}, refused {}), {} pending",
            report.pulled,
            report.applied,
            report.rejected,
            report.pushed,
            report.acknowledged,
            report.refused,
            report.pending
        );
        Ok(report)
    }

    /// Current pull cursor (server high-water mark), if any pull has succeeded.
    pub async fn cursor(&self) -> Option<i64> {
        self.state.lock().await.cursor
    }

    /// Push failure history for entries still pending.
    pub async fn retry_snapshot(&self) -> Vec<(VisitId, RetryState)> {
        self.state.lock().await.retry.snapshot()
    }

    async fn pull_and_apply(
        &self,
        state: &mut CycleState,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let batch = match self.with_timeout(self.transport.pull(state.cursor)).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!("pull failed: {e}");
                report.transport_errors += 1;
                return Ok(());
            }
        };

        report.pulled = batch.entries.len();
        if !batch.entries.is_empty() {
            let store = self.store.clone();
            let entries = batch.entries;
            let summary = tokio::task::spawn_blocking(move || -> StorageResult<MergeSummary> {
                let seen = last_seen_by_device(&entries);
                let summary = store.apply_remote_batch(entries)?;
                for (device_id, seen_at) in seen {
                    if let Err(e) = store.touch_device(&device_id, seen_at) {
                        warn!("failed to record device {device_id}: {e}");
                    }
                }
                Ok(summary)
            })
            .await?
            .inspect_err(|e| warn!("pulled batch not applied, keeping cursor: {e}"))?;
            report.absorb(summary);
        }

        // Only reached once the whole batch is stored.
        if let Some(cursor) = batch.cursor {
            state.cursor = Some(state.cursor.map_or(cursor, |c| c.max(cursor)));
        }
        Ok(())
    }

    async fn push_pending(
        &self,
        state: &mut CycleState,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let store = self.store.clone();
        let pending: Vec<HistoryEntry> = tokio::task::spawn_blocking(move || {
            store.pending_for_sync().map(|entries| entries.collect::<Vec<_>>())
        })
        .await??;

        let ids: HashSet<VisitId> = pending.iter().map(|e| e.visit_id.clone()).collect();
        state.retry.retain_pending(&ids);
        if pending.is_empty() {
            return Ok(());
        }

        for chunk in pending.chunks(self.config.max_batch_size) {
            report.pushed += chunk.len();
            match self.with_timeout(self.transport.push(chunk)).await {
                Ok(acks) => self.apply_acks(chunk, acks, state, report).await?,
                Err(e) => {
                    warn!("push of {} entries failed: {e}", chunk.len());
                    report.transport_errors += 1;
                    let reason = e.to_string();
                    for entry in chunk {
                        state.retry.record_failure(&entry.visit_id, &reason);
                    }
                }
            }
        }
        Ok(())
    }

    async fn apply_acks(
        &self,
        chunk: &[HistoryEntry],
        acks: Vec<PushAck>,
        state: &mut CycleState,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let pushed: HashMap<&VisitId, u64> =
            chunk.iter().map(|e| (&e.visit_id, e.version)).collect();
        let accepted: Vec<(VisitId, u64)> = acks
            .into_iter()
            .filter(|ack| ack.accepted && pushed.get(&ack.visit_id) == Some(&ack.version))
            .map(|ack| (ack.visit_id, ack.version))
            .collect();
        let accepted_ids: HashSet<&VisitId> = accepted.iter().map(|(id, _)| id).collect();

        for entry in chunk {
            if accepted_ids.contains(&entry.visit_id) {
                state.retry.clear(&entry.visit_id);
            } else {
                report.refused += 1;
                state
                    .retry
                    .record_failure(&entry.visit_id, "not acknowledged by remote");
            }
        }
        report.acknowledged += accepted.len();

        let store = self.store.clone();
        let marked = tokio::task::spawn_blocking(move || -> StorageResult<usize> {
            let mut marked = 0;
            for (visit_id, version) in &accepted {
                // False when the entry was edited while the push was in flight.
                if store.mark_synced(visit_id, *version)? {
                    marked += 1;
                }
            }
            Ok(marked)
        })
        .await??;
        debug!("marked {marked} entries synced");
        Ok(())
    }

    async fn with_timeout<T>(&self, fut: impl Future<Output = SyncResult<T>>) -> SyncResult<T> {
        let limit = self.config.request_timeout();
        tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| SyncError::Timeout(limit))?
    }
}

fn last_seen_by_device(entries: &[HistoryEntry]) -> BTreeMap<DeviceId, i64> {
    let mut seen = BTreeMap::new();
    for entry in entries {
        seen.entry(entry.device_id.clone())
            .and_modify(|t: &mut i64| *t = (*t).max(entry.last_modified))
            .or_insert(entry.last_modified);
    }
    seen
}
