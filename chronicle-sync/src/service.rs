//! Typed command service owning the periodic sync loop.
//!
//! Callers talk to the service through a cloneable [`SyncHandle`]; every
//! operation is a [`SyncCommand`] variant with its own reply channel. Store
//! work runs on the blocking pool and sync cycles run as separate tasks, so
//! a slow network never delays a `Save` or `Get`.

use crate::engine::{SyncEngine, SyncReport};
use crate::error::{SyncError, SyncResult};
use chronicle_storage::{
    EntryFilter, HistoryEntry, HistoryPatch, HistoryStore, HistoryVisit, MergeSummary,
    StorageResult,
};
use chronicle_types::VisitId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Operations accepted by [`SyncService`].
#[derive(Debug)]
pub enum SyncCommand {
    /// Apply a local edit (creating the visit if unknown).
    Save {
        visit_id: VisitId,
        patch: HistoryPatch,
        reply: oneshot::Sender<SyncResult<HistoryEntry>>,
    },
    /// Read decrypted history.
    Get {
        filter: EntryFilter,
        reply: oneshot::Sender<SyncResult<Vec<HistoryVisit>>>,
    },
    /// Run a sync cycle now.
    Sync {
        reply: oneshot::Sender<SyncResult<SyncReport>>,
    },
    /// Merge entries received out of band (e.g. from a peer).
    Merge {
        entries: Vec<HistoryEntry>,
        reply: oneshot::Sender<SyncResult<MergeSummary>>,
    },
    Shutdown,
}

/// Status notifications emitted after each sync cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncEvent {
    CycleCompleted(SyncReport),
    CycleFailed { error: String },
}

/// Handle for sending commands to the sync service.
#[derive(Clone)]
pub struct SyncHandle {
    command_tx: mpsc::Sender<SyncCommand>,
}

impl SyncHandle {
    pub async fn save(&self, visit_id: VisitId, patch: HistoryPatch) -> SyncResult<HistoryEntry> {
        self.request(|reply| SyncCommand::Save {
            visit_id,
            patch,
            reply,
        })
        .await
    }

    /// Records a newly observed visit under a fresh id.
    pub async fn record_visit(
        &self,
        url: impl Into<String>,
        title: impl Into<String>,
        visit_time: i64,
    ) -> SyncResult<HistoryEntry> {
        self.save(VisitId::new(), HistoryPatch::visit(url, title, visit_time))
            .await
    }

    pub async fn get(&self, filter: EntryFilter) -> SyncResult<Vec<HistoryVisit>> {
        self.request(|reply| SyncCommand::Get { filter, reply })
            .await
    }

    pub async fn sync_now(&self) -> SyncResult<SyncReport> {
        self.request(|reply| SyncCommand::Sync { reply }).await
    }

    pub async fn merge(&self, entries: Vec<HistoryEntry>) -> SyncResult<MergeSummary> {
        self.request(|reply| SyncCommand::Merge { entries, reply })
            .await
    }

    pub async fn shutdown(&self) -> SyncResult<()> {
        self.command_tx
            .send(SyncCommand::Shutdown)
            .await
            .map_err(|_| SyncError::ChannelClosed)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<SyncResult<T>>) -> SyncCommand,
    ) -> SyncResult<T> {
        let (reply, response) = oneshot::channel();
        self.command_tx
            .send(command(reply))
            .await
            .map_err(|_| SyncError::ChannelClosed)?;
        response.await.map_err(|_| SyncError::ChannelClosed)?
    }
}

/// Event loop serving commands and running periodic sync cycles.
pub struct SyncService {
    engine: Arc<SyncEngine>,
    command_rx: mpsc::Receiver<SyncCommand>,
    event_tx: mpsc::Sender<SyncEvent>,
    /// In-flight cycles; each resolves to whether it was healthy.
    cycles: JoinSet<bool>,
}

/// Creates a sync service, its command handle, and its status event stream.
pub fn create_sync_service(
    engine: Arc<SyncEngine>,
) -> SyncResult<(SyncHandle, mpsc::Receiver<SyncEvent>, SyncService)> {
    engine.config().validate()?;

    let (command_tx, command_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::channel(16);

    let service = SyncService {
        engine,
        command_rx,
        event_tx,
        cycles: JoinSet::new(),
    };
    Ok((SyncHandle { command_tx }, event_rx, service))
}

impl SyncService {
    /// Runs until [`SyncHandle::shutdown`] or until every handle is dropped.
    ///
    /// In-flight cycles are aborted on exit; nothing that was not
    /// acknowledged is ever marked synced, so the store stays consistent.
    pub async fn run(mut self) {
        let base = self.engine.config().sync_interval();
        let ceiling = self.engine.config().max_backoff();
        let mut delay = base;
        let timer = tokio::time::sleep(delay);
        tokio::pin!(timer);

        info!("sync service started (interval {base:?})");

        loop {
            tokio::select! {
                () = &mut timer => {
                    self.spawn_cycle(None);
                    timer.as_mut().reset(Instant::now() + delay);
                }
                Some(joined) = self.cycles.join_next() => {
                    let healthy = joined.unwrap_or_else(|e| {
                        error!("sync cycle task failed: {e}");
                        false
                    });
                    delay = next_delay(delay, base, ceiling, healthy);
                    if delay > base {
                        debug!("backing off, next sync in {delay:?}");
                    }
                    timer.as_mut().reset(Instant::now() + delay);
                }
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(SyncCommand::Save { visit_id, patch, reply }) => {
                            let store = self.store();
                            let result = blocking(move || store.apply_local_mutation(&visit_id, patch)).await;
                            let _ = reply.send(result);
                        }
                        Some(SyncCommand::Get { filter, reply }) => {
                            let store = self.store();
                            let result = blocking(move || store.entries(&filter)).await;
                            let _ = reply.send(result);
                        }
                        Some(SyncCommand::Merge { entries, reply }) => {
                            let store = self.store();
                            let result = blocking(move || store.apply_remote_batch(entries)).await;
                            let _ = reply.send(result);
                        }
                        Some(SyncCommand::Sync { reply }) => {
                            self.spawn_cycle(Some(reply));
                        }
                        Some(SyncCommand::Shutdown) => {
                            info!("sync service stopping");
                            break;
                        }
                        None => {
                            info!("command channel closed, stopping sync service");
                            break;
                        }
                    }
                }
            }
        }

        self.cycles.shutdown().await;
        info!("sync service stopped");
    }

    fn store(&self) -> Arc<HistoryStore> {
        self.engine.store().clone()
    }

    fn spawn_cycle(&mut self, reply: Option<oneshot::Sender<SyncResult<SyncReport>>>) {
        let engine = self.engine.clone();
        let events = self.event_tx.clone();
        self.cycles.spawn(async move {
            let result = engine.run_sync_cycle().await;
            let healthy = result.as_ref().is_ok_and(SyncReport::is_healthy);
            let event = match &result {
                Ok(report) => SyncEvent::CycleCompleted(*report),
                Err(e) => {
                    error!("sync cycle failed: {e}");
                    SyncEvent::CycleFailed {
                        error: e.to_string(),
                    }
                }
            };
            if events.try_send(event).is_err() {
                debug!("sync event dropped (no listener or queue full)");
            }
            if let Some(reply) = reply {
                let _ = reply.send(result);
            }
            healthy
        });
    }
}

async fn blocking<T, F>(work: F) -> SyncResult<T>
where
    F: FnOnce() -> StorageResult<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(work).await??)
}

/// Interval before the next periodic cycle.
fn next_delay(current: Duration, base: Duration, ceiling: Duration, healthy: bool) -> Duration {
    if healthy {
        base
    } else {
        current.saturating_mul(2).min(ceiling).max(base)
    }
}
