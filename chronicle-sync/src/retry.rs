//! Bookkeeping for entries whose push has not been acknowledged.
//!
//! The authoritative "needs sync" flag lives in the history store; this queue
//! only records how often each pending entry has failed and why, so callers
//! can surface a status signal.

use chronicle_types::{now_millis, VisitId};
use std::collections::{HashMap, HashSet};

/// Failure history for one pending entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryState {
    pub attempts: u32,
    pub last_error: String,
    /// Epoch millis of the most recent failed attempt.
    pub last_attempt: i64,
}

/// Per-visit push failures, cleared when a push is acknowledged.
#[derive(Debug, Default)]
pub struct RetryQueue {
    entries: HashMap<VisitId, RetryState>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a failed push attempt for `visit_id`.
    pub fn record_failure(&mut self, visit_id: &VisitId, error: &str) {
        let now = now_millis();
        self.entries
            .entry(visit_id.clone())
            .and_modify(|state| {
                state.attempts += 1;
                state.last_error = error.to_string();
                state.last_attempt = now;
            })
            .or_insert_with(|| RetryState {
                attempts: 1,
                last_error: error.to_string(),
                last_attempt: now,
            });
    }

    /// Forgets `visit_id` after an acknowledged push.
    pub fn clear(&mut self, visit_id: &VisitId) {
        self.entries.remove(visit_id);
    }

    /// Drops entries that are no longer pending (e.g. superseded by a pull).
    pub fn retain_pending(&mut self, pending: &HashSet<VisitId>) {
        self.entries.retain(|id, _| pending.contains(id));
    }

    pub fn get(&self, visit_id: &VisitId) -> Option<&RetryState> {
        self.entries.get(visit_id)
    }

    pub fn attempts(&self, visit_id: &VisitId) -> u32 {
        self.entries.get(visit_id).map_or(0, |s| s.attempts)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of every tracked entry, ordered by visit id.
    pub fn snapshot(&self) -> Vec<(VisitId, RetryState)> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}
