//! Process-wide in-progress, last-exec, and crash-recovery bookkeeping.
//!
//! The registry is the concurrency-control layer for the scheduler: SQL
//! writes are unconditional, and the at-most-one-in-progress-per-pair
//! invariant is enforced entirely here. Each map sits behind its own
//! read/write lock so readers proceed concurrently.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::RwLock;

/// Identity of a (source, destination) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairKey {
    source_id: String,
    destination_id: String,
}

impl PairKey {
    /// Creates a key for the given pair.
    #[must_use]
    pub fn new(source_id: impl Into<String>, destination_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            destination_id: destination_id.into(),
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "source:{}:destination:{}",
            self.source_id, self.destination_id
        )
    }
}

/// Shared scheduler state: which pairs have an active upload, when each
/// pair last started a run, and which destinations still need crash
/// recovery.
#[derive(Debug, Default)]
pub struct SyncRegistry {
    in_progress: RwLock<HashSet<PairKey>>,
    last_exec: RwLock<HashMap<PairKey, i64>>,
    recovery: RwLock<HashSet<String>>,
}

impl SyncRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically claims the pair for an upload run.
    ///
    /// Returns false when the pair already has a run in flight. Claiming
    /// and checking are one operation so two concurrent ticks cannot both
    /// admit the same pair.
    pub fn try_acquire(&self, pair: &PairKey) -> bool {
        let mut guard = self.in_progress.write().expect("in_progress lock poisoned");
        guard.insert(pair.clone())
    }

    /// Releases the pair after a run completes or is skipped.
    pub fn release(&self, pair: &PairKey) {
        let mut guard = self.in_progress.write().expect("in_progress lock poisoned");
        guard.remove(pair);
    }

    /// True when the pair currently has a run in flight.
    #[must_use]
    pub fn is_in_progress(&self, pair: &PairKey) -> bool {
        let guard = self.in_progress.read().expect("in_progress lock poisoned");
        guard.contains(pair)
    }

    /// Number of pairs currently in flight.
    #[must_use]
    pub fn in_progress_count(&self) -> usize {
        let guard = self.in_progress.read().expect("in_progress lock poisoned");
        guard.len()
    }

    /// Records that the pair started a run at `now_unix`.
    pub fn record_last_exec(&self, pair: &PairKey, now_unix: i64) {
        let mut guard = self.last_exec.write().expect("last_exec lock poisoned");
        guard.insert(pair.clone(), now_unix);
    }

    /// Unix timestamp of the pair's last run start, if any.
    #[must_use]
    pub fn last_exec(&self, pair: &PairKey) -> Option<i64> {
        let guard = self.last_exec.read().expect("last_exec lock poisoned");
        guard.get(pair).copied()
    }

    /// Marks a destination as interrupted mid-export at startup.
    pub fn mark_recovery(&self, destination_id: impl Into<String>) {
        let mut guard = self.recovery.write().expect("recovery lock poisoned");
        guard.insert(destination_id.into());
    }

    /// True when the destination still needs crash recovery.
    #[must_use]
    pub fn needs_recovery(&self, destination_id: &str) -> bool {
        let guard = self.recovery.read().expect("recovery lock poisoned");
        guard.contains(destination_id)
    }

    /// Clears the destination from the recovery set after a successful
    /// `crash_recover`.
    pub fn clear_recovery(&self, destination_id: &str) {
        let mut guard = self.recovery.write().expect("recovery lock poisoned");
        guard.remove(destination_id);
    }
}
