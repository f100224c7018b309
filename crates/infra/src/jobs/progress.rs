//! Live progress counters for a run.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Point-in-time view of a run.
///
/// Invariant: `successes + errors == current <= total`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub current: usize,
    pub successes: usize,
    pub errors: usize,
    pub active: bool,
}

impl ProgressSnapshot {
    pub fn is_consistent(&self) -> bool {
        self.successes + self.errors == self.current && self.current <= self.total
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.current)
    }
}

/// Owner of the only mutable counters of a run.
///
/// Mutation is crate-private: the worker or runner that owns the reporter
/// updates it, everybody else observes through [`ProgressReporter::subscribe`].
#[derive(Debug)]
pub struct ProgressReporter {
    tx: watch::Sender<ProgressSnapshot>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ProgressSnapshot::default());
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        *self.tx.borrow()
    }

    /// Reset the counters for a new run of `total` units.
    pub(crate) fn begin(&self, total: usize) {
        self.tx.send_replace(ProgressSnapshot {
            total,
            active: true,
            ..ProgressSnapshot::default()
        });
    }

    pub(crate) fn record_success(&self) -> ProgressSnapshot {
        self.update(|s| {
            s.current += 1;
            s.successes += 1;
        })
    }

    pub(crate) fn record_error(&self) -> ProgressSnapshot {
        self.update(|s| {
            s.current += 1;
            s.errors += 1;
        })
    }

    /// Re-derive `total` from the units still owed.
    pub(crate) fn set_remaining(&self, remaining: usize) -> ProgressSnapshot {
        self.update(|s| s.total = s.current + remaining)
    }

    pub(crate) fn finish(&self) -> ProgressSnapshot {
        self.update(|s| s.active = false)
    }

    fn update(&self, f: impl FnOnce(&mut ProgressSnapshot)) -> ProgressSnapshot {
        self.tx.send_modify(|s| {
            f(s);
            s.total = s.total.max(s.current);
        });
        let snapshot = self.snapshot();
        debug_assert!(snapshot.is_consistent(), "inconsistent progress: {snapshot:?}");
        snapshot
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}
