//! Shared engine types: errors and end-of-run summaries.

use std::fmt;

use serde::{Deserialize, Serialize};

use prepforge_core::{OwnerId, QueueItemId};

use super::batch_runner::BatchRecord;
use super::ledger::LedgerError;
use super::progress::ProgressSnapshot;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// A run of this job is already in progress; only one may be active.
    #[error("{job} is already running")]
    AlreadyActive { job: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Nothing left to do.
    Drained,
    /// The local cancel signal was observed.
    Canceled,
    /// The ledger reported the work as canceled (another client, another tab).
    CanceledExternally,
    /// The ledger could not be read, even after retries.
    LedgerUnavailable,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Drained => "completed",
            StopReason::Canceled => "canceled",
            StopReason::CanceledExternally => "canceled externally",
            StopReason::LedgerUnavailable => "stopped: ledger unavailable",
        }
    }
}

/// End-of-run summary of a queue worker run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRunSummary {
    pub owner_id: OwnerId,
    pub stop_reason: StopReason,
    pub progress: ProgressSnapshot,
    /// Items excluded from this run after hitting the per-item error cap.
    pub skipped_items: Vec<QueueItemId>,
}

impl fmt::Display for QueueRunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "generation queue {}: {} generated, {} failed",
            self.stop_reason.as_str(),
            self.progress.successes,
            self.progress.errors
        )?;
        if !self.skipped_items.is_empty() {
            write!(f, ", {} item(s) skipped", self.skipped_items.len())?;
        }
        Ok(())
    }
}

/// End-of-run summary of a batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub category: String,
    pub stop_reason: StopReason,
    pub progress: ProgressSnapshot,
    /// Suggestions staged for review by this run.
    pub staged_suggestions: usize,
    /// Every record of the run with its final outcome; records never reached
    /// stay pending.
    pub records: Vec<BatchRecord>,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} batch {}: {}/{} records, {} succeeded, {} failed, {} suggestion(s) staged",
            self.category,
            self.stop_reason.as_str(),
            self.progress.current,
            self.progress.total,
            self.progress.successes,
            self.progress.errors,
            self.staged_suggestions
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summaries_render_as_completion_messages() {
        let summary = BatchSummary {
            category: "audit".to_string(),
            stop_reason: StopReason::Drained,
            progress: ProgressSnapshot {
                total: 4,
                current: 4,
                successes: 3,
                errors: 1,
                active: false,
            },
            staged_suggestions: 2,
            records: Vec::new(),
        };

        assert_eq!(
            summary.to_string(),
            "audit batch completed: 4/4 records, 3 succeeded, 1 failed, 2 suggestion(s) staged"
        );
    }

    #[test]
    fn stop_reason_serializes_snake_case() {
        let json = serde_json::to_string(&StopReason::CanceledExternally).unwrap();
        assert_eq!(json, "\"canceled_externally\"");
    }
}
