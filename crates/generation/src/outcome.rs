use serde::{Deserialize, Serialize};

/// Result of a single generate-one call, as reported by the ledger.
///
/// `Failed` is an application-level failure: the ledger received the call and
/// has already counted the error on the durable item. Transport failures of the
/// call itself are not represented here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GenerateOutcome {
    /// One artifact was generated and counted.
    Generated {
        produced_count: u32,
        quantity_target: u32,
    },
    /// The target was already met (e.g. another tab finished the item).
    AlreadyCompleted,
    /// The job was canceled externally.
    Canceled,
    /// The generation call was rejected or failed upstream.
    Failed { message: String },
}

impl GenerateOutcome {
    /// The item needs no further work after this outcome.
    pub fn completes_item(&self) -> bool {
        match self {
            GenerateOutcome::Generated {
                produced_count,
                quantity_target,
            } => produced_count >= quantity_target,
            GenerateOutcome::AlreadyCompleted => true,
            GenerateOutcome::Canceled | GenerateOutcome::Failed { .. } => false,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, GenerateOutcome::Failed { .. })
    }
}
