//! Question generation ledger model.
//!
//! Durable queue items and the outcomes reported by a single generate-one
//! call, implemented as deterministic domain logic (no IO, no async).

pub mod item;
pub mod outcome;

pub use item::{NewQueueItem, QueueItem, QueueStatus};
pub use outcome::GenerateOutcome;
