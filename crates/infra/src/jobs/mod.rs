//! Sequential processing engine: resilient runs over AI-backed units of work.
//!
//! ## Design
//!
//! - One unit of work in flight per job; the next is issued only after the
//!   previous one resolved
//! - Failures are absorbed at the unit boundary and become counters + log lines
//! - Cooperative cancellation, checked between units and during pauses
//! - At most one active run per job (per owner queue, per batch category)
//!
//! ## Components
//!
//! - `RetryPolicy`: bounded retry with backoff for a single unit of work
//! - `ProgressReporter`: the only mutable counters of a run
//! - `RunLog`: user-facing log lines, mirrored to tracing
//! - `QueueLedger`: durable generation ledger boundary (+ in-memory ledger)
//! - `QueueWorker`: drives a ledger queue to completion, resumable
//! - `BatchRunner`: drives an in-memory record list into review staging

pub mod batch_runner;
pub mod clock;
pub(crate) mod guard;
pub mod ledger;
pub mod progress;
pub mod queue_worker;
pub mod retry;
pub mod run_log;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use batch_runner::{BatchRecord, BatchRunner, BatchRunnerConfig, RecordOutcome};
pub use clock::{Clock, TokioClock};
#[cfg(any(test, feature = "test-util"))]
pub use clock::RecordingClock;
pub use ledger::{InMemoryQueueLedger, LedgerError, LedgerStats, QueueLedger};
pub use progress::{ProgressReporter, ProgressSnapshot};
pub use queue_worker::{QueueWorker, QueueWorkerConfig, TickOutcome};
pub use retry::{BackoffStrategy, RetryOutcome, RetryPolicy, UnitFailure};
pub use run_log::{LogLevel, LogLine, RunLog};
pub use types::{BatchSummary, EngineError, QueueRunSummary, StopReason};
