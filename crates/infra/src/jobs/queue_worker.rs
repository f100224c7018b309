//! Client-side driver of the generation queue.
//!
//! The worker owns no durable state: every tick re-reads the ledger, picks the
//! first eligible item and asks the ledger to generate exactly one unit for it.
//! A page reload, a crash or a second device can start a fresh worker at any
//! time and it resumes from whatever the ledger says.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use prepforge_core::{OwnerId, QueueItemId};
use prepforge_generation::{GenerateOutcome, NewQueueItem, QueueItem};

use super::clock::{Clock, TokioClock};
use super::guard::{lock, ActiveGuard};
use super::retry::{RetryPolicy, UnitFailure};
use super::ledger::{LedgerError, QueueLedger};
use super::progress::{ProgressReporter, ProgressSnapshot};
use super::run_log::{LogLine, RunLog};
use super::types::{QueueRunSummary, StopReason};

/// Queue worker configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueWorkerConfig {
    /// Pause after a unit that did not complete its item
    pub inter_item_delay: Duration,
    /// Failures after which an item is skipped for the rest of the run (min 1)
    pub max_item_errors: u32,
    /// Retry policy for reading the ledger snapshot
    pub snapshot_retry: RetryPolicy,
}

impl Default for QueueWorkerConfig {
    fn default() -> Self {
        Self {
            inter_item_delay: Duration::from_millis(1500),
            max_item_errors: 5,
            snapshot_retry: RetryPolicy::default(),
        }
    }
}

impl QueueWorkerConfig {
    pub fn with_inter_item_delay(mut self, delay: Duration) -> Self {
        self.inter_item_delay = delay;
        self
    }

    pub fn with_max_item_errors(mut self, max: u32) -> Self {
        self.max_item_errors = max;
        self
    }

    pub fn with_snapshot_retry(mut self, policy: RetryPolicy) -> Self {
        self.snapshot_retry = policy;
        self
    }
}

/// Result of a single tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No eligible item is left.
    Drained,
    Generated {
        item_id: QueueItemId,
        produced_count: u32,
        quantity_target: u32,
    },
    /// The item had already met its target; nothing was produced.
    AlreadyCompleted { item_id: QueueItemId },
    Failed {
        item_id: QueueItemId,
        failure: UnitFailure,
        /// The item hit the error cap and is excluded for the rest of the run.
        skipped: bool,
    },
    /// The ledger reports the item as canceled.
    Canceled { item_id: QueueItemId },
    /// The snapshot could not be read, even after retries.
    LedgerUnavailable { failure: UnitFailure },
}

impl TickOutcome {
    /// Whether this tick ends the run.
    pub fn stop_reason(&self) -> Option<StopReason> {
        match self {
            TickOutcome::Drained => Some(StopReason::Drained),
            TickOutcome::Canceled { .. } => Some(StopReason::CanceledExternally),
            TickOutcome::LedgerUnavailable { .. } => Some(StopReason::LedgerUnavailable),
            _ => None,
        }
    }
}

/// Drives the generation queue of one owner, one unit at a time.
///
/// Cloning yields another handle to the same worker.
pub struct QueueWorker<L: QueueLedger, C: Clock = TokioClock> {
    inner: Arc<WorkerInner<L, C>>,
}

impl<L: QueueLedger, C: Clock> Clone for QueueWorker<L, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct WorkerInner<L, C> {
    owner_id: OwnerId,
    ledger: L,
    clock: C,
    config: QueueWorkerConfig,
    active: AtomicBool,
    cancel: Mutex<CancellationToken>,
    run: Mutex<Option<JoinHandle<QueueRunSummary>>>,
    last_summary: Mutex<Option<QueueRunSummary>>,
    item_errors: Mutex<HashMap<QueueItemId, u32>>,
    skipped: Mutex<Vec<QueueItemId>>,
    /// Items known to have met their target during this run.
    completed: Mutex<HashSet<QueueItemId>>,
    progress: ProgressReporter,
    log: RunLog,
}

/// Holds the worker's active flag for the lifetime of a spawned run.
///
/// Created before the task is spawned, so the flag is released even if the
/// task is dropped before its first poll.
struct RunGuard<L, C>(Arc<WorkerInner<L, C>>);

impl<L, C> Drop for RunGuard<L, C> {
    fn drop(&mut self) {
        self.0.active.store(false, Ordering::Release);
    }
}

impl<L: QueueLedger> QueueWorker<L, TokioClock> {
    pub fn new(ledger: L, owner_id: OwnerId, config: QueueWorkerConfig) -> Self {
        Self::with_clock(ledger, owner_id, config, TokioClock)
    }
}

impl<L: QueueLedger, C: Clock> QueueWorker<L, C> {
    pub fn with_clock(ledger: L, owner_id: OwnerId, config: QueueWorkerConfig, clock: C) -> Self {
        Self {
            inner: Arc::new(WorkerInner {
                owner_id,
                ledger,
                clock,
                config,
                active: AtomicBool::new(false),
                cancel: Mutex::new(CancellationToken::new()),
                run: Mutex::new(None),
                last_summary: Mutex::new(None),
                item_errors: Mutex::new(HashMap::new()),
                skipped: Mutex::new(Vec::new()),
                completed: Mutex::new(HashSet::new()),
                progress: ProgressReporter::new(),
                log: RunLog::new("generation-queue"),
            }),
        }
    }

    pub fn owner_id(&self) -> OwnerId {
        self.inner.owner_id
    }

    pub fn ledger(&self) -> &L {
        &self.inner.ledger
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.inner.progress.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.inner.progress.subscribe()
    }

    pub fn subscribe_log(&self) -> broadcast::Receiver<LogLine> {
        self.inner.log.subscribe()
    }

    /// Add generation targets to the ledger. Does not start the loop.
    pub async fn enqueue(&self, items: Vec<NewQueueItem>) -> Result<usize, LedgerError> {
        let inserted = self.inner.ledger.enqueue_items(items).await?;
        self.inner.log.info(format!("enqueued {inserted} item(s)"));
        Ok(inserted)
    }

    /// Start the run loop on the current tokio runtime.
    ///
    /// Returns `false` without doing anything if a loop is already active or
    /// if called outside a tokio runtime.
    pub fn start(&self) -> bool {
        if !ActiveGuard::try_claim(&self.inner.active) {
            debug!(owner_id = %self.inner.owner_id, "queue worker already active");
            return false;
        }
        let guard = RunGuard(Arc::clone(&self.inner));

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(owner_id = %self.inner.owner_id, "no tokio runtime; queue worker not started");
            return false;
        };

        let token = CancellationToken::new();
        *lock(&self.inner.cancel) = token.clone();

        let handle = runtime.spawn(async move {
            let inner = &guard.0;
            let summary = inner.run_loop(token).await;
            *lock(&inner.last_summary) = Some(summary.clone());
            summary
        });
        *lock(&self.inner.run) = Some(handle);
        true
    }

    /// Perform one unit of work without the loop.
    ///
    /// Meant for external drivers; do not interleave with a running loop.
    pub async fn tick(&self) -> TickOutcome {
        self.inner.tick().await
    }

    /// Stop the loop and cancel all outstanding items of this owner.
    ///
    /// A unit already in flight finishes and is counted; no further unit
    /// starts. Returns the number of items the ledger canceled.
    pub async fn cancel(&self) -> Result<usize, LedgerError> {
        lock(&self.inner.cancel).cancel();
        self.inner.log.warn("cancel requested");

        let canceled = self.inner.ledger.cancel_queue(self.inner.owner_id).await?;
        info!(owner_id = %self.inner.owner_id, canceled, "queue canceled");
        Ok(canceled)
    }

    /// Wait for the most recent run to end. `None` if no run was started or
    /// it was already joined.
    pub async fn join(&self) -> Option<QueueRunSummary> {
        let handle = lock(&self.inner.run).take()?;
        match handle.await {
            Ok(summary) => Some(summary),
            Err(err) => {
                warn!(owner_id = %self.inner.owner_id, error = %err, "queue worker task failed");
                None
            }
        }
    }

    /// Summary of the last run that ended, joined or not.
    pub fn last_summary(&self) -> Option<QueueRunSummary> {
        lock(&self.inner.last_summary).clone()
    }
}

impl<L: QueueLedger, C: Clock> WorkerInner<L, C> {
    async fn run_loop(&self, token: CancellationToken) -> QueueRunSummary {
        lock(&self.item_errors).clear();
        lock(&self.skipped).clear();
        lock(&self.completed).clear();
        self.progress.begin(0);
        self.log.info("generation started");

        let stop_reason = loop {
            if token.is_cancelled() {
                break StopReason::Canceled;
            }

            let outcome = self.tick().await;
            if let Some(reason) = outcome.stop_reason() {
                break reason;
            }

            let delay = match &outcome {
                TickOutcome::Generated { item_id, .. } | TickOutcome::AlreadyCompleted { item_id }
                    if lock(&self.completed).contains(item_id) =>
                {
                    Duration::ZERO
                }
                _ => self.config.inter_item_delay,
            };

            if token.is_cancelled() {
                break StopReason::Canceled;
            }
            if !delay.is_zero() {
                let canceled = tokio::select! {
                    _ = token.cancelled() => true,
                    _ = self.clock.sleep(delay) => false,
                };
                if canceled {
                    break StopReason::Canceled;
                }
            }
        };

        let progress = self.progress.finish();
        let summary = QueueRunSummary {
            owner_id: self.owner_id,
            stop_reason,
            progress,
            skipped_items: lock(&self.skipped).clone(),
        };

        match stop_reason {
            StopReason::Drained => self.log.info(summary.to_string()),
            StopReason::LedgerUnavailable => self.log.error(summary.to_string()),
            StopReason::Canceled | StopReason::CanceledExternally => {
                self.log.warn(summary.to_string())
            }
        }
        summary
    }

    async fn tick(&self) -> TickOutcome {
        let snapshot = match self.fetch_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(failure) => {
                self.log.error(format!("could not read the queue: {failure}"));
                return TickOutcome::LedgerUnavailable { failure };
            }
        };

        let (selected, remaining) = self.select(&snapshot);
        self.progress.set_remaining(remaining);

        let Some(item_id) = selected else {
            return TickOutcome::Drained;
        };

        debug!(owner_id = %self.owner_id, item_id = %item_id, remaining, "generating one unit");

        let outcome = match self.ledger.generate_one(item_id).await {
            Ok(outcome) => outcome,
            Err(err) => return self.record_failure(item_id, UnitFailure::from(err)),
        };
        if outcome.completes_item() {
            lock(&self.completed).insert(item_id);
        }

        match outcome {
            GenerateOutcome::Generated {
                produced_count,
                quantity_target,
            } => {
                self.progress.record_success();
                self.log
                    .info(format!("item {item_id}: {produced_count}/{quantity_target} generated"));
                TickOutcome::Generated {
                    item_id,
                    produced_count,
                    quantity_target,
                }
            }
            GenerateOutcome::AlreadyCompleted => {
                debug!(item_id = %item_id, "item already completed");
                TickOutcome::AlreadyCompleted { item_id }
            }
            GenerateOutcome::Canceled => {
                self.log.warn(format!("item {item_id} was canceled"));
                TickOutcome::Canceled { item_id }
            }
            GenerateOutcome::Failed { message } => {
                self.record_failure(item_id, UnitFailure::Rejected(message))
            }
        }
    }

    async fn fetch_snapshot(&self) -> Result<Vec<QueueItem>, UnitFailure> {
        let owner_id = self.owner_id;
        let ledger = &self.ledger;
        self.config
            .snapshot_retry
            .execute(&self.clock, |_| async move {
                ledger
                    .fetch_snapshot(owner_id)
                    .await
                    .map_err(UnitFailure::from)
            })
            .await
            .into_result()
    }

    /// First eligible item in creation order, plus the units still owed by
    /// every item this run may still pick.
    fn select(&self, snapshot: &[QueueItem]) -> (Option<QueueItemId>, usize) {
        let max_errors = self.config.max_item_errors.max(1);
        let errors = lock(&self.item_errors);
        let completed = lock(&self.completed);

        let mut candidates: Vec<&QueueItem> = snapshot
            .iter()
            .filter(|item| item.is_eligible())
            .filter(|item| !completed.contains(&item.id()))
            .filter(|item| errors.get(&item.id()).copied().unwrap_or(0) < max_errors)
            .collect();
        candidates.sort_by_key(|item| item.created_at());

        let remaining = candidates.iter().map(|item| item.remaining() as usize).sum();
        (candidates.first().map(|item| item.id()), remaining)
    }

    fn record_failure(&self, item_id: QueueItemId, failure: UnitFailure) -> TickOutcome {
        self.progress.record_error();

        let max_errors = self.config.max_item_errors.max(1);
        let count = {
            let mut errors = lock(&self.item_errors);
            let count = errors.entry(item_id).or_insert(0);
            *count += 1;
            *count
        };

        self.log.warn(format!("item {item_id} failed: {failure}"));

        let skipped = count >= max_errors;
        if skipped {
            lock(&self.skipped).push(item_id);
            self.log.warn(format!(
                "item {item_id} failed {count} time(s); skipping it for the rest of this run"
            ));
        }

        TickOutcome::Failed {
            item_id,
            failure,
            skipped,
        }
    }
}
