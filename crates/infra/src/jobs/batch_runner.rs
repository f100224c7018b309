//! In-memory batch analysis with per-record retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use prepforge_ai::{RecordAnalyzer, Suggestion};
use prepforge_core::RecordId;

use crate::ai::ReviewStaging;

use super::clock::{Clock, TokioClock};
use super::guard::{lock, ActiveGuard};
use super::progress::{ProgressReporter, ProgressSnapshot};
use super::retry::{RetryOutcome, RetryPolicy, UnitFailure};
use super::run_log::{LogLine, RunLog};
use super::types::{BatchSummary, EngineError, StopReason};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    Pending,
    Success { suggestions: usize },
    Error { message: String },
}

/// One record of a batch run. Lives only as long as the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRecord {
    pub id: RecordId,
    pub payload: JsonValue,
    pub attempt_count: u32,
    pub outcome: RecordOutcome,
}

impl BatchRecord {
    pub fn new(id: RecordId, payload: JsonValue) -> Self {
        Self {
            id,
            payload,
            attempt_count: 0,
            outcome: RecordOutcome::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchRunnerConfig {
    /// Pause between two records (not after the last one)
    pub inter_record_delay: Duration,
    /// Retry policy for each record's analysis call
    pub retry: RetryPolicy,
}

impl Default for BatchRunnerConfig {
    fn default() -> Self {
        Self {
            inter_record_delay: Duration::from_millis(2000),
            retry: RetryPolicy::default(),
        }
    }
}

impl BatchRunnerConfig {
    pub fn with_inter_record_delay(mut self, delay: Duration) -> Self {
        self.inter_record_delay = delay;
        self
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }
}

/// Runs one category of batch analysis (e.g. "audit", "difficulty").
///
/// Only one run per runner may be active. Suggestions from successful records
/// land in the runner's [`ReviewStaging`].
pub struct BatchRunner<A: RecordAnalyzer, C: Clock = TokioClock> {
    inner: Arc<RunnerInner<A, C>>,
}

impl<A: RecordAnalyzer, C: Clock> Clone for BatchRunner<A, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct RunnerInner<A, C> {
    category: String,
    analyzer: A,
    clock: C,
    config: BatchRunnerConfig,
    active: AtomicBool,
    cancel: Mutex<CancellationToken>,
    staging: Arc<ReviewStaging>,
    progress: ProgressReporter,
    log: RunLog,
}

impl<A: RecordAnalyzer> BatchRunner<A, TokioClock> {
    pub fn new(category: impl Into<String>, analyzer: A, config: BatchRunnerConfig) -> Self {
        Self::with_clock(category, analyzer, config, TokioClock)
    }
}

impl<A: RecordAnalyzer, C: Clock> BatchRunner<A, C> {
    pub fn with_clock(
        category: impl Into<String>,
        analyzer: A,
        config: BatchRunnerConfig,
        clock: C,
    ) -> Self {
        let category = category.into();
        Self {
            inner: Arc::new(RunnerInner {
                log: RunLog::new(format!("batch:{category}")),
                category,
                analyzer,
                clock,
                config,
                active: AtomicBool::new(false),
                cancel: Mutex::new(CancellationToken::new()),
                staging: Arc::new(ReviewStaging::new()),
                progress: ProgressReporter::new(),
            }),
        }
    }

    pub fn category(&self) -> &str {
        &self.inner.category
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

    pub fn staging(&self) -> Arc<ReviewStaging> {
        Arc::clone(&self.inner.staging)
    }

    /// Ask the active run to stop after the record in flight.
    pub fn cancel(&self) {
        lock(&self.inner.cancel).cancel();
        if self.is_active() {
            self.inner.log.warn("cancel requested");
        }
    }

    /// Analyze `records` in order, one at a time.
    ///
    /// Staged suggestions of a previous run are discarded when a new run starts.
    pub async fn run(&self, records: Vec<BatchRecord>) -> Result<BatchSummary, EngineError> {
        let inner = &self.inner;
        let Some(_active) = ActiveGuard::acquire(&inner.active) else {
            warn!(category = %inner.category, "batch run rejected: already active");
            return Err(EngineError::AlreadyActive {
                job: format!("{} batch", inner.category),
            });
        };

        let token = CancellationToken::new();
        *lock(&inner.cancel) = token.clone();
        Ok(inner.run(records, token).await)
    }
}

impl<A: RecordAnalyzer, C: Clock> RunnerInner<A, C> {
    async fn run(&self, mut records: Vec<BatchRecord>, token: CancellationToken) -> BatchSummary {
        for record in &mut records {
            record.attempt_count = 0;
            record.outcome = RecordOutcome::Pending;
        }
        self.staging.clear();

        let total = records.len();
        self.progress.begin(total);
        self.log
            .info(format!("{} batch started: {total} record(s)", self.category));

        let mut staged = 0;
        let mut stop_reason = StopReason::Drained;

        for index in 0..total {
            if token.is_cancelled() {
                stop_reason = StopReason::Canceled;
                break;
            }

            staged += self.process(&mut records[index]).await;

            let is_last = index + 1 == total;
            if !is_last {
                let canceled = tokio::select! {
                    biased;
                    _ = token.cancelled() => true,
                    _ = self.clock.sleep(self.config.inter_record_delay) => false,
                };
                if canceled {
                    stop_reason = StopReason::Canceled;
                    break;
                }
            }
        }

        let summary = BatchSummary {
            category: self.category.clone(),
            stop_reason,
            progress: self.progress.finish(),
            staged_suggestions: staged,
            records,
        };
        match stop_reason {
            StopReason::Drained => self.log.info(summary.to_string()),
            _ => self.log.warn(summary.to_string()),
        }
        summary
    }

    /// Run one record through the retry policy. Returns the number of
    /// suggestions staged.
    async fn process(&self, record: &mut BatchRecord) -> usize {
        let record_id = record.id;
        let payload = &record.payload;
        let analyzer = &self.analyzer;

        let outcome = self
            .config
            .retry
            .execute(&self.clock, |attempt| {
                debug!(category = %self.category, record_id = %record_id, attempt, "analyzing record");
                async move {
                    analyzer
                        .analyze(record_id, payload)
                        .await
                        .map_err(UnitFailure::from)
                }
            })
            .await;
        record.attempt_count = outcome.attempts();

        match outcome {
            RetryOutcome::Succeeded { value, .. } => {
                let suggestions: Vec<Suggestion> = value
                    .suggestions
                    .into_iter()
                    .map(|proposal| Suggestion::from_proposal(record_id, proposal))
                    .collect();
                let count = suggestions.len();
                self.staging.extend(suggestions);

                record.outcome = RecordOutcome::Success { suggestions: count };
                let progress = self.progress.record_success();
                self.log.info(format!(
                    "record {}/{} ({record_id}): {count} suggestion(s)",
                    progress.current, progress.total
                ));
                count
            }
            RetryOutcome::Exhausted {
                attempts,
                last_failure,
            } => {
                let message = last_failure.message().to_string();
                record.outcome = RecordOutcome::Error {
                    message: message.clone(),
                };
                let progress = self.progress.record_error();
                self.log.error(format!(
                    "record {}/{} ({record_id}) failed after {attempts} attempt(s): {message}",
                    progress.current, progress.total
                ));
                0
            }
        }
    }
}
