//! Scriptable collaborators shared by the engine's unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tokio::sync::{Notify, Semaphore};

use prepforge_ai::{
    AiError, AnalysisResponse, ApplyReport, GeneratedQuestion, QuestionGenerator, RecordAnalyzer,
    Suggestion, SuggestionApplier,
};
use prepforge_core::{OwnerId, QueueItemId, RecordId, SuggestionId};
use prepforge_generation::{GenerateOutcome, NewQueueItem, QueueItem};

use super::ledger::{LedgerError, QueueLedger};

/// Holds one call open until the test releases it.
#[derive(Debug)]
pub struct Gate {
    entered: Notify,
    release: Semaphore,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Notify::new(),
            release: Semaphore::new(0),
        })
    }

    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.add_permits(1);
    }

    async fn pass(&self) {
        self.entered.notify_one();
        if let Ok(permit) = self.release.acquire().await {
            permit.forget();
        }
    }
}

type GenerateFn = dyn Fn(&JsonValue, usize) -> Result<GeneratedQuestion, AiError> + Send + Sync;

/// Question generator driven by a closure of `(target_spec, call_number)`.
pub struct TestGenerator {
    behavior: Box<GenerateFn>,
    calls: Mutex<Vec<JsonValue>>,
    gate: Option<(usize, Arc<Gate>)>,
}

impl TestGenerator {
    pub fn new<F>(behavior: F) -> Self
    where
        F: Fn(&JsonValue, usize) -> Result<GeneratedQuestion, AiError> + Send + Sync + 'static,
    {
        Self {
            behavior: Box::new(behavior),
            calls: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    pub fn succeeding() -> Self {
        Self::new(|spec, call| Ok(GeneratedQuestion::new(json!({ "spec": spec, "n": call }))))
    }

    /// Block call number `call` (1-indexed) on `gate`.
    pub fn gated_on(mut self, call: usize, gate: Arc<Gate>) -> Self {
        self.gate = Some((call, gate));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    pub fn calls(&self) -> Vec<JsonValue> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl QuestionGenerator for TestGenerator {
    async fn generate(&self, target_spec: &JsonValue) -> Result<GeneratedQuestion, AiError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(target_spec.clone());
            calls.len()
        };
        if let Some((gated_call, gate)) = &self.gate {
            if *gated_call == call {
                gate.pass().await;
            }
        }
        (self.behavior)(target_spec, call)
    }
}

type AnalyzeFn = dyn Fn(&JsonValue, u32) -> Result<AnalysisResponse, AiError> + Send + Sync;

/// Record analyzer driven by a closure of `(payload, attempt_for_that_record)`.
pub struct TestAnalyzer {
    behavior: Box<AnalyzeFn>,
    attempts: Mutex<HashMap<RecordId, u32>>,
    calls: Mutex<Vec<RecordId>>,
    gate: Option<(usize, Arc<Gate>)>,
}

impl TestAnalyzer {
    pub fn new<F>(behavior: F) -> Self
    where
        F: Fn(&JsonValue, u32) -> Result<AnalysisResponse, AiError> + Send + Sync + 'static,
    {
        Self {
            behavior: Box::new(behavior),
            attempts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            gate: None,
        }
    }

    pub fn gated_on(mut self, call: usize, gate: Arc<Gate>) -> Self {
        self.gate = Some((call, gate));
        self
    }

    pub fn calls(&self) -> Vec<RecordId> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, record_id: RecordId) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(&record_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl RecordAnalyzer for TestAnalyzer {
    async fn analyze(
        &self,
        record_id: RecordId,
        payload: &JsonValue,
    ) -> Result<AnalysisResponse, AiError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let attempt = attempts.entry(record_id).or_insert(0);
            *attempt += 1;
            *attempt
        };
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(record_id);
            calls.len()
        };
        if let Some((gated_call, gate)) = &self.gate {
            if *gated_call == call {
                gate.pass().await;
            }
        }
        (self.behavior)(payload, attempt)
    }
}

/// Applier that accepts everything unless told to fail.
#[derive(Default)]
pub struct TestApplier {
    fail_with: Option<AiError>,
    rejected: Vec<SuggestionId>,
    unattributed_errors: usize,
    applied: Mutex<Vec<SuggestionId>>,
}

impl TestApplier {
    pub fn failing(err: AiError) -> Self {
        Self {
            fail_with: Some(err),
            ..Self::default()
        }
    }

    /// Reports the given suggestions as failed and applies the rest.
    pub fn rejecting(ids: Vec<SuggestionId>) -> Self {
        Self {
            rejected: ids,
            ..Self::default()
        }
    }

    /// Reports `count` errors without naming the suggestions.
    pub fn with_unattributed_errors(count: usize) -> Self {
        Self {
            unattributed_errors: count,
            ..Self::default()
        }
    }

    pub fn applied(&self) -> Vec<SuggestionId> {
        self.applied.lock().unwrap().clone()
    }
}

#[async_trait]
impl SuggestionApplier for TestApplier {
    async fn apply(&self, selected: &[Suggestion]) -> Result<ApplyReport, AiError> {
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        let (failed, applied): (Vec<_>, Vec<_>) = selected
            .iter()
            .map(|s| s.id)
            .partition(|id| self.rejected.contains(id));
        self.applied.lock().unwrap().extend(applied.iter().copied());
        let error_count = failed.len() + self.unattributed_errors;
        Ok(ApplyReport {
            success_count: selected.len().saturating_sub(error_count),
            error_count,
            failed,
        })
    }
}

/// Ledger with a fixed snapshot and scripted generate-one outcomes.
///
/// Once the script runs out every generate-one call reports `Canceled`.
#[derive(Default)]
pub struct StubLedger {
    snapshot: Mutex<Vec<QueueItem>>,
    outcomes: Mutex<VecDeque<Result<GenerateOutcome, LedgerError>>>,
    fetch_failures: AtomicU32,
    fetch_calls: AtomicU32,
    generate_calls: AtomicU32,
}

impl StubLedger {
    pub fn with_items(owner_id: OwnerId, quantities: &[u32]) -> Self {
        let items = quantities
            .iter()
            .enumerate()
            .map(|(n, quantity)| {
                QueueItem::create(
                    NewQueueItem::new(owner_id, json!({ "n": n }), *quantity),
                    chrono::Utc::now(),
                )
                .unwrap()
            })
            .collect();
        Self {
            snapshot: Mutex::new(items),
            ..Self::default()
        }
    }

    pub fn script(self, outcomes: Vec<Result<GenerateOutcome, LedgerError>>) -> Self {
        *self.outcomes.lock().unwrap() = outcomes.into();
        self
    }

    pub fn failing_fetches(self, failures: u32) -> Self {
        self.fetch_failures.store(failures, Ordering::SeqCst);
        self
    }

    pub fn fetch_calls(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    pub fn generate_calls(&self) -> u32 {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueLedger for StubLedger {
    async fn enqueue_items(&self, items: Vec<NewQueueItem>) -> Result<usize, LedgerError> {
        Ok(items.len())
    }

    async fn fetch_snapshot(&self, _owner_id: OwnerId) -> Result<Vec<QueueItem>, LedgerError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .fetch_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(LedgerError::Unavailable("connection refused".into()));
        }
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn cancel_queue(&self, _owner_id: OwnerId) -> Result<usize, LedgerError> {
        Ok(0)
    }

    async fn generate_one(&self, _item_id: QueueItemId) -> Result<GenerateOutcome, LedgerError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(GenerateOutcome::Canceled))
    }
}
