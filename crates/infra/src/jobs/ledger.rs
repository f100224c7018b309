//! Generation ledger boundary and an in-memory implementation.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::debug;

use prepforge_ai::{GeneratedQuestion, QuestionGenerator};
use prepforge_core::{DomainError, OwnerId, QueueItemId};
use prepforge_generation::{GenerateOutcome, NewQueueItem, QueueItem, QueueStatus};

use super::retry::UnitFailure;

/// Durable, server-resident ledger of generation work.
///
/// Every method is one stateless call. An `Err` means the call itself failed
/// (transport, storage); business outcomes travel inside `Ok`.
#[async_trait]
pub trait QueueLedger: Send + Sync + 'static {
    /// Bulk-create queue items. Returns the number inserted.
    async fn enqueue_items(&self, items: Vec<NewQueueItem>) -> Result<usize, LedgerError>;

    /// Current state of every item of `owner_id`, in creation order.
    async fn fetch_snapshot(&self, owner_id: OwnerId) -> Result<Vec<QueueItem>, LedgerError>;

    /// Cancel every pending or processing item of `owner_id`.
    /// Returns the number of items canceled.
    async fn cancel_queue(&self, owner_id: OwnerId) -> Result<usize, LedgerError>;

    /// Perform exactly one unit of generation for `item_id`.
    async fn generate_one(&self, item_id: QueueItemId) -> Result<GenerateOutcome, LedgerError>;
}

/// Ledger call error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("queue item not found: {0}")]
    NotFound(QueueItemId),
    #[error("invalid queue item: {0}")]
    Invalid(#[from] DomainError),
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<LedgerError> for UnitFailure {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Unavailable(_) | LedgerError::Storage(_) => {
                UnitFailure::Transport(err.to_string())
            }
            LedgerError::NotFound(_) | LedgerError::Invalid(_) => {
                UnitFailure::Rejected(err.to_string())
            }
        }
    }
}

/// Per-owner ledger statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub canceled: usize,
    pub produced: u64,
    pub errors: u64,
}

/// In-memory ledger for tests/dev.
///
/// Generation is delegated to a [`QuestionGenerator`]; the lock is never held
/// while the generator runs.
#[derive(Debug)]
pub struct InMemoryQueueLedger<G> {
    generator: G,
    items: RwLock<Vec<QueueItem>>,
    artifacts: RwLock<Vec<(QueueItemId, GeneratedQuestion)>>,
}

impl<G: QuestionGenerator> InMemoryQueueLedger<G> {
    pub fn new(generator: G) -> Self {
        Self {
            generator,
            items: RwLock::new(Vec::new()),
            artifacts: RwLock::new(Vec::new()),
        }
    }

    pub fn arc(generator: G) -> Arc<Self> {
        Arc::new(Self::new(generator))
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn get(&self, item_id: QueueItemId) -> Result<Option<QueueItem>, LedgerError> {
        let items = self.read_items()?;
        Ok(items.iter().find(|i| i.id() == item_id).cloned())
    }

    /// Artifacts generated so far for `item_id`, oldest first.
    pub fn artifacts(&self, item_id: QueueItemId) -> Result<Vec<GeneratedQuestion>, LedgerError> {
        let artifacts = self
            .artifacts
            .read()
            .map_err(|_| LedgerError::Storage("artifact lock poisoned".to_string()))?;
        Ok(artifacts
            .iter()
            .filter(|(id, _)| *id == item_id)
            .map(|(_, q)| q.clone())
            .collect())
    }

    pub fn stats(&self, owner_id: OwnerId) -> Result<LedgerStats, LedgerError> {
        let items = self.read_items()?;
        let mut stats = LedgerStats::default();

        for item in items.iter().filter(|i| i.owner_id() == owner_id) {
            match item.status() {
                QueueStatus::Pending => stats.pending += 1,
                QueueStatus::Processing => stats.processing += 1,
                QueueStatus::Completed => stats.completed += 1,
                QueueStatus::Canceled => stats.canceled += 1,
            }
            stats.produced += u64::from(item.produced_count());
            stats.errors += u64::from(item.error_count());
        }

        Ok(stats)
    }

    fn read_items(&self) -> Result<RwLockReadGuard<'_, Vec<QueueItem>>, LedgerError> {
        self.items
            .read()
            .map_err(|_| LedgerError::Storage("ledger lock poisoned".to_string()))
    }

    fn write_items(&self) -> Result<RwLockWriteGuard<'_, Vec<QueueItem>>, LedgerError> {
        self.items
            .write()
            .map_err(|_| LedgerError::Storage("ledger lock poisoned".to_string()))
    }
}

#[async_trait]
impl<G: QuestionGenerator> QueueLedger for InMemoryQueueLedger<G> {
    async fn enqueue_items(&self, items: Vec<NewQueueItem>) -> Result<usize, LedgerError> {
        let now = Utc::now();
        // All-or-nothing: validate the whole batch before inserting.
        let created = items
            .into_iter()
            .map(|request| QueueItem::create(request, now))
            .collect::<Result<Vec<_>, _>>()?;

        let inserted = created.len();
        self.write_items()?.extend(created);
        Ok(inserted)
    }

    async fn fetch_snapshot(&self, owner_id: OwnerId) -> Result<Vec<QueueItem>, LedgerError> {
        let items = self.read_items()?;
        let mut snapshot: Vec<_> = items
            .iter()
            .filter(|i| i.owner_id() == owner_id)
            .cloned()
            .collect();

        // Stable sort keeps insertion order for items created in the same instant.
        snapshot.sort_by_key(|i| i.created_at());
        Ok(snapshot)
    }

    async fn cancel_queue(&self, owner_id: OwnerId) -> Result<usize, LedgerError> {
        let mut items = self.write_items()?;
        let canceled = items
            .iter_mut()
            .filter(|i| i.owner_id() == owner_id)
            .map(|i| i.cancel())
            .filter(|changed| *changed)
            .count();
        Ok(canceled)
    }

    async fn generate_one(&self, item_id: QueueItemId) -> Result<GenerateOutcome, LedgerError> {
        let target_spec = {
            let mut items = self.write_items()?;
            let item = items
                .iter_mut()
                .find(|i| i.id() == item_id)
                .ok_or(LedgerError::NotFound(item_id))?;

            if item.status() == QueueStatus::Canceled {
                return Ok(GenerateOutcome::Canceled);
            }
            if item.status() == QueueStatus::Completed || item.is_target_met() {
                item.mark_completed();
                return Ok(GenerateOutcome::AlreadyCompleted);
            }

            item.mark_processing();
            item.target_spec().clone()
        };

        let generated = self.generator.generate(&target_spec).await;

        let mut items = self.write_items()?;
        let item = items
            .iter_mut()
            .find(|i| i.id() == item_id)
            .ok_or(LedgerError::NotFound(item_id))?;

        match generated {
            Ok(question) => {
                // Another driver may have met the target while we were generating.
                let Ok(produced_count) = item.record_produced() else {
                    return Ok(GenerateOutcome::AlreadyCompleted);
                };
                let quantity_target = item.quantity_target();
                drop(items);

                self.artifacts
                    .write()
                    .map_err(|_| LedgerError::Storage("artifact lock poisoned".to_string()))?
                    .push((item_id, question));

                debug!(item_id = %item_id, produced_count, quantity_target, "question generated");
                Ok(GenerateOutcome::Generated {
                    produced_count,
                    quantity_target,
                })
            }
            Err(err) => {
                item.record_error();
                debug!(item_id = %item_id, error = %err, "question generation failed");
                Ok(GenerateOutcome::Failed {
                    message: err.to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl<T: QueueLedger + ?Sized> QueueLedger for Arc<T> {
    async fn enqueue_items(&self, items: Vec<NewQueueItem>) -> Result<usize, LedgerError> {
        (**self).enqueue_items(items).await
    }

    async fn fetch_snapshot(&self, owner_id: OwnerId) -> Result<Vec<QueueItem>, LedgerError> {
        (**self).fetch_snapshot(owner_id).await
    }

    async fn cancel_queue(&self, owner_id: OwnerId) -> Result<usize, LedgerError> {
        (**self).cancel_queue(owner_id).await
    }

    async fn generate_one(&self, item_id: QueueItemId) -> Result<GenerateOutcome, LedgerError> {
        (**self).generate_one(item_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::test_support::TestGenerator;
    use prepforge_ai::AiError;
    use serde_json::json;

    fn request(owner_id: OwnerId, topic: &str, quantity: u32) -> NewQueueItem {
        NewQueueItem::new(owner_id, json!({ "topic": topic }), quantity)
    }

    #[tokio::test]
    async fn enqueue_and_snapshot_in_creation_order() {
        let ledger = InMemoryQueueLedger::new(TestGenerator::succeeding());
        let owner = OwnerId::new();

        let inserted = ledger
            .enqueue_items(vec![request(owner, "a", 2), request(owner, "b", 1)])
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let snapshot = ledger.fetch_snapshot(owner).await.unwrap();
        let topics: Vec<_> = snapshot.iter().map(|i| i.target_spec()["topic"].clone()).collect();
        assert_eq!(topics, vec![json!("a"), json!("b")]);
        assert!(snapshot.iter().all(|i| i.status() == QueueStatus::Pending));
    }

    #[tokio::test]
    async fn invalid_batch_inserts_nothing() {
        let ledger = InMemoryQueueLedger::new(TestGenerator::succeeding());
        let owner = OwnerId::new();

        let err = ledger
            .enqueue_items(vec![request(owner, "a", 2), request(owner, "b", 0)])
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::Invalid(DomainError::Validation(_))));
        assert!(ledger.fetch_snapshot(owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn owners_are_isolated() {
        let ledger = InMemoryQueueLedger::new(TestGenerator::succeeding());
        let owner1 = OwnerId::new();
        let owner2 = OwnerId::new();

        ledger.enqueue_items(vec![request(owner1, "a", 1)]).await.unwrap();

        assert!(ledger.fetch_snapshot(owner2).await.unwrap().is_empty());
        assert_eq!(ledger.cancel_queue(owner2).await.unwrap(), 0);
        assert_eq!(ledger.fetch_snapshot(owner1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn generate_one_counts_until_target_then_reports_completed() {
        let ledger = InMemoryQueueLedger::new(TestGenerator::succeeding());
        let owner = OwnerId::new();
        ledger.enqueue_items(vec![request(owner, "a", 2)]).await.unwrap();
        let item_id = ledger.fetch_snapshot(owner).await.unwrap()[0].id();

        assert_eq!(
            ledger.generate_one(item_id).await.unwrap(),
            GenerateOutcome::Generated {
                produced_count: 1,
                quantity_target: 2
            }
        );
        assert_eq!(
            ledger.get(item_id).unwrap().unwrap().status(),
            QueueStatus::Processing
        );
        assert_eq!(
            ledger.generate_one(item_id).await.unwrap(),
            GenerateOutcome::Generated {
                produced_count: 2,
                quantity_target: 2
            }
        );
        assert_eq!(
            ledger.generate_one(item_id).await.unwrap(),
            GenerateOutcome::AlreadyCompleted
        );

        let item = ledger.get(item_id).unwrap().unwrap();
        assert_eq!(item.status(), QueueStatus::Completed);
        assert_eq!(item.produced_count(), 2);
        assert_eq!(ledger.artifacts(item_id).unwrap().len(), 2);
        assert_eq!(ledger.generator().call_count(), 2);
    }

    #[tokio::test]
    async fn generator_failure_is_counted_on_the_item() {
        let ledger = InMemoryQueueLedger::new(TestGenerator::new(|_, _| {
            Err(AiError::Rejected("content policy".into()))
        }));
        let owner = OwnerId::new();
        ledger.enqueue_items(vec![request(owner, "a", 1)]).await.unwrap();
        let item_id = ledger.fetch_snapshot(owner).await.unwrap()[0].id();

        let outcome = ledger.generate_one(item_id).await.unwrap();

        assert!(outcome.is_failure());
        let item = ledger.get(item_id).unwrap().unwrap();
        assert_eq!(item.error_count(), 1);
        assert_eq!(item.produced_count(), 0);
    }

    #[tokio::test]
    async fn canceled_items_report_canceled_and_never_resume() {
        let ledger = InMemoryQueueLedger::new(TestGenerator::succeeding());
        let owner = OwnerId::new();
        ledger
            .enqueue_items(vec![request(owner, "a", 3), request(owner, "b", 3)])
            .await
            .unwrap();
        let snapshot = ledger.fetch_snapshot(owner).await.unwrap();

        assert_eq!(ledger.cancel_queue(owner).await.unwrap(), 2);
        assert_eq!(
            ledger.generate_one(snapshot[0].id()).await.unwrap(),
            GenerateOutcome::Canceled
        );
        assert_eq!(ledger.generator().call_count(), 0);

        let after = ledger.fetch_snapshot(owner).await.unwrap();
        assert!(after.iter().all(|i| !i.is_eligible()));
        assert_eq!(ledger.stats(owner).unwrap().canceled, 2);
    }

    #[tokio::test]
    async fn unknown_item_is_not_found() {
        let ledger = InMemoryQueueLedger::new(TestGenerator::succeeding());
        let missing = QueueItemId::new();

        assert_eq!(
            ledger.generate_one(missing).await.unwrap_err(),
            LedgerError::NotFound(missing)
        );
    }

    #[test]
    fn ledger_errors_map_to_failure_kinds() {
        assert!(matches!(
            UnitFailure::from(LedgerError::Unavailable("503".into())),
            UnitFailure::Transport(_)
        ));
        assert!(matches!(
            UnitFailure::from(LedgerError::NotFound(QueueItemId::new())),
            UnitFailure::Rejected(_)
        ));
    }
}
