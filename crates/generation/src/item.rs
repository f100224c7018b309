use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use prepforge_core::{DomainError, DomainResult, OwnerId, QueueItemId};

/// Lifecycle status of a durable queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Enqueued, nothing generated yet
    Pending,
    /// At least one generate-one call has been issued
    Processing,
    /// Quantity target reached
    Completed,
    /// Canceled by the owner; never resumed
    Canceled,
}

impl QueueStatus {
    /// Pending and processing items are still candidates for work.
    pub fn is_active(&self) -> bool {
        matches!(self, QueueStatus::Pending | QueueStatus::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Canceled => "canceled",
        }
    }
}

/// Request to put one generation target on the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewQueueItem {
    pub owner_id: OwnerId,
    /// Opaque generation parameters (subject, topic, difficulty, ...).
    pub target_spec: JsonValue,
    pub quantity_target: u32,
}

impl NewQueueItem {
    pub fn new(owner_id: OwnerId, target_spec: JsonValue, quantity_target: u32) -> Self {
        Self {
            owner_id,
            target_spec,
            quantity_target,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.quantity_target == 0 {
            return Err(DomainError::validation("quantity_target must be greater than zero"));
        }
        Ok(())
    }
}

/// A durable unit of requested generation work.
///
/// Invariants:
/// - `0 <= produced_count <= quantity_target`
/// - `produced_count` never decreases
/// - `quantity_target > 0`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    id: QueueItemId,
    owner_id: OwnerId,
    status: QueueStatus,
    target_spec: JsonValue,
    quantity_target: u32,
    produced_count: u32,
    error_count: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl QueueItem {
    /// Create a pending item from an enqueue request.
    pub fn create(request: NewQueueItem, created_at: DateTime<Utc>) -> DomainResult<Self> {
        request.validate()?;
        Ok(Self {
            id: QueueItemId::new(),
            owner_id: request.owner_id,
            status: QueueStatus::Pending,
            target_spec: request.target_spec,
            quantity_target: request.quantity_target,
            produced_count: 0,
            error_count: 0,
            created_at,
            updated_at: created_at,
        })
    }

    pub fn id(&self) -> QueueItemId {
        self.id
    }

    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    pub fn status(&self) -> QueueStatus {
        self.status
    }

    pub fn target_spec(&self) -> &JsonValue {
        &self.target_spec
    }

    pub fn quantity_target(&self) -> u32 {
        self.quantity_target
    }

    pub fn produced_count(&self) -> u32 {
        self.produced_count
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_target_met(&self) -> bool {
        self.produced_count >= self.quantity_target
    }

    /// Whether a worker may pick this item for the next unit of work.
    pub fn is_eligible(&self) -> bool {
        self.status.is_active() && !self.is_target_met()
    }

    /// Units still owed; zero for completed or canceled items.
    pub fn remaining(&self) -> u32 {
        if self.status.is_active() {
            self.quantity_target.saturating_sub(self.produced_count)
        } else {
            0
        }
    }

    /// Note that a generate-one call has been issued for this item.
    pub fn mark_processing(&mut self) {
        if self.status == QueueStatus::Pending {
            self.status = QueueStatus::Processing;
            self.touch();
        }
    }

    /// Count one generated artifact.
    ///
    /// Reaching the target completes an active item. A canceled item still
    /// counts an artifact whose generation was already in flight, but stays
    /// canceled.
    pub fn record_produced(&mut self) -> DomainResult<u32> {
        if self.is_target_met() {
            return Err(DomainError::invariant("quantity target already met"));
        }
        self.produced_count += 1;
        if self.is_target_met() && self.status.is_active() {
            self.status = QueueStatus::Completed;
        }
        self.touch();
        Ok(self.produced_count)
    }

    pub fn record_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
        self.touch();
    }

    pub fn mark_completed(&mut self) {
        if self.status.is_active() {
            self.status = QueueStatus::Completed;
            self.touch();
        }
    }

    /// Cancel an active item. Returns `false` if the item was already terminal.
    pub fn cancel(&mut self) -> bool {
        if !self.status.is_active() {
            return false;
        }
        self.status = QueueStatus::Canceled;
        self.touch();
        true
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
