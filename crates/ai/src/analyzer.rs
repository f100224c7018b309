use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use prepforge_core::RecordId;

use crate::result::{AiError, AnalysisResponse, ApplyReport, Suggestion};

/// Analyzes exactly one record and proposes zero or more changes.
///
/// Must not mutate the record; proposals are applied later, after review.
#[async_trait]
pub trait RecordAnalyzer: Send + Sync + 'static {
    async fn analyze(
        &self,
        record_id: RecordId,
        payload: &JsonValue,
    ) -> Result<AnalysisResponse, AiError>;
}

/// Commits reviewed suggestions in bulk.
#[async_trait]
pub trait SuggestionApplier: Send + Sync + 'static {
    async fn apply(&self, selected: &[Suggestion]) -> Result<ApplyReport, AiError>;
}

#[async_trait]
impl<T: RecordAnalyzer + ?Sized> RecordAnalyzer for Arc<T> {
    async fn analyze(
        &self,
        record_id: RecordId,
        payload: &JsonValue,
    ) -> Result<AnalysisResponse, AiError> {
        (**self).analyze(record_id, payload).await
    }
}

#[async_trait]
impl<T: SuggestionApplier + ?Sized> SuggestionApplier for Arc<T> {
    async fn apply(&self, selected: &[Suggestion]) -> Result<ApplyReport, AiError> {
        (**self).apply(selected).await
    }
}
