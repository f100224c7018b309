use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::result::{AiError, GeneratedQuestion};

/// Generates exactly one question for a generation target.
///
/// Called once per unit of work by the ledger's generate-one operation; it
/// must not retry internally.
#[async_trait]
pub trait QuestionGenerator: Send + Sync + 'static {
    async fn generate(&self, target_spec: &JsonValue) -> Result<GeneratedQuestion, AiError>;
}

#[async_trait]
impl<T: QuestionGenerator + ?Sized> QuestionGenerator for std::sync::Arc<T> {
    async fn generate(&self, target_spec: &JsonValue) -> Result<GeneratedQuestion, AiError> {
        (**self).generate(target_spec).await
    }
}
