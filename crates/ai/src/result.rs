use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use prepforge_core::{RecordId, SuggestionId};

/// One generated artifact (a question), opaque to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedQuestion {
    pub body: JsonValue,
}

impl GeneratedQuestion {
    pub fn new(body: JsonValue) -> Self {
        Self { body }
    }
}

/// A change proposed by an analysis call for a single record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedChange {
    /// Field name → proposed new value.
    pub changes: BTreeMap<String, JsonValue>,

    /// Optional human-readable explanation.
    pub rationale: Option<String>,
}

impl ProposedChange {
    pub fn new() -> Self {
        Self {
            changes: BTreeMap::new(),
            rationale: None,
        }
    }

    pub fn with_change(mut self, field: impl Into<String>, value: JsonValue) -> Self {
        self.changes.insert(field.into(), value);
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }
}

impl Default for ProposedChange {
    fn default() -> Self {
        Self::new()
    }
}

/// Response of a successful analyze-record call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub suggestions: Vec<ProposedChange>,
}

impl AnalysisResponse {
    pub fn new(suggestions: Vec<ProposedChange>) -> Self {
        Self { suggestions }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// A proposed change awaiting human review.
///
/// Suggestions are staged selected; the reviewer deselects the ones that
/// should not be applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: SuggestionId,
    pub record_id: RecordId,
    pub changes: BTreeMap<String, JsonValue>,
    pub rationale: Option<String>,
    pub selected: bool,
}

impl Suggestion {
    pub fn from_proposal(record_id: RecordId, proposal: ProposedChange) -> Self {
        Self {
            id: SuggestionId::new(),
            record_id,
            changes: proposal.changes,
            rationale: proposal.rationale,
            selected: true,
        }
    }
}

/// Result of a bulk apply call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub success_count: usize,
    pub error_count: usize,
    /// Suggestions the applier could attribute a failure to.
    #[serde(default)]
    pub failed: Vec<SuggestionId>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AiError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The service answered with a non-success response.
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("inference failed: {0}")]
    InferenceFailed(String),

    /// The service could not be reached.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("request timed out")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(String),
}

impl AiError {
    /// Transport-level failures (the call never produced a response).
    pub fn is_transport(&self) -> bool {
        matches!(self, AiError::Unavailable(_) | AiError::Timeout)
    }
}
