//! `prepforge-ai`
//!
//! **Responsibility:** boundary of the AI-backed work the engine drives.
//!
//! This crate holds no inference logic:
//! - It defines the single-unit calls (generate one question, analyze one
//!   record, apply approved suggestions) as traits.
//! - It defines the values those calls exchange.
//! - Implementations live with the callers (infra, remote adapters, tests).

pub mod analyzer;
pub mod generator;
pub mod result;

pub use analyzer::{RecordAnalyzer, SuggestionApplier};
pub use generator::QuestionGenerator;
pub use result::{
    AiError, AnalysisResponse, ApplyReport, GeneratedQuestion, ProposedChange, Suggestion,
};
