//! `prepforge-core`: shared building blocks for the processing engine.
//!
//! This crate contains **pure domain** primitives (no IO, no async).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{OwnerId, QueueItemId, RecordId, SuggestionId};
