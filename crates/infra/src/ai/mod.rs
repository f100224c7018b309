//! AI-facing adapters that sit between engine runs and human review.
//!
//! Failures here are reported to the caller and never touch the runs that
//! produced the suggestions.

pub mod review;

pub use review::ReviewStaging;
