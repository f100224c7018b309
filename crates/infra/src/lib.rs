//! Infrastructure layer: the processing engine, review staging and config.

pub mod ai;
pub mod config;
pub mod jobs;
