//! Human-readable log lines for a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const LOG_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Broadcasts log lines to read-only subscribers and mirrors them to tracing.
///
/// A subscriber that falls behind skips lines; the run never blocks on it.
#[derive(Debug)]
pub struct RunLog {
    job: String,
    tx: broadcast::Sender<LogLine>,
}

impl RunLog {
    pub fn new(job: impl Into<String>) -> Self {
        let (tx, _rx) = broadcast::channel(LOG_CHANNEL_CAPACITY);
        Self {
            job: job.into(),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogLine> {
        self.tx.subscribe()
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.push(LogLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(LogLevel::Error, message.into());
    }

    fn push(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info => tracing::info!(job = %self.job, "{message}"),
            LogLevel::Warn => tracing::warn!(job = %self.job, "{message}"),
            LogLevel::Error => tracing::error!(job = %self.job, "{message}"),
        }
        // No subscribers is fine.
        let _ = self.tx.send(LogLine {
            at: Utc::now(),
            level,
            message,
        });
    }
}
