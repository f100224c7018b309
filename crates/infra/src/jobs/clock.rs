//! Injectable timing for the engine's suspension points.

use std::time::Duration;

use async_trait::async_trait;

/// Source of delays between units of work and between retry attempts.
///
/// Every wait the engine performs goes through a `Clock`, so tests can drive
/// runs with virtual time or record the requested delays.
#[async_trait]
pub trait Clock: Send + Sync + 'static {
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        tokio::time::sleep(duration).await;
    }
}

/// Clock that returns immediately and remembers every requested delay.
#[cfg(any(test, feature = "test-util"))]
#[derive(Debug, Default)]
pub struct RecordingClock {
    delays: std::sync::Mutex<Vec<Duration>>,
}

#[cfg(any(test, feature = "test-util"))]
impl RecordingClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[cfg(any(test, feature = "test-util"))]
#[async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(duration);
        tokio::task::yield_now().await;
    }
}

#[async_trait]
impl<C: Clock> Clock for std::sync::Arc<C> {
    async fn sleep(&self, duration: Duration) {
        (**self).sleep(duration).await
    }
}
