//! Flood-wait protection for mutating console calls.
//!
//! The console (and the account behind it) punishes bursts of state-changing
//! requests. Every mutating call awaits [`FloodGuard::protect`] first; the
//! default [`FloodWaitProtector`] spaces such calls by a minimum interval.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Shared rate limiter awaited before every mutating console call
#[async_trait]
pub trait FloodGuard: Send + Sync {
    /// Suspends the caller until another mutating call is allowed
    async fn protect(&self);
}

/// Keeps at least `interval` between consecutive protected calls
#[derive(Debug)]
pub struct FloodWaitProtector {
    interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl FloodWaitProtector {
    /// Creates a protector, `Duration::ZERO` disables waiting
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_call: Mutex::new(None),
        }
    }
}

#[async_trait]
impl FloodGuard for FloodWaitProtector {
    async fn protect(&self) {
        // Held across the sleep so concurrent callers queue up
        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.interval {
                let wait = self.interval - elapsed;
                debug!("Flood-wait protection: sleeping {}ms", wait.as_millis());
                tokio::time::sleep(wait).await;
            }
        }
        *last_call = Some(Instant::now());
    }
}
