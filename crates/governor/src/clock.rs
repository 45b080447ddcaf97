//! Monotonic time source used for every duration computation.
//!
//! All window, spacing, TTL and backoff math goes through a [`Clock`] so the
//! governor never observes wall-clock adjustments. [`TokioClock`] is backed by
//! `tokio::time`, which tests can pause and advance deterministically.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

/// Source of monotonic time and suspension.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// Suspend the calling task for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}
