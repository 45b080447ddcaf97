//! Bounded retry with exponential backoff for throttled fetches.
//!
//! The schedule is an explicit state machine ([`RetryState`]) so it can be
//! inspected without sleeping; [`RetryController`] drives it against a fetch
//! operation and a [`Clock`].

use std::future::Future;
use std::time::Duration;

use log::{debug, warn};
use rand::Rng;

use crate::clock::Clock;
use crate::config::GovernorConfig;
use crate::errors::{FetchError, GovernorError, RetryClass};

/// Backoff schedule parameters.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub backoff_base: Duration,
    /// Growth factor per further retry.
    pub backoff_multiplier: f64,
    /// Random extra delay, as a fraction of the scheduled delay.
    pub jitter_ratio: f64,
}

impl RetryPolicy {
    pub(crate) fn from_config(config: &GovernorConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_base: config.backoff_base,
            backoff_multiplier: config.backoff_multiplier,
            jitter_ratio: config.backoff_jitter_ratio,
        }
    }

    /// Scheduled delay before retry `retry` (1-based), without jitter:
    /// `backoff_base * backoff_multiplier^(retry - 1)`.
    /// Saturates at `Duration::MAX` once the schedule outgrows it.
    pub(crate) fn delay_for(&self, retry: u32) -> Duration {
        if self.backoff_base.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.backoff_base.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Fresh per-request state.
    pub(crate) fn state(&self) -> RetryState<'_> {
        RetryState {
            policy: self,
            attempts: 0,
            last_wait: Duration::ZERO,
        }
    }

    fn jitter(&self, delay: Duration) -> Duration {
        let max = delay.as_secs_f64() * self.jitter_ratio;
        if max <= 0.0 {
            return Duration::ZERO;
        }
        let jitter = rand::thread_rng().gen_range(0.0..=max);
        Duration::try_from_secs_f64(jitter).unwrap_or(Duration::MAX)
    }
}

/// Attempt counter and last computed delay for one request.
#[derive(Debug)]
pub(crate) struct RetryState<'a> {
    policy: &'a RetryPolicy,
    attempts: u32,
    last_wait: Duration,
}

impl RetryState<'_> {
    /// Record that a fetch attempt is about to run.
    pub(crate) fn begin_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Delay before the next retry, or `None` when the budget is spent.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        let retry = self.attempts;
        if retry == 0 || retry > self.policy.max_retries {
            return None;
        }
        self.last_wait = self.policy.delay_for(retry);
        Some(self.last_wait)
    }

    /// Fetch attempts made so far.
    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Last scheduled delay (zero before the first retry).
    #[cfg(test)]
    pub(crate) fn last_wait(&self) -> Duration {
        self.last_wait
    }

    fn exhausted(&self) -> GovernorError {
        GovernorError::ExhaustedRetries {
            attempts: self.attempts,
            last_wait: self.last_wait,
        }
    }
}

/// Runs fetch attempts under a [`RetryPolicy`].
pub(crate) struct RetryController {
    policy: RetryPolicy,
}

impl RetryController {
    pub(crate) fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Invoke `fetch` until it succeeds, fails non-retryably, or keeps
    /// throttling past `max_retries`.
    pub(crate) async fn run_with_retry<V, F, Fut>(
        &self,
        clock: &dyn Clock,
        mut fetch: F,
    ) -> Result<V, GovernorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<V, FetchError>>,
    {
        let mut state = self.policy.state();
        loop {
            state.begin_attempt();
            let error = match fetch().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            match error.retry_class() {
                RetryClass::Never => {
                    debug!(
                        "Fetch failed with non-retryable error after {} attempt(s): {}",
                        state.attempts(),
                        error
                    );
                    return Err(GovernorError::Provider {
                        message: error.message().to_string(),
                    });
                }
                RetryClass::WithBackoff => {
                    let Some(delay) = state.next_delay() else {
                        warn!(
                            "Giving up after {} throttled attempts: {}",
                            state.attempts(),
                            error
                        );
                        return Err(state.exhausted());
                    };
                    let wait = delay.saturating_add(self.policy.jitter(delay));
                    warn!(
                        "Throttled on attempt {}, retrying in {:?}: {}",
                        state.attempts(),
                        wait,
                        error
                    );
                    clock.sleep(wait).await;
                }
            }
        }
    }
}
