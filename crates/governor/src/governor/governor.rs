//! Request governor facade.
//!
//! Every data operation goes through [`RequestGovernor::execute`]:
//!
//! 1. Cache lookup - a hit returns without touching the limiter or provider
//! 2. Coalesce onto an identical in-flight fetch, if any
//! 3. Otherwise lead: acquire rate budget for the symbol (blocking)
//! 4. Fetch with bounded retry on throttle
//! 5. Store successes, broadcast the outcome to coalesced waiters
//!
//! No lock is held across the rate-limit wait or the fetch itself.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::cache::{Lookup, ResponseCache};
use super::inflight::{Flight, InFlightRegistry};
use super::rate_limiter::{RateLimitConfig, RateLimiter};
use super::retry::{RetryController, RetryPolicy};
use crate::clock::{Clock, TokioClock};
use crate::config::GovernorConfig;
use crate::errors::{ConfigError, FetchError, GovernorError};
use crate::key::RequestKey;

/// Counters describing governor activity since construction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GovernorStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Callers that attached to another caller's fetch.
    pub coalesced: u64,
    /// Fetch invocations, retries included.
    pub fetch_attempts: u64,
    /// Attempts the provider throttled.
    pub throttled_attempts: u64,
    pub exhausted: u64,
    pub failures: u64,
}

#[derive(Default)]
struct StatsRecorder {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    coalesced: AtomicU64,
    fetch_attempts: AtomicU64,
    throttled_attempts: AtomicU64,
    exhausted: AtomicU64,
    failures: AtomicU64,
}

impl StatsRecorder {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> GovernorStats {
        GovernorStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            fetch_attempts: self.fetch_attempts.load(Ordering::Relaxed),
            throttled_attempts: self.throttled_attempts.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Shared gateway to the rate-limited provider.
///
/// Construct once at startup and share (`Arc` or reference) with every caller.
pub struct RequestGovernor<V> {
    config: GovernorConfig,
    clock: Arc<dyn Clock>,
    rate_limiter: RateLimiter,
    cache: ResponseCache<V>,
    in_flight: InFlightRegistry<V>,
    retry: RetryController,
    stats: StatsRecorder,
}

impl<V> RequestGovernor<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a governor on the tokio clock.
    pub fn new(config: GovernorConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(TokioClock))
    }

    /// Create a governor with a custom clock.
    pub fn with_clock(config: GovernorConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(
            "Request governor: {} requests per {:?}, {:?} per-symbol spacing, {:?} cache TTL, {} retries",
            config.max_requests_per_window,
            config.window,
            config.min_ticker_interval,
            config.cache_ttl,
            config.max_retries
        );
        Ok(Self {
            rate_limiter: RateLimiter::new(RateLimitConfig {
                window: config.window,
                max_requests_per_window: config.max_requests_per_window,
                min_ticker_interval: config.min_ticker_interval,
            }),
            cache: ResponseCache::new(config.cache_ttl),
            in_flight: InFlightRegistry::new(),
            retry: RetryController::new(RetryPolicy::from_config(&config)),
            stats: StatsRecorder::default(),
            clock,
            config,
        })
    }

    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    pub fn stats(&self) -> GovernorStats {
        self.stats.snapshot()
    }

    /// Number of cached entries (expired ones may linger until looked up or purged).
    pub fn cached_entries(&self) -> usize {
        self.cache.len()
    }

    /// Drop expired cache entries.
    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired(self.clock.now())
    }

    /// Number of fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Resolve `key`, fetching through `fetch` only when neither the cache
    /// nor an in-flight request can answer.
    ///
    /// Dropping the returned future cancels the request at whatever point it
    /// is suspended; a cancelled leader releases its in-flight entry so
    /// coalesced waiters retry instead of hanging.
    pub async fn execute<F, Fut>(&self, key: RequestKey, mut fetch: F) -> Result<V, GovernorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<V, FetchError>>,
    {
        // Counted once per caller, even if it re-attaches after a cancelled leader.
        let mut coalesced = false;
        loop {
            if let Lookup::Hit(value) = self.cache.lookup(&key, self.clock.now()) {
                debug!("Cache hit for {}", key);
                StatsRecorder::bump(&self.stats.cache_hits);
                return Ok(value);
            }

            let leader = match self.in_flight.join_or_lead(&key) {
                Flight::Leader(guard) => guard,
                Flight::Follower(waiter) => {
                    if !coalesced {
                        coalesced = true;
                        StatsRecorder::bump(&self.stats.coalesced);
                    }
                    match waiter.wait().await {
                        Some(outcome) => return outcome,
                        // Leader was cancelled; start over.
                        None => continue,
                    }
                }
            };

            // A previous leader may have stored the value between our lookup and
            // registering.
            if let Lookup::Hit(value) = self.cache.lookup(&key, self.clock.now()) {
                StatsRecorder::bump(&self.stats.cache_hits);
                leader.complete(Ok(value.clone()));
                return Ok(value);
            }
            debug!("Cache miss for {} ({})", key, key.fingerprint());
            StatsRecorder::bump(&self.stats.cache_misses);

            self.rate_limiter
                .acquire(key.symbol(), self.clock.as_ref())
                .await;

            let outcome = self
                .retry
                .run_with_retry(self.clock.as_ref(), || {
                    StatsRecorder::bump(&self.stats.fetch_attempts);
                    let attempt = fetch();
                    async move {
                        let result = attempt.await;
                        if let Err(FetchError::Throttled { .. }) = &result {
                            StatsRecorder::bump(&self.stats.throttled_attempts);
                        }
                        result
                    }
                })
                .await;

            match &outcome {
                Ok(value) => {
                    self.cache.store(key.clone(), value.clone(), self.clock.now());
                }
                Err(error) => {
                    if error.is_rate_limited() {
                        StatsRecorder::bump(&self.stats.exhausted);
                    } else {
                        StatsRecorder::bump(&self.stats.failures);
                    }
                    debug!("Request {} failed: {}", key, error);
                }
            }
            leader.complete(outcome.clone());
            return outcome;
        }
    }

    /// [`execute`](Self::execute), returning [`GovernorError::Cancelled`] as
    /// soon as `cancel` fires.
    pub async fn execute_cancellable<F, Fut>(
        &self,
        key: RequestKey,
        cancel: &CancellationToken,
        fetch: F,
    ) -> Result<V, GovernorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<V, FetchError>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Request {} cancelled by caller", key);
                Err(GovernorError::Cancelled)
            }
            outcome = self.execute(key.clone(), fetch) => outcome,
        }
    }
}
