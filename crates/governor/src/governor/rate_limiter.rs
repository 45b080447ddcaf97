//! Fixed-window rate limiter with per-symbol spacing.
//!
//! Two gates must both pass for a request to be granted:
//!
//! - **Window gate**: at most `max_requests_per_window` grants per fixed window.
//!   The counter resets to zero when the window elapses; it does not slide.
//! - **Symbol gate**: grants for the same symbol are at least
//!   `min_ticker_interval` apart.
//!
//! Both gates are evaluated and committed inside one critical section, so there
//! is no gap between checking a gate and consuming it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

use crate::clock::Clock;

/// Outcome of a non-blocking acquire.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Acquire {
    /// Both gates passed and the grant has been recorded.
    Granted,
    /// At least one gate is closed; nothing was recorded.
    WaitFor(Duration),
}

/// Rate limiter configuration.
#[derive(Clone, Debug)]
pub(crate) struct RateLimitConfig {
    /// Width of the fixed window.
    pub window: Duration,
    /// Maximum grants per window.
    pub max_requests_per_window: u32,
    /// Minimum spacing between grants for one symbol.
    pub min_ticker_interval: Duration,
}

#[derive(Debug, Default)]
struct LimiterState {
    /// Start of the current window; `None` until the first evaluation.
    window_start: Option<Instant>,
    /// Grants issued in the current window.
    window_count: u32,
    /// Last grant per symbol.
    last_grant: HashMap<String, Instant>,
}

/// Process-wide limiter shared by every caller of one governor.
pub(crate) struct RateLimiter {
    state: Mutex<LimiterState>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub(crate) fn new(config: RateLimitConfig) -> Self {
        Self {
            state: Mutex::new(LimiterState::default()),
            config,
        }
    }

    /// Lock the limiter state, recovering from poison if necessary.
    ///
    /// Every transition below leaves the state consistent before anything that
    /// could panic runs, so the recovered value is still valid.
    fn lock_state(&self) -> MutexGuard<'_, LimiterState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter state mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Evaluate both gates at `now` and record the grant if they pass.
    pub(crate) fn try_acquire(&self, symbol: &str, now: Instant) -> Acquire {
        let mut state = self.lock_state();

        let window_elapsed = state
            .window_start
            .map_or(true, |start| now.saturating_duration_since(start) >= self.config.window);
        if window_elapsed {
            state.window_start = Some(now);
            state.window_count = 0;
            // Stamps older than the spacing interval can no longer block anything.
            let interval = self.config.min_ticker_interval;
            state
                .last_grant
                .retain(|_, last| now.saturating_duration_since(*last) < interval);
        }

        let window_wait = if state.window_count < self.config.max_requests_per_window {
            Duration::ZERO
        } else {
            // window_start is always set here.
            let start = state.window_start.unwrap_or(now);
            match start.checked_add(self.config.window) {
                Some(window_end) => window_end.saturating_duration_since(now),
                // Window ends past the clock's range.
                None => Duration::MAX,
            }
        };

        let symbol_wait = match state.last_grant.get(symbol) {
            Some(last) => {
                let elapsed = now.saturating_duration_since(*last);
                self.config.min_ticker_interval.saturating_sub(elapsed)
            }
            None => Duration::ZERO,
        };

        let wait = window_wait.max(symbol_wait);
        if !wait.is_zero() {
            return Acquire::WaitFor(wait);
        }

        state.window_count += 1;
        state.last_grant.insert(symbol.to_string(), now);
        Acquire::Granted
    }

    /// Block until both gates pass for `symbol`.
    ///
    /// Each wait is a plain sleep on `clock`; dropping the returned future
    /// cancels the wait without touching limiter state.
    pub(crate) async fn acquire(&self, symbol: &str, clock: &dyn Clock) {
        loop {
            match self.try_acquire(symbol, clock.now()) {
                Acquire::Granted => {
                    debug!("Rate limiter: granted request for '{}'", symbol);
                    return;
                }
                Acquire::WaitFor(wait) => {
                    debug!("Rate limiter: waiting {:?} for '{}'", wait, symbol);
                    clock.sleep(wait).await;
                }
            }
        }
    }

    /// Grants used in the current window at `now`.
    #[cfg(test)]
    pub(crate) fn window_usage(&self, now: Instant) -> u32 {
        let state = self.lock_state();
        match state.window_start {
            Some(start) if now.saturating_duration_since(start) < self.config.window => {
                state.window_count
            }
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::TokioClock;

    fn limiter(max: u32, window_secs: u64, interval_secs: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            window: Duration::from_secs(window_secs),
            max_requests_per_window: max,
            min_ticker_interval: Duration::from_secs(interval_secs),
        })
    }

    #[test]
    fn test_window_budget_is_enforced() {
        let limiter = limiter(3, 60, 0);
        let now = Instant::now();

        for i in 0..3 {
            assert_eq!(limiter.try_acquire(&format!("SYM{}", i), now), Acquire::Granted);
        }
        assert_eq!(
            limiter.try_acquire("SYM3", now + Duration::from_secs(10)),
            Acquire::WaitFor(Duration::from_secs(50))
        );
        assert_eq!(limiter.window_usage(now), 3);
    }

    #[test]
    fn test_window_resets_at_boundary() {
        let limiter = limiter(1, 60, 0);
        let now = Instant::now();

        assert_eq!(limiter.try_acquire("A", now), Acquire::Granted);
        assert!(matches!(
            limiter.try_acquire("B", now + Duration::from_secs(59)),
            Acquire::WaitFor(_)
        ));
        assert_eq!(
            limiter.try_acquire("B", now + Duration::from_secs(60)),
            Acquire::Granted
        );
        assert_eq!(limiter.window_usage(now + Duration::from_secs(60)), 1);
    }

    #[test]
    fn test_symbol_spacing() {
        let limiter = limiter(30, 60, 2);
        let now = Instant::now();

        assert_eq!(limiter.try_acquire("AAPL", now), Acquire::Granted);
        assert_eq!(
            limiter.try_acquire("AAPL", now + Duration::from_millis(500)),
            Acquire::WaitFor(Duration::from_millis(1500))
        );
        // Other symbols are unaffected.
        assert_eq!(limiter.try_acquire("MSFT", now), Acquire::Granted);
        assert_eq!(
            limiter.try_acquire("AAPL", now + Duration::from_secs(2)),
            Acquire::Granted
        );
    }

    #[test]
    fn test_failed_gate_commits_nothing() {
        let limiter = limiter(2, 60, 5);
        let now = Instant::now();

        assert_eq!(limiter.try_acquire("AAPL", now), Acquire::Granted);
        // Symbol gate closed: the window counter must not move.
        assert!(matches!(limiter.try_acquire("AAPL", now), Acquire::WaitFor(_)));
        assert_eq!(limiter.window_usage(now), 1);
        assert_eq!(limiter.try_acquire("MSFT", now), Acquire::Granted);
    }

    #[test]
    fn test_wait_is_max_of_both_gates() {
        let limiter = limiter(1, 10, 30);
        let now = Instant::now();

        assert_eq!(limiter.try_acquire("AAPL", now), Acquire::Granted);
        assert_eq!(
            limiter.try_acquire("AAPL", now + Duration::from_secs(4)),
            Acquire::WaitFor(Duration::from_secs(26))
        );
        assert_eq!(
            limiter.try_acquire("MSFT", now + Duration::from_secs(4)),
            Acquire::WaitFor(Duration::from_secs(6))
        );
    }

    #[test]
    fn test_grants_within_one_window_never_exceed_budget() {
        let limiter = limiter(30, 60, 2);
        let start = Instant::now();

        let mut granted = 0;
        for i in 0..200u64 {
            let now = start + Duration::from_millis(i * 250);
            if limiter.try_acquire(&format!("SYM{}", i % 7), now) == Acquire::Granted {
                granted += 1;
            }
        }

        // 200 * 250ms stays inside the first 60s window.
        assert_eq!(granted, 30);
    }

    #[test]
    fn test_window_beyond_clock_range_does_not_panic() {
        let limiter = RateLimiter::new(RateLimitConfig {
            window: Duration::MAX,
            max_requests_per_window: 1,
            min_ticker_interval: Duration::ZERO,
        });
        let now = Instant::now();

        assert_eq!(limiter.try_acquire("AAPL", now), Acquire::Granted);
        assert_eq!(
            limiter.try_acquire("MSFT", now + Duration::from_secs(1)),
            Acquire::WaitFor(Duration::MAX)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_blocks_until_window_reset() {
        let limiter = limiter(30, 60, 2);
        let clock = TokioClock;
        let start = Instant::now();

        for i in 0..30 {
            limiter.acquire(&format!("T{}", i), &clock).await;
        }
        assert_eq!(Instant::now(), start);

        limiter.acquire("T30", &clock).await;
        assert!(Instant::now() - start >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_grants_for_one_symbol_are_spaced() {
        let limiter = Arc::new(limiter(100, 60, 2));
        let grants = Arc::new(Mutex::new(Vec::new()));

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let grants = Arc::clone(&grants);
                tokio::spawn(async move {
                    limiter.acquire("AAPL", &TokioClock).await;
                    grants.lock().unwrap().push(Instant::now());
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let mut grants = grants.lock().unwrap().clone();
        grants.sort();
        assert_eq!(grants.len(), 5);
        for pair in grants.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs(2));
        }
    }
}
