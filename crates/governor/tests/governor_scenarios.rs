use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use quotegate_governor::{
    Clock, FetchError, GovernorConfig, GovernorError, Operation, RequestGovernor, RequestKey,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn config() -> GovernorConfig {
    GovernorConfig {
        backoff_jitter_ratio: 0.0,
        ..GovernorConfig::default()
    }
}

fn key(symbol: &str) -> RequestKey {
    Operation::StockInfo.request_key(symbol).unwrap()
}

#[derive(Clone, Default)]
struct SleepLog {
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

#[async_trait]
impl Clock for SleepLog {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
        tokio::time::sleep(duration).await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_thirty_first_request_waits_for_window_reset() {
    let governor = RequestGovernor::new(config()).unwrap();
    let start = Instant::now();

    for i in 0..30 {
        let symbol = format!("T{}", i);
        governor
            .execute(key(&symbol), || async { Ok::<_, FetchError>(1u32) })
            .await
            .unwrap();
    }
    assert_eq!(Instant::now(), start);

    let result = governor
        .execute(key("T30"), || async { Ok::<_, FetchError>(2u32) })
        .await;

    assert_eq!(result, Ok(2));
    assert!(Instant::now() - start >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_cache_ttl_scenario() {
    let governor = RequestGovernor::new(config()).unwrap();
    let calls = AtomicU32::new(0);
    let fetch = || {
        let call = calls.fetch_add(1, Ordering::SeqCst);
        async move { Ok::<_, FetchError>(call) }
    };

    assert_eq!(governor.execute(key("AAPL"), fetch).await, Ok(0));

    tokio::time::advance(Duration::from_secs(30)).await;
    assert_eq!(governor.execute(key("AAPL"), fetch).await, Ok(0));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(governor.execute(key("AAPL"), fetch).await, Ok(1));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_identical_requests_fetch_once() {
    let governor = RequestGovernor::new(config()).unwrap();
    let calls = AtomicU32::new(0);

    let (governor, calls) = (&governor, &calls);
    let requests = (0..8).map(move |_| {
        governor.execute(key("NVDA"), move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, FetchError>("chain".to_string())
            }
        })
    });
    let results = join_all(requests).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(results.iter().all(|r| r.as_deref() == Ok("chain")));
    assert_eq!(governor.stats().coalesced, 7);
    assert_eq!(governor.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_identical_requests_share_terminal_error() {
    let governor: RequestGovernor<String> = RequestGovernor::new(config()).unwrap();
    let calls = AtomicU32::new(0);

    let (governor, calls) = (&governor, &calls);
    let requests = (0..4).map(move |_| {
        governor.execute(key("DELISTED"), move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Err(FetchError::non_retryable("No data found, symbol may be delisted"))
            }
        })
    });
    let results = join_all(requests).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let expected = Err(GovernorError::Provider {
        message: "No data found, symbol may be delisted".to_string(),
    });
    assert!(results.iter().all(|r| *r == expected));
    assert_eq!(governor.cached_entries(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_schedule_and_retry_bound() {
    let clock = SleepLog::default();
    let governor = RequestGovernor::with_clock(
        GovernorConfig {
            max_retries: 3,
            ..config()
        },
        Arc::new(clock.clone()),
    )
    .unwrap();
    let calls = AtomicU32::new(0);

    let result: Result<String, _> = governor
        .execute(key("GME"), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FetchError::from_message("Too Many Requests. Rate limited.")) }
        })
        .await;

    assert_eq!(
        result,
        Err(GovernorError::ExhaustedRetries {
            attempts: 4,
            last_wait: Duration::from_secs(6),
        })
    );
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(
        *clock.sleeps.lock().unwrap(),
        vec![
            Duration::from_millis(1500),
            Duration::from_secs(3),
            Duration::from_secs(6)
        ]
    );
    assert_eq!(governor.stats().exhausted, 1);
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_error_is_immediate_and_uncached() {
    let clock = SleepLog::default();
    let governor: RequestGovernor<String> =
        RequestGovernor::with_clock(config(), Arc::new(clock.clone())).unwrap();
    let calls = AtomicU32::new(0);

    let result = governor
        .execute(key("AAPL"), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FetchError::non_retryable("Invalid Crumb")) }
        })
        .await;

    assert_eq!(
        result,
        Err(GovernorError::Provider {
            message: "Invalid Crumb".to_string()
        })
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(clock.sleeps.lock().unwrap().is_empty());
    assert_eq!(governor.cached_entries(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_leader_does_not_strand_waiters() {
    let governor = Arc::new(RequestGovernor::new(config()).unwrap());
    let calls = Arc::new(AtomicU32::new(0));

    let spawn_request = |delay: Duration| {
        let governor = Arc::clone(&governor);
        let calls = Arc::clone(&calls);
        tokio::spawn(async move {
            governor
                .execute(key("TSLA"), move || {
                    let call = calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        tokio::time::sleep(delay).await;
                        Ok::<_, FetchError>(call)
                    }
                })
                .await
        })
    };

    let leader = spawn_request(Duration::from_secs(10));
    tokio::time::sleep(Duration::from_millis(10)).await;
    let followers = vec![
        spawn_request(Duration::from_secs(1)),
        spawn_request(Duration::from_secs(1)),
    ];
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(governor.in_flight(), 1);

    leader.abort();
    assert!(leader.await.unwrap_err().is_cancelled());

    for follower in followers {
        assert_eq!(follower.await.unwrap(), Ok(1));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(governor.in_flight(), 0);
    // Followers that re-attach after the abort are not counted again.
    assert_eq!(governor.stats().coalesced, 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_waiting_on_symbol_spacing() {
    let governor = RequestGovernor::new(config()).unwrap();
    let calls = AtomicU32::new(0);
    let start = Instant::now();

    governor
        .execute(key("AAPL"), || async { Ok::<_, FetchError>(0u32) })
        .await
        .unwrap();

    // Same symbol, different operation: blocked by the 2s per-symbol spacing.
    let news = Operation::News.request_key("AAPL").unwrap();
    let cancel = CancellationToken::new();
    let (result, _) = tokio::join!(
        governor.execute_cancellable(news, &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, FetchError>(1u32) }
        }),
        async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            cancel.cancel();
        }
    );

    assert_eq!(result, Err(GovernorError::Cancelled));
    assert!(Instant::now() - start < Duration::from_secs(2));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(governor.in_flight(), 0);
    assert_eq!(governor.cached_entries(), 1);
    assert_eq!(governor.stats().fetch_attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff_sleep() {
    let governor: RequestGovernor<String> = RequestGovernor::new(config()).unwrap();
    let calls = AtomicU32::new(0);
    let cancel = CancellationToken::new();

    // Attempts run at 0s and 1.5s; the second backoff sleeps until 4.5s.
    let (result, _) = tokio::join!(
        governor.execute_cancellable(key("GME"), &cancel, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FetchError::throttled("Too Many Requests")) }
        }),
        async {
            tokio::time::sleep(Duration::from_secs(3)).await;
            cancel.cancel();
        }
    );

    assert_eq!(result, Err(GovernorError::Cancelled));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(governor.in_flight(), 0);
    assert_eq!(governor.cached_entries(), 0);

    let stats = governor.stats();
    assert_eq!(stats.throttled_attempts, 2);
    assert_eq!(stats.exhausted, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_follower_leaves_leader_and_others_unaffected() {
    let governor = RequestGovernor::new(config()).unwrap();
    let calls = AtomicU32::new(0);
    let cancel = CancellationToken::new();

    let fetch = || {
        calls.fetch_add(1, Ordering::SeqCst);
        async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, FetchError>("quote".to_string())
        }
    };

    let (leader, cancelled, follower, _) = tokio::join!(
        governor.execute(key("MSFT"), fetch),
        governor.execute_cancellable(key("MSFT"), &cancel, fetch),
        governor.execute(key("MSFT"), fetch),
        async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert_eq!(governor.in_flight(), 1);
            cancel.cancel();
        }
    );

    assert_eq!(cancelled, Err(GovernorError::Cancelled));
    assert_eq!(leader.as_deref(), Ok("quote"));
    assert_eq!(follower.as_deref(), Ok("quote"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(governor.in_flight(), 0);
    assert_eq!(governor.cached_entries(), 1);
    assert_eq!(governor.stats().coalesced, 2);
}
