//! Governor configuration.
//!
//! One typed value object holds every tunable. Defaults match the upstream
//! provider's published limits; each option can be overridden through the
//! environment at process start.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

const ENV_WINDOW_SECONDS: &str = "YFINANCE_RATE_WINDOW_SECONDS";
const ENV_MAX_REQUESTS: &str = "YFINANCE_MAX_REQUESTS_PER_WINDOW";
const ENV_MIN_TICKER_INTERVAL: &str = "YFINANCE_MIN_TICKER_INTERVAL_SECONDS";
const ENV_CACHE_TTL: &str = "YFINANCE_CACHE_TTL_SECONDS";
const ENV_MAX_RETRIES: &str = "YFINANCE_MAX_RETRIES";
const ENV_BACKOFF_BASE: &str = "YFINANCE_BACKOFF_BASE_SECONDS";
const ENV_BACKOFF_MULTIPLIER: &str = "YFINANCE_BACKOFF_MULTIPLIER";
const ENV_BACKOFF_JITTER: &str = "YFINANCE_BACKOFF_JITTER_RATIO";

/// Longest accepted window, spacing, TTL or backoff base.
const MAX_DURATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);
/// Most retries accepted after the first attempt.
const MAX_RETRIES: u32 = 32;

/// Request governor configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Width of the global fixed rate-limit window.
    pub window: Duration,
    /// Upper bound on grants per window.
    pub max_requests_per_window: u32,
    /// Minimum spacing between grants for the same symbol.
    pub min_ticker_interval: Duration,
    /// Cache entry lifetime.
    pub cache_ttl: Duration,
    /// Retry attempts after the first on throttle.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub backoff_base: Duration,
    /// Growth factor applied to the delay for each further retry.
    pub backoff_multiplier: f64,
    /// Upper bound of the random extra delay, as a fraction of the backoff.
    pub backoff_jitter_ratio: f64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_requests_per_window: 30,
            min_ticker_interval: Duration::from_secs(2),
            cache_ttl: Duration::from_secs(60),
            max_retries: 2,
            backoff_base: Duration::from_millis(1500),
            backoff_multiplier: 2.0,
            backoff_jitter_ratio: 0.3,
        }
    }
}

impl GovernorConfig {
    /// Load from process environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using an arbitrary variable lookup. Unset or blank values keep
    /// their defaults; the result is validated.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |name: &'static str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(raw) = get(ENV_WINDOW_SECONDS) {
            config.window = parse_seconds(ENV_WINDOW_SECONDS, &raw)?;
        }
        if let Some(raw) = get(ENV_MAX_REQUESTS) {
            config.max_requests_per_window = parse_number(ENV_MAX_REQUESTS, &raw)?;
        }
        if let Some(raw) = get(ENV_MIN_TICKER_INTERVAL) {
            config.min_ticker_interval = parse_seconds(ENV_MIN_TICKER_INTERVAL, &raw)?;
        }
        if let Some(raw) = get(ENV_CACHE_TTL) {
            config.cache_ttl = parse_seconds(ENV_CACHE_TTL, &raw)?;
        }
        if let Some(raw) = get(ENV_MAX_RETRIES) {
            config.max_retries = parse_number(ENV_MAX_RETRIES, &raw)?;
        }
        if let Some(raw) = get(ENV_BACKOFF_BASE) {
            config.backoff_base = parse_seconds(ENV_BACKOFF_BASE, &raw)?;
        }
        if let Some(raw) = get(ENV_BACKOFF_MULTIPLIER) {
            config.backoff_multiplier = parse_number(ENV_BACKOFF_MULTIPLIER, &raw)?;
        }
        if let Some(raw) = get(ENV_BACKOFF_JITTER) {
            config.backoff_jitter_ratio = parse_number(ENV_BACKOFF_JITTER, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the governor cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.is_zero() {
            return Err(out_of_range("window", "must be greater than zero"));
        }
        if self.max_requests_per_window == 0 {
            return Err(out_of_range(
                "max_requests_per_window",
                "must be greater than zero",
            ));
        }
        for (name, value) in [
            ("window", self.window),
            ("min_ticker_interval", self.min_ticker_interval),
            ("cache_ttl", self.cache_ttl),
            ("backoff_base", self.backoff_base),
        ] {
            if value > MAX_DURATION {
                return Err(out_of_range(
                    name,
                    format!("must be at most {}s, got {:?}", MAX_DURATION.as_secs(), value),
                ));
            }
        }
        if self.max_retries > MAX_RETRIES {
            return Err(out_of_range(
                "max_retries",
                format!("must be at most {}, got {}", MAX_RETRIES, self.max_retries),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(out_of_range(
                "backoff_multiplier",
                format!("must be a finite value >= 1.0, got {}", self.backoff_multiplier),
            ));
        }
        if !(0.0..=1.0).contains(&self.backoff_jitter_ratio) {
            return Err(out_of_range(
                "backoff_jitter_ratio",
                format!("must be within [0, 1], got {}", self.backoff_jitter_ratio),
            ));
        }
        Ok(())
    }
}

fn out_of_range(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::OutOfRange {
        name,
        reason: reason.into(),
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        name,
        value: raw.to_string(),
    })
}

fn parse_seconds(name: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let seconds: f64 = parse_number(name, raw)?;
    Duration::try_from_secs_f64(seconds).map_err(|_| ConfigError::InvalidValue {
        name,
        value: raw.to_string(),
    })
}
