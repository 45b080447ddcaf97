//! Error types and retry classification for the governor crate.
//!
//! This module provides:
//! - [`FetchError`]: What a caller-supplied fetch operation reports on failure
//! - [`GovernorError`]: Terminal errors surfaced by the request governor
//! - [`ConfigError`] / [`OperationError`]: Construction and validation failures
//! - [`RetryClass`]: Classification for determining retry behavior

mod retry;

pub use retry::RetryClass;

use std::time::Duration;

use thiserror::Error;

/// Message fragments the upstream provider uses when it throttles a request.
const THROTTLE_MARKERS: &[&str] = &["too many requests", "rate limited"];

/// Errors reported by a single fetch attempt against the upstream provider.
///
/// Each variant is classified into a [`RetryClass`] via the
/// [`retry_class`](Self::retry_class) method.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The provider throttled the request (HTTP 429 or equivalent).
    /// Retried with exponential backoff.
    #[error("Throttled: {message}")]
    Throttled {
        /// The provider's throttle message
        message: String,
    },

    /// Any failure unrelated to throttling: malformed request, authorization
    /// failure, unknown symbol, upstream outage.
    #[error("{message}")]
    NonRetryable {
        /// The provider's error message
        message: String,
    },
}

impl FetchError {
    /// Build a throttle signal.
    pub fn throttled(message: impl Into<String>) -> Self {
        Self::Throttled {
            message: message.into(),
        }
    }

    /// Build a non-retryable provider error.
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self::NonRetryable {
            message: message.into(),
        }
    }

    /// Classify a raw provider error message.
    ///
    /// Providers that only surface text (scraped endpoints, wrapped client
    /// libraries) signal throttling through the message. Anything mentioning
    /// "too many requests" or "rate limited" is treated as a throttle, everything
    /// else as non-retryable.
    ///
    /// # Examples
    ///
    /// ```
    /// use quotegate_governor::errors::{FetchError, RetryClass};
    ///
    /// let error = FetchError::from_message("429 Too Many Requests");
    /// assert_eq!(error.retry_class(), RetryClass::WithBackoff);
    ///
    /// let error = FetchError::from_message("401 Unauthorized");
    /// assert_eq!(error.retry_class(), RetryClass::Never);
    /// ```
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lowered = message.to_lowercase();
        if THROTTLE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            Self::Throttled { message }
        } else {
            Self::NonRetryable { message }
        }
    }

    /// Returns the retry classification for this error.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Throttled { .. } => RetryClass::WithBackoff,
            Self::NonRetryable { .. } => RetryClass::Never,
        }
    }

    /// The provider's message, regardless of classification.
    pub fn message(&self) -> &str {
        match self {
            Self::Throttled { message } | Self::NonRetryable { message } => message,
        }
    }
}

/// Terminal errors returned by [`RequestGovernor::execute`](crate::RequestGovernor::execute).
///
/// `Clone` because a single outcome is broadcast to every coalesced waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GovernorError {
    /// The provider kept throttling past the retry budget.
    #[error("Rate limited after {attempts} attempts (last backoff {last_wait:?})")]
    ExhaustedRetries {
        /// Number of fetch invocations made, including the first.
        attempts: u32,
        /// The last backoff delay computed before giving up.
        last_wait: Duration,
    },

    /// A non-retryable provider error, surfaced as-is.
    #[error("Provider error: {message}")]
    Provider {
        /// The provider's error message
        message: String,
    },

    /// The caller's cancellation fired while the request was suspended.
    #[error("Request cancelled")]
    Cancelled,
}

impl GovernorError {
    /// True for the terminal throttle outcome.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::ExhaustedRetries { .. })
    }
}

/// Invalid governor configuration.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    /// An environment value could not be parsed.
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue {
        /// Environment variable name
        name: &'static str,
        /// The raw value
        value: String,
    },

    /// A parsed option is outside its allowed range.
    #[error("Option {name} out of range: {reason}")]
    OutOfRange {
        /// Option name
        name: &'static str,
        /// Why the value was rejected
        reason: String,
    },
}

/// Invalid operation parameters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    /// A parameter value is not one of the accepted choices.
    #[error("Invalid {parameter} {value:?}. Please use one of the following: {allowed}")]
    InvalidChoice {
        /// Parameter name
        parameter: &'static str,
        /// The rejected value
        value: String,
        /// Comma separated list of accepted values
        allowed: String,
    },

    /// A parameter value is malformed.
    #[error("Invalid {parameter}: {reason}")]
    InvalidParameter {
        /// Parameter name
        parameter: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// The ticker symbol is empty after normalization.
    #[error("Symbol must not be empty")]
    EmptySymbol,
}
