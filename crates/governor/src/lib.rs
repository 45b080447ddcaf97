//! Quotegate Request Governor
//!
//! This crate mediates outbound calls to a rate-limited financial data
//! provider on behalf of many concurrent data operations.
//!
//! # Overview
//!
//! Every request passes through one shared [`RequestGovernor`], which enforces:
//! - A global fixed-window request budget and per-symbol minimum spacing
//! - A TTL response cache, with coalescing of identical in-flight requests
//! - Bounded retry with exponential backoff when the provider throttles
//!
//! # Architecture
//!
//! ```text
//! +------------------+     +------------------+
//! |    Operation     | --> |   RequestKey     |  (canonical fingerprint)
//! +------------------+     +------------------+
//!                                  |
//!                                  v
//!                          +------------------+
//!                          | RequestGovernor  |  cache -> coalesce -> rate gate
//!                          +------------------+
//!                                  |
//!                                  v
//!                          +------------------+
//!                          | RetryController  |  (throttle backoff)
//!                          +------------------+
//!                                  |
//!                                  v
//!                          +------------------+
//!                          |  DataProvider    |  (caller-supplied fetch)
//!                          +------------------+
//! ```
//!
//! # Example
//!
//! ```no_run
//! use quotegate_governor::{FetchError, GovernorConfig, Operation, RequestGovernor};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let governor: RequestGovernor<String> = RequestGovernor::new(GovernorConfig::from_env()?)?;
//! let key = Operation::historical_prices(Some("1y"), None)?.request_key("AAPL")?;
//! let prices = governor
//!     .execute(key, || async { Ok::<_, FetchError>("[...]".to_string()) })
//!     .await?;
//! # let _ = prices;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod clock;
pub mod config;
pub mod errors;
mod governor;
pub mod key;
pub mod operation;

pub use client::{ClientError, DataProvider, GovernedClient};
pub use clock::{Clock, TokioClock};
pub use config::GovernorConfig;
pub use errors::{ConfigError, FetchError, GovernorError, OperationError, RetryClass};
pub use governor::{GovernorStats, RequestGovernor};
pub use key::{RequestKey, RequestKeyBuilder};
pub use operation::{FinancialType, HolderType, OptionType, Operation, RecommendationType};
