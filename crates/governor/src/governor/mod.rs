//! Request governance layer.
//!
//! This module provides the pieces every outbound provider call passes through:
//! - Fixed-window and per-symbol rate limiting
//! - TTL response caching with coalescing of identical in-flight requests
//! - Bounded retry with exponential backoff on throttle
//! - The [`RequestGovernor`] facade composing them

mod cache;
#[allow(clippy::module_inception)]
mod governor;
mod inflight;
mod rate_limiter;
mod retry;

pub use governor::{GovernorStats, RequestGovernor};
