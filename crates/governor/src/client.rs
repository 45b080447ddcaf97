//! Operation-level client routing every provider call through the governor.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::{FetchError, GovernorError, OperationError};
use crate::governor::RequestGovernor;
use crate::operation::Operation;

/// Upstream data provider.
///
/// Implementations perform one raw request and report throttling through
/// [`FetchError::Throttled`]; retries, caching and rate limiting are handled
/// by the governor.
#[async_trait]
pub trait DataProvider<V>: Send + Sync {
    async fn fetch(&self, symbol: &str, operation: &Operation) -> Result<V, FetchError>;
}

/// Errors from [`GovernedClient::call`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error(transparent)]
    InvalidRequest(#[from] OperationError),

    #[error(transparent)]
    Governor(#[from] GovernorError),
}

/// Pairs a provider with the shared governor.
pub struct GovernedClient<P, V> {
    provider: Arc<P>,
    governor: Arc<RequestGovernor<V>>,
    _value: PhantomData<fn() -> V>,
}

impl<P, V> Clone for GovernedClient<P, V> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            governor: Arc::clone(&self.governor),
            _value: PhantomData,
        }
    }
}

impl<P, V> GovernedClient<P, V>
where
    P: DataProvider<V>,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(provider: Arc<P>, governor: Arc<RequestGovernor<V>>) -> Self {
        Self {
            provider,
            governor,
            _value: PhantomData,
        }
    }

    pub fn governor(&self) -> &RequestGovernor<V> {
        &self.governor
    }

    /// Run `operation` for `symbol` through cache, coalescing, rate limiting
    /// and retry.
    pub async fn call(&self, symbol: &str, operation: &Operation) -> Result<V, ClientError> {
        let key = operation.request_key(symbol)?;
        let symbol = key.symbol().to_string();
        let symbol = symbol.as_str();
        let provider = self.provider.as_ref();
        let value = self
            .governor
            .execute(key, move || provider.fetch(symbol, operation))
            .await?;
        Ok(value)
    }
}
