//! Canonical request fingerprints.
//!
//! A [`RequestKey`] identifies a logical request for caching and coalescing.
//! Two keys are equal when operation, normalized symbol and normalized
//! parameter set are equal, regardless of the order parameters were added or
//! the case/whitespace of the symbol.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Immutable request fingerprint.
#[derive(Clone, Debug)]
pub struct RequestKey {
    operation: String,
    symbol: String,
    params: BTreeMap<String, String>,
    canonical: String,
}

impl RequestKey {
    /// Start building a key for `operation` on `symbol`.
    pub fn builder(operation: impl Into<String>, symbol: &str) -> RequestKeyBuilder {
        RequestKeyBuilder {
            operation: operation.into(),
            symbol: normalize_symbol(symbol),
            params: BTreeMap::new(),
        }
    }

    /// Key without parameters.
    pub fn new(operation: impl Into<String>, symbol: &str) -> Self {
        Self::builder(operation, symbol).build()
    }

    /// Operation name.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Normalized entity symbol, the unit of per-symbol spacing.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Normalized parameter value, if present.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Canonical string form: `operation|SYMBOL|k1=v1&k2=v2`.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Short stable digest of the canonical form, for logs and diagnostics.
    pub fn fingerprint(&self) -> String {
        format!("{:x}", md5::compute(self.canonical.as_bytes()))
    }
}

impl PartialEq for RequestKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for RequestKey {}

impl Hash for RequestKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

/// Builder collecting normalized parameters for a [`RequestKey`].
#[derive(Debug)]
pub struct RequestKeyBuilder {
    operation: String,
    symbol: String,
    params: BTreeMap<String, String>,
}

impl RequestKeyBuilder {
    /// Add a parameter. Names are lowercased, both sides trimmed; a later
    /// value for the same name replaces the earlier one.
    pub fn param(mut self, name: &str, value: impl ToString) -> Self {
        let name = name.trim().to_lowercase();
        let value = value.to_string().trim().to_string();
        self.params.insert(name, value);
        self
    }

    /// Add a parameter only when a value is present.
    pub fn param_opt<T: ToString>(self, name: &str, value: Option<T>) -> Self {
        match value {
            Some(value) => self.param(name, value),
            None => self,
        }
    }

    pub fn build(self) -> RequestKey {
        let params = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let canonical = format!("{}|{}|{}", self.operation, self.symbol, params);
        RequestKey {
            operation: self.operation,
            symbol: self.symbol,
            params: self.params,
            canonical,
        }
    }
}

/// Ticker symbols are case-insensitive upstream.
pub(crate) fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}
