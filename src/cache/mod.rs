//! Local cache layer
//!
//! Keyed stores with TTL policies over pluggable backings
//! (SQLite blobs or DuckDB structured rows), plus the freshness
//! check used by the time-series history cache.

pub mod codec;
pub mod freshness;
pub mod store;
pub mod table;
pub mod ttl;

pub use store::{Backing, CacheBackend, CacheStore, StoredEntry};
pub use table::{Table, Value};
pub use ttl::{calculate_cache_ttl, constant_ttl, next_quarter_start, next_year_start, TtlPolicy};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Arguments handed to a compute function on a cache miss.
///
/// `symbol`, `period` and `qualifier` form the cache key; `params` are
/// free-form pass-through arguments (credentials, adjust flags, ...) that do
/// not affect the key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeRequest {
    pub symbol: String,
    pub period: String,
    pub qualifier: Option<String>,
    pub params: BTreeMap<String, String>,
}

impl ComputeRequest {
    pub fn new(symbol: impl Into<String>, period: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            period: period.into(),
            ..Default::default()
        }
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Storage key, `symbol:period[:qualifier]`
    pub fn cache_key(&self) -> String {
        match &self.qualifier {
            Some(q) => format!("{}:{}:{}", self.symbol, self.period, q),
            None => format!("{}:{}", self.symbol, self.period),
        }
    }
}

impl fmt::Display for ComputeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cache_key())
    }
}

/// Data-producing capability injected into a [`CacheStore`].
///
/// Implementations usually wrap an upstream library call. Errors are
/// returned to the caller of the store unchanged.
pub trait ComputeFn {
    fn compute(&self, request: &ComputeRequest) -> Result<Table>;
}

impl<F> ComputeFn for F
where
    F: Fn(&ComputeRequest) -> Result<Table>,
{
    fn compute(&self, request: &ComputeRequest) -> Result<Table> {
        self(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_parts() {
        let request = ComputeRequest::new("600036", "annual");
        assert_eq!(request.cache_key(), "600036:annual");

        let request = request.with_qualifier("hfq").with_param("api_key", "secret");
        assert_eq!(request.cache_key(), "600036:annual:hfq");
        assert_eq!(request.param("api_key"), Some("secret"));
        assert_eq!(request.to_string(), "600036:annual:hfq");
    }

    #[test]
    fn test_closure_is_compute_fn() {
        let compute = |req: &ComputeRequest| -> Result<Table> {
            let mut table = Table::new(["symbol"]);
            table.push_row(vec![Value::from(req.symbol.as_str())])?;
            Ok(table)
        };
        let table = compute.compute(&ComputeRequest::new("000001", "daily")).unwrap();
        assert_eq!(table.get(0, "symbol").and_then(Value::as_str), Some("000001"));
    }
}
