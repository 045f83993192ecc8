//! AKShare Provider Core
//!
//! Local caching and parsing layer for a Chinese-market data provider:
//! symbol normalization, keyed SQLite/DuckDB caches with TTL policies,
//! a trading-day freshness check for daily history, and dividend
//! disclosure parsing. Upstream fetching is always injected by the host.

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod services;
pub mod state;

pub use cache::{
    calculate_cache_ttl, Backing, CacheStore, ComputeFn, ComputeRequest, Table, TtlPolicy, Value,
};
pub use config::CacheConfig;
pub use error::{AppError, ErrorResponse, Result};
pub use state::ProviderState;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `default_filter` when set. Call once from the host;
/// a second call returns an error instead of panicking.
pub fn init_tracing(default_filter: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| AppError::Config(format!("Failed to initialize logging: {}", e)))?;

    tracing::info!("Tracing initialized");
    Ok(())
}
