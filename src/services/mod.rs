//! Services Layer
//!
//! Provider logic the host platform calls into. Services normalize the
//! request, pick the cache namespace and policy, and hand misses to the
//! injected fetch function.
//!
//! # Architecture
//!
//! ```text
//! Host request --> Services --> CacheStore / DuckDb history --> injected fetch
//! ```
//!
//! # Services
//!
//! - `SymbolService` - Ticker normalization
//! - `QuoteService` - Cached spot snapshots and single quotes
//! - `FundamentalsService` - Statements, key metrics, peer facts, fund holdings
//! - `HistoryService` - Daily OHLCV history with trading-day freshness
//! - `CalendarService` - Last completed trading day per market
//! - `ProfileService` - Company profiles, kept until bypassed
//! - `SearchService` - Cached symbol listing and local search
//! - `DividendService` - Dividend disclosure parsing

pub mod calendar_service;
pub mod dividend_service;
pub mod field_map;
pub mod fundamentals_service;
pub mod history_service;
pub mod profile_service;
pub mod quote_service;
pub mod search_service;
pub mod symbol_service;

// Re-export commonly used types and services
pub use calendar_service::{last_trading_day, CalendarService};
pub use dividend_service::{
    post_tax_dividend_per_share, strict_post_tax_dividend_per_share, DividendRecord, DividendService,
};
pub use field_map::{FieldKind, FieldMap, FieldSpec};
pub use fundamentals_service::{FundamentalsKind, FundamentalsService, Period};
pub use history_service::{bars_from_table, HistoryResult, HistoryService};
pub use profile_service::ProfileService;
pub use quote_service::QuoteService;
pub use search_service::SearchService;
pub use symbol_service::{normalize_symbol, Market, NormalizedSymbol, SymbolService};
