//! Search Service
//!
//! Listing of A-share and HK codes with their short names and exchanges.
//! The whole list is cached as one table and searched locally.

use super::symbol_service::{Market, SymbolService};
use crate::cache::ttl::market_now;
use crate::cache::{Backing, ComputeFn, ComputeRequest, Table, TtlPolicy, Value};
use crate::error::{AppError, Result};
use crate::state::ProviderState;
use tracing::info;

pub const SYMBOLS_NAMESPACE: &str = "symbols";

const SYMBOL_COLUMN: &str = "symbol";
const NAME_COLUMN: &str = "name";
const EXCHANGE_COLUMN: &str = "exchange";

/// Exchange code for listing venues
pub fn exchange_code(market: Market) -> Option<&'static str> {
    match market {
        Market::SH => Some("SSE"),
        Market::SZ => Some("SZSE"),
        Market::BJ => Some("BSE"),
        Market::HK => Some("HKEX"),
        Market::OF | Market::Other => None,
    }
}

/// Request handed to the listing fetcher
pub fn symbols_request() -> ComputeRequest {
    ComputeRequest::new("all", "symbols")
}

fn infer_exchange(code: &Value) -> Value {
    let exchange = code
        .as_str()
        .and_then(|c| SymbolService::normalize(c).ok())
        .and_then(|n| exchange_code(n.market));
    Value::from(exchange)
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Text(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Fill in `exchange` from the code where the listing leaves it out
fn with_exchange_column(table: Table) -> Result<Table> {
    let symbol_idx = table.column_index(SYMBOL_COLUMN).ok_or_else(|| {
        AppError::Validation(format!("symbol list has no {} column", SYMBOL_COLUMN))
    })?;
    let exchange_idx = table.column_index(EXCHANGE_COLUMN);
    let (mut columns, rows) = table.into_parts();

    let rows = match exchange_idx {
        Some(idx) => rows
            .into_iter()
            .map(|mut row| {
                if row.get(idx).is_some_and(is_blank) {
                    row[idx] = infer_exchange(&row[symbol_idx]);
                }
                row
            })
            .collect(),
        None => {
            columns.push(EXCHANGE_COLUMN.to_string());
            rows.into_iter()
                .map(|mut row| {
                    let exchange = infer_exchange(&row[symbol_idx]);
                    row.push(exchange);
                    row
                })
                .collect()
        }
    };

    Table::from_rows(columns, rows)
}

fn cell_contains(row: &[Value], idx: Option<usize>, query: &str) -> bool {
    idx.and_then(|i| row.get(i))
        .and_then(Value::as_str)
        .is_some_and(|s| s.contains(query))
}

/// Search Service
pub struct SearchService;

impl SearchService {
    /// Full listing; kept until the caller bypasses the cache
    pub fn get_symbols<F>(state: &ProviderState, use_cache: bool, fetch: &F) -> Result<Table>
    where
        F: ComputeFn + ?Sized,
    {
        let compute = |req: &ComputeRequest| -> Result<Table> { with_exchange_column(fetch.compute(req)?) };

        let store = state.store(SYMBOLS_NAMESPACE, Backing::Table)?;
        store.load_with_policy(&symbols_request(), use_cache, &TtlPolicy::Never, &compute, market_now())
    }

    /// Listing rows whose code or name contains `query`, at most `limit` of them.
    /// An empty query matches every row.
    pub fn search<F>(
        state: &ProviderState,
        query: &str,
        limit: Option<usize>,
        use_cache: bool,
        fetch: &F,
    ) -> Result<Table>
    where
        F: ComputeFn + ?Sized,
    {
        let symbols = Self::get_symbols(state, use_cache, fetch)?;
        let query = query.trim();
        let symbol_idx = symbols.column_index(SYMBOL_COLUMN);
        let name_idx = symbols.column_index(NAME_COLUMN);

        let mut result = Table::new(symbols.columns().to_vec());
        for row in symbols.rows() {
            if limit.is_some_and(|l| result.len() >= l) {
                break;
            }
            let matched = query.is_empty()
                || cell_contains(row, symbol_idx, query)
                || cell_contains(row, name_idx, query);
            if matched {
                result.push_row(row.clone())?;
            }
        }

        info!(
            "SearchService::search - {:?} matched {} of {} symbols",
            query,
            result.len(),
            symbols.len()
        );
        Ok(result)
    }
}
