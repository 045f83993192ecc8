//! Quote Service
//!
//! Whole-market spot snapshots, cached one per exchange group for an hour,
//! and single-symbol quotes filtered out of them.

use super::field_map::quote_snapshot_map;
use super::symbol_service::{Market, SymbolService};
use crate::cache::{Backing, ComputeFn, ComputeRequest, Table, Value};
use crate::error::{AppError, Result};
use crate::state::ProviderState;
use tracing::{info, warn};

pub const QUOTE_NAMESPACE: &str = "equity_quote";

/// Upstream code column in a snapshot
const CODE_COLUMN: &str = "代码";

/// Snapshot key for a market; SH and SZ share one A-share snapshot
pub fn primary_key(market: Market) -> Result<&'static str> {
    match market {
        Market::HK => Ok("equity_quote_HK"),
        Market::SH | Market::SZ => Ok("equity_quote_SH"),
        Market::BJ => Ok("equity_quote_BJ"),
        other => Err(AppError::Validation(format!("Unsupported market: {}", other))),
    }
}

/// Request handed to the snapshot fetcher; `market` names the exchange group
pub fn snapshot_request(market: Market) -> Result<ComputeRequest> {
    Ok(ComputeRequest::new(primary_key(market)?, "spot").with_param("market", market.as_str()))
}

/// Quote Service
pub struct QuoteService;

impl QuoteService {
    /// Raw snapshot for the exchange group of `market`
    pub fn load_snapshot<F>(
        state: &ProviderState,
        market: Market,
        use_cache: bool,
        fetch: &F,
    ) -> Result<Table>
    where
        F: ComputeFn + ?Sized,
    {
        let request = snapshot_request(market)?;
        let store = state.store(QUOTE_NAMESPACE, Backing::Blob)?;
        store.load_cached_data(&request, use_cache, fetch)
    }

    /// Quote rows for one symbol, renamed to host field names.
    /// Empty when the snapshot has no row for the code.
    pub fn get_quote<F>(state: &ProviderState, symbol: &str, use_cache: bool, fetch: &F) -> Result<Table>
    where
        F: ComputeFn + ?Sized,
    {
        let normalized = SymbolService::normalize(symbol)?;
        info!("QuoteService::get_quote - {} ({})", normalized.formatted_code, normalized.market);

        let snapshot = Self::load_snapshot(state, normalized.market, use_cache, fetch)?;
        let Some(code_idx) = snapshot.column_index(CODE_COLUMN) else {
            warn!("Snapshot for {} has no {} column", normalized.market, CODE_COLUMN);
            return Ok(Table::new(snapshot.columns().to_vec()));
        };

        let mut matching = Table::new(snapshot.columns().to_vec());
        for row in snapshot.rows() {
            let is_match = match &row[code_idx] {
                Value::Text(code) => code.trim() == normalized.base_code,
                _ => false,
            };
            if is_match {
                matching.push_row(row.clone())?;
            }
        }

        quote_snapshot_map()?.apply(&matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use std::cell::Cell;
    use tempfile::tempdir;

    fn snapshot(req: &ComputeRequest) -> Result<Table> {
        let mut table = Table::new(["代码", "名称", "最新价", "成交量", "振幅"]);
        match req.param("market") {
            Some("HK") => {
                table.push_row(vec!["00700".into(), "腾讯控股".into(), "370.2".into(), 1.5e7.into(), 1.2.into()])?;
            }
            _ => {
                table.push_row(vec!["600036".into(), "招商银行".into(), 35.12.into(), 812_345i64.into(), 1.1.into()])?;
                table.push_row(vec!["000001".into(), "平安银行".into(), 10.5.into(), 1_000_000i64.into(), 0.9.into()])?;
            }
        }
        Ok(table)
    }

    fn state() -> (ProviderState, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let state = ProviderState::new(CacheConfig::default().with_cache_dir(dir.path())).unwrap();
        (state, dir)
    }

    #[test]
    fn test_primary_keys() {
        assert_eq!(primary_key(Market::HK).unwrap(), "equity_quote_HK");
        assert_eq!(primary_key(Market::SH).unwrap(), "equity_quote_SH");
        assert_eq!(primary_key(Market::SZ).unwrap(), "equity_quote_SH");
        assert_eq!(primary_key(Market::BJ).unwrap(), "equity_quote_BJ");
        assert!(primary_key(Market::OF).is_err());
        assert!(primary_key(Market::Other).is_err());
    }

    #[test]
    fn test_sh_and_sz_share_one_snapshot() {
        let (state, _dir) = state();
        let calls = Cell::new(0);
        let fetch = |req: &ComputeRequest| {
            calls.set(calls.get() + 1);
            snapshot(req)
        };

        let sh = QuoteService::get_quote(&state, "600036.SS", true, &fetch).unwrap();
        let sz = QuoteService::get_quote(&state, "SZ000001", true, &fetch).unwrap();
        assert_eq!(calls.get(), 1);

        assert_eq!(sh.len(), 1);
        assert_eq!(sh.get(0, "name"), Some(&Value::Text("招商银行".to_string())));
        assert_eq!(sh.get(0, "last_price"), Some(&Value::Float(35.12)));
        assert_eq!(sz.get(0, "symbol"), Some(&Value::Text("000001".to_string())));
    }

    #[test]
    fn test_hk_snapshot_is_separate() {
        let (state, _dir) = state();
        let calls = Cell::new(0);
        let fetch = |req: &ComputeRequest| {
            calls.set(calls.get() + 1);
            snapshot(req)
        };

        let hk = QuoteService::get_quote(&state, "00700", true, &fetch).unwrap();
        QuoteService::get_quote(&state, "600036", true, &fetch).unwrap();
        assert_eq!(calls.get(), 2);
        assert_eq!(hk.get(0, "last_price"), Some(&Value::Float(370.2)));
        assert_eq!(hk.get(0, "volume"), Some(&Value::Int(15_000_000)));
    }

    #[test]
    fn test_unknown_code_gives_empty_table() {
        let (state, _dir) = state();
        let quote = QuoteService::get_quote(&state, "601398", true, &snapshot).unwrap();
        assert!(quote.is_empty());
        assert!(quote.has_column("last_price"));
    }

    #[test]
    fn test_unsupported_market_rejected() {
        let (state, _dir) = state();
        let result = QuoteService::get_quote(&state, "110011.OF", true, &snapshot);
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
