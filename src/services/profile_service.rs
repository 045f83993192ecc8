//! Profile Service
//!
//! Company profiles (legal names, addresses, listing dates). A profile is
//! fetched once per formatted code and kept until the caller bypasses the
//! cache.

use super::symbol_service::{Market, SymbolService};
use crate::cache::ttl::market_now;
use crate::cache::{Backing, ComputeFn, ComputeRequest, Table, TtlPolicy, Value};
use crate::error::Result;
use crate::state::ProviderState;
use tracing::{info, warn};

pub const PROFILE_NAMESPACE: &str = "equity_info";

const PROFILE_PERIOD: &str = "profile";
const SYMBOL_COLUMN: &str = "symbol";

/// Put the formatted code in the `symbol` column of every row
fn with_symbol_column(table: Table, formatted_code: &str) -> Result<Table> {
    let (columns, rows) = table.into_parts();

    match columns.iter().position(|c| c == SYMBOL_COLUMN) {
        Some(idx) => {
            let rows = rows
                .into_iter()
                .map(|mut row| {
                    if let Some(cell) = row.get_mut(idx) {
                        *cell = Value::from(formatted_code);
                    }
                    row
                })
                .collect();
            Table::from_rows(columns, rows)
        }
        None => {
            let columns = std::iter::once(SYMBOL_COLUMN.to_string()).chain(columns).collect();
            let rows = rows
                .into_iter()
                .map(|row| std::iter::once(Value::from(formatted_code)).chain(row).collect())
                .collect();
            Table::from_rows(columns, rows)
        }
    }
}

/// Profile Service
pub struct ProfileService;

impl ProfileService {
    /// Profile rows for `symbol`.
    ///
    /// The fetcher receives the formatted code as `symbol` with `base_code`
    /// and `market` params. Markets without company profiles give an empty
    /// table.
    pub fn get_profile<F>(state: &ProviderState, symbol: &str, use_cache: bool, fetch: &F) -> Result<Table>
    where
        F: ComputeFn + ?Sized,
    {
        let normalized = SymbolService::normalize(symbol)?;
        if !(normalized.market.is_a_share() || normalized.market == Market::HK) {
            warn!("No company profile for {}", normalized.formatted_code);
            return Ok(Table::new([SYMBOL_COLUMN]));
        }

        info!("ProfileService::get_profile - {}", normalized.formatted_code);

        let request = ComputeRequest::new(normalized.formatted_code.as_str(), PROFILE_PERIOD)
            .with_param("base_code", normalized.base_code.as_str())
            .with_param("market", normalized.market.as_str());

        let formatted_code = normalized.formatted_code.as_str();
        let compute = |req: &ComputeRequest| -> Result<Table> {
            with_symbol_column(fetch.compute(req)?, formatted_code)
        };

        let store = state.store(PROFILE_NAMESPACE, Backing::Blob)?;
        store.load_with_policy(&request, use_cache, &TtlPolicy::Never, &compute, market_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::error::AppError;
    use std::cell::Cell;
    use tempfile::{tempdir, TempDir};

    fn state() -> (ProviderState, TempDir) {
        let dir = tempdir().unwrap();
        let state = ProviderState::new(CacheConfig::default().with_cache_dir(dir.path())).unwrap();
        (state, dir)
    }

    fn profile(req: &ComputeRequest) -> Result<Table> {
        let mut table = Table::new(["org_name_cn", "listed_date", "currency"]);
        let (name, currency) = match req.param("market") {
            Some("HK") => ("腾讯控股有限公司", "HKD"),
            _ => ("赛力斯集团股份有限公司", "CNY"),
        };
        table.push_row(vec![name.into(), "2016-06-15".into(), currency.into()])?;
        Ok(table)
    }

    #[test]
    fn test_profile_is_fetched_once() {
        let (state, _dir) = state();
        let calls = Cell::new(0);
        let fetch = |req: &ComputeRequest| {
            calls.set(calls.get() + 1);
            assert_eq!(req.param("base_code"), Some("601127"));
            profile(req)
        };

        let first = ProfileService::get_profile(&state, "601127.SH", true, &fetch).unwrap();
        let second = ProfileService::get_profile(&state, "SH601127", true, &fetch).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(first, second);
        assert_eq!(first.columns()[0], "symbol");
        assert_eq!(first.get(0, "symbol"), Some(&Value::Text("SH601127".to_string())));

        // Never-expiring entries survive a sweep
        state.clear_all_expired().unwrap();
        ProfileService::get_profile(&state, "601127", true, &fetch).unwrap();
        assert_eq!(calls.get(), 1);

        ProfileService::get_profile(&state, "601127", false, &fetch).unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_upstream_symbol_is_replaced_by_formatted_code() {
        let (state, _dir) = state();
        let fetch = |_: &ComputeRequest| -> Result<Table> {
            let mut table = Table::new(["org_name_cn", "symbol"]);
            table.push_row(vec!["腾讯控股有限公司".into(), "700".into()])?;
            Ok(table)
        };

        let table = ProfileService::get_profile(&state, "00700", true, &fetch).unwrap();
        assert_eq!(table.columns(), ["org_name_cn", "symbol"]);
        assert_eq!(table.get(0, "symbol"), Some(&Value::Text("HK00700".to_string())));
    }

    #[test]
    fn test_fund_codes_have_no_profile() {
        let (state, _dir) = state();
        let fetch = |_: &ComputeRequest| -> Result<Table> { panic!("must not be called") };
        let table = ProfileService::get_profile(&state, "110011.OF", true, &fetch).unwrap();
        assert!(table.is_empty());
        assert!(table.has_column("symbol"));
    }

    #[test]
    fn test_failed_fetch_is_not_cached() {
        let (state, _dir) = state();
        let failing = |_: &ComputeRequest| -> Result<Table> {
            Err(AppError::Compute("profile endpoint unavailable".to_string()))
        };
        let result = ProfileService::get_profile(&state, "600036", true, &failing);
        assert!(matches!(result, Err(AppError::Compute(_))));

        let table = ProfileService::get_profile(&state, "600036", true, &profile).unwrap();
        assert_eq!(table.get(0, "symbol"), Some(&Value::Text("SH600036".to_string())));
    }
}
