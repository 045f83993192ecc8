//! Fundamentals Service
//!
//! Financial statements, key metrics, peer comparisons and fund holdings.
//! Each kind lives in its own cache namespace; statement periods expire at
//! the next reporting boundary.

use super::symbol_service::{Market, SymbolService};
use crate::cache::ttl::market_now;
use crate::cache::{Backing, ComputeFn, ComputeRequest, Table, TtlPolicy};
use crate::error::{AppError, Result};
use crate::state::ProviderState;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

/// Fund holdings are refreshed every two days
const FUND_HOLDINGS_TTL_SECS: i64 = 2 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Period {
    Annual,
    Quarter,
}

impl Period {
    pub fn as_str(&self) -> &'static str {
        match self {
            Period::Annual => "annual",
            Period::Quarter => "quarter",
        }
    }

    /// Expiry at the start of the next reporting period
    pub fn policy(&self) -> TtlPolicy {
        match self {
            Period::Annual => TtlPolicy::NextYearStart,
            Period::Quarter => TtlPolicy::NextQuarterStart,
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "annual" => Ok(Period::Annual),
            "quarter" => Ok(Period::Quarter),
            other => Err(AppError::Validation(format!("Unknown period: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundamentalsKind {
    BalanceSheet,
    IncomeStatement,
    CashFlow,
    KeyMetrics,
    CompareCompanyFacts,
    EtfFundHoldings,
}

impl FundamentalsKind {
    pub fn namespace(&self) -> &'static str {
        match self {
            FundamentalsKind::BalanceSheet => "balance_sheet",
            FundamentalsKind::IncomeStatement => "income_statement",
            FundamentalsKind::CashFlow => "cash_flow",
            FundamentalsKind::KeyMetrics => "key_metrics",
            FundamentalsKind::CompareCompanyFacts => "compare_company_facts",
            FundamentalsKind::EtfFundHoldings => "etf_fund_holdings",
        }
    }

    /// Statements are wide typed tables; the rest are stored as blobs
    pub fn backing(&self) -> Backing {
        match self {
            FundamentalsKind::BalanceSheet
            | FundamentalsKind::IncomeStatement
            | FundamentalsKind::CashFlow => Backing::Table,
            _ => Backing::Blob,
        }
    }

    pub fn policy(&self, period: Period) -> TtlPolicy {
        match self {
            FundamentalsKind::EtfFundHoldings => TtlPolicy::Constant {
                seconds: FUND_HOLDINGS_TTL_SECS,
            },
            _ => period.policy(),
        }
    }

    /// Columns a usable payload must carry
    pub fn required_columns(&self) -> &'static [&'static str] {
        match self {
            FundamentalsKind::KeyMetrics => &["证券代码"],
            _ => &[],
        }
    }

    pub fn supports(&self, market: Market) -> bool {
        match self {
            // Fund codes do not follow the exchange prefix rules
            FundamentalsKind::EtfFundHoldings => true,
            _ => market.is_a_share() || market == Market::HK,
        }
    }
}

impl fmt::Display for FundamentalsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.namespace())
    }
}

fn missing_columns(kind: FundamentalsKind, table: &Table) -> Vec<&'static str> {
    kind.required_columns()
        .iter()
        .copied()
        .filter(|c| !table.has_column(c))
        .collect()
}

/// Fundamentals Service
pub struct FundamentalsService;

impl FundamentalsService {
    /// Cached fundamentals for `symbol`.
    ///
    /// Markets the upstream source does not cover give an empty table. The
    /// compute function receives the base code as `symbol`, plus `market` and
    /// `formatted_code` params.
    pub fn load<F>(
        state: &ProviderState,
        kind: FundamentalsKind,
        symbol: &str,
        period: Period,
        use_cache: bool,
        compute: &F,
    ) -> Result<Table>
    where
        F: ComputeFn + ?Sized,
    {
        let normalized = SymbolService::normalize(symbol)?;
        if !kind.supports(normalized.market) {
            warn!(
                "{} is only available for A-share and HK listings, not {}",
                kind, normalized.formatted_code
            );
            return Ok(Table::empty());
        }

        info!(
            "FundamentalsService::load - {} {} {} (use_cache={})",
            kind, normalized.formatted_code, period, use_cache
        );

        let store = state.store(kind.namespace(), kind.backing())?;
        let policy = kind.policy(period);
        let request = ComputeRequest::new(normalized.base_code.as_str(), period.as_str())
            .with_param("market", normalized.market.as_str())
            .with_param("formatted_code", normalized.formatted_code.as_str());

        let now = market_now();
        let table = store.load_with_policy(&request, use_cache, &policy, compute, now)?;

        let missing = missing_columns(kind, &table);
        if missing.is_empty() || !use_cache {
            return Ok(table);
        }

        warn!(
            "Cached {} for {} missing {:?}; refreshing cache",
            kind, request, missing
        );
        let table = store.load_with_policy(&request, false, &policy, compute, now)?;
        let missing = missing_columns(kind, &table);
        if !missing.is_empty() {
            warn!("Fresh {} for {} still missing {:?}", kind, request, missing);
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Value;
    use crate::config::CacheConfig;
    use std::cell::Cell;
    use tempfile::{tempdir, TempDir};

    fn state() -> (ProviderState, TempDir) {
        let dir = tempdir().unwrap();
        let state = ProviderState::new(CacheConfig::default().with_cache_dir(dir.path())).unwrap();
        (state, dir)
    }

    fn statement(req: &ComputeRequest) -> Result<Table> {
        let mut table = Table::new(["SECURITY_CODE", "REPORT_TYPE", "TOTAL_ASSETS"]);
        table.push_row(vec![
            Value::from(req.symbol.as_str()),
            Value::from(req.period.as_str()),
            Value::Float(1.2e12),
        ])?;
        Ok(table)
    }

    #[test]
    fn test_period_policies() {
        assert_eq!(Period::Annual.policy(), TtlPolicy::NextYearStart);
        assert_eq!(Period::Quarter.policy(), TtlPolicy::NextQuarterStart);
        assert_eq!("Quarter".parse::<Period>().unwrap(), Period::Quarter);
        assert!("monthly".parse::<Period>().is_err());
        assert_eq!(
            FundamentalsKind::EtfFundHoldings.policy(Period::Annual),
            TtlPolicy::Constant { seconds: 172_800 }
        );
    }

    #[test]
    fn test_statement_cached_per_period() {
        let (state, dir) = state();
        let calls = Cell::new(0);
        let compute = |req: &ComputeRequest| {
            calls.set(calls.get() + 1);
            assert_eq!(req.param("market"), Some("SH"));
            assert_eq!(req.param("formatted_code"), Some("SH600036"));
            statement(req)
        };

        let kind = FundamentalsKind::BalanceSheet;
        let annual = FundamentalsService::load(&state, kind, "600036.SH", Period::Annual, true, &compute).unwrap();
        FundamentalsService::load(&state, kind, "SH600036", Period::Annual, true, &compute).unwrap();
        assert_eq!(calls.get(), 1);

        let quarter = FundamentalsService::load(&state, kind, "600036", Period::Quarter, true, &compute).unwrap();
        assert_eq!(calls.get(), 2);
        assert_eq!(annual.get(0, "REPORT_TYPE"), Some(&Value::Text("annual".to_string())));
        assert_eq!(quarter.get(0, "REPORT_TYPE"), Some(&Value::Text("quarter".to_string())));
        assert!(dir.path().join("balance_sheet.duckdb").exists());
    }

    #[test]
    fn test_unsupported_market_gives_empty_table() {
        let (state, _dir) = state();
        let compute = |_: &ComputeRequest| -> Result<Table> { panic!("must not be called") };
        let table = FundamentalsService::load(
            &state,
            FundamentalsKind::CashFlow,
            "110011.OF",
            Period::Annual,
            true,
            &compute,
        )
        .unwrap();
        assert!(table.is_empty());
        assert!(table.columns().is_empty());
    }

    #[test]
    fn test_key_metrics_missing_required_column_is_refreshed() {
        let (state, dir) = state();
        let request = ComputeRequest::new("600036", "quarter")
            .with_param("market", "SH")
            .with_param("formatted_code", "SH600036");

        // Entry written by an older version without the code column
        {
            let store = state.store("key_metrics", Backing::Blob).unwrap();
            let mut stale = Table::new(["item", "value"]);
            stale.push_row(vec!["市盈率(TTM)".into(), 6.1.into()]).unwrap();
            store
                .put(&request.cache_key(), stale, &TtlPolicy::NextQuarterStart, market_now())
                .unwrap();
        }

        let calls = Cell::new(0);
        let compute = |req: &ComputeRequest| -> Result<Table> {
            calls.set(calls.get() + 1);
            let mut table = Table::new(["证券代码", "市盈率(TTM)"]);
            table.push_row(vec![Value::from(req.symbol.as_str()), 6.2.into()])?;
            Ok(table)
        };

        let table = FundamentalsService::load(
            &state,
            FundamentalsKind::KeyMetrics,
            "600036",
            Period::Quarter,
            true,
            &compute,
        )
        .unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(table.get(0, "证券代码"), Some(&Value::Text("600036".to_string())));
        assert!(dir.path().join("key_metrics.db").exists());

        // The repaired entry is now served from cache
        FundamentalsService::load(&state, FundamentalsKind::KeyMetrics, "600036", Period::Quarter, true, &compute)
            .unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_compute_error_propagates() {
        let (state, _dir) = state();
        let failing = |_: &ComputeRequest| -> Result<Table> {
            Err(AppError::Compute("rate limited".to_string()))
        };
        let result = FundamentalsService::load(
            &state,
            FundamentalsKind::IncomeStatement,
            "00700",
            Period::Annual,
            true,
            &failing,
        );
        assert!(matches!(result, Err(AppError::Compute(_))));
    }
}
