//! History Service
//!
//! Daily OHLCV history kept in DuckDB, keyed by the formatted code so that
//! venues sharing digits (SH000001, SZ000001) stay apart. The cache is
//! refreshed when its newest bar is older than the last completed trading
//! day or its range does not reach back to the requested start.

use super::calendar_service::CalendarService;
use super::field_map::daily_history_map;
use super::symbol_service::SymbolService;
use crate::cache::freshness::{refresh_history, refresh_if_stale, HistoryFetcher};
use crate::cache::table::{Table, Value};
use crate::cache::ttl::market_now;
use crate::db::duckdb::models::DailyBar;
use crate::error::{AppError, Result};
use crate::state::ProviderState;
use chrono::{Months, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::info;

/// History result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResult {
    pub symbol: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub refreshed: bool,
    pub bars: Vec<DailyBar>,
}

fn required_f64(table: &Table, row: usize, column: &str) -> Result<f64> {
    table
        .get(row, column)
        .and_then(Value::as_f64)
        .ok_or_else(|| AppError::Validation(format!("row {}: missing {}", row, column)))
}

fn optional_f64(table: &Table, row: usize, column: &str) -> Option<f64> {
    table.get(row, column).and_then(Value::as_f64)
}

/// Convert an upstream daily table (Chinese headers) into bars
pub fn bars_from_table(raw: &Table) -> Result<Vec<DailyBar>> {
    let table = daily_history_map()?.apply(raw)?;

    (0..table.len())
        .map(|row| {
            let date = table
                .get(row, "date")
                .and_then(Value::as_date)
                .ok_or_else(|| AppError::Validation(format!("row {}: missing date", row)))?;
            let volume = table
                .get(row, "volume")
                .and_then(Value::as_i64)
                .ok_or_else(|| AppError::Validation(format!("row {}: missing volume", row)))?;

            Ok(DailyBar {
                date,
                open: required_f64(&table, row, "open")?,
                high: required_f64(&table, row, "high")?,
                low: required_f64(&table, row, "low")?,
                close: required_f64(&table, row, "close")?,
                volume,
                amount: optional_f64(&table, row, "amount"),
                change: optional_f64(&table, row, "change"),
                change_percent: optional_f64(&table, row, "change_percent"),
            })
        })
        .collect()
}

/// History service for business logic
pub struct HistoryService;

impl HistoryService {
    /// Daily bars for `symbol` in `[start_date, end_date]`.
    ///
    /// `start_date` defaults to one year before the last trading day and
    /// `end_date` to the last trading day. With `use_cache == false` the
    /// range is always refetched and written back. The fetcher receives the
    /// formatted code (`SH600036`, `HK00700`).
    pub fn get_daily_history<F>(
        state: &ProviderState,
        symbol: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        use_cache: bool,
        fetcher: &F,
    ) -> Result<HistoryResult>
    where
        F: HistoryFetcher + ?Sized,
    {
        Self::get_daily_history_at(state, symbol, start_date, end_date, use_cache, fetcher, market_now())
    }

    /// [`HistoryService::get_daily_history`] with an explicit clock
    pub fn get_daily_history_at<F>(
        state: &ProviderState,
        symbol: &str,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        use_cache: bool,
        fetcher: &F,
        now: NaiveDateTime,
    ) -> Result<HistoryResult>
    where
        F: HistoryFetcher + ?Sized,
    {
        let normalized = SymbolService::normalize(symbol)?;
        let last_trading_day = CalendarService::last_trading_day(state, normalized.market, now)?;

        let start = start_date.unwrap_or_else(|| {
            last_trading_day
                .checked_sub_months(Months::new(12))
                .unwrap_or(last_trading_day)
        });
        let end = end_date.unwrap_or(last_trading_day);
        if start > end {
            return Err(AppError::Validation(format!(
                "start date {} is after end date {}",
                start, end
            )));
        }

        info!(
            "HistoryService::get_daily_history - {} {} to {} (last trading day {})",
            normalized.formatted_code, start, end, last_trading_day
        );

        let code = normalized.formatted_code.as_str();
        let refreshed = if use_cache {
            refresh_if_stale(code, state.history.as_ref(), fetcher, start, last_trading_day)?
        } else {
            info!("Cache bypassed for {}, fetching fresh history", code);
            refresh_history(code, state.history.as_ref(), fetcher, start, last_trading_day)?;
            true
        };

        let bars = state.history.query_history(code, start, end)?;

        Ok(HistoryResult {
            symbol: normalized.formatted_code.clone(),
            start_date: start,
            end_date: end,
            refreshed,
            bars,
        })
    }
}
