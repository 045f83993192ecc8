//! Freshness of the daily history cache
//!
//! The history cache is not TTL-based: it is current when its newest bar is
//! the most recent completed trading day and its covered range reaches back
//! to the requested start.

use crate::db::duckdb::models::DailyBar;
use crate::error::Result;
use chrono::NaiveDate;
use tracing::{debug, info};

/// True only when the newest cached date equals `last_trading_day`.
/// An empty cache is stale.
pub fn is_cache_fresh(cache_max_date: Option<NaiveDate>, last_trading_day: NaiveDate) -> bool {
    cache_max_date == Some(last_trading_day)
}

/// Whether history cached from `cached_start` onwards includes `start`
pub fn covers_start(cached_start: Option<NaiveDate>, start: NaiveDate) -> bool {
    cached_start.is_some_and(|s| s <= start)
}

/// Storage side of the history cache
pub trait HistoryCache {
    fn max_cached_date(&self, symbol: &str) -> Result<Option<NaiveDate>>;

    /// Earliest date from which the cached range for `symbol` has no gaps
    fn cached_start(&self, symbol: &str) -> Result<Option<NaiveDate>>;

    /// Overwrite `[start, end]` for `symbol` with `bars`, atomically
    fn replace_range(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        bars: &[DailyBar],
    ) -> Result<usize>;
}

/// Upstream source of daily bars
pub trait HistoryFetcher {
    fn fetch(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyBar>>;
}

impl<F> HistoryFetcher for F
where
    F: Fn(&str, NaiveDate, NaiveDate) -> Result<Vec<DailyBar>>,
{
    fn fetch(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyBar>> {
        self(symbol, start, end)
    }
}

/// Refresh the cached history of `symbol` when it is stale or does not reach
/// back to `start_date`.
///
/// The refetch window starts at the earlier of `start_date` and the start of
/// the already cached range, so the cached range never develops a gap.
/// Returns whether a refresh ran. Fetch errors propagate and leave the
/// cached rows untouched.
pub fn refresh_if_stale<C, F>(
    symbol: &str,
    cache: &C,
    fetcher: &F,
    start_date: NaiveDate,
    last_trading_day: NaiveDate,
) -> Result<bool>
where
    C: HistoryCache + ?Sized,
    F: HistoryFetcher + ?Sized,
{
    let cached_start = cache.cached_start(symbol)?;
    let cached_max = cache.max_cached_date(symbol)?;

    if is_cache_fresh(cached_max, last_trading_day) && covers_start(cached_start, start_date) {
        debug!("History for {} is current through {}", symbol, last_trading_day);
        return Ok(false);
    }

    info!(
        "History for {} is stale (cached {:?} to {:?}, wanted {} to {})",
        symbol, cached_start, cached_max, start_date, last_trading_day
    );
    refetch_from(symbol, cache, fetcher, earliest(cached_start, start_date), last_trading_day)?;
    Ok(true)
}

/// Unconditionally refetch `symbol` through `last_trading_day`, keeping the
/// cached range contiguous. Returns the number of bars written.
pub fn refresh_history<C, F>(
    symbol: &str,
    cache: &C,
    fetcher: &F,
    start_date: NaiveDate,
    last_trading_day: NaiveDate,
) -> Result<usize>
where
    C: HistoryCache + ?Sized,
    F: HistoryFetcher + ?Sized,
{
    let cached_start = cache.cached_start(symbol)?;
    refetch_from(symbol, cache, fetcher, earliest(cached_start, start_date), last_trading_day)
}

fn earliest(cached_start: Option<NaiveDate>, start_date: NaiveDate) -> NaiveDate {
    cached_start.map_or(start_date, |s| s.min(start_date))
}

fn refetch_from<C, F>(
    symbol: &str,
    cache: &C,
    fetcher: &F,
    from: NaiveDate,
    last_trading_day: NaiveDate,
) -> Result<usize>
where
    C: HistoryCache + ?Sized,
    F: HistoryFetcher + ?Sized,
{
    let bars = fetcher.fetch(symbol, from, last_trading_day)?;
    let written = cache.replace_range(symbol, from, last_trading_day, &bars)?;
    info!("Stored {} bars for {} from {}", written, symbol, from);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::duckdb::DuckDb;
    use crate::error::AppError;
    use std::cell::{Cell, RefCell};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn bar(d: NaiveDate) -> DailyBar {
        DailyBar {
            date: d,
            open: 10.0,
            high: 10.5,
            low: 9.8,
            close: 10.2,
            volume: 1_000,
            amount: None,
            change: None,
            change_percent: None,
        }
    }

    /// One bar per weekday in range
    fn weekday_bars(start: NaiveDate, end: NaiveDate) -> Vec<DailyBar> {
        use chrono::{Datelike, Weekday};
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
            .map(bar)
            .collect()
    }

    #[test]
    fn test_freshness_is_exact_equality() {
        let ltd = date(2024, 6, 7);
        assert!(is_cache_fresh(Some(ltd), ltd));
        assert!(!is_cache_fresh(Some(date(2024, 6, 6)), ltd));
        assert!(!is_cache_fresh(Some(date(2024, 6, 10)), ltd));
        assert!(!is_cache_fresh(None, ltd));
    }

    #[test]
    fn test_covers_start() {
        assert!(covers_start(Some(date(2024, 1, 2)), date(2024, 1, 2)));
        assert!(covers_start(Some(date(2024, 1, 2)), date(2024, 6, 3)));
        assert!(!covers_start(Some(date(2024, 6, 3)), date(2024, 1, 2)));
        assert!(!covers_start(None, date(2024, 1, 2)));
    }

    #[test]
    fn test_stale_cache_is_refreshed_once() {
        let db = DuckDb::in_memory().unwrap();
        let calls = Cell::new(0);
        let fetcher = |_: &str, start: NaiveDate, end: NaiveDate| -> Result<Vec<DailyBar>> {
            calls.set(calls.get() + 1);
            Ok(weekday_bars(start, end))
        };
        let start = date(2024, 6, 3);
        let ltd = date(2024, 6, 7);

        assert!(refresh_if_stale("600036", &db, &fetcher, start, ltd).unwrap());
        assert_eq!(db.max_cached_date("600036").unwrap(), Some(ltd));

        assert!(!refresh_if_stale("600036", &db, &fetcher, start, ltd).unwrap());
        assert_eq!(calls.get(), 1);

        // A new session closes
        let next = date(2024, 6, 11);
        assert!(refresh_if_stale("600036", &db, &fetcher, start, next).unwrap());
        assert_eq!(calls.get(), 2);
        assert_eq!(db.max_cached_date("600036").unwrap(), Some(next));
    }

    #[test]
    fn test_stale_refresh_extends_from_cached_start() {
        let db = DuckDb::in_memory().unwrap();
        let windows = RefCell::new(Vec::new());
        let fetcher = |_: &str, start: NaiveDate, end: NaiveDate| -> Result<Vec<DailyBar>> {
            windows.borrow_mut().push((start, end));
            Ok(weekday_bars(start, end))
        };

        // January cached, then a narrow request once June has closed
        assert!(refresh_if_stale("SH600036", &db, &fetcher, date(2024, 1, 2), date(2024, 1, 31)).unwrap());
        assert!(refresh_if_stale("SH600036", &db, &fetcher, date(2024, 6, 3), date(2024, 6, 7)).unwrap());
        assert_eq!(windows.borrow()[1], (date(2024, 1, 2), date(2024, 6, 7)));

        // The wide request is now served without a gap
        assert!(!refresh_if_stale("SH600036", &db, &fetcher, date(2024, 1, 2), date(2024, 6, 7)).unwrap());
        assert_eq!(windows.borrow().len(), 2);
        let bars = db
            .query_history("SH600036", date(2024, 1, 2), date(2024, 6, 7))
            .unwrap();
        assert_eq!(bars, weekday_bars(date(2024, 1, 2), date(2024, 6, 7)));
    }

    #[test]
    fn test_earlier_start_than_cached_is_refetched() {
        let db = DuckDb::in_memory().unwrap();
        let windows = RefCell::new(Vec::new());
        let fetcher = |_: &str, start: NaiveDate, end: NaiveDate| -> Result<Vec<DailyBar>> {
            windows.borrow_mut().push((start, end));
            Ok(weekday_bars(start, end))
        };
        let ltd = date(2024, 6, 7);

        assert!(refresh_if_stale("SZ000001", &db, &fetcher, date(2024, 6, 3), ltd).unwrap());
        assert!(!refresh_if_stale("SZ000001", &db, &fetcher, date(2024, 6, 5), ltd).unwrap());

        // Fresh by date, but the range does not reach back far enough
        assert!(refresh_if_stale("SZ000001", &db, &fetcher, date(2024, 5, 1), ltd).unwrap());
        assert_eq!(windows.borrow().last(), Some(&(date(2024, 5, 1), ltd)));
        assert_eq!(db.cached_start("SZ000001").unwrap(), Some(date(2024, 5, 1)));
    }

    #[test]
    fn test_forced_refresh_keeps_range_contiguous() {
        let db = DuckDb::in_memory().unwrap();
        let windows = RefCell::new(Vec::new());
        let fetcher = |_: &str, start: NaiveDate, end: NaiveDate| -> Result<Vec<DailyBar>> {
            windows.borrow_mut().push((start, end));
            Ok(weekday_bars(start, end))
        };

        refresh_if_stale("HK00700", &db, &fetcher, date(2024, 1, 2), date(2024, 1, 31)).unwrap();
        let written = refresh_history("HK00700", &db, &fetcher, date(2024, 6, 3), date(2024, 6, 7)).unwrap();
        assert_eq!(windows.borrow()[1], (date(2024, 1, 2), date(2024, 6, 7)));
        assert_eq!(written, weekday_bars(date(2024, 1, 2), date(2024, 6, 7)).len());
    }

    #[test]
    fn test_fetch_error_leaves_cache_untouched() {
        let db = DuckDb::in_memory().unwrap();
        db.upsert_bars("000001", &[bar(date(2024, 6, 6))]).unwrap();
        let failing = |_: &str, _: NaiveDate, _: NaiveDate| -> Result<Vec<DailyBar>> {
            Err(AppError::Compute("upstream timeout".to_string()))
        };

        let result = refresh_if_stale("000001", &db, &failing, date(2024, 6, 3), date(2024, 6, 7));
        assert!(matches!(result, Err(AppError::Compute(_))));
        assert_eq!(db.max_cached_date("000001").unwrap(), Some(date(2024, 6, 6)));
    }
}
