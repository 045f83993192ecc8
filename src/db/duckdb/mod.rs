//! DuckDB database module for cached daily history and structured cache tables

pub mod models;
mod migrations;
mod table_cache;

pub use table_cache::TableCache;

use crate::cache::freshness::HistoryCache;
use crate::error::{AppError, Result};
use chrono::NaiveDate;
use duckdb::Connection;
use models::DailyBar;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::Path;

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|e| AppError::Deserialization(format!("bad date {:?}: {}", s, e)))
}

fn format_date(d: NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

/// DuckDB database wrapper
pub struct DuckDb {
    conn: Mutex<Connection>,
}

impl DuckDb {
    /// Create new DuckDB connection
    pub fn new(path: &Path) -> Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };

        // Run migrations
        db.run_migrations()?;

        Ok(db)
    }

    /// Run database migrations
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock();
        migrations::run_migrations(&conn)
    }

    /// Query cached bars for `symbol` within `[from, to]`, oldest first
    pub fn query_history(&self, symbol: &str, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailyBar>> {
        let conn = self.conn.lock();

        let mut stmt = conn.prepare(
            "SELECT CAST(trade_date AS VARCHAR), open, high, low, close, volume,
                    amount, change, change_percent
             FROM daily_bars
             WHERE symbol = ?
               AND trade_date >= CAST(? AS DATE) AND trade_date <= CAST(? AS DATE)
             ORDER BY trade_date ASC",
        )?;

        let rows = stmt
            .query_map(
                duckdb::params![symbol, format_date(from), format_date(to)],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, f64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, Option<f64>>(6)?,
                        row.get::<_, Option<f64>>(7)?,
                        row.get::<_, Option<f64>>(8)?,
                    ))
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(date, open, high, low, close, volume, amount, change, change_percent)| {
                    Ok(DailyBar {
                        date: parse_date(&date)?,
                        open,
                        high,
                        low,
                        close,
                        volume,
                        amount,
                        change,
                        change_percent,
                    })
                },
            )
            .collect()
    }

    /// Insert bars, overwriting any bar already cached for the same date
    pub fn upsert_bars(&self, symbol: &str, bars: &[DailyBar]) -> Result<usize> {
        let mut conn = self.conn.lock();

        let tx = conn.transaction()?;
        let count = insert_bars(&tx, symbol, bars)?;
        tx.commit()?;

        Ok(count)
    }

    /// Overwrite the cached range `[from, to]` for `symbol` with `bars`.
    ///
    /// Runs as one transaction: on error the previous rows are kept. The
    /// range start is recorded as the beginning of the covered history.
    pub fn replace_history(
        &self,
        symbol: &str,
        from: NaiveDate,
        to: NaiveDate,
        bars: &[DailyBar],
    ) -> Result<usize> {
        let mut conn = self.conn.lock();

        let tx = conn.transaction()?;

        // Dates being rewritten are upserted in place, not deleted first
        let incoming: HashSet<NaiveDate> = bars.iter().map(|b| b.date).collect();
        let cached: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT CAST(trade_date AS VARCHAR) FROM daily_bars
                 WHERE symbol = ?
                   AND trade_date >= CAST(? AS DATE) AND trade_date <= CAST(? AS DATE)",
            )?;
            let rows = stmt
                .query_map(duckdb::params![symbol, format_date(from), format_date(to)], |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let mut removed = 0;
        for day in cached {
            if incoming.contains(&parse_date(&day)?) {
                continue;
            }
            removed += tx.execute(
                "DELETE FROM daily_bars WHERE symbol = ? AND trade_date = CAST(? AS DATE)",
                duckdb::params![symbol, day],
            )?;
        }

        let count = insert_bars(&tx, symbol, bars)?;
        tx.execute(
            "INSERT INTO history_coverage (symbol, start_date) VALUES (?, CAST(? AS DATE))
             ON CONFLICT (symbol) DO UPDATE SET start_date = LEAST(start_date, excluded.start_date)",
            duckdb::params![symbol, format_date(from)],
        )?;
        tx.commit()?;

        tracing::debug!(
            "Dropped {} and wrote {} cached bars for {} in {}..={}",
            removed,
            count,
            symbol,
            from,
            to
        );
        Ok(count)
    }

    /// First date from which the cached history of `symbol` is complete
    pub fn cached_start(&self, symbol: &str) -> Result<Option<NaiveDate>> {
        let conn = self.conn.lock();
        let start: Option<String> = conn.query_row(
            "SELECT CAST(MIN(start_date) AS VARCHAR) FROM history_coverage WHERE symbol = ?",
            [symbol],
            |row| row.get(0),
        )?;
        start.as_deref().map(parse_date).transpose()
    }

    /// Latest cached trading date for `symbol`
    pub fn max_cached_date(&self, symbol: &str) -> Result<Option<NaiveDate>> {
        let conn = self.conn.lock();
        let max: Option<String> = conn.query_row(
            "SELECT CAST(MAX(trade_date) AS VARCHAR) FROM daily_bars WHERE symbol = ?",
            [symbol],
            |row| row.get(0),
        )?;
        max.as_deref().map(parse_date).transpose()
    }

    pub fn delete_history(&self, symbol: &str) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let rows = tx.execute("DELETE FROM daily_bars WHERE symbol = ?", [symbol])?;
        tx.execute("DELETE FROM history_coverage WHERE symbol = ?", [symbol])?;
        tx.commit()?;
        Ok(rows)
    }
}

fn insert_bars(conn: &Connection, symbol: &str, bars: &[DailyBar]) -> Result<usize> {
    let mut stmt = conn.prepare(
        "INSERT INTO daily_bars (symbol, trade_date, open, high, low, close, volume, amount, change, change_percent)
         VALUES (?, CAST(? AS DATE), ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (symbol, trade_date) DO UPDATE SET
           open = excluded.open, high = excluded.high, low = excluded.low,
           close = excluded.close, volume = excluded.volume, amount = excluded.amount,
           change = excluded.change, change_percent = excluded.change_percent",
    )?;

    let mut count = 0;
    for bar in bars {
        if ![bar.open, bar.high, bar.low, bar.close].iter().all(|p| p.is_finite()) {
            return Err(AppError::Validation(format!(
                "{} {}: non-finite price",
                symbol, bar.date
            )));
        }
        stmt.execute(duckdb::params![
            symbol,
            format_date(bar.date),
            bar.open,
            bar.high,
            bar.low,
            bar.close,
            bar.volume,
            bar.amount,
            bar.change,
            bar.change_percent,
        ])?;
        count += 1;
    }

    Ok(count)
}

impl HistoryCache for DuckDb {
    fn max_cached_date(&self, symbol: &str) -> Result<Option<NaiveDate>> {
        DuckDb::max_cached_date(self, symbol)
    }

    fn cached_start(&self, symbol: &str) -> Result<Option<NaiveDate>> {
        DuckDb::cached_start(self, symbol)
    }

    fn replace_range(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        bars: &[DailyBar],
    ) -> Result<usize> {
        self.replace_history(symbol, start, end, bars)
    }
}
