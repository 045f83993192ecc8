//! Market holiday management
//!
//! Exchange closures feed the last-trading-day oracle used by the
//! history cache freshness check.

use super::models::{CreateHolidayRequest, MarketHoliday};
use crate::error::{AppError, Result};
use chrono::{Datelike, NaiveDate};
use rusqlite::{params, Connection};
use std::collections::HashSet;

const DATE_FORMAT: &str = "%Y-%m-%d";

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|e| AppError::Internal(format!("bad holiday date {:?}: {}", s, e)))
}

/// Record a market holiday.
///
/// A date that is already recorded gains the requested markets; an existing
/// description is kept.
pub fn create_holiday(conn: &Connection, req: &CreateHolidayRequest) -> Result<MarketHoliday> {
    if req.markets.is_empty() {
        return Err(AppError::Validation(
            "holiday must apply to at least one market".to_string(),
        ));
    }

    let date = req.date.format(DATE_FORMAT).to_string();
    let year = req.date.year();

    let tx = conn.unchecked_transaction()?;

    tx.execute(
        "INSERT INTO market_holidays (date, description, year) VALUES (?1, ?2, ?3)
         ON CONFLICT(date) DO UPDATE SET
           description = COALESCE(market_holidays.description, excluded.description)",
        params![date, req.description, year],
    )?;

    let (id, description): (i64, Option<String>) = tx.query_row(
        "SELECT id, description FROM market_holidays WHERE date = ?1",
        params![date],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    for market in &req.markets {
        tx.execute(
            "INSERT OR IGNORE INTO market_holiday_markets (holiday_id, market) VALUES (?1, ?2)",
            params![id, market],
        )?;
    }

    let markets = get_holiday_markets(&tx, id)?;
    tx.commit()?;

    tracing::info!("Recorded market holiday: {} ({}) for {:?}", date, id, markets);

    Ok(MarketHoliday {
        id,
        date: req.date,
        description,
        year,
        markets,
    })
}

/// Get all holidays for a year
pub fn get_holidays_by_year(conn: &Connection, year: i32) -> Result<Vec<MarketHoliday>> {
    let mut stmt = conn.prepare(
        "SELECT id, date, description, year FROM market_holidays WHERE year = ?1 ORDER BY date",
    )?;

    let holidays: Vec<(i64, String, Option<String>, i32)> = stmt
        .query_map(params![year], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut result = Vec::with_capacity(holidays.len());
    for (id, date, description, year) in holidays {
        let markets = get_holiday_markets(conn, id)?;
        result.push(MarketHoliday {
            id,
            date: parse_date(&date)?,
            description,
            year,
            markets,
        });
    }

    Ok(result)
}

/// Every closure date recorded for a market
pub fn holiday_dates(conn: &Connection, market: &str) -> Result<HashSet<NaiveDate>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT h.date
        FROM market_holidays h
        INNER JOIN market_holiday_markets m ON h.id = m.holiday_id
        WHERE m.market = ?1
        "#,
    )?;

    let dates: Vec<String> = stmt
        .query_map(params![market], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    dates.iter().map(|d| parse_date(d)).collect()
}

/// Check if a date is a holiday for a market
pub fn is_holiday(conn: &Connection, market: &str, date: NaiveDate) -> Result<bool> {
    let count: i64 = conn.query_row(
        r#"
        SELECT COUNT(*)
        FROM market_holidays h
        INNER JOIN market_holiday_markets m ON h.id = m.holiday_id
        WHERE m.market = ?1 AND h.date = ?2
        "#,
        params![market, date.format(DATE_FORMAT).to_string()],
        |row| row.get(0),
    )?;

    Ok(count > 0)
}

fn get_holiday_markets(conn: &Connection, holiday_id: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT market FROM market_holiday_markets WHERE holiday_id = ?1 ORDER BY market",
    )?;

    let markets: Vec<String> = stmt
        .query_map(params![holiday_id], |row| row.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(markets)
}

/// Delete a market holiday
pub fn delete_holiday(conn: &Connection, id: i64) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM market_holiday_markets WHERE holiday_id = ?1",
        params![id],
    )?;
    let rows = tx.execute("DELETE FROM market_holidays WHERE id = ?1", params![id])?;
    tx.commit()?;
    Ok(rows > 0)
}
