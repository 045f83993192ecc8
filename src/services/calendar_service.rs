//! Calendar Service
//!
//! Last completed trading day per market, from weekends plus the holidays
//! recorded in the settings database.

use super::symbol_service::Market;
use crate::error::Result;
use crate::state::ProviderState;
use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use std::collections::HashSet;

/// Sessions count as complete from 15:00 market time
pub fn session_close() -> NaiveTime {
    NaiveTime::from_hms_opt(15, 0, 0).unwrap_or(NaiveTime::MIN)
}

pub fn is_trading_day(date: NaiveDate, holidays: &HashSet<NaiveDate>) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !holidays.contains(&date)
}

/// Latest trading day whose session has closed at `now`
pub fn last_trading_day(now: NaiveDateTime, holidays: &HashSet<NaiveDate>) -> NaiveDate {
    let mut day = now.date();
    if now.time() < session_close() {
        day = day.pred_opt().unwrap_or(day);
    }
    // Bounded in case a calendar marks every day as a holiday
    for _ in 0..366 {
        if is_trading_day(day, holidays) {
            return day;
        }
        match day.pred_opt() {
            Some(prev) => day = prev,
            None => break,
        }
    }
    day
}

/// Calendar tag holidays are recorded under
fn calendar_market(market: Market) -> &'static str {
    match market {
        Market::HK => "HK",
        Market::SH | Market::SZ | Market::BJ | Market::OF | Market::Other => "SH",
    }
}

/// Calendar Service
pub struct CalendarService;

impl CalendarService {
    /// Last completed trading day for `market` using the stored holidays
    pub fn last_trading_day(state: &ProviderState, market: Market, now: NaiveDateTime) -> Result<NaiveDate> {
        let holidays = state.sqlite.holiday_dates(calendar_market(market))?;
        Ok(last_trading_day(now, &holidays))
    }

    pub fn is_trading_day(state: &ProviderState, market: Market, date: NaiveDate) -> Result<bool> {
        let holiday = state.sqlite.is_holiday(calendar_market(market), date)?;
        Ok(!holiday && is_trading_day(date, &HashSet::new()))
    }
}
