//! DuckDB data models

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One daily OHLCV bar as cached in `history.duckdb`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub amount: Option<f64>,
    pub change: Option<f64>,
    pub change_percent: Option<f64>,
}
