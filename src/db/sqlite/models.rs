//! SQLite database models

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Market holiday entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketHoliday {
    pub id: i64,
    pub date: NaiveDate,
    pub description: Option<String>,
    pub year: i32,
    pub markets: Vec<String>,
}

/// Create request for a market holiday
#[derive(Debug, Clone, Deserialize)]
pub struct CreateHolidayRequest {
    pub date: NaiveDate,
    pub description: Option<String>,
    /// Market tags the closure applies to (`SH`, `SZ`, `BJ`, `HK`)
    pub markets: Vec<String>,
}
