//! SQLite database module

pub mod models;
mod blob_cache;
mod calendar;
mod migrations;

pub use blob_cache::{validate_table_name, BlobCache};

use crate::error::Result;
use chrono::NaiveDate;
use models::*;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::collections::HashSet;
use std::path::Path;

/// SQLite database wrapper for provider settings (market calendar)
pub struct SqliteDb {
    conn: Mutex<Connection>,
}

impl SqliteDb {
    /// Create new SQLite database connection
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent access
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        Self::with_connection(conn)
    }

    /// In-memory database, mainly for tests
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

    // ========== Market Calendar Methods ==========

    /// Record an exchange closure
    pub fn create_holiday(&self, req: &CreateHolidayRequest) -> Result<MarketHoliday> {
        let conn = self.conn.lock();
        calendar::create_holiday(&conn, req)
    }

    /// Get all holidays for a year
    pub fn get_holidays_by_year(&self, year: i32) -> Result<Vec<MarketHoliday>> {
        let conn = self.conn.lock();
        calendar::get_holidays_by_year(&conn, year)
    }

    /// All closure dates for a market tag (`SH`, `HK`, ...)
    pub fn holiday_dates(&self, market: &str) -> Result<HashSet<NaiveDate>> {
        let conn = self.conn.lock();
        calendar::holiday_dates(&conn, market)
    }

    pub fn is_holiday(&self, market: &str, date: NaiveDate) -> Result<bool> {
        let conn = self.conn.lock();
        calendar::is_holiday(&conn, market, date)
    }

    /// Delete a market holiday
    pub fn delete_holiday(&self, id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        calendar::delete_holiday(&conn, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_holidays_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.db");
        let date = NaiveDate::from_ymd_opt(2024, 10, 1).unwrap();

        {
            let db = SqliteDb::new(&path).unwrap();
            db.create_holiday(&CreateHolidayRequest {
                date,
                description: Some("国庆节".to_string()),
                markets: vec!["SH".to_string(), "SZ".to_string()],
            })
            .unwrap();
        }

        // Migrations are idempotent on reopen
        let db = SqliteDb::new(&path).unwrap();
        assert!(db.is_holiday("SZ", date).unwrap());
        assert_eq!(db.get_holidays_by_year(2024).unwrap().len(), 1);
    }
}
