//! Database layer
//!
//! SQLite holds blob cache files and the market calendar; DuckDB holds the
//! daily history and the structured cache tables.

pub mod duckdb;
pub mod sqlite;
