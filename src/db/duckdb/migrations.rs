//! DuckDB migrations

use crate::error::Result;
use duckdb::Connection;

/// Run all DuckDB migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    // An older history file may carry a migrations table keyed by 'id';
    // drop it so the name-keyed layout below can be created
    let has_old_schema: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM information_schema.columns
             WHERE table_name = 'migrations' AND column_name = 'id'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(false);

    if has_old_schema {
        tracing::info!("Migrating DuckDB migrations table to new schema");
        conn.execute_batch("DROP TABLE migrations")?;
    }

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migrations (
            name VARCHAR PRIMARY KEY,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
    )?;

    run_migration(conn, "001_daily_bars", CREATE_DAILY_BARS)?;
    run_migration(conn, "002_history_coverage", CREATE_HISTORY_COVERAGE)?;

    tracing::info!("DuckDB migrations completed");
    Ok(())
}

fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM migrations WHERE name = ?",
        [name],
        |row| row.get(0),
    )?;

    if !exists {
        tracing::info!("Running DuckDB migration: {}", name);
        conn.execute_batch(sql)?;
        conn.execute("INSERT INTO migrations (name) VALUES (?)", [name])?;
    }

    Ok(())
}

const CREATE_DAILY_BARS: &str = r#"
CREATE TABLE IF NOT EXISTS daily_bars (
    symbol VARCHAR NOT NULL,
    trade_date DATE NOT NULL,
    open DOUBLE NOT NULL,
    high DOUBLE NOT NULL,
    low DOUBLE NOT NULL,
    close DOUBLE NOT NULL,
    volume BIGINT NOT NULL,
    amount DOUBLE,
    change DOUBLE,
    change_percent DOUBLE,
    PRIMARY KEY (symbol, trade_date)
);

CREATE INDEX IF NOT EXISTS idx_daily_bars_symbol ON daily_bars(symbol);
"#;

// Bars cached before keys carried the market tag cannot be attributed to a
// venue (SH000001 and SZ000001 both stored as 000001), so they are dropped
const CREATE_HISTORY_COVERAGE: &str = r#"
DELETE FROM daily_bars;

CREATE TABLE IF NOT EXISTS history_coverage (
    symbol VARCHAR PRIMARY KEY,
    start_date DATE NOT NULL
);
"#;
