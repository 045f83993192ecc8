//! Structured cache tables in DuckDB
//!
//! Each namespace owns two tables: `{ns}_entries` with one row per key and
//! `{ns}_rows` holding the payload in long format, one row per cell with a
//! typed value column per kind.

use super::{parse_date, DATE_FORMAT};
use crate::cache::table::{Table, Value};
use crate::cache::ttl::{from_epoch, to_epoch};
use crate::cache::{CacheBackend, StoredEntry};
use crate::db::sqlite::validate_table_name;
use crate::error::{AppError, Result};
use chrono::NaiveDateTime;
use duckdb::Connection;
use parking_lot::Mutex;
use std::path::Path;

/// Cell as laid out in the rows table
struct CellRow {
    kind: &'static str,
    text: Option<String>,
    int: Option<i64>,
    float: Option<f64>,
    date: Option<String>,
}

impl CellRow {
    fn empty(kind: &'static str) -> Self {
        Self {
            kind,
            text: None,
            int: None,
            float: None,
            date: None,
        }
    }

    fn from_value(value: &Value) -> Result<Self> {
        let row = match value {
            Value::Null => Self::empty("null"),
            Value::Text(s) => Self {
                text: Some(s.clone()),
                ..Self::empty("text")
            },
            Value::Int(i) => Self {
                int: Some(*i),
                ..Self::empty("int")
            },
            Value::Bool(b) => Self {
                int: Some(i64::from(*b)),
                ..Self::empty("bool")
            },
            Value::Float(f) => Self {
                float: Some(*f),
                ..Self::empty("float")
            },
            Value::Date(d) => Self {
                date: Some(d.format(DATE_FORMAT).to_string()),
                ..Self::empty("date")
            },
            Value::Json(_) => {
                return Err(AppError::Validation(
                    "nested values must be sanitized before storing".to_string(),
                ))
            }
        };
        Ok(row)
    }
}

fn missing(kind: &str) -> AppError {
    AppError::Deserialization(format!("{} cell without a value", kind))
}

fn cell_value(
    kind: &str,
    text: Option<String>,
    int: Option<i64>,
    float: Option<f64>,
    date: Option<String>,
) -> Result<Value> {
    match kind {
        "null" => Ok(Value::Null),
        "text" => text.map(Value::Text).ok_or_else(|| missing(kind)),
        "int" => int.map(Value::Int).ok_or_else(|| missing(kind)),
        "bool" => int.map(|i| Value::Bool(i != 0)).ok_or_else(|| missing(kind)),
        "float" => float.map(Value::Float).ok_or_else(|| missing(kind)),
        "date" => match date {
            Some(d) => Ok(Value::Date(parse_date(&d)?)),
            None => Err(missing(kind)),
        },
        other => Err(AppError::Deserialization(format!(
            "unsupported column type {:?}",
            other
        ))),
    }
}

/// Create both tables, dropping ones left behind with an older layout
pub fn ensure_tables(conn: &Connection, namespace: &str) -> Result<()> {
    validate_table_name(namespace)?;

    let has_old_schema: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM information_schema.tables t
             WHERE t.table_name = ?
               AND NOT EXISTS (
                 SELECT 1 FROM information_schema.columns c
                 WHERE c.table_name = t.table_name AND c.column_name = 'row_count'
               )",
            [format!("{}_entries", namespace)],
            |row| row.get(0),
        )
        .unwrap_or(false);

    if has_old_schema {
        tracing::info!("Replacing cache tables for {} with old layout", namespace);
        conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {ns}_entries; DROP TABLE IF EXISTS {ns}_rows;",
            ns = namespace
        ))?;
    }

    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {ns}_entries (
            key VARCHAR PRIMARY KEY,
            written_at BIGINT NOT NULL,
            expires_at BIGINT NOT NULL,
            column_names VARCHAR NOT NULL,
            row_count BIGINT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS {ns}_rows (
            key VARCHAR NOT NULL,
            row_idx BIGINT NOT NULL,
            col_idx BIGINT NOT NULL,
            kind VARCHAR NOT NULL,
            text_value VARCHAR,
            int_value BIGINT,
            float_value DOUBLE,
            date_value DATE
        );

        CREATE INDEX IF NOT EXISTS idx_{ns}_rows_key ON {ns}_rows(key);",
        ns = namespace
    ))?;

    Ok(())
}

pub fn read_entry(conn: &Connection, namespace: &str, key: &str) -> Result<Option<StoredEntry>> {
    let result = conn.query_row(
        &format!(
            "SELECT written_at, expires_at, column_names, row_count FROM {}_entries WHERE key = ?",
            namespace
        ),
        [key],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
            ))
        },
    );

    let (written_at, expires_at, column_names, row_count) = match result {
        Ok(row) => row,
        Err(duckdb::Error::QueryReturnedNoRows) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let columns: Vec<String> = serde_json::from_str(&column_names)
        .map_err(|e| AppError::Deserialization(format!("column list for {}: {}", key, e)))?;
    let row_count = usize::try_from(row_count)
        .map_err(|_| AppError::Deserialization(format!("negative row count for {}", key)))?;

    let mut stmt = conn.prepare(&format!(
        "SELECT row_idx, col_idx, kind, text_value, int_value, float_value,
                CAST(date_value AS VARCHAR)
         FROM {}_rows WHERE key = ?",
        namespace
    ))?;
    let cells = stmt
        .query_map([key], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<i64>>(4)?,
                row.get::<_, Option<f64>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut rows = vec![vec![Value::Null; columns.len()]; row_count];
    for (row_idx, col_idx, kind, text, int, float, date) in cells {
        let slot = usize::try_from(row_idx)
            .ok()
            .zip(usize::try_from(col_idx).ok())
            .and_then(|(r, c)| rows.get_mut(r).and_then(|row| row.get_mut(c)))
            .ok_or_else(|| {
                AppError::Deserialization(format!(
                    "cell ({}, {}) outside the stored shape of {}",
                    row_idx, col_idx, key
                ))
            })?;
        *slot = cell_value(&kind, text, int, float, date)?;
    }

    let table = Table::from_rows(columns, rows)
        .map_err(|e| AppError::Deserialization(e.to_string()))?;

    Ok(Some(StoredEntry {
        key: key.to_string(),
        written_at: from_epoch(written_at)?,
        expires_at: from_epoch(expires_at)?,
        table,
    }))
}

/// Replace the entry and all of its cells in one transaction
pub fn write_entry(conn: &mut Connection, namespace: &str, entry: &StoredEntry) -> Result<()> {
    let cells = entry
        .table
        .rows()
        .iter()
        .map(|row| row.iter().map(CellRow::from_value).collect::<Result<Vec<_>>>())
        .collect::<Result<Vec<_>>>()?;
    let columns = serde_json::to_string(entry.table.columns())?;

    let tx = conn.transaction()?;

    tx.execute(
        &format!("DELETE FROM {}_rows WHERE key = ?", namespace),
        [&entry.key],
    )?;
    tx.execute(
        &format!(
            "INSERT INTO {}_entries (key, written_at, expires_at, column_names, row_count)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (key) DO UPDATE SET
               written_at = excluded.written_at, expires_at = excluded.expires_at,
               column_names = excluded.column_names, row_count = excluded.row_count",
            namespace
        ),
        duckdb::params![
            entry.key,
            to_epoch(entry.written_at),
            to_epoch(entry.expires_at),
            columns,
            cells.len() as i64,
        ],
    )?;

    let mut stmt = tx.prepare(&format!(
        "INSERT INTO {}_rows
         (key, row_idx, col_idx, kind, text_value, int_value, float_value, date_value)
         VALUES (?, ?, ?, ?, ?, ?, ?, CAST(? AS DATE))",
        namespace
    ))?;
    for (row_idx, row) in cells.iter().enumerate() {
        for (col_idx, cell) in row.iter().enumerate() {
            stmt.execute(duckdb::params![
                entry.key,
                row_idx as i64,
                col_idx as i64,
                cell.kind,
                cell.text,
                cell.int,
                cell.float,
                cell.date,
            ])?;
        }
    }

    drop(stmt);
    tx.commit()?;

    Ok(())
}

pub fn remove_entry(conn: &Connection, namespace: &str, key: &str) -> Result<bool> {
    conn.execute(&format!("DELETE FROM {}_rows WHERE key = ?", namespace), [key])?;
    let rows = conn.execute(&format!("DELETE FROM {}_entries WHERE key = ?", namespace), [key])?;
    Ok(rows > 0)
}

pub fn clear_expired(conn: &Connection, namespace: &str, now: NaiveDateTime) -> Result<usize> {
    let cutoff = to_epoch(now);
    conn.execute(
        &format!(
            "DELETE FROM {ns}_rows WHERE key IN (SELECT key FROM {ns}_entries WHERE expires_at <= ?)",
            ns = namespace
        ),
        [cutoff],
    )?;
    let rows = conn.execute(
        &format!("DELETE FROM {}_entries WHERE expires_at <= ?", namespace),
        [cutoff],
    )?;
    Ok(rows)
}

pub fn count_entries(conn: &Connection, namespace: &str) -> Result<usize> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}_entries", namespace),
        [],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

/// DuckDB file holding one namespace's structured entries
pub struct TableCache {
    conn: Mutex<Connection>,
    namespace: String,
}

impl TableCache {
    /// Open (creating if needed) the cache file at `path`
    pub fn open(path: &Path, namespace: &str) -> Result<Self> {
        validate_table_name(namespace)?;
        Self::with_connection(Connection::open(path)?, namespace)
    }

    pub fn with_connection(conn: Connection, namespace: &str) -> Result<Self> {
        ensure_tables(&conn, namespace)?;
        Ok(Self {
            conn: Mutex::new(conn),
            namespace: namespace.to_string(),
        })
    }
}

impl CacheBackend for TableCache {
    fn read(&self, key: &str) -> Result<Option<StoredEntry>> {
        let conn = self.conn.lock();
        read_entry(&conn, &self.namespace, key)
    }

    fn write(&self, entry: &StoredEntry) -> Result<()> {
        let mut conn = self.conn.lock();
        write_entry(&mut conn, &self.namespace, entry)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        remove_entry(&conn, &self.namespace, key)
    }

    fn clear_expired(&self, now: NaiveDateTime) -> Result<usize> {
        let conn = self.conn.lock();
        clear_expired(&conn, &self.namespace, now)
    }

    fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        count_entries(&conn, &self.namespace)
    }
}
