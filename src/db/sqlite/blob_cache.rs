//! Blob-backed cache tables
//!
//! One row per key holding the encoded payload, its checksum and the
//! write/expiry instants (epoch seconds of the market-local wall clock).

use crate::cache::codec;
use crate::cache::ttl::{from_epoch, to_epoch};
use crate::cache::{CacheBackend, StoredEntry};
use crate::error::{AppError, Result};
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::Path;

const COLUMNS: [&str; 5] = ["key", "written_at", "expires_at", "checksum", "data"];

/// Namespaces become table names, so keep them to plain identifiers
pub fn validate_table_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
        && !name.as_bytes()[0].is_ascii_digit();
    if valid {
        Ok(())
    } else {
        Err(AppError::Validation(format!("invalid cache namespace: {:?}", name)))
    }
}

/// Create the cache table, replacing a table left behind with an older layout
pub fn ensure_table(conn: &Connection, table: &str) -> Result<()> {
    validate_table_name(table)?;

    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let existing: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    drop(stmt);

    if !existing.is_empty() && !COLUMNS.iter().all(|c| existing.iter().any(|e| e == c)) {
        tracing::info!("Replacing cache table {} with old layout {:?}", table, existing);
        conn.execute_batch(&format!("DROP TABLE {}", table))?;
    }

    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            key TEXT PRIMARY KEY,
            written_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            checksum TEXT NOT NULL,
            data BLOB NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_{table}_expires_at ON {table}(expires_at);",
        table = table
    ))?;

    Ok(())
}

/// Read and decode one entry
pub fn read_entry(conn: &Connection, table: &str, key: &str) -> Result<Option<StoredEntry>> {
    let result = conn.query_row(
        &format!(
            "SELECT written_at, expires_at, checksum, data FROM {} WHERE key = ?1",
            table
        ),
        params![key],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Vec<u8>>(3)?,
            ))
        },
    );

    let (written_at, expires_at, checksum, data) = match result {
        Ok(row) => row,
        Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if codec::checksum(&data) != checksum {
        return Err(AppError::Deserialization(format!(
            "checksum mismatch for {}",
            key
        )));
    }

    Ok(Some(StoredEntry {
        key: key.to_string(),
        written_at: from_epoch(written_at)?,
        expires_at: from_epoch(expires_at)?,
        table: codec::decode(&data)?,
    }))
}

/// Insert or replace one entry
pub fn write_entry(conn: &Connection, table: &str, entry: &StoredEntry) -> Result<()> {
    let data = codec::encode(&entry.table)?;
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {} (key, written_at, expires_at, checksum, data)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            table
        ),
        params![
            entry.key,
            to_epoch(entry.written_at),
            to_epoch(entry.expires_at),
            codec::checksum(&data),
            data,
        ],
    )?;
    Ok(())
}

pub fn remove_entry(conn: &Connection, table: &str, key: &str) -> Result<bool> {
    let rows = conn.execute(&format!("DELETE FROM {} WHERE key = ?1", table), params![key])?;
    Ok(rows > 0)
}

pub fn clear_expired(conn: &Connection, table: &str, now: NaiveDateTime) -> Result<usize> {
    let rows = conn.execute(
        &format!("DELETE FROM {} WHERE expires_at <= ?1", table),
        params![to_epoch(now)],
    )?;
    Ok(rows)
}

pub fn count_entries(conn: &Connection, table: &str) -> Result<usize> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
        row.get(0)
    })?;
    Ok(count as usize)
}

/// SQLite file holding one namespace's blob entries
pub struct BlobCache {
    conn: Mutex<Connection>,
    table: String,
}

impl BlobCache {
    /// Open (creating if needed) the cache file at `path`
    pub fn open(path: &Path, namespace: &str) -> Result<Self> {
        validate_table_name(namespace)?;
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::with_connection(conn, namespace)
    }

    pub fn with_connection(conn: Connection, namespace: &str) -> Result<Self> {
        ensure_table(&conn, namespace)?;
        Ok(Self {
            conn: Mutex::new(conn),
            table: namespace.to_string(),
        })
    }
}

impl CacheBackend for BlobCache {
    fn read(&self, key: &str) -> Result<Option<StoredEntry>> {
        let conn = self.conn.lock();
        read_entry(&conn, &self.table, key)
    }

    fn write(&self, entry: &StoredEntry) -> Result<()> {
        let conn = self.conn.lock();
        write_entry(&conn, &self.table, entry)
    }

    fn remove(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock();
        remove_entry(&conn, &self.table, key)
    }

    fn clear_expired(&self, now: NaiveDateTime) -> Result<usize> {
        let conn = self.conn.lock();
        clear_expired(&conn, &self.table, now)
    }

    fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        count_entries(&conn, &self.table)
    }
}
