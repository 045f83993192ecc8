//! Keyed cache store
//!
//! Cache-or-compute around an injected [`ComputeFn`]. Entries are whole
//! snapshots: a write replaces the previous payload for the key, never merges
//! into it. The store does not lock across processes; two writers racing on a
//! key simply overwrite each other with equivalent data.

use super::table::Table;
use super::ttl::{market_now, TtlPolicy};
use super::{ComputeFn, ComputeRequest};
use crate::db::duckdb::TableCache;
use crate::db::sqlite::BlobCache;
use crate::error::{AppError, Result};
use chrono::NaiveDateTime;
use std::path::Path;
use tracing::{debug, info, warn};

/// A persisted cache entry
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub key: String,
    pub written_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub table: Table,
}

/// Persistent key-value backing for a [`CacheStore`].
///
/// `read` must report payloads it cannot reconstruct as
/// [`AppError::Deserialization`]; the store recovers from exactly that variant.
pub trait CacheBackend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<StoredEntry>>;

    /// Insert or replace the entry for `entry.key`
    fn write(&self, entry: &StoredEntry) -> Result<()>;

    fn remove(&self, key: &str) -> Result<bool>;

    /// Delete entries with `expires_at <= now`, returning how many were removed
    fn clear_expired(&self, now: NaiveDateTime) -> Result<usize>;

    fn count(&self) -> Result<usize>;
}

/// Which file type backs a namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// SQLite `<namespace>.db`, one encoded blob per key
    Blob,
    /// DuckDB `<namespace>.duckdb`, typed long-format rows
    Table,
}

impl Backing {
    pub fn file_name(&self, namespace: &str) -> String {
        match self {
            Backing::Blob => format!("{}.db", namespace),
            Backing::Table => format!("{}.duckdb", namespace),
        }
    }
}

/// Namespace-scoped cache over one backing file
pub struct CacheStore {
    namespace: String,
    backend: Box<dyn CacheBackend>,
    policy: TtlPolicy,
}

impl CacheStore {
    pub fn new(namespace: impl Into<String>, backend: Box<dyn CacheBackend>) -> Self {
        Self {
            namespace: namespace.into(),
            backend,
            policy: TtlPolicy::default(),
        }
    }

    /// Blob store in a SQLite file; the table is named after the namespace
    pub fn open_blob(path: &Path, namespace: &str) -> Result<Self> {
        let backend = BlobCache::open(path, namespace)?;
        Ok(Self::new(namespace, Box::new(backend)))
    }

    /// Structured-row store in a DuckDB file
    pub fn open_table(path: &Path, namespace: &str) -> Result<Self> {
        let backend = TableCache::open(path, namespace)?;
        Ok(Self::new(namespace, Box::new(backend)))
    }

    /// Open `<dir>/<namespace>.db` or `<dir>/<namespace>.duckdb`
    pub fn open(dir: &Path, namespace: &str, backing: Backing) -> Result<Self> {
        let path = dir.join(backing.file_name(namespace));
        debug!("Opening {:?} cache for {} at {}", backing, namespace, path.display());
        match backing {
            Backing::Blob => Self::open_blob(&path, namespace),
            Backing::Table => Self::open_table(&path, namespace),
        }
    }

    /// Replace the default policy (constant one hour)
    pub fn with_policy(mut self, policy: TtlPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn policy(&self) -> TtlPolicy {
        self.policy
    }

    /// Return the cached payload for `request`, computing it on a miss.
    ///
    /// With `use_cache == false` the compute function always runs and its
    /// result is still persisted.
    pub fn load_cached_data<F>(&self, request: &ComputeRequest, use_cache: bool, compute: &F) -> Result<Table>
    where
        F: ComputeFn + ?Sized,
    {
        self.load_with_policy(request, use_cache, &self.policy, compute, market_now())
    }

    /// [`CacheStore::load_cached_data`] with an explicit policy and clock
    pub fn load_with_policy<F>(
        &self,
        request: &ComputeRequest,
        use_cache: bool,
        policy: &TtlPolicy,
        compute: &F,
        now: NaiveDateTime,
    ) -> Result<Table>
    where
        F: ComputeFn + ?Sized,
    {
        let key = request.cache_key();

        if !use_cache {
            info!("[{}] Cache bypassed for {}, fetching fresh data", self.namespace, key);
            return self.compute_and_store(&key, request, policy, compute, now);
        }

        match self.backend.read(&key) {
            Ok(Some(entry)) if now < entry.expires_at => {
                info!("[{}] Loading {} from cache", self.namespace, key);
                return Ok(entry.table);
            }
            Ok(Some(entry)) => {
                debug!(
                    "[{}] Entry {} expired at {}",
                    self.namespace, key, entry.expires_at
                );
            }
            Ok(None) => {
                debug!("[{}] Cache miss for {}", self.namespace, key);
            }
            Err(AppError::Deserialization(reason)) => {
                warn!(
                    "[{}] Cached entry {} could not be decoded ({}); refreshing cache",
                    self.namespace, key, reason
                );
                return self.load_with_policy(request, false, policy, compute, now);
            }
            Err(e) => return Err(e),
        }

        info!("[{}] Generating new data for {}", self.namespace, key);
        self.compute_and_store(&key, request, policy, compute, now)
    }

    fn compute_and_store<F>(
        &self,
        key: &str,
        request: &ComputeRequest,
        policy: &TtlPolicy,
        compute: &F,
        now: NaiveDateTime,
    ) -> Result<Table>
    where
        F: ComputeFn + ?Sized,
    {
        // Nothing is written if compute fails
        let table = compute.compute(request)?;
        self.put(key, table, policy, now)
    }

    /// Store `table` under `key`, returning the sanitized payload that was written
    pub fn put(&self, key: &str, table: Table, policy: &TtlPolicy, now: NaiveDateTime) -> Result<Table> {
        let entry = StoredEntry {
            key: key.to_string(),
            written_at: now,
            expires_at: policy.expiry(now)?,
            table: table.sanitize(),
        };
        self.backend.write(&entry)?;
        debug!(
            "[{}] Stored {} ({} rows, expires {})",
            self.namespace,
            key,
            entry.table.len(),
            entry.expires_at
        );
        Ok(entry.table)
    }

    /// Live payload for `key`, if any
    pub fn get(&self, key: &str, now: NaiveDateTime) -> Result<Option<Table>> {
        Ok(self
            .backend
            .read(key)?
            .filter(|entry| now < entry.expires_at)
            .map(|entry| entry.table))
    }

    pub fn invalidate(&self, key: &str) -> Result<bool> {
        self.backend.remove(key)
    }

    pub fn clear_expired(&self) -> Result<usize> {
        self.clear_expired_at(market_now())
    }

    pub fn clear_expired_at(&self, now: NaiveDateTime) -> Result<usize> {
        let removed = self.backend.clear_expired(now)?;
        if removed > 0 {
            info!("[{}] Cleared {} expired entries", self.namespace, removed);
        }
        Ok(removed)
    }

    pub fn entry_count(&self) -> Result<usize> {
        self.backend.count()
    }
}
