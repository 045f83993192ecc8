//! Provider state management

use crate::cache::{Backing, CacheStore, TtlPolicy};
use crate::config::CacheConfig;
use crate::db::duckdb::DuckDb;
use crate::db::sqlite::SqliteDb;
use crate::error::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// State shared by every provider service
pub struct ProviderState {
    /// Market calendar and other settings
    pub sqlite: Arc<SqliteDb>,

    /// Daily history cache
    pub history: Arc<DuckDb>,

    /// Open cache stores by namespace
    stores: DashMap<String, Arc<CacheStore>>,

    /// Policy for namespaces with a time-based lifetime
    default_policy: TtlPolicy,

    cache_dir: PathBuf,
}

impl ProviderState {
    /// Create the cache directory and open the shared databases
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let default_policy = config.default_policy()?;

        // Create cache directory if it doesn't exist
        std::fs::create_dir_all(&config.cache_dir)?;

        tracing::info!("Cache directory: {:?}", config.cache_dir);

        let sqlite = Arc::new(SqliteDb::new(&config.settings_path())?);
        let history = Arc::new(DuckDb::new(&config.history_path())?);

        Ok(Self {
            sqlite,
            history,
            stores: DashMap::new(),
            default_policy,
            cache_dir: config.cache_dir,
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn default_policy(&self) -> TtlPolicy {
        self.default_policy
    }

    /// Store for `namespace`, opening its file on first use.
    ///
    /// The backing chosen on first use sticks for the lifetime of the state.
    pub fn store(&self, namespace: &str, backing: Backing) -> Result<Arc<CacheStore>> {
        if let Some(store) = self.stores.get(namespace) {
            return Ok(store.clone());
        }

        match self.stores.entry(namespace.to_string()) {
            Entry::Occupied(e) => Ok(e.get().clone()),
            Entry::Vacant(e) => {
                let store = CacheStore::open(&self.cache_dir, namespace, backing)?
                    .with_policy(self.default_policy);
                let store = Arc::new(store);
                e.insert(store.clone());
                tracing::info!("Opened cache namespace {}", namespace);
                Ok(store)
            }
        }
    }

    /// Namespaces opened so far
    pub fn namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.stores.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Sweep expired entries from every open namespace
    pub fn clear_all_expired(&self) -> Result<usize> {
        let stores: Vec<Arc<CacheStore>> = self.stores.iter().map(|e| e.value().clone()).collect();
        let mut removed = 0;
        for store in stores {
            removed += store.clear_expired()?;
        }
        tracing::info!("Cleared {} expired cache entries", removed);
        Ok(removed)
    }
}
