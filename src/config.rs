//! Provider configuration

use crate::cache::ttl::{TtlPolicy, DEFAULT_TTL_SECS};
use crate::error::{AppError, Result};
use std::path::{Path, PathBuf};

/// Overrides the cache directory
pub const CACHE_DIR_ENV: &str = "AKSHARE_CACHE_DIR";
/// Overrides the lifetime of time-based entries, in seconds
pub const CACHE_TTL_ENV: &str = "AKSHARE_CACHE_TTL";

/// Where cache files live and how long time-based entries last
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub cache_dir: PathBuf,
    pub default_ttl_secs: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            default_ttl_secs: DEFAULT_TTL_SECS,
        }
    }
}

impl CacheConfig {
    /// Defaults, overridden by `AKSHARE_CACHE_DIR` / `AKSHARE_CACHE_TTL`
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = std::env::var_os(CACHE_DIR_ENV).filter(|v| !v.is_empty()) {
            config.cache_dir = PathBuf::from(dir);
        }

        if let Ok(raw) = std::env::var(CACHE_TTL_ENV) {
            config.default_ttl_secs = raw.trim().parse().map_err(|_| {
                AppError::Config(format!("{} must be a whole number of seconds, got {:?}", CACHE_TTL_ENV, raw))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_cache_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cache_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_default_ttl(mut self, seconds: i64) -> Self {
        self.default_ttl_secs = seconds;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(AppError::Config("cache directory is empty".to_string()));
        }
        if self.default_ttl_secs < 0 {
            return Err(AppError::Config(format!(
                "default TTL must be non-negative, got {}",
                self.default_ttl_secs
            )));
        }
        Ok(())
    }

    /// Policy for namespaces that expire after the default lifetime
    pub fn default_policy(&self) -> Result<TtlPolicy> {
        TtlPolicy::constant(self.default_ttl_secs)
    }

    pub fn history_path(&self) -> PathBuf {
        self.cache_dir.join("history.duckdb")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.cache_dir.join("settings.db")
    }
}

/// `$HOME/.cache/akshare`, or a directory under the OS temp dir
fn default_cache_dir() -> PathBuf {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(|home| PathBuf::from(home).join(".cache"))
        .unwrap_or_else(std::env::temp_dir)
        .join("akshare")
}
