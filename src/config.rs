//! Configuration Module
//!
//! Loads store, cache and array settings from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::store::ValueType;

/// Where the durable store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendTarget {
    /// Embedded single-file store; `:memory:` keeps it in process
    Sqlite(PathBuf),
    /// Networked store reached through a connection URL
    Postgres(String),
}

impl BackendTarget {
    /// Interprets a connection target.
    ///
    /// `postgres://` and `postgresql://` URLs select the networked backend;
    /// anything else is a SQLite path.
    pub fn parse(target: &str) -> Self {
        let trimmed = target.trim();
        if trimmed.starts_with("postgres://") || trimmed.starts_with("postgresql://") {
            BackendTarget::Postgres(trimmed.to_string())
        } else {
            BackendTarget::Sqlite(PathBuf::from(trimmed))
        }
    }
}

/// Library configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Durable store connection target
    pub database_url: String,
    /// Table backing the store
    pub table_name: String,
    /// Value type of every record in the table
    pub value_type: ValueType,
    /// Default TTL in seconds for memoized results
    pub cache_ttl: u64,
    /// Whether async memoized calls use single-flight locking
    pub cache_use_lock: bool,
    /// Lock table size that triggers a full reset
    pub lock_table_max: usize,
    /// Default items per array batch
    pub array_batch_size: usize,
    /// Maximum pooled PostgreSQL connections
    pub pg_pool_size: usize,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `KV_DATABASE_URL` - Store target (default: `:memory:`)
    /// - `KV_TABLE_NAME` - Table name (default: `kv_store`)
    /// - `KV_VALUE_TYPE` - Value type (default: `json`)
    /// - `KV_CACHE_TTL` - Memoize TTL in seconds (default: 60)
    /// - `KV_CACHE_USE_LOCK` - Single-flight locking (default: true)
    /// - `KV_LOCK_TABLE_MAX` - Lock table reset threshold (default: 10000)
    /// - `KV_ARRAY_BATCH_SIZE` - Items per array batch (default: 1000)
    /// - `KV_PG_POOL_SIZE` - PostgreSQL pool size (default: 16)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: env::var("KV_DATABASE_URL").unwrap_or(defaults.database_url),
            table_name: env::var("KV_TABLE_NAME").unwrap_or(defaults.table_name),
            value_type: parse_env("KV_VALUE_TYPE").unwrap_or(defaults.value_type),
            cache_ttl: parse_env("KV_CACHE_TTL").unwrap_or(defaults.cache_ttl),
            cache_use_lock: env::var("KV_CACHE_USE_LOCK")
                .ok()
                .and_then(|v| parse_bool(&v))
                .unwrap_or(defaults.cache_use_lock),
            lock_table_max: parse_env("KV_LOCK_TABLE_MAX").unwrap_or(defaults.lock_table_max),
            array_batch_size: parse_env("KV_ARRAY_BATCH_SIZE")
                .unwrap_or(defaults.array_batch_size),
            pg_pool_size: parse_env("KV_PG_POOL_SIZE").unwrap_or(defaults.pg_pool_size),
        }
    }

    /// Settings for opening the durable store.
    pub fn store(&self) -> StoreConfig {
        StoreConfig {
            target: BackendTarget::parse(&self.database_url),
            table_name: self.table_name.clone(),
            value_type: self.value_type,
            pool_size: self.pg_pool_size,
        }
    }

    /// Settings for the memoizing cache.
    pub fn cache(&self) -> CacheOptions {
        CacheOptions {
            default_ttl: self.cache_ttl,
            use_lock: self.cache_use_lock,
            lock_table_max: self.lock_table_max,
        }
    }

    /// Default settings for array appends.
    pub fn array(&self) -> ArrayOptions {
        ArrayOptions {
            batch_size: self.array_batch_size,
            ..ArrayOptions::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: ":memory:".to_string(),
            table_name: "kv_store".to_string(),
            value_type: ValueType::Json,
            cache_ttl: 60,
            cache_use_lock: true,
            lock_table_max: 10_000,
            array_batch_size: 1000,
            pg_pool_size: 16,
        }
    }
}

fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// == Derived Views ==
/// Durable store settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub target: BackendTarget,
    pub table_name: String,
    pub value_type: ValueType,
    pub pool_size: usize,
}

impl StoreConfig {
    /// Settings for an in-memory SQLite store.
    pub fn in_memory(table_name: &str, value_type: ValueType) -> Self {
        Self {
            target: BackendTarget::Sqlite(PathBuf::from(":memory:")),
            table_name: table_name.to_string(),
            value_type,
            pool_size: 1,
        }
    }
}

/// Memoizing cache settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// TTL in seconds applied when a call site does not override it
    pub default_ttl: u64,
    /// Use the single-flight protocol for async calls
    pub use_lock: bool,
    /// Lock table size that triggers a full reset
    pub lock_table_max: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            default_ttl: 60,
            use_lock: true,
            lock_table_max: 10_000,
        }
    }
}

/// Array append settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayOptions {
    /// Items per batch record
    pub batch_size: usize,
    /// Rewrite an existing array whose batch size differs
    pub force_resize_batch: bool,
    /// Replace any existing array instead of appending
    pub overwrite: bool,
}

impl ArrayOptions {
    pub fn with_batch_size(batch_size: usize) -> Self {
        Self {
            batch_size,
            ..Self::default()
        }
    }
}

impl Default for ArrayOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            force_resize_batch: false,
            overwrite: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.database_url, ":memory:");
        assert_eq!(config.table_name, "kv_store");
        assert_eq!(config.value_type, ValueType::Json);
        assert_eq!(config.cache_ttl, 60);
        assert!(config.cache_use_lock);
        assert_eq!(config.lock_table_max, 10_000);
        assert_eq!(config.array_batch_size, 1000);
        assert_eq!(config.pg_pool_size, 16);
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        for name in [
            "KV_DATABASE_URL",
            "KV_TABLE_NAME",
            "KV_VALUE_TYPE",
            "KV_CACHE_TTL",
            "KV_CACHE_USE_LOCK",
            "KV_LOCK_TABLE_MAX",
            "KV_ARRAY_BATCH_SIZE",
            "KV_PG_POOL_SIZE",
        ] {
            env::remove_var(name);
        }

        let config = Config::from_env();
        assert_eq!(config.database_url, ":memory:");
        assert_eq!(config.value_type, ValueType::Json);
        assert_eq!(config.cache_ttl, 60);
        assert!(config.cache_use_lock);
    }

    #[test]
    fn test_backend_target_parse() {
        assert_eq!(
            BackendTarget::parse("postgres://u:p@localhost/db"),
            BackendTarget::Postgres("postgres://u:p@localhost/db".to_string())
        );
        assert!(matches!(
            BackendTarget::parse("postgresql://localhost/db"),
            BackendTarget::Postgres(_)
        ));
        assert_eq!(
            BackendTarget::parse("/var/lib/kv/cache.db"),
            BackendTarget::Sqlite(PathBuf::from("/var/lib/kv/cache.db"))
        );
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" off "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_derived_views() {
        let config = Config {
            array_batch_size: 3,
            cache_use_lock: false,
            ..Config::default()
        };
        let store = config.store();
        assert_eq!(store.target, BackendTarget::Sqlite(PathBuf::from(":memory:")));
        assert_eq!(store.table_name, "kv_store");

        let cache = config.cache();
        assert!(!cache.use_lock);
        assert_eq!(cache.default_ttl, 60);

        let array = config.array();
        assert_eq!(array.batch_size, 3);
        assert!(!array.overwrite);
    }
}
