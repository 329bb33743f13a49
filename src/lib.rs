//! KV Cache - key-value storage and caching layer
//!
//! A uniform key-value store over SQLite or PostgreSQL, an in-process TTL
//! cache, single-flight memoization of function results through either of
//! them, and batched storage of large append-only arrays.

pub mod array;
pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod memoize;
pub mod single_flight;
pub mod store;

pub use array::{ArrayMeta, ArrayStore};
pub use cache::{CacheStats, MemoryCache};
pub use config::{ArrayOptions, BackendTarget, CacheOptions, Config, StoreConfig};
pub use error::{KvError, Result};
pub use logging::init_tracing;
pub use memoize::{BlockingCacheBackend, CacheBackend, CacheKey, CallArgs, KvCache, Memoized};
pub use single_flight::{KeyGuard, LockManager};
pub use store::{
    open_store, KvStore, KvValue, PgStore, Record, SqliteStore, TypeInfo, ValueType,
};
