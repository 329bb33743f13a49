//! Durable Store Module
//!
//! Typed key-value storage with timestamps over an embedded SQLite file or a
//! PostgreSQL pool. Both backends implement [`KvStore`] with the same
//! semantics, so callers hold an `Arc<dyn KvStore>` and never care which one
//! is underneath.

mod postgres;
mod query;
mod sqlite;
mod value;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};

use crate::config::{BackendTarget, StoreConfig};
use crate::error::{KvError, Result};

pub use postgres::PgStore;
pub use query::{
    json_text, prefix_upper_bound, require_non_empty, reverse_index_key, validate_json_path,
    validate_key, validate_table_name, CompareOp, JsonCompare, JsonMatch, JsonPage, JsonSearch,
    JsonTextSearch, OrderField, ScanOptions, SearchCursor, SortOrder, TimeColumn, TimeDirection,
    TimeQuery, MAX_KEY_LENGTH, REVERSE_INDEX_PREFIX,
};
pub use sqlite::SqliteStore;
pub use value::{deep_merge, json_contains, KvValue, Record, TypeInfo, ValueType};

/// Default number of rows per multi-row statement in bulk writes
pub const DEFAULT_PUT_BATCH: usize = 1000;

/// Upper bound on keys bound into a single `IN (...)` list
pub(crate) const KEY_CHUNK: usize = 500;

// == KV Store Trait ==
/// A durable key-value store with one value type per table.
///
/// `put` upserts, keeping `created_at` from the first write and moving
/// `updated_at` forward. Reads that pass `expire_secs` delete and hide records
/// older than that many seconds (lazy expiration).
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Value type every record in this store uses.
    fn value_type(&self) -> ValueType;

    /// Backing table name.
    fn table_name(&self) -> &str;

    /// Value type together with the backend column type.
    fn type_info(&self) -> TypeInfo;

    /// Whether `operation` can run against this store's value type.
    fn is_operation_supported(&self, operation: &str) -> bool {
        self.value_type().is_operation_supported(operation)
    }

    async fn put(&self, key: &str, value: KvValue) -> Result<()>;

    /// Returns the record with timestamps, or `None` when absent or expired.
    async fn get_record(&self, key: &str, expire_secs: Option<u64>) -> Result<Option<Record>>;

    /// Returns only the value, or `None` when absent or expired.
    async fn get(&self, key: &str, expire_secs: Option<u64>) -> Result<Option<KvValue>> {
        Ok(self.get_record(key, expire_secs).await?.map(|r| r.value))
    }

    /// Deep-merges `partial` into the stored document, inserting it when absent.
    ///
    /// Only valid for [`ValueType::Json`] stores.
    async fn merge(&self, key: &str, partial: JsonValue) -> Result<()>;

    /// Returns true iff a record existed and was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn has(&self, key: &str) -> Result<bool>;

    /// All keys in ascending order.
    async fn keys(&self) -> Result<Vec<String>>;

    async fn count(&self) -> Result<u64>;

    /// Removes every record, returning how many were removed.
    async fn clear(&self) -> Result<u64>;

    /// Records for the given keys that exist, ordered by key.
    async fn get_records(&self, keys: &[String]) -> Result<Vec<Record>>;

    /// Maps every requested key to its value or `None`.
    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, Option<KvValue>>> {
        let mut found: HashMap<String, KvValue> = self
            .get_records(keys)
            .await?
            .into_iter()
            .map(|r| (r.key, r.value))
            .collect();
        Ok(keys
            .iter()
            .map(|k| (k.clone(), found.remove(k)))
            .collect())
    }

    /// Upserts every entry, `batch_size` rows per statement, in one transaction.
    async fn put_many(&self, entries: Vec<(String, KvValue)>, batch_size: usize) -> Result<()>;

    /// Returns the number of records removed.
    async fn delete_many(&self, keys: &[String]) -> Result<u64>;

    /// Every record matching the options, ordered by key.
    async fn get_all(&self, options: &ScanOptions) -> Result<Vec<Record>>;

    /// Most recently created records, newest first, optionally only those
    /// created within `within` of now.
    async fn get_recent(&self, limit: u64, within: Option<Duration>) -> Result<Vec<Record>>;

    /// Lexicographic range scan over keys starting with `prefix`.
    async fn get_with_prefix(&self, prefix: &str, options: &ScanOptions) -> Result<Vec<Record>>;

    /// Records whose key contains `substring`.
    async fn get_with_contains(&self, substring: &str, options: &ScanOptions)
        -> Result<Vec<Record>>;

    /// Records whose key ends with `suffix`, by direct scan.
    async fn get_with_suffix(&self, suffix: &str, options: &ScanOptions) -> Result<Vec<Record>>;

    /// Writes the reversed-suffix index record for `key`.
    async fn index_suffix(&self, key: &str) -> Result<()> {
        self.value_type().require_document("index_suffix")?;
        self.put(&reverse_index_key(key), KvValue::Json(json!({ "original_key": key })))
            .await
    }

    /// Suffix lookup through the `reverse:` index written by [`KvStore::index_suffix`].
    ///
    /// `options` paginate the index scan; the returned records are the
    /// original keys, ordered by key.
    async fn get_with_suffix_indexed(
        &self,
        suffix: &str,
        options: &ScanOptions,
    ) -> Result<Vec<Record>> {
        require_non_empty("suffix", suffix)?;
        self.value_type().require_document("get_with_suffix_indexed")?;
        let reversed: String = suffix.chars().rev().collect();
        let index = self
            .get_with_prefix(&format!("{}{}", REVERSE_INDEX_PREFIX, reversed), options)
            .await?;
        let original_keys: Vec<String> = index
            .iter()
            .filter_map(|r| r.value.as_json())
            .filter_map(|v| v.get("original_key").and_then(JsonValue::as_str))
            .map(str::to_string)
            .collect();
        if original_keys.is_empty() {
            return Ok(Vec::new());
        }
        self.get_records(&original_keys).await
    }

    /// Inserts only if the key is absent; fails with `AlreadyExists` otherwise.
    async fn add(&self, key: &str, value: KvValue) -> Result<()>;

    /// Fails with `AlreadyExists` when `key` already holds exactly `value`.
    async fn add_unique_pair(&self, key: &str, value: KvValue) -> Result<()> {
        if self.get(key, None).await?.as_ref() == Some(&value) {
            return Err(KvError::AlreadyExists(format!(
                "key-value pair already exists for key \"{}\"",
                key
            )));
        }
        self.put(key, value).await
    }

    /// Fails with `AlreadyExists` when any key already holds `value`.
    async fn add_unique_value(&self, key: &str, value: KvValue) -> Result<()> {
        if self.is_value_exists(&value).await? {
            return Err(KvError::AlreadyExists("value already exists".to_string()));
        }
        self.put(key, value).await
    }

    async fn is_value_exists(&self, value: &KvValue) -> Result<bool>;

    /// Every record whose value equals `value`.
    async fn get_values(&self, value: &KvValue) -> Result<Vec<Record>>;

    /// Keys whose value equals `value`, or contains it when `exact` is false
    /// (text and json stores only).
    async fn find_by_value(&self, value: &KvValue, exact: bool) -> Result<Vec<String>>;

    /// Records holding the boolean `value`, ordered by `created_at`.
    ///
    /// Only valid for boolean and json stores.
    async fn find_bool_values(
        &self,
        value: bool,
        order: SortOrder,
        take: Option<u64>,
    ) -> Result<Vec<Record>>;

    /// Time-ordered cursor over `created_at` or `updated_at`.
    async fn search_by_time(&self, query: &TimeQuery) -> Result<Vec<Record>>;

    /// First key updated before or after `timestamp`.
    async fn find_by_update_time(
        &self,
        timestamp: DateTime<Utc>,
        direction: TimeDirection,
        order: SortOrder,
    ) -> Result<Option<String>> {
        let query = TimeQuery {
            timestamp,
            column: TimeColumn::UpdatedAt,
            direction,
            order,
            take: 1,
        };
        Ok(self
            .search_by_time(&query)
            .await?
            .into_iter()
            .next()
            .map(|r| r.key))
    }

    /// Field-level document search with keyset pagination.
    async fn search_json(&self, search: &JsonSearch) -> Result<JsonPage>;

    /// Documents on one side of `query.timestamp` that satisfy `filter`,
    /// ordered by the query's time column and capped at `query.take`.
    async fn search_json_by_time(&self, query: &TimeQuery, filter: &JsonMatch)
        -> Result<Vec<Record>>;

    /// Every record whose value satisfies `condition`, ordered by key.
    async fn find_by_condition(
        &self,
        condition: &(dyn for<'v> Fn(&'v KvValue) -> bool + Send + Sync),
    ) -> Result<Vec<Record>> {
        Ok(self
            .get_all(&ScanOptions::default())
            .await?
            .into_iter()
            .filter(|r| condition(&r.value))
            .collect())
    }

    /// Up to `count` records in random order.
    async fn get_random(&self, count: u64) -> Result<Vec<Record>>;
}

// == Store Factory ==
/// Opens the backend selected by `config`.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn KvStore>> {
    match &config.target {
        BackendTarget::Sqlite(path) => {
            let store = SqliteStore::open(path, &config.table_name, config.value_type)?;
            Ok(Arc::new(store))
        }
        BackendTarget::Postgres(url) => {
            let store =
                PgStore::connect(url, &config.table_name, config.value_type, config.pool_size)
                    .await?;
            Ok(Arc::new(store))
        }
    }
}

/// Fails when `batch_size` is zero.
pub(crate) fn require_batch_size(batch_size: usize) -> Result<()> {
    if batch_size == 0 {
        Err(KvError::InvalidArgument(
            "batch size must be positive".to_string(),
        ))
    } else {
        Ok(())
    }
}
