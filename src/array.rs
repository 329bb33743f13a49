//! Array Batching Layer
//!
//! Stores an append-only sequence under one name as fixed-size batch
//! records plus a meta record:
//!
//! - `<name>_meta` holds [`ArrayMeta`]
//! - `<name>_<i>` holds batch `i` as a JSON array
//!
//! Every batch except the last is full, so any item's batch is
//! `index / batch_size` and range reads touch only the covering batches.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::config::ArrayOptions;
use crate::error::{KvError, Result};
use crate::store::{require_batch_size, require_non_empty, KvStore, KvValue, DEFAULT_PUT_BATCH};

// == Array Meta ==
/// Layout of one stored array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayMeta {
    pub batch_count: usize,
    pub total_items: usize,
    pub batch_size: usize,
    pub last_updated: DateTime<Utc>,
}

impl ArrayMeta {
    fn empty(batch_size: usize) -> Self {
        Self {
            batch_count: 0,
            total_items: 0,
            batch_size,
            last_updated: Utc::now(),
        }
    }
}

fn meta_key(name: &str) -> String {
    format!("{}_meta", name)
}

fn batch_key(name: &str, index: usize) -> String {
    format!("{}_{}", name, index)
}

// == Array Store ==
/// Batched arrays on top of a document store.
#[derive(Clone)]
pub struct ArrayStore {
    store: Arc<dyn KvStore>,
}

impl std::fmt::Debug for ArrayStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrayStore")
            .field("table", &self.store.table_name())
            .finish()
    }
}

impl ArrayStore {
    /// Wraps `store`, which must hold JSON values.
    pub fn new(store: Arc<dyn KvStore>) -> Result<Self> {
        store.value_type().require_document("ArrayStore")?;
        Ok(Self { store })
    }

    /// Current layout of `name`, or None if it was never written.
    pub async fn meta(&self, name: &str) -> Result<Option<ArrayMeta>> {
        match self.store.get(&meta_key(name), None).await? {
            Some(value) => {
                let json = value.into_json().ok_or_else(|| {
                    KvError::Backend(format!("array meta for {} is not a document", name))
                })?;
                let meta: ArrayMeta = serde_json::from_value(json)?;
                if meta.batch_size == 0 {
                    return Err(KvError::Backend(format!(
                        "array meta for {} has a zero batch size",
                        name
                    )));
                }
                Ok(Some(meta))
            }
            None => Ok(None),
        }
    }

    // == Append ==
    /// Appends `items` to `name`, creating the array when absent.
    ///
    /// New items first fill the last partial batch, then spill into new
    /// batches. With `overwrite` the existing array is dropped first. When
    /// the stored batch size differs from `options.batch_size`, the array is
    /// rewritten with the new size only if `force_resize_batch` is set;
    /// otherwise the stored size is kept.
    ///
    /// # Arguments
    /// * `name` - Logical array name
    /// * `items` - Items to append, in order
    /// * `options` - Batch size and rewrite behaviour
    ///
    /// # Returns
    /// The layout after the append
    pub async fn append<T: Serialize>(
        &self,
        name: &str,
        items: &[T],
        options: &ArrayOptions,
    ) -> Result<ArrayMeta> {
        require_non_empty("array name", name)?;
        require_batch_size(options.batch_size)?;
        let items = items
            .iter()
            .map(serde_json::to_value)
            .collect::<std::result::Result<Vec<JsonValue>, _>>()?;

        let mut existing = self.meta(name).await?;
        if options.overwrite && existing.is_some() {
            self.remove(name).await?;
            existing = None;
        }

        match existing {
            None => self.write_fresh(name, items, options.batch_size).await,
            Some(meta) if meta.batch_size != options.batch_size && options.force_resize_batch => {
                info!(
                    "Resizing array {} from batch size {} to {}",
                    name, meta.batch_size, options.batch_size
                );
                let mut all = self.read_batches(name, 0, meta.batch_count).await?;
                all.extend(items);
                self.remove(name).await?;
                self.write_fresh(name, all, options.batch_size).await
            }
            Some(meta) => self.extend(name, meta, items).await,
        }
    }

    async fn write_fresh(
        &self,
        name: &str,
        items: Vec<JsonValue>,
        batch_size: usize,
    ) -> Result<ArrayMeta> {
        let mut meta = ArrayMeta::empty(batch_size);
        let mut entries = Vec::new();
        for chunk in items.chunks(batch_size) {
            entries.push((
                batch_key(name, meta.batch_count),
                KvValue::Json(JsonValue::Array(chunk.to_vec())),
            ));
            meta.batch_count += 1;
        }
        meta.total_items = items.len();
        self.commit(name, entries, &meta).await?;
        Ok(meta)
    }

    async fn extend(
        &self,
        name: &str,
        mut meta: ArrayMeta,
        items: Vec<JsonValue>,
    ) -> Result<ArrayMeta> {
        if items.is_empty() {
            return Ok(meta);
        }
        let batch_size = meta.batch_size;
        let mut entries = Vec::new();
        let mut remaining = items.as_slice();

        if meta.batch_count > 0 {
            let last_index = meta.batch_count - 1;
            let mut last = self.read_batches(name, last_index, meta.batch_count).await?;
            let room = batch_size.saturating_sub(last.len());
            if room > 0 {
                let take = room.min(remaining.len());
                last.extend_from_slice(&remaining[..take]);
                remaining = &remaining[take..];
                entries.push((batch_key(name, last_index), KvValue::Json(JsonValue::Array(last))));
            }
        }
        for chunk in remaining.chunks(batch_size) {
            entries.push((
                batch_key(name, meta.batch_count),
                KvValue::Json(JsonValue::Array(chunk.to_vec())),
            ));
            meta.batch_count += 1;
        }

        meta.total_items += items.len();
        meta.last_updated = Utc::now();
        self.commit(name, entries, &meta).await?;
        Ok(meta)
    }

    /// Writes batches and the meta record in one bulk upsert.
    async fn commit(
        &self,
        name: &str,
        mut entries: Vec<(String, KvValue)>,
        meta: &ArrayMeta,
    ) -> Result<()> {
        debug!(
            "Writing {} batch records for {} ({} items)",
            entries.len(),
            name,
            meta.total_items
        );
        entries.push((meta_key(name), KvValue::Json(serde_json::to_value(meta)?)));
        self.store.put_many(entries, DEFAULT_PUT_BATCH).await
    }

    // == Reads ==
    /// Every item of `name` in order; empty when the array does not exist.
    pub async fn read_all<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>> {
        match self.meta(name).await? {
            Some(meta) => decode(self.read_batches(name, 0, meta.batch_count).await?),
            None => Ok(Vec::new()),
        }
    }

    /// The last `count` items before the newest `offset` ones, oldest first.
    ///
    /// Only the batches holding that window are read.
    pub async fn read_recent<T: DeserializeOwned>(
        &self,
        name: &str,
        count: usize,
        offset: usize,
    ) -> Result<Vec<T>> {
        let Some(meta) = self.meta(name).await? else {
            return Ok(Vec::new());
        };
        let end = meta.total_items.saturating_sub(offset);
        let start = end.saturating_sub(count);
        decode(self.read_window(name, &meta, start, end).await?)
    }

    /// Items with index in `start..end`; `end` is clamped to the length.
    pub async fn read_range<T: DeserializeOwned>(
        &self,
        name: &str,
        start: usize,
        end: usize,
    ) -> Result<Vec<T>> {
        let Some(meta) = self.meta(name).await? else {
            return Ok(Vec::new());
        };
        decode(self.read_window(name, &meta, start, end).await?)
    }

    async fn read_window(
        &self,
        name: &str,
        meta: &ArrayMeta,
        start: usize,
        end: usize,
    ) -> Result<Vec<JsonValue>> {
        let end = end.min(meta.total_items);
        if start >= end {
            return Ok(Vec::new());
        }
        let batch_size = meta.batch_size;
        let first = start / batch_size;
        let last = (end - 1) / batch_size;
        let items = self.read_batches(name, first, last + 1).await?;

        let offset = start - first * batch_size;
        Ok(items.into_iter().skip(offset).take(end - start).collect())
    }

    /// Concatenates batches `from..to` in order.
    async fn read_batches(
        &self,
        name: &str,
        from: usize,
        to: usize,
    ) -> Result<Vec<JsonValue>> {
        let keys: Vec<String> = (from..to).map(|i| batch_key(name, i)).collect();
        let mut found = self.store.get_many(&keys).await?;
        let mut items = Vec::new();
        for key in &keys {
            match found.remove(key).flatten() {
                Some(KvValue::Json(JsonValue::Array(batch))) => items.extend(batch),
                Some(_) => {
                    return Err(KvError::Backend(format!(
                        "batch {} is not a JSON array",
                        key
                    )))
                }
                None => {
                    return Err(KvError::Backend(format!(
                        "array {} is missing batch {}",
                        name, key
                    )))
                }
            }
        }
        Ok(items)
    }

    /// Deletes every batch and the meta record. Returns false if `name` did
    /// not exist.
    pub async fn remove(&self, name: &str) -> Result<bool> {
        let Some(meta) = self.meta(name).await? else {
            return Ok(false);
        };
        let mut keys: Vec<String> = (0..meta.batch_count).map(|i| batch_key(name, i)).collect();
        keys.push(meta_key(name));
        self.store.delete_many(&keys).await?;
        Ok(true)
    }
}

fn decode<T: DeserializeOwned>(items: Vec<JsonValue>) -> Result<Vec<T>> {
    items
        .into_iter()
        .map(|item| serde_json::from_value(item).map_err(KvError::from))
        .collect()
}
