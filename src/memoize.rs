//! Function-Result Cache
//!
//! Memoizes calls through any [`CacheBackend`]: a durable [`KvStore`] or an
//! in-process [`MemoryCache`]. Async calls can use the single-flight
//! protocol (fast-path read, per-key lock, re-read, compute, write back).
//! Cache reads and writes are best-effort; a failing cache never fails the
//! call it wraps.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::cache::MemoryCache;
use crate::config::CacheOptions;
use crate::error::Result;
use crate::single_flight::LockManager;
use crate::store::{KvStore, KvValue, SqliteStore, MAX_KEY_LENGTH};

// == Call Arguments ==
/// Logical arguments of one call, used to derive its cache key.
///
/// Only what is pushed here takes part in the key, so receivers and other
/// per-instance state are left out by not adding them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    args: Vec<JsonValue>,
    kwargs: BTreeMap<String, JsonValue>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a positional argument.
    ///
    /// Values that fail to serialize fall back to their type name, which
    /// makes all such values of one type share a key.
    pub fn arg<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        self.args.push(to_key_value(value));
        self
    }

    /// Adds a named argument. Names are sorted in the key, so insertion
    /// order does not matter.
    pub fn kwarg<T: Serialize + ?Sized>(mut self, name: impl Into<String>, value: &T) -> Self {
        self.kwargs.insert(name.into(), to_key_value(value));
        self
    }

    /// Appends a positional argument by its `Debug` text.
    ///
    /// Unique only as far as the `Debug` output is.
    pub fn arg_debug<T: Debug + ?Sized>(mut self, value: &T) -> Self {
        self.args.push(JsonValue::String(format!("{:?}", value)));
        self
    }

    /// Compact canonical JSON `[args, kwargs]`.
    pub fn canonical(&self) -> String {
        let kwargs: serde_json::Map<String, JsonValue> = self
            .kwargs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        JsonValue::Array(vec![
            JsonValue::Array(self.args.clone()),
            JsonValue::Object(kwargs),
        ])
        .to_string()
    }
}

fn to_key_value<T: Serialize + ?Sized>(value: &T) -> JsonValue {
    serde_json::to_value(value).unwrap_or_else(|e| {
        debug!("Argument not serializable ({}), using type name", e);
        JsonValue::String(format!("<{}>", std::any::type_name::<T>()))
    })
}

// == Cache Key ==
/// Deterministic record key for one memoized call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Builds `prefix:function:args`, or `function:args` without a prefix,
    /// truncated to the store's key limit on a char boundary.
    pub fn derive(function: &str, prefix: Option<&str>, args: &CallArgs) -> Self {
        let mut key = match prefix.filter(|p| !p.is_empty()) {
            Some(prefix) => format!("{}:{}:{}", prefix, function, args.canonical()),
            None => format!("{}:{}", function, args.canonical()),
        };
        if key.len() > MAX_KEY_LENGTH {
            let mut end = MAX_KEY_LENGTH;
            while !key.is_char_boundary(end) {
                end -= 1;
            }
            key.truncate(end);
        }
        CacheKey(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// == Backends ==
/// Storage a memoized call reads from and writes to.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Returns the cached document, or None when absent or older than `ttl`.
    async fn load(&self, key: &str, ttl: Duration) -> Result<Option<JsonValue>>;

    async fn store(&self, key: &str, value: JsonValue, ttl: Duration) -> Result<()>;
}

/// Synchronous counterpart of [`CacheBackend`] for callers outside async code.
pub trait BlockingCacheBackend: Send + Sync {
    fn load_blocking(&self, key: &str, ttl: Duration) -> Result<Option<JsonValue>>;

    fn store_blocking(&self, key: &str, value: JsonValue, ttl: Duration) -> Result<()>;
}

fn expire_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl<S: KvStore + ?Sized> CacheBackend for S {
    async fn load(&self, key: &str, ttl: Duration) -> Result<Option<JsonValue>> {
        match self.get(key, Some(expire_secs(ttl))).await? {
            Some(value) => Ok(Some(value.decode_json()?)),
            None => Ok(None),
        }
    }

    async fn store(&self, key: &str, value: JsonValue, _ttl: Duration) -> Result<()> {
        let value = KvValue::encode_json(self.value_type(), value)?;
        self.put(key, value).await
    }
}

#[async_trait]
impl CacheBackend for MemoryCache<JsonValue> {
    async fn load(&self, key: &str, ttl: Duration) -> Result<Option<JsonValue>> {
        Ok(self.try_get(key, Some(ttl)))
    }

    async fn store(&self, key: &str, value: JsonValue, ttl: Duration) -> Result<()> {
        self.put_with_ttl(key, value, ttl);
        Ok(())
    }
}

impl BlockingCacheBackend for SqliteStore {
    fn load_blocking(&self, key: &str, ttl: Duration) -> Result<Option<JsonValue>> {
        match self.get_blocking(key, Some(expire_secs(ttl)))? {
            Some(value) => Ok(Some(value.decode_json()?)),
            None => Ok(None),
        }
    }

    fn store_blocking(&self, key: &str, value: JsonValue, _ttl: Duration) -> Result<()> {
        let value = KvValue::encode_json(KvStore::value_type(self), value)?;
        self.put_blocking(key, value)
    }
}

impl BlockingCacheBackend for MemoryCache<JsonValue> {
    fn load_blocking(&self, key: &str, ttl: Duration) -> Result<Option<JsonValue>> {
        Ok(self.try_get(key, Some(ttl)))
    }

    fn store_blocking(&self, key: &str, value: JsonValue, ttl: Duration) -> Result<()> {
        self.put_with_ttl(key, value, ttl);
        Ok(())
    }
}

/// Adapts a shared store handle.
struct SharedStore(Arc<dyn KvStore>);

#[async_trait]
impl CacheBackend for SharedStore {
    async fn load(&self, key: &str, ttl: Duration) -> Result<Option<JsonValue>> {
        self.0.as_ref().load(key, ttl).await
    }

    async fn store(&self, key: &str, value: JsonValue, ttl: Duration) -> Result<()> {
        self.0.as_ref().store(key, value, ttl).await
    }
}

// == KV Cache ==
struct CacheInner {
    backend: Arc<dyn CacheBackend>,
    blocking: Option<Arc<dyn BlockingCacheBackend>>,
    locks: LockManager,
    options: CacheOptions,
}

/// Memoizing cache bound to one backend. Clones share the backend and the
/// lock table.
#[derive(Clone)]
pub struct KvCache {
    inner: Arc<CacheInner>,
}

impl std::fmt::Debug for KvCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvCache")
            .field("options", &self.inner.options)
            .field("blocking", &self.inner.blocking.is_some())
            .field("locks", &self.inner.locks.len())
            .finish()
    }
}

impl KvCache {
    /// Cache over an async-only backend; `call_blocking` bypasses it.
    pub fn new(backend: Arc<dyn CacheBackend>, options: CacheOptions) -> Self {
        Self::build(backend, None, options)
    }

    /// Cache over a backend that also serves the synchronous path.
    pub fn with_blocking<B>(backend: Arc<B>, options: CacheOptions) -> Self
    where
        B: CacheBackend + BlockingCacheBackend + 'static,
    {
        let blocking: Arc<dyn BlockingCacheBackend> = backend.clone();
        Self::build(backend, Some(blocking), options)
    }

    /// Cache over a store opened with [`crate::store::open_store`].
    pub fn from_store(store: Arc<dyn KvStore>, options: CacheOptions) -> Self {
        Self::new(Arc::new(SharedStore(store)), options)
    }

    /// Cache over a fresh in-process [`MemoryCache`].
    pub fn in_memory(options: CacheOptions) -> Self {
        Self::with_blocking(Arc::new(MemoryCache::<JsonValue>::new()), options)
    }

    fn build(
        backend: Arc<dyn CacheBackend>,
        blocking: Option<Arc<dyn BlockingCacheBackend>>,
        options: CacheOptions,
    ) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                backend,
                blocking,
                locks: LockManager::new(options.lock_table_max),
                options,
            }),
        }
    }

    pub fn options(&self) -> &CacheOptions {
        &self.inner.options
    }

    /// Lock table shared by every call site of this cache.
    pub fn locks(&self) -> &LockManager {
        &self.inner.locks
    }

    /// Starts a call site for `function`, using the cache's default TTL.
    pub fn memoize(&self, function: impl Into<String>) -> Memoized {
        Memoized {
            cache: self.clone(),
            function: function.into(),
            prefix: None,
            ttl: self.inner.options.default_ttl,
            use_lock: self.inner.options.use_lock,
        }
    }
}

// == Memoized Call Site ==
/// One memoized function: identity, namespace and TTL.
#[derive(Debug, Clone)]
pub struct Memoized {
    cache: KvCache,
    function: String,
    prefix: Option<String>,
    ttl: u64,
    use_lock: bool,
}

impl Memoized {
    /// TTL in seconds; zero disables caching for this call site.
    pub fn ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl = ttl_secs;
        self
    }

    /// Namespace prepended to every key of this call site.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Overrides the cache-wide single-flight setting.
    pub fn use_lock(mut self, use_lock: bool) -> Self {
        self.use_lock = use_lock;
        self
    }

    pub fn key(&self, args: &CallArgs) -> CacheKey {
        CacheKey::derive(&self.function, self.prefix.as_deref(), args)
    }

    fn ttl_duration(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }

    /// Returns the cached result for `args`, computing and storing it on a miss.
    pub async fn call<T, F, Fut>(&self, args: &CallArgs, compute: F) -> T
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = T> + Send,
    {
        let result = self
            .try_call(args, move || async move { Ok::<T, Infallible>(compute().await) })
            .await;
        match result {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Like [`Memoized::call`] for fallible work. Only `Ok` results are cached.
    pub async fn try_call<T, E, F, Fut>(
        &self,
        args: &CallArgs,
        compute: F,
    ) -> std::result::Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send,
        E: Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, E>> + Send,
    {
        if self.ttl == 0 {
            return compute().await;
        }
        let key = self.key(args);

        if let Some(hit) = self.lookup(&key).await {
            return Ok(hit);
        }
        if !self.use_lock {
            let value = compute().await?;
            self.write_back(&key, &value).await;
            return Ok(value);
        }

        let _guard = self.cache.inner.locks.acquire(key.as_str()).await;
        if let Some(hit) = self.lookup(&key).await {
            debug!("Cache filled while waiting: {}", key);
            return Ok(hit);
        }
        let value = compute().await?;
        self.write_back(&key, &value).await;
        Ok(value)
    }

    /// Synchronous path: check, compute, store. Never locks.
    pub fn call_blocking<T, F>(&self, args: &CallArgs, compute: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        let Some(backend) = self.cache.inner.blocking.as_ref().filter(|_| self.ttl > 0) else {
            return compute();
        };
        let key = self.key(args);
        let ttl = self.ttl_duration();

        match backend.load_blocking(key.as_str(), ttl) {
            Ok(Some(json)) => match serde_json::from_value(json) {
                Ok(hit) => {
                    debug!("Cache hit: {}", key);
                    return hit;
                }
                Err(e) => warn!("Discarding undecodable cache entry {}: {}", key, e),
            },
            Ok(None) => debug!("Cache miss: {}", key),
            Err(e) => warn!("Cache read failed for {}: {}", key, e),
        }

        let value = compute();
        match serde_json::to_value(&value) {
            Ok(json) => {
                if let Err(e) = backend.store_blocking(key.as_str(), json, ttl) {
                    warn!("Cache write failed for {}: {}", key, e);
                }
            }
            Err(e) => warn!("Result for {} not serializable: {}", key, e),
        }
        value
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        match self.cache.inner.backend.load(key.as_str(), self.ttl_duration()).await {
            Ok(Some(json)) => match serde_json::from_value(json) {
                Ok(hit) => {
                    debug!("Cache hit: {}", key);
                    Some(hit)
                }
                Err(e) => {
                    warn!("Discarding undecodable cache entry {}: {}", key, e);
                    None
                }
            },
            Ok(None) => {
                debug!("Cache miss: {}", key);
                None
            }
            Err(e) => {
                warn!("Cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    async fn write_back<T: Serialize>(&self, key: &CacheKey, value: &T) {
        let json = match serde_json::to_value(value) {
            Ok(json) => json,
            Err(e) => {
                warn!("Result for {} not serializable: {}", key, e);
                return;
            }
        };
        if let Err(e) = self
            .cache
            .inner
            .backend
            .store(key.as_str(), json, self.ttl_duration())
            .await
        {
            warn!("Cache write failed for {}: {}", key, e);
        }
    }
}
