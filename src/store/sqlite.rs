//! Embedded SQLite backend
//!
//! One connection behind a mutex. Busy/locked errors are retried a fixed
//! number of times before surfacing as `KvError::Transient`. Async callers
//! reach the connection through `spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use super::query::{
    json_text, prefix_upper_bound, require_non_empty, sql_count, validate_json_path, validate_key,
    validate_table_name, JsonMatch, JsonPage, JsonSearch, OrderField, ScanOptions, SearchCursor,
    SortOrder, TimeQuery,
};
use super::value::{deep_merge, KvValue, Record, TypeInfo, ValueType};
use super::{require_batch_size, KvStore, KEY_CHUNK};
use crate::error::{KvError, Result};

/// Attempts made for an operation that keeps hitting a busy database
const RETRY_ATTEMPTS: u32 = 3;

/// Fixed delay between busy retries
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// How long SQLite itself waits on a lock before reporting busy
const BUSY_TIMEOUT: Duration = Duration::from_millis(3000);

const COLUMNS: &str = "key, value, created_at, updated_at";

// == SQLite Store ==
/// Key-value store in a single SQLite file (or in memory).
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<SqliteDb>,
}

struct SqliteDb {
    conn: Mutex<Connection>,
    table: String,
    quoted: String,
    value_type: ValueType,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("table", &self.db.table)
            .field("value_type", &self.db.value_type)
            .finish()
    }
}

impl SqliteStore {
    // == Constructors ==
    /// Opens (or creates) the database at `path` and ensures the table exists.
    ///
    /// `":memory:"` opens a private in-memory database.
    pub fn open(path: impl AsRef<Path>, table: &str, value_type: ValueType) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    KvError::Backend(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn, table, value_type)
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory(table: &str, value_type: ValueType) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, table, value_type)
    }

    fn from_connection(conn: Connection, table: &str, value_type: ValueType) -> Result<Self> {
        validate_table_name(table)?;
        let db = SqliteDb {
            conn: Mutex::new(conn),
            table: table.to_string(),
            quoted: format!("\"{}\"", table),
            value_type,
        };
        db.initialize()?;
        Ok(Self { db: Arc::new(db) })
    }

    // == Blocking Access ==
    /// Synchronous `put` for callers outside an async context.
    pub fn put_blocking(&self, key: &str, value: KvValue) -> Result<()> {
        self.db.put(key, &value)
    }

    /// Synchronous `get` for callers outside an async context.
    pub fn get_blocking(&self, key: &str, expire_secs: Option<u64>) -> Result<Option<KvValue>> {
        Ok(self.db.get_record(key, expire_secs)?.map(|r| r.value))
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteDb) -> Result<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db)).await?
    }
}

impl SqliteDb {
    // == Retry ==
    /// Runs `op` against the connection, retrying busy/locked failures.
    fn with_retry<T>(&self, mut op: impl FnMut(&mut Connection) -> Result<T>) -> Result<T> {
        let mut attempt = 1;
        loop {
            let result = {
                let mut conn = self
                    .conn
                    .lock()
                    .map_err(|_| KvError::Backend("sqlite connection mutex poisoned".to_string()))?;
                op(&mut conn)
            };
            match result {
                Err(err) if err.is_transient() && attempt < RETRY_ATTEMPTS => {
                    warn!(
                        "SQLite busy on {} (attempt {}/{}): {}",
                        self.table, attempt, RETRY_ATTEMPTS, err
                    );
                    attempt += 1;
                    std::thread::sleep(RETRY_DELAY);
                }
                other => return other,
            }
        }
    }

    fn initialize(&self) -> Result<()> {
        let create = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                key TEXT PRIMARY KEY,
                value {column},
                created_at REAL NOT NULL,
                updated_at REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS \"IDX_{name}_value\" ON {table} (value);",
            table = self.quoted,
            column = self.value_type.sqlite_column(),
            name = self.table,
        );
        self.with_retry(|conn| {
            conn.busy_timeout(BUSY_TIMEOUT)?;
            let _mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.execute_batch(&create)?;
            Ok(())
        })?;
        info!(
            "SQLite table {} ready ({} values)",
            self.table, self.value_type
        );
        Ok(())
    }

    fn select(&self) -> String {
        format!("SELECT {} FROM {}", COLUMNS, self.quoted)
    }

    fn upsert_sql(&self, rows: usize) -> String {
        let values = vec!["(?, ?, ?, ?)"; rows].join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES {}
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            self.quoted, COLUMNS, values
        )
    }

    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Record>> {
        let value_type = self.value_type;
        self.with_retry(|conn| query_records(conn, value_type, sql, params))
    }

    // == Basic CRUD ==
    fn put(&self, key: &str, value: &KvValue) -> Result<()> {
        validate_key(key)?;
        value.check_type(self.value_type)?;
        let sql = self.upsert_sql(1);
        let now = to_epoch(Utc::now());
        let bound = bind_value(value);
        self.with_retry(|conn| {
            conn.execute(&sql, params![key, bound, now, now])?;
            Ok(())
        })
    }

    fn get_record(&self, key: &str, expire_secs: Option<u64>) -> Result<Option<Record>> {
        let sql = format!("{} WHERE key = ?1 LIMIT 1", self.select());
        let delete = format!("DELETE FROM {} WHERE key = ?1", self.quoted);
        let value_type = self.value_type;
        self.with_retry(|conn| {
            let record = conn
                .query_row(&sql, params![key], |row| row_to_record(value_type, row))
                .optional()?;
            match (record, expire_secs) {
                (Some(record), Some(expire)) if record.is_expired(expire, Utc::now()) => {
                    conn.execute(&delete, params![key])?;
                    debug!("Lazily expired {} after {}s", key, expire);
                    Ok(None)
                }
                (record, _) => Ok(record),
            }
        })
    }

    fn merge(&self, key: &str, partial: &JsonValue) -> Result<()> {
        self.value_type.require_document("merge")?;
        validate_key(key)?;
        let select = format!("SELECT value FROM {} WHERE key = ?1", self.quoted);
        let upsert = self.upsert_sql(1);
        self.with_retry(|conn| {
            let tx = conn.transaction()?;
            let existing: Option<String> = tx
                .query_row(&select, params![key], |row| row.get(0))
                .optional()?;
            let merged = match existing {
                Some(text) => {
                    let mut doc: JsonValue = serde_json::from_str(&text)?;
                    deep_merge(&mut doc, partial.clone());
                    doc
                }
                None => partial.clone(),
            };
            let now = to_epoch(Utc::now());
            tx.execute(&upsert, params![key, merged.to_string(), now, now])?;
            tx.commit()?;
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let sql = format!("DELETE FROM {} WHERE key = ?1", self.quoted);
        self.with_retry(|conn| Ok(conn.execute(&sql, params![key])? > 0))
    }

    fn has(&self, key: &str) -> Result<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE key = ?1 LIMIT 1", self.quoted);
        self.with_retry(|conn| {
            Ok(conn
                .query_row(&sql, params![key], |_| Ok(()))
                .optional()?
                .is_some())
        })
    }

    fn keys(&self) -> Result<Vec<String>> {
        let sql = format!("SELECT key FROM {} ORDER BY key ASC", self.quoted);
        self.with_retry(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let keys = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(keys)
        })
    }

    fn count(&self) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", self.quoted);
        self.with_retry(|conn| {
            let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    fn clear(&self) -> Result<u64> {
        let sql = format!("DELETE FROM {}", self.quoted);
        self.with_retry(|conn| Ok(conn.execute(&sql, [])? as u64))
    }

    fn add(&self, key: &str, value: &KvValue) -> Result<()> {
        validate_key(key)?;
        value.check_type(self.value_type)?;
        let sql = format!(
            "INSERT INTO {} ({}) VALUES (?1, ?2, ?3, ?3) ON CONFLICT(key) DO NOTHING",
            self.quoted, COLUMNS
        );
        let now = to_epoch(Utc::now());
        let bound = bind_value(value);
        let inserted = self.with_retry(|conn| Ok(conn.execute(&sql, params![key, bound, now])?))?;
        if inserted == 0 {
            return Err(KvError::AlreadyExists(format!("key \"{}\" already exists", key)));
        }
        Ok(())
    }

    // == Bulk Operations ==
    fn get_records(&self, keys: &[String]) -> Result<Vec<Record>> {
        let mut records = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(KEY_CHUNK) {
            let sql = format!(
                "{} WHERE key IN ({})",
                self.select(),
                placeholders(chunk.len())
            );
            let params: Vec<SqlValue> = chunk.iter().map(|k| SqlValue::Text(k.clone())).collect();
            records.extend(self.query(&sql, &params)?);
        }
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    fn put_many(&self, entries: &[(String, KvValue)], batch_size: usize) -> Result<()> {
        require_batch_size(batch_size)?;
        for (key, value) in entries {
            validate_key(key)?;
            value.check_type(self.value_type)?;
        }
        let now = to_epoch(Utc::now());
        self.with_retry(|conn| {
            let tx = conn.transaction()?;
            for chunk in entries.chunks(batch_size) {
                let mut params = Vec::with_capacity(chunk.len() * 4);
                for (key, value) in chunk {
                    params.push(SqlValue::Text(key.clone()));
                    params.push(bind_value(value));
                    params.push(SqlValue::Real(now));
                    params.push(SqlValue::Real(now));
                }
                tx.execute(&self.upsert_sql(chunk.len()), params_from_iter(params.iter()))?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    fn delete_many(&self, keys: &[String]) -> Result<u64> {
        self.with_retry(|conn| {
            let tx = conn.transaction()?;
            let mut removed = 0u64;
            for chunk in keys.chunks(KEY_CHUNK) {
                let sql = format!(
                    "DELETE FROM {} WHERE key IN ({})",
                    self.quoted,
                    placeholders(chunk.len())
                );
                removed += tx.execute(&sql, params_from_iter(chunk.iter()))? as u64;
            }
            tx.commit()?;
            Ok(removed)
        })
    }

    // == Scans ==
    /// Runs a key scan; every condition and filter is applied before paging.
    fn scan(
        &self,
        mut conditions: Vec<String>,
        mut params: Vec<SqlValue>,
        options: &ScanOptions,
    ) -> Result<Vec<Record>> {
        if let Some(needle) = options.contains.as_deref().filter(|n| !n.is_empty()) {
            conditions.push(if options.case_sensitive {
                "instr(key, ?) > 0".to_string()
            } else {
                "instr(lower(key), lower(?)) > 0".to_string()
            });
            params.push(SqlValue::Text(needle.to_string()));
        }
        for (column, op, bound) in options.time_filters() {
            conditions.push(format!("{} {} ?", column, op));
            params.push(SqlValue::Real(to_epoch(bound)));
        }

        let mut sql = self.select();
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(&format!(" ORDER BY key {}", options.order.as_sql()));
        push_paging(&mut sql, &mut params, options.limit, options.offset);
        self.query(&sql, &params)
    }

    fn get_recent(&self, limit: u64, within: Option<Duration>) -> Result<Vec<Record>> {
        let mut sql = self.select();
        let mut params = Vec::new();
        if let Some(window) = within {
            sql.push_str(" WHERE created_at >= ?");
            params.push(SqlValue::Real(to_epoch(Utc::now()) - window.as_secs_f64()));
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?");
        params.push(SqlValue::Integer(sql_count(limit)));
        self.query(&sql, &params)
    }

    // == Value Lookups ==
    fn get_values(&self, value: &KvValue, limit: Option<u64>) -> Result<Vec<Record>> {
        value.check_type(self.value_type)?;
        let mut sql = format!("{} WHERE value = ? ORDER BY key ASC", self.select());
        let mut params = vec![bind_value(value)];
        push_paging(&mut sql, &mut params, limit, None);
        self.query(&sql, &params)
    }

    fn find_fuzzy(&self, value: &KvValue) -> Result<Vec<String>> {
        let needle = match value {
            KvValue::Text(s) => s.clone(),
            KvValue::Json(v) => json_text(v),
            other => {
                return Err(KvError::UnsupportedOperation(format!(
                    "fuzzy search not supported for {} values",
                    other.value_type()
                )))
            }
        };
        if !matches!(self.value_type, ValueType::Text | ValueType::Json) {
            return Err(KvError::UnsupportedOperation(format!(
                "fuzzy search not supported for {} stores",
                self.value_type
            )));
        }
        let sql = format!(
            "{} WHERE instr(value, ?) > 0 ORDER BY key ASC",
            self.select()
        );
        Ok(self
            .query(&sql, &[SqlValue::Text(needle)])?
            .into_iter()
            .map(|r| r.key)
            .collect())
    }

    fn find_bool_values(
        &self,
        value: bool,
        order: SortOrder,
        take: Option<u64>,
    ) -> Result<Vec<Record>> {
        let bound = match self.value_type {
            ValueType::Boolean => bind_value(&KvValue::Boolean(value)),
            ValueType::Json => bind_value(&KvValue::Json(JsonValue::Bool(value))),
            other => {
                return Err(KvError::UnsupportedOperation(format!(
                    "find_bool_values is only supported for boolean and json stores, not {}",
                    other
                )))
            }
        };
        let mut sql = format!(
            "{} WHERE value = ? ORDER BY created_at {}",
            self.select(),
            order.as_sql()
        );
        let mut params = vec![bound];
        push_paging(&mut sql, &mut params, take, None);
        self.query(&sql, &params)
    }

    fn search_by_time(&self, query: &TimeQuery) -> Result<Vec<Record>> {
        let column = query.column.as_sql();
        let sql = format!(
            "{} WHERE {} {} ? ORDER BY {} {} LIMIT ?",
            self.select(),
            column,
            query.direction.as_sql(),
            column,
            query.order.as_sql()
        );
        self.query(
            &sql,
            &[
                SqlValue::Real(to_epoch(query.timestamp)),
                SqlValue::Integer(sql_count(query.take)),
            ],
        )
    }

    fn search_json(&self, search: &JsonSearch) -> Result<JsonPage> {
        self.value_type.require_document("search_json")?;
        search.validate()?;

        let mut conditions = Vec::new();
        let mut params = Vec::new();
        for (path, expected) in &search.contains {
            conditions.push(format!("{} = ?", text_extract(&mut params, path)?));
            params.push(SqlValue::Text(json_text(expected)));
        }
        for cond in &search.compare {
            params.push(SqlValue::Text(sqlite_json_path(&cond.path)?));
            conditions.push(format!("json_extract(value, ?) {} ?", cond.op.as_sql()));
            params.push(bind_scalar(&cond.value));
        }
        for cond in &search.text_search {
            let expr = text_extract(&mut params, &cond.path)?;
            conditions.push(if cond.case_sensitive {
                format!("instr({}, ?) > 0", expr)
            } else {
                format!("instr(lower({}), lower(?)) > 0", expr)
            });
            params.push(SqlValue::Text(cond.text.clone()));
        }

        let field = search.order_field.as_sql();
        let cursor_op = match search.order {
            SortOrder::Asc => ">",
            SortOrder::Desc => "<",
        };
        match &search.cursor {
            Some(SearchCursor::Key(key)) if search.order_field == OrderField::Key => {
                conditions.push(format!("key {} ?", cursor_op));
                params.push(SqlValue::Text(key.clone()));
            }
            Some(SearchCursor::Time(at, key)) if search.order_field != OrderField::Key => {
                conditions.push(format!("({}, key) {} (?, ?)", field, cursor_op));
                params.push(SqlValue::Real(to_epoch(*at)));
                params.push(SqlValue::Text(key.clone()));
            }
            Some(_) => {
                return Err(KvError::InvalidArgument(format!(
                    "cursor does not match order field {}",
                    field
                )))
            }
            None => {}
        }

        let mut sql = self.select();
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(&format!(
            " ORDER BY {} {}, key {} LIMIT ?",
            field,
            search.order.as_sql(),
            search.order.as_sql()
        ));
        params.push(SqlValue::Integer(sql_count(search.limit).saturating_add(1)));

        let rows = self.query(&sql, &params)?;
        Ok(JsonPage::from_rows(rows, search.limit, search.order_field))
    }

    /// Time-bounded scan; document filters run on each row in Rust, so the
    /// `take` cap is applied after them.
    fn search_json_by_time(&self, query: &TimeQuery, filter: &JsonMatch) -> Result<Vec<Record>> {
        self.value_type.require_document("search_json_by_time")?;
        filter.validate()?;
        let column = query.column.as_sql();
        let mut sql = format!(
            "{} WHERE {} {} ? ORDER BY {} {}, key {}",
            self.select(),
            column,
            query.direction.as_sql(),
            column,
            query.order.as_sql(),
            query.order.as_sql()
        );
        let mut params = vec![SqlValue::Real(to_epoch(query.timestamp))];
        if filter.is_empty() {
            push_paging(&mut sql, &mut params, Some(query.take), None);
        }
        let take = usize::try_from(query.take).unwrap_or(usize::MAX);
        Ok(self
            .query(&sql, &params)?
            .into_iter()
            .filter(|r| r.value.as_json().map_or(false, |doc| filter.matches(doc)))
            .take(take)
            .collect())
    }

    fn get_random(&self, count: u64) -> Result<Vec<Record>> {
        let sql = format!("{} ORDER BY RANDOM() LIMIT ?", self.select());
        self.query(&sql, &[SqlValue::Integer(sql_count(count))])
    }
}

// == Row Helpers ==
fn query_records(
    conn: &Connection,
    value_type: ValueType,
    sql: &str,
    params: &[SqlValue],
) -> Result<Vec<Record>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            row_to_record(value_type, row)
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn row_to_record(value_type: ValueType, row: &Row<'_>) -> rusqlite::Result<Record> {
    Ok(Record {
        key: row.get(0)?,
        value: read_value(value_type, row, 1)?,
        created_at: from_epoch(row.get(2)?),
        updated_at: from_epoch(row.get(3)?),
    })
}

fn read_value(value_type: ValueType, row: &Row<'_>, idx: usize) -> rusqlite::Result<KvValue> {
    Ok(match value_type {
        ValueType::Json => {
            let text: String = row.get(idx)?;
            let doc = serde_json::from_str(&text)
                .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))?;
            KvValue::Json(doc)
        }
        ValueType::Text => KvValue::Text(row.get(idx)?),
        ValueType::Bytes => KvValue::Bytes(row.get(idx)?),
        ValueType::Integer => KvValue::Integer(row.get(idx)?),
        ValueType::Float => KvValue::Float(row.get(idx)?),
        ValueType::Boolean => KvValue::Boolean(row.get(idx)?),
    })
}

/// SQLite representation of a value.
fn bind_value(value: &KvValue) -> SqlValue {
    match value {
        KvValue::Json(v) => SqlValue::Text(v.to_string()),
        KvValue::Text(s) => SqlValue::Text(s.clone()),
        KvValue::Bytes(b) => SqlValue::Blob(b.clone()),
        KvValue::Integer(i) => SqlValue::Integer(*i),
        KvValue::Float(f) => SqlValue::Real(*f),
        KvValue::Boolean(b) => SqlValue::Integer(i64::from(*b)),
    }
}

/// SQL value comparable with what `json_extract` returns for `value`.
fn bind_scalar(value: &JsonValue) -> SqlValue {
    match value {
        JsonValue::Null => SqlValue::Null,
        JsonValue::Bool(b) => SqlValue::Integer(i64::from(*b)),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        JsonValue::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// `$."a"."b"` for the dotted path `a.b`.
fn sqlite_json_path(path: &str) -> Result<String> {
    validate_json_path(path)?;
    Ok(path
        .split('.')
        .fold(String::from("$"), |acc, seg| format!("{}.\"{}\"", acc, seg)))
}

/// Text form of a document field, matching PostgreSQL `#>>` output.
fn text_extract(params: &mut Vec<SqlValue>, path: &str) -> Result<String> {
    let json_path = sqlite_json_path(path)?;
    params.push(SqlValue::Text(json_path.clone()));
    params.push(SqlValue::Text(json_path));
    Ok("(CASE json_type(value, ?) WHEN 'true' THEN 'true' WHEN 'false' THEN 'false' \
        ELSE CAST(json_extract(value, ?) AS TEXT) END)"
        .to_string())
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn push_paging(sql: &mut String, params: &mut Vec<SqlValue>, limit: Option<u64>, offset: Option<u64>) {
    match (limit, offset) {
        (None, None) => {}
        (limit, offset) => {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(SqlValue::Integer(limit.map_or(-1, sql_count)));
            params.push(SqlValue::Integer(sql_count(offset.unwrap_or(0))));
        }
    }
}

fn to_epoch(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}

fn from_epoch(secs: f64) -> DateTime<Utc> {
    let micros = (secs * 1_000_000.0).round() as i64;
    DateTime::from_timestamp(micros.div_euclid(1_000_000), (micros.rem_euclid(1_000_000) * 1000) as u32)
        .unwrap_or_default()
}

// == KvStore Implementation ==
#[async_trait]
impl KvStore for SqliteStore {
    fn value_type(&self) -> ValueType {
        self.db.value_type
    }

    fn table_name(&self) -> &str {
        &self.db.table
    }

    fn type_info(&self) -> TypeInfo {
        TypeInfo {
            value_type: self.db.value_type,
            column_type: self.db.value_type.sqlite_column(),
        }
    }

    async fn put(&self, key: &str, value: KvValue) -> Result<()> {
        let key = key.to_string();
        self.run(move |db| db.put(&key, &value)).await
    }

    async fn get_record(&self, key: &str, expire_secs: Option<u64>) -> Result<Option<Record>> {
        let key = key.to_string();
        self.run(move |db| db.get_record(&key, expire_secs)).await
    }

    async fn merge(&self, key: &str, partial: JsonValue) -> Result<()> {
        let key = key.to_string();
        self.run(move |db| db.merge(&key, &partial)).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.run(move |db| db.delete(&key)).await
    }

    async fn has(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.run(move |db| db.has(&key)).await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        self.run(|db| db.keys()).await
    }

    async fn count(&self) -> Result<u64> {
        self.run(|db| db.count()).await
    }

    async fn clear(&self) -> Result<u64> {
        self.run(|db| db.clear()).await
    }

    async fn get_records(&self, keys: &[String]) -> Result<Vec<Record>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let keys = keys.to_vec();
        self.run(move |db| db.get_records(&keys)).await
    }

    async fn put_many(&self, entries: Vec<(String, KvValue)>, batch_size: usize) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.run(move |db| db.put_many(&entries, batch_size)).await
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let keys = keys.to_vec();
        self.run(move |db| db.delete_many(&keys)).await
    }

    async fn get_all(&self, options: &ScanOptions) -> Result<Vec<Record>> {
        let options = options.clone();
        self.run(move |db| db.scan(Vec::new(), Vec::new(), &options)).await
    }

    async fn get_recent(&self, limit: u64, within: Option<Duration>) -> Result<Vec<Record>> {
        self.run(move |db| db.get_recent(limit, within)).await
    }

    async fn get_with_prefix(&self, prefix: &str, options: &ScanOptions) -> Result<Vec<Record>> {
        require_non_empty("prefix", prefix)?;
        let params = vec![
            SqlValue::Text(prefix.to_string()),
            SqlValue::Text(prefix_upper_bound(prefix)),
        ];
        let options = options.clone();
        self.run(move |db| {
            db.scan(vec!["key >= ?".to_string(), "key < ?".to_string()], params, &options)
        })
        .await
    }

    async fn get_with_contains(
        &self,
        substring: &str,
        options: &ScanOptions,
    ) -> Result<Vec<Record>> {
        require_non_empty("substring", substring)?;
        let condition = if options.case_sensitive {
            "instr(key, ?) > 0"
        } else {
            "instr(lower(key), lower(?)) > 0"
        };
        let params = vec![SqlValue::Text(substring.to_string())];
        let options = options.clone();
        self.run(move |db| db.scan(vec![condition.to_string()], params, &options))
            .await
    }

    async fn get_with_suffix(&self, suffix: &str, options: &ScanOptions) -> Result<Vec<Record>> {
        require_non_empty("suffix", suffix)?;
        let condition = if options.case_sensitive {
            "substr(key, -length(?)) = ?"
        } else {
            "lower(substr(key, -length(?))) = lower(?)"
        };
        let params = vec![
            SqlValue::Text(suffix.to_string()),
            SqlValue::Text(suffix.to_string()),
        ];
        let options = options.clone();
        self.run(move |db| db.scan(vec![condition.to_string()], params, &options))
            .await
    }

    async fn add(&self, key: &str, value: KvValue) -> Result<()> {
        let key = key.to_string();
        self.run(move |db| db.add(&key, &value)).await
    }

    async fn is_value_exists(&self, value: &KvValue) -> Result<bool> {
        let value = value.clone();
        self.run(move |db| Ok(!db.get_values(&value, Some(1))?.is_empty()))
            .await
    }

    async fn get_values(&self, value: &KvValue) -> Result<Vec<Record>> {
        let value = value.clone();
        self.run(move |db| db.get_values(&value, None)).await
    }

    async fn find_by_value(&self, value: &KvValue, exact: bool) -> Result<Vec<String>> {
        let value = value.clone();
        self.run(move |db| {
            if exact {
                Ok(db
                    .get_values(&value, None)?
                    .into_iter()
                    .map(|r| r.key)
                    .collect())
            } else {
                db.find_fuzzy(&value)
            }
        })
        .await
    }

    async fn find_bool_values(
        &self,
        value: bool,
        order: SortOrder,
        take: Option<u64>,
    ) -> Result<Vec<Record>> {
        self.run(move |db| db.find_bool_values(value, order, take))
            .await
    }

    async fn search_by_time(&self, query: &TimeQuery) -> Result<Vec<Record>> {
        let query = query.clone();
        self.run(move |db| db.search_by_time(&query)).await
    }

    async fn search_json(&self, search: &JsonSearch) -> Result<JsonPage> {
        let search = search.clone();
        self.run(move |db| db.search_json(&search)).await
    }

    async fn search_json_by_time(
        &self,
        query: &TimeQuery,
        filter: &JsonMatch,
    ) -> Result<Vec<Record>> {
        let query = query.clone();
        let filter = filter.clone();
        self.run(move |db| db.search_json_by_time(&query, &filter))
            .await
    }

    async fn get_random(&self, count: u64) -> Result<Vec<Record>> {
        self.run(move |db| db.get_random(count)).await
    }
}
