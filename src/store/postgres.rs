//! PostgreSQL backend
//!
//! Pooled connections through deadpool-postgres. Errors surface immediately;
//! the pool is the unit of concurrency, so nothing here serializes callers.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Config, ManagerConfig, Object, Pool, PoolConfig, RecyclingMethod, Runtime};
use serde_json::Value as JsonValue;
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info};

use super::query::{
    json_text, prefix_upper_bound, require_non_empty, sql_count, validate_json_path, validate_key,
    validate_table_name, JsonMatch, JsonPage, JsonSearch, OrderField, ScanOptions, SearchCursor,
    SortOrder, TimeQuery,
};
use super::value::{KvValue, Record, TypeInfo, ValueType};
use super::{require_batch_size, KvStore, KEY_CHUNK};
use crate::error::{KvError, Result};

const COLUMNS: &str = "key, value, created_at, updated_at";

const DEEP_MERGE_FN: &str = r#"
CREATE OR REPLACE FUNCTION kv_jsonb_deep_merge(a jsonb, b jsonb)
RETURNS jsonb AS $$
DECLARE
  result jsonb;
  k text;
  v jsonb;
BEGIN
  IF a IS NULL OR jsonb_typeof(a) <> 'object' OR jsonb_typeof(b) <> 'object' THEN
    RETURN b;
  END IF;
  result := a;
  FOR k, v IN SELECT * FROM jsonb_each(b) LOOP
    IF jsonb_typeof(result -> k) = 'object' AND jsonb_typeof(v) = 'object' THEN
      result := jsonb_set(result, ARRAY[k], kv_jsonb_deep_merge(result -> k, v));
    ELSE
      result := result || jsonb_build_object(k, v);
    END IF;
  END LOOP;
  RETURN result;
END;
$$ LANGUAGE plpgsql IMMUTABLE;
"#;

type Param = Box<dyn ToSql + Sync + Send>;

// == Statement Builder ==
/// Collects owned parameters and hands out `$n` placeholders.
#[derive(Default)]
struct Statement {
    sql: String,
    params: Vec<Param>,
}

impl Statement {
    fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    fn bind<T: ToSql + Sync + Send + 'static>(&mut self, value: T) -> String {
        self.params.push(Box::new(value));
        format!("${}", self.params.len())
    }

    fn bind_boxed(&mut self, value: Param) -> String {
        self.params.push(value);
        format!("${}", self.params.len())
    }

    fn push(&mut self, fragment: &str) {
        self.sql.push_str(fragment);
    }

    fn refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect()
    }

    fn push_where(&mut self, conditions: &[String]) {
        if !conditions.is_empty() {
            self.sql.push_str(" WHERE ");
            self.sql.push_str(&conditions.join(" AND "));
        }
    }

    fn push_paging(&mut self, limit: Option<u64>, offset: Option<u64>) {
        if let Some(limit) = limit {
            let p = self.bind(sql_count(limit));
            self.sql.push_str(&format!(" LIMIT {}", p));
        }
        if let Some(offset) = offset {
            let p = self.bind(sql_count(offset));
            self.sql.push_str(&format!(" OFFSET {}", p));
        }
    }
}

// == PostgreSQL Store ==
/// Key-value store in a PostgreSQL table.
#[derive(Clone)]
pub struct PgStore {
    pool: Pool,
    table: String,
    quoted: String,
    value_type: ValueType,
}

impl std::fmt::Debug for PgStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStore")
            .field("table", &self.table)
            .field("value_type", &self.value_type)
            .field("pool_size", &self.pool.status().size)
            .finish()
    }
}

impl PgStore {
    // == Constructors ==
    /// Creates a pool for `url` and ensures the table exists.
    pub async fn connect(
        url: &str,
        table: &str,
        value_type: ValueType,
        pool_size: usize,
    ) -> Result<Self> {
        if url.is_empty() {
            return Err(KvError::InvalidArgument(
                "database url is required".to_string(),
            ));
        }
        let mut cfg = Config::new();
        cfg.url = Some(url.to_string());
        cfg.pool = Some(PoolConfig::new(pool_size.max(1)));
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| KvError::Pool(format!("failed to create pool: {}", e)))?;
        Self::with_pool(pool, table, value_type).await
    }

    /// Wraps an existing pool and ensures the table exists.
    pub async fn with_pool(pool: Pool, table: &str, value_type: ValueType) -> Result<Self> {
        validate_table_name(table)?;
        let store = Self {
            pool,
            table: table.to_string(),
            quoted: format!("\"{}\"", table),
            value_type,
        };
        store.initialize().await?;
        Ok(store)
    }

    async fn conn(&self) -> Result<Object> {
        Ok(self.pool.get().await?)
    }

    async fn initialize(&self) -> Result<()> {
        let mut ddl = format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                key varchar(255) COLLATE \"C\" PRIMARY KEY,
                value {column},
                created_at timestamptz NOT NULL DEFAULT now(),
                updated_at timestamptz NOT NULL DEFAULT now()
            );",
            table = self.quoted,
            column = self.value_type.postgres_column(),
        );
        if self.value_type.is_document() {
            ddl.push_str(&format!(
                "CREATE INDEX IF NOT EXISTS \"IDX_{}_value_gin\" ON {} USING gin (value);",
                self.table, self.quoted
            ));
            ddl.push_str(DEEP_MERGE_FN);
        } else {
            ddl.push_str(&format!(
                "CREATE INDEX IF NOT EXISTS \"IDX_{}_value_btree\" ON {} (value);",
                self.table, self.quoted
            ));
        }
        self.conn().await?.batch_execute(&ddl).await?;
        info!(
            "PostgreSQL table {} ready ({} values)",
            self.table, self.value_type
        );
        Ok(())
    }

    fn select(&self) -> String {
        format!("SELECT {} FROM {}", COLUMNS, self.quoted)
    }

    async fn query(&self, stmt: &Statement) -> Result<Vec<Record>> {
        let conn = self.conn().await?;
        let rows = conn.query(stmt.sql.as_str(), &stmt.refs()).await?;
        rows.iter()
            .map(|row| row_to_record(self.value_type, row))
            .collect()
    }

    async fn execute(&self, stmt: &Statement) -> Result<u64> {
        let conn = self.conn().await?;
        Ok(conn.execute(stmt.sql.as_str(), &stmt.refs()).await?)
    }

    /// Runs a key scan; every condition and filter is applied before paging.
    async fn scan(
        &self,
        mut stmt: Statement,
        mut conditions: Vec<String>,
        options: &ScanOptions,
    ) -> Result<Vec<Record>> {
        if let Some(needle) = options.contains.as_deref().filter(|n| !n.is_empty()) {
            let p = stmt.bind(needle.to_string());
            conditions.push(if options.case_sensitive {
                format!("strpos(key, {}) > 0", p)
            } else {
                format!("strpos(lower(key), lower({})) > 0", p)
            });
        }
        for (column, op, bound) in options.time_filters() {
            let p = stmt.bind(bound);
            conditions.push(format!("{} {} {}", column, op, p));
        }
        stmt.push_where(&conditions);
        stmt.push(&format!(" ORDER BY key {}", options.order.as_sql()));
        stmt.push_paging(options.limit, options.offset);
        self.query(&stmt).await
    }

    async fn values_equal(&self, value: &KvValue, limit: Option<u64>) -> Result<Vec<Record>> {
        value.check_type(self.value_type)?;
        let mut stmt = Statement::new(self.select());
        let p = stmt.bind_boxed(value_param(value));
        stmt.push(&format!(" WHERE value = {} ORDER BY key ASC", p));
        stmt.push_paging(limit, None);
        self.query(&stmt).await
    }
}

// == Row Helpers ==
fn row_to_record(value_type: ValueType, row: &Row) -> Result<Record> {
    let value = match value_type {
        ValueType::Json => KvValue::Json(row.try_get::<_, JsonValue>("value")?),
        ValueType::Text => KvValue::Text(row.try_get("value")?),
        ValueType::Bytes => KvValue::Bytes(row.try_get("value")?),
        ValueType::Integer => KvValue::Integer(row.try_get("value")?),
        ValueType::Float => KvValue::Float(row.try_get("value")?),
        ValueType::Boolean => KvValue::Boolean(row.try_get("value")?),
    };
    Ok(Record {
        key: row.try_get("key")?,
        value,
        created_at: row.try_get::<_, DateTime<Utc>>("created_at")?,
        updated_at: row.try_get::<_, DateTime<Utc>>("updated_at")?,
    })
}

fn value_param(value: &KvValue) -> Param {
    match value {
        KvValue::Json(v) => Box::new(v.clone()),
        KvValue::Text(s) => Box::new(s.clone()),
        KvValue::Bytes(b) => Box::new(b.clone()),
        KvValue::Integer(i) => Box::new(*i),
        KvValue::Float(f) => Box::new(*f),
        KvValue::Boolean(b) => Box::new(*b),
    }
}

fn path_segments(path: &str) -> Result<Vec<String>> {
    validate_json_path(path)?;
    Ok(path.split('.').map(str::to_string).collect())
}

// == KvStore Implementation ==
#[async_trait]
impl KvStore for PgStore {
    fn value_type(&self) -> ValueType {
        self.value_type
    }

    fn table_name(&self) -> &str {
        &self.table
    }

    fn type_info(&self) -> TypeInfo {
        TypeInfo {
            value_type: self.value_type,
            column_type: self.value_type.postgres_column(),
        }
    }

    async fn put(&self, key: &str, value: KvValue) -> Result<()> {
        validate_key(key)?;
        value.check_type(self.value_type)?;
        let mut stmt = Statement::new("");
        let k = stmt.bind(key.to_string());
        let v = stmt.bind_boxed(value_param(&value));
        stmt.push(&format!(
            "INSERT INTO {} ({}) VALUES ({}, {}, now(), now())
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
            self.quoted, COLUMNS, k, v
        ));
        self.execute(&stmt).await?;
        Ok(())
    }

    async fn get_record(&self, key: &str, expire_secs: Option<u64>) -> Result<Option<Record>> {
        let mut stmt = Statement::new(self.select());
        let k = stmt.bind(key.to_string());
        stmt.push(&format!(" WHERE key = {} LIMIT 1", k));
        let record = self.query(&stmt).await?.into_iter().next();
        match (record, expire_secs) {
            (Some(record), Some(expire)) if record.is_expired(expire, Utc::now()) => {
                // Only the row that was read; a concurrent re-create survives.
                let conn = self.conn().await?;
                let sql = format!(
                    "DELETE FROM {} WHERE key = $1 AND created_at <= $2",
                    self.quoted
                );
                conn.execute(sql.as_str(), &[&key, &record.created_at])
                    .await?;
                debug!("Lazily expired {} after {}s", key, expire);
                Ok(None)
            }
            (record, _) => Ok(record),
        }
    }

    async fn merge(&self, key: &str, partial: JsonValue) -> Result<()> {
        self.value_type.require_document("merge")?;
        validate_key(key)?;
        let mut stmt = Statement::new("");
        let k = stmt.bind(key.to_string());
        let v = stmt.bind(partial);
        stmt.push(&format!(
            "INSERT INTO {table} ({columns}) VALUES ({k}, {v}, now(), now())
             ON CONFLICT (key) DO UPDATE SET
                value = kv_jsonb_deep_merge({table}.value, EXCLUDED.value),
                updated_at = now()",
            table = self.quoted,
            columns = COLUMNS,
            k = k,
            v = v,
        ));
        self.execute(&stmt).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut stmt = Statement::new("");
        let k = stmt.bind(key.to_string());
        stmt.push(&format!("DELETE FROM {} WHERE key = {}", self.quoted, k));
        Ok(self.execute(&stmt).await? > 0)
    }

    async fn has(&self, key: &str) -> Result<bool> {
        let conn = self.conn().await?;
        let sql = format!("SELECT 1 FROM {} WHERE key = $1 LIMIT 1", self.quoted);
        Ok(conn.query_opt(sql.as_str(), &[&key]).await?.is_some())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let conn = self.conn().await?;
        let sql = format!("SELECT key FROM {} ORDER BY key ASC", self.quoted);
        let rows = conn.query(sql.as_str(), &[]).await?;
        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(KvError::from))
            .collect()
    }

    async fn count(&self) -> Result<u64> {
        let conn = self.conn().await?;
        let sql = format!("SELECT COUNT(*) FROM {}", self.quoted);
        let count: i64 = conn.query_one(sql.as_str(), &[]).await?.try_get(0)?;
        Ok(count as u64)
    }

    async fn clear(&self) -> Result<u64> {
        self.execute(&Statement::new(format!("DELETE FROM {}", self.quoted)))
            .await
    }

    async fn get_records(&self, keys: &[String]) -> Result<Vec<Record>> {
        let mut records = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(KEY_CHUNK) {
            let mut stmt = Statement::new(self.select());
            let p = stmt.bind(chunk.to_vec());
            stmt.push(&format!(" WHERE key = ANY({})", p));
            records.extend(self.query(&stmt).await?);
        }
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(records)
    }

    async fn put_many(&self, entries: Vec<(String, KvValue)>, batch_size: usize) -> Result<()> {
        require_batch_size(batch_size)?;
        if entries.is_empty() {
            return Ok(());
        }
        for (key, value) in &entries {
            validate_key(key)?;
            value.check_type(self.value_type)?;
        }
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;
        for chunk in entries.chunks(batch_size) {
            let mut stmt = Statement::new("");
            let rows: Vec<String> = chunk
                .iter()
                .map(|(key, value)| {
                    let k = stmt.bind(key.clone());
                    let v = stmt.bind_boxed(value_param(value));
                    format!("({}, {}, now(), now())", k, v)
                })
                .collect();
            stmt.push(&format!(
                "INSERT INTO {} ({}) VALUES {}
                 ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
                self.quoted,
                COLUMNS,
                rows.join(", ")
            ));
            tx.execute(stmt.sql.as_str(), &stmt.refs()).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let tx = conn.transaction().await?;
        let sql = format!("DELETE FROM {} WHERE key = ANY($1)", self.quoted);
        let mut removed = 0;
        for chunk in keys.chunks(KEY_CHUNK) {
            let chunk = chunk.to_vec();
            removed += tx.execute(sql.as_str(), &[&chunk]).await?;
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn get_all(&self, options: &ScanOptions) -> Result<Vec<Record>> {
        self.scan(Statement::new(self.select()), Vec::new(), options)
            .await
    }

    async fn get_recent(&self, limit: u64, within: Option<Duration>) -> Result<Vec<Record>> {
        let mut stmt = Statement::new(self.select());
        if let Some(window) = within {
            let window = chrono::Duration::from_std(window)
                .map_err(|e| KvError::InvalidArgument(format!("window too large: {}", e)))?;
            let p = stmt.bind(Utc::now() - window);
            stmt.push(&format!(" WHERE created_at >= {}", p));
        }
        stmt.push(" ORDER BY created_at DESC");
        stmt.push_paging(Some(limit), None);
        self.query(&stmt).await
    }

    async fn get_with_prefix(&self, prefix: &str, options: &ScanOptions) -> Result<Vec<Record>> {
        require_non_empty("prefix", prefix)?;
        let mut stmt = Statement::new(self.select());
        let start = stmt.bind(prefix.to_string());
        let end = stmt.bind(prefix_upper_bound(prefix));
        let conditions = vec![format!("key >= {}", start), format!("key < {}", end)];
        self.scan(stmt, conditions, options).await
    }

    async fn get_with_contains(
        &self,
        substring: &str,
        options: &ScanOptions,
    ) -> Result<Vec<Record>> {
        require_non_empty("substring", substring)?;
        let mut stmt = Statement::new(self.select());
        let p = stmt.bind(substring.to_string());
        let condition = if options.case_sensitive {
            format!("strpos(key, {}) > 0", p)
        } else {
            format!("strpos(lower(key), lower({})) > 0", p)
        };
        self.scan(stmt, vec![condition], options).await
    }

    async fn get_with_suffix(&self, suffix: &str, options: &ScanOptions) -> Result<Vec<Record>> {
        require_non_empty("suffix", suffix)?;
        let mut stmt = Statement::new(self.select());
        let p = stmt.bind(suffix.to_string());
        let condition = if options.case_sensitive {
            format!("right(key, char_length({p}::text)) = {p}::text", p = p)
        } else {
            format!(
                "lower(right(key, char_length({p}::text))) = lower({p}::text)",
                p = p
            )
        };
        self.scan(stmt, vec![condition], options).await
    }

    async fn add(&self, key: &str, value: KvValue) -> Result<()> {
        validate_key(key)?;
        value.check_type(self.value_type)?;
        let mut stmt = Statement::new("");
        let k = stmt.bind(key.to_string());
        let v = stmt.bind_boxed(value_param(&value));
        stmt.push(&format!(
            "INSERT INTO {} ({}) VALUES ({}, {}, now(), now()) ON CONFLICT (key) DO NOTHING",
            self.quoted, COLUMNS, k, v
        ));
        if self.execute(&stmt).await? == 0 {
            return Err(KvError::AlreadyExists(format!(
                "key \"{}\" already exists",
                key
            )));
        }
        Ok(())
    }

    async fn is_value_exists(&self, value: &KvValue) -> Result<bool> {
        Ok(!self.values_equal(value, Some(1)).await?.is_empty())
    }

    async fn get_values(&self, value: &KvValue) -> Result<Vec<Record>> {
        self.values_equal(value, None).await
    }

    async fn find_by_value(&self, value: &KvValue, exact: bool) -> Result<Vec<String>> {
        if exact {
            let records = self.values_equal(value, None).await?;
            return Ok(records.into_iter().map(|r| r.key).collect());
        }
        let (needle, column) = match (value, self.value_type) {
            (KvValue::Text(s), ValueType::Text) => (s.clone(), "value"),
            (KvValue::Json(v), ValueType::Json) => (json_text(v), "value::text"),
            _ => {
                return Err(KvError::UnsupportedOperation(format!(
                    "fuzzy search not supported for {} stores",
                    self.value_type
                )))
            }
        };
        let conn = self.conn().await?;
        let sql = format!(
            "SELECT key FROM {} WHERE strpos({}, $1) > 0 ORDER BY key ASC",
            self.quoted, column
        );
        let rows = conn.query(sql.as_str(), &[&needle]).await?;
        rows.iter()
            .map(|row| row.try_get::<_, String>(0).map_err(KvError::from))
            .collect()
    }

    async fn find_bool_values(
        &self,
        value: bool,
        order: SortOrder,
        take: Option<u64>,
    ) -> Result<Vec<Record>> {
        let mut stmt = Statement::new(self.select());
        let p = match self.value_type {
            ValueType::Boolean => stmt.bind(value),
            ValueType::Json => stmt.bind(JsonValue::Bool(value)),
            other => {
                return Err(KvError::UnsupportedOperation(format!(
                    "find_bool_values is only supported for boolean and json stores, not {}",
                    other
                )))
            }
        };
        stmt.push(&format!(
            " WHERE value = {} ORDER BY created_at {}",
            p,
            order.as_sql()
        ));
        stmt.push_paging(take, None);
        self.query(&stmt).await
    }

    async fn search_by_time(&self, query: &TimeQuery) -> Result<Vec<Record>> {
        let column = query.column.as_sql();
        let mut stmt = Statement::new(self.select());
        let at = stmt.bind(query.timestamp);
        let take = stmt.bind(sql_count(query.take));
        stmt.push(&format!(
            " WHERE {col} {op} {at} ORDER BY {col} {order} LIMIT {take}",
            col = column,
            op = query.direction.as_sql(),
            at = at,
            order = query.order.as_sql(),
            take = take,
        ));
        self.query(&stmt).await
    }

    async fn search_json(&self, search: &JsonSearch) -> Result<JsonPage> {
        self.value_type.require_document("search_json")?;
        search.validate()?;

        let mut stmt = Statement::new(self.select());
        let mut conditions = Vec::new();
        for (path, expected) in &search.contains {
            let p = stmt.bind(path_segments(path)?);
            let v = stmt.bind(json_text(expected));
            conditions.push(format!("value #>> {} = {}", p, v));
        }
        for cond in &search.compare {
            let p = stmt.bind(path_segments(&cond.path)?);
            let v = stmt.bind(cond.value.clone());
            conditions.push(format!("value #> {} {} {}", p, cond.op.as_sql(), v));
        }
        for cond in &search.text_search {
            let p = stmt.bind(path_segments(&cond.path)?);
            let t = stmt.bind(cond.text.clone());
            conditions.push(if cond.case_sensitive {
                format!("strpos(value #>> {}, {}) > 0", p, t)
            } else {
                format!("strpos(lower(value #>> {}), lower({})) > 0", p, t)
            });
        }

        let field = search.order_field.as_sql();
        let cursor_op = match search.order {
            SortOrder::Asc => ">",
            SortOrder::Desc => "<",
        };
        match &search.cursor {
            Some(SearchCursor::Key(key)) if search.order_field == OrderField::Key => {
                let p = stmt.bind(key.clone());
                conditions.push(format!("key {} {}", cursor_op, p));
            }
            Some(SearchCursor::Time(at, key)) if search.order_field != OrderField::Key => {
                let p = stmt.bind(*at);
                let k = stmt.bind(key.clone());
                conditions.push(format!("({}, key) {} ({}, {})", field, cursor_op, p, k));
            }
            Some(_) => {
                return Err(KvError::InvalidArgument(format!(
                    "cursor does not match order field {}",
                    field
                )))
            }
            None => {}
        }

        stmt.push_where(&conditions);
        let limit = stmt.bind(sql_count(search.limit).saturating_add(1));
        stmt.push(&format!(
            " ORDER BY {} {}, key {} LIMIT {}",
            field,
            search.order.as_sql(),
            search.order.as_sql(),
            limit
        ));

        let rows = self.query(&stmt).await?;
        Ok(JsonPage::from_rows(rows, search.limit, search.order_field))
    }

    async fn search_json_by_time(
        &self,
        query: &TimeQuery,
        filter: &JsonMatch,
    ) -> Result<Vec<Record>> {
        self.value_type.require_document("search_json_by_time")?;
        filter.validate()?;
        let column = query.column.as_sql();
        let mut stmt = Statement::new(self.select());
        let at = stmt.bind(query.timestamp);
        let mut conditions = vec![format!("{} {} {}", column, query.direction.as_sql(), at)];
        if let Some(doc) = &filter.contains {
            let p = stmt.bind(doc.clone());
            conditions.push(format!("value @> {}", p));
        }
        if let Some(doc) = &filter.equals {
            let p = stmt.bind(doc.clone());
            conditions.push(format!("value = {}", p));
        }
        if let Some((path, expected)) = &filter.path {
            let p = stmt.bind(path_segments(path)?);
            let v = stmt.bind(json_text(expected));
            conditions.push(format!("value #>> {} = {}", p, v));
        }
        stmt.push_where(&conditions);
        stmt.push(&format!(
            " ORDER BY {col} {order}, key {order}",
            col = column,
            order = query.order.as_sql()
        ));
        stmt.push_paging(Some(query.take), None);
        self.query(&stmt).await
    }

    async fn get_random(&self, count: u64) -> Result<Vec<Record>> {
        let mut stmt = Statement::new(self.select());
        let p = stmt.bind(sql_count(count));
        stmt.push(&format!(" ORDER BY random() LIMIT {}", p));
        self.query(&stmt).await
    }
}
