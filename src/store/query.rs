//! Query options shared by both backends
//!
//! Validation lives here so the SQLite and PostgreSQL stores reject the same
//! inputs with the same errors.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::error::{KvError, Result};
use crate::store::{json_contains, Record};

/// Maximum key length in bytes
pub const MAX_KEY_LENGTH: usize = 255;

/// Exclusive upper bound appended to a prefix for range scans.
pub const PREFIX_RANGE_END: char = char::MAX;

/// Key prefix of the reversed-suffix index records.
pub const REVERSE_INDEX_PREFIX: &str = "reverse:";

// == Sort Order ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

// == Time Column ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeColumn {
    CreatedAt,
    #[default]
    UpdatedAt,
}

impl TimeColumn {
    pub fn as_sql(&self) -> &'static str {
        match self {
            TimeColumn::CreatedAt => "created_at",
            TimeColumn::UpdatedAt => "updated_at",
        }
    }
}

// == Time Direction ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeDirection {
    Before,
    #[default]
    After,
}

impl TimeDirection {
    pub fn as_sql(&self) -> &'static str {
        match self {
            TimeDirection::Before => "<",
            TimeDirection::After => ">",
        }
    }
}

// == Scan Options ==
/// Filters and pagination for key scans.
///
/// Every filter is applied before `offset` and `limit`.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub order: SortOrder,
    /// Substring the key must contain
    pub contains: Option<String>,
    /// Case sensitivity of `contains` (default true)
    pub case_sensitive: bool,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub updated_after: Option<DateTime<Utc>>,
    pub updated_before: Option<DateTime<Utc>>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            limit: None,
            offset: None,
            order: SortOrder::Asc,
            contains: None,
            case_sensitive: true,
            created_after: None,
            created_before: None,
            updated_after: None,
            updated_before: None,
        }
    }
}

impl ScanOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    pub fn contains(mut self, needle: impl Into<String>, case_sensitive: bool) -> Self {
        self.contains = Some(needle.into());
        self.case_sensitive = case_sensitive;
        self
    }

    pub fn created_after(mut self, at: DateTime<Utc>) -> Self {
        self.created_after = Some(at);
        self
    }

    pub fn created_before(mut self, at: DateTime<Utc>) -> Self {
        self.created_before = Some(at);
        self
    }

    /// Time filters as `(column, operator, bound)` triples.
    pub fn time_filters(&self) -> Vec<(&'static str, &'static str, DateTime<Utc>)> {
        [
            ("created_at", ">", self.created_after),
            ("created_at", "<", self.created_before),
            ("updated_at", ">", self.updated_after),
            ("updated_at", "<", self.updated_before),
        ]
        .into_iter()
        .filter_map(|(column, op, bound)| bound.map(|b| (column, op, b)))
        .collect()
    }
}

// == Time Query ==
/// Cursor over `created_at` or `updated_at`.
#[derive(Debug, Clone)]
pub struct TimeQuery {
    pub timestamp: DateTime<Utc>,
    pub column: TimeColumn,
    pub direction: TimeDirection,
    pub order: SortOrder,
    pub take: u64,
}

impl TimeQuery {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            column: TimeColumn::default(),
            direction: TimeDirection::default(),
            order: SortOrder::default(),
            take: 1,
        }
    }
}

// == JSON Search ==
/// Comparison operator for JSON field conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    pub fn parse(op: &str) -> Result<Self> {
        match op {
            "=" => Ok(CompareOp::Eq),
            "!=" => Ok(CompareOp::Ne),
            "<" => Ok(CompareOp::Lt),
            "<=" => Ok(CompareOp::Le),
            ">" => Ok(CompareOp::Gt),
            ">=" => Ok(CompareOp::Ge),
            other => Err(KvError::InvalidArgument(format!(
                "unsupported operator: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JsonCompare {
    pub path: String,
    pub op: CompareOp,
    pub value: JsonValue,
}

#[derive(Debug, Clone)]
pub struct JsonTextSearch {
    pub path: String,
    pub text: String,
    pub case_sensitive: bool,
}

/// Field a JSON search is ordered and paginated by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderField {
    #[default]
    Key,
    CreatedAt,
    UpdatedAt,
}

impl OrderField {
    pub fn as_sql(&self) -> &'static str {
        match self {
            OrderField::Key => "key",
            OrderField::CreatedAt => "created_at",
            OrderField::UpdatedAt => "updated_at",
        }
    }
}

/// Keyset cursor returned by `search_json`.
///
/// Time cursors carry the key of the last row too, since many rows can share
/// one timestamp.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchCursor {
    Key(String),
    Time(DateTime<Utc>, String),
}

/// Document search with keyset pagination.
#[derive(Debug, Clone)]
pub struct JsonSearch {
    /// Fields whose text form must equal the given value
    pub contains: Vec<(String, JsonValue)>,
    pub compare: Vec<JsonCompare>,
    pub text_search: Vec<JsonTextSearch>,
    pub cursor: Option<SearchCursor>,
    pub limit: u64,
    pub order: SortOrder,
    pub order_field: OrderField,
}

impl Default for JsonSearch {
    fn default() -> Self {
        Self {
            contains: Vec::new(),
            compare: Vec::new(),
            text_search: Vec::new(),
            cursor: None,
            limit: 100,
            order: SortOrder::Asc,
            order_field: OrderField::Key,
        }
    }
}

impl JsonSearch {
    pub fn contains(mut self, path: impl Into<String>, value: JsonValue) -> Self {
        self.contains.push((path.into(), value));
        self
    }

    pub fn compare(mut self, path: impl Into<String>, op: CompareOp, value: JsonValue) -> Self {
        self.compare.push(JsonCompare {
            path: path.into(),
            op,
            value,
        });
        self
    }

    pub fn text(mut self, path: impl Into<String>, text: impl Into<String>, case_sensitive: bool) -> Self {
        self.text_search.push(JsonTextSearch {
            path: path.into(),
            text: text.into(),
            case_sensitive,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    pub fn cursor(mut self, cursor: SearchCursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    pub fn order_by(mut self, field: OrderField, order: SortOrder) -> Self {
        self.order_field = field;
        self.order = order;
        self
    }

    /// Validates every field path in the search.
    pub fn validate(&self) -> Result<()> {
        for (path, _) in &self.contains {
            validate_json_path(path)?;
        }
        for cond in &self.compare {
            validate_json_path(&cond.path)?;
        }
        for cond in &self.text_search {
            validate_json_path(&cond.path)?;
        }
        Ok(())
    }
}

/// One page of `search_json` results.
#[derive(Debug, Clone)]
pub struct JsonPage {
    pub data: Vec<Record>,
    pub next_cursor: Option<SearchCursor>,
}

impl JsonPage {
    /// Builds a page from `limit + 1` fetched rows.
    pub fn from_rows(mut rows: Vec<Record>, limit: u64, field: OrderField) -> Self {
        let has_more = rows.len() as u64 > limit;
        rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        let next_cursor = match rows.last() {
            Some(last) if has_more => Some(match field {
                OrderField::Key => SearchCursor::Key(last.key.clone()),
                OrderField::CreatedAt => SearchCursor::Time(last.created_at, last.key.clone()),
                OrderField::UpdatedAt => SearchCursor::Time(last.updated_at, last.key.clone()),
            }),
            _ => None,
        };
        Self {
            data: rows,
            next_cursor,
        }
    }
}

// == Document Match ==
/// Whole-document filters for `search_json_by_time`.
#[derive(Debug, Clone, Default)]
pub struct JsonMatch {
    /// Document the value must contain, as `jsonb @>`
    pub contains: Option<JsonValue>,
    /// Document the value must equal
    pub equals: Option<JsonValue>,
    /// Field whose text form must equal the given value
    pub path: Option<(String, JsonValue)>,
}

impl JsonMatch {
    pub fn contains(mut self, doc: JsonValue) -> Self {
        self.contains = Some(doc);
        self
    }

    pub fn equals(mut self, doc: JsonValue) -> Self {
        self.equals = Some(doc);
        self
    }

    pub fn path(mut self, path: impl Into<String>, value: JsonValue) -> Self {
        self.path = Some((path.into(), value));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.contains.is_none() && self.equals.is_none() && self.path.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some((path, _)) = &self.path {
            validate_json_path(path)?;
        }
        Ok(())
    }

    /// Evaluates every filter against `doc`.
    pub fn matches(&self, doc: &JsonValue) -> bool {
        if let Some(needle) = &self.contains {
            if !json_contains(doc, needle) {
                return false;
            }
        }
        if let Some(expected) = &self.equals {
            if doc != expected {
                return false;
            }
        }
        match &self.path {
            Some((path, expected)) => path
                .split('.')
                .try_fold(doc, |node, segment| field(node, segment))
                .map_or(false, |found| json_text(found) == json_text(expected)),
            None => true,
        }
    }
}

/// Child of `node` by object key, or by index for arrays.
fn field<'a>(node: &'a JsonValue, segment: &str) -> Option<&'a JsonValue> {
    match node {
        JsonValue::Object(map) => map.get(segment),
        JsonValue::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

// == Validation ==
/// Accepts only `[A-Za-z0-9_.:-]+` so paths can be spliced into SQL.
pub fn validate_json_path(path: &str) -> Result<&str> {
    let valid = !path.is_empty()
        && path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-'));
    if valid {
        Ok(path)
    } else {
        Err(KvError::InvalidArgument(format!("invalid JSON path: {}", path)))
    }
}

/// Rejects table names that could escape their quoting.
pub fn validate_table_name(name: &str) -> Result<&str> {
    if name.is_empty() {
        return Err(KvError::InvalidArgument("table name cannot be empty".to_string()));
    }
    if name.chars().any(|c| matches!(c, '"' | '\'' | '`' | '\0')) {
        return Err(KvError::InvalidArgument(
            "table name cannot contain quote characters".to_string(),
        ));
    }
    Ok(name)
}

pub fn validate_key(key: &str) -> Result<()> {
    if key.len() > MAX_KEY_LENGTH {
        return Err(KvError::InvalidArgument(format!(
            "key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}

/// Fails when a search term is empty.
pub fn require_non_empty(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        Err(KvError::InvalidArgument(format!("{} cannot be empty", what)))
    } else {
        Ok(())
    }
}

/// Exclusive upper bound of the key range that starts with `prefix`.
pub fn prefix_upper_bound(prefix: &str) -> String {
    let mut end = String::with_capacity(prefix.len() + 4);
    end.push_str(prefix);
    end.push(PREFIX_RANGE_END);
    end
}

/// Key of the reversed-suffix index record for `key`.
pub fn reverse_index_key(key: &str) -> String {
    format!("{}{}", REVERSE_INDEX_PREFIX, key.chars().rev().collect::<String>())
}

/// Row count or offset as a SQL bigint, saturating at `i64::MAX`.
pub(crate) fn sql_count(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Text form of a JSON scalar as produced by SQL `->>` extraction.
pub fn json_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_json_path() {
        assert!(validate_json_path("profile.name").is_ok());
        assert!(validate_json_path("a_b:c-d").is_ok());
        assert!(validate_json_path("").is_err());
        assert!(matches!(
            validate_json_path("name'; DROP TABLE kv_store; --"),
            Err(KvError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_validate_table_name() {
        assert!(validate_table_name("kv_store").is_ok());
        assert!(validate_table_name("bad\"name").is_err());
        assert!(validate_table_name("bad'name").is_err());
        assert!(validate_table_name("").is_err());
    }

    #[test]
    fn test_validate_key_length() {
        assert!(validate_key(&"k".repeat(MAX_KEY_LENGTH)).is_ok());
        assert!(validate_key(&"k".repeat(MAX_KEY_LENGTH + 1)).is_err());
    }

    #[test]
    fn test_compare_op_parse() {
        assert_eq!(CompareOp::parse(">=").unwrap(), CompareOp::Ge);
        assert_eq!(CompareOp::parse("!=").unwrap().as_sql(), "!=");
        assert!(CompareOp::parse("LIKE").is_err());
    }

    #[test]
    fn test_prefix_upper_bound_orders_after_prefixed_keys() {
        let end = prefix_upper_bound("user:");
        assert!("user:zzz".to_string() < end);
        assert!("user:\u{4e2d}".to_string() < end);
        assert!("user;".to_string() > end);
    }

    #[test]
    fn test_reverse_index_key() {
        assert_eq!(reverse_index_key("a.txt"), "reverse:txt.a");
    }

    #[test]
    fn test_time_filters_only_set_bounds() {
        let now = Utc::now();
        let opts = ScanOptions::new().created_after(now);
        let filters = opts.time_filters();
        assert_eq!(filters, vec![("created_at", ">", now)]);
    }

    #[test]
    fn test_sql_count_saturates() {
        assert_eq!(sql_count(10), 10);
        assert_eq!(sql_count(u64::MAX), i64::MAX);
        assert_eq!(sql_count(u64::MAX).saturating_add(1), i64::MAX);
    }

    #[test]
    fn test_time_cursor_carries_last_key() {
        let at = Utc::now();
        let rows: Vec<Record> = ["a", "b", "c"]
            .iter()
            .map(|k| Record {
                key: k.to_string(),
                value: crate::store::KvValue::Integer(0),
                created_at: at,
                updated_at: at,
            })
            .collect();
        let page = JsonPage::from_rows(rows, 2, OrderField::CreatedAt);
        assert_eq!(page.next_cursor, Some(SearchCursor::Time(at, "b".to_string())));
    }

    #[test]
    fn test_json_match() {
        let doc = json!({"user": {"name": "ada", "langs": ["rust", "ml"]}, "age": 36});
        assert!(JsonMatch::default().matches(&doc));
        assert!(JsonMatch::default().contains(json!({"user": {"name": "ada"}})).matches(&doc));
        assert!(JsonMatch::default().path("user.langs.0", json!("rust")).matches(&doc));
        assert!(JsonMatch::default().path("age", json!(36)).matches(&doc));
        assert!(!JsonMatch::default().path("user.missing", json!("x")).matches(&doc));
        assert!(!JsonMatch::default().equals(json!({"age": 36})).matches(&doc));
        assert!(JsonMatch::default().path("bad path", json!(1)).validate().is_err());
    }

    #[test]
    fn test_json_text() {
        assert_eq!(json_text(&json!("abc")), "abc");
        assert_eq!(json_text(&json!(42)), "42");
        assert_eq!(json_text(&json!(true)), "true");
    }
}
