//! Typed values and records
//!
//! Every store is constructed with one `ValueType` that fixes the wire
//! representation of every record it holds.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::error::{KvError, Result};

// == Value Type ==
/// Representation used for the `value` column of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Structured JSON document
    Json,
    /// UTF-8 text
    Text,
    /// Raw bytes
    Bytes,
    /// 64-bit signed integer
    Integer,
    /// 64-bit float
    Float,
    /// Boolean
    Boolean,
}

impl ValueType {
    /// Column type used by the embedded SQLite backend.
    pub fn sqlite_column(&self) -> &'static str {
        match self {
            ValueType::Json | ValueType::Text => "TEXT",
            ValueType::Bytes => "BLOB",
            ValueType::Integer | ValueType::Boolean => "INTEGER",
            ValueType::Float => "REAL",
        }
    }

    /// Column type used by the PostgreSQL backend.
    pub fn postgres_column(&self) -> &'static str {
        match self {
            ValueType::Json => "jsonb",
            ValueType::Text => "text",
            ValueType::Bytes => "bytea",
            ValueType::Integer => "bigint",
            ValueType::Float => "double precision",
            ValueType::Boolean => "boolean",
        }
    }

    /// Returns true for the structured document type.
    pub fn is_document(&self) -> bool {
        matches!(self, ValueType::Json)
    }

    /// Returns whether `operation` (a `KvStore` or `ArrayStore` method name)
    /// can run against this value type. Unknown names are always supported.
    pub fn is_operation_supported(&self, operation: &str) -> bool {
        match operation {
            "merge" | "search_json" | "search_json_by_time" | "index_suffix"
            | "get_with_suffix_indexed" | "append" | "read_all" | "read_recent"
            | "read_range" => self.is_document(),
            "find_bool_values" => matches!(self, ValueType::Boolean | ValueType::Json),
            "find_by_value_fuzzy" => matches!(self, ValueType::Text | ValueType::Json),
            _ => true,
        }
    }

    /// Fails with `UnsupportedOperation` unless this is the document type.
    pub fn require_document(&self, operation: &str) -> Result<()> {
        if self.is_document() {
            Ok(())
        } else {
            Err(KvError::UnsupportedOperation(format!(
                "{} is only supported for json stores, this store holds {}",
                operation, self
            )))
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Json => "json",
            ValueType::Text => "text",
            ValueType::Bytes => "bytes",
            ValueType::Integer => "integer",
            ValueType::Float => "float",
            ValueType::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

impl FromStr for ValueType {
    type Err = KvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" | "jsonb" | "document" => Ok(ValueType::Json),
            "text" | "varchar" => Ok(ValueType::Text),
            "bytes" | "blob" | "bytea" => Ok(ValueType::Bytes),
            "integer" | "int" => Ok(ValueType::Integer),
            "float" | "real" => Ok(ValueType::Float),
            "boolean" | "bool" => Ok(ValueType::Boolean),
            other => Err(KvError::InvalidArgument(format!(
                "unknown value type: {}",
                other
            ))),
        }
    }
}

/// Value type of a store and the column type backing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeInfo {
    pub value_type: ValueType,
    pub column_type: &'static str,
}

// == KV Value ==
/// A single typed payload.
#[derive(Debug, Clone, PartialEq)]
pub enum KvValue {
    Json(JsonValue),
    Text(String),
    Bytes(Vec<u8>),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl KvValue {
    /// Returns the value type this payload belongs to.
    pub fn value_type(&self) -> ValueType {
        match self {
            KvValue::Json(_) => ValueType::Json,
            KvValue::Text(_) => ValueType::Text,
            KvValue::Bytes(_) => ValueType::Bytes,
            KvValue::Integer(_) => ValueType::Integer,
            KvValue::Float(_) => ValueType::Float,
            KvValue::Boolean(_) => ValueType::Boolean,
        }
    }

    /// Fails with `UnsupportedOperation` when this payload cannot be written
    /// to a store of `expected` type.
    pub fn check_type(&self, expected: ValueType) -> Result<()> {
        if self.value_type() == expected {
            Ok(())
        } else {
            Err(KvError::UnsupportedOperation(format!(
                "store holds {} values, got {}",
                expected,
                self.value_type()
            )))
        }
    }

    /// Encodes an arbitrary JSON document into the representation of `value_type`.
    ///
    /// Text and bytes stores hold the serialized document; scalar stores
    /// accept only a matching JSON scalar.
    pub fn encode_json(value_type: ValueType, value: JsonValue) -> Result<Self> {
        let mismatch = |v: &JsonValue| {
            KvError::UnsupportedOperation(format!("cannot store {} in a {} store", v, value_type))
        };
        match value_type {
            ValueType::Json => Ok(KvValue::Json(value)),
            ValueType::Text => Ok(KvValue::Text(serde_json::to_string(&value)?)),
            ValueType::Bytes => Ok(KvValue::Bytes(serde_json::to_vec(&value)?)),
            ValueType::Integer => value.as_i64().map(KvValue::Integer).ok_or_else(|| mismatch(&value)),
            ValueType::Float => value.as_f64().map(KvValue::Float).ok_or_else(|| mismatch(&value)),
            ValueType::Boolean => value.as_bool().map(KvValue::Boolean).ok_or_else(|| mismatch(&value)),
        }
    }

    /// Inverse of [`KvValue::encode_json`].
    pub fn decode_json(&self) -> Result<JsonValue> {
        match self {
            KvValue::Json(v) => Ok(v.clone()),
            KvValue::Text(s) => Ok(serde_json::from_str(s)?),
            KvValue::Bytes(b) => Ok(serde_json::from_slice(b)?),
            KvValue::Integer(i) => Ok(JsonValue::from(*i)),
            KvValue::Float(f) => Ok(JsonValue::from(*f)),
            KvValue::Boolean(b) => Ok(JsonValue::Bool(*b)),
        }
    }

    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            KvValue::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            KvValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            KvValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            KvValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            KvValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            KvValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Consumes the payload, returning the document if there is one.
    pub fn into_json(self) -> Option<JsonValue> {
        match self {
            KvValue::Json(v) => Some(v),
            _ => None,
        }
    }
}

impl From<JsonValue> for KvValue {
    fn from(value: JsonValue) -> Self {
        KvValue::Json(value)
    }
}

impl From<String> for KvValue {
    fn from(value: String) -> Self {
        KvValue::Text(value)
    }
}

impl From<&str> for KvValue {
    fn from(value: &str) -> Self {
        KvValue::Text(value.to_string())
    }
}

impl From<Vec<u8>> for KvValue {
    fn from(value: Vec<u8>) -> Self {
        KvValue::Bytes(value)
    }
}

impl From<i64> for KvValue {
    fn from(value: i64) -> Self {
        KvValue::Integer(value)
    }
}

impl From<f64> for KvValue {
    fn from(value: f64) -> Self {
        KvValue::Float(value)
    }
}

impl From<bool> for KvValue {
    fn from(value: bool) -> Self {
        KvValue::Boolean(value)
    }
}

// == Record ==
/// A stored value together with its timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: String,
    pub value: KvValue,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// Returns true when more than `expire_secs` have passed since creation.
    pub fn is_expired(&self, expire_secs: u64, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.created_at);
        age.num_milliseconds() > i64::try_from(expire_secs).unwrap_or(i64::MAX).saturating_mul(1000)
    }
}

// == Deep Merge ==
/// Recursively merges `patch` into `base`.
///
/// Object keys merge; scalars and arrays in `patch` replace what is in `base`.
/// A non-object `base` or `patch` is replaced wholesale.
pub fn deep_merge(base: &mut JsonValue, patch: JsonValue) {
    match (base, patch) {
        (JsonValue::Object(base_map), JsonValue::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                let nested = patch_value.is_object()
                    && base_map.get(&key).map_or(false, JsonValue::is_object);
                if !nested {
                    base_map.insert(key, patch_value);
                } else if let Some(existing) = base_map.get_mut(&key) {
                    deep_merge(existing, patch_value);
                }
            }
        }
        (base, patch) => *base = patch,
    }
}

/// Document containment with the semantics of PostgreSQL `jsonb @>`.
///
/// Objects contain every key of `needle` recursively, arrays contain every
/// element of `needle` somewhere, a top-level array also contains a bare
/// scalar, and scalars must be equal.
pub fn json_contains(haystack: &JsonValue, needle: &JsonValue) -> bool {
    contains_at(haystack, needle, true)
}

fn contains_at(haystack: &JsonValue, needle: &JsonValue, top: bool) -> bool {
    match (haystack, needle) {
        (JsonValue::Object(have), JsonValue::Object(want)) => want
            .iter()
            .all(|(k, v)| have.get(k).map_or(false, |h| contains_at(h, v, false))),
        (JsonValue::Array(have), JsonValue::Array(want)) => want.iter().all(|w| {
            have.iter().any(|h| match (h, w) {
                (JsonValue::Array(_), JsonValue::Array(_))
                | (JsonValue::Object(_), JsonValue::Object(_)) => contains_at(h, w, false),
                _ => h == w,
            })
        }),
        (JsonValue::Array(have), scalar) if top && !scalar.is_object() => {
            have.iter().any(|h| h == scalar)
        }
        (have, want) => have == want,
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_value_type_parse_aliases() {
        assert_eq!("jsonb".parse::<ValueType>().unwrap(), ValueType::Json);
        assert_eq!("BLOB".parse::<ValueType>().unwrap(), ValueType::Bytes);
        assert_eq!("real".parse::<ValueType>().unwrap(), ValueType::Float);
        assert_eq!(" bool ".parse::<ValueType>().unwrap(), ValueType::Boolean);
        assert!(matches!(
            "uuid".parse::<ValueType>(),
            Err(KvError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_require_document() {
        assert!(ValueType::Json.require_document("merge").is_ok());
        assert!(matches!(
            ValueType::Text.require_document("merge"),
            Err(KvError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_check_type_mismatch() {
        let value = KvValue::from("hello");
        assert!(value.check_type(ValueType::Text).is_ok());
        assert!(matches!(
            value.check_type(ValueType::Integer),
            Err(KvError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_encode_decode_text_keeps_strings_as_strings() {
        let encoded = KvValue::encode_json(ValueType::Text, json!("123")).unwrap();
        assert_eq!(encoded, KvValue::Text("\"123\"".to_string()));
        assert_eq!(encoded.decode_json().unwrap(), json!("123"));
    }

    #[test]
    fn test_encode_scalar_mismatch() {
        let result = KvValue::encode_json(ValueType::Integer, json!({"a": 1}));
        assert!(matches!(result, Err(KvError::UnsupportedOperation(_))));

        let encoded = KvValue::encode_json(ValueType::Boolean, json!(true)).unwrap();
        assert_eq!(encoded, KvValue::Boolean(true));
    }

    #[test]
    fn test_deep_merge_nested_objects() {
        let mut base = json!({"a": 1, "nested": {"x": 1, "keep": true}, "list": [1, 2]});
        deep_merge(
            &mut base,
            json!({"b": 2, "nested": {"x": 5, "y": 6}, "list": [3]}),
        );
        assert_eq!(
            base,
            json!({"a": 1, "b": 2, "nested": {"x": 5, "y": 6, "keep": true}, "list": [3]})
        );
    }

    #[test]
    fn test_deep_merge_replaces_non_objects() {
        let mut base = json!([1, 2, 3]);
        deep_merge(&mut base, json!({"a": 1}));
        assert_eq!(base, json!({"a": 1}));

        let mut base = json!({"a": {"b": 1}});
        deep_merge(&mut base, json!({"a": "flat"}));
        assert_eq!(base, json!({"a": "flat"}));
    }

    #[test]
    fn test_operation_support_by_type() {
        assert!(ValueType::Json.is_operation_supported("merge"));
        assert!(!ValueType::Text.is_operation_supported("merge"));
        assert!(!ValueType::Integer.is_operation_supported("search_json_by_time"));
        assert!(ValueType::Boolean.is_operation_supported("find_bool_values"));
        assert!(!ValueType::Float.is_operation_supported("find_bool_values"));
        assert!(ValueType::Text.is_operation_supported("find_by_value_fuzzy"));
        assert!(ValueType::Bytes.is_operation_supported("put"));
    }

    #[test]
    fn test_json_contains() {
        let doc = json!({"a": 1, "tags": ["x", "y"], "nested": {"b": true, "c": null}});
        assert!(json_contains(&doc, &json!({})));
        assert!(json_contains(&doc, &json!({"a": 1})));
        assert!(json_contains(&doc, &json!({"tags": ["y"], "nested": {"b": true}})));
        assert!(!json_contains(&doc, &json!({"a": 2})));
        assert!(!json_contains(&doc, &json!({"tags": ["z"]})));
        assert!(!json_contains(&doc, &json!({"missing": null})));
        assert!(json_contains(&json!(["x", 1]), &json!("x")));
        assert!(!json_contains(&json!({"t": ["x"]}), &json!({"t": "x"})));
    }

    #[test]
    fn test_record_expiry_saturates_huge_windows() {
        let now = Utc::now();
        let record = Record {
            key: "k".to_string(),
            value: KvValue::Integer(1),
            created_at: now - Duration::seconds(10),
            updated_at: now,
        };
        assert!(!record.is_expired(u64::MAX, now));
    }

    #[test]
    fn test_record_expiry() {
        let now = Utc::now();
        let record = Record {
            key: "k".to_string(),
            value: KvValue::Integer(1),
            created_at: now - Duration::seconds(10),
            updated_at: now,
        };
        assert!(record.is_expired(5, now));
        assert!(!record.is_expired(60, now));
    }
}
