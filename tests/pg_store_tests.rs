//! Integration tests for the PostgreSQL-backed store
//!
//! Run with `KV_TEST_PG_URL=postgres://... cargo test --features pg-tests`.
//! Each test works in its own table, dropped on entry.

#![cfg(feature = "pg-tests")]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kv_cache::store::{
    CompareOp, JsonMatch, JsonSearch, OrderField, ScanOptions, SearchCursor, SortOrder, TimeColumn,
    TimeQuery,
};
use kv_cache::{KvError, KvStore, KvValue, PgStore, ValueType};
use serde_json::json;

// == Helper Functions ==
async fn fresh_store(table: &str, value_type: ValueType) -> Arc<dyn KvStore> {
    let url = std::env::var("KV_TEST_PG_URL").expect("KV_TEST_PG_URL must be set");
    let (client, connection) = tokio_postgres::connect(&url, tokio_postgres::NoTls)
        .await
        .unwrap();
    tokio::spawn(connection);
    client
        .batch_execute(&format!("DROP TABLE IF EXISTS \"{}\"", table))
        .await
        .unwrap();
    Arc::new(PgStore::connect(&url, table, value_type, 4).await.unwrap())
}

fn keys_of(records: &[kv_cache::Record]) -> Vec<&str> {
    records.iter().map(|r| r.key.as_str()).collect()
}

// == Tests ==
#[tokio::test]
async fn test_pg_roundtrip_per_value_type() {
    let cases = vec![
        ("pg_json", ValueType::Json, KvValue::Json(json!({"a": [1, 2]}))),
        ("pg_text", ValueType::Text, KvValue::Text("héllo".to_string())),
        ("pg_bytes", ValueType::Bytes, KvValue::Bytes(vec![0, 1, 255])),
        ("pg_int", ValueType::Integer, KvValue::Integer(i64::MIN)),
        ("pg_float", ValueType::Float, KvValue::Float(0.25)),
        ("pg_bool", ValueType::Boolean, KvValue::Boolean(false)),
    ];
    for (table, value_type, value) in cases {
        let store = fresh_store(table, value_type).await;
        store.put("k", value.clone()).await.unwrap();
        assert_eq!(store.get("k", None).await.unwrap(), Some(value));
    }
}

#[tokio::test]
async fn test_pg_upsert_timestamps() {
    let store = fresh_store("pg_upsert", ValueType::Json).await;
    store.put("k", KvValue::Json(json!(1))).await.unwrap();
    let first = store.get_record("k", None).await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    store.put("k", KvValue::Json(json!(2))).await.unwrap();
    let second = store.get_record("k", None).await.unwrap().unwrap();

    assert_eq!(second.created_at, first.created_at);
    assert!(second.updated_at > first.updated_at);
}

#[tokio::test]
async fn test_pg_merge_is_deep() {
    let store = fresh_store("pg_merge", ValueType::Json).await;
    store.merge("doc", json!({"a": {"x": 1}})).await.unwrap();
    store.merge("doc", json!({"a": {"y": 2}, "b": 3})).await.unwrap();
    assert_eq!(
        store.get("doc", None).await.unwrap(),
        Some(KvValue::Json(json!({"a": {"x": 1, "y": 2}, "b": 3})))
    );
}

#[tokio::test]
async fn test_pg_prefix_filters_before_paging() {
    let store = fresh_store("pg_prefix", ValueType::Json).await;
    for i in 0..20 {
        let key = if i % 10 == 5 {
            format!("item:{:02}", i)
        } else {
            format!("other:{:02}", i)
        };
        store.put(&key, KvValue::Json(json!(i))).await.unwrap();
    }
    let page = store
        .get_with_prefix("item:", &ScanOptions::new().limit(1).offset(1))
        .await
        .unwrap();
    assert_eq!(keys_of(&page), vec!["item:15"]);

    let suffix = store
        .get_with_suffix(":05", &ScanOptions::default())
        .await
        .unwrap();
    assert_eq!(keys_of(&suffix), vec!["item:05"]);
}

#[tokio::test]
async fn test_pg_add_rejects_existing_key() {
    let store = fresh_store("pg_add", ValueType::Text).await;
    store.add("k", KvValue::Text("a".to_string())).await.unwrap();
    let again = store.add("k", KvValue::Text("b".to_string())).await;
    assert!(matches!(again, Err(KvError::AlreadyExists(_))));
}

#[tokio::test]
async fn test_pg_search_json() {
    let store = fresh_store("pg_search", ValueType::Json).await;
    for i in 0..5 {
        let doc = json!({"age": 20 + i * 5, "city": if i % 2 == 0 { "Paris" } else { "Lyon" }});
        store
            .put(&format!("user:{}", i), KvValue::Json(doc))
            .await
            .unwrap();
    }

    let search = JsonSearch::default()
        .compare("age", CompareOp::Ge, json!(25))
        .limit(2);
    let first = store.search_json(&search).await.unwrap();
    assert_eq!(keys_of(&first.data), vec!["user:1", "user:2"]);
    assert_eq!(first.next_cursor, Some(SearchCursor::Key("user:2".to_string())));

    let paris = store
        .search_json(&JsonSearch::default().contains("city", json!("Paris")))
        .await
        .unwrap();
    assert_eq!(keys_of(&paris.data), vec!["user:0", "user:2", "user:4"]);
}

#[tokio::test]
async fn test_pg_lazy_expiration() {
    let store = fresh_store("pg_expire", ValueType::Integer).await;
    store.put("k", KvValue::Integer(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(store.get("k", Some(1)).await.unwrap(), None);
    assert!(!store.has("k").await.unwrap());
}

#[tokio::test]
async fn test_pg_time_cursor_handles_shared_timestamps() {
    let store = fresh_store("pg_cursor", ValueType::Json).await;
    let batch = (0..5)
        .map(|i| (format!("k{}", i), KvValue::Json(json!({"n": i}))))
        .collect();
    store.put_many(batch, 100).await.unwrap();

    let base = JsonSearch::default()
        .order_by(OrderField::CreatedAt, SortOrder::Asc)
        .limit(2);
    let mut seen = Vec::new();
    let mut search = base.clone();
    loop {
        let page = store.search_json(&search).await.unwrap();
        seen.extend(page.data.iter().map(|r| r.key.clone()));
        match page.next_cursor {
            Some(next) => search = base.clone().cursor(next),
            None => break,
        }
    }
    assert_eq!(seen, vec!["k0", "k1", "k2", "k3", "k4"]);
}

#[tokio::test]
async fn test_pg_search_json_by_time() {
    let store = fresh_store("pg_json_time", ValueType::Json).await;
    let start = Utc::now() - chrono::Duration::seconds(5);
    let docs = [
        ("a", json!({"kind": "order", "total": 10})),
        ("b", json!({"kind": "refund", "total": 10})),
        ("c", json!({"kind": "order", "total": 30})),
    ];
    for (key, doc) in docs {
        store.put(key, KvValue::Json(doc)).await.unwrap();
    }
    let after = TimeQuery {
        column: TimeColumn::CreatedAt,
        take: 10,
        ..TimeQuery::new(start)
    };

    let orders = store
        .search_json_by_time(&after, &JsonMatch::default().contains(json!({"kind": "order"})))
        .await
        .unwrap();
    assert_eq!(keys_of(&orders), vec!["a", "c"]);

    let by_path = store
        .search_json_by_time(&after, &JsonMatch::default().path("total", json!(10)))
        .await
        .unwrap();
    assert_eq!(keys_of(&by_path), vec!["a", "b"]);

    let exact = store
        .search_json_by_time(
            &after,
            &JsonMatch::default().equals(json!({"kind": "refund", "total": 10})),
        )
        .await
        .unwrap();
    assert_eq!(keys_of(&exact), vec!["b"]);
}

#[tokio::test]
async fn test_pg_expiry_spares_recreated_record() {
    let store = fresh_store("pg_recreate", ValueType::Integer).await;
    store.put("k", KvValue::Integer(1)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    store.delete("k").await.unwrap();
    store.put("k", KvValue::Integer(2)).await.unwrap();

    assert_eq!(store.get("k", Some(1)).await.unwrap(), Some(KvValue::Integer(2)));
    assert_eq!(store.type_info().column_type, "bigint");
}
