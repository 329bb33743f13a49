//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check the in-process cache against a plain HashMap model.

use proptest::prelude::*;
use std::collections::HashMap;
use std::thread::sleep;
use std::time::Duration;

use crate::cache::MemoryCache;

// == Strategies ==
/// Generates cache keys
fn valid_key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_]{1,64}".prop_map(|s| s)
}

/// Generates cache values
fn valid_value_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{1,256}".prop_map(|s| s)
}

/// Generates a sequence of cache operations for testing
#[derive(Debug, Clone)]
enum CacheOp {
    Put { key: String, value: String },
    Get { key: String },
    Delete { key: String },
    Clear,
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        4 => (valid_key_strategy(), valid_value_strategy())
            .prop_map(|(key, value)| CacheOp::Put { key, value }),
        4 => valid_key_strategy().prop_map(|key| CacheOp::Get { key }),
        2 => valid_key_strategy().prop_map(|key| CacheOp::Delete { key }),
        1 => Just(CacheOp::Clear),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // Property 1: Model Consistency
    // For any operation sequence without TTLs, the cache behaves like a HashMap
    // and the hit/miss counters match the number of found/missing reads.
    #[test]
    fn prop_matches_hashmap_model(ops in prop::collection::vec(cache_op_strategy(), 1..60)) {
        let cache = MemoryCache::new();
        let mut model: HashMap<String, String> = HashMap::new();
        let mut expected_hits: u64 = 0;
        let mut expected_misses: u64 = 0;

        for op in ops {
            match op {
                CacheOp::Put { key, value } => {
                    cache.put(key.clone(), value.clone());
                    model.insert(key, value);
                }
                CacheOp::Get { key } => {
                    let got = cache.get(&key);
                    prop_assert_eq!(got.as_ref(), model.get(&key), "Value mismatch for {}", key);
                    if got.is_some() {
                        expected_hits += 1;
                    } else {
                        expected_misses += 1;
                    }
                }
                CacheOp::Delete { key } => {
                    prop_assert_eq!(cache.delete(&key), model.remove(&key).is_some());
                }
                CacheOp::Clear => {
                    cache.clear();
                    model.clear();
                }
            }
        }

        let stats = cache.stats();
        prop_assert_eq!(stats.hits, expected_hits, "Hits mismatch");
        prop_assert_eq!(stats.misses, expected_misses, "Misses mismatch");
        prop_assert_eq!(stats.total_entries, model.len(), "Total entries mismatch");
        prop_assert_eq!(cache.size(), model.len());
    }

    // Property 2: Overwrite Semantics
    // Storing V1 then V2 under one key returns V2 and keeps one entry.
    #[test]
    fn prop_overwrite_semantics(
        key in valid_key_strategy(),
        value1 in valid_value_strategy(),
        value2 in valid_value_strategy()
    ) {
        let cache = MemoryCache::new();
        cache.put(key.clone(), value1);
        cache.put_with_ttl(key.clone(), value2.clone(), Duration::from_secs(300));

        prop_assert_eq!(cache.get(&key), Some(value2));
        prop_assert_eq!(cache.size(), 1);
    }

    // Property 3: TTL Upgrade Is Monotonic
    // A read with a TTL never replaces an expiry that is already attached.
    #[test]
    fn prop_ttl_upgrade_never_extends(
        key in valid_key_strategy(),
        value in valid_value_strategy(),
        extension_secs in 1u64..10_000
    ) {
        let cache = MemoryCache::new();
        cache.put_with_ttl(key.clone(), value.clone(), Duration::from_secs(5));
        let before = cache.ttl_remaining(&key).unwrap();

        prop_assert_eq!(cache.try_get(&key, Some(Duration::from_secs(extension_secs))), Some(value));
        let after = cache.ttl_remaining(&key).unwrap();
        prop_assert!(after <= before, "Expiry moved from {:?} to {:?}", before, after);
    }
}

// Separate proptest block with fewer cases for time-sensitive TTL tests
proptest! {
    #![proptest_config(ProptestConfig::with_cases(5))]

    // Property 4: TTL Expiration Behavior
    // After the TTL has elapsed, reads miss and the entry no longer counts.
    #[test]
    fn prop_ttl_expiration_behavior(
        key in valid_key_strategy(),
        value in valid_value_strategy()
    ) {
        let cache = MemoryCache::new();
        cache.put_with_ttl(key.clone(), value.clone(), Duration::from_millis(50));

        prop_assert_eq!(cache.get(&key), Some(value), "Entry should exist before TTL expires");

        sleep(Duration::from_millis(100));

        prop_assert_eq!(cache.size(), 0);
        prop_assert!(cache.get(&key).is_none(), "Entry should not be found after TTL expires");
    }
}
