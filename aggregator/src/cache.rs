// Per-key cache of merged aggregation results, so repeated requests for the
// same key within the TTL skip the upstream fan-out entirely.
use crate::config::CacheConfig;
use crate::metrics_defs::{RESULT_CACHE_HIT, RESULT_CACHE_MISS};
use crate::record::{AggregateRecord, AggregationKey};
use moka::sync::Cache;
use shared::counter;
use std::time::Duration;

pub struct ResultCache {
    cache: Cache<AggregationKey, AggregateRecord>,
}

impl ResultCache {
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .time_to_live(Duration::from_millis(config.ttl_ms))
            .build();

        ResultCache { cache }
    }

    /// Returns the cached record for the key, or `None` when no entry exists
    /// or the entry's TTL has elapsed. Expired data is never returned.
    pub fn get(&self, key: &AggregationKey) -> Option<AggregateRecord> {
        let entry = self.cache.get(key);
        let metric_def = if entry.is_some() {
            RESULT_CACHE_HIT
        } else {
            RESULT_CACHE_MISS
        };
        counter!(metric_def).increment(1);
        entry
    }

    /// Stores the record for the key, replacing any previous entry
    /// (last-writer-wins; concurrent writes are not merged).
    pub fn insert(&self, key: &AggregationKey, record: AggregateRecord) {
        self.cache.insert(key.clone(), record);
    }

    pub fn invalidate(&self, key: &AggregationKey) {
        self.cache.invalidate(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use serde_json::json;

    fn test_cache(ttl_ms: u64) -> ResultCache {
        ResultCache::new(&CacheConfig {
            ttl_ms,
            max_capacity: 100,
        })
    }

    fn record(value: i64) -> AggregateRecord {
        AggregateRecord {
            sections: IndexMap::from([("users".to_string(), Some(json!({"id": value})))]),
            note: None,
        }
    }

    #[test]
    fn hit_within_ttl_returns_the_stored_record() {
        let cache = test_cache(60_000);
        let key: AggregationKey = "user-1".parse().unwrap();

        cache.insert(&key, record(1));
        assert_eq!(cache.get(&key), Some(record(1)));
    }

    #[test]
    fn expired_entries_behave_as_absent() {
        let cache = test_cache(50);
        let key: AggregationKey = "user-1".parse().unwrap();

        cache.insert(&key, record(1));
        assert!(cache.get(&key).is_some());

        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(cache.get(&key), None);
    }

    #[test]
    fn insert_overwrites_previous_entry() {
        let cache = test_cache(60_000);
        let key: AggregationKey = "user-1".parse().unwrap();

        cache.insert(&key, record(1));
        cache.insert(&key, record(2));
        assert_eq!(cache.get(&key), Some(record(2)));
    }

    #[test]
    fn invalidate_removes_the_entry() {
        let cache = test_cache(60_000);
        let key: AggregationKey = "user-1".parse().unwrap();

        cache.insert(&key, record(1));
        cache.invalidate(&key);
        assert_eq!(cache.get(&key), None);
    }
}
