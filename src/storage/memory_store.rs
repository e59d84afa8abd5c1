//! In-memory test double for `KeyValueStore` + `SortedSet`.
//!
//! Used by unit/integration tests and by any binary run without a
//! configured data directory (see `config::PipelineConfig` data dir
//! resolution).

use super::{KeyValueStore, SortedSet, StorageError};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

struct Entry {
    bytes: Vec<u8>,
    expires_at_ms: Option<i64>,
}

#[derive(Default)]
pub struct MemoryStore {
    values: DashMap<String, Entry>,
    sorted_sets: Mutex<std::collections::HashMap<String, BTreeMap<(i64, String), ()>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let Some(entry) = self.values.get(key) else {
            return Ok(None);
        };
        if let Some(expires_at_ms) = entry.expires_at_ms {
            if Utc::now().timestamp_millis() >= expires_at_ms {
                drop(entry);
                self.values.remove(key);
                return Ok(None);
            }
        }
        Ok(Some(entry.bytes.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        self.values.insert(key.to_string(), Entry { bytes: value, expires_at_ms: None });
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StorageError> {
        let expires_at_ms = Utc::now().timestamp_millis() + ttl.as_millis() as i64;
        self.values
            .insert(key.to_string(), Entry { bytes: value, expires_at_ms: Some(expires_at_ms) });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.values.remove(key);
        Ok(())
    }
}

#[async_trait]
impl SortedSet for MemoryStore {
    async fn add(&self, set_key: &str, score: i64, member: &str) -> Result<(), StorageError> {
        let mut sets = self.sorted_sets.lock().unwrap();
        sets.entry(set_key.to_string())
            .or_default()
            .insert((score, member.to_string()), ());
        Ok(())
    }

    async fn range_by_score(
        &self,
        set_key: &str,
        min_score: i64,
        max_score: i64,
    ) -> Result<Vec<(i64, String)>, StorageError> {
        let sets = self.sorted_sets.lock().unwrap();
        let Some(set) = sets.get(set_key) else {
            return Ok(Vec::new());
        };
        Ok(set
            .range((min_score, String::new())..=(max_score, "\u{10FFFF}".to_string()))
            .map(|((score, member), _)| (*score, member.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = MemoryStore::new();
        store.set("k", b"v".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let store = MemoryStore::new();
        assert_eq!(store.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_ttl_entry_reads_as_absent() {
        let store = MemoryStore::new();
        store.set_with_ttl("k", b"v".to_vec(), Duration::from_millis(0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sorted_set_range_is_score_ordered_and_bounded() {
        let store = MemoryStore::new();
        store.add("timeline", 300, "c").await.unwrap();
        store.add("timeline", 100, "a").await.unwrap();
        store.add("timeline", 200, "b").await.unwrap();
        let range = store.range_by_score("timeline", 150, 300).await.unwrap();
        let members: Vec<&str> = range.iter().map(|(_, m)| m.as_str()).collect();
        assert_eq!(members, vec!["b", "c"]);
    }
}
