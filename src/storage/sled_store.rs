//! `sled`-backed adapter for the opaque key/value + sorted-set interface.
//!
//! Grounded on the host crate's `storage/history.rs`, which wraps a single
//! `sled::Db` and serializes values as JSON. TTLs are implemented as a
//! stored expiry alongside the value and checked lazily on read — `sled`
//! has no native expiry.

use super::{KeyValueStore, SortedSet, StorageError};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Serialize, Deserialize)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at_ms: Option<i64>,
}

/// Embedded-DB adapter backing `KeyValueStore` and `SortedSet`.
///
/// Sorted-set entries are stored as `sortedset:<set_key>:<score padded>:
/// <member>` keys so that `sled`'s natural byte-order range scan doubles
/// as a score-ordered scan.
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path).map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(Self { db })
    }

    fn sorted_set_prefix(set_key: &str) -> String {
        format!("sortedset:{set_key}:")
    }

    fn sorted_set_entry_key(set_key: &str, score: i64, member: &str) -> String {
        // i64 scores are offset to an unsigned range so lexical byte order
        // matches numeric order.
        let shifted = (score as i128 - i64::MIN as i128) as u64;
        format!("{}{:020}:{}", Self::sorted_set_prefix(set_key), shifted, member)
    }
}

#[async_trait]
impl KeyValueStore for SledStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let Some(raw) = self.db.get(key).map_err(|e| StorageError::Backend(e.to_string()))? else {
            return Ok(None);
        };
        let stored: StoredValue = serde_json::from_slice(&raw)?;
        if let Some(expires_at_ms) = stored.expires_at_ms {
            if Utc::now().timestamp_millis() >= expires_at_ms {
                let _ = self.db.remove(key);
                return Ok(None);
            }
        }
        Ok(Some(stored.bytes))
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let stored = StoredValue { bytes: value, expires_at_ms: None };
        self.db
            .insert(key, serde_json::to_vec(&stored)?)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StorageError> {
        let expires_at_ms = Utc::now().timestamp_millis() + ttl.as_millis() as i64;
        let stored = StoredValue { bytes: value, expires_at_ms: Some(expires_at_ms) };
        self.db
            .insert(key, serde_json::to_vec(&stored)?)
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.db.remove(key).map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl SortedSet for SledStore {
    async fn add(&self, set_key: &str, score: i64, member: &str) -> Result<(), StorageError> {
        let key = Self::sorted_set_entry_key(set_key, score, member);
        self.db
            .insert(key, member.as_bytes())
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn range_by_score(
        &self,
        set_key: &str,
        min_score: i64,
        max_score: i64,
    ) -> Result<Vec<(i64, String)>, StorageError> {
        let prefix = Self::sorted_set_prefix(set_key);
        let lo = Self::sorted_set_entry_key(set_key, min_score, "");
        let hi = Self::sorted_set_entry_key(set_key, max_score, "\u{10FFFF}");
        let mut out = Vec::new();
        for item in self.db.range(lo..=hi) {
            let (k, v) = item.map_err(|e| StorageError::Backend(e.to_string()))?;
            let key_str = String::from_utf8_lossy(&k);
            let Some(rest) = key_str.strip_prefix(&prefix) else { continue };
            let Some((score_part, _member_part)) = rest.split_once(':') else { continue };
            let Ok(shifted) = score_part.parse::<u64>() else { continue };
            let score = (shifted as i128 + i64::MIN as i128) as i64;
            out.push((score, String::from_utf8_lossy(&v).to_string()));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        store.set("k", b"v".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn expired_ttl_entry_reads_as_absent() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        store.set_with_ttl("k", b"v".to_vec(), Duration::from_millis(0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sorted_set_range_is_score_ordered() {
        let dir = tempdir().unwrap();
        let store = SledStore::open(dir.path()).unwrap();
        store.add("timeline", 300, "c").await.unwrap();
        store.add("timeline", 100, "a").await.unwrap();
        store.add("timeline", 200, "b").await.unwrap();
        let range = store.range_by_score("timeline", 0, 1_000).await.unwrap();
        let members: Vec<&str> = range.iter().map(|(_, m)| m.as_str()).collect();
        assert_eq!(members, vec!["a", "b", "c"]);
    }
}
