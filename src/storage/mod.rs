//! Opaque persistence interface.
//!
//! Persistent storage backends are an external collaborator per the
//! system's scope: this module defines only the key/value + sorted-set
//! interface the core subsystems write through (the persistence key
//! schema), plus one embedded-DB adapter and one in-memory test double.
//! No durable long-term archival semantics are implemented.

mod memory_store;
mod sled_store;

pub use memory_store::MemoryStore;
pub use sled_store::SledStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Opaque key/value interface with optional TTL.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;
    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StorageError>;
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Opaque sorted-set interface: `score` is typically an epoch-millis
/// timestamp, `member` an opaque string (e.g. `<riderId>:<epoch>`).
#[async_trait]
pub trait SortedSet: Send + Sync {
    async fn add(&self, set_key: &str, score: i64, member: &str) -> Result<(), StorageError>;
    async fn range_by_score(
        &self,
        set_key: &str,
        min_score: i64,
        max_score: i64,
    ) -> Result<Vec<(i64, String)>, StorageError>;
}

/// Helper: the persistence key schema constants used throughout the pipeline.
pub mod keys {
    pub fn position(rider_id: &str) -> String {
        format!("position:{rider_id}")
    }
    pub const POSITIONS_TIMELINE: &str = "positions:timeline";
    pub fn tactical_event(event_id: &str) -> String {
        format!("tactical_event:{event_id}")
    }
    pub const TACTICAL_EVENTS_TIMELINE: &str = "tactical_events:timeline";
    pub fn weather_current(location_key: &str) -> String {
        format!("weather:current:{location_key}")
    }
    pub fn weather_forecast(location_key: &str) -> String {
        format!("weather:forecast:{location_key}")
    }
    pub fn weather_route(route_id: &str) -> String {
        format!("weather:route:{route_id}")
    }
    /// TTL for a cached rider position.
    pub const POSITION_TTL: std::time::Duration = std::time::Duration::from_secs(3_600);
}
