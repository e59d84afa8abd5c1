//! EB's `StreamEvent`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StreamPriority {
    Low,
    Normal,
    High,
    Critical,
}

/// One immutable record on the event bus, post-publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    pub id: String,
    pub event_type: String,
    /// `<raceId>_<eventType>`, selects the FIFO partition lane.
    pub partition_key: String,
    pub payload: Value,
    pub origin_timestamp: DateTime<Utc>,
    pub priority: StreamPriority,
    pub schema_version: u32,
}

impl StreamEvent {
    pub fn partition_key_for(race_id: &str, event_type: &str) -> String {
        format!("{race_id}_{event_type}")
    }
}
