//! DAS's `AggregatedPoint` resolution output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictLevel {
    None,
    Low,
    Medium,
    High,
}

/// A single contributing source's input into an `AggregatedPoint`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceContribution {
    pub value: Value,
    pub source_timestamp: DateTime<Utc>,
    pub ingestion_timestamp: DateTime<Utc>,
}

/// The resolved value for one `<dataType>:<key>`, fused from all
/// contributing sources in the aggregation window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedPoint {
    pub data_type: String,
    pub key: String,
    pub contributions: std::collections::HashMap<String, SourceContribution>,
    pub earliest_origin_timestamp: DateTime<Utc>,
    pub resolved_value: Value,
    pub confidence: f64,
    pub conflict_level: ConflictLevel,
    pub resolution_method: String,
    pub resolved_at: DateTime<Utc>,
}

impl AggregatedPoint {
    pub fn full_key(data_type: &str, key: &str) -> String {
        format!("{data_type}:{key}")
    }
}
