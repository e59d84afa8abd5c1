//! DAS's `RawTelemetryFrame` input shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single frame of telemetry arriving from one source, prior to fusion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTelemetryFrame {
    pub source_id: String,
    pub data_type: String,
    /// Opaque aggregation key; combined with `data_type` forms the
    /// `AggregatedPoint` key `<dataType>:<key>`.
    pub key: String,
    pub value: Value,
    pub origin_timestamp: DateTime<Utc>,
    pub metadata: FrameMetadata,
    /// Frame identifier, used by CRM's duplicate-detection hook.
    pub id: Option<String>,
    /// Optional MD5 checksum of the serialized payload, verified by CRM.
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameMetadata {
    pub confidence: Option<f64>,
    pub units: Option<String>,
}

impl RawTelemetryFrame {
    /// Key CRM checks under the non-duplicate `type+timestamp` rule.
    pub fn type_timestamp_key(&self) -> String {
        format!("{}@{}", self.data_type, self.origin_timestamp.timestamp_millis())
    }
}
