//! TED's `TacticalEvent`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TacticalEventType {
    Attack,
    Crash,
    Mechanical,
    Breakaway,
    Chase,
    Sprint,
    WeatherEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Score multiplier applied to match confidence: 1.2/1.0/0.8 for
    /// high/medium/low (critical inherits the high multiplier).
    pub fn score_multiplier(&self) -> f64 {
        match self {
            Severity::High | Severity::Critical => 1.2,
            Severity::Medium => 1.0,
            Severity::Low => 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationStatus {
    Unverified,
    Pending,
    Verified,
    FalsePositive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventRelationship {
    Related,
    Consequence,
    Precursor,
    Concurrent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedEvent {
    pub event_id: String,
    pub relationship: EventRelationship,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TacticalEvent {
    pub id: String,
    pub event_type: TacticalEventType,
    pub severity: Severity,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    pub location: Option<GeoPoint>,
    pub race_distance_m: f64,
    pub involved_riders: Vec<String>,
    pub trigger_data: Vec<Value>,
    pub tags: Vec<String>,
    pub verification_status: VerificationStatus,
    pub related_events: Vec<RelatedEvent>,
    pub impact: Option<EventImpact>,
}

/// Impact assessment, computed as a pure function of type/severity/riders/tags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventImpact {
    pub race_flow: String,
    pub tactical_significance: f64,
    pub affected_riders: usize,
    pub estimated_time_delay_s: f64,
    pub group_split: bool,
    pub gc_impact: f64,
}
