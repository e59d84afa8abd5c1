//! DAS's `DataSource` registry record.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceStats {
    pub avg_latency_ms: f64,
    pub error_rate: f64,
    pub conflict_rate: f64,
    pub uptime: f64,
}

/// A registered telemetry source, tracked by DAS for trust scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSource {
    pub id: String,
    /// Declared priority, `1..=10`.
    pub priority: u8,
    /// Declared accuracy, `[0, 1]`.
    pub accuracy: f64,
    pub declared_type: String,
    /// Dynamic reliability, `[0.1, 1]`, adjusted over time by DAS.
    pub reliability: f64,
    pub stats: SourceStats,
    pub active: bool,
    /// Last accuracy baseline recorded for performance-drift detection.
    pub accuracy_baseline: Option<f64>,
}

impl DataSource {
    pub fn new(id: impl Into<String>, priority: u8, accuracy: f64, declared_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            priority: priority.clamp(1, 10),
            accuracy: accuracy.clamp(0.0, 1.0),
            declared_type: declared_type.into(),
            reliability: accuracy.clamp(0.1, 1.0),
            stats: SourceStats::default(),
            active: true,
            accuracy_baseline: None,
        }
    }

    /// Trust score = `reliability · priority/10 · recency`, bounded to `[0, 1]`.
    ///
    /// `recency` is a caller-supplied factor in `[0, 1]` derived from how
    /// stale the contributing value is (1.0 = fresh).
    pub fn trust_score(&self, recency: f64) -> f64 {
        (self.reliability * (self.priority as f64 / 10.0) * recency.clamp(0.0, 1.0)).clamp(0.0, 1.0)
    }
}
