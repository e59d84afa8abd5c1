//! Data Aggregation Service — fuses parallel, conflicting source streams
//! into one resolved time-series keyed by `<dataType>:<key>`.
//!
//! Grounded on the host crate's multi-input scoring modules
//! (`ml_engine::correlations`, `ml_engine::quality_filter`): a registry of
//! inputs, a buffered ingest, and a periodic resolution pass.

pub mod strategies;

use crate::config::DasConfig;
use crate::types::{AggregatedPoint, DataSource, FrameMetadata, SourceContribution};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use strategies::{conflict_level, ContributionInput, DEFAULT_STRATEGY_ORDER};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct BufferedPoint {
    source_id: String,
    value: Value,
    origin_timestamp: DateTime<Utc>,
    ingestion_timestamp: DateTime<Utc>,
    metadata: FrameMetadata,
}

/// Registry of sources plus the per-key aggregation buffer and resolved
/// time-series.
pub struct Das {
    sources: DashMap<String, DataSource>,
    last_ingest: DashMap<String, DateTime<Utc>>,
    buffers: DashMap<String, Vec<BufferedPoint>>,
    resolved: DashMap<String, AggregatedPoint>,
    config: DasConfig,
    dropped_points: AtomicU64,
}

impl Das {
    pub fn new(config: DasConfig) -> Self {
        Self {
            sources: DashMap::new(),
            last_ingest: DashMap::new(),
            buffers: DashMap::new(),
            resolved: DashMap::new(),
            config,
            dropped_points: AtomicU64::new(0),
        }
    }

    pub fn dropped_point_count(&self) -> u64 {
        self.dropped_points.load(Ordering::Relaxed)
    }

    pub fn register_source(&self, id: impl Into<String>, priority: u8, accuracy: f64, declared_type: impl Into<String>) {
        let id = id.into();
        self.sources
            .entry(id.clone())
            .or_insert_with(|| DataSource::new(id, priority, accuracy, declared_type));
    }

    pub fn source(&self, id: &str) -> Option<DataSource> {
        self.sources.get(id).map(|s| s.clone())
    }

    /// Appends to the buffer under `<dataType>:<key>`. Unknown or inactive
    /// sources are dropped with a log.
    pub fn ingest(
        &self,
        source_id: &str,
        data_type: &str,
        key: &str,
        value: Value,
        timestamp: DateTime<Utc>,
        metadata: FrameMetadata,
    ) {
        let known_active = self.sources.get(source_id).map(|s| s.active).unwrap_or(false);
        if !known_active {
            debug!(source_id, data_type, "DAS: dropping ingest from unknown or inactive source");
            self.dropped_points.fetch_add(1, Ordering::Relaxed);
            return;
        }

        self.last_ingest.insert(source_id.to_string(), Utc::now());

        let full_key = AggregatedPoint::full_key(data_type, key);
        self.buffers.entry(full_key).or_default().push(BufferedPoint {
            source_id: source_id.to_string(),
            value,
            origin_timestamp: timestamp,
            ingestion_timestamp: Utc::now(),
            metadata,
        });
    }

    pub fn get_resolved(&self, full_key: &str) -> Option<AggregatedPoint> {
        self.resolved.get(full_key).map(|p| p.clone())
    }

    pub fn get_all_resolved(&self) -> Vec<AggregatedPoint> {
        self.resolved.iter().map(|p| p.clone()).collect()
    }

    /// `mean(reliability) · mean(uptime) · (active / registered)`.
    pub fn data_quality_score(&self) -> f64 {
        let sources: Vec<DataSource> = self.sources.iter().map(|s| s.clone()).collect();
        if sources.is_empty() {
            return 0.0;
        }
        let n = sources.len() as f64;
        let mean_reliability = sources.iter().map(|s| s.reliability).sum::<f64>() / n;
        let mean_uptime = sources.iter().map(|s| s.stats.uptime).sum::<f64>() / n;
        let active = sources.iter().filter(|s| s.active).count() as f64;
        mean_reliability * mean_uptime * (active / n)
    }

    /// One resolution pass: buffered points with enough distinct sources
    /// or stale enough age are resolved and removed from the buffer.
    pub fn run_resolution_cycle(&self) {
        let mut drift_stats: HashMap<String, (u32, u32)> = HashMap::new();
        let keys: Vec<String> = self.buffers.iter().map(|e| e.key().clone()).collect();

        for full_key in keys {
            let ready_points = {
                let Some(mut entry) = self.buffers.get_mut(&full_key) else {
                    continue;
                };
                if entry.is_empty() {
                    continue;
                }
                let distinct_sources: std::collections::HashSet<&str> =
                    entry.iter().map(|p| p.source_id.as_str()).collect();
                let oldest_age = Utc::now() - entry.iter().map(|p| p.origin_timestamp).min().unwrap();
                let max_age = chrono::Duration::milliseconds(self.config.max_data_age_ms as i64);

                if distinct_sources.len() >= self.config.min_sources || oldest_age > max_age {
                    std::mem::take(&mut *entry)
                } else {
                    continue;
                }
            };

            let (data_type, key) = match full_key.split_once(':') {
                Some((d, k)) => (d, k),
                None => (full_key.as_str(), ""),
            };

            match self.resolve_point(data_type, key, &ready_points, &mut drift_stats) {
                Some(point) => {
                    self.resolved.insert(full_key.clone(), point);
                }
                None => {
                    self.dropped_points.fetch_add(1, Ordering::Relaxed);
                    warn!(full_key, "DAS: resolution produced no value, point dropped");
                }
            }
        }

        self.apply_drift_detection(drift_stats);
        self.mark_stale_sources_inactive();
    }

    fn resolve_point(
        &self,
        data_type: &str,
        key: &str,
        points: &[BufferedPoint],
        drift_stats: &mut HashMap<String, (u32, u32)>,
    ) -> Option<AggregatedPoint> {
        if points.is_empty() {
            return None;
        }

        let max_age = chrono::Duration::milliseconds(self.config.max_data_age_ms as i64);
        let inputs: Vec<ContributionInput> = points
            .iter()
            .map(|p| {
                let source = self.sources.get(&p.source_id);
                let age_ms = (Utc::now() - p.origin_timestamp).num_milliseconds().max(0) as f64;
                let recency = (1.0 - age_ms / self.config.max_data_age_ms.max(1) as f64).clamp(0.0, 1.0);
                let (trust, priority, reliability) = match &source {
                    Some(s) => (s.trust_score(recency), s.priority, s.reliability),
                    None => (0.0, 1, 0.1),
                };
                ContributionInput {
                    value: &p.value,
                    trust,
                    priority,
                    reliability,
                    metadata_confidence: p.metadata.confidence,
                    origin_timestamp: p.origin_timestamp,
                }
            })
            .collect();

        let mut best: Option<(Value, f64, &'static str)> = None;
        for strategy in DEFAULT_STRATEGY_ORDER {
            if let Some((value, confidence)) = strategy.apply(&inputs, max_age.to_std().unwrap_or_default()) {
                let is_better = best.as_ref().map(|(_, c, _)| confidence > *c).unwrap_or(true);
                if is_better {
                    best = Some((value, confidence, strategy.name()));
                }
            }
        }

        let (resolved_value, confidence, method) = best.unwrap_or_else(|| {
            (points[0].value.clone(), 0.5, "fallback")
        });

        for p in points {
            let matched = p.value == resolved_value;
            let entry = drift_stats.entry(p.source_id.clone()).or_insert((0, 0));
            entry.0 += 1;
            if matched {
                entry.1 += 1;
            }
        }

        let conflict = conflict_level(&inputs);
        let contributions: HashMap<String, SourceContribution> = points
            .iter()
            .map(|p| {
                (
                    p.source_id.clone(),
                    SourceContribution {
                        value: p.value.clone(),
                        source_timestamp: p.origin_timestamp,
                        ingestion_timestamp: p.ingestion_timestamp,
                    },
                )
            })
            .collect();

        Some(AggregatedPoint {
            data_type: data_type.to_string(),
            key: key.to_string(),
            contributions,
            earliest_origin_timestamp: points.iter().map(|p| p.origin_timestamp).min().unwrap(),
            resolved_value,
            confidence,
            conflict_level: conflict.into(),
            resolution_method: method.to_string(),
            resolved_at: Utc::now(),
        })
    }

    /// Compares each source's per-cycle agreement rate against its last
    /// recorded baseline; a drop of `driftThreshold` or more penalizes
    /// reliability. A new baseline is recorded every cycle regardless.
    fn apply_drift_detection(&self, drift_stats: HashMap<String, (u32, u32)>) {
        for (source_id, (contributed, matched)) in drift_stats {
            if contributed == 0 {
                continue;
            }
            let cycle_accuracy = matched as f64 / contributed as f64;
            if let Some(mut source) = self.sources.get_mut(&source_id) {
                if let Some(baseline) = source.accuracy_baseline {
                    if baseline - cycle_accuracy >= self.config.drift_threshold {
                        warn!(
                            source_id,
                            baseline, cycle_accuracy, "DAS: performance drift detected, penalizing reliability"
                        );
                        source.reliability = (source.reliability * 0.9).max(0.1);
                    }
                }
                source.accuracy_baseline = Some(cycle_accuracy);
            }
        }
    }

    fn mark_stale_sources_inactive(&self) {
        let max_age = chrono::Duration::milliseconds(self.config.max_data_age_ms as i64);
        let now = Utc::now();
        for mut source in self.sources.iter_mut() {
            let stale = match self.last_ingest.get(source.id.as_str()) {
                Some(last) => now - *last > max_age,
                None => true,
            };
            if stale && source.active {
                debug!(source_id = %source.id, "DAS: source silent beyond max data age, marking inactive");
                source.active = false;
            }
        }
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.aggregation_window());
        info!(window_ms = self.config.aggregation_window_ms, "DAS resolution loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("DAS resolution loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_resolution_cycle();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DasConfig {
        let mut c = DasConfig::default();
        c.min_sources = 2;
        c
    }

    #[test]
    fn unregistered_source_is_dropped() {
        let das = Das::new(config());
        das.ingest("ghost", "speed", "rider-1", serde_json::json!(10.0), Utc::now(), FrameMetadata::default());
        assert_eq!(das.dropped_point_count(), 1);
    }

    #[test]
    fn enough_distinct_sources_triggers_resolution() {
        let das = Das::new(config());
        das.register_source("a", 8, 0.9, "speed");
        das.register_source("b", 7, 0.9, "speed");
        das.ingest("a", "speed", "rider-1", serde_json::json!(10.0), Utc::now(), FrameMetadata::default());
        das.ingest("b", "speed", "rider-1", serde_json::json!(11.0), Utc::now(), FrameMetadata::default());
        das.run_resolution_cycle();
        let resolved = das.get_resolved("speed:rider-1");
        assert!(resolved.is_some());
    }

    #[test]
    fn insufficient_sources_and_fresh_data_stays_buffered() {
        let das = Das::new(config());
        das.register_source("a", 8, 0.9, "speed");
        das.ingest("a", "speed", "rider-1", serde_json::json!(10.0), Utc::now(), FrameMetadata::default());
        das.run_resolution_cycle();
        assert!(das.get_resolved("speed:rider-1").is_none());
    }

    #[test]
    fn stale_buffered_point_resolves_with_single_source() {
        let mut cfg = config();
        cfg.max_data_age_ms = 1;
        let das = Das::new(cfg);
        das.register_source("a", 8, 0.9, "speed");
        das.ingest(
            "a",
            "speed",
            "rider-1",
            serde_json::json!(10.0),
            Utc::now() - chrono::Duration::milliseconds(50),
            FrameMetadata::default(),
        );
        das.run_resolution_cycle();
        assert!(das.get_resolved("speed:rider-1").is_some());
    }

    #[test]
    fn data_quality_score_is_zero_with_no_sources() {
        let das = Das::new(config());
        assert_eq!(das.data_quality_score(), 0.0);
    }
}
