//! Tactical Event Detector — matches rider- and group-scoped patterns
//! against derived facts, deduplicates against in-flight events, links
//! related events, and scores impact.
//!
//! Grounded on the host crate's rule-based ticket pipeline
//! (`agents::tactical`): threshold conditions evaluated against a rolling
//! fact set, producing a scored decision that is merged against recent
//! history rather than emitted unconditionally.

pub mod conditions;
pub mod patterns;

pub use conditions::{Condition, Facts, Op};
pub use patterns::{Pattern, PatternScope};

use crate::config::TedConfig;
use crate::types::{
    EventImpact, EventRelationship, GeoPoint, RelatedEvent, TacticalEvent, TacticalEventType,
    VerificationStatus,
};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Facts and location for one rider at one PT tick, computed by the
/// pipeline-wiring layer from PT's position history.
pub struct RiderSample {
    pub rider_id: String,
    pub facts: Facts,
    pub location: Option<GeoPoint>,
    pub race_distance_m: f64,
}

/// Facts and location for one rider group, computed by the pipeline-wiring
/// layer from PT's group/gap/race-state output.
pub struct GroupSample {
    pub group_id: String,
    pub rider_ids: Vec<String>,
    pub facts: Facts,
    pub location: Option<GeoPoint>,
    pub race_distance_m: f64,
}

/// Maximum time between two candidates for them to be considered the same
/// underlying event, seconds.
const DEDUP_TIME_WINDOW_S: i64 = 60;
/// Maximum distance between two candidates for them to be considered the
/// same underlying event, meters.
const DEDUP_DISTANCE_M: f64 = 500.0;

struct CorrelationRule {
    from: TacticalEventType,
    to: TacticalEventType,
    max_delta_s: i64,
    max_distance_m: f64,
    relationship: EventRelationship,
}

fn correlation_rules() -> &'static [CorrelationRule] {
    &[
        CorrelationRule {
            from: TacticalEventType::Crash,
            to: TacticalEventType::Mechanical,
            max_delta_s: 180,
            max_distance_m: 500.0,
            relationship: EventRelationship::Consequence,
        },
        CorrelationRule {
            from: TacticalEventType::Attack,
            to: TacticalEventType::Chase,
            max_delta_s: 120,
            max_distance_m: 2_000.0,
            relationship: EventRelationship::Consequence,
        },
        CorrelationRule {
            from: TacticalEventType::Crash,
            to: TacticalEventType::Crash,
            max_delta_s: 30,
            max_distance_m: 200.0,
            relationship: EventRelationship::Concurrent,
        },
    ]
}

fn geo_distance_m(a: GeoPoint, b: GeoPoint) -> f64 {
    crate::pt::geo::haversine_distance_m(
        crate::types::GpsFix { lat: a.lat, lon: a.lon, altitude_m: 0.0 },
        crate::types::GpsFix { lat: b.lat, lon: b.lon, altitude_m: 0.0 },
    )
}

/// In-flight tactical events plus the pattern table used to detect them.
pub struct Ted {
    active: DashMap<String, TacticalEvent>,
    patterns: RwLock<Vec<Pattern>>,
    config: TedConfig,
}

impl Ted {
    pub fn new(config: TedConfig) -> Self {
        Self {
            active: DashMap::new(),
            patterns: RwLock::new(patterns::default_patterns()),
            config,
        }
    }

    /// Registers an additional (or replacement, by name) pattern.
    pub fn add_pattern(&self, pattern: Pattern) {
        let mut patterns = self.patterns.write().expect("ted pattern lock poisoned");
        if let Some(existing) = patterns.iter_mut().find(|p| p.name == pattern.name) {
            *existing = pattern;
        } else {
            patterns.push(pattern);
        }
    }

    /// Evaluates rider-scoped patterns (attack/crash/mechanical by default)
    /// against one batch of position-derived samples.
    pub fn on_position_batch(&self, samples: &[RiderSample]) -> Vec<TacticalEvent> {
        self.evaluate(samples.iter().map(|s| (&s.facts, s.location, s.race_distance_m, vec![s.rider_id.clone()])), PatternScope::Rider)
    }

    /// Evaluates group-scoped patterns (breakaway/sprint/chase by default)
    /// against one race-state snapshot's group-derived samples.
    pub fn on_race_state(&self, samples: &[GroupSample]) -> Vec<TacticalEvent> {
        self.evaluate(
            samples.iter().map(|s| (&s.facts, s.location, s.race_distance_m, s.rider_ids.clone())),
            PatternScope::Group,
        )
    }

    fn evaluate<'a>(
        &self,
        inputs: impl Iterator<Item = (&'a Facts, Option<GeoPoint>, f64, Vec<String>)>,
        scope: PatternScope,
    ) -> Vec<TacticalEvent> {
        let patterns = self.patterns.read().expect("ted pattern lock poisoned").clone();
        let mut published = Vec::new();

        for (facts, location, race_distance_m, riders) in inputs {
            for pattern in patterns.iter().filter(|p| p.scope == scope) {
                let Some(result) = pattern.evaluate(facts) else { continue };
                if result.confidence < self.config.confidence_threshold {
                    debug!(pattern = %pattern.name, confidence = result.confidence, "below publish threshold");
                    continue;
                }

                let candidate = TacticalEvent {
                    id: Uuid::new_v4().to_string(),
                    event_type: pattern.event_type,
                    severity: pattern.severity,
                    confidence: result.confidence,
                    timestamp: Utc::now(),
                    location,
                    race_distance_m,
                    involved_riders: riders.clone(),
                    trigger_data: facts.values().cloned().collect(),
                    tags: vec![pattern.name.clone()],
                    verification_status: VerificationStatus::Unverified,
                    related_events: Vec::new(),
                    impact: None,
                };

                if let Some(event) = self.publish_or_merge(candidate) {
                    published.push(event);
                }
            }
        }

        published
    }

    /// Merges `candidate` into a matching active event (same type, within
    /// the dedup time/distance window, sharing a rider), or publishes it as
    /// a new active event with freshly computed correlations and impact.
    fn publish_or_merge(&self, candidate: TacticalEvent) -> Option<TacticalEvent> {
        if let Some(mut existing) = self.find_merge_target(&candidate) {
            merge_event(&mut existing, candidate);
            existing.impact = Some(assess_impact(&existing));
            self.active.insert(existing.id.clone(), existing.clone());
            return Some(existing);
        }

        let mut event = candidate;
        self.correlate(&mut event);
        event.impact = Some(assess_impact(&event));
        self.active.insert(event.id.clone(), event.clone());
        info!(event_id = %event.id, event_type = ?event.event_type, confidence = event.confidence, "published tactical event");
        Some(event)
    }

    fn find_merge_target(&self, candidate: &TacticalEvent) -> Option<TacticalEvent> {
        self.active.iter().find_map(|entry| {
            let existing = entry.value();
            if existing.event_type != candidate.event_type {
                return None;
            }
            let dt = (candidate.timestamp - existing.timestamp).num_seconds().abs();
            if dt > DEDUP_TIME_WINDOW_S {
                return None;
            }
            let close_enough = match (existing.location, candidate.location) {
                (Some(a), Some(b)) => geo_distance_m(a, b) <= DEDUP_DISTANCE_M,
                _ => true,
            };
            if !close_enough {
                return None;
            }
            let shares_rider = existing
                .involved_riders
                .iter()
                .any(|r| candidate.involved_riders.contains(r));
            if !shares_rider {
                return None;
            }
            Some(existing.clone())
        })
    }

    /// Links `event` to recent active events per the correlation rules,
    /// recording the relationship on both sides.
    fn correlate(&self, event: &mut TacticalEvent) {
        for rule in correlation_rules() {
            if rule.to != event.event_type {
                continue;
            }
            for mut other in self.active.iter_mut() {
                if other.event_type != rule.from {
                    continue;
                }
                let dt = (event.timestamp - other.timestamp).num_seconds().abs();
                if dt > rule.max_delta_s {
                    continue;
                }
                let close_enough = match (event.location, other.location) {
                    (Some(a), Some(b)) => geo_distance_m(a, b) <= rule.max_distance_m,
                    _ => true,
                };
                if !close_enough {
                    continue;
                }
                other.related_events.push(RelatedEvent {
                    event_id: event.id.clone(),
                    relationship: rule.relationship,
                });
                event.related_events.push(RelatedEvent {
                    event_id: other.id.clone(),
                    relationship: rule.relationship,
                });
            }
        }
    }

    /// Marks an event's verification status, e.g. after human review.
    pub fn verify(&self, event_id: &str, status: VerificationStatus) -> bool {
        if let Some(mut entry) = self.active.get_mut(event_id) {
            entry.verification_status = status;
            true
        } else {
            false
        }
    }

    pub fn get_active(&self) -> Vec<TacticalEvent> {
        self.active.iter().map(|e| e.value().clone()).collect()
    }

    pub fn get_by_type(&self, event_type: TacticalEventType, limit: usize) -> Vec<TacticalEvent> {
        let mut events: Vec<_> = self
            .active
            .iter()
            .filter(|e| e.value().event_type == event_type)
            .map(|e| e.value().clone())
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events.truncate(limit);
        events
    }

    pub fn get_by_rider(&self, rider_id: &str, limit: usize) -> Vec<TacticalEvent> {
        let mut events: Vec<_> = self
            .active
            .iter()
            .filter(|e| e.value().involved_riders.iter().any(|r| r == rider_id))
            .map(|e| e.value().clone())
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events.truncate(limit);
        events
    }

    /// Drops active events older than `eventRetention`, keeping the active
    /// table from growing unbounded over a multi-hour race.
    pub fn prune_expired(&self) {
        let retention = self.config.event_retention();
        let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::zero());
        self.active.retain(|_, event| event.timestamp >= cutoff);
    }

    /// Periodic housekeeping loop: prunes expired events until cancelled.
    pub async fn run(&self, cancellation: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.detection_interval());
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    info!("ted housekeeping loop shutting down");
                    return;
                }
                _ = interval.tick() => {
                    self.prune_expired();
                }
            }
        }
    }
}

fn merge_event(existing: &mut TacticalEvent, candidate: TacticalEvent) {
    for rider in candidate.involved_riders {
        if !existing.involved_riders.contains(&rider) {
            existing.involved_riders.push(rider);
        }
    }
    existing.confidence = (existing.confidence + candidate.confidence) / 2.0;
    existing.trigger_data.extend(candidate.trigger_data);
    for tag in candidate.tags {
        if !existing.tags.contains(&tag) {
            existing.tags.push(tag);
        }
    }
    if candidate.severity > existing.severity {
        existing.severity = candidate.severity;
    }
    existing.timestamp = existing.timestamp.max(candidate.timestamp);
}

/// Impact assessment, a pure function of event type/severity/riders/tags.
fn assess_impact(event: &TacticalEvent) -> EventImpact {
    let affected_riders = event.involved_riders.len();

    let (race_flow, base_delay_s, group_split) = match event.event_type {
        TacticalEventType::Crash => ("disrupted", 30.0, affected_riders > 1),
        TacticalEventType::Mechanical => ("disrupted", 15.0, false),
        TacticalEventType::Attack => ("accelerating", 0.0, true),
        TacticalEventType::Chase => ("accelerating", 0.0, false),
        TacticalEventType::Breakaway => ("stratified", 0.0, true),
        TacticalEventType::Sprint => ("accelerating", 0.0, false),
        TacticalEventType::WeatherEvent => ("disrupted", 60.0, false),
    };

    let severity_factor = event.severity.score_multiplier();
    let tactical_significance = (event.confidence * severity_factor).min(1.0);
    let estimated_time_delay_s = base_delay_s * severity_factor;
    let gc_impact = if matches!(event.event_type, TacticalEventType::Crash | TacticalEventType::Mechanical) {
        tactical_significance * affected_riders as f64
    } else {
        tactical_significance
    };

    EventImpact {
        race_flow: race_flow.to_string(),
        tactical_significance,
        affected_riders,
        estimated_time_delay_s,
        group_split,
        gc_impact,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config() -> TedConfig {
        TedConfig { detection_interval_ms: 1_000, confidence_threshold: 0.5, event_retention_s: 3_600 }
    }

    fn attack_facts() -> Facts {
        HashMap::from([
            ("delta_speed_ms".to_string(), serde_json::json!(4.0)),
            ("delta_position".to_string(), serde_json::json!(6)),
            ("gap_to_group_s".to_string(), serde_json::json!(12.0)),
        ])
    }

    #[test]
    fn attack_pattern_publishes_an_event() {
        let ted = Ted::new(config());
        let samples = vec![RiderSample {
            rider_id: "r1".into(),
            facts: attack_facts(),
            location: Some(GeoPoint { lat: 45.0, lon: 6.0 }),
            race_distance_m: 50_000.0,
        }];
        let events = ted.on_position_batch(&samples);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, TacticalEventType::Attack);
        assert!(ted.get_active().len() == 1);
    }

    #[test]
    fn repeated_nearby_attack_merges_instead_of_duplicating() {
        let ted = Ted::new(config());
        let samples = vec![RiderSample {
            rider_id: "r1".into(),
            facts: attack_facts(),
            location: Some(GeoPoint { lat: 45.0, lon: 6.0 }),
            race_distance_m: 50_000.0,
        }];
        ted.on_position_batch(&samples);
        ted.on_position_batch(&samples);
        assert_eq!(ted.get_active().len(), 1);
        let merged = &ted.get_active()[0];
        assert_eq!(merged.involved_riders, vec!["r1".to_string()]);
    }

    #[test]
    fn below_confidence_threshold_is_not_published() {
        let mut cfg = config();
        cfg.confidence_threshold = 0.99;
        let ted = Ted::new(cfg);
        let samples = vec![RiderSample {
            rider_id: "r1".into(),
            facts: attack_facts(),
            location: None,
            race_distance_m: 0.0,
        }];
        assert!(ted.on_position_batch(&samples).is_empty());
    }

    #[test]
    fn crash_then_mechanical_links_as_consequence() {
        let ted = Ted::new(config());
        let crash_facts: Facts = HashMap::from([
            ("delta_speed_ms".to_string(), serde_json::json!(-12.0)),
            ("delta_position".to_string(), serde_json::json!(25)),
        ]);
        let mechanical_facts: Facts = HashMap::from([
            ("delta_speed_ms".to_string(), serde_json::json!(-6.0)),
            ("delta_position".to_string(), serde_json::json!(15)),
            ("steady_deceleration".to_string(), serde_json::json!(true)),
        ]);
        let loc = Some(GeoPoint { lat: 45.0, lon: 6.0 });

        ted.on_position_batch(&[RiderSample { rider_id: "r1".into(), facts: crash_facts, location: loc, race_distance_m: 10_000.0 }]);
        ted.on_position_batch(&[RiderSample { rider_id: "r2".into(), facts: mechanical_facts, location: loc, race_distance_m: 10_050.0 }]);

        let mechanical = ted.get_by_type(TacticalEventType::Mechanical, 10);
        assert_eq!(mechanical.len(), 1);
        assert!(!mechanical[0].related_events.is_empty());
    }

    #[test]
    fn verify_updates_status_of_an_active_event() {
        let ted = Ted::new(config());
        ted.on_position_batch(&[RiderSample {
            rider_id: "r1".into(),
            facts: attack_facts(),
            location: None,
            race_distance_m: 0.0,
        }]);
        let id = ted.get_active()[0].id.clone();
        assert!(ted.verify(&id, VerificationStatus::Verified));
        assert_eq!(ted.get_active()[0].verification_status, VerificationStatus::Verified);
    }
}
