//! Pattern definitions: a name, severity, base confidence, scope, and an
//! ordered list of atomic conditions.

use super::conditions::{Condition, Facts, Op};
use crate::types::{Severity, TacticalEventType};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PatternScope {
    /// Matched per rider, fed by `Ted::on_position_batch`.
    Rider,
    /// Matched per group, fed by `Ted::on_race_state`.
    Group,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub name: String,
    pub event_type: TacticalEventType,
    pub severity: Severity,
    pub base_confidence: f64,
    pub scope: PatternScope,
    pub conditions: Vec<Condition>,
}

/// A pattern matches when at least 70% of its conditions hold. Confidence
/// is `baseConfidence * matched/total * severity.score_multiplier()`.
pub struct MatchResult {
    pub matched: usize,
    pub total: usize,
    pub confidence: f64,
}

const MATCH_RATIO_THRESHOLD: f64 = 0.7;

impl Pattern {
    pub fn evaluate(&self, facts: &Facts) -> Option<MatchResult> {
        if self.conditions.is_empty() {
            return None;
        }
        let matched = self.conditions.iter().filter(|c| c.matches(facts)).count();
        let total = self.conditions.len();
        let ratio = matched as f64 / total as f64;
        if ratio < MATCH_RATIO_THRESHOLD {
            return None;
        }
        let confidence = (self.base_confidence * ratio * self.severity.score_multiplier()).min(1.0);
        Some(MatchResult { matched, total, confidence })
    }
}

/// The normative default pattern table: attack/crash/mechanical are
/// rider-scoped, breakaway/sprint/chase are group-scoped.
pub fn default_patterns() -> Vec<Pattern> {
    vec![
        Pattern {
            name: "attack".into(),
            event_type: TacticalEventType::Attack,
            severity: Severity::Medium,
            base_confidence: 0.8,
            scope: PatternScope::Rider,
            conditions: vec![
                Condition::new("delta_speed_ms", Op::Gt, serde_json::json!(3.0)).with_window(10.0),
                Condition::new("delta_position", Op::Gt, serde_json::json!(5)),
                Condition::new("gap_to_group_s", Op::Gt, serde_json::json!(10.0)),
            ],
        },
        Pattern {
            name: "crash".into(),
            event_type: TacticalEventType::Crash,
            severity: Severity::High,
            base_confidence: 0.9,
            scope: PatternScope::Rider,
            conditions: vec![
                Condition::new("delta_speed_ms", Op::Lt, serde_json::json!(-10.0)).with_window(5.0),
                Condition::new("delta_position", Op::Gt, serde_json::json!(20)),
            ],
        },
        Pattern {
            name: "mechanical".into(),
            event_type: TacticalEventType::Mechanical,
            severity: Severity::Medium,
            base_confidence: 0.7,
            scope: PatternScope::Rider,
            conditions: vec![
                Condition::new("delta_speed_ms", Op::Lt, serde_json::json!(-5.0)).with_window(30.0),
                Condition::new("delta_position", Op::Gt, serde_json::json!(10)),
                Condition::new("steady_deceleration", Op::Eq, serde_json::json!(true)),
            ],
        },
        Pattern {
            name: "breakaway".into(),
            event_type: TacticalEventType::Breakaway,
            severity: Severity::Medium,
            base_confidence: 0.85,
            scope: PatternScope::Group,
            conditions: vec![
                Condition::new("group_size", Op::Between, serde_json::json!([2, 20])),
                Condition::new("gap_to_peloton_s", Op::Gt, serde_json::json!(30.0)),
                Condition::new("sustained_s", Op::Gte, serde_json::json!(300.0)).with_window(300.0),
            ],
        },
        Pattern {
            name: "sprint".into(),
            event_type: TacticalEventType::Sprint,
            severity: Severity::Medium,
            base_confidence: 0.8,
            scope: PatternScope::Group,
            conditions: vec![
                Condition::new("avg_speed_ms", Op::Gt, serde_json::json!(16.0)),
                Condition::new("compactness_m", Op::Lt, serde_json::json!(100.0)),
                Condition::new("distance_to_finish_m", Op::Lt, serde_json::json!(5_000.0)),
            ],
        },
        Pattern {
            name: "chase".into(),
            event_type: TacticalEventType::Chase,
            severity: Severity::Medium,
            base_confidence: 0.75,
            scope: PatternScope::Group,
            conditions: vec![
                Condition::new("group_size", Op::Gt, serde_json::json!(5)),
                Condition::new("delta_speed_ms", Op::Gt, serde_json::json!(2.0)),
                Condition::new("gap_decreasing", Op::Eq, serde_json::json!(true)).with_window(180.0),
            ],
        },
    ]
}
