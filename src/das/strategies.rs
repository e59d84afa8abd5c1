//! The six conflict-resolution strategies DAS tries, in order, for every
//! buffered point — plus the conflict-level scorer.

use chrono::{DateTime, Utc};
use serde_json::Value;
use statrs::statistics::Statistics;
use std::time::Duration;

/// One source's contribution to a single resolution, already enriched
/// with its trust score so strategies don't need the source registry.
pub struct ContributionInput<'a> {
    pub value: &'a Value,
    pub trust: f64,
    pub priority: u8,
    pub reliability: f64,
    pub metadata_confidence: Option<f64>,
    pub origin_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    WeightedAverage,
    HighestPriority,
    MajorityVote,
    ConfidenceWeighted,
    TemporalPriority,
    SourceReliability,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::WeightedAverage => "weighted_average",
            Strategy::HighestPriority => "highest_priority",
            Strategy::MajorityVote => "majority_vote",
            Strategy::ConfidenceWeighted => "confidence_weighted",
            Strategy::TemporalPriority => "temporal_priority",
            Strategy::SourceReliability => "source_reliability",
        }
    }

    pub fn apply(&self, inputs: &[ContributionInput], max_data_age: Duration) -> Option<(Value, f64)> {
        match self {
            Strategy::WeightedAverage => weighted_average(inputs),
            Strategy::HighestPriority => highest_priority(inputs),
            Strategy::MajorityVote => majority_vote(inputs),
            Strategy::ConfidenceWeighted => confidence_weighted(inputs),
            Strategy::TemporalPriority => temporal_priority(inputs, max_data_age),
            Strategy::SourceReliability => source_reliability(inputs),
        }
    }
}

/// Default ordered strategy list tried for every data type.
pub const DEFAULT_STRATEGY_ORDER: &[Strategy] = &[
    Strategy::WeightedAverage,
    Strategy::HighestPriority,
    Strategy::MajorityVote,
    Strategy::ConfidenceWeighted,
    Strategy::TemporalPriority,
    Strategy::SourceReliability,
];

fn weighted_average(inputs: &[ContributionInput]) -> Option<(Value, f64)> {
    if inputs.is_empty() {
        return None;
    }
    let mut numeric = Vec::with_capacity(inputs.len());
    for i in inputs {
        numeric.push((i.value.as_f64()?, i.trust));
    }
    let trust_sum: f64 = numeric.iter().map(|(_, t)| t).sum();
    if trust_sum <= 0.0 {
        return None;
    }
    let value = numeric.iter().map(|(v, t)| v * t).sum::<f64>() / trust_sum;
    let confidence = (trust_sum / inputs.len() as f64).min(0.95);
    Some((serde_json::json!(value), confidence))
}

fn highest_priority(inputs: &[ContributionInput]) -> Option<(Value, f64)> {
    let best = inputs.iter().max_by_key(|i| i.priority)?;
    Some((best.value.clone(), (best.priority as f64 / 10.0).min(0.9)))
}

fn majority_vote(inputs: &[ContributionInput]) -> Option<(Value, f64)> {
    if inputs.is_empty() {
        return None;
    }
    let mut groups: std::collections::HashMap<String, (usize, f64, &Value)> = std::collections::HashMap::new();
    for i in inputs {
        let key = i.value.to_string();
        let entry = groups.entry(key).or_insert((0, 0.0, i.value));
        entry.0 += 1;
        entry.1 += i.trust;
    }
    let (_, (count, trust_sum, value)) = groups
        .into_iter()
        .max_by(|a, b| {
            let score_a = a.1 .0 as f64 * a.1 .1;
            let score_b = b.1 .0 as f64 * b.1 .1;
            score_a.total_cmp(&score_b)
        })?;
    let score = count as f64 * trust_sum;
    let confidence = (score / inputs.len() as f64).min(0.95);
    Some((value.clone(), confidence))
}

fn confidence_weighted(inputs: &[ContributionInput]) -> Option<(Value, f64)> {
    let best = inputs
        .iter()
        .filter(|i| i.metadata_confidence.is_some())
        .max_by(|a, b| {
            let score_a = a.metadata_confidence.unwrap() * a.trust;
            let score_b = b.metadata_confidence.unwrap() * b.trust;
            score_a.total_cmp(&score_b)
        })?;
    let confidence = (best.metadata_confidence.unwrap() * best.trust).clamp(0.0, 1.0);
    Some((best.value.clone(), confidence))
}

fn temporal_priority(inputs: &[ContributionInput], max_data_age: Duration) -> Option<(Value, f64)> {
    let newest = inputs.iter().max_by_key(|i| i.origin_timestamp)?;
    let age_ms = (Utc::now() - newest.origin_timestamp).num_milliseconds().max(0) as f64;
    let max_age_ms = (max_data_age.as_millis() as f64).max(1.0);
    let t = (age_ms / max_age_ms).clamp(0.0, 1.0);
    // Decays linearly from 1 at age 0 to 0.1 at max_data_age.
    let confidence = 1.0 - t * 0.9;
    Some((newest.value.clone(), confidence))
}

fn source_reliability(inputs: &[ContributionInput]) -> Option<(Value, f64)> {
    let best = inputs.iter().max_by(|a, b| a.reliability.total_cmp(&b.reliability))?;
    Some((best.value.clone(), best.reliability.min(0.9)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictLevel {
    None,
    Low,
    Medium,
    High,
}

impl From<ConflictLevel> for crate::types::ConflictLevel {
    fn from(c: ConflictLevel) -> Self {
        match c {
            ConflictLevel::None => crate::types::ConflictLevel::None,
            ConflictLevel::Low => crate::types::ConflictLevel::Low,
            ConflictLevel::Medium => crate::types::ConflictLevel::Medium,
            ConflictLevel::High => crate::types::ConflictLevel::High,
        }
    }
}

/// Coefficient-of-variation for numeric vectors, unique-value ratio
/// otherwise.
pub fn conflict_level(inputs: &[ContributionInput]) -> ConflictLevel {
    if inputs.len() < 2 {
        return ConflictLevel::None;
    }

    let numeric: Vec<f64> = inputs.iter().filter_map(|i| i.value.as_f64()).collect();
    if numeric.len() == inputs.len() {
        let mean = numeric.as_slice().mean();
        if mean.abs() < 1e-9 {
            return ConflictLevel::None;
        }
        let cv = numeric.as_slice().std_dev() / mean.abs();
        return if cv < 0.05 {
            ConflictLevel::None
        } else if cv < 0.10 {
            ConflictLevel::Low
        } else if cv < 0.20 {
            ConflictLevel::Medium
        } else {
            ConflictLevel::High
        };
    }

    let unique: std::collections::HashSet<String> = inputs.iter().map(|i| i.value.to_string()).collect();
    let ratio = (unique.len() as f64 - 1.0) / inputs.len() as f64;
    if ratio <= 0.0 {
        ConflictLevel::None
    } else if ratio < 0.3 {
        ConflictLevel::Low
    } else if ratio < 0.5 {
        ConflictLevel::Medium
    } else {
        ConflictLevel::High
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(value: Value, trust: f64, priority: u8, reliability: f64, confidence: Option<f64>) -> ContributionInput<'static> {
        ContributionInput {
            value: Box::leak(Box::new(value)),
            trust,
            priority,
            reliability,
            metadata_confidence: confidence,
            origin_timestamp: Utc::now(),
        }
    }

    #[test]
    fn weighted_average_favors_higher_trust() {
        let inputs = vec![
            input(serde_json::json!(10.0), 0.9, 5, 0.8, None),
            input(serde_json::json!(20.0), 0.1, 5, 0.8, None),
        ];
        let (value, confidence) = weighted_average(&inputs).unwrap();
        assert!(value.as_f64().unwrap() < 15.0);
        assert!(confidence <= 0.95);
    }

    #[test]
    fn weighted_average_returns_none_for_non_numeric() {
        let inputs = vec![input(serde_json::json!("stopped"), 0.9, 5, 0.8, None)];
        assert!(weighted_average(&inputs).is_none());
    }

    #[test]
    fn majority_vote_picks_most_agreed_value() {
        let inputs = vec![
            input(serde_json::json!("clear"), 0.5, 5, 0.5, None),
            input(serde_json::json!("clear"), 0.5, 5, 0.5, None),
            input(serde_json::json!("wet"), 0.9, 5, 0.5, None),
        ];
        let (value, _) = majority_vote(&inputs).unwrap();
        assert_eq!(value, serde_json::json!("clear"));
    }

    #[test]
    fn conflict_level_is_none_for_identical_numeric_values() {
        let inputs = vec![
            input(serde_json::json!(10.0), 1.0, 5, 0.5, None),
            input(serde_json::json!(10.0), 1.0, 5, 0.5, None),
        ];
        assert_eq!(conflict_level(&inputs), ConflictLevel::None);
    }

    #[test]
    fn conflict_level_is_high_for_widely_varying_numeric_values() {
        let inputs = vec![
            input(serde_json::json!(10.0), 1.0, 5, 0.5, None),
            input(serde_json::json!(100.0), 1.0, 5, 0.5, None),
        ];
        assert_eq!(conflict_level(&inputs), ConflictLevel::High);
    }

    #[test]
    fn conflict_level_is_high_for_all_distinct_non_numeric_values() {
        let inputs = vec![
            input(serde_json::json!("dry"), 1.0, 5, 0.5, None),
            input(serde_json::json!("wet"), 1.0, 5, 0.5, None),
        ];
        assert_eq!(conflict_level(&inputs), ConflictLevel::High);
    }
}
