//! Atomic pattern conditions: `(field, op, value[, timeWindow])`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub type Facts = HashMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Gt,
    Lt,
    Eq,
    Gte,
    Lte,
    Between,
    In,
    Contains,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: Op,
    pub value: Value,
    pub time_window_s: Option<f64>,
}

impl Condition {
    pub fn new(field: impl Into<String>, op: Op, value: Value) -> Self {
        Self { field: field.into(), op, value, time_window_s: None }
    }

    pub fn with_window(mut self, seconds: f64) -> Self {
        self.time_window_s = Some(seconds);
        self
    }

    pub fn matches(&self, facts: &Facts) -> bool {
        let Some(actual) = facts.get(&self.field) else {
            return false;
        };

        match self.op {
            Op::Gt => numeric(actual).zip(numeric(&self.value)).map(|(a, b)| a > b).unwrap_or(false),
            Op::Lt => numeric(actual).zip(numeric(&self.value)).map(|(a, b)| a < b).unwrap_or(false),
            Op::Gte => numeric(actual).zip(numeric(&self.value)).map(|(a, b)| a >= b).unwrap_or(false),
            Op::Lte => numeric(actual).zip(numeric(&self.value)).map(|(a, b)| a <= b).unwrap_or(false),
            Op::Eq => actual == &self.value,
            Op::Between => {
                let Some(bounds) = self.value.as_array() else { return false };
                if bounds.len() != 2 {
                    return false;
                }
                let (Some(a), Some(lo), Some(hi)) = (numeric(actual), numeric(&bounds[0]), numeric(&bounds[1])) else {
                    return false;
                };
                a >= lo && a <= hi
            }
            Op::In => self.value.as_array().map(|arr| arr.contains(actual)).unwrap_or(false),
            Op::Contains => match (actual.as_str(), self.value.as_str()) {
                (Some(haystack), Some(needle)) => haystack.contains(needle),
                _ => false,
            },
        }
    }
}

fn numeric(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_bool().map(|b| if b { 1.0 } else { 0.0 }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(pairs: &[(&str, Value)]) -> Facts {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn gt_matches_numeric_threshold() {
        let c = Condition::new("delta_speed_ms", Op::Gt, serde_json::json!(3.0));
        assert!(c.matches(&facts(&[("delta_speed_ms", serde_json::json!(5.0))])));
        assert!(!c.matches(&facts(&[("delta_speed_ms", serde_json::json!(1.0))])));
    }

    #[test]
    fn between_checks_inclusive_bounds() {
        let c = Condition::new("group_size", Op::Between, serde_json::json!([2, 20]));
        assert!(c.matches(&facts(&[("group_size", serde_json::json!(2))])));
        assert!(c.matches(&facts(&[("group_size", serde_json::json!(20))])));
        assert!(!c.matches(&facts(&[("group_size", serde_json::json!(21))])));
    }

    #[test]
    fn missing_field_never_matches() {
        let c = Condition::new("ghost_field", Op::Gt, serde_json::json!(1.0));
        assert!(!c.matches(&facts(&[])));
    }
}
