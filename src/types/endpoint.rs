//! CRM's `Endpoint` and per-endpoint `CircuitBreaker`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointRole {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointStatus {
    Inactive,
    Connecting,
    Connected,
    Failed,
}

/// A registered upstream telemetry endpoint.
///
/// Registered once via `Crm::register`; never destroyed while the process
/// runs. Status transitions are driven exclusively by the CRM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub address: String,
    pub role: EndpointRole,
    pub weight: u32,
    pub status: EndpointStatus,
    /// Health score in `[0, 100]`.
    pub health: f64,
    /// Rolling average latency, milliseconds.
    pub latency_ms: f64,
    pub message_count: u64,
    pub error_count: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub breaker: CircuitBreaker,
}

impl Endpoint {
    pub fn new(id: impl Into<String>, address: impl Into<String>, role: EndpointRole, weight: u32) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            role,
            weight,
            status: EndpointStatus::Inactive,
            health: 100.0,
            latency_ms: 0.0,
            message_count: 0,
            error_count: 0,
            last_success: None,
            breaker: CircuitBreaker::default(),
        }
    }

    /// Selection score used by `Crm::select_best`:
    /// `0.4·health + 0.3·max(0, 100 − latency/10) + 0.3·priorityWeight`.
    pub fn selection_score(&self) -> f64 {
        let latency_component = (100.0 - self.latency_ms / 10.0).max(0.0);
        let priority_weight = (self.weight as f64).min(100.0);
        0.4 * self.health + 0.3 * latency_component + 0.3 * priority_weight
    }

    pub fn is_selectable(&self) -> bool {
        self.status != EndpointStatus::Failed && self.breaker.state != CircuitState::Open
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

/// Per-endpoint circuit breaker state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreaker {
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub next_attempt: Option<DateTime<Utc>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            next_attempt: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_score_rewards_health_and_low_latency() {
        let mut a = Endpoint::new("a", "addr-a", EndpointRole::Primary, 100);
        a.health = 100.0;
        a.latency_ms = 50.0;
        let mut b = Endpoint::new("b", "addr-b", EndpointRole::Fallback, 50);
        b.health = 100.0;
        b.latency_ms = 500.0;
        assert!(a.selection_score() > b.selection_score());
    }

    #[test]
    fn failed_endpoint_is_not_selectable() {
        let mut e = Endpoint::new("a", "addr-a", EndpointRole::Primary, 100);
        e.status = EndpointStatus::Failed;
        assert!(!e.is_selectable());
    }
}
