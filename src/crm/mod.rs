//! Connection Resilience Manager — keeps at least one upstream telemetry
//! feed alive and hides transient network failure from the rest of the
//! pipeline.
//!
//! Mirrors the host crate's self-healing shape: a registry of monitored
//! components (here, endpoints instead of WITS/LLM/disk) probed on a
//! periodic `tokio::time::interval`, each with its own recovery action.

mod connector;

pub use connector::{AlwaysUp, Connector};

use crate::config::CrmConfig;
use crate::error::PipelineError;
use crate::types::{CircuitState, Endpoint, EndpointRole, EndpointStatus, RawTelemetryFrame};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverOutcome {
    FailedOver,
    ServiceDegraded,
}

/// Registry + circuit breakers for every known upstream endpoint.
pub struct Crm {
    endpoints: DashMap<String, Endpoint>,
    connector: Arc<dyn Connector>,
    config: CrmConfig,
    seen_ids: DashMap<String, DateTime<Utc>>,
    seen_type_ts: DashMap<String, DateTime<Utc>>,
    rejected_frames: AtomicU64,
}

impl Crm {
    pub fn new(config: CrmConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            endpoints: DashMap::new(),
            connector,
            config,
            seen_ids: DashMap::new(),
            seen_type_ts: DashMap::new(),
            rejected_frames: AtomicU64::new(0),
        }
    }

    pub fn rejected_frame_count(&self) -> u64 {
        self.rejected_frames.load(Ordering::Relaxed)
    }

    /// Idempotent by id: re-registering an existing endpoint is a no-op.
    pub fn register(&self, id: impl Into<String>, address: impl Into<String>, role: EndpointRole, weight: u32) {
        let id = id.into();
        self.endpoints
            .entry(id.clone())
            .or_insert_with(|| Endpoint::new(id, address, role, weight));
    }

    pub fn endpoint(&self, id: &str) -> Option<Endpoint> {
        self.endpoints.get(id).map(|e| e.clone())
    }

    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.iter().map(|e| e.clone()).collect()
    }

    /// Connects with exponential backoff, honoring the circuit breaker.
    pub async fn connect(&self, endpoint_id: &str) -> Result<(), PipelineError> {
        let now = Utc::now();

        let half_open = {
            let mut entry = self
                .endpoints
                .get_mut(endpoint_id)
                .ok_or_else(|| PipelineError::Internal(format!("unknown endpoint {endpoint_id}")))?;

            if entry.breaker.state == CircuitState::Open {
                if let Some(next_attempt) = entry.breaker.next_attempt {
                    if now < next_attempt {
                        return Err(PipelineError::CircuitOpen {
                            next_attempt_unix_ms: next_attempt.timestamp_millis(),
                        });
                    }
                }
                entry.breaker.state = CircuitState::HalfOpen;
            }
            entry.breaker.state == CircuitState::HalfOpen
        };

        entry_set_status(&self.endpoints, endpoint_id, EndpointStatus::Connecting);

        let max_attempts = if half_open { 1 } else { self.config.max_retry_attempts };
        let mut last_err = None;

        for attempt in 0..max_attempts {
            let snapshot = match self.endpoint(endpoint_id) {
                Some(e) => e,
                None => return Err(PipelineError::Internal(format!("unknown endpoint {endpoint_id}"))),
            };

            match self.connector.attempt(&snapshot).await {
                Ok(latency) => {
                    self.record_success(endpoint_id, latency);
                    return Ok(());
                }
                Err(e) => {
                    let opened = self.record_failure(endpoint_id);
                    last_err = Some(e);
                    if opened || attempt + 1 >= max_attempts {
                        break;
                    }
                    let delay = backoff_delay(&self.config, attempt);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        entry_set_status(&self.endpoints, endpoint_id, EndpointStatus::Failed);
        Err(last_err.unwrap_or_else(|| PipelineError::TransientTransport(endpoint_id.to_string())))
    }

    /// `0.4·health + 0.3·max(0, 100 − latency/10) + 0.3·priorityWeight`,
    /// restricted to non-failed, non-open-breaker endpoints.
    pub fn select_best(&self) -> Option<Endpoint> {
        self.endpoints
            .iter()
            .filter(|e| e.is_selectable())
            .max_by(|a, b| a.selection_score().total_cmp(&b.selection_score()))
            .map(|e| e.clone())
    }

    /// Marks `failed_id` failed, then attempts to connect to the best
    /// alternative within `failoverTimeout`.
    pub async fn failover(&self, failed_id: &str) -> FailoverOutcome {
        entry_set_status(&self.endpoints, failed_id, EndpointStatus::Failed);
        warn!(endpoint = failed_id, "CRM: endpoint failed, attempting failover");

        let Some(alternative) = self.select_best() else {
            warn!("CRM: no alternative endpoint available, service degraded");
            return FailoverOutcome::ServiceDegraded;
        };

        match tokio::time::timeout(self.config.failover_timeout(), self.connect(&alternative.id)).await {
            Ok(Ok(())) => {
                info!(endpoint = %alternative.id, "CRM: failover succeeded");
                FailoverOutcome::FailedOver
            }
            _ => {
                warn!(endpoint = %alternative.id, "CRM: failover attempt did not complete in time");
                FailoverOutcome::ServiceDegraded
            }
        }
    }

    fn record_success(&self, endpoint_id: &str, latency: std::time::Duration) {
        if let Some(mut e) = self.endpoints.get_mut(endpoint_id) {
            e.breaker.state = CircuitState::Closed;
            e.breaker.failure_count = 0;
            e.breaker.next_attempt = None;
            e.status = EndpointStatus::Connected;
            e.last_success = Some(Utc::now());
            e.message_count += 1;
            e.latency_ms = latency.as_secs_f64() * 1000.0;
        }
    }

    /// Returns `true` if this failure opened the breaker.
    fn record_failure(&self, endpoint_id: &str) -> bool {
        let Some(mut e) = self.endpoints.get_mut(endpoint_id) else {
            return false;
        };
        e.error_count += 1;
        e.breaker.last_failure = Some(Utc::now());

        let was_half_open = e.breaker.state == CircuitState::HalfOpen;
        e.breaker.failure_count += 1;

        if was_half_open || e.breaker.failure_count >= self.config.failure_threshold {
            e.breaker.state = CircuitState::Open;
            e.breaker.next_attempt =
                Some(Utc::now() + chrono::Duration::milliseconds(self.config.circuit_breaker_timeout_ms as i64));
            true
        } else {
            false
        }
    }

    /// Verifies a frame's required fields, rejects duplicates seen within
    /// `duplicateDetectionWindow`, and optionally validates its checksum.
    pub fn check_frame_integrity(&self, frame: &RawTelemetryFrame) -> Result<(), PipelineError> {
        if frame.data_type.trim().is_empty() {
            self.rejected_frames.fetch_add(1, Ordering::Relaxed);
            return Err(PipelineError::ValidationFailure("missing frame type".into()));
        }

        let window = chrono::Duration::milliseconds(self.config.duplicate_detection_window_ms as i64);
        let now = Utc::now();

        if let Some(id) = &frame.id {
            if let Some(seen) = self.seen_ids.get(id) {
                if now - *seen <= window {
                    self.rejected_frames.fetch_add(1, Ordering::Relaxed);
                    return Err(PipelineError::ValidationFailure(format!("duplicate frame id {id}")));
                }
            }
            self.seen_ids.insert(id.clone(), now);
        }

        let type_ts_key = frame.type_timestamp_key();
        if let Some(seen) = self.seen_type_ts.get(&type_ts_key) {
            if now - *seen <= window {
                self.rejected_frames.fetch_add(1, Ordering::Relaxed);
                return Err(PipelineError::ValidationFailure(format!(
                    "duplicate type+timestamp {type_ts_key}"
                )));
            }
        }
        self.seen_type_ts.insert(type_ts_key, now);

        if let Some(checksum) = &frame.checksum {
            let payload = serde_json::to_vec(&frame.value).unwrap_or_default();
            let computed = format!("{:x}", md5::compute(payload));
            if &computed != checksum {
                self.rejected_frames.fetch_add(1, Ordering::Relaxed);
                return Err(PipelineError::ValidationFailure("checksum mismatch".into()));
            }
        }

        Ok(())
    }

    /// Drops dedup bookkeeping entries older than the detection window.
    fn prune_dedup_windows(&self) {
        let cutoff = Utc::now() - chrono::Duration::milliseconds(self.config.duplicate_detection_window_ms as i64 * 2);
        self.seen_ids.retain(|_, seen| *seen > cutoff);
        self.seen_type_ts.retain(|_, seen| *seen > cutoff);
    }

    /// One health-scoring cycle: probes every connected endpoint, adjusts
    /// health, and triggers failover on endpoints that drop below
    /// threshold or have gone stale.
    pub async fn run_health_cycle(self: &Arc<Self>) {
        let latency_threshold_ms = self.config.connection_timeout_ms as f64;
        let candidates: Vec<Endpoint> = self
            .endpoints
            .iter()
            .filter(|e| e.status == EndpointStatus::Connected)
            .map(|e| e.clone())
            .collect();

        for endpoint in candidates {
            let stale = endpoint
                .last_success
                .map(|t| Utc::now() - t > chrono::Duration::milliseconds(self.config.connection_timeout_ms as i64))
                .unwrap_or(true);

            let mut health_delta = 0.0;
            let mut probe_failed = false;

            match self.connector.attempt(&endpoint).await {
                Ok(latency) => {
                    let latency_ms = latency.as_secs_f64() * 1000.0;
                    if latency_ms < latency_threshold_ms / 2.0 {
                        health_delta = 1.0;
                    } else if latency_ms > latency_threshold_ms {
                        health_delta = -5.0;
                    }
                }
                Err(_) => {
                    health_delta = -10.0;
                    probe_failed = true;
                }
            }

            let dropped_below_threshold = {
                if let Some(mut e) = self.endpoints.get_mut(&endpoint.id) {
                    e.health = (e.health + health_delta).clamp(0.0, 100.0);
                    e.health < 10.0
                } else {
                    false
                }
            };

            if probe_failed {
                self.record_failure(&endpoint.id);
            }

            if dropped_below_threshold || stale {
                debug!(endpoint = %endpoint.id, health = endpoint.health, stale, "CRM: endpoint unhealthy");
                self.failover(&endpoint.id).await;
            }
        }

        self.prune_dedup_windows();
    }

    /// Runs `run_health_cycle` every `healthCheckInterval` until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.health_check_interval());
        info!(
            interval_ms = self.config.health_check_interval_ms,
            "CRM health check loop started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("CRM health check loop shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_health_cycle().await;
                }
            }
        }
    }
}

fn entry_set_status(endpoints: &DashMap<String, Endpoint>, id: &str, status: EndpointStatus) {
    if let Some(mut e) = endpoints.get_mut(id) {
        e.status = status;
    }
}

fn backoff_delay(config: &CrmConfig, attempt: u32) -> std::time::Duration {
    let scaled = config.retry_delay_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    std::time::Duration::from_millis((scaled as u64).min(config.max_retry_delay_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32};

    struct FlakyConnector {
        fail_next: AtomicU32,
        always_fail: AtomicBool,
    }

    #[async_trait]
    impl Connector for FlakyConnector {
        async fn attempt(&self, _endpoint: &Endpoint) -> Result<std::time::Duration, PipelineError> {
            if self.always_fail.load(Ordering::Relaxed) {
                return Err(PipelineError::TransientTransport("down".into()));
            }
            if self.fail_next.load(Ordering::Relaxed) > 0 {
                self.fail_next.fetch_sub(1, Ordering::Relaxed);
                return Err(PipelineError::TransientTransport("down".into()));
            }
            Ok(std::time::Duration::from_millis(10))
        }
    }

    fn test_config() -> CrmConfig {
        let mut c = CrmConfig::default();
        c.retry_delay_ms = 1;
        c.max_retry_delay_ms = 2;
        c.failure_threshold = 3;
        c
    }

    #[tokio::test]
    async fn register_is_idempotent() {
        let crm = Crm::new(test_config(), Arc::new(AlwaysUp));
        crm.register("a", "addr", EndpointRole::Primary, 10);
        crm.register("a", "addr-2", EndpointRole::Primary, 99);
        assert_eq!(crm.endpoint("a").unwrap().address, "addr");
    }

    #[tokio::test]
    async fn connect_succeeds_and_closes_breaker() {
        let crm = Crm::new(test_config(), Arc::new(AlwaysUp));
        crm.register("a", "addr", EndpointRole::Primary, 10);
        crm.connect("a").await.unwrap();
        let e = crm.endpoint("a").unwrap();
        assert_eq!(e.status, EndpointStatus::Connected);
        assert_eq!(e.breaker.state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn repeated_failures_open_the_breaker() {
        let connector = Arc::new(FlakyConnector {
            fail_next: AtomicU32::new(0),
            always_fail: AtomicBool::new(true),
        });
        let crm = Crm::new(test_config(), connector);
        crm.register("a", "addr", EndpointRole::Primary, 10);
        let result = crm.connect("a").await;
        assert!(result.is_err());
        let e = crm.endpoint("a").unwrap();
        assert_eq!(e.breaker.state, CircuitState::Open);
    }

    #[tokio::test]
    async fn circuit_open_rejects_before_timeout() {
        let connector = Arc::new(FlakyConnector {
            fail_next: AtomicU32::new(0),
            always_fail: AtomicBool::new(true),
        });
        let crm = Crm::new(test_config(), connector);
        crm.register("a", "addr", EndpointRole::Primary, 10);
        let _ = crm.connect("a").await;
        let second = crm.connect("a").await;
        assert!(matches!(second, Err(PipelineError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn select_best_prefers_healthier_lower_latency_endpoint() {
        let crm = Crm::new(test_config(), Arc::new(AlwaysUp));
        crm.register("slow", "addr", EndpointRole::Primary, 50);
        crm.register("fast", "addr", EndpointRole::Primary, 50);
        {
            let mut e = crm.endpoints.get_mut("slow").unwrap();
            e.latency_ms = 900.0;
        }
        {
            let mut e = crm.endpoints.get_mut("fast").unwrap();
            e.latency_ms = 10.0;
        }
        assert_eq!(crm.select_best().unwrap().id, "fast");
    }

    #[tokio::test]
    async fn failover_reports_degraded_when_no_alternative() {
        let crm = Crm::new(test_config(), Arc::new(AlwaysUp));
        crm.register("only", "addr", EndpointRole::Primary, 10);
        {
            let mut e = crm.endpoints.get_mut("only").unwrap();
            e.status = EndpointStatus::Failed;
        }
        assert_eq!(crm.failover("only").await, FailoverOutcome::ServiceDegraded);
    }

    #[tokio::test]
    async fn duplicate_frame_id_is_rejected() {
        let crm = Crm::new(test_config(), Arc::new(AlwaysUp));
        let frame = RawTelemetryFrame {
            source_id: "s1".into(),
            data_type: "position".into(),
            key: "rider-1".into(),
            value: serde_json::json!({"lat": 1.0}),
            origin_timestamp: Utc::now(),
            metadata: Default::default(),
            id: Some("frame-1".into()),
            checksum: None,
        };
        crm.check_frame_integrity(&frame).unwrap();
        assert!(matches!(
            crm.check_frame_integrity(&frame),
            Err(PipelineError::ValidationFailure(_))
        ));
        assert_eq!(crm.rejected_frame_count(), 1);
    }

    #[tokio::test]
    async fn checksum_mismatch_is_rejected() {
        let crm = Crm::new(test_config(), Arc::new(AlwaysUp));
        let frame = RawTelemetryFrame {
            source_id: "s1".into(),
            data_type: "position".into(),
            key: "rider-1".into(),
            value: serde_json::json!({"lat": 1.0}),
            origin_timestamp: Utc::now(),
            metadata: Default::default(),
            id: None,
            checksum: Some("deadbeef".into()),
        };
        assert!(crm.check_frame_integrity(&frame).is_err());
    }
}
