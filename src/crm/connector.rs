//! Pluggable upstream transport, analogous to the host crate's
//! `acquisition::SensorSource` trait — the CRM never hardcodes how a
//! connection is actually made; it drives whatever `Connector` is wired in.

use crate::error::PipelineError;
use crate::types::Endpoint;
use async_trait::async_trait;
use std::time::Duration;

/// Attempts a single connection/probe against an endpoint.
///
/// Returns the measured round-trip latency on success. Implementations are
/// expected to be cheap to retry; the CRM owns all backoff and retry
/// policy.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn attempt(&self, endpoint: &Endpoint) -> Result<Duration, PipelineError>;
}

/// No-op connector used by tests and by any deployment without a real
/// upstream wired in: every attempt succeeds immediately.
pub struct AlwaysUp;

#[async_trait]
impl Connector for AlwaysUp {
    async fn attempt(&self, _endpoint: &Endpoint) -> Result<Duration, PipelineError> {
        Ok(Duration::from_millis(5))
    }
}
