//! Shared error taxonomy for the race telemetry pipeline.
//!
//! Every subsystem keeps its own `thiserror` enum for local detail
//! (`crm::CrmError`, `das::DasError`, ...); this module defines the
//! cross-cutting kinds that a caller at a subsystem boundary actually
//! needs to branch on, and converts subsystem errors into it. WSM error
//! frames, DNS notifications and CRM/EB degraded-status fields are all
//! built from `PipelineError` — never a raw `anyhow::Error` string.

use thiserror::Error;

/// Top-level error kind, per the taxonomy in the error handling design.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Retried locally; never surfaced after a retry succeeds.
    #[error("transient transport error: {0}")]
    TransientTransport(String),

    /// Breaker open; reported upward without retry until the window elapses.
    #[error("circuit open, next attempt at {next_attempt_unix_ms}")]
    CircuitOpen { next_attempt_unix_ms: i64 },

    /// Offending input dropped; counter incremented by the caller.
    #[error("validation failed: {0}")]
    ValidationFailure(String),

    /// Connection rejected; no further processing performed.
    #[error("authentication failed: {0}")]
    AuthFailure(String),

    /// Per-event rejection; never closes the session on its own.
    #[error("rate limit exceeded")]
    RateLimited,

    /// Routed to the dead-letter topic; the consumer progresses.
    #[error("poison message: {0}")]
    PoisonMessage(String),

    /// Queue-full or max-connections; reported to the caller, not retried.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Unhandled exception in a handler; event poisoned, metrics incremented.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Stable machine-readable code, used as WSM's `error.code` field.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::TransientTransport(_) => "TRANSIENT_TRANSPORT",
            PipelineError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            PipelineError::ValidationFailure(_) => "VALIDATION_FAILURE",
            PipelineError::AuthFailure(_) => "AUTH_FAILURE",
            PipelineError::RateLimited => "RATE_LIMIT_EXCEEDED",
            PipelineError::PoisonMessage(_) => "POISON_MESSAGE",
            PipelineError::ResourceExhausted(_) => "RESOURCE_EXHAUSTED",
            PipelineError::Internal(_) => "INTERNAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(PipelineError::RateLimited.code(), "RATE_LIMIT_EXCEEDED");
        assert_eq!(
            PipelineError::CircuitOpen { next_attempt_unix_ms: 0 }.code(),
            "CIRCUIT_OPEN"
        );
    }
}
