//! The user-supplied per-event-type processor, analogous to the host
//! crate's pluggable `Connector`/`KnowledgeStore` trait seams.

use crate::error::PipelineError;
use crate::types::StreamEvent;
use async_trait::async_trait;

#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, event: &StreamEvent) -> Result<(), PipelineError>;
}

/// A handler built from a plain closure, for quick wiring and tests.
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&StreamEvent) -> Result<(), PipelineError> + Send + Sync,
{
    async fn handle(&self, event: &StreamEvent) -> Result<(), PipelineError> {
        (self.0)(event)
    }
}
