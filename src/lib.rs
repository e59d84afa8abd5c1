//! Real-time race telemetry pipeline.
//!
//! Ingests rider/team/weather telemetry from redundant upstream feeds,
//! resolves conflicting readings into one time-series, tracks rider
//! positions and group formation, detects tactical events from derived
//! facts, and fans results out to authenticated WebSocket subscribers and
//! notification recipients.
//!
//! ## Modules
//!
//! - [`crm`] — Connection Resilience Manager: upstream endpoint failover.
//! - [`das`] — Data Aggregation Service: multi-source conflict resolution.
//! - [`pt`] — Position Tracker: rider/group state and history.
//! - [`ted`] — Tactical Event Detector: pattern matching over derived facts.
//! - [`eb`] — Event Bus: ordered partitioned publish/subscribe.
//! - [`wsm`] — WebSocket Subscription Manager: authenticated fanout.
//! - [`notify`] — Notification Dispatcher.
//! - [`pipeline`] — wiring all of the above into one running process.

pub mod config;
pub mod crm;
pub mod das;
pub mod eb;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod pt;
pub mod storage;
pub mod ted;
pub mod types;
pub mod wsm;

pub use config::PipelineConfig;
pub use error::PipelineError;

pub use types::{
    AggregatedPoint, DataSource, Endpoint, EndpointRole, EndpointStatus, Notification,
    NotificationSubscription, Principal, RaceState, RawTelemetryFrame, RiderGroup, RiderPosition,
    StreamEvent, TacticalEvent, TacticalEventType,
};

pub use crm::Crm;
pub use das::Das;
pub use eb::Eb;
pub use notify::Dns;
pub use pipeline::RacePipeline;
pub use pt::Pt;
pub use ted::Ted;
pub use wsm::Wsm;
