//! Shared data model for the race telemetry pipeline.
//!
//! Each submodule owns one concern of the data model:
//! - `endpoint` — CRM's `Endpoint` + `CircuitBreaker`.
//! - `telemetry` — DAS's `RawTelemetryFrame` input shape.
//! - `source` — DAS's `DataSource` registry record.
//! - `aggregated` — DAS's `AggregatedPoint` resolution output.
//! - `rider` — PT's `RiderPosition`.
//! - `group` — PT's `RiderGroup`.
//! - `race_state` — PT's `RaceState`.
//! - `tactical_event` — TED's `TacticalEvent`.
//! - `stream_event` — EB's `StreamEvent`.
//! - `session` — WSM's `SubscriberSession` data shape.
//! - `notification` — DNS's `NotificationSubscription` + `Notification`.
//! - `weather` — shape-only `WeatherRecord` (no client; see Non-goals).

mod aggregated;
mod endpoint;
mod group;
mod notification;
mod race_state;
mod rider;
mod session;
mod source;
mod stream_event;
mod tactical_event;
mod telemetry;
mod weather;

pub use aggregated::*;
pub use endpoint::*;
pub use group::*;
pub use notification::*;
pub use race_state::*;
pub use rider::*;
pub use session::*;
pub use source::*;
pub use stream_event::*;
pub use tactical_event::*;
pub use telemetry::*;
pub use weather::*;
