//! Wires every subsystem into one running process.

mod race_pipeline;

pub use race_pipeline::{RacePipeline, FANOUT_CONSUMER_GROUP, TACTICAL_EVENTS_DLQ_TOPIC, TACTICAL_EVENTS_TOPIC};
