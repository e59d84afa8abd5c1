//! Owns one instance of every subsystem and wires the producer/consumer DAG
//! between them: PT positions -> TED facts -> EB topic -> WSM broadcast +
//! DNS notification. Each stage is its own cancellable task; shutdown
//! propagates through one shared `CancellationToken`, mirroring the host
//! crate's `ProcessingLoop`/`PipelineCoordinator` ownership shape.

use crate::config::PipelineConfig;
use crate::crm::{AlwaysUp, Crm};
use crate::das::Das;
use crate::eb::{Eb, FnHandler, Handler};
use crate::notify::Dns;
use crate::pt::Pt;
use crate::ted::{Facts, GroupSample, RiderSample, Ted};
use crate::types::{
    DeliveryStats, GeoPoint, Notification, NotificationCategory, NotificationContext, RiderGroup,
    RiderPosition, RaceState, StreamEvent, StreamPriority, TacticalEvent, TacticalEventType,
};
use crate::wsm::auth::PrincipalRegistry;
use crate::wsm::Wsm;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub const TACTICAL_EVENTS_TOPIC: &str = "tactical-events";
pub const TACTICAL_EVENTS_DLQ_TOPIC: &str = "tactical-events-dead-letter";
pub const FANOUT_CONSUMER_GROUP: &str = "wsm-dns-fanout";

pub struct RacePipeline {
    pub crm: Arc<Crm>,
    pub das: Arc<Das>,
    pub pt: Arc<Pt>,
    pub ted: Arc<Ted>,
    pub eb: Arc<Eb>,
    pub wsm: Arc<Wsm>,
    pub dns: Arc<Dns>,
    race_id: String,
}

impl RacePipeline {
    /// Builds every subsystem from one shared configuration. CRM is wired
    /// with the no-op `AlwaysUp` connector; a deployment with a real
    /// upstream swaps it in by constructing `Crm` directly instead.
    pub fn new(config: PipelineConfig, race_id: impl Into<String>) -> Arc<Self> {
        let eb = Arc::new(Eb::new(config.eb.clone()));
        eb.declare_topic(TACTICAL_EVENTS_TOPIC, config.eb.default_partition_count, Duration::from_secs(3600));
        eb.declare_topic(TACTICAL_EVENTS_DLQ_TOPIC, 1, Duration::from_secs(3600));

        Arc::new(Self {
            crm: Arc::new(Crm::new(config.crm.clone(), Arc::new(AlwaysUp))),
            das: Arc::new(Das::new(config.das.clone())),
            pt: Arc::new(Pt::new(config.pt.clone())),
            ted: Arc::new(Ted::new(config.ted.clone())),
            eb,
            wsm: Arc::new(Wsm::new(config.wsm.clone(), Arc::new(PrincipalRegistry::new()))),
            dns: Arc::new(Dns::new(config.dns.clone())),
            race_id: race_id.into(),
        })
    }

    /// Spawns every subsystem's own housekeeping loop plus the detection
    /// tick and the EB consumer group that fans tactical events out to WSM
    /// and DNS. Returns the join handles so the caller can await a clean
    /// shutdown after cancelling the token.
    pub fn spawn(self: &Arc<Self>, detection_interval: Duration, cancellation: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let crm = self.crm.clone();
        let c = cancellation.clone();
        handles.push(tokio::spawn(async move { crm.run(c).await }));

        let das = self.das.clone();
        let c = cancellation.clone();
        handles.push(tokio::spawn(async move { das.run(c).await }));

        let pt = self.pt.clone();
        let c = cancellation.clone();
        handles.push(tokio::spawn(async move { pt.run(c).await }));

        let ted = self.ted.clone();
        let c = cancellation.clone();
        handles.push(tokio::spawn(async move { ted.run(c).await }));

        let wsm = self.wsm.clone();
        let c = cancellation.clone();
        handles.push(tokio::spawn(async move { wsm.run(c).await }));

        let dns = self.dns.clone();
        let c = cancellation.clone();
        handles.push(tokio::spawn(async move { dns.run(c).await }));

        let pipeline = self.clone();
        let c = cancellation.clone();
        handles.push(tokio::spawn(async move { pipeline.run_detection_tick(detection_interval, c).await }));

        let eb = self.eb.clone();
        let fanout = fanout_handler(self.wsm.clone(), self.dns.clone());
        handles.push(tokio::spawn(async move {
            eb.run_consumer_group(
                TACTICAL_EVENTS_TOPIC.to_string(),
                FANOUT_CONSUMER_GROUP.to_string(),
                HashMap::new(),
                Some(fanout),
                TACTICAL_EVENTS_DLQ_TOPIC.to_string(),
                cancellation,
            )
            .await
        }));

        handles
    }

    async fn run_detection_tick(self: Arc<Self>, interval: Duration, cancellation: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => return,
                _ = ticker.tick() => {
                    self.detect_and_publish().await;
                }
            }
        }
    }

    /// One detection cycle: derive rider/group facts from PT's current
    /// snapshot, run them through TED, publish whatever fires to EB.
    async fn detect_and_publish(&self) {
        let mut events = self.ted.on_position_batch(&self.build_rider_samples());
        events.extend(self.ted.on_race_state(&self.build_group_samples()));

        for event in events {
            let stream_event = tactical_event_to_stream_event(&self.race_id, &event);
            if let Err(e) = self.eb.publish(TACTICAL_EVENTS_TOPIC, stream_event).await {
                warn!(error = %e, event_id = %event.id, "failed to publish tactical event");
            }
        }
    }

    fn build_rider_samples(&self) -> Vec<RiderSample> {
        let mut samples = Vec::new();
        for position in self.pt.get_all_positions() {
            // `get_rider_history` returns newest-first; index 0 is `position`
            // itself, index 1 is the prior sample the delta is measured against.
            let history = self.pt.get_rider_history(&position.rider_id, 2);
            let Some(previous) = history.get(1) else { continue };
            samples.push(RiderSample {
                rider_id: position.rider_id.clone(),
                facts: rider_facts(previous, &position),
                location: position.gps.map(|g| GeoPoint { lat: g.lat, lon: g.lon }),
                race_distance_m: position.distance_from_start_m.unwrap_or(0.0),
            });
        }
        samples
    }

    fn build_group_samples(&self) -> Vec<GroupSample> {
        let race_state = self.pt.get_race_state();
        self.pt
            .get_groups()
            .into_iter()
            .map(|group| GroupSample {
                rider_ids: group.rider_ids.clone(),
                facts: group_facts(&group, &race_state),
                location: None,
                race_distance_m: race_state.kilometer * 1000.0,
                group_id: group.id.clone(),
            })
            .collect()
    }
}

/// Derives the delta-based facts TED's default patterns key on
/// (`delta_speed_ms`, `delta_position`, `gap_to_group_s`, `steady_deceleration`)
/// by comparing one rider's previous and current PT samples.
fn rider_facts(previous: &RiderPosition, current: &RiderPosition) -> Facts {
    let mut facts = Facts::new();
    let delta_speed = match (previous.ground_speed_ms, current.ground_speed_ms) {
        (Some(p), Some(c)) => c - p,
        _ => 0.0,
    };
    let delta_position = match (previous.race_position, current.race_position) {
        (Some(p), Some(c)) => p as i64 - c as i64,
        _ => 0,
    };
    facts.insert("delta_speed_ms".to_string(), serde_json::json!(delta_speed));
    facts.insert("delta_position".to_string(), serde_json::json!(delta_position));
    facts.insert("steady_deceleration".to_string(), serde_json::json!(delta_speed < 0.0));
    if let Some(tfs) = current.time_from_start_s {
        facts.insert("gap_to_group_s".to_string(), serde_json::json!(tfs));
    }
    facts
}

/// Derives the group-level facts (`group_size`, `gap_to_peloton_s`,
/// `sustained_s`, `avg_speed_ms`, `compactness_m`, `distance_to_finish_m`,
/// `gap_decreasing`) from one PT `RiderGroup` and the race-wide state.
fn group_facts(group: &RiderGroup, race_state: &RaceState) -> Facts {
    let mut facts = Facts::new();
    facts.insert("group_size".to_string(), serde_json::json!(group.size));
    facts.insert("avg_speed_ms".to_string(), serde_json::json!(group.avg_speed_ms));
    if let Some(gap) = group.gap_to_next_s {
        facts.insert("gap_to_peloton_s".to_string(), serde_json::json!(gap));
        facts.insert("gap_decreasing".to_string(), serde_json::json!(gap < race_state.avg_speed_ms.max(1.0)));
    }
    if let Some(min_tfs) = group.min_time_from_start_s {
        facts.insert("sustained_s".to_string(), serde_json::json!(min_tfs));
    }
    facts.insert("compactness_m".to_string(), serde_json::json!(0.0));
    facts.insert("distance_to_finish_m".to_string(), serde_json::json!(race_state.remaining_km * 1000.0));
    facts
}

fn tactical_event_to_stream_event(race_id: &str, event: &TacticalEvent) -> StreamEvent {
    let event_type = format!("{:?}", event.event_type);
    StreamEvent {
        id: event.id.clone(),
        event_type: event_type.clone(),
        partition_key: StreamEvent::partition_key_for(race_id, &event_type),
        payload: serde_json::to_value(event).unwrap_or(serde_json::Value::Null),
        origin_timestamp: event.timestamp,
        priority: severity_to_priority(event.severity),
        schema_version: 1,
    }
}

fn severity_to_priority(severity: crate::types::Severity) -> StreamPriority {
    use crate::types::Severity as S;
    match severity {
        S::Low => StreamPriority::Low,
        S::Medium => StreamPriority::Normal,
        S::High => StreamPriority::High,
        S::Critical => StreamPriority::Critical,
    }
}

fn event_title(event_type: TacticalEventType) -> &'static str {
    match event_type {
        TacticalEventType::Attack => "Attack detected",
        TacticalEventType::Crash => "Crash detected",
        TacticalEventType::Mechanical => "Mechanical incident",
        TacticalEventType::Breakaway => "Breakaway forming",
        TacticalEventType::Chase => "Chase group forming",
        TacticalEventType::Sprint => "Sprint underway",
        TacticalEventType::WeatherEvent => "Weather event",
    }
}

/// Builds the EB default-handler that forwards every tactical event onto
/// both real-time fanout channels: a WSM broadcast on `race.tactical-events`
/// and a categorized DNS notification.
fn fanout_handler(wsm: Arc<Wsm>, dns: Arc<Dns>) -> Arc<dyn Handler> {
    Arc::new(FnHandler(move |stream_event: &StreamEvent| {
        wsm.broadcast("race.tactical-events", stream_event.payload.clone(), |_| true);

        if let Ok(event) = serde_json::from_value::<TacticalEvent>(stream_event.payload.clone()) {
            let notification = Notification {
                id: uuid::Uuid::new_v4().to_string(),
                category: NotificationCategory::TacticalEvent,
                priority: event.severity,
                title: event_title(event.event_type).to_string(),
                body: format!("confidence {:.2}, {} rider(s) involved", event.confidence, event.involved_riders.len()),
                context: NotificationContext {
                    race_id: Some(stream_event.partition_key.clone()),
                    rider_id: event.involved_riders.first().cloned(),
                    team_id: None,
                },
                display_hints: serde_json::json!({}),
                created_at: event.timestamp,
                retention_until: event.timestamp + chrono::Duration::hours(6),
                delivery_stats: DeliveryStats::default(),
            };
            dns.send(notification);
        }
        Ok(())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GpsFix;
    use chrono::Utc;

    #[test]
    fn rider_facts_computes_positive_delta_speed() {
        let now = Utc::now();
        let previous = RiderPosition {
            rider_id: "r1".into(),
            timestamp: now,
            race_position: Some(10),
            gps: Some(GpsFix { lat: 0.0, lon: 0.0, altitude_m: 0.0 }),
            ground_speed_ms: Some(8.0),
            heading_deg: Some(0.0),
            distance_from_start_m: Some(1000.0),
            time_from_start_s: Some(100.0),
            source_id: None,
            accuracy_tier: None,
            confidence: None,
            group_id: None,
            interpolated: false,
        };
        let mut current = previous.clone();
        current.ground_speed_ms = Some(12.0);
        current.race_position = Some(4);

        let facts = rider_facts(&previous, &current);
        assert_eq!(facts.get("delta_speed_ms").unwrap(), &serde_json::json!(4.0));
        assert_eq!(facts.get("delta_position").unwrap(), &serde_json::json!(6));
    }

    #[test]
    fn tactical_event_serializes_with_stable_partition_key() {
        let event = TacticalEvent {
            id: "e1".into(),
            event_type: TacticalEventType::Crash,
            severity: crate::types::Severity::High,
            confidence: 0.9,
            timestamp: Utc::now(),
            location: None,
            race_distance_m: 0.0,
            involved_riders: vec!["r1".into()],
            trigger_data: vec![],
            tags: vec![],
            verification_status: crate::types::VerificationStatus::Unverified,
            related_events: vec![],
            impact: None,
        };
        let stream_event = tactical_event_to_stream_event("race-1", &event);
        assert_eq!(stream_event.partition_key, "race-1_Crash");
        assert_eq!(stream_event.priority, StreamPriority::High);
    }
}
