//! End-to-end scenario tests exercising DAS, PT, TED and EB through their
//! public APIs, independent of the WSM/DNS fanout layer.

use chrono::Utc;
use race_telemetry_pipeline::config::{EbConfig, PtConfig, TedConfig};
use race_telemetry_pipeline::das::strategies::{ContributionInput, Strategy};
use race_telemetry_pipeline::eb::{FnHandler, Handler};
use race_telemetry_pipeline::error::PipelineError;
use race_telemetry_pipeline::pt::Pt;
use race_telemetry_pipeline::ted::{Facts, GroupSample, RiderSample, Ted};
use race_telemetry_pipeline::types::{RiderPosition, StreamEvent, StreamPriority, TacticalEventType};
use race_telemetry_pipeline::Eb;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

fn rider_position(id: &str, race_position: u32, time_from_start_s: f64) -> RiderPosition {
    RiderPosition {
        rider_id: id.to_string(),
        timestamp: Utc::now(),
        race_position: Some(race_position),
        gps: None,
        ground_speed_ms: Some(10.0),
        heading_deg: None,
        distance_from_start_m: None,
        time_from_start_s: Some(time_from_start_s),
        source_id: None,
        accuracy_tier: None,
        confidence: Some(1.0),
        group_id: None,
        interpolated: false,
    }
}

/// Two sources disagree on rider `r42`'s position under the same
/// aggregation window: source `A` (priority 9, reliability 0.95) reports
/// `3`, source `B` (priority 4, reliability 0.6) reports `5`. Under
/// `weighted_average`, the higher-trust source pulls the resolved value
/// toward it; under `highest_priority`, `A` wins outright.
#[test]
fn conflict_resolution_strategies_match_the_reference_values() {
    let now = Utc::now();
    let value_a = serde_json::json!(3.0);
    let value_b = serde_json::json!(5.0);
    let a = ContributionInput {
        value: &value_a,
        trust: 0.95 * (9.0 / 10.0),
        priority: 9,
        reliability: 0.95,
        metadata_confidence: None,
        origin_timestamp: now,
    };
    let b = ContributionInput {
        value: &value_b,
        trust: 0.6 * (4.0 / 10.0),
        priority: 4,
        reliability: 0.6,
        metadata_confidence: None,
        origin_timestamp: now,
    };
    let inputs = vec![a, b];
    let max_age = std::time::Duration::from_secs(5);

    let (value, _confidence) = Strategy::WeightedAverage.apply(&inputs, max_age).expect("numeric inputs resolve");
    assert!((value.as_f64().unwrap() - 3.44).abs() < 0.05, "expected ~3.44, got {value}");

    let (value, confidence) = Strategy::HighestPriority.apply(&inputs, max_age).expect("highest_priority always resolves");
    assert_eq!(value.as_f64().unwrap(), 3.0);
    assert!((confidence - 0.9).abs() < 1e-9);
}

/// 6 riders with race positions 1..6 sorted the same as their
/// `time_from_start`: a leading trio around 100-103s and a chasing trio
/// ~250s back. Timing is the strongest available signal, so the two
/// groups split on the time gap rather than merging on position adjacency.
#[test]
fn group_formation_splits_into_two_time_clusters() {
    let pt = Pt::new(PtConfig::default());
    let riders = [
        ("r1", 1, 100.0),
        ("r2", 2, 102.0),
        ("r3", 3, 103.0),
        ("r4", 4, 350.0),
        ("r5", 5, 351.0),
        ("r6", 6, 352.0),
    ];
    for (id, position, t) in riders {
        let p = rider_position(id, position, t);
        assert!(pt.apply_position(p));
    }
    pt.run_cycle();

    let groups = pt.get_groups();
    assert_eq!(groups.len(), 2, "expected exactly 2 groups, got {groups:?}");
    assert!(groups.iter().all(|g| g.size == 3));

    let leading = groups.iter().find(|g| g.min_time_from_start_s == Some(100.0)).unwrap();
    assert_eq!(leading.gap_to_previous_s, None);
    assert!((leading.gap_to_next_s.unwrap() - 250.0).abs() < 1.0);
}

/// Rider `r7`'s speed climbs 10->15 m/s over 10s while moving up 6
/// positions with a 12s gap to the group behind: TED's attack pattern
/// should fire with confidence >= 0.8 on exactly that rider.
#[test]
fn attack_detection_fires_from_derived_facts() {
    let ted = Ted::new(TedConfig::default());
    let facts: Facts = HashMap::from([
        ("delta_speed_ms".to_string(), serde_json::json!(5.0)),
        ("delta_position".to_string(), serde_json::json!(6)),
        ("gap_to_group_s".to_string(), serde_json::json!(12.0)),
    ]);
    let sample = RiderSample { rider_id: "r7".to_string(), facts, location: None, race_distance_m: 0.0 };

    let events = ted.on_position_batch(std::slice::from_ref(&sample));
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.event_type, TacticalEventType::Attack);
    assert!(event.confidence >= 0.8, "confidence was {}", event.confidence);
    assert_eq!(event.involved_riders, vec!["r7".to_string()]);
}

/// Group-scoped samples route through `on_race_state` the same way.
#[test]
fn group_sample_with_no_matching_pattern_produces_no_event() {
    let ted = Ted::new(TedConfig::default());
    let facts: Facts = HashMap::from([("group_size".to_string(), serde_json::json!(3))]);
    let sample = GroupSample {
        group_id: "group-0".to_string(),
        rider_ids: vec!["r1".to_string(), "r2".to_string(), "r3".to_string()],
        facts,
        location: None,
        race_distance_m: 0.0,
    };
    assert!(ted.on_race_state(&[sample]).is_empty());
}

fn stream_event(id: &str, event_type: &str) -> StreamEvent {
    StreamEvent {
        id: id.to_string(),
        event_type: event_type.to_string(),
        partition_key: "k".to_string(),
        payload: serde_json::json!({"original": id}),
        origin_timestamp: Utc::now(),
        priority: StreamPriority::Normal,
        schema_version: 1,
    }
}

/// Publishing `e1` to topic `T` with a handler that always throws: after
/// the consumer loop runs, exactly one dead-letter record preserving
/// `e1`'s payload is appended to the dead-letter topic, and the
/// consumer's offset has advanced past it (the poisoned event is not
/// redelivered to a second drain of the same topic/group).
#[tokio::test]
async fn dead_letter_path_preserves_payload_and_advances_offset() {
    let config = EbConfig { batch_timeout_ms: 15, ..EbConfig::default() };
    let eb = Arc::new(Eb::new(config));
    eb.publish("T", stream_event("e1", "tick")).await.unwrap();

    let mut routes: HashMap<String, Arc<dyn Handler>> = HashMap::new();
    routes.insert(
        "tick".to_string(),
        Arc::new(FnHandler(|_: &StreamEvent| Err(PipelineError::Internal("handler always fails".into())))),
    );

    let cancellation = tokio_util::sync::CancellationToken::new();
    let cancel_clone = cancellation.clone();
    let task = tokio::spawn(eb.clone().run_consumer_group(
        "T".to_string(),
        "group-a".to_string(),
        routes,
        None,
        "T.dead-letter".to_string(),
        cancellation,
    ));
    tokio::time::sleep(StdDuration::from_millis(60)).await;
    cancel_clone.cancel();
    let _ = task.await;

    assert_eq!(eb.dead_lettered_count(), 1);

    let received: Arc<std::sync::Mutex<Vec<StreamEvent>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
    let received_clone = received.clone();
    let capture: Arc<dyn Handler> = Arc::new(FnHandler(move |e: &StreamEvent| {
        received_clone.lock().unwrap().push(e.clone());
        Ok(())
    }));

    let dlq_cancel = tokio_util::sync::CancellationToken::new();
    let dlq_cancel_clone = dlq_cancel.clone();
    let dlq_task = tokio::spawn(eb.clone().run_consumer_group(
        "T.dead-letter".to_string(),
        "dlq-reader".to_string(),
        HashMap::new(),
        Some(capture),
        "T.dead-letter.poison".to_string(),
        dlq_cancel,
    ));
    tokio::time::sleep(StdDuration::from_millis(60)).await;
    dlq_cancel_clone.cancel();
    let _ = dlq_task.await;

    let dlq_events = received.lock().unwrap();
    assert_eq!(dlq_events.len(), 1);
    assert_eq!(dlq_events[0].payload["original_event"]["id"], "e1");
    assert_eq!(dlq_events[0].payload["failure_code"], "INTERNAL");
    // The first consumer ran for ~4 batch ticks (60ms / 15ms); a single
    // dead-lettered record confirms the offset advanced past `e1` on the
    // very first tick rather than redelivering it every tick.
}
