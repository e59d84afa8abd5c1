//! Event Bus — ordered-per-partition publish/subscribe with batching,
//! retries, and dead-letter capture.
//!
//! Grounded on the host crate's durable queue shapes (`fleet::queue`'s
//! idempotent-enqueue-by-id discipline, `hub::intelligence::job_queue`'s
//! claim/complete/fail lifecycle) adapted from disk/SQL backing to an
//! in-process partitioned log, since this pipeline's topics live for the
//! duration of one race rather than across process restarts.

mod handler;

pub use handler::{FnHandler, Handler};

use crate::config::EbConfig;
use crate::error::PipelineError;
use crate::types::StreamEvent;
use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct Partition {
    events: RwLock<VecDeque<Arc<StreamEvent>>>,
}

impl Partition {
    fn new() -> Self {
        Self { events: RwLock::new(VecDeque::new()) }
    }
}

struct Topic {
    partition_count: usize,
    retention: Duration,
    capacity: usize,
    partitions: Vec<Partition>,
}

impl Topic {
    fn new(partition_count: usize, retention: Duration, capacity: usize) -> Self {
        Self {
            partition_count,
            retention,
            capacity,
            partitions: (0..partition_count).map(|_| Partition::new()).collect(),
        }
    }
}

fn partition_for(key: &str, count: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % count.max(1)
}

/// Topic registry, per-group partition offsets, and producer idempotency
/// tracking.
pub struct Eb {
    topics: DashMap<String, Arc<Topic>>,
    /// `(topic, group, partition) -> next unread index`.
    group_offsets: DashMap<(String, String, usize), AtomicUsize>,
    /// `(topic, eventId) -> ()`, for idempotent publish.
    seen_event_ids: DashMap<(String, String), ()>,
    config: EbConfig,
    rejected_publishes: AtomicU64,
    dead_lettered: AtomicU64,
}

impl Eb {
    pub fn new(config: EbConfig) -> Self {
        Self {
            topics: DashMap::new(),
            group_offsets: DashMap::new(),
            seen_event_ids: DashMap::new(),
            config,
            rejected_publishes: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
        }
    }

    pub fn rejected_publish_count(&self) -> u64 {
        self.rejected_publishes.load(Ordering::Relaxed)
    }

    pub fn dead_lettered_count(&self) -> u64 {
        self.dead_lettered.load(Ordering::Relaxed)
    }

    /// Declares a topic explicitly; idempotent. Topics are otherwise
    /// created lazily with the config defaults on first publish.
    pub fn declare_topic(&self, name: impl Into<String>, partition_count: usize, retention: Duration) {
        let name = name.into();
        self.topics
            .entry(name)
            .or_insert_with(|| Arc::new(Topic::new(partition_count, retention, self.config.producer_queue_capacity)));
    }

    fn topic_or_default(&self, name: &str) -> Arc<Topic> {
        self.topics
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(Topic::new(
                    self.config.default_partition_count,
                    Duration::from_secs(3_600),
                    self.config.producer_queue_capacity,
                ))
            })
            .clone()
    }

    /// Idempotent publish of a single event. Acks only once the event is
    /// durably enqueued in its partition (in-process "all" semantics).
    pub async fn publish(&self, topic_name: &str, event: StreamEvent) -> Result<(), PipelineError> {
        let dedup_key = (topic_name.to_string(), event.id.clone());
        if self.seen_event_ids.contains_key(&dedup_key) {
            debug!(topic = topic_name, event_id = %event.id, "EB: duplicate publish ignored");
            return Ok(());
        }

        let topic = self.topic_or_default(topic_name);
        let partition = partition_for(&event.partition_key, topic.partition_count);
        let mut queue = topic.partitions[partition].events.write().await;
        if queue.len() >= topic.capacity {
            self.rejected_publishes.fetch_add(1, Ordering::Relaxed);
            return Err(PipelineError::ResourceExhausted(format!(
                "topic {topic_name} partition {partition} is full"
            )));
        }
        queue.push_back(Arc::new(event));
        drop(queue);
        self.seen_event_ids.insert(dedup_key, ());
        Ok(())
    }

    /// Publishes a batch of events, returning the count that were actually
    /// enqueued (duplicates and rejections are skipped, not fatal).
    pub async fn publish_batch(&self, topic_name: &str, events: Vec<StreamEvent>) -> usize {
        let mut accepted = 0;
        for event in events {
            if self.publish(topic_name, event).await.is_ok() {
                accepted += 1;
            }
        }
        accepted
    }

    /// Reads up to `max` unread events for `group` from one partition,
    /// advancing the group's offset. At-least-once: the offset only moves
    /// forward, regardless of downstream handler success.
    async fn drain_batch(&self, topic_name: &str, topic: &Topic, group: &str, partition: usize, max: usize) -> Vec<Arc<StreamEvent>> {
        let queue = topic.partitions[partition].events.read().await;
        let key = (topic_name.to_string(), group.to_string(), partition);
        let offset_guard = self.group_offsets.entry(key).or_insert_with(|| AtomicUsize::new(0));
        let offset = offset_guard.load(Ordering::Acquire);
        let available = queue.len().saturating_sub(offset);
        let take = available.min(max);
        let batch: Vec<_> = queue.iter().skip(offset).take(take).cloned().collect();
        offset_guard.store(offset + take, Ordering::Release);
        batch
    }

    /// Drops events older than the topic's retention from every partition.
    pub async fn prune_expired(&self, topic_name: &str) {
        let Some(topic) = self.topics.get(topic_name).map(|t| t.clone()) else { return };
        let cutoff = chrono::Utc::now() - chrono::Duration::from_std(topic.retention).unwrap_or(chrono::Duration::zero());
        for partition in &topic.partitions {
            let mut queue = partition.events.write().await;
            while let Some(front) = queue.front() {
                if front.origin_timestamp < cutoff {
                    queue.pop_front();
                } else {
                    break;
                }
            }
        }
    }

    /// Routes a failed event to the configured dead-letter topic, wrapping
    /// the original payload with failure metadata.
    async fn dead_letter(&self, dead_letter_topic: &str, event: &StreamEvent, error: &PipelineError) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
        error!(event_id = %event.id, event_type = %event.event_type, error = %error, "EB: routing event to dead-letter topic");
        let wrapped = StreamEvent {
            id: format!("dlq-{}", event.id),
            event_type: format!("dead-letter:{}", event.event_type),
            partition_key: event.partition_key.clone(),
            payload: serde_json::json!({
                "original_event": event,
                "failure_code": error.code(),
                "failure_message": error.to_string(),
            }),
            origin_timestamp: chrono::Utc::now(),
            priority: event.priority,
            schema_version: event.schema_version,
        };
        let _ = self.publish(dead_letter_topic, wrapped).await;
    }

    /// Runs one consumer group against one topic until cancelled: batches
    /// unread events per partition (bounded by `batchSize`/`batchTimeout`),
    /// dispatches to the per-event-type route (or `default_handler`), and
    /// routes handler failures to `dead_letter_topic`. One failing handler
    /// never blocks the rest of its batch.
    pub async fn run_consumer_group(
        self: Arc<Self>,
        topic_name: String,
        group: String,
        routes: HashMap<String, Arc<dyn Handler>>,
        default_handler: Option<Arc<dyn Handler>>,
        dead_letter_topic: String,
        cancellation: CancellationToken,
    ) {
        let topic = self.topic_or_default(&topic_name);
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_updates));
        let routes = Arc::new(routes);
        let mut ticker = tokio::time::interval(self.config.batch_timeout());

        info!(topic = %topic_name, group = %group, "EB: consumer group started");
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    info!(topic = %topic_name, group = %group, "EB: consumer group shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    for partition in 0..topic.partition_count {
                        let batch = self.drain_batch(&topic_name, &topic, &group, partition, self.config.batch_size).await;
                        if batch.is_empty() {
                            continue;
                        }
                        let mut handles = Vec::with_capacity(batch.len());
                        for event in batch {
                            let permit = semaphore.clone().acquire_owned().await.expect("semaphore never closed");
                            let handler = routes.get(&event.event_type).cloned().or_else(|| default_handler.clone());
                            let eb = self.clone();
                            let dlt = dead_letter_topic.clone();
                            handles.push(tokio::spawn(async move {
                                let _permit = permit;
                                match handler {
                                    Some(h) => {
                                        if let Err(e) = h.handle(&event).await {
                                            eb.dead_letter(&dlt, &event, &e).await;
                                        }
                                    }
                                    None => {
                                        warn!(event_type = %event.event_type, "EB: no handler registered for event type");
                                        eb.dead_letter(
                                            &dlt,
                                            &event,
                                            &PipelineError::Internal("no handler registered for event type".into()),
                                        ).await;
                                    }
                                }
                            }));
                        }
                        for handle in handles {
                            let _ = handle.await;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StreamPriority;
    use std::sync::atomic::AtomicU32;

    fn config() -> EbConfig {
        EbConfig {
            batch_size: 10,
            batch_timeout_ms: 20,
            max_concurrent_updates: 4,
            default_partition_count: 2,
            producer_queue_capacity: 100,
        }
    }

    fn event(id: &str, partition_key: &str, event_type: &str) -> StreamEvent {
        StreamEvent {
            id: id.to_string(),
            event_type: event_type.to_string(),
            partition_key: partition_key.to_string(),
            payload: serde_json::json!({}),
            origin_timestamp: chrono::Utc::now(),
            priority: StreamPriority::Normal,
            schema_version: 1,
        }
    }

    #[tokio::test]
    async fn duplicate_publish_is_idempotent() {
        let eb = Eb::new(config());
        eb.publish("race.positions", event("evt-1", "race1_position", "position")).await.unwrap();
        eb.publish("race.positions", event("evt-1", "race1_position", "position")).await.unwrap();
        let topic = eb.topic_or_default("race.positions");
        let partition = partition_for("race1_position", topic.partition_count);
        assert_eq!(topic.partitions[partition].events.read().await.len(), 1);
    }

    #[tokio::test]
    async fn full_partition_rejects_publish() {
        let mut cfg = config();
        cfg.producer_queue_capacity = 1;
        let eb = Eb::new(cfg);
        eb.publish("t", event("evt-1", "k", "a")).await.unwrap();
        let result = eb.publish("t", event("evt-2", "k", "a")).await;
        assert!(matches!(result, Err(PipelineError::ResourceExhausted(_))));
        assert_eq!(eb.rejected_publish_count(), 1);
    }

    #[tokio::test]
    async fn same_partition_key_events_drain_in_order() {
        let eb = Eb::new(config());
        eb.publish("t", event("evt-1", "same-key", "a")).await.unwrap();
        eb.publish("t", event("evt-2", "same-key", "a")).await.unwrap();
        let topic = eb.topic_or_default("t");
        let partition = partition_for("same-key", topic.partition_count);
        let batch = eb.drain_batch("t", &topic, "group-a", partition, 10).await;
        assert_eq!(batch.iter().map(|e| e.id.clone()).collect::<Vec<_>>(), vec!["evt-1", "evt-2"]);
    }

    #[tokio::test]
    async fn handler_failure_routes_to_dead_letter_topic() {
        let eb = Arc::new(Eb::new(config()));
        eb.publish("orders", event("evt-1", "k", "create")).await.unwrap();

        let mut routes: HashMap<String, Arc<dyn Handler>> = HashMap::new();
        routes.insert(
            "create".to_string(),
            Arc::new(FnHandler(|_: &StreamEvent| Err(PipelineError::Internal("boom".into())))),
        );

        let cancellation = CancellationToken::new();
        let cancel_clone = cancellation.clone();
        let eb_clone = eb.clone();
        let task = tokio::spawn(eb_clone.run_consumer_group(
            "orders".to_string(),
            "group-a".to_string(),
            routes,
            None,
            "orders.dlq".to_string(),
            cancellation,
        ));

        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel_clone.cancel();
        let _ = task.await;

        assert_eq!(eb.dead_lettered_count(), 1);
        let dlq_topic = eb.topic_or_default("orders.dlq");
        let total: usize = {
            let mut sum = 0;
            for p in &dlq_topic.partitions {
                sum += p.events.read().await.len();
            }
            sum
        };
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn successful_handler_does_not_dead_letter() {
        let eb = Arc::new(Eb::new(config()));
        eb.publish("orders", event("evt-1", "k", "create")).await.unwrap();

        let processed = Arc::new(AtomicU32::new(0));
        let processed_clone = processed.clone();
        let mut routes: HashMap<String, Arc<dyn Handler>> = HashMap::new();
        routes.insert(
            "create".to_string(),
            Arc::new(FnHandler(move |_: &StreamEvent| {
                processed_clone.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })),
        );

        let cancellation = CancellationToken::new();
        let cancel_clone = cancellation.clone();
        let eb_clone = eb.clone();
        let task = tokio::spawn(eb_clone.run_consumer_group(
            "orders".to_string(),
            "group-a".to_string(),
            routes,
            None,
            "orders.dlq".to_string(),
            cancellation,
        ));

        tokio::time::sleep(Duration::from_millis(60)).await;
        cancel_clone.cancel();
        let _ = task.await;

        assert_eq!(processed.load(Ordering::Relaxed), 1);
        assert_eq!(eb.dead_lettered_count(), 0);
    }
}
