//! DNS — Notification Dispatcher: routes categorized notifications to
//! subscriber sessions through per-subscriber filters.

use crate::config::DnsConfig;
use crate::types::{DeliveryChannel, DeliveryStats, Notification, NotificationSubscription};
use chrono::Utc;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A single dispatch attempt to one subscriber, post hoc.
pub struct DeliveryAttempt {
    pub dashboard_id: String,
    pub channel: DeliveryChannel,
    pub succeeded: bool,
    pub latency_ms: f64,
}

/// The declared delivery channel's send seam -- one per `DeliveryChannel`
/// variant, mirrored on EB's `Handler` trait.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, subscription: &NotificationSubscription, notification: &Notification) -> bool;
}

/// A dispatcher that always reports success, for subscriptions whose
/// channel has no live backend wired up yet (tests, or a not-yet-deployed
/// webhook/SSE sink).
pub struct NoopDispatcher;

impl Dispatcher for NoopDispatcher {
    fn dispatch(&self, _subscription: &NotificationSubscription, _notification: &Notification) -> bool {
        true
    }
}

pub struct Dns {
    subscriptions: DashMap<String, NotificationSubscription>,
    config: DnsConfig,
    dispatchers: DashMap<DeliveryChannelKey, Box<dyn Dispatcher>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum DeliveryChannelKey {
    Websocket,
    ServerSentEvents,
    Webhook,
}

impl From<DeliveryChannel> for DeliveryChannelKey {
    fn from(c: DeliveryChannel) -> Self {
        match c {
            DeliveryChannel::Websocket => DeliveryChannelKey::Websocket,
            DeliveryChannel::ServerSentEvents => DeliveryChannelKey::ServerSentEvents,
            DeliveryChannel::Webhook => DeliveryChannelKey::Webhook,
        }
    }
}

impl Dns {
    pub fn new(config: DnsConfig) -> Self {
        Self { subscriptions: DashMap::new(), config, dispatchers: DashMap::new() }
    }

    /// Registers the dispatch backend for a channel. Channels with no
    /// registered dispatcher fall back to `NoopDispatcher`.
    pub fn register_dispatcher(&self, channel: DeliveryChannel, dispatcher: Box<dyn Dispatcher>) {
        self.dispatchers.insert(channel.into(), dispatcher);
    }

    pub fn subscribe(&self, subscription: NotificationSubscription) {
        self.subscriptions.insert(subscription.dashboard_id.clone(), subscription);
    }

    pub fn unsubscribe(&self, dashboard_id: &str) {
        self.subscriptions.remove(dashboard_id);
    }

    fn is_rate_limited(subscription: &NotificationSubscription, config: &DnsConfig) -> bool {
        let cap = if subscription.max_per_minute > 0 { subscription.max_per_minute } else { config.default_max_notifications_per_minute };
        subscription.sent_this_window >= cap
    }

    fn allow_list_matches(subscription: &NotificationSubscription, notification: &Notification) -> bool {
        if subscription.allow_lists_are_empty() {
            return true;
        }
        let race_ok = notification.context.race_id.as_ref().map(|r| subscription.race_allow_list.contains(r)).unwrap_or(false);
        let rider_ok = notification.context.rider_id.as_ref().map(|r| subscription.rider_allow_list.contains(r)).unwrap_or(false);
        let team_ok = notification.context.team_id.as_ref().map(|t| subscription.team_allow_list.contains(t)).unwrap_or(false);
        race_ok || rider_ok || team_ok
    }

    /// Deterministically computes the target set: active, category and
    /// minimum-priority matched, allow-list matched or empty, and not
    /// currently rate limited.
    fn target_dashboard_ids(&self, notification: &Notification) -> Vec<String> {
        self.subscriptions
            .iter()
            .filter(|entry| {
                let s = entry.value();
                s.active
                    && s.categories.contains(&notification.category)
                    && notification.priority >= s.min_priority
                    && Self::allow_list_matches(s, notification)
                    && !Self::is_rate_limited(s, &self.config)
            })
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Dispatches `notification` to every matching subscription's declared
    /// channel, attaching aggregate delivery statistics.
    pub fn send(&self, mut notification: Notification) -> Notification {
        let targets = self.target_dashboard_ids(&notification);
        let mut successes = 0u32;
        let mut failures = 0u32;
        let mut total_latency = 0.0;

        for dashboard_id in &targets {
            let Some(mut subscription) = self.subscriptions.get_mut(dashboard_id) else { continue };
            let now = Utc::now();
            if now - subscription.window_start > chrono::Duration::minutes(1) {
                subscription.window_start = now;
                subscription.sent_this_window = 0;
            }

            let started = std::time::Instant::now();
            let channel_key: DeliveryChannelKey = subscription.channel.into();
            let succeeded = match self.dispatchers.get(&channel_key) {
                Some(dispatcher) => dispatcher.dispatch(&subscription, &notification),
                None => NoopDispatcher.dispatch(&subscription, &notification),
            };
            let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

            subscription.sent_this_window += 1;
            subscription.last_activity = now;
            total_latency += latency_ms;
            if succeeded {
                successes += 1;
            } else {
                failures += 1;
                warn!(dashboard_id = %dashboard_id, "notification dispatch failed");
            }
        }

        let recipients = targets.len() as u32;
        notification.delivery_stats = DeliveryStats {
            recipients,
            successes,
            failures,
            avg_latency_ms: if recipients > 0 { total_latency / recipients as f64 } else { 0.0 },
        };
        notification
    }

    /// Removes subscriptions idle past `maxIdleTime`. Expired-notification
    /// cleanup is the caller's responsibility (notifications are not
    /// retained here -- only subscriptions are stateful in this struct).
    fn prune_idle_subscriptions(&self) {
        let max_idle = chrono::Duration::from_std(self.config.max_idle_time()).unwrap_or(chrono::Duration::zero());
        let now = Utc::now();
        self.subscriptions.retain(|_, s| now - s.last_activity <= max_idle);
    }

    pub fn active_subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Periodic cleanup loop: drops idle subscriptions until cancelled.
    pub async fn run(&self, cancellation: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.cleanup_interval());
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    info!("dns cleanup loop shutting down");
                    return;
                }
                _ = interval.tick() => {
                    self.prune_idle_subscriptions();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NotificationCategory, NotificationContext, Severity};
    use std::collections::HashSet;

    fn subscription(id: &str, categories: &[NotificationCategory], min_priority: Severity) -> NotificationSubscription {
        NotificationSubscription {
            dashboard_id: id.to_string(),
            categories: categories.iter().copied().collect::<HashSet<_>>(),
            min_priority,
            race_allow_list: Vec::new(),
            rider_allow_list: Vec::new(),
            team_allow_list: Vec::new(),
            max_per_minute: 60,
            channel: DeliveryChannel::Websocket,
            active: true,
            last_activity: Utc::now(),
            sent_this_window: 0,
            window_start: Utc::now(),
        }
    }

    fn notification(category: NotificationCategory, priority: Severity) -> Notification {
        Notification {
            id: "n1".into(),
            category,
            priority,
            title: "Crash detected".into(),
            body: "Rider down at km 45".into(),
            context: NotificationContext { race_id: None, rider_id: None, team_id: None },
            display_hints: serde_json::json!({}),
            created_at: Utc::now(),
            retention_until: Utc::now() + chrono::Duration::hours(1),
            delivery_stats: DeliveryStats::default(),
        }
    }

    #[test]
    fn matching_subscription_receives_and_counts_success() {
        let dns = Dns::new(DnsConfig::default());
        dns.subscribe(subscription("dash-1", &[NotificationCategory::TacticalEvent], Severity::Low));
        let sent = dns.send(notification(NotificationCategory::TacticalEvent, Severity::High));
        assert_eq!(sent.delivery_stats.recipients, 1);
        assert_eq!(sent.delivery_stats.successes, 1);
    }

    #[test]
    fn below_minimum_priority_is_excluded() {
        let dns = Dns::new(DnsConfig::default());
        dns.subscribe(subscription("dash-1", &[NotificationCategory::TacticalEvent], Severity::High));
        let sent = dns.send(notification(NotificationCategory::TacticalEvent, Severity::Low));
        assert_eq!(sent.delivery_stats.recipients, 0);
    }

    #[test]
    fn rate_limited_subscription_is_excluded() {
        let dns = Dns::new(DnsConfig::default());
        let mut sub = subscription("dash-1", &[NotificationCategory::TacticalEvent], Severity::Low);
        sub.max_per_minute = 1;
        sub.sent_this_window = 1;
        sub.window_start = Utc::now();
        dns.subscribe(sub);
        let sent = dns.send(notification(NotificationCategory::TacticalEvent, Severity::High));
        assert_eq!(sent.delivery_stats.recipients, 0);
    }

    #[test]
    fn allow_list_excludes_non_matching_context() {
        let dns = Dns::new(DnsConfig::default());
        let mut sub = subscription("dash-1", &[NotificationCategory::TacticalEvent], Severity::Low);
        sub.race_allow_list = vec!["race-9".to_string()];
        dns.subscribe(sub);
        let mut n = notification(NotificationCategory::TacticalEvent, Severity::High);
        n.context.race_id = Some("race-1".to_string());
        let sent = dns.send(n);
        assert_eq!(sent.delivery_stats.recipients, 0);
    }

    #[test]
    fn inactive_subscription_never_receives() {
        let dns = Dns::new(DnsConfig::default());
        let mut sub = subscription("dash-1", &[NotificationCategory::TacticalEvent], Severity::Low);
        sub.active = false;
        dns.subscribe(sub);
        let sent = dns.send(notification(NotificationCategory::TacticalEvent, Severity::High));
        assert_eq!(sent.delivery_stats.recipients, 0);
    }
}
