//! DNS's `NotificationSubscription` and `Notification`.

use super::tactical_event::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationCategory {
    TacticalEvent,
    SystemStatus,
    ConnectionHealth,
    RaceStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryChannel {
    Websocket,
    ServerSentEvents,
    Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSubscription {
    pub dashboard_id: String,
    pub categories: std::collections::HashSet<NotificationCategory>,
    pub min_priority: Severity,
    pub race_allow_list: Vec<String>,
    pub rider_allow_list: Vec<String>,
    pub team_allow_list: Vec<String>,
    pub max_per_minute: u32,
    pub channel: DeliveryChannel,
    pub active: bool,
    pub last_activity: DateTime<Utc>,
    pub sent_this_window: u32,
    pub window_start: DateTime<Utc>,
}

impl NotificationSubscription {
    pub fn allow_lists_are_empty(&self) -> bool {
        self.race_allow_list.is_empty() && self.rider_allow_list.is_empty() && self.team_allow_list.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationContext {
    pub race_id: Option<String>,
    pub rider_id: Option<String>,
    pub team_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryStats {
    pub recipients: u32,
    pub successes: u32,
    pub failures: u32,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub category: NotificationCategory,
    pub priority: Severity,
    pub title: String,
    pub body: String,
    pub context: NotificationContext,
    pub display_hints: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub retention_until: DateTime<Utc>,
    pub delivery_stats: DeliveryStats,
}
