//! WSM's `SubscriberSession` data shape (the live session lives in `wsm`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatState {
    pub last_pong: DateTime<Utc>,
    pub alive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitState {
    pub count: u32,
    pub window_start: DateTime<Utc>,
    pub violations: u64,
}

/// A principal's permission set, presented at handshake.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub permissions: HashSet<String>,
}

impl Principal {
    pub fn has(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }

    pub fn is_admin(&self) -> bool {
        self.has("admin")
    }
}
