//! `SubscriberSession`: the live per-connection state held by WSM, built
//! from the `Principal`/rate-limit/heartbeat shapes declared in
//! `types::session`.

use crate::types::{HeartbeatState, Principal, RateLimitState};
use crate::wsm::protocol::Envelope;
use chrono::Utc;
use std::collections::HashSet;
use tokio::sync::mpsc;

/// Outbound frames are pushed onto a bounded channel; the connection's
/// writer task drains it onto the socket. A full channel means the peer
/// isn't reading fast enough -- the send fails and the session is closed.
pub type Outbox = mpsc::Sender<String>;

pub struct SubscriberSession {
    pub connection_id: String,
    pub principal: Principal,
    pub subscribed_topics: HashSet<String>,
    pub rate_limit: RateLimitState,
    pub heartbeat: HeartbeatState,
    pub outbox: Outbox,
}

impl SubscriberSession {
    pub fn new(connection_id: String, principal: Principal, outbox: Outbox) -> Self {
        let now = Utc::now();
        Self {
            connection_id,
            principal,
            subscribed_topics: HashSet::new(),
            rate_limit: RateLimitState { count: 0, window_start: now, violations: 0 },
            heartbeat: HeartbeatState { last_pong: now, alive: true },
            outbox,
        }
    }

    /// Best-effort enqueue of an outbound envelope. Returns `false` on
    /// send failure, the caller's signal to close the session.
    pub fn send(&self, envelope: &Envelope) -> bool {
        self.outbox.try_send(envelope.to_json()).is_ok()
    }

    /// Advances the sliding rate-limit window, resetting the count once
    /// `window` has elapsed since `window_start`.
    pub fn record_message(&mut self, window: chrono::Duration, max: u32) -> bool {
        let now = Utc::now();
        if now - self.rate_limit.window_start > window {
            self.rate_limit.window_start = now;
            self.rate_limit.count = 0;
        }
        if self.rate_limit.count >= max {
            self.rate_limit.violations += 1;
            return false;
        }
        self.rate_limit.count += 1;
        true
    }

    pub fn mark_pong(&mut self) {
        self.heartbeat.last_pong = Utc::now();
        self.heartbeat.alive = true;
    }

    pub fn is_stale(&self, timeout: chrono::Duration) -> bool {
        Utc::now() - self.heartbeat.last_pong > timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet as Set;

    fn session() -> (SubscriberSession, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(8);
        let principal = Principal { id: "p1".into(), permissions: Set::new() };
        (SubscriberSession::new("c1".into(), principal, tx), rx)
    }

    #[test]
    fn rate_limit_allows_up_to_max_then_rejects() {
        let (mut s, _rx) = session();
        let window = chrono::Duration::seconds(60);
        for _ in 0..3 {
            assert!(s.record_message(window, 3));
        }
        assert!(!s.record_message(window, 3));
        assert_eq!(s.rate_limit.violations, 1);
    }

    #[test]
    fn stale_after_timeout_with_no_pong() {
        let (mut s, _rx) = session();
        s.heartbeat.last_pong = Utc::now() - chrono::Duration::seconds(100);
        assert!(s.is_stale(chrono::Duration::seconds(45)));
        s.mark_pong();
        assert!(!s.is_stale(chrono::Duration::seconds(45)));
    }
}
