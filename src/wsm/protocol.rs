//! Wire messages exchanged over the WebSocket fanout, framed as JSON with
//! a required `type` discriminant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    Ping,
    Subscribe { topics: Vec<String> },
    Unsubscribe { topics: Vec<String> },
    GetSubscriptions,
    GetStats,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    Welcome {
        connection_id: String,
        server_time: DateTime<Utc>,
        capabilities: Vec<String>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    SubscriptionResult {
        valid_topics: Vec<String>,
        invalid_topics: Vec<String>,
        total_subscriptions: usize,
    },
    UnsubscriptionResult {
        removed_topics: Vec<String>,
        total_subscriptions: usize,
    },
    Subscriptions {
        topics: Vec<String>,
    },
    Stats {
        active_sessions: usize,
        total_subscriptions: usize,
        rate_limit_violations: u64,
    },
    Error {
        code: &'static str,
        message: String,
    },
    /// A typed domain broadcast: `race.positions`, `race.tactical-events`, ...
    Broadcast {
        topic: String,
        payload: serde_json::Value,
    },
    ServerShutdown {
        reconnect_delay_ms: u64,
    },
}

/// Every outbound frame carries `timestamp` and `connectionId` alongside its
/// typed body, per the wire protocol.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub connection_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub body: ServerMessage,
}

impl Envelope {
    pub fn new(connection_id: &str, body: ServerMessage) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            timestamp: Utc::now(),
            body,
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","code":"INTERNAL","message":"encode failure"}"#.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_subscribe_parses_topics() {
        let raw = r#"{"type":"subscribe","topics":["race.positions","race.gaps"]}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::Subscribe { topics } => assert_eq!(topics.len(), 2),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let raw = r#"{"type":"frobnicate"}"#;
        assert!(serde_json::from_str::<ClientMessage>(raw).is_err());
    }

    #[test]
    fn envelope_carries_connection_id_and_timestamp() {
        let env = Envelope::new("conn-1", ServerMessage::Pong { timestamp: Utc::now() });
        let json = env.to_json();
        assert!(json.contains("conn-1"));
        assert!(json.contains("\"type\":\"pong\""));
    }
}
