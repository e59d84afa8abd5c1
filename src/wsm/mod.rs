//! WSM — authenticated, topic-filtered, rate-limited real-time fanout.
//!
//! Session model: shared-nothing per connection except the topic->session
//! index, which this struct owns and mutates only through its public
//! operations, per the concurrency model's shared-resource discipline.

pub mod auth;
pub mod protocol;
pub mod session;
pub mod topics;

use crate::config::WsmConfig;
use crate::error::PipelineError;
use crate::types::Principal;
use auth::PrincipalRegistry;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use protocol::{Envelope, ServerMessage};
use serde::Deserialize;
use session::SubscriberSession;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Wsm {
    sessions: DashMap<String, SubscriberSession>,
    /// topic -> set of subscribed connection ids.
    topic_index: DashMap<String, HashSet<String>>,
    pub registry: Arc<PrincipalRegistry>,
    config: WsmConfig,
    shutting_down: AtomicBool,
    rate_limit_violations: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub active_sessions: usize,
    pub total_subscriptions: usize,
    pub rate_limit_violations: u64,
}

impl Wsm {
    pub fn new(config: WsmConfig, registry: Arc<PrincipalRegistry>) -> Self {
        Self {
            sessions: DashMap::new(),
            topic_index: DashMap::new(),
            registry,
            config,
            shutting_down: AtomicBool::new(false),
            rate_limit_violations: AtomicU64::new(0),
        }
    }

    pub fn active_session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Validates a presented bearer token against `maxConnections` and the
    /// `realtime-access` claim. Connections failing either are rejected
    /// before a session is ever created.
    pub fn handshake(&self, token: &str) -> Result<Principal, PipelineError> {
        if self.sessions.len() >= self.config.max_connections {
            return Err(PipelineError::ResourceExhausted("max connections reached".into()));
        }
        self.registry
            .verify(token)
            .ok_or_else(|| PipelineError::AuthFailure("missing or invalid realtime-access token".into()))
    }

    fn register_session(&self, connection_id: String, principal: Principal, outbox: mpsc::Sender<String>) {
        let session = SubscriberSession::new(connection_id.clone(), principal, outbox);
        self.sessions.insert(connection_id, session);
    }

    fn remove_session(&self, connection_id: &str) {
        if let Some((_, session)) = self.sessions.remove(connection_id) {
            for topic in session.subscribed_topics {
                if let Some(mut members) = self.topic_index.get_mut(&topic) {
                    members.remove(connection_id);
                }
            }
        }
    }

    fn subscribe(&self, connection_id: &str, requested: &[String]) -> Option<(Vec<String>, Vec<String>, usize)> {
        let mut session = self.sessions.get_mut(connection_id)?;
        let (valid, invalid) = topics::partition_topics(&session.principal, requested);
        for topic in &valid {
            session.subscribed_topics.insert(topic.clone());
            self.topic_index.entry(topic.clone()).or_default().insert(connection_id.to_string());
        }
        let total = session.subscribed_topics.len();
        Some((valid, invalid, total))
    }

    fn unsubscribe(&self, connection_id: &str, requested: &[String]) -> Option<(Vec<String>, usize)> {
        let mut session = self.sessions.get_mut(connection_id)?;
        let mut removed = Vec::new();
        for topic in requested {
            if session.subscribed_topics.remove(topic) {
                removed.push(topic.clone());
                if let Some(mut members) = self.topic_index.get_mut(topic) {
                    members.remove(connection_id);
                }
            }
        }
        let total = session.subscribed_topics.len();
        Some((removed, total))
    }

    fn stats(&self) -> Stats {
        Stats {
            active_sessions: self.sessions.len(),
            total_subscriptions: self.topic_index.iter().map(|e| e.value().len()).sum(),
            rate_limit_violations: self.rate_limit_violations.load(Ordering::Relaxed),
        }
    }

    /// Dispatches one parsed client message, returning the reply envelope.
    /// Rate limiting and stale-JSON handling happen in the connection loop,
    /// which owns the raw text before it ever becomes a `ClientMessage`.
    fn dispatch(&self, connection_id: &str, msg: protocol::ClientMessage) -> ServerMessage {
        use protocol::ClientMessage as C;
        match msg {
            C::Ping => ServerMessage::Pong { timestamp: chrono::Utc::now() },
            C::Subscribe { topics } => match self.subscribe(connection_id, &topics) {
                Some((valid, invalid, total)) => ServerMessage::SubscriptionResult {
                    valid_topics: valid,
                    invalid_topics: invalid,
                    total_subscriptions: total,
                },
                None => ServerMessage::Error { code: "UNKNOWN_MESSAGE_TYPE", message: "session not found".into() },
            },
            C::Unsubscribe { topics } => match self.unsubscribe(connection_id, &topics) {
                Some((removed, total)) => {
                    ServerMessage::UnsubscriptionResult { removed_topics: removed, total_subscriptions: total }
                }
                None => ServerMessage::Error { code: "UNKNOWN_MESSAGE_TYPE", message: "session not found".into() },
            },
            C::GetSubscriptions => {
                let topics = self
                    .sessions
                    .get(connection_id)
                    .map(|s| s.subscribed_topics.iter().cloned().collect())
                    .unwrap_or_default();
                ServerMessage::Subscriptions { topics }
            }
            C::GetStats => {
                let is_admin = self.sessions.get(connection_id).map(|s| s.principal.is_admin()).unwrap_or(false);
                if !is_admin {
                    return ServerMessage::Error { code: "UNKNOWN_MESSAGE_TYPE", message: "admin only".into() };
                }
                let s = self.stats();
                ServerMessage::Stats {
                    active_sessions: s.active_sessions,
                    total_subscriptions: s.total_subscriptions,
                    rate_limit_violations: s.rate_limit_violations,
                }
            }
        }
    }

    /// Visits every session subscribed to `topic`, applying `allow`
    /// (the principal allow-list / required-permission predicate) before
    /// delivery. Best-effort: a send failure closes that session.
    pub fn broadcast(&self, topic: &str, payload: serde_json::Value, allow: impl Fn(&Principal) -> bool) {
        let Some(members) = self.topic_index.get(topic) else { return };
        let mut dead = Vec::new();
        for connection_id in members.iter() {
            let Some(session) = self.sessions.get(connection_id) else { continue };
            if !allow(&session.principal) {
                continue;
            }
            let envelope = Envelope::new(
                connection_id,
                ServerMessage::Broadcast { topic: topic.to_string(), payload: payload.clone() },
            );
            if !session.send(&envelope) {
                dead.push(connection_id.clone());
            }
        }
        drop(members);
        for connection_id in dead {
            self.remove_session(&connection_id);
        }
    }

    /// Heartbeat sweep: pings every open session each tick, closes any
    /// whose last pong is older than `connectionTimeout`.
    fn heartbeat_sweep(&self) {
        let timeout = chrono::Duration::from_std(self.config.connection_timeout()).unwrap_or(chrono::Duration::zero());
        let mut stale = Vec::new();
        for session in self.sessions.iter() {
            if session.is_stale(timeout) {
                stale.push(session.connection_id.clone());
                continue;
            }
            let envelope = Envelope::new(&session.connection_id, ServerMessage::Pong { timestamp: chrono::Utc::now() });
            session.send(&envelope);
        }
        for connection_id in stale {
            warn!(connection_id, "wsm session timed out, closing");
            self.remove_session(&connection_id);
        }
    }

    /// Broadcasts a `server-shutdown` notice, waits the grace window, then
    /// drops all sessions so outstanding writer tasks exit.
    async fn graceful_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        for session in self.sessions.iter() {
            let envelope = Envelope::new(
                &session.connection_id,
                ServerMessage::ServerShutdown { reconnect_delay_ms: self.config.shutdown_reconnect_delay_ms },
            );
            session.send(&envelope);
        }
        tokio::time::sleep(self.config.shutdown_grace()).await;
        let ids: Vec<String> = self.sessions.iter().map(|s| s.connection_id.clone()).collect();
        for id in ids {
            self.remove_session(&id);
        }
    }

    /// Periodic heartbeat loop; runs until cancelled, then drives a
    /// graceful shutdown of every open session.
    pub async fn run(&self, cancellation: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.heartbeat_interval());
        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    info!("wsm shutting down, notifying open sessions");
                    self.graceful_shutdown().await;
                    return;
                }
                _ = interval.tick() => {
                    self.heartbeat_sweep();
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, socket: WebSocket, connection_id: String, principal: Principal) {
        let (mut sink, mut stream) = socket.split();
        let (tx, mut rx) = mpsc::channel::<String>(256);
        self.register_session(connection_id.clone(), principal, tx);

        let welcome = Envelope::new(
            &connection_id,
            ServerMessage::Welcome {
                connection_id: connection_id.clone(),
                server_time: chrono::Utc::now(),
                capabilities: vec!["subscribe".into(), "unsubscribe".into(), "ping".into()],
            },
        );
        if sink.send(Message::Text(welcome.to_json())).await.is_err() {
            self.remove_session(&connection_id);
            return;
        }

        let writer = tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        let window = chrono::Duration::from_std(self.config.rate_limit_window()).unwrap_or(chrono::Duration::zero());
        while let Some(Ok(msg)) = stream.next().await {
            let text = match msg {
                Message::Text(t) => t,
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => continue,
            };

            let allowed = self
                .sessions
                .get_mut(&connection_id)
                .map(|mut s| s.record_message(window, self.config.rate_limit_max))
                .unwrap_or(false);
            if !allowed {
                self.rate_limit_violations.fetch_add(1, Ordering::Relaxed);
                let envelope = Envelope::new(
                    &connection_id,
                    ServerMessage::Error { code: "RATE_LIMIT_EXCEEDED", message: "too many messages".into() },
                );
                if let Some(session) = self.sessions.get(&connection_id) {
                    session.send(&envelope);
                }
                continue;
            }

            let reply = match serde_json::from_str::<protocol::ClientMessage>(&text) {
                Ok(protocol::ClientMessage::Ping) => {
                    if let Some(mut session) = self.sessions.get_mut(&connection_id) {
                        session.mark_pong();
                    }
                    ServerMessage::Pong { timestamp: chrono::Utc::now() }
                }
                Ok(client_msg) => self.dispatch(&connection_id, client_msg),
                Err(_) => ServerMessage::Error { code: "INVALID_JSON", message: "could not parse message".into() },
            };
            let envelope = Envelope::new(&connection_id, reply);
            if let Some(session) = self.sessions.get(&connection_id) {
                if !session.send(&envelope) {
                    break;
                }
            }
        }

        writer.abort();
        self.remove_session(&connection_id);
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub token: String,
}

/// `GET /ws` upgrade handler: performs the handshake before accepting the
/// socket, per spec's "rejected before a session is ever created."
pub async fn ws_upgrade(
    State(wsm): State<Arc<Wsm>>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    match wsm.handshake(&params.token) {
        Ok(principal) => {
            let connection_id = uuid::Uuid::new_v4().to_string();
            ws.on_upgrade(move |socket| async move {
                wsm.handle_connection(socket, connection_id, principal).await;
            })
        }
        Err(e) => {
            warn!(error = %e, "wsm handshake rejected");
            ws.on_upgrade(|mut socket| async move {
                let _ = socket.send(Message::Close(None)).await;
            })
        }
    }
}
