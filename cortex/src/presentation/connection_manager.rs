// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Connection Manager and Broadcast Hub
//!
//! Tracks live client sockets per connection class, the channels each client
//! joined, and fans envelopes out to them.
//!
//! # Architecture
//!
//! - **Layer:** Presentation Layer
//! - **Purpose:** Identity-keyed registries with fault-isolated broadcast
//!
//! ## Invariants
//!
//! - One socket per `(class, client_id)`; a new connection replaces the old
//!   one, which is closed with code 1012 "reconnecting".
//! - Registry locks are released before any socket send.
//! - A failed send never interrupts a fan-out pass; failed targets are
//!   disconnected once the pass completes.

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::application::event_bus::EventBus;
use crate::domain::config::HubConfig;
use crate::domain::MemoryEvent;
use crate::presentation::envelope::{codes, ClientFrame, Envelope};

/// Close code sent to a socket replaced by a newer connection
pub const CLOSE_RECONNECTING: u16 = 1012;

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("socket closed")]
    Closed,

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("unknown channel '{0}'")]
    UnknownChannel(String),

    #[error("unknown connection class '{0}'")]
    UnknownClass(String),

    #[error("client '{0}' is not connected")]
    NotConnected(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outbound half of a client connection
#[async_trait]
pub trait ClientSocket: Send + Sync {
    async fn send(&self, envelope: &Envelope) -> Result<(), HubError>;

    async fn close(&self, code: u16, reason: &str) -> Result<(), HubError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionClass {
    Chat,
    Tasks,
    Agents,
    Graph,
}

impl ConnectionClass {
    pub const ALL: [ConnectionClass; 4] = [
        ConnectionClass::Chat,
        ConnectionClass::Tasks,
        ConnectionClass::Agents,
        ConnectionClass::Graph,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionClass::Chat => "chat",
            ConnectionClass::Tasks => "tasks",
            ConnectionClass::Agents => "agents",
            ConnectionClass::Graph => "graph",
        }
    }
}

impl fmt::Display for ConnectionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionClass {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(ConnectionClass::Chat),
            "tasks" => Ok(ConnectionClass::Tasks),
            "agents" => Ok(ConnectionClass::Agents),
            "graph" => Ok(ConnectionClass::Graph),
            other => Err(HubError::UnknownClass(other.to_string())),
        }
    }
}

/// Distinguishes successive connections of the same client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone)]
struct Connection {
    id: ConnectionId,
    socket: Arc<dyn ClientSocket>,
}

/// Outcome of one fan-out pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Client ids whose send failed; they have been disconnected
    pub failed: Vec<String>,
}

type ChannelKey = (ConnectionClass, String);

pub struct ConnectionManager {
    registries: RwLock<HashMap<ConnectionClass, HashMap<String, Connection>>>,
    channels: RwLock<HashMap<ChannelKey, HashSet<String>>>,
    allowed_channels: Vec<String>,
    next_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new(allowed_channels: Vec<String>) -> Self {
        Self {
            registries: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
            allowed_channels,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn from_config(config: &HubConfig) -> Self {
        Self::new(config.channels.clone())
    }

    pub fn allowed_channels(&self) -> &[String] {
        &self.allowed_channels
    }

    pub fn is_allowed_channel(&self, channel: &str) -> bool {
        self.allowed_channels.iter().any(|c| c == channel)
    }

    /// Register a socket under `(class, client_id)`, replacing any previous one
    pub async fn connect(&self, socket: Arc<dyn ClientSocket>, client_id: &str, class: ConnectionClass) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let previous = {
            let mut registries = self.registries.write().await;
            registries.entry(class).or_default().insert(
                client_id.to_string(),
                Connection {
                    id,
                    socket: socket.clone(),
                },
            )
        };

        if let Some(previous) = previous {
            info!(%class, client_id, old = %previous.id, new = %id, "Replacing existing connection");
            if let Err(e) = previous.socket.close(CLOSE_RECONNECTING, "reconnecting").await {
                debug!(%class, client_id, error = %e, "Replaced socket was already gone");
            }
        } else {
            info!(%class, client_id, connection_id = %id, "Client connected");
        }

        let welcome = Envelope::connection_success(client_id, class.as_str(), id.0);
        if let Err(e) = socket.send(&welcome).await {
            warn!(%class, client_id, error = %e, "Failed to send connection_success");
        }
        id
    }

    /// Drop the client's mapping and subscriptions if `connection_id` is still current
    pub async fn disconnect(&self, class: ConnectionClass, client_id: &str, connection_id: ConnectionId) -> bool {
        let mut registries = self.registries.write().await;
        let Some(clients) = registries.get_mut(&class) else {
            return false;
        };
        if clients.get(client_id).map(|c| c.id) != Some(connection_id) {
            debug!(%class, client_id, %connection_id, "Stale disconnect ignored");
            return false;
        }
        clients.remove(client_id);

        let mut channels = self.channels.write().await;
        channels.retain(|(channel_class, _), members| {
            if *channel_class == class {
                members.remove(client_id);
            }
            !members.is_empty()
        });

        info!(%class, client_id, %connection_id, "Client disconnected");
        true
    }

    pub async fn join_channel(&self, class: ConnectionClass, client_id: &str, channel: &str) -> Result<(), HubError> {
        if !self.is_allowed_channel(channel) {
            return Err(HubError::UnknownChannel(channel.to_string()));
        }
        let registries = self.registries.read().await;
        let connected = registries
            .get(&class)
            .is_some_and(|clients| clients.contains_key(client_id));
        if !connected {
            return Err(HubError::NotConnected(client_id.to_string()));
        }

        let mut channels = self.channels.write().await;
        channels
            .entry((class, channel.to_string()))
            .or_default()
            .insert(client_id.to_string());
        debug!(%class, client_id, channel, "Joined channel");
        Ok(())
    }

    /// Returns whether the client was subscribed
    pub async fn leave_channel(&self, class: ConnectionClass, client_id: &str, channel: &str) -> Result<bool, HubError> {
        if !self.is_allowed_channel(channel) {
            return Err(HubError::UnknownChannel(channel.to_string()));
        }
        let mut channels = self.channels.write().await;
        let key = (class, channel.to_string());
        let removed = match channels.get_mut(&key) {
            Some(members) => {
                let removed = members.remove(client_id);
                if members.is_empty() {
                    channels.remove(&key);
                }
                removed
            }
            None => false,
        };
        Ok(removed)
    }

    /// Send to every client of `class`, or only to `channel` subscribers
    pub async fn broadcast(&self, envelope: &Envelope, class: ConnectionClass, channel: Option<&str>) -> BroadcastReport {
        let targets = self.resolve_targets(class, channel).await;
        if targets.is_empty() {
            return BroadcastReport::default();
        }

        let results = join_all(
            targets
                .iter()
                .map(|(_, connection)| connection.socket.send(envelope)),
        )
        .await;

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();
        for ((client_id, connection), result) in targets.into_iter().zip(results) {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(%class, client_id = %client_id, error = %e, "Broadcast send failed, dropping client");
                    failed.push((client_id, connection.id));
                }
            }
        }

        for (client_id, connection_id) in failed {
            metrics::counter!("strata_broadcast_failures_total", "class" => class.as_str()).increment(1);
            self.disconnect(class, &client_id, connection_id).await;
            report.failed.push(client_id);
        }
        report
    }

    /// Deliver to one client
    pub async fn send_to(&self, class: ConnectionClass, client_id: &str, envelope: &Envelope) -> Result<(), HubError> {
        let socket = {
            let registries = self.registries.read().await;
            registries
                .get(&class)
                .and_then(|clients| clients.get(client_id))
                .map(|c| c.socket.clone())
        };
        match socket {
            Some(socket) => socket.send(envelope).await,
            None => Err(HubError::NotConnected(client_id.to_string())),
        }
    }

    /// Apply one raw client frame and answer on the client's socket
    pub async fn handle_frame(&self, class: ConnectionClass, client_id: &str, raw: &str) -> Result<(), HubError> {
        let frame = match ClientFrame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(%class, client_id, error = %e, "Unparseable client frame");
                let reply = Envelope::error(codes::INVALID_FRAME, e.to_string());
                return self.send_to(class, client_id, &reply).await;
            }
        };

        let reply = match frame {
            ClientFrame::Ping => Envelope::pong(),
            ClientFrame::Subscribe { data } => match self.join_channel(class, client_id, &data.channel).await {
                Ok(()) => Envelope::subscription(&data.channel, true),
                Err(e) => self.error_reply(e),
            },
            ClientFrame::Unsubscribe { data } => match self.leave_channel(class, client_id, &data.channel).await {
                Ok(_) => Envelope::subscription(&data.channel, false),
                Err(e) => self.error_reply(e),
            },
            ClientFrame::Message { channel, data } => {
                if !self.is_allowed_channel(&channel) {
                    self.error_reply(HubError::UnknownChannel(channel))
                } else {
                    let message = Envelope::message(&channel, client_id, data);
                    let report = self.broadcast(&message, class, Some(&channel)).await;
                    debug!(%class, client_id, channel = %channel, delivered = report.delivered, "Relayed message");
                    return Ok(());
                }
            }
        };
        self.send_to(class, client_id, &reply).await
    }

    fn error_reply(&self, error: HubError) -> Envelope {
        let code = match &error {
            HubError::UnknownChannel(_) => codes::UNKNOWN_CHANNEL,
            HubError::NotConnected(_) => codes::NOT_CONNECTED,
            _ => codes::INVALID_FRAME,
        };
        Envelope::error(code, error.to_string())
    }

    pub async fn connection_count(&self, class: ConnectionClass) -> usize {
        self.registries
            .read()
            .await
            .get(&class)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    pub async fn subscribers(&self, class: ConnectionClass, channel: &str) -> Vec<String> {
        let channels = self.channels.read().await;
        let mut members: Vec<String> = channels
            .get(&(class, channel.to_string()))
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    async fn resolve_targets(&self, class: ConnectionClass, channel: Option<&str>) -> Vec<(String, Connection)> {
        let registries = self.registries.read().await;
        let Some(clients) = registries.get(&class) else {
            return Vec::new();
        };

        match channel {
            Some(channel) => {
                let channels = self.channels.read().await;
                channels
                    .get(&(class, channel.to_string()))
                    .map(|members| {
                        members
                            .iter()
                            .filter_map(|id| clients.get(id).map(|c| (id.clone(), c.clone())))
                            .collect()
                    })
                    .unwrap_or_default()
            }
            None => clients.iter().map(|(id, c)| (id.clone(), c.clone())).collect(),
        }
    }
}

/// Memory events go to graph observers
#[async_trait]
impl EventBus for ConnectionManager {
    async fn publish(&self, event: MemoryEvent) {
        let envelope = Envelope::from_event(&event);
        let report = self.broadcast(&envelope, ConnectionClass::Graph, None).await;
        debug!(
            event = event.event_type(),
            delivered = report.delivered,
            failed = report.failed.len(),
            "Published memory event"
        );
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::presentation::envelope::EnvelopeType;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicBool;

    /// Records everything sent; fails every send once `failing` is set
    #[derive(Default)]
    pub(crate) struct FakeSocket {
        pub sent: Mutex<Vec<Envelope>>,
        pub closed: Mutex<Option<(u16, String)>>,
        pub failing: AtomicBool,
    }

    impl FakeSocket {
        pub fn failing() -> Self {
            let socket = Self::default();
            socket.failing.store(true, Ordering::SeqCst);
            socket
        }

        pub fn kinds(&self) -> Vec<EnvelopeType> {
            self.sent.lock().iter().map(|e| e.kind).collect()
        }

        pub fn last(&self) -> Option<Envelope> {
            self.sent.lock().last().cloned()
        }
    }

    #[async_trait]
    impl ClientSocket for FakeSocket {
        async fn send(&self, envelope: &Envelope) -> Result<(), HubError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(HubError::SendFailed("broken pipe".into()));
            }
            self.sent.lock().push(envelope.clone());
            Ok(())
        }

        async fn close(&self, code: u16, reason: &str) -> Result<(), HubError> {
            *self.closed.lock() = Some((code, reason.to_string()));
            Ok(())
        }
    }

    fn hub() -> ConnectionManager {
        ConnectionManager::new(vec!["team-alpha".to_string(), "team-beta".to_string()])
    }

    #[tokio::test]
    async fn test_connect_sends_connection_success() {
        let hub = hub();
        let socket = Arc::new(FakeSocket::default());
        hub.connect(socket.clone(), "alice", ConnectionClass::Chat).await;

        let welcome = socket.last().unwrap();
        assert_eq!(welcome.kind, EnvelopeType::ConnectionSuccess);
        assert_eq!(welcome.client_id.as_deref(), Some("alice"));
        assert_eq!(hub.connection_count(ConnectionClass::Chat).await, 1);
        assert_eq!(hub.connection_count(ConnectionClass::Graph).await, 0);
    }

    #[tokio::test]
    async fn test_stale_disconnect_keeps_new_connection() {
        let hub = hub();
        let old = Arc::new(FakeSocket::default());
        let new = Arc::new(FakeSocket::default());

        let old_id = hub.connect(old.clone(), "alice", ConnectionClass::Tasks).await;
        let new_id = hub.connect(new.clone(), "alice", ConnectionClass::Tasks).await;

        assert_eq!(*old.closed.lock(), Some((CLOSE_RECONNECTING, "reconnecting".to_string())));
        assert!(!hub.disconnect(ConnectionClass::Tasks, "alice", old_id).await);
        assert_eq!(hub.connection_count(ConnectionClass::Tasks).await, 1);
        assert!(hub.disconnect(ConnectionClass::Tasks, "alice", new_id).await);
        assert_eq!(hub.connection_count(ConnectionClass::Tasks).await, 0);
    }

    #[tokio::test]
    async fn test_unknown_channel_rejected() {
        let hub = hub();
        let socket = Arc::new(FakeSocket::default());
        hub.connect(socket.clone(), "bob", ConnectionClass::Chat).await;

        assert!(matches!(
            hub.join_channel(ConnectionClass::Chat, "bob", "secret-room").await,
            Err(HubError::UnknownChannel(_))
        ));
        assert!(matches!(
            hub.join_channel(ConnectionClass::Chat, "nobody", "team-alpha").await,
            Err(HubError::NotConnected(_))
        ));

        hub.handle_frame(ConnectionClass::Chat, "bob", r#"{"type":"subscribe","data":{"channel":"secret-room"}}"#)
            .await
            .unwrap();
        let reply = socket.last().unwrap();
        assert_eq!(reply.kind, EnvelopeType::Error);
        assert_eq!(reply.data["code"], codes::UNKNOWN_CHANNEL);
    }

    #[tokio::test]
    async fn test_frames_ping_subscribe_relay() {
        let hub = hub();
        let alice = Arc::new(FakeSocket::default());
        let bob = Arc::new(FakeSocket::default());
        hub.connect(alice.clone(), "alice", ConnectionClass::Chat).await;
        hub.connect(bob.clone(), "bob", ConnectionClass::Chat).await;

        hub.handle_frame(ConnectionClass::Chat, "alice", r#"{"type":"ping"}"#).await.unwrap();
        assert_eq!(alice.last().unwrap().kind, EnvelopeType::Pong);

        for client in ["alice", "bob"] {
            hub.handle_frame(ConnectionClass::Chat, client, r#"{"type":"subscribe","data":{"channel":"team-alpha"}}"#)
                .await
                .unwrap();
        }
        assert_eq!(bob.last().unwrap().kind, EnvelopeType::SubscriptionSuccess);
        assert_eq!(hub.subscribers(ConnectionClass::Chat, "team-alpha").await, vec!["alice", "bob"]);

        hub.handle_frame(
            ConnectionClass::Chat,
            "alice",
            r#"{"type":"message","channel":"team-alpha","data":{"text":"deploying"}}"#,
        )
        .await
        .unwrap();
        let relayed = bob.last().unwrap();
        assert_eq!(relayed.kind, EnvelopeType::Message);
        assert_eq!(relayed.client_id.as_deref(), Some("alice"));
        assert_eq!(relayed.data["text"], "deploying");

        hub.handle_frame(ConnectionClass::Chat, "bob", r#"{"type":"unsubscribe","data":{"channel":"team-alpha"}}"#)
            .await
            .unwrap();
        assert_eq!(hub.subscribers(ConnectionClass::Chat, "team-alpha").await, vec!["alice"]);

        hub.handle_frame(ConnectionClass::Chat, "bob", "{oops").await.unwrap();
        assert_eq!(bob.last().unwrap().data["code"], codes::INVALID_FRAME);
    }

    #[tokio::test]
    async fn test_disconnect_drops_subscriptions() {
        let hub = hub();
        let socket = Arc::new(FakeSocket::default());
        let id = hub.connect(socket, "carol", ConnectionClass::Chat).await;
        hub.join_channel(ConnectionClass::Chat, "carol", "team-beta").await.unwrap();

        hub.disconnect(ConnectionClass::Chat, "carol", id).await;
        assert!(hub.subscribers(ConnectionClass::Chat, "team-beta").await.is_empty());
    }

    #[tokio::test]
    async fn test_publish_routes_events_to_graph_class() {
        let hub = hub();
        let graph = Arc::new(FakeSocket::default());
        let chat = Arc::new(FakeSocket::default());
        hub.connect(graph.clone(), "viewer", ConnectionClass::Graph).await;
        hub.connect(chat.clone(), "alice", ConnectionClass::Chat).await;

        hub.publish(MemoryEvent::ConceptUpserted {
            name: "rust".to_string(),
            concept_type: "language".to_string(),
            related: vec![],
            memory_id: None,
            timestamp: chrono::Utc::now(),
        })
        .await;

        assert_eq!(graph.last().unwrap().kind, EnvelopeType::GraphUpdate);
        assert_eq!(chat.kinds(), vec![EnvelopeType::ConnectionSuccess]);
    }

    #[test]
    fn test_class_parsing() {
        assert_eq!("graph".parse::<ConnectionClass>().unwrap(), ConnectionClass::Graph);
        assert!("admin".parse::<ConnectionClass>().is_err());
        for class in ConnectionClass::ALL {
            assert_eq!(class.as_str().parse::<ConnectionClass>().unwrap(), class);
        }
    }
}
