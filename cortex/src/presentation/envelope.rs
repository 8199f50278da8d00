// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Wire envelopes exchanged with live clients
//!
//! Every server frame is `{type, timestamp, clientID, channel, data}` with an
//! RFC 3339 timestamp. Client frames are tagged by `type` as well.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::MemoryEvent;

/// Error codes carried in `error` envelopes
pub mod codes {
    pub const INVALID_FRAME: &str = "invalid_frame";
    pub const UNKNOWN_CHANNEL: &str = "unknown_channel";
    pub const NOT_CONNECTED: &str = "not_connected";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeType {
    ConnectionSuccess,
    Pong,
    SubscriptionSuccess,
    Message,
    MemoryUpdate,
    TaskUpdate,
    AgentStatus,
    GraphUpdate,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "clientID")]
    pub client_id: Option<String>,
    pub channel: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new(kind: EnvelopeType, data: serde_json::Value) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            client_id: None,
            channel: None,
            data,
        }
    }

    pub fn with_client(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn connection_success(client_id: &str, class: &str, connection_id: u64) -> Self {
        Self::new(
            EnvelopeType::ConnectionSuccess,
            serde_json::json!({ "class": class, "connectionId": connection_id }),
        )
        .with_client(client_id)
    }

    pub fn pong() -> Self {
        Self::new(EnvelopeType::Pong, serde_json::Value::Null)
    }

    pub fn subscription(channel: &str, subscribed: bool) -> Self {
        Self::new(
            EnvelopeType::SubscriptionSuccess,
            serde_json::json!({ "channel": channel, "subscribed": subscribed }),
        )
        .with_channel(channel)
    }

    pub fn message(channel: &str, sender: &str, data: serde_json::Value) -> Self {
        Self::new(EnvelopeType::Message, data)
            .with_client(sender)
            .with_channel(channel)
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::new(
            EnvelopeType::Error,
            serde_json::json!({ "code": code, "message": message.into() }),
        )
    }

    /// `graph_update` for concept changes, `memory_update` for everything else
    pub fn from_event(event: &MemoryEvent) -> Self {
        let kind = if event.is_graph_change() {
            EnvelopeType::GraphUpdate
        } else {
            EnvelopeType::MemoryUpdate
        };
        let data = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
        Self {
            timestamp: event.timestamp(),
            ..Self::new(kind, data)
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChannelRef {
    pub channel: String,
}

/// Frames a client may send
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Ping,
    Subscribe {
        data: ChannelRef,
    },
    Unsubscribe {
        data: ChannelRef,
    },
    Message {
        channel: String,
        #[serde(default)]
        data: serde_json::Value,
    },
}

impl ClientFrame {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
