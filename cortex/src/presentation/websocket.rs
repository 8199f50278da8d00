// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP / WebSocket surface
//!
//! - `GET /health` - tier reachability, breaker states, connection counts
//! - `GET /ws/{class}?client_id=...` - live connection for one class
//!
//! Each socket gets a writer task fed through a bounded queue. The hub only
//! ever talks to the queue, so a stalled client fails its own sends instead
//! of blocking a broadcast.

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::application::two_tier_memory::TwoTierMemory;
use crate::presentation::connection_manager::{ClientSocket, ConnectionClass, ConnectionManager, HubError};
use crate::presentation::envelope::Envelope;

/// Frames buffered per client before sends start failing
const OUTBOUND_BUFFER: usize = 256;

pub struct AppState {
    pub memory: Arc<TwoTierMemory>,
    pub hub: Arc<ConnectionManager>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(memory: Arc<TwoTierMemory>, hub: Arc<ConnectionManager>) -> Self {
        Self {
            memory,
            hub,
            start_time: Instant::now(),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws/{class}", get(websocket_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let health = state.memory.health().await;
    let mut connections = serde_json::Map::new();
    for class in ConnectionClass::ALL {
        connections.insert(
            class.as_str().to_string(),
            serde_json::json!(state.hub.connection_count(class).await),
        );
    }

    let status = if health.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = serde_json::json!({
        "status": if health.is_healthy() { "healthy" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "tiers": health,
        "connections": connections,
    });
    (status, Json(body)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub client_id: Option<String>,
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    Path(class): Path<String>,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let class: ConnectionClass = match class.parse() {
        Ok(class) => class,
        Err(e) => return (StatusCode::NOT_FOUND, e.to_string()).into_response(),
    };
    let client_id = params
        .client_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    ws.on_upgrade(move |socket| handle_socket(socket, state.hub.clone(), class, client_id))
}

enum Outbound {
    Text(String),
    Close(u16, String),
}

/// Hub-facing half of an axum WebSocket
pub struct OutboundSocket {
    tx: mpsc::Sender<Outbound>,
    closed: AtomicBool,
}

impl OutboundSocket {
    fn new(tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            tx,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.tx.is_closed()
    }

    fn enqueue(&self, frame: Outbound) -> Result<(), HubError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => HubError::SendFailed("outbound buffer full".to_string()),
            mpsc::error::TrySendError::Closed(_) => HubError::Closed,
        })
    }
}

#[async_trait]
impl ClientSocket for OutboundSocket {
    async fn send(&self, envelope: &Envelope) -> Result<(), HubError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(HubError::Closed);
        }
        self.enqueue(Outbound::Text(envelope.to_json()?))
    }

    async fn close(&self, code: u16, reason: &str) -> Result<(), HubError> {
        self.closed.store(true, Ordering::SeqCst);
        self.enqueue(Outbound::Close(code, reason.to_string()))
    }
}

async fn handle_socket(socket: WebSocket, hub: Arc<ConnectionManager>, class: ConnectionClass, client_id: String) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(OUTBOUND_BUFFER);

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame {
                Outbound::Text(text) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close(code, reason) => {
                    let close = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    let _ = sink.send(Message::Close(Some(close))).await;
                    break;
                }
            }
        }
    });

    let outbound = Arc::new(OutboundSocket::new(tx));
    let connection_id = hub.connect(outbound.clone(), &client_id, class).await;

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if let Err(e) = hub.handle_frame(class, &client_id, text.as_str()).await {
                    debug!(%class, client_id = %client_id, error = %e, "Reply not delivered");
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(%class, client_id = %client_id, error = %e, "WebSocket error");
                break;
            }
        }
        if outbound.is_closed() {
            break;
        }
    }

    hub.disconnect(class, &client_id, connection_id).await;
    drop(outbound);
    if writer.await.is_err() {
        debug!(%class, client_id = %client_id, "Writer task ended abnormally");
    }
    info!(%class, client_id = %client_id, %connection_id, "WebSocket closed");
}
