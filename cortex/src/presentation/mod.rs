// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Presentation layer: live client connections, broadcast and HTTP routes

pub mod connection_manager;
pub mod delta_poller;
pub mod envelope;
pub mod websocket;

pub use connection_manager::{
    BroadcastReport, ClientSocket, ConnectionClass, ConnectionId, ConnectionManager, HubError, CLOSE_RECONNECTING,
};
pub use delta_poller::DeltaPoller;
pub use envelope::{ClientFrame, Envelope, EnvelopeType};
pub use websocket::{router, AppState, OutboundSocket};
