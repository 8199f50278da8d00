// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Outbound port for memory events

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::MemoryEvent;

/// Receives every successful mutation; delivery failures stay inside the bus
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: MemoryEvent);
}

/// Drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventBus;

#[async_trait]
impl EventBus for NoopEventBus {
    async fn publish(&self, _event: MemoryEvent) {}
}

/// Keeps every event in order, for inspection
#[derive(Debug, Default)]
pub struct RecordingEventBus {
    events: Mutex<Vec<MemoryEvent>>,
}

impl RecordingEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MemoryEvent> {
        self.events.lock().clone()
    }

    pub fn event_types(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(|e| e.event_type()).collect()
    }
}

#[async_trait]
impl EventBus for RecordingEventBus {
    async fn publish(&self, event: MemoryEvent) {
        self.events.lock().push(event);
    }
}
