// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Domain events for the memory tiers
//! Published after every successful mutation so live observers can follow
//! memory state without polling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::memory::{MemoryId, MemoryKind, Tier};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MemoryEvent {
    /// A record was written to a tier
    MemoryStored {
        record_id: MemoryId,
        tier: Tier,
        kind: MemoryKind,
        synced: bool,
        sync_depth: u32,
        timestamp: DateTime<Utc>,
    },

    /// A record was removed from both tiers
    MemoryDeleted {
        record_id: MemoryId,
        timestamp: DateTime<Utc>,
    },

    /// A record was promoted into the semantic tier
    MemoryConsolidated {
        record_id: MemoryId,
        concept: String,
        timestamp: DateTime<Utc>,
    },

    /// A concept and its outgoing edges were written
    ConceptUpserted {
        name: String,
        concept_type: String,
        related: Vec<String>,
        memory_id: Option<MemoryId>,
        timestamp: DateTime<Utc>,
    },

    /// A consolidation batch finished
    ConsolidationCompleted {
        consolidated: usize,
        skipped: usize,
        failed: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
}

impl MemoryEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            MemoryEvent::MemoryStored { timestamp, .. } => *timestamp,
            MemoryEvent::MemoryDeleted { timestamp, .. } => *timestamp,
            MemoryEvent::MemoryConsolidated { timestamp, .. } => *timestamp,
            MemoryEvent::ConceptUpserted { timestamp, .. } => *timestamp,
            MemoryEvent::ConsolidationCompleted { timestamp, .. } => *timestamp,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            MemoryEvent::MemoryStored { .. } => "memory_stored",
            MemoryEvent::MemoryDeleted { .. } => "memory_deleted",
            MemoryEvent::MemoryConsolidated { .. } => "memory_consolidated",
            MemoryEvent::ConceptUpserted { .. } => "concept_upserted",
            MemoryEvent::ConsolidationCompleted { .. } => "consolidation_completed",
        }
    }

    /// Graph-shaped events are of interest to graph observers specifically
    pub fn is_graph_change(&self) -> bool {
        matches!(self, MemoryEvent::ConceptUpserted { .. })
    }
}
