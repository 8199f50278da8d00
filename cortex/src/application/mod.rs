// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Application layer: the tiers, the two-tier facade and its background worker

pub mod consolidation_worker;
pub mod episodic_tier;
pub mod event_bus;
pub mod pool;
pub mod semantic_tier;
pub mod two_tier_memory;

pub use consolidation_worker::ConsolidationWorker;
pub use episodic_tier::EpisodicTier;
pub use event_bus::{EventBus, NoopEventBus, RecordingEventBus};
pub use pool::MemoryPool;
pub use semantic_tier::SemanticTier;
pub use two_tier_memory::{
    ConsolidationEntry, ConsolidationOutcome, ConsolidationReport, MemoryHealth, MemoryOptions, TierDeltas,
    TierHealth, TwoTierMemory, MAX_STORE_DEPTH, MAX_SYNC_DEPTH,
};
