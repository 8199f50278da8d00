// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-process record pools
//!
//! A read-through cache and deduplication oracle per tier. Never the system
//! of record: anything here can be dropped and re-read from the backends.
//! The lock is never held across an await.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::domain::{MemoryId, MemoryRecord, Tier};

#[derive(Debug)]
pub struct MemoryPool {
    tier: Tier,
    entries: RwLock<HashMap<MemoryId, MemoryRecord>>,
}

impl MemoryPool {
    pub fn new(tier: Tier) -> Self {
        Self {
            tier,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn get(&self, id: MemoryId) -> Option<MemoryRecord> {
        self.entries.read().get(&id).cloned()
    }

    /// Insert or replace; a consolidated entry is never demoted
    pub fn upsert(&self, mut record: MemoryRecord) {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&record.id) {
            record.metadata.consolidated |= existing.metadata.consolidated;
        }
        entries.insert(record.id, record);
    }

    pub fn remove(&self, id: MemoryId) -> bool {
        self.entries.write().remove(&id).is_some()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
