// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Persistence contracts for the two memory tiers
//!
//! | Trait | Tier | Implementations |
//! |-------|------|----------------|
//! | `VectorStore` | episodic | `QdrantVectorStore`, `InMemoryVectorStore` |
//! | `GraphStore` | semantic | `Neo4jGraphStore`, `InMemoryGraphStore` |
//!
//! Store handles are obtained from a [`Connector`] so the retry executor can
//! throw away a dead handle and build a fresh one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use super::concept::{Concept, ConceptChange};
use super::error::BackendError;
use super::memory::{MemoryId, MemoryKind, MemoryRecord, Tier};

/// Lightweight liveness check run before each attempt
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn ping(&self) -> Result<(), BackendError>;
}

/// Builds store handles
#[async_trait]
pub trait Connector<H: ?Sized + Send + Sync>: Send + Sync {
    async fn connect(&self) -> Result<Arc<H>, BackendError>;

    /// Name used in logs and metrics
    fn backend_name(&self) -> &str;
}

/// Payload filter understood by every vector store
#[derive(Debug, Clone, PartialEq)]
pub enum FieldFilter {
    RecordId(MemoryId),
    Tier(Tier),
    Kind(MemoryKind),
    Consolidated(bool),
    UpdatedAfter(DateTime<Utc>),
}

impl FieldFilter {
    /// Evaluate the filter against a record, for stores that filter in-process
    pub fn matches(&self, record: &MemoryRecord) -> bool {
        match self {
            FieldFilter::RecordId(id) => record.id == *id,
            FieldFilter::Tier(tier) => record.tier == *tier,
            FieldFilter::Kind(kind) => &record.kind == kind,
            FieldFilter::Consolidated(flag) => record.metadata.consolidated == *flag,
            FieldFilter::UpdatedAfter(ts) => record.updated_at > *ts,
        }
    }
}

/// A record returned by similarity search
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: MemoryRecord,
    pub score: f32,
}

/// Episodic persistence engine
#[async_trait]
pub trait VectorStore: HealthCheck {
    /// Insert or replace the point for `record.id`
    async fn upsert(&self, record: &MemoryRecord, embedding: Vec<f32>) -> Result<(), BackendError>;

    /// Similarity search, best match first
    async fn search(
        &self,
        embedding: Vec<f32>,
        filters: &[FieldFilter],
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredRecord>, BackendError>;

    /// Filter-only listing, oldest update first
    async fn scroll(&self, filters: &[FieldFilter], limit: usize) -> Result<Vec<MemoryRecord>, BackendError>;

    /// Returns whether a point was removed
    async fn delete(&self, id: MemoryId) -> Result<bool, BackendError>;
}

/// Read queries every graph store answers through `run_query`
///
/// Each returns one JSON object per row in a column named `row`. Parameters
/// are `$name` or `$type`.
pub mod queries {
    pub const CONCEPT_BY_NAME: &str = "MATCH (c:Concept {name: $name}) \
        RETURN {name: c.name, concept_type: c.type, description: c.description, \
        importance: c.importance, confidence: c.confidence} AS row";

    pub const RELATED_CONCEPTS: &str = "MATCH (:Concept {name: $name})-[:RELATED_TO]->(r:Concept) \
        RETURN {name: r.name, concept_type: r.type} AS row ORDER BY row.name";

    pub const CONCEPT_NEIGHBOURHOOD: &str = "MATCH (:Concept {name: $name})-[:RELATED_TO*1..2]->(r:Concept) \
        WHERE r.name <> $name \
        RETURN DISTINCT {name: r.name, concept_type: r.type} AS row ORDER BY row.name";

    pub const CONCEPTS_BY_TYPE: &str = "MATCH (c:Concept {type: $type}) \
        RETURN {name: c.name, concept_type: c.type, description: c.description} AS row ORDER BY row.name";
}

/// Semantic persistence engine
#[async_trait]
pub trait GraphStore: HealthCheck {
    /// Atomically create or update a concept and replace its outgoing edges
    async fn upsert_concept(&self, concept: &Concept, updated_at: DateTime<Utc>) -> Result<(), BackendError>;

    async fn find_concept(&self, name: &str) -> Result<Option<Concept>, BackendError>;

    /// Record snapshot of the concept promoted from `id`
    async fn find_by_memory_id(&self, id: MemoryId) -> Result<Option<MemoryRecord>, BackendError>;

    async fn delete_by_memory_id(&self, id: MemoryId) -> Result<bool, BackendError>;

    /// Concepts written after `since`, oldest first
    async fn changed_since(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<ConceptChange>, BackendError>;

    /// Generic read path; each row is a JSON object
    async fn run_query(
        &self,
        query: &str,
        params: &HashMap<String, serde_json::Value>,
    ) -> Result<Vec<serde_json::Value>, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_filter_matches() {
        let mut record = MemoryRecord::new("note", MemoryKind::Thread);
        record.metadata.consolidated = false;

        assert!(FieldFilter::RecordId(record.id).matches(&record));
        assert!(!FieldFilter::RecordId(MemoryId::new()).matches(&record));
        assert!(FieldFilter::Tier(Tier::Episodic).matches(&record));
        assert!(FieldFilter::Kind(MemoryKind::Thread).matches(&record));
        assert!(FieldFilter::Consolidated(false).matches(&record));
        assert!(!FieldFilter::Consolidated(true).matches(&record));
        assert!(FieldFilter::UpdatedAfter(record.updated_at - chrono::Duration::seconds(1)).matches(&record));
        assert!(!FieldFilter::UpdatedAfter(record.updated_at).matches(&record));
    }
}
