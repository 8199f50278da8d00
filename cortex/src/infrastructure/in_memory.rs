// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory tier backends
//!
//! Full-semantics stand-ins for Qdrant and Neo4j, used by `backend: in_memory`
//! and by tests. Both can be taken offline to simulate an outage: every call
//! then fails with `ConnectionLost`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::repository::queries;
use crate::domain::{
    BackendError, Concept, ConceptChange, Connector, FieldFilter, GraphStore, HealthCheck, MemoryId,
    MemoryRecord, ScoredRecord, VectorStore,
};
use crate::infrastructure::embedding_client::cosine_similarity;

/// Hands out one shared handle; reconnecting yields the same store
pub struct StaticConnector<H: ?Sized> {
    handle: Arc<H>,
    name: String,
}

impl<H: ?Sized> StaticConnector<H> {
    pub fn new(name: impl Into<String>, handle: Arc<H>) -> Self {
        Self {
            handle,
            name: name.into(),
        }
    }
}

#[async_trait]
impl<H: ?Sized + Send + Sync + 'static> Connector<H> for StaticConnector<H> {
    async fn connect(&self) -> Result<Arc<H>, BackendError> {
        Ok(self.handle.clone())
    }

    fn backend_name(&self) -> &str {
        &self.name
    }
}

fn offline(backend: &str) -> BackendError {
    BackendError::ConnectionLost(format!("{} is offline", backend))
}

/// In-memory implementation of VectorStore
pub struct InMemoryVectorStore {
    points: Arc<RwLock<HashMap<MemoryId, (MemoryRecord, Vec<f32>)>>>,
    online: AtomicBool,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            points: Arc::new(RwLock::new(HashMap::new())),
            online: AtomicBool::new(true),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.points.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.points.read().await.is_empty()
    }

    fn check_online(&self) -> Result<(), BackendError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(offline("in-memory vector store"))
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthCheck for InMemoryVectorStore {
    async fn ping(&self) -> Result<(), BackendError> {
        self.check_online()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, record: &MemoryRecord, embedding: Vec<f32>) -> Result<(), BackendError> {
        self.check_online()?;
        let mut points = self.points.write().await;
        points.insert(record.id, (record.clone(), embedding));
        Ok(())
    }

    async fn search(
        &self,
        embedding: Vec<f32>,
        filters: &[FieldFilter],
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredRecord>, BackendError> {
        self.check_online()?;
        let points = self.points.read().await;

        let mut hits: Vec<ScoredRecord> = points
            .values()
            .filter(|(record, _)| filters.iter().all(|f| f.matches(record)))
            .map(|(record, vector)| ScoredRecord {
                record: record.clone(),
                score: cosine_similarity(&embedding, vector),
            })
            .filter(|hit| score_threshold.is_none_or(|threshold| hit.score >= threshold))
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn scroll(&self, filters: &[FieldFilter], limit: usize) -> Result<Vec<MemoryRecord>, BackendError> {
        self.check_online()?;
        let points = self.points.read().await;

        let mut records: Vec<MemoryRecord> = points
            .values()
            .map(|(record, _)| record)
            .filter(|record| filters.iter().all(|f| f.matches(record)))
            .cloned()
            .collect();

        records.sort_by_key(|record| record.updated_at);
        records.truncate(limit);
        Ok(records)
    }

    async fn delete(&self, id: MemoryId) -> Result<bool, BackendError> {
        self.check_online()?;
        let mut points = self.points.write().await;
        Ok(points.remove(&id).is_some())
    }
}

#[derive(Debug, Clone)]
struct ConceptNode {
    concept: Concept,
    updated_at: DateTime<Utc>,
}

/// In-memory implementation of GraphStore
///
/// Edges live on the source node as its `related` set.
pub struct InMemoryGraphStore {
    nodes: Arc<RwLock<HashMap<String, ConceptNode>>>,
    online: AtomicBool,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self {
            nodes: Arc::new(RwLock::new(HashMap::new())),
            online: AtomicBool::new(true),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.nodes.read().await.is_empty()
    }

    fn check_online(&self) -> Result<(), BackendError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(offline("in-memory graph store"))
        }
    }

    fn string_param(params: &HashMap<String, serde_json::Value>, key: &str) -> Result<String, BackendError> {
        params
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| BackendError::Rejected(format!("missing string parameter ${}", key)))
    }

    /// Names reachable from `start` within `max_depth` hops, excluding `start`
    fn traverse(nodes: &HashMap<String, ConceptNode>, start: &str, max_depth: usize) -> BTreeSet<String> {
        let mut visited = BTreeSet::new();
        let mut to_visit = vec![(start.to_string(), 0usize)];

        while let Some((current, depth)) = to_visit.pop() {
            if depth >= max_depth {
                continue;
            }
            if let Some(node) = nodes.get(&current) {
                for next in &node.concept.related {
                    if next != start && visited.insert(next.clone()) {
                        to_visit.push((next.clone(), depth + 1));
                    }
                }
            }
        }
        visited
    }

    fn name_and_type(nodes: &HashMap<String, ConceptNode>, name: &str) -> serde_json::Value {
        let concept_type = nodes
            .get(name)
            .map(|n| n.concept.concept_type.clone())
            .unwrap_or_default();
        serde_json::json!({ "name": name, "concept_type": concept_type })
    }
}

impl Default for InMemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthCheck for InMemoryGraphStore {
    async fn ping(&self) -> Result<(), BackendError> {
        self.check_online()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_concept(&self, concept: &Concept, updated_at: DateTime<Utc>) -> Result<(), BackendError> {
        self.check_online()?;
        // One write guard for the whole upsert keeps it atomic
        let mut nodes = self.nodes.write().await;

        for target in &concept.related {
            nodes.entry(target.clone()).or_insert_with(|| ConceptNode {
                concept: Concept::pending(target.clone()),
                updated_at,
            });
        }

        nodes.insert(
            concept.name.clone(),
            ConceptNode {
                concept: concept.clone(),
                updated_at,
            },
        );
        Ok(())
    }

    async fn find_concept(&self, name: &str) -> Result<Option<Concept>, BackendError> {
        self.check_online()?;
        let nodes = self.nodes.read().await;
        Ok(nodes.get(name).map(|node| node.concept.clone()))
    }

    async fn find_by_memory_id(&self, id: MemoryId) -> Result<Option<MemoryRecord>, BackendError> {
        self.check_online()?;
        let nodes = self.nodes.read().await;
        Ok(nodes
            .values()
            .find(|node| node.concept.memory_id == Some(id))
            .and_then(|node| node.concept.source.clone()))
    }

    async fn delete_by_memory_id(&self, id: MemoryId) -> Result<bool, BackendError> {
        self.check_online()?;
        let mut nodes = self.nodes.write().await;

        let removed: Vec<String> = nodes
            .values()
            .filter(|node| node.concept.memory_id == Some(id))
            .map(|node| node.concept.name.clone())
            .collect();

        for name in &removed {
            nodes.remove(name);
        }
        // Detach incoming edges as well
        for node in nodes.values_mut() {
            for name in &removed {
                node.concept.related.remove(name);
            }
        }
        Ok(!removed.is_empty())
    }

    async fn changed_since(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<ConceptChange>, BackendError> {
        self.check_online()?;
        let nodes = self.nodes.read().await;

        let mut changes: Vec<ConceptChange> = nodes
            .values()
            .filter(|node| node.updated_at > since)
            .map(|node| ConceptChange {
                name: node.concept.name.clone(),
                concept_type: node.concept.concept_type.clone(),
                description: node.concept.description.clone(),
                related: node.concept.related.iter().cloned().collect(),
                memory_id: node.concept.memory_id,
                updated_at: node.updated_at,
            })
            .collect();

        changes.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.name.cmp(&b.name)));
        changes.truncate(limit);
        Ok(changes)
    }

    async fn run_query(
        &self,
        query: &str,
        params: &HashMap<String, serde_json::Value>,
    ) -> Result<Vec<serde_json::Value>, BackendError> {
        self.check_online()?;
        let nodes = self.nodes.read().await;

        match query {
            q if q == queries::CONCEPT_BY_NAME => {
                let name = Self::string_param(params, "name")?;
                Ok(nodes
                    .get(&name)
                    .map(|node| {
                        let c = &node.concept;
                        vec![serde_json::json!({
                            "name": c.name,
                            "concept_type": c.concept_type,
                            "description": c.description,
                            "importance": c.importance,
                            "confidence": c.validation.confidence,
                        })]
                    })
                    .unwrap_or_default())
            }
            q if q == queries::RELATED_CONCEPTS => {
                let name = Self::string_param(params, "name")?;
                let related = Self::traverse(&nodes, &name, 1);
                Ok(related.iter().map(|r| Self::name_and_type(&nodes, r)).collect())
            }
            q if q == queries::CONCEPT_NEIGHBOURHOOD => {
                let name = Self::string_param(params, "name")?;
                let related = Self::traverse(&nodes, &name, 2);
                Ok(related.iter().map(|r| Self::name_and_type(&nodes, r)).collect())
            }
            q if q == queries::CONCEPTS_BY_TYPE => {
                let concept_type = Self::string_param(params, "type")?;
                let mut matching: Vec<&Concept> = nodes
                    .values()
                    .map(|node| &node.concept)
                    .filter(|c| c.concept_type == concept_type)
                    .collect();
                matching.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(matching
                    .into_iter()
                    .map(|c| {
                        serde_json::json!({
                            "name": c.name,
                            "concept_type": c.concept_type,
                            "description": c.description,
                        })
                    })
                    .collect())
            }
            other => Err(BackendError::Rejected(format!(
                "in-memory graph store cannot evaluate query: {}",
                other
            ))),
        }
    }
}
