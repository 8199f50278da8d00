// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Neo4j implementation of the semantic tier
//!
//! Concepts are `(:Concept {name})` nodes joined by `RELATED_TO` edges. The
//! upsert is a single Cypher statement so property update, edge replacement
//! and stub creation commit or fail together.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use neo4rs::{query, Graph, Query, Row};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::config::SemanticConfig;
use crate::domain::{
    BackendError, Concept, ConceptChange, Connector, GraphStore, HealthCheck, MemoryId, MemoryRecord,
    PENDING_CONCEPT_TYPE,
};

const UPSERT_CONCEPT: &str = "\
MERGE (c:Concept {name: $name})
SET c.type = $type,
    c.description = $description,
    c.importance = $importance,
    c.confidence = $confidence,
    c.supported_by = $supported_by,
    c.contradicted_by = $contradicted_by,
    c.needs_verification = $needs_verification,
    c.thread_id = $thread_id,
    c.memory_id = $memory_id,
    c.record_json = $record_json,
    c.updated_at = $updated_at
WITH c
OPTIONAL MATCH (c)-[old:RELATED_TO]->()
DELETE old
WITH DISTINCT c
UNWIND $related AS rel_name
MERGE (r:Concept {name: rel_name})
ON CREATE SET r.type = $pending_type, r.updated_at = $updated_at
MERGE (c)-[:RELATED_TO]->(r)";

const FIND_CONCEPT: &str = "\
MATCH (c:Concept {name: $name})
OPTIONAL MATCH (c)-[:RELATED_TO]->(r:Concept)
RETURN c.name AS name, c.type AS type, coalesce(c.description, '') AS description,
       coalesce(c.importance, 0.5) AS importance, coalesce(c.confidence, 1.0) AS confidence,
       coalesce(c.supported_by, []) AS supported_by,
       coalesce(c.contradicted_by, []) AS contradicted_by,
       coalesce(c.needs_verification, []) AS needs_verification,
       coalesce(c.thread_id, '') AS thread_id, coalesce(c.memory_id, '') AS memory_id,
       coalesce(c.record_json, '') AS record_json,
       collect(r.name) AS related";

const FIND_BY_MEMORY_ID: &str = "\
MATCH (c:Concept {memory_id: $memory_id})
RETURN coalesce(c.record_json, '') AS record_json
LIMIT 1";

const DELETE_BY_MEMORY_ID: &str = "\
MATCH (c:Concept {memory_id: $memory_id})
DETACH DELETE c
RETURN count(*) AS removed";

const CHANGED_SINCE: &str = "\
MATCH (c:Concept)
WHERE c.updated_at > $since
OPTIONAL MATCH (c)-[:RELATED_TO]->(r:Concept)
WITH c, collect(r.name) AS related
RETURN c.name AS name, c.type AS type, coalesce(c.description, '') AS description,
       related, coalesce(c.memory_id, '') AS memory_id, c.updated_at AS updated_at
ORDER BY updated_at ASC, name ASC
LIMIT $limit";

fn backend_error(e: impl std::fmt::Display) -> BackendError {
    BackendError::classify(e.to_string())
}

fn column<'a, T: Deserialize<'a>>(row: &'a Row, key: &str) -> Result<T, BackendError> {
    row.get::<T>(key)
        .map_err(|e| BackendError::Serialization(format!("column {}: {}", key, e)))
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

pub struct Neo4jGraphStore {
    graph: Graph,
}

impl Neo4jGraphStore {
    pub async fn new(uri: &str, user: &str, password: &str) -> Result<Self, BackendError> {
        let graph = Graph::new(uri, user, password).await.map_err(backend_error)?;
        Ok(Self { graph })
    }

    async fn fetch_rows(&self, q: Query) -> Result<Vec<Row>, BackendError> {
        let mut stream = self.graph.execute(q).await.map_err(backend_error)?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await.map_err(backend_error)? {
            rows.push(row);
        }
        Ok(rows)
    }

    fn upsert_query(concept: &Concept, updated_at: DateTime<Utc>) -> Result<Query, BackendError> {
        let record_json = match &concept.source {
            Some(record) => serde_json::to_string(record)?,
            None => String::new(),
        };
        let related: Vec<String> = concept.related.iter().cloned().collect();

        Ok(query(UPSERT_CONCEPT)
            .param("name", concept.name.clone())
            .param("type", concept.concept_type.clone())
            .param("description", concept.description.clone())
            .param("importance", concept.importance)
            .param("confidence", concept.validation.confidence)
            .param("supported_by", concept.validation.supported_by.clone())
            .param("contradicted_by", concept.validation.contradicted_by.clone())
            .param("needs_verification", concept.validation.needs_verification.clone())
            .param("thread_id", concept.thread_id.clone().unwrap_or_default())
            .param(
                "memory_id",
                concept.memory_id.map(|id| id.to_string()).unwrap_or_default(),
            )
            .param("record_json", record_json)
            .param("updated_at", updated_at.timestamp_millis())
            .param("related", related)
            .param("pending_type", PENDING_CONCEPT_TYPE))
    }
}

#[async_trait]
impl HealthCheck for Neo4jGraphStore {
    async fn ping(&self) -> Result<(), BackendError> {
        self.graph.run(query("RETURN 1")).await.map_err(backend_error)
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn upsert_concept(&self, concept: &Concept, updated_at: DateTime<Utc>) -> Result<(), BackendError> {
        let q = Self::upsert_query(concept, updated_at)?;
        self.graph.run(q).await.map_err(backend_error)
    }

    async fn find_concept(&self, name: &str) -> Result<Option<Concept>, BackendError> {
        let rows = self.fetch_rows(query(FIND_CONCEPT).param("name", name)).await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let mut concept = Concept::new(column::<String>(row, "name")?, column::<String>(row, "type")?)
            .with_description(column::<String>(row, "description")?)
            .with_related(column::<Vec<String>>(row, "related")?)
            .with_confidence(column::<f64>(row, "confidence")?);
        concept.importance = column::<f64>(row, "importance")?;
        concept.validation.supported_by = column(row, "supported_by")?;
        concept.validation.contradicted_by = column(row, "contradicted_by")?;
        concept.validation.needs_verification = column(row, "needs_verification")?;
        concept.thread_id = non_empty(column(row, "thread_id")?);
        concept.memory_id = non_empty(column(row, "memory_id")?).and_then(|id| id.parse().ok());
        concept.source = match non_empty(column(row, "record_json")?) {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        };
        Ok(Some(concept))
    }

    async fn find_by_memory_id(&self, id: MemoryId) -> Result<Option<MemoryRecord>, BackendError> {
        let rows = self
            .fetch_rows(query(FIND_BY_MEMORY_ID).param("memory_id", id.to_string()))
            .await?;
        match rows.first() {
            Some(row) => match non_empty(column(row, "record_json")?) {
                Some(json) => Ok(Some(serde_json::from_str(&json)?)),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    async fn delete_by_memory_id(&self, id: MemoryId) -> Result<bool, BackendError> {
        let rows = self
            .fetch_rows(query(DELETE_BY_MEMORY_ID).param("memory_id", id.to_string()))
            .await?;
        let removed = match rows.first() {
            Some(row) => column::<i64>(row, "removed")?,
            None => 0,
        };
        Ok(removed > 0)
    }

    async fn changed_since(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<ConceptChange>, BackendError> {
        let rows = self
            .fetch_rows(
                query(CHANGED_SINCE)
                    .param("since", since.timestamp_millis())
                    .param("limit", limit as i64),
            )
            .await?;

        rows.iter()
            .map(|row| {
                Ok(ConceptChange {
                    name: column(row, "name")?,
                    concept_type: column(row, "type")?,
                    description: column(row, "description")?,
                    related: column(row, "related")?,
                    memory_id: non_empty(column(row, "memory_id")?).and_then(|id| id.parse().ok()),
                    updated_at: from_millis(column(row, "updated_at")?),
                })
            })
            .collect()
    }

    async fn run_query(
        &self,
        cypher: &str,
        params: &HashMap<String, serde_json::Value>,
    ) -> Result<Vec<serde_json::Value>, BackendError> {
        let mut q = query(cypher);
        for (key, value) in params {
            q = match value {
                serde_json::Value::String(s) => q.param(key, s.clone()),
                serde_json::Value::Bool(b) => q.param(key, *b),
                serde_json::Value::Number(n) => match n.as_i64() {
                    Some(i) => q.param(key, i),
                    None => q.param(key, n.as_f64().unwrap_or_default()),
                },
                serde_json::Value::Array(items) => {
                    let strings: Vec<String> = items
                        .iter()
                        .map(|item| item.as_str().map(str::to_string).unwrap_or_else(|| item.to_string()))
                        .collect();
                    q.param(key, strings)
                }
                other => {
                    return Err(BackendError::Rejected(format!(
                        "unsupported parameter ${}: {}",
                        key, other
                    )))
                }
            };
        }

        let rows = self.fetch_rows(q).await?;
        rows.iter().map(|row| column::<serde_json::Value>(row, "row")).collect()
    }
}

/// Opens a new Bolt connection pool per connection attempt
pub struct Neo4jConnector {
    uri: String,
    user: String,
    password: String,
}

impl Neo4jConnector {
    pub fn new(uri: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn from_config(config: &SemanticConfig) -> Self {
        Self::new(config.uri.clone(), config.user.clone(), config.password.clone())
    }
}

#[async_trait]
impl Connector<dyn GraphStore> for Neo4jConnector {
    async fn connect(&self) -> Result<Arc<dyn GraphStore>, BackendError> {
        let store = Neo4jGraphStore::new(&self.uri, &self.user, &self.password).await?;
        Ok(Arc::new(store))
    }

    fn backend_name(&self) -> &str {
        "neo4j"
    }
}
