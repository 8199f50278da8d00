// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Qdrant production implementation of the episodic tier
//!
//! Each record is one point keyed by its id. The payload carries the fields
//! the tier filters on plus the full record as JSON.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements `VectorStore` over qdrant-client

use async_trait::async_trait;
use qdrant_client::{
    qdrant::{
        value::Kind, Condition, CreateCollectionBuilder, CreateFieldIndexCollectionBuilder,
        DeletePointsBuilder, Direction, Distance, FieldType, Filter, GetPointsBuilder, OrderByBuilder,
        PointId, PointStruct, Range, ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder,
        Value, VectorParamsBuilder,
    },
    Qdrant,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::domain::config::EpisodicConfig;
use crate::domain::{
    BackendError, Connector, FieldFilter, HealthCheck, MemoryId, MemoryRecord, ScoredRecord, VectorStore,
};

fn backend_error(e: impl std::fmt::Display) -> BackendError {
    BackendError::classify(e.to_string())
}

pub struct QdrantVectorStore {
    client: Qdrant,
    collection: String,
    vector_dim: usize,
}

impl QdrantVectorStore {
    /// Create a new Qdrant-backed vector store
    pub fn new(url: &str, collection: impl Into<String>, vector_dim: usize) -> Result<Self, BackendError> {
        let client = Qdrant::from_url(url).build().map_err(backend_error)?;
        Ok(Self {
            client,
            collection: collection.into(),
            vector_dim,
        })
    }

    /// Create the collection and the `updated_at` index if missing
    pub async fn initialize(&self) -> Result<(), BackendError> {
        let exists = self
            .client
            .collection_exists(&self.collection)
            .await
            .map_err(backend_error)?;

        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection)
                        .vectors_config(VectorParamsBuilder::new(self.vector_dim as u64, Distance::Cosine)),
                )
                .await
                .map_err(backend_error)?;

            // Ordered scrolls need an index on the sort key
            self.client
                .create_field_index(CreateFieldIndexCollectionBuilder::new(
                    &self.collection,
                    "updated_at",
                    FieldType::Integer,
                ))
                .await
                .map_err(backend_error)?;

            info!(collection = %self.collection, dim = self.vector_dim, "Created Qdrant collection");
        }
        Ok(())
    }

    fn record_to_payload(record: &MemoryRecord) -> Result<HashMap<String, Value>, BackendError> {
        let mut payload = HashMap::new();
        payload.insert("record_id".to_string(), record.id.to_string().into());
        payload.insert("tier".to_string(), record.tier.as_str().to_string().into());
        payload.insert("kind".to_string(), record.kind.as_str().to_string().into());
        payload.insert("consolidated".to_string(), record.metadata.consolidated.into());
        payload.insert("importance".to_string(), record.importance.into());
        payload.insert("updated_at".to_string(), record.updated_at.timestamp_millis().into());
        payload.insert("record_json".to_string(), serde_json::to_string(record)?.into());
        Ok(payload)
    }

    fn payload_to_record(payload: &HashMap<String, Value>) -> Result<MemoryRecord, BackendError> {
        match payload.get("record_json").and_then(|v| v.kind.as_ref()) {
            Some(Kind::StringValue(json)) => Ok(serde_json::from_str(json)?),
            _ => Err(BackendError::Serialization(
                "point payload is missing record_json".to_string(),
            )),
        }
    }

    fn build_filter(filters: &[FieldFilter]) -> Option<Filter> {
        if filters.is_empty() {
            return None;
        }
        let conditions: Vec<Condition> = filters
            .iter()
            .map(|filter| match filter {
                FieldFilter::RecordId(id) => Condition::matches("record_id", id.to_string()),
                FieldFilter::Tier(tier) => Condition::matches("tier", tier.as_str().to_string()),
                FieldFilter::Kind(kind) => Condition::matches("kind", kind.as_str().to_string()),
                FieldFilter::Consolidated(flag) => Condition::matches("consolidated", *flag),
                FieldFilter::UpdatedAfter(ts) => Condition::range(
                    "updated_at",
                    Range {
                        gt: Some(ts.timestamp_millis() as f64),
                        ..Default::default()
                    },
                ),
            })
            .collect();
        Some(Filter::must(conditions))
    }
}

#[async_trait]
impl HealthCheck for QdrantVectorStore {
    async fn ping(&self) -> Result<(), BackendError> {
        self.client.health_check().await.map_err(backend_error)?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn upsert(&self, record: &MemoryRecord, embedding: Vec<f32>) -> Result<(), BackendError> {
        if embedding.len() != self.vector_dim {
            return Err(BackendError::Rejected(format!(
                "Invalid embedding dimension: expected {}, got {}",
                self.vector_dim,
                embedding.len()
            )));
        }

        let payload = Self::record_to_payload(record)?;
        let point = PointStruct::new(record.id.to_string(), embedding, payload);

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, vec![point]).wait(true))
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    async fn search(
        &self,
        embedding: Vec<f32>,
        filters: &[FieldFilter],
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<ScoredRecord>, BackendError> {
        let mut builder =
            SearchPointsBuilder::new(&self.collection, embedding, limit as u64).with_payload(true);
        if let Some(filter) = Self::build_filter(filters) {
            builder = builder.filter(filter);
        }
        if let Some(threshold) = score_threshold {
            builder = builder.score_threshold(threshold);
        }

        let response = self.client.search_points(builder).await.map_err(backend_error)?;

        response
            .result
            .into_iter()
            .map(|point| {
                Ok(ScoredRecord {
                    record: Self::payload_to_record(&point.payload)?,
                    score: point.score,
                })
            })
            .collect()
    }

    async fn scroll(&self, filters: &[FieldFilter], limit: usize) -> Result<Vec<MemoryRecord>, BackendError> {
        let mut builder = ScrollPointsBuilder::new(&self.collection)
            .with_payload(true)
            .limit(limit as u32)
            .order_by(OrderByBuilder::new("updated_at").direction(Direction::Asc as i32));
        if let Some(filter) = Self::build_filter(filters) {
            builder = builder.filter(filter);
        }

        let response = self.client.scroll(builder).await.map_err(backend_error)?;

        response
            .result
            .iter()
            .map(|point| Self::payload_to_record(&point.payload))
            .collect()
    }

    async fn delete(&self, id: MemoryId) -> Result<bool, BackendError> {
        let point_id = PointId::from(id.to_string());

        let existing = self
            .client
            .get_points(GetPointsBuilder::new(&self.collection, vec![point_id.clone()]))
            .await
            .map_err(backend_error)?;
        if existing.result.is_empty() {
            return Ok(false);
        }

        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(vec![point_id])
                    .wait(true),
            )
            .await
            .map_err(backend_error)?;
        Ok(true)
    }
}

/// Builds a fresh Qdrant client per connection attempt
pub struct QdrantConnector {
    url: String,
    collection: String,
    vector_dim: usize,
}

impl QdrantConnector {
    pub fn new(url: impl Into<String>, collection: impl Into<String>, vector_dim: usize) -> Self {
        Self {
            url: url.into(),
            collection: collection.into(),
            vector_dim,
        }
    }

    pub fn from_config(config: &EpisodicConfig) -> Self {
        Self::new(config.url.clone(), config.collection.clone(), config.vector_dim)
    }
}

#[async_trait]
impl Connector<dyn VectorStore> for QdrantConnector {
    async fn connect(&self) -> Result<Arc<dyn VectorStore>, BackendError> {
        let store = QdrantVectorStore::new(&self.url, self.collection.clone(), self.vector_dim)?;
        store.initialize().await?;
        Ok(Arc::new(store))
    }

    fn backend_name(&self) -> &str {
        "qdrant"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MemoryKind, Tier};

    const VECTOR_DIM: usize = 8;

    #[test]
    fn test_payload_round_trip() {
        let record = MemoryRecord::new("deploy notes", MemoryKind::Interaction).with_importance(0.7);
        let payload = QdrantVectorStore::record_to_payload(&record).unwrap();

        assert!(payload.contains_key("record_id"));
        assert!(payload.contains_key("updated_at"));
        let parsed = QdrantVectorStore::payload_to_record(&payload).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_missing_record_json_is_serialization_error() {
        let payload = HashMap::new();
        assert!(matches!(
            QdrantVectorStore::payload_to_record(&payload),
            Err(BackendError::Serialization(_))
        ));
    }

    #[test]
    fn test_empty_filters_build_no_filter() {
        assert!(QdrantVectorStore::build_filter(&[]).is_none());
        let filter = QdrantVectorStore::build_filter(&[
            FieldFilter::Tier(Tier::Episodic),
            FieldFilter::Consolidated(false),
        ])
        .unwrap();
        assert_eq!(filter.must.len(), 2);
    }

    #[tokio::test]
    #[ignore] // Requires running Qdrant instance
    async fn test_store_search_delete() {
        let connector = QdrantConnector::new("http://localhost:6334", "strata_test", VECTOR_DIM);
        let store = connector.connect().await.expect("Failed to connect");

        let record = MemoryRecord::new("qdrant smoke test", MemoryKind::Thread);
        let embedding = vec![0.1; VECTOR_DIM];
        store.upsert(&record, embedding.clone()).await.expect("Failed to upsert");

        let hits = store
            .search(embedding, &[FieldFilter::RecordId(record.id)], 5, None)
            .await
            .expect("Failed to search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.id, record.id);

        assert!(store.delete(record.id).await.expect("Failed to delete"));
        assert!(!store.delete(record.id).await.expect("Failed to delete"));
    }
}
