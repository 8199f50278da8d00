// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Episodic Tier
//!
//! Short-term, similarity-searchable memory backed by a `VectorStore`.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Breaker-gated, retry-wrapped access to the vector store
//!
//! Every call first asks the tier's circuit breaker. A refused write fails
//! with `CircuitOpen`; a refused read returns nothing. Neither touches the
//! network.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::application::two_tier_memory::TierHealth;
use crate::domain::{
    CircuitBreaker, FieldFilter, MemoryError, MemoryId, MemoryRecord, ScoredRecord, Tier, VectorStore,
};
use crate::infrastructure::embedding_client::Embedder;
use crate::infrastructure::retry::RetryExecutor;

pub struct EpisodicTier {
    executor: RetryExecutor<dyn VectorStore>,
    breaker: Arc<CircuitBreaker>,
    embedder: Arc<dyn Embedder>,
}

impl EpisodicTier {
    pub fn new(
        executor: RetryExecutor<dyn VectorStore>,
        breaker: Arc<CircuitBreaker>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            executor,
            breaker,
            embedder,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub async fn store_vector(&self, record: &MemoryRecord) -> Result<(), MemoryError> {
        record.validate()?;
        if !self.breaker.allow() {
            return Err(MemoryError::CircuitOpen { tier: Tier::Episodic });
        }

        let result: Result<(), MemoryError> = async {
            let embedding = self.embedder.embed(&record.content.as_text()).await?;
            self.executor
                .execute("store_vector", |store| {
                    let embedding = embedding.clone();
                    async move { store.upsert(record, embedding).await }
                })
                .await
        }
        .await;

        self.breaker.record_result(&result);
        result
    }

    /// Similarity search over record text, best match first
    pub async fn search_vectors(
        &self,
        query: &str,
        filters: &[FieldFilter],
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        if !self.breaker.allow() {
            debug!(tier = "episodic", "Circuit open, search skipped");
            return Ok(Vec::new());
        }

        let result: Result<Vec<ScoredRecord>, MemoryError> = async {
            let embedding = self.embedder.embed(query).await?;
            self.executor
                .execute("search_vectors", |store| {
                    let embedding = embedding.clone();
                    async move { store.search(embedding, filters, limit, score_threshold).await }
                })
                .await
        }
        .await;

        self.breaker.record_result(&result);
        Ok(result?.into_iter().map(|hit| hit.record).collect())
    }

    /// Exact lookup by id through a payload filter
    pub async fn find_by_id(&self, id: MemoryId) -> Result<Option<MemoryRecord>, MemoryError> {
        let records = self.scroll("find_by_id", vec![FieldFilter::RecordId(id)], 1).await?;
        Ok(records.into_iter().next())
    }

    pub async fn scan_unconsolidated(&self, limit: usize) -> Result<Vec<MemoryRecord>, MemoryError> {
        self.scroll("scan_unconsolidated", vec![FieldFilter::Consolidated(false)], limit)
            .await
    }

    /// Records written after `since`, oldest first
    pub async fn changed_since(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<MemoryRecord>, MemoryError> {
        self.scroll("changed_since", vec![FieldFilter::UpdatedAfter(since)], limit)
            .await
    }

    pub async fn delete(&self, id: MemoryId) -> Result<bool, MemoryError> {
        if !self.breaker.allow() {
            return Err(MemoryError::CircuitOpen { tier: Tier::Episodic });
        }
        let result = self
            .executor
            .execute("delete_vector", |store| async move { store.delete(id).await })
            .await;
        self.breaker.record_result(&result);
        result
    }

    pub async fn health(&self) -> TierHealth {
        TierHealth::from_ping(Tier::Episodic, self.executor.ping().await, self.breaker.snapshot())
    }

    async fn scroll(
        &self,
        operation: &str,
        filters: Vec<FieldFilter>,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        if !self.breaker.allow() {
            debug!(tier = "episodic", operation, "Circuit open, read skipped");
            return Ok(Vec::new());
        }
        let filters = &filters;
        let result = self
            .executor
            .execute(operation, |store| async move { store.scroll(filters, limit).await })
            .await;
        self.breaker.record_result(&result);
        result
    }
}
