// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Semantic Tier
//!
//! Long-term, relationship-aware memory backed by a `GraphStore`.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Breaker-gated, retry-wrapped access to the concept graph

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::application::two_tier_memory::TierHealth;
use crate::domain::{
    CircuitBreaker, Concept, ConceptChange, GraphStore, MemoryError, MemoryId, MemoryRecord, Tier,
};
use crate::infrastructure::retry::{RetryExecutor, RetryPolicy};

pub struct SemanticTier {
    executor: RetryExecutor<dyn GraphStore>,
    breaker: Arc<CircuitBreaker>,
    /// Attempt-bounded budget used when consolidating
    consolidation_policy: RetryPolicy,
}

impl SemanticTier {
    pub fn new(
        executor: RetryExecutor<dyn GraphStore>,
        breaker: Arc<CircuitBreaker>,
        consolidation_policy: RetryPolicy,
    ) -> Self {
        Self {
            executor,
            breaker,
            consolidation_policy,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Create or update a concept and replace its outgoing edges
    pub async fn upsert_concept(&self, concept: &Concept) -> Result<(), MemoryError> {
        let policy = self.executor.policy().clone();
        self.write_concept("upsert_concept", concept, &policy).await
    }

    /// Same write as [`upsert_concept`](Self::upsert_concept) under the consolidation budget
    pub async fn consolidate_concept(&self, concept: &Concept) -> Result<(), MemoryError> {
        let policy = self.consolidation_policy.clone();
        self.write_concept("consolidate_concept", concept, &policy).await
    }

    async fn write_concept(&self, operation: &str, concept: &Concept, policy: &RetryPolicy) -> Result<(), MemoryError> {
        concept.validate()?;
        if !self.breaker.allow() {
            return Err(MemoryError::CircuitOpen { tier: Tier::Semantic });
        }

        let updated_at = Utc::now();
        let result = self
            .executor
            .execute_with(policy, operation, |graph| async move {
                graph.upsert_concept(concept, updated_at).await
            })
            .await;

        self.breaker.record_result(&result);
        result
    }

    /// Generic read path; an open circuit yields no rows
    pub async fn run_query(
        &self,
        query: &str,
        params: &HashMap<String, serde_json::Value>,
    ) -> Result<Vec<serde_json::Value>, MemoryError> {
        if !self.breaker.allow() {
            debug!(tier = "semantic", "Circuit open, query skipped");
            return Ok(Vec::new());
        }
        let result = self
            .executor
            .execute("run_query", |graph| async move { graph.run_query(query, params).await })
            .await;
        self.breaker.record_result(&result);
        result
    }

    pub async fn find_concept(&self, name: &str) -> Result<Option<Concept>, MemoryError> {
        if !self.breaker.allow() {
            return Ok(None);
        }
        let result = self
            .executor
            .execute("find_concept", |graph| async move { graph.find_concept(name).await })
            .await;
        self.breaker.record_result(&result);
        result
    }

    /// Record snapshot stored with the concept promoted from `id`
    pub async fn find_memory(&self, id: MemoryId) -> Result<Option<MemoryRecord>, MemoryError> {
        if !self.breaker.allow() {
            debug!(tier = "semantic", %id, "Circuit open, lookup skipped");
            return Ok(None);
        }
        let result = self
            .executor
            .execute("find_memory", |graph| async move { graph.find_by_memory_id(id).await })
            .await;
        self.breaker.record_result(&result);
        result
    }

    pub async fn changed_since(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<ConceptChange>, MemoryError> {
        if !self.breaker.allow() {
            return Ok(Vec::new());
        }
        let result = self
            .executor
            .execute("changed_since", |graph| async move { graph.changed_since(since, limit).await })
            .await;
        self.breaker.record_result(&result);
        result
    }

    pub async fn delete_memory(&self, id: MemoryId) -> Result<bool, MemoryError> {
        if !self.breaker.allow() {
            return Err(MemoryError::CircuitOpen { tier: Tier::Semantic });
        }
        let result = self
            .executor
            .execute("delete_memory", |graph| async move { graph.delete_by_memory_id(id).await })
            .await;
        self.breaker.record_result(&result);
        result
    }

    pub async fn health(&self) -> TierHealth {
        TierHealth::from_ping(Tier::Semantic, self.executor.ping().await, self.breaker.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::queries;
    use crate::domain::{BackendError, Connector, HealthCheck, MemoryKind};
    use crate::infrastructure::in_memory::{InMemoryGraphStore, StaticConnector};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn tier_over(graph: Arc<dyn GraphStore>, max_failures: u32) -> SemanticTier {
        let connector: Arc<dyn Connector<dyn GraphStore>> = Arc::new(StaticConnector::new("memory", graph));
        let executor = RetryExecutor::new(
            "semantic",
            connector,
            RetryPolicy::default().with_max_attempts(1),
            CancellationToken::new(),
        );
        SemanticTier::new(
            executor,
            Arc::new(CircuitBreaker::new("semantic", max_failures, Duration::from_secs(60))),
            RetryPolicy {
                base_interval: Duration::from_millis(10),
                ..RetryPolicy::default()
            }
            .with_max_attempts(3),
        )
    }

    /// Loses the connection for the first `failures` writes
    struct FlakyGraph {
        inner: InMemoryGraphStore,
        failures: AtomicU32,
        writes: AtomicU32,
    }

    #[async_trait]
    impl HealthCheck for FlakyGraph {
        async fn ping(&self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    #[async_trait]
    impl GraphStore for FlakyGraph {
        async fn upsert_concept(&self, concept: &Concept, updated_at: DateTime<Utc>) -> Result<(), BackendError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(BackendError::ConnectionLost("bolt reset".into()));
            }
            self.inner.upsert_concept(concept, updated_at).await
        }
        async fn find_concept(&self, name: &str) -> Result<Option<Concept>, BackendError> {
            self.inner.find_concept(name).await
        }
        async fn find_by_memory_id(&self, id: MemoryId) -> Result<Option<MemoryRecord>, BackendError> {
            self.inner.find_by_memory_id(id).await
        }
        async fn delete_by_memory_id(&self, id: MemoryId) -> Result<bool, BackendError> {
            self.inner.delete_by_memory_id(id).await
        }
        async fn changed_since(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<ConceptChange>, BackendError> {
            self.inner.changed_since(since, limit).await
        }
        async fn run_query(
            &self,
            query: &str,
            params: &HashMap<String, serde_json::Value>,
        ) -> Result<Vec<serde_json::Value>, BackendError> {
            self.inner.run_query(query, params).await
        }
    }

    #[tokio::test]
    async fn test_upsert_and_query() {
        let graph = Arc::new(InMemoryGraphStore::new());
        let tier = tier_over(graph.clone(), 3);

        let concept = Concept::new("observability", "topic").with_related(["tracing", "metrics"]);
        tier.upsert_concept(&concept).await.unwrap();

        let params = HashMap::from([("name".to_string(), serde_json::json!("observability"))]);
        let rows = tier.run_query(queries::RELATED_CONCEPTS, &params).await.unwrap();
        assert_eq!(rows.len(), 2);

        let stub = tier.find_concept("tracing").await.unwrap().unwrap();
        assert!(stub.is_pending());
    }

    #[tokio::test]
    async fn test_malformed_concept_rejected_locally() {
        let graph = Arc::new(InMemoryGraphStore::new());
        let tier = tier_over(graph.clone(), 3);

        let concept = Concept::new("loop", "topic").with_related(["loop"]);
        assert!(matches!(
            tier.upsert_concept(&concept).await,
            Err(MemoryError::Validation(_))
        ));
        assert!(graph.is_empty().await);
        assert_eq!(tier.breaker().failure_count(), 0);
    }

    #[tokio::test]
    async fn test_consolidation_budget_retries_independently() {
        let flaky = Arc::new(FlakyGraph {
            inner: InMemoryGraphStore::new(),
            failures: AtomicU32::new(2),
            writes: AtomicU32::new(0),
        });
        let tier = tier_over(flaky.clone(), 3);

        let record = MemoryRecord::new("promote me", MemoryKind::Interaction);
        let concept = Concept::from_record(&record);

        // General budget here allows one attempt only
        assert!(tier.upsert_concept(&concept).await.is_err());
        flaky.failures.store(2, Ordering::SeqCst);
        flaky.writes.store(0, Ordering::SeqCst);

        tier.consolidate_concept(&concept).await.unwrap();
        assert_eq!(flaky.writes.load(Ordering::SeqCst), 3);
        assert!(tier.find_memory(record.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_open_breaker_reads_empty_writes_fail() {
        let graph = Arc::new(InMemoryGraphStore::new());
        let tier = tier_over(graph.clone(), 1);
        graph.set_online(false);

        assert!(tier.upsert_concept(&Concept::new("a", "t")).await.is_err());
        graph.set_online(true);

        assert!(matches!(
            tier.upsert_concept(&Concept::new("a", "t")).await,
            Err(MemoryError::CircuitOpen { tier: Tier::Semantic })
        ));
        assert!(tier.find_memory(MemoryId::new()).await.unwrap().is_none());
        assert!(tier.changed_since(Utc::now(), 10).await.unwrap().is_empty());
        assert!(graph.is_empty().await);
    }
}
