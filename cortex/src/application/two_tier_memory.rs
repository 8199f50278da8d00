// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Two-Tier Memory
//!
//! Facade over the episodic and semantic tiers. Owns one circuit breaker and
//! one retry executor per tier, an in-process pool per tier, and the shutdown
//! token every retry sleep races.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Idempotent writes, bounded cross-tier sync and consolidation
//!
//! ## Sync depth
//!
//! Writes carry an explicit `depth`. A read that syncs a record into the other
//! tier stores the copy with `depth + 1` and marks it `synced`, and synced
//! copies are never synced again. Writes deeper than [`MAX_STORE_DEPTH`] are
//! refused outright, so promote/demote loops cannot form.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::episodic_tier::EpisodicTier;
use crate::application::event_bus::{EventBus, NoopEventBus};
use crate::application::pool::MemoryPool;
use crate::application::semantic_tier::SemanticTier;
use crate::domain::config::CortexConfigSpec;
use crate::domain::{
    BackendError, BreakerSnapshot, BreakerState, CircuitBreaker, Clock, Concept, ConceptChange, Connector,
    GraphStore, MemoryError, MemoryEvent, MemoryId, MemoryRecord, SystemClock, Tier, VectorStore,
};
use crate::infrastructure::embedding_client::Embedder;
use crate::infrastructure::retry::{RetryExecutor, RetryPolicy};

/// Deepest write `store` accepts
pub const MAX_STORE_DEPTH: u32 = 3;

/// Reads at this depth or deeper no longer sync across tiers
pub const MAX_SYNC_DEPTH: u32 = 2;

/// Construction-time knobs for [`TwoTierMemory`]
#[derive(Clone)]
pub struct MemoryOptions {
    pub max_failures: u32,
    pub reset_timeout: Duration,
    pub retry: RetryPolicy,
    /// Attempt-bounded budget for concept writes during consolidation
    pub consolidation_retry: RetryPolicy,
    pub score_threshold: f32,
    pub clock: Arc<dyn Clock>,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            max_failures: 3,
            reset_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            consolidation_retry: RetryPolicy {
                max_wall_clock: Duration::MAX,
                base_interval: Duration::from_millis(500),
                ..RetryPolicy::default()
            }
            .with_max_attempts(3),
            score_threshold: 0.3,
            clock: Arc::new(SystemClock),
        }
    }
}

impl MemoryOptions {
    pub fn from_config(spec: &CortexConfigSpec) -> Self {
        let retry = RetryPolicy::from_config(&spec.retry);
        let consolidation_retry = RetryPolicy {
            max_wall_clock: Duration::MAX,
            base_interval: Duration::from_millis(spec.consolidation.backoff_ms),
            ..retry.clone()
        }
        .with_max_attempts(spec.consolidation.max_retries);

        Self {
            max_failures: spec.breaker.max_failures,
            reset_timeout: spec.breaker.reset_timeout(),
            retry,
            consolidation_retry,
            score_threshold: spec.episodic.score_threshold,
            clock: Arc::new(SystemClock),
        }
    }
}

/// Liveness of one tier plus its breaker
#[derive(Debug, Clone, Serialize)]
pub struct TierHealth {
    pub tier: Tier,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub breaker: BreakerSnapshot,
}

impl TierHealth {
    pub fn from_ping(tier: Tier, ping: Result<(), BackendError>, breaker: BreakerSnapshot) -> Self {
        Self {
            tier,
            reachable: ping.is_ok(),
            error: ping.err().map(|e| e.to_string()),
            breaker,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.reachable && self.breaker.state == BreakerState::Closed
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryHealth {
    pub episodic: TierHealth,
    pub semantic: TierHealth,
}

impl MemoryHealth {
    pub fn is_healthy(&self) -> bool {
        self.episodic.is_healthy() && self.semantic.is_healthy()
    }
}

/// What happened to one id in a consolidation batch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConsolidationOutcome {
    Consolidated { concept: String },
    /// Already promoted by an earlier batch
    AlreadyConsolidated,
    /// Not found in either tier
    Skipped,
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ConsolidationEntry {
    pub id: MemoryId,
    #[serde(flatten)]
    pub outcome: ConsolidationOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsolidationReport {
    pub entries: Vec<ConsolidationEntry>,
    pub duration_ms: u64,
}

impl ConsolidationReport {
    /// False as soon as any id failed to write; skipped ids do not count
    pub fn success(&self) -> bool {
        !self
            .entries
            .iter()
            .any(|e| matches!(e.outcome, ConsolidationOutcome::Failed { .. }))
    }

    pub fn outcome_of(&self, id: MemoryId) -> Option<&ConsolidationOutcome> {
        self.entries.iter().find(|e| e.id == id).map(|e| &e.outcome)
    }

    pub fn consolidated_count(&self) -> usize {
        self.count(|o| matches!(o, ConsolidationOutcome::Consolidated { .. }))
    }

    /// Skipped and already-consolidated ids
    pub fn skipped_count(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                ConsolidationOutcome::Skipped | ConsolidationOutcome::AlreadyConsolidated
            )
        })
    }

    pub fn failed_count(&self) -> usize {
        self.count(|o| matches!(o, ConsolidationOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&ConsolidationOutcome) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.outcome)).count()
    }
}

/// Changes in both tiers after a watermark
#[derive(Debug, Clone, Default)]
pub struct TierDeltas {
    pub episodic: Vec<MemoryRecord>,
    pub semantic: Vec<ConceptChange>,
}

impl TierDeltas {
    pub fn is_empty(&self) -> bool {
        self.episodic.is_empty() && self.semantic.is_empty()
    }

    /// Newest change timestamp across both tiers
    pub fn latest(&self) -> Option<DateTime<Utc>> {
        let episodic = self.episodic.iter().map(|r| r.updated_at);
        let semantic = self.semantic.iter().map(|c| c.updated_at);
        episodic.chain(semantic).max()
    }
}

pub struct TwoTierMemory {
    episodic: EpisodicTier,
    semantic: SemanticTier,
    episodic_pool: MemoryPool,
    semantic_pool: MemoryPool,
    events: Arc<dyn EventBus>,
    score_threshold: f32,
    shutdown: CancellationToken,
}

impl TwoTierMemory {
    pub fn new(
        vectors: Arc<dyn Connector<dyn VectorStore>>,
        graph: Arc<dyn Connector<dyn GraphStore>>,
        embedder: Arc<dyn Embedder>,
        options: MemoryOptions,
    ) -> Self {
        let shutdown = CancellationToken::new();

        let episodic_breaker = Arc::new(CircuitBreaker::with_clock(
            Tier::Episodic.as_str(),
            options.max_failures,
            options.reset_timeout,
            options.clock.clone(),
        ));
        let semantic_breaker = Arc::new(CircuitBreaker::with_clock(
            Tier::Semantic.as_str(),
            options.max_failures,
            options.reset_timeout,
            options.clock.clone(),
        ));

        let episodic = EpisodicTier::new(
            RetryExecutor::new(Tier::Episodic.as_str(), vectors, options.retry.clone(), shutdown.clone()),
            episodic_breaker,
            embedder,
        );
        let semantic = SemanticTier::new(
            RetryExecutor::new(Tier::Semantic.as_str(), graph, options.retry.clone(), shutdown.clone()),
            semantic_breaker,
            options.consolidation_retry.clone(),
        );

        Self {
            episodic,
            semantic,
            episodic_pool: MemoryPool::new(Tier::Episodic),
            semantic_pool: MemoryPool::new(Tier::Semantic),
            events: Arc::new(NoopEventBus),
            score_threshold: options.score_threshold,
            shutdown,
        }
    }

    pub fn with_event_bus(mut self, events: Arc<dyn EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn episodic_breaker(&self) -> &Arc<CircuitBreaker> {
        self.episodic.breaker()
    }

    pub fn semantic_breaker(&self) -> &Arc<CircuitBreaker> {
        self.semantic.breaker()
    }

    pub fn pool(&self, tier: Tier) -> &MemoryPool {
        match tier {
            Tier::Episodic => &self.episodic_pool,
            Tier::Semantic => &self.semantic_pool,
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Write a record into the tier named by `record.tier`
    ///
    /// Returns false when the write was refused or failed; the reason is
    /// logged. A repeat of the pooled payload is a no-op that returns true,
    /// unless it is a sync write or it promotes the record.
    pub async fn store(&self, mut record: MemoryRecord, is_sync_write: bool, depth: u32) -> bool {
        let tier = record.tier;

        if depth > MAX_STORE_DEPTH {
            warn!(record_id = %record.id, %tier, depth, "Refusing write beyond maximum sync depth");
            count_store(tier, "refused");
            return false;
        }
        if let Err(e) = record.validate() {
            warn!(record_id = %record.id, %tier, error = %e, "Rejecting invalid record");
            count_store(tier, "invalid");
            return false;
        }

        record.metadata.synced = Some(is_sync_write);
        record.metadata.sync_depth = depth;

        let pool = self.pool(tier);
        if let Some(existing) = pool.get(record.id) {
            let promotes = record.metadata.consolidated && !existing.metadata.consolidated;
            record.metadata.consolidated |= existing.metadata.consolidated;

            if !is_sync_write && !promotes && existing.same_payload(&record.content, &record.kind) {
                debug!(record_id = %record.id, %tier, "Identical record already stored, skipping write");
                count_store(tier, "deduplicated");
                return true;
            }
        }

        record.updated_at = Utc::now();

        let concept = match tier {
            Tier::Episodic => None,
            Tier::Semantic => Some(Concept::from_record(&record)),
        };
        let result = match &concept {
            None => self.episodic.store_vector(&record).await,
            Some(concept) => self.semantic.upsert_concept(concept).await,
        };

        if let Err(e) = result {
            let outcome = if e.is_circuit_open() { "circuit_open" } else { "failed" };
            warn!(record_id = %record.id, %tier, depth, error = %e, "Memory write failed");
            count_store(tier, outcome);
            return false;
        }

        count_store(tier, "stored");
        debug!(record_id = %record.id, %tier, depth, synced = is_sync_write, "Memory stored");

        let event = MemoryEvent::MemoryStored {
            record_id: record.id,
            tier,
            kind: record.kind.clone(),
            synced: is_sync_write,
            sync_depth: depth,
            timestamp: record.updated_at,
        };
        pool.upsert(record);
        self.events.publish(event).await;
        if let Some(concept) = concept {
            self.publish_concept(&concept).await;
        }
        true
    }

    /// Look a record up in the pools, then the semantic tier, then the episodic tier
    ///
    /// With `sync_across_tiers`, a record found in one backend is copied into
    /// the other tier unless it is itself a synced copy or `depth` has reached
    /// [`MAX_SYNC_DEPTH`].
    pub async fn get(&self, id: MemoryId, sync_across_tiers: bool, depth: u32) -> Option<MemoryRecord> {
        if let Some(record) = self.semantic_pool.get(id).or_else(|| self.episodic_pool.get(id)) {
            return Some(record);
        }

        let mut found = match self.semantic.find_memory(id).await {
            Ok(Some(record)) => {
                self.semantic_pool.upsert(record.clone());
                Some(record)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(record_id = %id, tier = "semantic", error = %e, "Lookup failed");
                None
            }
        };

        if found.is_none() {
            found = self.fetch_episodic(id).await;
        }

        let record = found?;
        if sync_across_tiers && !record.metadata.is_synced() && depth < MAX_SYNC_DEPTH {
            let target = record.tier.other();
            let copy = record.clone().with_tier(target);
            if !self.store(copy, true, depth + 1).await {
                debug!(record_id = %id, %target, "Cross-tier sync did not complete");
            }
        }
        Some(record)
    }

    /// Promote each record into the semantic tier
    ///
    /// Every id is attempted; failures are reported per id and never stop the
    /// batch.
    pub async fn consolidate(&self, ids: &[MemoryId]) -> ConsolidationReport {
        let started = Instant::now();
        let mut report = ConsolidationReport::default();

        for &id in ids {
            let outcome = self.consolidate_one(id).await;
            match &outcome {
                ConsolidationOutcome::Consolidated { concept } => {
                    debug!(record_id = %id, concept = %concept, "Record consolidated");
                }
                ConsolidationOutcome::AlreadyConsolidated => {
                    debug!(record_id = %id, "Record already consolidated");
                }
                ConsolidationOutcome::Skipped => {
                    info!(record_id = %id, "Record not found, skipped consolidation");
                }
                ConsolidationOutcome::Failed { reason } => {
                    warn!(record_id = %id, reason = %reason, "Consolidation failed");
                }
            }
            report.entries.push(ConsolidationEntry { id, outcome });
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        self.events
            .publish(MemoryEvent::ConsolidationCompleted {
                consolidated: report.consolidated_count(),
                skipped: report.skipped_count(),
                failed: report.failed_count(),
                duration_ms: report.duration_ms,
                timestamp: Utc::now(),
            })
            .await;
        report
    }

    /// The episodic copy is authoritative for the consolidated flag; a record
    /// only the semantic tier knows is promoted in place.
    async fn consolidate_one(&self, id: MemoryId) -> ConsolidationOutcome {
        let record = match self.episodic_pool.get(id) {
            Some(record) => Some(record),
            None => self.fetch_episodic(id).await,
        };
        let record = match record {
            Some(record) => record,
            None => match self.get(id, false, 0).await {
                Some(record) => record,
                None => return ConsolidationOutcome::Skipped,
            },
        };
        if record.metadata.consolidated {
            return ConsolidationOutcome::AlreadyConsolidated;
        }

        // A synced semantic copy stands in for an episodic original
        let target = if record.tier == Tier::Semantic && !record.metadata.is_synced() {
            Tier::Semantic
        } else {
            Tier::Episodic
        };

        let mut promoted = record;
        promoted.metadata.consolidated = true;
        promoted.updated_at = Utc::now();
        let concept = Concept::from_record(&promoted);

        if let Err(e) = self.semantic.consolidate_concept(&concept).await {
            return ConsolidationOutcome::Failed { reason: e.to_string() };
        }
        if let Some(source) = &concept.source {
            self.semantic_pool.upsert(source.clone());
        }
        self.publish_concept(&concept).await;

        if !self.store(promoted.with_tier(target), false, 0).await {
            return ConsolidationOutcome::Failed {
                reason: "concept written but record could not be marked consolidated".to_string(),
            };
        }

        self.events
            .publish(MemoryEvent::MemoryConsolidated {
                record_id: id,
                concept: concept.name.clone(),
                timestamp: Utc::now(),
            })
            .await;
        ConsolidationOutcome::Consolidated { concept: concept.name }
    }

    async fn fetch_episodic(&self, id: MemoryId) -> Option<MemoryRecord> {
        match self.episodic.find_by_id(id).await {
            Ok(Some(record)) => {
                self.episodic_pool.upsert(record.clone());
                Some(record)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(record_id = %id, tier = "episodic", error = %e, "Lookup failed");
                None
            }
        }
    }

    /// Remove a record from both tiers and both pools
    ///
    /// Pools are cleared even when a backend refuses; the first backend error
    /// is returned.
    pub async fn delete(&self, id: MemoryId) -> Result<bool, MemoryError> {
        let episodic = self.episodic.delete(id).await;
        let semantic = self.semantic.delete_memory(id).await;
        let pooled = self.episodic_pool.remove(id) | self.semantic_pool.remove(id);

        let removed = episodic? | semantic? | pooled;
        if removed {
            info!(record_id = %id, "Memory deleted");
            self.events
                .publish(MemoryEvent::MemoryDeleted {
                    record_id: id,
                    timestamp: Utc::now(),
                })
                .await;
        }
        Ok(removed)
    }

    /// Similarity search over the episodic tier
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        score_threshold: Option<f32>,
    ) -> Result<Vec<MemoryRecord>, MemoryError> {
        let threshold = score_threshold.unwrap_or(self.score_threshold);
        self.episodic.search_vectors(query, &[], limit, Some(threshold)).await
    }

    pub async fn scan_unconsolidated(&self, limit: usize) -> Result<Vec<MemoryRecord>, MemoryError> {
        self.episodic.scan_unconsolidated(limit).await
    }

    /// Both tiers' changes after `since`, at most `limit` per tier
    pub async fn poll_deltas(&self, since: DateTime<Utc>, limit: usize) -> Result<TierDeltas, MemoryError> {
        let episodic = self.episodic_changes(since, limit).await?;
        let semantic = self.semantic_changes(since, limit).await?;
        Ok(TierDeltas { episodic, semantic })
    }

    /// Episodic records written after `since`, oldest first
    pub async fn episodic_changes(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<MemoryRecord>, MemoryError> {
        self.episodic.changed_since(since, limit).await
    }

    /// Concepts written after `since`, oldest first
    pub async fn semantic_changes(&self, since: DateTime<Utc>, limit: usize) -> Result<Vec<ConceptChange>, MemoryError> {
        self.semantic.changed_since(since, limit).await
    }

    pub async fn query_graph(
        &self,
        query: &str,
        params: &HashMap<String, serde_json::Value>,
    ) -> Result<Vec<serde_json::Value>, MemoryError> {
        self.semantic.run_query(query, params).await
    }

    pub async fn find_concept(&self, name: &str) -> Result<Option<Concept>, MemoryError> {
        self.semantic.find_concept(name).await
    }

    pub async fn health(&self) -> MemoryHealth {
        let (episodic, semantic) = tokio::join!(self.episodic.health(), self.semantic.health());
        MemoryHealth { episodic, semantic }
    }

    /// Abort in-flight retries and drop both pools
    pub fn close(&self) {
        self.shutdown.cancel();
        self.episodic_pool.clear();
        self.semantic_pool.clear();
        info!("Two-tier memory closed");
    }

    async fn publish_concept(&self, concept: &Concept) {
        self.events
            .publish(MemoryEvent::ConceptUpserted {
                name: concept.name.clone(),
                concept_type: concept.concept_type.clone(),
                related: concept.related.iter().cloned().collect(),
                memory_id: concept.memory_id,
                timestamp: Utc::now(),
            })
            .await;
    }
}

fn count_store(tier: Tier, outcome: &'static str) {
    metrics::counter!("strata_store_total", "tier" => tier.as_str(), "outcome" => outcome).increment(1);
}
