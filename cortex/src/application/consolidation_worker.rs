// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Consolidation Worker - Background promotion of episodic records
//!
//! Periodically scans the episodic tier for unconsolidated records and
//! promotes them into the semantic tier in batches.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Drives `TwoTierMemory::consolidate` on a schedule

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::two_tier_memory::{ConsolidationReport, TwoTierMemory};
use crate::domain::config::ConsolidationConfig;
use crate::domain::{MemoryError, MemoryId};

/// Consolidation Worker - Background task
pub struct ConsolidationWorker {
    memory: Arc<TwoTierMemory>,
    config: ConsolidationConfig,
    shutdown_token: CancellationToken,
}

impl ConsolidationWorker {
    pub fn new(memory: Arc<TwoTierMemory>, config: ConsolidationConfig) -> Self {
        Self {
            memory,
            config,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Stop together with an outer token instead of a private one
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = token;
        self
    }

    /// Get a handle to trigger shutdown
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Start the worker background task
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run the worker loop with graceful shutdown support
    async fn run(&self) {
        if !self.config.enabled {
            info!("Consolidation worker is disabled");
            return;
        }

        info!(
            interval_secs = self.config.interval_secs,
            batch_size = self.config.batch_size,
            "Starting consolidation worker"
        );

        let mut tick = interval(Duration::from_secs(self.config.interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    debug!("Running consolidation cycle");

                    match self.consolidation_cycle().await {
                        Ok(Some(report)) => {
                            info!(
                                consolidated = report.consolidated_count(),
                                skipped = report.skipped_count(),
                                failed = report.failed_count(),
                                duration_ms = report.duration_ms,
                                "Consolidation cycle completed"
                            );
                        }
                        Ok(None) => debug!("Nothing to consolidate"),
                        Err(e) => {
                            warn!("Consolidation cycle failed: {}", e);
                        }
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received, stopping consolidation worker");
                    break;
                }
            }
        }

        info!("Consolidation worker stopped");
    }

    /// Consolidate one batch; `None` when the scan came back empty
    pub async fn consolidation_cycle(&self) -> Result<Option<ConsolidationReport>, MemoryError> {
        let pending = self.memory.scan_unconsolidated(self.config.batch_size).await?;
        if pending.is_empty() {
            return Ok(None);
        }

        let ids: Vec<MemoryId> = pending.iter().map(|record| record.id).collect();
        let report = self.memory.consolidate(&ids).await;

        for entry in report.entries.iter() {
            debug!(record_id = %entry.id, outcome = ?entry.outcome, "Consolidation outcome");
        }
        Ok(Some(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::two_tier_memory::MemoryOptions;
    use crate::domain::{GraphStore, MemoryKind, MemoryRecord, VectorStore};
    use crate::infrastructure::embedding_client::EmbeddingClient;
    use crate::infrastructure::in_memory::{InMemoryGraphStore, InMemoryVectorStore, StaticConnector};
    use crate::infrastructure::retry::RetryPolicy;

    fn memory() -> Arc<TwoTierMemory> {
        let vectors: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let graph: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
        Arc::new(TwoTierMemory::new(
            Arc::new(StaticConnector::new("memory", vectors)),
            Arc::new(StaticConnector::new("memory", graph)),
            Arc::new(EmbeddingClient::new(32)),
            MemoryOptions {
                retry: RetryPolicy::default().with_max_attempts(1),
                ..MemoryOptions::default()
            },
        ))
    }

    fn config(batch_size: usize) -> ConsolidationConfig {
        ConsolidationConfig {
            enabled: true,
            interval_secs: 1,
            batch_size,
            max_retries: 1,
            backoff_ms: 10,
        }
    }

    #[tokio::test]
    async fn test_cycle_consolidates_in_batches() {
        let memory = memory();
        for i in 0..3 {
            let record = MemoryRecord::new(format!("note {}", i), MemoryKind::Thread);
            assert!(memory.store(record, false, 0).await);
        }

        let worker = ConsolidationWorker::new(memory.clone(), config(2));

        let report = worker.consolidation_cycle().await.unwrap().unwrap();
        assert_eq!(report.consolidated_count(), 2);

        let report = worker.consolidation_cycle().await.unwrap().unwrap();
        assert_eq!(report.consolidated_count(), 1);

        assert!(worker.consolidation_cycle().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_worker_stops_on_shutdown() {
        let worker = Arc::new(ConsolidationWorker::new(memory(), config(10)));
        let token = worker.shutdown_token();
        let handle = worker.start();

        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker should stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_disabled_worker_returns_immediately() {
        let mut cfg = config(10);
        cfg.enabled = false;
        let worker = Arc::new(ConsolidationWorker::new(memory(), cfg));
        tokio::time::timeout(Duration::from_secs(5), worker.start())
            .await
            .expect("disabled worker exits")
            .unwrap();
    }
}
