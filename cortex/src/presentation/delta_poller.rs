// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Delta Poller - Background republish of tier changes
//!
//! Reads both tiers for changes after a per-tier watermark and broadcasts them
//! to the `graph` connection class: episodic records as `memory_update`,
//! concepts as `graph_update`. Catches writes made by other processes that
//! never went through this node's event bus.
//!
//! # Architecture
//!
//! - **Layer:** Presentation Layer
//! - **Purpose:** Periodic fan-out of backend deltas to live observers

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::two_tier_memory::TwoTierMemory;
use crate::domain::config::HubConfig;
use crate::domain::MemoryError;
use crate::presentation::connection_manager::{ConnectionClass, ConnectionManager};
use crate::presentation::envelope::{Envelope, EnvelopeType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Watermarks {
    episodic: DateTime<Utc>,
    semantic: DateTime<Utc>,
}

pub struct DeltaPoller {
    memory: Arc<TwoTierMemory>,
    hub: Arc<ConnectionManager>,
    poll_interval: Duration,
    error_backoff: Duration,
    batch: usize,
    watermarks: Mutex<Watermarks>,
    shutdown_token: CancellationToken,
}

impl DeltaPoller {
    /// Watermarks start at construction time; older changes are not replayed
    pub fn new(memory: Arc<TwoTierMemory>, hub: Arc<ConnectionManager>, config: &HubConfig) -> Self {
        let now = Utc::now();
        Self {
            memory,
            hub,
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            error_backoff: Duration::from_secs(config.poll_error_backoff_secs),
            batch: config.poll_batch.max(1),
            watermarks: Mutex::new(Watermarks {
                episodic: now,
                semantic: now,
            }),
            shutdown_token: CancellationToken::new(),
        }
    }

    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = token;
        self
    }

    /// Replay changes after `since` on the first poll
    pub fn with_watermark(self, since: DateTime<Utc>) -> Self {
        *self.watermarks.lock() = Watermarks {
            episodic: since,
            semantic: since,
        };
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            error_backoff_secs = self.error_backoff.as_secs(),
            "Starting delta poller"
        );

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }

            match self.poll_once().await {
                Ok(0) => {}
                Ok(published) => debug!(published, "Delta poll published changes"),
                Err(e) => {
                    warn!(error = %e, backoff_secs = self.error_backoff.as_secs(), "Delta poll failed, backing off");
                    tokio::select! {
                        _ = self.shutdown_token.cancelled() => break,
                        _ = tokio::time::sleep(self.error_backoff) => {}
                    }
                }
            }
        }

        info!("Delta poller stopped");
    }

    /// One poll across both tiers; returns how many changes were broadcast
    ///
    /// Each tier's watermark advances only past what was actually published,
    /// so a failing tier is re-read in full on the next poll.
    pub async fn poll_once(&self) -> Result<usize, MemoryError> {
        let marks = *self.watermarks.lock();
        let mut published = 0;

        let records = self.memory.episodic_changes(marks.episodic, self.batch).await?;
        for record in &records {
            let data = serde_json::to_value(record).unwrap_or(serde_json::Value::Null);
            let envelope = Envelope::new(EnvelopeType::MemoryUpdate, data);
            self.hub.broadcast(&envelope, ConnectionClass::Graph, None).await;
            published += 1;
        }
        if let Some(latest) = records.iter().map(|r| r.updated_at).max() {
            let mut marks = self.watermarks.lock();
            marks.episodic = marks.episodic.max(latest);
        }

        let changes = self.memory.semantic_changes(marks.semantic, self.batch).await?;
        for change in &changes {
            let data = serde_json::to_value(change).unwrap_or(serde_json::Value::Null);
            let envelope = Envelope::new(EnvelopeType::GraphUpdate, data);
            self.hub.broadcast(&envelope, ConnectionClass::Graph, None).await;
            published += 1;
        }
        if let Some(latest) = changes.iter().map(|c| c.updated_at).max() {
            let mut marks = self.watermarks.lock();
            marks.semantic = marks.semantic.max(latest);
        }

        Ok(published)
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
    use crate::presentation::connection_manager::tests::FakeSocket;

    struct Fixture {
        memory: Arc<TwoTierMemory>,
        vectors: Arc<InMemoryVectorStore>,
        hub: Arc<ConnectionManager>,
        viewer: Arc<FakeSocket>,
    }

    async fn fixture() -> Fixture {
        let vectors = Arc::new(InMemoryVectorStore::new());
        let graph: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
        let memory = Arc::new(TwoTierMemory::new(
            Arc::new(StaticConnector::new("memory", vectors.clone() as Arc<dyn VectorStore>)),
            Arc::new(StaticConnector::new("memory", graph)),
            Arc::new(EmbeddingClient::new(32)),
            MemoryOptions {
                retry: RetryPolicy::default().with_max_attempts(1),
                consolidation_retry: RetryPolicy::default().with_max_attempts(1),
                ..MemoryOptions::default()
            },
        ));
        let hub = Arc::new(ConnectionManager::from_config(&HubConfig::default()));
        let viewer = Arc::new(FakeSocket::default());
        hub.connect(viewer.clone(), "viewer", ConnectionClass::Graph).await;

        Fixture {
            memory,
            vectors,
            hub,
            viewer,
        }
    }

    #[tokio::test]
    async fn test_poll_publishes_each_change_once() {
        let f = fixture().await;
        let poller = DeltaPoller::new(f.memory.clone(), f.hub.clone(), &HubConfig::default())
            .with_watermark(Utc::now() - chrono::Duration::seconds(1));

        let record = MemoryRecord::new("new incident", MemoryKind::Interaction);
        assert!(f.memory.store(record.clone(), false, 0).await);
        f.memory.consolidate(&[record.id]).await;

        assert_eq!(poller.poll_once().await.unwrap(), 2);
        let kinds = f.viewer.kinds();
        assert!(kinds.contains(&EnvelopeType::MemoryUpdate));
        assert!(kinds.contains(&EnvelopeType::GraphUpdate));

        assert_eq!(poller.poll_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_watermark() {
        let f = fixture().await;
        let poller = DeltaPoller::new(f.memory.clone(), f.hub.clone(), &HubConfig::default())
            .with_watermark(Utc::now() - chrono::Duration::seconds(1));

        let record = MemoryRecord::new("late arrival", MemoryKind::Thread);
        assert!(f.memory.store(record, false, 0).await);

        f.vectors.set_online(false);
        assert!(poller.poll_once().await.is_err());

        f.vectors.set_online(true);
        assert_eq!(poller.poll_once().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_poller_stops_on_cancellation() {
        let f = fixture().await;
        let config = HubConfig {
            poll_interval_ms: 10,
            ..HubConfig::default()
        };
        let poller = Arc::new(DeltaPoller::new(f.memory.clone(), f.hub.clone(), &config));
        let token = poller.shutdown_token();
        let handle = poller.start();

        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("poller should stop")
            .unwrap();
    }
}
