// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Memory node HTTP / WebSocket server

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use strata_cortex::application::consolidation_worker::ConsolidationWorker;
use strata_cortex::application::two_tier_memory::{MemoryOptions, TwoTierMemory};
use strata_cortex::domain::config::CortexConfigManifest;
use strata_cortex::infrastructure::embedding_client::EmbeddingClient;
use strata_cortex::infrastructure::{graph_connector, vector_connector};
use strata_cortex::presentation::{router, AppState, ConnectionManager, DeltaPoller};

/// Two-tier memory over the configured backends
pub fn build_memory(config: &CortexConfigManifest) -> TwoTierMemory {
    let spec = &config.spec;
    TwoTierMemory::new(
        vector_connector(&spec.episodic),
        graph_connector(&spec.semantic),
        Arc::new(EmbeddingClient::new(spec.episodic.vector_dim)),
        MemoryOptions::from_config(spec),
    )
}

pub async fn start_server(config_path: Option<PathBuf>, port_override: Option<u16>) -> Result<()> {
    info!("Strata memory node starting (PID: {})", std::process::id());

    let config = CortexConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;
    let spec = &config.spec;

    info!(
        node = %config.metadata.name,
        episodic = ?spec.episodic.backend,
        semantic = ?spec.semantic.backend,
        "Configuration loaded"
    );

    if let Some(metrics) = spec.observability.as_ref().and_then(|o| o.metrics.as_ref()) {
        if metrics.enabled {
            let addr = SocketAddr::from(([0, 0, 0, 0], metrics.port));
            PrometheusBuilder::new()
                .with_http_listener(addr)
                .install()
                .context("Failed to install Prometheus exporter")?;
            info!("Prometheus metrics exposed on {}", addr);
        }
    }

    // Memory events fan out to graph observers through the hub
    let hub = Arc::new(ConnectionManager::from_config(&spec.hub));
    let memory = Arc::new(build_memory(&config).with_event_bus(hub.clone()));

    let health = memory.health().await;
    for tier in [&health.episodic, &health.semantic] {
        match &tier.error {
            None => info!(tier = %tier.tier, "Tier reachable"),
            Some(e) => warn!(tier = %tier.tier, error = %e, "Tier unreachable at startup, serving degraded"),
        }
    }

    let workers = CancellationToken::new();
    let consolidation = Arc::new(
        ConsolidationWorker::new(memory.clone(), spec.consolidation.clone()).with_shutdown_token(workers.child_token()),
    );
    let poller = Arc::new(DeltaPoller::new(memory.clone(), hub.clone(), &spec.hub).with_shutdown_token(workers.child_token()));
    let consolidation_handle = consolidation.start();
    let poller_handle = poller.start();

    let app = router(Arc::new(AppState::new(memory.clone(), hub)));

    let port = port_override.unwrap_or(spec.network.port);
    let addr = format!("{}:{}", spec.network.bind_address, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Listening on {}", addr);

    let served = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await;

    info!("Shutting down");
    workers.cancel();
    memory.close();
    for (name, handle) in [("consolidation worker", consolidation_handle), ("delta poller", poller_handle)] {
        if let Err(e) = handle.await {
            error!(worker = name, error = %e, "Worker task failed");
        }
    }

    served.context("HTTP server failed")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_cortex::domain::config::{GraphBackend, VectorBackend};
    use strata_cortex::domain::{MemoryKind, MemoryRecord};

    #[tokio::test]
    async fn test_build_memory_from_in_memory_config() {
        let mut config = CortexConfigManifest::default();
        config.spec.episodic.backend = VectorBackend::InMemory;
        config.spec.semantic.backend = GraphBackend::InMemory;

        let memory = build_memory(&config);
        assert!(memory.health().await.is_healthy());

        let record = MemoryRecord::new("first boot", MemoryKind::AgentStatus);
        assert!(memory.store(record.clone(), false, 0).await);
        assert!(memory.get(record.id, false, 0).await.is_some());
    }
}
