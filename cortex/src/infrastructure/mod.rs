// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Infrastructure layer for the Strata cortex
//!
//! Backend adapters, the retry executor and the embedding client.

pub mod embedding_client;
pub mod in_memory;
pub mod neo4j_store;
pub mod qdrant_store;
pub mod retry;

use std::sync::Arc;

use crate::domain::config::{EpisodicConfig, GraphBackend, SemanticConfig, VectorBackend};
use crate::domain::{Connector, GraphStore, VectorStore};

pub use embedding_client::{Embedder, EmbeddingClient};
pub use in_memory::{InMemoryGraphStore, InMemoryVectorStore, StaticConnector};
pub use neo4j_store::{Neo4jConnector, Neo4jGraphStore};
pub use qdrant_store::{QdrantConnector, QdrantVectorStore};
pub use retry::{RetryExecutor, RetryPolicy};

/// Connector for the configured episodic backend
pub fn vector_connector(config: &EpisodicConfig) -> Arc<dyn Connector<dyn VectorStore>> {
    match config.backend {
        VectorBackend::Qdrant => Arc::new(QdrantConnector::from_config(config)),
        VectorBackend::InMemory => {
            let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
            Arc::new(StaticConnector::new("in_memory", store))
        }
    }
}

/// Connector for the configured semantic backend
pub fn graph_connector(config: &SemanticConfig) -> Arc<dyn Connector<dyn GraphStore>> {
    match config.backend {
        GraphBackend::Neo4j => Arc::new(Neo4jConnector::from_config(config)),
        GraphBackend::InMemory => {
            let store: Arc<dyn GraphStore> = Arc::new(InMemoryGraphStore::new());
            Arc::new(StaticConnector::new("in_memory", store))
        }
    }
}
