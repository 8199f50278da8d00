// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Embedding Client
//!
//! Turns record text into vectors for the episodic tier.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Local hashed bag-of-words embeddings
//!
//! Each lowercase alphanumeric token is hashed (FNV-1a, stable across builds
//! so persisted vectors stay comparable) into a bucket and a sign. The bucket
//! counts are L2-normalized, so texts sharing vocabulary score high under
//! cosine similarity.

use async_trait::async_trait;

use crate::domain::BackendError;

/// Produces fixed-dimension embeddings
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError>;

    fn dimension(&self) -> usize;
}

/// Client for generating embeddings
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    dimension: usize,
}

impl EmbeddingClient {
    /// Create a new embedding client producing `dimension`-wide vectors
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    /// Synchronous core, shared by the trait impl and tests
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = fnv1a(token.to_lowercase().as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for EmbeddingClient {
    fn default() -> Self {
        // all-MiniLM-L6-v2 width
        Self::new(384)
    }
}

#[async_trait]
impl Embedder for EmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        Ok(self.embed_text(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
    bytes.iter().fold(OFFSET, |hash, byte| (hash ^ *byte as u64).wrapping_mul(PRIME))
}

/// Cosine similarity; zero when either side has no magnitude
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_generate_embedding() {
        let client = EmbeddingClient::default();
        let embedding = client.embed("deploy the api gateway").await.unwrap();

        assert_eq!(embedding.len(), 384);
        let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_consistent_embeddings() {
        let client = EmbeddingClient::new(64);
        let emb1 = client.embed("same text").await.unwrap();
        let emb2 = client.embed("Same TEXT!").await.unwrap();

        assert_eq!(emb1, emb2, "Tokenization ignores case and punctuation");
    }

    #[test]
    fn test_shared_vocabulary_scores_higher() {
        let client = EmbeddingClient::default();
        let query = client.embed_text("kubernetes deployment rollback");
        let close = client.embed_text("rollback the kubernetes deployment");
        let far = client.embed_text("quarterly sales figures");

        assert!(cosine_similarity(&query, &close) > 0.9);
        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }

    #[test]
    fn test_empty_text_has_zero_similarity() {
        let client = EmbeddingClient::new(16);
        let empty = client.embed_text("  ");
        assert!(empty.iter().all(|v| *v == 0.0));
        assert_eq!(cosine_similarity(&empty, &client.embed_text("anything")), 0.0);
    }
}
