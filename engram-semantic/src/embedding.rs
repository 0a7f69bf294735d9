//! Embedding providers for generating vector embeddings.

use crate::types::{normalize, Vector};
use async_trait::async_trait;
use engram_core::error::Result;

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vector>;

    /// Generate embeddings for multiple texts (batched).
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>>;

    /// Get the embedding dimension.
    fn dimension(&self) -> usize;
}

/// Deterministic mock provider.
///
/// Hash-seeded, normalized vectors: the same text always produces the same
/// embedding, different texts almost always differ. No semantic understanding
/// — suitable for tests and local smoke runs only.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn generate_embedding(&self, text: &str) -> Vector {
        let hash = text
            .bytes()
            .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));

        let mut embedding = vec![0.0; self.dimension];
        for (i, val) in embedding.iter_mut().enumerate() {
            let seed = hash.wrapping_add(i as u64).wrapping_mul(2654435761);
            *val = ((seed % 1000) as f32 / 1000.0) - 0.5;
        }

        normalize(&mut embedding);
        embedding
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vector> {
        Ok(self.generate_embedding(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vector>> {
        Ok(texts.iter().map(|t| self.generate_embedding(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
