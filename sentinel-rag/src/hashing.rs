//! Deterministic local embedding provider based on feature hashing.
//!
//! [`HashEmbeddingProvider`] needs no model or network access. Each lowercase
//! word and word bigram is hashed (FNV-1a) into one of `dimensions` buckets
//! with a hash-derived sign, and the result is L2-normalized. Texts that share
//! vocabulary land close together under cosine similarity, which is enough
//! for development setups and tests.

use async_trait::async_trait;
use tracing::debug;

use crate::embedding::{EmbeddingProvider, check_batch};
use crate::error::{RagError, Result};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// A local [`EmbeddingProvider`] that hashes tokens into a fixed-size vector.
#[derive(Debug, Clone)]
pub struct HashEmbeddingProvider {
    dimensions: usize,
    max_batch_size: usize,
    max_input_chars: usize,
}

impl HashEmbeddingProvider {
    /// Create a provider producing `dimensions`-component vectors.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfig`] if `dimensions` is zero.
    pub fn new(dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(RagError::InvalidConfig("embedding dimensions must be non-zero".into()));
        }
        Ok(Self { dimensions, max_batch_size: 256, max_input_chars: 8192 })
    }

    /// Set the largest batch accepted per call.
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    /// Set the longest accepted input, in characters.
    pub fn with_max_input_chars(mut self, chars: usize) -> Self {
        self.max_input_chars = chars;
        self
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect();

        for token in &tokens {
            self.accumulate(&mut vector, token.as_bytes(), 1.0);
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.accumulate(&mut vector, bigram.as_bytes(), 0.5);
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }

    fn accumulate(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let hash = fnv1a(feature);
        let bucket = (hash % self.dimensions as u64) as usize;
        let sign = if (hash >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(FNV_PRIME))
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    fn name(&self) -> &str {
        "hash"
    }

    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        check_batch(self.name(), texts, self.max_batch_size, self.max_input_chars)?;
        debug!(provider = "hash", batch_size = texts.len(), "embedding batch");
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn vectors_are_normalized_and_ordered() {
        let provider = HashEmbeddingProvider::new(64).unwrap();
        let vectors = provider.embed(&["rust vector search", "", "bread recipe"]).await.unwrap();
        assert_eq!(vectors.len(), 3);
        assert!(vectors.iter().all(|v| v.len() == 64));
        assert!((cosine(&vectors[0], &vectors[0]) - 1.0).abs() < 1e-5);
        assert!(vectors[1].iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn shared_vocabulary_scores_higher() {
        let provider = HashEmbeddingProvider::new(1024).unwrap();
        let query = provider.embed_one("how does vector search work").await.unwrap();
        let related = provider.embed_one("vector search finds nearby embeddings").await.unwrap();
        let unrelated = provider.embed_one("bake the bread for forty minutes").await.unwrap();
        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
    }

    #[tokio::test]
    async fn embedding_is_deterministic() {
        let provider = HashEmbeddingProvider::new(32).unwrap();
        let a = provider.embed_one("Xin chào thế giới").await.unwrap();
        let b = provider.embed_one("Xin chào thế giới").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn rejects_oversized_batches_and_inputs() {
        let provider =
            HashEmbeddingProvider::new(8).unwrap().with_max_batch_size(1).with_max_input_chars(4);
        assert!(matches!(provider.embed(&["a", "b"]).await, Err(RagError::InvalidInput(_))));
        assert!(matches!(provider.embed(&["abcde"]).await, Err(RagError::InvalidInput(_))));
        assert!(HashEmbeddingProvider::new(0).is_err());
    }
}
