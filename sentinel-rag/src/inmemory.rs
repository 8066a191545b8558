//! In-memory vector store using cosine similarity.
//!
//! This module provides [`InMemoryVectorStore`], a zero-dependency vector store
//! backed by a `HashMap` protected by a `tokio::sync::RwLock`. It is suitable
//! for development, testing, and single-process deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::document::{Candidate, Chunk, MetadataFilter, sort_candidates};
use crate::error::{RagError, Result};
use crate::vectorstore::VectorStore;

const BACKEND: &str = "memory";

#[derive(Debug, Default)]
struct Collection {
    dimensions: Option<usize>,
    chunks: HashMap<String, Chunk>,
}

/// An in-memory vector store using cosine similarity for search.
///
/// Every mutation takes the write lock for its whole duration, so searches
/// never observe a half-applied upsert or a partially deleted document.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collection: RwLock<Collection>,
}

impl InMemoryVectorStore {
    /// Create a new empty in-memory vector store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored chunks.
    pub async fn len(&self) -> usize {
        self.collection.read().await.chunks.len()
    }

    /// Whether the store holds no chunks.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Ids of all stored chunks, sorted.
    pub async fn chunk_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.collection.read().await.chunks.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn schema_dimensions(collection: &Collection) -> Result<usize> {
    collection.dimensions.ok_or_else(|| {
        RagError::InvalidConfig("vector store schema not initialised; call ensure_schema".into())
    })
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn ensure_schema(&self, dimensions: usize) -> Result<()> {
        let mut collection = self.collection.write().await;
        match collection.dimensions {
            Some(existing) if existing != dimensions => {
                Err(RagError::DimensionMismatch { expected: existing, actual: dimensions })
            }
            Some(_) => Ok(()),
            None => {
                collection.dimensions = Some(dimensions);
                debug!(backend = BACKEND, dimensions, "initialised collection");
                Ok(())
            }
        }
    }

    async fn upsert(&self, chunks: &[Chunk]) -> Result<()> {
        let mut collection = self.collection.write().await;
        let dimensions = schema_dimensions(&collection)?;

        for chunk in chunks {
            match &chunk.embedding {
                None => {
                    return Err(RagError::InvalidInput(format!(
                        "chunk '{}' has no embedding",
                        chunk.id
                    )));
                }
                Some(embedding) if embedding.len() != dimensions => {
                    return Err(RagError::DimensionMismatch {
                        expected: dimensions,
                        actual: embedding.len(),
                    });
                }
                Some(_) => {}
            }
        }

        for chunk in chunks {
            collection.chunks.insert(chunk.id.clone(), chunk.clone());
        }
        debug!(backend = BACKEND, count = chunks.len(), "upserted chunks");
        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Candidate>> {
        let collection = self.collection.read().await;
        let dimensions = schema_dimensions(&collection)?;
        if embedding.len() != dimensions {
            return Err(RagError::DimensionMismatch {
                expected: dimensions,
                actual: embedding.len(),
            });
        }

        let mut scored: Vec<Candidate> = collection
            .chunks
            .values()
            .filter(|chunk| filter.is_none_or(|f| f.matches(chunk)))
            .filter_map(|chunk| {
                let vector = chunk.embedding.as_deref()?;
                let score = cosine_similarity(vector, embedding);
                Some(Candidate::similarity(Chunk { embedding: None, ..chunk.clone() }, score))
            })
            .collect();

        sort_candidates(&mut scored);
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize> {
        let mut collection = self.collection.write().await;
        let before = collection.chunks.len();
        collection.chunks.retain(|_, chunk| chunk.document_id != document_id);
        let removed = before - collection.chunks.len();
        debug!(backend = BACKEND, document_id, removed, "deleted document chunks");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, document_id: &str, embedding: Vec<f32>) -> Chunk {
        Chunk {
            id: id.into(),
            text: format!("text of {id}"),
            index: 0,
            document_id: document_id.into(),
            embedding: Some(embedding),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn cosine_handles_zero_vectors() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn ensure_schema_detects_dimension_mismatch() {
        let store = InMemoryVectorStore::new();
        store.ensure_schema(3).await.unwrap();
        store.ensure_schema(3).await.unwrap();
        let err = store.ensure_schema(4).await.unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 3, actual: 4 }));
    }

    #[tokio::test]
    async fn store_is_unusable_until_schema_is_set() {
        let store = InMemoryVectorStore::new();
        let err = store.upsert(&[chunk("a", "d", vec![1.0])]).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidConfig(_)));
        let err = store.search(&[1.0], 5, None).await.unwrap_err();
        assert!(matches!(err, RagError::InvalidConfig(_)));

        store.ensure_schema(1).await.unwrap();
        assert!(store.search(&[1.0], 5, None).await.unwrap().is_empty());
        store.upsert(&[chunk("a", "d", vec![1.0])]).await.unwrap();
    }

    #[tokio::test]
    async fn empty_collection_search_returns_empty() {
        let store = InMemoryVectorStore::new();
        store.ensure_schema(2).await.unwrap();
        assert!(store.search(&[1.0, 0.0], 5, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_rejects_whole_batch_on_bad_vector() {
        let store = InMemoryVectorStore::new();
        store.ensure_schema(2).await.unwrap();
        let err = store
            .upsert(&[chunk("a", "d", vec![1.0, 0.0]), chunk("b", "d", vec![1.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 2, actual: 1 }));
        assert!(store.is_empty().await);

        let mut missing = chunk("c", "d", vec![]);
        missing.embedding = None;
        assert!(matches!(store.upsert(&[missing]).await, Err(RagError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = InMemoryVectorStore::new();
        store.ensure_schema(2).await.unwrap();
        store.upsert(&[chunk("a", "d", vec![1.0, 0.0])]).await.unwrap();
        store.upsert(&[chunk("a", "d", vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(store.len().await, 1);
        let results = store.search(&[0.0, 1.0], 1, None).await.unwrap();
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert!(results[0].chunk.embedding.is_none());
    }

    #[tokio::test]
    async fn search_orders_filters_and_truncates() {
        let store = InMemoryVectorStore::new();
        store.ensure_schema(2).await.unwrap();
        let mut tagged = chunk("c", "d2", vec![0.9, 0.1]);
        tagged.metadata.insert("lang".into(), "vi".into());
        store
            .upsert(&[chunk("a", "d1", vec![1.0, 0.0]), chunk("b", "d1", vec![0.0, 1.0]), tagged])
            .await
            .unwrap();

        let results = store.search(&[1.0, 0.0], 2, None).await.unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);

        let filter = MetadataFilter::new().eq("lang", "vi");
        let results = store.search(&[1.0, 0.0], 10, Some(&filter)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.id, "c");

        let err = store.search(&[1.0], 2, None).await.unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn delete_by_document_removes_only_that_document() {
        let store = InMemoryVectorStore::new();
        store.ensure_schema(2).await.unwrap();
        store
            .upsert(&[
                chunk("d1_0", "d1", vec![1.0, 0.0]),
                chunk("d1_1", "d1", vec![0.5, 0.5]),
                chunk("d2_0", "d2", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();
        assert_eq!(store.delete_by_document("d1").await.unwrap(), 2);
        assert_eq!(store.delete_by_document("d1").await.unwrap(), 0);
        assert_eq!(store.chunk_ids().await, vec!["d2_0".to_string()]);
    }
}
