//! Vector store trait for storing and searching chunk embeddings.

use async_trait::async_trait;

use crate::document::{Candidate, Chunk, MetadataFilter};
use crate::error::Result;

/// A storage backend for chunk embeddings with similarity search.
///
/// One instance manages one collection. A single long-lived instance is
/// shared (behind an `Arc`) by the ingestion pipeline and the query
/// orchestrator, so implementations synchronize internally.
///
/// # Example
///
/// ```rust,ignore
/// use sentinel_rag::{InMemoryVectorStore, VectorStore};
///
/// let store = InMemoryVectorStore::new();
/// store.ensure_schema(1024).await?;
/// store.upsert(&chunks).await?;
/// let candidates = store.search(&query_embedding, 20, None).await?;
/// ```
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// A short backend name for logs and error messages.
    fn backend(&self) -> &str;

    /// Prepare the collection for vectors of `dimensions` components.
    ///
    /// Called once at startup. Creating an already-existing collection with
    /// the same dimensionality is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DimensionMismatch`](crate::RagError::DimensionMismatch)
    /// if the collection already exists with a different dimensionality.
    async fn ensure_schema(&self, dimensions: usize) -> Result<()>;

    /// Insert or replace chunks by id. Every chunk must carry an embedding.
    async fn upsert(&self, chunks: &[Chunk]) -> Result<()>;

    /// Return at most `top_k` chunks most similar (cosine) to `embedding`,
    /// ordered by descending score.
    ///
    /// Searching an empty collection returns an empty list.
    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Candidate>>;

    /// Remove every chunk of `document_id`, returning how many were removed.
    ///
    /// A concurrent [`search`](VectorStore::search) observes either all or
    /// none of the document's chunks.
    async fn delete_by_document(&self, document_id: &str) -> Result<usize>;
}
