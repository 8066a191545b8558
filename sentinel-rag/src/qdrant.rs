//! Qdrant vector store backend.
//!
//! Provides [`QdrantVectorStore`] which implements [`VectorStore`] using
//! the [qdrant-client](https://docs.rs/qdrant-client) crate over gRPC.
//!
//! Qdrant point ids must be integers or UUIDs, so each chunk id is mapped to
//! a UUIDv5; re-upserting a chunk therefore overwrites the same point. The
//! original chunk id travels in the payload.
//!
//! # Example
//!
//! ```rust,ignore
//! use sentinel_rag::qdrant::QdrantVectorStore;
//!
//! let store = QdrantVectorStore::new("http://localhost:6334", "documents")?;
//! store.ensure_schema(1024).await?;
//! store.upsert(&chunks).await?;
//! let candidates = store.search(&query_embedding, 20, None).await?;
//! ```

use std::collections::HashMap;
use std::sync::OnceLock;

use async_trait::async_trait;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::vectors_config::Config as VectorsConfigKind;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter,
    PointStruct, SearchPointsBuilder, UpsertPointsBuilder, Value as QdrantValue,
    VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use tracing::debug;
use uuid::Uuid;

use crate::document::{Candidate, Chunk, MetadataFilter};
use crate::error::{RagError, Result};
use crate::vectorstore::VectorStore;

const BACKEND: &str = "qdrant";

/// A [`VectorStore`] backed by one [Qdrant](https://qdrant.tech/) collection
/// with cosine distance. Chunk metadata is stored as Qdrant payload.
pub struct QdrantVectorStore {
    client: Qdrant,
    collection: String,
    dimensions: OnceLock<usize>,
}

impl QdrantVectorStore {
    /// Create a store for `collection` on the server at `url`.
    pub fn new(url: &str, collection: impl Into<String>) -> Result<Self> {
        let client = Qdrant::from_url(url).build().map_err(map_err)?;
        Ok(Self::from_client(client, collection))
    }

    /// Create a store from an existing client.
    pub fn from_client(client: Qdrant, collection: impl Into<String>) -> Self {
        Self { client, collection: collection.into(), dimensions: OnceLock::new() }
    }

    /// The point id used for a chunk id.
    pub fn point_id(chunk_id: &str) -> String {
        Uuid::new_v5(&Uuid::NAMESPACE_OID, chunk_id.as_bytes()).to_string()
    }

    fn schema_dimensions(&self) -> Result<usize> {
        self.dimensions.get().copied().ok_or_else(|| {
            RagError::InvalidConfig("vector store schema not initialised; call ensure_schema".into())
        })
    }

    async fn existing_dimensions(&self) -> Result<Option<usize>> {
        let info = self.client.collection_info(&self.collection).await.map_err(map_err)?;
        let config = info
            .result
            .and_then(|r| r.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config);
        Ok(match config {
            Some(VectorsConfigKind::Params(params)) => Some(params.size as usize),
            _ => None,
        })
    }

    fn to_point(chunk: &Chunk, embedding: &[f32]) -> Result<PointStruct> {
        let metadata: serde_json::Map<String, serde_json::Value> = chunk
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        let payload = Payload::try_from(serde_json::json!({
            "chunk_id": chunk.id,
            "text": chunk.text,
            "document_id": chunk.document_id,
            "chunk_index": chunk.index,
            "metadata": metadata,
        }))
        .map_err(|e| RagError::store(BACKEND, format!("invalid payload: {e}")))?;
        Ok(PointStruct::new(Self::point_id(&chunk.id), embedding.to_vec(), payload))
    }
}

fn map_err(e: qdrant_client::QdrantError) -> RagError {
    RagError::store(BACKEND, e.to_string())
}

fn document_filter(document_id: &str) -> Filter {
    Filter::must([Condition::matches("document_id", document_id.to_string())])
}

fn to_filter(filter: &MetadataFilter) -> Option<Filter> {
    if filter.equals.is_empty() {
        return None;
    }
    let conditions: Vec<Condition> = filter
        .equals
        .iter()
        .map(|(key, value)| {
            let field =
                if key == "document_id" { key.clone() } else { format!("metadata.{key}") };
            Condition::matches(field, value.clone())
        })
        .collect();
    Some(Filter::must(conditions))
}

fn extract_string(value: &QdrantValue) -> Option<String> {
    match &value.kind {
        Some(Kind::StringValue(s)) => Some(s.clone()),
        _ => None,
    }
}

fn extract_index(value: &QdrantValue) -> Option<usize> {
    match &value.kind {
        Some(Kind::IntegerValue(i)) => usize::try_from(*i).ok(),
        Some(Kind::DoubleValue(d)) if *d >= 0.0 => Some(*d as usize),
        _ => None,
    }
}

fn from_payload(payload: &HashMap<String, QdrantValue>) -> Chunk {
    let string = |key: &str| payload.get(key).and_then(extract_string).unwrap_or_default();
    let metadata: HashMap<String, String> = payload
        .get("metadata")
        .and_then(|v| match &v.kind {
            Some(Kind::StructValue(s)) => Some(
                s.fields
                    .iter()
                    .filter_map(|(k, v)| extract_string(v).map(|s| (k.clone(), s)))
                    .collect(),
            ),
            _ => None,
        })
        .unwrap_or_default();

    Chunk {
        id: string("chunk_id"),
        text: string("text"),
        index: payload.get("chunk_index").and_then(extract_index).unwrap_or_default(),
        document_id: string("document_id"),
        embedding: None,
        metadata,
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn ensure_schema(&self, dimensions: usize) -> Result<()> {
        let exists = self.client.collection_exists(&self.collection).await.map_err(map_err)?;
        if exists {
            match self.existing_dimensions().await? {
                Some(existing) if existing != dimensions => {
                    return Err(RagError::DimensionMismatch { expected: existing, actual: dimensions });
                }
                Some(_) => {}
                None => {
                    return Err(RagError::InvalidConfig(format!(
                        "collection '{}' does not use a single unnamed vector",
                        self.collection
                    )));
                }
            }
            debug!(collection = %self.collection, dimensions, "qdrant collection already exists");
        } else {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection)
                        .vectors_config(VectorParamsBuilder::new(dimensions as u64, Distance::Cosine)),
                )
                .await
                .map_err(map_err)?;
            debug!(collection = %self.collection, dimensions, "created qdrant collection");
        }

        let recorded = *self.dimensions.get_or_init(|| dimensions);
        if recorded != dimensions {
            return Err(RagError::DimensionMismatch { expected: recorded, actual: dimensions });
        }
        Ok(())
    }

    async fn upsert(&self, chunks: &[Chunk]) -> Result<()> {
        let dimensions = self.schema_dimensions()?;
        if chunks.is_empty() {
            return Ok(());
        }

        let points = chunks
            .iter()
            .map(|chunk| match &chunk.embedding {
                None => Err(RagError::InvalidInput(format!("chunk '{}' has no embedding", chunk.id))),
                Some(e) if e.len() != dimensions => {
                    Err(RagError::DimensionMismatch { expected: dimensions, actual: e.len() })
                }
                Some(e) => Self::to_point(chunk, e),
            })
            .collect::<Result<Vec<PointStruct>>>()?;

        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await
            .map_err(map_err)?;

        debug!(collection = %self.collection, count = chunks.len(), "upserted chunks to qdrant");
        Ok(())
    }

    async fn search(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Candidate>> {
        let dimensions = self.schema_dimensions()?;
        if embedding.len() != dimensions {
            return Err(RagError::DimensionMismatch { expected: dimensions, actual: embedding.len() });
        }

        let mut request =
            SearchPointsBuilder::new(&self.collection, embedding.to_vec(), top_k as u64)
                .with_payload(true);
        if let Some(filter) = filter.and_then(to_filter) {
            request = request.filter(filter);
        }
        let response = self.client.search_points(request).await.map_err(map_err)?;

        let mut candidates: Vec<Candidate> = response
            .result
            .into_iter()
            .map(|scored| Candidate::similarity(from_payload(&scored.payload), scored.score))
            .collect();
        crate::document::sort_candidates(&mut candidates);
        Ok(candidates)
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize> {
        let count = self
            .client
            .count(
                CountPointsBuilder::new(&self.collection)
                    .filter(document_filter(document_id))
                    .exact(true),
            )
            .await
            .map_err(map_err)?
            .result
            .map(|r| r.count as usize)
            .unwrap_or_default();
        if count == 0 {
            return Ok(0);
        }

        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(document_filter(document_id))
                    .wait(true),
            )
            .await
            .map_err(map_err)?;

        debug!(collection = %self.collection, document_id, count, "deleted document from qdrant");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_ids_are_stable_uuids() {
        let a = QdrantVectorStore::point_id("doc_0");
        assert_eq!(a, QdrantVectorStore::point_id("doc_0"));
        assert_ne!(a, QdrantVectorStore::point_id("doc_1"));
        assert!(Uuid::parse_str(&a).is_ok());
    }

    #[test]
    fn empty_filter_is_omitted() {
        assert!(to_filter(&MetadataFilter::new()).is_none());
        let filter = to_filter(&MetadataFilter::new().eq("lang", "vi").eq("document_id", "d"));
        assert_eq!(filter.map(|f| f.must.len()), Some(2));
    }

    #[test]
    fn payload_round_trips_into_chunk() {
        let chunk = Chunk {
            id: "doc_3".into(),
            text: "hello".into(),
            index: 3,
            document_id: "doc".into(),
            embedding: Some(vec![0.1, 0.2]),
            metadata: HashMap::from([("filename".to_string(), "a.md".to_string())]),
        };
        let point = QdrantVectorStore::to_point(&chunk, &[0.1, 0.2]).unwrap();
        let restored = from_payload(&point.payload);
        assert_eq!(restored, Chunk { embedding: None, ..chunk });
    }
}
