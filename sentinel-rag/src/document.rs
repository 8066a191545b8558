//! Data types for documents, chunks, and retrieval candidates.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Where a [`Document`] came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentSource {
    /// Original file name as uploaded.
    pub filename: String,
    /// MIME type reported for the upload.
    pub mime_type: String,
    /// When the document was received.
    pub uploaded_at: DateTime<Utc>,
}

impl DocumentSource {
    /// Describe a source received now.
    pub fn new(filename: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self { filename: filename.into(), mime_type: mime_type.into(), uploaded_at: Utc::now() }
    }
}

/// A source document submitted for indexing.
///
/// The id is assigned once at construction and never changes; chunk ids are
/// derived from it, which makes re-ingesting the same document idempotent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    id: String,
    /// The raw text content of the document.
    pub text: String,
    /// Upload provenance.
    pub source: DocumentSource,
    /// Caller-supplied metadata copied onto every chunk.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Document {
    /// Create a document with a freshly generated id.
    pub fn new(text: impl Into<String>, source: DocumentSource) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), text, source)
    }

    /// Create a document whose id is owned by the caller.
    pub fn with_id(id: impl Into<String>, text: impl Into<String>, source: DocumentSource) -> Self {
        Self { id: id.into(), text: text.into(), source, metadata: HashMap::new() }
    }

    /// Attach a metadata entry that will be inherited by every chunk.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// The document's immutable id.
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// A contiguous slice of a [`Document`]'s text, the unit of embedding and retrieval.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Deterministic identifier, `{document_id}_{index}`.
    pub id: String,
    /// The text content of the chunk.
    pub text: String,
    /// 0-based position within the parent document.
    pub index: usize,
    /// The id of the parent [`Document`].
    pub document_id: String,
    /// Vector embedding, absent until the chunk has been embedded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Metadata inherited from the parent document plus chunk-specific fields.
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Chunk {
    /// Derive the id of the chunk at `index` within `document_id`.
    pub fn chunk_id(document_id: &str, index: usize) -> String {
        format!("{document_id}_{index}")
    }
}

/// Which pipeline stage produced a [`Candidate`]'s score.
///
/// Scores from different stages are on different scales and must not be
/// compared with each other.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScoreStage {
    /// Cosine similarity from the vector store.
    Similarity,
    /// Relevance assigned by a reranker.
    Relevance,
}

/// A retrieved [`Chunk`] paired with a score from one pipeline stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// The retrieved chunk.
    pub chunk: Chunk,
    /// Higher is more relevant.
    pub score: f32,
    /// The stage that assigned `score`.
    pub stage: ScoreStage,
}

impl Candidate {
    /// A candidate scored by vector similarity.
    pub fn similarity(chunk: Chunk, score: f32) -> Self {
        Self { chunk, score, stage: ScoreStage::Similarity }
    }
}

/// Descending score, ties broken by ascending chunk id. NaN sorts last.
pub fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    let score = |c: &Candidate| if c.score.is_nan() { f32::NEG_INFINITY } else { c.score };
    score(b).total_cmp(&score(a)).then_with(|| a.chunk.id.cmp(&b.chunk.id))
}

/// Sort candidates into deterministic retrieval order.
pub fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(compare_candidates);
}

/// Equality predicate over chunk metadata.
///
/// The key `document_id` matches the chunk's parent id; every other key is
/// looked up in [`Chunk::metadata`]. All entries must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetadataFilter {
    /// Required key/value pairs.
    pub equals: BTreeMap<String, String>,
}

impl MetadataFilter {
    /// Create an empty filter that matches every chunk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key` to equal `value`.
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.equals.insert(key.into(), value.into());
        self
    }

    /// Whether `chunk` satisfies every condition.
    pub fn matches(&self, chunk: &Chunk) -> bool {
        self.equals.iter().all(|(key, value)| {
            if key == "document_id" {
                chunk.document_id == *value
            } else {
                chunk.metadata.get(key) == Some(value)
            }
        })
    }
}
