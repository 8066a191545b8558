//! Document ingestion: validate → chunk → embed → upsert.
//!
//! The [`IngestionPipeline`] processes one document at a time. Chunks are
//! embedded and stored in batches; a batch that still fails after retries
//! stops the run, leaves earlier batches in place, and is reported in the
//! [`IngestReport`] so that only that batch needs to be retried.
//!
//! # Example
//!
//! ```rust,ignore
//! use sentinel_rag::{IngestionPipeline, RagConfig, InMemoryVectorStore, HashEmbeddingProvider};
//!
//! let pipeline = IngestionPipeline::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(HashEmbeddingProvider::new(1024)?))
//!     .vector_store(Arc::new(InMemoryVectorStore::new()))
//!     .build()?;
//!
//! pipeline.ensure_schema().await?;
//! let report = pipeline.ingest(&document).await?;
//! if let Some(failure) = &report.failed_batch {
//!     pipeline.retry_batch(&document, failure.batch_index).await?;
//! }
//! ```

use std::ops::Range;
use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::chunking::{Chunker, RecursiveChunker};
use crate::config::RagConfig;
use crate::document::{Chunk, Document};
use crate::embedding::{EmbeddingProvider, check_dimensions};
use crate::error::{RagError, Result};
use crate::retry::with_retry;
use crate::vectorstore::VectorStore;

/// The batch at which an ingestion run stopped.
#[derive(Debug)]
pub struct BatchFailure {
    /// 0-based batch number.
    pub batch_index: usize,
    /// Chunk indices covered by the batch.
    pub chunk_range: Range<usize>,
    /// The error after retries were exhausted.
    pub error: RagError,
}

/// Summary of one [`IngestionPipeline::ingest`] run.
#[derive(Debug)]
pub struct IngestReport {
    pub document_id: String,
    /// Chunks the document was split into.
    pub chunks_total: usize,
    /// Chunks embedded and upserted by this run.
    pub chunks_stored: usize,
    pub batches_total: usize,
    /// Set when a batch failed; later batches were not attempted.
    pub failed_batch: Option<BatchFailure>,
}

impl IngestReport {
    /// Whether every chunk was stored.
    pub fn is_complete(&self) -> bool {
        self.failed_batch.is_none()
    }
}

/// Chunks, embeds, and stores documents.
///
/// Construct one via [`IngestionPipeline::builder()`]. The vector store is
/// shared with the query orchestrator.
pub struct IngestionPipeline {
    config: RagConfig,
    chunker: Arc<dyn Chunker>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStore>,
}

impl IngestionPipeline {
    /// Create a new [`IngestionPipelineBuilder`].
    pub fn builder() -> IngestionPipelineBuilder {
        IngestionPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Prepare the vector store for the provider's dimensionality.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::DimensionMismatch`] if the store was created with a
    /// different dimensionality.
    pub async fn ensure_schema(&self) -> Result<()> {
        let dimensions = self.embedding_provider.dimensions();
        with_retry(&self.config.retry, self.config.call_timeout(), "ensure_schema", || {
            self.vector_store.ensure_schema(dimensions)
        })
        .await
        .inspect_err(|e| {
            error!(backend = self.vector_store.backend(), dimensions, error = %e, "schema check failed");
        })
    }

    /// Ingest a single document.
    ///
    /// Chunk ids derive from the document id, so ingesting an unchanged
    /// document again replaces its chunks instead of duplicating them.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidInput`] if the document is empty or larger
    /// than `max_document_bytes`. Batch failures are reported in the
    /// returned [`IngestReport`], not as an error.
    #[instrument(skip_all, fields(document.id = %document.id()))]
    pub async fn ingest(&self, document: &Document) -> Result<IngestReport> {
        let chunks = self.prepare(document)?;
        let batch_size = self.batch_size();
        let batches_total = chunks.len().div_ceil(batch_size);

        let mut report = IngestReport {
            document_id: document.id().to_string(),
            chunks_total: chunks.len(),
            chunks_stored: 0,
            batches_total,
            failed_batch: None,
        };

        self.store_batches(&chunks, 0, &mut report).await;
        if report.is_complete() {
            info!(chunk_count = report.chunks_stored, batches_total, "ingested document");
        }
        Ok(report)
    }

    /// Continue an interrupted ingestion from its failed batch.
    ///
    /// Batches stored before the failure are not embedded again. The returned
    /// report accumulates `chunks_stored` across both runs and carries a new
    /// [`BatchFailure`] if a batch fails again.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidInput`] if `report` belongs to another
    /// document.
    #[instrument(skip_all, fields(document.id = %document.id()))]
    pub async fn resume(&self, document: &Document, mut report: IngestReport) -> Result<IngestReport> {
        if report.document_id != document.id() {
            return Err(RagError::InvalidInput(format!(
                "report for '{}' cannot resume document '{}'",
                report.document_id,
                document.id()
            )));
        }
        let Some(failure) = report.failed_batch.take() else {
            return Ok(report);
        };

        let chunks = self.prepare(document)?;
        info!(batch_index = failure.batch_index, "resuming ingestion");
        self.store_batches(&chunks, failure.batch_index, &mut report).await;
        if report.is_complete() {
            info!(chunk_count = report.chunks_stored, "resumed ingestion completed");
        }
        Ok(report)
    }

    /// Store batches from `first_batch` on, stopping at the first failure.
    async fn store_batches(&self, chunks: &[Chunk], first_batch: usize, report: &mut IngestReport) {
        let batch_size = self.batch_size();
        for (batch_index, batch) in chunks.chunks(batch_size).enumerate().skip(first_batch) {
            match self.store_batch(batch).await {
                Ok(stored) => report.chunks_stored += stored,
                Err(error) => {
                    let start = batch_index * batch_size;
                    warn!(
                        batch_index,
                        batches_total = report.batches_total,
                        chunks_stored = report.chunks_stored,
                        error = %error,
                        "batch failed, stopping ingestion"
                    );
                    report.failed_batch = Some(BatchFailure {
                        batch_index,
                        chunk_range: start..start + batch.len(),
                        error,
                    });
                    return;
                }
            }
        }
    }

    /// Re-run a single batch of `document`, returning the chunks stored.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidInput`] if `batch_index` is out of range,
    /// or the batch's error if it fails again.
    pub async fn retry_batch(&self, document: &Document, batch_index: usize) -> Result<usize> {
        let chunks = self.prepare(document)?;
        let batch_size = self.batch_size();
        let batch = chunks.chunks(batch_size).nth(batch_index).ok_or_else(|| {
            RagError::InvalidInput(format!(
                "batch {batch_index} out of range for document '{}' ({} batches)",
                document.id(),
                chunks.len().div_ceil(batch_size)
            ))
        })?;
        let stored = self.store_batch(batch).await?;
        info!(document.id = %document.id(), batch_index, stored, "retried batch");
        Ok(stored)
    }

    /// Remove every chunk of a document, returning how many were removed.
    pub async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let removed =
            with_retry(&self.config.retry, self.config.call_timeout(), "delete", || {
                self.vector_store.delete_by_document(document_id)
            })
            .await?;
        info!(document.id = document_id, removed, "deleted document");
        Ok(removed)
    }

    fn batch_size(&self) -> usize {
        self.config.embed_batch_size.min(self.embedding_provider.max_batch_size()).max(1)
    }

    fn prepare(&self, document: &Document) -> Result<Vec<Chunk>> {
        if document.text.trim().is_empty() {
            return Err(RagError::InvalidInput(format!("document '{}' is empty", document.id())));
        }
        if document.text.len() > self.config.max_document_bytes {
            return Err(RagError::InvalidInput(format!(
                "document '{}' is {} bytes, the maximum is {}",
                document.id(),
                document.text.len(),
                self.config.max_document_bytes
            )));
        }
        self.chunker.chunk(document)
    }

    async fn store_batch(&self, batch: &[Chunk]) -> Result<usize> {
        let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
        let policy = &self.config.retry;
        let timeout = self.config.call_timeout();

        let embeddings =
            with_retry(policy, timeout, "embed", || self.embedding_provider.embed(&texts)).await?;
        if embeddings.len() != batch.len() {
            return Err(RagError::provider(
                self.embedding_provider.name(),
                format!("returned {} embeddings for {} inputs", embeddings.len(), batch.len()),
            ));
        }
        check_dimensions(&embeddings, self.embedding_provider.dimensions())?;

        let embedded: Vec<Chunk> = batch
            .iter()
            .cloned()
            .zip(embeddings)
            .map(|(chunk, embedding)| Chunk { embedding: Some(embedding), ..chunk })
            .collect();

        with_retry(policy, timeout, "upsert", || self.vector_store.upsert(&embedded)).await?;
        Ok(embedded.len())
    }
}

/// Builder for constructing an [`IngestionPipeline`].
///
/// `config`, `embedding_provider` and `vector_store` are required. Without
/// an explicit chunker a [`RecursiveChunker`] is built from the config.
#[derive(Default)]
pub struct IngestionPipelineBuilder {
    config: Option<RagConfig>,
    chunker: Option<Arc<dyn Chunker>>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    vector_store: Option<Arc<dyn VectorStore>>,
}

impl IngestionPipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set a custom chunker.
    pub fn chunker(mut self, chunker: Arc<dyn Chunker>) -> Self {
        self.chunker = Some(chunker);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the vector store backend.
    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    /// Build the [`IngestionPipeline`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfig`] if a required field is missing or
    /// the config does not validate.
    pub fn build(self) -> Result<IngestionPipeline> {
        let config =
            self.config.ok_or_else(|| RagError::InvalidConfig("config is required".to_string()))?;
        config.validate()?;
        let embedding_provider = self.embedding_provider.ok_or_else(|| {
            RagError::InvalidConfig("embedding_provider is required".to_string())
        })?;
        let vector_store = self
            .vector_store
            .ok_or_else(|| RagError::InvalidConfig("vector_store is required".to_string()))?;
        let chunker = match self.chunker {
            Some(chunker) => chunker,
            None => Arc::new(RecursiveChunker::from_config(&config)?),
        };

        Ok(IngestionPipeline { config, chunker, embedding_provider, vector_store })
    }
}
