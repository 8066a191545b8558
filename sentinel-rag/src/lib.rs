//! # sentinel-rag
//!
//! Guarded retrieval-augmented generation.
//!
//! ## Overview
//!
//! This crate answers questions from a private document collection with a
//! safety classifier on both sides of the model:
//!
//! ```text
//! query ─► input guard ─► retrieve ─► rerank ─► generate ─► output guard ─► answer
//! ```
//!
//! - [`IngestionPipeline`] - chunk, embed and store documents
//! - [`QueryOrchestrator`] - run the guarded query state machine, blocking or streamed
//! - [`ProviderSet`] - pick concrete backends by configuration key
//!
//! A guard that errors or times out blocks the run. Unsafe content never
//! reaches the caller; blocked runs return a fixed refusal message.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sentinel_rag::{Document, DocumentSource, ProviderSet, ProviderSettings, Query, RagConfig};
//!
//! let config = RagConfig::default();
//! let providers = ProviderSet::connect(&ProviderSettings::default(), &config).await?;
//! let ingestion = providers.ingestion_pipeline(config.clone())?;
//! ingestion
//!     .ingest(&Document::new(text, DocumentSource::new("handbook.md", "text/markdown")))
//!     .await?;
//!
//! let orchestrator = providers.query_orchestrator(config)?;
//! let outcome = orchestrator.answer(Query::new("How many vacation days do I get?")).await?;
//! println!("{}", outcome.answer);
//! ```
//!
//! ## Features
//!
//! | Feature | Enables |
//! |---------|---------|
//! | `openai` | OpenAI-compatible embeddings, chat generation, Llama Guard and remote reranking |
//! | `qdrant` | [Qdrant](https://qdrant.tech/) vector store |
//! | `pdf` | PDF text extraction in [`loader`] |
//! | `docx` | Word `.docx` text extraction in [`loader`] |
//! | `full` | Everything above |

pub mod chunking;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod generator;
pub mod guard;
pub mod hashing;
pub mod ingest;
pub mod inmemory;
pub mod loader;
pub mod orchestrator;
pub mod prompt;
pub mod providers;
pub mod reranker;
pub mod retry;
pub mod vectorstore;

#[cfg(feature = "openai")]
pub mod chat;
#[cfg(feature = "openai")]
mod http;
#[cfg(feature = "openai")]
pub mod llama_guard;
#[cfg(feature = "openai")]
pub mod openai;
#[cfg(feature = "openai")]
pub mod remote_reranker;

#[cfg(feature = "qdrant")]
pub mod qdrant;

pub use chunking::{Chunker, RecursiveChunker};
pub use config::{RagConfig, RagConfigBuilder};
pub use document::{Candidate, Chunk, Document, DocumentSource, MetadataFilter, ScoreStage};
pub use embedding::EmbeddingProvider;
pub use error::{RagError, Result};
pub use generator::{ExtractiveGenerator, FragmentStream, Generator};
pub use guard::{
    Guard, HazardCategory, KeywordClassifier, SafetyClassifier, SafetyVerdict, Verdict,
};
pub use hashing::HashEmbeddingProvider;
pub use ingest::{BatchFailure, IngestReport, IngestionPipeline, IngestionPipelineBuilder};
pub use inmemory::InMemoryVectorStore;
pub use loader::{FileKind, load_document};
pub use orchestrator::{
    AnswerEvent, AnswerStream, PipelineRun, Query, QueryOrchestrator, QueryOrchestratorBuilder,
    RunOutcome, RunStatus, SourceRef, Stage, StageTiming,
};
pub use providers::{ProviderSet, ProviderSettings};
pub use reranker::{KeywordReranker, NoOpReranker, Reranker};
pub use retry::RetryPolicy;
pub use vectorstore::VectorStore;

#[cfg(feature = "openai")]
pub use chat::{ChatClient, ChatGenerator};
#[cfg(feature = "openai")]
pub use llama_guard::LlamaGuardClassifier;
#[cfg(feature = "openai")]
pub use openai::OpenAIEmbeddingProvider;
#[cfg(feature = "openai")]
pub use remote_reranker::RemoteReranker;
#[cfg(feature = "qdrant")]
pub use qdrant::QdrantVectorStore;
