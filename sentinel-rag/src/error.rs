//! Error types for the `sentinel-rag` crate.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in ingestion and query operations.
///
/// An unsafe guard verdict is not an error: it surfaces as a blocked
/// [`RunStatus`](crate::orchestrator::RunStatus).
#[derive(Debug, Error)]
pub enum RagError {
    /// The caller supplied input that can never succeed. Not retried.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A configuration value is inconsistent or unsupported.
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    /// A model provider (embedding, rerank, guard, generation) failed at the
    /// transport or authentication level.
    #[error("Provider unavailable ({provider}): {message}")]
    ProviderUnavailable {
        /// The provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The vector store backend could not be reached or rejected the request.
    #[error("Vector store unavailable ({backend}): {message}")]
    StoreUnavailable {
        /// The vector store backend that produced the error.
        backend: String,
        /// A description of the failure.
        message: String,
    },

    /// A vector's dimensionality does not match the configured store schema.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The dimensionality the store was created with.
        expected: usize,
        /// The dimensionality that was supplied.
        actual: usize,
    },

    /// An external call did not complete within its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The deadline that elapsed.
        after: Duration,
    },

    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,
}

impl RagError {
    /// Shorthand for [`RagError::ProviderUnavailable`].
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderUnavailable { provider: provider.into(), message: message.into() }
    }

    /// Shorthand for [`RagError::StoreUnavailable`].
    pub fn store(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::StoreUnavailable { backend: backend.into(), message: message.into() }
    }

    /// Whether the failure is transient and the call may be attempted again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable { .. } | Self::StoreUnavailable { .. } | Self::Timeout { .. }
        )
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;
