//! Embedding provider trait for generating vector embeddings from text.

use async_trait::async_trait;

use crate::error::{RagError, Result};

/// A provider that generates vector embeddings from text input.
///
/// Implementations wrap specific embedding backends behind a unified async
/// interface. [`embed`](EmbeddingProvider::embed) preserves input order and
/// returns exactly one vector of [`dimensions`](EmbeddingProvider::dimensions)
/// components per input. Providers do not retry; retry policy belongs to the
/// caller.
///
/// # Example
///
/// ```rust,ignore
/// use sentinel_rag::EmbeddingProvider;
///
/// let provider = MyEmbeddingProvider::new();
/// let vectors = provider.embed(&["hello", "world"]).await?;
/// assert_eq!(vectors[0].len(), provider.dimensions());
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// A short name for logs and error messages.
    fn name(&self) -> &str;

    /// Generate one embedding vector per input text, in input order.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidInput`] if `texts` exceeds
    ///   [`max_batch_size`](EmbeddingProvider::max_batch_size) or any text is
    ///   longer than the provider accepts.
    /// - [`RagError::ProviderUnavailable`] on transport or authentication failure.
    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Return the dimensionality of embeddings produced by this provider.
    fn dimensions(&self) -> usize;

    /// Largest batch accepted by a single [`embed`](EmbeddingProvider::embed) call.
    fn max_batch_size(&self) -> usize;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text]).await?.into_iter().next().ok_or_else(|| {
            RagError::provider(self.name(), "provider returned no embedding for a single input")
        })
    }
}

/// Verify that every vector has `expected` components.
pub fn check_dimensions(vectors: &[Vec<f32>], expected: usize) -> Result<()> {
    match vectors.iter().find(|v| v.len() != expected) {
        Some(v) => Err(RagError::DimensionMismatch { expected, actual: v.len() }),
        None => Ok(()),
    }
}

/// Reject batches that a provider with the given limits cannot accept.
pub(crate) fn check_batch(
    provider: &str,
    texts: &[&str],
    max_batch_size: usize,
    max_input_chars: usize,
) -> Result<()> {
    if texts.len() > max_batch_size {
        return Err(RagError::InvalidInput(format!(
            "{provider}: batch of {} exceeds the maximum of {max_batch_size}",
            texts.len()
        )));
    }
    if let Some(position) = texts.iter().position(|t| t.chars().count() > max_input_chars) {
        return Err(RagError::InvalidInput(format!(
            "{provider}: input {position} exceeds the maximum length of {max_input_chars} characters"
        )));
    }
    Ok(())
}
