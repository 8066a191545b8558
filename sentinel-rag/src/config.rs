//! Configuration for ingestion and query orchestration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::retry::RetryPolicy;

/// Runtime parameters shared by the ingestion pipeline and the query
/// orchestrator.
///
/// Deserializes with per-field defaults, so a partial TOML table or a handful
/// of environment overrides is enough. Call [`RagConfig::validate`] after
/// loading from an external source; [`RagConfigBuilder::build`] does so
/// automatically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Number of overlapping characters between consecutive chunks.
    pub chunk_overlap: usize,
    /// Largest accepted document, in bytes of UTF-8 text.
    pub max_document_bytes: usize,
    /// Number of chunks sent to the embedding provider per request.
    pub embed_batch_size: usize,
    /// Candidates retrieved from the vector store (`K_initial`).
    pub initial_top_k: usize,
    /// Candidates kept after reranking (`K_final`).
    pub final_top_n: usize,
    /// Upper clamp for a caller-requested K.
    pub max_top_k: usize,
    /// Longest accepted query, in characters.
    pub max_query_chars: usize,
    /// Queries allowed past the input guard at the same time.
    pub max_in_flight: usize,
    /// Per-attempt timeout for embedding, search, rerank and generation calls.
    pub call_timeout_ms: u64,
    /// Timeout for a single guard classification.
    pub guard_timeout_ms: u64,
    /// Retry policy for every stage except the guard.
    pub retry: RetryPolicy,
    /// Whether the reranker is consulted at all.
    pub rerank_enabled: bool,
    /// Fail the run instead of falling back when the reranker is unavailable.
    pub rerank_required: bool,
    /// Capacity of the fragment channel handed to streaming callers.
    pub stream_buffer: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            max_document_bytes: 50 * 1024 * 1024,
            embed_batch_size: 64,
            initial_top_k: 20,
            final_top_n: 5,
            max_top_k: 100,
            max_query_chars: 2000,
            max_in_flight: 32,
            call_timeout_ms: 30_000,
            guard_timeout_ms: 10_000,
            retry: RetryPolicy::default(),
            rerank_enabled: true,
            rerank_required: false,
            stream_buffer: 32,
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// Per-attempt timeout for non-guard external calls.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Timeout for one guard classification.
    pub fn guard_timeout(&self) -> Duration {
        Duration::from_millis(self.guard_timeout_ms)
    }

    /// Check that the parameters are consistent with each other.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfig`] if:
    /// - `chunk_size == 0` or `chunk_overlap >= chunk_size`
    /// - any count or timeout is zero
    /// - `final_top_n > initial_top_k` or `initial_top_k > max_top_k`
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::InvalidConfig("chunk_size must be greater than zero".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::InvalidConfig(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        let positive = [
            ("max_document_bytes", self.max_document_bytes),
            ("embed_batch_size", self.embed_batch_size),
            ("initial_top_k", self.initial_top_k),
            ("final_top_n", self.final_top_n),
            ("max_top_k", self.max_top_k),
            ("max_query_chars", self.max_query_chars),
            ("max_in_flight", self.max_in_flight),
            ("stream_buffer", self.stream_buffer),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(RagError::InvalidConfig(format!("{name} must be greater than zero")));
        }
        if self.call_timeout_ms == 0 || self.guard_timeout_ms == 0 {
            return Err(RagError::InvalidConfig("timeouts must be greater than zero".into()));
        }
        if self.final_top_n > self.initial_top_k {
            return Err(RagError::InvalidConfig(format!(
                "final_top_n ({}) must not exceed initial_top_k ({})",
                self.final_top_n, self.initial_top_k
            )));
        }
        if self.initial_top_k > self.max_top_k {
            return Err(RagError::InvalidConfig(format!(
                "initial_top_k ({}) must not exceed max_top_k ({})",
                self.initial_top_k, self.max_top_k
            )));
        }
        Ok(())
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the maximum chunk size in characters.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    /// Set the overlap between consecutive chunks in characters.
    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    /// Set the largest accepted document size in bytes.
    pub fn max_document_bytes(mut self, bytes: usize) -> Self {
        self.config.max_document_bytes = bytes;
        self
    }

    /// Set the number of chunks embedded per provider request.
    pub fn embed_batch_size(mut self, size: usize) -> Self {
        self.config.embed_batch_size = size;
        self
    }

    /// Set the number of candidates retrieved before reranking.
    pub fn initial_top_k(mut self, k: usize) -> Self {
        self.config.initial_top_k = k;
        self
    }

    /// Set the number of candidates kept after reranking.
    pub fn final_top_n(mut self, n: usize) -> Self {
        self.config.final_top_n = n;
        self
    }

    /// Set the clamp applied to caller-requested K values.
    pub fn max_top_k(mut self, k: usize) -> Self {
        self.config.max_top_k = k;
        self
    }

    /// Set the longest accepted query in characters.
    pub fn max_query_chars(mut self, chars: usize) -> Self {
        self.config.max_query_chars = chars;
        self
    }

    /// Set the number of queries allowed in flight concurrently.
    pub fn max_in_flight(mut self, permits: usize) -> Self {
        self.config.max_in_flight = permits;
        self
    }

    /// Set the per-attempt timeout for non-guard calls.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the timeout for guard classifications.
    pub fn guard_timeout(mut self, timeout: Duration) -> Self {
        self.config.guard_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the retry policy for non-guard calls.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    /// Enable or disable the reranking stage.
    pub fn rerank_enabled(mut self, enabled: bool) -> Self {
        self.config.rerank_enabled = enabled;
        self
    }

    /// Fail runs whose reranker is unavailable instead of falling back.
    pub fn rerank_required(mut self, required: bool) -> Self {
        self.config.rerank_required = required;
        self
    }

    /// Set the streaming fragment channel capacity.
    pub fn stream_buffer(mut self, capacity: usize) -> Self {
        self.config.stream_buffer = capacity;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfig`] under the conditions listed on
    /// [`RagConfig::validate`].
    pub fn build(self) -> Result<RagConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RagConfig::default();
        config.validate().unwrap();
        assert_eq!(config.initial_top_k, 20);
        assert_eq!(config.final_top_n, 5);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let err = RagConfig::builder().chunk_size(100).chunk_overlap(100).build().unwrap_err();
        assert!(matches!(err, RagError::InvalidConfig(msg) if msg.contains("chunk_overlap")));
    }

    #[test]
    fn final_top_n_cannot_exceed_initial_top_k() {
        let err = RagConfig::builder().initial_top_k(3).final_top_n(5).build().unwrap_err();
        assert!(matches!(err, RagError::InvalidConfig(msg) if msg.contains("final_top_n")));
    }

    #[test]
    fn zero_counts_are_rejected() {
        let err = RagConfig::builder().max_in_flight(0).build().unwrap_err();
        assert!(matches!(err, RagError::InvalidConfig(msg) if msg.contains("max_in_flight")));
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: RagConfig =
            serde_json::from_str(r#"{"chunk_size": 400, "chunk_overlap": 40}"#).unwrap();
        assert_eq!(config.chunk_size, 400);
        assert_eq!(config.chunk_overlap, 40);
        assert_eq!(config.initial_top_k, RagConfig::default().initial_top_k);
        config.validate().unwrap();
    }
}
