//! OpenAI-compatible embedding provider.
//!
//! This module is only available when the `openai` feature is enabled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embedding::{EmbeddingProvider, check_batch, check_dimensions};
use crate::error::{RagError, Result};
use crate::http::ApiClient;

/// The default OpenAI API base URL.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// The default model for OpenAI embeddings.
const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// The default dimensionality for `text-embedding-3-small`.
const DEFAULT_DIMENSIONS: usize = 1536;

/// An [`EmbeddingProvider`] backed by any OpenAI-compatible `/embeddings`
/// endpoint.
///
/// # Configuration
///
/// - `base_url` – defaults to the OpenAI API; any compatible gateway works.
/// - `model` – defaults to `text-embedding-3-small`.
/// - `dimensions` – expected vector length; also sent as the Matryoshka
///   dimension override when set explicitly.
/// - `api_key` – from the constructor or the `OPENAI_API_KEY` environment variable.
///
/// # Example
///
/// ```rust,ignore
/// use sentinel_rag::openai::OpenAIEmbeddingProvider;
///
/// let provider = OpenAIEmbeddingProvider::new("sk-...")?
///     .with_base_url("https://mkp-api.fptcloud.com/v1")?
///     .with_model("Vietnamese_Embedding")
///     .with_dimensions(1024);
/// let vectors = provider.embed(&["hello world"]).await?;
/// ```
pub struct OpenAIEmbeddingProvider {
    api: ApiClient,
    api_key: String,
    model: String,
    dimensions: usize,
    /// If set, passed to the API for Matryoshka dimension truncation.
    request_dimensions: Option<usize>,
    max_batch_size: usize,
    max_input_chars: usize,
}

impl OpenAIEmbeddingProvider {
    /// Create a new provider for the OpenAI API with the given key.
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        Ok(Self {
            api: ApiClient::new("openai", OPENAI_BASE_URL, api_key.clone())?,
            api_key,
            model: DEFAULT_MODEL.into(),
            dimensions: DEFAULT_DIMENSIONS,
            request_dimensions: None,
            max_batch_size: 256,
            max_input_chars: 8192 * 3,
        })
    }

    /// Create a new provider using the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            RagError::InvalidConfig("OPENAI_API_KEY environment variable not set".into())
        })?;
        Self::new(api_key)
    }

    /// Point the provider at another OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Result<Self> {
        self.api = ApiClient::new("openai", base_url, self.api_key.clone())?;
        Ok(self)
    }

    /// Set the model name (e.g. `text-embedding-3-large`).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the output dimensions (Matryoshka support).
    pub fn with_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.request_dimensions = Some(dims);
        self
    }

    /// Expect `dims` components without asking the API to truncate.
    pub fn with_native_dimensions(mut self, dims: usize) -> Self {
        self.dimensions = dims;
        self.request_dimensions = None;
        self
    }

    /// Set the largest batch sent per request.
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size.max(1);
        self
    }

    /// Set the longest accepted input, in characters.
    pub fn with_max_input_chars(mut self, chars: usize) -> Self {
        self.max_input_chars = chars;
        self
    }
}

// ── OpenAI API request/response types ──────────────────────────────

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// Restore input order; the API may return items out of order with an `index`.
fn into_ordered(mut data: Vec<EmbeddingData>) -> Vec<Vec<f32>> {
    if data.iter().all(|d| d.index.is_some()) {
        data.sort_by_key(|d| d.index);
    }
    data.into_iter().map(|d| d.embedding).collect()
}

// ── EmbeddingProvider implementation ───────────────────────────────

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    fn name(&self) -> &str {
        self.api.provider()
    }

    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        check_batch(self.name(), texts, self.max_batch_size, self.max_input_chars)?;

        debug!(provider = "openai", batch_size = texts.len(), model = %self.model, "embedding batch");

        let request =
            EmbeddingRequest { model: &self.model, input: texts, dimensions: self.request_dimensions };
        let response: EmbeddingResponse = self.api.post_json("embeddings", &request).await?;
        let vectors = into_ordered(response.data);

        if vectors.len() != texts.len() {
            return Err(RagError::provider(
                self.name(),
                format!("returned {} embeddings for {} inputs", vectors.len(), texts.len()),
            ));
        }
        check_dimensions(&vectors, self.dimensions)?;
        Ok(vectors)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }
}
