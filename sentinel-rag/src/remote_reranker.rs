//! Cross-encoder reranking over a `/rerank` HTTP endpoint.
//!
//! Speaks the request shape used by BGE-reranker deployments behind
//! OpenAI-compatible gateways: `{model, query, documents, top_n}` in,
//! `results[{index, relevance_score}]` out.
//!
//! This module is only available when the `openai` feature is enabled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::Candidate;
use crate::error::{RagError, Result};
use crate::http::ApiClient;
use crate::reranker::{Reranker, apply_scores, normalize_scores};

/// The default reranking model.
pub const DEFAULT_RERANK_MODEL: &str = "bge-reranker-v2-m3";

/// A [`Reranker`] backed by a remote cross-encoder.
///
/// # Example
///
/// ```rust,ignore
/// use sentinel_rag::remote_reranker::RemoteReranker;
///
/// let reranker = RemoteReranker::new("https://mkp-api.fptcloud.com/v1", api_key)?;
/// let top = reranker.rerank("What is AI?", candidates, 5).await?;
/// ```
pub struct RemoteReranker {
    api: ApiClient,
    model: String,
}

impl RemoteReranker {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new("rerank", base_url, api_key)?,
            model: DEFAULT_RERANK_MODEL.to_string(),
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Score every document against `query`, in document order.
    ///
    /// Scores are normalised into `[0, 1]` when the model returns values
    /// outside that range.
    pub async fn score_pairs(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let request =
            RerankRequest { model: &self.model, query, documents, top_n: documents.len() };
        let response: RerankResponse = self.api.post_json("rerank", &request).await?;
        let scores = response.scores_in_order(documents.len()).ok_or_else(|| {
            RagError::provider(self.api.provider(), "response does not score every document")
        })?;
        debug!(model = %self.model, documents = documents.len(), "scored pairs");
        Ok(normalize_scores(&scores))
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [&'a str],
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

/// Gateways disagree on the response shape; accept each known variant.
#[derive(Deserialize)]
#[serde(untagged)]
enum RerankResponse {
    Results { results: Vec<RerankResult> },
    Scores { scores: Vec<f32> },
    Data { data: Vec<f32> },
}

impl RerankResponse {
    /// One score per document in input order, or `None` if any is missing.
    fn scores_in_order(self, expected: usize) -> Option<Vec<f32>> {
        match self {
            Self::Results { results } => {
                let mut scores = vec![None; expected];
                for result in results {
                    *scores.get_mut(result.index)? = Some(result.relevance_score);
                }
                scores.into_iter().collect()
            }
            Self::Scores { scores } | Self::Data { data: scores } => {
                (scores.len() == expected).then_some(scores)
            }
        }
    }
}

#[async_trait]
impl Reranker for RemoteReranker {
    fn name(&self) -> &str {
        self.api.provider()
    }

    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<Candidate>,
        top_n: usize,
    ) -> Result<Vec<Candidate>> {
        if candidates.is_empty() || top_n == 0 {
            return Ok(Vec::new());
        }
        let documents: Vec<&str> = candidates.iter().map(|c| c.chunk.text.as_str()).collect();
        let scores = self.score_pairs(query, &documents).await?;
        Ok(apply_scores(candidates, &scores, top_n))
    }
}
