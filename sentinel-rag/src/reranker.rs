//! Reranker trait for re-scoring retrieval candidates.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::document::{Candidate, ScoreStage};
use crate::error::Result;

/// A reranker that re-scores and reorders retrieval candidates.
///
/// Implementations can use cross-encoder models, lexical scoring, or other
/// strategies to improve precision beyond initial vector similarity. The
/// returned list has length `min(top_n, candidates.len())`, is sorted by
/// non-increasing relevance, and keeps the input order among equal scores.
/// Returned scores carry [`ScoreStage::Relevance`].
#[async_trait]
pub trait Reranker: Send + Sync {
    /// A short name for logs and error messages.
    fn name(&self) -> &str;

    /// Rerank `candidates` against `query`, keeping the best `top_n`.
    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<Candidate>,
        top_n: usize,
    ) -> Result<Vec<Candidate>>;
}

/// Attach relevance `scores` (one per candidate, in input order) and keep
/// the best `top_n`, using a stable sort so ties keep their input order.
pub fn apply_scores(candidates: Vec<Candidate>, scores: &[f32], top_n: usize) -> Vec<Candidate> {
    let mut scored: Vec<Candidate> = candidates
        .into_iter()
        .zip(scores.iter().copied())
        .map(|(candidate, score)| Candidate { score, stage: ScoreStage::Relevance, ..candidate })
        .collect();
    let key = |c: &Candidate| if c.score.is_nan() { f32::NEG_INFINITY } else { c.score };
    scored.sort_by(|a, b| key(b).total_cmp(&key(a)));
    scored.truncate(top_n);
    scored
}

/// Map raw model scores into `[0, 1]`.
///
/// Scores already inside the range are returned unchanged. Otherwise they are
/// min-max normalised; if every score is equal, each becomes `0.5`.
pub fn normalize_scores(scores: &[f32]) -> Vec<f32> {
    if scores.iter().all(|s| (0.0..=1.0).contains(s)) {
        return scores.to_vec();
    }
    let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
    let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if max == min {
        return vec![0.5; scores.len()];
    }
    scores.iter().map(|s| (s - min) / (max - min)).collect()
}

/// The ordering used when no reranker is available: input order, truncated.
pub fn fallback_order(mut candidates: Vec<Candidate>, top_n: usize) -> Vec<Candidate> {
    candidates.truncate(top_n);
    candidates
}

/// A no-op reranker that keeps the retrieval order.
///
/// Useful as a default when no reranking is needed. Scores are left at their
/// similarity values.
///
/// # Example
///
/// ```rust,ignore
/// use sentinel_rag::NoOpReranker;
///
/// let reranker = NoOpReranker;
/// let top = reranker.rerank("query", candidates, 5).await?;
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpReranker;

#[async_trait]
impl Reranker for NoOpReranker {
    fn name(&self) -> &str {
        "none"
    }

    async fn rerank(
        &self,
        _query: &str,
        candidates: Vec<Candidate>,
        top_n: usize,
    ) -> Result<Vec<Candidate>> {
        Ok(fallback_order(candidates, top_n))
    }
}

/// A local lexical reranker.
///
/// Scores each candidate by the fraction of distinct query terms (lowercase
/// alphanumeric words of two or more characters) that appear in the chunk.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordReranker;

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl Reranker for KeywordReranker {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn rerank(
        &self,
        query: &str,
        candidates: Vec<Candidate>,
        top_n: usize,
    ) -> Result<Vec<Candidate>> {
        let query_terms = terms(query);
        if query_terms.is_empty() {
            let scores = vec![0.0; candidates.len()];
            return Ok(apply_scores(candidates, &scores, top_n));
        }
        let scores: Vec<f32> = candidates
            .iter()
            .map(|c| {
                let chunk_terms = terms(&c.chunk.text);
                let hits = query_terms.iter().filter(|t| chunk_terms.contains(*t)).count();
                hits as f32 / query_terms.len() as f32
            })
            .collect();
        Ok(apply_scores(candidates, &scores, top_n))
    }
}
