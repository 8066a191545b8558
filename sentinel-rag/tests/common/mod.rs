//! Test doubles with call counters shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use sentinel_rag::document::{Candidate, Chunk, MetadataFilter, ScoreStage};
use sentinel_rag::embedding::EmbeddingProvider;
use sentinel_rag::error::{RagError, Result};
use sentinel_rag::generator::{FragmentStream, Generator};
use sentinel_rag::guard::{HazardCategory, SafetyClassifier, SafetyVerdict};
use sentinel_rag::hashing::HashEmbeddingProvider;
use sentinel_rag::reranker::{Reranker, apply_scores};
use sentinel_rag::vectorstore::VectorStore;

pub const DIM: usize = 16;

#[derive(Debug, Default)]
pub struct Counter(AtomicUsize);

impl Counter {
    pub fn hit(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub fn chunk(document_id: &str, index: usize, text: &str) -> Chunk {
    Chunk {
        id: Chunk::chunk_id(document_id, index),
        text: text.to_string(),
        index,
        document_id: document_id.to_string(),
        embedding: None,
        metadata: HashMap::from([("filename".to_string(), format!("{document_id}.md"))]),
    }
}

/// Hash embeddings, counting `embed` calls and optionally failing some.
pub struct CountingEmbedder {
    inner: HashEmbeddingProvider,
    pub calls: Counter,
    fail_calls: Vec<usize>,
}

impl CountingEmbedder {
    pub fn new() -> Self {
        Self { inner: hash_embedder(), calls: Counter::default(), fail_calls: Vec::new() }
    }

    /// Fail the given 1-based calls with a retryable error.
    pub fn failing_on(calls: &[usize]) -> Self {
        Self { fail_calls: calls.to_vec(), ..Self::new() }
    }
}

pub fn hash_embedder() -> HashEmbeddingProvider {
    HashEmbeddingProvider::new(DIM).unwrap().with_max_batch_size(2)
}

#[async_trait]
impl EmbeddingProvider for CountingEmbedder {
    fn name(&self) -> &str {
        "counting"
    }

    async fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let call = self.calls.hit();
        if self.fail_calls.contains(&call) {
            return Err(RagError::provider("counting", "connection reset"));
        }
        self.inner.embed(texts).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn max_batch_size(&self) -> usize {
        self.inner.max_batch_size()
    }
}

/// A store that always returns the same candidates, truncated to `top_k`.
pub struct FixedStore {
    candidates: Vec<Candidate>,
    pub searches: Counter,
    pub last_filter: std::sync::Mutex<Option<MetadataFilter>>,
}

impl FixedStore {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self { candidates, searches: Counter::default(), last_filter: Default::default() }
    }

    /// `count` candidates with strictly decreasing similarity.
    pub fn descending(count: usize) -> Self {
        let candidates = (0..count)
            .map(|i| {
                let c = chunk("doc", i, &format!("Fact number {i} about the topic."));
                Candidate::similarity(c, 0.99 - i as f32 * 0.01)
            })
            .collect();
        Self::new(candidates)
    }
}

#[async_trait]
impl VectorStore for FixedStore {
    fn backend(&self) -> &str {
        "fixed"
    }

    async fn ensure_schema(&self, _dimensions: usize) -> Result<()> {
        Ok(())
    }

    async fn upsert(&self, _chunks: &[Chunk]) -> Result<()> {
        Ok(())
    }

    async fn search(
        &self,
        _embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<Candidate>> {
        self.searches.hit();
        *self.last_filter.lock().unwrap() = filter.cloned();
        Ok(self.candidates.iter().take(top_k).cloned().collect())
    }

    async fn delete_by_document(&self, _document_id: &str) -> Result<usize> {
        Ok(0)
    }
}

/// Reverses the input order, or fails every call when `failing`.
pub struct CountingReranker {
    failing: bool,
    pub calls: Counter,
}

impl CountingReranker {
    pub fn reversing() -> Self {
        Self { failing: false, calls: Counter::default() }
    }

    pub fn unreachable() -> Self {
        Self { failing: true, calls: Counter::default() }
    }
}

#[async_trait]
impl Reranker for CountingReranker {
    fn name(&self) -> &str {
        "counting"
    }

    async fn rerank(
        &self,
        _query: &str,
        candidates: Vec<Candidate>,
        top_n: usize,
    ) -> Result<Vec<Candidate>> {
        self.calls.hit();
        if self.failing {
            return Err(RagError::provider("counting", "connection refused"));
        }
        let scores: Vec<f32> = (0..candidates.len()).map(|i| i as f32).collect();
        Ok(apply_scores(candidates, &scores, top_n))
    }
}

/// Flags any text containing `marker`, optionally after a delay.
pub struct MarkerClassifier {
    marker: &'static str,
    delay: Option<Duration>,
    pub calls: Counter,
}

impl MarkerClassifier {
    pub fn new(marker: &'static str) -> Self {
        Self { marker, delay: None, calls: Counter::default() }
    }

    pub fn slow(marker: &'static str, delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::new(marker) }
    }
}

#[async_trait]
impl SafetyClassifier for MarkerClassifier {
    fn name(&self) -> &str {
        "marker"
    }

    async fn classify(&self, text: &str) -> Result<SafetyVerdict> {
        self.calls.hit();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if text.contains(self.marker) {
            Ok(SafetyVerdict::unsafe_with(text, [HazardCategory::ViolentCrimes]))
        } else {
            Ok(SafetyVerdict::safe(text))
        }
    }
}

/// Sets a flag when dropped.
pub struct DropFlag(pub Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

enum Script {
    Fragments(Vec<&'static str>),
    /// Emit the fragments, then never finish.
    Hang(Vec<&'static str>),
    Fail,
}

/// A generator that replays a fixed script and records its prompts.
pub struct ScriptedGenerator {
    script: Script,
    pub calls: Counter,
    pub dropped: Arc<AtomicBool>,
    pub prompts: std::sync::Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    fn with_script(script: Script) -> Self {
        Self {
            script,
            calls: Counter::default(),
            dropped: Arc::new(AtomicBool::new(false)),
            prompts: Default::default(),
        }
    }

    pub fn answering(fragments: &[&'static str]) -> Self {
        Self::with_script(Script::Fragments(fragments.to_vec()))
    }

    pub fn hanging_after(fragments: &[&'static str]) -> Self {
        Self::with_script(Script::Hang(fragments.to_vec()))
    }

    pub fn unreachable() -> Self {
        Self::with_script(Script::Fail)
    }

    pub fn was_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate_stream(&self, prompt: &str) -> Result<FragmentStream> {
        self.calls.hit();
        self.prompts.lock().unwrap().push(prompt.to_string());
        let (fragments, hang) = match &self.script {
            Script::Fail => return Err(RagError::provider("scripted", "503 Service Unavailable")),
            Script::Fragments(f) => (f.clone(), false),
            Script::Hang(f) => (f.clone(), true),
        };
        let flag = DropFlag(self.dropped.clone());
        let stream = async_stream::stream! {
            let _flag = flag;
            for fragment in fragments {
                yield Ok::<String, RagError>(fragment.to_string());
            }
            if hang {
                futures::future::pending::<()>().await;
            }
        };
        Ok(Box::pin(stream))
    }
}

pub fn relevance_sorted(candidates: &[Candidate]) -> bool {
    candidates.iter().all(|c| c.stage == ScoreStage::Relevance)
        && candidates.windows(2).all(|w| w[0].score >= w[1].score)
}
