//! The guarded query pipeline.
//!
//! Each query moves through `INPUT_GUARD → RETRIEVE → RERANK → GENERATE →
//! OUTPUT_GUARD` and ends in exactly one [`RunStatus`]. Stages run strictly
//! in order within a run; runs share no mutable state beyond the in-flight
//! semaphore that bounds how many are past the input guard at once.
//!
//! # Example
//!
//! ```rust,ignore
//! use sentinel_rag::{Query, QueryOrchestrator, RagConfig};
//!
//! let orchestrator = QueryOrchestrator::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(embedder)
//!     .vector_store(store)
//!     .reranker(reranker)
//!     .safety_classifier(classifier)
//!     .generator(generator)
//!     .build()?;
//!
//! let outcome = orchestrator.answer(Query::new("What is Qdrant?")).await?;
//! println!("{}: {}", outcome.status, outcome.answer);
//! ```

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, SemaphorePermit, mpsc};
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, field, info, info_span, instrument, warn};
use uuid::Uuid;

use crate::config::RagConfig;
use crate::document::{Candidate, MetadataFilter, ScoreStage};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generator::Generator;
use crate::guard::{Guard, SafetyClassifier, SafetyVerdict};
use crate::prompt::build_prompt;
use crate::reranker::{Reranker, fallback_order};
use crate::retry::with_retry;
use crate::vectorstore::VectorStore;

/// Returned in place of an answer when the question is refused.
pub const BLOCKED_INPUT_MESSAGE: &str =
    "Sorry, I can't help with that request. Please rephrase your question.";
/// Returned in place of a generated answer that failed the safety check.
pub const BLOCKED_OUTPUT_MESSAGE: &str =
    "The generated answer was withheld because it did not pass the safety check.";
/// Returned when a stage failed after retries.
pub const FAILED_MESSAGE: &str =
    "The service is temporarily unavailable. Please try again later.";

/// A pipeline stage. Ordered by execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    InputGuard,
    Retrieve,
    Rerank,
    Generate,
    OutputGuard,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InputGuard => "INPUT_GUARD",
            Self::Retrieve => "RETRIEVE",
            Self::Rerank => "RERANK",
            Self::Generate => "GENERATE",
            Self::OutputGuard => "OUTPUT_GUARD",
        })
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Done,
    BlockedInput,
    BlockedOutput,
    Failed,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Done => "DONE",
            Self::BlockedInput => "BLOCKED_INPUT",
            Self::BlockedOutput => "BLOCKED_OUTPUT",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        })
    }
}

/// A user question plus retrieval parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    /// Candidates to retrieve. Defaults to `initial_top_k`; clamped to `max_top_k`.
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub filter: Option<MetadataFilter>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), top_k: None, filter: None }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }

    pub fn with_filter(mut self, filter: MetadataFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Time spent in one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StageTiming {
    pub stage: Stage,
    pub elapsed: Duration,
}

/// A chunk the answer was generated from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub document_id: String,
    pub chunk_id: String,
    pub chunk_index: usize,
    pub filename: Option<String>,
    pub score: f32,
    pub score_stage: ScoreStage,
}

impl From<&Candidate> for SourceRef {
    fn from(candidate: &Candidate) -> Self {
        let chunk = &candidate.chunk;
        Self {
            document_id: chunk.document_id.clone(),
            chunk_id: chunk.id.clone(),
            chunk_index: chunk.index,
            filename: chunk.metadata.get("filename").cloned(),
            score: candidate.score,
            score_stage: candidate.stage,
        }
    }
}

/// The end-to-end state of one query. Lives only for the duration of the
/// request.
#[derive(Debug)]
pub struct PipelineRun {
    run_id: String,
    query: Query,
    top_k: usize,
    stage: Stage,
    input_verdict: Option<SafetyVerdict>,
    output_verdict: Option<SafetyVerdict>,
    candidates: Vec<Candidate>,
    reranked: Vec<Candidate>,
    answer: String,
    reranker_fallback: bool,
    timings: Vec<StageTiming>,
    stage_started: Instant,
}

impl PipelineRun {
    fn new(query: Query, top_k: usize) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            query,
            top_k,
            stage: Stage::InputGuard,
            input_verdict: None,
            output_verdict: None,
            candidates: Vec::new(),
            reranked: Vec::new(),
            answer: String::new(),
            reranker_fallback: false,
            timings: Vec::new(),
            stage_started: Instant::now(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn input_verdict(&self) -> Option<&SafetyVerdict> {
        self.input_verdict.as_ref()
    }

    pub fn output_verdict(&self) -> Option<&SafetyVerdict> {
        self.output_verdict.as_ref()
    }

    /// Candidates kept after reranking (or the fallback ordering).
    pub fn reranked(&self) -> &[Candidate] {
        &self.reranked
    }

    /// Move to a later stage. Stages never go backwards.
    fn advance(&mut self, next: Stage) {
        debug_assert!(next > self.stage, "stage {next} does not follow {}", self.stage);
        self.close_stage();
        debug!(run_id = %self.run_id, stage = %next, "entering stage");
        self.stage = next;
    }

    fn close_stage(&mut self) {
        let now = Instant::now();
        self.timings.push(StageTiming { stage: self.stage, elapsed: now - self.stage_started });
        self.stage_started = now;
    }

    fn finish(mut self, status: RunStatus) -> RunOutcome {
        self.close_stage();
        let (answer, sources) = match status {
            RunStatus::Done => {
                (self.answer, self.reranked.iter().map(SourceRef::from).collect())
            }
            RunStatus::BlockedInput => (BLOCKED_INPUT_MESSAGE.to_string(), Vec::new()),
            RunStatus::BlockedOutput => (BLOCKED_OUTPUT_MESSAGE.to_string(), Vec::new()),
            RunStatus::Failed => (FAILED_MESSAGE.to_string(), Vec::new()),
            RunStatus::Cancelled => (String::new(), Vec::new()),
        };
        let elapsed: Duration = self.timings.iter().map(|t| t.elapsed).sum();
        info!(
            run_id = %self.run_id,
            status = %status,
            stage = %self.stage,
            candidates = self.candidates.len(),
            sources = sources.len(),
            reranker_fallback = self.reranker_fallback,
            elapsed_ms = elapsed.as_millis() as u64,
            "run finished"
        );
        RunOutcome {
            run_id: self.run_id,
            status,
            answer,
            sources,
            final_stage: self.stage,
            failed_stage: (status == RunStatus::Failed).then_some(self.stage),
            reranker_fallback: self.reranker_fallback,
            stage_timings: self.timings,
        }
    }
}

/// What a caller gets back from a blocking run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub run_id: String,
    pub status: RunStatus,
    /// The generated answer, or the fixed message for a non-`Done` status.
    pub answer: String,
    /// Context the answer was grounded on. Empty unless `Done`.
    pub sources: Vec<SourceRef>,
    /// The stage the run was in when it ended.
    pub final_stage: Stage,
    /// Set only for [`RunStatus::Failed`].
    pub failed_stage: Option<Stage>,
    /// Whether the retrieval order was used because the reranker failed.
    pub reranker_fallback: bool,
    pub stage_timings: Vec<StageTiming>,
}

/// One event of a streaming run.
///
/// A stream carries zero or more `Fragment`s followed by exactly one
/// terminal event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum AnswerEvent {
    Fragment(String),
    /// Clean end of stream.
    Done { sources: Vec<SourceRef> },
    /// The question or the answer was refused. Fragments already emitted stand.
    Blocked { stage: Stage, message: String },
    Failed { stage: Stage, message: String },
    Cancelled,
}

impl AnswerEvent {
    /// Whether no further events follow this one.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Fragment(_))
    }
}

/// Live events of a streaming run. Dropping it cancels the run.
#[derive(Debug)]
pub struct AnswerStream {
    run_id: String,
    events: ReceiverStream<AnswerEvent>,
}

impl AnswerStream {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

impl Stream for AnswerStream {
    type Item = AnswerEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

struct Inner {
    config: RagConfig,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    vector_store: Arc<dyn VectorStore>,
    reranker: Option<Arc<dyn Reranker>>,
    guard: Guard,
    generator: Arc<dyn Generator>,
    in_flight: Semaphore,
}

/// Drives queries through the guarded pipeline.
///
/// Cheap to clone; clones share the providers and the in-flight limit.
/// Construct one via [`QueryOrchestrator::builder()`].
#[derive(Clone)]
pub struct QueryOrchestrator {
    inner: Arc<Inner>,
}

impl fmt::Debug for QueryOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOrchestrator")
            .field("embedding_provider", &self.inner.embedding_provider.name())
            .field("vector_store", &self.inner.vector_store.backend())
            .field("reranker", &self.inner.reranker.as_ref().map(|r| r.name().to_string()))
            .field("guard", &self.inner.guard)
            .field("generator", &self.inner.generator.name())
            .finish()
    }
}

impl QueryOrchestrator {
    /// Create a new [`QueryOrchestratorBuilder`].
    pub fn builder() -> QueryOrchestratorBuilder {
        QueryOrchestratorBuilder::default()
    }

    /// Return a reference to the orchestrator configuration.
    pub fn config(&self) -> &RagConfig {
        &self.inner.config
    }

    /// Answer a query and wait for the complete result.
    ///
    /// Blocked and failed runs are returned as a [`RunOutcome`] with the
    /// matching status, not as errors.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidInput`] for an empty or over-long query, or
    /// a zero `top_k`. No external call has been made in that case.
    #[instrument(skip_all, fields(run_id = field::Empty))]
    pub async fn answer(&self, query: Query) -> Result<RunOutcome> {
        let inner = &self.inner;
        let (query, top_k) = inner.validate(query)?;
        let mut run = PipelineRun::new(query, top_k);
        Span::current().record("run_id", run.run_id.as_str());

        if !inner.input_guard(&mut run).await {
            return Ok(run.finish(RunStatus::BlockedInput));
        }

        let _permit = match inner.admit(&mut run).await {
            Ok(permit) => permit,
            Err(e) => return Ok(inner.fail(run, &e)),
        };
        if let Err(e) = inner.retrieve_and_rerank(&mut run).await {
            return Ok(inner.fail(run, &e));
        }

        run.advance(Stage::Generate);
        let prompt = build_prompt(&run.query.text, &run.reranked);
        let generated = with_retry(&inner.config.retry, inner.config.call_timeout(), "generate", || {
            inner.generator.generate(&prompt)
        })
        .await;
        match generated {
            Ok(answer) => run.answer = answer,
            Err(e) => return Ok(inner.fail(run, &e)),
        }

        let status = inner.output_guard(&mut run).await;
        Ok(run.finish(status))
    }

    /// Answer a query, forwarding answer fragments as they are generated.
    ///
    /// The run proceeds in a background task. Cancelling `cancel` or dropping
    /// the returned stream stops it: the generator stream is dropped, the
    /// output guard is skipped, and no further fragments are sent.
    ///
    /// # Errors
    ///
    /// Same validation errors as [`answer`](QueryOrchestrator::answer),
    /// returned before the task starts.
    pub fn answer_stream(&self, query: Query, cancel: CancellationToken) -> Result<AnswerStream> {
        let (query, top_k) = self.inner.validate(query)?;
        let run = PipelineRun::new(query, top_k);
        let run_id = run.run_id.clone();
        let (tx, rx) = mpsc::channel(self.inner.config.stream_buffer);

        let span = info_span!("answer_stream", run_id = %run_id);
        tokio::spawn(Arc::clone(&self.inner).drive_stream(run, tx, cancel).instrument(span));

        Ok(AnswerStream { run_id, events: ReceiverStream::new(rx) })
    }
}

impl Inner {
    fn validate(&self, mut query: Query) -> Result<(Query, usize)> {
        let text = query.text.trim();
        if text.is_empty() {
            return Err(RagError::InvalidInput("query text is empty".into()));
        }
        let chars = text.chars().count();
        if chars > self.config.max_query_chars {
            return Err(RagError::InvalidInput(format!(
                "query is {chars} characters, the maximum is {}",
                self.config.max_query_chars
            )));
        }
        if query.top_k == Some(0) {
            return Err(RagError::InvalidInput("top_k must be greater than zero".into()));
        }
        let top_k = query.top_k.unwrap_or(self.config.initial_top_k).min(self.config.max_top_k);
        query.text = text.to_string();
        Ok((query, top_k))
    }

    /// Returns whether the query may proceed.
    async fn input_guard(&self, run: &mut PipelineRun) -> bool {
        let verdict = self.guard.check(&run.query.text).await;
        let safe = verdict.is_safe();
        if !safe {
            info!(
                run_id = %run.run_id,
                fail_closed = verdict.fail_closed,
                categories = ?verdict.categories.iter().map(|c| c.code()).collect::<Vec<_>>(),
                "query blocked by input guard"
            );
        }
        run.input_verdict = Some(verdict);
        safe
    }

    async fn admit(&self, run: &mut PipelineRun) -> Result<SemaphorePermit<'_>> {
        run.advance(Stage::Retrieve);
        self.in_flight.acquire().await.map_err(|_| RagError::Cancelled)
    }

    async fn retrieve_and_rerank(&self, run: &mut PipelineRun) -> Result<()> {
        let policy = &self.config.retry;
        let timeout = self.config.call_timeout();

        let text = run.query.text.as_str();
        let embedding =
            with_retry(policy, timeout, "embed", || self.embedding_provider.embed_one(text)).await?;
        let filter = run.query.filter.as_ref();
        let top_k = run.top_k;
        let candidates = with_retry(policy, timeout, "search", || {
            self.vector_store.search(&embedding, top_k, filter)
        })
        .await?;
        debug!(run_id = %run.run_id, retrieved = candidates.len(), top_k, "retrieved candidates");
        run.candidates = candidates;

        run.advance(Stage::Rerank);
        run.reranked = self.rerank(run).await?;
        Ok(())
    }

    async fn rerank(&self, run: &mut PipelineRun) -> Result<Vec<Candidate>> {
        let top_n = self.config.final_top_n.min(run.candidates.len());
        let reranker = match &self.reranker {
            Some(reranker) if self.config.rerank_enabled && top_n > 0 => reranker,
            _ => return Ok(fallback_order(run.candidates.clone(), top_n)),
        };

        let query = run.query.text.as_str();
        let candidates = &run.candidates;
        let reranked = with_retry(&self.config.retry, self.config.call_timeout(), "rerank", || {
            reranker.rerank(query, candidates.clone(), top_n)
        })
        .await;

        match reranked {
            Ok(mut reranked) => {
                reranked.truncate(top_n);
                Ok(reranked)
            }
            Err(e) if self.config.rerank_required => Err(e),
            Err(e) => {
                warn!(
                    run_id = %run.run_id,
                    reranker = reranker.name(),
                    error = %e,
                    "reranker unavailable, using retrieval order"
                );
                run.reranker_fallback = true;
                Ok(fallback_order(run.candidates.clone(), top_n))
            }
        }
    }

    async fn output_guard(&self, run: &mut PipelineRun) -> RunStatus {
        run.advance(Stage::OutputGuard);
        let verdict = self.guard.check(&run.answer).await;
        let status = if verdict.is_safe() {
            RunStatus::Done
        } else {
            info!(
                run_id = %run.run_id,
                fail_closed = verdict.fail_closed,
                categories = ?verdict.categories.iter().map(|c| c.code()).collect::<Vec<_>>(),
                "answer blocked by output guard"
            );
            RunStatus::BlockedOutput
        };
        run.output_verdict = Some(verdict);
        status
    }

    fn fail(&self, run: PipelineRun, e: &RagError) -> RunOutcome {
        error!(run_id = %run.run_id, stage = %run.stage, error = %e, "stage failed");
        run.finish(RunStatus::Failed)
    }

    async fn drive_stream(
        self: Arc<Self>,
        mut run: PipelineRun,
        tx: mpsc::Sender<AnswerEvent>,
        cancel: CancellationToken,
    ) {
        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            _ = tx.closed() => None,
            status = self.stream_run(&mut run, &tx) => Some(status),
        };

        let status = match status {
            Some(status) => status,
            None => {
                debug!(run_id = %run.run_id, stage = %run.stage, "stream cancelled");
                let _ = tx.try_send(AnswerEvent::Cancelled);
                RunStatus::Cancelled
            }
        };
        run.finish(status);
    }

    async fn stream_run(&self, run: &mut PipelineRun, tx: &mpsc::Sender<AnswerEvent>) -> RunStatus {
        if !self.input_guard(run).await {
            let event = AnswerEvent::Blocked {
                stage: Stage::InputGuard,
                message: BLOCKED_INPUT_MESSAGE.to_string(),
            };
            return send_terminal(tx, event, RunStatus::BlockedInput).await;
        }

        let _permit = match self.admit(run).await {
            Ok(permit) => permit,
            Err(e) => return self.fail_stream(run, tx, &e).await,
        };
        if let Err(e) = self.retrieve_and_rerank(run).await {
            return self.fail_stream(run, tx, &e).await;
        }

        run.advance(Stage::Generate);
        let prompt = build_prompt(&run.query.text, &run.reranked);
        let timeout = self.config.call_timeout();
        let started = with_retry(&self.config.retry, timeout, "generate", || {
            self.generator.generate_stream(&prompt)
        })
        .await;
        let mut fragments = match started {
            Ok(stream) => stream,
            Err(e) => return self.fail_stream(run, tx, &e).await,
        };

        loop {
            let next = match tokio::time::timeout(timeout, fragments.next()).await {
                Ok(next) => next,
                Err(_) => {
                    let e = RagError::Timeout { operation: "generate".into(), after: timeout };
                    return self.fail_stream(run, tx, &e).await;
                }
            };
            match next {
                Some(Ok(fragment)) if fragment.is_empty() => {}
                Some(Ok(fragment)) => {
                    run.answer.push_str(&fragment);
                    if tx.send(AnswerEvent::Fragment(fragment)).await.is_err() {
                        return RunStatus::Cancelled;
                    }
                }
                Some(Err(e)) => return self.fail_stream(run, tx, &e).await,
                None => break,
            }
        }
        drop(fragments);

        match self.output_guard(run).await {
            RunStatus::Done => {
                let sources = run.reranked.iter().map(SourceRef::from).collect();
                send_terminal(tx, AnswerEvent::Done { sources }, RunStatus::Done).await
            }
            status => {
                let event = AnswerEvent::Blocked {
                    stage: Stage::OutputGuard,
                    message: BLOCKED_OUTPUT_MESSAGE.to_string(),
                };
                send_terminal(tx, event, status).await
            }
        }
    }

    async fn fail_stream(
        &self,
        run: &PipelineRun,
        tx: &mpsc::Sender<AnswerEvent>,
        e: &RagError,
    ) -> RunStatus {
        error!(run_id = %run.run_id, stage = %run.stage, error = %e, "stage failed");
        let event = AnswerEvent::Failed { stage: run.stage, message: FAILED_MESSAGE.to_string() };
        send_terminal(tx, event, RunStatus::Failed).await
    }
}

async fn send_terminal(
    tx: &mpsc::Sender<AnswerEvent>,
    event: AnswerEvent,
    status: RunStatus,
) -> RunStatus {
    match tx.send(event).await {
        Ok(()) => status,
        Err(_) => RunStatus::Cancelled,
    }
}

/// Builder for constructing a [`QueryOrchestrator`].
///
/// Everything except the reranker is required. Without a reranker the
/// retrieval order is kept.
#[derive(Default)]
pub struct QueryOrchestratorBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    vector_store: Option<Arc<dyn VectorStore>>,
    reranker: Option<Arc<dyn Reranker>>,
    safety_classifier: Option<Arc<dyn SafetyClassifier>>,
    generator: Option<Arc<dyn Generator>>,
}

impl QueryOrchestratorBuilder {
    /// Set the orchestrator configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider used for query embeddings.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the vector store backend.
    pub fn vector_store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.vector_store = Some(store);
        self
    }

    /// Set the reranker.
    pub fn reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Set the classifier used by both guards.
    pub fn safety_classifier(mut self, classifier: Arc<dyn SafetyClassifier>) -> Self {
        self.safety_classifier = Some(classifier);
        self
    }

    /// Set the answer generator.
    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Build the [`QueryOrchestrator`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::InvalidConfig`] if a required field is missing or
    /// the config does not validate.
    pub fn build(self) -> Result<QueryOrchestrator> {
        let missing = |name: &str| RagError::InvalidConfig(format!("{name} is required"));
        let config = self.config.ok_or_else(|| missing("config"))?;
        config.validate()?;
        let embedding_provider =
            self.embedding_provider.ok_or_else(|| missing("embedding_provider"))?;
        let vector_store = self.vector_store.ok_or_else(|| missing("vector_store"))?;
        let classifier = self.safety_classifier.ok_or_else(|| missing("safety_classifier"))?;
        let generator = self.generator.ok_or_else(|| missing("generator"))?;

        let guard = Guard::new(classifier, config.guard_timeout());
        let in_flight = Semaphore::new(config.max_in_flight);
        Ok(QueryOrchestrator {
            inner: Arc::new(Inner {
                config,
                embedding_provider,
                vector_store,
                reranker: self.reranker,
                guard,
                generator,
                in_flight,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::ExtractiveGenerator;
    use crate::guard::KeywordClassifier;
    use crate::hashing::HashEmbeddingProvider;
    use crate::inmemory::InMemoryVectorStore;
    use crate::prompt::NOT_FOUND_ANSWER;

    async fn orchestrator(config: RagConfig) -> QueryOrchestrator {
        let store = Arc::new(InMemoryVectorStore::new());
        store.ensure_schema(32).await.unwrap();
        QueryOrchestrator::builder()
            .config(config)
            .embedding_provider(Arc::new(HashEmbeddingProvider::new(32).unwrap()))
            .vector_store(store)
            .safety_classifier(Arc::new(KeywordClassifier::with_default_rules()))
            .generator(Arc::new(ExtractiveGenerator::new()))
            .build()
            .unwrap()
    }

    #[test]
    fn stages_are_ordered_and_display_upper_snake() {
        assert!(Stage::InputGuard < Stage::Retrieve);
        assert!(Stage::Generate < Stage::OutputGuard);
        assert_eq!(Stage::OutputGuard.to_string(), "OUTPUT_GUARD");
        assert_eq!(RunStatus::BlockedInput.to_string(), "BLOCKED_INPUT");
        assert_eq!(serde_json::to_string(&Stage::Rerank).unwrap(), "\"RERANK\"");
    }

    #[test]
    fn builder_requires_components() {
        let err = QueryOrchestrator::builder().config(RagConfig::default()).build().unwrap_err();
        assert!(matches!(err, RagError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn validation_trims_and_clamps() {
        let config = RagConfig::builder().max_query_chars(10).max_top_k(50).build().unwrap();
        let orchestrator = orchestrator(config).await;
        let inner = &orchestrator.inner;

        let (query, top_k) = inner.validate(Query::new("  hello  ").with_top_k(500)).unwrap();
        assert_eq!(query.text, "hello");
        assert_eq!(top_k, 50);

        assert!(matches!(inner.validate(Query::new(" \n ")), Err(RagError::InvalidInput(_))));
        assert!(matches!(
            inner.validate(Query::new("x".repeat(11))),
            Err(RagError::InvalidInput(_))
        ));
        assert!(matches!(
            inner.validate(Query::new("ok").with_top_k(0)),
            Err(RagError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn empty_store_answers_not_found() {
        let orchestrator = orchestrator(RagConfig::default()).await;
        let outcome = orchestrator.answer(Query::new("What is Qdrant?")).await.unwrap();
        assert_eq!(outcome.status, RunStatus::Done);
        assert_eq!(outcome.answer, NOT_FOUND_ANSWER);
        assert!(outcome.sources.is_empty());
        assert_eq!(outcome.final_stage, Stage::OutputGuard);
        let stages: Vec<_> = outcome.stage_timings.iter().map(|t| t.stage).collect();
        assert_eq!(
            stages,
            [Stage::InputGuard, Stage::Retrieve, Stage::Rerank, Stage::Generate, Stage::OutputGuard]
        );
    }

    #[tokio::test]
    async fn unsafe_query_is_refused_with_fixed_message() {
        let orchestrator = orchestrator(RagConfig::default()).await;
        let outcome =
            orchestrator.answer(Query::new("how to make a nerve agent at home")).await.unwrap();
        assert_eq!(outcome.status, RunStatus::BlockedInput);
        assert_eq!(outcome.answer, BLOCKED_INPUT_MESSAGE);
        assert_eq!(outcome.final_stage, Stage::InputGuard);
        assert_eq!(outcome.failed_stage, None);
    }

    #[tokio::test]
    async fn stream_ends_with_done() {
        let orchestrator = orchestrator(RagConfig::default()).await;
        let stream =
            orchestrator.answer_stream(Query::new("anything"), CancellationToken::new()).unwrap();
        let events: Vec<AnswerEvent> = stream.collect().await;
        let (last, fragments) = events.split_last().unwrap();
        assert_eq!(*last, AnswerEvent::Done { sources: Vec::new() });
        let text: String = fragments
            .iter()
            .map(|e| match e {
                AnswerEvent::Fragment(f) => f.as_str(),
                other => panic!("unexpected event {other:?}"),
            })
            .collect();
        assert_eq!(text, NOT_FOUND_ANSWER);
    }
}
