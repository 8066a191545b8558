//! Answer generation.

use std::collections::HashSet;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tracing::debug;

use crate::error::Result;
use crate::prompt::{NOT_FOUND_ANSWER, parse_prompt};

/// A stream of answer fragments. The stream ending is the end-of-stream
/// marker; an `Err` item is an error fragment and ends the stream.
///
/// Dropping the stream cancels generation and releases the connection.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A model that produces a natural-language answer from a prompt.
///
/// Generators do not retry; the orchestrator applies the retry policy.
#[async_trait]
pub trait Generator: Send + Sync {
    /// A short name for logs and error messages.
    fn name(&self) -> &str;

    /// Start generating and return the answer incrementally.
    async fn generate_stream(&self, prompt: &str) -> Result<FragmentStream>;

    /// Generate the complete answer.
    ///
    /// The default concatenates [`generate_stream`](Generator::generate_stream),
    /// so both modes produce the same text for the same prompt.
    async fn generate(&self, prompt: &str) -> Result<String> {
        let mut stream = self.generate_stream(prompt).await?;
        let mut answer = String::new();
        while let Some(fragment) = stream.next().await {
            answer.push_str(&fragment?);
        }
        Ok(answer)
    }
}

/// A deterministic local generator that answers by quoting context.
///
/// It selects up to `max_sentences` context sentences sharing the most terms
/// with the question, cites their block numbers, and answers with
/// [`NOT_FOUND_ANSWER`] when the context is empty or nothing overlaps.
/// Fragments are emitted word by word.
#[derive(Debug, Clone)]
pub struct ExtractiveGenerator {
    max_sentences: usize,
}

impl Default for ExtractiveGenerator {
    fn default() -> Self {
        Self { max_sentences: 2 }
    }
}

impl ExtractiveGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_sentences(mut self, n: usize) -> Self {
        self.max_sentences = n.max(1);
        self
    }

    fn answer(&self, prompt: &str) -> String {
        let (blocks, question) = parse_prompt(prompt);
        let question_terms = terms(question);

        let mut scored: Vec<(usize, usize, &str)> = Vec::new();
        for (n, block) in blocks.iter().enumerate() {
            for sentence in sentences(block) {
                let overlap = terms(sentence).intersection(&question_terms).count();
                if overlap > 0 {
                    scored.push((overlap, n + 1, sentence));
                }
            }
        }
        if scored.is_empty() {
            return NOT_FOUND_ANSWER.to_string();
        }

        // Best overlap first; earlier blocks win ties.
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        scored
            .iter()
            .take(self.max_sentences)
            .map(|(_, n, sentence)| format!("{sentence} [{n}]"))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}

fn sentences(block: &str) -> impl Iterator<Item = &str> {
    block
        .split_inclusive(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl Generator for ExtractiveGenerator {
    fn name(&self) -> &str {
        "extractive"
    }

    async fn generate_stream(&self, prompt: &str) -> Result<FragmentStream> {
        let answer = self.answer(prompt);
        debug!(generator = "extractive", answer_chars = answer.chars().count(), "generated answer");
        let fragments: Vec<Result<String>> =
            answer.split_inclusive(' ').map(|w| Ok(w.to_string())).collect();
        Ok(Box::pin(futures::stream::iter(fragments)))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::document::{Candidate, Chunk};
    use crate::prompt::build_prompt;

    fn candidate(text: &str) -> Candidate {
        Candidate::similarity(
            Chunk {
                id: "d_0".into(),
                text: text.into(),
                index: 0,
                document_id: "d".into(),
                embedding: None,
                metadata: HashMap::new(),
            },
            1.0,
        )
    }

    #[tokio::test]
    async fn empty_context_answers_not_found() {
        let answer = ExtractiveGenerator::new().generate(&build_prompt("anything?", &[])).await;
        assert_eq!(answer.unwrap(), NOT_FOUND_ANSWER);
    }

    #[tokio::test]
    async fn quotes_matching_sentence_with_citation() {
        let prompt = build_prompt(
            "Which database stores vectors?",
            &[candidate("Bread needs yeast. Qdrant stores vectors for search."), candidate("Other.")],
        );
        let answer = ExtractiveGenerator::new().with_max_sentences(1).generate(&prompt).await;
        assert_eq!(answer.unwrap(), "Qdrant stores vectors for search. [1]");
    }

    #[tokio::test]
    async fn stream_concatenation_equals_blocking_answer() {
        let generator = ExtractiveGenerator::new();
        let prompt = build_prompt(
            "How does chunk overlap work?",
            &[candidate("Chunk overlap repeats text. Overlap keeps context across chunk edges.")],
        );
        let blocking = generator.generate(&prompt).await.unwrap();
        let fragments: Vec<String> = generator
            .generate_stream(&prompt)
            .await
            .unwrap()
            .map(|f| f.unwrap())
            .collect()
            .await;
        assert!(fragments.len() > 1);
        assert_eq!(fragments.concat(), blocking);
    }
}
