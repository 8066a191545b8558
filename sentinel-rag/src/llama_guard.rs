//! Llama Guard 3 safety classification over chat completions.
//!
//! The model answers `safe`, or `unsafe` followed by a line of
//! comma-separated category codes such as `S1,S10`.
//!
//! This module is only available when the `openai` feature is enabled.

use async_trait::async_trait;
use tracing::warn;

use crate::chat::{ChatClient, ChatMessage};
use crate::error::Result;
use crate::guard::{HazardCategory, SafetyClassifier, SafetyVerdict};

/// The default guard model.
pub const DEFAULT_GUARD_MODEL: &str = "Llama-Guard-3-8B";

/// A [`SafetyClassifier`] backed by a Llama Guard model.
///
/// The client is forced to temperature 0 so the verdict is as stable as the
/// model allows.
///
/// # Example
///
/// ```rust,ignore
/// use sentinel_rag::chat::ChatClient;
/// use sentinel_rag::llama_guard::LlamaGuardClassifier;
///
/// let client = ChatClient::new("guard", base_url, api_key)?.with_model("Llama-Guard-3-8B");
/// let classifier = LlamaGuardClassifier::new(client);
/// ```
pub struct LlamaGuardClassifier {
    client: ChatClient,
}

impl LlamaGuardClassifier {
    pub fn new(client: ChatClient) -> Self {
        Self { client: client.with_temperature(0.0).with_max_tokens(32) }
    }
}

#[async_trait]
impl SafetyClassifier for LlamaGuardClassifier {
    fn name(&self) -> &str {
        self.client.provider()
    }

    async fn classify(&self, text: &str) -> Result<SafetyVerdict> {
        let output = self.client.complete(&[ChatMessage::user(text)]).await?;
        Ok(parse_verdict(text, &output))
    }
}

/// Interpret the model's reply. Anything unrecognised is unsafe.
pub fn parse_verdict(text: &str, output: &str) -> SafetyVerdict {
    let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
    match lines.next().map(str::to_ascii_lowercase).as_deref() {
        Some("safe") => SafetyVerdict::safe(text),
        Some("unsafe") => {
            let categories = lines
                .next()
                .into_iter()
                .flat_map(|line| line.split(','))
                .filter_map(HazardCategory::from_code);
            SafetyVerdict::unsafe_with(text, categories)
        }
        _ => {
            warn!(output_chars = output.len(), "unrecognised guard output, treating as unsafe");
            SafetyVerdict::fail_closed(text)
        }
    }
}
