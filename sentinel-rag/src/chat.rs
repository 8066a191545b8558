//! OpenAI-compatible chat completions, blocking and streamed.
//!
//! Streaming decodes the server-sent event body: every event's data is a
//! JSON chunk with a content delta, and `data: [DONE]` ends the stream. Dropping the returned stream closes the connection.
//!
//! This module is only available when the `openai` feature is enabled.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RagError, Result};
use crate::generator::{FragmentStream, Generator};
use crate::http::ApiClient;

/// The default generation model.
pub const DEFAULT_CHAT_MODEL: &str = "GLM-4.5";

/// One chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".into(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".into(), content: content.into() }
    }
}

/// A client for one chat model on an OpenAI-compatible endpoint.
#[derive(Debug, Clone)]
pub struct ChatClient {
    api: ApiClient,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatClient {
    pub fn new(
        provider: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            api: ApiClient::new(provider, base_url, api_key)?,
            model: DEFAULT_CHAT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 2000,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn provider(&self) -> &str {
        self.api.provider()
    }

    fn request<'a>(&'a self, messages: &'a [ChatMessage], stream: bool) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream,
        }
    }

    /// Run a completion and return the full message content.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let response: ChatResponse =
            self.api.post_json("chat/completions", &self.request(messages, false)).await?;
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| RagError::provider(self.provider(), "response has no content"))?;
        debug!(provider = %self.provider(), model = %self.model, chars = content.len(), "completion");
        Ok(content)
    }

    /// Run a streamed completion, yielding content deltas as they arrive.
    pub async fn complete_stream(&self, messages: &[ChatMessage]) -> Result<FragmentStream> {
        let response = self.api.send("chat/completions", &self.request(messages, true)).await?;
        Ok(content_deltas(response.bytes_stream(), self.provider().to_string()))
    }
}

/// Decode a server-sent event body into content deltas, stopping at
/// `data: [DONE]` or at the first malformed chunk.
fn content_deltas<S, B, E>(body: S, provider: String) -> FragmentStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let mut events = Box::pin(body.eventsource());
    let stream = async_stream::stream! {
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    yield Err(RagError::provider(&provider, format!("stream interrupted: {e}")));
                    break;
                }
            };
            let data = event.data.trim();
            if data == "[DONE]" {
                break;
            }
            if data.is_empty() {
                continue;
            }
            match parse_delta(data) {
                Ok(Some(content)) => yield Ok(content),
                Ok(None) => {}
                Err(e) => {
                    yield Err(RagError::provider(&provider, format!("malformed chunk: {e}")));
                    break;
                }
            }
        }
    };
    Box::pin(stream)
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
}

fn parse_delta(data: &str) -> serde_json::Result<Option<String>> {
    let chunk: ChatChunk = serde_json::from_str(data)?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|content| !content.is_empty()))
}

/// A [`Generator`] backed by a chat model.
///
/// The prompt is sent as a single user message. Blocking generation uses a
/// non-streamed completion; streaming uses server-sent events.
pub struct ChatGenerator {
    client: ChatClient,
}

impl ChatGenerator {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Generator for ChatGenerator {
    fn name(&self) -> &str {
        self.client.provider()
    }

    async fn generate_stream(&self, prompt: &str) -> Result<FragmentStream> {
        self.client.complete_stream(&[ChatMessage::user(prompt)]).await
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        self.client.complete(&[ChatMessage::user(prompt)]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(chunks: Vec<&'static str>) -> Vec<Result<String>> {
        let body = futures::stream::iter(
            chunks.into_iter().map(|c| Ok::<_, std::io::Error>(c.as_bytes())),
        );
        content_deltas(body, "chat".into()).collect().await
    }

    fn texts(items: Vec<Result<String>>) -> Vec<String> {
        items.into_iter().map(|item| item.unwrap()).collect()
    }

    #[tokio::test]
    async fn deltas_survive_split_chunks_and_stop_at_done() {
        let items = collect(vec![
            "data: {\"choices\":[{\"delta\":{\"content\":\"He\"",
            "}}]}\n\n: keep-alive\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"llo\"}}]}\r\n\r\n",
            "data: [DONE]\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
        ])
        .await;
        assert_eq!(texts(items), ["He", "llo"]);
    }

    #[tokio::test]
    async fn multi_line_event_data_is_joined() {
        let items = collect(vec![
            "data: {\"choices\":[{\"delta\":\ndata: {\"content\":\"x\"}}]}\n\n",
            "data: [DONE]\n\n",
        ])
        .await;
        assert_eq!(texts(items), ["x"]);
    }

    #[tokio::test]
    async fn split_multibyte_characters_are_reassembled() {
        let event = "data: {\"choices\":[{\"delta\":{\"content\":\"chào\"}}]}\n\n";
        let cut = event.find('à').unwrap() + 1;
        let body = futures::stream::iter(vec![
            Ok::<_, std::io::Error>(event.as_bytes()[..cut].to_vec()),
            Ok(event.as_bytes()[cut..].to_vec()),
        ]);
        let items: Vec<_> = content_deltas(body, "chat".into()).collect().await;
        assert_eq!(texts(items), ["chào"]);
    }

    #[tokio::test]
    async fn malformed_chunk_ends_the_stream_with_an_error() {
        let items = collect(vec![
            "data: not json\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n",
        ])
        .await;
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Err(RagError::ProviderUnavailable { .. })));
    }

    #[test]
    fn delta_parsing_skips_role_only_chunks() {
        assert_eq!(
            parse_delta(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#).unwrap(),
            Some("Hi".to_string())
        );
        assert_eq!(parse_delta(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(), None);
        assert_eq!(parse_delta(r#"{"choices":[]}"#).unwrap(), None);
        assert!(parse_delta("not json").is_err());
    }

    #[test]
    fn request_carries_stream_flag() {
        let client = ChatClient::new("chat", "https://example.com/v1", "key").unwrap();
        let messages = [ChatMessage::user("hi")];
        let value = serde_json::to_value(client.request(&messages, true)).unwrap();
        assert_eq!(value["stream"], true);
        assert_eq!(value["model"], DEFAULT_CHAT_MODEL);
        assert_eq!(value["messages"][0]["role"], "user");
    }
}
