//! Shared JSON-over-HTTP client for OpenAI-compatible endpoints.
//!
//! This module is only available when the `openai` feature is enabled.

use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::error;

use crate::error::{RagError, Result};

#[derive(serde::Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(serde::Deserialize)]
struct ErrorDetail {
    message: String,
}

/// A bearer-authenticated client bound to one provider's base URL.
#[derive(Clone)]
pub(crate) struct ApiClient {
    client: reqwest::Client,
    provider: String,
    base_url: String,
    api_key: String,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl ApiClient {
    pub(crate) fn new(
        provider: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self> {
        let provider = provider.into();
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(RagError::InvalidConfig(format!("{provider}: API key must not be empty")));
        }
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(RagError::InvalidConfig(format!("{provider}: base URL must not be empty")));
        }
        Ok(Self { client: reqwest::Client::new(), provider, base_url, api_key })
    }

    pub(crate) fn provider(&self) -> &str {
        &self.provider
    }

    /// POST `body` to `path` and decode the JSON response.
    pub(crate) async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self.send(path, body).await?;
        response.json().await.map_err(|e| {
            error!(provider = %self.provider, error = %e, "failed to parse response");
            RagError::provider(&self.provider, format!("failed to parse response: {e}"))
        })
    }

    /// POST `body` to `path` and return the successful response unread.
    pub(crate) async fn send<B>(&self, path: &str, body: &B) -> Result<reqwest::Response>
    where
        B: Serialize + ?Sized,
    {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!(provider = %self.provider, error = %e, "request failed");
                RagError::provider(&self.provider, format!("request failed: {e}"))
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let detail =
            serde_json::from_str::<ErrorResponse>(&body).map(|e| e.error.message).unwrap_or(body);
        error!(provider = %self.provider, %status, "API error");
        Err(status_error(&self.provider, status, &detail))
    }
}

/// Requests the provider rejected as malformed are not worth retrying.
fn status_error(provider: &str, status: StatusCode, detail: &str) -> RagError {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE | StatusCode::UNPROCESSABLE_ENTITY => {
            RagError::InvalidInput(format!("{provider} rejected the request ({status}): {detail}"))
        }
        _ => RagError::provider(provider, format!("API returned {status}: {detail}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_requires_key_and_url() {
        assert!(ApiClient::new("p", "https://example.com/v1", "").is_err());
        assert!(ApiClient::new("p", "", "key").is_err());
        let client = ApiClient::new("p", "https://example.com/v1/", "key").unwrap();
        assert_eq!(client.base_url, "https://example.com/v1");
    }

    #[test]
    fn status_mapping_separates_caller_errors() {
        assert!(matches!(
            status_error("p", StatusCode::BAD_REQUEST, "too long"),
            RagError::InvalidInput(_)
        ));
        let err = status_error("p", StatusCode::SERVICE_UNAVAILABLE, "down");
        assert!(err.is_retryable());
        assert!(status_error("p", StatusCode::UNAUTHORIZED, "bad key").is_retryable());
    }
}
