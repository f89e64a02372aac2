//! `OpenAI` chat completions transport

use super::types::CompletionRequest;
use super::{CompletionTransport, LlmError, TransportResponse};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// HTTP transport POSTing to a chat completions endpoint.
///
/// No request timeout is configured: a streaming response may legitimately run
/// for minutes, and bounding it is the task store's job.
pub struct OpenAITransport {
    client: Client,
    endpoint: String,
}

impl OpenAITransport {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, LlmError> {
        let client = Client::builder()
            .build()
            .map_err(|e| LlmError::unknown(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl CompletionTransport for OpenAITransport {
    async fn send(
        &self,
        api_key: Option<&str>,
        request: &CompletionRequest,
    ) -> Result<TransportResponse, LlmError> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(request);

        if let Some(key) = api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::network(format!("Request timeout: {e}"))
            } else if e.is_connect() {
                LlmError::network(format!("Connection failed: {e}"))
            } else {
                LlmError::network(format!("Request failed: {e}"))
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .bytes_stream()
            .map_ok(|bytes| bytes.to_vec())
            .map_err(|e| LlmError::network(format!("Stream interrupted: {e}")))
            .boxed();

        Ok(TransportResponse { status, body })
    }
}
