//! Chat completion streaming
//!
//! A transport opens the HTTP exchange; [`stream_completion`] turns its body
//! into cumulative text or a classified [`LlmError`].

mod error;
mod models;
mod openai;
pub mod sse;
mod types;

#[cfg(test)]
mod proptests;
#[cfg(test)]
pub mod testing;

pub use error::{LlmError, LlmErrorKind, UNKNOWN_ERROR_CODE};
pub use models::{all_models, default_model, find_model, label_for, ModelDef};
pub use openai::{OpenAITransport, DEFAULT_ENDPOINT};
pub use types::{ChatMessage, CompletionRequest, Role};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use sse::SseDecoder;
use std::sync::Arc;

/// Status line and body of an opened completion request
pub struct TransportResponse {
    pub status: u16,
    pub body: BoxStream<'static, Result<Vec<u8>, LlmError>>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    /// Drain the body, keeping whatever arrived before an interruption
    async fn collect_body(mut self) -> Vec<u8> {
        let mut body = Vec::new();
        while let Some(chunk) = self.body.next().await {
            match chunk {
                Ok(bytes) => body.extend_from_slice(&bytes),
                Err(e) => {
                    tracing::debug!(error = %e, "Error body interrupted");
                    break;
                }
            }
        }
        body
    }
}

/// Opens completion requests against a service
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    /// POST `request`, resolving once the status is known
    async fn send(
        &self,
        api_key: Option<&str>,
        request: &CompletionRequest,
    ) -> Result<TransportResponse, LlmError>;
}

#[async_trait]
impl<T: CompletionTransport + ?Sized> CompletionTransport for Arc<T> {
    async fn send(
        &self,
        api_key: Option<&str>,
        request: &CompletionRequest,
    ) -> Result<TransportResponse, LlmError> {
        (**self).send(api_key, request).await
    }
}

/// Run one streaming completion.
///
/// `on_text` receives the cumulative text after every fragment. A body that
/// breaks off mid-stream ends the completion with the text received so far;
/// only failures before a response and non-200 statuses are errors.
pub async fn stream_completion<F>(
    transport: &dyn CompletionTransport,
    api_key: Option<&str>,
    request: &CompletionRequest,
    mut on_text: F,
) -> Result<String, LlmError>
where
    F: FnMut(&str) + Send,
{
    let response = transport.send(api_key, request).await?;

    if !response.is_success() {
        let status = response.status;
        let body = response.collect_body().await;
        let err = LlmError::service(status, sse::error_code(&body));
        tracing::warn!(
            model = %request.model,
            status,
            code = err.code.as_deref().unwrap_or(UNKNOWN_ERROR_CODE),
            "Completion rejected"
        );
        return Err(err);
    }

    let mut decoder = SseDecoder::new();
    let mut text = String::new();
    let mut body = response.body;

    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                for fragment in decoder.push(&bytes) {
                    text.push_str(&fragment);
                    on_text(&text);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, received = text.len(), "Completion stream ended early");
                break;
            }
        }
    }

    for fragment in decoder.finish() {
        text.push_str(&fragment);
        on_text(&text);
    }

    if decoder.skipped() > 0 {
        tracing::debug!(skipped = decoder.skipped(), "Completion stream had unreadable lines");
    }

    Ok(text)
}
