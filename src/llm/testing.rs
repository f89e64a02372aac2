//! Mock transport for testing
//!
//! Responses are queued ahead of time; each `send` pops the next one. Bodies
//! either come from a fixed chunk list or from a channel the test keeps
//! feeding, which lets a test hold a stream open and abort it.

use super::{CompletionRequest, CompletionTransport, LlmError, TransportResponse};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;

pub type ChunkSender = mpsc::UnboundedSender<Result<Vec<u8>, LlmError>>;

enum Scripted {
    Response(u16, mpsc::UnboundedReceiver<Result<Vec<u8>, LlmError>>),
    Error(LlmError),
}

/// One `data:` line carrying a content fragment
pub fn data_line(content: &str) -> Vec<u8> {
    format!(
        "data: {}\n",
        serde_json::json!({ "choices": [{ "index": 0, "delta": { "content": content } }] })
    )
    .into_bytes()
}

#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Scripted>>,
    /// Record of (api key, request) for every send
    requests: Mutex<Vec<(Option<String>, CompletionRequest)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response whose body is exactly `chunks`, then ends
    pub fn queue_chunks(&self, status: u16, chunks: Vec<Vec<u8>>) {
        let feed = self.queue_stream(status);
        for chunk in chunks {
            feed.send(Ok(chunk)).unwrap();
        }
    }

    /// Queue a response whose body is fed through the returned sender.
    /// The body ends when the sender is dropped.
    pub fn queue_stream(&self, status: u16) -> ChunkSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Response(status, rx));
        tx
    }

    /// Queue a failure before any response
    pub fn queue_error(&self, error: LlmError) {
        self.script.lock().unwrap().push_back(Scripted::Error(error));
    }

    pub fn recorded_requests(&self) -> Vec<(Option<String>, CompletionRequest)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_messages(&self) -> Vec<super::ChatMessage> {
        self.requests
            .lock()
            .unwrap()
            .last()
            .map(|(_, r)| r.messages.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CompletionTransport for MockTransport {
    async fn send(
        &self,
        api_key: Option<&str>,
        request: &CompletionRequest,
    ) -> Result<TransportResponse, LlmError> {
        self.requests
            .lock()
            .unwrap()
            .push((api_key.map(String::from), request.clone()));

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Response(status, rx)) => {
                let body = futures::stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|item| (item, rx))
                })
                .boxed();
                Ok(TransportResponse { status, body })
            }
            Some(Scripted::Error(error)) => Err(error),
            None => Err(LlmError::network("No mock response queued")),
        }
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    condition()
}
