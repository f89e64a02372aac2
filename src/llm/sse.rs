//! Decoding of the streamed response body
//!
//! A successful response is a series of `data: <json>` lines. Chunks from the
//! transport may split a line (or a UTF-8 sequence) anywhere, so bytes are
//! buffered until a newline completes the line.

use super::error::UNKNOWN_ERROR_CODE;
use super::types::{ErrorBody, StreamChunk};

const DATA_PREFIX: &str = "data:";
const DONE_MARKER: &str = "[DONE]";

/// Incremental decoder turning body chunks into text fragments
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    skipped: usize,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one transport chunk, returning the text fragments completed by it
    /// in arrival order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut fragments = Vec::new();
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            if let Some(fragment) = self.decode_line(&line) {
                fragments.push(fragment);
            }
        }
        fragments
    }

    /// Flush a final line that was not newline-terminated
    pub fn finish(&mut self) -> Vec<String> {
        let line = std::mem::take(&mut self.pending);
        self.decode_line(&line).into_iter().collect()
    }

    /// Number of `data:` lines dropped because they could not be decoded
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<String> {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim(),
            Err(e) => {
                self.skipped += 1;
                tracing::warn!(error = %e, "Skipping non UTF-8 stream line");
                return None;
            }
        };

        let payload = line.strip_prefix(DATA_PREFIX)?.trim_start();
        if payload == DONE_MARKER {
            return None;
        }

        match serde_json::from_str::<StreamChunk>(payload) {
            Ok(chunk) => chunk
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta)
                .and_then(|delta| delta.content)
                .filter(|content| !content.is_empty()),
            Err(e) => {
                self.skipped += 1;
                tracing::warn!(error = %e, line = %line, "Skipping malformed stream line");
                None
            }
        }
    }
}

/// Extract `error.code` from a failed response body, or the unknown sentinel.
pub fn error_code(body: &[u8]) -> String {
    let parsed = serde_json::from_slice::<ErrorBody>(body).ok();
    let code = parsed.and_then(|b| b.error).and_then(|e| e.code);

    match code {
        Some(serde_json::Value::String(code)) if !code.is_empty() => code,
        Some(serde_json::Value::Number(code)) => code.to_string(),
        _ => UNKNOWN_ERROR_CODE.to_string(),
    }
}
