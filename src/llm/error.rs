//! Completion error types

use thiserror::Error;

/// Placeholder used when a failed response carries no readable error code
pub const UNKNOWN_ERROR_CODE: &str = "unknown";

/// Completion error with classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub message: String,
    /// HTTP status for service errors
    pub status: Option<u16>,
    /// `error.code` from the service's error body
    pub code: Option<String>,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            code: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Network, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::Unknown, message)
    }

    /// Error for a non-success response, classified by status.
    ///
    /// The message keeps the shape `OpenAI: <status> - <code>`.
    pub fn service(status: u16, code: impl Into<String>) -> Self {
        let code = code.into();
        let kind = match status {
            401 | 403 => LlmErrorKind::Auth,
            429 => LlmErrorKind::RateLimit,
            400 | 404 | 422 => LlmErrorKind::InvalidRequest,
            500..=599 => LlmErrorKind::ServerError,
            _ => LlmErrorKind::Unknown,
        };
        Self {
            kind,
            message: format!("OpenAI: {status} - {code}"),
            status: Some(status),
            code: Some(code),
        }
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// Connection failed before any response arrived
    Network,
    /// Rate limited (429)
    RateLimit,
    /// Server error (5xx)
    ServerError,
    /// Authentication failed (401, 403)
    Auth,
    /// Bad request (400, 404, 422)
    InvalidRequest,
    /// Unknown error
    Unknown,
}

impl LlmErrorKind {
    /// Whether a retry could plausibly succeed. Nothing retries automatically;
    /// this only feeds logging.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Network | Self::RateLimit | Self::ServerError)
    }
}
