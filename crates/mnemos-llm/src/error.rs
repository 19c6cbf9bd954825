//! Error types for LLM and embedder calls.

use thiserror::Error;

/// Errors surfaced by LLM and embedder backends.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Transport-level failure (connection refused, DNS, TLS).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The call exceeded its wall-clock timeout.
    #[error("LLM call timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The provider answered but with a non-success status or error payload.
    #[error("Backend error: {0}")]
    Backend(String),

    /// The provider returned an empty body.
    #[error("Empty response from backend")]
    EmptyResponse,

    /// The reply arrived but could not be matched to the expected schema.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Backend misconfiguration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LlmError {
    /// True for replies that arrived but failed schema matching.
    pub fn is_parse(&self) -> bool {
        matches!(self, LlmError::Parse(_))
    }
}

/// Result type alias for LLM operations.
pub type Result<T> = std::result::Result<T, LlmError>;
