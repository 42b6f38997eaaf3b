//! OpenAI-compatible chat-completion access shared by transcription and
//! classification.
//!
//! `ChatClient` is the seam: `OpenAiClient` talks HTTP (OpenAI or Ollama's
//! `/v1` endpoint), `ScriptedChatClient` replays canned replies in tests.

pub mod types;
pub mod openai;
pub mod scripted;

pub use types::*;
pub use openai::*;
pub use scripted::*;

use thiserror::Error;

use crate::pipeline::retry::Retryable;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Model endpoint is not reachable at {0}")]
    Connection(String),

    #[error("Model request timed out after {0}s")]
    Timeout(u64),

    #[error("Model endpoint returned error (status {status}): {body}")]
    Api { status: u16, body: String },

    /// Request or response body failed in transit.
    #[error("HTTP transport error: {0}")]
    Transport(String),

    /// Builder, redirect or decode failure; retrying cannot help.
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),
}

impl Retryable for LlmError {
    fn is_transient(&self) -> bool {
        match self {
            LlmError::Connection(_) | LlmError::Timeout(_) | LlmError::Transport(_) => true,
            LlmError::Api { status, .. } => *status >= 500 || *status == 429,
            LlmError::HttpClient(_) | LlmError::ResponseParsing(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_server_errors_are_transient() {
        assert!(LlmError::Api { status: 429, body: String::new() }.is_transient());
        assert!(LlmError::Api { status: 500, body: String::new() }.is_transient());
        assert!(LlmError::Timeout(180).is_transient());
        assert!(LlmError::Transport("reset".into()).is_transient());
    }

    #[test]
    fn bad_request_is_permanent() {
        assert!(!LlmError::Api { status: 400, body: String::new() }.is_transient());
        assert!(!LlmError::ResponseParsing("x".into()).is_transient());
        assert!(!LlmError::HttpClient("redirect loop".into()).is_transient());
    }
}
