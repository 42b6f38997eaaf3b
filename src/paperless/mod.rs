pub mod types;
pub mod client;
pub mod memory;

pub use types::*;
pub use client::*;
pub use memory::*;

use thiserror::Error;

use crate::pipeline::retry::Retryable;

#[derive(Error, Debug)]
pub enum PaperlessError {
    #[error("Paperless is not reachable at {0}")]
    Connection(String),

    #[error("Paperless request timed out after {0}s")]
    Timeout(u64),

    #[error("Paperless returned error (status {status}): {body}")]
    Api { status: u16, body: String },

    /// Request or response body failed in transit.
    #[error("HTTP transport error: {0}")]
    Transport(String),

    /// Builder, redirect or decode failure; retrying cannot help.
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Response parsing error: {0}")]
    ResponseParsing(String),

    #[error("Document {0} not found")]
    DocumentNotFound(DocumentId),
}

impl Retryable for PaperlessError {
    fn is_transient(&self) -> bool {
        match self {
            PaperlessError::Connection(_)
            | PaperlessError::Timeout(_)
            | PaperlessError::Transport(_) => true,
            PaperlessError::Api { status, .. } => *status >= 500 || *status == 429,
            PaperlessError::HttpClient(_)
            | PaperlessError::ResponseParsing(_)
            | PaperlessError::DocumentNotFound(_) => false,
        }
    }
}
