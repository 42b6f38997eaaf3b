pub mod retry;
pub mod claims;
pub mod ocr;
pub mod classify;
pub mod daemon;

use thiserror::Error;

use crate::config::ConfigError;
use crate::llm::LlmError;
use crate::paperless::PaperlessError;

/// Anything that can stop a daemon from starting or a document from finishing.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Paperless error: {0}")]
    Paperless(#[from] PaperlessError),

    #[error("Model error: {0}")]
    Llm(#[from] LlmError),

    #[error("OCR error: {0}")]
    Ocr(#[from] ocr::OcrError),

    #[error("Classification error: {0}")]
    Classify(#[from] classify::ClassifyError),

    #[error("Failed to build document worker pool: {0}")]
    WorkerPool(String),

    #[error("Worker panicked: {0}")]
    Panicked(String),
}
