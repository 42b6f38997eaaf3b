pub mod types;
pub mod render;
pub mod page;
pub mod provider;
pub mod assemble;
pub mod worker;

pub use types::*;
pub use render::*;
pub use page::*;
pub use provider::*;
pub use assemble::*;
pub use worker::*;

use thiserror::Error;

use crate::paperless::PaperlessError;

#[derive(Error, Debug)]
pub enum OcrError {
    #[error("PDF rendering failed on page {page}: {reason}")]
    PdfRendering { page: usize, reason: String },

    #[error("PDF is encrypted or password-protected")]
    PdfEncrypted,

    #[error("Image processing error: {0}")]
    ImageProcessing(String),

    #[error("Unable to open document as an image ({content_type}): {reason}")]
    UnsupportedContent { content_type: String, reason: String },

    #[error("Failed to build page worker pool: {0}")]
    WorkerPool(String),

    #[error("Paperless error: {0}")]
    Paperless(#[from] PaperlessError),
}
