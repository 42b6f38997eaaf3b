pub mod normalize;
pub mod types;
pub mod truncate;
pub mod enrich;
pub mod taxonomy;
pub mod provider;
pub mod worker;

pub use normalize::*;
pub use types::*;
pub use truncate::*;
pub use enrich::*;
pub use taxonomy::*;
pub use provider::*;
pub use worker::*;

use thiserror::Error;

use crate::llm::LlmError;
use crate::paperless::PaperlessError;

#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("Invalid classification response: {0}")]
    InvalidResponse(String),

    #[error("Model error: {0}")]
    Llm(#[from] LlmError),

    #[error("Paperless error: {0}")]
    Paperless(#[from] PaperlessError),
}
