use serde::Serialize;

/// Marker written in place of a page whose processing failed.
pub const OCR_ERROR_MARKER: &str = "[OCR ERROR]";

/// Transcription of one page. `model` is empty when no model produced the
/// text (blank page, refusal sentinel, page failure).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageResult {
    pub text: String,
    pub model: String,
}

impl PageResult {
    pub fn new(text: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: model.into(),
        }
    }

    pub fn blank() -> Self {
        Self::default()
    }

    /// Inline marker for a page that could not be processed (1-based number).
    pub fn failed(page_num: usize) -> Self {
        Self::new(format!("{OCR_ERROR_MARKER} Failed to OCR page {page_num}."), "")
    }
}

/// Log context for one page.
#[derive(Debug, Clone, Copy)]
pub struct PageContext {
    pub doc_id: u32,
    /// 1-based page number.
    pub page_num: usize,
}

/// Counters kept by a transcription provider across all pages it served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TranscriptionStats {
    pub attempts: u64,
    pub refusals: u64,
    pub api_errors: u64,
    pub fallback_successes: u64,
}

impl TranscriptionStats {
    /// Counter increase since an earlier snapshot.
    pub fn since(&self, earlier: &TranscriptionStats) -> TranscriptionStats {
        TranscriptionStats {
            attempts: self.attempts.saturating_sub(earlier.attempts),
            refusals: self.refusals.saturating_sub(earlier.refusals),
            api_errors: self.api_errors.saturating_sub(earlier.api_errors),
            fallback_successes: self
                .fallback_successes
                .saturating_sub(earlier.fallback_successes),
        }
    }
}
