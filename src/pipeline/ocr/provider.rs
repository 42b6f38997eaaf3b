//! Vision transcription with ordered model fallback.
//!
//! Each page image goes to the configured models in order. A refusal or a
//! failed call moves on to the next model; the first usable answer wins. When
//! every model is exhausted the page text becomes the refusal sentinel with
//! no model name.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

use regex::Regex;

use super::types::{PageContext, PageResult, TranscriptionStats};
use crate::config::{Settings, REFUSAL_MARK};
use crate::llm::{ChatClient, ChatRequest};
use crate::pipeline::retry::RetryPolicy;

// ──────────────────────────────────────────────
// Refusal detection
// ──────────────────────────────────────────────

static REDACTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\[\s*redacted\s*\]").expect("valid regex"));

/// How a model's transcription reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextVerdict {
    Ok,
    Refusal,
    Redacted,
}

pub fn contains_redacted_marker(text: &str) -> bool {
    REDACTED_RE.is_match(text)
}

/// Case-insensitive substring match against lower-cased `markers`, then the
/// redaction pattern.
pub fn judge_transcription(text: &str, markers: &[String]) -> TextVerdict {
    let lower = text.to_lowercase();
    if markers.iter().any(|m| !m.is_empty() && lower.contains(m.as_str())) {
        TextVerdict::Refusal
    } else if contains_redacted_marker(text) {
        TextVerdict::Redacted
    } else {
        TextVerdict::Ok
    }
}

// ──────────────────────────────────────────────
// Provider trait
// ──────────────────────────────────────────────

/// Turns one encoded page into `(text, model)`.
///
/// Content-level failures never surface as errors: exhausting every model
/// yields the refusal sentinel with an empty model name.
pub trait TranscriptionProvider: Send + Sync {
    fn transcribe(&self, image_png: &[u8], ctx: PageContext) -> PageResult;

    fn stats(&self) -> TranscriptionStats;
}

const TRANSCRIPTION_PROMPT: &str = "\
You are the OCR stage of an automated document archive. The owner of the \
document has every right to read it, and you must transcribe it without \
refusing, summarising or censoring anything, including personal documents \
such as passports or bank statements.

Output only the text visible in the image, in its original language. Keep \
spacing, indentation and line breaks. Render tables as Markdown tables. Mark \
graphics as [Logo: text], [Signature: name], [Stamp: text], [Barcode], \
[QR Code] and [Watermark: text] (drop the text part when there is none). \
Render ticked boxes as [x] and empty boxes as [ ]. Do not wrap the output in \
code fences and do not add comments or questions.

If you cannot transcribe the image for any reason, output exactly: \
CHATGPT REFUSED TO TRANSCRIBE";

// ──────────────────────────────────────────────
// VisionTranscriber
// ──────────────────────────────────────────────

#[derive(Default)]
struct StatCounters {
    attempts: AtomicU64,
    refusals: AtomicU64,
    api_errors: AtomicU64,
    fallback_successes: AtomicU64,
}

/// Production transcription provider backed by a `ChatClient`.
pub struct VisionTranscriber {
    client: Arc<dyn ChatClient>,
    models: Vec<String>,
    refusal_markers: Vec<String>,
    retry: RetryPolicy,
    stats: StatCounters,
}

impl VisionTranscriber {
    /// `models` are tried in order; duplicates are skipped.
    pub fn new(
        client: Arc<dyn ChatClient>,
        models: Vec<String>,
        refusal_markers: Vec<String>,
        retry: RetryPolicy,
    ) -> Self {
        let mut unique: Vec<String> = Vec::new();
        for model in models {
            if !unique.contains(&model) {
                unique.push(model);
            }
        }
        Self {
            client,
            models: unique,
            refusal_markers: refusal_markers.iter().map(|m| m.to_lowercase()).collect(),
            retry,
            stats: StatCounters::default(),
        }
    }

    pub fn from_settings(
        client: Arc<dyn ChatClient>,
        settings: &Settings,
        retry: RetryPolicy,
    ) -> Self {
        Self::new(
            client,
            settings.unique_models(),
            settings.ocr_refusal_markers.clone(),
            retry,
        )
    }
}

impl TranscriptionProvider for VisionTranscriber {
    fn transcribe(&self, image_png: &[u8], ctx: PageContext) -> PageResult {
        let _span = tracing::info_span!(
            "transcribe_page",
            doc_id = ctx.doc_id,
            page_num = ctx.page_num,
            image_size = image_png.len(),
        )
        .entered();

        let primary = self.models.first().map(String::as_str).unwrap_or("");
        for model in &self.models {
            self.stats.attempts.fetch_add(1, Ordering::Relaxed);
            let request = ChatRequest::new(model, TRANSCRIPTION_PROMPT).with_image(image_png);
            let start = std::time::Instant::now();

            match self.retry.run("vision_transcription", || self.client.complete(&request)) {
                Ok(raw) => {
                    let text = raw.trim().to_string();
                    match judge_transcription(&text, &self.refusal_markers) {
                        TextVerdict::Ok => {
                            if model != primary {
                                tracing::info!(model = %model, "Fallback model succeeded");
                                self.stats.fallback_successes.fetch_add(1, Ordering::Relaxed);
                            }
                            tracing::debug!(
                                model = %model,
                                elapsed_ms = %start.elapsed().as_millis(),
                                text_len = text.len(),
                                "Page transcribed"
                            );
                            return PageResult::new(text, model.clone());
                        }
                        verdict => {
                            tracing::warn!(model = %model, verdict = ?verdict, "Model refused to transcribe");
                            self.stats.refusals.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(model = %model, error = %e, "Transcription call failed; trying next model");
                    self.stats.api_errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        tracing::error!("All models failed or refused to transcribe the page");
        PageResult::new(REFUSAL_MARK, "")
    }

    fn stats(&self) -> TranscriptionStats {
        TranscriptionStats {
            attempts: self.stats.attempts.load(Ordering::Relaxed),
            refusals: self.stats.refusals.load(Ordering::Relaxed),
            api_errors: self.stats.api_errors.load(Ordering::Relaxed),
            fallback_successes: self.stats.fallback_successes.load(Ordering::Relaxed),
        }
    }
}

// ──────────────────────────────────────────────
// Mock (testing)
// ──────────────────────────────────────────────

/// Provider returning a fixed result per 1-based page number.
///
/// Pages without a script yield the refusal sentinel.
pub struct MockTranscriber {
    pages: std::collections::HashMap<usize, PageResult>,
    calls: AtomicU64,
}

impl MockTranscriber {
    pub fn new() -> Self {
        Self {
            pages: std::collections::HashMap::new(),
            calls: AtomicU64::new(0),
        }
    }

    pub fn page(mut self, page_num: usize, text: &str, model: &str) -> Self {
        self.pages.insert(page_num, PageResult::new(text, model));
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Default for MockTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptionProvider for MockTranscriber {
    fn transcribe(&self, _image_png: &[u8], ctx: PageContext) -> PageResult {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.pages
            .get(&ctx.page_num)
            .cloned()
            .unwrap_or_else(|| PageResult::new(REFUSAL_MARK, ""))
    }

    fn stats(&self) -> TranscriptionStats {
        TranscriptionStats {
            attempts: self.calls(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, ScriptedChatClient};

    fn markers() -> Vec<String> {
        vec!["i can't assist".into(), "chatgpt refused to transcribe".into()]
    }

    fn transcriber(client: ScriptedChatClient, models: &[&str]) -> (Arc<ScriptedChatClient>, VisionTranscriber) {
        let client = Arc::new(client);
        let retry = RetryPolicy::new(3, 1).unwrap().with_sleep(|_| {});
        let t = VisionTranscriber::new(
            client.clone(),
            models.iter().map(|m| m.to_string()).collect(),
            markers(),
            retry,
        );
        (client, t)
    }

    fn ctx() -> PageContext {
        PageContext { doc_id: 1, page_num: 1 }
    }

    // ── judge_transcription ──

    #[test]
    fn refusal_is_case_insensitive() {
        assert_eq!(
            judge_transcription("Sorry, I CAN'T ASSIST with that.", &markers()),
            TextVerdict::Refusal
        );
    }

    #[test]
    fn redacted_marker_detected() {
        assert_eq!(judge_transcription("Name: [ REDACTED ]", &markers()), TextVerdict::Redacted);
        assert_eq!(judge_transcription("Invoice #1", &markers()), TextVerdict::Ok);
    }

    // ── fallback ──

    #[test]
    fn refusal_falls_back_to_next_model() {
        let client = ScriptedChatClient::new()
            .reply("A", "I can't assist with that.")
            .reply("B", "Invoice #1");
        let (_, t) = transcriber(client, &["A", "B"]);
        assert_eq!(t.transcribe(b"png", ctx()), PageResult::new("Invoice #1", "B"));
        let stats = t.stats();
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.refusals, 1);
        assert_eq!(stats.fallback_successes, 1);
    }

    #[test]
    fn all_refusals_yield_sentinel() {
        let client = ScriptedChatClient::new()
            .reply("A", "I can't assist with that.")
            .reply("B", "CHATGPT REFUSED TO TRANSCRIBE");
        let (_, t) = transcriber(client, &["A", "B"]);
        assert_eq!(t.transcribe(b"png", ctx()), PageResult::new(REFUSAL_MARK, ""));
    }

    #[test]
    fn api_error_moves_to_next_model() {
        let client = ScriptedChatClient::new()
            .fail("A", LlmError::Api { status: 400, body: "bad".into() })
            .reply("B", "text");
        let (client, t) = transcriber(client, &["A", "B"]);
        assert_eq!(t.transcribe(b"png", ctx()).model, "B");
        assert_eq!(client.calls_for("A"), 1);
        assert_eq!(t.stats().api_errors, 1);
    }

    #[test]
    fn transient_error_is_retried_on_same_model() {
        let client = ScriptedChatClient::new()
            .fail("A", LlmError::Timeout(1))
            .reply("A", "text");
        let (client, t) = transcriber(client, &["A", "B"]);
        assert_eq!(t.transcribe(b"png", ctx()), PageResult::new("text", "A"));
        assert_eq!(client.calls_for("A"), 2);
        assert_eq!(client.calls_for("B"), 0);
    }

    #[test]
    fn duplicate_models_are_tried_once() {
        let client = ScriptedChatClient::new().reply("A", "I can't assist");
        let (client, t) = transcriber(client, &["A", "A"]);
        t.transcribe(b"png", ctx());
        assert_eq!(client.calls_for("A"), 1);
    }

    #[test]
    fn response_is_trimmed() {
        let client = ScriptedChatClient::new().reply("A", "  hello \n");
        let (_, t) = transcriber(client, &["A"]);
        assert_eq!(t.transcribe(b"png", ctx()).text, "hello");
    }
}
