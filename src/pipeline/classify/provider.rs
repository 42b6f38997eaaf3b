//! Metadata classification with ordered model fallback.

use std::sync::{Arc, Mutex};

use super::types::{parse_classification_response, ClassificationResult};
use super::ClassifyError;
use crate::config::Settings;
use crate::llm::{ChatClient, ChatRequest, JsonSchema, LlmError};
use crate::pipeline::retry::{Retryable, RetryPolicy};

/// Names of existing entities offered to the model as preferred choices.
#[derive(Debug, Clone, Default)]
pub struct TaxonomyContext {
    pub correspondents: Vec<String>,
    pub document_types: Vec<String>,
    pub tags: Vec<String>,
}

/// Proposes metadata for a transcription.
///
/// `Ok((None, ""))` means no model produced a usable answer. Errors are
/// reserved for transport problems worth retrying on a later poll.
pub trait Classifier: Send + Sync {
    fn classify(
        &self,
        text: &str,
        taxonomy: &TaxonomyContext,
        truncation_note: Option<&str>,
    ) -> Result<(Option<ClassificationResult>, String), ClassifyError>;
}

const CLASSIFICATION_PROMPT: &str = "\
You file scanned documents in a personal archive. Read the transcription and \
return one JSON object with these keys:

- title: short, specific title in the document's language (no file names, no dates unless they identify the document)
- correspondent: the sender or issuing organisation; empty if unclear
- tags: a few topical tags, most useful first
- document_date: issue date as YYYY-MM-DD; empty if no date is printed
- document_type: what kind of document it is (Invoice, Letter, Contract, ...); never a placeholder such as Document or Other
- language: ISO 639-1 code of the main language, or und
- person: the private person the document concerns; empty if none

Reuse an existing correspondent, document type or tag when one fits, spelled \
exactly as listed. Do not repeat the correspondent, document type or person \
as a tag. Lines starting with 'Transcribed by model:' and page headers are \
not part of the document. Output JSON only.";

fn classification_schema() -> JsonSchema {
    let text = serde_json::json!({ "type": "string" });
    JsonSchema {
        name: "document_classification".to_string(),
        schema: serde_json::json!({
            "type": "object",
            "properties": {
                "title": text,
                "correspondent": text,
                "tags": { "type": "array", "items": text },
                "document_date": text,
                "document_type": text,
                "language": text,
                "person": text,
            },
            "required": [
                "title", "correspondent", "tags", "document_date",
                "document_type", "language", "person"
            ],
            "additionalProperties": false,
        }),
    }
}

/// User message: known names, optional truncation note, then the text.
pub fn build_user_message(text: &str, taxonomy: &TaxonomyContext, truncation_note: Option<&str>) -> String {
    let list = |names: &[String]| serde_json::to_string(names).unwrap_or_else(|_| "[]".into());
    let mut message = format!(
        "Existing correspondents: {}\nExisting document types: {}\nExisting tags: {}\n\n",
        list(&taxonomy.correspondents),
        list(&taxonomy.document_types),
        list(&taxonomy.tags),
    );
    if let Some(note) = truncation_note.filter(|n| !n.trim().is_empty()) {
        message.push_str(note.trim());
        message.push_str("\n\n");
    }
    message.push_str("Document transcription:\n");
    message.push_str(text);
    message
}

// ──────────────────────────────────────────────
// LlmClassifier
// ──────────────────────────────────────────────

pub struct LlmClassifier {
    client: Arc<dyn ChatClient>,
    models: Vec<String>,
    retry: RetryPolicy,
    schema: JsonSchema,
}

impl LlmClassifier {
    pub fn new(client: Arc<dyn ChatClient>, models: Vec<String>, retry: RetryPolicy) -> Self {
        let mut unique: Vec<String> = Vec::new();
        for model in models {
            if !unique.contains(&model) {
                unique.push(model);
            }
        }
        Self {
            client,
            models: unique,
            retry,
            schema: classification_schema(),
        }
    }

    pub fn from_settings(client: Arc<dyn ChatClient>, settings: &Settings, retry: RetryPolicy) -> Self {
        Self::new(client, settings.unique_models(), retry)
    }
}

impl Classifier for LlmClassifier {
    fn classify(
        &self,
        text: &str,
        taxonomy: &TaxonomyContext,
        truncation_note: Option<&str>,
    ) -> Result<(Option<ClassificationResult>, String), ClassifyError> {
        if text.trim().is_empty() {
            return Ok((None, String::new()));
        }

        let user = build_user_message(text, taxonomy, truncation_note);
        let mut last_error: Option<LlmError> = None;

        for model in &self.models {
            let request = ChatRequest::new(model, CLASSIFICATION_PROMPT)
                .with_text(&user)
                .with_temperature(0.2)
                .with_json_schema(&self.schema);

            match self.retry.run("classification", || self.client.complete(&request)) {
                Ok(raw) => match parse_classification_response(&raw) {
                    Ok(result) => {
                        tracing::debug!(model = %model, "Classification parsed");
                        return Ok((Some(result), model.clone()));
                    }
                    Err(e) => {
                        tracing::warn!(model = %model, error = %e, "Unusable classification response; trying next model");
                        last_error = None;
                    }
                },
                Err(e) => {
                    tracing::warn!(model = %model, error = %e, "Classification call failed; trying next model");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if e.is_transient() => Err(ClassifyError::Llm(e)),
            _ => {
                tracing::error!("No model produced a usable classification");
                Ok((None, String::new()))
            }
        }
    }
}

// ──────────────────────────────────────────────
// Mock (testing)
// ──────────────────────────────────────────────

/// What a `MockClassifier` was asked.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifyCall {
    pub text: String,
    pub truncation_note: Option<String>,
}

/// Classifier returning one fixed answer and recording its inputs.
pub struct MockClassifier {
    result: Option<ClassificationResult>,
    model: String,
    calls: Mutex<Vec<ClassifyCall>>,
}

impl MockClassifier {
    pub fn returning(result: ClassificationResult, model: &str) -> Self {
        Self {
            result: Some(result),
            model: model.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Behaves like a provider whose models all failed on content.
    pub fn unusable() -> Self {
        Self {
            result: None,
            model: String::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<ClassifyCall> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl Classifier for MockClassifier {
    fn classify(
        &self,
        text: &str,
        _taxonomy: &TaxonomyContext,
        truncation_note: Option<&str>,
    ) -> Result<(Option<ClassificationResult>, String), ClassifyError> {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(ClassifyCall {
                text: text.to_string(),
                truncation_note: truncation_note.map(String::from),
            });
        Ok((self.result.clone(), self.model.clone()))
    }
}
