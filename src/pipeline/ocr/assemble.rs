use std::collections::BTreeSet;

use super::types::PageResult;

/// Prefix of the trailing model footer line.
pub const MODEL_FOOTER_PREFIX: &str = "Transcribed by model:";

/// Full document transcription and the models that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledText {
    pub text: String,
    pub models: BTreeSet<String>,
}

/// `--- Page N ---`, or `--- Page N (model) ---` when requested and known.
pub fn page_header(page_num: usize, model: &str, include_model: bool) -> String {
    if include_model && !model.is_empty() {
        format!("--- Page {page_num} ({model}) ---")
    } else {
        format!("--- Page {page_num} ---")
    }
}

/// Merge per-page results into one document text.
///
/// Blank pages are dropped but keep their number. Headers are only added
/// when the document has more than one page. A footer listing the sorted
/// unique model names closes the text when any model was used.
pub fn assemble_pages(pages: &[PageResult], include_page_models: bool) -> AssembledText {
    let multi_page = pages.len() > 1;
    let mut sections = Vec::new();
    let mut models = BTreeSet::new();

    for (index, page) in pages.iter().enumerate() {
        if page.text.trim().is_empty() {
            continue;
        }
        if multi_page {
            let header = page_header(index + 1, &page.model, include_page_models);
            sections.push(format!("{header}\n{}", page.text));
        } else {
            sections.push(page.text.clone());
        }
        if !page.model.is_empty() {
            models.insert(page.model.clone());
        }
    }

    let mut text = sections.join("\n\n");
    if !models.is_empty() {
        let names: Vec<&str> = models.iter().map(String::as_str).collect();
        let footer = format!("{MODEL_FOOTER_PREFIX} {}", names.join(", "));
        text = if text.is_empty() {
            footer
        } else {
            format!("{text}\n\n{footer}")
        };
    }

    AssembledText { text, models }
}
