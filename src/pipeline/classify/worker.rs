//! Classification stage: one transcribed document to titled, tagged metadata.

use std::sync::Arc;

use super::enrich::{
    enrich_tags, filter_blacklisted_tags, filter_redundant_tags, needs_error_tag,
    normalize_language, parse_document_date, resolve_date_for_tags, upsert_custom_field,
};
use super::provider::{Classifier, TaxonomyContext};
use super::taxonomy::{TaxonomyCache, TaxonomyKind};
use super::truncate::{max_char_truncation_note, truncate_by_chars, truncate_by_pages};
use super::types::{is_generic_document_type, ClassificationResult};
use super::ClassifyError;
use crate::config::Settings;
use crate::paperless::{Document, DocumentId, DocumentStore, DocumentSummary, MetadataPatch, PaperlessError};
use crate::pipeline::claims::TagCoordinator;

const PURPOSE: &str = "classification";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifyOutcome {
    /// Metadata written; `tags` are the tag names that were applied.
    Classified { model: String, tags: Vec<String> },
    MarkedError,
    /// Content was empty; the document went back to the OCR queue.
    Requeued,
    AlreadyClaimed,
}

/// Truncation and tagging knobs taken from `Settings`.
#[derive(Debug, Clone)]
struct ClassifyOptions {
    max_pages: usize,
    tail_pages: usize,
    headerless_char_limit: usize,
    max_chars: usize,
    taxonomy_limit: usize,
    tag_limit: usize,
    default_country_tag: String,
    person_field_id: Option<u32>,
}

pub struct ClassifyWorker {
    store: Arc<dyn DocumentStore>,
    coordinator: Arc<TagCoordinator>,
    classifier: Arc<dyn Classifier>,
    taxonomy: Arc<TaxonomyCache>,
    options: ClassifyOptions,
}

impl ClassifyWorker {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        coordinator: Arc<TagCoordinator>,
        classifier: Arc<dyn Classifier>,
        taxonomy: Arc<TaxonomyCache>,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            coordinator,
            classifier,
            taxonomy,
            options: ClassifyOptions {
                max_pages: settings.classify_max_pages,
                tail_pages: settings.classify_tail_pages,
                headerless_char_limit: settings.classify_headerless_char_limit,
                max_chars: settings.classify_max_chars,
                taxonomy_limit: settings.classify_taxonomy_limit,
                tag_limit: settings.classify_tag_limit,
                default_country_tag: settings.classify_default_country_tag.clone(),
                person_field_id: settings.classify_person_field_id,
            },
        }
    }

    /// Reload the taxonomy once per non-empty batch.
    pub fn before_batch(&self) -> Result<(), PaperlessError> {
        self.taxonomy.refresh()
    }

    /// Documents waiting for classification, with stale queue tags cleaned up.
    pub fn fetch_batch(&self) -> Result<Vec<DocumentSummary>, PaperlessError> {
        let tags = self.coordinator.tags();
        let listed = self.store.list_documents_by_tag(tags.classify_pre)?;
        let mut batch = Vec::with_capacity(listed.len());
        for doc in listed {
            let doc_tags = doc.tag_set();
            if tags.classify_post.is_some_and(|t| doc_tags.contains(&t)) {
                tracing::info!(
                    doc_id = doc.id,
                    pre_tag_id = tags.classify_pre,
                    "Document already classified; removing stale queue tag"
                );
                let stale: Vec<u32> = std::iter::once(tags.classify_pre)
                    .chain(tags.classify_processing)
                    .collect();
                if let Err(e) = self.coordinator.remove_tags(doc.id, &stale) {
                    tracing::warn!(doc_id = doc.id, error = %e, "Failed to remove stale queue tag");
                }
                continue;
            }
            if tags.classify_processing.is_some_and(|t| doc_tags.contains(&t)) {
                tracing::debug!(doc_id = doc.id, "Document is being classified elsewhere; skipping");
                continue;
            }
            batch.push(doc);
        }
        Ok(batch)
    }

    pub fn process(&self, doc_id: DocumentId) -> Result<ClassifyOutcome, ClassifyError> {
        let _span = tracing::info_span!("classify_document", doc_id).entered();

        let doc = self.store.get_document(doc_id)?;
        let tags = self.coordinator.tags();
        if tags.has_error(&doc.tag_set()) {
            tracing::warn!("Document has error tag; skipping classification");
            self.coordinator.finalize_error(doc_id, None)?;
            return Ok(ClassifyOutcome::MarkedError);
        }

        if doc.content_text().trim().is_empty() {
            tracing::warn!("Document has no content; sending back to OCR");
            self.coordinator.requeue_for_ocr(doc_id)?;
            return Ok(ClassifyOutcome::Requeued);
        }

        if !self.coordinator.claim(doc_id, tags.classify_processing, PURPOSE) {
            return Ok(ClassifyOutcome::AlreadyClaimed);
        }
        let result = self.process_claimed(&doc);
        self.coordinator.release(doc_id, tags.classify_processing, PURPOSE);
        result
    }

    fn process_claimed(&self, doc: &Document) -> Result<ClassifyOutcome, ClassifyError> {
        let content = doc.content_text();
        let (input, note) = self.prepare_input(content);
        let context = TaxonomyContext {
            correspondents: self
                .taxonomy
                .top_names(TaxonomyKind::Correspondent, self.options.taxonomy_limit),
            document_types: self
                .taxonomy
                .top_names(TaxonomyKind::DocumentType, self.options.taxonomy_limit),
            tags: self.taxonomy.top_names(TaxonomyKind::Tag, self.options.taxonomy_limit),
        };

        let (result, model) = self.classifier.classify(&input, &context, note.as_deref())?;
        let Some(result) = result.filter(|r| !r.is_empty()) else {
            tracing::warn!("Classification returned no usable result");
            self.coordinator.finalize_error(doc.id, None)?;
            return Ok(ClassifyOutcome::MarkedError);
        };
        if is_generic_document_type(&result.document_type) {
            tracing::warn!(
                document_type = %result.document_type,
                "Classification returned a generic document type"
            );
            self.coordinator.finalize_error(doc.id, None)?;
            return Ok(ClassifyOutcome::MarkedError);
        }
        if needs_error_tag(content) {
            tracing::warn!("Transcription contains refusal or redaction markers");
            self.coordinator.finalize_error(doc.id, None)?;
            return Ok(ClassifyOutcome::MarkedError);
        }

        self.apply(doc, &result, model)
    }

    /// Page truncation, then the hard character cap. Notes are joined by newlines.
    fn prepare_input(&self, content: &str) -> (String, Option<String>) {
        let opts = &self.options;
        let mut notes = Vec::new();

        let window = truncate_by_pages(
            content,
            opts.max_pages,
            opts.tail_pages,
            opts.headerless_char_limit,
        );
        if let Some(note) = window.note {
            tracing::info!(
                included_pages = ?window.included_pages,
                original_chars = content.chars().count(),
                "Truncated classification input"
            );
            notes.push(note);
        }
        let mut text = window.text;

        if opts.max_chars > 0 {
            let capped = truncate_by_chars(&text, opts.max_chars);
            if capped != text {
                notes.push(max_char_truncation_note(opts.max_chars));
                text = capped;
            }
        }

        let note = (!notes.is_empty()).then(|| notes.join("\n"));
        (text, note)
    }

    fn apply(
        &self,
        doc: &Document,
        result: &ClassificationResult,
        model: String,
    ) -> Result<ClassifyOutcome, ClassifyError> {
        let opts = &self.options;

        let document_date = parse_document_date(&result.document_date);
        let date_for_tags = resolve_date_for_tags(document_date, doc.created.as_deref());

        let candidates = filter_blacklisted_tags(&result.tags);
        let candidates = filter_redundant_tags(
            &candidates,
            &result.correspondent,
            &result.document_type,
            &result.person,
        );
        let mut tag_names = enrich_tags(
            &candidates,
            doc.content_text(),
            date_for_tags,
            &opts.default_country_tag,
            opts.tag_limit,
        );
        if self.coordinator.tags().error.is_some() {
            tag_names.retain(|t| t != "error");
        }

        let tag_ids = self.taxonomy.get_or_create_tag_ids(&tag_names)?;
        let correspondent_id = self.taxonomy.get_or_create_correspondent(&result.correspondent)?;
        let document_type_id = self.taxonomy.get_or_create_document_type(&result.document_type)?;

        let current = self.store.get_document(doc.id)?;
        let tags = self.coordinator.classified_tags(&current.tag_set(), tag_ids);

        let person = result.person.trim();
        let custom_fields = opts
            .person_field_id
            .filter(|_| !person.is_empty())
            .map(|field| upsert_custom_field(&current.custom_fields, field, person));

        let title = result.title.trim();
        let patch = MetadataPatch {
            title: (!title.is_empty()).then(|| title.to_string()),
            correspondent_id,
            document_type_id,
            document_date: document_date.map(|d| d.format("%Y-%m-%d").to_string()),
            tags: Some(tags),
            language: normalize_language(&result.language),
            custom_fields,
        };
        self.store.update_metadata(doc.id, &patch)?;

        tracing::info!(model = %model, tags_added = ?tag_names, "Document classification applied");
        Ok(ClassifyOutcome::Classified { model, tags: tag_names })
    }
}
