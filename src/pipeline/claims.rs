//! Tag state machine.
//!
//! Paperless offers no lock or status field, so a document's pipeline state is
//! its tag set: `PRE -> PROCESSING -> {POST, ERROR}`. Every transition here
//! re-reads the document first and writes the full tag set back.
//!
//! Claims are best-effort: read, patch, read again. Two pollers can still
//! race between the first read and the patch.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::Settings;
use crate::paperless::{DocumentId, DocumentStore, MetadataPatch, PaperlessError, TagId};

/// Externally assigned tag ids with pipeline meaning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineTags {
    pub ocr_pre: TagId,
    pub ocr_post: TagId,
    pub ocr_processing: Option<TagId>,
    pub classify_pre: TagId,
    pub classify_post: Option<TagId>,
    pub classify_processing: Option<TagId>,
    pub error: Option<TagId>,
}

impl PipelineTags {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            ocr_pre: settings.pre_tag_id,
            ocr_post: settings.post_tag_id,
            ocr_processing: settings.ocr_processing_tag_id,
            classify_pre: settings.classify_pre_tag_id,
            classify_post: settings.classify_post_tag_id,
            classify_processing: settings.classify_processing_tag_id,
            error: settings.error_tag_id,
        }
    }

    /// Every queue, post and processing tag of both stages.
    pub fn stage_tags(&self) -> BTreeSet<TagId> {
        [self.ocr_pre, self.ocr_post, self.classify_pre]
            .into_iter()
            .chain(self.classify_post)
            .chain(self.ocr_processing)
            .chain(self.classify_processing)
            .collect()
    }

    /// Tags removed before a document goes back to the OCR queue.
    pub fn requeue_strip(&self) -> BTreeSet<TagId> {
        let mut tags = self.stage_tags();
        tags.extend(self.error);
        tags
    }

    pub fn has_error(&self, tags: &BTreeSet<TagId>) -> bool {
        self.error.is_some_and(|e| tags.contains(&e))
    }
}

/// Issues every tag transition against the document store.
pub struct TagCoordinator {
    store: Arc<dyn DocumentStore>,
    tags: PipelineTags,
}

impl TagCoordinator {
    pub fn new(store: Arc<dyn DocumentStore>, tags: PipelineTags) -> Self {
        Self { store, tags }
    }

    pub fn tags(&self) -> &PipelineTags {
        &self.tags
    }

    fn latest_tags(&self, doc_id: DocumentId) -> Result<BTreeSet<TagId>, PaperlessError> {
        Ok(self.store.get_document(doc_id)?.tag_set())
    }

    fn write_tags(&self, doc_id: DocumentId, tags: &BTreeSet<TagId>) -> Result<(), PaperlessError> {
        self.store
            .update_metadata(doc_id, &MetadataPatch::tags_only(tags.iter().copied()))
    }

    /// Add `tag_id` and confirm it persisted.
    ///
    /// Returns false when the tag is already present or when any read or
    /// write fails. An unconfigured tag (`None`) always claims.
    pub fn claim(&self, doc_id: DocumentId, tag_id: Option<TagId>, purpose: &str) -> bool {
        let Some(tag_id) = tag_id else {
            return true;
        };

        let mut current = match self.latest_tags(doc_id) {
            Ok(tags) => tags,
            Err(e) => {
                tracing::error!(
                    doc_id,
                    processing_tag_id = tag_id,
                    purpose,
                    error = %e,
                    "Failed to refresh document before claiming processing tag"
                );
                return false;
            }
        };

        if current.contains(&tag_id) {
            tracing::info!(doc_id, processing_tag_id = tag_id, purpose, "Document already claimed");
            return false;
        }

        current.insert(tag_id);
        if let Err(e) = self.write_tags(doc_id, &current) {
            tracing::error!(
                doc_id,
                processing_tag_id = tag_id,
                purpose,
                error = %e,
                "Failed to claim processing tag"
            );
            return false;
        }

        match self.latest_tags(doc_id) {
            Ok(verified) if verified.contains(&tag_id) => {
                tracing::info!(doc_id, processing_tag_id = tag_id, purpose, "Claimed document");
                true
            }
            Ok(_) => {
                tracing::warn!(
                    doc_id,
                    processing_tag_id = tag_id,
                    purpose,
                    "Processing tag claim could not be verified"
                );
                false
            }
            Err(e) => {
                tracing::error!(
                    doc_id,
                    processing_tag_id = tag_id,
                    purpose,
                    error = %e,
                    "Failed to refresh document after claiming processing tag"
                );
                false
            }
        }
    }

    /// Remove a processing tag if it is still present. Failures are logged only.
    pub fn release(&self, doc_id: DocumentId, tag_id: Option<TagId>, purpose: &str) {
        let Some(tag_id) = tag_id else {
            return;
        };
        let result = self.latest_tags(doc_id).and_then(|mut tags| {
            if tags.remove(&tag_id) {
                self.write_tags(doc_id, &tags)
            } else {
                Ok(())
            }
        });
        if let Err(e) = result {
            tracing::warn!(
                doc_id,
                processing_tag_id = tag_id,
                purpose,
                error = %e,
                "Failed to release processing tag"
            );
        }
    }

    /// Strip all pipeline tags and add the error tag.
    ///
    /// With `content`, the text is written in the same patch. Without a
    /// configured error tag nothing is written.
    pub fn finalize_error(
        &self,
        doc_id: DocumentId,
        content: Option<&str>,
    ) -> Result<(), PaperlessError> {
        let Some(error_tag) = self.tags.error else {
            tracing::warn!(doc_id, "No error tag configured; leaving document tags unchanged");
            return Ok(());
        };

        let mut tags = self.latest_tags(doc_id)?;
        let strip = self.tags.stage_tags();
        tags.retain(|t| !strip.contains(t));
        tags.insert(error_tag);

        match content {
            Some(text) => {
                let tag_list: Vec<TagId> = tags.iter().copied().collect();
                self.store.update_content_and_tags(doc_id, text, &tag_list)?;
            }
            None => self.write_tags(doc_id, &tags)?,
        }
        tracing::warn!(doc_id, error_tag_id = error_tag, "Document marked with error tag");
        Ok(())
    }

    /// Write the transcription and move the document from the OCR queue to
    /// the post-OCR state.
    pub fn finalize_ocr(&self, doc_id: DocumentId, content: &str) -> Result<(), PaperlessError> {
        let mut tags = self.latest_tags(doc_id)?;
        tags.remove(&self.tags.ocr_pre);
        if let Some(processing) = self.tags.ocr_processing {
            tags.remove(&processing);
        }
        tags.insert(self.tags.ocr_post);

        let tag_list: Vec<TagId> = tags.iter().copied().collect();
        self.store.update_content_and_tags(doc_id, content, &tag_list)?;
        tracing::info!(doc_id, tags = ?tag_list, "Updated document tags");
        Ok(())
    }

    /// Tags a classified document ends up with: the current tags minus every
    /// pipeline tag, plus the classification post tag and `extra`.
    pub fn classified_tags(
        &self,
        current: &BTreeSet<TagId>,
        extra: impl IntoIterator<Item = TagId>,
    ) -> Vec<TagId> {
        let strip = self.tags.requeue_strip();
        let mut tags: BTreeSet<TagId> = current
            .iter()
            .copied()
            .filter(|t| !strip.contains(t))
            .collect();
        tags.extend(self.tags.classify_post);
        tags.extend(extra);
        tags.into_iter().collect()
    }

    /// Send a document back to the OCR queue.
    pub fn requeue_for_ocr(&self, doc_id: DocumentId) -> Result<(), PaperlessError> {
        let mut tags = self.latest_tags(doc_id)?;
        let strip = self.tags.requeue_strip();
        tags.retain(|t| !strip.contains(t));
        tags.insert(self.tags.ocr_pre);
        self.write_tags(doc_id, &tags)?;
        tracing::warn!(doc_id, pre_tag_id = self.tags.ocr_pre, "Document requeued for OCR");
        Ok(())
    }

    /// Remove stale tags from a document. Returns whether anything changed.
    pub fn remove_tags(
        &self,
        doc_id: DocumentId,
        remove: &[TagId],
    ) -> Result<bool, PaperlessError> {
        let mut tags = self.latest_tags(doc_id)?;
        let before = tags.len();
        tags.retain(|t| !remove.contains(t));
        if tags.len() == before {
            return Ok(false);
        }
        self.write_tags(doc_id, &tags)?;
        Ok(true)
    }
}
