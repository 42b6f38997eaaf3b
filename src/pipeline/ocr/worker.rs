//! OCR stage: one queued document from download to tag transition.

use std::sync::Arc;

use image::DynamicImage;
use rayon::prelude::*;

use super::assemble::assemble_pages;
use super::page::{downscale, encode_png, is_blank};
use super::provider::{contains_redacted_marker, TranscriptionProvider};
use super::render::DocumentRasterizer;
use super::types::{PageContext, PageResult, OCR_ERROR_MARKER};
use super::OcrError;
use crate::config::{Settings, REFUSAL_MARK};
use crate::paperless::{DocumentId, DocumentStore, DocumentSummary, PaperlessError};
use crate::pipeline::claims::TagCoordinator;

const PURPOSE: &str = "ocr";

/// What happened to one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OcrOutcome {
    /// Transcription stored and the document moved to the post-OCR state.
    Transcribed { pages: usize, failed_pages: Vec<usize> },
    /// The document was routed to the error state.
    MarkedError,
    /// Another worker holds the processing tag.
    AlreadyClaimed,
    /// The original rendered to zero pages; tags left unchanged.
    NoPages,
}

/// Text that must not advance to classification.
pub fn is_failed_transcription(text: &str) -> bool {
    text.trim().is_empty()
        || text.contains(OCR_ERROR_MARKER)
        || text.contains(REFUSAL_MARK)
        || contains_redacted_marker(text)
}

pub struct OcrWorker {
    store: Arc<dyn DocumentStore>,
    coordinator: Arc<TagCoordinator>,
    rasterizer: Arc<dyn DocumentRasterizer>,
    provider: Arc<dyn TranscriptionProvider>,
    page_pool: rayon::ThreadPool,
    max_side: u32,
    include_page_models: bool,
}

impl OcrWorker {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        coordinator: Arc<TagCoordinator>,
        rasterizer: Arc<dyn DocumentRasterizer>,
        provider: Arc<dyn TranscriptionProvider>,
        settings: &Settings,
    ) -> Result<Self, OcrError> {
        let page_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(settings.page_workers.max(1))
            .thread_name(|i| format!("ocr-page-{i}"))
            .build()
            .map_err(|e| OcrError::WorkerPool(e.to_string()))?;

        Ok(Self {
            store,
            coordinator,
            rasterizer,
            provider,
            page_pool,
            max_side: settings.ocr_max_side,
            include_page_models: settings.ocr_include_page_models,
        })
    }

    /// Documents waiting for OCR, with stale queue tags cleaned up.
    ///
    /// A document that already has the post tag loses its queue tag and is
    /// skipped; one that carries the processing tag is skipped.
    pub fn fetch_batch(&self) -> Result<Vec<DocumentSummary>, PaperlessError> {
        let tags = self.coordinator.tags();
        let listed = self.store.list_documents_by_tag(tags.ocr_pre)?;
        let mut batch = Vec::with_capacity(listed.len());
        for doc in listed {
            let doc_tags = doc.tag_set();
            if doc_tags.contains(&tags.ocr_post) {
                tracing::info!(
                    doc_id = doc.id,
                    pre_tag_id = tags.ocr_pre,
                    "Document already transcribed; removing stale queue tag"
                );
                if let Err(e) = self.coordinator.remove_tags(doc.id, &[tags.ocr_pre]) {
                    tracing::warn!(doc_id = doc.id, error = %e, "Failed to remove stale queue tag");
                }
                continue;
            }
            if tags.ocr_processing.is_some_and(|t| doc_tags.contains(&t)) {
                tracing::debug!(doc_id = doc.id, "Document is being transcribed elsewhere; skipping");
                continue;
            }
            batch.push(doc);
        }
        Ok(batch)
    }

    pub fn process(&self, doc_id: DocumentId) -> Result<OcrOutcome, OcrError> {
        let _span = tracing::info_span!("ocr_document", doc_id).entered();
        let start = std::time::Instant::now();

        let doc = self.store.get_document(doc_id)?;
        tracing::info!(title = doc.display_title(), "Processing document");

        let tags = self.coordinator.tags();
        if tags.has_error(&doc.tag_set()) {
            tracing::warn!("Document has error tag; skipping OCR");
            self.coordinator.finalize_error(doc_id, None)?;
            return Ok(OcrOutcome::MarkedError);
        }

        if !self.coordinator.claim(doc_id, tags.ocr_processing, PURPOSE) {
            return Ok(OcrOutcome::AlreadyClaimed);
        }

        let stats_before = self.provider.stats();
        let result = self.process_claimed(doc_id);
        self.coordinator.release(doc_id, tags.ocr_processing, PURPOSE);

        let stats = self.provider.stats().since(&stats_before);
        if stats.attempts > 0 {
            tracing::info!(
                attempts = stats.attempts,
                refusals = stats.refusals,
                api_errors = stats.api_errors,
                fallback_successes = stats.fallback_successes,
                "OCR stats"
            );
        }

        if result.is_ok() {
            tracing::info!(
                elapsed_secs = start.elapsed().as_secs_f64(),
                "Finished processing document"
            );
        }
        result
    }

    fn process_claimed(&self, doc_id: DocumentId) -> Result<OcrOutcome, OcrError> {
        let (bytes, content_type) = self.store.download_document(doc_id)?;
        let images = self.rasterizer.rasterize(&bytes, &content_type)?;
        if images.is_empty() {
            tracing::warn!("Document has no pages to process");
            return Ok(OcrOutcome::NoPages);
        }

        let (pages, failed_pages) = self.transcribe_pages(doc_id, &images);
        if !failed_pages.is_empty() {
            tracing::warn!(failed_pages = ?failed_pages, "OCR failed on some pages");
        }

        let assembled = assemble_pages(&pages, self.include_page_models);
        if is_failed_transcription(&assembled.text) {
            tracing::warn!(
                empty = assembled.text.trim().is_empty(),
                "OCR produced no usable text or error markers; marking error"
            );
            self.coordinator.finalize_error(doc_id, Some(&assembled.text))?;
            return Ok(OcrOutcome::MarkedError);
        }

        self.coordinator.finalize_ocr(doc_id, &assembled.text)?;
        Ok(OcrOutcome::Transcribed {
            pages: images.len(),
            failed_pages,
        })
    }

    /// Transcribe every page on the page pool.
    ///
    /// Results come back in page order. A page that errors is replaced by an
    /// inline marker and its 1-based number is reported as failed.
    pub fn transcribe_pages(
        &self,
        doc_id: DocumentId,
        images: &[DynamicImage],
    ) -> (Vec<PageResult>, Vec<usize>) {
        let results: Vec<Result<PageResult, OcrError>> = self.page_pool.install(|| {
            images
                .par_iter()
                .enumerate()
                .map(|(index, image)| {
                    self.transcribe_page(image, PageContext { doc_id, page_num: index + 1 })
                })
                .collect()
        });

        let mut pages = Vec::with_capacity(results.len());
        let mut failed = Vec::new();
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(page) => pages.push(page),
                Err(e) => {
                    tracing::error!(page_num = index + 1, error = %e, "OCR failed on page");
                    failed.push(index + 1);
                    pages.push(PageResult::failed(index + 1));
                }
            }
        }
        (pages, failed)
    }

    fn transcribe_page(&self, image: &DynamicImage, ctx: PageContext) -> Result<PageResult, OcrError> {
        if is_blank(image) {
            tracing::debug!(page_num = ctx.page_num, "Skipping blank page");
            return Ok(PageResult::blank());
        }
        let resized = downscale(image, self.max_side);
        let png = encode_png(&resized)?;
        Ok(self.provider.transcribe(&png, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::test_settings;
    use crate::paperless::{Document, MemoryDocumentStore};
    use crate::pipeline::claims::PipelineTags;
    use crate::pipeline::ocr::provider::MockTranscriber;
    use crate::pipeline::ocr::render::StaticRasterizer;
    use image::{GrayImage, Luma};

    const PRE: u32 = 443;
    const POST: u32 = 444;
    const PROC: u32 = 450;
    const ERR: u32 = 552;

    fn text_page() -> DynamicImage {
        let mut img = GrayImage::from_pixel(40, 40, Luma([255]));
        for x in 5..35 {
            img.put_pixel(x, 20, Luma([0]));
        }
        DynamicImage::ImageLuma8(img)
    }

    fn blank_page() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(40, 40, Luma([255])))
    }

    struct Fixture {
        store: Arc<MemoryDocumentStore>,
        provider: Arc<MockTranscriber>,
        worker: OcrWorker,
    }

    fn fixture(tags: Vec<u32>, pages: Vec<DynamicImage>, provider: MockTranscriber) -> Fixture {
        let mut settings = test_settings();
        settings.ocr_processing_tag_id = Some(PROC);
        settings.page_workers = 2;
        let store = Arc::new(
            MemoryDocumentStore::new()
                .with_document(Document {
                    id: 1,
                    title: Some("scan".into()),
                    tags,
                    ..Default::default()
                })
                .with_file(1, b"%PDF".to_vec(), "application/pdf"),
        );
        let coordinator = Arc::new(TagCoordinator::new(
            store.clone(),
            PipelineTags::from_settings(&settings),
        ));
        let provider = Arc::new(provider);
        let worker = OcrWorker::new(
            store.clone(),
            coordinator,
            Arc::new(StaticRasterizer::new(pages)),
            provider.clone(),
            &settings,
        )
        .unwrap();
        Fixture { store, provider, worker }
    }

    #[test]
    fn two_page_document_end_to_end() {
        let f = fixture(
            vec![PRE, 7],
            vec![text_page(), blank_page()],
            MockTranscriber::new().page(1, "Invoice #1", "X"),
        );
        let outcome = f.worker.process(1).unwrap();
        assert_eq!(outcome, OcrOutcome::Transcribed { pages: 2, failed_pages: vec![] });

        let doc = f.store.document(1).unwrap();
        assert_eq!(
            doc.content_text(),
            "--- Page 1 ---\nInvoice #1\n\nTranscribed by model: X"
        );
        assert_eq!(f.store.tags_of(1), vec![7, POST]);
        let patches = f.store.content_patches();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].1, doc.content_text());
        // Blank page never reaches the model.
        assert_eq!(f.provider.calls(), 1);
    }

    #[test]
    fn refusal_sentinel_routes_to_error() {
        let f = fixture(vec![PRE], vec![text_page()], MockTranscriber::new());
        assert_eq!(f.worker.process(1).unwrap(), OcrOutcome::MarkedError);
        assert_eq!(f.store.tags_of(1), vec![ERR]);
        assert_eq!(f.store.document(1).unwrap().content_text(), REFUSAL_MARK);
    }

    #[test]
    fn all_blank_pages_route_to_error() {
        let f = fixture(vec![PRE], vec![blank_page(), blank_page()], MockTranscriber::new());
        assert_eq!(f.worker.process(1).unwrap(), OcrOutcome::MarkedError);
        assert_eq!(f.store.tags_of(1), vec![ERR]);
    }

    #[test]
    fn error_tagged_document_is_not_transcribed() {
        let f = fixture(
            vec![PRE, ERR],
            vec![text_page()],
            MockTranscriber::new().page(1, "text", "X"),
        );
        assert_eq!(f.worker.process(1).unwrap(), OcrOutcome::MarkedError);
        assert_eq!(f.provider.calls(), 0);
        assert_eq!(f.store.tags_of(1), vec![ERR]);
    }

    #[test]
    fn claimed_document_is_skipped() {
        let f = fixture(
            vec![PRE, PROC],
            vec![text_page()],
            MockTranscriber::new().page(1, "text", "X"),
        );
        assert_eq!(f.worker.process(1).unwrap(), OcrOutcome::AlreadyClaimed);
        assert_eq!(f.provider.calls(), 0);
    }

    #[test]
    fn processing_tag_released_when_download_fails() {
        let f = fixture(
            vec![PRE],
            vec![text_page()],
            MockTranscriber::new().page(1, "text", "X"),
        );
        f.store.insert_document(Document {
            id: 5,
            tags: vec![PRE],
            ..Default::default()
        });
        let err = f.worker.process(5).unwrap_err();
        assert!(matches!(err, OcrError::Paperless(PaperlessError::DocumentNotFound(5))));
        assert_eq!(f.store.tags_of(5), vec![PRE]);
    }

    #[test]
    fn pages_keep_order_under_parallelism() {
        let f = fixture(
            vec![PRE],
            vec![text_page(), text_page(), text_page()],
            MockTranscriber::new()
                .page(1, "one", "a")
                .page(2, "two", "b")
                .page(3, "three", "a"),
        );
        let (pages, failed) = f.worker.transcribe_pages(1, &[text_page(), text_page(), text_page()]);
        assert!(failed.is_empty());
        let texts: Vec<&str> = pages.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[test]
    fn fetch_batch_cleans_stale_queue_tags() {
        let f = fixture(vec![PRE, POST], vec![], MockTranscriber::new());
        f.store.insert_document(Document {
            id: 2,
            tags: vec![PRE, PROC],
            ..Default::default()
        });
        f.store.insert_document(Document {
            id: 3,
            tags: vec![PRE],
            ..Default::default()
        });
        let batch: Vec<u32> = f.worker.fetch_batch().unwrap().iter().map(|d| d.id).collect();
        assert_eq!(batch, vec![3]);
        assert_eq!(f.store.tags_of(1), vec![POST]);
        assert_eq!(f.store.tags_of(2), vec![PRE, PROC]);
    }

    #[test]
    fn failed_transcription_detection() {
        assert!(is_failed_transcription("   "));
        assert!(is_failed_transcription("[OCR ERROR] Failed to OCR page 2."));
        assert!(is_failed_transcription("a [redacted] b"));
        assert!(!is_failed_transcription("Invoice #1"));
    }
}
