//! Two polling daemons for a Paperless-ngx archive.
//!
//! The OCR daemon renders queued documents, transcribes each page with a
//! vision model and stores the text. The classification daemon reads that
//! text and writes title, correspondent, document type, date, language and
//! tags. Both track progress only through document tags.

pub mod config;
pub mod llm;
pub mod paperless;
pub mod pipeline;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use config::{LogFormat, Settings};
use llm::{ChatClient, OpenAiClient};
use paperless::{DocumentStore, PaperlessClient};
use pipeline::claims::{PipelineTags, TagCoordinator};
use pipeline::classify::{ClassifyWorker, LlmClassifier, TaxonomyCache};
use pipeline::daemon::Scheduler;
use pipeline::ocr::{OcrWorker, PdfiumRasterizer, VisionTranscriber};
use pipeline::retry::RetryPolicy;
use pipeline::PipelineError;

/// Install the global subscriber. `RUST_LOG` overrides `LOG_LEVEL`.
pub fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_filter()));
    match settings.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init(),
        LogFormat::Console => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

fn document_store(settings: &Settings, retry: &RetryPolicy) -> Result<Arc<dyn DocumentStore>, PipelineError> {
    let client = PaperlessClient::new(
        &settings.paperless_url,
        &settings.paperless_token,
        settings.request_timeout_secs,
        retry.clone(),
    )?;
    Ok(Arc::new(client))
}

fn chat_client(settings: &Settings) -> Result<Arc<dyn ChatClient>, PipelineError> {
    let client = OpenAiClient::new(
        &settings.llm_base_url,
        &settings.llm_api_key,
        settings.request_timeout_secs,
    )?;
    Ok(Arc::new(client))
}

fn coordinator(store: &Arc<dyn DocumentStore>, settings: &Settings) -> Arc<TagCoordinator> {
    Arc::new(TagCoordinator::new(
        store.clone(),
        PipelineTags::from_settings(settings),
    ))
}

/// Wire the OCR daemon against the live Paperless and model endpoints.
pub fn build_ocr_scheduler(settings: &Settings) -> Result<Scheduler<OcrWorker>, PipelineError> {
    let retry = RetryPolicy::from_settings(settings)?;
    let store = document_store(settings, &retry)?;

    let rasterizer = PdfiumRasterizer::new(settings.ocr_dpi);
    if let Err(e) = rasterizer.check_library() {
        tracing::warn!(error = %e, "PDFium library not available; PDF documents will fail to render");
    }
    let provider = VisionTranscriber::from_settings(chat_client(settings)?, settings, retry);

    let worker = OcrWorker::new(
        store.clone(),
        coordinator(&store, settings),
        Arc::new(rasterizer),
        Arc::new(provider),
        settings,
    )?;
    tracing::info!(
        models = ?settings.unique_models(),
        pre_tag_id = settings.pre_tag_id,
        post_tag_id = settings.post_tag_id,
        page_workers = settings.page_workers,
        document_workers = settings.document_workers,
        "OCR daemon configured"
    );
    Scheduler::new(Arc::new(worker), settings)
}

/// Wire the classification daemon against the live Paperless and model endpoints.
pub fn build_classify_scheduler(settings: &Settings) -> Result<Scheduler<ClassifyWorker>, PipelineError> {
    let retry = RetryPolicy::from_settings(settings)?;
    let store = document_store(settings, &retry)?;

    let classifier = LlmClassifier::from_settings(chat_client(settings)?, settings, retry);
    let taxonomy = Arc::new(TaxonomyCache::new(store.clone()));

    let worker = ClassifyWorker::new(
        store.clone(),
        coordinator(&store, settings),
        Arc::new(classifier),
        taxonomy,
        settings,
    );
    tracing::info!(
        models = ?settings.unique_models(),
        pre_tag_id = settings.classify_pre_tag_id,
        post_tag_id = ?settings.classify_post_tag_id,
        document_workers = settings.document_workers,
        "Classification daemon configured"
    );
    Scheduler::new(Arc::new(worker), settings)
}
