use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::types::*;
use super::PaperlessError;
use crate::pipeline::retry::RetryPolicy;

/// Page size requested from every list endpoint.
const PAGE_SIZE: u32 = 100;

/// Content type assumed when Paperless does not send one.
const DEFAULT_CONTENT_TYPE: &str = "application/pdf";

/// Blocking Paperless-ngx REST client.
///
/// Every request is wrapped in the shared `RetryPolicy`; connection errors,
/// timeouts, 429 and 5xx responses are retried, anything else is returned.
pub struct PaperlessClient {
    base_url: String,
    token: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
    retry: RetryPolicy,
}

/// One page of a Paperless list endpoint.
#[derive(Deserialize)]
struct Paginated<T> {
    #[serde(default)]
    next: Option<String>,
    results: Vec<T>,
}

impl PaperlessClient {
    pub fn new(
        base_url: &str,
        token: &str,
        timeout_secs: u64,
        retry: RetryPolicy,
    ) -> Result<Self, PaperlessError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| PaperlessError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            client,
            timeout_secs,
            retry,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.token)
    }

    fn map_send_error(&self, e: reqwest::Error) -> PaperlessError {
        if e.is_connect() {
            PaperlessError::Connection(self.base_url.clone())
        } else if e.is_timeout() {
            PaperlessError::Timeout(self.timeout_secs)
        } else if e.is_request() || e.is_body() {
            PaperlessError::Transport(e.to_string())
        } else {
            PaperlessError::HttpClient(e.to_string())
        }
    }

    fn check_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, PaperlessError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        Err(PaperlessError::Api {
            status: status.as_u16(),
            body,
        })
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, PaperlessError> {
        self.retry.run("paperless_get", || {
            let response = self
                .client
                .get(url)
                .header("Authorization", self.auth_header())
                .send()
                .map_err(|e| self.map_send_error(e))?;
            Self::check_status(response)?
                .json::<T>()
                .map_err(|e| PaperlessError::ResponseParsing(e.to_string()))
        })
    }

    fn send_json<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T, PaperlessError> {
        let op_name = if method == reqwest::Method::PATCH {
            "paperless_patch"
        } else {
            "paperless_post"
        };
        self.retry.run(op_name, || {
            let response = self
                .client
                .request(method.clone(), url)
                .header("Authorization", self.auth_header())
                .json(body)
                .send()
                .map_err(|e| self.map_send_error(e))?;
            Self::check_status(response)?
                .json::<T>()
                .map_err(|e| PaperlessError::ResponseParsing(e.to_string()))
        })
    }

    fn patch_document(&self, doc_id: DocumentId, body: &serde_json::Value) -> Result<(), PaperlessError> {
        let url = self.url(&format!("/api/documents/{doc_id}/"));
        let _: serde_json::Value = self.send_json(reqwest::Method::PATCH, &url, body)?;
        Ok(())
    }

    /// Follow `next` links until the listing is exhausted.
    fn list_all<T: DeserializeOwned>(&self, first_url: String) -> Result<Vec<T>, PaperlessError> {
        let mut items = Vec::new();
        let mut next = Some(first_url);
        while let Some(url) = next {
            let page: Paginated<T> = self.get_json(&url)?;
            items.extend(page.results);
            next = page.next.filter(|n| !n.is_empty());
        }
        Ok(items)
    }

    fn list_taxonomy(&self, endpoint: &str) -> Result<Vec<TaxonomyItem>, PaperlessError> {
        self.list_all(self.url(&format!("/api/{endpoint}/?page_size={PAGE_SIZE}")))
    }

    fn create_taxonomy(
        &self,
        endpoint: &str,
        body: serde_json::Value,
    ) -> Result<TaxonomyItem, PaperlessError> {
        let url = self.url(&format!("/api/{endpoint}/"));
        self.send_json(reqwest::Method::POST, &url, &body)
    }
}

impl DocumentStore for PaperlessClient {
    fn list_documents_by_tag(&self, tag_id: TagId) -> Result<Vec<DocumentSummary>, PaperlessError> {
        self.list_all(self.url(&format!(
            "/api/documents/?tags__id={tag_id}&page_size={PAGE_SIZE}"
        )))
    }

    fn get_document(&self, doc_id: DocumentId) -> Result<Document, PaperlessError> {
        let url = self.url(&format!("/api/documents/{doc_id}/"));
        self.get_json(&url).map_err(|e| match e {
            PaperlessError::Api { status: 404, .. } => PaperlessError::DocumentNotFound(doc_id),
            other => other,
        })
    }

    fn download_document(&self, doc_id: DocumentId) -> Result<(Vec<u8>, String), PaperlessError> {
        let url = self.url(&format!("/api/documents/{doc_id}/download/"));
        self.retry.run("paperless_download", || {
            let response = self
                .client
                .get(&url)
                .header("Authorization", self.auth_header())
                .send()
                .map_err(|e| self.map_send_error(e))?;
            let response = Self::check_status(response)?;
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
            let bytes = response.bytes().map_err(|e| self.map_send_error(e))?;
            Ok((bytes.to_vec(), content_type))
        })
    }

    fn update_content_and_tags(
        &self,
        doc_id: DocumentId,
        content: &str,
        tags: &[TagId],
    ) -> Result<(), PaperlessError> {
        self.patch_document(doc_id, &serde_json::json!({ "content": content, "tags": tags }))
    }

    fn update_metadata(&self, doc_id: DocumentId, patch: &MetadataPatch) -> Result<(), PaperlessError> {
        let body = serde_json::to_value(patch)
            .map_err(|e| PaperlessError::ResponseParsing(e.to_string()))?;
        if body.as_object().is_some_and(|o| o.is_empty()) {
            return Ok(());
        }
        self.patch_document(doc_id, &body)
    }

    fn list_correspondents(&self) -> Result<Vec<TaxonomyItem>, PaperlessError> {
        self.list_taxonomy("correspondents")
    }

    fn list_document_types(&self) -> Result<Vec<TaxonomyItem>, PaperlessError> {
        self.list_taxonomy("document_types")
    }

    fn list_tags(&self) -> Result<Vec<TaxonomyItem>, PaperlessError> {
        self.list_taxonomy("tags")
    }

    fn create_correspondent(&self, name: &str) -> Result<TaxonomyItem, PaperlessError> {
        self.create_taxonomy("correspondents", serde_json::json!({ "name": name }))
    }

    fn create_document_type(&self, name: &str) -> Result<TaxonomyItem, PaperlessError> {
        self.create_taxonomy("document_types", serde_json::json!({ "name": name }))
    }

    fn create_tag(
        &self,
        name: &str,
        matching_algorithm: Option<MatchingAlgorithm>,
    ) -> Result<TaxonomyItem, PaperlessError> {
        let mut body = serde_json::json!({ "name": name });
        if let Some(algorithm) = matching_algorithm {
            body["matching_algorithm"] = algorithm.to_json();
        }
        self.create_taxonomy("tags", body)
    }
}
