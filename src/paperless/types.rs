//! Paperless-ngx document-store contract.
//!
//! The pipeline never owns documents: it lists, reads and patches them through
//! `DocumentStore`. The only state it keeps on a document is its tag set.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::PaperlessError;

pub type DocumentId = u32;
pub type TagId = u32;

/// Entry returned by a tag-filtered document listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: DocumentId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub tags: Vec<TagId>,
}

impl DocumentSummary {
    pub fn tag_set(&self) -> BTreeSet<TagId> {
        self.tags.iter().copied().collect()
    }
}

/// Full document as read back from the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub tags: Vec<TagId>,
    #[serde(default)]
    pub content: Option<String>,
    /// Creation timestamp as Paperless reports it (ISO-8601 date or datetime).
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub custom_fields: Vec<CustomFieldValue>,
}

impl Document {
    pub fn tag_set(&self) -> BTreeSet<TagId> {
        self.tags.iter().copied().collect()
    }

    pub fn content_text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }

    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or("<untitled>")
    }
}

/// One custom-field value on a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFieldValue {
    pub field: u32,
    #[serde(default)]
    pub value: serde_json::Value,
}

/// Correspondent, document type or tag as listed by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyItem {
    pub id: u32,
    pub name: String,
    /// Number of documents using the entity.
    #[serde(default, alias = "documents_count")]
    pub document_count: u64,
    /// Paperless reports this as an integer on recent versions and a string on old ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matching_algorithm: Option<serde_json::Value>,
}

/// How a new tag's "no auto-matching" setting has to be spelled for this store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchingAlgorithm {
    /// `matching_algorithm: 0`
    NoneNumeric,
    /// `matching_algorithm: "none"`
    NoneNamed,
}

impl MatchingAlgorithm {
    /// Infer the spelling from the first existing tag that reports one.
    pub fn detect(tags: &[TaxonomyItem]) -> Self {
        for tag in tags {
            match &tag.matching_algorithm {
                Some(serde_json::Value::Number(_)) => return Self::NoneNumeric,
                Some(serde_json::Value::String(_)) => return Self::NoneNamed,
                _ => continue,
            }
        }
        Self::NoneNamed
    }

    pub fn to_json(self) -> serde_json::Value {
        match self {
            Self::NoneNumeric => serde_json::json!(0),
            Self::NoneNamed => serde_json::json!("none"),
        }
    }
}

/// Partial metadata update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetadataPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "correspondent", skip_serializing_if = "Option::is_none")]
    pub correspondent_id: Option<u32>,
    #[serde(rename = "document_type", skip_serializing_if = "Option::is_none")]
    pub document_type_id: Option<u32>,
    #[serde(rename = "created_date", skip_serializing_if = "Option::is_none")]
    pub document_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<TagId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_fields: Option<Vec<CustomFieldValue>>,
}

impl MetadataPatch {
    pub fn tags_only(tags: impl IntoIterator<Item = TagId>) -> Self {
        Self {
            tags: Some(tags.into_iter().collect()),
            ..Default::default()
        }
    }
}

/// Everything the pipeline needs from Paperless-ngx.
///
/// Implementations are expected to retry transient failures internally.
pub trait DocumentStore: Send + Sync {
    fn list_documents_by_tag(&self, tag_id: TagId) -> Result<Vec<DocumentSummary>, PaperlessError>;

    fn get_document(&self, doc_id: DocumentId) -> Result<Document, PaperlessError>;

    /// Original file bytes and their content type.
    fn download_document(&self, doc_id: DocumentId) -> Result<(Vec<u8>, String), PaperlessError>;

    /// Replace the content text and the full tag set in one patch.
    fn update_content_and_tags(
        &self,
        doc_id: DocumentId,
        content: &str,
        tags: &[TagId],
    ) -> Result<(), PaperlessError>;

    fn update_metadata(&self, doc_id: DocumentId, patch: &MetadataPatch) -> Result<(), PaperlessError>;

    fn list_correspondents(&self) -> Result<Vec<TaxonomyItem>, PaperlessError>;
    fn list_document_types(&self) -> Result<Vec<TaxonomyItem>, PaperlessError>;
    fn list_tags(&self) -> Result<Vec<TaxonomyItem>, PaperlessError>;

    fn create_correspondent(&self, name: &str) -> Result<TaxonomyItem, PaperlessError>;
    fn create_document_type(&self, name: &str) -> Result<TaxonomyItem, PaperlessError>;
    fn create_tag(
        &self,
        name: &str,
        matching_algorithm: Option<MatchingAlgorithm>,
    ) -> Result<TaxonomyItem, PaperlessError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_tolerates_missing_fields() {
        let doc: Document = serde_json::from_str(r#"{"id": 7}"#).unwrap();
        assert_eq!(doc.id, 7);
        assert!(doc.tags.is_empty());
        assert_eq!(doc.content_text(), "");
        assert_eq!(doc.display_title(), "<untitled>");
    }

    #[test]
    fn taxonomy_item_reads_usage_count_alias() {
        let item: TaxonomyItem =
            serde_json::from_str(r#"{"id": 1, "name": "Acme", "documents_count": 12}"#).unwrap();
        assert_eq!(item.document_count, 12);
    }

    #[test]
    fn matching_algorithm_detection() {
        let numeric: Vec<TaxonomyItem> = serde_json::from_str(
            r#"[{"id": 1, "name": "a"}, {"id": 2, "name": "b", "matching_algorithm": 6}]"#,
        )
        .unwrap();
        assert_eq!(MatchingAlgorithm::detect(&numeric), MatchingAlgorithm::NoneNumeric);

        let named: Vec<TaxonomyItem> =
            serde_json::from_str(r#"[{"id": 1, "name": "a", "matching_algorithm": "any"}]"#)
                .unwrap();
        assert_eq!(MatchingAlgorithm::detect(&named), MatchingAlgorithm::NoneNamed);
        assert_eq!(MatchingAlgorithm::detect(&[]), MatchingAlgorithm::NoneNamed);
        assert_eq!(MatchingAlgorithm::NoneNumeric.to_json(), serde_json::json!(0));
    }

    #[test]
    fn metadata_patch_skips_unset_fields() {
        let patch = MetadataPatch {
            title: Some("Invoice".into()),
            correspondent_id: Some(4),
            ..Default::default()
        };
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json, serde_json::json!({"title": "Invoice", "correspondent": 4}));
    }

    #[test]
    fn tags_only_patch() {
        let json = serde_json::to_value(MetadataPatch::tags_only([3, 1])).unwrap();
        assert_eq!(json, serde_json::json!({"tags": [3, 1]}));
    }
}
