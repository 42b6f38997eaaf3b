use std::collections::HashMap;
use std::sync::Mutex;

use super::types::*;
use super::PaperlessError;

/// In-memory `DocumentStore` for tests and dry runs.
///
/// Records every patch and creation so tests can assert on the exact calls
/// the pipeline made.
#[derive(Default)]
pub struct MemoryDocumentStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    documents: HashMap<DocumentId, Document>,
    files: HashMap<DocumentId, (Vec<u8>, String)>,
    correspondents: Vec<TaxonomyItem>,
    document_types: Vec<TaxonomyItem>,
    tags: Vec<TaxonomyItem>,
    next_taxonomy_id: u32,
    metadata_patches: Vec<(DocumentId, MetadataPatch)>,
    content_patches: Vec<(DocumentId, String, Vec<TagId>)>,
    created: Vec<(String, String)>,
    fail_patches: u32,
    fail_creates: u32,
    fail_reads: bool,
    drop_tag_writes: bool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        let store = Self::default();
        store.lock().next_taxonomy_id = 1000;
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_document(self, doc: Document) -> Self {
        self.insert_document(doc);
        self
    }

    pub fn insert_document(&self, doc: Document) {
        self.lock().documents.insert(doc.id, doc);
    }

    pub fn with_file(self, doc_id: DocumentId, bytes: Vec<u8>, content_type: &str) -> Self {
        self.lock()
            .files
            .insert(doc_id, (bytes, content_type.to_string()));
        self
    }

    pub fn with_correspondent(self, id: u32, name: &str, document_count: u64) -> Self {
        self.lock().correspondents.push(item(id, name, document_count));
        self
    }

    pub fn with_document_type(self, id: u32, name: &str, document_count: u64) -> Self {
        self.lock().document_types.push(item(id, name, document_count));
        self
    }

    pub fn with_tag(self, id: u32, name: &str, document_count: u64) -> Self {
        self.lock().tags.push(item(id, name, document_count));
        self
    }

    /// Fail the next `n` patch calls with a 503.
    pub fn fail_next_patches(&self, n: u32) {
        self.lock().fail_patches = n;
    }

    /// Fail the next `n` create calls with a 400 (as on a duplicate name).
    pub fn fail_next_creates(&self, n: u32) {
        self.lock().fail_creates = n;
    }

    /// Make every document read fail with a 503.
    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Accept tag patches but never persist them (simulates a lost update).
    pub fn drop_tag_writes(&self, drop: bool) {
        self.lock().drop_tag_writes = drop;
    }

    /// Add a tag to a taxonomy list behind the pipeline's back.
    pub fn insert_tag(&self, id: u32, name: &str) {
        self.lock().tags.push(item(id, name, 0));
    }

    pub fn insert_correspondent(&self, id: u32, name: &str) {
        self.lock().correspondents.push(item(id, name, 0));
    }

    pub fn document(&self, doc_id: DocumentId) -> Option<Document> {
        self.lock().documents.get(&doc_id).cloned()
    }

    pub fn tags_of(&self, doc_id: DocumentId) -> Vec<TagId> {
        let mut tags = self
            .lock()
            .documents
            .get(&doc_id)
            .map(|d| d.tags.clone())
            .unwrap_or_default();
        tags.sort_unstable();
        tags
    }

    pub fn metadata_patches(&self) -> Vec<(DocumentId, MetadataPatch)> {
        self.lock().metadata_patches.clone()
    }

    pub fn content_patches(&self) -> Vec<(DocumentId, String, Vec<TagId>)> {
        self.lock().content_patches.clone()
    }

    /// `(kind, name)` for every successful create, in call order.
    pub fn created(&self) -> Vec<(String, String)> {
        self.lock().created.clone()
    }

    fn take_patch_failure(state: &mut MemoryState) -> Result<(), PaperlessError> {
        if state.fail_patches > 0 {
            state.fail_patches -= 1;
            return Err(PaperlessError::Api {
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(())
    }

    fn create(&self, kind: &str, name: &str) -> Result<TaxonomyItem, PaperlessError> {
        let mut state = self.lock();
        if state.fail_creates > 0 {
            state.fail_creates -= 1;
            return Err(PaperlessError::Api {
                status: 400,
                body: format!("{kind} with this name already exists"),
            });
        }
        state.next_taxonomy_id += 1;
        let created = item(state.next_taxonomy_id, name, 0);
        match kind {
            "correspondent" => state.correspondents.push(created.clone()),
            "document_type" => state.document_types.push(created.clone()),
            _ => state.tags.push(created.clone()),
        }
        state.created.push((kind.to_string(), name.to_string()));
        Ok(created)
    }
}

fn item(id: u32, name: &str, document_count: u64) -> TaxonomyItem {
    TaxonomyItem {
        id,
        name: name.to_string(),
        document_count,
        matching_algorithm: None,
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn list_documents_by_tag(&self, tag_id: TagId) -> Result<Vec<DocumentSummary>, PaperlessError> {
        let state = self.lock();
        let mut docs: Vec<DocumentSummary> = state
            .documents
            .values()
            .filter(|d| d.tags.contains(&tag_id))
            .map(|d| DocumentSummary {
                id: d.id,
                title: d.title.clone(),
                tags: d.tags.clone(),
            })
            .collect();
        docs.sort_by_key(|d| d.id);
        Ok(docs)
    }

    fn get_document(&self, doc_id: DocumentId) -> Result<Document, PaperlessError> {
        let state = self.lock();
        if state.fail_reads {
            return Err(PaperlessError::Api {
                status: 503,
                body: "unavailable".into(),
            });
        }
        state
            .documents
            .get(&doc_id)
            .cloned()
            .ok_or(PaperlessError::DocumentNotFound(doc_id))
    }

    fn download_document(&self, doc_id: DocumentId) -> Result<(Vec<u8>, String), PaperlessError> {
        self.lock()
            .files
            .get(&doc_id)
            .cloned()
            .ok_or(PaperlessError::DocumentNotFound(doc_id))
    }

    fn update_content_and_tags(
        &self,
        doc_id: DocumentId,
        content: &str,
        tags: &[TagId],
    ) -> Result<(), PaperlessError> {
        let mut state = self.lock();
        Self::take_patch_failure(&mut state)?;
        let drop_tags = state.drop_tag_writes;
        let doc = state
            .documents
            .get_mut(&doc_id)
            .ok_or(PaperlessError::DocumentNotFound(doc_id))?;
        doc.content = Some(content.to_string());
        if !drop_tags {
            doc.tags = tags.to_vec();
        }
        state
            .content_patches
            .push((doc_id, content.to_string(), tags.to_vec()));
        Ok(())
    }

    fn update_metadata(&self, doc_id: DocumentId, patch: &MetadataPatch) -> Result<(), PaperlessError> {
        let mut state = self.lock();
        Self::take_patch_failure(&mut state)?;
        let drop_tags = state.drop_tag_writes;
        let doc = state
            .documents
            .get_mut(&doc_id)
            .ok_or(PaperlessError::DocumentNotFound(doc_id))?;
        if let Some(title) = &patch.title {
            doc.title = Some(title.clone());
        }
        if let (Some(tags), false) = (&patch.tags, drop_tags) {
            doc.tags = tags.clone();
        }
        if let Some(fields) = &patch.custom_fields {
            doc.custom_fields = fields.clone();
        }
        if let Some(date) = &patch.document_date {
            doc.created = Some(date.clone());
        }
        state.metadata_patches.push((doc_id, patch.clone()));
        Ok(())
    }

    fn list_correspondents(&self) -> Result<Vec<TaxonomyItem>, PaperlessError> {
        Ok(self.lock().correspondents.clone())
    }

    fn list_document_types(&self) -> Result<Vec<TaxonomyItem>, PaperlessError> {
        Ok(self.lock().document_types.clone())
    }

    fn list_tags(&self) -> Result<Vec<TaxonomyItem>, PaperlessError> {
        Ok(self.lock().tags.clone())
    }

    fn create_correspondent(&self, name: &str) -> Result<TaxonomyItem, PaperlessError> {
        self.create("correspondent", name)
    }

    fn create_document_type(&self, name: &str) -> Result<TaxonomyItem, PaperlessError> {
        self.create("document_type", name)
    }

    fn create_tag(
        &self,
        name: &str,
        _matching_algorithm: Option<MatchingAlgorithm>,
    ) -> Result<TaxonomyItem, PaperlessError> {
        self.create("tag", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: DocumentId, tags: Vec<TagId>) -> Document {
        Document {
            id,
            tags,
            ..Default::default()
        }
    }

    #[test]
    fn lists_only_documents_with_tag() {
        let store = MemoryDocumentStore::new()
            .with_document(doc(1, vec![10]))
            .with_document(doc(2, vec![11]))
            .with_document(doc(3, vec![10, 11]));
        let ids: Vec<_> = store
            .list_documents_by_tag(10)
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn content_patch_replaces_tags() {
        let store = MemoryDocumentStore::new().with_document(doc(1, vec![10]));
        store.update_content_and_tags(1, "text", &[20, 21]).unwrap();
        assert_eq!(store.tags_of(1), vec![20, 21]);
        assert_eq!(store.document(1).unwrap().content_text(), "text");
    }

    #[test]
    fn injected_patch_failure_is_consumed() {
        let store = MemoryDocumentStore::new().with_document(doc(1, vec![]));
        store.fail_next_patches(1);
        assert!(store.update_metadata(1, &MetadataPatch::tags_only([5])).is_err());
        assert!(store.update_metadata(1, &MetadataPatch::tags_only([5])).is_ok());
        assert_eq!(store.tags_of(1), vec![5]);
    }

    #[test]
    fn creates_are_recorded() {
        let store = MemoryDocumentStore::new();
        let created = store.create_tag("invoice", None).unwrap();
        assert_eq!(created.name, "invoice");
        assert_eq!(store.created(), vec![("tag".to_string(), "invoice".to_string())]);
        assert_eq!(store.list_tags().unwrap().len(), 1);
    }

    #[test]
    fn missing_document_is_not_found() {
        let store = MemoryDocumentStore::new();
        assert!(matches!(
            store.get_document(9),
            Err(PaperlessError::DocumentNotFound(9))
        ));
    }
}
