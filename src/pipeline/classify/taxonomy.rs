//! Correspondents, document types and tags known to the store.
//!
//! The cache is shared by every classification worker. One lock covers each
//! whole refresh, lookup and create so two workers never create the same name.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::normalize::{normalize_name, normalize_simple};
use crate::paperless::{DocumentStore, MatchingAlgorithm, PaperlessError, TaxonomyItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaxonomyKind {
    Correspondent,
    DocumentType,
    Tag,
}

impl TaxonomyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Correspondent => "correspondent",
            Self::DocumentType => "document_type",
            Self::Tag => "tag",
        }
    }

    /// Lookup key. Correspondents also lose punctuation and company suffixes.
    pub fn key(self, name: &str) -> String {
        match self {
            Self::Correspondent => normalize_name(name),
            Self::DocumentType | Self::Tag => normalize_simple(name),
        }
    }
}

#[derive(Debug, Default)]
struct Collection {
    items: Vec<TaxonomyItem>,
    index: HashMap<String, usize>,
}

impl Collection {
    fn rebuild(&mut self, kind: TaxonomyKind, items: Vec<TaxonomyItem>) {
        self.items.clear();
        self.index.clear();
        for item in items {
            self.insert(kind, item);
        }
    }

    fn insert(&mut self, kind: TaxonomyKind, item: TaxonomyItem) {
        let key = kind.key(&item.name);
        self.items.push(item);
        if !key.is_empty() {
            self.index.insert(key, self.items.len() - 1);
        }
    }

    fn find(&self, kind: TaxonomyKind, key: &str) -> Option<u32> {
        if let Some(&pos) = self.index.get(key) {
            return Some(self.items[pos].id);
        }
        if kind != TaxonomyKind::Correspondent {
            return None;
        }
        self.items.iter().find_map(|item| {
            let existing = kind.key(&item.name);
            let related =
                !existing.is_empty() && (existing.contains(key) || key.contains(existing.as_str()));
            related.then_some(item.id)
        })
    }

    fn top_names(&self, limit: usize) -> Vec<String> {
        let mut best: HashMap<String, (String, u64)> = HashMap::new();
        for item in &self.items {
            let name = item.name.trim();
            if name.is_empty() {
                continue;
            }
            let entry = best
                .entry(name.to_lowercase())
                .or_insert_with(|| (name.to_string(), item.document_count));
            entry.1 = entry.1.max(item.document_count);
        }
        let mut ranked: Vec<(String, (String, u64))> = best.into_iter().collect();
        ranked.sort_by(|(a_key, (_, a_count)), (b_key, (_, b_count))| {
            b_count.cmp(a_count).then_with(|| a_key.cmp(b_key))
        });
        ranked
            .into_iter()
            .take(limit)
            .map(|(_, (name, _))| name)
            .collect()
    }
}

#[derive(Debug, Default)]
struct TaxonomyState {
    correspondents: Collection,
    document_types: Collection,
    tags: Collection,
}

impl TaxonomyState {
    fn collection(&self, kind: TaxonomyKind) -> &Collection {
        match kind {
            TaxonomyKind::Correspondent => &self.correspondents,
            TaxonomyKind::DocumentType => &self.document_types,
            TaxonomyKind::Tag => &self.tags,
        }
    }

    fn collection_mut(&mut self, kind: TaxonomyKind) -> &mut Collection {
        match kind {
            TaxonomyKind::Correspondent => &mut self.correspondents,
            TaxonomyKind::DocumentType => &mut self.document_types,
            TaxonomyKind::Tag => &mut self.tags,
        }
    }
}

pub struct TaxonomyCache {
    store: Arc<dyn DocumentStore>,
    state: Mutex<TaxonomyState>,
}

impl TaxonomyCache {
    /// Empty cache; call `refresh` before the first batch.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            state: Mutex::new(TaxonomyState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TaxonomyState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Reload all three collections from the store.
    pub fn refresh(&self) -> Result<(), PaperlessError> {
        let mut state = self.lock();
        self.refresh_locked(&mut state)
    }

    fn refresh_locked(&self, state: &mut TaxonomyState) -> Result<(), PaperlessError> {
        let correspondents = self.store.list_correspondents()?;
        let document_types = self.store.list_document_types()?;
        let tags = self.store.list_tags()?;
        tracing::debug!(
            correspondents = correspondents.len(),
            document_types = document_types.len(),
            tags = tags.len(),
            "Taxonomy cache refreshed"
        );
        state
            .correspondents
            .rebuild(TaxonomyKind::Correspondent, correspondents);
        state
            .document_types
            .rebuild(TaxonomyKind::DocumentType, document_types);
        state.tags.rebuild(TaxonomyKind::Tag, tags);
        Ok(())
    }

    /// Most used names first (ties by name), one entry per case-insensitive name.
    pub fn top_names(&self, kind: TaxonomyKind, limit: usize) -> Vec<String> {
        self.lock().collection(kind).top_names(limit)
    }

    /// Id for `name`, creating the entity when nothing matches.
    ///
    /// A blank name resolves to `None`. When the create call fails the cache
    /// is reloaded once and the lookup repeated before the error is returned.
    pub fn get_or_create(
        &self,
        kind: TaxonomyKind,
        name: &str,
    ) -> Result<Option<u32>, PaperlessError> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        let key = kind.key(name);

        let mut state = self.lock();
        if !key.is_empty() {
            if let Some(id) = state.collection(kind).find(kind, &key) {
                return Ok(Some(id));
            }
        }

        match self.create(kind, name, &state) {
            Ok(item) => {
                tracing::info!(kind = kind.as_str(), name, id = item.id, "Created taxonomy entry");
                let id = item.id;
                state.collection_mut(kind).insert(kind, item);
                Ok(Some(id))
            }
            Err(e) => {
                tracing::warn!(
                    kind = kind.as_str(),
                    name,
                    error = %e,
                    "Failed to create taxonomy entry; refreshing cache"
                );
                self.refresh_locked(&mut state)?;
                match state.collection(kind).find(kind, &key) {
                    Some(id) if !key.is_empty() => Ok(Some(id)),
                    _ => Err(e),
                }
            }
        }
    }

    fn create(
        &self,
        kind: TaxonomyKind,
        name: &str,
        state: &TaxonomyState,
    ) -> Result<TaxonomyItem, PaperlessError> {
        match kind {
            TaxonomyKind::Correspondent => self.store.create_correspondent(name),
            TaxonomyKind::DocumentType => self.store.create_document_type(name),
            TaxonomyKind::Tag => {
                let algorithm = MatchingAlgorithm::detect(&state.tags.items);
                self.store.create_tag(name, Some(algorithm))
            }
        }
    }

    pub fn get_or_create_correspondent(&self, name: &str) -> Result<Option<u32>, PaperlessError> {
        self.get_or_create(TaxonomyKind::Correspondent, name)
    }

    pub fn get_or_create_document_type(&self, name: &str) -> Result<Option<u32>, PaperlessError> {
        self.get_or_create(TaxonomyKind::DocumentType, name)
    }

    /// Ids for every tag name, in order, without duplicates.
    pub fn get_or_create_tag_ids(&self, names: &[String]) -> Result<Vec<u32>, PaperlessError> {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            if let Some(id) = self.get_or_create(TaxonomyKind::Tag, name)? {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paperless::MemoryDocumentStore;

    fn cache(store: MemoryDocumentStore) -> (Arc<MemoryDocumentStore>, TaxonomyCache) {
        let store = Arc::new(store);
        let cache = TaxonomyCache::new(store.clone());
        cache.refresh().unwrap();
        (store, cache)
    }

    // ── lookup ──

    #[test]
    fn suffix_variant_resolves_to_existing_correspondent() {
        let (store, cache) = cache(MemoryDocumentStore::new().with_correspondent(10, "Acme", 4));
        assert_eq!(cache.get_or_create_correspondent("Acme Ltd").unwrap(), Some(10));
        assert!(store.created().is_empty());
    }

    #[test]
    fn correspondent_substring_match() {
        let (store, cache) =
            cache(MemoryDocumentStore::new().with_correspondent(10, "Northwind Energy", 1));
        assert_eq!(cache.get_or_create_correspondent("Northwind").unwrap(), Some(10));
        assert!(store.created().is_empty());
    }

    #[test]
    fn document_types_need_exact_key() {
        let (store, cache) = cache(MemoryDocumentStore::new().with_document_type(3, "Invoice", 1));
        assert_eq!(cache.get_or_create_document_type(" invoice ").unwrap(), Some(3));
        let created = cache.get_or_create_document_type("Invoice Copy").unwrap();
        assert!(created.is_some_and(|id| id != 3));
        assert_eq!(store.created().len(), 1);
    }

    #[test]
    fn blank_name_resolves_to_none() {
        let (store, cache) = cache(MemoryDocumentStore::new());
        assert_eq!(cache.get_or_create_correspondent("   ").unwrap(), None);
        assert!(store.created().is_empty());
    }

    // ── create ──

    #[test]
    fn new_name_is_created_once() {
        let (store, cache) = cache(MemoryDocumentStore::new());
        let first = cache.get_or_create_correspondent("Globex").unwrap();
        let second = cache.get_or_create_correspondent("Globex").unwrap();
        assert_eq!(first, second);
        assert_eq!(
            store.created(),
            vec![("correspondent".to_string(), "Globex".to_string())]
        );
    }

    #[test]
    fn failed_create_recovers_after_refresh() {
        let (store, cache) = cache(MemoryDocumentStore::new());
        // Created by someone else after our last refresh.
        store.insert_tag(77, "Bills");
        store.fail_next_creates(1);
        assert_eq!(cache.get_or_create(TaxonomyKind::Tag, "bills").unwrap(), Some(77));
    }

    #[test]
    fn refresh_picks_up_correspondent_added_elsewhere() {
        let (store, cache) = cache(MemoryDocumentStore::new());
        store.insert_correspondent(42, "Initech");
        cache.refresh().unwrap();
        assert_eq!(cache.get_or_create_correspondent("Initech Inc").unwrap(), Some(42));
        assert!(store.created().is_empty());
    }

    #[test]
    fn concurrent_workers_create_one_correspondent() {
        let (store, cache) = cache(MemoryDocumentStore::new());
        let cache = Arc::new(cache);
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    cache.get_or_create_correspondent("Globex").unwrap()
                })
            })
            .collect();
        let ids: Vec<Option<u32>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(store.created().len(), 1);
        assert!(ids[0].is_some());
        assert!(ids.iter().all(|id| *id == ids[0]));
    }

    #[test]
    fn failed_create_without_match_propagates() {
        let (store, cache) = cache(MemoryDocumentStore::new());
        store.fail_next_creates(1);
        let err = cache.get_or_create(TaxonomyKind::Tag, "bills").unwrap_err();
        assert!(matches!(err, PaperlessError::Api { status: 400, .. }));
    }

    #[test]
    fn tag_ids_are_deduplicated() {
        let (store, cache) = cache(MemoryDocumentStore::new().with_tag(5, "bills", 2));
        let names: Vec<String> = ["Bills", "bills", "tax", "TAX"].iter().map(|s| s.to_string()).collect();
        let ids = cache.get_or_create_tag_ids(&names).unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], 5);
        assert_eq!(store.created().len(), 1);
    }

    // ── prompt context ──

    #[test]
    fn top_names_by_usage_then_name() {
        let (_, cache) = cache(
            MemoryDocumentStore::new()
                .with_tag(1, "beta", 3)
                .with_tag(2, "Alpha", 3)
                .with_tag(3, "gamma", 10)
                .with_tag(4, "ALPHA", 7)
                .with_tag(5, "delta", 0),
        );
        assert_eq!(
            cache.top_names(TaxonomyKind::Tag, 3),
            vec!["gamma", "Alpha", "beta"]
        );
    }

    #[test]
    fn kind_keys() {
        assert_eq!(TaxonomyKind::Correspondent.key("Acme, Inc."), "acme");
        assert_eq!(TaxonomyKind::Tag.key("Acme, Inc."), "acme, inc.");
    }
}
