use crate::bm25::Bm25Index;
use crate::document::Document;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Hex SHA-256 of a document's text.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

#[derive(Default)]
struct StoreInner {
    documents: Vec<Document>,
    by_hash: HashMap<String, usize>,
    index: Bm25Index,
}

/// Process-wide document corpus keyed by content hash.
///
/// Insertion is idempotent: a second insert of identical text keeps the
/// first document. Backs the lexical and dense retrievers.
#[derive(Default)]
pub struct DocumentStore {
    inner: RwLock<StoreInner>,
}

impl DocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a batch of documents.
    pub fn from_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        let store = Self::new();
        for doc in documents {
            store.insert(doc);
        }
        store
    }

    /// Insert a document. Returns its content hash and whether it was new.
    pub fn insert(&self, document: Document) -> (String, bool) {
        let hash = content_hash(&document.text);
        let mut inner = self.inner.write();
        if inner.by_hash.contains_key(&hash) {
            return (hash, false);
        }
        inner.index.add_document(&hash, &document.text);
        let position = inner.documents.len();
        inner.documents.push(document);
        inner.by_hash.insert(hash.clone(), position);
        (hash, true)
    }

    /// Document stored under `hash`.
    pub fn get(&self, hash: &str) -> Option<Document> {
        let inner = self.inner.read();
        inner
            .by_hash
            .get(hash)
            .and_then(|&i| inner.documents.get(i).cloned())
    }

    /// Snapshot of `(hash, document)` pairs in insertion order.
    pub fn entries(&self) -> Vec<(String, Document)> {
        let inner = self.inner.read();
        let mut entries: Vec<(usize, String)> = inner
            .by_hash
            .iter()
            .map(|(hash, &i)| (i, hash.clone()))
            .collect();
        entries.sort_by_key(|(i, _)| *i);
        entries
            .into_iter()
            .map(|(i, hash)| (hash, inner.documents[i].clone()))
            .collect()
    }

    /// BM25 search over the corpus.
    pub fn lexical_search(&self, query: &str, top_k: usize) -> Vec<(Document, f64)> {
        let inner = self.inner.read();
        inner
            .index
            .search(query, top_k)
            .into_iter()
            .filter_map(|(hash, score)| {
                inner
                    .by_hash
                    .get(&hash)
                    .map(|&i| (inner.documents[i].clone(), score))
            })
            .collect()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.inner.read().documents.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which tasks pulled a given source into their context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceRecord {
    /// SHA-256 of the document text.
    pub content_hash: String,
    /// Source URL.
    pub url: String,
    /// Source title.
    pub title: String,
    /// When the source was first recorded.
    pub first_seen: DateTime<Utc>,
    /// Tasks that pulled the source, in first-seen order.
    pub task_ids: Vec<String>,
}

#[derive(Default)]
struct ProvenanceInner {
    order: Vec<String>,
    records: HashMap<String, ProvenanceRecord>,
}

/// Append-only retrieval provenance keyed by content hash.
#[derive(Default)]
pub struct ProvenanceStore {
    inner: RwLock<ProvenanceInner>,
}

impl ProvenanceStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `task_id` used `document`. Repeated records are no-ops.
    pub fn record(&self, task_id: &str, document: &Document) {
        let hash = content_hash(&document.text);
        let mut inner = self.inner.write();
        if let Some(record) = inner.records.get_mut(&hash) {
            if !record.task_ids.iter().any(|t| t == task_id) {
                record.task_ids.push(task_id.to_string());
            }
            return;
        }
        inner.order.push(hash.clone());
        inner.records.insert(
            hash.clone(),
            ProvenanceRecord {
                content_hash: hash,
                url: document.url.clone(),
                title: document.title.clone(),
                first_seen: Utc::now(),
                task_ids: vec![task_id.to_string()],
            },
        );
    }

    /// All records in first-seen order.
    pub fn records(&self) -> Vec<ProvenanceRecord> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|hash| inner.records.get(hash).cloned())
            .collect()
    }

    /// Number of recorded sources.
    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn doc(id: &str, text: &str) -> Document {
        Document::new(id, format!("https://example.org/{id}"), id, text)
    }

    #[test]
    fn test_content_hash_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("abc").len(), 64);
    }

    #[test]
    fn test_insert_is_idempotent() {
        let store = DocumentStore::new();
        let (h1, new1) = store.insert(doc("a", "same text"));
        let (h2, new2) = store.insert(doc("b", "same text"));
        assert!(new1);
        assert!(!new2);
        assert_eq!(h1, h2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&h1).unwrap().id, "a");
    }

    #[test]
    fn test_lexical_search_returns_documents() {
        let store = DocumentStore::from_documents(vec![
            doc("a", "sensor networks for field research"),
            doc("b", "chocolate cake recipes"),
        ]);
        let results = store.lexical_search("sensor research", 5);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.id, "a");
        assert_eq!(store.entries()[1].1.id, "b");
    }

    #[test]
    fn test_concurrent_identical_inserts() {
        let store = Arc::new(DocumentStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || store.insert(doc(&format!("d{i}"), "shared body")))
            })
            .collect();
        let inserted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|(_, new)| *new)
            .count();
        assert_eq!(inserted, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_provenance_dedupes_tasks() {
        let provenance = ProvenanceStore::new();
        let d = doc("a", "body");
        provenance.record("t1", &d);
        provenance.record("t1", &d);
        provenance.record("t2", &d);
        provenance.record("t2", &doc("b", "other"));
        let records = provenance.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].task_ids, vec!["t1", "t2"]);
        assert_eq!(records[1].url, "https://example.org/b");
    }
}
