use crate::bm25::tokenize;
use crate::document::{Document, QuerySpec};
use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::store::DocumentStore;
use async_trait::async_trait;
use convoy_core::{ConvoyError, ConvoyResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// A retrieval strategy.
///
/// Implementations return up to `spec.top_k` documents, each carrying its raw
/// relevance value via [`Document::with_raw_score`]. An `Err` means the
/// backend is unavailable; the fusion stage treats it as an empty result.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Component name used for fusion weights (`lexical`, `dense`, ...).
    fn name(&self) -> &str;

    /// Up to `spec.top_k` documents, each with its raw score in metadata.
    async fn search(&self, spec: &QuerySpec) -> ConvoyResult<Vec<Document>>;
}

/// BM25 keyword scoring over a [`DocumentStore`].
pub struct LexicalRetriever {
    store: Arc<DocumentStore>,
}

impl LexicalRetriever {
    /// Retriever over `store`.
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Retriever for LexicalRetriever {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn search(&self, spec: &QuerySpec) -> ConvoyResult<Vec<Document>> {
        Ok(self
            .store
            .lexical_search(&spec.text(), spec.top_k)
            .into_iter()
            .map(|(doc, score)| doc.with_raw_score(score))
            .collect())
    }
}

/// Embedding similarity over a [`DocumentStore`].
///
/// Document vectors are computed lazily and cached by content hash.
pub struct DenseRetriever {
    store: Arc<DocumentStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    cache: Mutex<HashMap<String, Vec<f32>>>,
}

impl DenseRetriever {
    /// Retriever over `store` using `embedder` for queries and documents.
    pub fn new(store: Arc<DocumentStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            store,
            embedder,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn vector_for(&self, hash: &str, text: &str) -> Option<Vec<f32>> {
        if let Some(cached) = self.cache.lock().get(hash) {
            return Some(cached.clone());
        }
        match self.embedder.embed(text).await {
            Ok(vector) => {
                self.cache.lock().insert(hash.to_string(), vector.clone());
                Some(vector)
            }
            Err(e) => {
                debug!(hash = %hash, error = %e, "Dense retriever: skipping document");
                None
            }
        }
    }
}

#[async_trait]
impl Retriever for DenseRetriever {
    fn name(&self) -> &str {
        "dense"
    }

    async fn search(&self, spec: &QuerySpec) -> ConvoyResult<Vec<Document>> {
        let query = spec.text();
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query_vector = self.embedder.embed(&query).await?;

        let mut scored: Vec<(Document, f32)> = Vec::new();
        for (hash, doc) in self.store.entries() {
            let Some(vector) = self.vector_for(&hash, &doc.text).await else {
                continue;
            };
            let similarity = cosine_similarity(&query_vector, &vector);
            if similarity > 0.0 {
                scored.push((doc, similarity));
            }
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(spec.top_k);
        Ok(scored
            .into_iter()
            .map(|(doc, score)| doc.with_raw_score(f64::from(score)))
            .collect())
    }
}

/// A curated knowledge-base article with lookup keywords.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    /// The article returned on a match.
    pub document: Document,
    /// Extra lookup terms besides the title words.
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Static knowledge-base lookup.
///
/// Scores each entry by the fraction of distinct query tokens found among its
/// keywords and title words.
pub struct KnowledgeBaseRetriever {
    entries: Vec<(KnowledgeEntry, HashSet<String>)>,
}

impl KnowledgeBaseRetriever {
    /// Index the entries' keywords and title words.
    pub fn new(entries: Vec<KnowledgeEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|entry| {
                let mut terms: HashSet<String> = tokenize(&entry.document.title).into_iter().collect();
                for keyword in entry.keywords.iter() {
                    terms.extend(tokenize(keyword));
                }
                (entry, terms)
            })
            .collect();
        Self { entries }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Retriever for KnowledgeBaseRetriever {
    fn name(&self) -> &str {
        "kb"
    }

    async fn search(&self, spec: &QuerySpec) -> ConvoyResult<Vec<Document>> {
        let query_terms: HashSet<String> = tokenize(&spec.text()).into_iter().collect();
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(Document, f64)> = self
            .entries
            .iter()
            .filter_map(|(entry, terms)| {
                let matched = query_terms.iter().filter(|t| terms.contains(*t)).count();
                (matched > 0).then(|| {
                    (
                        entry.document.clone(),
                        matched as f64 / query_terms.len() as f64,
                    )
                })
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(spec.top_k);
        Ok(scored
            .into_iter()
            .map(|(doc, score)| doc.with_raw_score(score))
            .collect())
    }
}

/// A retriever that is configured but switched off.
pub struct DisabledRetriever {
    name: String,
}

impl DisabledRetriever {
    /// Disabled retriever reported under `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Retriever for DisabledRetriever {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, _spec: &QuerySpec) -> ConvoyResult<Vec<Document>> {
        Err(ConvoyError::Retrieval(format!(
            "retriever '{}' is disabled",
            self.name
        )))
    }
}
