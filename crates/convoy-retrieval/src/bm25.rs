use std::collections::HashMap;

/// BM25 parameters.
const K1: f64 = 1.2;
const B: f64 = 0.75;

/// Lowercase alphanumeric words longer than one character.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() > 1)
        .collect()
}

/// A BM25 inverted index keyed by string document keys.
///
/// The lexical retriever indexes documents by content hash, so re-adding the
/// same key replaces the previous postings instead of double counting.
#[derive(Debug, Clone, Default)]
pub struct Bm25Index {
    /// term -> (doc key -> term frequency)
    postings: HashMap<String, HashMap<String, f64>>,
    /// doc key -> length in tokens
    doc_lengths: HashMap<String, f64>,
    total_length: f64,
}

impl Bm25Index {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index a document under `key`, replacing any previous entry for it.
    pub fn add_document(&mut self, key: &str, text: &str) {
        self.remove_document(key);

        let tokens = tokenize(text);
        let mut term_freq: HashMap<String, f64> = HashMap::new();
        for token in tokens.iter() {
            *term_freq.entry(token.clone()).or_insert(0.0) += 1.0;
        }
        for (term, freq) in term_freq {
            self.postings
                .entry(term)
                .or_default()
                .insert(key.to_string(), freq);
        }

        let len = tokens.len() as f64;
        self.doc_lengths.insert(key.to_string(), len);
        self.total_length += len;
    }

    /// Drop a document from the index. Unknown keys are ignored.
    pub fn remove_document(&mut self, key: &str) {
        let Some(len) = self.doc_lengths.remove(key) else {
            return;
        };
        self.total_length -= len;
        self.postings.retain(|_, docs| {
            docs.remove(key);
            !docs.is_empty()
        });
    }

    /// Up to `top_k` `(key, score)` pairs by descending BM25 score.
    ///
    /// ```text
    /// score = Σ_t IDF(t) * tf * (k1 + 1) / (tf + k1 * (1 - b + b * dl / avgdl))
    /// IDF(t) = ln((N - df + 0.5) / (df + 0.5) + 1)
    /// ```
    pub fn search(&self, query: &str, top_k: usize) -> Vec<(String, f64)> {
        let n = self.doc_lengths.len() as f64;
        if n == 0.0 || top_k == 0 {
            return Vec::new();
        }
        let avgdl = if self.total_length > 0.0 {
            self.total_length / n
        } else {
            1.0
        };

        let mut query_terms = tokenize(query);
        query_terms.sort();
        query_terms.dedup();

        let mut scores: HashMap<&str, f64> = HashMap::new();
        for term in query_terms.iter() {
            let Some(docs) = self.postings.get(term) else {
                continue;
            };
            let df = docs.len() as f64;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            for (key, &tf) in docs.iter() {
                let dl = self.doc_lengths.get(key).copied().unwrap_or(0.0);
                let norm = tf + K1 * (1.0 - B + B * dl / avgdl);
                *scores.entry(key.as_str()).or_insert(0.0) += idf * tf * (K1 + 1.0) / norm;
            }
        }

        let mut ranked: Vec<(String, f64)> = scores
            .into_iter()
            .map(|(key, score)| (key.to_string(), score))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(top_k);
        ranked
    }

    /// Number of indexed documents.
    pub fn document_count(&self) -> usize {
        self.doc_lengths.len()
    }
}
