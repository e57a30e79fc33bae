use crate::hybrid::FusionWeights;
use crate::quality::QualityScorer;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Retrieval tunables, usually the `[retrieval]` table of `convoy.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Per-component fusion weights.
    #[serde(default)]
    pub weights: FusionWeights,
    /// Domains whose documents are dropped and score zero.
    #[serde(default)]
    pub blocked_domains: Vec<String>,
    /// Reputation weight per domain or domain suffix.
    #[serde(default = "default_reputation_table")]
    pub reputation: HashMap<String, f64>,
    /// Reputation of domains missing from `reputation`.
    #[serde(default = "default_reputation")]
    pub default_reputation: f64,
    /// Explicit run-level budget. When unset it is `per_doc_cap * top_k`.
    #[serde(default)]
    pub token_budget: Option<usize>,
    /// Token cap for a single document.
    #[serde(default = "default_per_doc_cap")]
    pub per_doc_cap: usize,
    /// Hits requested from each retriever and kept after fusion.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Upper bound on derived queries.
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,
    /// Maximum characters per query.
    #[serde(default = "default_max_query_len")]
    pub max_query_len: usize,
    /// Retriever names to run: any of `lexical`, `dense`, `kb`, `web`.
    #[serde(default = "default_retrievers")]
    pub retrievers: Vec<String>,
    /// Endpoint for the `web` retriever. Without it the retriever is disabled.
    #[serde(default)]
    pub web_search_url: Option<String>,
}

fn default_reputation_table() -> HashMap<String, f64> {
    HashMap::from([
        ("gov".to_string(), 0.9),
        ("edu".to_string(), 0.85),
        ("wikipedia.org".to_string(), 0.8),
        ("github.com".to_string(), 0.75),
    ])
}

fn default_reputation() -> f64 {
    0.5
}

fn default_per_doc_cap() -> usize {
    400
}

fn default_top_k() -> usize {
    5
}

fn default_max_queries() -> usize {
    8
}

fn default_max_query_len() -> usize {
    64
}

fn default_retrievers() -> Vec<String> {
    vec!["lexical".into(), "dense".into(), "kb".into()]
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            weights: FusionWeights::default(),
            blocked_domains: Vec::new(),
            reputation: default_reputation_table(),
            default_reputation: default_reputation(),
            token_budget: None,
            per_doc_cap: default_per_doc_cap(),
            top_k: default_top_k(),
            max_queries: default_max_queries(),
            max_query_len: default_max_query_len(),
            retrievers: default_retrievers(),
            web_search_url: None,
        }
    }
}

impl RetrievalConfig {
    /// Quality scorer built from the reputation and block tables.
    pub fn scorer(&self) -> QualityScorer {
        QualityScorer::new(
            self.reputation.clone(),
            self.blocked_domains.clone(),
            self.default_reputation,
        )
    }

    /// Whether `name` is listed in `retrievers`, ignoring case.
    pub fn retriever_enabled(&self, name: &str) -> bool {
        self.retrievers.iter().any(|r| r.eq_ignore_ascii_case(name))
    }
}
