use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub use convoy_core::domain_of;

/// Metadata key under which a retriever stashes its raw relevance value.
pub const RAW_SCORE_KEY: &str = "raw_score";
/// Metadata key holding per-retriever raw scores after fusion.
pub const SCORES_KEY: &str = "scores";
/// Metadata key holding the assigned citation marker.
pub const CITATION_KEY: &str = "citation";

/// A retrieved unit of evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identity within the producing retriever.
    pub id: String,
    /// Source URL. Fusion and citations deduplicate on it.
    pub url: String,
    /// Display title.
    pub title: String,
    /// Lowercased host of `url`.
    pub domain: String,
    /// Publication date, when known.
    #[serde(default)]
    pub published: Option<DateTime<Utc>>,
    /// Body text.
    pub text: String,
    /// Raw retriever scores and the assigned citation marker.
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Document {
    /// Create a document; the domain is derived from the URL.
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        title: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let url = url.into();
        Self {
            id: id.into(),
            domain: domain_of(&url),
            url,
            title: title.into(),
            published: None,
            text: text.into(),
            metadata: Map::new(),
        }
    }

    /// Set the publication date.
    pub fn with_published(mut self, published: DateTime<Utc>) -> Self {
        self.published = Some(published);
        self
    }

    /// Stash a retriever's raw relevance value.
    pub fn with_raw_score(mut self, score: f64) -> Self {
        self.metadata
            .insert(RAW_SCORE_KEY.to_string(), Value::from(score));
        self
    }

    /// Raw relevance value stashed by the retriever.
    pub fn raw_score(&self) -> Option<f64> {
        self.metadata.get(RAW_SCORE_KEY).and_then(Value::as_f64)
    }

    /// Citation marker assigned by [`crate::bundle_citations`], if any.
    pub fn citation(&self) -> Option<&str> {
        self.metadata.get(CITATION_KEY).and_then(Value::as_str)
    }
}

/// Per-component scores behind a hit's fused score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Raw value per component (retriever names plus `quality`).
    pub raw: BTreeMap<String, f64>,
    /// Min-max normalised value per component.
    pub normalized: BTreeMap<String, f64>,
}

/// A ranked document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    /// The ranked document.
    pub document: Document,
    /// Fused score.
    pub score: f64,
    /// 1-based rank after fusion.
    pub rank: usize,
    /// Per-component normalised scores.
    pub breakdown: ScoreBreakdown,
}

/// What retrievers are asked for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Search queries, in priority order.
    pub queries: Vec<String>,
    /// Documents wanted per retriever.
    pub top_k: usize,
    /// Role of the requesting task.
    #[serde(default)]
    pub role: Option<String>,
    /// Id of the requesting task.
    #[serde(default)]
    pub task_id: Option<String>,
}

impl QuerySpec {
    /// Spec with no role or task attached.
    pub fn new(queries: Vec<String>, top_k: usize) -> Self {
        Self {
            queries,
            top_k,
            role: None,
            task_id: None,
        }
    }

    /// All queries joined into one search string.
    pub fn text(&self) -> String {
        self.queries.join(" ")
    }
}

/// A citation source descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Citation marker (`S1`, `S2`, ...).
    pub marker: String,
    /// Source URL.
    pub url: String,
    /// Source title.
    pub title: String,
    /// Source domain.
    pub domain: String,
}

/// Ranked, budget-clipped evidence handed to a capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    /// Kept hits in rank order.
    pub hits: Vec<Hit>,
    /// One source per unique URL among `hits`.
    pub sources: Vec<SourceRef>,
    /// Estimated tokens of the kept hits.
    pub tokens_est: usize,
    /// Budget the bundle was clipped to.
    pub token_budget: usize,
}

impl ContextBundle {
    /// Whether no hit was kept.
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Compact JSON form stored in a task's answer as `retrieval_context`.
    pub fn to_context_value(&self) -> Value {
        let snippets: Vec<Value> = self
            .hits
            .iter()
            .map(|hit| {
                serde_json::json!({
                    "marker": hit.document.citation(),
                    "title": hit.document.title,
                    "url": hit.document.url,
                    "text": hit.document.text,
                    "score": hit.score,
                })
            })
            .collect();
        serde_json::json!({
            "snippets": snippets,
            "sources": self.sources,
            "tokens_est": self.tokens_est,
            "token_budget": self.token_budget,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_raw_score() {
        let doc = Document::new("d1", "https://a.org/x", "A", "text").with_raw_score(0.7);
        assert_eq!(doc.domain, "a.org");
        assert_eq!(doc.raw_score(), Some(0.7));
        assert!(doc.citation().is_none());
    }

    #[test]
    fn test_query_spec_text() {
        let spec = QuerySpec::new(vec!["rust".into(), "async".into()], 3);
        assert_eq!(spec.text(), "rust async");
    }
}
