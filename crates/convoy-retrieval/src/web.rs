use crate::document::{Document, QuerySpec};
use crate::retriever::Retriever;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use convoy_core::{ConvoyError, ConvoyResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// One result from a web search backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebResult {
    /// Result URL.
    pub url: String,
    /// Result title.
    #[serde(default)]
    pub title: String,
    /// Text snippet, used as the document body.
    #[serde(default)]
    pub snippet: String,
    /// Publication date, when the backend reports one.
    #[serde(default)]
    pub published: Option<DateTime<Utc>>,
}

/// A search engine the web retriever can query.
#[async_trait]
pub trait WebSearchBackend: Send + Sync {
    /// Up to `limit` results for `query`.
    async fn search(&self, query: &str, limit: usize) -> ConvoyResult<Vec<WebResult>>;
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<WebResult>,
}

/// JSON search endpoint: `GET {endpoint}?q=<query>&n=<limit>` returning
/// `{ "results": [{ "url", "title", "snippet", "published" }] }`.
pub struct HttpSearchBackend {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpSearchBackend {
    /// Backend for `endpoint`. Fails only if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>) -> ConvoyResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .redirect(reqwest::redirect::Policy::limited(3))
            .build()
            .map_err(|e| ConvoyError::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }
}

#[async_trait]
impl WebSearchBackend for HttpSearchBackend {
    async fn search(&self, query: &str, limit: usize) -> ConvoyResult<Vec<WebResult>> {
        info!(endpoint = %self.endpoint, query = %query, "Web search");
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("n", &limit.to_string())])
            .send()
            .await
            .map_err(|e| ConvoyError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConvoyError::Http(format!(
                "search endpoint returned {status}"
            )));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| ConvoyError::Http(format!("invalid search response: {e}")))?;
        Ok(body.results.into_iter().take(limit).collect())
    }
}

/// Web-search adapter. Without a backend it reports itself unavailable.
pub struct WebSearchRetriever {
    backend: Option<Arc<dyn WebSearchBackend>>,
}

impl WebSearchRetriever {
    /// Retriever over `backend`.
    pub fn new(backend: Arc<dyn WebSearchBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// Retriever that always reports itself unavailable.
    pub fn disabled() -> Self {
        Self { backend: None }
    }
}

#[async_trait]
impl Retriever for WebSearchRetriever {
    fn name(&self) -> &str {
        "web"
    }

    async fn search(&self, spec: &QuerySpec) -> ConvoyResult<Vec<Document>> {
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| ConvoyError::Retrieval("web search is disabled".to_string()))?;
        let query = spec.text();
        if query.trim().is_empty() || spec.top_k == 0 {
            return Ok(Vec::new());
        }

        let results = backend.search(&query, spec.top_k).await?;
        let count = results.len().max(1) as f64;
        Ok(results
            .into_iter()
            .enumerate()
            .filter(|(_, r)| !r.url.is_empty())
            .map(|(position, r)| {
                let text = if r.snippet.is_empty() { r.title.clone() } else { r.snippet };
                let mut doc = Document::new(format!("web:{}", r.url), r.url, r.title, text)
                    // Engine order is the only relevance signal.
                    .with_raw_score(1.0 - position as f64 / count);
                doc.published = r.published;
                doc
            })
            .collect())
    }
}
