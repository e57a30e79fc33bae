//! `convoy.toml` loading.

use chrono::{DateTime, Utc};
use convoy_orchestrator::OrchestratorConfig;
use convoy_retrieval::{Document, KnowledgeEntry, RetrievalConfig};
use convoy_safety::PolicyConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable that overrides `retrieval.web_search_url`.
pub const WEB_SEARCH_ENV: &str = "CONVOY_WEB_SEARCH_URL";

/// Top-level configuration for the `convoy` binary.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConvoyConfig {
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    /// JSON file with the documents the lexical and dense retrievers search.
    #[serde(default)]
    pub corpus: Option<PathBuf>,
    #[serde(default)]
    pub knowledge: Vec<KnowledgeEntry>,
}

impl ConvoyConfig {
    /// Load from `path`, or fall back to defaults when the file does not exist.
    ///
    /// A relative `corpus` path is resolved against the config file's directory.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "No config file found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e)
        })?;
        let mut config: ConvoyConfig = toml::from_str(&content).map_err(|e| {
            anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e)
        })?;

        if let (Some(corpus), Some(dir)) = (config.corpus.as_ref(), path.parent()) {
            if corpus.is_relative() {
                config.corpus = Some(dir.join(corpus));
            }
        }
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Apply overrides from the process environment (after `.env` loading).
    pub fn apply_env(&mut self) {
        self.override_web_search(std::env::var(WEB_SEARCH_ENV).ok());
    }

    fn override_web_search(&mut self, url: Option<String>) {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            self.retrieval.web_search_url = Some(url.trim().to_string());
        }
    }
}

/// One document in a corpus file. The domain is derived from the URL.
#[derive(Debug, Clone, Deserialize)]
struct CorpusEntry {
    id: String,
    url: String,
    title: String,
    text: String,
    #[serde(default)]
    published: Option<DateTime<Utc>>,
}

/// Read a JSON array of documents.
pub fn load_corpus(path: &Path) -> anyhow::Result<Vec<Document>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read corpus '{}': {}", path.display(), e))?;
    let entries: Vec<CorpusEntry> = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse corpus '{}': {}", path.display(), e))?;

    Ok(entries
        .into_iter()
        .map(|entry| {
            let doc = Document::new(entry.id, entry.url, entry.title, entry.text);
            match entry.published {
                Some(published) => doc.with_published(published),
                None => doc,
            }
        })
        .collect())
}
