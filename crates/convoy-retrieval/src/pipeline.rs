use crate::budget::clip_to_budget;
use crate::citations::bundle_citations;
use crate::config::RetrievalConfig;
use crate::document::{ContextBundle, Document, Hit, QuerySpec, ScoreBreakdown};
use crate::embedding::LocalEmbedding;
use crate::hybrid::{hybrid_search, FusionWeights};
use crate::quality::QualityScorer;
use crate::query::build_queries;
use crate::retriever::{
    DenseRetriever, DisabledRetriever, KnowledgeBaseRetriever, KnowledgeEntry, LexicalRetriever,
    Retriever,
};
use crate::store::{DocumentStore, ProvenanceStore};
use crate::web::{HttpSearchBackend, WebSearchRetriever};
use chrono::Utc;
use convoy_core::{ConvoyResult, FailureKind, Incident};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// URL prefix of the synthetic document used when no safe source survives.
pub const BEST_EFFORT_PREFIX: &str = "internal://best-effort/";

/// Times the candidate pool is doubled while blocked domains crowd it out.
const MAX_FETCH_ROUNDS: u32 = 4;

/// The task being enriched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRef {
    /// Task id, recorded in provenance and incidents.
    pub id: String,
    /// Title and description used to build queries.
    pub text: String,
}

impl TaskRef {
    /// Create a task reference.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Run-level inputs that shape a retrieval call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalPlan {
    /// Run objective, appended to the query source text.
    pub objective: String,
    /// Run constraints, appended after the objective.
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Whether an empty safe result falls back to a best-effort hit.
    #[serde(default)]
    pub evaluators_enabled: bool,
    /// Overrides the configured `top_k`.
    #[serde(default)]
    pub top_k: Option<usize>,
}

/// Token limits for one retrieval call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Budgets {
    /// Explicit run-level budget.
    #[serde(default)]
    pub token_budget: Option<usize>,
    /// Per-document cap overriding the configured one.
    #[serde(default)]
    pub per_doc_cap: Option<usize>,
}

/// Result of [`RetrievalPipeline::run_retrieval`].
#[derive(Debug, Clone, Default)]
pub struct RetrievalOutcome {
    /// Queries the retrievers were given.
    pub queries: Vec<String>,
    /// Cited, budget-clipped evidence.
    pub bundle: ContextBundle,
    /// Absorbed degradations: unavailable backends, filtered-out candidates.
    pub incidents: Vec<Incident>,
}

/// Query building, fusion, domain filtering, citations and budget clipping
/// for one task at a time.
pub struct RetrievalPipeline {
    config: RetrievalConfig,
    retrievers: Vec<Arc<dyn Retriever>>,
    scorer: QualityScorer,
    weights: FusionWeights,
    provenance: Arc<ProvenanceStore>,
}

impl RetrievalPipeline {
    /// Pipeline over an explicit retriever list.
    pub fn new(
        config: RetrievalConfig,
        retrievers: Vec<Arc<dyn Retriever>>,
        provenance: Arc<ProvenanceStore>,
    ) -> Self {
        Self {
            scorer: config.scorer(),
            weights: config.weights.clone(),
            config,
            retrievers,
            provenance,
        }
    }

    /// Build the retrievers named in `config.retrievers` over a shared store.
    ///
    /// Unknown names and a `web` entry without an endpoint are kept as
    /// disabled retrievers, so they surface as unavailable backends at query
    /// time instead of failing construction.
    pub fn from_config(
        config: RetrievalConfig,
        store: Arc<DocumentStore>,
        knowledge: Vec<KnowledgeEntry>,
        provenance: Arc<ProvenanceStore>,
    ) -> ConvoyResult<Self> {
        let mut retrievers: Vec<Arc<dyn Retriever>> = Vec::new();
        for name in config.retrievers.iter() {
            let retriever: Arc<dyn Retriever> = match name.to_lowercase().as_str() {
                "lexical" => Arc::new(LexicalRetriever::new(store.clone())),
                "dense" => Arc::new(DenseRetriever::new(
                    store.clone(),
                    Arc::new(LocalEmbedding::default()),
                )),
                "kb" => Arc::new(KnowledgeBaseRetriever::new(knowledge.clone())),
                "web" => match config.web_search_url.as_deref() {
                    Some(url) => Arc::new(WebSearchRetriever::new(Arc::new(
                        HttpSearchBackend::new(url)?,
                    ))),
                    None => Arc::new(WebSearchRetriever::disabled()),
                },
                other => {
                    warn!(retriever = %other, "Unknown retriever in config, disabling");
                    Arc::new(DisabledRetriever::new(other))
                }
            };
            retrievers.push(retriever);
        }
        Ok(Self::new(config, retrievers, provenance))
    }

    /// Configuration the pipeline was built with.
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Store recording which task pulled which source.
    pub fn provenance(&self) -> &Arc<ProvenanceStore> {
        &self.provenance
    }

    /// Retrieve, filter, cite and clip evidence for one task.
    ///
    /// `query`, when given, replaces the task text as the query source.
    /// The budget is `budgets.token_budget` when set, otherwise the
    /// per-document cap times the requested `top_k`. With a domain
    /// block-list the fused candidate pool is widened until `top_k` safe
    /// hits survive or the retrievers run dry.
    pub async fn run_retrieval(
        &self,
        role: &str,
        task: &TaskRef,
        query: Option<&str>,
        plan: &RetrievalPlan,
        budgets: &Budgets,
    ) -> RetrievalOutcome {
        let top_k = plan.top_k.unwrap_or(self.config.top_k);
        let per_doc_cap = budgets.per_doc_cap.unwrap_or(self.config.per_doc_cap);
        let token_budget = budgets
            .token_budget
            .or(self.config.token_budget)
            .unwrap_or(per_doc_cap.saturating_mul(top_k));

        let queries = build_queries(
            query.unwrap_or(&task.text),
            &plan.objective,
            &plan.constraints,
            self.config.max_queries,
            self.config.max_query_len,
        );
        let has_blocklist = !self.config.blocked_domains.is_empty();
        let mut fetch_k = if has_blocklist { top_k.saturating_mul(2) } else { top_k };
        let mut round = 1;
        let (fusion, mut hits) = loop {
            let spec = QuerySpec {
                queries: queries.clone(),
                top_k: fetch_k,
                role: Some(role.to_string()),
                task_id: Some(task.id.clone()),
            };
            let fusion =
                hybrid_search(&spec, &self.retrievers, &self.scorer, &self.weights, Utc::now()).await;
            let safe: Vec<Hit> = fusion
                .hits
                .iter()
                .filter(|hit| !self.scorer.is_blocked(&hit.document.url))
                .cloned()
                .collect();
            // Fewer fused hits than requested means the candidates are exhausted.
            let exhausted = fusion.hits.len() < fetch_k;
            if safe.len() >= top_k || exhausted || round >= MAX_FETCH_ROUNDS {
                break (fusion, safe);
            }
            debug!(
                task_id = %task.id,
                fetch_k,
                safe = safe.len(),
                "Blocked domains crowded out candidates, widening the pool"
            );
            fetch_k = fetch_k.saturating_mul(2);
            round += 1;
        };
        hits.truncate(top_k);

        let mut incidents: Vec<Incident> = fusion
            .unavailable
            .iter()
            .map(|name| {
                Incident::new(
                    FailureKind::RetrievalBackendUnavailable,
                    Some(task.id.as_str()),
                    format!("retriever '{name}' unavailable"),
                )
            })
            .collect();

        let candidates = fusion.hits.len();
        if hits.is_empty() {
            if candidates > 0 {
                warn!(task_id = %task.id, candidates, "All candidates came from blocked domains");
                incidents.push(Incident::new(
                    FailureKind::NoSafeHitsAvailable,
                    Some(task.id.as_str()),
                    format!("{candidates} candidates filtered by domain block-list"),
                ));
            }
            if plan.evaluators_enabled {
                hits.push(best_effort_hit(task));
            }
        }
        for (i, hit) in hits.iter_mut().enumerate() {
            hit.rank = i + 1;
        }

        let (hits, _, _) = bundle_citations(hits);
        let bundle = clip_to_budget(hits, token_budget, per_doc_cap);
        for hit in bundle.hits.iter() {
            self.provenance.record(&task.id, &hit.document);
        }

        info!(
            task_id = %task.id,
            role = %role,
            queries = queries.len(),
            hits = bundle.hits.len(),
            tokens_est = bundle.tokens_est,
            token_budget,
            "Retrieval complete"
        );

        RetrievalOutcome {
            queries,
            bundle,
            incidents,
        }
    }
}

fn best_effort_hit(task: &TaskRef) -> Hit {
    let document = Document::new(
        format!("best-effort:{}", task.id),
        format!("{BEST_EFFORT_PREFIX}{}", task.id),
        "No safe sources available",
        format!(
            "No retrieved source passed the domain policy. Proceed from the task description: {}",
            task.text
        ),
    );
    Hit {
        document,
        score: 0.0,
        rank: 1,
        breakdown: ScoreBreakdown::default(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn store() -> Arc<DocumentStore> {
        Arc::new(DocumentStore::from_documents(vec![
            Document::new("a", "https://data.gov/sensors", "Sensors", "Sensor deployment costs for field research."),
            Document::new("b", "https://spam.example/sensors", "Spam", "Cheap sensor deals sensor sensor."),
        ]))
    }

    fn pipeline(blocked: Vec<String>) -> RetrievalPipeline {
        let config = RetrievalConfig {
            blocked_domains: blocked,
            retrievers: vec!["lexical".into(), "dense".into()],
            ..RetrievalConfig::default()
        };
        RetrievalPipeline::from_config(config, store(), Vec::new(), Arc::new(ProvenanceStore::new()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_blocked_domains_are_dropped() {
        let p = pipeline(vec!["spam.example".into()]);
        let outcome = p
            .run_retrieval(
                "researcher",
                &TaskRef::new("t1", "sensor costs"),
                None,
                &RetrievalPlan::default(),
                &Budgets::default(),
            )
            .await;
        assert!(!outcome.bundle.is_empty());
        assert!(outcome
            .bundle
            .hits
            .iter()
            .all(|h| !h.document.url.contains("spam.example")));
        assert_eq!(outcome.bundle.sources[0].marker, "S1");
        assert_eq!(p.provenance().len(), outcome.bundle.hits.len());
    }

    #[tokio::test]
    async fn test_safe_hits_survive_higher_ranked_blocked_ones() {
        let store = Arc::new(DocumentStore::from_documents(vec![
            Document::new("s1", "https://spam.example/1", "Deals", "sensor sensor sensor deals"),
            Document::new("s2", "https://spam.example/2", "Deals", "sensor sensor sensor offers"),
            Document::new("s3", "https://ads.spam.example/3", "Deals", "sensor sensor sensor promo"),
            Document::new("s4", "https://spam.example/4", "Deals", "sensor sensor sensor bargain"),
            Document::new("a", "https://data.gov/notes", "Notes", "Field notes on one sensor site."),
        ]));
        let config = RetrievalConfig {
            blocked_domains: vec!["spam.example".into()],
            retrievers: vec!["lexical".into()],
            ..RetrievalConfig::default()
        };
        let p = RetrievalPipeline::from_config(config, store, Vec::new(), Arc::new(ProvenanceStore::new()))
            .unwrap();
        let plan = RetrievalPlan {
            top_k: Some(1),
            ..RetrievalPlan::default()
        };
        let outcome = p
            .run_retrieval("researcher", &TaskRef::new("t1", "sensor"), None, &plan, &Budgets::default())
            .await;

        assert_eq!(outcome.bundle.hits.len(), 1);
        assert_eq!(outcome.bundle.hits[0].document.url, "https://data.gov/notes");
        assert_eq!(outcome.bundle.hits[0].rank, 1);
        assert!(outcome
            .incidents
            .iter()
            .all(|i| i.kind != FailureKind::NoSafeHitsAvailable));
    }

    #[tokio::test]
    async fn test_best_effort_when_everything_blocked() {
        let p = pipeline(vec!["gov".into(), "spam.example".into()]);
        let plan = RetrievalPlan {
            evaluators_enabled: true,
            ..RetrievalPlan::default()
        };
        let outcome = p
            .run_retrieval("researcher", &TaskRef::new("t1", "sensor"), None, &plan, &Budgets::default())
            .await;
        assert_eq!(outcome.bundle.hits.len(), 1);
        assert!(outcome.bundle.hits[0].document.url.starts_with(BEST_EFFORT_PREFIX));
        assert!(outcome
            .incidents
            .iter()
            .any(|i| i.kind == FailureKind::NoSafeHitsAvailable));
    }

    #[tokio::test]
    async fn test_empty_bundle_without_evaluators() {
        let p = pipeline(vec!["gov".into(), "spam.example".into()]);
        let outcome = p
            .run_retrieval(
                "researcher",
                &TaskRef::new("t1", "sensor"),
                None,
                &RetrievalPlan::default(),
                &Budgets::default(),
            )
            .await;
        assert!(outcome.bundle.is_empty());
    }

    #[tokio::test]
    async fn test_explicit_budget_wins() {
        let p = pipeline(Vec::new());
        let outcome = p
            .run_retrieval(
                "researcher",
                &TaskRef::new("t1", "sensor"),
                Some("sensor research"),
                &RetrievalPlan::default(),
                &Budgets {
                    token_budget: Some(3),
                    per_doc_cap: None,
                },
            )
            .await;
        assert_eq!(outcome.bundle.token_budget, 3);
        assert!(outcome.bundle.tokens_est <= 3);
        assert_eq!(outcome.queries, vec!["sensor", "research"]);
    }

    #[tokio::test]
    async fn test_unknown_and_unconfigured_web_are_unavailable() {
        let config = RetrievalConfig {
            retrievers: vec!["lexical".into(), "web".into(), "vector-db".into()],
            ..RetrievalConfig::default()
        };
        let p = RetrievalPipeline::from_config(config, store(), Vec::new(), Arc::new(ProvenanceStore::new()))
            .unwrap();
        let outcome = p
            .run_retrieval("r", &TaskRef::new("t1", "sensor"), None, &RetrievalPlan::default(), &Budgets::default())
            .await;
        let unavailable = outcome
            .incidents
            .iter()
            .filter(|i| i.kind == FailureKind::RetrievalBackendUnavailable)
            .count();
        assert_eq!(unavailable, 2);
        assert!(!outcome.bundle.is_empty());
    }
}
