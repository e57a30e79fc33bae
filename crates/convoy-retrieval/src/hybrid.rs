use crate::document::{Document, Hit, QuerySpec, ScoreBreakdown, SCORES_KEY};
use crate::quality::QualityScorer;
use crate::retriever::Retriever;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Component name of the quality score in fusion weights.
pub const QUALITY_COMPONENT: &str = "quality";

/// Weight per fusion component. Components without a weight contribute nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FusionWeights(pub BTreeMap<String, f64>);

impl Default for FusionWeights {
    fn default() -> Self {
        Self(BTreeMap::from([
            ("lexical".to_string(), 0.45),
            ("dense".to_string(), 0.35),
            (QUALITY_COMPONENT.to_string(), 0.20),
        ]))
    }
}

impl FusionWeights {
    /// Weight of a component, 0 when unconfigured.
    pub fn get(&self, component: &str) -> f64 {
        self.0.get(component).copied().unwrap_or(0.0)
    }
}

/// Ranked hits plus the retrievers that contributed nothing because they failed.
#[derive(Debug, Clone, Default)]
pub struct FusionOutcome {
    /// Fused hits, best first, at most `top_k`.
    pub hits: Vec<Hit>,
    /// Retrievers that were disabled or failed.
    pub unavailable: Vec<String>,
}

struct Candidate {
    document: Document,
    raw: BTreeMap<String, f64>,
}

/// Fan out to every retriever, then fuse.
///
/// Candidates are keyed by URL; the first document seen for a URL wins while
/// each retriever's raw score is still recorded against it. Every component
/// (one per retriever plus `quality`) is min-max normalised over the whole
/// candidate set; when all values are equal the raw value is used as-is.
/// The fused score is the weighted sum, sorted descending, ranked from 1 and
/// truncated to `spec.top_k`.
pub async fn hybrid_search(
    spec: &QuerySpec,
    retrievers: &[Arc<dyn Retriever>],
    scorer: &QualityScorer,
    weights: &FusionWeights,
    now: DateTime<Utc>,
) -> FusionOutcome {
    let results = join_all(retrievers.iter().map(|r| r.search(spec))).await;

    let mut order: Vec<String> = Vec::new();
    let mut candidates: HashMap<String, Candidate> = HashMap::new();
    let mut components: Vec<String> = Vec::new();
    let mut unavailable = Vec::new();

    for (retriever, result) in retrievers.iter().zip(results) {
        let name = retriever.name().to_string();
        if !components.contains(&name) {
            components.push(name.clone());
        }
        let documents = match result {
            Ok(documents) => documents,
            Err(e) => {
                warn!(retriever = %name, error = %e, "Retriever unavailable, continuing without it");
                unavailable.push(name);
                continue;
            }
        };
        debug!(retriever = %name, count = documents.len(), "Retriever returned documents");

        for doc in documents {
            let raw = doc.raw_score().unwrap_or(0.0);
            let candidate = candidates.entry(doc.url.clone()).or_insert_with(|| {
                order.push(doc.url.clone());
                Candidate {
                    document: doc,
                    raw: BTreeMap::new(),
                }
            });
            let slot = candidate.raw.entry(name.clone()).or_insert(raw);
            *slot = slot.max(raw);
        }
    }

    let query = spec.text();
    components.push(QUALITY_COMPONENT.to_string());
    let mut ordered: Vec<Candidate> = order
        .iter()
        .filter_map(|url| candidates.remove(url))
        .map(|mut c| {
            let quality = scorer.score(&c.document, &query, now);
            c.raw.insert(QUALITY_COMPONENT.to_string(), quality);
            c
        })
        .collect();

    let mut normalized: Vec<BTreeMap<String, f64>> = vec![BTreeMap::new(); ordered.len()];
    for component in components.iter() {
        let values: Vec<f64> = ordered
            .iter()
            .map(|c| c.raw.get(component).copied().unwrap_or(0.0))
            .collect();
        for (slot, value) in normalized.iter_mut().zip(min_max(&values)) {
            slot.insert(component.clone(), value);
        }
    }

    let mut hits: Vec<Hit> = ordered
        .drain(..)
        .zip(normalized)
        .map(|(mut candidate, normalized)| {
            let score = normalized
                .iter()
                .map(|(component, value)| weights.get(component) * value)
                .sum();
            candidate.document.metadata.insert(
                SCORES_KEY.to_string(),
                serde_json::to_value(&candidate.raw).unwrap_or_default(),
            );
            Hit {
                document: candidate.document,
                score,
                rank: 0,
                breakdown: ScoreBreakdown {
                    raw: candidate.raw,
                    normalized,
                },
            }
        })
        .collect();

    // Stable: ties keep first-seen order.
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    for (i, hit) in hits.iter_mut().enumerate() {
        hit.rank = i + 1;
    }
    hits.truncate(spec.top_k);

    FusionOutcome { hits, unavailable }
}

/// Min-max normalisation with a denominator of 1 when all values are equal.
fn min_max(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    if range > 0.0 {
        values.iter().map(|v| (v - min) / range).collect()
    } else {
        values.to_vec()
    }
}
