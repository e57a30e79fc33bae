use crate::bm25::tokenize;
use crate::document::{domain_of, Document};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

const REPUTATION_WEIGHT: f64 = 0.6;
const RECENCY_WEIGHT: f64 = 0.3;
const COVERAGE_WEIGHT: f64 = 0.05;
const LENGTH_WEIGHT: f64 = 0.05;

/// Recency used when a document has no publish date.
const UNDATED_RECENCY: f64 = 0.5;
/// Text length at which the length factor saturates.
const FULL_LENGTH_CHARS: f64 = 1500.0;

/// Rates documents by domain reputation, recency, query coverage and length.
///
/// ```text
/// quality = 0.6 * reputation + 0.3 * recency + 0.05 * coverage + 0.05 * length
/// ```
/// Every sub-term is clamped to `[0, 1]`. Blocked domains score 0.
#[derive(Debug, Clone)]
pub struct QualityScorer {
    reputation: HashMap<String, f64>,
    blocked: Vec<String>,
    default_reputation: f64,
}

impl QualityScorer {
    /// Create a scorer. Domain keys are lowercased and stripped of a leading dot.
    pub fn new(
        reputation: HashMap<String, f64>,
        blocked: Vec<String>,
        default_reputation: f64,
    ) -> Self {
        Self {
            reputation: reputation
                .into_iter()
                .map(|(k, v)| (k.trim_start_matches('.').to_lowercase(), v))
                .collect(),
            blocked: blocked
                .into_iter()
                .map(|d| d.trim_start_matches('.').to_lowercase())
                .collect(),
            default_reputation,
        }
    }

    /// Whether the URL's host is, or is a subdomain of, a blocked domain.
    pub fn is_blocked(&self, url: &str) -> bool {
        let host = domain_of(url);
        !host.is_empty() && self.blocked.iter().any(|b| domain_matches(&host, b))
    }

    /// Reputation of the most specific matching table entry.
    ///
    /// Entries match whole hosts or host suffixes, so `gov` covers `data.gov`.
    pub fn domain_reputation(&self, domain: &str) -> f64 {
        let domain = domain.to_lowercase();
        self.reputation
            .iter()
            .filter(|(key, _)| domain_matches(&domain, key))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, &weight)| weight)
            .unwrap_or(self.default_reputation)
            .clamp(0.0, 1.0)
    }

    /// Quality of `doc` for `query` at `now`, in `[0, 1]`. Blocked domains score 0.
    pub fn score(&self, doc: &Document, query: &str, now: DateTime<Utc>) -> f64 {
        if self.is_blocked(&doc.url) {
            return 0.0;
        }
        let domain = if doc.domain.is_empty() {
            domain_of(&doc.url)
        } else {
            doc.domain.clone()
        };

        REPUTATION_WEIGHT * self.domain_reputation(&domain)
            + RECENCY_WEIGHT * recency_factor(doc.published, now)
            + COVERAGE_WEIGHT * coverage_factor(&doc.text, query)
            + LENGTH_WEIGHT * length_factor(&doc.text)
    }
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self::new(HashMap::new(), Vec::new(), 0.5)
    }
}

fn domain_matches(host: &str, key: &str) -> bool {
    host == key
        || host
            .strip_suffix(key)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// `max(0, 1 - age_days / 365)`; future dates count as fresh.
pub fn recency_factor(published: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    match published {
        Some(date) => {
            let age_days = (now - date).num_seconds() as f64 / 86_400.0;
            (1.0 - age_days.max(0.0) / 365.0).clamp(0.0, 1.0)
        }
        None => UNDATED_RECENCY,
    }
}

/// Fraction of distinct query terms present in the text.
pub fn coverage_factor(text: &str, query: &str) -> f64 {
    let terms: HashSet<String> = tokenize(query).into_iter().collect();
    if terms.is_empty() {
        return 0.0;
    }
    let words: HashSet<String> = tokenize(text).into_iter().collect();
    let hits = terms.iter().filter(|t| words.contains(*t)).count();
    (hits as f64 / terms.len() as f64).clamp(0.0, 1.0)
}

/// `min(chars / 1500, 1)`.
pub fn length_factor(text: &str) -> f64 {
    (text.chars().count() as f64 / FULL_LENGTH_CHARS).clamp(0.0, 1.0)
}
