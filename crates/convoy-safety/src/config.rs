use crate::policy::PolicyTable;
use serde::{Deserialize, Serialize};

/// Safety gate tunables, usually the `[policy]` table of `convoy.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Class → action table.
    #[serde(default)]
    pub table: PolicyTable,
    /// Words counted toward the toxicity ratio.
    #[serde(default = "default_toxicity_terms")]
    pub toxicity_terms: Vec<String>,
    /// Fraction of words that must be blocklisted before text counts as toxic.
    #[serde(default = "default_toxicity_threshold")]
    pub toxicity_threshold: f64,
    /// Longest quotation allowed before it counts as a license risk.
    #[serde(default = "default_max_quote_chars")]
    pub max_quote_chars: usize,
    /// Link domains that count as a license risk, subdomains included.
    #[serde(default = "default_disallowed_link_domains")]
    pub disallowed_link_domains: Vec<String>,
    /// Phrases that count as a license risk wherever they appear.
    #[serde(default = "default_blocked_keywords")]
    pub blocked_keywords: Vec<String>,
    /// Regenerations allowed after the first rejected payload.
    #[serde(default = "default_repair_max_attempts")]
    pub repair_max_attempts: u32,
    /// Allow one extra regeneration through the evaluator path.
    #[serde(default = "default_true")]
    pub evaluator_retry: bool,
}

fn default_toxicity_terms() -> Vec<String> {
    [
        "idiot", "idiots", "stupid", "moron", "morons", "imbecile", "dumbass", "loser",
        "losers", "scum", "worthless", "pathetic", "retard", "shithead", "bastard",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_toxicity_threshold() -> f64 {
    0.05
}

fn default_max_quote_chars() -> usize {
    300
}

fn default_disallowed_link_domains() -> Vec<String> {
    vec![
        "libgen.is".into(),
        "libgen.rs".into(),
        "sci-hub.se".into(),
        "z-lib.org".into(),
    ]
}

fn default_blocked_keywords() -> Vec<String> {
    vec![
        "all rights reserved".into(),
        "do not distribute".into(),
        "proprietary and confidential".into(),
    ]
}

fn default_repair_max_attempts() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            table: PolicyTable::default(),
            toxicity_terms: default_toxicity_terms(),
            toxicity_threshold: default_toxicity_threshold(),
            max_quote_chars: default_max_quote_chars(),
            disallowed_link_domains: default_disallowed_link_domains(),
            blocked_keywords: default_blocked_keywords(),
            repair_max_attempts: default_repair_max_attempts(),
            evaluator_retry: default_true(),
        }
    }
}
