use convoy_core::Backoff;
use serde::{Deserialize, Serialize};

/// Tunables for the task-graph pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Score task outputs and retry low scorers.
    #[serde(default)]
    pub evaluators_enabled: bool,
    /// Minimum evaluator score accepted without a retry.
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,
    /// Retries after the first dispatch when the score stays below threshold.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay between evaluator retries.
    #[serde(default)]
    pub backoff: Backoff,
    /// Tasks dispatched at once. 1 keeps the loop strictly sequential.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Attach a retrieval context to each dispatch when a pipeline is configured.
    #[serde(default = "default_true")]
    pub retrieval_enabled: bool,
    /// Tool requests with this name are applied elsewhere and never executed here.
    #[serde(default = "default_patch_tool")]
    pub patch_tool: String,
    /// Role whose capability, when registered, performs synthesis.
    #[serde(default = "default_synth_role")]
    pub synth_role: String,
    /// Token budget override for retrieval context.
    #[serde(default)]
    pub token_budget: Option<usize>,
    /// Per-document token cap override for retrieval context.
    #[serde(default)]
    pub per_doc_cap: Option<usize>,
}

fn default_score_threshold() -> f64 {
    0.7
}

fn default_max_retries() -> u32 {
    2
}

fn default_max_concurrency() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_patch_tool() -> String {
    "apply_patch".into()
}

fn default_synth_role() -> String {
    "synth".into()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            evaluators_enabled: false,
            score_threshold: default_score_threshold(),
            max_retries: default_max_retries(),
            backoff: Backoff::default(),
            max_concurrency: default_max_concurrency(),
            retrieval_enabled: true,
            patch_tool: default_patch_tool(),
            synth_role: default_synth_role(),
            token_budget: None,
            per_doc_cap: None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert!(!config.evaluators_enabled);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.max_concurrency, 1);
        assert_eq!(config.patch_tool, "apply_patch");
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: OrchestratorConfig = serde_json::from_str(
            r#"{"evaluators_enabled": true, "backoff": {"base_ms": 10}, "max_concurrency": 4}"#,
        )
        .unwrap();
        assert!(config.evaluators_enabled);
        assert_eq!(config.backoff.base_ms, 10);
        assert_eq!(config.backoff.max_ms, 30_000);
        assert_eq!(config.max_concurrency, 4);
        assert!((config.score_threshold - 0.7).abs() < f64::EPSILON);
        assert!(config.retrieval_enabled);
    }
}
