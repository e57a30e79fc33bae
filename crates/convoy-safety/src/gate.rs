use crate::classifier::Classifier;
use crate::config::PolicyConfig;
use crate::patterns;
use crate::policy::{PolicyAction, PolicyClass, PolicyDecision, PolicyRule};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Classes the pattern detectors can redact textually.
const REDACTABLE: [PolicyClass; 2] = [PolicyClass::Pii, PolicyClass::Secret];

/// Classification, per-class decisions and in-place redaction of payloads.
#[derive(Debug, Clone)]
pub struct PolicyGate {
    config: PolicyConfig,
    classifier: Classifier,
}

impl PolicyGate {
    /// Create a gate and compile its classifier.
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            classifier: Classifier::new(&config),
            config,
        }
    }

    /// Tunables this gate was built with.
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Policy classes present in `payload`.
    pub fn classify(&self, payload: &Value) -> BTreeSet<PolicyClass> {
        self.classifier.classify(payload)
    }

    /// Rule for each class in `classes`.
    pub fn decide(&self, classes: &BTreeSet<PolicyClass>) -> BTreeMap<PolicyClass, PolicyRule> {
        self.config.table.decide(classes)
    }

    /// Classify and decide without modifying the payload.
    pub fn evaluate(&self, payload: &Value) -> PolicyDecision {
        PolicyDecision::from_rules(&self.decide(&self.classify(payload)))
    }

    /// Redact every string leaf and decide on what remains.
    ///
    /// Matches of classes whose action is `redact` are replaced with
    /// `[REDACTED:<kind>]`; object keys and non-string values are untouched.
    /// `redact` in the returned decision lists the classes found before
    /// redaction; `allowed` and `violations` reflect the sanitized payload.
    pub fn filter_output(&self, payload: &Value) -> (Value, PolicyDecision) {
        let before = self.classify(payload);
        let classes: Vec<PolicyClass> = REDACTABLE
            .into_iter()
            .filter(|c| self.config.table.action(*c) == PolicyAction::Redact)
            .collect();

        let mut redacted = 0usize;
        let sanitized = redact_value(payload, &classes, &mut redacted);
        if redacted > 0 {
            debug!(redacted, "Redacted sensitive spans from payload");
        }

        let after = self.classify(&sanitized);
        let remaining = PolicyDecision::from_rules(&self.decide(&after));
        let mut decision = PolicyDecision::from_rules(&self.decide(&before));
        decision.allowed = remaining.allowed;
        decision.violations = remaining.violations;
        (sanitized, decision)
    }
}

impl Default for PolicyGate {
    fn default() -> Self {
        Self::new(PolicyConfig::default())
    }
}

fn redact_value(value: &Value, classes: &[PolicyClass], count: &mut usize) -> Value {
    match value {
        Value::String(s) => {
            let (text, kinds) = patterns::redact(s, classes);
            *count += kinds.len();
            Value::String(text)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| redact_value(v, classes, count))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), redact_value(v, classes, count)))
                .collect(),
        ),
        other => other.clone(),
    }
}
