use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Category of risky content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyClass {
    /// Personal data: emails, phone numbers, SSNs, card numbers, IPs.
    Pii,
    /// Credentials and key material.
    Secret,
    /// Insults and abusive language above the configured ratio.
    Toxicity,
    /// Over-length quotations, links to disallowed domains, blocked keywords.
    License,
}

impl PolicyClass {
    /// Lowercase name, as used in config and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyClass::Pii => "pii",
            PolicyClass::Secret => "secret",
            PolicyClass::Toxicity => "toxicity",
            PolicyClass::License => "license",
        }
    }
}

impl std::fmt::Display for PolicyClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the gate does with content of one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    /// Pass the content through unchanged.
    Allow,
    /// Replace matching spans with `[REDACTED:<kind>]` markers.
    Redact,
    /// Reject the payload.
    Block,
}

/// Action for one class, with an optional advisory note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Action applied to the class.
    pub action: PolicyAction,
    /// Advisory note recorded when the rule fires.
    #[serde(default)]
    pub note: Option<String>,
}

impl PolicyRule {
    /// Rule without a note.
    pub fn new(action: PolicyAction) -> Self {
        Self { action, note: None }
    }

    /// Attach an advisory note.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Class → rule lookup. Classes missing from the table are allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PolicyTable(pub BTreeMap<PolicyClass, PolicyRule>);

impl Default for PolicyTable {
    fn default() -> Self {
        Self(BTreeMap::from([
            (
                PolicyClass::Pii,
                PolicyRule::new(PolicyAction::Redact).with_note("personal data redacted"),
            ),
            (
                PolicyClass::Secret,
                PolicyRule::new(PolicyAction::Redact).with_note("credentials redacted"),
            ),
            (
                PolicyClass::Toxicity,
                PolicyRule::new(PolicyAction::Block).with_note("toxic language"),
            ),
            (
                PolicyClass::License,
                PolicyRule::new(PolicyAction::Block).with_note("possible license violation"),
            ),
        ]))
    }
}

impl PolicyTable {
    /// Rule for `class`, `Allow` when absent.
    pub fn rule(&self, class: PolicyClass) -> PolicyRule {
        self.0
            .get(&class)
            .cloned()
            .unwrap_or_else(|| PolicyRule::new(PolicyAction::Allow))
    }

    /// Action for `class`.
    pub fn action(&self, class: PolicyClass) -> PolicyAction {
        self.rule(class).action
    }

    /// Resolve every class to its rule.
    pub fn decide(&self, classes: &BTreeSet<PolicyClass>) -> BTreeMap<PolicyClass, PolicyRule> {
        classes.iter().map(|&c| (c, self.rule(c))).collect()
    }

    /// Classes whose action is `action`, in class order.
    pub fn classes_with(&self, action: PolicyAction) -> Vec<PolicyClass> {
        self.0
            .iter()
            .filter(|(_, rule)| rule.action == action)
            .map(|(&class, _)| class)
            .collect()
    }
}

/// Allow/redact/block resolution for one payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    /// False when any class resolved to `Block`.
    pub allowed: bool,
    /// Classes whose spans are redacted.
    pub redact: Vec<PolicyClass>,
    /// Classes that resolved to `Block`.
    pub violations: Vec<PolicyClass>,
    /// Notes from every rule that fired.
    pub notes: Vec<String>,
}

impl PolicyDecision {
    /// Build a decision from resolved rules. Any `block` rule disallows.
    pub fn from_rules(rules: &BTreeMap<PolicyClass, PolicyRule>) -> Self {
        let mut decision = PolicyDecision {
            allowed: true,
            ..Default::default()
        };
        for (&class, rule) in rules.iter() {
            match rule.action {
                PolicyAction::Allow => {}
                PolicyAction::Redact => decision.redact.push(class),
                PolicyAction::Block => {
                    decision.allowed = false;
                    decision.violations.push(class);
                }
            }
            if let Some(note) = &rule.note {
                decision.notes.push(format!("{class}: {note}"));
            }
        }
        decision
    }
}
