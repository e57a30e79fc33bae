use crate::config::PolicyConfig;
use crate::patterns;
use crate::policy::PolicyClass;
use convoy_core::domain_of;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

static RE_LINK: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(?i)\bhttps?://[^\s"'<>()\[\]]+"#).ok());

/// Flatten a payload to the text the detectors look at: every string leaf,
/// one per line, in document order. Keys and non-string scalars are skipped.
pub fn payload_text(payload: &Value) -> String {
    let mut out = Vec::new();
    collect_strings(payload, &mut out);
    out.join("\n")
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

/// Independent detectors for the four policy classes.
#[derive(Debug, Clone)]
pub struct Classifier {
    toxicity_terms: HashSet<String>,
    toxicity_threshold: f64,
    max_quote_chars: usize,
    disallowed_link_domains: Vec<String>,
    blocked_keywords: Vec<String>,
}

impl Classifier {
    /// Build the detectors from the policy tunables.
    pub fn new(config: &PolicyConfig) -> Self {
        Self {
            toxicity_terms: config.toxicity_terms.iter().map(|t| t.to_lowercase()).collect(),
            toxicity_threshold: config.toxicity_threshold,
            max_quote_chars: config.max_quote_chars,
            disallowed_link_domains: config
                .disallowed_link_domains
                .iter()
                .map(|d| d.trim_start_matches('.').to_lowercase())
                .collect(),
            blocked_keywords: config.blocked_keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    /// Classes detected anywhere in the payload's text.
    pub fn classify(&self, payload: &Value) -> BTreeSet<PolicyClass> {
        self.classify_text(&payload_text(payload))
    }

    /// Classes detected in `text`.
    pub fn classify_text(&self, text: &str) -> BTreeSet<PolicyClass> {
        let mut classes: BTreeSet<PolicyClass> =
            patterns::scan(text).into_iter().map(|m| m.class).collect();
        if self.is_toxic(text) {
            classes.insert(PolicyClass::Toxicity);
        }
        if self.license_violation(text).is_some() {
            classes.insert(PolicyClass::License);
        }
        classes
    }

    /// Blocklisted-term density above the threshold.
    pub fn toxicity_density(&self, text: &str) -> f64 {
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();
        if words.is_empty() {
            return 0.0;
        }
        let flagged = words.iter().filter(|w| self.toxicity_terms.contains(*w)).count();
        flagged as f64 / words.len() as f64
    }

    fn is_toxic(&self, text: &str) -> bool {
        let density = self.toxicity_density(text);
        density > 0.0 && density > self.toxicity_threshold
    }

    /// First license heuristic that fires, as a short reason.
    pub fn license_violation(&self, text: &str) -> Option<String> {
        let quoted = longest_quotation(text);
        if quoted > self.max_quote_chars {
            return Some(format!(
                "quotation of {quoted} chars exceeds {}",
                self.max_quote_chars
            ));
        }

        if let Some(re) = RE_LINK.as_ref() {
            for link in re.find_iter(text) {
                let host = domain_of(link.as_str());
                if let Some(domain) = self
                    .disallowed_link_domains
                    .iter()
                    .find(|d| host == **d || host.ends_with(&format!(".{d}")))
                {
                    return Some(format!("link to disallowed domain {domain}"));
                }
            }
        }

        let lower = text.to_lowercase();
        self.blocked_keywords
            .iter()
            .find(|k| !k.is_empty() && lower.contains(k.as_str()))
            .map(|k| format!("blocked keyword '{k}'"))
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(&PolicyConfig::default())
    }
}

/// Length in chars of the longest quoted span: straight or curly double
/// quotes, or a run of consecutive `>` block-quote lines.
fn longest_quotation(text: &str) -> usize {
    let mut longest = 0;
    let mut open: Option<char> = None;
    let mut len = 0;
    for c in text.chars() {
        match open {
            None if c == '"' => open = Some('"'),
            None if c == '\u{201C}' => open = Some('\u{201D}'),
            None => {}
            Some(close) if c == close => {
                longest = longest.max(len);
                open = None;
                len = 0;
            }
            Some(_) => len += 1,
        }
    }

    let mut run = 0;
    for line in text.lines() {
        match line.trim_start().strip_prefix('>') {
            Some(quoted) => run += quoted.trim().chars().count(),
            None => run = 0,
        }
        longest = longest.max(run);
    }
    longest
}
