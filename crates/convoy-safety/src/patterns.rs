use crate::policy::PolicyClass;
use regex::Regex;
use std::sync::LazyLock;

/// A compiled detector for one kind of sensitive token.
pub struct Pattern {
    /// Redaction kind, as in `[REDACTED:<kind>]`.
    pub kind: &'static str,
    /// Policy class a match belongs to.
    pub class: PolicyClass,
    /// Compiled regex; `None` when it failed to compile.
    pub regex: &'static LazyLock<Option<Regex>>,
}

macro_rules! pattern {
    ($name:ident, $regex_str:expr) => {
        static $name: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new($regex_str).ok());
    };
}

// Secrets

pattern!(
    RE_PRIVATE_KEY,
    r"(?s)-----BEGIN [A-Z ]*PRIVATE KEY-----.*?-----END [A-Z ]*PRIVATE KEY-----"
);
pattern!(RE_AWS_KEY, r"\b(?:AKIA|ASIA)[0-9A-Z]{16}\b");
pattern!(
    RE_JWT,
    r"\beyJ[A-Za-z0-9_-]{8,}\.[A-Za-z0-9_-]{8,}\.[A-Za-z0-9_-]{8,}"
);
pattern!(RE_GITHUB_TOKEN, r"\bgh[pousr]_[A-Za-z0-9]{36,}\b");
pattern!(
    RE_API_KEY,
    r"\b(?:sk|pk|rk)[-_](?:live|test|proj|ant)?[-_]?[A-Za-z0-9_-]{20,}"
);
pattern!(
    RE_PASSWORD,
    r#"(?i)\b(?:password|passwd|pwd)\s*[:=]\s*[^\s"',;]+"#
);

// Personal data

pattern!(RE_EMAIL, r"[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}");
pattern!(RE_SSN, r"\b\d{3}-\d{2}-\d{4}\b");
pattern!(
    RE_CREDIT_CARD,
    r"\b(?:4\d{3}|5[1-5]\d{2}|3[47]\d{2}|6(?:011|5\d{2}))[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{3,4}\b"
);
pattern!(
    RE_PHONE,
    r"(?:\+\d{1,3}[-.\s])?\(?\b\d{3}\)?[-.\s]\d{3}[-.\s]\d{4}\b"
);
pattern!(
    RE_IPV4,
    r"\b(?:(?:25[0-5]|2[0-4]\d|[01]?\d\d?)\.){3}(?:25[0-5]|2[0-4]\d|[01]?\d\d?)\b"
);

static PATTERNS: [Pattern; 11] = [
    Pattern { kind: "private_key", class: PolicyClass::Secret, regex: &RE_PRIVATE_KEY },
    Pattern { kind: "aws_key", class: PolicyClass::Secret, regex: &RE_AWS_KEY },
    Pattern { kind: "jwt", class: PolicyClass::Secret, regex: &RE_JWT },
    Pattern { kind: "github_token", class: PolicyClass::Secret, regex: &RE_GITHUB_TOKEN },
    Pattern { kind: "api_key", class: PolicyClass::Secret, regex: &RE_API_KEY },
    Pattern { kind: "password", class: PolicyClass::Secret, regex: &RE_PASSWORD },
    Pattern { kind: "email", class: PolicyClass::Pii, regex: &RE_EMAIL },
    Pattern { kind: "ssn", class: PolicyClass::Pii, regex: &RE_SSN },
    Pattern { kind: "credit_card", class: PolicyClass::Pii, regex: &RE_CREDIT_CARD },
    Pattern { kind: "phone", class: PolicyClass::Pii, regex: &RE_PHONE },
    Pattern { kind: "ip_address", class: PolicyClass::Pii, regex: &RE_IPV4 },
];

/// Secret patterns come first: they are more specific than personal data.
pub fn all_patterns() -> &'static [Pattern] {
    &PATTERNS
}

/// One detector hit inside a text.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    /// Redaction kind of the detector that fired.
    pub kind: &'static str,
    /// Policy class the detector belongs to.
    pub class: PolicyClass,
    /// Byte offset where the match starts.
    pub start: usize,
    /// Byte offset one past the match end.
    pub end: usize,
}

impl PatternMatch {
    fn len(&self) -> usize {
        self.end - self.start
    }
}

/// Run every detector and return all matches, overlapping ones included,
/// sorted by start position.
pub fn scan(text: &str) -> Vec<PatternMatch> {
    detect(text).into_iter().map(|(_, m)| m).collect()
}

/// Matches paired with the index of the detector that produced them.
fn detect(text: &str) -> Vec<(usize, PatternMatch)> {
    let mut matches = Vec::new();
    for (index, pattern) in all_patterns().iter().enumerate() {
        let Some(re) = pattern.regex.as_ref() else {
            continue;
        };
        for m in re.find_iter(text) {
            matches.push((
                index,
                PatternMatch {
                    kind: pattern.kind,
                    class: pattern.class,
                    start: m.start(),
                    end: m.end(),
                },
            ));
        }
    }
    matches.sort_by(|(ia, a), (ib, b)| a.start.cmp(&b.start).then(b.end.cmp(&a.end)).then(ia.cmp(ib)));
    matches
}

/// A run of overlapping matches replaced as one span.
struct Span {
    start: usize,
    end: usize,
    /// Longest match in the run; the earlier detector wins ties.
    dominant: (usize, PatternMatch),
    kinds: Vec<&'static str>,
}

/// Merge overlapping matches into disjoint spans covering all of them.
fn merge_spans(matches: Vec<(usize, PatternMatch)>) -> Vec<Span> {
    let mut spans: Vec<Span> = Vec::new();
    for (index, m) in matches {
        if let Some(span) = spans.last_mut().filter(|span| m.start < span.end) {
            span.end = span.end.max(m.end);
            let (best_index, best) = &span.dominant;
            if m.len() > best.len() || (m.len() == best.len() && index < *best_index) {
                span.dominant = (index, m.clone());
            }
            if !span.kinds.contains(&m.kind) {
                span.kinds.push(m.kind);
            }
            continue;
        }
        spans.push(Span {
            start: m.start,
            end: m.end,
            kinds: vec![m.kind],
            dominant: (index, m),
        });
    }
    spans
}

/// Redaction marker for a kind.
pub fn marker(kind: &str) -> String {
    format!("[REDACTED:{kind}]")
}

/// Replace matches of the selected classes with typed markers.
///
/// Overlapping matches are replaced together: the union of their spans
/// becomes one marker named after the longest match. Returns the new text
/// and every kind that was covered, in text order.
pub fn redact(text: &str, classes: &[PolicyClass]) -> (String, Vec<&'static str>) {
    let selected: Vec<(usize, PatternMatch)> = detect(text)
        .into_iter()
        .filter(|(_, m)| classes.contains(&m.class))
        .collect();
    let spans = merge_spans(selected);

    let mut result = text.to_string();
    for span in spans.iter().rev() {
        result.replace_range(span.start..span.end, &marker(span.dominant.1.kind));
    }
    let kinds = spans.into_iter().flat_map(|span| span.kinds).collect();
    (result, kinds)
}
