use crate::document::{ContextBundle, Hit, SourceRef};
use std::collections::HashSet;

/// Characters per estimated token.
const CHARS_PER_TOKEN: usize = 4;

/// Rough token cost of a text: `max(chars / 4, 1)`.
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() / CHARS_PER_TOKEN).max(1)
}

/// Select hits in rank order while the running token estimate fits `token_budget`.
///
/// A hit longer than `per_doc_cap * 4` characters has its text cut to that
/// window, at the last sentence end inside it when there is one. Selection stops at the first hit that would overflow
/// the budget.
pub fn clip_to_budget(hits: Vec<Hit>, token_budget: usize, per_doc_cap: usize) -> ContextBundle {
    let mut kept = Vec::new();
    let mut total = 0usize;

    let max_chars = per_doc_cap.saturating_mul(CHARS_PER_TOKEN);
    for mut hit in hits {
        if hit.document.text.chars().count() > max_chars {
            hit.document.text = truncate_at_sentence(&hit.document.text, max_chars);
        }
        let cost = estimate_tokens(&hit.document.text);
        if total + cost > token_budget {
            break;
        }
        total += cost;
        kept.push(hit);
    }

    let sources = sources_for(&kept);
    ContextBundle {
        hits: kept,
        sources,
        tokens_est: total,
        token_budget,
    }
}

fn truncate_at_sentence(text: &str, max_chars: usize) -> String {
    let window: String = text.chars().take(max_chars).collect();
    let boundary = window
        .char_indices()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?' | '\n'))
        .map(|(i, c)| i + c.len_utf8())
        .last();
    match boundary {
        Some(end) if end > 0 => window[..end].trim_end().to_string(),
        _ => window,
    }
}

fn sources_for(hits: &[Hit]) -> Vec<SourceRef> {
    let mut seen = HashSet::new();
    hits.iter()
        .filter(|hit| seen.insert(hit.document.url.clone()))
        .map(|hit| SourceRef {
            marker: hit.document.citation().unwrap_or_default().to_string(),
            url: hit.document.url.clone(),
            title: hit.document.title.clone(),
            domain: hit.document.domain.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citations::bundle_citations;
    use crate::document::{Document, ScoreBreakdown};

    fn hit(url: &str, text: &str) -> Hit {
        Hit {
            document: Document::new(url, url, url, text),
            score: 1.0,
            rank: 1,
            breakdown: ScoreBreakdown::default(),
        }
    }

    #[test]
    fn test_estimate_tokens_floor() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens(&"a".repeat(40)), 10);
    }

    #[test]
    fn test_truncates_at_sentence_boundary() {
        let text = "First sentence here. Second sentence is much longer and keeps going on";
        let cut = truncate_at_sentence(text, 40);
        assert_eq!(cut, "First sentence here.");
        assert_eq!(truncate_at_sentence("no boundary at all", 5), "no bo");
    }

    #[test]
    fn test_budget_invariant() {
        let hits = vec![
            hit("https://a.org", &"a".repeat(400)),
            hit("https://b.org", &"b. ".repeat(200)),
            hit("https://c.org", &"c".repeat(80)),
        ];
        let (hits, _, _) = bundle_citations(hits);
        let bundle = clip_to_budget(hits, 60, 25);
        assert!(bundle.tokens_est <= 60);
        for kept in bundle.hits.iter() {
            assert!(kept.document.text.chars().count() <= 25 * 4);
        }
        assert_eq!(bundle.hits.len(), bundle.sources.len());
        assert_eq!(bundle.sources[0].marker, "S1");
    }

    #[test]
    fn test_text_just_over_cap_is_truncated() {
        for len in 101..=103 {
            let bundle = clip_to_budget(vec![hit("https://a.org", &"x".repeat(len))], 1000, 25);
            assert_eq!(bundle.hits.len(), 1);
            assert_eq!(bundle.hits[0].document.text.chars().count(), 100);
            assert_eq!(bundle.tokens_est, 25);
        }
    }

    #[test]
    fn test_stops_when_budget_exceeded() {
        let hits = vec![
            hit("https://a.org", &"a".repeat(40)),
            hit("https://b.org", &"b".repeat(40)),
            hit("https://c.org", &"c".repeat(4)),
        ];
        let bundle = clip_to_budget(hits, 15, 100);
        assert_eq!(bundle.hits.len(), 1);
        assert_eq!(bundle.tokens_est, 10);
    }

    #[test]
    fn test_zero_budget_is_empty() {
        let bundle = clip_to_budget(vec![hit("https://a.org", "short")], 0, 10);
        assert!(bundle.is_empty());
        assert_eq!(bundle.tokens_est, 0);
    }
}
