use std::collections::HashSet;

/// Derive a bounded, ordered, case-insensitively unique set of short queries.
///
/// The task text, objective and constraints are split on whitespace in that
/// order. Each token is cut to `max_len` characters; a token whose cut
/// lowercase form was already emitted is skipped. Stops at `max_queries`.
pub fn build_queries(
    task_text: &str,
    objective_text: &str,
    constraints: &[String],
    max_queries: usize,
    max_len: usize,
) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut queries = Vec::new();

    let sources = [task_text, objective_text]
        .into_iter()
        .chain(constraints.iter().map(String::as_str));

    for token in sources.flat_map(str::split_whitespace) {
        if queries.len() >= max_queries {
            break;
        }
        let cut: String = token.chars().take(max_len).collect();
        if cut.is_empty() {
            continue;
        }
        if seen.insert(cut.to_lowercase()) {
            queries.push(cut);
        }
    }

    queries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lowered(queries: &[String]) -> Vec<String> {
        queries.iter().map(|q| q.to_lowercase()).collect()
    }

    #[test]
    fn test_dedup_across_sources() {
        let queries = build_queries(
            "build a sensor sensor",
            "improve research",
            &["cost".to_string(), "cost".to_string()],
            8,
            32,
        );
        assert_eq!(
            queries,
            vec!["build", "a", "sensor", "improve", "research", "cost"]
        );
        let unique: HashSet<String> = lowered(&queries).into_iter().collect();
        assert_eq!(unique.len(), queries.len());
    }

    #[test]
    fn test_case_insensitive_keeps_first() {
        let queries = build_queries("Rust rust RUST tokio", "", &[], 10, 32);
        assert_eq!(queries, vec!["Rust", "tokio"]);
    }

    #[test]
    fn test_max_queries_bound() {
        let queries = build_queries("a b c d e f g", "h i", &[], 3, 32);
        assert_eq!(queries, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_truncation_and_collision() {
        let queries = build_queries("observability observation", "", &[], 10, 6);
        // Both cut to "observ"; only the first survives.
        assert_eq!(queries, vec!["observ"]);
    }

    #[test]
    fn test_deterministic() {
        let constraints = vec!["low cost".to_string()];
        let a = build_queries("map the field", "survey sensors", &constraints, 5, 12);
        let b = build_queries("map the field", "survey sensors", &constraints, 5, 12);
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(build_queries("", "   ", &[], 5, 10).is_empty());
        assert!(build_queries("word", "", &[], 5, 0).is_empty());
    }
}
