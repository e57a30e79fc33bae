use crate::types::Task;
use convoy_retrieval::SourceRef;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};

/// Readable text of a stored answer.
///
/// `content` when present, the error marker for failed tasks, otherwise the
/// compact JSON.
pub fn answer_text(answer: &Value) -> String {
    if let Some(content) = answer.get("content").and_then(Value::as_str) {
        return content.to_string();
    }
    if let Some(error) = answer.get("error") {
        let error = error.as_str().map_or_else(|| error.to_string(), str::to_string);
        return format!("error: {error}");
    }
    match answer {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Deterministic synthesis: one section per task in plan order.
///
/// Sources are merged across tasks, first occurrence of each URL kept.
pub fn merge_answers(
    objective: &str,
    tasks: &[Task],
    answers: &BTreeMap<String, Value>,
    sources: &BTreeMap<String, Vec<SourceRef>>,
) -> Value {
    let mut sections = Vec::new();
    let mut content = Vec::new();
    for task in tasks {
        let Some(answer) = answers.get(&task.id) else {
            continue;
        };
        let text = answer_text(answer);
        content.push(format!("## {}\n\n{text}", task.title));
        sections.push(json!({
            "task_id": task.id,
            "title": task.title,
            "role": task.role,
            "content": text,
        }));
    }

    let mut seen = HashSet::new();
    let merged_sources: Vec<&SourceRef> = tasks
        .iter()
        .filter_map(|task| sources.get(&task.id))
        .flatten()
        .filter(|source| seen.insert(source.url.clone()))
        .collect();

    json!({
        "objective": objective,
        "sections": sections,
        "sources": merged_sources,
        "content": content.join("\n\n"),
    })
}
