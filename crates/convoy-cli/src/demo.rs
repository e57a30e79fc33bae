//! Built-in capabilities for `convoy run`.
//!
//! They produce deterministic text from their inputs so a pipeline can be
//! exercised end to end without a text-generation backend.

use async_trait::async_trait;
use convoy_core::{AgentOutput, ConvoyResult, StructuredAnswer};
use convoy_orchestrator::{Capability, Router, Task, TaskContext};
use serde_json::{json, Value};
use std::sync::Arc;

/// Splits the objective into a research task and a dependent writing task.
pub struct DemoPlanner;

#[async_trait]
impl Capability for DemoPlanner {
    fn name(&self) -> &str {
        "planner"
    }

    async fn dispatch(&self, _task: &Task, ctx: &TaskContext) -> ConvoyResult<AgentOutput> {
        Ok(AgentOutput::from_value(json!({
            "tasks": [
                {
                    "id": "research",
                    "role": "researcher",
                    "title": format!("Research: {}", ctx.objective),
                    "description": ctx.constraints.join(" "),
                },
                {
                    "id": "draft",
                    "role": "writer",
                    "title": format!("Draft: {}", ctx.objective),
                    "depends_on": ["research"],
                }
            ]
        })))
    }
}

/// Lists the retrieved snippets with their citation markers.
pub struct DemoResearcher;

#[async_trait]
impl Capability for DemoResearcher {
    fn name(&self) -> &str {
        "researcher"
    }

    async fn dispatch(&self, task: &Task, ctx: &TaskContext) -> ConvoyResult<AgentOutput> {
        let snippets = ctx
            .retrieval_context
            .as_ref()
            .and_then(|c| c.get("snippets"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        if snippets.is_empty() {
            return Ok(AgentOutput::RawText(format!(
                "No evidence found for '{}'.",
                task.title
            )));
        }

        let lines: Vec<String> = snippets
            .iter()
            .map(|s| {
                format!(
                    "[{}] {}",
                    s["marker"].as_str().unwrap_or("?"),
                    s["title"].as_str().unwrap_or_default()
                )
            })
            .collect();
        Ok(AgentOutput::RawText(lines.join("\n")))
    }
}

/// Summarises the answers collected so far.
pub struct DemoWriter;

#[async_trait]
impl Capability for DemoWriter {
    fn name(&self) -> &str {
        "writer"
    }

    async fn dispatch(&self, task: &Task, ctx: &TaskContext) -> ConvoyResult<AgentOutput> {
        let evidence: Vec<&str> = ctx
            .answers
            .values()
            .filter_map(|answer| answer.get("content").and_then(Value::as_str))
            .collect();
        let mut content = format!("{}\n\nObjective: {}", task.title, ctx.objective);
        if !ctx.constraints.is_empty() {
            content.push_str(&format!("\nConstraints: {}", ctx.constraints.join("; ")));
        }
        if !evidence.is_empty() {
            content.push_str("\n\nEvidence:\n");
            content.push_str(&evidence.join("\n"));
        }
        Ok(AgentOutput::Structured(StructuredAnswer {
            content: Some(content),
            ..Default::default()
        }))
    }
}

/// Router over the demo capabilities. Unknown roles fall back to a generic capability.
pub fn demo_router() -> Router {
    Router::new()
        .register(Arc::new(DemoResearcher))
        .register(Arc::new(DemoWriter))
        .alias("analyst", "researcher")
        .keywords("researcher", &["research", "survey", "investigate"])
        .keywords("writer", &["draft", "write", "summarize"])
}
