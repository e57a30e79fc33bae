use crate::traits::{Capability, Planner};
use crate::types::{RiskPosture, Task, TaskContext};
use async_trait::async_trait;
use convoy_core::{AgentOutput, ConvoyError, ConvoyResult};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Role given to tasks that name none.
pub const DEFAULT_ROLE: &str = "generic";

/// Returns a fixed task list regardless of the objective.
pub struct StaticPlanner {
    tasks: Vec<Task>,
}

impl StaticPlanner {
    /// Planner that always returns `tasks`.
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }
}

#[async_trait]
impl Planner for StaticPlanner {
    async fn plan(&self, _objective: &str, _constraints: &[String]) -> ConvoyResult<Vec<Task>> {
        Ok(normalize_tasks(self.tasks.clone()))
    }
}

/// Asks a planning capability for `{"tasks": [...]}` and parses the answer.
///
/// A bare JSON array in the answer's content is accepted too. Anything
/// else yields a single task built from the objective.
pub struct CapabilityPlanner {
    capability: Arc<dyn Capability>,
    risk: RiskPosture,
}

impl CapabilityPlanner {
    /// Plan through `capability`.
    pub fn new(capability: Arc<dyn Capability>) -> Self {
        Self {
            capability,
            risk: RiskPosture::default(),
        }
    }

    /// Risk posture passed to the planning capability.
    pub fn with_risk(mut self, risk: RiskPosture) -> Self {
        self.risk = risk;
        self
    }
}

#[async_trait]
impl Planner for CapabilityPlanner {
    async fn plan(&self, objective: &str, constraints: &[String]) -> ConvoyResult<Vec<Task>> {
        let request = Task::new("plan", self.capability.name(), "Plan the objective")
            .with_description(objective);
        let ctx = TaskContext {
            objective: objective.to_string(),
            constraints: constraints.to_vec(),
            risk: self.risk,
            ..TaskContext::default()
        };
        let output = self.capability.dispatch(&request, &ctx).await?;

        match parse_tasks(&output) {
            Some(tasks) if !tasks.is_empty() => {
                info!(tasks = tasks.len(), "Planner: parsed task list");
                Ok(normalize_tasks(tasks))
            }
            _ => {
                warn!("Planner: output was not a task list, using a single task");
                Ok(vec![fallback_task(objective)])
            }
        }
    }
}

/// One task covering the whole objective.
pub fn fallback_task(objective: &str) -> Task {
    Task::new("t1", DEFAULT_ROLE, objective)
}

fn parse_tasks(output: &AgentOutput) -> Option<Vec<Task>> {
    let payload = output.to_payload();
    let list = match payload.get("tasks") {
        Some(Value::Array(items)) => items.clone(),
        _ => {
            let content = output.content()?;
            match serde_json::from_str::<Value>(content.trim()) {
                Ok(Value::Array(items)) => items,
                Ok(Value::Object(map)) => match map.get("tasks") {
                    Some(Value::Array(items)) => items.clone(),
                    _ => return None,
                },
                _ => return None,
            }
        }
    };
    Some(list.iter().enumerate().filter_map(|(i, item)| task_from_value(i, item)).collect())
}

/// Lenient task parsing: only a title (or description) is required.
fn task_from_value(index: usize, item: &Value) -> Option<Task> {
    if let Value::String(title) = item {
        return Some(Task::new(format!("t{}", index + 1), DEFAULT_ROLE, title.as_str()));
    }
    let map = item.as_object()?;
    let text = |key: &str| map.get(key).and_then(Value::as_str).map(str::to_string);
    let title = text("title").or_else(|| text("description"))?;

    let mut value = item.clone();
    if let Some(obj) = value.as_object_mut() {
        obj.entry("id")
            .or_insert_with(|| Value::from(format!("t{}", index + 1)));
        obj.entry("role").or_insert_with(|| Value::from(DEFAULT_ROLE));
        obj.insert("title".into(), Value::from(title));
    }
    match serde_json::from_value::<Task>(value) {
        Ok(task) => Some(task),
        Err(e) => {
            warn!(index, error = %e, "Planner: skipping malformed task");
            None
        }
    }
}

/// Fill empty roles and make task ids unique, keeping order.
pub fn normalize_tasks(tasks: Vec<Task>) -> Vec<Task> {
    let mut seen = HashSet::new();
    tasks
        .into_iter()
        .enumerate()
        .map(|(i, mut task)| {
            if task.role.trim().is_empty() {
                task.role = DEFAULT_ROLE.into();
            }
            if task.id.trim().is_empty() {
                task.id = format!("t{}", i + 1);
            }
            let base = task.id.clone();
            let mut suffix = 2;
            while !seen.insert(task.id.clone()) {
                task.id = format!("{base}-{suffix}");
                suffix += 1;
            }
            task
        })
        .collect()
}

/// Validate that a plan is usable.
pub fn validate_plan(tasks: &[Task]) -> ConvoyResult<()> {
    if tasks.is_empty() {
        return Err(ConvoyError::Planning("plan contains no tasks".into()));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use convoy_core::StructuredAnswer;

    struct Scripted(AgentOutput);

    #[async_trait]
    impl Capability for Scripted {
        fn name(&self) -> &str {
            "planner"
        }

        async fn dispatch(&self, _task: &Task, _ctx: &TaskContext) -> ConvoyResult<AgentOutput> {
            Ok(self.0.clone())
        }
    }

    fn planner(output: AgentOutput) -> CapabilityPlanner {
        CapabilityPlanner::new(Arc::new(Scripted(output)))
    }

    #[tokio::test]
    async fn test_parses_structured_task_list() {
        let output = AgentOutput::from_value(serde_json::json!({
            "tasks": [
                {"id": "a", "role": "researcher", "title": "Survey"},
                {"title": "Write up", "depends_on": ["a"]}
            ]
        }));
        let tasks = planner(output).plan("objective", &[]).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].role, "researcher");
        assert_eq!(tasks[1].id, "t2");
        assert_eq!(tasks[1].role, DEFAULT_ROLE);
        assert_eq!(tasks[1].depends_on, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_parses_array_in_content() {
        let output = AgentOutput::Structured(StructuredAnswer {
            content: Some(r#"["Collect data", {"title": "Analyse", "role": "analyst"}]"#.into()),
            ..Default::default()
        });
        let tasks = planner(output).plan("objective", &[]).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].title, "Collect data");
        assert_eq!(tasks[1].role, "analyst");
    }

    #[tokio::test]
    async fn test_prose_falls_back_to_single_task() {
        let output = AgentOutput::RawText("I would first look around.".into());
        let tasks = planner(output).plan("Build a sensor", &[]).await.unwrap();
        assert_eq!(tasks, vec![fallback_task("Build a sensor")]);
    }

    #[test]
    fn test_normalize_makes_ids_unique() {
        let tasks = normalize_tasks(vec![
            Task::new("x", "", "A"),
            Task::new("x", "writer", "B"),
            Task::new("", "writer", "C"),
        ]);
        let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "x-2", "t3"]);
        assert_eq!(tasks[0].role, DEFAULT_ROLE);
    }

    #[tokio::test]
    async fn test_static_planner() {
        let planner = StaticPlanner::new(vec![Task::new("t1", "writer", "Draft")]);
        let tasks = planner.plan("anything", &[]).await.unwrap();
        assert!(validate_plan(&tasks).is_ok());
        assert!(validate_plan(&[]).is_err());
    }
}
