use crate::routing::Routed;
use crate::trace::{AppendLog, TraceLog};
use crate::types::{RiskPosture, Step, Task, TaskContext};
use convoy_core::{Diagnostic, FailureKind, Incident, Severity, ToolRequest};
use convoy_retrieval::SourceRef;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

/// Everything a run accumulates. The cursor alone defines progress.
#[derive(Debug, Clone)]
pub struct RunState {
    /// Run identifier.
    pub run_id: Uuid,
    /// Objective being planned.
    pub objective: String,
    /// Constraints passed to planning and retrieval.
    pub constraints: Vec<String>,
    /// Risk posture passed to capabilities.
    pub risk: RiskPosture,
    /// Planned tasks in execution order.
    pub tasks: Vec<Task>,
    /// Index of the next task to route. Only `collect` moves it, by one.
    pub cursor: usize,
    /// Current pipeline step.
    pub step: Step,
    /// Collected answers by task id.
    pub answers: BTreeMap<String, Value>,
    /// Step trace.
    pub trace: TraceLog,
    /// Tool-side provenance deltas, one entry per record.
    pub tool_trace: AppendLog<Value>,
    /// Cited retrieval sources by task id.
    pub sources: BTreeMap<String, Vec<SourceRef>>,
    /// Incidents from every collected task.
    pub incidents: Vec<Incident>,
    /// Diagnostics by task id.
    pub diagnostics: BTreeMap<String, Diagnostic>,
    /// Synthesized output.
    pub final_output: Option<Value>,
    /// Work for the task at the cursor, between `route` and `collect`.
    pub(crate) pending: Option<TaskWork>,
    /// Finished work for tasks dispatched ahead of the cursor.
    pub(crate) prepared: HashMap<String, TaskWork>,
}

impl RunState {
    /// Fresh run at the `plan` step.
    pub fn new(objective: impl Into<String>, constraints: Vec<String>, risk: RiskPosture) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            objective: objective.into(),
            constraints,
            risk,
            tasks: Vec::new(),
            cursor: 0,
            step: Step::Plan,
            answers: BTreeMap::new(),
            trace: TraceLog::new(),
            tool_trace: AppendLog::new(),
            sources: BTreeMap::new(),
            incidents: Vec::new(),
            diagnostics: BTreeMap::new(),
            final_output: None,
            pending: None,
            prepared: HashMap::new(),
        }
    }

    /// Start from an already planned task list.
    pub fn with_tasks(mut self, tasks: Vec<Task>) -> Self {
        self.tasks = tasks;
        self.step = Step::Route;
        self
    }

    /// Whether the run reached `done`.
    pub fn is_done(&self) -> bool {
        self.step == Step::Done
    }

    /// Number of planned tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Task at the cursor.
    pub fn current_task(&self) -> Option<&Task> {
        self.tasks.get(self.cursor)
    }

    /// Ids of collected tasks.
    pub fn collected(&self) -> HashSet<String> {
        self.answers.keys().cloned().collect()
    }

    /// Highest diagnostic severity across collected tasks.
    pub fn severity(&self) -> Severity {
        self.diagnostics
            .values()
            .fold(Severity::Info, |acc, d| acc.escalate(d.severity))
    }

    /// Dispatch context for the next task: run inputs plus collected answers.
    pub fn context(&self) -> TaskContext {
        TaskContext {
            objective: self.objective.clone(),
            constraints: self.constraints.clone(),
            risk: self.risk,
            answers: self.answers.clone(),
            ..TaskContext::default()
        }
    }
}

/// One task's results before they are collected into the run.
#[derive(Debug, Clone)]
pub(crate) struct TaskWork {
    pub task_id: String,
    pub role: String,
    pub routed: Option<Routed>,
    pub answer: Map<String, Value>,
    pub tool_request: Option<ToolRequest>,
    pub sources: Vec<SourceRef>,
    pub incidents: Vec<Incident>,
    pub diagnostic: Diagnostic,
}

impl TaskWork {
    pub fn new(task_id: &str, routed: Routed) -> Self {
        Self {
            task_id: task_id.to_string(),
            role: routed.role.clone(),
            routed: Some(routed),
            answer: Map::new(),
            tool_request: None,
            sources: Vec::new(),
            incidents: Vec::new(),
            diagnostic: Diagnostic::new(task_id),
        }
    }

    /// Work for a task whose processing did not complete.
    pub fn failed(task: &Task, message: &str) -> Self {
        let mut answer = Map::new();
        answer.insert("error".into(), json!(message));
        let mut diagnostic = Diagnostic::new(&task.id);
        diagnostic.push(Severity::Fail, message);
        Self {
            task_id: task.id.clone(),
            role: task.role.clone(),
            routed: None,
            answer,
            tool_request: None,
            sources: Vec::new(),
            incidents: Vec::new(),
            diagnostic,
        }
    }

    /// Record an incident and fold it into the diagnostic.
    pub fn incident(&mut self, kind: FailureKind, message: impl Into<String>) {
        let message = message.into();
        self.diagnostic
            .push(kind.severity(), format!("{}: {message}", kind.code()));
        self.incidents
            .push(Incident::new(kind, Some(self.task_id.as_str()), message));
    }

    pub fn absorb(&mut self, incident: Incident) {
        self.diagnostic.push(
            incident.kind.severity(),
            format!("{}: {}", incident.kind.code(), incident.message),
        );
        self.incidents.push(incident);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_starts_at_plan() {
        let state = RunState::new("ship it", vec![], RiskPosture::default());
        assert_eq!(state.step, Step::Plan);
        assert_eq!(state.cursor, 0);
        assert!(state.current_task().is_none());

        let state = state.with_tasks(vec![Task::new("t1", "writer", "Draft")]);
        assert_eq!(state.step, Step::Route);
        assert_eq!(state.task_count(), 1);
    }

    #[test]
    fn test_context_carries_collected_answers() {
        let mut state = RunState::new("objective", vec!["cheap".into()], RiskPosture::Conservative);
        state.answers.insert("t1".into(), json!({"content": "done"}));
        let ctx = state.context();
        assert_eq!(ctx.answers["t1"]["content"], "done");
        assert_eq!(ctx.risk, RiskPosture::Conservative);
        assert_eq!(ctx.attempt, 0);
        assert!(state.collected().contains("t1"));
    }

    #[test]
    fn test_severity_is_max_over_tasks() {
        let mut state = RunState::new("o", vec![], RiskPosture::default());
        let mut warn = Diagnostic::new("t1");
        warn.push(Severity::Warn, "slow");
        state.diagnostics.insert("t1".into(), warn);
        state.diagnostics.insert("t2".into(), Diagnostic::new("t2"));
        assert_eq!(state.severity(), Severity::Warn);
    }

    #[test]
    fn test_incident_updates_diagnostic() {
        let mut work = TaskWork::failed(&Task::new("t1", "writer", "Draft"), "worker crashed");
        assert_eq!(work.diagnostic.severity, Severity::Fail);
        work.incident(FailureKind::ToolInvocationError, "timeout");
        assert_eq!(work.incidents.len(), 1);
        assert_eq!(work.incidents[0].task_id.as_deref(), Some("t1"));
        assert!(work.diagnostic.messages[1].starts_with("TOOL_INVOCATION_ERROR"));
    }
}
