use crate::state::RunState;
use crate::types::TraceEvent;
use convoy_core::{Diagnostic, Incident, Severity};
use convoy_retrieval::SourceRef;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One task's outcome as seen by the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    /// Task id.
    pub id: String,
    /// Resolved role.
    pub role: String,
    /// Task title.
    pub title: String,
    /// Collected answer, `null` if the task never reached `collect`.
    pub answer: Value,
    /// Sources cited by the task's answer.
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    /// Task diagnostic.
    pub diagnostic: Diagnostic,
}

/// Serializable summary of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: Uuid,
    /// Objective the run was planned from.
    pub objective: String,
    /// Per-task outcomes in plan order.
    pub tasks: Vec<TaskReport>,
    /// Synthesized output, `None` if synthesis did not run.
    pub final_output: Option<Value>,
    /// Every incident recorded during the run.
    pub incidents: Vec<Incident>,
    /// Highest severity across task diagnostics.
    pub severity: Severity,
    /// Step trace events.
    pub trace: Vec<TraceEvent>,
    /// Tool-side provenance entries.
    pub tool_trace: Vec<Value>,
    /// Final cursor position.
    pub cursor: usize,
    /// Number of planned tasks.
    pub task_count: usize,
    /// Per-role metrics from the monitor.
    #[serde(default)]
    pub metrics: Value,
}

impl RunReport {
    /// Build a report from a run's state.
    pub fn from_state(state: &RunState, metrics: Value) -> Self {
        let tasks = state
            .tasks
            .iter()
            .map(|task| TaskReport {
                id: task.id.clone(),
                role: task.role.clone(),
                title: task.title.clone(),
                answer: state.answers.get(&task.id).cloned().unwrap_or(Value::Null),
                sources: state.sources.get(&task.id).cloned().unwrap_or_default(),
                diagnostic: state
                    .diagnostics
                    .get(&task.id)
                    .cloned()
                    .unwrap_or_else(|| Diagnostic::new(task.id.as_str())),
            })
            .collect();

        Self {
            run_id: state.run_id,
            objective: state.objective.clone(),
            tasks,
            final_output: state.final_output.clone(),
            incidents: state.incidents.clone(),
            severity: state.severity(),
            trace: state.trace.snapshot(),
            tool_trace: state.tool_trace.snapshot(),
            cursor: state.cursor,
            task_count: state.task_count(),
            metrics,
        }
    }

    /// Whether every task was collected and synthesis ran.
    pub fn is_complete(&self) -> bool {
        self.cursor == self.task_count && self.final_output.is_some()
    }

    /// Report as a JSON value.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
