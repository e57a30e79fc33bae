use chrono::{DateTime, Utc};
use convoy_core::ToolRequest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// One unit of planned work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique id within the run.
    pub id: String,
    /// Declared role; replaced by the resolved capability name during routing.
    pub role: String,
    /// Short summary of the work.
    pub title: String,
    /// Longer instructions.
    #[serde(default)]
    pub description: String,
    /// Conditions under which the capability should stop.
    #[serde(default)]
    pub stop_conditions: Vec<String>,
    /// Tool call to run after dispatch.
    #[serde(default)]
    pub tool_request: Option<ToolRequest>,
    /// Tasks whose answers this task reads. Only affects parallel grouping.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Labels used by tag routing.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Task {
    /// Task with no description, dependencies or tags.
    pub fn new(id: impl Into<String>, role: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            title: title.into(),
            description: String::new(),
            stop_conditions: Vec::new(),
            tool_request: None,
            depends_on: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the tasks this one depends on.
    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.depends_on = deps;
        self
    }

    /// Set routing tags.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Attach a tool request.
    pub fn with_tool_request(mut self, request: ToolRequest) -> Self {
        self.tool_request = Some(request);
        self
    }

    /// Set stop conditions.
    pub fn with_stop_conditions(mut self, conditions: Vec<String>) -> Self {
        self.stop_conditions = conditions;
        self
    }

    /// Title and description, used for keyword routing and retrieval queries.
    pub fn text(&self) -> String {
        if self.description.is_empty() {
            self.title.clone()
        } else {
            format!("{} {}", self.title, self.description)
        }
    }

    /// Whether every dependency has been collected.
    pub fn is_ready(&self, collected: &HashSet<String>) -> bool {
        self.depends_on.iter().all(|dep| collected.contains(dep))
    }
}

/// How much risk the run accepts. Passed through to capabilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskPosture {
    /// Prefer safe, well-sourced answers.
    Conservative,
    /// Default posture.
    #[default]
    Balanced,
    /// Accept speculative answers.
    Aggressive,
}

/// State of the task-graph pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    /// Decompose the objective into tasks.
    Plan,
    /// Resolve the task at the cursor to a capability.
    Route,
    /// Dispatch the capability.
    Agent,
    /// Run the task's tool request.
    Tool,
    /// Fold the task's results into the run.
    Collect,
    /// Produce the final output.
    Synth,
    /// Terminal state.
    Done,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Plan => write!(f, "plan"),
            Step::Route => write!(f, "route"),
            Step::Agent => write!(f, "agent"),
            Step::Tool => write!(f, "tool"),
            Step::Collect => write!(f, "collect"),
            Step::Synth => write!(f, "synth"),
            Step::Done => write!(f, "done"),
        }
    }
}

/// Kind of trace event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceKind {
    /// A step began.
    Start,
    /// A step finished.
    End,
    /// One evaluator-scored dispatch attempt.
    Attempt,
}

/// A start/end/attempt marker for a pipeline step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// When the event was recorded.
    pub ts: DateTime<Utc>,
    /// Event kind.
    pub kind: TraceKind,
    /// Step the event belongs to.
    pub step: Step,
    /// Task the event belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Attempt number for `attempt` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    /// Evaluator score for `attempt` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Whether the attempt will be retried.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub will_retry: Option<bool>,
}

impl TraceEvent {
    /// Event stamped with the current time.
    pub fn new(kind: TraceKind, step: Step, task_id: Option<&str>) -> Self {
        Self {
            ts: Utc::now(),
            kind,
            step,
            task_id: task_id.map(str::to_string),
            attempt: None,
            score: None,
            will_retry: None,
        }
    }
}

/// What a capability sees when dispatched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskContext {
    /// Run objective.
    pub objective: String,
    /// Run constraints.
    pub constraints: Vec<String>,
    /// Run risk posture.
    pub risk: RiskPosture,
    /// Answers of tasks collected before this one, by task id.
    pub answers: BTreeMap<String, Value>,
    /// Retrieved snippets and citations, when retrieval is enabled.
    pub retrieval_context: Option<Value>,
    /// 0 on the first dispatch, incremented per retry or repair.
    pub attempt: u32,
    /// Why the previous output was rejected, when re-dispatching.
    pub feedback: Option<String>,
}

/// Result of an evaluator pass over a task's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// Score in `0.0..=1.0`.
    pub score: f64,
    /// Evaluator remarks.
    #[serde(default)]
    pub notes: Vec<String>,
}
