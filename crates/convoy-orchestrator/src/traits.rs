use crate::types::{Evaluation, Task, TaskContext};
use async_trait::async_trait;
use convoy_core::{AgentOutput, ConvoyResult};
use convoy_retrieval::ProvenanceStore;
use serde_json::Value;

/// A pluggable worker that produces an answer for a task.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Name the router resolves roles to.
    fn name(&self) -> &str;

    /// Produce an answer for `task`.
    async fn dispatch(&self, task: &Task, ctx: &TaskContext) -> ConvoyResult<AgentOutput>;
}

/// Scores a task's content for the retry decision.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Score `content`; higher is better, 1.0 at most.
    async fn evaluate(&self, content: &str, context: &Value) -> ConvoyResult<Evaluation>;
}

/// Executes named tools on behalf of a capability.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run tool `name` for `role` with `params`.
    async fn call_tool(&self, role: &str, name: &str, params: &Value) -> ConvoyResult<Value>;
}

/// Ordered record of side effects, polled around each tool call.
pub trait ProvenanceSink: Send + Sync {
    /// All records so far, oldest first.
    fn get_provenance(&self) -> Vec<Value>;
}

/// Retrieval provenance, one record per source in first-seen order.
impl ProvenanceSink for ProvenanceStore {
    fn get_provenance(&self) -> Vec<Value> {
        self.records()
            .into_iter()
            .filter_map(|record| serde_json::to_value(record).ok())
            .collect()
    }
}

/// Decomposes an objective into tasks.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Plan tasks for `objective`.
    async fn plan(&self, objective: &str, constraints: &[String]) -> ConvoyResult<Vec<Task>>;
}
