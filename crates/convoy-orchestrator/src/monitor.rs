use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Status of a role's worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// No task in flight.
    #[default]
    Idle,
    /// At least one task in flight.
    Working,
    /// The last dispatch failed.
    Error,
}

/// Counters accumulated per role over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMetrics {
    /// Capability dispatches, retries included.
    pub dispatches: u32,
    /// Evaluator retries.
    pub retries: u32,
    /// Failed dispatches.
    pub errors: u32,
    /// Tool calls made on the role's behalf.
    pub tool_calls: u32,
    /// Outputs rejected by the safety gate.
    pub safety_blocks: u32,
    /// Total dispatch time.
    pub duration_ms: u64,
}

/// Live state of one role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleState {
    /// Role name.
    pub role: String,
    /// Tasks currently being worked on by this role.
    pub current_tasks: Vec<String>,
    /// Current worker status.
    pub status: WorkerStatus,
    /// Counters for this role.
    pub metrics: RoleMetrics,
}

impl RoleState {
    fn new(role: &str) -> Self {
        Self {
            role: role.to_string(),
            current_tasks: Vec::new(),
            status: WorkerStatus::Idle,
            metrics: RoleMetrics::default(),
        }
    }
}

/// Tracks state and metrics for every role seen during a run.
///
/// Entries are created on first use, so roles resolved through the generic
/// fallback show up too.
#[derive(Debug, Clone, Default)]
pub struct AgentMonitor {
    states: Arc<RwLock<BTreeMap<String, RoleState>>>,
}

impl AgentMonitor {
    /// Create an empty monitor.
    pub fn new() -> Self {
        Self::default()
    }

    async fn update(&self, role: &str, f: impl FnOnce(&mut RoleState)) {
        let mut states = self.states.write().await;
        let state = states
            .entry(role.to_string())
            .or_insert_with(|| RoleState::new(role));
        f(state);
    }

    /// Mark a role as working on a task and count the dispatch.
    pub async fn start_task(&self, role: &str, task_id: &str) {
        self.update(role, |state| {
            state.current_tasks.push(task_id.to_string());
            state.status = WorkerStatus::Working;
            state.metrics.dispatches += 1;
        })
        .await;
    }

    /// Mark a task finished. The role goes idle once nothing else is running.
    pub async fn finish_task(&self, role: &str, task_id: &str) {
        self.update(role, |state| {
            state.current_tasks.retain(|t| t != task_id);
            if state.current_tasks.is_empty() && state.status == WorkerStatus::Working {
                state.status = WorkerStatus::Idle;
            }
        })
        .await;
    }

    /// Count a failed dispatch and mark the role errored.
    pub async fn record_error(&self, role: &str) {
        self.update(role, |state| {
            state.metrics.errors += 1;
            state.status = WorkerStatus::Error;
        })
        .await;
    }

    /// Count an evaluator retry.
    pub async fn record_retry(&self, role: &str) {
        self.update(role, |state| state.metrics.retries += 1).await;
    }

    /// Count a tool call.
    pub async fn record_tool_call(&self, role: &str) {
        self.update(role, |state| state.metrics.tool_calls += 1).await;
    }

    /// Count a safety block.
    pub async fn record_safety_block(&self, role: &str) {
        self.update(role, |state| state.metrics.safety_blocks += 1)
            .await;
    }

    /// Record execution duration for a role.
    pub async fn record_duration(&self, role: &str, duration_ms: u64) {
        self.update(role, |state| state.metrics.duration_ms += duration_ms)
            .await;
    }

    /// Get a snapshot of all role states, ordered by role name.
    pub async fn snapshot(&self) -> Vec<RoleState> {
        let states = self.states.read().await;
        states.values().cloned().collect()
    }

    /// State of `role`, if it has been seen.
    pub async fn get_state(&self, role: &str) -> Option<RoleState> {
        let states = self.states.read().await;
        states.get(role).cloned()
    }

    /// Get aggregate metrics across all roles.
    pub async fn aggregate_metrics(&self) -> RoleMetrics {
        let states = self.states.read().await;
        let mut total = RoleMetrics::default();
        for state in states.values() {
            total.dispatches += state.metrics.dispatches;
            total.retries += state.metrics.retries;
            total.errors += state.metrics.errors;
            total.tool_calls += state.metrics.tool_calls;
            total.safety_blocks += state.metrics.safety_blocks;
            total.duration_ms += state.metrics.duration_ms;
        }
        total
    }

    /// Roles and aggregate metrics as JSON.
    pub async fn to_json(&self) -> serde_json::Value {
        let states = self.snapshot().await;
        let aggregate = self.aggregate_metrics().await;
        serde_json::json!({
            "roles": states,
            "aggregate": aggregate,
        })
    }
}
