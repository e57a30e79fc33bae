//! Task-graph orchestration for Convoy pipelines.
//!
//! Turns an objective into tasks, routes each task to a capability,
//! enriches it with retrieved evidence, retries low-scoring answers, runs
//! every result through the safety gate and synthesises the collected
//! answers. Independent tasks can be dispatched in bounded parallel waves.
//!
//! # Main types
//!
//! - [`Orchestrator`]: The `plan → route → agent → tool → collect → synth` state machine.
//! - [`RunState`]: Cursor, answers, trace and provenance of one run.
//! - [`Router`]: Resolves task roles to capabilities with ordered fallbacks.
//! - [`Capability`]: Pluggable worker dispatched for a task.
//! - [`AgentMonitor`]: Per-role dispatch, retry, error and duration metrics.
//! - [`RunReport`]: Serializable summary of a finished run.

/// Orchestrator configuration.
pub mod config;
/// The task-graph state machine.
pub mod engine;
/// Role metrics monitoring.
pub mod monitor;
/// Planners that decompose objectives into tasks.
pub mod planner;
/// Run report.
pub mod report;
/// Role-to-capability routing.
pub mod routing;
/// Run state.
pub mod state;
/// Deterministic synthesis helpers.
pub mod synth;
/// Append-only trace and tool-provenance logs.
pub mod trace;
/// Capability, evaluator, tool, provenance and planner boundaries.
pub mod traits;
/// Shared orchestration types (Task, TraceEvent, TaskContext, etc.).
pub mod types;

pub use config::OrchestratorConfig;
pub use engine::Orchestrator;
pub use monitor::{AgentMonitor, RoleMetrics, RoleState, WorkerStatus};
pub use planner::{CapabilityPlanner, StaticPlanner};
pub use report::{RunReport, TaskReport};
pub use routing::{GenericCapability, RouteVia, Routed, Router};
pub use state::RunState;
pub use trace::{AppendLog, TraceLog};
pub use traits::{Capability, Evaluator, Planner, ProvenanceSink, ToolExecutor};
pub use types::{Evaluation, RiskPosture, Step, Task, TaskContext, TraceEvent, TraceKind};
