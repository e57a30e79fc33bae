use crate::config::OrchestratorConfig;
use crate::monitor::AgentMonitor;
use crate::planner::{fallback_task, normalize_tasks, validate_plan};
use crate::report::RunReport;
use crate::routing::{Routed, Router};
use crate::state::{RunState, TaskWork};
use crate::synth::{answer_text, merge_answers};
use crate::trace::{AppendLog, TraceLog};
use crate::traits::{Capability, Evaluator, Planner, ProvenanceSink, ToolExecutor};
use crate::types::{Evaluation, RiskPosture, Step, Task, TaskContext};
use async_trait::async_trait;
use convoy_core::{
    AgentOutput, ConvoyError, ConvoyResult, FailureKind, Incident, Severity, WorkerPool,
};
use convoy_retrieval::{Budgets, RetrievalPipeline, RetrievalPlan, TaskRef};
use convoy_safety::{GuardOutcome, PolicyClass, PolicyGate, Regenerate};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// The task-graph orchestrator.
///
/// Drives `plan → route → agent → (tool) → collect → synth` one step per
/// [`Orchestrator::advance`] call. With `max_concurrency > 1`, consecutive
/// tasks whose dependencies are already collected are dispatched together
/// through a [`WorkerPool`] and collected in plan order.
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<OrchestratorConfig>,
    planner: Arc<dyn Planner>,
    router: Arc<Router>,
    gate: Arc<PolicyGate>,
    evaluator: Option<Arc<dyn Evaluator>>,
    tools: Option<Arc<dyn ToolExecutor>>,
    provenance: Option<Arc<dyn ProvenanceSink>>,
    retrieval: Option<Arc<RetrievalPipeline>>,
    monitor: AgentMonitor,
}

impl Orchestrator {
    /// Create an orchestrator with no evaluator, tools or retrieval.
    pub fn new(
        config: OrchestratorConfig,
        planner: Arc<dyn Planner>,
        router: Router,
        gate: PolicyGate,
    ) -> Self {
        Self {
            config: Arc::new(config),
            planner,
            router: Arc::new(router),
            gate: Arc::new(gate),
            evaluator: None,
            tools: None,
            provenance: None,
            retrieval: None,
            monitor: AgentMonitor::new(),
        }
    }

    /// Score outputs with `evaluator` when evaluators are enabled.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Execute task tool requests through `tools`.
    pub fn with_tools(mut self, tools: Arc<dyn ToolExecutor>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Poll `provenance` around each tool call.
    pub fn with_provenance(mut self, provenance: Arc<dyn ProvenanceSink>) -> Self {
        self.provenance = Some(provenance);
        self
    }

    /// Build retrieval context for each dispatch.
    pub fn with_retrieval(mut self, retrieval: Arc<RetrievalPipeline>) -> Self {
        self.retrieval = Some(retrieval);
        self
    }

    /// Pipeline tunables.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Get a reference to the monitor.
    pub fn monitor(&self) -> &AgentMonitor {
        &self.monitor
    }

    /// Run the whole pipeline for an objective.
    pub async fn run(
        &self,
        objective: &str,
        constraints: &[String],
        risk: RiskPosture,
    ) -> ConvoyResult<RunReport> {
        if objective.trim().is_empty() {
            return Err(ConvoyError::Planning("objective is empty".into()));
        }
        let state = RunState::new(objective, constraints.to_vec(), risk);
        let state = self.run_state(state).await;
        Ok(RunReport::from_state(&state, self.monitor.to_json().await))
    }

    /// Advance a state until it reaches `done`.
    pub async fn run_state(&self, mut state: RunState) -> RunState {
        let start = Instant::now();
        info!(run_id = %state.run_id, objective = %state.objective, "Orchestrator: starting pipeline");

        while !state.is_done() {
            state = self.advance(state).await;
        }

        info!(
            run_id = %state.run_id,
            tasks = state.task_count(),
            incidents = state.incidents.len(),
            severity = %state.severity(),
            duration_ms = start.elapsed().as_millis(),
            "Orchestrator: pipeline complete"
        );
        state
    }

    /// Execute exactly one pipeline step.
    pub async fn advance(&self, mut state: RunState) -> RunState {
        match state.step {
            Step::Plan => self.plan_step(&mut state).await,
            Step::Route => self.route_step(&mut state).await,
            Step::Agent => self.agent_step(&mut state).await,
            Step::Tool => self.tool_step(&mut state).await,
            Step::Collect => self.collect_step(&mut state),
            Step::Synth => self.synth_step(&mut state).await,
            Step::Done => {}
        }
        state
    }

    async fn plan_step(&self, state: &mut RunState) {
        state.trace.start(Step::Plan, None);
        let planned = self
            .planner
            .plan(&state.objective, &state.constraints)
            .await
            .and_then(|tasks| validate_plan(&tasks).map(|()| tasks));
        state.tasks = match planned {
            Ok(tasks) => normalize_tasks(tasks),
            Err(e) => {
                warn!(error = %e, "Orchestrator: planning failed, using a single task");
                vec![fallback_task(&state.objective)]
            }
        };
        info!(task_count = state.tasks.len(), "Orchestrator: plan complete");
        state.trace.end(Step::Plan, None);
        state.step = Step::Route;
    }

    async fn route_step(&self, state: &mut RunState) {
        let Some(task) = state.current_task().cloned() else {
            state.step = Step::Synth;
            return;
        };

        if let Some(work) = state.prepared.remove(&task.id) {
            state.pending = Some(work);
            state.step = Step::Collect;
            return;
        }

        if self.config.max_concurrency > 1 {
            let wave = ready_wave(state, self.config.max_concurrency);
            if wave.len() > 1 {
                self.dispatch_wave(state, wave).await;
                state.pending = state.prepared.remove(&task.id);
                state.step = if state.pending.is_some() {
                    Step::Collect
                } else {
                    Step::Route
                };
                return;
            }
        }

        let routed = self.route(&task, &state.trace);
        let mut work = TaskWork::new(&task.id, routed.clone());
        if routed.via.is_fallback() {
            work.incident(
                FailureKind::RoutingFallback,
                format!("role '{}' resolved via {:?}", task.role, routed.via),
            );
        }
        if !task.is_ready(&state.collected()) {
            warn!(task_id = %task.id, depends_on = ?task.depends_on, "Dependencies not collected, running task anyway");
            work.diagnostic
                .push(Severity::Warn, "dependencies not collected before dispatch");
        }
        if let Some(current) = state.tasks.get_mut(state.cursor) {
            current.role = routed.role;
        }
        state.pending = Some(work);
        state.step = Step::Agent;
    }

    async fn agent_step(&self, state: &mut RunState) {
        let (Some(mut work), Some(task)) = (state.pending.take(), state.current_task().cloned())
        else {
            state.step = Step::Route;
            return;
        };
        self.run_agent(&task, state.context(), &state.trace, &mut work)
            .await;
        state.step = if self.wants_tool(&work) {
            Step::Tool
        } else {
            Step::Collect
        };
        state.pending = Some(work);
    }

    async fn tool_step(&self, state: &mut RunState) {
        if let Some(mut work) = state.pending.take() {
            self.run_tool(&state.trace, &state.tool_trace, &mut work)
                .await;
            state.pending = Some(work);
        }
        state.step = Step::Collect;
    }

    fn collect_step(&self, state: &mut RunState) {
        let Some(work) = state.pending.take() else {
            state.step = Step::Route;
            return;
        };
        let TaskWork {
            task_id,
            role,
            answer,
            tool_request,
            sources,
            incidents,
            diagnostic,
            ..
        } = work;

        state.trace.start(Step::Collect, Some(task_id.as_str()));
        if let Some(task) = state.tasks.get_mut(state.cursor) {
            task.role = role;
            if tool_request.is_some() {
                task.tool_request = tool_request;
            }
        }
        state.answers.insert(task_id.clone(), Value::Object(answer));
        if !sources.is_empty() {
            state.sources.insert(task_id.clone(), sources);
        }
        state.incidents.extend(incidents);
        state.diagnostics.insert(task_id.clone(), diagnostic);
        state.cursor += 1;
        state.trace.end(Step::Collect, Some(task_id.as_str()));

        debug!(task_id = %task_id, cursor = state.cursor, "Task collected");
        state.step = Step::Route;
    }

    async fn synth_step(&self, state: &mut RunState) {
        state.trace.start(Step::Synth, None);
        let merged = merge_answers(&state.objective, &state.tasks, &state.answers, &state.sources);

        let final_output = match self.router.get(&self.config.synth_role) {
            Some(capability) => {
                let task = Task::new("synth", self.config.synth_role.as_str(), "Synthesize results")
                    .with_description(state.objective.as_str());
                let ctx = state.context();
                let role = self.config.synth_role.clone();
                match capability.dispatch(&task, &ctx).await {
                    Ok(output) => {
                        let outcome = self
                            .guard(capability.as_ref(), &task, &ctx, &role, output.to_payload())
                            .await;
                        if !outcome.ok {
                            state.incidents.push(Incident::new(
                                FailureKind::SafetyBlocked,
                                None,
                                "synthesis output blocked",
                            ));
                        }
                        outcome.result
                    }
                    Err(e) => {
                        warn!(error = %e, "Synthesis capability failed, merging answers");
                        merged
                    }
                }
            }
            None => merged,
        };

        state.final_output = Some(final_output);
        state.trace.end(Step::Synth, None);
        state.step = Step::Done;
    }

    /// Dispatch a wave of independent tasks and keep their finished work.
    async fn dispatch_wave(&self, state: &mut RunState, wave: Vec<usize>) {
        info!(
            tasks = wave.len(),
            max_concurrency = self.config.max_concurrency,
            "Dispatching parallel wave"
        );
        let ctx = state.context();
        let mut pool = WorkerPool::new(self.config.max_concurrency);
        for index in wave.iter() {
            let this = self.clone();
            let task = state.tasks[*index].clone();
            let ctx = ctx.clone();
            let trace = state.trace.clone();
            let tool_trace = state.tool_trace.clone();
            pool.submit(async move { this.process_task(task, ctx, trace, tool_trace).await });
        }

        for (index, result) in wave.into_iter().zip(pool.join_all().await) {
            let task = &mut state.tasks[index];
            let work = match result {
                Ok(work) => work,
                Err(e) => {
                    error!(task_id = %task.id, error = %e, "Task did not complete");
                    TaskWork::failed(task, &e.to_string())
                }
            };
            task.role = work.role.clone();
            state.prepared.insert(task.id.clone(), work);
        }
    }

    /// Route, run and tool-call one task outside the cursor loop.
    async fn process_task(
        &self,
        task: Task,
        ctx: TaskContext,
        trace: TraceLog,
        tool_trace: AppendLog<Value>,
    ) -> TaskWork {
        let routed = self.route(&task, &trace);
        let mut work = TaskWork::new(&task.id, routed.clone());
        if routed.via.is_fallback() {
            work.incident(
                FailureKind::RoutingFallback,
                format!("role '{}' resolved via {:?}", task.role, routed.via),
            );
        }
        self.run_agent(&task, ctx, &trace, &mut work).await;
        if self.wants_tool(&work) {
            self.run_tool(&trace, &tool_trace, &mut work).await;
        }
        work
    }

    fn route(&self, task: &Task, trace: &TraceLog) -> Routed {
        trace.start(Step::Route, Some(task.id.as_str()));
        let routed = self.router.resolve(task);
        if routed.via.is_fallback() {
            info!(task_id = %task.id, role = %task.role, resolved = %routed.role, via = ?routed.via, "Routing fallback");
        } else {
            debug!(task_id = %task.id, role = %routed.role, "Task routed");
        }
        trace.end(Step::Route, Some(task.id.as_str()));
        routed
    }

    /// Retrieval, dispatch with score-driven retries, then the safety gate.
    async fn run_agent(
        &self,
        task: &Task,
        mut ctx: TaskContext,
        trace: &TraceLog,
        work: &mut TaskWork,
    ) {
        let Some(routed) = work.routed.clone() else {
            return;
        };
        let capability = routed.capability;
        let role = work.role.clone();

        trace.start(Step::Agent, Some(task.id.as_str()));
        self.monitor.start_task(&role, &task.id).await;
        let start = Instant::now();

        if let Some(retrieval) = self.retrieval.as_ref().filter(|_| self.config.retrieval_enabled) {
            let plan = RetrievalPlan {
                objective: ctx.objective.clone(),
                constraints: ctx.constraints.clone(),
                evaluators_enabled: self.config.evaluators_enabled,
                top_k: None,
            };
            let budgets = Budgets {
                token_budget: self.config.token_budget,
                per_doc_cap: self.config.per_doc_cap,
            };
            let outcome = retrieval
                .run_retrieval(&role, &TaskRef::new(&task.id, task.text()), None, &plan, &budgets)
                .await;
            for incident in outcome.incidents {
                work.absorb(incident);
            }
            if !outcome.bundle.is_empty() {
                ctx.retrieval_context = Some(outcome.bundle.to_context_value());
                work.sources = outcome.bundle.sources;
            }
        }

        let (payload, evaluation) = self
            .dispatch_with_retries(capability.as_ref(), task, &mut ctx, trace, work)
            .await;

        let outcome = self
            .guard(capability.as_ref(), task, &ctx, &role, payload)
            .await;
        if !outcome.meta.violations_seen.is_empty() {
            let classes: Vec<&str> = outcome.meta.violations_seen.iter().map(PolicyClass::as_str).collect();
            work.incident(
                FailureKind::PolicyViolation,
                format!("blocked classes: {}", classes.join(", ")),
            );
        }
        if !outcome.meta.decision.redact.is_empty() {
            let classes: Vec<&str> = outcome.meta.decision.redact.iter().map(PolicyClass::as_str).collect();
            work.diagnostic
                .push(Severity::Info, format!("redacted: {}", classes.join(", ")));
        }

        let mut answer = if outcome.ok {
            let output = AgentOutput::from_value(outcome.result);
            work.tool_request = output
                .tool_request()
                .cloned()
                .or_else(|| task.tool_request.clone());
            into_object(output.to_payload())
        } else {
            error!(task_id = %task.id, role = %role, "Task output blocked by safety gate");
            work.incident(
                FailureKind::SafetyBlocked,
                format!("repair loop exhausted after {} evaluations", outcome.meta.evaluations),
            );
            self.monitor.record_safety_block(&role).await;
            work.tool_request = None;
            into_object(outcome.result)
        };

        if let Some(context) = ctx.retrieval_context.as_ref() {
            let (sanitized, _) = self.gate.filter_output(context);
            answer.insert("retrieval_context".into(), sanitized);
        }
        if let Some(evaluation) = evaluation {
            answer.insert("evaluation".into(), json!(evaluation));
        }
        work.answer = answer;

        self.monitor
            .record_duration(&role, start.elapsed().as_millis() as u64)
            .await;
        self.monitor.finish_task(&role, &task.id).await;
        trace.end(Step::Agent, Some(task.id.as_str()));
    }

    /// Dispatch, re-dispatching while the evaluator scores below threshold.
    ///
    /// The last attempt's payload is returned. Dispatch errors become an
    /// error payload and are not retried.
    async fn dispatch_with_retries(
        &self,
        capability: &dyn Capability,
        task: &Task,
        ctx: &mut TaskContext,
        trace: &TraceLog,
        work: &mut TaskWork,
    ) -> (Value, Option<Evaluation>) {
        let evaluator = self
            .evaluator
            .as_ref()
            .filter(|_| self.config.evaluators_enabled);
        let mut attempt = 0u32;

        loop {
            ctx.attempt = attempt;
            let payload = match capability.dispatch(task, ctx).await {
                Ok(output) => output.to_payload(),
                Err(e) => {
                    warn!(task_id = %task.id, role = %work.role, error = %e, "Capability dispatch failed");
                    self.monitor.record_error(&work.role).await;
                    work.diagnostic
                        .push(Severity::Warn, format!("dispatch failed: {e}"));
                    return (json!({ "error": e.to_string() }), None);
                }
            };

            let Some(evaluator) = evaluator else {
                return (payload, None);
            };
            let context = json!({
                "objective": ctx.objective,
                "task_id": task.id,
                "role": work.role,
                "attempt": attempt,
                "retrieval_context": ctx.retrieval_context,
            });
            let evaluation = match evaluator.evaluate(&answer_text(&payload), &context).await {
                Ok(evaluation) => evaluation,
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "Evaluation failed, accepting output");
                    return (payload, None);
                }
            };

            let below = evaluation.score < self.config.score_threshold;
            let will_retry = below && attempt < self.config.max_retries;
            trace.attempt(Step::Agent, &task.id, attempt + 1, evaluation.score, will_retry);
            info!(
                task_id = %task.id,
                attempt = attempt + 1,
                score = evaluation.score,
                will_retry,
                "Evaluated task output"
            );

            if !will_retry {
                if below {
                    work.incident(
                        FailureKind::RetryBudgetExhausted,
                        format!(
                            "score {:.2} below {:.2} after {} attempts",
                            evaluation.score,
                            self.config.score_threshold,
                            attempt + 1
                        ),
                    );
                }
                return (payload, Some(evaluation));
            }

            self.monitor.record_retry(&work.role).await;
            ctx.feedback = Some(if evaluation.notes.is_empty() {
                format!("previous answer scored {:.2}", evaluation.score)
            } else {
                evaluation.notes.join("; ")
            });
            self.config.backoff.sleep(attempt).await;
            attempt += 1;
        }
    }

    /// Run a payload through the gate, re-dispatching the capability to repair it.
    async fn guard(
        &self,
        capability: &dyn Capability,
        task: &Task,
        ctx: &TaskContext,
        role: &str,
        payload: Value,
    ) -> GuardOutcome {
        let repair = CapabilityRegenerate {
            capability,
            task,
            ctx,
            feedback: "previous answer was rejected by the content policy",
        };
        let evaluator_repair = CapabilityRegenerate {
            feedback: "previous answer was rejected by the content policy; rewrite it for review",
            ..repair
        };
        let evaluator_retry: Option<&dyn Regenerate> = if self.config.evaluators_enabled {
            Some(&evaluator_repair)
        } else {
            None
        };
        self.gate
            .guard_output(role, payload, Some(&repair), evaluator_retry)
            .await
    }

    fn wants_tool(&self, work: &TaskWork) -> bool {
        work.tool_request.as_ref().is_some_and(|request| {
            let name = request.name.trim();
            !name.is_empty() && name != self.config.patch_tool
        })
    }

    /// Invoke the requested tool and record the provenance delta around it.
    async fn run_tool(&self, trace: &TraceLog, tool_trace: &AppendLog<Value>, work: &mut TaskWork) {
        let Some(request) = work.tool_request.clone() else {
            return;
        };
        trace.start(Step::Tool, Some(work.task_id.as_str()));
        let before = self
            .provenance
            .as_ref()
            .map_or(0, |sink| sink.get_provenance().len());

        let result = match self.tools.as_ref() {
            Some(tools) => tools.call_tool(&work.role, &request.name, &request.params).await,
            None => Err(ConvoyError::Tool(format!(
                "no tool executor for '{}'",
                request.name
            ))),
        };
        self.monitor.record_tool_call(&work.role).await;

        let delta: Vec<Value> = self
            .provenance
            .as_ref()
            .map(|sink| sink.get_provenance().into_iter().skip(before).collect())
            .unwrap_or_default();
        tool_trace.extend(delta.into_iter().map(|record| {
            json!({
                "task_id": work.task_id,
                "tool": request.name,
                "record": record,
            })
        }));

        let value = match result {
            Ok(value) => {
                let (sanitized, decision) = self.gate.filter_output(&value);
                if decision.allowed {
                    sanitized
                } else {
                    warn!(task_id = %work.task_id, tool = %request.name, "Tool result blocked by policy");
                    work.incident(
                        FailureKind::PolicyViolation,
                        format!("tool '{}' result blocked", request.name),
                    );
                    json!({ "error": FailureKind::SafetyBlocked.code() })
                }
            }
            Err(e) => {
                warn!(task_id = %work.task_id, tool = %request.name, error = %e, "Tool invocation failed");
                self.monitor.record_error(&work.role).await;
                work.incident(FailureKind::ToolInvocationError, e.to_string());
                json!({ "error": e.to_string() })
            }
        };
        work.answer.insert("tool_result".into(), value);
        trace.end(Step::Tool, Some(work.task_id.as_str()));
    }
}

/// Consecutive tasks from the cursor whose dependencies are collected.
///
/// A task depending on an earlier wave member ends the wave, so tasks that
/// feed each other never run together.
fn ready_wave(state: &RunState, max: usize) -> Vec<usize> {
    let collected = state.collected();
    (state.cursor..state.tasks.len())
        .take_while(|&i| {
            let task = &state.tasks[i];
            task.is_ready(&collected) && !state.prepared.contains_key(&task.id)
        })
        .take(max)
        .collect()
}

fn into_object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("content".into(), other);
            map
        }
    }
}

/// Re-dispatches a capability with feedback after a policy rejection.
#[derive(Clone, Copy)]
struct CapabilityRegenerate<'a> {
    capability: &'a dyn Capability,
    task: &'a Task,
    ctx: &'a TaskContext,
    feedback: &'static str,
}

#[async_trait]
impl Regenerate for CapabilityRegenerate<'_> {
    async fn regenerate(&self, _role: &str, attempt: u32) -> ConvoyResult<Value> {
        let mut ctx = self.ctx.clone();
        ctx.attempt = ctx.attempt.saturating_add(attempt);
        ctx.feedback = Some(self.feedback.to_string());
        let output = self.capability.dispatch(self.task, &ctx).await?;
        Ok(output.to_payload())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::planner::StaticPlanner;
    use crate::types::TraceKind;
    use convoy_core::{Backoff, StructuredAnswer, ToolRequest};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Answers with `"<name>: <title>"`, optionally requesting a tool.
    struct Echo {
        name: &'static str,
        tool: Option<&'static str>,
        calls: AtomicU32,
    }

    impl Echo {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                tool: None,
                calls: AtomicU32::new(0),
            })
        }

        fn with_tool(name: &'static str, tool: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                tool: Some(tool),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Capability for Echo {
        fn name(&self) -> &str {
            self.name
        }

        async fn dispatch(&self, task: &Task, ctx: &TaskContext) -> ConvoyResult<AgentOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AgentOutput::Structured(StructuredAnswer {
                content: Some(format!("{}: {} (attempt {})", self.name, task.title, ctx.attempt)),
                tool_request: self
                    .tool
                    .map(|name| ToolRequest::new(name, json!({"task": task.id}))),
                ..Default::default()
            }))
        }
    }

    /// Sleeps, tracking how many dispatches overlap.
    struct Slow {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Capability for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn dispatch(&self, task: &Task, _ctx: &TaskContext) -> ConvoyResult<AgentOutput> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(AgentOutput::RawText(format!("done {}", task.id)))
        }
    }

    struct Toxic;

    #[async_trait]
    impl Capability for Toxic {
        fn name(&self) -> &str {
            "toxic"
        }

        async fn dispatch(&self, _task: &Task, _ctx: &TaskContext) -> ConvoyResult<AgentOutput> {
            Ok(AgentOutput::RawText("you idiot".into()))
        }
    }

    /// Scores attempts from a fixed list, last value repeating.
    struct Scores(Vec<f64>, AtomicUsize);

    #[async_trait]
    impl Evaluator for Scores {
        async fn evaluate(&self, _content: &str, _context: &Value) -> ConvoyResult<Evaluation> {
            let i = self.1.fetch_add(1, Ordering::SeqCst);
            let score = self.0.get(i).or(self.0.last()).copied().unwrap_or(0.0);
            Ok(Evaluation {
                score,
                notes: vec![],
            })
        }
    }

    /// Records provenance, failing for the `broken` tool after recording.
    #[derive(Default)]
    struct Tools {
        log: AppendLog<Value>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ToolExecutor for Tools {
        async fn call_tool(&self, role: &str, name: &str, params: &Value) -> ConvoyResult<Value> {
            self.calls.lock().push(name.to_string());
            self.log.push(json!({"tool": name, "role": role}));
            match name {
                "broken" => Err(ConvoyError::Tool("disk full".into())),
                _ => Ok(json!({"ok": true, "echo": params})),
            }
        }
    }

    fn config() -> OrchestratorConfig {
        OrchestratorConfig {
            backoff: Backoff::none(),
            ..OrchestratorConfig::default()
        }
    }

    fn orchestrator(config: OrchestratorConfig, tasks: Vec<Task>, router: Router) -> Orchestrator {
        Orchestrator::new(
            config,
            Arc::new(StaticPlanner::new(tasks)),
            router,
            PolicyGate::default(),
        )
    }

    #[tokio::test]
    async fn test_cursor_is_monotonic_and_reaches_task_count() {
        let tasks = vec![
            Task::new("t1", "writer", "One"),
            Task::new("t2", "writer", "Two"),
            Task::new("t3", "writer", "Three"),
        ];
        let orch = orchestrator(config(), tasks, Router::new().register(Echo::new("writer")));

        let mut state = RunState::new("count", vec![], RiskPosture::default());
        let mut last = 0;
        let mut collects = 0;
        while !state.is_done() {
            let was_collect = state.step == Step::Collect;
            state = orch.advance(state).await;
            assert!(state.cursor >= last);
            if was_collect {
                collects += 1;
                assert_eq!(state.cursor, last + 1);
            }
            last = state.cursor;
        }
        assert_eq!(collects, 3);
        assert_eq!(state.cursor, state.task_count());
        assert!(state.final_output.is_some());
    }

    #[tokio::test]
    async fn test_step_sequence_without_tool() {
        let orch = orchestrator(
            config(),
            vec![Task::new("t1", "writer", "One")],
            Router::new().register(Echo::new("writer")),
        );
        let mut state = RunState::new("o", vec![], RiskPosture::default());
        let mut steps = vec![state.step];
        while !state.is_done() {
            state = orch.advance(state).await;
            steps.push(state.step);
        }
        assert_eq!(
            steps,
            vec![
                Step::Plan,
                Step::Route,
                Step::Agent,
                Step::Collect,
                Step::Route,
                Step::Synth,
                Step::Done
            ]
        );
    }

    #[tokio::test]
    async fn test_low_scores_retry_and_last_attempt_wins() {
        let writer = Echo::new("writer");
        let orch = orchestrator(
            OrchestratorConfig {
                evaluators_enabled: true,
                max_retries: 2,
                ..config()
            },
            vec![Task::new("t1", "writer", "Draft")],
            Router::new().register(writer.clone()),
        )
        .with_evaluator(Arc::new(Scores(vec![0.2, 0.9], AtomicUsize::new(0))));

        let report = orch.run("o", &[], RiskPosture::default()).await.unwrap();
        assert_eq!(writer.calls.load(Ordering::SeqCst), 2);
        let answer = &report.tasks[0].answer;
        assert_eq!(answer["content"], "writer: Draft (attempt 1)");
        assert_eq!(answer["evaluation"]["score"], 0.9);

        let attempts: Vec<_> = report
            .trace
            .iter()
            .filter(|e| e.kind == TraceKind::Attempt)
            .collect();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].will_retry, Some(true));
        assert_eq!(attempts[1].will_retry, Some(false));
        assert_eq!(attempts[1].attempt, Some(2));
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted_keeps_last_output() {
        let writer = Echo::new("writer");
        let orch = orchestrator(
            OrchestratorConfig {
                evaluators_enabled: true,
                max_retries: 2,
                ..config()
            },
            vec![Task::new("t1", "writer", "Draft")],
            Router::new().register(writer.clone()),
        )
        .with_evaluator(Arc::new(Scores(vec![0.1], AtomicUsize::new(0))));

        let report = orch.run("o", &[], RiskPosture::default()).await.unwrap();
        assert_eq!(writer.calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.tasks[0].answer["content"], "writer: Draft (attempt 2)");
        assert!(report
            .incidents
            .iter()
            .any(|i| i.kind == FailureKind::RetryBudgetExhausted));
        assert_eq!(report.severity, Severity::Warn);
    }

    #[tokio::test]
    async fn test_no_retries_without_evaluators() {
        let writer = Echo::new("writer");
        let orch = orchestrator(
            config(),
            vec![Task::new("t1", "writer", "Draft")],
            Router::new().register(writer.clone()),
        )
        .with_evaluator(Arc::new(Scores(vec![0.0], AtomicUsize::new(0))));
        let report = orch.run("o", &[], RiskPosture::default()).await.unwrap();
        assert_eq!(writer.calls.load(Ordering::SeqCst), 1);
        assert!(report.tasks[0].answer.get("evaluation").is_none());
    }

    #[tokio::test]
    async fn test_tool_error_becomes_payload_with_provenance_delta() {
        let tools = Arc::new(Tools::default());
        let orch = orchestrator(
            config(),
            vec![Task::new("t1", "ops", "Clean up")],
            Router::new().register(Echo::with_tool("ops", "broken")),
        )
        .with_tools(tools.clone())
        .with_provenance(Arc::new(tools.log.clone()));

        let report = orch.run("o", &[], RiskPosture::default()).await.unwrap();
        let answer = &report.tasks[0].answer;
        assert_eq!(answer["tool_result"], json!({"error": "Tool error: disk full"}));
        assert_eq!(report.tool_trace.len(), 1);
        assert_eq!(report.tool_trace[0]["task_id"], "t1");
        assert_eq!(report.tool_trace[0]["record"]["tool"], "broken");
        assert!(report
            .incidents
            .iter()
            .any(|i| i.kind == FailureKind::ToolInvocationError));
        assert_eq!(report.cursor, 1);
    }

    #[tokio::test]
    async fn test_patch_tool_is_not_invoked() {
        let tools = Arc::new(Tools::default());
        let orch = orchestrator(
            config(),
            vec![Task::new("t1", "coder", "Fix")],
            Router::new().register(Echo::with_tool("coder", "apply_patch")),
        )
        .with_tools(tools.clone());

        let mut state = RunState::new("o", vec![], RiskPosture::default());
        while !state.is_done() {
            state = orch.advance(state).await;
            assert_ne!(state.step, Step::Tool);
        }
        assert!(tools.calls.lock().is_empty());
        assert_eq!(
            state.tasks[0].tool_request.as_ref().map(|r| r.name.as_str()),
            Some("apply_patch")
        );
    }

    #[tokio::test]
    async fn test_task_level_tool_request_is_used() {
        let tools = Arc::new(Tools::default());
        let task = Task::new("t1", "ops", "Ping")
            .with_tool_request(ToolRequest::new("ping", json!({"host": "localhost"})));
        let orch = orchestrator(config(), vec![task], Router::new().register(Echo::new("ops")))
            .with_tools(tools.clone());
        let report = orch.run("o", &[], RiskPosture::default()).await.unwrap();
        assert_eq!(report.tasks[0].answer["tool_result"]["echo"]["host"], "localhost");
        assert_eq!(*tools.calls.lock(), vec!["ping".to_string()]);
    }

    #[tokio::test]
    async fn test_safety_block_is_task_scoped() {
        let router = Router::new()
            .register(Arc::new(Toxic))
            .register(Echo::new("writer"));
        let orch = orchestrator(
            config(),
            vec![
                Task::new("t1", "toxic", "Rant"),
                Task::new("t2", "writer", "Summarise"),
            ],
            router,
        );
        let report = orch.run("o", &[], RiskPosture::default()).await.unwrap();
        assert_eq!(report.tasks[0].answer["error"], "SAFETY_BLOCKED");
        assert_eq!(report.tasks[0].diagnostic.severity, Severity::Fail);
        assert_eq!(report.tasks[1].answer["content"], "writer: Summarise (attempt 0)");
        assert_eq!(report.severity, Severity::Fail);
        assert!(report.incidents.iter().any(|i| i.kind == FailureKind::PolicyViolation));
        let final_output = report.final_output.unwrap();
        assert!(final_output["content"]
            .as_str()
            .unwrap()
            .contains("error: SAFETY_BLOCKED"));
    }

    #[tokio::test]
    async fn test_unknown_role_uses_generic_fallback() {
        let orch = orchestrator(config(), vec![Task::new("t1", "poet", "Write a haiku")], Router::new());
        let report = orch.run("o", &[], RiskPosture::default()).await.unwrap();
        assert_eq!(report.tasks[0].role, "poet");
        assert!(report.tasks[0].answer["content"]
            .as_str()
            .unwrap()
            .starts_with("[poet] Write a haiku"));
        assert!(report
            .incidents
            .iter()
            .any(|i| i.kind == FailureKind::RoutingFallback));
    }

    #[tokio::test]
    async fn test_parallel_wave_is_bounded_and_keeps_order() {
        let slow = Arc::new(Slow {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let tasks: Vec<Task> = (1..=5)
            .map(|i| Task::new(format!("t{i}"), "slow", format!("Task {i}")))
            .collect();
        let orch = orchestrator(
            OrchestratorConfig {
                max_concurrency: 2,
                ..config()
            },
            tasks,
            Router::new().register(slow.clone()),
        );
        let report = orch.run("o", &[], RiskPosture::default()).await.unwrap();
        assert_eq!(slow.peak.load(Ordering::SeqCst), 2);
        let ids: Vec<&str> = report.tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3", "t4", "t5"]);
        assert!(report.tasks.iter().all(|t| t.answer["content"]
            .as_str()
            .is_some_and(|c| c == format!("done {}", t.id))));
        assert_eq!(report.cursor, 5);
    }

    #[tokio::test]
    async fn test_dependent_tasks_never_share_a_wave() {
        struct Reader(Mutex<HashMap<String, usize>>);

        #[async_trait]
        impl Capability for Reader {
            fn name(&self) -> &str {
                "reader"
            }

            async fn dispatch(&self, task: &Task, ctx: &TaskContext) -> ConvoyResult<AgentOutput> {
                self.0.lock().insert(task.id.clone(), ctx.answers.len());
                Ok(AgentOutput::RawText(task.id.clone()))
            }
        }

        let reader = Arc::new(Reader(Mutex::new(HashMap::new())));
        let tasks = vec![
            Task::new("a", "reader", "A"),
            Task::new("b", "reader", "B"),
            Task::new("c", "reader", "C").with_dependencies(vec!["a".into(), "b".into()]),
            Task::new("d", "reader", "D"),
        ];
        let orch = orchestrator(
            OrchestratorConfig {
                max_concurrency: 4,
                ..config()
            },
            tasks,
            Router::new().register(reader.clone()),
        );
        let report = orch.run("o", &[], RiskPosture::default()).await.unwrap();
        let seen = reader.0.lock().clone();
        assert_eq!(seen["a"], 0);
        assert_eq!(seen["b"], 0);
        assert_eq!(seen["c"], 2);
        assert_eq!(seen["d"], 2);
        assert_eq!(report.cursor, 4);
    }

    #[tokio::test]
    async fn test_start_end_pairs_per_task_step() {
        let orch = orchestrator(
            OrchestratorConfig {
                max_concurrency: 3,
                ..config()
            },
            (1..=3)
                .map(|i| Task::new(format!("t{i}"), "writer", "W"))
                .collect(),
            Router::new().register(Echo::new("writer")),
        );
        let report = orch.run("o", &[], RiskPosture::default()).await.unwrap();
        for id in ["t1", "t2", "t3"] {
            for step in [Step::Route, Step::Agent, Step::Collect] {
                let kinds: Vec<TraceKind> = report
                    .trace
                    .iter()
                    .filter(|e| e.task_id.as_deref() == Some(id) && e.step == step)
                    .map(|e| e.kind)
                    .collect();
                assert_eq!(kinds, vec![TraceKind::Start, TraceKind::End], "{id} {step}");
            }
        }
    }

    #[tokio::test]
    async fn test_synth_capability_output_is_guarded() {
        struct Synth;

        #[async_trait]
        impl Capability for Synth {
            fn name(&self) -> &str {
                "synth"
            }

            async fn dispatch(&self, _task: &Task, ctx: &TaskContext) -> ConvoyResult<AgentOutput> {
                Ok(AgentOutput::RawText(format!(
                    "{} answers, contact a@b.com",
                    ctx.answers.len()
                )))
            }
        }

        let router = Router::new()
            .register(Echo::new("writer"))
            .register(Arc::new(Synth));
        let orch = orchestrator(
            config(),
            vec![Task::new("t1", "writer", "A"), Task::new("t2", "writer", "B")],
            router,
        );
        let report = orch.run("o", &[], RiskPosture::default()).await.unwrap();
        assert_eq!(
            report.final_output.unwrap()["content"],
            "2 answers, contact [REDACTED:email]"
        );
    }

    #[tokio::test]
    async fn test_empty_objective_is_rejected() {
        let orch = orchestrator(config(), vec![], Router::new());
        assert!(orch.run("  ", &[], RiskPosture::default()).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_planner_falls_back_to_objective_task() {
        let orch = orchestrator(config(), vec![], Router::new());
        let report = orch
            .run("Summarise the findings", &[], RiskPosture::default())
            .await
            .unwrap();
        assert_eq!(report.task_count, 1);
        assert_eq!(report.tasks[0].title, "Summarise the findings");
    }
}
