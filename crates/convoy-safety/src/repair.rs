use crate::gate::PolicyGate;
use crate::policy::{PolicyClass, PolicyDecision};
use async_trait::async_trait;
use convoy_core::{ConvoyResult, FailureKind};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

/// Produces a replacement payload after a policy rejection.
///
/// `attempt` counts from 1 across both the repair and evaluator paths.
#[async_trait]
pub trait Regenerate: Send + Sync {
    /// Regenerate the output of `role`.
    async fn regenerate(&self, role: &str, attempt: u32) -> ConvoyResult<Value>;
}

/// Bookkeeping for one [`PolicyGate::guard_output`] call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardMeta {
    /// Payloads run through `filter_output`, the first one included.
    pub evaluations: u32,
    /// Regenerations made through the repair path.
    pub repair_attempts: u32,
    /// Whether the evaluator path was used.
    pub evaluator_retry_used: bool,
    /// Decision on the last evaluated payload.
    pub decision: PolicyDecision,
    /// Every block class seen across attempts.
    pub violations_seen: Vec<PolicyClass>,
}

/// Result of the guarded output check.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardOutcome {
    /// Whether a payload was accepted.
    pub ok: bool,
    /// Sanitized accepted payload, or `{"error": "SAFETY_BLOCKED"}`.
    pub result: Value,
    /// Counters and final decision.
    pub meta: GuardMeta,
}

impl PolicyGate {
    /// Filter a payload; on rejection drive the bounded repair loop.
    ///
    /// At most `1 + repair_max_attempts` evaluations, plus one through
    /// `evaluator_retry` when that path is enabled and supplied. A failed
    /// regeneration consumes its attempt without an evaluation.
    pub async fn guard_output(
        &self,
        role: &str,
        payload: Value,
        retry: Option<&dyn Regenerate>,
        evaluator_retry: Option<&dyn Regenerate>,
    ) -> GuardOutcome {
        let mut meta = GuardMeta::default();

        if let Some(accepted) = self.check(&payload, &mut meta) {
            return self.accept(accepted, meta);
        }
        warn!(
            role = %role,
            violations = ?meta.decision.violations,
            "Policy violation, starting repair loop"
        );

        let mut attempt = 0u32;
        if let Some(retry) = retry {
            for _ in 0..self.config().repair_max_attempts {
                attempt += 1;
                meta.repair_attempts += 1;
                match retry.regenerate(role, attempt).await {
                    Ok(candidate) => {
                        if let Some(accepted) = self.check(&candidate, &mut meta) {
                            info!(role = %role, attempt, "Repair attempt accepted");
                            return self.accept(accepted, meta);
                        }
                    }
                    Err(e) => warn!(role = %role, attempt, error = %e, "Repair attempt failed"),
                }
            }
        }

        if self.config().evaluator_retry {
            if let Some(evaluator_retry) = evaluator_retry {
                attempt += 1;
                meta.evaluator_retry_used = true;
                match evaluator_retry.regenerate(role, attempt).await {
                    Ok(candidate) => {
                        if let Some(accepted) = self.check(&candidate, &mut meta) {
                            info!(role = %role, attempt, "Evaluator retry accepted");
                            return self.accept(accepted, meta);
                        }
                    }
                    Err(e) => warn!(role = %role, error = %e, "Evaluator retry failed"),
                }
            }
        }

        error!(
            role = %role,
            evaluations = meta.evaluations,
            violations = ?meta.violations_seen,
            "Repair loop exhausted, output blocked"
        );
        GuardOutcome {
            ok: false,
            result: json!({ "error": FailureKind::SafetyBlocked.code() }),
            meta,
        }
    }

    fn check(&self, payload: &Value, meta: &mut GuardMeta) -> Option<Value> {
        meta.evaluations += 1;
        let (sanitized, decision) = self.filter_output(payload);
        for class in decision.violations.iter() {
            if !meta.violations_seen.contains(class) {
                meta.violations_seen.push(*class);
            }
        }
        let allowed = decision.allowed;
        meta.decision = decision;
        allowed.then_some(sanitized)
    }

    fn accept(&self, result: Value, meta: GuardMeta) -> GuardOutcome {
        GuardOutcome {
            ok: true,
            result,
            meta,
        }
    }
}
