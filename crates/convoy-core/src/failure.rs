use serde::{Deserialize, Serialize};

/// Recoverable or task-terminal conditions that can occur during a run.
///
/// None of these abort a run. Most are absorbed and logged; `SafetyBlocked`
/// is the only one that replaces a task's output with an error marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// No exact role match; a keyword or generic fallback capability was used.
    RoutingFallback,
    /// A tool raised; its error became the tool result.
    ToolInvocationError,
    /// A retriever was disabled or failed and contributed no documents.
    RetrievalBackendUnavailable,
    /// Every candidate was on a blocked domain.
    NoSafeHitsAvailable,
    /// A block-class policy violation was detected.
    PolicyViolation,
    /// The repair loop was exhausted.
    SafetyBlocked,
    /// Quality-score retries were exhausted; the last attempt was kept.
    RetryBudgetExhausted,
}

impl FailureKind {
    /// Stable machine-readable code, also used inside `{ "error": ... }` markers.
    pub fn code(&self) -> &'static str {
        match self {
            FailureKind::RoutingFallback => "ROUTING_FALLBACK",
            FailureKind::ToolInvocationError => "TOOL_INVOCATION_ERROR",
            FailureKind::RetrievalBackendUnavailable => "RETRIEVAL_BACKEND_UNAVAILABLE",
            FailureKind::NoSafeHitsAvailable => "NO_SAFE_HITS_AVAILABLE",
            FailureKind::PolicyViolation => "POLICY_VIOLATION",
            FailureKind::SafetyBlocked => "SAFETY_BLOCKED",
            FailureKind::RetryBudgetExhausted => "RETRY_BUDGET_EXHAUSTED",
        }
    }

    /// Severity this condition contributes to a task diagnostic.
    pub fn severity(&self) -> Severity {
        match self {
            FailureKind::RoutingFallback
            | FailureKind::RetrievalBackendUnavailable
            | FailureKind::NoSafeHitsAvailable => Severity::Info,
            FailureKind::ToolInvocationError
            | FailureKind::PolicyViolation
            | FailureKind::RetryBudgetExhausted => Severity::Warn,
            FailureKind::SafetyBlocked => Severity::Fail,
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// A task-scoped failure recorded on a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// Which failure occurred.
    pub kind: FailureKind,
    /// Task the failure belongs to, `None` for run-level failures.
    pub task_id: Option<String>,
    /// Human-readable detail.
    pub message: String,
}

impl Incident {
    /// Create an incident for `task_id` (or the run as a whole).
    pub fn new(kind: FailureKind, task_id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            kind,
            task_id: task_id.map(str::to_string),
            message: message.into(),
        }
    }
}

/// Diagnostic level, ordered `Info < Warn < Fail`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational only.
    #[default]
    Info,
    /// Degraded but usable output.
    Warn,
    /// The task's output is unusable.
    Fail,
}

impl Severity {
    /// Combine two levels, keeping the more severe one.
    pub fn escalate(self, other: Severity) -> Severity {
        self.max(other)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warn => write!(f, "warn"),
            Severity::Fail => write!(f, "fail"),
        }
    }
}

/// Per-task diagnostic attached to a run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Task this diagnostic describes.
    pub task_id: String,
    /// Highest severity pushed so far.
    pub severity: Severity,
    /// Messages in the order they were pushed.
    pub messages: Vec<String>,
}

impl Diagnostic {
    /// Empty `Info` diagnostic for a task.
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            severity: Severity::Info,
            messages: Vec::new(),
        }
    }

    /// Record a message, escalating the diagnostic's severity if needed.
    pub fn push(&mut self, severity: Severity, message: impl Into<String>) {
        self.severity = self.severity.escalate(severity);
        self.messages.push(message.into());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Warn);
        assert!(Severity::Warn < Severity::Fail);
        assert_eq!(Severity::Warn.escalate(Severity::Info), Severity::Warn);
        assert_eq!(Severity::Info.escalate(Severity::Fail), Severity::Fail);
        assert_eq!(Severity::Fail.escalate(Severity::Warn), Severity::Fail);
    }

    #[test]
    fn test_severity_max_over_iterator() {
        let levels = [Severity::Info, Severity::Fail, Severity::Warn];
        let worst = levels.iter().copied().fold(Severity::Info, Severity::escalate);
        assert_eq!(worst, Severity::Fail);
    }

    #[test]
    fn test_failure_kind_serializes_as_code() {
        let json = serde_json::to_string(&FailureKind::SafetyBlocked).unwrap();
        assert_eq!(json, "\"SAFETY_BLOCKED\"");
        assert_eq!(FailureKind::SafetyBlocked.to_string(), "SAFETY_BLOCKED");
    }

    #[test]
    fn test_diagnostic_escalates() {
        let mut diag = Diagnostic::new("t1");
        diag.push(Severity::Warn, "retry budget exhausted");
        diag.push(Severity::Info, "routing fallback");
        assert_eq!(diag.severity, Severity::Warn);
        assert_eq!(diag.messages.len(), 2);
    }
}
