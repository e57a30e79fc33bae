//! Core types and error definitions for the Convoy task pipeline.
//!
//! This crate provides the foundational types shared across all Convoy crates,
//! including error handling, the task-scoped failure taxonomy, capability
//! output variants, and the backoff/concurrency primitives used by retry loops
//! and parallel dispatch.
//!
//! # Main types
//!
//! - [`ConvoyError`]: Unified error enum for all Convoy subsystems.
//! - [`ConvoyResult`]: Convenience alias for `Result<T, ConvoyError>`.
//! - [`FailureKind`]: Recoverable and task-terminal conditions recorded on a run.
//! - [`Severity`]: Ordered diagnostic level (`Info < Warn < Fail`).
//! - [`AgentOutput`]: Tagged view over what a capability produced.
//! - [`Backoff`]: Exponential-backoff delay generator.
//! - [`WorkerPool`]: Bounded pool for fire-and-forget async work.
//! - [`domain_of`]: Host normalisation shared by retrieval and link policy.

/// Exponential backoff delay generator.
pub mod backoff;
/// Failure taxonomy, incidents and severity ordering.
pub mod failure;
/// Capability output variants and tool requests.
pub mod output;
/// Bounded worker pool.
pub mod pool;
/// URL helpers.
pub mod url;

pub use backoff::Backoff;
pub use failure::{Diagnostic, FailureKind, Incident, Severity};
pub use output::{AgentOutput, StructuredAnswer, ToolRequest};
pub use pool::WorkerPool;
pub use url::domain_of;

// --- Error types ---

/// Top-level error type for the Convoy pipeline.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Debug, thiserror::Error)]
pub enum ConvoyError {
    /// No capability could be resolved for a task's role.
    #[error("Routing error: {0}")]
    Routing(String),

    /// A capability failed while producing output for a task.
    #[error("Capability error: {0}")]
    Capability(String),

    /// A tool invocation raised.
    #[error("Tool error: {0}")]
    Tool(String),

    /// A retriever or its backend failed.
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// The safety gate rejected a payload.
    #[error("Safety error: {0}")]
    Safety(String),

    /// An evaluator failed to score a payload.
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// Planning did not yield a usable task list.
    #[error("Planning error: {0}")]
    Planning(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from an outbound HTTP request.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`ConvoyError`].
pub type ConvoyResult<T> = Result<T, ConvoyError>;
