//! Safety and policy gate for capability output.
//!
//! Every payload a capability or tool produces is classified for personal
//! data, secrets, toxicity and licensing problems, redacted in place, and
//! resolved to allow/redact/block through a configurable policy table.
//! Rejected payloads drive a bounded repair loop.
//!
//! # Main types
//!
//! - [`PolicyGate`]: `classify`, `decide`, `evaluate`, `filter_output` and `guard_output`.
//! - [`Classifier`]: The four detectors.
//! - [`PolicyTable`] / [`PolicyDecision`]: Class → action resolution.
//! - [`Regenerate`]: Callback the repair loop uses to obtain a new payload.

/// Content classification.
pub mod classifier;
/// Policy gate configuration.
pub mod config;
/// Classification, decisions and redaction.
pub mod gate;
/// Regex detectors for personal data and secrets.
pub mod patterns;
/// Policy classes, actions, rules and decisions.
pub mod policy;
/// Bounded repair loop.
pub mod repair;

pub use classifier::{payload_text, Classifier};
pub use config::PolicyConfig;
pub use gate::PolicyGate;
pub use policy::{PolicyAction, PolicyClass, PolicyDecision, PolicyRule, PolicyTable};
pub use repair::{GuardMeta, GuardOutcome, Regenerate};
