use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Exponential backoff: `delay(attempt) = min(base * factor^attempt, max)`.
///
/// The attempt counter is owned by the caller, so each fresh task invocation
/// starts again from attempt 0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    /// Base delay in milliseconds.
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,
    /// Growth factor applied per attempt.
    #[serde(default = "default_factor")]
    pub factor: f64,
    /// Cap in milliseconds.
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
}

fn default_base_ms() -> u64 {
    500
}

fn default_factor() -> f64 {
    2.0
}

fn default_max_ms() -> u64 {
    30_000
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            factor: default_factor(),
            max_ms: default_max_ms(),
        }
    }
}

impl Backoff {
    /// Create a backoff from explicit parameters.
    pub fn new(base_ms: u64, factor: f64, max_ms: u64) -> Self {
        Self {
            base_ms,
            factor,
            max_ms,
        }
    }

    /// No delay at all. Useful for tests and synchronous callers.
    pub fn none() -> Self {
        Self::new(0, 1.0, 0)
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.base_ms as f64 * self.factor.max(0.0).powi(exp);
        let capped = if raw.is_finite() {
            raw.min(self.max_ms as f64)
        } else {
            self.max_ms as f64
        };
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Infinite sequence of delays starting at attempt 0.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0u32..).map(|attempt| self.delay(attempt))
    }

    /// Sleep for the delay of the given attempt.
    pub async fn sleep(&self, attempt: u32) {
        let delay = self.delay(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
