//! Retry delays after transient failures.

use serde::{Deserialize, Serialize};

/// Default delay before the first retry.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;

/// Default ceiling for retry delays.
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 300_000;

/// Exponential backoff, capped.
///
/// Attempt `n` waits `base * 2^(n - 1)` milliseconds, never more than `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffPolicy {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: DEFAULT_BACKOFF_BASE_MS,
            max_ms: DEFAULT_BACKOFF_MAX_MS,
        }
    }
}

impl BackoffPolicy {
    /// Create a policy. A ceiling below the base is raised to the base.
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms: max_ms.max(base_ms),
        }
    }

    /// Delay in milliseconds before retry number `attempt` (1-based).
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(63);
        let factor = 1u64 << exponent;
        self.base_ms.saturating_mul(factor).min(self.max_ms)
    }

    /// Delay before retry number `attempt` as a [`std::time::Duration`].
    pub fn delay(&self, attempt: u32) -> std::time::Duration {
        std::time::Duration::from_millis(self.delay_ms(attempt))
    }
}
