//! Retry parameters and backoff calculation.
//!
//! The sync building blocks live here; the async retry loops themselves sit
//! next to the adapters that need them (they own the tokio timers and
//! cancellation handling).

use serde::{Deserialize, Serialize};

/// Retry parameters for one class of calls.
///
/// The default profile matches the warehouse transport contract: 3 retries,
/// 250 ms base, capped at 2 s.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Maximum retry attempts after the initial try.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay for exponential backoff, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap on any single delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter range 0.0–1.0 applied on top of the exponential value.
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    250
}
fn default_max_delay_ms() -> u64 {
    2_000
}
fn default_jitter_factor() -> f64 {
    0.2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl RetryConfig {
    /// Profile for LLM calls: a single retry, since each reattempt burns
    /// token budget.
    #[must_use]
    pub fn single_retry() -> Self {
        Self {
            max_retries: 1,
            base_delay_ms: 500,
            max_delay_ms: 2_000,
            jitter_factor: 0.2,
        }
    }

    /// Backoff delay for a zero-based retry attempt, without randomness.
    ///
    /// `min(max_delay, base * 2^attempt)` widened by the full jitter range.
    /// Callers that have a randomness source should prefer
    /// [`delay_with_random`](Self::delay_with_random).
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay_for(&self, attempt: u32) -> u64 {
        let exponential = self.base_delay_ms.saturating_mul(1u64 << attempt.min(31));
        let capped = exponential.min(self.max_delay_ms);
        let widened = (capped as f64) * (1.0 + self.jitter_factor);
        widened.round() as u64
    }

    /// Backoff delay with explicit randomness in `[0.0, 1.0)`.
    ///
    /// Maps `random` symmetrically into `±jitter_factor` around the capped
    /// exponential value.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay_with_random(&self, attempt: u32, random: f64) -> u64 {
        let exponential = self.base_delay_ms.saturating_mul(1u64 << attempt.min(31));
        let capped = exponential.min(self.max_delay_ms);
        let jitter = 1.0 + (random * 2.0 - 1.0) * self.jitter_factor;
        ((capped as f64) * jitter).round().max(0.0) as u64
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
