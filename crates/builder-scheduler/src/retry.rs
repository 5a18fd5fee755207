// SPDX-License-Identifier: Apache-2.0
//! Retry policy: exponential backoff with deterministic jitter (spec.md §4.5).

use builder_graph::Priority;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Default maximum attempts before an Action is permanently `Failed`.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Exponential backoff with deterministic, attempt-derived jitter.
///
/// Jitter is deterministic (not wall-clock-seeded) so that replaying the
/// same sequence of attempts in a test produces the same backoff
/// durations: the PRNG is seeded from the attempt number itself, not from
/// system entropy. `Critical` priority Actions bypass backoff entirely
/// (spec.md §4.5) — [`RetryPolicy::backoff_for`] returns `Duration::ZERO`
/// for them regardless of attempt.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Maximum attempts before the Action is permanently `Failed`.
    pub max_attempts: u32,
    /// Backoff duration before the first retry (attempt 2).
    pub initial: Duration,
    /// Multiplier applied per subsequent attempt.
    pub multiplier: f64,
    /// Ceiling on backoff duration, regardless of attempt count.
    pub max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial: Duration::from_millis(200),
            multiplier: 2.0,
            max: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Whether `attempt` (1-based, the attempt that just failed) still has
    /// budget for a retry under this policy.
    #[must_use]
    pub const fn has_budget(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Backoff duration to wait before attempt `attempt + 1`, given the
    /// Action's priority. `Critical` Actions never back off. The jitter
    /// applied is a deterministic function of `attempt`, not of wall-clock
    /// entropy, so the same attempt number always yields the same delay.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32, priority: Priority) -> Duration {
        if matches!(priority, Priority::Critical) {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1);
        #[allow(clippy::cast_precision_loss)]
        let base_ms = (self.initial.as_millis() as f64) * self.multiplier.powi(exponent as i32);
        let base = Duration::from_millis(base_ms.min(self.max.as_millis() as f64) as u64);

        let mut rng = StdRng::seed_from_u64(u64::from(attempt));
        let jitter_frac: f64 = rng.gen_range(0.0..=0.25);
        #[allow(clippy::cast_precision_loss)]
        let jittered_ms = (base.as_millis() as f64) * (1.0 + jitter_frac);
        Duration::from_millis(jittered_ms.min(self.max.as_millis() as f64) as u64).min(self.max)
    }
}
