// SPDX-License-Identifier: Apache-2.0
//! Heartbeat-derived liveness classification (spec.md §4.6).

use std::time::Duration;

/// Default interval a worker is expected to heartbeat at.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Liveness state derived from heartbeat recency.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthState {
    /// Heartbeating within one missed interval.
    Healthy,
    /// Missed two consecutive heartbeat intervals.
    Degraded,
    /// Missed five consecutive heartbeat intervals.
    Unreachable,
    /// Missed ten consecutive heartbeat intervals; treated as lost.
    Failed,
}

/// Classify `elapsed` time since the last heartbeat against `interval`
/// (spec.md §4.6: "a worker missing two intervals is Degraded; missing
/// five is Unreachable; missing ten is Failed").
#[must_use]
pub fn classify(elapsed: Duration, interval: Duration) -> HealthState {
    if interval.is_zero() {
        return HealthState::Healthy;
    }
    let missed = elapsed.as_secs_f64() / interval.as_secs_f64();
    if missed >= 10.0 {
        HealthState::Failed
    } else if missed >= 5.0 {
        HealthState::Unreachable
    } else if missed >= 2.0 {
        HealthState::Degraded
    } else {
        HealthState::Healthy
    }
}
