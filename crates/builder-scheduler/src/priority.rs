// SPDX-License-Identifier: Apache-2.0
//! Critical-path priority scoring (spec.md §4.5, §9).
//!
//! The source's placeholder scorer always returned 0 for depth and
//! dependents (spec.md §9 Open Question). Here both are computed from the
//! same arena traversal `builder-graph::BuildGraph` already performs for
//! cycle detection: `depth` is the longest dependency-chain reachable
//! *from* a target (`BuildGraph::depth_from`), `fan_out` is its transitive
//! dependent count (`BuildGraph::transitive_dependents`). Historical
//! duration estimate is supplied by the caller (looked up from the action
//! cache's persisted metadata map in production; defaults to 1s per
//! spec.md when no history exists).

use std::time::Duration;

/// Default duration assumed for an Action with no recorded history.
pub const DEFAULT_DURATION_ESTIMATE: Duration = Duration::from_secs(1);

/// Inputs to the critical-path priority score for one Action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CriticalPathInputs {
    /// Longest dependency-chain depth reachable from this Action.
    pub depth: usize,
    /// Transitive dependent count (how much work is blocked on this one).
    pub fan_out: usize,
    /// Historical duration estimate, in milliseconds (1000 if unknown).
    pub duration_estimate_ms: u64,
}

/// Score `inputs` for ready-queue ordering purposes.
///
/// Weighted sum: depth and fan-out both widen the set of work blocked
/// behind this Action, so they're weighted equally and heavily; the
/// duration estimate contributes a smaller tiebreaking term so that, among
/// Actions of equal graph shape, the historically slower one sorts first
/// (starting the long pole earlier shortens the makespan). This is a
/// same-priority-band tiebreaker only — it does not cross `Priority` band
/// boundaries, which [`crate::ReadyQueue`] always honors first.
#[must_use]
pub fn score(inputs: CriticalPathInputs) -> u64 {
    let depth_term = (inputs.depth as u64).saturating_mul(100);
    let fan_out_term = (inputs.fan_out as u64).saturating_mul(100);
    let duration_term = inputs.duration_estimate_ms / 100;
    depth_term.saturating_add(fan_out_term).saturating_add(duration_term)
}
