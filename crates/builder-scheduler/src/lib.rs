// SPDX-License-Identifier: Apache-2.0
//! Single-host scheduler: per-Action state machine, priority-aware ready
//! queue, critical-path priority scoring, and retry policy with failure
//! propagation (spec.md §4.5).
//!
//! This crate schedules within one process; `builder-coordinator` layers
//! worker dispatch on top of the same [`Scheduler`] for the distributed
//! case — the state machine and retry/propagation semantics are shared
//! between the single-host and distributed paths.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::missing_const_for_fn,
    clippy::multiple_crate_versions
)]

mod priority;
mod queue;
mod retry;
mod state;

pub use priority::{score as critical_path_score, CriticalPathInputs, DEFAULT_DURATION_ESTIMATE};
pub use queue::ReadyQueue;
pub use retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
pub use state::ActionState;

use builder_graph::{ActionId, Priority};
use std::collections::HashMap;
use std::time::Duration;
use tracing::instrument;

/// Errors raised by [`Scheduler`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
    /// The referenced Action was never registered.
    #[error("[SCHED_UNKNOWN_ACTION] action not registered")]
    UnknownAction,
    /// The requested state transition is not legal from the Action's
    /// current state.
    #[error("[SCHED_INVALID_TRANSITION] from {from:?} to {to:?}")]
    InvalidTransition {
        /// Current state.
        from: ActionState,
        /// Attempted next state.
        to: ActionState,
    },
}

/// Outcome of reporting a failed execution attempt via
/// [`Scheduler::report_failure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Retry budget remains; the Action returned to `Ready` and was
    /// re-queued. The caller should wait `backoff` before the next
    /// dispatch is observed (the Action is already queued; this is purely
    /// informational for callers that want to delay their own dispatch
    /// loop rather than busy-poll).
    Retry {
        /// Backoff to honor before this Action is expected to run again.
        backoff: Duration,
        /// 1-based attempt number that just failed.
        attempt: u32,
    },
    /// Retry budget exhausted; the Action is permanently `Failed` and
    /// every transitive dependent has been atomically transitioned to
    /// `Failed` without ever having executed (spec.md §4.5).
    Permanent {
        /// Transitive dependents marked `Failed` as a result.
        doomed_dependents: Vec<ActionId>,
    },
}

struct Entry {
    state: ActionState,
    priority: Priority,
    deps: Vec<ActionId>,
    dependents: Vec<ActionId>,
    pending_deps: usize,
    attempt: u32,
}

/// Single-host scheduler over a fixed set of registered Actions.
///
/// All per-Action bookkeeping lives behind one `parking_lot::Mutex` so that
/// failure propagation to transitive dependents (spec.md §4.5: "reported
/// atomically so the scheduler does not continue dispatching doomed work")
/// is observed consistently by every caller; the [`ReadyQueue`] itself has
/// its own finer-grained lock and is mutated outside the entries lock to
/// keep the critical section that guards state transitions small.
pub struct Scheduler {
    entries: parking_lot::Mutex<HashMap<ActionId, Entry>>,
    queue: ReadyQueue,
    retry_policy: RetryPolicy,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

impl Scheduler {
    /// Construct an empty scheduler with the given retry policy.
    #[must_use]
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self {
            entries: parking_lot::Mutex::new(HashMap::new()),
            queue: ReadyQueue::new(),
            retry_policy,
        }
    }

    /// Register an Action with its (already-registered) dependencies and
    /// priority. Actions must be registered in dependency order (a dep
    /// must be registered before anything that depends on it) so its
    /// `dependents` list can be threaded through.
    ///
    /// An Action with no pending dependencies becomes `Ready` immediately
    /// and is enqueued.
    #[instrument(skip(self))]
    pub fn register(&self, id: ActionId, deps: &[ActionId], priority: Priority) {
        let mut entries = self.entries.lock();
        let pending_deps = deps
            .iter()
            .filter(|dep| !matches!(entries.get(dep).map(|e| e.state), Some(ActionState::Completed)))
            .count();

        for dep in deps {
            if let Some(dep_entry) = entries.get_mut(dep) {
                dep_entry.dependents.push(id);
            }
        }

        let state = if pending_deps == 0 { ActionState::Ready } else { ActionState::Pending };
        entries.insert(
            id,
            Entry {
                state,
                priority,
                deps: deps.to_vec(),
                dependents: Vec::new(),
                pending_deps,
                attempt: 0,
            },
        );
        drop(entries);

        if state == ActionState::Ready {
            self.queue.push(id, priority);
        }
    }

    /// Current state of `id`, if registered.
    #[must_use]
    pub fn state_of(&self, id: ActionId) -> Option<ActionState> {
        self.entries.lock().get(&id).map(|e| e.state)
    }

    /// Number of Actions currently queued and ready for dispatch.
    #[must_use]
    pub fn ready_len(&self) -> usize {
        self.queue.len()
    }

    /// Dequeue the next ready Action in priority order, transitioning it
    /// `Ready` → `Scheduled`.
    pub fn dequeue(&self) -> Option<ActionId> {
        let id = self.queue.pop()?;
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&id) {
            entry.state = ActionState::Scheduled;
        }
        Some(id)
    }

    /// Acknowledge dispatch: `Scheduled` → `Executing`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownAction`] if `id` was never
    /// registered, or [`SchedulerError::InvalidTransition`] if `id` is not
    /// currently `Scheduled`.
    pub fn mark_executing(&self, id: ActionId) -> Result<(), SchedulerError> {
        self.transition(id, ActionState::Executing)
    }

    /// Report successful completion: `Executing` → `Completed`, and
    /// advance every dependent whose last pending dependency this was.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownAction`] or
    /// [`SchedulerError::InvalidTransition`] as for [`Self::mark_executing`].
    #[instrument(skip(self))]
    pub fn report_success(&self, id: ActionId) -> Result<(), SchedulerError> {
        self.transition(id, ActionState::Completed)?;
        let newly_ready = {
            let mut entries = self.entries.lock();
            let dependents = entries.get(&id).map(|e| e.dependents.clone()).unwrap_or_default();
            let mut newly_ready = Vec::new();
            for dependent in dependents {
                if let Some(entry) = entries.get_mut(&dependent) {
                    if entry.state == ActionState::Pending {
                        entry.pending_deps = entry.pending_deps.saturating_sub(1);
                        if entry.pending_deps == 0 {
                            entry.state = ActionState::Ready;
                            newly_ready.push((dependent, entry.priority));
                        }
                    }
                }
            }
            newly_ready
        };
        for (dependent, priority) in newly_ready {
            self.queue.push(dependent, priority);
        }
        Ok(())
    }

    /// Report a failed execution attempt. Retries up to the configured
    /// policy; on exhaustion, transitions `id` and every transitive
    /// dependent to `Failed` atomically, dequeuing any of them that were
    /// still queued.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownAction`] if `id` was never
    /// registered.
    #[instrument(skip(self))]
    pub fn report_failure(&self, id: ActionId) -> Result<FailureOutcome, SchedulerError> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&id).ok_or(SchedulerError::UnknownAction)?;
        entry.attempt += 1;
        let attempt = entry.attempt;
        let priority = entry.priority;

        if self.retry_policy.has_budget(attempt) {
            entry.state = ActionState::Ready;
            drop(entries);
            self.queue.push(id, priority);
            return Ok(FailureOutcome::Retry {
                backoff: self.retry_policy.backoff_for(attempt, priority),
                attempt,
            });
        }

        entry.state = ActionState::Failed;
        let doomed = collect_transitive_dependents(&entries, id);
        for &doomed_id in &doomed {
            if let Some(doomed_entry) = entries.get_mut(&doomed_id) {
                if !doomed_entry.state.is_terminal() {
                    doomed_entry.state = ActionState::Failed;
                }
            }
        }
        drop(entries);

        for &doomed_id in &doomed {
            self.queue.remove(doomed_id);
        }

        Ok(FailureOutcome::Permanent { doomed_dependents: doomed })
    }

    /// Cancel `id`: if queued or pending, it is simply discarded; if
    /// dispatched, the caller (coordinator/worker) is responsible for
    /// terminating the in-flight process before calling this. Terminal
    /// states are left unchanged (cancellation never retries).
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownAction`] if `id` was never
    /// registered.
    pub fn cancel(&self, id: ActionId) -> Result<(), SchedulerError> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&id).ok_or(SchedulerError::UnknownAction)?;
        if entry.state.is_terminal() {
            return Ok(());
        }
        entry.state = ActionState::Cancelled;
        drop(entries);
        self.queue.remove(id);
        Ok(())
    }

    fn transition(&self, id: ActionId, next: ActionState) -> Result<(), SchedulerError> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&id).ok_or(SchedulerError::UnknownAction)?;
        if !entry.state.can_transition_to(next) {
            return Err(SchedulerError::InvalidTransition { from: entry.state, to: next });
        }
        entry.state = next;
        Ok(())
    }
}

/// DFS over `dependents` edges collecting every transitive dependent of
/// `root` (not including `root` itself).
fn collect_transitive_dependents(entries: &HashMap<ActionId, Entry>, root: ActionId) -> Vec<ActionId> {
    let mut visited = std::collections::HashSet::new();
    let mut stack = entries.get(&root).map(|e| e.dependents.clone()).unwrap_or_default();
    let mut out = Vec::new();
    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        out.push(id);
        if let Some(entry) = entries.get(&id) {
            stack.extend(entry.dependents.iter().copied());
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use builder_fingerprint::hash_bytes;

    fn id(tag: &str) -> ActionId {
        ActionId(hash_bytes(tag.as_bytes()))
    }

    #[test]
    fn leaf_action_with_no_deps_is_ready_immediately() {
        let scheduler = Scheduler::default();
        scheduler.register(id("a"), &[], Priority::Normal);
        assert_eq!(scheduler.state_of(id("a")), Some(ActionState::Ready));
        assert_eq!(scheduler.ready_len(), 1);
    }

    #[test]
    fn scenario_s2_dependent_never_starts_when_dependency_fails() {
        let scheduler = Scheduler::default();
        scheduler.register(id("b"), &[], Priority::Normal);
        scheduler.register(id("a"), &[id("b")], Priority::Normal);
        assert_eq!(scheduler.state_of(id("a")), Some(ActionState::Pending));

        let b = scheduler.dequeue().unwrap();
        assert_eq!(b, id("b"));
        scheduler.mark_executing(b).unwrap();
        for _ in 0..DEFAULT_MAX_ATTEMPTS {
            let outcome = scheduler.report_failure(b);
            if let Ok(FailureOutcome::Permanent { doomed_dependents }) = outcome {
                assert_eq!(doomed_dependents, vec![id("a")]);
            }
            scheduler.mark_executing_if_retrying(b);
        }
        assert_eq!(scheduler.state_of(id("b")), Some(ActionState::Failed));
        assert_eq!(scheduler.state_of(id("a")), Some(ActionState::Failed));
        // a never became Ready/Scheduled/Executing.
        assert!(scheduler.dequeue().is_none());
    }

    impl Scheduler {
        fn mark_executing_if_retrying(&self, id: ActionId) {
            if self.state_of(id) == Some(ActionState::Ready) {
                let popped = self.dequeue();
                assert_eq!(popped, Some(id));
                self.mark_executing(id).unwrap();
            }
        }
    }

    #[test]
    fn dependency_order_resolves_dependent_to_ready_on_success() {
        let scheduler = Scheduler::default();
        scheduler.register(id("b"), &[], Priority::Normal);
        scheduler.register(id("a"), &[id("b")], Priority::Normal);

        let b = scheduler.dequeue().unwrap();
        scheduler.mark_executing(b).unwrap();
        scheduler.report_success(b).unwrap();

        assert_eq!(scheduler.state_of(id("a")), Some(ActionState::Ready));
        assert_eq!(scheduler.dequeue(), Some(id("a")));
    }

    #[test]
    fn diamond_dependency_waits_for_all_parents() {
        let scheduler = Scheduler::default();
        scheduler.register(id("left"), &[], Priority::Normal);
        scheduler.register(id("right"), &[], Priority::Normal);
        scheduler.register(id("top"), &[id("left"), id("right")], Priority::Normal);

        let left = scheduler.dequeue().unwrap();
        scheduler.mark_executing(left).unwrap();
        scheduler.report_success(left).unwrap();
        assert_eq!(scheduler.state_of(id("top")), Some(ActionState::Pending));

        let right = scheduler.dequeue().unwrap();
        scheduler.mark_executing(right).unwrap();
        scheduler.report_success(right).unwrap();
        assert_eq!(scheduler.state_of(id("top")), Some(ActionState::Ready));
    }

    #[test]
    fn cancellation_is_terminal_and_frees_the_queue_slot() {
        let scheduler = Scheduler::default();
        scheduler.register(id("a"), &[], Priority::Normal);
        scheduler.cancel(id("a")).unwrap();
        assert_eq!(scheduler.state_of(id("a")), Some(ActionState::Cancelled));
        assert!(scheduler.dequeue().is_none());
    }

    #[test]
    fn cancellation_of_terminal_state_is_a_noop() {
        let scheduler = Scheduler::default();
        scheduler.register(id("a"), &[], Priority::Normal);
        let a = scheduler.dequeue().unwrap();
        scheduler.mark_executing(a).unwrap();
        scheduler.report_success(a).unwrap();
        scheduler.cancel(a).unwrap();
        assert_eq!(scheduler.state_of(a), Some(ActionState::Completed));
    }

    #[test]
    fn unknown_action_operations_error() {
        let scheduler = Scheduler::default();
        assert_eq!(scheduler.mark_executing(id("ghost")), Err(SchedulerError::UnknownAction));
        assert_eq!(scheduler.cancel(id("ghost")), Err(SchedulerError::UnknownAction));
    }

    #[test]
    fn retry_within_budget_requeues_and_reports_backoff() {
        let scheduler = Scheduler::default();
        scheduler.register(id("a"), &[], Priority::Normal);
        let a = scheduler.dequeue().unwrap();
        scheduler.mark_executing(a).unwrap();
        let outcome = scheduler.report_failure(a).unwrap();
        assert!(matches!(outcome, FailureOutcome::Retry { attempt: 1, .. }));
        assert_eq!(scheduler.state_of(a), Some(ActionState::Ready));
    }
}
