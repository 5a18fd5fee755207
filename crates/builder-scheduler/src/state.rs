// SPDX-License-Identifier: Apache-2.0
//! Per-Action state machine (spec.md §4.5).

/// Where one Action sits in its execution lifecycle.
///
/// Transitions: `Pending` → `Ready` (all deps `Completed`) → `Scheduled`
/// (dispatched to a worker) → `Executing` (worker ack) → `Completed` |
/// `Failed` (permanent, retries exhausted) | back to `Ready` (retriable
/// failure). `Cancelled` is reachable from any non-terminal state and is
/// itself terminal and never retried (spec.md §5).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionState {
    /// Waiting on one or more dependency Actions to complete.
    Pending,
    /// Every dependency has completed; eligible for dispatch.
    Ready,
    /// Dispatched to a worker, awaiting execution acknowledgement.
    Scheduled,
    /// Acknowledged by a worker and currently running.
    Executing,
    /// Finished successfully.
    Completed,
    /// Exhausted its retry budget, or a dependency failed — terminal.
    Failed,
    /// Cancelled before completion — terminal, never retried.
    Cancelled,
}

impl ActionState {
    /// Whether this state is terminal (no further transitions are legal).
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a legal transition exists from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Ready | Self::Failed | Self::Cancelled) => true,
            (Self::Ready, Self::Scheduled | Self::Failed | Self::Cancelled) => true,
            (Self::Scheduled, Self::Executing | Self::Ready | Self::Failed | Self::Cancelled) => true,
            (Self::Executing, Self::Completed | Self::Ready | Self::Failed | Self::Cancelled) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_exactly_completed_failed_cancelled() {
        assert!(ActionState::Completed.is_terminal());
        assert!(ActionState::Failed.is_terminal());
        assert!(ActionState::Cancelled.is_terminal());
        assert!(!ActionState::Pending.is_terminal());
        assert!(!ActionState::Ready.is_terminal());
        assert!(!ActionState::Scheduled.is_terminal());
        assert!(!ActionState::Executing.is_terminal());
    }

    #[test]
    fn happy_path_transitions_are_legal() {
        assert!(ActionState::Pending.can_transition_to(ActionState::Ready));
        assert!(ActionState::Ready.can_transition_to(ActionState::Scheduled));
        assert!(ActionState::Scheduled.can_transition_to(ActionState::Executing));
        assert!(ActionState::Executing.can_transition_to(ActionState::Completed));
    }

    #[test]
    fn retriable_failure_returns_to_ready() {
        assert!(ActionState::Executing.can_transition_to(ActionState::Ready));
        assert!(ActionState::Scheduled.can_transition_to(ActionState::Ready));
    }

    #[test]
    fn terminal_states_accept_no_further_transitions() {
        assert!(!ActionState::Completed.can_transition_to(ActionState::Ready));
        assert!(!ActionState::Failed.can_transition_to(ActionState::Executing));
        assert!(!ActionState::Cancelled.can_transition_to(ActionState::Pending));
    }

    #[test]
    fn cancellation_reachable_from_every_non_terminal_state() {
        for state in [ActionState::Pending, ActionState::Ready, ActionState::Scheduled, ActionState::Executing] {
            assert!(state.can_transition_to(ActionState::Cancelled));
        }
    }
}
