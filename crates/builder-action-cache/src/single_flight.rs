// SPDX-License-Identifier: Apache-2.0
//! Single-flight coordination: at most one concurrent build per
//! [`ActionId`] (spec.md §4.2).
//!
//! Grounded on `cuenv`'s `ActionCache::execute_action` in-flight map
//! (`DashMap<String, Arc<Notify>>`): the first caller to register for an
//! `ActionId` gets `Pass` and is responsible for calling
//! [`super::ActionCache::commit`] or [`super::ActionCache::abort`]; every
//! other concurrent caller gets `Wait` and awaits the same `Notify`.

use builder_graph::ActionId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Notify;

/// Outcome of [`SingleFlight::begin`].
pub enum BeginOutcome {
    /// The caller is the sole executor for this `ActionId` and must call
    /// [`SingleFlight::finish`] when done (success or failure).
    Pass,
    /// Another caller is already building this `ActionId`; await the
    /// returned handle, then re-check the cache. `notify_waiters` (used by
    /// [`SingleFlight::finish`]) only wakes callers already polling
    /// `notified()` when it fires — it stores no permit for a late
    /// registration — so a caller must bound this wait with a timeout and
    /// retry `begin`/the cache lookup on expiry rather than trust a single
    /// delivery.
    Wait(Arc<Notify>),
}

/// Tracks in-flight builds by `ActionId`.
#[derive(Default)]
pub struct SingleFlight {
    in_flight: DashMap<ActionId, Arc<Notify>>,
}

impl SingleFlight {
    /// A single-flight tracker with no builds in progress.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in building `id`. Exactly one caller across all
    /// concurrent callers observes [`BeginOutcome::Pass`].
    pub fn begin(&self, id: ActionId) -> BeginOutcome {
        match self.in_flight.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(existing) => BeginOutcome::Wait(existing.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(Notify::new()));
                BeginOutcome::Pass
            }
        }
    }

    /// Release the slot for `id` and wake every waiter, whether the build
    /// succeeded or was aborted. Waiters are expected to re-check the
    /// cache afterward (a successful build populates it; an aborted one
    /// leaves it a miss).
    pub fn finish(&self, id: ActionId) {
        if let Some((_, notify)) = self.in_flight.remove(&id) {
            notify.notify_waiters();
        }
    }

    /// Whether `id` currently has a build in flight.
    #[must_use]
    pub fn is_in_flight(&self, id: ActionId) -> bool {
        self.in_flight.contains_key(&id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use builder_fingerprint::hash_bytes;
    use std::sync::Arc as StdArc;

    fn id(tag: &str) -> ActionId {
        ActionId(hash_bytes(tag.as_bytes()))
    }

    #[test]
    fn first_caller_passes_subsequent_callers_wait() {
        let sf = SingleFlight::new();
        assert!(matches!(sf.begin(id("a")), BeginOutcome::Pass));
        assert!(matches!(sf.begin(id("a")), BeginOutcome::Wait(_)));
    }

    #[test]
    fn finish_clears_in_flight_state() {
        let sf = SingleFlight::new();
        sf.begin(id("a"));
        assert!(sf.is_in_flight(id("a")));
        sf.finish(id("a"));
        assert!(!sf.is_in_flight(id("a")));
    }

    #[tokio::test]
    async fn waiter_is_woken_when_the_builder_finishes() {
        let sf = StdArc::new(SingleFlight::new());
        assert!(matches!(sf.begin(id("a")), BeginOutcome::Pass));

        let BeginOutcome::Wait(notify) = sf.begin(id("a")) else {
            unreachable!("second caller must wait");
        };
        let waiter_handle = tokio::spawn(async move {
            notify.notified().await;
        });

        // Give the spawned waiter a chance to register before waking it.
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        sf.finish(id("a"));
        waiter_handle.await.unwrap();
        assert!(!sf.is_in_flight(id("a")));
    }
}
