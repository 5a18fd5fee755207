// SPDX-License-Identifier: Apache-2.0
//! Priority-aware ready queue (spec.md §4.5).
//!
//! `Critical`/`High` Actions are dispatched ahead of `Normal`/`Low`; within
//! one priority band, FIFO order is preserved. Implemented as four
//! independent `VecDeque`s (one per [`Priority`] band) behind a single
//! `parking_lot::Mutex` rather than one combined deque with head/tail
//! insertion — equivalent dequeue order, simpler to reason about, and in
//! keeping with spec.md §9's "small, explicit, fine-grained locks"
//! guidance over a lock-free structure this workload doesn't need.

use builder_graph::{ActionId, Priority};
use parking_lot::Mutex;
use std::collections::VecDeque;

#[derive(Default)]
struct Bands {
    critical: VecDeque<ActionId>,
    high: VecDeque<ActionId>,
    normal: VecDeque<ActionId>,
    low: VecDeque<ActionId>,
}

impl Bands {
    fn band_mut(&mut self, priority: Priority) -> &mut VecDeque<ActionId> {
        match priority {
            Priority::Critical => &mut self.critical,
            Priority::High => &mut self.high,
            Priority::Normal => &mut self.normal,
            Priority::Low => &mut self.low,
        }
    }
}

/// A priority-aware FIFO ready queue of [`ActionId`]s.
pub struct ReadyQueue {
    bands: Mutex<Bands>,
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyQueue {
    /// An empty ready queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bands: Mutex::new(Bands::default()),
        }
    }

    /// Enqueue `id` at the tail of its priority band.
    pub fn push(&self, id: ActionId, priority: Priority) {
        self.bands.lock().band_mut(priority).push_back(id);
    }

    /// Dequeue the next Action in priority order (`Critical` > `High` >
    /// `Normal` > `Low`), FIFO within a band.
    pub fn pop(&self) -> Option<ActionId> {
        let mut bands = self.bands.lock();
        bands
            .critical
            .pop_front()
            .or_else(|| bands.high.pop_front())
            .or_else(|| bands.normal.pop_front())
            .or_else(|| bands.low.pop_front())
    }

    /// Remove `id` from whichever band it's queued in, if any. Used when a
    /// dependency fails and transitively dooms a still-queued Action, or
    /// when a queued Action is cancelled.
    pub fn remove(&self, id: ActionId) -> bool {
        let mut bands = self.bands.lock();
        for band in [&mut bands.critical, &mut bands.high, &mut bands.normal, &mut bands.low] {
            if let Some(pos) = band.iter().position(|queued| *queued == id) {
                band.remove(pos);
                return true;
            }
        }
        false
    }

    /// Total number of queued Actions across all bands.
    #[must_use]
    pub fn len(&self) -> usize {
        let bands = self.bands.lock();
        bands.critical.len() + bands.high.len() + bands.normal.len() + bands.low.len()
    }

    /// Whether no Actions are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
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
    fn critical_and_high_dispatch_before_normal_and_low() {
        let queue = ReadyQueue::new();
        queue.push(id("n1"), Priority::Normal);
        queue.push(id("l1"), Priority::Low);
        queue.push(id("c1"), Priority::Critical);
        queue.push(id("h1"), Priority::High);

        assert_eq!(queue.pop(), Some(id("c1")));
        assert_eq!(queue.pop(), Some(id("h1")));
        assert_eq!(queue.pop(), Some(id("n1")));
        assert_eq!(queue.pop(), Some(id("l1")));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn fifo_within_one_band() {
        let queue = ReadyQueue::new();
        queue.push(id("n1"), Priority::Normal);
        queue.push(id("n2"), Priority::Normal);
        queue.push(id("n3"), Priority::Normal);
        assert_eq!(queue.pop(), Some(id("n1")));
        assert_eq!(queue.pop(), Some(id("n2")));
        assert_eq!(queue.pop(), Some(id("n3")));
    }

    #[test]
    fn remove_drops_a_queued_entry_from_any_band() {
        let queue = ReadyQueue::new();
        queue.push(id("h1"), Priority::High);
        queue.push(id("h2"), Priority::High);
        assert!(queue.remove(id("h1")));
        assert_eq!(queue.pop(), Some(id("h2")));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn remove_of_absent_id_returns_false() {
        let queue = ReadyQueue::new();
        assert!(!queue.remove(id("ghost")));
    }

    #[test]
    fn len_and_is_empty_track_total_across_bands() {
        let queue = ReadyQueue::new();
        assert!(queue.is_empty());
        queue.push(id("c1"), Priority::Critical);
        queue.push(id("n1"), Priority::Normal);
        assert_eq!(queue.len(), 2);
        assert!(!queue.is_empty());
    }

    #[test]
    fn scenario_s3_priority_respected_on_single_worker() {
        // S3: schedule H (Critical) and N1..N4 (Normal); observed order is H, N1..N4.
        let queue = ReadyQueue::new();
        queue.push(id("n1"), Priority::Normal);
        queue.push(id("n2"), Priority::Normal);
        queue.push(id("n3"), Priority::Normal);
        queue.push(id("n4"), Priority::Normal);
        queue.push(id("h"), Priority::Critical);

        let order: Vec<ActionId> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(order, vec![id("h"), id("n1"), id("n2"), id("n3"), id("n4")]);
    }
}
