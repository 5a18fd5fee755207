// SPDX-License-Identifier: Apache-2.0
//! Worker registry: the coordinator's view of every known worker (spec.md
//! §3 `WorkerEntry`). Backed by a `DashMap` for lock-free, read-mostly
//! access (spec.md §9: "prefer lock-free read-mostly maps for registries
//! ... not generic mutexes around every access").

use crate::health::{self, HealthState, HEARTBEAT_INTERVAL};
use builder_graph::ActionId;
use builder_proto::{Capabilities, LoadMetrics, WorkerId};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// One worker's registration and live state (spec.md §3).
#[derive(Clone, Debug)]
pub struct WorkerEntry {
    /// This worker's identity.
    pub worker_id: WorkerId,
    /// Address the worker listens on for dispatch.
    pub address: String,
    /// What this worker can do, matched against an Action's requirements.
    pub capabilities: Capabilities,
    /// Liveness state, refreshed by [`WorkerRegistry::sweep_health`].
    pub health: HealthState,
    /// Most recently reported load.
    pub load: LoadMetrics,
    /// Actions this worker is currently executing.
    pub in_progress: HashSet<ActionId>,
    /// Wall-clock instant of the last accepted heartbeat.
    pub last_heartbeat: Instant,
    last_heartbeat_seq: u64,
}

/// Registry of every worker the coordinator has ever announced, keyed by
/// [`WorkerId`]. Mutations go through its own entry lock (via `DashMap`);
/// readers may take an independent [`Self::snapshot`] without blocking
/// writers for long (spec.md §5: "read operations may take snapshots").
#[derive(Default)]
pub struct WorkerRegistry {
    workers: DashMap<WorkerId, WorkerEntry>,
    next_id: AtomicU64,
}

impl WorkerRegistry {
    /// Construct an empty registry. Worker ids are minted starting at 1;
    /// id 0 stays reserved for the coordinator itself (spec.md §3).
    #[must_use]
    pub fn new() -> Self {
        Self { workers: DashMap::new(), next_id: AtomicU64::new(1) }
    }

    /// Register a new worker, or re-announce an existing one on capability
    /// change, returning its (possibly freshly-minted) [`WorkerId`].
    pub fn announce(&self, requested: Option<WorkerId>, address: String, capabilities: Capabilities) -> WorkerId {
        let id = requested.unwrap_or_else(|| WorkerId(self.next_id.fetch_add(1, Ordering::Relaxed)));
        self.workers
            .entry(id)
            .and_modify(|entry| {
                entry.address = address.clone();
                entry.capabilities = capabilities.clone();
                entry.health = HealthState::Healthy;
                entry.last_heartbeat = Instant::now();
            })
            .or_insert_with(|| WorkerEntry {
                worker_id: id,
                address,
                capabilities,
                health: HealthState::Healthy,
                load: LoadMetrics { cpu_usage: 0.0, mem_usage: 0.0, disk_usage: 0.0, queue_depth: 0, active_actions: 0 },
                in_progress: HashSet::new(),
                last_heartbeat: Instant::now(),
                last_heartbeat_seq: 0,
            });
        id
    }

    /// Apply a heartbeat from `id`. Heartbeats are monotonic per worker
    /// (spec.md §5); a `seq` no newer than the last-applied one is
    /// discarded and `false` is returned. Returns `false` if `id` is not
    /// registered.
    pub fn apply_heartbeat(
        &self,
        id: WorkerId,
        seq: u64,
        load: LoadMetrics,
        in_progress: impl IntoIterator<Item = ActionId>,
    ) -> bool {
        let Some(mut entry) = self.workers.get_mut(&id) else {
            return false;
        };
        if seq != 0 && seq <= entry.last_heartbeat_seq {
            return false;
        }
        entry.last_heartbeat_seq = seq;
        entry.last_heartbeat = Instant::now();
        entry.load = load;
        entry.in_progress = in_progress.into_iter().collect();
        entry.health = HealthState::Healthy;
        true
    }

    /// Re-evaluate health for every worker against the default heartbeat
    /// interval, returning the ids of workers that transitioned into
    /// `Failed` during this sweep (candidates for reclaim).
    pub fn sweep_health(&self) -> Vec<WorkerId> {
        let mut newly_failed = Vec::new();
        for mut entry in self.workers.iter_mut() {
            let next = health::classify(entry.last_heartbeat.elapsed(), HEARTBEAT_INTERVAL);
            if next == HealthState::Failed && entry.health != HealthState::Failed {
                newly_failed.push(entry.worker_id);
            }
            entry.health = next;
        }
        newly_failed
    }

    /// Point-in-time copy of every registered worker, for dispatch
    /// decisions that must not hold the registry's internal locks while
    /// scoring candidates.
    #[must_use]
    pub fn snapshot(&self) -> Vec<WorkerEntry> {
        self.workers.iter().map(|entry| entry.clone()).collect()
    }

    /// Look up one worker's current entry.
    #[must_use]
    pub fn get(&self, id: WorkerId) -> Option<WorkerEntry> {
        self.workers.get(&id).map(|entry| entry.clone())
    }

    /// Record that `id` has been dispatched `action`.
    pub fn mark_dispatched(&self, id: WorkerId, action: ActionId) {
        if let Some(mut entry) = self.workers.get_mut(&id) {
            entry.in_progress.insert(action);
        }
    }

    /// Record that `id` finished `action` (success, failure, or cancellation).
    pub fn mark_finished(&self, id: WorkerId, action: ActionId) {
        if let Some(mut entry) = self.workers.get_mut(&id) {
            entry.in_progress.remove(&action);
        }
    }

    /// Remove a worker from the registry entirely, returning its last
    /// known entry (e.g. so the caller can reclaim its in-progress work).
    pub fn remove(&self, id: WorkerId) -> Option<WorkerEntry> {
        self.workers.remove(&id).map(|(_, entry)| entry)
    }

    /// Number of currently registered workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether the registry holds no workers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn caps() -> Capabilities {
        Capabilities {
            os: "linux".into(),
            arch: "x86_64".into(),
            max_memory_bytes: 1 << 30,
            max_cpu_cores: 4,
            allowed_read_roots: vec![],
            allowed_write_roots: vec![],
            allow_network: false,
        }
    }

    fn action(tag: &str) -> ActionId {
        ActionId(builder_fingerprint::hash_bytes(tag.as_bytes()))
    }

    #[test]
    fn announce_mints_sequential_ids_when_unspecified() {
        let registry = WorkerRegistry::new();
        let a = registry.announce(None, "10.0.0.1:9001".into(), caps());
        let b = registry.announce(None, "10.0.0.2:9001".into(), caps());
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn re_announce_updates_existing_entry_in_place() {
        let registry = WorkerRegistry::new();
        let id = registry.announce(Some(WorkerId(7)), "a:1".into(), caps());
        registry.announce(Some(id), "b:2".into(), caps());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(id).unwrap().address, "b:2");
    }

    #[test]
    fn out_of_order_heartbeat_is_discarded() {
        let registry = WorkerRegistry::new();
        let id = registry.announce(Some(WorkerId(1)), "a:1".into(), caps());
        let load = LoadMetrics { cpu_usage: 0.5, mem_usage: 0.2, disk_usage: 0.0, queue_depth: 1, active_actions: 1 };
        assert!(registry.apply_heartbeat(id, 5, load, []));
        assert!(!registry.apply_heartbeat(id, 3, load, []));
        assert_eq!(registry.get(id).unwrap().load.cpu_usage, 0.5);
    }

    #[test]
    fn unregistered_worker_heartbeat_is_rejected() {
        let registry = WorkerRegistry::new();
        let load = LoadMetrics { cpu_usage: 0.0, mem_usage: 0.0, disk_usage: 0.0, queue_depth: 0, active_actions: 0 };
        assert!(!registry.apply_heartbeat(WorkerId(99), 1, load, []));
    }

    #[test]
    fn mark_dispatched_and_finished_round_trip() {
        let registry = WorkerRegistry::new();
        let id = registry.announce(Some(WorkerId(1)), "a:1".into(), caps());
        registry.mark_dispatched(id, action("x"));
        assert!(registry.get(id).unwrap().in_progress.contains(&action("x")));
        registry.mark_finished(id, action("x"));
        assert!(registry.get(id).unwrap().in_progress.is_empty());
    }

    #[test]
    fn remove_returns_last_known_entry() {
        let registry = WorkerRegistry::new();
        let id = registry.announce(Some(WorkerId(1)), "a:1".into(), caps());
        registry.mark_dispatched(id, action("x"));
        let removed = registry.remove(id).unwrap();
        assert_eq!(removed.in_progress.len(), 1);
        assert!(registry.is_empty());
    }
}
