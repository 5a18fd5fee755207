// SPDX-License-Identifier: Apache-2.0
//! Worker dispatch: capability matching, load-factor tiebreak, and
//! work-stealing redirection (spec.md §4.7).

use crate::health::HealthState;
use crate::registry::WorkerEntry;
use builder_graph::ResourceLimits;
use builder_proto::WorkerId;

/// Load factor above which the primary dispatch choice is considered
/// overloaded and a work-stealing redirect is attempted.
pub const STEAL_OVERLOAD_THRESHOLD: f32 = 0.8;
/// Load factor a peer must be under to accept stolen work.
pub const STEAL_UNDERLOAD_THRESHOLD: f32 = 0.5;

/// Whether `worker` can run an Action with the given resource ceilings:
/// it must be `Healthy` and must not be asked for more memory or CPU
/// cores than it advertises in its [`builder_proto::Capabilities`].
#[must_use]
pub fn satisfies(worker: &WorkerEntry, resources: &ResourceLimits) -> bool {
    if worker.health != HealthState::Healthy {
        return false;
    }
    if let Some(mem) = resources.max_memory_bytes {
        if mem > worker.capabilities.max_memory_bytes {
            return false;
        }
    }
    if let Some(cores) = resources.max_cpu_cores {
        if cores > worker.capabilities.max_cpu_cores {
            return false;
        }
    }
    true
}

/// Pick a worker for an Action with the given resource ceilings from a
/// registry [`WorkerEntry`] snapshot.
///
/// The primary choice is the first eligible candidate in `candidates`'
/// own order — the caller's round-robin/affinity ordering, independent of
/// load. This matters: a primary chosen by lowest load can never itself be
/// found "overloaded" while a lower-loaded peer still exists (the minimum
/// of a set is, by construction, less than or equal to every other member),
/// which would make work-stealing permanently unreachable. Using the
/// caller's own ordering for the primary keeps that scenario real.
///
/// - If the primary is not overloaded (load factor ≤
///   [`STEAL_OVERLOAD_THRESHOLD`]), spec.md §4.7's "Tiebreak: lowest load
///   factor" applies directly: the eligible worker with the lowest load
///   factor overall is returned, not necessarily the primary itself.
/// - If the primary is overloaded and `steal_enabled`, dispatch redirects
///   to the first alive peer under [`STEAL_UNDERLOAD_THRESHOLD`] load, if
///   one exists among the other eligible candidates.
/// - Otherwise (overloaded, and stealing disabled or no underloaded peer),
///   the primary is returned as-is — degraded dispatch is still dispatch.
///
/// Returns `None` if no worker satisfies `resources` — a capability
/// mismatch the caller should surface as a `Worker` category error
/// (spec.md §7).
#[must_use]
pub fn pick_worker(candidates: &[WorkerEntry], resources: &ResourceLimits, steal_enabled: bool) -> Option<WorkerId> {
    let eligible: Vec<&WorkerEntry> = candidates.iter().filter(|worker| satisfies(worker, resources)).collect();
    let primary = *eligible.first()?;

    if primary.load.load_factor() > STEAL_OVERLOAD_THRESHOLD {
        if steal_enabled {
            if let Some(peer) = eligible
                .iter()
                .filter(|worker| worker.worker_id != primary.worker_id)
                .find(|worker| worker.load.load_factor() < STEAL_UNDERLOAD_THRESHOLD)
            {
                return Some(peer.worker_id);
            }
        }
        return Some(primary.worker_id);
    }

    eligible
        .iter()
        .min_by(|a, b| a.load.load_factor().partial_cmp(&b.load.load_factor()).unwrap_or(std::cmp::Ordering::Equal))
        .map(|worker| worker.worker_id)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use builder_proto::{Capabilities, LoadMetrics};
    use std::collections::HashSet;
    use std::time::Instant;

    fn worker(id: u64, load_factor: f32, health: HealthState, max_memory_bytes: u64, max_cpu_cores: u32) -> WorkerEntry {
        WorkerEntry {
            worker_id: WorkerId(id),
            address: format!("10.0.0.{id}:9001"),
            capabilities: Capabilities {
                os: "linux".into(),
                arch: "x86_64".into(),
                max_memory_bytes,
                max_cpu_cores,
                allowed_read_roots: vec![],
                allowed_write_roots: vec![],
                allow_network: false,
            },
            health,
            load: LoadMetrics {
                cpu_usage: load_factor,
                mem_usage: load_factor,
                disk_usage: 0.0,
                queue_depth: 0,
                active_actions: 0,
            },
            in_progress: HashSet::new(),
            last_heartbeat: Instant::now(),
        }
    }

    #[test]
    fn picks_the_lowest_load_eligible_worker() {
        let workers = vec![
            worker(1, 0.6, HealthState::Healthy, u64::MAX, 64),
            worker(2, 0.2, HealthState::Healthy, u64::MAX, 64),
        ];
        let picked = pick_worker(&workers, &ResourceLimits::default(), false);
        assert_eq!(picked, Some(WorkerId(2)));
    }

    #[test]
    fn excludes_unhealthy_workers() {
        let workers = vec![
            worker(1, 0.1, HealthState::Failed, u64::MAX, 64),
            worker(2, 0.5, HealthState::Healthy, u64::MAX, 64),
        ];
        let picked = pick_worker(&workers, &ResourceLimits::default(), false);
        assert_eq!(picked, Some(WorkerId(2)));
    }

    #[test]
    fn excludes_workers_below_required_resources() {
        let workers = vec![worker(1, 0.1, HealthState::Healthy, 1024, 1)];
        let resources = ResourceLimits { max_memory_bytes: Some(2048), ..ResourceLimits::default() };
        assert_eq!(pick_worker(&workers, &resources, false), None);
    }

    #[test]
    fn no_eligible_worker_is_a_capability_mismatch() {
        assert_eq!(pick_worker(&[], &ResourceLimits::default(), false), None);
    }

    #[test]
    fn overloaded_primary_redirects_to_underloaded_peer_when_stealing_enabled() {
        let workers = vec![
            worker(1, 0.95, HealthState::Healthy, u64::MAX, 64),
            worker(2, 0.4, HealthState::Healthy, u64::MAX, 64),
        ];
        let picked = pick_worker(&workers, &ResourceLimits::default(), true);
        assert_eq!(picked, Some(WorkerId(2)));
    }

    #[test]
    fn overloaded_primary_stays_primary_when_stealing_disabled() {
        let workers = vec![
            worker(1, 0.95, HealthState::Healthy, u64::MAX, 64),
            worker(2, 0.4, HealthState::Healthy, u64::MAX, 64),
        ];
        let picked = pick_worker(&workers, &ResourceLimits::default(), false);
        assert_eq!(picked, Some(WorkerId(1)));
    }

    #[test]
    fn overloaded_primary_with_no_underloaded_peer_stays_primary() {
        let workers = vec![
            worker(1, 0.95, HealthState::Healthy, u64::MAX, 64),
            worker(2, 0.6, HealthState::Healthy, u64::MAX, 64),
        ];
        let picked = pick_worker(&workers, &ResourceLimits::default(), true);
        assert_eq!(picked, Some(WorkerId(1)));
    }

    #[test]
    fn steal_redirects_away_from_an_overloaded_non_minimum_primary() {
        // The primary (worker 1, first in `candidates`) is neither the
        // lowest- nor the highest-loaded eligible worker here — proving the
        // redirect is reached through the primary's own overload, not
        // through `primary` coinciding with the global load minimum.
        let workers = vec![
            worker(1, 0.9, HealthState::Healthy, u64::MAX, 64),
            worker(2, 0.7, HealthState::Healthy, u64::MAX, 64),
            worker(3, 0.2, HealthState::Healthy, u64::MAX, 64),
        ];
        let picked = pick_worker(&workers, &ResourceLimits::default(), true);
        assert_eq!(picked, Some(WorkerId(3)));
    }
}
