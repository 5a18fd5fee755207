// SPDX-License-Identifier: Apache-2.0
//! Coordinator state: ties [`crate::registry::WorkerRegistry`] and
//! `builder_scheduler::Scheduler` together with the outbound connection to
//! each worker, and drives dispatch and failure reclaim.

use crate::dispatch::pick_worker;
use crate::registry::WorkerRegistry;
use builder_graph::{Action, ActionId, ResourceLimits};
use builder_proto::{ActionRequest, ActionResultMsg, ActionStatus, Capabilities, Envelope, MessageId, Payload, WorkerId};
use builder_scheduler::{FailureOutcome, Scheduler};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{instrument, warn};

struct PendingAction {
    request: ActionRequest,
    resources: ResourceLimits,
}

/// Whether an attempted dispatch of one Action consumed it or left it
/// waiting for a future tick.
#[derive(Debug, PartialEq, Eq)]
enum DispatchAttempt {
    Dispatched,
    NoEligibleWorker,
}

/// Distributed coordinator state: the registry of known workers, the
/// shared scheduler, and the live outbound connection to each worker.
///
/// `builder-coordinator` does not parse Builderfiles or own a
/// `BuildGraph` itself — [`Self::submit`] is the seam a driver (the `builder`
/// CLI in distributed mode, or a test harness) uses to hand Actions to the
/// coordinator for remote execution once the caller has already resolved
/// dependency order locally.
pub struct Coordinator {
    registry: WorkerRegistry,
    scheduler: Scheduler,
    pending: DashMap<ActionId, PendingAction>,
    connections: DashMap<WorkerId, mpsc::Sender<Vec<u8>>>,
    stranded: Mutex<VecDeque<ActionId>>,
    next_message_id: AtomicU64,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new(Scheduler::default())
    }
}

impl Coordinator {
    /// Construct a coordinator over an empty worker registry and the given
    /// scheduler (callers that need a non-default retry policy construct
    /// their own `Scheduler`).
    #[must_use]
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            registry: WorkerRegistry::new(),
            scheduler,
            pending: DashMap::new(),
            connections: DashMap::new(),
            stranded: Mutex::new(VecDeque::new()),
            next_message_id: AtomicU64::new(1),
        }
    }

    /// Read-only access to the worker registry, e.g. for a `/status` report.
    #[must_use]
    pub const fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Hand an Action to the coordinator for remote dispatch, registering
    /// it with the scheduler under `deps` (which must already be
    /// registered) and `action.priority`.
    #[instrument(skip(self, action))]
    pub fn submit(&self, action: &Action, deps: &[ActionId]) -> ActionId {
        let id = action.compute_id();
        let request = ActionRequest {
            action_id: id,
            command: action.command.clone(),
            args: action.args.clone(),
            env: action.env.clone(),
            inputs: action.inputs.iter().map(|(path, artifact)| (path.to_string_lossy().into_owned(), *artifact)).collect(),
            outputs: action.outputs.iter().map(|path| path.to_string_lossy().into_owned()).collect(),
            walltime_ms: action.resources.walltime_ms,
            attempt: 1,
        };
        self.pending.insert(id, PendingAction { request, resources: action.resources.clone() });
        self.scheduler.register(id, deps, action.priority);
        id
    }

    /// Register (or re-register) a worker's live TCP connection, returning
    /// its assigned [`WorkerId`].
    pub fn connect_worker(&self, requested: Option<WorkerId>, address: String, capabilities: Capabilities, outbox: mpsc::Sender<Vec<u8>>) -> WorkerId {
        let id = self.registry.announce(requested, address, capabilities);
        self.connections.insert(id, outbox);
        id
    }

    /// Send a `Shutdown` request to every currently connected worker,
    /// asking it to drain in-flight work within `grace_ms` (spec.md §4.7:
    /// graceful shutdown). Best-effort: a worker whose outbox has already
    /// closed is skipped rather than treated as an error.
    pub fn broadcast_shutdown(&self, grace_ms: u64) {
        for entry in &self.connections {
            let envelope = Envelope::new(
                MessageId(self.next_message_id.fetch_add(1, Ordering::Relaxed)),
                WorkerId::COORDINATOR,
                *entry.key(),
                Payload::Shutdown(builder_proto::Shutdown { grace_ms }),
            );
            if let Ok(bytes) = builder_proto::wire::encode(&envelope) {
                let _ = entry.value().try_send(bytes);
            }
        }
    }

    /// Apply a heartbeat from `worker_id`.
    pub fn heartbeat(&self, worker_id: WorkerId, seq: u64, heartbeat: &builder_proto::HeartBeat) {
        self.registry.apply_heartbeat(worker_id, seq, heartbeat.load, heartbeat.active_actions.iter().copied());
    }

    /// Apply a finished Action's result, advancing the scheduler and
    /// freeing the worker's dispatch slot for it.
    #[instrument(skip(self, result))]
    pub fn complete(&self, worker_id: WorkerId, result: &ActionResultMsg) {
        self.registry.mark_finished(worker_id, result.action_id);
        match result.status {
            ActionStatus::Success => {
                if let Err(error) = self.scheduler.report_success(result.action_id) {
                    warn!(%error, action = %result.action_id, "scheduler rejected a reported success");
                }
                self.pending.remove(&result.action_id);
            }
            ActionStatus::Failure | ActionStatus::Timeout | ActionStatus::Cancelled => {
                self.fail(result.action_id);
            }
        }
    }

    /// Reclaim every Action a worker was executing when it dropped or was
    /// swept as `Failed`, reporting each as a failed attempt so the
    /// scheduler's retry policy decides whether it is re-dispatched or
    /// doomed (spec.md §4.5, §4.7).
    #[instrument(skip(self))]
    pub fn reclaim_worker(&self, worker_id: WorkerId) {
        self.connections.remove(&worker_id);
        if let Some(entry) = self.registry.remove(worker_id) {
            for action_id in entry.in_progress {
                self.fail(action_id);
            }
        }
    }

    fn fail(&self, id: ActionId) {
        match self.scheduler.report_failure(id) {
            Ok(FailureOutcome::Retry { attempt, .. }) => {
                if let Some(mut pending) = self.pending.get_mut(&id) {
                    pending.request.attempt = attempt + 1;
                }
            }
            Ok(FailureOutcome::Permanent { doomed_dependents }) => {
                self.pending.remove(&id);
                for dependent in doomed_dependents {
                    self.pending.remove(&dependent);
                }
            }
            Err(error) => warn!(%error, action = %id, "scheduler rejected a reported failure"),
        }
    }

    /// Sweep worker health and reclaim work from any worker that just
    /// transitioned to `Failed`. Intended to run on a periodic tick.
    pub fn sweep(&self) {
        for worker_id in self.registry.sweep_health() {
            warn!(worker = worker_id.0, "worker failed health sweep, reclaiming in-progress actions");
            self.reclaim_worker(worker_id);
        }
    }

    /// Attempt to dispatch every ready Action (scheduler-ready, or
    /// previously stranded for lack of an eligible worker) to a connected
    /// worker. Returns the number of Actions actually dispatched this tick.
    #[instrument(skip(self))]
    pub fn dispatch_tick(&self) -> usize {
        let mut dispatched = 0;
        let mut still_stranded = VecDeque::new();
        let previously_stranded: VecDeque<ActionId> = std::mem::take(&mut *self.stranded.lock());
        for id in previously_stranded {
            if self.try_dispatch(id) == DispatchAttempt::Dispatched {
                dispatched += 1;
            } else {
                still_stranded.push_back(id);
            }
        }
        while let Some(id) = self.scheduler.dequeue() {
            if self.try_dispatch(id) == DispatchAttempt::Dispatched {
                dispatched += 1;
            } else {
                still_stranded.push_back(id);
            }
        }
        *self.stranded.lock() = still_stranded;
        dispatched
    }

    fn try_dispatch(&self, id: ActionId) -> DispatchAttempt {
        let Some(pending) = self.pending.get(&id) else {
            return DispatchAttempt::Dispatched;
        };
        let candidates = self.registry.snapshot();
        let Some(worker_id) = pick_worker(&candidates, &pending.resources, true) else {
            return DispatchAttempt::NoEligibleWorker;
        };
        let Some(outbox) = self.connections.get(&worker_id) else {
            return DispatchAttempt::NoEligibleWorker;
        };

        let message_id = MessageId(self.next_message_id.fetch_add(1, Ordering::Relaxed));
        let envelope = Envelope::new(message_id, WorkerId::COORDINATOR, worker_id, Payload::ActionRequest(pending.request.clone()));
        let bytes = match builder_proto::wire::encode(&envelope) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(%error, action = %id, "failed to encode ActionRequest, leaving it stranded");
                return DispatchAttempt::NoEligibleWorker;
            }
        };

        if let Err(error) = self.scheduler.mark_executing(id) {
            warn!(%error, action = %id, "scheduler rejected dispatch transition");
        }
        self.registry.mark_dispatched(worker_id, id);

        if outbox.try_send(bytes).is_err() {
            warn!(worker = worker_id.0, action = %id, "dispatch outbox closed, reclaiming worker");
            drop(pending);
            self.reclaim_worker(worker_id);
            return DispatchAttempt::NoEligibleWorker;
        }
        DispatchAttempt::Dispatched
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use builder_graph::Priority;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn action(command: &str) -> Action {
        Action {
            command: command.to_string(),
            args: vec![],
            env: BTreeMap::new(),
            inputs: vec![],
            outputs: vec![PathBuf::from("out")],
            resources: ResourceLimits::default(),
            toolchain: "test-toolchain".into(),
            priority: Priority::Normal,
        }
    }

    fn caps() -> Capabilities {
        Capabilities {
            os: "linux".into(),
            arch: "x86_64".into(),
            max_memory_bytes: u64::MAX,
            max_cpu_cores: 64,
            allowed_read_roots: vec![],
            allowed_write_roots: vec![],
            allow_network: false,
        }
    }

    #[test]
    fn submit_with_no_connected_worker_leaves_action_stranded() {
        let coordinator = Coordinator::default();
        let action = action("echo");
        coordinator.submit(&action, &[]);
        assert_eq!(coordinator.dispatch_tick(), 0);
    }

    #[test]
    fn dispatches_to_the_only_connected_worker() {
        let coordinator = Coordinator::default();
        let (tx, mut rx) = mpsc::channel(8);
        let worker_id = coordinator.connect_worker(None, "127.0.0.1:9001".into(), caps(), tx);
        coordinator.registry().apply_heartbeat(worker_id, 1, builder_proto::LoadMetrics { cpu_usage: 0.0, mem_usage: 0.0, disk_usage: 0.0, queue_depth: 0, active_actions: 0 }, []);

        let action = action("echo");
        coordinator.submit(&action, &[]);
        assert_eq!(coordinator.dispatch_tick(), 1);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn worker_loss_reclaims_in_progress_action_as_a_retry() {
        let coordinator = Coordinator::default();
        let (tx, _rx) = mpsc::channel(8);
        let worker_id = coordinator.connect_worker(None, "127.0.0.1:9001".into(), caps(), tx);
        coordinator.registry().apply_heartbeat(worker_id, 1, builder_proto::LoadMetrics { cpu_usage: 0.0, mem_usage: 0.0, disk_usage: 0.0, queue_depth: 0, active_actions: 0 }, []);

        let action = action("echo");
        let id = coordinator.submit(&action, &[]);
        assert_eq!(coordinator.dispatch_tick(), 1);

        coordinator.reclaim_worker(worker_id);
        assert!(coordinator.registry().get(worker_id).is_none());

        let (tx2, mut rx2) = mpsc::channel(8);
        let replacement = coordinator.connect_worker(None, "127.0.0.1:9002".into(), caps(), tx2);
        coordinator.registry().apply_heartbeat(replacement, 1, builder_proto::LoadMetrics { cpu_usage: 0.0, mem_usage: 0.0, disk_usage: 0.0, queue_depth: 0, active_actions: 0 }, []);
        assert_eq!(coordinator.dispatch_tick(), 1);
        let redispatched = rx2.try_recv().unwrap();
        let (envelope, _) = builder_proto::wire::decode(&redispatched).unwrap();
        if let Payload::ActionRequest(request) = envelope.payload {
            assert_eq!(request.action_id, id);
            assert_eq!(request.attempt, 2);
        } else {
            panic!("expected an ActionRequest payload");
        }
    }
}
