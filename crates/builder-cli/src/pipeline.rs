// SPDX-License-Identifier: Apache-2.0
//! Turns a resolved set of target graph indices into a synthesized [`Plan`]
//! of Actions, and drives that plan to completion against the local action
//! cache and hermetic executor (spec.md §4.2-§4.5).
//!
//! The single-flight and cache-commit protocol here mirrors
//! `builder_worker::execution::execute_request` exactly: the blob store is
//! guarded by one `parking_lot::Mutex` held across the sandboxed process's
//! entire lifetime, never across an `.await` outside that one call.

use builder_action_cache::{ActionCache, ActionCacheError, BeginOutcome, DiskEntryStore, EntryStore};
use builder_cas::{ArtifactId, BlobStore, CasError, DiskTier};
use builder_fingerprint::{hash_file, Fingerprint, FingerprintError};
use builder_graph::{Action, ActionId, BuildGraph, HandlerError, HandlerRegistry, Priority};
use builder_remote_cache::RemoteCache;
use builder_sandbox::{HermeticExecutor, NullAccessRecorder, SandboxSpec};
use builder_scheduler::{critical_path_score, CriticalPathInputs, FailureOutcome, Scheduler, DEFAULT_DURATION_ESTIMATE};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Deadline for a single await on another caller's in-flight build before
/// re-checking the cache (spec.md §5: "per-cache single-flight wait" is a
/// bounded, absolute-deadline operation, not an unbounded suspension).
/// Bounding the wait also closes a narrow lost-wakeup window: if the
/// builder task calls `finish` between this caller observing
/// `BeginOutcome::Wait` and this caller's first poll of the returned
/// `Notified` future, `notify_waiters` wakes nobody and the future would
/// otherwise never resolve. Re-checking `lookup`/`begin_build` on timeout
/// recovers either way.
const SINGLE_FLIGHT_WAIT: Duration = Duration::from_secs(5);

/// Errors raised while planning or running a build.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A target's language handler rejected it or is unregistered.
    #[error(transparent)]
    Handler(#[from] HandlerError),
    /// Reading a declared input file failed.
    #[error("[CLI_IO] {path}: {source}")]
    Io {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Fingerprinting a declared input file failed.
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),
    /// Publishing an input blob to the CAS failed.
    #[error(transparent)]
    Cas(#[from] CasError),
    /// A scheduler state transition failed; indicates a planning bug, since
    /// every Action here is registered exactly once in dependency order.
    #[error(transparent)]
    Scheduler(#[from] builder_scheduler::SchedulerError),
}

/// A synthesized, ready-to-run build plan.
#[derive(Default)]
pub struct Plan {
    /// Every synthesized Action and the sandbox spec it runs under, keyed
    /// by its content-addressed id.
    pub actions: BTreeMap<ActionId, (Action, SandboxSpec)>,
    /// Input fingerprints recorded at synthesis time, used as the action
    /// cache's staleness check.
    pub fingerprints: BTreeMap<ActionId, BTreeMap<PathBuf, Fingerprint>>,
    /// Action-level dependency edges, coarsened from target-level edges.
    pub deps: BTreeMap<ActionId, Vec<ActionId>>,
    /// Dependency-first (topological) dispatch order.
    pub order: Vec<ActionId>,
}

/// Outcome of running a [`Plan`] to completion.
#[derive(Debug, Default, Clone)]
pub struct BuildReport {
    /// Actions executed and that produced a fresh result.
    pub succeeded: Vec<ActionId>,
    /// Actions served from the action cache without executing.
    pub cached: Vec<ActionId>,
    /// Actions that permanently failed (including doomed dependents that
    /// never ran).
    pub failed: Vec<ActionId>,
}

/// Dependency-first traversal of every target reachable from `roots`,
/// explicit-stack to match the rest of the corpus's arena-traversal style
/// (`builder_graph::find_cycles`, `BuildGraph::transitive_dependents`).
fn transitive_closure(graph: &BuildGraph, roots: &[usize]) -> Vec<usize> {
    let mut visited = vec![false; graph.len()];
    let mut order = Vec::new();
    for &root in roots {
        if visited[root] {
            continue;
        }
        visited[root] = true;
        let mut work: Vec<(usize, usize)> = vec![(root, 0)];
        while let Some(&(node, child)) = work.last() {
            let deps = graph.deps_of(node);
            if child < deps.len() {
                let dep = deps[child];
                if let Some(frame) = work.last_mut() {
                    frame.1 += 1;
                }
                if !visited[dep] {
                    visited[dep] = true;
                    work.push((dep, 0));
                }
            } else {
                work.pop();
                order.push(node);
            }
        }
    }
    order
}

/// Derive this target's synthesized Actions' scheduling priority from its
/// position in the graph: how much work is stacked behind it (`fan_out`)
/// and how deep its own remaining dependency chain runs (`depth`).
fn priority_for(graph: &BuildGraph, idx: usize) -> Priority {
    let duration_estimate_ms = u64::try_from(DEFAULT_DURATION_ESTIMATE.as_millis()).unwrap_or(1000);
    let inputs = CriticalPathInputs {
        depth: graph.depth_from(idx),
        fan_out: graph.transitive_dependents(idx),
        duration_estimate_ms,
    };
    let score = critical_path_score(inputs);
    if score >= 400 {
        Priority::High
    } else if score >= 100 {
        Priority::Normal
    } else {
        Priority::Low
    }
}

/// Synthesize Actions for every target reachable from `roots`, content-
/// hashing and publishing each declared input into `cas` along the way.
///
/// # Errors
///
/// See [`PipelineError`].
pub fn plan(
    graph: &BuildGraph,
    roots: &[usize],
    registry: &HandlerRegistry,
    workspace_root: &Path,
    cas: &mut dyn BlobStore,
) -> Result<Plan, PipelineError> {
    let mut result = Plan::default();
    let mut target_actions: BTreeMap<usize, Vec<ActionId>> = BTreeMap::new();

    for idx in transitive_closure(graph, roots) {
        let target = graph.target(idx);
        let handler = registry.get(&target.language).ok_or_else(|| HandlerError::NoHandler(target.language.clone()))?;
        let descriptors = handler.build(target, graph)?;
        let priority = priority_for(graph, idx);

        let mut dep_action_ids: Vec<ActionId> = Vec::new();
        for &dep_idx in graph.deps_of(idx) {
            if let Some(ids) = target_actions.get(&dep_idx) {
                dep_action_ids.extend(ids.iter().copied());
            }
        }

        let mut this_target_actions = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let mut inputs: Vec<(PathBuf, ArtifactId)> = Vec::with_capacity(descriptor.inputs.len());
            let mut fingerprints = BTreeMap::new();
            for relative in &descriptor.inputs {
                let full_path = workspace_root.join(relative);
                let bytes = std::fs::read(&full_path).map_err(|source| PipelineError::Io {
                    path: full_path.clone(),
                    source,
                })?;
                let artifact = cas.put(&bytes)?;
                let fingerprint = hash_file(&full_path)?;
                inputs.push((relative.clone(), artifact));
                fingerprints.insert(relative.clone(), fingerprint);
            }
            inputs.sort_by(|a, b| a.0.cmp(&b.0));

            let action = Action {
                command: descriptor.command,
                args: descriptor.args,
                env: descriptor.env.clone(),
                inputs,
                outputs: descriptor.outputs.clone(),
                resources: descriptor.resources.clone(),
                toolchain: descriptor.toolchain,
                priority,
            };
            let spec = SandboxSpec {
                inputs: action.inputs.iter().map(|(path, _)| path.clone()).collect(),
                outputs: descriptor.outputs.into_iter().collect::<BTreeSet<_>>(),
                temps: BTreeSet::new(),
                allow_network: false,
                env: descriptor.env,
                resources: action.resources.clone(),
            };

            let action_id = action.compute_id();
            result.deps.insert(action_id, dep_action_ids.clone());
            result.fingerprints.insert(action_id, fingerprints);
            result.actions.insert(action_id, (action, spec));
            result.order.push(action_id);
            this_target_actions.push(action_id);
        }
        target_actions.insert(idx, this_target_actions);
    }

    Ok(result)
}

/// Best-effort pull of this plan's action cache entries from a tier-2
/// remote cache into the local entry store, skipping ids already present
/// locally. A pull failure for one action never aborts the others or the
/// build (spec.md's remote cache is optional and advisory).
pub async fn pull_remote_entries<R: RemoteCache>(plan: &Plan, entry_root: &Path, remote: &R) {
    let Ok(mut store) = DiskEntryStore::open(entry_root) else {
        return;
    };
    for id in &plan.order {
        match store.get(*id) {
            Ok(Some(_)) => continue,
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(%error, action = %id, "local entry store read failed during remote pull");
                continue;
            }
        }
        match remote.get(*id).await {
            Ok(Some(bytes)) => {
                if let Err(error) = store.put(*id, &bytes) {
                    tracing::warn!(%error, action = %id, "failed to persist remote cache entry locally");
                }
            }
            Ok(None) => {}
            Err(error) => tracing::warn!(%error, action = %id, "remote cache pull failed"),
        }
    }
}

/// Best-effort push of this plan's freshly produced action cache entries
/// up to a tier-2 remote cache. Upload failures are logged and otherwise
/// ignored; they never fail the build that just succeeded locally.
pub async fn push_remote_entries<R: RemoteCache>(plan: &Plan, entry_root: &Path, remote: &R) {
    let Ok(store) = DiskEntryStore::open(entry_root) else {
        return;
    };
    for id in &plan.order {
        match store.get(*id) {
            Ok(Some(bytes)) => {
                if let Err(error) = remote.put(*id, bytes).await {
                    tracing::warn!(%error, action = %id, "remote cache push failed");
                }
            }
            Ok(None) => {}
            Err(error) => tracing::warn!(%error, action = %id, "local entry store read failed during remote push"),
        }
    }
}

enum Outcome {
    Cached,
    Succeeded,
    Failed,
}

async fn execute_one(
    id: ActionId,
    action: Action,
    spec: SandboxSpec,
    fingerprints: BTreeMap<PathBuf, Fingerprint>,
    executor: Arc<HermeticExecutor>,
    cache: Arc<ActionCache<DiskEntryStore, DiskTier>>,
    cas: Arc<parking_lot::Mutex<DiskTier>>,
) -> Outcome {
    loop {
        match cache.lookup(id, &fingerprints) {
            Ok(Some(_hit)) => return Outcome::Cached,
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(%error, action = %id, "action cache lookup failed, treating as a miss");
            }
        }
        match cache.begin_build(id) {
            BeginOutcome::Pass => break,
            BeginOutcome::Wait(notify) => {
                // Bounded wait: on expiry, loop back to `lookup`/`begin_build`
                // rather than trusting a single `notify_waiters` delivery.
                let _ = tokio::time::timeout(SINGLE_FLIGHT_WAIT, notify.notified()).await;
            }
        }
    }

    let outcome = {
        let mut guard = cas.lock();
        executor.execute(&action, &spec, &mut *guard, &NullAccessRecorder).await
    };

    match outcome {
        Ok(result) => {
            if let Err(error) = cache.commit(id, result, fingerprints) {
                tracing::warn!(%error, action = %id, "failed to persist action cache entry");
            }
            Outcome::Succeeded
        }
        Err(error) => {
            tracing::warn!(%error, action = %id, "action execution failed");
            cache.abort(id);
            Outcome::Failed
        }
    }
}

/// Run every Action in `plan` to completion, respecting dependency order
/// and bounding concurrency to `jobs` simultaneous executions.
///
/// # Errors
///
/// Returns [`PipelineError::Scheduler`] only if the plan's dependency
/// graph is internally inconsistent (a bug in [`plan`], never user input).
pub async fn run(
    plan: &Plan,
    sandbox_root: &Path,
    cache: Arc<ActionCache<DiskEntryStore, DiskTier>>,
    cas: Arc<parking_lot::Mutex<DiskTier>>,
    jobs: usize,
) -> Result<BuildReport, PipelineError> {
    let scheduler = Scheduler::default();
    for id in &plan.order {
        let deps = plan.deps.get(id).cloned().unwrap_or_default();
        let priority = plan.actions.get(id).map_or(Priority::Normal, |(action, _)| action.priority);
        scheduler.register(*id, &deps, priority);
    }

    let executor = Arc::new(HermeticExecutor::new(sandbox_root.to_path_buf()));
    let semaphore = Arc::new(tokio::sync::Semaphore::new(jobs.max(1)));
    let mut tasks = tokio::task::JoinSet::new();
    let mut report = BuildReport::default();

    loop {
        while let Some(id) = scheduler.dequeue() {
            let Some((action, spec)) = plan.actions.get(&id).cloned() else {
                continue;
            };
            scheduler.mark_executing(id)?;
            let fingerprints = plan.fingerprints.get(&id).cloned().unwrap_or_default();

            let semaphore = semaphore.clone();
            let executor = executor.clone();
            let cache = cache.clone();
            let cas = cas.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let outcome = execute_one(id, action, spec, fingerprints, executor, cache, cas).await;
                (id, outcome)
            });
        }

        let Some(joined) = tasks.join_next().await else {
            break;
        };
        let (id, outcome) = match joined {
            Ok(pair) => pair,
            Err(error) => {
                tracing::error!(%error, "action execution task panicked");
                continue;
            }
        };

        match outcome {
            Outcome::Cached => {
                scheduler.report_success(id)?;
                report.cached.push(id);
            }
            Outcome::Succeeded => {
                scheduler.report_success(id)?;
                report.succeeded.push(id);
            }
            Outcome::Failed => match scheduler.report_failure(id)? {
                FailureOutcome::Retry { .. } => {}
                FailureOutcome::Permanent { doomed_dependents } => {
                    report.failed.push(id);
                    report.failed.extend(doomed_dependents);
                }
            },
        }
    }

    Ok(report)
}
