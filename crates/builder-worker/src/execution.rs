// SPDX-License-Identifier: Apache-2.0
//! Turns one [`ActionRequest`] into a [`SandboxSpec`]/[`Action`] pair,
//! ensures its declared inputs are present in the local CAS (fetching from
//! a remote peer first if configured), invokes the hermetic executor, and
//! reports the outcome back as an [`ActionResultMsg`] (spec.md §4.8).

use crate::fetch::{BlobFetchError, TcpBlobSource};
use builder_cas::{ArtifactId, BlobStore, CasError};
use builder_graph::{Action, Priority, ResourceLimits};
use builder_proto::{ActionRequest, ActionResultMsg, ActionStatus as WireActionStatus};
use builder_sandbox::{ActionStatus, HermeticExecutor, NullAccessRecorder, SandboxError, SandboxSpec};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Instant;

/// Errors raised preparing or running one [`ActionRequest`].
#[derive(Debug, thiserror::Error)]
pub enum WorkerExecutionError {
    /// A declared input was missing locally and no remote peer is
    /// configured (or the remote peer does not have it either).
    #[error("[WORKER_MISSING_INPUT] {0}")]
    MissingInput(ArtifactId),
    /// Fetching a missing input from the remote peer failed.
    #[error("[WORKER_FETCH] {0}")]
    Fetch(#[from] BlobFetchError),
    /// Storing a fetched or uploading a produced blob failed.
    #[error(transparent)]
    Cas(#[from] CasError),
}

/// Ensure every declared input of `request` is present in `cas`, fetching
/// from `remote` (local-first, then remote, per spec.md §4.8) when it is
/// not already there.
///
/// # Errors
///
/// Returns [`WorkerExecutionError::MissingInput`] if an input is absent
/// locally and either no `remote` is configured or the remote peer does
/// not have it; returns [`WorkerExecutionError::Fetch`] or
/// [`WorkerExecutionError::Cas`] on transport or storage failure.
pub async fn materialize_inputs<B: BlobStore>(
    cas: &parking_lot::Mutex<B>,
    remote: Option<&TcpBlobSource>,
    inputs: &[(String, ArtifactId)],
) -> Result<(), WorkerExecutionError> {
    for (_, id) in inputs {
        let already_present = cas.lock().has(id);
        if already_present {
            continue;
        }
        let Some(remote) = remote else {
            return Err(WorkerExecutionError::MissingInput(*id));
        };
        let bytes = remote.get(*id).await?.ok_or(WorkerExecutionError::MissingInput(*id))?;
        cas.lock().put_verified(*id, &bytes)?;
    }
    Ok(())
}

fn build_action(request: &ActionRequest) -> (Action, SandboxSpec) {
    let inputs: Vec<(PathBuf, ArtifactId)> = request.inputs.iter().map(|(path, id)| (PathBuf::from(path), *id)).collect();
    let outputs: Vec<PathBuf> = request.outputs.iter().map(PathBuf::from).collect();
    let resources = ResourceLimits {
        walltime_ms: request.walltime_ms,
        ..ResourceLimits::default()
    };

    let spec = SandboxSpec {
        inputs: inputs.iter().map(|(path, _)| path.clone()).collect(),
        outputs: outputs.iter().cloned().collect::<BTreeSet<_>>(),
        temps: BTreeSet::new(),
        allow_network: false,
        env: request.env.clone(),
        resources: resources.clone(),
    };

    let action = Action {
        command: request.command.clone(),
        args: request.args.clone(),
        env: request.env.clone(),
        inputs,
        outputs,
        resources,
        toolchain: "distributed-dispatch".into(),
        priority: Priority::Normal,
    };

    (action, spec)
}

#[allow(clippy::cast_possible_truncation)]
fn duration_ms(elapsed: std::time::Duration) -> u64 {
    elapsed.as_millis().min(u128::from(u64::MAX)) as u64
}

fn failure_result(action_id: builder_graph::ActionId, error: &SandboxError, elapsed: std::time::Duration) -> ActionResultMsg {
    let (status, exit_code) = match error {
        SandboxError::Timeout(_) => (WireActionStatus::Timeout, None),
        SandboxError::NonZeroExit(code) => (WireActionStatus::Failure, Some(*code)),
        _ => (WireActionStatus::Failure, None),
    };
    ActionResultMsg {
        action_id,
        status,
        exit_code,
        duration_ms: duration_ms(elapsed),
        outputs: Vec::new(),
        stdout: Vec::new(),
        stderr: error.to_string().into_bytes(),
    }
}

/// Materialize inputs, run `request` under `executor`, and produce the
/// [`ActionResultMsg`] to report back to the coordinator. Never returns an
/// `Err` for an Action-level failure (non-zero exit, timeout, missing
/// output) — those are reported as a `Failure`/`Timeout` status in the
/// returned message, matching the coordinator's expectation that every
/// dispatched request gets exactly one reply. Only host-level failures
/// (missing input with no remote to fetch it, a CAS I/O error) short-
/// circuit with [`WorkerExecutionError`].
///
/// # Errors
///
/// See [`WorkerExecutionError`].
pub async fn execute_request<B: BlobStore>(
    executor: &HermeticExecutor,
    cas: &parking_lot::Mutex<B>,
    remote: Option<&TcpBlobSource>,
    request: &ActionRequest,
) -> Result<ActionResultMsg, WorkerExecutionError> {
    materialize_inputs(cas, remote, &request.inputs).await?;

    let (action, spec) = build_action(request);
    let started = Instant::now();
    let outcome = {
        let mut guard = cas.lock();
        executor.execute(&action, &spec, &mut *guard, &NullAccessRecorder).await
    };

    Ok(match outcome {
        Ok(result) => ActionResultMsg {
            action_id: request.action_id,
            status: match result.status {
                ActionStatus::Success => WireActionStatus::Success,
                ActionStatus::Failure => WireActionStatus::Failure,
                ActionStatus::Timeout => WireActionStatus::Timeout,
                ActionStatus::Cancelled => WireActionStatus::Cancelled,
            },
            exit_code: result.exit_code,
            duration_ms: duration_ms(result.duration),
            outputs: result.outputs,
            stdout: result.stdout,
            stderr: result.stderr,
        },
        Err(error) => failure_result(request.action_id, &error, started.elapsed()),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use builder_cas::MemoryTier;
    use builder_fingerprint::hash_bytes;
    use builder_graph::ActionId;
    use std::collections::BTreeMap as Map;

    fn action_id(tag: &str) -> ActionId {
        ActionId(hash_bytes(tag.as_bytes()))
    }

    fn request(command: &str, args: &[&str]) -> ActionRequest {
        ActionRequest {
            action_id: action_id("req"),
            command: command.to_string(),
            args: args.iter().map(|s| (*s).to_string()).collect(),
            env: Map::new(),
            inputs: vec![],
            outputs: vec![],
            walltime_ms: None,
            attempt: 1,
        }
    }

    #[tokio::test]
    async fn successful_request_reports_success() {
        let dir = tempfile::tempdir().unwrap();
        let executor = HermeticExecutor::new(dir.path());
        let cas = parking_lot::Mutex::new(MemoryTier::new());
        let mut req = request("sh", &["-c", "echo hi > out.txt"]);
        req.outputs = vec!["out.txt".to_string()];

        let result = execute_request(&executor, &cas, None, &req).await.unwrap();
        assert_eq!(result.status, WireActionStatus::Success);
        assert_eq!(result.outputs.len(), 1);
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_as_failure_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let executor = HermeticExecutor::new(dir.path());
        let cas = parking_lot::Mutex::new(MemoryTier::new());
        let req = request("sh", &["-c", "exit 7"]);

        let result = execute_request(&executor, &cas, None, &req).await.unwrap();
        assert_eq!(result.status, WireActionStatus::Failure);
        assert_eq!(result.exit_code, Some(7));
    }

    #[tokio::test]
    async fn missing_input_with_no_remote_peer_is_a_host_level_error() {
        let dir = tempfile::tempdir().unwrap();
        let executor = HermeticExecutor::new(dir.path());
        let cas = parking_lot::Mutex::new(MemoryTier::new());
        let mut req = request("true", &[]);
        req.inputs = vec![("missing.c".to_string(), ArtifactId(hash_bytes(b"nope")))];

        let err = execute_request(&executor, &cas, None, &req).await.unwrap_err();
        assert!(matches!(err, WorkerExecutionError::MissingInput(_)));
    }

    #[tokio::test]
    async fn already_present_input_skips_remote_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let executor = HermeticExecutor::new(dir.path());
        let mut memory = MemoryTier::new();
        let id = memory.put(b"a.c content").unwrap();
        let cas = parking_lot::Mutex::new(memory);
        let mut req = request("true", &[]);
        req.inputs = vec![("a.c".to_string(), id)];

        let result = execute_request(&executor, &cas, None, &req).await.unwrap();
        assert_eq!(result.status, WireActionStatus::Success);
    }
}
