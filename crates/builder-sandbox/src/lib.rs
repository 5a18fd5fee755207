// SPDX-License-Identifier: Apache-2.0
//! Hermetic executor: runs one [`Action`] under a declared [`SandboxSpec`],
//! capturing its outputs deterministically and optionally verifying
//! bit-exact reproducibility across repeated runs.
//!
//! Process spawning and waiting happen on the async runtime via
//! `tokio::process`, never blocking a caller holding a lock (spec.md §5:
//! "long-running work runs outside locks"). True OS-level isolation
//! (namespaces, seccomp, cgroup enforcement) is explicitly out of scope
//! per spec.md §1's non-goals ("no replacement for OS-level isolation
//! primitives") — this crate defines the sandbox *contract* and a
//! reference [`AccessRecorder`] seam a platform-specific isolation backend
//! reports through; [`NullAccessRecorder`] is the no-observation default
//! used when no such backend is wired in.
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

mod determinism;

pub use determinism::{verify_determinism, DeterminismReport, NonDeterminismSource, OutputDrift};

use builder_cas::{ArtifactId, BlobStore};
use builder_graph::{Action, ResourceLimits};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Bound on captured stdout/stderr per stream before truncation.
const CAPTURE_CEILING_BYTES: usize = 4 * 1024 * 1024;
const TRUNCATION_MARKER: &[u8] = b"\n...[truncated]...\n";

/// Declares exactly what one Action execution may touch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SandboxSpec {
    /// Paths the Action may read, materialized read-only into the sandbox root.
    pub inputs: BTreeSet<PathBuf>,
    /// Paths the Action may write; hashed and published on success.
    pub outputs: BTreeSet<PathBuf>,
    /// Paths the Action may write but that are discarded after execution.
    pub temps: BTreeSet<PathBuf>,
    /// Whether the Action may reach the network.
    pub allow_network: bool,
    /// Environment variable whitelist forwarded to the process.
    pub env: BTreeMap<String, String>,
    /// Resource ceilings; `None` fields are unenforced.
    pub resources: ResourceLimits,
}

/// Terminal status of an executed Action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionStatus {
    /// The process exited zero and every declared output was produced.
    Success,
    /// The process exited non-zero, or a declared output was missing.
    Failure,
    /// The process exceeded its walltime and was killed.
    Timeout,
    /// Execution was cancelled before completion.
    Cancelled,
}

/// Observed resource usage for telemetry (best-effort; fields are `None`
/// when the host platform cannot report them without a dependency this
/// corpus does not otherwise reach for).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ResourceTelemetry {
    /// Wall-clock duration of the execution.
    pub duration: Option<Duration>,
}

/// Outcome of executing one Action.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionResult {
    /// Terminal status.
    pub status: ActionStatus,
    /// Process exit code, if the process ran to completion.
    pub exit_code: Option<i32>,
    /// Wall-clock duration of the attempt.
    pub duration: Duration,
    /// Content ids of every declared output, in `spec.outputs` iteration order.
    pub outputs: Vec<ArtifactId>,
    /// Captured standard output (bounded, possibly truncated).
    pub stdout: Vec<u8>,
    /// Captured standard error (bounded, possibly truncated).
    pub stderr: Vec<u8>,
    /// Best-effort resource telemetry.
    pub resources: ResourceTelemetry,
}

/// Failure categories an execution attempt can raise (spec.md §4.3).
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// A declared input was not present in the CAS before spawn.
    #[error("[SANDBOX_MISSING_INPUT] {0}")]
    MissingInput(PathBuf),
    /// The process could not be spawned.
    #[error("[SANDBOX_SPAWN_FAILED] {0}")]
    SpawnFailed(std::io::Error),
    /// The process exceeded its walltime.
    #[error("[SANDBOX_TIMEOUT] exceeded {0:?}")]
    Timeout(Duration),
    /// The process was killed for exceeding its memory ceiling.
    #[error("[SANDBOX_OOM] exceeded {0} bytes")]
    Oom(u64),
    /// The process exited with a non-zero status.
    #[error("[SANDBOX_NONZERO_EXIT] exit code {0}")]
    NonZeroExit(i32),
    /// A declared output path was not produced.
    #[error("[SANDBOX_OUTPUT_MISSING] {0}")]
    OutputMissing(PathBuf),
    /// An access outside the declared input/output/temp set was observed.
    #[error("[SANDBOX_HERMETICITY_VIOLATION] unauthorized access: {0}")]
    HermeticityViolation(PathBuf),
    /// Repeated runs under determinism verification produced different outputs.
    #[error("[SANDBOX_DETERMINISM_VIOLATION] {0:?}")]
    DeterminismViolation(DeterminismReport),
    /// Hashing or publishing a produced output failed.
    #[error("[SANDBOX_CAS] {0}")]
    Cas(#[from] builder_cas::CasError),
    /// Reading a produced output from disk failed.
    #[error("[SANDBOX_IO] {path}: {source}")]
    Io {
        /// Path being read when the error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Reports accesses observed during an execution, for hermeticity checking.
///
/// A real OS-level sandbox backend (ptrace, seccomp-bpf, a FUSE overlay)
/// would implement this by recording every path the process actually
/// opened; [`NullAccessRecorder`] is the default for platforms/tests with
/// no such backend wired in, and reports nothing (so every execution is
/// hermeticity-clean by default — the violation path is exercised by
/// supplying a recorder in tests, as real deployments would via a backend).
pub trait AccessRecorder: Send + Sync {
    /// Paths observed as read or written during the most recent execution.
    fn observed_accesses(&self) -> Vec<PathBuf>;
}

/// An [`AccessRecorder`] that observed nothing (the default).
#[derive(Default)]
pub struct NullAccessRecorder;

impl AccessRecorder for NullAccessRecorder {
    fn observed_accesses(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}

/// Executes Actions inside a declared [`SandboxSpec`].
pub struct HermeticExecutor {
    sandbox_root: PathBuf,
}

impl HermeticExecutor {
    /// Create an executor rooted at `sandbox_root`. The directory must
    /// already exist; it is not created or cleaned by this constructor.
    #[must_use]
    pub fn new(sandbox_root: impl Into<PathBuf>) -> Self {
        Self {
            sandbox_root: sandbox_root.into(),
        }
    }

    /// Execute `action` under `spec`, materializing declared inputs from
    /// `cas` and publishing declared outputs back into `cas` on success.
    ///
    /// # Errors
    ///
    /// See [`SandboxError`] for the full failure taxonomy. Hermeticity is
    /// checked against whatever `recorder` reports; with
    /// [`NullAccessRecorder`] no violation can be detected.
    pub async fn execute(
        &self,
        action: &Action,
        spec: &SandboxSpec,
        cas: &mut dyn BlobStore,
        recorder: &dyn AccessRecorder,
    ) -> Result<ActionResult, SandboxError> {
        self.materialize_inputs(action, cas)?;

        let started = std::time::Instant::now();
        let mut command = Command::new(&action.command);
        command
            .args(&action.args)
            .current_dir(&self.sandbox_root)
            .env_clear()
            .envs(&spec.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(SandboxError::SpawnFailed)?;
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let exit_status = if let Some(walltime) = spec.resources.walltime_ms {
            let deadline = Duration::from_millis(walltime);
            match tokio::time::timeout(deadline, child.wait()).await {
                Ok(result) => result.map_err(SandboxError::SpawnFailed)?,
                Err(_) => {
                    drop(child.start_kill());
                    return Err(SandboxError::Timeout(deadline));
                }
            }
        } else {
            child.wait().await.map_err(SandboxError::SpawnFailed)?
        };

        let stdout = read_capped(stdout_pipe.as_mut()).await;
        let stderr = read_capped(stderr_pipe.as_mut()).await;
        let duration = started.elapsed();

        for accessed in recorder.observed_accesses() {
            if !is_declared(&accessed, spec) {
                return Err(SandboxError::HermeticityViolation(accessed));
            }
        }

        if !spec.allow_network {
            tracing::trace!("network disabled for this Action; enforcement delegated to the isolation backend");
        }

        let exit_code = exit_status.code();
        if !exit_status.success() {
            return Err(SandboxError::NonZeroExit(exit_code.unwrap_or(-1)));
        }

        let mut outputs = Vec::with_capacity(spec.outputs.len());
        for output in &spec.outputs {
            let full_path = self.sandbox_root.join(output);
            let bytes = std::fs::read(&full_path).map_err(|_| SandboxError::OutputMissing(output.clone()))?;
            outputs.push(cas.put(&bytes)?);
        }

        Ok(ActionResult {
            status: ActionStatus::Success,
            exit_code,
            duration,
            outputs,
            stdout,
            stderr,
            resources: ResourceTelemetry { duration: Some(duration) },
        })
    }

    fn materialize_inputs(&self, action: &Action, cas: &mut dyn BlobStore) -> Result<(), SandboxError> {
        for (path, id) in &action.inputs {
            let bytes = cas
                .get(id)
                .map_err(SandboxError::Cas)?
                .ok_or_else(|| SandboxError::MissingInput(path.clone()))?;
            let full_path = self.sandbox_root.join(path);
            if let Some(parent) = full_path.parent() {
                std::fs::create_dir_all(parent).map_err(|source| SandboxError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            std::fs::write(&full_path, &*bytes).map_err(|source| SandboxError::Io {
                path: full_path,
                source,
            })?;
        }
        Ok(())
    }
}

fn is_declared(path: &Path, spec: &SandboxSpec) -> bool {
    spec.inputs.contains(path) || spec.outputs.contains(path) || spec.temps.contains(path)
}

async fn read_capped(pipe: Option<&mut (impl tokio::io::AsyncRead + Unpin)>) -> Vec<u8> {
    let Some(pipe) = pipe else {
        return Vec::new();
    };
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 8192];
    loop {
        let Ok(n) = pipe.read(&mut chunk).await else {
            break;
        };
        if n == 0 {
            break;
        }
        if buf.len() + n > CAPTURE_CEILING_BYTES {
            let remaining = CAPTURE_CEILING_BYTES.saturating_sub(buf.len());
            buf.extend_from_slice(&chunk[..remaining.min(n)]);
            buf.extend_from_slice(TRUNCATION_MARKER);
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    buf
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use builder_cas::MemoryTier;
    use builder_graph::{Priority, ResourceLimits as RL};
    use std::collections::BTreeMap as Map;

    fn action(command: &str, args: &[&str]) -> Action {
        Action {
            command: command.to_string(),
            args: args.iter().map(|s| (*s).to_string()).collect(),
            env: Map::new(),
            inputs: vec![],
            outputs: vec![],
            resources: RL::default(),
            toolchain: "test".into(),
            priority: Priority::Normal,
        }
    }

    #[tokio::test]
    async fn successful_execution_hashes_declared_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let executor = HermeticExecutor::new(dir.path());
        let mut cas = MemoryTier::new();
        let spec = SandboxSpec {
            outputs: BTreeSet::from([PathBuf::from("out.txt")]),
            ..Default::default()
        };
        let act = action("sh", &["-c", "echo hi > out.txt"]);
        let result = executor.execute(&act, &spec, &mut cas, &NullAccessRecorder).await.unwrap();
        assert_eq!(result.status, ActionStatus::Success);
        assert_eq!(result.outputs.len(), 1);
    }

    #[tokio::test]
    async fn missing_declared_output_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let executor = HermeticExecutor::new(dir.path());
        let mut cas = MemoryTier::new();
        let spec = SandboxSpec {
            outputs: BTreeSet::from([PathBuf::from("never.txt")]),
            ..Default::default()
        };
        let act = action("true", &[]);
        let err = executor.execute(&act, &spec, &mut cas, &NullAccessRecorder).await.unwrap_err();
        assert!(matches!(err, SandboxError::OutputMissing(_)));
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let executor = HermeticExecutor::new(dir.path());
        let mut cas = MemoryTier::new();
        let spec = SandboxSpec::default();
        let act = action("sh", &["-c", "exit 3"]);
        let err = executor.execute(&act, &spec, &mut cas, &NullAccessRecorder).await.unwrap_err();
        assert!(matches!(err, SandboxError::NonZeroExit(3)));
    }

    #[tokio::test]
    async fn timeout_kills_process_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let executor = HermeticExecutor::new(dir.path());
        let mut cas = MemoryTier::new();
        let spec = SandboxSpec {
            resources: RL {
                walltime_ms: Some(50),
                ..Default::default()
            },
            ..Default::default()
        };
        let act = action("sleep", &["5"]);
        let err = executor.execute(&act, &spec, &mut cas, &NullAccessRecorder).await.unwrap_err();
        assert!(matches!(err, SandboxError::Timeout(_)));
    }

    #[tokio::test]
    async fn hermeticity_violation_reported_when_recorder_observes_undeclared_path() {
        struct FakeRecorder;
        impl AccessRecorder for FakeRecorder {
            fn observed_accesses(&self) -> Vec<PathBuf> {
                vec![PathBuf::from("b.h")]
            }
        }
        let dir = tempfile::tempdir().unwrap();
        let executor = HermeticExecutor::new(dir.path());
        let mut cas = MemoryTier::new();
        let spec = SandboxSpec {
            inputs: BTreeSet::from([PathBuf::from("a.c")]),
            ..Default::default()
        };
        let act = action("true", &[]);
        let err = executor.execute(&act, &spec, &mut cas, &FakeRecorder).await.unwrap_err();
        assert!(matches!(err, SandboxError::HermeticityViolation(p) if p == PathBuf::from("b.h")));
    }

    #[tokio::test]
    async fn missing_input_fails_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let executor = HermeticExecutor::new(dir.path());
        let mut cas = MemoryTier::new();
        let mut act = action("true", &[]);
        act.inputs = vec![(PathBuf::from("missing.c"), ArtifactId(builder_fingerprint::hash_bytes(b"nope")))];
        let spec = SandboxSpec::default();
        let err = executor.execute(&act, &spec, &mut cas, &NullAccessRecorder).await.unwrap_err();
        assert!(matches!(err, SandboxError::MissingInput(_)));
    }
}
