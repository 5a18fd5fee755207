// SPDX-License-Identifier: Apache-2.0
//! Distributed coordinator/worker wire protocol (spec.md §4.6): envelopes,
//! opaque ids, and the payload catalogue carried inside them.
//!
//! Wire integers are big-endian throughout, including the length prefix
//! applied by [`wire`].

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

pub mod wire;

use builder_cas::ArtifactId;
use builder_graph::ActionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current wire protocol version. Bumped on breaking envelope changes.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default coordinator TCP port.
pub const DEFAULT_COORDINATOR_PORT: u16 = 9000;
/// Default CAS TCP port.
pub const DEFAULT_CAS_PORT: u16 = 8080;
/// Default TLS-variant port.
pub const DEFAULT_TLS_PORT: u16 = 8443;

/// Opaque 64-bit worker identity. `0` is reserved for the coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub u64);

impl WorkerId {
    /// The reserved identity of the coordinator itself.
    pub const COORDINATOR: Self = Self(0);

    /// Whether this id refers to the coordinator rather than a worker.
    #[must_use]
    pub fn is_coordinator(self) -> bool {
        self.0 == 0
    }
}

/// Opaque message identity, unique per sender for correlating
/// request/response pairs (e.g. `ActionRequest` → `ActionResult`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

/// Nanoseconds since the Unix epoch, carried on the wire as a plain `u64`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Capture the current wall-clock time. Falls back to zero if the clock
    /// reads before the epoch (should not happen on any supported platform).
    #[must_use]
    pub fn now() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_nanos().min(u128::from(u64::MAX)) as u64);
        Self(nanos)
    }
}

/// Transport-level compression applied to the envelope payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compression {
    /// Payload bytes are carried verbatim.
    None,
    /// Payload bytes are zstd-compressed.
    Zstd,
}

/// What a worker can do, matched against an Action's sandbox spec during
/// dispatch (spec.md §4.7).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Operating system identifier (e.g. `"linux"`, `"macos"`).
    pub os: String,
    /// CPU architecture identifier (e.g. `"x86_64"`, `"aarch64"`).
    pub arch: String,
    /// Maximum resident memory this worker will grant an Action.
    pub max_memory_bytes: u64,
    /// Maximum CPU cores this worker will grant an Action.
    pub max_cpu_cores: u32,
    /// Path roots this worker permits Actions to read under.
    pub allowed_read_roots: Vec<String>,
    /// Path roots this worker permits Actions to write under.
    pub allowed_write_roots: Vec<String>,
    /// Whether this worker permits sandboxed network access at all.
    pub allow_network: bool,
}

/// Liveness state self-reported by a worker in its [`HeartBeat`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    /// Accepting and executing work normally.
    Alive,
    /// Finishing in-flight work, refusing new dispatch (graceful shutdown).
    Draining,
    /// Reporting itself as no longer able to execute work.
    Failed,
}

/// Live load snapshot carried by a [`HeartBeat`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoadMetrics {
    /// Fraction of this worker's CPU capacity in use, `0.0..=1.0`.
    pub cpu_usage: f32,
    /// Fraction of this worker's memory capacity in use, `0.0..=1.0`.
    pub mem_usage: f32,
    /// Fraction of this worker's scratch disk capacity in use, `0.0..=1.0`.
    pub disk_usage: f32,
    /// Number of Actions currently queued on this worker.
    pub queue_depth: u32,
    /// Number of Actions currently executing on this worker.
    pub active_actions: u32,
}

impl LoadMetrics {
    /// Single scalar load factor used for dispatch tiebreaking (spec.md
    /// §4.7): the maximum of CPU and memory utilization.
    #[must_use]
    pub fn load_factor(&self) -> f32 {
        self.cpu_usage.max(self.mem_usage)
    }
}

/// A request to execute one Action on the receiving worker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Identity of the Action to execute.
    pub action_id: ActionId,
    /// Command to run.
    pub command: String,
    /// Argument vector.
    pub args: Vec<String>,
    /// Whitelisted environment variables.
    pub env: BTreeMap<String, String>,
    /// Declared inputs as `(sandbox-relative path, content)` pairs.
    pub inputs: Vec<(String, ArtifactId)>,
    /// Declared output paths, sandbox-relative.
    pub outputs: Vec<String>,
    /// Walltime ceiling in milliseconds.
    pub walltime_ms: Option<u64>,
    /// Attempt number, starting at 1, for retry-aware logging.
    pub attempt: u32,
}

/// Outcome of executing one Action, reported back to the coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStatus {
    /// Completed with exit code 0 and all declared outputs present.
    Success,
    /// Completed with a non-zero exit code or a missing output.
    Failure,
    /// Exceeded its walltime ceiling.
    Timeout,
    /// Terminated by a cancellation request.
    Cancelled,
}

/// Result payload for a completed (or failed) [`ActionRequest`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionResultMsg {
    /// Identity of the Action this result is for.
    pub action_id: ActionId,
    /// Terminal status.
    pub status: ActionStatus,
    /// Process exit code, if the process ran to completion.
    pub exit_code: Option<i32>,
    /// Wall-clock duration of the execution, in milliseconds.
    pub duration_ms: u64,
    /// Content identities of the Action's declared outputs, in declaration order.
    pub outputs: Vec<ArtifactId>,
    /// Captured, possibly truncated, standard output.
    pub stdout: Vec<u8>,
    /// Captured, possibly truncated, standard error.
    pub stderr: Vec<u8>,
}

/// Periodic liveness and load report from a worker to the coordinator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeartBeat {
    /// Sender's self-reported state.
    pub state: WorkerState,
    /// Sender's current load.
    pub load: LoadMetrics,
    /// ActionIds currently executing on the sender.
    pub active_actions: Vec<ActionId>,
}

/// Request to redirect queued work from an overloaded peer to the sender
/// (spec.md §4.7 work stealing).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StealRequest {
    /// How many Actions the sender is willing to take on.
    pub capacity: u32,
}

/// Reply to a [`StealRequest`], carrying the redirected work (if any).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StealResponse {
    /// Actions redirected to the requester.
    pub granted: Vec<ActionRequest>,
}

/// Request that the receiver drain in-flight work and exit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shutdown {
    /// Grace period in milliseconds before in-flight work is cancelled.
    pub grace_ms: u64,
}

/// Worker registration/re-announcement, sent on connect and on capability change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeerAnnounce {
    /// Announcing worker's identity, or `None` to request assignment.
    pub worker_id: Option<WorkerId>,
    /// Network address the worker listens on for dispatch.
    pub address: String,
    /// Announcing worker's capabilities.
    pub capabilities: Capabilities,
}

/// The full payload catalogue carried inside an [`Envelope`] (spec.md §4.6).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Coordinator → worker: execute this Action.
    ActionRequest(ActionRequest),
    /// Worker → coordinator: an Action finished.
    ActionResult(ActionResultMsg),
    /// Worker → coordinator: periodic liveness report.
    HeartBeat(HeartBeat),
    /// Worker → worker (via coordinator or direct peer link): request work.
    StealRequest(StealRequest),
    /// Worker → worker: reply to a steal request.
    StealResponse(StealResponse),
    /// Coordinator → worker: drain and exit.
    Shutdown(Shutdown),
    /// Worker → coordinator: register or re-announce.
    PeerAnnounce(PeerAnnounce),
}

impl Payload {
    /// The single-byte type tag this payload is framed with on the wire.
    #[must_use]
    pub const fn type_tag(&self) -> u8 {
        match self {
            Self::ActionRequest(_) => 1,
            Self::ActionResult(_) => 2,
            Self::HeartBeat(_) => 3,
            Self::StealRequest(_) => 4,
            Self::StealResponse(_) => 5,
            Self::Shutdown(_) => 6,
            Self::PeerAnnounce(_) => 7,
        }
    }
}

/// The envelope every message on the wire is wrapped in (spec.md §4.6).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Wire protocol version this envelope was built under.
    pub version: u8,
    /// Unique-per-sender message identity.
    pub message_id: MessageId,
    /// Identity of the sender.
    pub sender: WorkerId,
    /// Identity of the intended recipient.
    pub recipient: WorkerId,
    /// When this envelope was constructed.
    pub timestamp: Timestamp,
    /// Compression applied to `payload`.
    pub compression: Compression,
    /// The message body.
    pub payload: Payload,
}

impl Envelope {
    /// Build an envelope with [`PROTOCOL_VERSION`], no compression, and the
    /// current timestamp.
    #[must_use]
    pub fn new(message_id: MessageId, sender: WorkerId, recipient: WorkerId, payload: Payload) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            message_id,
            sender,
            recipient,
            timestamp: Timestamp::now(),
            compression: Compression::None,
            payload,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn worker_zero_is_the_coordinator() {
        assert!(WorkerId::COORDINATOR.is_coordinator());
        assert!(!WorkerId(7).is_coordinator());
    }

    #[test]
    fn load_factor_is_the_max_of_cpu_and_mem() {
        let load = LoadMetrics { cpu_usage: 0.3, mem_usage: 0.9, disk_usage: 0.1, queue_depth: 2, active_actions: 1 };
        assert!((load.load_factor() - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn payload_type_tags_are_stable() {
        let hb = Payload::HeartBeat(HeartBeat {
            state: WorkerState::Alive,
            load: LoadMetrics { cpu_usage: 0.0, mem_usage: 0.0, disk_usage: 0.0, queue_depth: 0, active_actions: 0 },
            active_actions: vec![],
        });
        assert_eq!(hb.type_tag(), 3);
    }
}
