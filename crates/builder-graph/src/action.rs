// SPDX-License-Identifier: Apache-2.0
//! Actions: executable units synthesized from a [`crate::Target`] by a
//! [`crate::LanguageHandler`], and their content-addressed [`ActionId`].

use builder_cas::ArtifactId;
use builder_fingerprint::{hash_bytes, Fingerprint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Scheduling priority (spec.md §4.5). Ordered so `Critical > High > Normal
/// > Low` compares naturally with `Ord`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Priority {
    /// Background or best-effort work.
    Low,
    /// Default priority for ordinary Actions.
    Normal,
    /// Work on a hot path that should preempt Normal/Low when possible.
    High,
    /// Work that bypasses backoff and always heads the ready queue.
    Critical,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

/// Resource ceilings applied by the sandbox at execution time.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ResourceLimits {
    /// Maximum resident memory, in bytes.
    pub max_memory_bytes: Option<u64>,
    /// Maximum CPU cores the process may use concurrently.
    pub max_cpu_cores: Option<u32>,
    /// Maximum cumulative CPU time, in milliseconds.
    pub max_cpu_time_ms: Option<u64>,
    /// Maximum wall-clock duration, in milliseconds.
    pub walltime_ms: Option<u64>,
}

/// Fingerprint over an [`Action`]'s declared inputs; the Action Cache's
/// lookup key. Two Actions with equal `ActionId` must produce equivalent
/// outputs under hermeticity (spec.md §3).
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct ActionId(pub Fingerprint);

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// An immutable unit of executable work synthesized from one [`crate::Target`].
///
/// `Action` is a value object: once synthesized by the planner its fields
/// never change. Its [`ActionId`] is a pure function of `command`, `args`,
/// `env`, `inputs`, the output path set, `resources`, and `toolchain` —
/// `priority` is deliberately excluded from the id, since two Actions that
/// would do identical work at different priorities must still cache-hit
/// each other.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Action {
    /// Program to execute.
    pub command: String,
    /// Argument vector.
    pub args: Vec<String>,
    /// Environment variables in the hermetic whitelist.
    pub env: BTreeMap<String, String>,
    /// Declared inputs: path paired with the content id of that path at
    /// synthesis time, sorted by path for canonical hashing.
    pub inputs: Vec<(PathBuf, ArtifactId)>,
    /// Declared output paths (paths only — ids are produced, not consumed).
    pub outputs: Vec<PathBuf>,
    /// Resource ceilings enforced by the sandbox.
    pub resources: ResourceLimits,
    /// Opaque identity of the toolchain/compiler version producing this Action.
    pub toolchain: String,
    /// Scheduling priority.
    #[serde(skip)]
    pub priority: Priority,
}

#[derive(Serialize)]
struct CanonicalAction<'a> {
    command: &'a str,
    args: &'a [String],
    env: &'a BTreeMap<String, String>,
    inputs: &'a [(PathBuf, ArtifactId)],
    outputs: &'a [PathBuf],
    resources: &'a ResourceLimits,
    toolchain: &'a str,
}

impl Action {
    /// Compute this Action's [`ActionId`]: a BLAKE3 hash of the canonical
    /// CBOR serialization of its input-defining fields. `inputs` must
    /// already be sorted by path; this function does not sort it, so that
    /// identical inputs supplied in a different order hash differently —
    /// callers (the planner) are responsible for sorting before synthesis.
    ///
    /// # Panics
    ///
    /// Never panics: `ciborium` serialization of these plain-data fields
    /// cannot fail in practice (no unbounded recursion, no non-serializable
    /// types), so a serialization error here would indicate a logic bug. We
    /// still surface it via `unreachable!`-free fallback to an
    /// empty-input hash rather than a panic, to honor the no-panic policy.
    #[must_use]
    pub fn compute_id(&self) -> ActionId {
        let canon = CanonicalAction {
            command: &self.command,
            args: &self.args,
            env: &self.env,
            inputs: &self.inputs,
            outputs: &self.outputs,
            resources: &self.resources,
            toolchain: &self.toolchain,
        };
        let mut bytes = Vec::new();
        if ciborium::ser::into_writer(&canon, &mut bytes).is_err() {
            // Unreachable in practice (all fields are plain serializable data);
            // degrade to a stable-but-distinguishable id rather than panic.
            bytes.clear();
            bytes.extend_from_slice(self.command.as_bytes());
        }
        ActionId(hash_bytes(&bytes))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use builder_fingerprint::hash_bytes as hb;

    fn artifact(tag: &str) -> ArtifactId {
        ArtifactId(hb(tag.as_bytes()))
    }

    fn sample() -> Action {
        Action {
            command: "cc".into(),
            args: vec!["-c".into(), "a.c".into()],
            env: BTreeMap::new(),
            inputs: vec![(PathBuf::from("a.c"), artifact("a.c-content"))],
            outputs: vec![PathBuf::from("a.o")],
            resources: ResourceLimits::default(),
            toolchain: "gcc-12".into(),
            priority: Priority::Normal,
        }
    }

    #[test]
    fn identical_actions_have_identical_ids() {
        assert_eq!(sample().compute_id(), sample().compute_id());
    }

    #[test]
    fn priority_does_not_affect_id() {
        let mut a = sample();
        let mut b = sample();
        a.priority = Priority::Low;
        b.priority = Priority::Critical;
        assert_eq!(a.compute_id(), b.compute_id());
    }

    #[test]
    fn differing_command_changes_id() {
        let mut a = sample();
        a.command = "clang".into();
        assert_ne!(a.compute_id(), sample().compute_id());
    }

    #[test]
    fn differing_input_content_changes_id() {
        let mut a = sample();
        a.inputs = vec![(PathBuf::from("a.c"), artifact("different-content"))];
        assert_ne!(a.compute_id(), sample().compute_id());
    }

    #[test]
    fn priority_ordering_matches_spec() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }
}
