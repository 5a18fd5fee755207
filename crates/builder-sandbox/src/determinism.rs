// SPDX-License-Identifier: Apache-2.0
//! Determinism verification: run an Action `N >= 2` times and diff its
//! output `ArtifactId`s for bit-exact reproducibility (spec.md §4.3 point 6).

use crate::{AccessRecorder, ActionResult, HermeticExecutor, SandboxError, SandboxSpec};
use builder_cas::{ArtifactId, BlobStore};
use builder_graph::Action;
use std::path::PathBuf;

/// A likely cause of non-determinism, inferred from which output bytes
/// actually differed between runs. Best-effort: a heuristic classifier,
/// not a proof.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NonDeterminismSource {
    /// Differing bytes look like an embedded timestamp (a run of decimal
    /// digits of similar magnitude at the same offset across runs).
    Timestamp,
    /// Differing bytes look high-entropy and unstructured (likely a PRNG
    /// seed or generated identifier).
    PseudoRandom,
    /// Outputs differ in length or in more than one contiguous region,
    /// consistent with non-deterministic ordering (e.g. thread scheduling
    /// affecting interleaved writes).
    ThreadScheduling,
    /// Divergence detected but no specific pattern matched.
    Unknown,
}

/// One output path whose content differed across determinism-verification runs.
#[derive(Clone, Debug, PartialEq)]
pub struct OutputDrift {
    /// The declared output path that diverged.
    pub path: PathBuf,
    /// Distinct `ArtifactId`s observed for this output across all runs.
    pub observed_ids: Vec<ArtifactId>,
    /// Best-effort guess at the cause.
    pub suspected_source: NonDeterminismSource,
}

/// Structured report of a determinism-verification failure.
#[derive(Clone, Debug, PartialEq)]
pub struct DeterminismReport {
    /// Number of runs performed.
    pub iterations: usize,
    /// Every output that diverged across runs.
    pub drifted: Vec<OutputDrift>,
}

/// Run `action` under `spec` `iterations` times (`iterations >= 2`) and
/// compare each declared output's `ArtifactId` across runs.
///
/// # Errors
///
/// Returns the first [`SandboxError`] other than a determinism mismatch
/// raised by any individual run (e.g. a spawn failure), or
/// [`SandboxError::DeterminismViolation`] if every run succeeded but
/// outputs diverged.
pub async fn verify_determinism(
    executor: &HermeticExecutor,
    action: &Action,
    spec: &SandboxSpec,
    iterations: usize,
    cas: &mut dyn BlobStore,
    recorder: &dyn AccessRecorder,
) -> Result<ActionResult, SandboxError> {
    let iterations = iterations.max(2);
    let mut runs: Vec<ActionResult> = Vec::with_capacity(iterations);
    for _ in 0..iterations {
        runs.push(executor.execute(action, spec, cas, recorder).await?);
    }

    let mut drifted = Vec::new();
    for (idx, output_path) in spec.outputs.iter().enumerate() {
        let ids: Vec<ArtifactId> = runs.iter().map(|r| r.outputs[idx]).collect();
        let first = ids[0];
        if ids.iter().any(|id| *id != first) {
            let suspected_source = classify_drift(cas, &ids);
            drifted.push(OutputDrift {
                path: output_path.clone(),
                observed_ids: dedup(ids),
                suspected_source,
            });
        }
    }

    if drifted.is_empty() {
        Ok(runs.remove(0))
    } else {
        Err(SandboxError::DeterminismViolation(DeterminismReport { iterations, drifted }))
    }
}

fn dedup(mut ids: Vec<ArtifactId>) -> Vec<ArtifactId> {
    ids.sort();
    ids.dedup();
    ids
}

fn classify_drift(cas: &dyn BlobStore, ids: &[ArtifactId]) -> NonDeterminismSource {
    let Ok(Some(a)) = cas.get(&ids[0]) else {
        return NonDeterminismSource::Unknown;
    };
    let Some(other_id) = ids.iter().find(|id| **id != ids[0]) else {
        return NonDeterminismSource::Unknown;
    };
    let Ok(Some(b)) = cas.get(other_id) else {
        return NonDeterminismSource::Unknown;
    };

    if a.len() != b.len() {
        return NonDeterminismSource::ThreadScheduling;
    }

    let diff_runs = contiguous_diff_runs(&a, &b);
    match diff_runs.len() {
        0 => NonDeterminismSource::Unknown,
        1 => {
            let (start, end) = diff_runs[0];
            if (start..end).all(|i| a[i].is_ascii_digit()) && (start..end).all(|i| b[i].is_ascii_digit()) {
                NonDeterminismSource::Timestamp
            } else {
                NonDeterminismSource::PseudoRandom
            }
        }
        _ => NonDeterminismSource::ThreadScheduling,
    }
}

/// Byte ranges `[start, end)` where `a` and `b` differ, merging adjacent
/// differing bytes into a single contiguous run.
fn contiguous_diff_runs(a: &[u8], b: &[u8]) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        if x != y {
            current = Some(match current {
                Some((start, _)) => (start, i + 1),
                None => (i, i + 1),
            });
        } else if let Some(run) = current.take() {
            runs.push(run);
        }
    }
    if let Some(run) = current {
        runs.push(run);
    }
    runs
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn identical_buffers_have_no_diff_runs() {
        assert!(contiguous_diff_runs(b"abc", b"abc").is_empty());
    }

    #[test]
    fn single_differing_region_is_one_run() {
        assert_eq!(contiguous_diff_runs(b"aaa111bbb", b"aaa222bbb"), vec![(3, 6)]);
    }

    #[test]
    fn two_separated_regions_are_two_runs() {
        assert_eq!(contiguous_diff_runs(b"a1b2c", b"a2b3c"), vec![(1, 2), (3, 4)]);
    }
}
