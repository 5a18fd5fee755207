// SPDX-License-Identifier: Apache-2.0
//! Garbage collection for content-addressed stores.
//!
//! Per spec: "Garbage collection removes blobs with zero active references
//! and zero entries younger than a configurable retention." Active
//! references here means pinned (the action cache pins every output blob
//! referenced by a live entry for the retention window); GC sweeps anything
//! unpinned and older than the retention window.

use std::time::{Duration, SystemTime};

use crate::{ArtifactId, BlobStore, CasError};

/// Retention policy applied during a GC sweep.
#[derive(Clone, Copy, Debug)]
pub struct RetentionPolicy {
    /// Minimum age an unpinned blob must reach before it's eligible for
    /// collection. Protects blobs written moments ago from a race with an
    /// in-flight reader that hasn't pinned them yet.
    pub min_age: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            min_age: Duration::from_secs(3600),
        }
    }
}

/// Outcome of a GC sweep.
#[derive(Debug, Default, Clone)]
pub struct GcReport {
    /// Ids removed by this sweep.
    pub collected: Vec<ArtifactId>,
    /// Ids retained because they are pinned or too young.
    pub retained: usize,
}

/// Sweep `store`, removing every unpinned blob at least `policy.min_age`
/// old. Pinned blobs are never collected regardless of age.
///
/// # Errors
///
/// Returns the first [`CasError`] encountered while removing a blob; blobs
/// already removed earlier in the sweep remain removed (the sweep does not
/// roll back on partial failure).
pub fn sweep(store: &mut dyn BlobStore, policy: RetentionPolicy) -> Result<GcReport, CasError> {
    let now = SystemTime::now();
    let mut report = GcReport::default();

    for (id, pinned, touched) in store.entries() {
        if pinned {
            report.retained += 1;
            continue;
        }
        let age = now.duration_since(touched).unwrap_or(Duration::ZERO);
        if age < policy.min_age {
            report.retained += 1;
            continue;
        }
        store.remove(&id)?;
        report.collected.push(id);
    }

    Ok(report)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::MemoryTier;
    use std::thread::sleep;

    #[test]
    fn sweep_retains_pinned_blobs_regardless_of_age() {
        let mut store = MemoryTier::new();
        let id = store.put(b"pinned forever").unwrap();
        store.pin(&id);

        let report = sweep(&mut store, RetentionPolicy { min_age: Duration::ZERO }).unwrap();
        assert!(report.collected.is_empty());
        assert!(store.has(&id));
    }

    #[test]
    fn sweep_retains_blobs_younger_than_min_age() {
        let mut store = MemoryTier::new();
        let id = store.put(b"freshly written").unwrap();

        let policy = RetentionPolicy {
            min_age: Duration::from_secs(3600),
        };
        let report = sweep(&mut store, policy).unwrap();
        assert!(report.collected.is_empty());
        assert!(store.has(&id));
    }

    #[test]
    fn sweep_collects_unpinned_aged_blobs() {
        let mut store = MemoryTier::new();
        let id = store.put(b"old and unpinned").unwrap();
        sleep(Duration::from_millis(15));

        let policy = RetentionPolicy {
            min_age: Duration::from_millis(5),
        };
        let report = sweep(&mut store, policy).unwrap();
        assert_eq!(report.collected, vec![id]);
        assert!(!store.has(&id));
    }

    #[test]
    fn sweep_mixed_pinned_and_unpinned() {
        let mut store = MemoryTier::new();
        let keep = store.put(b"keep me").unwrap();
        store.pin(&keep);
        let drop_me = store.put(b"drop me").unwrap();
        sleep(Duration::from_millis(15));

        let policy = RetentionPolicy {
            min_age: Duration::from_millis(5),
        };
        let report = sweep(&mut store, policy).unwrap();
        assert_eq!(report.collected, vec![drop_me]);
        assert!(store.has(&keep));
        assert!(!store.has(&drop_me));
    }
}
