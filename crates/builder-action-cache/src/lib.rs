// SPDX-License-Identifier: Apache-2.0
//! Content-addressed action cache: `lookup`/`beginBuild`/`commit`/`abort`,
//! single-flight coordination, LRU eviction, and the persisted entry
//! codec (spec.md §4.2, §6).
//!
//! Maps `ActionId → ActionResult` (outputs referenced by [`ArtifactId`]
//! living in a [`builder_cas::BlobStore`]). At most one concurrent build
//! per `ActionId` runs; a stale entry (input fingerprints that no longer
//! match) is treated as a miss, not an error.
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

mod eviction;
mod persist;
mod single_flight;
mod store;

pub use eviction::{evict, EvictionPolicy, EvictionReport};
pub use persist::{PersistError, StoredEntry};
pub use single_flight::{BeginOutcome, SingleFlight};
pub use store::{DiskEntryStore, EntryStore, MemoryEntryStore, StoreError};

use builder_cas::BlobStore;
use builder_fingerprint::Fingerprint;
use builder_graph::ActionId;
use builder_sandbox::ActionResult;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::instrument;

/// Errors raised by [`ActionCache`] operations.
#[derive(Debug, thiserror::Error)]
pub enum ActionCacheError {
    /// Reading or writing the persisted entry failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Decoding a persisted entry's bytes failed.
    #[error(transparent)]
    Persist(#[from] PersistError),
    /// Publishing an output blob to the CAS failed.
    #[error(transparent)]
    Cas(#[from] builder_cas::CasError),
}

/// Content-addressed action cache over a pluggable [`EntryStore`] and
/// [`BlobStore`].
pub struct ActionCache<E: EntryStore, B: BlobStore> {
    store: Mutex<E>,
    blobs: Mutex<B>,
    single_flight: SingleFlight,
    eviction_policy: EvictionPolicy,
}

impl<E: EntryStore, B: BlobStore> ActionCache<E, B> {
    /// Construct an action cache over `store` and `blobs` with the given
    /// eviction policy.
    pub fn new(store: E, blobs: B, eviction_policy: EvictionPolicy) -> Self {
        Self {
            store: Mutex::new(store),
            blobs: Mutex::new(blobs),
            single_flight: SingleFlight::new(),
            eviction_policy,
        }
    }

    /// Pure read: look up `id`, returning `None` on a genuine miss *or* a
    /// stale hit (`current_fingerprints` disagrees with the fingerprints
    /// recorded at commit time). No caller-visible locking beyond the
    /// store's own internal lock.
    ///
    /// # Errors
    ///
    /// Returns [`ActionCacheError`] if the persisted entry cannot be read
    /// or decoded.
    #[instrument(skip(self, current_fingerprints))]
    pub fn lookup(
        &self,
        id: ActionId,
        current_fingerprints: &BTreeMap<PathBuf, Fingerprint>,
    ) -> Result<Option<ActionResult>, ActionCacheError> {
        let bytes = {
            let mut store = self.store.lock();
            let found = store.get(id)?;
            if found.is_some() {
                store.touch(id);
            }
            found
        };
        let Some(bytes) = bytes else { return Ok(None) };
        let (_, entry) = persist::decode(&bytes)?;
        if entry.input_fingerprints != *current_fingerprints {
            return Ok(None);
        }
        Ok(Some(entry.result))
    }

    /// Single-flight acquire for `id`. Exactly one concurrent caller
    /// observes [`BeginOutcome::Pass`] and is responsible for calling
    /// [`Self::commit`] or [`Self::abort`]. Every other caller observes
    /// [`BeginOutcome::Wait`] and should await the handle, then re-call
    /// [`Self::lookup`].
    pub fn begin_build(&self, id: ActionId) -> BeginOutcome {
        self.single_flight.begin(id)
    }

    /// Atomically store `result` under `id` (alongside the input
    /// fingerprints it was computed against) and wake any waiters. Output
    /// artifacts are pinned in the blob store for the eviction policy's
    /// retention window before the entry becomes visible, so a concurrent
    /// GC sweep of the blob store cannot race a reader that just observed
    /// a cache hit.
    ///
    /// # Errors
    ///
    /// Returns [`ActionCacheError`] if the entry cannot be persisted.
    #[instrument(skip(self, result, input_fingerprints))]
    pub fn commit(
        &self,
        id: ActionId,
        result: ActionResult,
        input_fingerprints: BTreeMap<PathBuf, Fingerprint>,
    ) -> Result<(), ActionCacheError> {
        {
            let mut blobs = self.blobs.lock();
            for output in &result.outputs {
                blobs.pin(output);
            }
        }
        let entry = StoredEntry { result, input_fingerprints };
        let bytes = persist::encode(id, &entry);
        self.store.lock().put(id, &bytes)?;
        self.single_flight.finish(id);
        Ok(())
    }

    /// Release the in-flight slot for `id` without storing a result.
    /// Waiters wake and re-check [`Self::lookup`], which will miss.
    pub fn abort(&self, id: ActionId) {
        self.single_flight.finish(id);
    }

    /// Run one eviction pass against the configured policy, unpinning any
    /// evicted entries' outputs in the blob store so a subsequent CAS GC
    /// sweep can reclaim them.
    ///
    /// # Errors
    ///
    /// Returns [`ActionCacheError`] if eviction fails to read or remove an
    /// entry.
    pub fn evict(&self) -> Result<EvictionReport, ActionCacheError> {
        let mut store = self.store.lock();
        let mut unpin_targets = Vec::new();
        for (id, _, _) in store.entries() {
            if let Some(bytes) = store.get(id)? {
                if let Ok((_, entry)) = persist::decode(&bytes) {
                    unpin_targets.push((id, entry.result.outputs));
                }
            }
        }
        let report = eviction::evict(&mut *store, self.eviction_policy)?;
        drop(store);

        let evicted: std::collections::HashSet<_> = report.evicted.iter().copied().collect();
        let mut blobs = self.blobs.lock();
        for (id, outputs) in unpin_targets {
            if evicted.contains(&id) {
                for output in outputs {
                    blobs.unpin(&output);
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use builder_cas::MemoryTier;
    use builder_fingerprint::hash_bytes;
    use builder_sandbox::{ActionStatus, ResourceTelemetry};
    use std::time::Duration;

    fn id(tag: &str) -> ActionId {
        ActionId(hash_bytes(tag.as_bytes()))
    }

    fn sample_result() -> ActionResult {
        ActionResult {
            status: ActionStatus::Success,
            exit_code: Some(0),
            duration: Duration::from_millis(50),
            outputs: Vec::new(),
            stdout: b"ok\n".to_vec(),
            stderr: Vec::new(),
            resources: ResourceTelemetry::default(),
        }
    }

    fn cache() -> ActionCache<MemoryEntryStore, MemoryTier> {
        ActionCache::new(MemoryEntryStore::new(), MemoryTier::new(), EvictionPolicy::default())
    }

    #[test]
    fn lookup_on_empty_cache_misses() {
        let cache = cache();
        assert!(cache.lookup(id("a"), &BTreeMap::new()).unwrap().is_none());
    }

    #[test]
    fn commit_then_lookup_with_matching_fingerprints_hits() {
        let cache = cache();
        let fingerprints = BTreeMap::from([(PathBuf::from("a.rs"), hash_bytes(b"a"))]);
        cache.commit(id("a"), sample_result(), fingerprints.clone()).unwrap();
        let hit = cache.lookup(id("a"), &fingerprints).unwrap();
        assert_eq!(hit.map(|r| r.exit_code), Some(Some(0)));
    }

    #[test]
    fn stale_fingerprints_are_reported_as_a_miss() {
        let cache = cache();
        let recorded = BTreeMap::from([(PathBuf::from("a.rs"), hash_bytes(b"old content"))]);
        cache.commit(id("a"), sample_result(), recorded).unwrap();

        let current = BTreeMap::from([(PathBuf::from("a.rs"), hash_bytes(b"new content"))]);
        assert!(cache.lookup(id("a"), &current).unwrap().is_none());
    }

    #[test]
    fn single_flight_pass_then_wait() {
        let cache = cache();
        assert!(matches!(cache.begin_build(id("a")), BeginOutcome::Pass));
        assert!(matches!(cache.begin_build(id("a")), BeginOutcome::Wait(_)));
        cache.abort(id("a"));
        assert!(matches!(cache.begin_build(id("a")), BeginOutcome::Pass));
    }

    #[test]
    fn commit_pins_outputs_and_evict_unpins_after_removal() {
        let mut blobs = MemoryTier::new();
        let output_id = blobs.put(b"artifact bytes").unwrap();
        let cache = ActionCache::new(
            MemoryEntryStore::new(),
            blobs,
            EvictionPolicy { max_bytes: 0, min_age: Duration::ZERO },
        );

        let mut result = sample_result();
        result.outputs = vec![output_id];
        cache.commit(id("a"), result, BTreeMap::new()).unwrap();

        let report = cache.evict().unwrap();
        assert_eq!(report.evicted, vec![id("a")]);
    }
}
