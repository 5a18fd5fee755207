// SPDX-License-Identifier: Apache-2.0
//! In-memory content-addressed blob store.
//!
//! [`MemoryTier`] is the fast in-process tier — used directly by tests and
//! as the read-through cache in front of [`crate::DiskTier`] for hot
//! artifacts within a single build invocation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::SystemTime;

use crate::{artifact_id, ArtifactId, BlobStore, CasError};

struct Entry {
    bytes: Arc<[u8]>,
    touched: SystemTime,
}

/// In-memory content-addressed blob store.
///
/// Stores blobs in a `HashMap<ArtifactId, Arc<[u8]>>` and tracks a pin-set
/// for retention roots. An optional byte budget is advisory — `put` always
/// succeeds but [`is_over_budget`](MemoryTier::is_over_budget) reports when
/// the budget is exceeded; enforcement (eviction of unpinned blobs) is
/// `builder-cas::gc`'s job.
///
/// # Pinning Invariants
///
/// - `pin` on a missing blob is legal (records intent before the blob
///   arrives).
/// - `put` of a pre-pinned id preserves the pin.
/// - `unpin` on a missing blob is a no-op.
/// - Pin count is set cardinality, not reference count.
pub struct MemoryTier {
    blobs: HashMap<ArtifactId, Entry>,
    pins: HashSet<ArtifactId>,
    byte_count: usize,
    max_bytes: Option<usize>,
}

impl MemoryTier {
    /// Create an empty store with no byte limit.
    pub fn new() -> Self {
        Self {
            blobs: HashMap::new(),
            pins: HashSet::new(),
            byte_count: 0,
            max_bytes: None,
        }
    }

    /// Create an empty store with an advisory byte budget.
    pub fn with_limits(max_bytes: usize) -> Self {
        Self {
            blobs: HashMap::new(),
            pins: HashSet::new(),
            byte_count: 0,
            max_bytes: Some(max_bytes),
        }
    }

    /// Number of blobs currently stored.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Returns `true` if no blobs are stored.
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Number of ids in the pin-set.
    pub fn pinned_count(&self) -> usize {
        self.pins.len()
    }

    /// Total bytes stored across all blobs.
    pub fn byte_count(&self) -> usize {
        self.byte_count
    }

    /// Returns `true` if `byte_count` exceeds the configured budget.
    ///
    /// Always returns `false` if no budget was set.
    pub fn is_over_budget(&self) -> bool {
        self.max_bytes.is_some_and(|max| self.byte_count > max)
    }
}

impl Default for MemoryTier {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobStore for MemoryTier {
    fn put(&mut self, bytes: &[u8]) -> Result<ArtifactId, CasError> {
        let id = artifact_id(bytes);
        if !self.blobs.contains_key(&id) {
            self.byte_count += bytes.len();
            self.blobs.insert(
                id,
                Entry {
                    bytes: Arc::from(bytes),
                    touched: SystemTime::now(),
                },
            );
        }
        Ok(id)
    }

    fn put_verified(&mut self, expected: ArtifactId, bytes: &[u8]) -> Result<(), CasError> {
        let computed = artifact_id(bytes);
        if computed != expected {
            return Err(CasError::HashMismatch { expected, computed });
        }
        if !self.blobs.contains_key(&computed) {
            self.byte_count += bytes.len();
            self.blobs.insert(
                computed,
                Entry {
                    bytes: Arc::from(bytes),
                    touched: SystemTime::now(),
                },
            );
        }
        Ok(())
    }

    fn get(&self, id: &ArtifactId) -> Result<Option<Arc<[u8]>>, CasError> {
        Ok(self.blobs.get(id).map(|e| Arc::clone(&e.bytes)))
    }

    fn has(&self, id: &ArtifactId) -> bool {
        self.blobs.contains_key(id)
    }

    fn pin(&mut self, id: &ArtifactId) {
        self.pins.insert(*id);
    }

    fn unpin(&mut self, id: &ArtifactId) {
        self.pins.remove(id);
    }

    fn is_pinned(&self, id: &ArtifactId) -> bool {
        self.pins.contains(id)
    }

    fn entries(&self) -> Vec<(ArtifactId, bool, SystemTime)> {
        self.blobs
            .iter()
            .map(|(id, entry)| (*id, self.pins.contains(id), entry.touched))
            .collect()
    }

    fn remove(&mut self, id: &ArtifactId) -> Result<(), CasError> {
        if let Some(entry) = self.blobs.remove(id) {
            self.byte_count -= entry.bytes.len();
        }
        self.pins.remove(id);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    // ── 1. put + get round-trip ──────────────────────────────────────────

    #[test]
    fn put_get_round_trip() {
        let mut store = MemoryTier::new();
        let data = b"hello builder-cas";
        let id = store.put(data).unwrap();
        let got = store.get(&id).unwrap();
        assert!(got.is_some());
        assert_eq!(&*got.unwrap(), data);
    }

    // ── 2. put_verified rejects hash mismatch ───────────────────────────

    #[test]
    fn put_verified_rejects_mismatch() {
        let mut store = MemoryTier::new();
        let bad_id = ArtifactId(builder_fingerprint::hash_bytes(b"not these bytes"));
        let result = store.put_verified(bad_id, b"some bytes");
        assert!(result.is_err());
        match result.unwrap_err() {
            CasError::HashMismatch { expected, .. } => assert_eq!(expected, bad_id),
            CasError::Io { .. } => panic!("unexpected variant"),
        }
    }

    // ── 3. put_verified mismatch does NOT mutate store ──────────────────

    #[test]
    fn put_verified_mismatch_leaves_store_unchanged() {
        let mut store = MemoryTier::new();
        let bad_id = ArtifactId(builder_fingerprint::hash_bytes(b"not these bytes"));
        let _ = store.put_verified(bad_id, b"should not be stored");
        assert_eq!(store.len(), 0);
        assert_eq!(store.byte_count(), 0);
    }

    // ── 4. has returns false for missing, true for stored ────────────────

    #[test]
    fn has_missing_and_present() {
        let mut store = MemoryTier::new();
        let id = artifact_id(b"test");
        assert!(!store.has(&id));
        store.put(b"test").unwrap();
        assert!(store.has(&id));
    }

    // ── 5. put idempotence ──────────────────────────────────────────────

    #[test]
    fn put_idempotence() {
        let mut store = MemoryTier::new();
        let h1 = store.put(b"duplicate").unwrap();
        let h2 = store.put(b"duplicate").unwrap();
        assert_eq!(h1, h2);
        assert_eq!(store.len(), 1);
    }

    // ── 6. pre-pin then put ─────────────────────────────────────────────

    #[test]
    fn pre_pin_then_put() {
        let mut store = MemoryTier::new();
        let id = artifact_id(b"arriving later");
        store.pin(&id);
        assert!(store.is_pinned(&id));
        assert!(!store.has(&id));
        let stored_id = store.put(b"arriving later").unwrap();
        assert_eq!(id, stored_id);
        assert!(store.is_pinned(&id));
        assert!(store.has(&id));
    }

    // ── 7. pin/unpin lifecycle ──────────────────────────────────────────

    #[test]
    fn pin_unpin_lifecycle() {
        let mut store = MemoryTier::new();
        let id = store.put(b"pinnable").unwrap();
        assert!(!store.is_pinned(&id));
        store.pin(&id);
        assert!(store.is_pinned(&id));
        assert_eq!(store.pinned_count(), 1);
        store.unpin(&id);
        assert!(!store.is_pinned(&id));
        assert_eq!(store.pinned_count(), 0);
    }

    // ── 8. unpin on missing blob = no-op ────────────────────────────────

    #[test]
    fn unpin_missing_is_noop() {
        let mut store = MemoryTier::new();
        let id = artifact_id(b"never stored");
        store.unpin(&id);
        assert!(!store.is_pinned(&id));
    }

    // ── 9. get returns None for missing id ──────────────────────────────

    #[test]
    fn get_missing_returns_none() {
        let store = MemoryTier::new();
        let id = artifact_id(b"never stored either");
        assert!(store.get(&id).unwrap().is_none());
    }

    // ── 10. empty store invariants ──────────────────────────────────────

    #[test]
    fn empty_store_invariants() {
        let store = MemoryTier::new();
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
        assert_eq!(store.byte_count(), 0);
        assert_eq!(store.pinned_count(), 0);
        assert!(!store.is_over_budget());
    }

    // ── 11. byte_count tracks correctly across puts and removes ─────────

    #[test]
    fn byte_count_tracking() {
        let mut store = MemoryTier::new();
        let a = store.put(b"aaaa").unwrap();
        assert_eq!(store.byte_count(), 4);
        store.put(b"bbbbbb").unwrap();
        assert_eq!(store.byte_count(), 10);
        store.put(b"aaaa").unwrap();
        assert_eq!(store.byte_count(), 10);
        store.remove(&a).unwrap();
        assert_eq!(store.byte_count(), 6);
    }

    // ── 12. with_limits + is_over_budget ────────────────────────────────

    #[test]
    fn with_limits_and_over_budget() {
        let mut store = MemoryTier::with_limits(10);
        assert!(!store.is_over_budget());
        store.put(b"12345").unwrap();
        assert!(!store.is_over_budget());
        store.put(b"1234567").unwrap();
        assert!(store.is_over_budget());
        assert_eq!(store.len(), 2);
    }

    // ── 13. large blob smoke test ───────────────────────────────────────

    #[test]
    fn large_blob_round_trip() {
        let mut store = MemoryTier::new();
        let big = vec![0x42u8; 8 * 1024 * 1024];
        let id = store.put(&big).unwrap();
        let got = store.get(&id).unwrap();
        assert!(got.is_some());
        assert_eq!(got.unwrap().len(), 8 * 1024 * 1024);
        assert_eq!(id, artifact_id(&big));
    }

    // ── 14. entries reflects pin state and presence ─────────────────────

    #[test]
    fn entries_reflects_pin_state() {
        let mut store = MemoryTier::new();
        let id = store.put(b"tracked").unwrap();
        store.pin(&id);
        let entries = store.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, id);
        assert!(entries[0].1);
    }
}
