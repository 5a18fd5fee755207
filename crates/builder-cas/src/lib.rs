// SPDX-License-Identifier: Apache-2.0
//! Content-addressed blob store for the build system core.
//!
//! Provides a [`BlobStore`] trait for content-addressed storage keyed by
//! [`ArtifactId`]. [`MemoryTier`] is the in-process tier used by tests and
//! single-shot invocations; [`DiskTier`] persists blobs under a cache root,
//! path-sharded by the first two hex bytes of their id, for durability
//! across build invocations.
//!
//! # Hash Domain Policy
//!
//! CAS hash is content-only: `BLAKE3(bytes)` with no domain prefix. Two
//! blobs with identical bytes are the same CAS blob regardless of which
//! Action produced them — deduplication is a feature, not a bug.
//!
//! # Determinism Invariant
//!
//! No public API exposes store iteration order. CAS determinism is
//! content-level (same bytes → same id), not collection-level. Any future
//! `list`/`iter` API must return results sorted by [`ArtifactId`].
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
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::module_name_repetitions,
    clippy::multiple_crate_versions
)]

mod disk;
mod gc;
mod memory;

pub use disk::DiskTier;
pub use gc::{GcReport, RetentionPolicy};
pub use memory::MemoryTier;

use std::sync::Arc;
use std::time::SystemTime;

/// Fingerprint of a blob's content; the CAS's lookup key.
///
/// `#[repr(transparent)]` newtype over [`builder_fingerprint::Fingerprint`],
/// following the same thin-wrapper pattern the fingerprinting crate itself
/// uses for its own hash type.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, serde::Serialize, serde::Deserialize)]
pub struct ArtifactId(pub builder_fingerprint::Fingerprint);

impl ArtifactId {
    /// View the id as a byte slice.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.0.as_bytes()
    }

    /// Lowercase hex rendering, used for on-disk sharded paths.
    pub fn to_hex(self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

/// Compute the content id of `bytes`. No domain prefix — the content IS the
/// identity.
pub fn artifact_id(bytes: &[u8]) -> ArtifactId {
    ArtifactId(builder_fingerprint::hash_bytes(bytes))
}

/// Errors that can occur during CAS operations.
#[derive(Debug, thiserror::Error)]
pub enum CasError {
    /// Blob bytes did not match the declared id.
    #[error("[CAS_HASH_MISMATCH] expected {expected}, computed {computed}")]
    HashMismatch {
        /// The id that was declared/expected.
        expected: ArtifactId,
        /// The id actually computed from the bytes.
        computed: ArtifactId,
    },

    /// A disk-tier I/O operation failed.
    #[error("[CAS_IO] {path}: {source}")]
    Io {
        /// Path involved in the failing operation.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Content-addressed blob store.
///
/// Implementations store opaque byte blobs keyed by their [`ArtifactId`].
/// The trait is synchronous and object-safe; upload/download across the
/// wire is layered on top by `builder-remote-cache`, not part of this trait.
///
/// # Absence Semantics
///
/// [`get`](BlobStore::get) returns `None` for missing blobs — this is
/// **not** an error. CAS is a lookup table: missing blobs are expected
/// (not-yet-fetched, GC'd, never stored). Error variants are reserved for
/// integrity violations and I/O failures.
pub trait BlobStore {
    /// Compute id and store. Returns the content id.
    fn put(&mut self, bytes: &[u8]) -> Result<ArtifactId, CasError>;

    /// Store with a pre-computed id. Rejects if `hash(bytes) != expected`.
    ///
    /// On mismatch the store is unchanged. This method exists for receivers
    /// of distributed-protocol `ActionResult` payloads who already possess
    /// the id from the wire message.
    ///
    /// # Errors
    ///
    /// Returns [`CasError::HashMismatch`] if the computed id differs from
    /// `expected`.
    fn put_verified(&mut self, expected: ArtifactId, bytes: &[u8]) -> Result<(), CasError>;

    /// Retrieve blob by id. Returns `None` if not stored — absence is not
    /// an error.
    fn get(&self, id: &ArtifactId) -> Result<Option<Arc<[u8]>>, CasError>;

    /// Check existence without retrieving.
    fn has(&self, id: &ArtifactId) -> bool;

    /// Mark id as a retention root.
    ///
    /// Legal on missing blobs (pre-pin intent). Pin semantics are set-based
    /// (not reference-counted).
    fn pin(&mut self, id: &ArtifactId);

    /// Remove retention root. No-op if not pinned or not stored.
    fn unpin(&mut self, id: &ArtifactId);

    /// Returns `true` if `id` is currently pinned.
    fn is_pinned(&self, id: &ArtifactId) -> bool;

    /// All stored ids with metadata needed for GC decisions: the id, whether
    /// it is pinned, and the time it was last written or touched.
    fn entries(&self) -> Vec<(ArtifactId, bool, SystemTime)>;

    /// Remove a blob unconditionally. Used only by GC after a retention
    /// decision; callers outside `gc` should prefer `unpin` + GC sweep.
    fn remove(&mut self, id: &ArtifactId) -> Result<(), CasError>;
}
