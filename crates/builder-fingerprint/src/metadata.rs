// SPDX-License-Identifier: Apache-2.0
//! Three-tier metadata change check.
//!
//! Deciding "did this file change since last build" without rehashing
//! content is the common case, so it's checked in increasing cost/
//! confidence order: [`ChangeTier::Quick`] (size only), [`ChangeTier::Fast`]
//! (size + mtime), [`ChangeTier::Full`] (size + mtime + inode/device +
//! permissions). False positives (reporting changed when it isn't) are
//! acceptable at any tier; false negatives are forbidden — callers that
//! need a guarantee should use [`ChangeTier::Full`] and, on any mismatch,
//! fall back to content hashing via [`crate::hash_file`].

use crate::{FingerprintError, Fingerprint};
use std::fs;
use std::path::Path;
use std::time::UNIX_EPOCH;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

/// A captured snapshot of a file's cheap-to-read metadata.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FileStamp {
    size: u64,
    mtime_nanos: i128,
    /// `(device, inode)` pair. On non-unix platforms this is always
    /// `(0, 0)`, which degrades `ChangeTier::Full` to `ChangeTier::Fast`'s
    /// guarantees there — still sound (no false negatives), just less
    /// discriminating.
    dev_ino: (u64, u64),
    mode: u32,
}

impl FileStamp {
    /// Capture a file's current metadata stamp.
    ///
    /// # Errors
    ///
    /// Returns [`FingerprintError::Io`] if the file's metadata cannot be
    /// read.
    pub fn capture(path: &Path) -> Result<Self, FingerprintError> {
        let meta = fs::metadata(path).map_err(|e| FingerprintError::io(path, e))?;
        let mtime_nanos = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos() as i128);

        #[cfg(unix)]
        let (dev_ino, mode) = ((meta.dev(), meta.ino()), meta.mode());
        #[cfg(not(unix))]
        let (dev_ino, mode) = ((0, 0), 0);

        Ok(Self {
            size: meta.len(),
            mtime_nanos,
            dev_ino,
            mode,
        })
    }
}

/// Which metadata fields a change check compares.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ChangeTier {
    /// Size equality only.
    Quick,
    /// Size + modification time.
    Fast,
    /// Size + modification time + device/inode + permission bits.
    Full,
}

impl ChangeTier {
    /// Whether `prior` and `current` agree at this tier's granularity.
    #[must_use]
    pub fn matches(self, prior: &FileStamp, current: &FileStamp) -> bool {
        let size_ok = prior.size == current.size;
        match self {
            Self::Quick => size_ok,
            Self::Fast => size_ok && prior.mtime_nanos == current.mtime_nanos,
            Self::Full => {
                size_ok
                    && prior.mtime_nanos == current.mtime_nanos
                    && prior.dev_ino == current.dev_ino
                    && prior.mode == current.mode
            }
        }
    }
}

/// Check whether `path` has changed relative to `prior`, at the given tier.
///
/// A `true` result means "rehash content to be sure" for anything below
/// [`ChangeTier::Full`]; at `Full`, a `false` result is trusted outright and
/// a `true` result should trigger a content rehash via [`crate::hash_file`]
/// before concluding the file actually differs.
///
/// # Errors
///
/// Returns [`FingerprintError::Io`] if `path`'s metadata cannot be read.
pub fn has_changed(prior: &FileStamp, path: &Path, tier: ChangeTier) -> Result<bool, FingerprintError> {
    let current = FileStamp::capture(path)?;
    Ok(!tier.matches(prior, &current))
}

/// Marker fingerprint derived from a [`FileStamp`], useful for embedding a
/// metadata snapshot in a cache entry without keeping the full struct
/// layout stable across versions.
#[must_use]
pub fn stamp_fingerprint(stamp: &FileStamp) -> Fingerprint {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&stamp.size.to_le_bytes());
    hasher.update(&stamp.mtime_nanos.to_le_bytes());
    hasher.update(&stamp.dev_ino.0.to_le_bytes());
    hasher.update(&stamp.dev_ino.1.to_le_bytes());
    hasher.update(&stamp.mode.to_le_bytes());
    Fingerprint(*hasher.finalize().as_bytes())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn quick_tier_ignores_mtime_changes() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("f.txt");
        std::fs::write(&p, b"same size!").unwrap();
        let stamp = FileStamp::capture(&p).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        std::fs::write(&p, b"same size?").unwrap();

        assert!(!has_changed(&stamp, &p, ChangeTier::Quick).unwrap());
    }

    #[test]
    fn fast_tier_detects_mtime_change_even_with_same_size() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("f.txt");
        std::fs::write(&p, b"same size!").unwrap();
        let stamp = FileStamp::capture(&p).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(&p, b"same size?").unwrap();

        assert!(has_changed(&stamp, &p, ChangeTier::Fast).unwrap());
    }

    #[test]
    fn full_tier_never_produces_false_negative_relative_to_fast() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("f.txt");
        std::fs::write(&p, b"content").unwrap();
        let stamp = FileStamp::capture(&p).unwrap();

        // Unchanged file: all tiers agree nothing changed.
        assert!(!has_changed(&stamp, &p, ChangeTier::Quick).unwrap());
        assert!(!has_changed(&stamp, &p, ChangeTier::Fast).unwrap());
        assert!(!has_changed(&stamp, &p, ChangeTier::Full).unwrap());
    }

    #[test]
    fn stamp_fingerprint_is_stable_for_identical_stamps() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("f.txt");
        std::fs::write(&p, b"content").unwrap();
        let a = FileStamp::capture(&p).unwrap();
        let b = FileStamp::capture(&p).unwrap();
        assert_eq!(stamp_fingerprint(&a), stamp_fingerprint(&b));
    }
}
