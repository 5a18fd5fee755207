// SPDX-License-Identifier: Apache-2.0
//! On-disk content-addressed blob store.
//!
//! [`DiskTier`] persists blobs under a cache root, one file per blob, path-
//! sharded by the first two hex bytes of the id (`<root>/ab/abcdef...`) per
//! the workspace on-disk layout's `.builder-cache/cas/` shape. Pins are
//! tracked in-memory only — a fresh `DiskTier::open` starts with an empty
//! pin-set, matching the CAS's role as a content-addressed lookup table
//! rather than a retention ledger (retention state belongs to the action
//! cache, which references these blobs by id).

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::{artifact_id, ArtifactId, BlobStore, CasError};

/// On-disk content-addressed blob store rooted at a cache directory.
pub struct DiskTier {
    root: PathBuf,
    pins: HashSet<ArtifactId>,
}

impl DiskTier {
    /// Open (creating if absent) a disk-backed store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`CasError::Io`] if `root` cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CasError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| CasError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            pins: HashSet::new(),
        })
    }

    /// The root directory this tier is persisted under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &ArtifactId) -> PathBuf {
        let hex = id.to_hex();
        let shard = &hex[..2];
        self.root.join(shard).join(hex)
    }

    fn io_err(path: &Path, source: std::io::Error) -> CasError {
        CasError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl BlobStore for DiskTier {
    fn put(&mut self, bytes: &[u8]) -> Result<ArtifactId, CasError> {
        let id = artifact_id(bytes);
        if !self.has(&id) {
            let path = self.path_for(&id);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| Self::io_err(parent, e))?;
            }
            // Content-addressed writes are idempotent: write to a sibling
            // temp file then rename, so a concurrent writer of the same id
            // never observes a partial file.
            let tmp = path.with_extension("tmp");
            fs::write(&tmp, bytes).map_err(|e| Self::io_err(&tmp, e))?;
            fs::rename(&tmp, &path).map_err(|e| Self::io_err(&path, e))?;
        }
        Ok(id)
    }

    fn put_verified(&mut self, expected: ArtifactId, bytes: &[u8]) -> Result<(), CasError> {
        let computed = artifact_id(bytes);
        if computed != expected {
            return Err(CasError::HashMismatch { expected, computed });
        }
        self.put(bytes).map(|_| ())
    }

    fn get(&self, id: &ArtifactId) -> Result<Option<Arc<[u8]>>, CasError> {
        let path = self.path_for(id);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(Arc::from(bytes))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_err(&path, e)),
        }
    }

    fn has(&self, id: &ArtifactId) -> bool {
        self.path_for(id).is_file()
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
        let mut out = Vec::new();
        let Ok(shards) = fs::read_dir(&self.root) else {
            return out;
        };
        for shard in shards.flatten() {
            let Ok(files) = fs::read_dir(shard.path()) else {
                continue;
            };
            for file in files.flatten() {
                let name = file.file_name();
                let Some(hex) = name.to_str() else { continue };
                if hex.ends_with(".tmp") {
                    continue;
                }
                let Ok(bytes) = hex::decode(hex) else { continue };
                if bytes.len() != 32 {
                    continue;
                }
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&bytes);
                let id = ArtifactId(builder_fingerprint::Fingerprint(arr));
                let touched = file
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                out.push((id, self.pins.contains(&id), touched));
            }
        }
        out
    }

    fn remove(&mut self, id: &ArtifactId) -> Result<(), CasError> {
        let path = self.path_for(id);
        self.pins.remove(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_err(&path, e)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn put_get_round_trip_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DiskTier::open(dir.path()).unwrap();
        let id = store.put(b"disk tier content").unwrap();
        assert_eq!(store.get(&id).unwrap().as_deref(), Some(&b"disk tier content"[..]));
    }

    #[test]
    fn shards_by_first_two_hex_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DiskTier::open(dir.path()).unwrap();
        let id = store.put(b"shard me").unwrap();
        let hex = id.to_hex();
        let expected = dir.path().join(&hex[..2]).join(&hex);
        assert!(expected.is_file());
    }

    #[test]
    fn reopening_store_sees_prior_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let id;
        {
            let mut store = DiskTier::open(dir.path()).unwrap();
            id = store.put(b"persisted across opens").unwrap();
        }
        let store = DiskTier::open(dir.path()).unwrap();
        assert!(store.has(&id));
    }

    #[test]
    fn missing_blob_returns_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskTier::open(dir.path()).unwrap();
        let id = artifact_id(b"never written");
        assert!(store.get(&id).unwrap().is_none());
    }

    #[test]
    fn put_verified_rejects_mismatch_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DiskTier::open(dir.path()).unwrap();
        let bad_id = artifact_id(b"wrong bytes");
        let result = store.put_verified(bad_id, b"actual bytes");
        assert!(result.is_err());
        assert!(!store.has(&bad_id));
    }

    #[test]
    fn entries_lists_all_stored_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DiskTier::open(dir.path()).unwrap();
        store.put(b"one").unwrap();
        store.put(b"two").unwrap();
        assert_eq!(store.entries().len(), 2);
    }

    #[test]
    fn remove_deletes_file_and_unpins() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DiskTier::open(dir.path()).unwrap();
        let id = store.put(b"removable").unwrap();
        store.pin(&id);
        store.remove(&id).unwrap();
        assert!(!store.has(&id));
        assert!(!store.is_pinned(&id));
    }
}
