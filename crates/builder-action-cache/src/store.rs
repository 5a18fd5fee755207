// SPDX-License-Identifier: Apache-2.0
//! Keyed storage for persisted action cache entries.
//!
//! Unlike `builder-cas`'s content-addressed [`builder_cas::BlobStore`],
//! entries here are keyed by `ActionId` (the action's identity, not a hash
//! of the entry bytes) — so this is a small keyed store rather than a
//! reuse of `BlobStore`, though [`DiskEntryStore`] mirrors
//! `builder-cas`'s `DiskTier` path-sharding and atomic-write approach.

use builder_graph::ActionId;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// I/O errors from an [`EntryStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A filesystem operation failed.
    #[error("[ACACHE_IO] {path}: {source}")]
    Io {
        /// Path the operation targeted.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Keyed, byte-oriented persistence for encoded action cache entries.
pub trait EntryStore: Send + Sync {
    /// Write the encoded entry for `id`, overwriting any prior entry.
    fn put(&mut self, id: ActionId, bytes: &[u8]) -> Result<(), StoreError>;
    /// Read the encoded entry for `id`, if present.
    fn get(&self, id: ActionId) -> Result<Option<Vec<u8>>, StoreError>;
    /// Remove the entry for `id`. Absence is not an error.
    fn remove(&mut self, id: ActionId) -> Result<(), StoreError>;
    /// Every stored entry's id, approximate byte size, and last-access time.
    fn entries(&self) -> Vec<(ActionId, usize, SystemTime)>;
    /// Record that `id` was read just now, for LRU purposes.
    fn touch(&mut self, id: ActionId);
}

/// In-memory [`EntryStore`], useful for tests and single-process builds
/// with no persistence requirement.
#[derive(Default)]
pub struct MemoryEntryStore {
    entries: HashMap<ActionId, (Vec<u8>, SystemTime)>,
}

impl MemoryEntryStore {
    /// An empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }
}

impl EntryStore for MemoryEntryStore {
    fn put(&mut self, id: ActionId, bytes: &[u8]) -> Result<(), StoreError> {
        self.entries.insert(id, (bytes.to_vec(), SystemTime::now()));
        Ok(())
    }

    fn get(&self, id: ActionId) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.entries.get(&id).map(|(bytes, _)| bytes.clone()))
    }

    fn remove(&mut self, id: ActionId) -> Result<(), StoreError> {
        self.entries.remove(&id);
        Ok(())
    }

    fn entries(&self) -> Vec<(ActionId, usize, SystemTime)> {
        self.entries.iter().map(|(id, (bytes, touched))| (*id, bytes.len(), *touched)).collect()
    }

    fn touch(&mut self, id: ActionId) {
        let now = SystemTime::now();
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.1 = now;
        }
    }
}

/// On-disk [`EntryStore`], one file per entry, path-sharded by the first
/// two hex bytes of the `ActionId` the same way `builder-cas::DiskTier`
/// shards blobs.
pub struct DiskEntryStore {
    root: PathBuf,
}

impl DiskEntryStore {
    /// Open (creating if absent) a disk-backed entry store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if `root` cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io { path: root.clone(), source })?;
        Ok(Self { root })
    }

    fn path_for(&self, id: ActionId) -> PathBuf {
        let hex = hex::encode(id.0 .0);
        self.root.join(&hex[..2]).join(hex)
    }

    fn io_err(path: &Path, source: std::io::Error) -> StoreError {
        StoreError::Io { path: path.to_path_buf(), source }
    }
}

impl EntryStore for DiskEntryStore {
    fn put(&mut self, id: ActionId, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Self::io_err(parent, e))?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes).map_err(|e| Self::io_err(&tmp, e))?;
        fs::rename(&tmp, &path).map_err(|e| Self::io_err(&path, e))
    }

    fn get(&self, id: ActionId) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(id);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_err(&path, e)),
        }
    }

    fn remove(&mut self, id: ActionId) -> Result<(), StoreError> {
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) | Err(_) => Ok(()),
        }
    }

    fn entries(&self) -> Vec<(ActionId, usize, SystemTime)> {
        let mut out = Vec::new();
        let Ok(shards) = fs::read_dir(&self.root) else {
            return out;
        };
        for shard in shards.flatten() {
            let Ok(files) = fs::read_dir(shard.path()) else { continue };
            for file in files.flatten() {
                let name = file.file_name();
                let Some(hex_name) = name.to_str() else { continue };
                if hex_name.ends_with(".tmp") {
                    continue;
                }
                let Ok(raw) = hex::decode(hex_name) else { continue };
                if raw.len() != 32 {
                    continue;
                }
                let mut arr = [0u8; 32];
                arr.copy_from_slice(&raw);
                let id = ActionId(builder_fingerprint::Fingerprint(arr));
                let Ok(meta) = file.metadata() else { continue };
                let touched = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                #[allow(clippy::cast_possible_truncation)]
                let size = meta.len() as usize;
                out.push((id, size, touched));
            }
        }
        out
    }

    fn touch(&mut self, id: ActionId) {
        // Re-write the mtime by touching the file; a miss here (entry
        // absent) is not an error worth surfacing to LRU bookkeeping.
        if let Ok(Some(bytes)) = self.get(id) {
            let _ = self.put(id, &bytes);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use builder_fingerprint::hash_bytes;

    fn id(tag: &str) -> ActionId {
        ActionId(hash_bytes(tag.as_bytes()))
    }

    #[test]
    fn memory_store_round_trips() {
        let mut store = MemoryEntryStore::new();
        store.put(id("a"), b"payload").unwrap();
        assert_eq!(store.get(id("a")).unwrap(), Some(b"payload".to_vec()));
        store.remove(id("a")).unwrap();
        assert_eq!(store.get(id("a")).unwrap(), None);
    }

    #[test]
    fn disk_store_round_trips_and_shards() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = DiskEntryStore::open(dir.path()).unwrap();
        store.put(id("a"), b"payload").unwrap();
        assert_eq!(store.get(id("a")).unwrap(), Some(b"payload".to_vec()));
        assert_eq!(store.entries().len(), 1);
    }

    #[test]
    fn missing_entry_is_none_not_error() {
        let store = MemoryEntryStore::new();
        assert!(store.get(id("ghost")).unwrap().is_none());
    }
}
