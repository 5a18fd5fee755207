// SPDX-License-Identifier: Apache-2.0
//! Tier-2 remote action cache client (spec.md §4.2: "Remote cache client
//! (optional tier-2): same interface, with compressed transfer and
//! batched multi-get. Reads consult local first, then remote; writes are
//! write-through with best-effort async remote upload (failure to upload
//! does not fail the build).").
//!
//! [`RemoteCache`] is the client-side port; [`TcpRemoteCache`] is an
//! in-process reference implementation over `builder-proto`'s wire
//! conventions. [`LayeredCache`] composes a local byte-oriented store with
//! a [`RemoteCache`] to give the local-then-remote read order and
//! write-through upload the spec requires. Frames are zstd-compressed past
//! a size threshold (see [`protocol`]) — persisted entries routinely embed
//! captured stdout/stderr, which compresses well.
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

pub mod protocol;
mod tcp;

pub use protocol::{CacheMessage, ProtocolError};
pub use tcp::TcpRemoteCache;

use builder_graph::ActionId;
use std::sync::Arc;
use tracing::instrument;

/// Errors raised by a [`RemoteCache`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum RemoteCacheError {
    /// Could not establish a connection to the remote peer.
    #[error("[RCACHE_CONNECT] {0}")]
    Connect(std::io::Error),
    /// An I/O error occurred on an established connection.
    #[error("[RCACHE_IO] {0}")]
    Io(std::io::Error),
    /// The peer closed the connection before a complete reply arrived.
    #[error("[RCACHE_CLOSED] connection closed before a full reply was received")]
    ConnectionClosed,
    /// A framing or (de)serialization error occurred.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// The peer replied with a message that doesn't answer the request
    /// that was sent (a protocol/implementation bug, not a cache miss).
    #[error("[RCACHE_UNEXPECTED_REPLY] {0}")]
    UnexpectedReply(String),
}

/// Client-side port for a tier-2 remote action cache. Implementations
/// carry persisted entry bytes exactly as produced by
/// `builder-action-cache`'s codec — this crate is transport-only and does
/// not interpret the bytes.
pub trait RemoteCache: Send + Sync {
    /// Fetch the persisted entry bytes for `id`, if the peer has them.
    fn get(&self, id: ActionId) -> impl std::future::Future<Output = Result<Option<Vec<u8>>, RemoteCacheError>> + Send;

    /// Fetch persisted entry bytes for several ids in one round trip.
    /// Default implementation issues individual [`Self::get`] calls
    /// sequentially; a real peer connection should override this with a
    /// single batched request.
    fn get_many(
        &self,
        ids: &[ActionId],
    ) -> impl std::future::Future<Output = Result<Vec<Option<Vec<u8>>>, RemoteCacheError>> + Send {
        async move {
            let mut out = Vec::with_capacity(ids.len());
            for &id in ids {
                out.push(self.get(id).await?);
            }
            Ok(out)
        }
    }

    /// Upload the persisted entry bytes for `id`.
    fn put(&self, id: ActionId, bytes: Vec<u8>) -> impl std::future::Future<Output = Result<(), RemoteCacheError>> + Send;
}

/// Composes a local byte store with a [`RemoteCache`]: reads check local
/// first, falling back to remote and writing through on a remote hit;
/// writes go to local synchronously and to remote best-effort.
pub struct LayeredCache<R: RemoteCache> {
    remote: Arc<R>,
}

impl<R: RemoteCache + 'static> LayeredCache<R> {
    /// Wrap `remote` as the tier-2 backing store for a local cache.
    pub const fn new(remote: Arc<R>) -> Self {
        Self { remote }
    }

    /// Local-then-remote read: if `local_get` returns `Some`, that's the
    /// answer; otherwise this consults the remote peer and, on a hit,
    /// write the bytes back into local storage via `local_put` so future
    /// lookups hit locally.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteCacheError`] only for a remote-side failure; a
    /// local miss followed by a remote miss is `Ok(None)`, not an error.
    #[instrument(skip(self, local_get, local_put))]
    pub async fn get<FGet, FPut>(
        &self,
        id: ActionId,
        local_get: FGet,
        local_put: FPut,
    ) -> Result<Option<Vec<u8>>, RemoteCacheError>
    where
        FGet: FnOnce() -> Option<Vec<u8>>,
        FPut: FnOnce(&[u8]),
    {
        if let Some(bytes) = local_get() {
            return Ok(Some(bytes));
        }
        let Some(bytes) = self.remote.get(id).await? else {
            return Ok(None);
        };
        local_put(&bytes);
        Ok(Some(bytes))
    }

    /// Write-through upload: the caller has already committed `bytes`
    /// locally; this spawns a best-effort background upload to the
    /// remote peer whose failure is logged but never propagated (spec.md
    /// §4.2: "failure to upload does not fail the build").
    pub fn put_best_effort(&self, id: ActionId, bytes: Vec<u8>)
    where
        R: 'static,
    {
        let remote = self.remote.clone();
        tokio::spawn(async move {
            if let Err(error) = remote.put(id, bytes).await {
                tracing::warn!(%error, "best-effort remote cache upload failed");
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use builder_fingerprint::hash_bytes;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn id(tag: &str) -> ActionId {
        ActionId(hash_bytes(tag.as_bytes()))
    }

    struct FakeRemote {
        entries: Mutex<HashMap<ActionId, Vec<u8>>>,
    }

    impl RemoteCache for FakeRemote {
        async fn get(&self, id: ActionId) -> Result<Option<Vec<u8>>, RemoteCacheError> {
            Ok(self.entries.lock().unwrap().get(&id).cloned())
        }

        async fn put(&self, id: ActionId, bytes: Vec<u8>) -> Result<(), RemoteCacheError> {
            self.entries.lock().unwrap().insert(id, bytes);
            Ok(())
        }
    }

    #[tokio::test]
    async fn local_hit_never_consults_remote() {
        let remote = Arc::new(FakeRemote { entries: Mutex::new(HashMap::new()) });
        let layered = LayeredCache::new(remote);

        let result = layered.get(id("a"), || Some(b"local".to_vec()), |_| panic!("must not write through")).await.unwrap();
        assert_eq!(result, Some(b"local".to_vec()));
    }

    #[tokio::test]
    async fn remote_hit_writes_through_to_local() {
        let mut entries = HashMap::new();
        entries.insert(id("a"), b"from remote".to_vec());
        let remote = Arc::new(FakeRemote { entries: Mutex::new(entries) });
        let layered = LayeredCache::new(remote);

        let mut written = None;
        let result = layered.get(id("a"), || None, |bytes| written = Some(bytes.to_vec())).await.unwrap();
        assert_eq!(result, Some(b"from remote".to_vec()));
        assert_eq!(written, Some(b"from remote".to_vec()));
    }

    #[tokio::test]
    async fn miss_on_both_tiers_is_not_an_error() {
        let remote = Arc::new(FakeRemote { entries: Mutex::new(HashMap::new()) });
        let layered = LayeredCache::new(remote);
        let result = layered.get(id("ghost"), || None, |_| panic!("nothing to write through")).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn get_many_default_impl_preserves_order() {
        let mut entries = HashMap::new();
        entries.insert(id("a"), b"first".to_vec());
        let remote = FakeRemote { entries: Mutex::new(entries) };
        let results = remote.get_many(&[id("a"), id("b")]).await.unwrap();
        assert_eq!(results, vec![Some(b"first".to_vec()), None]);
    }
}
