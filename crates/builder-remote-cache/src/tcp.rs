// SPDX-License-Identifier: Apache-2.0
//! In-process TCP reference implementation of [`RemoteCache`].
//!
//! Grounded on `echo-session-service`'s accept-loop/per-connection pattern
//! (see `builder-coordinator`) generalized to the client side: one
//! connection per call keeps this reference implementation simple; a
//! production deployment would pool connections, which the [`RemoteCache`]
//! trait boundary leaves room for without changing callers.

use crate::protocol::{decode, encode, CacheMessage, ProtocolError};
use crate::{RemoteCache, RemoteCacheError};
use builder_graph::ActionId;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// A [`RemoteCache`] backed by a TCP connection to a cache server speaking
/// [`crate::protocol::CacheMessage`] framed with `builder-proto`'s wire
/// conventions (4-byte big-endian length prefix, CBOR body).
pub struct TcpRemoteCache {
    addr: SocketAddr,
}

impl TcpRemoteCache {
    /// Target a remote cache server at `addr`. No connection is made until
    /// the first call.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    async fn roundtrip(&self, request: &CacheMessage) -> Result<CacheMessage, RemoteCacheError> {
        let mut stream = TcpStream::connect(self.addr).await.map_err(RemoteCacheError::Connect)?;
        let framed = encode(request).map_err(RemoteCacheError::Protocol)?;
        stream.write_all(&framed).await.map_err(RemoteCacheError::Io)?;
        stream.flush().await.map_err(RemoteCacheError::Io)?;

        let mut buf = Vec::with_capacity(4096);
        loop {
            match decode(&buf) {
                Ok((message, _consumed)) => return Ok(message),
                Err(ProtocolError::IncompleteHeader | ProtocolError::IncompleteBody { .. }) => {
                    let mut chunk = [0u8; 4096];
                    let read = stream.read(&mut chunk).await.map_err(RemoteCacheError::Io)?;
                    if read == 0 {
                        return Err(RemoteCacheError::ConnectionClosed);
                    }
                    buf.extend_from_slice(&chunk[..read]);
                }
                Err(other) => return Err(RemoteCacheError::Protocol(other)),
            }
        }
    }
}

impl RemoteCache for TcpRemoteCache {
    async fn get(&self, id: ActionId) -> Result<Option<Vec<u8>>, RemoteCacheError> {
        match self.roundtrip(&CacheMessage::Get(id)).await? {
            CacheMessage::GetResponse(bytes) => Ok(bytes),
            other => Err(RemoteCacheError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    async fn get_many(&self, ids: &[ActionId]) -> Result<Vec<Option<Vec<u8>>>, RemoteCacheError> {
        match self.roundtrip(&CacheMessage::GetMany(ids.to_vec())).await? {
            CacheMessage::GetManyResponse(entries) => Ok(entries),
            other => Err(RemoteCacheError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    async fn put(&self, id: ActionId, bytes: Vec<u8>) -> Result<(), RemoteCacheError> {
        match self.roundtrip(&CacheMessage::Put(id, bytes)).await? {
            CacheMessage::PutAck => Ok(()),
            other => Err(RemoteCacheError::UnexpectedReply(format!("{other:?}"))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::protocol::decode as decode_msg;
    use builder_fingerprint::hash_bytes;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    fn id(tag: &str) -> ActionId {
        ActionId(hash_bytes(tag.as_bytes()))
    }

    /// Minimal single-shot server: accepts one connection, answers with
    /// whatever an in-memory map holds, then closes.
    async fn serve_once(listener: TcpListener, entries: Arc<Mutex<HashMap<ActionId, Vec<u8>>>>) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let reply = loop {
            match decode_msg(&buf) {
                Ok((CacheMessage::Get(requested), _)) => {
                    let found = entries.lock().unwrap().get(&requested).cloned();
                    break encode(&CacheMessage::GetResponse(found)).unwrap();
                }
                Ok((CacheMessage::Put(requested, bytes), _)) => {
                    entries.lock().unwrap().insert(requested, bytes);
                    break encode(&CacheMessage::PutAck).unwrap();
                }
                Ok((other, _)) => panic!("unexpected request in test server: {other:?}"),
                Err(_) => {
                    let mut chunk = [0u8; 4096];
                    let read = stream.read(&mut chunk).await.unwrap();
                    buf.extend_from_slice(&chunk[..read]);
                }
            }
        };
        stream.write_all(&reply).await.unwrap();
        stream.flush().await.unwrap();
    }

    #[tokio::test]
    async fn put_then_get_round_trips_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let entries = Arc::new(Mutex::new(HashMap::new()));

        let server_entries = entries.clone();
        let server = tokio::spawn(serve_once(listener, server_entries));
        let client = TcpRemoteCache::new(addr);
        client.put(id("a"), b"uploaded bytes".to_vec()).await.unwrap();
        server.await.unwrap();

        let listener2 = TcpListener::bind(addr).await.unwrap();
        let server2 = tokio::spawn(serve_once(listener2, entries));
        let fetched = client.get(id("a")).await.unwrap();
        server2.await.unwrap();
        assert_eq!(fetched, Some(b"uploaded bytes".to_vec()));
    }

    #[tokio::test]
    async fn get_of_unknown_id_returns_none() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let entries = Arc::new(Mutex::new(HashMap::new()));
        let server = tokio::spawn(serve_once(listener, entries));

        let client = TcpRemoteCache::new(addr);
        let fetched = client.get(id("ghost")).await.unwrap();
        server.await.unwrap();
        assert_eq!(fetched, None);
    }
}
