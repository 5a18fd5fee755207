// SPDX-License-Identifier: Apache-2.0
//! TCP client for fetching/uploading individual CAS blobs from a remote
//! peer, grounded on `builder-remote-cache::tcp::TcpRemoteCache`'s
//! one-connection-per-call reference implementation.

use crate::remote_blob::{decode, encode, BlobMessage, BlobProtocolError};
use builder_cas::ArtifactId;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Errors raised fetching or uploading a blob over [`TcpBlobSource`].
#[derive(Debug, thiserror::Error)]
pub enum BlobFetchError {
    /// Could not establish a connection to the remote peer.
    #[error("[NETWORK_CONNECT] {0}")]
    Connect(std::io::Error),
    /// An I/O error occurred on an established connection.
    #[error("[NETWORK_IO] {0}")]
    Io(std::io::Error),
    /// The peer closed the connection before a complete reply arrived.
    #[error("[NETWORK_CLOSED] connection closed before a full reply was received")]
    ConnectionClosed,
    /// A framing or (de)serialization error occurred.
    #[error(transparent)]
    Protocol(#[from] BlobProtocolError),
    /// The peer replied with a message that doesn't answer the request.
    #[error("[NETWORK_UNEXPECTED_REPLY] {0}")]
    UnexpectedReply(String),
}

/// Client-side handle to a remote CAS peer, speaking [`BlobMessage`].
pub struct TcpBlobSource {
    addr: SocketAddr,
}

impl TcpBlobSource {
    /// Target a remote CAS peer at `addr`. No connection is made until the
    /// first call.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    async fn roundtrip(&self, request: &BlobMessage) -> Result<BlobMessage, BlobFetchError> {
        let mut stream = TcpStream::connect(self.addr).await.map_err(BlobFetchError::Connect)?;
        let framed = encode(request)?;
        stream.write_all(&framed).await.map_err(BlobFetchError::Io)?;
        stream.flush().await.map_err(BlobFetchError::Io)?;

        let mut buf = Vec::with_capacity(4096);
        loop {
            match decode(&buf) {
                Ok((message, _consumed)) => return Ok(message),
                Err(BlobProtocolError::IncompleteHeader | BlobProtocolError::IncompleteBody { .. }) => {
                    let mut chunk = [0u8; 4096];
                    let read = stream.read(&mut chunk).await.map_err(BlobFetchError::Io)?;
                    if read == 0 {
                        return Err(BlobFetchError::ConnectionClosed);
                    }
                    buf.extend_from_slice(&chunk[..read]);
                }
                Err(other) => return Err(BlobFetchError::Protocol(other)),
            }
        }
    }

    /// Fetch a blob's bytes, if the peer has it.
    ///
    /// # Errors
    ///
    /// Returns [`BlobFetchError`] on any transport or protocol failure; a
    /// peer that simply does not have the blob replies with `Ok(None)`.
    pub async fn get(&self, id: ArtifactId) -> Result<Option<Vec<u8>>, BlobFetchError> {
        match self.roundtrip(&BlobMessage::Get(id)).await? {
            BlobMessage::GetResponse(bytes) => Ok(bytes),
            other => Err(BlobFetchError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    /// Upload a blob's bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BlobFetchError`] on any transport or protocol failure.
    pub async fn put(&self, id: ArtifactId, bytes: Vec<u8>) -> Result<(), BlobFetchError> {
        match self.roundtrip(&BlobMessage::Put(id, bytes)).await? {
            BlobMessage::PutAck => Ok(()),
            other => Err(BlobFetchError::UnexpectedReply(format!("{other:?}"))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use builder_fingerprint::hash_bytes;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    fn artifact(tag: &str) -> ArtifactId {
        ArtifactId(hash_bytes(tag.as_bytes()))
    }

    async fn serve_once(listener: TcpListener, entries: Arc<Mutex<HashMap<ArtifactId, Vec<u8>>>>) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let reply = loop {
            match decode(&buf) {
                Ok((BlobMessage::Get(requested), _)) => {
                    let found = entries.lock().unwrap().get(&requested).cloned();
                    break encode(&BlobMessage::GetResponse(found)).unwrap();
                }
                Ok((BlobMessage::Put(requested, bytes), _)) => {
                    entries.lock().unwrap().insert(requested, bytes);
                    break encode(&BlobMessage::PutAck).unwrap();
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
    async fn fetches_an_uploaded_blob() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let entries = Arc::new(Mutex::new(HashMap::new()));

        let server_entries = entries.clone();
        let server = tokio::spawn(serve_once(listener, server_entries));
        let client = TcpBlobSource::new(addr);
        client.put(artifact("a"), b"uploaded bytes".to_vec()).await.unwrap();
        server.await.unwrap();

        let listener2 = TcpListener::bind(addr).await.unwrap();
        let server2 = tokio::spawn(serve_once(listener2, entries));
        let fetched = client.get(artifact("a")).await.unwrap();
        server2.await.unwrap();
        assert_eq!(fetched, Some(b"uploaded bytes".to_vec()));
    }

    #[tokio::test]
    async fn missing_blob_is_not_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let entries = Arc::new(Mutex::new(HashMap::new()));
        let server = tokio::spawn(serve_once(listener, entries));

        let client = TcpBlobSource::new(addr);
        let fetched = client.get(artifact("ghost")).await.unwrap();
        server.await.unwrap();
        assert_eq!(fetched, None);
    }
}
