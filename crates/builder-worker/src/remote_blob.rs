// SPDX-License-Identifier: Apache-2.0
//! Wire messages for fetching/uploading CAS blobs by [`ArtifactId`] to a
//! remote peer, framed the same way as `builder-proto::wire` and
//! `builder-remote-cache::protocol` (4-byte big-endian length prefix, CBOR
//! body) so the whole system stays on one codec.
//!
//! This is a distinct, smaller protocol from `builder-remote-cache`'s
//! [`ActionId`](builder_graph::ActionId)-keyed entry replication: a worker
//! materializing an Action's sandbox needs individual blob bytes by
//! [`ArtifactId`] (spec.md §4.8: "Fetch missing inputs by ArtifactId from
//! CAS, local first, then remote"), not persisted action-cache entries.

use builder_cas::ArtifactId;
use serde::{Deserialize, Serialize};

/// Maximum accepted frame body size, matching the other wire protocols in
/// this workspace.
pub const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

/// A request or response exchanged with a remote CAS peer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum BlobMessage {
    /// Request the bytes of one blob.
    Get(ArtifactId),
    /// Reply to [`BlobMessage::Get`]: `None` if the peer does not have it.
    GetResponse(Option<Vec<u8>>),
    /// Upload a blob's bytes.
    Put(ArtifactId, Vec<u8>),
    /// Acknowledge a [`BlobMessage::Put`].
    PutAck,
}

/// Errors encoding or decoding a framed [`BlobMessage`].
#[derive(Debug, thiserror::Error)]
pub enum BlobProtocolError {
    /// The buffer does not yet contain a complete 4-byte length prefix.
    #[error("[NETWORK_INCOMPLETE] incomplete frame header")]
    IncompleteHeader,
    /// The buffer's declared length exceeds [`MAX_FRAME_BYTES`].
    #[error("[NETWORK_FRAME_TOO_LARGE] frame of {0} bytes exceeds the {MAX_FRAME_BYTES} byte ceiling")]
    FrameTooLarge(u32),
    /// The buffer does not yet contain the full body the header declared.
    #[error("[NETWORK_INCOMPLETE] incomplete frame body: have {have}, need {need}")]
    IncompleteBody {
        /// Bytes currently available.
        have: usize,
        /// Bytes the length prefix declares.
        need: usize,
    },
    /// CBOR serialization failed.
    #[error("[NETWORK_ENCODE] {0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),
    /// CBOR deserialization failed.
    #[error("[NETWORK_DECODE] {0}")]
    Decode(#[from] ciborium::de::Error<std::io::Error>),
}

/// Encode `message` as a length-prefixed CBOR frame.
///
/// # Errors
///
/// Returns [`BlobProtocolError::Encode`] if CBOR serialization fails.
pub fn encode(message: &BlobMessage) -> Result<Vec<u8>, BlobProtocolError> {
    let mut body = Vec::new();
    ciborium::ser::into_writer(message, &mut body)?;
    let mut out = Vec::with_capacity(4 + body.len());
    #[allow(clippy::cast_possible_truncation)]
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode one framed [`BlobMessage`] from the front of `buf`.
///
/// # Errors
///
/// Returns [`BlobProtocolError::IncompleteHeader`] or
/// [`BlobProtocolError::IncompleteBody`] if more bytes are needed,
/// [`BlobProtocolError::FrameTooLarge`] if the declared length exceeds
/// [`MAX_FRAME_BYTES`], or [`BlobProtocolError::Decode`] on a malformed body.
pub fn decode(buf: &[u8]) -> Result<(BlobMessage, usize), BlobProtocolError> {
    if buf.len() < 4 {
        return Err(BlobProtocolError::IncompleteHeader);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if len > MAX_FRAME_BYTES {
        return Err(BlobProtocolError::FrameTooLarge(len));
    }
    let len = len as usize;
    if buf.len() < 4 + len {
        return Err(BlobProtocolError::IncompleteBody { have: buf.len(), need: 4 + len });
    }
    let message = ciborium::de::from_reader(&buf[4..4 + len])?;
    Ok((message, 4 + len))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use builder_fingerprint::hash_bytes;

    fn artifact(tag: &str) -> ArtifactId {
        ArtifactId(hash_bytes(tag.as_bytes()))
    }

    #[test]
    fn round_trips_a_get_request() {
        let message = BlobMessage::Get(artifact("a"));
        let framed = encode(&message).unwrap();
        let (decoded, consumed) = decode(&framed).unwrap();
        assert_eq!(consumed, framed.len());
        assert_eq!(decoded, message);
    }

    #[test]
    fn round_trips_a_put_with_payload() {
        let message = BlobMessage::Put(artifact("a"), b"blob bytes".to_vec());
        let framed = encode(&message).unwrap();
        let (decoded, _) = decode(&framed).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn incomplete_header_is_reported() {
        assert!(matches!(decode(&[0, 0]), Err(BlobProtocolError::IncompleteHeader)));
    }
}
