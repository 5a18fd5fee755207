// SPDX-License-Identifier: Apache-2.0
//! Wire messages exchanged with a remote cache peer, framed the same way
//! as `builder-proto::wire` (4-byte big-endian length prefix + CBOR body)
//! so the whole system stays on one codec and one endianness, but kept as
//! their own small enum rather than reusing [`builder_proto::Payload`] —
//! the cache protocol is a simple request/response exchange, not part of
//! the coordinator/worker dispatch catalogue.
//!
//! The frame body carries a one-byte compression tag ahead of the CBOR
//! payload (spec.md §4.2: "same interface, with compressed transfer").
//! `encode` picks zstd whenever it actually shrinks the body — persisted
//! action-cache entries routinely embed captured stdout/stderr, which
//! compresses well — and falls back to the bytes as-is otherwise, so a
//! small request never pays a compression tax it can't recoup.

use builder_graph::ActionId;
use serde::{Deserialize, Serialize};

/// Maximum accepted frame body size: 64 MiB, matching `builder-proto`'s
/// ceiling for the same reason (bound a hostile/corrupt length prefix).
pub const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

/// zstd compression level used for frame bodies. Low: this is a
/// request/response transport, not archival storage, so encode latency
/// matters more than squeezing out the last few percent of ratio.
const ZSTD_LEVEL: i32 = 3;

/// Bodies smaller than this are sent uncompressed outright — zstd's frame
/// overhead would net-grow them.
const COMPRESSION_THRESHOLD: usize = 256;

/// How a frame body is compressed, tagged by the single byte ahead of the
/// CBOR payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FrameCompression {
    None = 0,
    Zstd = 1,
}

impl FrameCompression {
    const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::None),
            1 => Some(Self::Zstd),
            _ => None,
        }
    }
}

/// A request or response exchanged with a remote cache peer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CacheMessage {
    /// Request the persisted entry bytes for one `ActionId`.
    Get(ActionId),
    /// Request the persisted entry bytes for several `ActionId`s in one
    /// round trip (spec.md §4.2: "batched multi-get").
    GetMany(Vec<ActionId>),
    /// Reply to [`CacheMessage::Get`]: `None` if the peer has no entry.
    GetResponse(Option<Vec<u8>>),
    /// Reply to [`CacheMessage::GetMany`], one slot per requested id, in
    /// the same order, `None` where the peer has no entry.
    GetManyResponse(Vec<Option<Vec<u8>>>),
    /// Upload the persisted entry bytes for one `ActionId`.
    Put(ActionId, Vec<u8>),
    /// Acknowledge a [`CacheMessage::Put`].
    PutAck,
}

/// Errors encoding or decoding a framed [`CacheMessage`].
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The buffer does not yet contain a complete 4-byte length prefix.
    #[error("[RCACHE_INCOMPLETE] incomplete frame header")]
    IncompleteHeader,
    /// The buffer's declared length exceeds [`MAX_FRAME_BYTES`].
    #[error("[RCACHE_FRAME_TOO_LARGE] frame of {0} bytes exceeds the {MAX_FRAME_BYTES} byte ceiling")]
    FrameTooLarge(u32),
    /// The buffer does not yet contain the full body the header declared.
    #[error("[RCACHE_INCOMPLETE] incomplete frame body: have {have}, need {need}")]
    IncompleteBody {
        /// Bytes currently available.
        have: usize,
        /// Bytes the length prefix declares.
        need: usize,
    },
    /// CBOR serialization failed.
    #[error("[RCACHE_ENCODE] {0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),
    /// CBOR deserialization failed, e.g. corrupt or unknown message shape.
    #[error("[RCACHE_DECODE] {0}")]
    Decode(#[from] ciborium::de::Error<std::io::Error>),
    /// zstd compression of the frame body failed.
    #[error("[RCACHE_COMPRESS] {0}")]
    Compress(std::io::Error),
    /// zstd decompression of the frame body failed.
    #[error("[RCACHE_DECOMPRESS] {0}")]
    Decompress(std::io::Error),
    /// The frame body's compression tag byte is none of the known values.
    #[error("[RCACHE_UNKNOWN_COMPRESSION] unrecognized compression tag {0}")]
    UnknownCompression(u8),
}

/// Encode `message` as a length-prefixed, compression-tagged CBOR frame.
///
/// The body is zstd-compressed when that actually shrinks it (see
/// [`COMPRESSION_THRESHOLD`]); otherwise it's carried verbatim with a
/// `None` tag, so compression can never make a frame larger.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if CBOR serialization fails, or
/// [`ProtocolError::Compress`] if zstd compression fails.
pub fn encode(message: &CacheMessage) -> Result<Vec<u8>, ProtocolError> {
    let mut plain = Vec::new();
    ciborium::ser::into_writer(message, &mut plain)?;

    let (tag, payload) = if plain.len() >= COMPRESSION_THRESHOLD {
        let compressed = zstd::stream::encode_all(plain.as_slice(), ZSTD_LEVEL).map_err(ProtocolError::Compress)?;
        if compressed.len() < plain.len() {
            (FrameCompression::Zstd, compressed)
        } else {
            (FrameCompression::None, plain)
        }
    } else {
        (FrameCompression::None, plain)
    };

    let mut out = Vec::with_capacity(5 + payload.len());
    #[allow(clippy::cast_possible_truncation)]
    out.extend_from_slice(&(1 + payload.len() as u32).to_be_bytes());
    out.push(tag as u8);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Decode one framed [`CacheMessage`] from the front of `buf`, returning
/// the message and the number of bytes consumed.
///
/// # Errors
///
/// Returns [`ProtocolError::IncompleteHeader`] or
/// [`ProtocolError::IncompleteBody`] if more bytes are needed,
/// [`ProtocolError::FrameTooLarge`] if the declared length exceeds
/// [`MAX_FRAME_BYTES`], [`ProtocolError::UnknownCompression`] if the tag
/// byte is unrecognized, [`ProtocolError::Decompress`] if zstd
/// decompression of a `Zstd`-tagged body fails, or [`ProtocolError::Decode`]
/// on a malformed CBOR body.
pub fn decode(buf: &[u8]) -> Result<(CacheMessage, usize), ProtocolError> {
    if buf.len() < 4 {
        return Err(ProtocolError::IncompleteHeader);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if len > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    let len = len as usize;
    if buf.len() < 4 + len {
        return Err(ProtocolError::IncompleteBody { have: buf.len(), need: 4 + len });
    }
    if len == 0 {
        return Err(ProtocolError::IncompleteBody { have: len, need: 1 });
    }
    let tag = buf[4];
    let compression = FrameCompression::from_tag(tag).ok_or(ProtocolError::UnknownCompression(tag))?;
    let body = &buf[5..4 + len];
    let message = match compression {
        FrameCompression::None => ciborium::de::from_reader(body)?,
        FrameCompression::Zstd => {
            let decompressed = zstd::stream::decode_all(body).map_err(ProtocolError::Decompress)?;
            ciborium::de::from_reader(decompressed.as_slice())?
        }
    };
    Ok((message, 4 + len))
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
    fn round_trips_a_get_request() {
        let message = CacheMessage::Get(id("a"));
        let framed = encode(&message).unwrap();
        let (decoded, consumed) = decode(&framed).unwrap();
        assert_eq!(consumed, framed.len());
        assert_eq!(decoded, message);
    }

    #[test]
    fn round_trips_a_put_request_with_payload() {
        let message = CacheMessage::Put(id("a"), b"entry bytes".to_vec());
        let framed = encode(&message).unwrap();
        let (decoded, _) = decode(&framed).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn incomplete_header_is_reported() {
        assert!(matches!(decode(&[0, 0]), Err(ProtocolError::IncompleteHeader)));
    }

    #[test]
    fn incomplete_body_is_reported() {
        let framed = encode(&CacheMessage::GetResponse(Some(vec![1, 2, 3]))).unwrap();
        let truncated = &framed[..framed.len() - 1];
        assert!(matches!(decode(truncated), Err(ProtocolError::IncompleteBody { .. })));
    }

    #[test]
    fn small_payloads_are_sent_uncompressed() {
        let message = CacheMessage::Get(id("a"));
        let framed = encode(&message).unwrap();
        assert_eq!(framed[4], FrameCompression::None as u8);
    }

    #[test]
    fn large_compressible_payloads_round_trip_via_zstd() {
        // Highly repetitive bytes compress well; real entries embed
        // captured stdout/stderr, which tends to look like this.
        let payload = vec![b'x'; 16 * 1024];
        let message = CacheMessage::Put(id("a"), payload.clone());
        let framed = encode(&message).unwrap();

        assert_eq!(framed[4], FrameCompression::Zstd as u8);
        assert!(framed.len() < payload.len());

        let (decoded, consumed) = decode(&framed).unwrap();
        assert_eq!(consumed, framed.len());
        assert_eq!(decoded, message);
    }

    #[test]
    fn unrecognized_compression_tag_is_reported() {
        let mut framed = encode(&CacheMessage::Get(id("a"))).unwrap();
        framed[4] = 0xFF;
        assert!(matches!(decode(&framed), Err(ProtocolError::UnknownCompression(0xFF))));
    }
}
