// SPDX-License-Identifier: Apache-2.0
//! Length-prefixed CBOR framing for [`Envelope`](crate::Envelope)s.
//!
//! A frame is a 4-byte big-endian length prefix followed by exactly that
//! many bytes of CBOR-encoded envelope (spec.md §4.6). Unknown payload type
//! tags are rejected as a structured [`WireError`], never a panic.
//!
//! Envelopes whose encoded size reaches [`COMPRESSION_THRESHOLD`] (an
//! `ActionResultMsg` carrying captured stdout/stderr is the common case)
//! are zstd-compressed before framing; `encode` stamps the envelope's own
//! [`Compression`] field to match what it actually did, and `decode`
//! reverses it transparently, so callers never branch on compression
//! themselves.

use crate::{Compression, Envelope};

/// Maximum accepted frame body size: 64 MiB. Guards against a corrupt or
/// hostile length prefix causing an unbounded allocation.
pub const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

/// zstd compression level used for envelope frames. Low: dispatch traffic
/// favors encode latency over ratio.
const ZSTD_LEVEL: i32 = 3;

/// Encoded envelopes smaller than this are framed uncompressed — zstd's
/// frame overhead would net-grow them.
const COMPRESSION_THRESHOLD: usize = 256;

/// Errors raised while encoding or decoding framed envelopes.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
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
    /// CBOR serialization of an envelope failed.
    #[error("[NETWORK_ENCODE] failed to encode envelope: {0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),
    /// CBOR deserialization of a frame body failed, e.g. an unknown payload tag.
    #[error("[NETWORK_DECODE] failed to decode envelope: {0}")]
    Decode(#[from] ciborium::de::Error<std::io::Error>),
    /// zstd compression of a frame body failed.
    #[error("[NETWORK_COMPRESS] {0}")]
    Compress(std::io::Error),
    /// zstd decompression of a frame body failed.
    #[error("[NETWORK_DECOMPRESS] {0}")]
    Decompress(std::io::Error),
}

/// Encode `envelope` as a length-prefixed CBOR frame, compressing the body
/// with zstd when it's large enough to be worth it.
///
/// The frame carries a one-byte compression tag ahead of the CBOR body
/// (`0` = none, `1` = zstd); the serialized copy's own
/// [`Envelope::compression`] field is overwritten to match, so a decoded
/// envelope's field always reflects how its frame was actually carried.
/// The caller's own `envelope` is untouched.
///
/// # Errors
///
/// Returns [`WireError::Encode`] if CBOR serialization fails, or
/// [`WireError::Compress`] if zstd compression fails.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, WireError> {
    let mut uncompressed = Vec::new();
    ciborium::ser::into_writer(envelope, &mut uncompressed)?;

    let (tag, body) = if uncompressed.len() >= COMPRESSION_THRESHOLD {
        let compressed = zstd::stream::encode_all(uncompressed.as_slice(), ZSTD_LEVEL).map_err(WireError::Compress)?;
        if compressed.len() < uncompressed.len() {
            let mut stamped = envelope.clone();
            stamped.compression = Compression::Zstd;
            let mut stamped_plain = Vec::new();
            ciborium::ser::into_writer(&stamped, &mut stamped_plain)?;
            let stamped_compressed =
                zstd::stream::encode_all(stamped_plain.as_slice(), ZSTD_LEVEL).map_err(WireError::Compress)?;
            (1u8, stamped_compressed)
        } else {
            (0u8, uncompressed)
        }
    } else {
        (0u8, uncompressed)
    };

    let mut out = Vec::with_capacity(5 + body.len());
    #[allow(clippy::cast_possible_truncation)]
    out.extend_from_slice(&(1 + body.len() as u32).to_be_bytes());
    out.push(tag);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode one framed envelope from the front of `buf`, returning the
/// envelope and the number of bytes consumed. `buf` may contain a partial
/// frame or additional trailing frames; only the first is decoded.
///
/// # Errors
///
/// Returns [`WireError::IncompleteHeader`] or [`WireError::IncompleteBody`]
/// if `buf` does not yet hold a full frame (the caller should read more and
/// retry), [`WireError::FrameTooLarge`] if the declared length exceeds
/// [`MAX_FRAME_BYTES`], [`WireError::Decompress`] if a compressed body
/// fails to decompress, or [`WireError::Decode`] if the body is not a valid
/// [`Envelope`].
pub fn decode(buf: &[u8]) -> Result<(Envelope, usize), WireError> {
    if buf.len() < 4 {
        return Err(WireError::IncompleteHeader);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if len > MAX_FRAME_BYTES {
        return Err(WireError::FrameTooLarge(len));
    }
    let len = len as usize;
    if buf.len() < 4 + len {
        return Err(WireError::IncompleteBody { have: buf.len(), need: 4 + len });
    }
    if len == 0 {
        return Err(WireError::IncompleteBody { have: len, need: 1 });
    }

    let tag = buf[4];
    let body = &buf[5..4 + len];
    let envelope = if tag == 1 {
        let decompressed = zstd::stream::decode_all(body).map_err(WireError::Decompress)?;
        ciborium::de::from_reader(decompressed.as_slice())?
    } else {
        ciborium::de::from_reader(body)?
    };
    Ok((envelope, 4 + len))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{Compression, HeartBeat, LoadMetrics, MessageId, Payload, WorkerId, WorkerState};

    fn sample_envelope() -> Envelope {
        Envelope {
            version: crate::PROTOCOL_VERSION,
            message_id: MessageId(42),
            sender: WorkerId(1),
            recipient: WorkerId::COORDINATOR,
            timestamp: crate::Timestamp(1_700_000_000_000_000_000),
            compression: Compression::None,
            payload: Payload::HeartBeat(HeartBeat {
                state: WorkerState::Alive,
                load: LoadMetrics { cpu_usage: 0.2, mem_usage: 0.4, disk_usage: 0.1, queue_depth: 3, active_actions: 1 },
                active_actions: vec![],
            }),
        }
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let envelope = sample_envelope();
        let framed = encode(&envelope).unwrap();
        let (decoded, consumed) = decode(&framed).unwrap();
        assert_eq!(consumed, framed.len());
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn decode_reports_incomplete_header() {
        assert!(matches!(decode(&[0, 0]), Err(WireError::IncompleteHeader)));
    }

    #[test]
    fn decode_reports_incomplete_body() {
        let envelope = sample_envelope();
        let framed = encode(&envelope).unwrap();
        let truncated = &framed[..framed.len() - 1];
        assert!(matches!(decode(truncated), Err(WireError::IncompleteBody { .. })));
    }

    #[test]
    fn decode_rejects_oversized_length_prefix() {
        let mut buf = (MAX_FRAME_BYTES + 1).to_be_bytes().to_vec();
        buf.extend_from_slice(&[0; 8]);
        assert!(matches!(decode(&buf), Err(WireError::FrameTooLarge(_))));
    }

    #[test]
    fn two_frames_back_to_back_decode_independently() {
        let a = encode(&sample_envelope()).unwrap();
        let mut b_env = sample_envelope();
        b_env.message_id = MessageId(43);
        let b = encode(&b_env).unwrap();

        let mut combined = a.clone();
        combined.extend_from_slice(&b);

        let (first, consumed) = decode(&combined).unwrap();
        assert_eq!(first.message_id, MessageId(42));
        let (second, _) = decode(&combined[consumed..]).unwrap();
        assert_eq!(second.message_id, MessageId(43));
    }

    #[test]
    fn small_envelopes_are_framed_uncompressed() {
        let envelope = sample_envelope();
        let framed = encode(&envelope).unwrap();
        assert_eq!(framed[4], 0);
    }

    #[test]
    fn large_envelopes_round_trip_via_zstd_and_report_it_in_compression() {
        use builder_graph::ActionId;
        use builder_fingerprint::Fingerprint;

        let mut envelope = sample_envelope();
        envelope.payload = Payload::HeartBeat(HeartBeat {
            state: WorkerState::Alive,
            load: LoadMetrics { cpu_usage: 0.2, mem_usage: 0.4, disk_usage: 0.1, queue_depth: 3, active_actions: 1 },
            active_actions: (0..200u8).map(|n| ActionId(Fingerprint([n; 32]))).collect(),
        });
        let framed = encode(&envelope).unwrap();

        assert_eq!(framed[4], 1);
        let (decoded, consumed) = decode(&framed).unwrap();
        assert_eq!(consumed, framed.len());
        assert_eq!(decoded.compression, Compression::Zstd);
        assert_eq!(decoded.payload, envelope.payload);
    }
}
