// SPDX-License-Identifier: Apache-2.0
//! Byte-exact persisted entry codec (spec.md §6: "Persisted state").
//!
//! Layout: `ActionId (32 bytes) | status tag (1) | exit code present (1) +
//! exit code (4, i32 BE) | duration_ms (8, BE) | output count (4, BE) |
//! output ArtifactIds (32 each) | stdout length (4, BE) + bytes | stderr
//! length (4, BE) + bytes | input-fingerprint count (4, BE) + (path length
//! + utf8 path bytes + 32-byte fingerprint) pairs`. Every integer is
//! big-endian, matching the wire codec's endianness choice in
//! `builder-proto` so the whole system commits to one byte order.

use builder_cas::ArtifactId;
use builder_fingerprint::Fingerprint;
use builder_graph::ActionId;
use builder_sandbox::{ActionResult, ActionStatus, ResourceTelemetry};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// A persisted action cache entry: the recorded result plus the input
/// fingerprints it was computed against, used to detect staleness on
/// lookup (spec.md §4.2: "a stale entry ... is treated as a miss").
#[derive(Clone, Debug, PartialEq)]
pub struct StoredEntry {
    /// The recorded execution outcome.
    pub result: ActionResult,
    /// Fingerprints of every declared input at the time this entry was
    /// recorded, keyed by the path relative to the sandbox root.
    pub input_fingerprints: BTreeMap<PathBuf, Fingerprint>,
}

/// Errors decoding a persisted entry.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PersistError {
    /// The buffer ended before a required field could be read.
    #[error("[ACACHE_TRUNCATED] truncated entry, need {need} more bytes, have {have}")]
    Truncated {
        /// Bytes required to read the next field.
        need: usize,
        /// Bytes actually remaining.
        have: usize,
    },
    /// A status tag byte did not match any known [`ActionStatus`] variant.
    #[error("[ACACHE_BAD_STATUS] unknown status tag {0}")]
    BadStatusTag(u8),
    /// A path field was not valid UTF-8.
    #[error("[ACACHE_BAD_PATH] path bytes were not valid UTF-8")]
    BadPath,
}

fn status_tag(status: ActionStatus) -> u8 {
    match status {
        ActionStatus::Success => 0,
        ActionStatus::Failure => 1,
        ActionStatus::Timeout => 2,
        ActionStatus::Cancelled => 3,
    }
}

fn status_from_tag(tag: u8) -> Result<ActionStatus, PersistError> {
    match tag {
        0 => Ok(ActionStatus::Success),
        1 => Ok(ActionStatus::Failure),
        2 => Ok(ActionStatus::Timeout),
        3 => Ok(ActionStatus::Cancelled),
        other => Err(PersistError::BadStatusTag(other)),
    }
}

/// Encode `action_id`/`entry` to the persisted byte layout.
#[must_use]
pub fn encode(action_id: ActionId, entry: &StoredEntry) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&action_id.0 .0);

    buf.push(status_tag(entry.result.status));
    match entry.result.exit_code {
        Some(code) => {
            buf.push(1);
            buf.extend_from_slice(&code.to_be_bytes());
        }
        None => {
            buf.push(0);
            buf.extend_from_slice(&0i32.to_be_bytes());
        }
    }
    #[allow(clippy::cast_possible_truncation)]
    let duration_ms = entry.result.duration.as_millis() as u64;
    buf.extend_from_slice(&duration_ms.to_be_bytes());

    #[allow(clippy::cast_possible_truncation)]
    let output_count = entry.result.outputs.len() as u32;
    buf.extend_from_slice(&output_count.to_be_bytes());
    for output in &entry.result.outputs {
        buf.extend_from_slice(&output.0 .0);
    }

    write_bytes(&mut buf, &entry.result.stdout);
    write_bytes(&mut buf, &entry.result.stderr);

    #[allow(clippy::cast_possible_truncation)]
    let fp_count = entry.input_fingerprints.len() as u32;
    buf.extend_from_slice(&fp_count.to_be_bytes());
    for (path, fingerprint) in &entry.input_fingerprints {
        let path_bytes = path.to_string_lossy();
        write_bytes(&mut buf, path_bytes.as_bytes());
        buf.extend_from_slice(&fingerprint.0);
    }

    buf
}

fn write_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    #[allow(clippy::cast_possible_truncation)]
    let len = bytes.len() as u32;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(bytes);
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], PersistError> {
        if self.buf.len() < self.pos + n {
            return Err(PersistError::Truncated {
                need: n,
                have: self.buf.len().saturating_sub(self.pos),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u32(&mut self) -> Result<u32, PersistError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn take_u64(&mut self) -> Result<u64, PersistError> {
        let bytes = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(arr))
    }

    fn take_length_prefixed(&mut self) -> Result<&'a [u8], PersistError> {
        let len = self.take_u32()? as usize;
        self.take(len)
    }

    fn take_fingerprint(&mut self) -> Result<Fingerprint, PersistError> {
        let bytes = self.take(32)?;
        let mut arr = [0u8; 32];
        arr.copy_from_slice(bytes);
        Ok(Fingerprint(arr))
    }
}

/// Decode a persisted entry, returning its [`ActionId`] and [`StoredEntry`].
///
/// # Errors
///
/// Returns [`PersistError`] if `bytes` is truncated or carries an unknown
/// status tag — never panics on malformed input.
pub fn decode(bytes: &[u8]) -> Result<(ActionId, StoredEntry), PersistError> {
    let mut cursor = Cursor::new(bytes);
    let action_id = ActionId(cursor.take_fingerprint()?);

    let status = status_from_tag(cursor.take(1)?[0])?;
    let exit_present = cursor.take(1)?[0] == 1;
    let exit_bytes = cursor.take(4)?;
    let exit_raw = i32::from_be_bytes([exit_bytes[0], exit_bytes[1], exit_bytes[2], exit_bytes[3]]);
    let exit_code = exit_present.then_some(exit_raw);
    let duration_ms = cursor.take_u64()?;

    let output_count = cursor.take_u32()?;
    let mut outputs = Vec::with_capacity(output_count as usize);
    for _ in 0..output_count {
        outputs.push(ArtifactId(cursor.take_fingerprint()?));
    }

    let stdout = cursor.take_length_prefixed()?.to_vec();
    let stderr = cursor.take_length_prefixed()?.to_vec();

    let fp_count = cursor.take_u32()?;
    let mut input_fingerprints = BTreeMap::new();
    for _ in 0..fp_count {
        let path_bytes = cursor.take_length_prefixed()?;
        let path = std::str::from_utf8(path_bytes).map_err(|_| PersistError::BadPath)?;
        let fingerprint = cursor.take_fingerprint()?;
        input_fingerprints.insert(PathBuf::from(path), fingerprint);
    }

    let result = ActionResult {
        status,
        exit_code,
        duration: Duration::from_millis(duration_ms),
        outputs,
        stdout,
        stderr,
        resources: ResourceTelemetry { duration: Some(Duration::from_millis(duration_ms)) },
    };

    Ok((action_id, StoredEntry { result, input_fingerprints }))
}
