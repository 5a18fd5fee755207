// SPDX-License-Identifier: Apache-2.0
//! Content-defined chunking (CDC) for incremental change detection.
//!
//! Chunk boundaries are declared purely from a rolling hash over the
//! content bytes, so a local edit only perturbs the chunks adjacent to it —
//! the rest of a large file's chunk set is unaffected by an insertion or
//! deletion elsewhere, unlike fixed-size chunking.

use crate::{hash_bytes, Fingerprint};

const MIN_CHUNK: usize = 2 * 1024;
const TARGET_CHUNK: usize = 16 * 1024;
const MAX_CHUNK: usize = 64 * 1024;
/// Boundary declared when the low 14 bits of the rolling fingerprint are
/// zero — `2^14 == TARGET_CHUNK`, giving the target average chunk size.
const BOUNDARY_MASK: u64 = (1 << 14) - 1;

/// Content hash of a single chunk's bytes. A plain [`Fingerprint`] alias:
/// chunk identity is content-only, same as [`crate::hash_bytes`].
pub type ChunkHash = Fingerprint;

/// A content-defined chunk: its offset and length within the source, and
/// the hash of its bytes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Chunk {
    /// Byte offset of the chunk's start within the source.
    pub offset: u64,
    /// Length of the chunk in bytes.
    pub length: u32,
    /// Content hash of the chunk's bytes.
    pub hash: ChunkHash,
}

/// A Rabin-style rolling-hash content-defined chunker.
///
/// Min chunk 2 KiB, target average 16 KiB, max chunk 64 KiB. Boundary
/// decisions depend only on the bytes within the rolling window, never on
/// absolute file position, so edits affect only adjacent chunks.
#[derive(Debug, Default, Clone, Copy)]
pub struct Chunker;

impl Chunker {
    /// Split `data` into content-defined chunks.
    #[must_use]
    pub fn chunk(self, data: &[u8]) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut roll: u64 = 0;

        let mut i = 0usize;
        while i < data.len() {
            roll = roll.wrapping_mul(MULTIPLIER).wrapping_add(u64::from(data[i]));
            let len = i - start + 1;

            let at_boundary = len >= MIN_CHUNK && (roll & BOUNDARY_MASK) == 0;
            let at_max = len >= MAX_CHUNK;

            if at_boundary || at_max {
                chunks.push(finalize_chunk(data, start, i + 1));
                start = i + 1;
                roll = 0;
            }
            i += 1;
        }

        if start < data.len() {
            chunks.push(finalize_chunk(data, start, data.len()));
        }

        chunks
    }

    /// A single fingerprint over the ordered chunk hashes — the file's
    /// incremental signature. Two files with identical chunk sequences
    /// (even if chunked independently) produce the same signature.
    #[must_use]
    pub fn signature(self, data: &[u8]) -> Fingerprint {
        let chunks = self.chunk(data);
        let mut hasher = blake3::Hasher::new();
        for c in &chunks {
            hasher.update(c.hash.as_bytes());
        }
        Fingerprint(*hasher.finalize().as_bytes())
    }
}

/// Multiplier for the rolling polynomial hash. Odd, large, arbitrary —
/// only needs to spread bits well across the accumulator.
const MULTIPLIER: u64 = 0x0100_0000_01B3;

fn finalize_chunk(data: &[u8], start: usize, end: usize) -> Chunk {
    let bytes = &data[start..end];
    Chunk {
        offset: start as u64,
        #[allow(clippy::cast_possible_truncation)]
        length: bytes.len() as u32,
        hash: hash_bytes(bytes),
    }
}

/// Diff two chunk sequences by hash-set membership, not positional index.
///
/// Positional comparison is wrong under shifted edits: inserting a byte
/// near the start of a file shifts every subsequent chunk's index without
/// changing its content. Comparing by hash membership instead means only
/// the chunks whose *content* actually changed are reported.
///
/// Returns `(added, removed)`: chunks present in `new` but not `old`, and
/// chunks present in `old` but not `new`, each in their original order.
#[must_use]
pub fn find_changed_chunks(old: &[Chunk], new: &[Chunk]) -> (Vec<Chunk>, Vec<Chunk>) {
    let old_hashes: std::collections::HashSet<ChunkHash> = old.iter().map(|c| c.hash).collect();
    let new_hashes: std::collections::HashSet<ChunkHash> = new.iter().map(|c| c.hash).collect();

    let added = new
        .iter()
        .filter(|c| !old_hashes.contains(&c.hash))
        .copied()
        .collect();
    let removed = old
        .iter()
        .filter(|c| !new_hashes.contains(&c.hash))
        .copied()
        .collect();

    (added, removed)
}
