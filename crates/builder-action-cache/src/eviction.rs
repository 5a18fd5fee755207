// SPDX-License-Identifier: Apache-2.0
//! LRU eviction with a total-size watermark (spec.md §4.2: "Eviction: LRU
//! by access time with a total-size watermark. Entries pin their blobs
//! for the retention window to avoid races with in-flight readers.").
//!
//! Grounded on `builder_cas::gc::sweep`'s shape (retention-window
//! protection before removal), generalized from a pin-flag check to an
//! access-time-based LRU ordering against a byte budget.

use crate::store::EntryStore;
use builder_graph::ActionId;
use std::time::{Duration, SystemTime};

/// Eviction policy: total byte budget plus a minimum age before an entry
/// becomes eligible, protecting entries written moments ago from racing
/// an in-flight reader.
#[derive(Clone, Copy, Debug)]
pub struct EvictionPolicy {
    /// Evict down to at most this many total bytes.
    pub max_bytes: u64,
    /// Minimum age an entry must reach before it is evictable.
    pub min_age: Duration,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self { max_bytes: 1024 * 1024 * 1024, min_age: Duration::from_secs(60) }
    }
}

/// Outcome of one eviction pass.
#[derive(Debug, Default, Clone)]
pub struct EvictionReport {
    /// Entries removed by this pass.
    pub evicted: Vec<ActionId>,
    /// Total bytes remaining after this pass.
    pub retained_bytes: u64,
}

/// Evict least-recently-touched entries from `store` until its total size
/// is at or below `policy.max_bytes`, skipping anything younger than
/// `policy.min_age`. Eviction stops (rather than violating the retention
/// window) if every over-budget entry is still too young.
///
/// # Errors
///
/// Returns the first [`crate::store::StoreError`] encountered while
/// removing an entry.
pub fn evict(store: &mut dyn EntryStore, policy: EvictionPolicy) -> Result<EvictionReport, crate::store::StoreError> {
    let now = SystemTime::now();
    let mut entries = store.entries();
    entries.sort_by_key(|(_, _, touched)| *touched);

    let mut total: u64 = entries.iter().map(|(_, size, _)| *size as u64).sum();
    let mut report = EvictionReport { evicted: Vec::new(), retained_bytes: total };

    for (id, size, touched) in entries {
        if total <= policy.max_bytes {
            break;
        }
        let age = now.duration_since(touched).unwrap_or(Duration::ZERO);
        if age < policy.min_age {
            continue;
        }
        store.remove(id)?;
        total = total.saturating_sub(size as u64);
        report.evicted.push(id);
    }

    report.retained_bytes = total;
    Ok(report)
}
