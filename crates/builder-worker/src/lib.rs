// SPDX-License-Identifier: Apache-2.0
//! Distributed build worker library: fetching missing inputs, executing
//! Actions under the hermetic executor, and tracking the load a worker
//! reports back to its coordinator (spec.md §4.8).
//!
//! The worker binary (`src/main.rs`) wires these pieces to a single
//! persistent TCP connection to the coordinator; this crate's public API is
//! transport-agnostic so it can be exercised directly in tests.
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

mod execution;
mod fetch;
mod remote_blob;

pub use execution::{execute_request, materialize_inputs, WorkerExecutionError};
pub use fetch::{BlobFetchError, TcpBlobSource};
pub use remote_blob::{decode as decode_blob_message, encode as encode_blob_message, BlobMessage, BlobProtocolError};

use builder_proto::LoadMetrics;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{Semaphore, SemaphorePermit};

/// Bounds how many Actions this worker executes concurrently
/// (`--jobs`/`BUILDER_PARALLELISM`, spec.md §4.8).
pub struct ExecutionSlots {
    semaphore: Semaphore,
    capacity: u32,
}

impl ExecutionSlots {
    /// Allow up to `capacity` concurrent executions. `capacity` is clamped
    /// to at least 1: a worker with zero slots could never make progress.
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Semaphore::new(capacity as usize),
            capacity,
        }
    }

    /// The configured concurrency ceiling.
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Wait for a free execution slot. Never errors: the semaphore backing
    /// this type is never closed for the lifetime of a worker process.
    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        loop {
            if let Ok(permit) = self.semaphore.acquire().await {
                return permit;
            }
        }
    }

    /// Number of slots currently free.
    #[must_use]
    pub fn available(&self) -> u32 {
        u32::try_from(self.semaphore.available_permits()).unwrap_or(u32::MAX)
    }
}

/// Tracks this worker's in-flight Action count and reported queue depth for
/// `HeartBeat` payloads (spec.md §4.6).
#[derive(Default)]
pub struct WorkerLoad {
    active: AtomicU32,
    queued: AtomicU32,
}

impl WorkerLoad {
    /// Construct with zero active Actions and an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that one more Action started executing.
    pub fn begin(&self) {
        self.active.fetch_add(1, Ordering::SeqCst);
    }

    /// Record that one Action finished executing (success, failure, or
    /// cancellation — every terminal outcome frees the slot).
    pub fn end(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    /// Currently executing Action count.
    #[must_use]
    pub fn active_count(&self) -> u32 {
        self.active.load(Ordering::SeqCst)
    }

    /// Record the number of Actions waiting for a free execution slot.
    pub fn set_queue_depth(&self, depth: u32) {
        self.queued.store(depth, Ordering::SeqCst);
    }

    /// Currently reported queue depth.
    #[must_use]
    pub fn queue_depth(&self) -> u32 {
        self.queued.load(Ordering::SeqCst)
    }

    /// Build the `LoadMetrics` carried in the next `HeartBeat`, combining
    /// this worker's own counters with host-level usage fractions the
    /// caller supplies (this crate does not sample host CPU/memory/disk
    /// itself — no such dependency is otherwise reached for in this corpus).
    #[must_use]
    pub fn snapshot(&self, cpu_usage: f32, mem_usage: f32, disk_usage: f32) -> LoadMetrics {
        LoadMetrics {
            cpu_usage,
            mem_usage,
            disk_usage,
            queue_depth: self.queue_depth(),
            active_actions: self.active_count(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execution_slots_bounds_concurrency() {
        let slots = ExecutionSlots::new(2);
        assert_eq!(slots.available(), 2);
        let a = slots.acquire().await;
        let b = slots.acquire().await;
        assert_eq!(slots.available(), 0);
        drop(a);
        assert_eq!(slots.available(), 1);
        drop(b);
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let slots = ExecutionSlots::new(0);
        assert_eq!(slots.capacity(), 1);
    }

    #[test]
    fn worker_load_tracks_begin_and_end() {
        let load = WorkerLoad::new();
        assert_eq!(load.active_count(), 0);
        load.begin();
        load.begin();
        assert_eq!(load.active_count(), 2);
        load.end();
        assert_eq!(load.active_count(), 1);
    }

    #[test]
    fn snapshot_carries_host_usage_and_local_counters() {
        let load = WorkerLoad::new();
        load.begin();
        load.set_queue_depth(3);
        let metrics = load.snapshot(0.4, 0.6, 0.1);
        assert!((metrics.load_factor() - 0.6).abs() < f32::EPSILON);
        assert_eq!(metrics.queue_depth, 3);
        assert_eq!(metrics.active_actions, 1);
    }
}
