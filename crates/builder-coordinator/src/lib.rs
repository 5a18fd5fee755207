// SPDX-License-Identifier: Apache-2.0
//! Distributed build coordinator: worker registry, heartbeat-derived health
//! monitoring, and capability/load-aware dispatch over `builder-proto`'s
//! wire protocol (spec.md §4.6-§4.7).
//!
//! The coordinator layers worker dispatch on top of the same
//! `builder_scheduler::Scheduler` used for single-host builds: the Action
//! state machine, retry policy, and failure propagation are shared between
//! the single-host and distributed paths. This crate adds the pieces that
//! only make sense once Actions run on other machines: who is out there
//! ([`registry::WorkerRegistry`]), whether they are still alive
//! ([`health`]), and which one gets the next Action ([`dispatch`]).
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

pub mod coordinator;
pub mod dispatch;
pub mod health;
pub mod registry;

pub use coordinator::Coordinator;
pub use dispatch::{pick_worker, satisfies, STEAL_OVERLOAD_THRESHOLD, STEAL_UNDERLOAD_THRESHOLD};
pub use health::{classify, HealthState, HEARTBEAT_INTERVAL};
pub use registry::{WorkerEntry, WorkerRegistry};
