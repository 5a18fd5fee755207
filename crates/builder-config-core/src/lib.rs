// SPDX-License-Identifier: Apache-2.0
//! Config storage port and resolved workspace settings for the build system core.
//!
//! [`config::ConfigStore`]/[`config::ConfigService`] are a thin, storage-agnostic
//! persistence port (adapters live in `builder-config-fs`). [`settings::BuilderConfig`]
//! is the resolved, merged settings value every binary (`builder` CLI, coordinator,
//! worker) constructs once at startup by layering, lowest precedence first: compiled
//! defaults, a persisted `WORKSPACE` file, `BUILDER_*` environment variables, then
//! explicit CLI flags.
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

pub mod config;
pub mod settings;

pub use settings::{BuilderConfig, SandboxMode};
