// SPDX-License-Identifier: Apache-2.0
//! The `builder` command-line tool: discovers a workspace's Builderfiles,
//! builds the target graph, synthesizes and runs Actions, and answers
//! `query` requests against the graph (spec.md §6, §10).
//!
//! This crate is the orchestration boundary described by
//! `builder_error::BuilderError`'s own docs: it is where the narrow error
//! types each subsystem crate defines get converted into one uniform,
//! renderable failure for the terminal.
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
    clippy::dbg_macro
)]
#![allow(
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::missing_const_for_fn,
    clippy::multiple_crate_versions
)]

pub mod handler;
pub mod pipeline;
pub mod query;
pub mod workspace;

pub use handler::ShellHandler;
pub use pipeline::{BuildReport, Plan, PipelineError};
pub use query::{evaluate as evaluate_query, Query, QueryError};
pub use workspace::{load_workspace, LoadedWorkspace, WorkspaceLoadError};
