// SPDX-License-Identifier: Apache-2.0

//! Repository maintenance tasks for this workspace.
//!
//! This crate exists to provide a single, discoverable entrypoint for repo
//! automation via `cargo xtask …`.
//!
//! Invariants:
//! - This is *not* production runtime code; it may invoke external tools
//!   (`cargo fmt`).
//! - Prefer deterministic output ordering for generated reports.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Workspace maintenance tasks (cargo xtask …)",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run `cargo fmt --check` over the whole workspace.
    FmtCheck,
    /// List source files under `crates/*/src` with no `#[cfg(test)]` module.
    CoverageGaps,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::FmtCheck => run_fmt_check(),
        Commands::CoverageGaps => run_coverage_gaps(),
    }
}

fn run_fmt_check() -> Result<()> {
    let status = Command::new("cargo")
        .args(["fmt", "--all", "--", "--check"])
        .status()
        .context("failed to spawn `cargo fmt` (is it installed?)")?;

    if !status.success() {
        bail!("cargo fmt --check failed (exit status: {status})");
    }
    Ok(())
}

/// Collect every `.rs` file under `root`, recursively, in sorted order.
fn collect_rust_files(root: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    if !root.exists() {
        return Ok(());
    }
    let mut entries: Vec<_> = std::fs::read_dir(root)
        .with_context(|| format!("failed to read directory '{}'", root.display()))?
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort_by_key(std::fs::DirEntry::path);

    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            collect_rust_files(&path, out)?;
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            out.push(path);
        }
    }
    Ok(())
}

/// Report every crate source file with no `#[cfg(test)]` module, so gaps in
/// unit-test coverage are visible without running a coverage instrumenter.
fn run_coverage_gaps() -> Result<()> {
    let crates_dir = Path::new("crates");
    if !crates_dir.exists() {
        bail!("no 'crates' directory found in the current working directory");
    }

    let mut gaps = Vec::new();
    let mut crate_dirs: Vec<_> = std::fs::read_dir(crates_dir)
        .context("failed to read 'crates' directory")?
        .collect::<std::io::Result<Vec<_>>>()?;
    crate_dirs.sort_by_key(std::fs::DirEntry::path);

    for crate_dir in crate_dirs {
        let src = crate_dir.path().join("src");
        let mut files = Vec::new();
        collect_rust_files(&src, &mut files)?;
        for file in files {
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read '{}'", file.display()))?;
            if !contents.contains("#[cfg(test)]") {
                gaps.push(file);
            }
        }
    }

    if gaps.is_empty() {
        println!("coverage-gaps: every crate source file has a #[cfg(test)] module.");
        return Ok(());
    }

    println!("coverage-gaps: {} file(s) with no test module:", gaps.len());
    for gap in &gaps {
        println!("  {}", gap.display());
    }
    bail!("{} file(s) lack a #[cfg(test)] module", gaps.len());
}
