// SPDX-License-Identifier: Apache-2.0
//! The `builder` command-line tool's entry point: `build`, `test`,
//! `clean`, and `query` subcommands over a workspace of Builderfiles
//! (spec.md §6, §10).
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

use anyhow::{Context, Result};
use builder_action_cache::{ActionCache, DiskEntryStore, EvictionPolicy};
use builder_cas::DiskTier;
use builder_cli::{evaluate_query, load_workspace, Query, ShellHandler};
use builder_config_core::settings::{BuilderConfig, CliOverrides, SandboxMode};
use builder_dsl::AggregationPolicy;
use builder_graph::HandlerRegistry;
use builder_remote_cache::TcpRemoteCache;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// A polyglot, hermetic build tool.
#[derive(Debug, Parser)]
#[command(name = "builder", version, about)]
struct Cli {
    /// Workspace root to operate in (defaults to the current directory).
    #[arg(long, global = true, default_value = ".")]
    workspace: PathBuf,
    /// Maximum concurrent Actions.
    #[arg(long)]
    jobs: Option<usize>,
    /// Remote cache server address (`host:port`).
    #[arg(long)]
    remote_cache: Option<String>,
    /// Sandbox enforcement mode.
    #[arg(long, value_parser = ["strict", "permissive", "off"])]
    sandbox: Option<String>,
    /// Disable both action cache tiers for this invocation.
    #[arg(long)]
    no_cache: bool,
    /// Verbose logging.
    #[arg(long, short)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build one or more targets (and their transitive dependencies).
    Build {
        /// Fully-qualified target names (`//pkg:name`).
        targets: Vec<String>,
    },
    /// Build and run one or more test targets.
    Test {
        /// Fully-qualified target names (`//pkg:name`).
        targets: Vec<String>,
    },
    /// Remove the workspace's local cache directory.
    Clean,
    /// Query the target graph (`deps(...)`, `rdeps(...)`, or a glob).
    Query {
        /// The query expression.
        expression: String,
    },
}

fn resolve_config(cli: &Cli) -> Result<BuilderConfig> {
    let mut config = BuilderConfig::from_env();
    let sandbox_mode = cli.sandbox.as_deref().map(str::parse::<SandboxMode>).transpose().map_err(anyhow::Error::msg)?;
    config.apply_cli_overrides(CliOverrides {
        jobs: cli.jobs,
        remote_cache_url: cli.remote_cache.clone(),
        sandbox_mode,
        no_cache: cli.no_cache,
        verbose: cli.verbose,
    });
    Ok(config)
}

async fn run_build(cli: &Cli, config: &BuilderConfig, targets: &[String]) -> Result<ExitCode> {
    let workspace_root = cli.workspace.canonicalize().unwrap_or_else(|_| cli.workspace.clone());
    let loaded = load_workspace(&workspace_root, AggregationPolicy::default());
    if !loaded.errors.is_empty() {
        for error in &loaded.errors {
            eprintln!("error: {error}");
        }
        return Ok(ExitCode::from(2));
    }

    let (graph, graph_errors) = builder_graph::build_graph(&loaded.statements);
    if !graph_errors.is_empty() {
        for error in &graph_errors {
            eprintln!("error: {error}");
        }
        return Ok(ExitCode::from(2));
    }

    let mut indices = Vec::with_capacity(targets.len());
    for name in targets {
        match graph.find(name) {
            Some(idx) => indices.push(idx),
            None => {
                eprintln!("error: unknown target: {name}");
                return Ok(ExitCode::from(2));
            }
        }
    }
    if indices.is_empty() {
        indices.extend(0..graph.len());
    }

    let mut registry = HandlerRegistry::new();
    registry.register("shell", Arc::new(ShellHandler::new(&workspace_root)));

    let cache_dir = workspace_root.join(&config.cache_dir);
    let cas_root = cache_dir.join("cas");
    let actions_root = cache_dir.join("actions");
    let sandbox_root = cache_dir.join("sandbox");
    std::fs::create_dir_all(&sandbox_root).with_context(|| format!("creating sandbox dir {}", sandbox_root.display()))?;

    let mut planning_cas = DiskTier::open(&cas_root).with_context(|| format!("opening CAS at {}", cas_root.display()))?;
    let plan = builder_cli::pipeline::plan(&graph, &indices, &registry, &workspace_root, &mut planning_cas)
        .context("planning build actions")?;

    let remote = cli
        .remote_cache
        .as_deref()
        .and_then(|addr| addr.parse::<SocketAddr>().ok())
        .map(TcpRemoteCache::new);

    if let Some(remote) = &remote {
        builder_cli::pipeline::pull_remote_entries(&plan, &actions_root, remote).await;
    }

    let execution_cas = Arc::new(parking_lot::Mutex::new(planning_cas));
    let cache = Arc::new(ActionCache::new(
        DiskEntryStore::open(&actions_root).with_context(|| format!("opening action cache at {}", actions_root.display()))?,
        DiskTier::open(&cas_root).with_context(|| format!("opening CAS at {}", cas_root.display()))?,
        EvictionPolicy::default(),
    ));

    let report = builder_cli::pipeline::run(&plan, &sandbox_root, cache, execution_cas, config.parallelism)
        .await
        .context("running build plan")?;

    if let Some(remote) = &remote {
        builder_cli::pipeline::push_remote_entries(&plan, &actions_root, remote).await;
    }

    println!(
        "build finished: {} succeeded, {} cached, {} failed",
        report.succeeded.len(),
        report.cached.len(),
        report.failed.len()
    );

    if report.failed.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}

fn run_clean(cli: &Cli, config: &BuilderConfig) -> Result<ExitCode> {
    let cache_dir = cli.workspace.join(&config.cache_dir);
    if cache_dir.exists() {
        std::fs::remove_dir_all(&cache_dir).with_context(|| format!("removing {}", cache_dir.display()))?;
    }
    println!("removed {}", cache_dir.display());
    Ok(ExitCode::SUCCESS)
}

fn run_query(cli: &Cli, expression: &str) -> Result<ExitCode> {
    let workspace_root = cli.workspace.canonicalize().unwrap_or_else(|_| cli.workspace.clone());
    let loaded = load_workspace(&workspace_root, AggregationPolicy::default());
    if !loaded.errors.is_empty() {
        for error in &loaded.errors {
            eprintln!("error: {error}");
        }
        return Ok(ExitCode::from(2));
    }
    let (graph, graph_errors) = builder_graph::build_graph(&loaded.statements);
    if !graph_errors.is_empty() {
        for error in &graph_errors {
            eprintln!("error: {error}");
        }
        return Ok(ExitCode::from(2));
    }

    let query = Query::parse(expression);
    match evaluate_query(&graph, &query) {
        Ok(names) => {
            for name in names {
                println!("{name}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(error) => {
            eprintln!("error: {error}");
            Ok(ExitCode::from(2))
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    let filter = if config.verbose { "debug" } else { config.log_level.as_str() };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let code = match &cli.command {
        Commands::Build { targets } | Commands::Test { targets } => run_build(&cli, &config, targets).await?,
        Commands::Clean => run_clean(&cli, &config)?,
        Commands::Query { expression } => run_query(&cli, expression)?,
    };
    Ok(code)
}
