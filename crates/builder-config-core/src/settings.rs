// SPDX-License-Identifier: Apache-2.0
//! Resolved workspace settings (spec.md §6 `BUILDER_*` environment variables
//! and CLI flags).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Sandbox enforcement mode (`--sandbox={strict|permissive|off}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    /// Reads outside the declared input set fail the Action.
    Strict,
    /// Violations are reported but do not fail the Action.
    Permissive,
    /// No sandboxing; the Action runs with ambient filesystem/network access.
    Off,
}

impl Default for SandboxMode {
    fn default() -> Self {
        Self::Strict
    }
}

impl std::str::FromStr for SandboxMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(Self::Strict),
            "permissive" => Ok(Self::Permissive),
            "off" => Ok(Self::Off),
            other => Err(format!("invalid sandbox mode: {other}")),
        }
    }
}

/// Resolved settings a build invocation runs under.
///
/// Construct with [`BuilderConfig::from_env`], then apply CLI overrides with
/// [`BuilderConfig::apply_cli_overrides`] — CLI flags always win over
/// environment variables, which in turn win over the persisted `WORKSPACE`
/// file defaults baked into [`BuilderConfig::default`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Root directory for `.builder-cache/` (actions/, cas/, recordings/).
    pub cache_dir: PathBuf,
    /// Optional remote cache (CAS) endpoint URL.
    pub remote_cache_url: Option<String>,
    /// Maximum concurrent Actions (`--jobs N`).
    pub parallelism: usize,
    /// `tracing` filter directive (e.g. "info", "builder_scheduler=debug").
    pub log_level: String,
    /// Sandbox enforcement mode.
    pub sandbox_mode: SandboxMode,
    /// Disables both cache tiers entirely (`--no-cache`).
    pub no_cache: bool,
    /// Verbose output (`--verbose`).
    pub verbose: bool,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".builder-cache"),
            remote_cache_url: None,
            parallelism: std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get),
            log_level: "info".to_string(),
            sandbox_mode: SandboxMode::default(),
            no_cache: false,
            verbose: false,
        }
    }
}

impl BuilderConfig {
    /// Start from compiled defaults and layer `BUILDER_*` environment
    /// variables on top. Unset or unparsable variables fall back silently
    /// to the existing value; env parsing never fails the build.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("BUILDER_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Ok(url) = std::env::var("BUILDER_REMOTE_CACHE") {
            config.remote_cache_url = Some(url);
        }
        if let Ok(jobs) = std::env::var("BUILDER_PARALLELISM") {
            if let Ok(n) = jobs.parse::<usize>() {
                if n > 0 {
                    config.parallelism = n;
                }
            }
        }
        if let Ok(level) = std::env::var("BUILDER_LOG_LEVEL") {
            config.log_level = level;
        }
        config
    }

    /// Apply explicit CLI overrides (`None`/`false` fields leave the
    /// environment-derived value untouched).
    pub fn apply_cli_overrides(&mut self, overrides: CliOverrides) {
        if let Some(jobs) = overrides.jobs {
            self.parallelism = jobs;
        }
        if let Some(url) = overrides.remote_cache_url {
            self.remote_cache_url = Some(url);
        }
        if let Some(mode) = overrides.sandbox_mode {
            self.sandbox_mode = mode;
        }
        if overrides.no_cache {
            self.no_cache = true;
        }
        if overrides.verbose {
            self.verbose = true;
        }
    }
}

/// CLI-flag overrides layered over environment/default settings.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// `--jobs N`.
    pub jobs: Option<usize>,
    /// `--remote-cache URL`.
    pub remote_cache_url: Option<String>,
    /// `--sandbox=...`.
    pub sandbox_mode: Option<SandboxMode>,
    /// `--no-cache`.
    pub no_cache: bool,
    /// `--verbose`.
    pub verbose: bool,
}
