// SPDX-License-Identifier: Apache-2.0
//! `ShellHandler`: the one [`LanguageHandler`] this crate ships out of the
//! box, for the `language: "shell"` target tag. It resolves `sources` (glob
//! patterns relative to the workspace root) and runs `target.config.command`
//! against them inside the sandbox (spec.md §4.3, §6).
//!
//! Other languages are expected to register their own handler with
//! [`builder_graph::HandlerRegistry`]; this crate does not hardcode a
//! closed set.

use builder_graph::{ActionDescriptor, HandlerError, Import, LanguageHandler, ResourceLimits, Target};
use std::path::PathBuf;

/// Builds one [`ActionDescriptor`] per `shell`-language target: its
/// resolved sources become both the sandbox inputs and the command's
/// trailing arguments, run through a single `sh -c` invocation.
#[derive(Debug)]
pub struct ShellHandler {
    workspace_root: PathBuf,
}

impl ShellHandler {
    /// Create a handler that resolves globs relative to `workspace_root`.
    #[must_use]
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
        }
    }

    /// Resolve a target's declared `sources` patterns into paths relative
    /// to the workspace root, sorted and deduplicated.
    fn resolve_sources(&self, target: &Target) -> Vec<PathBuf> {
        let mut resolved = Vec::new();
        for pattern in &target.sources {
            for absolute in builder_dsl::glob(pattern, &self.workspace_root) {
                if let Ok(relative) = absolute.strip_prefix(&self.workspace_root) {
                    resolved.push(relative.to_path_buf());
                }
            }
        }
        resolved.sort();
        resolved.dedup();
        resolved
    }

    fn command_for(target: &Target) -> Result<String, HandlerError> {
        target
            .config
            .get("command")
            .and_then(literal_string)
            .ok_or_else(|| HandlerError::InvalidConfig {
                target: target.name.clone(),
                message: "shell targets require a string \"command\" field".to_string(),
            })
    }

    fn output_path(target: &Target) -> PathBuf {
        target.output.clone().map_or_else(|| PathBuf::from(format!("{}.out", sanitize(&target.name))), PathBuf::from)
    }
}

impl LanguageHandler for ShellHandler {
    fn build(&self, target: &Target, _workspace: &builder_graph::BuildGraph) -> Result<Vec<ActionDescriptor>, HandlerError> {
        let command = Self::command_for(target)?;
        let sources = self.resolve_sources(target);
        let output = Self::output_path(target);

        let mut args = vec!["-c".to_string(), command];
        args.extend(target.flags.iter().cloned());
        args.extend(sources.iter().map(|p| p.display().to_string()));

        Ok(vec![ActionDescriptor {
            command: "sh".to_string(),
            args,
            env: target.env.clone(),
            inputs: sources,
            outputs: vec![output],
            resources: ResourceLimits::default(),
            toolchain: "sh".to_string(),
        }])
    }

    fn outputs(&self, target: &Target, _workspace: &builder_graph::BuildGraph) -> Vec<PathBuf> {
        vec![Self::output_path(target)]
    }

    fn analyze_imports(&self, _sources: &[String]) -> Vec<Import> {
        Vec::new()
    }
}

fn literal_string(expr: &builder_dsl::ast::Expr) -> Option<String> {
    match expr {
        builder_dsl::ast::Expr::Literal(builder_dsl::ast::Literal::String(s)) => Some(s.clone()),
        _ => None,
    }
}

/// Replace path-hostile characters (`/`, `:`) in a fully-qualified target
/// name so it is safe to use as a filename component.
fn sanitize(name: &str) -> String {
    name.chars().map(|c| if c == '/' || c == ':' { '_' } else { c }).collect()
}
