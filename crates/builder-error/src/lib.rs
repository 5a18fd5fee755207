// SPDX-License-Identifier: Apache-2.0
//! Structured error taxonomy shared across the build system core.
//!
//! Every narrow, per-crate `thiserror` enum (`CasError`, `SandboxError`,
//! `ParseError`, ...) converts into [`BuilderError`] at the orchestration
//! boundary so the CLI can render a uniform, suggestion-annotated failure
//! regardless of which subsystem raised it. Individual subsystems should
//! keep their own narrow error types and implement `From<TheirError> for
//! BuilderError`, not construct `BuilderError` directly from deep call
//! sites.
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
    clippy::multiple_crate_versions
)]

use std::fmt;
use std::path::PathBuf;

/// Top-level error category, matching spec §7's taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Syntax, unknown field, duplicate target, cycle detection.
    Parse,
    /// File not found, permission denied, read/write failure.
    Io,
    /// Invalid value, contradictory options.
    Config,
    /// Unresolved dep, cycle.
    Graph,
    /// Spawn, timeout, non-zero exit, output missing.
    Action,
    /// Hermeticity violation, determinism violation.
    Sandbox,
    /// Load, write, corruption.
    Cache,
    /// Connect, send, receive, timeout.
    Network,
    /// Registration, heartbeat loss, capability mismatch.
    Worker,
}

impl ErrorCategory {
    /// Stable lowercase name for log fields and error codes.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Parse => "parse",
            Self::Io => "io",
            Self::Config => "config",
            Self::Graph => "graph",
            Self::Action => "action",
            Self::Sandbox => "sandbox",
            Self::Cache => "cache",
            Self::Network => "network",
            Self::Worker => "worker",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an error category is expected to be retried by its owning layer.
///
/// Mirrors spec §7's Propagation rules: network, cache, transient IO, and
/// action timeouts are recoverable; graph/parse/sandbox failures are
/// structural and surfaced immediately.
#[must_use]
pub const fn is_recoverable(category: ErrorCategory) -> bool {
    matches!(
        category,
        ErrorCategory::Network | ErrorCategory::Cache | ErrorCategory::Io | ErrorCategory::Action
    )
}

/// A location in a source file (Builderfile or BUILD.json) an error refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// Path to the offending file.
    pub path: PathBuf,
    /// 1-based line number, if known.
    pub line: Option<u32>,
    /// 1-based column number, if known.
    pub column: Option<u32>,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())?;
        if let Some(line) = self.line {
            write!(f, ":{line}")?;
            if let Some(col) = self.column {
                write!(f, ":{col}")?;
            }
        }
        Ok(())
    }
}

/// A typed, user-actionable suggestion attached to an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Suggestion {
    /// Run this shell command (rendered prefixed with `$`).
    Command(String),
    /// Read this documentation reference (rendered prefixed with `→`).
    Documentation(String),
    /// Check whether this path exists / has the expected shape.
    FileCheck(PathBuf),
    /// Adjust this configuration key or flag.
    Configuration(String),
    /// Free-form guidance that doesn't fit the other variants.
    General(String),
}

impl fmt::Display for Suggestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(cmd) => write!(f, "$ {cmd}"),
            Self::Documentation(doc) => write!(f, "→ {doc}"),
            Self::FileCheck(path) => write!(f, "check: {}", path.display()),
            Self::Configuration(key) => write!(f, "configuration: {key}"),
            Self::General(text) => f.write_str(text),
        }
    }
}

/// Structured, renderable error used at subsystem boundaries and by the CLI.
///
/// Carries a stable `code`, a [`ErrorCategory`], a human message, an optional
/// source location, zero or more [`Suggestion`]s, and an optional causal
/// chain (the error that led to this one, if any).
#[derive(Debug)]
pub struct BuilderError {
    code: &'static str,
    category: ErrorCategory,
    message: String,
    location: Option<SourceLocation>,
    suggestions: Vec<Suggestion>,
    cause: Option<Box<BuilderError>>,
}

impl BuilderError {
    /// Construct a new error with no location, suggestions, or cause.
    pub fn new(code: &'static str, category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            code,
            category,
            message: message.into(),
            location: None,
            suggestions: Vec::new(),
            cause: None,
        }
    }

    /// Attach a source location.
    #[must_use]
    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Attach a suggestion.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: Suggestion) -> Self {
        self.suggestions.push(suggestion);
        self
    }

    /// Chain a causing error.
    #[must_use]
    pub fn with_cause(mut self, cause: BuilderError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Stable machine-readable error code.
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// Error category.
    pub const fn category(&self) -> ErrorCategory {
        self.category
    }

    /// Human-readable message (without location/suggestions/cause rendering).
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Attached suggestions, in insertion order.
    pub fn suggestions(&self) -> &[Suggestion] {
        &self.suggestions
    }

    /// Source location, if attached.
    pub const fn location(&self) -> Option<&SourceLocation> {
        self.location.as_ref()
    }

    /// The immediate cause of this error, if any.
    pub fn cause(&self) -> Option<&BuilderError> {
        self.cause.as_deref()
    }

    /// Whether this error's category is normally retried by its owning layer.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        is_recoverable(self.category)
    }

    /// Walk the causal chain from this error down to the root cause.
    pub fn chain(&self) -> impl Iterator<Item = &BuilderError> {
        std::iter::successors(Some(self), |e| e.cause())
    }
}

impl fmt::Display for BuilderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.category, self.message)?;
        if let Some(loc) = &self.location {
            write!(f, " ({loc})")?;
        }
        for suggestion in &self.suggestions {
            write!(f, "\n  {suggestion}")?;
        }
        if let Some(cause) = &self.cause {
            write!(f, "\ncaused by: {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for BuilderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|e| e as _)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code_category_and_message() {
        let err = BuilderError::new("E_CYCLE", ErrorCategory::Graph, "cycle detected");
        let rendered = err.to_string();
        assert!(rendered.contains("E_CYCLE"));
        assert!(rendered.contains("graph"));
        assert!(rendered.contains("cycle detected"));
    }

    #[test]
    fn chain_walks_causes_in_order() {
        let root = BuilderError::new("E_IO", ErrorCategory::Io, "file not found");
        let mid = BuilderError::new("E_PARSE", ErrorCategory::Parse, "could not read file")
            .with_cause(root);
        let codes: Vec<_> = mid.chain().map(BuilderError::code).collect();
        assert_eq!(codes, vec!["E_PARSE", "E_IO"]);
    }

    #[test]
    fn recoverable_categories_match_spec() {
        assert!(is_recoverable(ErrorCategory::Network));
        assert!(is_recoverable(ErrorCategory::Cache));
        assert!(is_recoverable(ErrorCategory::Action));
        assert!(!is_recoverable(ErrorCategory::Graph));
        assert!(!is_recoverable(ErrorCategory::Parse));
        assert!(!is_recoverable(ErrorCategory::Sandbox));
    }

    #[test]
    fn suggestion_display_formats_by_type() {
        assert_eq!(Suggestion::Command("cargo build".into()).to_string(), "$ cargo build");
        assert!(Suggestion::Documentation("docs/x".into())
            .to_string()
            .starts_with('→'));
    }
}
