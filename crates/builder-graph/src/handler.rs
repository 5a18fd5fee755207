// SPDX-License-Identifier: Apache-2.0
//! The language handler seam: `core` never knows how to compile Rust, Go,
//! or anything else — it only knows how to ask a registered
//! [`LanguageHandler`] to turn a [`Target`] into [`ActionDescriptor`]s.
//!
//! This is the polymorphism-over-language-handlers redesign from spec.md
//! §9: the source's `LanguageHandler` class hierarchy becomes a trait
//! object registry. Handlers own their own state; the core never reaches
//! into it.

use crate::{ResourceLimits, Target};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

/// A source file import discovered by [`LanguageHandler::analyze_imports`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Import {
    /// The imported path or module identifier, as written in source.
    pub path: String,
}

/// An Action-to-be: everything a [`LanguageHandler`] can determine about
/// one unit of work for a [`Target`], before the planner fills in hashed
/// input `ArtifactId`s and mints an `ActionId`.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionDescriptor {
    /// Program to execute.
    pub command: String,
    /// Argument vector.
    pub args: Vec<String>,
    /// Environment variables to forward (hermetic whitelist).
    pub env: BTreeMap<String, String>,
    /// Declared input paths (content hashed by the planner, not the handler).
    pub inputs: Vec<PathBuf>,
    /// Declared output paths.
    pub outputs: Vec<PathBuf>,
    /// Resource ceilings for the sandbox.
    pub resources: ResourceLimits,
    /// Opaque toolchain identity (compiler binary + version, typically).
    pub toolchain: String,
}

/// Error surfaced by a [`LanguageHandler`] while synthesizing Actions.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// No handler is registered for the target's `language` tag.
    #[error("[GRAPH_NO_HANDLER] no language handler registered for '{0}'")]
    NoHandler(String),
    /// The handler rejected the target's configuration.
    #[error("[GRAPH_INVALID_CONFIG] {target}: {message}")]
    InvalidConfig {
        /// Name of the offending target.
        target: String,
        /// Human-readable reason.
        message: String,
    },
}

/// The per-language seam: build Actions for a target, list its declared
/// outputs, and analyze its sources' imports. The core owns no handler
/// state — handlers own their own (e.g. a toolchain cache), matching
/// spec.md §9's "no hidden globals" redesign note.
pub trait LanguageHandler: Send + Sync {
    /// Synthesize zero or more Action descriptors for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::InvalidConfig`] if `target.config` is
    /// malformed for this language.
    fn build(&self, target: &Target, workspace: &crate::BuildGraph) -> Result<Vec<ActionDescriptor>, HandlerError>;

    /// Output paths this target is expected to produce, independent of
    /// whether `build` has run yet.
    fn outputs(&self, target: &Target, workspace: &crate::BuildGraph) -> Vec<PathBuf>;

    /// Best-effort static import analysis over `sources`, used by
    /// incremental/affected-target queries. Handlers with no import
    /// analysis may return an empty vector.
    fn analyze_imports(&self, sources: &[String]) -> Vec<Import>;
}

/// Process-scoped registry mapping a [`Target::language`] tag to its
/// [`LanguageHandler`]. Constructed explicitly and passed through the
/// engine's construction graph — never a global/static (spec.md §9).
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn LanguageHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `language`, replacing any prior registration.
    pub fn register(&mut self, language: impl Into<String>, handler: Arc<dyn LanguageHandler>) {
        self.handlers.insert(language.into(), handler);
    }

    /// Look up the handler for `language`, if any is registered.
    #[must_use]
    pub fn get(&self, language: &str) -> Option<Arc<dyn LanguageHandler>> {
        self.handlers.get(language).cloned()
    }
}
