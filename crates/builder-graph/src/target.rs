// SPDX-License-Identifier: Apache-2.0
//! Parsed build units: [`Target`] and its [`TargetType`].

use builder_dsl::ast::{Expr, Literal};
use std::collections::BTreeMap;

/// Kind of build unit a [`Target`] describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetType {
    /// Produces a runnable binary.
    Executable,
    /// Produces a library artifact consumable by other targets.
    Library,
    /// Produces a test binary/report; not a build output.
    Test,
    /// Custom/opaque target type forwarded to the language handler verbatim.
    Custom(String),
}

impl TargetType {
    fn from_field(value: &str) -> Self {
        match value {
            "executable" => Self::Executable,
            "library" => Self::Library,
            "test" => Self::Test,
            other => Self::Custom(other.to_string()),
        }
    }
}

/// A parsed build unit, validated by the planner and frozen at parse time.
///
/// Lifecycle: created during [`crate::build_graph`], validated (duplicate
/// names, dependency resolution, cycle detection), never mutated after the
/// workspace is frozen. `config` stays an opaque map of raw [`Expr`] values
/// — the core never interprets language-specific fields; only a
/// [`crate::LanguageHandler`] does.
#[derive(Clone, Debug, PartialEq)]
pub struct Target {
    /// Globally-addressed name, `//package:name`.
    pub name: String,
    /// What kind of artifact this target produces.
    pub target_type: TargetType,
    /// Opaque language tag (e.g. "rust", "go") dispatched to a handler.
    pub language: String,
    /// Glob patterns selecting source files (e.g. `**/*.rs`).
    pub sources: Vec<String>,
    /// Declared dependency target names, as written (unresolved).
    pub deps: Vec<String>,
    /// Compiler/toolchain flags, forwarded opaquely to the handler.
    pub flags: Vec<String>,
    /// Environment variables declared for this target's Actions.
    pub env: BTreeMap<String, String>,
    /// Declared output path, if any (handlers may derive their own).
    pub output: Option<String>,
    /// Include/search path fragments, forwarded opaquely to the handler.
    pub includes: Vec<String>,
    /// Opaque, language-specific configuration — never interpreted by core.
    pub config: BTreeMap<String, Expr>,
}

fn literal_string(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Literal(Literal::String(s)) => Some(s.clone()),
        _ => None,
    }
}

fn literal_string_array(expr: &Expr) -> Vec<String> {
    match expr {
        Expr::Array(items) => items.iter().filter_map(literal_string).collect(),
        _ => Vec::new(),
    }
}

fn literal_string_map(expr: &Expr) -> BTreeMap<String, String> {
    match expr {
        Expr::Map(entries) => entries
            .iter()
            .filter_map(|(k, v)| literal_string(v).map(|v| (k.clone(), v)))
            .collect(),
        _ => BTreeMap::new(),
    }
}

impl Target {
    /// Build a `Target` from a `target(...)`/`repository(...)` statement's
    /// field list.
    ///
    /// Only literal values are understood for the well-known fields
    /// (`type`, `language`, `sources`, `deps`, `flags`, `env`, `output`,
    /// `includes`); anything computed via `let`/`fn`/macro expansion that a
    /// future evaluator would resolve is out of this crate's scope and is
    /// instead preserved verbatim under `config` for the caller to inspect.
    /// `config` retains every field (including the well-known ones) so no
    /// information is ever silently dropped.
    #[must_use]
    pub fn from_fields(name: String, fields: &[(String, Expr)]) -> Self {
        let mut target_type = TargetType::Custom(String::new());
        let mut language = String::new();
        let mut sources = Vec::new();
        let mut deps = Vec::new();
        let mut flags = Vec::new();
        let mut env = BTreeMap::new();
        let mut output = None;
        let mut includes = Vec::new();
        let mut config = BTreeMap::new();

        for (key, value) in fields {
            match key.as_str() {
                "type" => {
                    if let Some(s) = literal_string(value) {
                        target_type = TargetType::from_field(&s);
                    }
                }
                "language" => language = literal_string(value).unwrap_or_default(),
                "sources" => sources = literal_string_array(value),
                "deps" => deps = literal_string_array(value),
                "flags" => flags = literal_string_array(value),
                "env" => env = literal_string_map(value),
                "output" => output = literal_string(value),
                "includes" => includes = literal_string_array(value),
                _ => {}
            }
            config.insert(key.clone(), value.clone());
        }

        Self {
            name,
            target_type,
            language,
            sources,
            deps,
            flags,
            env,
            output,
            includes,
            config,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn extracts_well_known_literal_fields() {
        let fields = vec![
            ("type".to_string(), Expr::Literal(Literal::String("executable".into()))),
            ("language".to_string(), Expr::Literal(Literal::String("rust".into()))),
            (
                "sources".to_string(),
                Expr::Array(vec![Expr::Literal(Literal::String("**/*.rs".into()))]),
            ),
            (
                "deps".to_string(),
                Expr::Array(vec![Expr::Literal(Literal::String("//lib:core".into()))]),
            ),
        ];
        let target = Target::from_fields("//app:main".into(), &fields);
        assert_eq!(target.name, "//app:main");
        assert!(matches!(target.target_type, TargetType::Executable));
        assert_eq!(target.language, "rust");
        assert_eq!(target.sources, vec!["**/*.rs".to_string()]);
        assert_eq!(target.deps, vec!["//lib:core".to_string()]);
    }

    #[test]
    fn non_literal_field_falls_back_to_config_only() {
        let fields = vec![("sources".to_string(), Expr::Ident("computed_sources".into()))];
        let target = Target::from_fields("//app:dyn".into(), &fields);
        assert!(target.sources.is_empty());
        assert!(target.config.contains_key("sources"));
    }

    #[test]
    fn unknown_type_string_becomes_custom() {
        let fields = vec![("type".to_string(), Expr::Literal(Literal::String("genrule".into())))];
        let target = Target::from_fields("//x:y".into(), &fields);
        assert_eq!(target.target_type, TargetType::Custom("genrule".into()));
    }
}
