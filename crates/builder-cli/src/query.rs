// SPDX-License-Identifier: Apache-2.0
//! The `builder query` subcommand's language: `deps(X)`, `rdeps(X)`, and
//! bare glob patterns matched against fully-qualified target names
//! (spec.md §10).

use builder_graph::BuildGraph;

/// A parsed query expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// `deps(//pkg:target)`: every target the named target transitively
    /// depends on, including itself.
    Deps(String),
    /// `rdeps(//pkg:target)`: every target that transitively depends on
    /// the named target, including itself.
    RDeps(String),
    /// A bare name or glob pattern (`*` wildcards per segment) matched
    /// against every target's fully-qualified name.
    Glob(String),
}

impl Query {
    /// Parse a query string. `deps(...)` and `rdeps(...)` are recognized
    /// by their function-call shape; anything else is treated as a glob.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        if let Some(inner) = strip_call(trimmed, "deps") {
            Self::Deps(inner.to_string())
        } else if let Some(inner) = strip_call(trimmed, "rdeps") {
            Self::RDeps(inner.to_string())
        } else {
            Self::Glob(trimmed.to_string())
        }
    }
}

fn strip_call<'a>(input: &'a str, name: &str) -> Option<&'a str> {
    let rest = input.strip_prefix(name)?.trim_start();
    let inner = rest.strip_prefix('(')?.strip_suffix(')')?;
    Some(inner.trim())
}

/// Errors raised while evaluating a [`Query`] against a [`BuildGraph`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueryError {
    /// `deps`/`rdeps` named a target that does not exist in the graph.
    #[error("unknown target: {0}")]
    UnknownTarget(String),
}

/// Evaluate `query` against `graph`, returning sorted, deduplicated
/// fully-qualified target names.
///
/// # Errors
///
/// Returns [`QueryError::UnknownTarget`] if `deps`/`rdeps` names a target
/// absent from the graph. A glob pattern that matches nothing is not an
/// error; it yields an empty result.
pub fn evaluate(graph: &BuildGraph, query: &Query) -> Result<Vec<String>, QueryError> {
    let names = match query {
        Query::Deps(name) => deps_of(graph, name)?,
        Query::RDeps(name) => rdeps_of(graph, name)?,
        Query::Glob(pattern) => glob_names(graph, pattern),
    };
    let mut names = names;
    names.sort();
    names.dedup();
    Ok(names)
}

fn deps_of(graph: &BuildGraph, name: &str) -> Result<Vec<String>, QueryError> {
    let root = graph.find(name).ok_or_else(|| QueryError::UnknownTarget(name.to_string()))?;
    let mut visited = vec![false; graph.targets().len()];
    let mut names = Vec::new();
    let mut stack = vec![root];
    visited[root] = true;
    while let Some(idx) = stack.pop() {
        names.push(graph.target(idx).name.clone());
        for &dep in graph.deps_of(idx) {
            if !visited[dep] {
                visited[dep] = true;
                stack.push(dep);
            }
        }
    }
    Ok(names)
}

fn rdeps_of(graph: &BuildGraph, name: &str) -> Result<Vec<String>, QueryError> {
    let root = graph.find(name).ok_or_else(|| QueryError::UnknownTarget(name.to_string()))?;
    let targets = graph.targets();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); targets.len()];
    for idx in 0..targets.len() {
        for &dep in graph.deps_of(idx) {
            dependents[dep].push(idx);
        }
    }

    let mut visited = vec![false; targets.len()];
    let mut names = Vec::new();
    let mut stack = vec![root];
    visited[root] = true;
    while let Some(idx) = stack.pop() {
        names.push(graph.target(idx).name.clone());
        for &dependent in &dependents[idx] {
            if !visited[dependent] {
                visited[dependent] = true;
                stack.push(dependent);
            }
        }
    }
    Ok(names)
}

fn glob_names(graph: &BuildGraph, pattern: &str) -> Vec<String> {
    graph.targets().iter().map(|target| &target.name).filter(|name| name_matches(pattern, name)).cloned().collect()
}

/// Single-segment wildcard match against a whole name: `*` matches any
/// run of characters, anchored at both ends.
fn name_matches(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == text;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut cursor = 0usize;
    for (idx, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if idx == 0 {
            if !text[cursor..].starts_with(part) {
                return false;
            }
            cursor += part.len();
        } else if idx == parts.len() - 1 {
            return text[cursor..].ends_with(part) && text.len() - cursor >= part.len();
        } else if let Some(found) = text[cursor..].find(part) {
            cursor += found + part.len();
        } else {
            return false;
        }
    }
    true
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use builder_dsl::ast::{Expr, Literal, Stmt};

    fn target_stmt(name: &str, deps: &[&str]) -> Stmt {
        Stmt::Target {
            name: name.to_string(),
            fields: vec![(
                "deps".to_string(),
                Expr::Array(deps.iter().map(|d| Expr::Literal(Literal::String((*d).to_string()))).collect()),
            )],
        }
    }

    fn sample_graph() -> BuildGraph {
        let stmts = vec![
            target_stmt("//a:a", &["//b:b"]),
            target_stmt("//b:b", &["//c:c"]),
            target_stmt("//c:c", &[]),
        ];
        let (graph, errors) = builder_graph::build_graph(&stmts);
        assert!(errors.is_empty());
        graph
    }

    #[test]
    fn parse_recognizes_deps_and_rdeps_and_falls_back_to_glob() {
        assert_eq!(Query::parse("deps(//a:a)"), Query::Deps("//a:a".to_string()));
        assert_eq!(Query::parse("rdeps(//c:c)"), Query::RDeps("//c:c".to_string()));
        assert_eq!(Query::parse("//a:*"), Query::Glob("//a:*".to_string()));
    }

    #[test]
    fn deps_includes_transitive_dependencies_and_self() {
        let graph = sample_graph();
        let result = evaluate(&graph, &Query::Deps("//a:a".to_string())).unwrap();
        assert_eq!(result, vec!["//a:a", "//b:b", "//c:c"]);
    }

    #[test]
    fn rdeps_includes_transitive_dependents_and_self() {
        let graph = sample_graph();
        let result = evaluate(&graph, &Query::RDeps("//c:c".to_string())).unwrap();
        assert_eq!(result, vec!["//a:a", "//b:b", "//c:c"]);
    }

    #[test]
    fn deps_of_unknown_target_is_reported() {
        let graph = sample_graph();
        assert_eq!(
            evaluate(&graph, &Query::Deps("//nope:nope".to_string())),
            Err(QueryError::UnknownTarget("//nope:nope".to_string()))
        );
    }

    #[test]
    fn glob_matches_wildcard_segments() {
        let graph = sample_graph();
        let result = evaluate(&graph, &Query::Glob("//*:a".to_string())).unwrap();
        assert_eq!(result, vec!["//a:a"]);
    }
}
