// SPDX-License-Identifier: Apache-2.0
//! Workspace discovery and ingestion: walks a workspace root for
//! `BUILD`/`BUILD.json` files, parses each one, and qualifies every bare
//! target name into its full `//package:name` address before the
//! statements reach [`builder_graph::build_graph`] (spec.md §4.4, §6).
//!
//! [`builder_graph::build_graph`] indexes targets directly by the `name`
//! field carried on `Stmt::Target`/`Stmt::Repository` — it has no notion of
//! packages. Qualification is therefore this crate's job, done once at
//! ingestion time, so every later stage (the graph, the scheduler, the
//! action cache) only ever sees fully-qualified names.

use builder_dsl::ast::{Expr, Literal, Stmt};
use builder_dsl::{parse_source, AggregationPolicy, LexError, ParseError};
use std::path::{Path, PathBuf};

/// One workspace's worth of ingested statements, ready for
/// [`builder_graph::build_graph`].
#[derive(Debug, Default)]
pub struct LoadedWorkspace {
    /// Every statement collected across every Builderfile, with target/
    /// repository names already qualified to `//package:name`.
    pub statements: Vec<Stmt>,
    /// Non-fatal errors encountered while loading individual files; the
    /// caller's [`AggregationPolicy`] governs whether these are surfaced
    /// as warnings or treated as build-stopping.
    pub errors: Vec<WorkspaceLoadError>,
}

/// A failure ingesting one file of the workspace.
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceLoadError {
    /// The file could not be read.
    #[error("reading {path}: {source}")]
    Io {
        /// Offending file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A `BUILD` file failed to lex.
    #[error("lexing {path}: {source}")]
    Lex {
        /// Offending file.
        path: PathBuf,
        /// Underlying lex error.
        #[source]
        source: LexError,
    },
    /// A `BUILD` file failed to parse.
    #[error("parsing {path}: {source}")]
    Parse {
        /// Offending file.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: ParseError,
    },
    /// A `BUILD.json` file was not valid JSON, or not shaped as this
    /// ingester expects (see [`load_json_file`]).
    #[error("{path}: {message}")]
    Json {
        /// Offending file.
        path: PathBuf,
        /// Human-readable reason.
        message: String,
    },
}

/// Recursively discover every `BUILD`/`BUILD.json` file under `root`,
/// skipping hidden directories and the workspace's own cache directory.
/// Results are sorted so ingestion order is deterministic across runs.
#[must_use]
pub fn discover_build_files(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    walk(root, &mut found);
    found.sort();
    found
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            let is_hidden = path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with('.'));
            if is_hidden || path.file_name().and_then(|n| n.to_str()) == Some(".builder-cache") {
                continue;
            }
            walk(&path, out);
        } else if matches!(path.file_name().and_then(|n| n.to_str()), Some("BUILD" | "BUILD.json")) {
            out.push(path);
        }
    }
}

/// Derive a package name from a Builderfile's location relative to the
/// workspace root: the posix-style path of its parent directory, or `""`
/// for a Builderfile directly at the root.
#[must_use]
pub fn package_name(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    let parent = relative.parent().unwrap_or_else(|| Path::new(""));
    parent
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Fully qualify a bare target name under `package`: `//package:name`.
#[must_use]
pub fn qualify(package: &str, name: &str) -> String {
    if name.starts_with("//") {
        return name.to_string();
    }
    format!("//{package}:{name}")
}

/// Resolve a declared dependency name against `package`. Names already
/// written in `//package:target` form pass through unchanged; bare names
/// are assumed to live in the same package as the target declaring them.
fn qualify_dep(package: &str, name: &str) -> String {
    qualify(package, name)
}

fn qualify_stmt(package: &str, stmt: Stmt) -> Stmt {
    match stmt {
        Stmt::Target { name, fields } => Stmt::Target {
            name: qualify(package, &name),
            fields: qualify_fields(package, fields),
        },
        Stmt::Repository { name, fields } => Stmt::Repository {
            name: qualify(package, &name),
            fields: qualify_fields(package, fields),
        },
        other => other,
    }
}

/// Rewrite a target's `deps` field (the only field whose values are
/// cross-references to other targets) so every entry is fully qualified.
fn qualify_fields(package: &str, fields: Vec<(String, Expr)>) -> Vec<(String, Expr)> {
    fields
        .into_iter()
        .map(|(key, value)| {
            if key == "deps" {
                (key, qualify_deps_expr(package, value))
            } else {
                (key, value)
            }
        })
        .collect()
}

fn qualify_deps_expr(package: &str, expr: Expr) -> Expr {
    match expr {
        Expr::Array(items) => Expr::Array(
            items
                .into_iter()
                .map(|item| match item {
                    Expr::Literal(Literal::String(name)) => Expr::Literal(Literal::String(qualify_dep(package, &name))),
                    other => other,
                })
                .collect(),
        ),
        other => other,
    }
}

/// Load and qualify every `BUILD`/`BUILD.json` file under `root`.
#[must_use]
pub fn load_workspace(root: &Path, policy: AggregationPolicy) -> LoadedWorkspace {
    let mut loaded = LoadedWorkspace::default();
    for file in discover_build_files(root) {
        let package = package_name(root, &file);
        let is_json = file.file_name().and_then(|n| n.to_str()) == Some("BUILD.json");
        let stmts = if is_json {
            load_json_file(&file)
        } else {
            load_build_file(&file, policy, &mut loaded.errors)
        };
        match stmts {
            Ok(stmts) => loaded.statements.extend(stmts.into_iter().map(|s| qualify_stmt(&package, s))),
            Err(error) => loaded.errors.push(error),
        }
    }
    loaded
}

fn load_build_file(file: &Path, policy: AggregationPolicy, errors: &mut Vec<WorkspaceLoadError>) -> Result<Vec<Stmt>, WorkspaceLoadError> {
    let source = std::fs::read_to_string(file).map_err(|source| WorkspaceLoadError::Io {
        path: file.to_path_buf(),
        source,
    })?;
    let outcome = parse_source(&source, policy).map_err(|source| WorkspaceLoadError::Lex {
        path: file.to_path_buf(),
        source,
    })?;
    errors.extend(outcome.errors.into_iter().map(|source| WorkspaceLoadError::Parse {
        path: file.to_path_buf(),
        source,
    }));
    Ok(outcome.statements)
}

/// Parse one `BUILD.json` file into `target(...)` statements.
///
/// `ast::Expr`/`ast::Literal` do not derive `serde::Deserialize` (they are
/// hand-rolled AST types, not a wire format) so this walks the
/// `serde_json::Value` tree directly via [`json_to_expr`] rather than
/// deserializing into the AST.
///
/// Expected shape: `{"targets": [{"name": "...", <field>: <value>, ...}]}`.
fn load_json_file(file: &Path) -> Result<Vec<Stmt>, WorkspaceLoadError> {
    let bytes = std::fs::read(file).map_err(|source| WorkspaceLoadError::Io {
        path: file.to_path_buf(),
        source,
    })?;
    let value: serde_json::Value = serde_json::from_slice(&bytes).map_err(|error| WorkspaceLoadError::Json {
        path: file.to_path_buf(),
        message: error.to_string(),
    })?;
    let targets = value.get("targets").and_then(serde_json::Value::as_array).ok_or_else(|| WorkspaceLoadError::Json {
        path: file.to_path_buf(),
        message: "expected a top-level \"targets\" array".to_string(),
    })?;

    let mut stmts = Vec::with_capacity(targets.len());
    for entry in targets {
        let object = entry.as_object().ok_or_else(|| WorkspaceLoadError::Json {
            path: file.to_path_buf(),
            message: "each target entry must be a JSON object".to_string(),
        })?;
        let name = object
            .get("name")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| WorkspaceLoadError::Json {
                path: file.to_path_buf(),
                message: "target entry is missing a string \"name\"".to_string(),
            })?
            .to_string();
        let fields = object
            .iter()
            .filter(|(key, _)| key.as_str() != "name")
            .map(|(key, value)| (key.clone(), json_to_expr(value)))
            .collect();
        stmts.push(Stmt::Target { name, fields });
    }
    Ok(stmts)
}

/// Bridge a `serde_json::Value` into the DSL's `Expr` tree. Numbers always
/// become `Literal::Number` (the DSL has no integer/float distinction);
/// JSON objects become `Expr::Map` in key-iteration order (object key
/// order is preserved by `serde_json`'s default map, so this is stable for
/// a given input file).
fn json_to_expr(value: &serde_json::Value) -> Expr {
    match value {
        serde_json::Value::Null => Expr::Literal(Literal::Null),
        serde_json::Value::Bool(b) => Expr::Literal(Literal::Bool(*b)),
        serde_json::Value::Number(n) => Expr::Literal(Literal::Number(n.as_f64().unwrap_or(0.0))),
        serde_json::Value::String(s) => Expr::Literal(Literal::String(s.clone())),
        serde_json::Value::Array(items) => Expr::Array(items.iter().map(json_to_expr).collect()),
        serde_json::Value::Object(map) => Expr::Map(map.iter().map(|(k, v)| (k.clone(), json_to_expr(v))).collect()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn package_name_is_posix_relative_directory() {
        let root = Path::new("/ws");
        assert_eq!(package_name(root, Path::new("/ws/app/BUILD")), "app");
        assert_eq!(package_name(root, Path::new("/ws/BUILD")), "");
        assert_eq!(package_name(root, Path::new("/ws/lib/core/BUILD")), "lib/core");
    }

    #[test]
    fn qualify_leaves_already_qualified_names_alone() {
        assert_eq!(qualify("app", "main"), "//app:main");
        assert_eq!(qualify("app", "//lib:core"), "//lib:core");
    }

    #[test]
    fn discover_finds_both_build_flavors_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("a/BUILD"), "").unwrap();
        fs::write(dir.path().join("BUILD.json"), "{}").unwrap();
        fs::create_dir_all(dir.path().join(".builder-cache")).unwrap();
        fs::write(dir.path().join(".builder-cache/BUILD"), "").unwrap();

        let found = discover_build_files(dir.path());
        assert_eq!(found, vec![dir.path().join("BUILD.json"), dir.path().join("a/BUILD")]);
    }

    #[test]
    fn load_workspace_qualifies_targets_and_deps() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("app")).unwrap();
        fs::write(
            dir.path().join("app/BUILD"),
            r#"target("main") { type: "executable"; language: "shell"; deps: ["lib"]; }"#,
        )
        .unwrap();

        let loaded = load_workspace(dir.path(), AggregationPolicy::CollectAll);
        assert!(loaded.errors.is_empty(), "{:?}", loaded.errors);
        let Stmt::Target { name, fields } = &loaded.statements[0] else {
            panic!("expected a Target statement");
        };
        assert_eq!(name, "//app:main");
        let deps = fields.iter().find(|(k, _)| k == "deps").map(|(_, v)| v.clone());
        assert_eq!(deps, Some(Expr::Array(vec![Expr::Literal(Literal::String("//app:lib".into()))])));
    }

    #[test]
    fn load_json_file_bridges_targets_array() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("BUILD.json"),
            r#"{"targets": [{"name": "main", "type": "executable", "sources": ["a.sh"]}]}"#,
        )
        .unwrap();

        let loaded = load_workspace(dir.path(), AggregationPolicy::CollectAll);
        assert!(loaded.errors.is_empty(), "{:?}", loaded.errors);
        assert_eq!(loaded.statements.len(), 1);
        let Stmt::Target { name, .. } = &loaded.statements[0] else {
            panic!("expected a Target statement");
        };
        assert_eq!(name, "//:main");
    }

    #[test]
    fn json_file_missing_name_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("BUILD.json"), r#"{"targets": [{"type": "executable"}]}"#).unwrap();

        let loaded = load_workspace(dir.path(), AggregationPolicy::CollectAll);
        assert_eq!(loaded.errors.len(), 1);
        assert!(matches!(loaded.errors[0], WorkspaceLoadError::Json { .. }));
    }
}
