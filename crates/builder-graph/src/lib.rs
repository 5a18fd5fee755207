// SPDX-License-Identifier: Apache-2.0
//! Target graph and action planner: parses Builderfile AST statements into
//! a typed, arena-backed DAG of [`Target`]s, rejects duplicate names and
//! cycles, and hands Action synthesis off to a per-language
//! [`LanguageHandler`] via [`HandlerRegistry`].
//!
//! Graphs are stored arena-style (spec.md §9): `Vec<Target>` indexed by
//! `usize`, edges as parallel `Vec<Vec<usize>>` of dependency indices.
//! Traversal is explicit DFS with a visited bitset — no owning
//! back-references, so the arena has no cyclic `Rc`/`Arc` structure even
//! when the *logical* graph would (briefly, before cycle rejection).
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
    clippy::missing_const_for_fn,
    clippy::multiple_crate_versions
)]

mod action;
mod handler;
mod target;

pub use action::{Action, ActionId, Priority, ResourceLimits};
pub use handler::{ActionDescriptor, HandlerError, HandlerRegistry, Import, LanguageHandler};
pub use target::{Target, TargetType};

use builder_dsl::ast::Stmt;
use std::collections::HashMap;

/// Errors raised while constructing or validating a [`BuildGraph`].
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum GraphError {
    /// Two targets in the same workspace declared the same name.
    #[error("[GRAPH_DUPLICATE_TARGET] duplicate target name: {0}")]
    DuplicateTarget(String),
    /// A target's `deps` referenced a name no target in the workspace declares.
    #[error("[GRAPH_UNRESOLVED_DEP] target '{target}' depends on unknown target '{dep}'")]
    UnresolvedDependency {
        /// The target whose dependency could not be resolved.
        target: String,
        /// The unresolved dependency name.
        dep: String,
    },
    /// A set of targets form a dependency cycle.
    #[error("[GRAPH_CYCLE] cycle among targets: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

/// Directed acyclic graph of [`Target`]s.
///
/// Invariants enforced by [`build_graph`]: (1) no cycles; (2) every
/// dependency resolves to a target that exists in the same constructed
/// graph; (3) each target is addressable by its unique name. Violations of
/// (1)/(2) are reported as [`GraphError`]s rather than panicking; the
/// caller's [`AggregationPolicy`] (via `builder-dsl`) decides whether a
/// given error family is fatal for the whole workspace.
#[derive(Debug, Clone, Default)]
pub struct BuildGraph {
    targets: Vec<Target>,
    edges: Vec<Vec<usize>>,
    index: HashMap<String, usize>,
}

impl BuildGraph {
    /// All targets, in construction order (stable arena indices).
    #[must_use]
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Number of targets in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether the graph has no targets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Look up a target's arena index by its `//package:name`.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// The target at arena index `idx`.
    #[must_use]
    pub fn target(&self, idx: usize) -> &Target {
        &self.targets[idx]
    }

    /// Resolved dependency indices for the target at arena index `idx`.
    #[must_use]
    pub fn deps_of(&self, idx: usize) -> &[usize] {
        &self.edges[idx]
    }

    /// Transitive dependent count of the target at arena index `idx` — the
    /// number of other targets reachable by following edges backward. Used
    /// by the scheduler's critical-path priority scorer (spec.md §4.5/§9).
    #[must_use]
    pub fn transitive_dependents(&self, idx: usize) -> usize {
        let mut reverse: Vec<Vec<usize>> = vec![Vec::new(); self.targets.len()];
        for (from, deps) in self.edges.iter().enumerate() {
            for &to in deps {
                reverse[to].push(from);
            }
        }
        let mut visited = vec![false; self.targets.len()];
        let mut stack = vec![idx];
        let mut count = 0usize;
        while let Some(node) = stack.pop() {
            for &dependent in &reverse[node] {
                if !visited[dependent] {
                    visited[dependent] = true;
                    count += 1;
                    stack.push(dependent);
                }
            }
        }
        count
    }

    /// Longest dependency-chain depth reachable *from* the target at arena
    /// index `idx` (0 for a leaf with no deps). Used by the scheduler's
    /// critical-path priority scorer.
    #[must_use]
    pub fn depth_from(&self, idx: usize) -> usize {
        let mut memo = vec![None; self.targets.len()];
        self.depth_from_inner(idx, &mut memo)
    }

    fn depth_from_inner(&self, idx: usize, memo: &mut [Option<usize>]) -> usize {
        if let Some(d) = memo[idx] {
            return d;
        }
        let depth = self
            .edges[idx]
            .iter()
            .map(|&dep| 1 + self.depth_from_inner(dep, memo))
            .max()
            .unwrap_or(0);
        memo[idx] = Some(depth);
        depth
    }
}

/// Build a [`BuildGraph`] from parsed top-level statements, collecting
/// `target`/`repository` declarations and validating them.
///
/// Returns the graph containing every successfully-validated target
/// alongside the list of [`GraphError`]s encountered — the partial-success
/// contract spec.md §4.4 describes for parse errors extends here: a
/// duplicate name drops the later declaration (keeping the first), an
/// unresolved dependency drops just that edge (keeping the target), and a
/// detected cycle is reported without removing any target, leaving the
/// caller (under its chosen `AggregationPolicy`) to decide whether a
/// structural error of this kind is fatal.
#[must_use]
pub fn build_graph(stmts: &[Stmt]) -> (BuildGraph, Vec<GraphError>) {
    let mut errors = Vec::new();
    let mut targets: Vec<Target> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for stmt in stmts {
        let (name, fields) = match stmt {
            Stmt::Target { name, fields } | Stmt::Repository { name, fields } => (name, fields),
            _ => continue,
        };
        if index.contains_key(name) {
            errors.push(GraphError::DuplicateTarget(name.clone()));
            continue;
        }
        let idx = targets.len();
        index.insert(name.clone(), idx);
        targets.push(Target::from_fields(name.clone(), fields));
    }

    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); targets.len()];
    for (idx, target) in targets.iter().enumerate() {
        for dep_name in &target.deps {
            match index.get(dep_name) {
                Some(&dep_idx) => edges[idx].push(dep_idx),
                None => errors.push(GraphError::UnresolvedDependency {
                    target: target.name.clone(),
                    dep: dep_name.clone(),
                }),
            }
        }
    }

    let graph = BuildGraph { targets, edges, index };
    for cycle in find_cycles(&graph) {
        let names = cycle.iter().map(|&i| graph.targets[i].name.clone()).collect();
        errors.push(GraphError::Cycle(names));
    }

    (graph, errors)
}

/// Tarjan's strongly-connected-components algorithm, explicit-stack DFS
/// with a visited bitset (spec.md §9 redesign note), returning every SCC of
/// size > 1 plus any single-node self-loop.
fn find_cycles(graph: &BuildGraph) -> Vec<Vec<usize>> {
    let n = graph.targets.len();
    let mut index_of: Vec<Option<usize>> = vec![None; n];
    let mut lowlink: Vec<usize> = vec![0; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut next_index = 0usize;
    let mut sccs: Vec<Vec<usize>> = Vec::new();

    // Explicit-stack DFS: each frame is (node, next child offset to visit).
    for start in 0..n {
        if index_of[start].is_some() {
            continue;
        }
        let mut work: Vec<(usize, usize)> = vec![(start, 0)];
        index_of[start] = Some(next_index);
        lowlink[start] = next_index;
        next_index += 1;
        stack.push(start);
        on_stack[start] = true;

        while let Some(&(node, child)) = work.last() {
            let deps = &graph.edges[node];
            if child < deps.len() {
                let dep = deps[child];
                if let Some(frame) = work.last_mut() {
                    frame.1 += 1;
                }
                if index_of[dep].is_none() {
                    index_of[dep] = Some(next_index);
                    lowlink[dep] = next_index;
                    next_index += 1;
                    stack.push(dep);
                    on_stack[dep] = true;
                    work.push((dep, 0));
                } else if on_stack[dep] {
                    lowlink[node] = lowlink[node].min(index_of[dep].unwrap_or(lowlink[node]));
                }
            } else {
                work.pop();
                if let Some(&(parent, _)) = work.last() {
                    lowlink[parent] = lowlink[parent].min(lowlink[node]);
                }
                if lowlink[node] == index_of[node].unwrap_or(usize::MAX) {
                    let mut component = Vec::new();
                    while let Some(top) = stack.pop() {
                        on_stack[top] = false;
                        component.push(top);
                        if top == node {
                            break;
                        }
                    }
                    let is_cycle = component.len() > 1
                        || (component.len() == 1 && graph.edges[component[0]].contains(&component[0]));
                    if is_cycle {
                        sccs.push(component);
                    }
                }
            }
        }
    }

    sccs
}
