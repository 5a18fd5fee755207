// SPDX-License-Identifier: Apache-2.0
//! Builderfile DSL: lexer, Pratt expression parser, statement parser, and
//! glob matcher.
//!
//! The core does not interpret `config` blobs inside `target`/`repository`
//! fields — those stay opaque [`ast::Expr`] values forwarded to a language
//! handler (`builder-graph::LanguageHandler`). This crate's only job is
//! turning Builderfile text into a structured, validated AST.

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

pub mod ast;
mod glob;
mod lexer;
mod parser;

pub use glob::glob;
pub use lexer::{lex, LexError, Token, TokenKind};
pub use parser::{parse_program, AggregationPolicy, ParseError, ParseOutcome};

/// Lex and parse Builderfile source text in one step.
///
/// # Errors
///
/// Returns [`LexError`] if the source contains an unrecognized character or
/// unterminated string; lexing happens eagerly, so a lex error always takes
/// precedence over parse errors (there is no partial-lex recovery).
pub fn parse_source(source: &str, policy: AggregationPolicy) -> Result<ParseOutcome, LexError> {
    let tokens = lex(source)?;
    Ok(parse_program(&tokens, policy))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ast::Stmt;

    #[test]
    fn parse_source_lexes_then_parses() {
        let outcome = parse_source(
            r#"target("app") { type: "executable"; sources: ["**/*.rs"]; }"#,
            AggregationPolicy::FailFast,
        )
        .unwrap();
        assert!(outcome.errors.is_empty());
        assert!(matches!(outcome.statements[0], Stmt::Target { .. }));
    }
}
