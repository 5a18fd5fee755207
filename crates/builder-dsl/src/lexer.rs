// SPDX-License-Identifier: Apache-2.0
//! Hand-written lexer for the Builderfile DSL.
//!
//! No lexer-generator dependency — tokens are recognized by a single
//! character-at-a-time scan, consistent with the rest of this crate's
//! hand-written recursive-descent approach.

use std::fmt;

/// A lexical token with its source position (1-based line/column, for
/// `builder_error::SourceLocation`).
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    /// The recognized token kind.
    pub kind: TokenKind,
    /// 1-based source line.
    pub line: u32,
    /// 1-based source column.
    pub column: u32,
}

/// The kind of a lexical token.
#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    /// Identifier or keyword, stored verbatim; the parser distinguishes
    /// keywords from ordinary identifiers by spelling.
    Ident(String),
    /// String literal with escapes already resolved.
    String(String),
    /// Numeric literal.
    Number(f64),
    /// `true`/`false`.
    Bool(bool),
    /// `null`.
    Null,

    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Colon,
    Dot,
    Question,
    Pipe2,
    Amp2,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Eq,
    PipeBar,

    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(s) => write!(f, "identifier `{s}`"),
            Self::String(s) => write!(f, "string {s:?}"),
            Self::Number(n) => write!(f, "number {n}"),
            Self::Bool(b) => write!(f, "bool {b}"),
            Self::Null => write!(f, "null"),
            Self::Eof => write!(f, "end of input"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Lexer error: an unrecognized character or an unterminated string.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LexError {
    /// An unexpected character was found at the given position.
    #[error("unexpected character {ch:?} at line {line}, column {column}")]
    UnexpectedChar {
        /// The offending character.
        ch: char,
        /// 1-based line.
        line: u32,
        /// 1-based column.
        column: u32,
    },
    /// A string literal was never closed before end of input.
    #[error("unterminated string starting at line {line}, column {column}")]
    UnterminatedString {
        /// 1-based line.
        line: u32,
        /// 1-based column.
        column: u32,
    },
}

/// Scan `source` into a flat token stream, terminated by [`TokenKind::Eof`].
///
/// # Errors
///
/// Returns [`LexError`] on the first unrecognized character or unterminated
/// string literal.
pub fn lex(source: &str) -> Result<Vec<Token>, LexError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0usize;
    let mut line = 1u32;
    let mut col = 1u32;

    macro_rules! advance {
        () => {{
            if chars[i] == '\n' {
                line += 1;
                col = 1;
            } else {
                col += 1;
            }
            i += 1;
        }};
    }

    while i < chars.len() {
        let c = chars[i];

        if c.is_whitespace() {
            advance!();
            continue;
        }

        if c == '#' {
            while i < chars.len() && chars[i] != '\n' {
                advance!();
            }
            continue;
        }

        let (start_line, start_col) = (line, col);

        if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                ident.push(chars[i]);
                advance!();
            }
            let kind = match ident.as_str() {
                "true" => TokenKind::Bool(true),
                "false" => TokenKind::Bool(false),
                "null" => TokenKind::Null,
                _ => TokenKind::Ident(ident),
            };
            tokens.push(Token { kind, line: start_line, column: start_col });
            continue;
        }

        if c.is_ascii_digit() {
            let mut num = String::new();
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                num.push(chars[i]);
                advance!();
            }
            let value: f64 = num.parse().unwrap_or(f64::NAN);
            tokens.push(Token {
                kind: TokenKind::Number(value),
                line: start_line,
                column: start_col,
            });
            continue;
        }

        if c == '"' {
            advance!();
            let mut s = String::new();
            loop {
                if i >= chars.len() {
                    return Err(LexError::UnterminatedString { line: start_line, column: start_col });
                }
                match chars[i] {
                    '"' => {
                        advance!();
                        break;
                    }
                    '\\' if i + 1 < chars.len() => {
                        advance!();
                        let escaped = match chars[i] {
                            'n' => '\n',
                            't' => '\t',
                            '"' => '"',
                            '\\' => '\\',
                            other => other,
                        };
                        s.push(escaped);
                        advance!();
                    }
                    ch => {
                        s.push(ch);
                        advance!();
                    }
                }
            }
            tokens.push(Token { kind: TokenKind::String(s), line: start_line, column: start_col });
            continue;
        }

        let two = if i + 1 < chars.len() { Some((c, chars[i + 1])) } else { None };
        let (kind, width) = match two {
            Some(('|', '|')) => (TokenKind::Pipe2, 2),
            Some(('&', '&')) => (TokenKind::Amp2, 2),
            Some(('=', '=')) => (TokenKind::EqEq, 2),
            Some(('!', '=')) => (TokenKind::NotEq, 2),
            Some(('<', '=')) => (TokenKind::LtEq, 2),
            Some(('>', '=')) => (TokenKind::GtEq, 2),
            _ => match c {
                '{' => (TokenKind::LBrace, 1),
                '}' => (TokenKind::RBrace, 1),
                '(' => (TokenKind::LParen, 1),
                ')' => (TokenKind::RParen, 1),
                '[' => (TokenKind::LBracket, 1),
                ']' => (TokenKind::RBracket, 1),
                ',' => (TokenKind::Comma, 1),
                ';' => (TokenKind::Semicolon, 1),
                ':' => (TokenKind::Colon, 1),
                '.' => (TokenKind::Dot, 1),
                '?' => (TokenKind::Question, 1),
                '<' => (TokenKind::Lt, 1),
                '>' => (TokenKind::Gt, 1),
                '+' => (TokenKind::Plus, 1),
                '-' => (TokenKind::Minus, 1),
                '*' => (TokenKind::Star, 1),
                '/' => (TokenKind::Slash, 1),
                '%' => (TokenKind::Percent, 1),
                '!' => (TokenKind::Bang, 1),
                '=' => (TokenKind::Eq, 1),
                '|' => (TokenKind::PipeBar, 1),
                other => {
                    return Err(LexError::UnexpectedChar { ch: other, line: start_line, column: start_col });
                }
            },
        };
        for _ in 0..width {
            advance!();
        }
        tokens.push(Token { kind, line: start_line, column: start_col });
    }

    tokens.push(Token { kind: TokenKind::Eof, line, column: col });
    Ok(tokens)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn lexes_identifiers_keywords_and_literals() {
        let tokens = lex(r#"target("app") { deps: [1, true, null] }"#).unwrap();
        let kinds: Vec<_> = tokens.into_iter().map(|t| t.kind).collect();
        assert!(matches!(kinds[0], TokenKind::Ident(ref s) if s == "target"));
        assert!(matches!(kinds[1], TokenKind::LParen));
        assert!(matches!(kinds[2], TokenKind::String(ref s) if s == "app"));
    }

    #[test]
    fn skips_comments() {
        let tokens = lex("# a comment\nlet x = 1;").unwrap();
        assert!(matches!(tokens[0].kind, TokenKind::Ident(ref s) if s == "let"));
    }

    #[test]
    fn rejects_unterminated_string() {
        let result = lex(r#"let x = "unterminated"#);
        assert!(result.is_err());
    }

    #[test]
    fn two_char_operators_are_not_split() {
        let tokens = lex("a && b || c == d").unwrap();
        let kinds: Vec<_> = tokens.into_iter().map(|t| t.kind).collect();
        assert!(kinds.contains(&TokenKind::Amp2));
        assert!(kinds.contains(&TokenKind::Pipe2));
        assert!(kinds.contains(&TokenKind::EqEq));
    }
}
