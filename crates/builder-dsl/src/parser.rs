// SPDX-License-Identifier: Apache-2.0
//! Recursive-descent statement parser with a precedence-climbing ("Pratt")
//! expression parser, following spec.md §4.4's operator precedence table.

use crate::ast::{BinOp, Expr, Literal, Stmt, UnOp};
use crate::lexer::{Token, TokenKind};

/// A parse error: an unexpected token at a known source position.
#[derive(Debug, Clone, thiserror::Error)]
#[error("parse error at line {line}, column {column}: expected {expected}, found {found}")]
pub struct ParseError {
    /// What the parser expected to see.
    pub expected: String,
    /// What it actually found.
    pub found: String,
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

/// How to handle parse errors across independent top-level statements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregationPolicy {
    /// Stop on the first error.
    FailFast,
    /// Gather every error from independent statements and continue parsing.
    CollectAll,
    /// Continue past recoverable errors (unparseable single statement) but
    /// halt at structural ones (unterminated block, unexpected EOF).
    StopAtFatal,
}

/// Result of parsing a program: the statements that parsed successfully,
/// plus the error list, per spec.md §4.4's "partial success yields a valid
/// workspace ... plus the error list" contract.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    /// Statements parsed successfully.
    pub statements: Vec<Stmt>,
    /// Errors encountered, in the order raised.
    pub errors: Vec<ParseError>,
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> &Token {
        let tok = &self.tokens[self.pos];
        if !matches!(tok.kind, TokenKind::Eof) {
            self.pos += 1;
        }
        tok
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        let tok = self.advance().clone();
        match tok.kind {
            TokenKind::Ident(s) => Ok(s),
            other => Err(ParseError {
                expected: "identifier".into(),
                found: other.to_string(),
                line: tok.line,
                column: tok.column,
            }),
        }
    }

    fn expect(&mut self, want: &TokenKind) -> Result<(), ParseError> {
        let tok = self.advance().clone();
        if std::mem::discriminant(&tok.kind) == std::mem::discriminant(want) {
            Ok(())
        } else {
            Err(ParseError {
                expected: want.to_string(),
                found: tok.kind.to_string(),
                line: tok.line,
                column: tok.column,
            })
        }
    }

    fn check(&self, want: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(want)
    }

    fn eat(&mut self, want: &TokenKind) -> bool {
        if self.check(want) {
            self.advance();
            true
        } else {
            false
        }
    }

    // ── statements ──────────────────────────────────────────────────────

    fn parse_block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(&TokenKind::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.at_eof() {
            stmts.push(self.parse_stmt()?);
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(stmts)
    }

    fn parse_fields(&mut self) -> Result<Vec<(String, Expr)>, ParseError> {
        self.expect(&TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.at_eof() {
            let name = self.expect_ident()?;
            self.expect(&TokenKind::Colon)?;
            let value = self.parse_expr()?;
            self.eat(&TokenKind::Semicolon);
            fields.push((name, value));
        }
        self.expect(&TokenKind::RBrace)?;
        Ok(fields)
    }

    fn parse_params(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        while !self.check(&TokenKind::RParen) {
            params.push(self.expect_ident()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(params)
    }

    fn parse_stmt(&mut self) -> Result<Stmt, ParseError> {
        let keyword = if let TokenKind::Ident(s) = &self.peek().kind {
            s.clone()
        } else {
            String::new()
        };

        match keyword.as_str() {
            "target" | "repository" => {
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let name_tok = self.advance().clone();
                let name = match name_tok.kind {
                    TokenKind::String(s) => s,
                    other => {
                        return Err(ParseError {
                            expected: "string literal".into(),
                            found: other.to_string(),
                            line: name_tok.line,
                            column: name_tok.column,
                        })
                    }
                };
                self.expect(&TokenKind::RParen)?;
                let fields = self.parse_fields()?;
                if keyword == "target" {
                    Ok(Stmt::Target { name, fields })
                } else {
                    Ok(Stmt::Repository { name, fields })
                }
            }
            "let" | "const" => {
                self.advance();
                let name = self.expect_ident()?;
                self.expect(&TokenKind::Eq)?;
                let value = self.parse_expr()?;
                self.eat(&TokenKind::Semicolon);
                if keyword == "let" {
                    Ok(Stmt::Let { name, value })
                } else {
                    Ok(Stmt::Const { name, value })
                }
            }
            "fn" | "macro" => {
                self.advance();
                let name = self.expect_ident()?;
                let params = self.parse_params()?;
                let body = self.parse_block()?;
                if keyword == "fn" {
                    Ok(Stmt::Fn { name, params, body })
                } else {
                    Ok(Stmt::Macro { name, params, body })
                }
            }
            "if" => {
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let cond = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                let then = self.parse_block()?;
                let else_ = if matches!(&self.peek().kind, TokenKind::Ident(s) if s == "else") {
                    self.advance();
                    self.parse_block()?
                } else {
                    Vec::new()
                };
                Ok(Stmt::If { cond, then, else_ })
            }
            "for" => {
                self.advance();
                let var = self.expect_ident()?;
                let in_kw = self.expect_ident()?;
                if in_kw != "in" {
                    let tok = self.peek();
                    return Err(ParseError {
                        expected: "`in`".into(),
                        found: in_kw,
                        line: tok.line,
                        column: tok.column,
                    });
                }
                let iterable = self.parse_expr()?;
                let body = self.parse_block()?;
                Ok(Stmt::For { var, iterable, body })
            }
            "import" => {
                self.advance();
                let tok = self.advance().clone();
                let path = match tok.kind {
                    TokenKind::String(s) => s,
                    other => {
                        return Err(ParseError {
                            expected: "string literal".into(),
                            found: other.to_string(),
                            line: tok.line,
                            column: tok.column,
                        })
                    }
                };
                self.eat(&TokenKind::Semicolon);
                Ok(Stmt::Import { path })
            }
            _ => {
                let expr = self.parse_expr()?;
                self.eat(&TokenKind::Semicolon);
                Ok(Stmt::Expr(expr))
            }
        }
    }

    // ── expressions ─────────────────────────────────────────────────────

    fn parse_expr(&mut self) -> Result<Expr, ParseError> {
        self.parse_ternary()
    }

    /// Precedence 3: `cond ? then : else`, right-associative, lowest of the
    /// operators this parser handles.
    fn parse_ternary(&mut self) -> Result<Expr, ParseError> {
        let cond = self.parse_binary(4)?;
        if self.eat(&TokenKind::Question) {
            let then = self.parse_expr()?;
            self.expect(&TokenKind::Colon)?;
            let else_ = self.parse_expr()?;
            Ok(Expr::Ternary(Box::new(cond), Box::new(then), Box::new(else_)))
        } else {
            Ok(cond)
        }
    }

    fn binop_for(kind: &TokenKind) -> Option<(BinOp, u8)> {
        Some(match kind {
            TokenKind::Pipe2 => (BinOp::Or, 4),
            TokenKind::Amp2 => (BinOp::And, 5),
            TokenKind::EqEq => (BinOp::Eq, 6),
            TokenKind::NotEq => (BinOp::NotEq, 6),
            TokenKind::Lt => (BinOp::Lt, 7),
            TokenKind::LtEq => (BinOp::LtEq, 7),
            TokenKind::Gt => (BinOp::Gt, 7),
            TokenKind::GtEq => (BinOp::GtEq, 7),
            TokenKind::Plus => (BinOp::Add, 8),
            TokenKind::Minus => (BinOp::Sub, 8),
            TokenKind::Star => (BinOp::Mul, 9),
            TokenKind::Slash => (BinOp::Div, 9),
            TokenKind::Percent => (BinOp::Rem, 9),
            _ => return None,
        })
    }

    /// Precedence-climbing binary expression parser. All operators here
    /// are left-associative, so a sub-expression at precedence `p` recurses
    /// at `p + 1` for its right-hand operand.
    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;

        loop {
            let Some((op, prec)) = Self::binop_for(&self.peek().kind) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.advance();
            let rhs = self.parse_binary(prec + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }

        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        match self.peek().kind {
            TokenKind::Bang => {
                self.advance();
                Ok(Expr::Unary(UnOp::Not, Box::new(self.parse_unary()?)))
            }
            TokenKind::Minus => {
                self.advance();
                Ok(Expr::Unary(UnOp::Neg, Box::new(self.parse_unary()?)))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;

        loop {
            match self.peek().kind {
                TokenKind::Dot => {
                    self.advance();
                    let name = self.expect_ident()?;
                    expr = Expr::Member(Box::new(expr), name);
                }
                TokenKind::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    while !self.check(&TokenKind::RParen) {
                        args.push(self.parse_expr()?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(&TokenKind::RParen)?;
                    expr = Expr::Call(Box::new(expr), args);
                }
                TokenKind::LBracket => {
                    self.advance();
                    // `[` may start an index `a[b]` or a slice `a[s:e]`
                    // with either bound optional.
                    let start = if self.check(&TokenKind::Colon) {
                        None
                    } else {
                        Some(Box::new(self.parse_expr()?))
                    };
                    if self.eat(&TokenKind::Colon) {
                        let end = if self.check(&TokenKind::RBracket) {
                            None
                        } else {
                            Some(Box::new(self.parse_expr()?))
                        };
                        self.expect(&TokenKind::RBracket)?;
                        expr = Expr::Slice(Box::new(expr), start, end);
                    } else {
                        self.expect(&TokenKind::RBracket)?;
                        let idx = start.ok_or_else(|| {
                            let tok = self.peek();
                            ParseError {
                                expected: "index expression".into(),
                                found: tok.kind.to_string(),
                                line: tok.line,
                                column: tok.column,
                            }
                        })?;
                        expr = Expr::Index(Box::new(expr), idx);
                    }
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let tok = self.advance().clone();
        match tok.kind {
            TokenKind::Number(n) => Ok(Expr::Literal(Literal::Number(n))),
            TokenKind::String(s) => Ok(Expr::Literal(Literal::String(s))),
            TokenKind::Bool(b) => Ok(Expr::Literal(Literal::Bool(b))),
            TokenKind::Null => Ok(Expr::Literal(Literal::Null)),
            TokenKind::Ident(name) => Ok(Expr::Ident(name)),
            TokenKind::LParen => {
                let inner = self.parse_expr()?;
                self.expect(&TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::LBracket => {
                let mut items = Vec::new();
                while !self.check(&TokenKind::RBracket) {
                    items.push(self.parse_expr()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBracket)?;
                Ok(Expr::Array(items))
            }
            TokenKind::LBrace => {
                let mut entries = Vec::new();
                while !self.check(&TokenKind::RBrace) {
                    let key_tok = self.advance().clone();
                    let key = match key_tok.kind {
                        TokenKind::String(s) => s,
                        TokenKind::Ident(s) => s,
                        other => {
                            return Err(ParseError {
                                expected: "map key".into(),
                                found: other.to_string(),
                                line: key_tok.line,
                                column: key_tok.column,
                            })
                        }
                    };
                    self.expect(&TokenKind::Colon)?;
                    let value = self.parse_expr()?;
                    entries.push((key, value));
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::RBrace)?;
                Ok(Expr::Map(entries))
            }
            TokenKind::PipeBar => {
                let mut params = Vec::new();
                while !self.check(&TokenKind::PipeBar) {
                    params.push(self.expect_ident()?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(&TokenKind::PipeBar)?;
                let body = self.parse_expr()?;
                Ok(Expr::Lambda(params, Box::new(body)))
            }
            other => Err(ParseError {
                expected: "expression".into(),
                found: other.to_string(),
                line: tok.line,
                column: tok.column,
            }),
        }
    }
}

/// Parse a flat token stream into top-level statements, applying
/// `policy` to decide how to continue past errors.
#[must_use]
pub fn parse_program(tokens: &[Token], policy: AggregationPolicy) -> ParseOutcome {
    let mut parser = Parser::new(tokens);
    let mut outcome = ParseOutcome::default();

    while !parser.at_eof() {
        match parser.parse_stmt() {
            Ok(stmt) => outcome.statements.push(stmt),
            Err(err) => {
                outcome.errors.push(err);
                match policy {
                    AggregationPolicy::FailFast => break,
                    AggregationPolicy::CollectAll | AggregationPolicy::StopAtFatal => {
                        // Recover by skipping to the next statement boundary
                        // so independent top-level statements can still be
                        // collected.
                        if !recover_to_next_stmt(&mut parser) {
                            break;
                        }
                    }
                }
            }
        }
    }

    outcome
}

/// Skip tokens until a statement boundary (`;` or the start of a new
/// top-level keyword) is found. Returns `false` if EOF is reached first.
fn recover_to_next_stmt(parser: &mut Parser<'_>) -> bool {
    while !parser.at_eof() {
        if parser.eat(&TokenKind::Semicolon) {
            return true;
        }
        if let TokenKind::Ident(s) = &parser.peek().kind {
            if matches!(
                s.as_str(),
                "target" | "repository" | "let" | "const" | "fn" | "macro" | "if" | "for" | "import"
            ) {
                return true;
            }
        }
        parser.advance();
    }
    false
}
