// SPDX-License-Identifier: Apache-2.0
//! AST types produced by the statement and expression parsers.

/// A literal value.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    /// String literal.
    String(String),
    /// Numeric literal.
    Number(f64),
    /// Boolean literal.
    Bool(bool),
    /// `null`.
    Null,
}

/// An expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// A literal value.
    Literal(Literal),
    /// A bare identifier reference.
    Ident(String),
    /// `[a, b, c]`.
    Array(Vec<Expr>),
    /// `{ "k": v, ... }` — homogeneous string keys.
    Map(Vec<(String, Expr)>),
    /// `a.b`.
    Member(Box<Expr>, String),
    /// `a[b]`.
    Index(Box<Expr>, Box<Expr>),
    /// `a[start:end]`, either bound optional.
    Slice(Box<Expr>, Option<Box<Expr>>, Option<Box<Expr>>),
    /// `f(args...)`.
    Call(Box<Expr>, Vec<Expr>),
    /// `|params| body`.
    Lambda(Vec<String>, Box<Expr>),
    /// `cond ? then : else`.
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    /// A binary operator application.
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// A unary operator application.
    Unary(UnOp, Box<Expr>),
}

/// Binary operators, in the precedence order spec.md §4.4 declares:
/// `||`(4) < `&&`(5) < equality(6) < relational(7) < additive(8) <
/// multiplicative(9). All left-associative.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    /// `!expr`.
    Not,
    /// `-expr`.
    Neg,
}

/// A top-level or block statement.
#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    /// `target("name") { field: expr; ... }`.
    Target { name: String, fields: Vec<(String, Expr)> },
    /// `repository("name") { field: expr; ... }`.
    Repository { name: String, fields: Vec<(String, Expr)> },
    /// `let name = expr;`.
    Let { name: String, value: Expr },
    /// `const name = expr;`.
    Const { name: String, value: Expr },
    /// `fn name(params) { body }`.
    Fn { name: String, params: Vec<String>, body: Vec<Stmt> },
    /// `macro name(params) { body }`.
    Macro { name: String, params: Vec<String>, body: Vec<Stmt> },
    /// `if (cond) { then } else { else_ }`.
    If { cond: Expr, then: Vec<Stmt>, else_: Vec<Stmt> },
    /// `for var in iterable { body }`.
    For { var: String, iterable: Expr, body: Vec<Stmt> },
    /// `import path;`.
    Import { path: String },
    /// A bare expression statement (used inside function/macro bodies).
    Expr(Expr),
}
