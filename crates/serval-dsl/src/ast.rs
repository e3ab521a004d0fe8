use std::fmt;

/// Source span for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// A spanned AST node.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }
}

/// Top-level program: the request handlers of one server.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct Program {
    pub requests: Vec<Spanned<RequestDecl>>,
}

/// Name used when a file holds a bare expression instead of request blocks.
pub const DEFAULT_REQUEST_NAME: &str = "request";

/// `request NAME { body }`
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct RequestDecl {
    pub name: String,
    pub body: Expr,
}

/// Request body expression.
///
/// Every expression evaluates to an integer. Identifiers starting with an
/// uppercase letter name global variables; all others are request-local.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub enum Expr {
    Assign(String, Box<Expr>),
    Equal(Box<Expr>, Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Sequence(Box<Expr>, Box<Expr>),
    If(Box<Expr>, Box<Expr>, Box<Expr>),
    While(Box<Expr>, Box<Expr>),
    Yield,
    /// `?`: nondeterministically 0 or 1.
    Unknown,
    Number(i64),
    Variable(String),
}

impl Expr {
    pub fn is_global_variable(name: &str) -> bool {
        name.chars().next().is_some_and(|c| c.is_uppercase())
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            Expr::Number(n) => Some(*n),
            _ => None,
        }
    }
}

fn write_block(f: &mut fmt::Formatter<'_>, body: &Expr) -> fmt::Result {
    write!(f, "{{{body}}}")
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Assign(var, e) => write!(f, "{var} := {e}"),
            Expr::Equal(a, b) => write!(f, "({a} == {b})"),
            Expr::Add(a, b) => write!(f, "({a} + {b})"),
            Expr::Sub(a, b) => write!(f, "({a} - {b})"),
            Expr::Not(e) => write!(f, "!{e}"),
            Expr::And(a, b) => write!(f, "({a} && {b})"),
            Expr::Or(a, b) => write!(f, "({a} || {b})"),
            Expr::Sequence(a, b) => write!(f, "{a}; {b}"),
            Expr::If(c, t, e) => {
                write!(f, "if({c})")?;
                write_block(f, t)?;
                write!(f, "else")?;
                write_block(f, e)
            }
            Expr::While(c, body) => {
                write!(f, "while({c})")?;
                write_block(f, body)
            }
            Expr::Yield => write!(f, "yield"),
            Expr::Unknown => write!(f, "?"),
            Expr::Number(n) => write!(f, "{n}"),
            Expr::Variable(v) => write!(f, "{v}"),
        }
    }
}
