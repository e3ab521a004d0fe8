#![allow(clippy::result_large_err)]

use std::collections::HashSet;

use pest::Parser;
use pest_derive::Parser;

use crate::ast::*;
use crate::errors::ParseError;

#[derive(Parser)]
#[grammar = "grammar.pest"]
struct SerParser;

type Pair<'a> = pest::iterators::Pair<'a, Rule>;

fn span_from(pair: &Pair<'_>) -> Span {
    let s = pair.as_span();
    Span::new(s.start(), s.end())
}

struct Ctx<'s> {
    source: &'s str,
    filename: &'s str,
}

impl Ctx<'_> {
    fn syntax_error_at(&self, pair: &Pair<'_>, message: impl Into<String>) -> ParseError {
        ParseError::syntax(message, span_from(pair), self.source, self.filename)
    }
}

/// Parse a `.ser` source file into a [`Program`].
///
/// A file made of `request NAME { ... }` blocks yields one request per
/// block; a file holding a single bare expression yields one request named
/// [`DEFAULT_REQUEST_NAME`].
pub fn parse(source: &str, filename: &str) -> Result<Program, ParseError> {
    let ctx = Ctx { source, filename };
    let mut pairs = SerParser::parse(Rule::program, source).map_err(|e| {
        let (start, end) = match e.location {
            pest::error::InputLocation::Pos(p) => (p, p + 1),
            pest::error::InputLocation::Span((s, e)) => (s, e),
        };
        ParseError::syntax(format!("{e}"), Span::new(start, end), source, filename)
    })?;

    let program_pair = pairs
        .next()
        .ok_or_else(|| ParseError::syntax("empty input", Span::new(0, 0), source, filename))?;
    let program_span = span_from(&program_pair);

    let mut requests = Vec::new();
    let mut seen = HashSet::new();
    for pair in program_pair.into_inner() {
        match pair.as_rule() {
            Rule::request_decl => {
                let span = span_from(&pair);
                let decl = parse_request(&ctx, pair)?;
                if !seen.insert(decl.name.clone()) {
                    return Err(ParseError::duplicate(decl.name, span, source, filename));
                }
                requests.push(Spanned::new(decl, span));
            }
            Rule::expr => {
                let body = parse_expr(&ctx, pair)?;
                requests.push(Spanned::new(
                    RequestDecl {
                        name: DEFAULT_REQUEST_NAME.to_string(),
                        body,
                    },
                    program_span,
                ));
            }
            Rule::EOI => {}
            _ => return Err(ctx.syntax_error_at(&pair, "unexpected top-level item")),
        }
    }
    Ok(Program { requests })
}

fn parse_request(ctx: &Ctx<'_>, pair: Pair<'_>) -> Result<RequestDecl, ParseError> {
    let mut inner = pair.into_inner();
    let name = inner
        .next()
        .map(|p| p.as_str().to_string())
        .unwrap_or_default();
    let body = match inner.next() {
        Some(expr) => parse_expr(ctx, expr)?,
        None => Expr::Number(0),
    };
    Ok(RequestDecl { name, body })
}

fn parse_expr(ctx: &Ctx<'_>, pair: Pair<'_>) -> Result<Expr, ParseError> {
    match pair.as_rule() {
        Rule::expr => {
            let mut parts = pair
                .into_inner()
                .map(|p| parse_expr(ctx, p))
                .collect::<Result<Vec<_>, _>>()?;
            let mut acc = parts.pop().unwrap_or(Expr::Number(0));
            while let Some(prev) = parts.pop() {
                acc = Expr::Sequence(Box::new(prev), Box::new(acc));
            }
            Ok(acc)
        }
        Rule::assign_expr | Rule::primary => {
            let inner = single_child(ctx, pair)?;
            parse_expr(ctx, inner)
        }
        Rule::assignment => {
            let mut inner = pair.into_inner();
            let (Some(name), Some(value)) = (inner.next(), inner.next()) else {
                return Err(ParseError::syntax(
                    "malformed assignment",
                    Span::new(0, 0),
                    ctx.source,
                    ctx.filename,
                ));
            };
            Ok(Expr::Assign(
                name.as_str().to_string(),
                Box::new(parse_expr(ctx, value)?),
            ))
        }
        Rule::or_expr => fold_binary(ctx, pair, |a, b| Expr::Or(Box::new(a), Box::new(b))),
        Rule::and_expr => fold_binary(ctx, pair, |a, b| Expr::And(Box::new(a), Box::new(b))),
        Rule::eq_expr => fold_binary(ctx, pair, |a, b| Expr::Equal(Box::new(a), Box::new(b))),
        Rule::add_expr => {
            let mut inner = pair.into_inner();
            let mut acc = match inner.next() {
                Some(first) => parse_expr(ctx, first)?,
                None => Expr::Number(0),
            };
            while let (Some(op), Some(rhs)) = (inner.next(), inner.next()) {
                let rhs = parse_expr(ctx, rhs)?;
                acc = if op.as_str() == "+" {
                    Expr::Add(Box::new(acc), Box::new(rhs))
                } else {
                    Expr::Sub(Box::new(acc), Box::new(rhs))
                };
            }
            Ok(acc)
        }
        Rule::unary => {
            let mut nots = 0usize;
            let mut operand = None;
            for p in pair.into_inner() {
                match p.as_rule() {
                    Rule::not_op => nots += 1,
                    _ => operand = Some(parse_expr(ctx, p)?),
                }
            }
            let mut expr = operand.unwrap_or(Expr::Number(0));
            for _ in 0..nots {
                expr = Expr::Not(Box::new(expr));
            }
            Ok(expr)
        }
        Rule::if_expr => {
            let mut inner = pair.into_inner();
            let cond = next_expr(ctx, &mut inner)?;
            let then_branch = next_expr(ctx, &mut inner)?;
            let else_branch = match inner.next() {
                Some(block) => parse_expr(ctx, block)?,
                None => Expr::Number(0),
            };
            Ok(Expr::If(
                Box::new(cond),
                Box::new(then_branch),
                Box::new(else_branch),
            ))
        }
        Rule::while_expr => {
            let mut inner = pair.into_inner();
            let cond = next_expr(ctx, &mut inner)?;
            let body = next_expr(ctx, &mut inner)?;
            Ok(Expr::While(Box::new(cond), Box::new(body)))
        }
        Rule::block => match pair.into_inner().next() {
            Some(body) => parse_expr(ctx, body),
            None => Ok(Expr::Number(0)),
        },
        Rule::yield_kw => Ok(Expr::Yield),
        Rule::unknown => Ok(Expr::Unknown),
        Rule::number => {
            let literal = pair.as_str();
            literal.parse::<i64>().map(Expr::Number).map_err(|_| {
                ParseError::invalid_number(literal, span_from(&pair), ctx.source, ctx.filename)
            })
        }
        Rule::ident => Ok(Expr::Variable(pair.as_str().to_string())),
        _ => Err(ctx.syntax_error_at(&pair, format!("unexpected {:?}", pair.as_rule()))),
    }
}

fn single_child<'a>(ctx: &Ctx<'_>, pair: Pair<'a>) -> Result<Pair<'a>, ParseError> {
    let span_err = ctx.syntax_error_at(&pair, "expected an expression");
    pair.into_inner().next().ok_or(span_err)
}

fn next_expr(
    ctx: &Ctx<'_>,
    inner: &mut pest::iterators::Pairs<'_, Rule>,
) -> Result<Expr, ParseError> {
    match inner.next() {
        Some(p) => parse_expr(ctx, p),
        None => Err(ParseError::syntax(
            "expected an expression",
            Span::new(0, 0),
            ctx.source,
            ctx.filename,
        )),
    }
}

fn fold_binary(
    ctx: &Ctx<'_>,
    pair: Pair<'_>,
    combine: impl Fn(Expr, Expr) -> Expr,
) -> Result<Expr, ParseError> {
    let mut operands = pair.into_inner().map(|p| parse_expr(ctx, p));
    let mut acc = match operands.next() {
        Some(first) => first?,
        None => Expr::Number(0),
    };
    for rhs in operands {
        acc = combine(acc, rhs?);
    }
    Ok(acc)
}
