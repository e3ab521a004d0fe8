//! Lowering of `.ser` programs into network systems.
//!
//! Each request body is executed symbolically. A local state is the pair
//! (local environment, remaining expression) and a global state is the
//! global environment; one NS transition is one atomic run up to the next
//! `yield` or to the final value. A request whose remaining expression is
//! the literal `n` answers with response `n`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use indexmap::IndexSet;
use serval_dsl::ast::{Expr, Program};
use thiserror::Error;

use crate::ns::NetworkSystem;

pub const DEFAULT_MAX_STATES: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoweringError {
    #[error("state space exceeds the limit of {limit} (local, global) pairs")]
    StateLimit { limit: usize },
    #[error("integer overflow while evaluating `{expr}`")]
    Overflow { expr: String },
}

type Result<T> = std::result::Result<T, LoweringError>;

/// Variable assignment; variables not present are 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct Env(BTreeMap<String, i64>);

impl Env {
    fn get(&self, var: &str) -> i64 {
        self.0.get(var).copied().unwrap_or(0)
    }

    fn with(&self, var: &str, value: i64) -> Env {
        let mut vars = self.0.clone();
        if value == 0 {
            vars.remove(var);
        } else {
            vars.insert(var.to_string(), value);
        }
        Env(vars)
    }
}

impl fmt::Display for Env {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{k}={v}")?;
        }
        write!(f, "}}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    /// Suspended; resume with this expression.
    Yielding(Expr),
    Returning(i64),
}

type Step = (Outcome, Env, Env);

fn num(n: i64) -> Box<Expr> {
    Box::new(Expr::Number(n))
}

fn truth(b: bool) -> i64 {
    i64::from(b)
}

/// Every way `expr` can run from `(local, global)` until it yields or
/// produces a value.
fn run(expr: &Expr, local: Env, global: Env) -> Result<Vec<Step>> {
    let mut out = Vec::new();
    match expr {
        Expr::Number(n) => out.push((Outcome::Returning(*n), local, global)),
        Expr::Variable(x) => {
            let value = if Expr::is_global_variable(x) {
                global.get(x)
            } else {
                local.get(x)
            };
            out.push((Outcome::Returning(value), local, global));
        }
        Expr::Unknown => {
            out.push((Outcome::Returning(0), local.clone(), global.clone()));
            out.push((Outcome::Returning(1), local, global));
        }
        Expr::Yield => out.push((Outcome::Yielding(Expr::Number(0)), local, global)),
        Expr::Assign(var, e) => {
            for (r, l, g) in run(e, local, global)? {
                out.push(match r {
                    Outcome::Yielding(rest) => (
                        Outcome::Yielding(Expr::Assign(var.clone(), Box::new(rest))),
                        l,
                        g,
                    ),
                    Outcome::Returning(n) if Expr::is_global_variable(var) => {
                        (Outcome::Returning(n), l, g.with(var, n))
                    }
                    Outcome::Returning(n) => (Outcome::Returning(n), l.with(var, n), g),
                });
            }
        }
        Expr::Equal(a, b) => {
            out = strict(expr, a, b, local, global, Expr::Equal, |x, y| Some(truth(x == y)))?
        }
        Expr::Add(a, b) => out = strict(expr, a, b, local, global, Expr::Add, i64::checked_add)?,
        Expr::Sub(a, b) => out = strict(expr, a, b, local, global, Expr::Sub, i64::checked_sub)?,
        Expr::Not(e) => {
            for (r, l, g) in run(e, local, global)? {
                out.push(match r {
                    Outcome::Yielding(rest) => (Outcome::Yielding(Expr::Not(Box::new(rest))), l, g),
                    Outcome::Returning(n) => (Outcome::Returning(truth(n == 0)), l, g),
                });
            }
        }
        Expr::And(a, b) => out = short_circuit(a, b, local, global, false)?,
        Expr::Or(a, b) => out = short_circuit(a, b, local, global, true)?,
        Expr::Sequence(a, b) => {
            for (r, l, g) in run(a, local, global)? {
                match r {
                    Outcome::Yielding(rest) => out.push((
                        Outcome::Yielding(Expr::Sequence(Box::new(rest), b.clone())),
                        l,
                        g,
                    )),
                    Outcome::Returning(_) => out.extend(run(b, l, g)?),
                }
            }
        }
        Expr::If(c, then, otherwise) => {
            for (r, l, g) in run(c, local, global)? {
                match r {
                    Outcome::Yielding(rest) => out.push((
                        Outcome::Yielding(Expr::If(Box::new(rest), then.clone(), otherwise.clone())),
                        l,
                        g,
                    )),
                    Outcome::Returning(0) => out.extend(run(otherwise, l, g)?),
                    Outcome::Returning(_) => out.extend(run(then, l, g)?),
                }
            }
        }
        Expr::While(c, body) => {
            // Iterations that neither yield nor exit are followed to a
            // fixpoint over the environments they reach.
            let again = Expr::While(c.clone(), body.clone());
            let mut todo = vec![(local, global)];
            let mut visited = BTreeSet::new();
            while let Some((local, global)) = todo.pop() {
                if !visited.insert((local.clone(), global.clone())) {
                    continue;
                }
                for (r, l, g) in run(c, local, global)? {
                    match r {
                        Outcome::Yielding(rest) => {
                            // Resume inside the condition, then continue
                            // with the loop as written.
                            let resumed = Expr::If(
                                Box::new(rest),
                                Box::new(Expr::Sequence(body.clone(), Box::new(again.clone()))),
                                num(0),
                            );
                            out.push((Outcome::Yielding(resumed), l, g));
                        }
                        Outcome::Returning(0) => out.push((Outcome::Returning(0), l, g)),
                        Outcome::Returning(_) => {
                            for (r2, l2, g2) in run(body, l, g)? {
                                match r2 {
                                    Outcome::Yielding(rest) => out.push((
                                        Outcome::Yielding(Expr::Sequence(
                                            Box::new(rest),
                                            Box::new(again.clone()),
                                        )),
                                        l2,
                                        g2,
                                    )),
                                    Outcome::Returning(_) => todo.push((l2, g2)),
                                }
                            }
                        }
                    }
                }
            }
        }
    }
    Ok(out)
}

/// Operators evaluating both operands left to right.
fn strict(
    whole: &Expr,
    a: &Expr,
    b: &Expr,
    local: Env,
    global: Env,
    rebuild: fn(Box<Expr>, Box<Expr>) -> Expr,
    op: fn(i64, i64) -> Option<i64>,
) -> Result<Vec<Step>> {
    let mut out = Vec::new();
    for (r1, l1, g1) in run(a, local, global)? {
        match r1 {
            Outcome::Yielding(rest) => out.push((
                Outcome::Yielding(rebuild(Box::new(rest), Box::new(b.clone()))),
                l1,
                g1,
            )),
            Outcome::Returning(x) => {
                for (r2, l2, g2) in run(b, l1, g1)? {
                    match r2 {
                        Outcome::Yielding(rest) => out.push((
                            Outcome::Yielding(rebuild(num(x), Box::new(rest))),
                            l2,
                            g2,
                        )),
                        Outcome::Returning(y) => {
                            let value = op(x, y).ok_or_else(|| LoweringError::Overflow {
                                expr: whole.to_string(),
                            })?;
                            out.push((Outcome::Returning(value), l2, g2));
                        }
                    }
                }
            }
        }
    }
    Ok(out)
}

/// `&&` (`stop_on = false`) and `||` (`stop_on = true`).
fn short_circuit(a: &Expr, b: &Expr, local: Env, global: Env, stop_on: bool) -> Result<Vec<Step>> {
    let rebuild = |x: Box<Expr>, y: Box<Expr>| {
        if stop_on {
            Expr::Or(x, y)
        } else {
            Expr::And(x, y)
        }
    };
    let mut out = Vec::new();
    for (r1, l1, g1) in run(a, local, global)? {
        match r1 {
            Outcome::Yielding(rest) => out.push((
                Outcome::Yielding(rebuild(Box::new(rest), Box::new(b.clone()))),
                l1,
                g1,
            )),
            Outcome::Returning(x) if (x != 0) == stop_on => {
                out.push((Outcome::Returning(truth(stop_on)), l1, g1))
            }
            Outcome::Returning(_) => {
                for (r2, l2, g2) in run(b, l1, g1)? {
                    out.push(match r2 {
                        // The left operand is settled; keep the result
                        // boolean once the right one finishes.
                        Outcome::Yielding(rest) => (
                            Outcome::Yielding(rebuild(num(truth(!stop_on)), Box::new(rest))),
                            l2,
                            g2,
                        ),
                        Outcome::Returning(y) => (Outcome::Returning(truth(y != 0)), l2, g2),
                    });
                }
            }
        }
    }
    Ok(out)
}

fn local_name(env: &Env, expr: &Expr) -> String {
    format!("{env}|{expr}")
}

/// Lower every request of `program` into one network system.
///
/// Every local state ever produced is run against every global state ever
/// produced, so the result contains all transitions any interleaving can
/// use. Exploration fails with [`LoweringError::StateLimit`] once more than
/// `max_states` (local, global) pairs have been processed.
pub fn lower_program(program: &Program, max_states: usize) -> Result<NetworkSystem> {
    let initial = Env::default();
    let mut ns = NetworkSystem::new(initial.to_string());
    let mut packets: IndexSet<(Env, Expr)> = IndexSet::new();
    let mut globals: IndexSet<Env> = IndexSet::new();
    let mut todo: Vec<((Env, Expr), Env)> = Vec::new();

    globals.insert(initial.clone());
    for request in &program.requests {
        let packet = (Env::default(), request.node.body.clone());
        ns.add_request(request.node.name.clone(), local_name(&packet.0, &packet.1));
        if packets.insert(packet.clone()) {
            todo.push((packet, initial.clone()));
        }
    }

    let mut processed = 0usize;
    while let Some(((local, expr), global)) = todo.pop() {
        processed += 1;
        if processed > max_states {
            return Err(LoweringError::StateLimit { limit: max_states });
        }
        let from = local_name(&local, &expr);
        if let Expr::Number(n) = expr {
            ns.add_response(from, n.to_string());
            continue;
        }
        for (outcome, next_local, next_global) in run(&expr, local, global.clone())? {
            let next_expr = match outcome {
                Outcome::Yielding(rest) => rest,
                Outcome::Returning(n) => Expr::Number(n),
            };
            ns.add_transition(
                from.clone(),
                global.to_string(),
                local_name(&next_local, &next_expr),
                next_global.to_string(),
            );
            if globals.insert(next_global.clone()) {
                for p in &packets {
                    todo.push((p.clone(), next_global.clone()));
                }
            }
            let packet = (next_local, next_expr);
            if packets.insert(packet.clone()) {
                for g in &globals {
                    todo.push((packet.clone(), g.clone()));
                }
            }
        }
    }

    tracing::debug!(
        locals = packets.len(),
        globals = globals.len(),
        transitions = ns.transitions.len(),
        "lowered program"
    );
    Ok(ns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serval_dsl::parse;

    fn lower(src: &str) -> NetworkSystem {
        let program = parse(src, "test.ser").unwrap();
        lower_program(&program, DEFAULT_MAX_STATES).unwrap()
    }

    fn responses(ns: &NetworkSystem) -> BTreeSet<String> {
        ns.responses.iter().map(|r| r.name.clone()).collect()
    }

    #[test]
    fn bare_expression_is_one_request() {
        let ns = lower("x := 1; yield; x");
        assert_eq!(ns.requests.len(), 1);
        assert_eq!(ns.requests[0].name, "request");
        assert_eq!(ns.initial_global, "{}");
        assert_eq!(responses(&ns), BTreeSet::from(["1".to_string()]));
        assert_eq!(ns.globals().len(), 1);
    }

    #[test]
    fn unknown_answers_both_ways() {
        let ns = lower("request coin { ? }");
        assert_eq!(
            responses(&ns),
            BTreeSet::from(["0".to_string(), "1".to_string()])
        );
    }

    #[test]
    fn globals_are_shared_between_requests() {
        let ns = lower(
            "request write { X := 1; yield; X := 0; 0 }
             request read { X }",
        );
        let globals: BTreeSet<&str> = ns.globals().into_iter().collect();
        assert!(globals.contains("{}"));
        assert!(globals.contains("{X=1}"));
        // the reader runs against every global, so it can observe 1
        assert!(responses(&ns).contains("1"));
        assert!(ns.requests.iter().any(|r| r.name == "read"));
    }

    #[test]
    fn silent_loops_reach_a_fixpoint() {
        let ns = lower("while (x == 0) { x := ? }; x");
        assert_eq!(responses(&ns), BTreeSet::from(["1".to_string()]));
    }

    #[test]
    fn yielding_condition_keeps_the_loop() {
        // the loop re-checks its condition after every resumption
        let ns = lower("while ((yield; x == 0)) { x := 1 }; x + 5");
        assert_eq!(responses(&ns), BTreeSet::from(["6".to_string()]));
    }

    #[test]
    fn unbounded_counters_hit_the_state_limit() {
        let program = parse("request inc { X := X + 1; yield; 0 }", "inc.ser").unwrap();
        assert_eq!(
            lower_program(&program, 200),
            Err(LoweringError::StateLimit { limit: 200 })
        );
    }

    #[test]
    fn lowering_is_deterministic() {
        let src = "request a { X := ?; yield; X } request b { Y := X; yield; Y }";
        let a = lower(src).to_json_pretty().unwrap();
        let b = lower(src).to_json_pretty().unwrap();
        assert_eq!(a, b);
    }
}
