//! Embedded expressions for `!bind!`, `!eval!` and `!output!` clauses.
//!
//! Expressions are small prefix forms: `(+ =count 1)`, `(max =a =b 0)`,
//! `(< =x 10)`. The built-in evaluator covers arithmetic and comparisons;
//! anything it does not know is handed to the task as a flat token list.

use std::fmt::Write as _;

use crate::error::{CogzError, Result};
use crate::procedural::matching::Bindings;
use crate::procedural::production::Term;
use crate::symbol::{Interner, Symbol, format_number, sym};
use crate::task::Task;

/// An embedded expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A constant or variable.
    Atom(Term),
    /// A function call `(f arg ...)`.
    Call(Symbol, Vec<Expr>),
}

impl Expr {
    /// Read an expression from text.
    ///
    /// # Errors
    /// Returns `CogzError::Expression` on unbalanced parentheses, an empty
    /// form, or trailing input.
    pub fn parse(text: &str, symbols: &mut Interner) -> Result<Self> {
        let tokens = tokenize(text);
        let mut pos = 0;
        let expr = read(&tokens, &mut pos, symbols)?;
        if pos != tokens.len() {
            return Err(CogzError::Expression(format!("trailing input in `{text}`")));
        }
        Ok(expr)
    }

    /// Every variable mentioned, in reading order.
    #[must_use]
    pub fn variables(&self) -> Vec<Symbol> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut Vec<Symbol>) {
        match self {
            Self::Atom(Term::Var(v)) => out.push(*v),
            Self::Atom(Term::Const(_)) => {}
            Self::Call(_, args) => args.iter().for_each(|a| a.collect_variables(out)),
        }
    }

    /// Whether every variable is bound.
    #[must_use]
    pub fn is_ready(&self, bindings: &Bindings) -> bool {
        self.variables().iter().all(|v| bindings.contains_key(v))
    }

    /// Evaluate with the built-in evaluator.
    ///
    /// Returns `None` for unknown functions, unbound variables, or
    /// non-numeric arguments to arithmetic.
    pub fn evaluate(&self, bindings: &Bindings, symbols: &mut Interner) -> Option<Symbol> {
        match self {
            Self::Atom(term) => term.resolve(bindings),
            Self::Call(function, args) => {
                let values = args
                    .iter()
                    .map(|a| a.evaluate(bindings, symbols))
                    .collect::<Option<Vec<_>>>()?;
                let name = symbols.name(*function).to_owned();
                apply(&name, &values, symbols)
            }
        }
    }

    /// Flatten to tokens with bindings substituted, for a task fallback.
    #[must_use]
    pub fn tokens(&self, bindings: &Bindings, symbols: &Interner) -> Vec<String> {
        let mut out = Vec::new();
        self.push_tokens(bindings, symbols, &mut out);
        out
    }

    fn push_tokens(&self, bindings: &Bindings, symbols: &Interner, out: &mut Vec<String>) {
        match self {
            Self::Atom(term) => {
                let symbol = term.resolve(bindings).unwrap_or_else(|| term.symbol());
                out.push(symbols.name(symbol).to_owned());
            }
            Self::Call(function, args) => {
                out.push("(".to_owned());
                out.push(symbols.name(*function).to_owned());
                for arg in args {
                    arg.push_tokens(bindings, symbols, out);
                }
                out.push(")".to_owned());
            }
        }
    }

    /// Render back to text.
    #[must_use]
    pub fn render(&self, symbols: &Interner) -> String {
        let mut out = String::new();
        self.render_into(symbols, &mut out);
        out
    }

    fn render_into(&self, symbols: &Interner, out: &mut String) {
        match self {
            Self::Atom(term) => out.push_str(symbols.name(term.symbol())),
            Self::Call(function, args) => {
                let _ = write!(out, "({}", symbols.name(*function));
                for arg in args {
                    out.push(' ');
                    arg.render_into(symbols, out);
                }
                out.push(')');
            }
        }
    }

    /// Replace variables per `map`, leaving unmapped ones in place.
    #[must_use]
    pub fn substitute(&self, map: &Bindings, is_var: &dyn Fn(Symbol) -> bool) -> Self {
        match self {
            Self::Atom(term) => Self::Atom(term.substitute(map, is_var)),
            Self::Call(function, args) => Self::Call(
                *function,
                args.iter().map(|a| a.substitute(map, is_var)).collect(),
            ),
        }
    }
}

/// Value for `!bind!`: the built-in evaluator first, then the task.
pub fn bind_value(
    expr: &Expr,
    bindings: &Bindings,
    symbols: &mut Interner,
    task: Option<&mut (dyn Task + 'static)>,
) -> Option<Symbol> {
    if let Some(value) = expr.evaluate(bindings, symbols) {
        return Some(value);
    }
    let tokens = expr.tokens(bindings, symbols);
    let text = task?.bind(&tokens)?;
    Some(symbols.intern(&text))
}

/// Truth of a condition-side `!eval!`: built-in first, then the task.
pub fn condition_holds(
    expr: &Expr,
    bindings: &Bindings,
    symbols: &mut Interner,
    task: Option<&mut (dyn Task + 'static)>,
) -> Option<bool> {
    if let Some(value) = expr.evaluate(bindings, symbols) {
        return Some(truthy(value));
    }
    let tokens = expr.tokens(bindings, symbols);
    task?.eval_condition(&tokens)
}

/// Run an action-side `!eval!`. Returns whether anyone handled it.
pub fn run_effect(
    expr: &Expr,
    bindings: &Bindings,
    symbols: &mut Interner,
    task: Option<&mut (dyn Task + 'static)>,
) -> bool {
    if expr.evaluate(bindings, symbols).is_some() {
        return true;
    }
    let tokens = expr.tokens(bindings, symbols);
    task.is_some_and(|t| t.eval(&tokens))
}

/// Whether a value counts as true: anything but `nil`.
#[must_use]
pub fn truthy(value: Symbol) -> bool {
    value != sym::NIL
}

fn tokenize(text: &str) -> Vec<String> {
    text.replace('(', " ( ")
        .replace(')', " ) ")
        .split_whitespace()
        .map(str::to_owned)
        .collect()
}

fn read(tokens: &[String], pos: &mut usize, symbols: &mut Interner) -> Result<Expr> {
    let token = tokens
        .get(*pos)
        .ok_or_else(|| CogzError::Expression("unexpected end of expression".to_owned()))?;
    *pos += 1;
    match token.as_str() {
        "(" => {
            let head = tokens
                .get(*pos)
                .filter(|t| *t != "(" && *t != ")")
                .ok_or_else(|| CogzError::Expression("form without a function name".to_owned()))?;
            let function = symbols.intern(head);
            *pos += 1;
            let mut args = Vec::new();
            loop {
                match tokens.get(*pos).map(String::as_str) {
                    Some(")") => {
                        *pos += 1;
                        return Ok(Expr::Call(function, args));
                    }
                    Some(_) => args.push(read(tokens, pos, symbols)?),
                    None => {
                        return Err(CogzError::Expression("missing `)`".to_owned()));
                    }
                }
            }
        }
        ")" => Err(CogzError::Expression("unexpected `)`".to_owned())),
        atom => Ok(Expr::Atom(Term::parse(atom, symbols))),
    }
}

fn apply(function: &str, values: &[Symbol], symbols: &mut Interner) -> Option<Symbol> {
    let boolean = |b: bool| if b { sym::T } else { sym::NIL };
    match function {
        "=" | "equal" | "eq" => Some(boolean(values.windows(2).all(|w| w[0] == w[1]))),
        "not" => match values {
            [v] => Some(boolean(!truthy(*v))),
            _ => None,
        },
        "and" => Some(boolean(values.iter().all(|v| truthy(*v)))),
        "or" => Some(boolean(values.iter().any(|v| truthy(*v)))),
        _ => {
            let numbers = values
                .iter()
                .map(|v| symbols.number(*v))
                .collect::<Option<Vec<f64>>>()?;
            let result = numeric(function, &numbers)?;
            Some(match result {
                Numeric::Value(n) => symbols.intern_number(n),
                Numeric::Bool(b) => boolean(b),
            })
        }
    }
}

enum Numeric {
    Value(f64),
    Bool(bool),
}

fn numeric(function: &str, args: &[f64]) -> Option<Numeric> {
    let first = *args.first()?;
    let rest = &args[1..];
    let ordered = |test: fn(f64, f64) -> bool| {
        Some(Numeric::Bool(args.windows(2).all(|w| test(w[0], w[1]))))
    };
    let value = match function {
        "+" => args.iter().sum(),
        "*" => args.iter().product(),
        "-" if rest.is_empty() => -first,
        "-" => rest.iter().fold(first, |acc, x| acc - x),
        "/" if rest.is_empty() => 1.0 / first,
        "/" => rest.iter().fold(first, |acc, x| acc / x),
        "min" => args.iter().copied().fold(f64::INFINITY, f64::min),
        "max" => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        "abs" => first.abs(),
        "round" => first.round(),
        "floor" => first.floor(),
        "ceiling" => first.ceil(),
        "sqrt" => first.sqrt(),
        "mod" => first.rem_euclid(*rest.first()?),
        "<" => return ordered(|a, b| a < b),
        ">" => return ordered(|a, b| a > b),
        "<=" => return ordered(|a, b| a <= b),
        ">=" => return ordered(|a, b| a >= b),
        _ => return None,
    };
    value.is_finite().then_some(Numeric::Value(value))
}

/// Render a list of resolved terms for `!output!`.
#[must_use]
pub fn render_output(terms: &[Term], bindings: &Bindings, symbols: &Interner) -> String {
    terms
        .iter()
        .map(|t| {
            let symbol = t.resolve(bindings).unwrap_or_else(|| t.symbol());
            match symbols.number(symbol) {
                Some(n) => format_number(n),
                None => symbols.name(symbol).to_owned(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
