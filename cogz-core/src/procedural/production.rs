//! Productions: condition/action rules over buffers.
//!
//! A clause is one of five closed variants. The same [`Clause::Match`]
//! variant means "test the buffer" on the condition side and "modify the
//! buffer's chunk" on the action side.
//!
//! | Prefix | Variant   | Condition side        | Action side                  |
//! |--------|-----------|-----------------------|------------------------------|
//! | `=`    | `Match`   | test slots, bind vars | modify slots                 |
//! | `?`    | `Query`   | test status slots     |:                            |
//! | `+`    | `Request` |:                     | issue a request to the module|
//! | `-`    | `Clear`   |:                     | store and clear the buffer   |
//! | `!`    | `Special` | bind / eval test      | bind / eval / output / stop  |

use std::collections::BTreeSet;

use crate::chunk::SlotOp;
use crate::error::{CogzError, Result};
use crate::procedural::matching::Bindings;
use crate::procedural::special::Expr;
use crate::symbol::{Interner, Symbol};

/// A slot value in a pattern: constant or variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    /// A literal symbol.
    Const(Symbol),
    /// A variable (`=name`).
    Var(Symbol),
}

impl Term {
    /// Read a token: a leading `=` makes a variable.
    pub fn parse(token: &str, symbols: &mut Interner) -> Self {
        let symbol = symbols.intern(token);
        if token.starts_with('=') && token.len() > 1 {
            Self::Var(symbol)
        } else {
            Self::Const(symbol)
        }
    }

    /// The underlying symbol (variable name for variables).
    #[must_use]
    pub fn symbol(self) -> Symbol {
        match self {
            Self::Const(s) | Self::Var(s) => s,
        }
    }

    /// Constant value, or the variable's binding.
    #[must_use]
    pub fn resolve(self, bindings: &Bindings) -> Option<Symbol> {
        match self {
            Self::Const(s) => Some(s),
            Self::Var(v) => bindings.get(&v).copied(),
        }
    }

    /// Variable name, if this is a variable.
    #[must_use]
    pub fn var(self) -> Option<Symbol> {
        match self {
            Self::Var(v) => Some(v),
            Self::Const(_) => None,
        }
    }

    /// Apply a substitution. Mapped variables become the mapped value: a
    /// variable when `is_var` says the value names one, else a constant.
    #[must_use]
    pub fn substitute(self, map: &Bindings, is_var: &dyn Fn(Symbol) -> bool) -> Self {
        match self {
            Self::Var(v) => match map.get(&v) {
                Some(&value) if is_var(value) => Self::Var(value),
                Some(&value) => Self::Const(value),
                None => self,
            },
            Self::Const(_) => self,
        }
    }
}

/// One slot test or assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotSpec {
    /// Slot name.
    pub slot: Symbol,
    /// Comparison (always `Eq` in modifications).
    pub op: SlotOp,
    /// Value.
    pub value: Term,
}

/// A buffer plus slot specs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BufferPattern {
    /// Target buffer.
    pub buffer: Symbol,
    /// Slot specs, in declaration order.
    pub slots: Vec<SlotSpec>,
}

impl BufferPattern {
    /// Parse a slot list such as `isa count state =s - value nil > n 3`.
    ///
    /// # Errors
    /// Returns `CogzError::Expression` for a dangling slot or modifier.
    pub fn parse(buffer: Symbol, text: &str, symbols: &mut Interner) -> Result<Self> {
        let mut slots = Vec::new();
        let mut tokens = text.split_whitespace();
        while let Some(token) = tokens.next() {
            let (op, slot_token) = match token {
                "-" => (SlotOp::Neq, tokens.next()),
                "<" => (SlotOp::Lt, tokens.next()),
                ">" => (SlotOp::Gt, tokens.next()),
                "<=" => (SlotOp::Le, tokens.next()),
                ">=" => (SlotOp::Ge, tokens.next()),
                _ => (SlotOp::Eq, Some(token)),
            };
            let slot_token = slot_token
                .ok_or_else(|| CogzError::Expression(format!("modifier `{token}` without a slot")))?;
            let value = tokens.next().ok_or_else(|| {
                CogzError::Expression(format!("slot `{slot_token}` without a value"))
            })?;
            slots.push(SlotSpec {
                slot: symbols.intern(slot_token),
                op,
                value: Term::parse(value, symbols),
            });
        }
        Ok(Self { buffer, slots })
    }

    /// The value of the first equality spec on `slot`.
    #[must_use]
    pub fn value_of(&self, slot: Symbol) -> Option<Term> {
        self.slots
            .iter()
            .find(|s| s.slot == slot && s.op == SlotOp::Eq)
            .map(|s| s.value)
    }

    /// Apply a substitution to every value.
    #[must_use]
    pub fn substitute(&self, map: &Bindings, symbols: &Interner) -> Self {
        Self {
            buffer: self.buffer,
            slots: self
                .slots
                .iter()
                .map(|s| SlotSpec {
                    value: s.value.substitute(map, &|v| symbols.is_variable(v)),
                    ..*s
                })
                .collect(),
        }
    }
}

/// An embedded action or test.
#[derive(Debug, Clone, PartialEq)]
pub enum Special {
    /// `!bind! =var (expr)`.
    Bind {
        /// Variable to bind.
        var: Symbol,
        /// Expression producing the value.
        expr: Expr,
    },
    /// `!eval! (expr)`: a test on the condition side, a side effect on the
    /// action side.
    Eval(Expr),
    /// `!output! ...`: write a line to the trace.
    Output(Vec<Term>),
    /// `!stop!`: halt the run.
    Stop,
}

/// One condition or action.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// `=buffer>`.
    Match(BufferPattern),
    /// `?buffer>`.
    Query(BufferPattern),
    /// `+buffer>`; `copy` is set for `+buffer> =chunk`.
    Request {
        /// Slots of the requested chunk.
        pattern: BufferPattern,
        /// Chunk to copy instead of building one from slots.
        copy: Option<Term>,
    },
    /// `-buffer>`.
    Clear(Symbol),
    /// `!...!`.
    Special(Special),
}

impl Clause {
    /// Parse a clause head (`=goal>`, `?retrieval>`, `+imaginal>`,
    /// `-visual>`, `!bind!`, `!eval!`, `!output!`, `!stop!`) and body.
    ///
    /// # Errors
    /// Returns `CogzError::Expression` for an unknown head or a malformed body.
    pub fn parse(head: &str, body: &str, symbols: &mut Interner) -> Result<Self> {
        if let Some(kind) = head.strip_prefix('!').and_then(|h| h.strip_suffix('!')) {
            return parse_special(kind, body, symbols).map(Clause::Special);
        }
        let mut chars = head.chars();
        let prefix = chars.next();
        let buffer_name = chars
            .as_str()
            .strip_suffix('>')
            .filter(|b| !b.is_empty())
            .ok_or_else(|| CogzError::Expression(format!("malformed clause head `{head}`")))?;
        let buffer = symbols.intern(buffer_name);
        match prefix {
            Some('=') => Ok(Clause::Match(BufferPattern::parse(buffer, body, symbols)?)),
            Some('?') => Ok(Clause::Query(BufferPattern::parse(buffer, body, symbols)?)),
            Some('+') => {
                let mut tokens = body.split_whitespace();
                match (tokens.next(), tokens.next()) {
                    (Some(only), None) if only.starts_with('=') => Ok(Clause::Request {
                        pattern: BufferPattern {
                            buffer,
                            slots: Vec::new(),
                        },
                        copy: Some(Term::parse(only, symbols)),
                    }),
                    _ => Ok(Clause::Request {
                        pattern: BufferPattern::parse(buffer, body, symbols)?,
                        copy: None,
                    }),
                }
            }
            Some('-') => Ok(Clause::Clear(buffer)),
            _ => Err(CogzError::Expression(format!("unknown clause prefix in `{head}`"))),
        }
    }

    /// Buffer this clause addresses, if any.
    #[must_use]
    pub fn buffer(&self) -> Option<Symbol> {
        match self {
            Self::Match(p) | Self::Query(p) | Self::Request { pattern: p, .. } => Some(p.buffer),
            Self::Clear(b) => Some(*b),
            Self::Special(_) => None,
        }
    }

    /// Every variable mentioned.
    #[must_use]
    pub fn variables(&self) -> BTreeSet<Symbol> {
        let mut out = BTreeSet::new();
        match self {
            Self::Match(p) | Self::Query(p) => out.extend(p.slots.iter().filter_map(|s| s.value.var())),
            Self::Request { pattern, copy } => {
                out.extend(pattern.slots.iter().filter_map(|s| s.value.var()));
                out.extend(copy.and_then(Term::var));
            }
            Self::Clear(_) => {}
            Self::Special(special) => match special {
                Special::Bind { var, expr } => {
                    out.insert(*var);
                    out.extend(expr.variables());
                }
                Special::Eval(expr) => out.extend(expr.variables()),
                Special::Output(terms) => out.extend(terms.iter().filter_map(|t| t.var())),
                Special::Stop => {}
            },
        }
        out
    }

    /// Apply a substitution to every term.
    #[must_use]
    pub fn substitute(&self, map: &Bindings, symbols: &Interner) -> Self {
        let is_var = |v: Symbol| symbols.is_variable(v);
        let term = |t: Term| t.substitute(map, &is_var);
        match self {
            Self::Match(p) => Self::Match(p.substitute(map, symbols)),
            Self::Query(p) => Self::Query(p.substitute(map, symbols)),
            Self::Request { pattern, copy } => Self::Request {
                pattern: pattern.substitute(map, symbols),
                copy: copy.map(term),
            },
            Self::Clear(b) => Self::Clear(*b),
            Self::Special(special) => Self::Special(match special {
                Special::Bind { var, expr } => Special::Bind {
                    var: term(Term::Var(*var)).symbol(),
                    expr: expr.substitute(map, &is_var),
                },
                Special::Eval(expr) => Special::Eval(expr.substitute(map, &is_var)),
                Special::Output(terms) => Special::Output(terms.iter().map(|t| term(*t)).collect()),
                Special::Stop => Special::Stop,
            }),
        }
    }
}

fn parse_special(kind: &str, body: &str, symbols: &mut Interner) -> Result<Special> {
    match kind {
        "bind" => {
            let body = body.trim_start();
            let split = body.find(char::is_whitespace).ok_or_else(|| {
                CogzError::Expression("!bind! needs a variable and an expression".to_owned())
            })?;
            let (var, expr) = body.split_at(split);
            match Term::parse(var, symbols) {
                Term::Var(var) => Ok(Special::Bind {
                    var,
                    expr: Expr::parse(expr, symbols)?,
                }),
                Term::Const(_) => Err(CogzError::Expression(format!(
                    "!bind! target `{var}` is not a variable"
                ))),
            }
        }
        "eval" => Ok(Special::Eval(Expr::parse(body, symbols)?)),
        "output" => Ok(Special::Output(
            body.split_whitespace()
                .map(|t| Term::parse(t.trim_matches('"'), symbols))
                .collect(),
        )),
        "stop" => Ok(Special::Stop),
        other => Err(CogzError::Expression(format!("unknown special `!{other}!`"))),
    }
}

/// A production rule.
#[derive(Debug, Clone)]
pub struct Production {
    /// Unique name.
    pub name: Symbol,
    /// Conditions, in declaration order.
    pub conditions: Vec<Clause>,
    /// Actions, in declaration order.
    pub actions: Vec<Clause>,
    /// Current utility.
    pub utility: f64,
    /// Utility at definition time.
    pub initial_utility: f64,
    /// Probability of taking part in conflict resolution at all.
    pub firing_probability: f64,
    /// Reward delivered when this production fires.
    pub reward: Option<f64>,
    /// Halt the run just before this production fires.
    pub breakpoint: bool,
    /// Times fired.
    pub fired_count: u64,
    /// Names of the two productions this one was compiled from.
    pub parents: Option<(Symbol, Symbol)>,
    /// `(buffer, =buffer)` variable pairs, bound to chunk names when matching.
    pub buffer_vars: Vec<(Symbol, Symbol)>,
}

impl Production {
    /// Create an empty production.
    #[must_use]
    pub fn new(name: Symbol) -> Self {
        Self {
            name,
            conditions: Vec::new(),
            actions: Vec::new(),
            utility: 0.0,
            initial_utility: 0.0,
            firing_probability: 1.0,
            reward: None,
            breakpoint: false,
            fired_count: 0,
            parents: None,
            buffer_vars: Vec::new(),
        }
    }

    /// Whether this production was synthesized by compilation.
    #[must_use]
    pub fn is_compiled(&self) -> bool {
        self.parents.is_some()
    }

    /// Intern the `=buffer` variable of every matched buffer.
    pub fn bind_buffer_vars(&mut self, symbols: &mut Interner) {
        self.buffer_vars = self
            .conditions
            .iter()
            .filter_map(|c| match c {
                Clause::Match(p) => Some(p.buffer),
                _ => None,
            })
            .map(|buffer| {
                let var = symbols.intern(&format!("={}", symbols.name(buffer)));
                (buffer, var)
            })
            .collect();
    }

    /// Buffers tested by `=` conditions.
    pub fn matched_buffers(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.conditions.iter().filter_map(|c| match c {
            Clause::Match(p) => Some(p.buffer),
            _ => None,
        })
    }

    /// Whether any action addresses `buffer`.
    #[must_use]
    pub fn targets(&self, buffer: Symbol) -> bool {
        self.actions.iter().any(|a| a.buffer() == Some(buffer))
    }

    /// Whether any clause is a special.
    #[must_use]
    pub fn has_special(&self) -> bool {
        self.conditions
            .iter()
            .chain(&self.actions)
            .any(|c| matches!(c, Clause::Special(_)))
    }

    /// Whether any request copies a chunk.
    #[must_use]
    pub fn has_copy_request(&self) -> bool {
        self.actions
            .iter()
            .any(|c| matches!(c, Clause::Request { copy: Some(_), .. }))
    }

    /// Variables bound by the conditions: equality tests, buffer variables
    /// and `!bind!` targets.
    #[must_use]
    pub fn bound_variables(&self) -> BTreeSet<Symbol> {
        let mut bound: BTreeSet<Symbol> = self.buffer_vars.iter().map(|&(_, v)| v).collect();
        for clause in &self.conditions {
            match clause {
                Clause::Match(p) | Clause::Query(p) => bound.extend(
                    p.slots
                        .iter()
                        .filter(|s| s.op == SlotOp::Eq)
                        .filter_map(|s| s.value.var()),
                ),
                Clause::Special(Special::Bind { var, .. }) => {
                    bound.insert(*var);
                }
                _ => {}
            }
        }
        bound
    }

    /// Render in the usual `(p name ... ==> ...)` layout.
    #[must_use]
    pub fn render(&self, symbols: &Interner) -> String {
        let mut out = format!("(p {}\n", symbols.name(self.name));
        for clause in &self.conditions {
            out.push_str(&render_clause(clause, symbols));
        }
        out.push_str("==>\n");
        for clause in &self.actions {
            out.push_str(&render_clause(clause, symbols));
        }
        out.push(')');
        out
    }
}

fn render_clause(clause: &Clause, symbols: &Interner) -> String {
    let slots = |p: &BufferPattern| {
        p.slots
            .iter()
            .map(|s| {
                format!(
                    "    {}{} {}\n",
                    s.op.prefix(),
                    symbols.name(s.slot),
                    symbols.name(s.value.symbol())
                )
            })
            .collect::<String>()
    };
    let buffer = |b: Symbol| symbols.name(b).to_owned();
    match clause {
        Clause::Match(p) => format!("  ={}>\n{}", buffer(p.buffer), slots(p)),
        Clause::Query(p) => format!("  ?{}>\n{}", buffer(p.buffer), slots(p)),
        Clause::Request { pattern, copy: Some(t) } => {
            format!("  +{}> {}\n", buffer(pattern.buffer), symbols.name(t.symbol()))
        }
        Clause::Request { pattern, copy: None } => {
            format!("  +{}>\n{}", buffer(pattern.buffer), slots(pattern))
        }
        Clause::Clear(b) => format!("  -{}>\n", buffer(*b)),
        Clause::Special(Special::Bind { var, expr }) => {
            format!("  !bind! {} {}\n", symbols.name(*var), expr.render(symbols))
        }
        Clause::Special(Special::Eval(expr)) => format!("  !eval! {}\n", expr.render(symbols)),
        Clause::Special(Special::Output(terms)) => {
            let text: Vec<&str> = terms.iter().map(|t| symbols.name(t.symbol())).collect();
            format!("  !output! {}\n", text.join(" "))
        }
        Clause::Special(Special::Stop) => "  !stop!\n".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::sym;

    #[test]
    fn parses_slot_modifiers() {
        let mut symbols = Interner::new();
        let goal = sym::GOAL;
        let pattern =
            BufferPattern::parse(goal, "isa count - state done > n 3 value =v", &mut symbols)
                .expect("parse");
        let ops: Vec<SlotOp> = pattern.slots.iter().map(|s| s.op).collect();
        assert_eq!(ops, vec![SlotOp::Eq, SlotOp::Neq, SlotOp::Gt, SlotOp::Eq]);
        assert_eq!(pattern.slots[3].value, Term::Var(symbols.intern("=v")));
        assert!(BufferPattern::parse(goal, "state", &mut symbols).is_err());
    }

    #[test]
    fn parses_clause_heads() {
        let mut symbols = Interner::new();
        assert!(matches!(
            Clause::parse("=goal>", "state s1", &mut symbols),
            Ok(Clause::Match(_))
        ));
        assert!(matches!(
            Clause::parse("+goal>", "=g", &mut symbols),
            Ok(Clause::Request { copy: Some(Term::Var(_)), .. })
        ));
        assert!(matches!(
            Clause::parse("-retrieval>", "", &mut symbols),
            Ok(Clause::Clear(b)) if b == sym::RETRIEVAL
        ));
        assert!(matches!(
            Clause::parse("!bind!", "=x (+ =y 1)", &mut symbols),
            Ok(Clause::Special(Special::Bind { .. }))
        ));
        assert!(Clause::parse("goal", "", &mut symbols).is_err());
        assert!(Clause::parse("!bind!", "x (+ 1 2)", &mut symbols).is_err());
    }

    #[test]
    fn bound_variables_include_buffer_variables() {
        let mut symbols = Interner::new();
        let mut production = Production::new(symbols.intern("p"));
        production
            .conditions
            .push(Clause::parse("=goal>", "count =c - value =v", &mut symbols).expect("clause"));
        production.bind_buffer_vars(&mut symbols);
        let bound = production.bound_variables();
        assert!(bound.contains(&symbols.intern("=c")));
        assert!(bound.contains(&symbols.intern("=goal")));
        assert!(!bound.contains(&symbols.intern("=v")));
    }
}
