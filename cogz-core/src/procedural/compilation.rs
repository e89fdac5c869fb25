//! Production compilation.
//!
//! Two productions that fired back to back on the same goal thread are
//! collapsed into one (Taatgen & Anderson, 2002). The policy depends on the
//! buffer category:
//!
//! - **goal-style** (`goal`, `imaginal`): the first rule's post-state of the
//!   buffer satisfies some of the second rule's tests; those tests are
//!   dropped and the second rule's variables are unified with the first
//!   rule's terms. Modifications are merged, the second rule winning per slot.
//! - **retrieval**: when the first rule requests a retrieval that the second
//!   rule harvests, every variable in both rules is replaced by its
//!   instantiation value, then the request and the harvest are dropped. The
//!   result is specific to the retrieved fact.
//! - **perceptual / motor** (everything else): a request by the first rule
//!   vetoes compilation when the second rule requests, harvests, or queries
//!   that buffer beyond `state busy`.
//!
//! Rules with specials (`!bind!`, `!eval!`, ...) or copy requests never
//! compile.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::chunk::SlotOp;
use crate::procedural::matching::{Bindings, Instantiation};
use crate::procedural::production::{BufferPattern, Clause, Production, SlotSpec, Term};
use crate::symbol::{Interner, Symbol, sym};

/// Why two firings did not compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Veto {
    /// A source rule contains a special clause.
    Special,
    /// A source rule copies a chunk into a buffer.
    CopyRequest,
    /// Buffer-specific conflict.
    Buffer {
        /// Buffer concerned.
        buffer: Symbol,
        /// What went wrong.
        reason: &'static str,
    },
    /// The two rules disagree on a constant.
    Conflict,
    /// The combined rule would use a variable it never binds.
    Unbound,
}

impl fmt::Display for Veto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Special => f.write_str("special clause"),
            Self::CopyRequest => f.write_str("copy request"),
            Self::Buffer { reason, .. } => f.write_str(reason),
            Self::Conflict => f.write_str("conflicting constants"),
            Self::Unbound => f.write_str("unbound variable"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    GoalStyle,
    Retrieval,
    Perceptual,
}

fn category(buffer: Symbol) -> Category {
    if buffer == sym::GOAL || buffer == sym::IMAGINAL {
        Category::GoalStyle
    } else if buffer == sym::RETRIEVAL {
        Category::Retrieval
    } else {
        Category::Perceptual
    }
}

fn veto(buffer: Symbol, reason: &'static str) -> Veto {
    Veto::Buffer { buffer, reason }
}

/// Everything compilation needs about one source firing.
#[derive(Debug, Clone, Copy)]
pub struct Source<'a> {
    /// The production that fired.
    pub production: &'a Production,
    /// Its instantiation.
    pub instantiation: &'a Instantiation,
}

/// Combine two adjacent firings into one production.
///
/// The result has no name or utility yet; the caller names it and decides
/// between insertion and reinforcement.
///
/// # Errors
/// Returns the [`Veto`] that blocked compilation.
pub fn compile(
    first: Source<'_>,
    second: Source<'_>,
    symbols: &mut Interner,
) -> Result<Production, Veto> {
    let (p1, p2) = (first.production, second.production);
    if p1.has_special() || p2.has_special() {
        return Err(Veto::Special);
    }
    if p1.has_copy_request() || p2.has_copy_request() {
        return Err(Veto::CopyRequest);
    }

    // Keep the second rule's variables apart from the first rule's.
    let (p2, b2) = rename_apart(p1, p2, &second.instantiation.bindings, symbols);

    let retrieval_mode = requests(p1, sym::RETRIEVAL) && matches(&p2, sym::RETRIEVAL);
    if requests(p1, sym::RETRIEVAL) {
        for pattern in queries(&p2, sym::RETRIEVAL) {
            if pattern.slots.iter().any(|s| s.value == Term::Const(sym::ERROR)) {
                return Err(veto(sym::RETRIEVAL, "second rule tests a retrieval failure"));
            }
        }
    }

    let (c1, a1, c2, a2) = if retrieval_mode {
        let constant = |_: Symbol| false;
        let sub = |clauses: &[Clause], b: &Bindings| -> Vec<Clause> {
            clauses.iter().map(|c| substitute(c, b, &constant)).collect()
        };
        let b1 = instantiated(p1, &first.instantiation.bindings);
        let b2 = instantiated(&p2, &b2);
        (sub(&p1.conditions, &b1), sub(&p1.actions, &b1), sub(&p2.conditions, &b2), sub(&p2.actions, &b2))
    } else {
        (p1.conditions.clone(), p1.actions.clone(), p2.conditions.clone(), p2.actions.clone())
    };

    let mut blend = Blend::new(retrieval_mode);
    blend.unify_goal_style(&c1, &a1, &c2, symbols)?;
    blend.check_perceptual(&c1, &a1, &c2, &a2)?;
    blend.check_retrieval(&c1, &a1, &c2, &a2)?;

    let is_var = |v: Symbol| symbols.is_variable(v);
    let map = blend.bindings();
    let conditions = blend.conditions(&c1, &c2, &a1, &map, &is_var);
    let actions = blend.actions(p1, &p2, &a1, &a2, &map, &is_var);

    let mut compiled = Production::new(p1.name);
    compiled.conditions = conditions;
    compiled.actions = actions;
    compiled.bind_buffer_vars(symbols);
    check_bound(&compiled)?;
    Ok(compiled)
}

// ---------------------------------------------------------------------------
// Clause queries
// ---------------------------------------------------------------------------

fn requests(p: &Production, buffer: Symbol) -> bool {
    p.actions
        .iter()
        .any(|a| matches!(a, Clause::Request { pattern, .. } if pattern.buffer == buffer))
}

fn matches(p: &Production, buffer: Symbol) -> bool {
    p.conditions
        .iter()
        .any(|c| matches!(c, Clause::Match(pattern) if pattern.buffer == buffer))
}

fn queries(p: &Production, buffer: Symbol) -> impl Iterator<Item = &BufferPattern> {
    p.conditions.iter().filter_map(move |c| match c {
        Clause::Query(pattern) if pattern.buffer == buffer => Some(pattern),
        _ => None,
    })
}

fn patterns<'c>(
    clauses: &'c [Clause],
    buffer: Symbol,
    pick: fn(&Clause) -> Option<&BufferPattern>,
) -> impl Iterator<Item = &'c BufferPattern> {
    clauses.iter().filter_map(pick).filter(move |p| p.buffer == buffer)
}

fn as_match(c: &Clause) -> Option<&BufferPattern> {
    match c {
        Clause::Match(p) => Some(p),
        _ => None,
    }
}

fn as_query(c: &Clause) -> Option<&BufferPattern> {
    match c {
        Clause::Query(p) => Some(p),
        _ => None,
    }
}

fn as_request(c: &Clause) -> Option<&BufferPattern> {
    match c {
        Clause::Request { pattern, .. } => Some(pattern),
        _ => None,
    }
}

fn substitute(clause: &Clause, map: &Bindings, is_var: &dyn Fn(Symbol) -> bool) -> Clause {
    let pattern = |p: &BufferPattern| BufferPattern {
        buffer: p.buffer,
        slots: p
            .slots
            .iter()
            .map(|s| SlotSpec {
                value: s.value.substitute(map, is_var),
                ..*s
            })
            .collect(),
    };
    match clause {
        Clause::Match(p) => Clause::Match(pattern(p)),
        Clause::Query(p) => Clause::Query(pattern(p)),
        Clause::Request { pattern: p, copy } => Clause::Request {
            pattern: pattern(p),
            copy: copy.map(|t| t.substitute(map, is_var)),
        },
        other => other.clone(),
    }
}

/// Rename the second rule's variables that also occur in the first rule.
///
/// The buffer variable of a goal-style buffer the first rule harvests
/// without replacing names the same chunk in both rules and is kept.
fn rename_apart(
    p1: &Production,
    p2: &Production,
    bindings: &Bindings,
    symbols: &mut Interner,
) -> (Production, Bindings) {
    let used: BTreeSet<Symbol> = p1
        .conditions
        .iter()
        .chain(&p1.actions)
        .flat_map(Clause::variables)
        .chain(p1.buffer_vars.iter().map(|&(_, v)| v))
        .collect();
    let shared: BTreeSet<Symbol> = p2
        .buffer_vars
        .iter()
        .filter(|&&(b, _)| category(b) == Category::GoalStyle && matches(p1, b) && !requests(p1, b))
        .map(|&(_, v)| v)
        .collect();
    let mut renames = Bindings::new();
    for var in p2.conditions.iter().chain(&p2.actions).flat_map(Clause::variables) {
        if used.contains(&var) && !shared.contains(&var) && !renames.contains_key(&var) {
            let base = format!("{}-", symbols.name(var));
            renames.insert(var, symbols.fresh(&base));
        }
    }
    let always_var = |_: Symbol| true;
    let mut renamed = p2.clone();
    renamed.conditions = p2.conditions.iter().map(|c| substitute(c, &renames, &always_var)).collect();
    renamed.actions = p2.actions.iter().map(|c| substitute(c, &renames, &always_var)).collect();
    let bindings = bindings
        .iter()
        .map(|(k, v)| (renames.get(k).copied().unwrap_or(*k), *v))
        .collect();
    (renamed, bindings)
}

/// Instantiation bindings of the variables a rule mentions, minus the
/// buffer variables other than `=retrieval` (chunk names stay general).
fn instantiated(p: &Production, bindings: &Bindings) -> Bindings {
    let vars: BTreeSet<Symbol> = p
        .conditions
        .iter()
        .chain(&p.actions)
        .flat_map(Clause::variables)
        .collect();
    let general: BTreeSet<Symbol> = p
        .buffer_vars
        .iter()
        .filter(|&&(b, _)| b != sym::RETRIEVAL)
        .map(|&(_, v)| v)
        .collect();
    bindings
        .iter()
        .filter(|(k, _)| vars.contains(k) && !general.contains(k))
        .map(|(k, v)| (*k, *v))
        .collect()
}

fn check_bound(p: &Production) -> Result<(), Veto> {
    let bound = p.bound_variables();
    let tested = p.conditions.iter().flat_map(|c| match c {
        Clause::Match(pattern) | Clause::Query(pattern) => {
            pattern.slots.iter().filter_map(|s| s.value.var()).collect()
        }
        _ => Vec::new(),
    });
    let acted = p.actions.iter().flat_map(Clause::variables);
    if tested.chain(acted).all(|v| bound.contains(&v)) {
        Ok(())
    } else {
        Err(Veto::Unbound)
    }
}

// ---------------------------------------------------------------------------
// Blending
// ---------------------------------------------------------------------------

struct Blend {
    retrieval_mode: bool,
    /// Variable unification, applied to both rules.
    map: BTreeMap<Symbol, Term>,
    /// Second-rule tests on goal-style buffers that the first rule does not
    /// guarantee.
    extra: BTreeMap<Symbol, Vec<SlotSpec>>,
    /// Goal-style buffers whose chunk the first rule requested.
    requested: BTreeSet<Symbol>,
}

impl Blend {
    fn new(retrieval_mode: bool) -> Self {
        Self {
            retrieval_mode,
            map: BTreeMap::new(),
            extra: BTreeMap::new(),
            requested: BTreeSet::new(),
        }
    }

    fn resolve(&self, term: Term) -> Term {
        let mut current = term;
        // each step follows one map entry, so the walk is bounded by its size
        for _ in 0..=self.map.len() {
            match current {
                Term::Var(v) => match self.map.get(&v) {
                    Some(&next) => current = next,
                    None => return current,
                },
                Term::Const(_) => return current,
            }
        }
        current
    }

    /// Unify a second-rule term with a first-rule term.
    fn unify(&mut self, second: Term, first: Term) -> Result<(), Veto> {
        match (self.resolve(second), self.resolve(first)) {
            (Term::Var(a), Term::Var(b)) if a == b => Ok(()),
            (Term::Var(a), other) => {
                self.map.insert(a, other);
                Ok(())
            }
            (Term::Const(c), Term::Var(b)) => {
                self.map.insert(b, Term::Const(c));
                Ok(())
            }
            (Term::Const(c), Term::Const(d)) if c == d => Ok(()),
            (Term::Const(_), Term::Const(_)) => Err(Veto::Conflict),
        }
    }

    /// The unifier as a flat substitution.
    fn bindings(&self) -> Bindings {
        self.map
            .keys()
            .map(|&var| (var, self.resolve(Term::Var(var)).symbol()))
            .collect()
    }

    /// Post-state of a goal-style buffer after the first rule fires.
    fn post_state(c1: &[Clause], a1: &[Clause], buffer: Symbol) -> (BTreeMap<Symbol, Term>, bool) {
        let mut post = BTreeMap::new();
        if let Some(request) = patterns(a1, buffer, as_request).next() {
            for spec in request.slots.iter().filter(|s| s.op == SlotOp::Eq) {
                post.insert(spec.slot, spec.value);
            }
            return (post, true);
        }
        for pattern in patterns(c1, buffer, as_match).chain(patterns(a1, buffer, as_match)) {
            for spec in pattern.slots.iter().filter(|s| s.op == SlotOp::Eq) {
                post.insert(spec.slot, spec.value);
            }
        }
        (post, false)
    }

    fn unify_goal_style(
        &mut self,
        c1: &[Clause],
        a1: &[Clause],
        c2: &[Clause],
        symbols: &Interner,
    ) -> Result<(), Veto> {
        for buffer in [sym::GOAL, sym::IMAGINAL] {
            if buffer == sym::GOAL && patterns(a1, buffer, as_request).next().is_some() {
                return Err(veto(buffer, "first rule replaces the goal"));
            }
            let (post, requested) = Self::post_state(c1, a1, buffer);
            if requested {
                self.requested.insert(buffer);
            }
            let first_touches = requested || patterns(c1, buffer, as_match).next().is_some();

            let mut extra = Vec::new();
            for spec in patterns(c2, buffer, as_match).flat_map(|p| p.slots.iter()) {
                let guaranteed = if first_touches { post.get(&spec.slot).copied() } else { None };
                match (spec.op, guaranteed) {
                    (SlotOp::Eq, Some(first)) => {
                        let isa_refinement = spec.slot == sym::ISA
                            && matches!((self.resolve(spec.value), self.resolve(first)),
                                (Term::Const(a), Term::Const(b)) if a != b);
                        if isa_refinement {
                            if requested {
                                return Err(veto(buffer, "type test on a requested chunk"));
                            }
                            extra.push(*spec);
                        } else {
                            self.unify(spec.value, first)?;
                        }
                    }
                    (SlotOp::Eq, None) if requested => {
                        if spec.value != Term::Const(sym::NIL) {
                            return Err(veto(buffer, "test on a slot the request leaves empty"));
                        }
                    }
                    (_, None) if !requested => extra.push(*spec),
                    (op, guaranteed) => {
                        let stored = guaranteed.map_or(Term::Const(sym::NIL), |t| self.resolve(t));
                        match (self.resolve(spec.value), stored) {
                            (Term::Const(wanted), Term::Const(have)) if spec.slot != sym::ISA => {
                                if !op.test(have, wanted, symbols) {
                                    return Err(Veto::Conflict);
                                }
                            }
                            _ => return Err(veto(buffer, "inequality on a slot the first rule sets")),
                        }
                    }
                }
            }
            let second_harvests = patterns(c2, buffer, as_match).next().is_some();
            if !extra.is_empty() || (second_harvests && !first_touches) {
                self.extra.insert(buffer, extra);
            }
        }
        Ok(())
    }

    fn check_perceptual(
        &self,
        c1: &[Clause],
        a1: &[Clause],
        c2: &[Clause],
        a2: &[Clause],
    ) -> Result<(), Veto> {
        let buffers: BTreeSet<Symbol> = c1
            .iter()
            .chain(a1)
            .chain(c2)
            .chain(a2)
            .filter_map(Clause::buffer)
            .filter(|b| category(*b) == Category::Perceptual)
            .collect();
        for buffer in buffers {
            let first_requests = patterns(a1, buffer, as_request).next().is_some();
            let second_harvests = patterns(c2, buffer, as_match).next().is_some();
            if first_requests {
                if patterns(a2, buffer, as_request).next().is_some() {
                    return Err(veto(buffer, "both rules issue requests"));
                }
                if second_harvests {
                    return Err(veto(buffer, "second rule harvests the first rule's request"));
                }
                for query in patterns(c2, buffer, as_query) {
                    if !is_busy_query(query) {
                        return Err(veto(buffer, "second rule queries beyond busy"));
                    }
                }
            } else if second_harvests && patterns(c1, buffer, as_match).next().is_some() {
                return Err(veto(buffer, "both rules harvest"));
            }
        }
        Ok(())
    }

    fn check_retrieval(
        &self,
        c1: &[Clause],
        a1: &[Clause],
        c2: &[Clause],
        a2: &[Clause],
    ) -> Result<(), Veto> {
        let buffer = sym::RETRIEVAL;
        let first_requests = patterns(a1, buffer, as_request).next().is_some();
        if self.retrieval_mode {
            if patterns(a2, buffer, as_match).next().is_some() {
                return Err(veto(buffer, "second rule modifies the retrieved chunk"));
            }
            for query in patterns(c2, buffer, as_query) {
                if !is_success_query(query) {
                    return Err(veto(buffer, "second rule queries the retrieval state"));
                }
            }
        } else if first_requests {
            for query in patterns(c2, buffer, as_query) {
                if !is_busy_query(query) {
                    return Err(veto(buffer, "second rule queries a pending retrieval"));
                }
            }
        } else if patterns(c1, buffer, as_match).next().is_some()
            && patterns(c2, buffer, as_match).next().is_some()
        {
            return Err(veto(buffer, "both rules harvest"));
        }
        Ok(())
    }

    /// Conditions of the combined rule.
    fn conditions(
        &self,
        c1: &[Clause],
        c2: &[Clause],
        a1: &[Clause],
        map: &Bindings,
        is_var: &dyn Fn(Symbol) -> bool,
    ) -> Vec<Clause> {
        let mut out: Vec<Clause> = Vec::new();
        let mut placed: BTreeSet<Symbol> = BTreeSet::new();
        for clause in c1 {
            let mut clause = substitute(clause, map, is_var);
            if let Clause::Match(pattern) = &mut clause {
                if let Some(extra) = self.extra.get(&pattern.buffer) {
                    if placed.insert(pattern.buffer) {
                        pattern.slots.extend(extra.iter().map(|s| sub_spec(s, map, is_var)));
                    }
                }
            }
            push_unique(&mut out, clause);
        }
        for (buffer, extra) in &self.extra {
            if !placed.contains(buffer) {
                out.push(Clause::Match(BufferPattern {
                    buffer: *buffer,
                    slots: extra.iter().map(|s| sub_spec(s, map, is_var)).collect(),
                }));
            }
        }

        for clause in c2 {
            let Some(buffer) = clause.buffer() else {
                continue;
            };
            let keep = match (category(buffer), clause) {
                (Category::GoalStyle, Clause::Match(_)) => false,
                (Category::GoalStyle, Clause::Query(_)) => !self.requested.contains(&buffer),
                (Category::Retrieval, _) if self.retrieval_mode => false,
                (Category::Retrieval | Category::Perceptual, Clause::Query(q))
                    if patterns(a1, buffer, as_request).next().is_some() =>
                {
                    !is_busy_query(q)
                }
                _ => true,
            };
            if keep {
                push_unique(&mut out, substitute(clause, map, is_var));
            }
        }
        out
    }

    /// Actions of the combined rule.
    fn actions(
        &self,
        p1: &Production,
        p2: &Production,
        a1: &[Clause],
        a2: &[Clause],
        map: &Bindings,
        is_var: &dyn Fn(Symbol) -> bool,
    ) -> Vec<Clause> {
        let mut out: Vec<Clause> = Vec::new();
        let mut merged: HashMap<Symbol, usize> = HashMap::new();

        // Buffers the first rule harvested but did not touch were cleared
        // before the second rule acted on them.
        for buffer in p1.matched_buffers() {
            let cleared_by_first = !p1.targets(buffer);
            let second_acts = p2.targets(buffer);
            if cleared_by_first && second_acts && !(self.retrieval_mode && buffer == sym::RETRIEVAL) {
                push_unique(&mut out, Clause::Clear(buffer));
            }
        }

        for clause in a1 {
            let clause = substitute(clause, map, is_var);
            match &clause {
                Clause::Request { pattern, .. }
                    if self.retrieval_mode && pattern.buffer == sym::RETRIEVAL => {}
                Clause::Match(pattern) if self.retrieval_mode && pattern.buffer == sym::RETRIEVAL => {}
                Clause::Match(pattern) if category(pattern.buffer) == Category::GoalStyle => {
                    merged.insert(pattern.buffer, out.len());
                    out.push(clause);
                }
                Clause::Request { pattern, .. } if self.requested.contains(&pattern.buffer) => {
                    merged.insert(pattern.buffer, out.len());
                    out.push(clause);
                }
                _ => push_unique(&mut out, clause),
            }
        }

        for clause in a2 {
            let clause = substitute(clause, map, is_var);
            match clause {
                Clause::Match(pattern) if category(pattern.buffer) == Category::GoalStyle => {
                    match merged.get(&pattern.buffer) {
                        Some(&i) => merge_into(&mut out[i], &pattern),
                        None => {
                            merged.insert(pattern.buffer, out.len());
                            out.push(Clause::Match(pattern));
                        }
                    }
                }
                Clause::Clear(buffer) if self.retrieval_mode && buffer == sym::RETRIEVAL => {}
                other => push_unique(&mut out, other),
            }
        }

        // Buffers the second rule harvested without acting on were cleared
        // by it; the combined rule must clear them too.
        for buffer in p2.matched_buffers() {
            if self.retrieval_mode && buffer == sym::RETRIEVAL {
                continue;
            }
            if !p2.targets(buffer) {
                let touched = out.iter().any(|c| c.buffer() == Some(buffer));
                if touched {
                    push_unique(&mut out, Clause::Clear(buffer));
                }
            }
        }
        out
    }
}

fn sub_spec(spec: &SlotSpec, map: &Bindings, is_var: &dyn Fn(Symbol) -> bool) -> SlotSpec {
    SlotSpec {
        value: spec.value.substitute(map, is_var),
        ..*spec
    }
}

fn merge_into(target: &mut Clause, update: &BufferPattern) {
    let slots = match target {
        Clause::Match(p) | Clause::Request { pattern: p, .. } => &mut p.slots,
        _ => return,
    };
    for spec in &update.slots {
        match slots.iter_mut().find(|s| s.slot == spec.slot) {
            Some(existing) => *existing = *spec,
            None => slots.push(*spec),
        }
    }
}

fn push_unique(out: &mut Vec<Clause>, clause: Clause) {
    if !out.contains(&clause) {
        out.push(clause);
    }
}

fn is_busy_query(query: &BufferPattern) -> bool {
    query
        .slots
        .iter()
        .all(|s| s.slot == sym::STATE && s.op == SlotOp::Eq && s.value == Term::Const(sym::BUSY))
}

fn is_success_query(query: &BufferPattern) -> bool {
    query.slots.iter().all(|s| {
        s.op == SlotOp::Eq
            && ((s.slot == sym::STATE && s.value == Term::Const(sym::FREE))
                || (s.slot == sym::BUFFER && s.value == Term::Const(sym::FULL)))
    })
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Canonical text of a production, with variables numbered by first
/// appearance and slot specs sorted, for duplicate detection.
#[must_use]
pub fn canonical_form(p: &Production, symbols: &Interner) -> String {
    let mut numbering: HashMap<Symbol, usize> = HashMap::new();
    let mut term = |t: Term| -> String {
        match t {
            Term::Const(c) => symbols.name(c).to_owned(),
            Term::Var(v) => {
                let next = numbering.len();
                format!("=v{}", numbering.entry(v).or_insert(next))
            }
        }
    };
    let mut render = |clause: &Clause| -> String {
        let mut pattern = |prefix: char, pattern: &BufferPattern| {
            let mut specs: Vec<&SlotSpec> = pattern.slots.iter().collect();
            specs.sort_by_key(|s| (symbols.name(s.slot), s.op));
            let specs: Vec<String> = specs
                .into_iter()
                .map(|s| format!("{}{} {}", s.op.prefix(), symbols.name(s.slot), term(s.value)))
                .collect();
            format!("{prefix}{}> {}", symbols.name(pattern.buffer), specs.join(" "))
        };
        match clause {
            Clause::Match(p) => pattern('=', p),
            Clause::Query(p) => pattern('?', p),
            Clause::Request { pattern: p, .. } => pattern('+', p),
            Clause::Clear(b) => format!("-{}>", symbols.name(*b)),
            Clause::Special(_) => "!special!".to_owned(),
        }
    };
    let sort_key = |c: &&Clause| {
        let kind = match c {
            Clause::Match(_) => 0,
            Clause::Query(_) => 1,
            _ => 2,
        };
        (kind, c.buffer().map(|b| symbols.name(b)))
    };
    let mut conditions: Vec<&Clause> = p.conditions.iter().collect();
    conditions.sort_by_key(sort_key);
    let conditions: Vec<String> = conditions.into_iter().map(&mut render).collect();
    let actions: Vec<String> = p.actions.iter().map(&mut render).collect();
    format!("{} ==> {}", conditions.join(" | "), actions.join(" | "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(symbols: &mut Interner, name: &str, lhs: &[(&str, &str)], rhs: &[(&str, &str)]) -> Production {
        let mut p = Production::new(symbols.intern(name));
        for (head, body) in lhs {
            p.conditions.push(Clause::parse(head, body, symbols).expect("condition"));
        }
        for (head, body) in rhs {
            p.actions.push(Clause::parse(head, body, symbols).expect("action"));
        }
        p.bind_buffer_vars(symbols);
        p
    }

    fn inst(symbols: &mut Interner, pairs: &[(&str, &str)]) -> Instantiation {
        Instantiation {
            production: 0,
            bindings: pairs
                .iter()
                .map(|(k, v)| (symbols.intern(k), symbols.intern(v)))
                .collect(),
            utility: 0.0,
            time: 0.0,
            thread: None,
            fuzzy: false,
        }
    }

    fn spec(p: &BufferPattern, slot: Symbol) -> Option<Term> {
        p.value_of(slot)
    }

    #[test]
    fn goal_chain_collapses_to_one_step() {
        let mut symbols = Interner::new();
        let p1 = rule(&mut symbols, "a", &[("=goal>", "state s1")], &[("=goal>", "state s2")]);
        let p2 = rule(&mut symbols, "b", &[("=goal>", "state s2")], &[("=goal>", "state s3")]);
        let i1 = inst(&mut symbols, &[("=goal", "g")]);
        let i2 = inst(&mut symbols, &[("=goal", "g")]);
        let compiled = compile(
            Source { production: &p1, instantiation: &i1 },
            Source { production: &p2, instantiation: &i2 },
            &mut symbols,
        )
        .expect("compiles");

        let state = symbols.intern("state");
        assert_eq!(compiled.conditions.len(), 1);
        let Clause::Match(cond) = &compiled.conditions[0] else { panic!("match condition") };
        assert_eq!(spec(cond, state), Some(Term::Const(symbols.intern("s1"))));
        assert_eq!(compiled.actions.len(), 1);
        let Clause::Match(action) = &compiled.actions[0] else { panic!("modification") };
        assert_eq!(spec(action, state), Some(Term::Const(symbols.intern("s3"))));
    }

    #[test]
    fn variables_unify_through_the_goal() {
        let mut symbols = Interner::new();
        let p1 = rule(&mut symbols, "a", &[("=goal>", "state s1 x =a")], &[("=goal>", "state s2 y =a")]);
        let p2 = rule(&mut symbols, "b", &[("=goal>", "state s2 y =b")], &[("=goal>", "state s3 z =b")]);
        let i1 = inst(&mut symbols, &[("=goal", "g"), ("=a", "7")]);
        let i2 = inst(&mut symbols, &[("=goal", "g"), ("=b", "7")]);
        let compiled = compile(
            Source { production: &p1, instantiation: &i1 },
            Source { production: &p2, instantiation: &i2 },
            &mut symbols,
        )
        .expect("compiles");
        let Clause::Match(action) = &compiled.actions[0] else { panic!("modification") };
        let a = symbols.intern("=a");
        assert_eq!(spec(action, symbols.intern("z")), Some(Term::Var(a)));
        assert_eq!(spec(action, symbols.intern("y")), Some(Term::Var(a)));
    }

    #[test]
    fn retrieval_is_folded_into_a_specific_rule() {
        let mut symbols = Interner::new();
        let p1 = rule(
            &mut symbols,
            "ask",
            &[("=goal>", "state start n =n")],
            &[("=goal>", "state recall"), ("+retrieval>", "isa fact key =n")],
        );
        let p2 = rule(
            &mut symbols,
            "answer",
            &[("=goal>", "state recall"), ("=retrieval>", "isa fact key =k value =v")],
            &[("=goal>", "state done answer =v")],
        );
        let i1 = inst(&mut symbols, &[("=goal", "g"), ("=n", "2")]);
        let i2 = inst(&mut symbols, &[("=goal", "g"), ("=retrieval", "f2"), ("=k", "2"), ("=v", "4")]);
        let compiled = compile(
            Source { production: &p1, instantiation: &i1 },
            Source { production: &p2, instantiation: &i2 },
            &mut symbols,
        )
        .expect("compiles");

        assert!(compiled.conditions.iter().all(|c| c.buffer() == Some(sym::GOAL)));
        assert!(compiled.actions.iter().all(|c| c.buffer() == Some(sym::GOAL)));
        let Clause::Match(cond) = &compiled.conditions[0] else { panic!("match condition") };
        assert_eq!(spec(cond, symbols.intern("n")), Some(Term::Const(symbols.intern("2"))));
        let Clause::Match(action) = &compiled.actions[0] else { panic!("modification") };
        assert_eq!(spec(action, symbols.intern("answer")), Some(Term::Const(symbols.intern("4"))));
        assert_eq!(spec(action, symbols.intern("state")), Some(Term::Const(symbols.intern("done"))));
    }

    #[test]
    fn vetoes() {
        let mut symbols = Interner::new();
        let i = inst(&mut symbols, &[("=goal", "g")]);
        let plain = rule(&mut symbols, "plain", &[("=goal>", "state s1")], &[("=goal>", "state s2")]);

        let special = rule(&mut symbols, "say", &[("=goal>", "state s2")], &[("!output!", "hello")]);
        let result = compile(
            Source { production: &plain, instantiation: &i },
            Source { production: &special, instantiation: &i },
            &mut symbols,
        );
        assert_eq!(result.err(), Some(Veto::Special));

        let press = rule(&mut symbols, "press", &[("=goal>", "state s1")], &[("+manual>", "cmd press-key key a")]);
        let again = rule(&mut symbols, "again", &[("?manual>", "state free")], &[("+manual>", "cmd press-key key b")]);
        let result = compile(
            Source { production: &press, instantiation: &i },
            Source { production: &again, instantiation: &i },
            &mut symbols,
        );
        assert!(matches!(result, Err(Veto::Buffer { buffer, .. }) if buffer == sym::MANUAL));

        let clash = rule(&mut symbols, "clash", &[("=goal>", "state s3")], &[("=goal>", "state s4")]);
        let result = compile(
            Source { production: &plain, instantiation: &i },
            Source { production: &clash, instantiation: &i },
            &mut symbols,
        );
        assert_eq!(result.err(), Some(Veto::Conflict));
    }

    #[test]
    fn canonical_form_ignores_variable_names_and_order() {
        let mut symbols = Interner::new();
        let a = rule(&mut symbols, "a", &[("=goal>", "x =p y 1")], &[("=goal>", "z =p")]);
        let b = rule(&mut symbols, "b", &[("=goal>", "y 1 x =q")], &[("=goal>", "z =q")]);
        let c = rule(&mut symbols, "c", &[("=goal>", "y 2 x =q")], &[("=goal>", "z =q")]);
        assert_eq!(canonical_form(&a, &symbols), canonical_form(&b, &symbols));
        assert_ne!(canonical_form(&a, &symbols), canonical_form(&c, &symbols));
    }
}
