//! Production matching.
//!
//! A production's conditions are unified against the current buffers into a
//! single substitution. Tests are processed in declaration order; a test
//! that needs a variable no earlier test has bound (a forward reference) is
//! deferred and retried after the remaining tests have had a chance to bind
//! it. Matching fails when a test fails or a deferred test never becomes
//! ready. Under fuzzy matching, failed tests are tolerated and the
//! instantiation is flagged instead.

use std::collections::BTreeMap;

use tracing::warn;

use crate::buffer::{Buffers, ThreadId};
use crate::chunk::{ChunkTypes, SlotOp};
use crate::event::Time;
use crate::procedural::production::{Clause, Production, SlotSpec, Special, Term};
use crate::procedural::special;
use crate::symbol::{Interner, Symbol, sym};
use crate::task::Task;

/// Variable → value substitution.
pub type Bindings = BTreeMap<Symbol, Symbol>;

/// One production bound to one substitution.
#[derive(Debug, Clone)]
pub struct Instantiation {
    /// Index of the production in registration order.
    pub production: usize,
    /// Variable bindings.
    pub bindings: Bindings,
    /// Utility used in conflict resolution (noise included).
    pub utility: f64,
    /// Scheduled firing time.
    pub time: Time,
    /// Goal thread the match was found on.
    pub thread: Option<ThreadId>,
    /// Whether failed tests were tolerated.
    pub fuzzy: bool,
}

/// What matching reads.
pub struct MatchContext<'a> {
    /// Current buffers.
    pub buffers: &'a Buffers,
    /// Type hierarchy for `isa` tests.
    pub types: &'a ChunkTypes,
    /// Interner (evaluators intern numbers).
    pub symbols: &'a mut Interner,
    /// Fallback evaluator.
    pub task: Option<&'a mut (dyn Task + 'static)>,
    /// Tolerate failed tests.
    pub fuzzy: bool,
}

enum Outcome {
    Pass,
    Fail,
    Defer,
}

enum Test<'p> {
    Slot {
        buffer: Symbol,
        query: bool,
        spec: &'p SlotSpec,
    },
    Special(&'p Special),
}

/// Try to instantiate `production` (registered at `index`).
pub fn instantiate(
    production: &Production,
    index: usize,
    ctx: &mut MatchContext<'_>,
) -> Option<Instantiation> {
    let mut bindings = Bindings::new();
    for &(buffer, var) in &production.buffer_vars {
        let chunk = ctx.buffers.get_filled(buffer)?;
        bindings.insert(var, chunk.name);
    }
    for clause in &production.conditions {
        if let Clause::Query(p) = clause {
            if !ctx.buffers.contains(p.buffer) {
                return None;
            }
        }
    }

    let mut pending: Vec<Test<'_>> = production.conditions.iter().flat_map(tests_of).collect();

    let mut fuzzy = false;
    loop {
        let before = pending.len();
        let mut deferred = Vec::with_capacity(pending.len());
        for test in pending {
            match run_test(&test, &mut bindings, ctx) {
                Outcome::Pass => {}
                Outcome::Defer => deferred.push(test),
                Outcome::Fail if ctx.fuzzy => fuzzy = true,
                Outcome::Fail => return None,
            }
        }
        pending = deferred;
        if pending.is_empty() {
            break;
        }
        if pending.len() == before {
            if ctx.fuzzy {
                fuzzy = true;
                break;
            }
            return None;
        }
    }

    Some(Instantiation {
        production: index,
        bindings,
        utility: 0.0,
        time: 0.0,
        thread: None,
        fuzzy,
    })
}

fn tests_of(clause: &Clause) -> Vec<Test<'_>> {
    match clause {
        Clause::Match(p) | Clause::Query(p) => {
            let query = matches!(clause, Clause::Query(_));
            p.slots
                .iter()
                .map(|spec| Test::Slot {
                    buffer: p.buffer,
                    query,
                    spec,
                })
                .collect()
        }
        Clause::Special(s) => vec![Test::Special(s)],
        Clause::Request { .. } | Clause::Clear(_) => Vec::new(),
    }
}

fn run_test(test: &Test<'_>, bindings: &mut Bindings, ctx: &mut MatchContext<'_>) -> Outcome {
    match test {
        Test::Slot {
            buffer,
            query,
            spec,
        } => {
            let source = if *query {
                ctx.buffers.status(*buffer)
            } else {
                ctx.buffers.get_filled(*buffer)
            };
            let Some(chunk) = source else {
                return Outcome::Fail;
            };
            test_slot(chunk.get(spec.slot), spec, bindings, ctx.types, ctx.symbols)
        }
        Test::Special(Special::Bind { var, expr }) => {
            if !expr.is_ready(bindings) {
                return Outcome::Defer;
            }
            match special::bind_value(expr, bindings, ctx.symbols, ctx.task.as_deref_mut()) {
                Some(value) => match bindings.get(var) {
                    Some(&existing) if existing != value => Outcome::Fail,
                    _ => {
                        bindings.insert(*var, value);
                        Outcome::Pass
                    }
                },
                None => {
                    warn!(expr = %expr.render(ctx.symbols), "!bind! could not be evaluated");
                    Outcome::Fail
                }
            }
        }
        Test::Special(Special::Eval(expr)) => {
            if !expr.is_ready(bindings) {
                return Outcome::Defer;
            }
            match special::condition_holds(expr, bindings, ctx.symbols, ctx.task.as_deref_mut()) {
                Some(true) => Outcome::Pass,
                Some(false) => Outcome::Fail,
                None => {
                    warn!(expr = %expr.render(ctx.symbols), "!eval! could not be evaluated");
                    Outcome::Fail
                }
            }
        }
        Test::Special(Special::Output(_) | Special::Stop) => Outcome::Pass,
    }
}

fn test_slot(
    stored: Symbol,
    spec: &SlotSpec,
    bindings: &mut Bindings,
    types: &ChunkTypes,
    symbols: &Interner,
) -> Outcome {
    let wanted = match spec.value {
        Term::Const(c) => c,
        Term::Var(v) => match bindings.get(&v) {
            Some(&bound) => bound,
            None if spec.op == SlotOp::Eq => {
                if stored == sym::NIL {
                    return Outcome::Fail;
                }
                bindings.insert(v, stored);
                return Outcome::Pass;
            }
            None => return Outcome::Defer,
        },
    };
    let pass = if spec.slot == sym::ISA && matches!(spec.op, SlotOp::Eq | SlotOp::Neq) {
        let is_a = stored != sym::NIL && types.is_a(stored, wanted);
        is_a == (spec.op == SlotOp::Eq)
    } else {
        spec.op.test(stored, wanted, symbols)
    };
    if pass { Outcome::Pass } else { Outcome::Fail }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;

    struct Fixture {
        symbols: Interner,
        buffers: Buffers,
        types: ChunkTypes,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                symbols: Interner::new(),
                buffers: Buffers::new(),
                types: ChunkTypes::new(),
            }
        }

        fn production(&mut self, conditions: &[(&str, &str)]) -> Production {
            let mut p = Production::new(self.symbols.intern("p"));
            for (head, body) in conditions {
                p.conditions
                    .push(Clause::parse(head, body, &mut self.symbols).expect("clause"));
            }
            p.bind_buffer_vars(&mut self.symbols);
            p
        }

        fn set_goal(&mut self, slots: &[(&str, &str)]) {
            let mut chunk = Chunk::new(self.symbols.intern("g"));
            for (slot, value) in slots {
                chunk.set(self.symbols.intern(slot), self.symbols.intern(value));
            }
            self.buffers.set(sym::GOAL, chunk, 0.0);
        }

        fn run(&mut self, production: &Production, fuzzy: bool) -> Option<Instantiation> {
            let mut ctx = MatchContext {
                buffers: &self.buffers,
                types: &self.types,
                symbols: &mut self.symbols,
                task: None,
                fuzzy,
            };
            instantiate(production, 0, &mut ctx)
        }

        fn bound(&self, inst: &Instantiation, var: &str) -> Option<String> {
            let var = self.symbols.get(var)?;
            inst.bindings
                .get(&var)
                .map(|v| self.symbols.name(*v).to_owned())
        }
    }

    #[test]
    fn binds_variables_and_buffer_names() {
        let mut fx = Fixture::new();
        fx.set_goal(&[("state", "counting"), ("number", "2")]);
        let p = fx.production(&[("=goal>", "state counting number =n")]);
        let inst = fx.run(&p, false).expect("match");
        assert_eq!(fx.bound(&inst, "=n").as_deref(), Some("2"));
        assert_eq!(fx.bound(&inst, "=goal").as_deref(), Some("g"));
    }

    #[test]
    fn forward_references_are_deferred() {
        let mut fx = Fixture::new();
        fx.set_goal(&[("a", "1"), ("b", "2")]);
        // `- a =y` needs =y, which is bound by the later `b` test
        let p = fx.production(&[("=goal>", "- a =y b =y")]);
        assert!(fx.run(&p, false).is_some());
        let q = fx.production(&[("=goal>", "- a =y")]);
        assert!(fx.run(&q, false).is_none());
    }

    #[test]
    fn consistent_bindings_across_conditions() {
        let mut fx = Fixture::new();
        fx.set_goal(&[("a", "1"), ("b", "2")]);
        let same = fx.production(&[("=goal>", "a =x b =x")]);
        assert!(fx.run(&same, false).is_none());
    }

    #[test]
    fn queries_read_status() {
        let mut fx = Fixture::new();
        let free = fx.production(&[("?retrieval>", "state free buffer empty")]);
        assert!(fx.run(&free, false).is_some());
        let busy = fx.production(&[("?retrieval>", "state busy")]);
        assert!(fx.run(&busy, false).is_none());
    }

    #[test]
    fn empty_buffers_never_match() {
        let mut fx = Fixture::new();
        let p = fx.production(&[("=retrieval>", "value =v")]);
        assert!(fx.run(&p, true).is_none());
    }

    #[test]
    fn fuzzy_matching_tolerates_failed_tests() {
        let mut fx = Fixture::new();
        fx.set_goal(&[("state", "start")]);
        let p = fx.production(&[("=goal>", "state finish")]);
        assert!(fx.run(&p, false).is_none());
        let inst = fx.run(&p, true).expect("fuzzy match");
        assert!(inst.fuzzy);
    }

    #[test]
    fn eval_conditions_use_bindings() {
        let mut fx = Fixture::new();
        fx.set_goal(&[("n", "4")]);
        let small = fx.production(&[("=goal>", "n =n"), ("!eval!", "(< =n 5)")]);
        assert!(fx.run(&small, false).is_some());
        let large = fx.production(&[("=goal>", "n =n"), ("!eval!", "(> =n 5)")]);
        assert!(fx.run(&large, false).is_none());
        let bound = fx.production(&[("!bind!", "=m (* =n 2)"), ("=goal>", "n =n")]);
        let inst = fx.run(&bound, false).expect("match");
        assert_eq!(fx.bound(&inst, "=m").as_deref(), Some("8"));
    }
}
