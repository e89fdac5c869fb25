//! Procedural memory: the production store, conflict resolution and utility
//! learning.
//!
//! ## Conflict resolution
//!
//! ```text
//! U'(p) = max(U, 0) · F + min(U, 0)     U = U(p) + ε,  ε ~ Logistic(0, s)
//! ```
//!
//! `F` is the fatigue scale (1 when off). It only shrinks positive
//! utilities; a negative utility is left as is.
//!
//! The instantiation with the highest `U'` wins; on equal utilities the
//! production registered first wins. When the winner falls below the utility
//! threshold the cycle is a micro-lapse: nothing fires and, with fatigue on,
//! `F` drops by a fixed decrement.
//!
//! ## Utility learning
//!
//! ```text
//! U(p) ← U(p) + α · ((R − (t_now − t_fired)) − U(p))
//! ```
//!
//! applied to every firing in the trailing window when a reward arrives.
//!
//! Reference: Anderson (2007), *How Can the Human Mind Occur in the Physical
//! Universe?*, ch. 4.

pub mod compilation;
pub mod matching;
pub mod production;
pub mod special;

use std::collections::{HashMap, VecDeque};

use rand::Rng;
use tracing::debug;

use crate::config::{CogzConfig, ProceduralConfig};
use crate::declarative::activation::logistic_noise;
use crate::event::Time;
use crate::symbol::{Interner, Symbol};

pub use compilation::Veto;
pub use matching::{Bindings, Instantiation, MatchContext};
pub use production::{BufferPattern, Clause, Production, SlotSpec, Special, Term};

/// Result of one conflict resolution.
#[derive(Debug, Clone)]
pub enum Selection {
    /// Fire this instantiation.
    Fire(Instantiation),
    /// The best utility fell below the threshold.
    Lapse {
        /// Utility of the best (rejected) instantiation.
        best: f64,
    },
    /// No production matched (or none passed its firing probability).
    Nothing,
}

/// What became of an offered compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    /// A new production was added at this index.
    Added(usize),
    /// An identical production at this index was reinforced.
    Reinforced(usize),
    /// The pair could not be compiled.
    Vetoed(Veto),
}

#[derive(Debug, Clone, Copy)]
struct Firing {
    production: usize,
    time: Time,
}

#[derive(Debug, Clone)]
struct LastFiring {
    instantiation: Instantiation,
    time: Time,
}

/// The production store.
#[derive(Debug)]
pub struct Procedural {
    productions: Vec<Production>,
    index: HashMap<Symbol, usize>,
    window: VecDeque<Firing>,
    last: Option<LastFiring>,
    fatigue_scale: f64,
}

impl Procedural {
    /// Create an empty store with the given initial fatigue scale.
    #[must_use]
    pub fn new(fatigue_scale: f64) -> Self {
        Self {
            productions: Vec::new(),
            index: HashMap::new(),
            window: VecDeque::new(),
            last: None,
            fatigue_scale,
        }
    }

    /// Register a production; returns its index. A production with the same
    /// name is replaced in place.
    pub fn add(&mut self, production: Production) -> usize {
        if let Some(&i) = self.index.get(&production.name) {
            self.productions[i] = production;
            return i;
        }
        let i = self.productions.len();
        self.index.insert(production.name, i);
        self.productions.push(production);
        i
    }

    /// Number of productions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.productions.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.productions.is_empty()
    }

    /// Production at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Production> {
        self.productions.get(index)
    }

    /// Mutable production at `index`.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Production> {
        self.productions.get_mut(index)
    }

    /// Index of the production named `name`.
    #[must_use]
    pub fn find(&self, name: Symbol) -> Option<usize> {
        self.index.get(&name).copied()
    }

    /// Production named `name`.
    #[must_use]
    pub fn by_name(&self, name: Symbol) -> Option<&Production> {
        self.find(name).map(|i| &self.productions[i])
    }

    /// Productions in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Production> {
        self.productions.iter()
    }

    /// Current fatigue scale.
    #[must_use]
    pub fn fatigue_scale(&self) -> f64 {
        self.fatigue_scale
    }

    /// Restore the fatigue scale (after a rest period, say).
    pub fn reset_fatigue(&mut self, scale: f64) {
        self.fatigue_scale = scale;
    }

    // -----------------------------------------------------------------------
    // Matching and selection
    // -----------------------------------------------------------------------

    /// Every instantiation against the current buffers, in registration
    /// order.
    pub fn find_instantiations(&self, ctx: &mut MatchContext<'_>) -> Vec<Instantiation> {
        self.productions
            .iter()
            .enumerate()
            .filter_map(|(i, p)| matching::instantiate(p, i, ctx))
            .collect()
    }

    /// Pick the instantiation to fire.
    pub fn select<R: Rng + ?Sized>(
        &mut self,
        candidates: Vec<Instantiation>,
        config: &CogzConfig,
        rng: &mut R,
    ) -> Selection {
        let fatigue = &config.fatigue;
        let mut best: Option<Instantiation> = None;
        for mut inst in candidates {
            let production = &self.productions[inst.production];
            if production.firing_probability < 1.0
                && rng.r#gen::<f64>() >= production.firing_probability
            {
                debug!(production = production.name.index(), "skipped by firing probability");
                continue;
            }
            let base = if inst.fuzzy { 0.0 } else { production.utility };
            let noise = config
                .procedural
                .utility_noise
                .map_or(0.0, |s| logistic_noise(s, rng));
            let mut utility = base + noise;
            if fatigue.enabled && utility > 0.0 {
                utility *= self.fatigue_scale;
            }
            inst.utility = utility;
            if best.as_ref().is_none_or(|b| utility > b.utility) {
                best = Some(inst);
            }
        }

        let Some(best) = best else {
            return Selection::Nothing;
        };
        let threshold = config.procedural.utility_threshold.map(|t| {
            if fatigue.enabled {
                t - fatigue.threshold_shift
            } else {
                t
            }
        });
        match threshold {
            Some(t) if best.utility < t => {
                if fatigue.enabled {
                    self.fatigue_scale = (self.fatigue_scale - fatigue.lapse_decrement).max(0.0);
                }
                Selection::Lapse { best: best.utility }
            }
            _ => Selection::Fire(best),
        }
    }

    // -----------------------------------------------------------------------
    // Utility learning
    // -----------------------------------------------------------------------

    /// Record that the production at `index` fired at `now`. Returns the
    /// production's own reward, if it carries one.
    pub fn record_firing(&mut self, index: usize, now: Time, config: &ProceduralConfig) -> Option<f64> {
        let production = &mut self.productions[index];
        production.fired_count += 1;
        let reward = production.reward;
        if config.utility_learning {
            self.window.push_back(Firing {
                production: index,
                time: now,
            });
            while self.window.len() > config.reward_window.max(1) {
                self.window.pop_front();
            }
        }
        reward
    }

    /// Propagate `reward` to every firing in the window, then empty it.
    /// Returns how many firings were updated.
    pub fn apply_reward(&mut self, reward: f64, now: Time, alpha: f64) -> usize {
        let updated = self.window.len();
        for firing in self.window.drain(..) {
            let production = &mut self.productions[firing.production];
            let effective = reward - (now - firing.time);
            production.utility += alpha * (effective - production.utility);
        }
        updated
    }

    // -----------------------------------------------------------------------
    // Compilation
    // -----------------------------------------------------------------------

    /// Offer the firing `current` for compilation with the previous firing.
    ///
    /// Returns `None` when compilation is off or the two firings are not
    /// adjacent (outside the window, or on different goal threads).
    pub fn compile_with_previous(
        &mut self,
        current: &Instantiation,
        now: Time,
        config: &CogzConfig,
        symbols: &mut Interner,
    ) -> Option<CompileOutcome> {
        let previous = self.last.replace(LastFiring {
            instantiation: current.clone(),
            time: now,
        });
        if !config.compilation.enabled {
            return None;
        }
        let previous = previous?;
        if now - previous.time > config.compilation.window
            || previous.instantiation.thread != current.thread
        {
            return None;
        }

        let first = &self.productions[previous.instantiation.production];
        let second = &self.productions[current.production];
        let (first_name, second_name, first_utility) = (first.name, second.name, first.utility);
        let compiled = compilation::compile(
            compilation::Source {
                production: first,
                instantiation: &previous.instantiation,
            },
            compilation::Source {
                production: second,
                instantiation: current,
            },
            symbols,
        );
        let mut compiled = match compiled {
            Ok(p) => p,
            Err(veto) => {
                debug!(
                    first = symbols.name(first_name),
                    second = symbols.name(second_name),
                    reason = %veto,
                    "compilation vetoed"
                );
                return Some(CompileOutcome::Vetoed(veto));
            }
        };

        let form = compilation::canonical_form(&compiled, symbols);
        if let Some(i) = self
            .productions
            .iter()
            .position(|p| compilation::canonical_form(p, symbols) == form)
        {
            let existing = &mut self.productions[i];
            existing.utility += config.procedural.learning_rate * (first_utility - existing.utility);
            debug!(production = symbols.name(existing.name), utility = existing.utility, "reinforced");
            return Some(CompileOutcome::Reinforced(i));
        }

        let base = format!("{}+{}", symbols.name(first_name), symbols.name(second_name));
        let name = match symbols.get(&base) {
            Some(taken) if self.index.contains_key(&taken) => symbols.fresh(&format!("{base}-")),
            _ => symbols.intern(&base),
        };
        compiled.name = name;
        compiled.parents = Some((first_name, second_name));
        compiled.utility = config.compilation.new_utility;
        compiled.initial_utility = config.compilation.new_utility;
        debug!(production = symbols.name(name), "compiled");
        Some(CompileOutcome::Added(self.add(compiled)))
    }

    /// Forget the previous firing so the next one starts a fresh pair.
    pub fn break_compilation_chain(&mut self) {
        self.last = None;
    }
}

impl Default for Procedural {
    fn default() -> Self {
        Self::new(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn store(utilities: &[f64]) -> (Procedural, Interner) {
        let mut symbols = Interner::new();
        let mut procedural = Procedural::default();
        for (i, u) in utilities.iter().enumerate() {
            let mut p = Production::new(symbols.intern(&format!("p{i}")));
            p.utility = *u;
            procedural.add(p);
        }
        (procedural, symbols)
    }

    fn candidate(production: usize) -> Instantiation {
        Instantiation {
            production,
            bindings: Bindings::new(),
            utility: 0.0,
            time: 0.0,
            thread: None,
            fuzzy: false,
        }
    }

    #[test]
    fn highest_utility_wins_and_ties_go_to_registration_order() {
        let (mut procedural, _) = store(&[0.3, 0.5, 0.5]);
        let config = CogzConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        let picked = procedural.select((0..3).map(candidate).collect(), &config, &mut rng);
        assert!(matches!(picked, Selection::Fire(i) if i.production == 1));
    }

    #[test]
    fn below_threshold_is_a_lapse_and_drains_fatigue() {
        let (mut procedural, _) = store(&[0.1]);
        let mut config = CogzConfig::default();
        config.procedural.utility_threshold = Some(0.5);
        config.fatigue.enabled = true;
        config.fatigue.lapse_decrement = 0.25;
        config.fatigue.threshold_shift = 0.0;
        let mut rng = StdRng::seed_from_u64(1);
        let picked = procedural.select(vec![candidate(0)], &config, &mut rng);
        assert!(matches!(picked, Selection::Lapse { .. }));
        assert!((procedural.fatigue_scale() - 0.75).abs() < 1e-12);
        let none = procedural.select(Vec::new(), &config, &mut rng);
        assert!(matches!(none, Selection::Nothing));
    }

    #[test]
    fn fatigue_shrinks_only_positive_utilities() {
        let (mut procedural, _) = store(&[2.0, -1.0]);
        let mut config = CogzConfig::default();
        config.fatigue.enabled = true;
        procedural.reset_fatigue(0.5);
        let mut rng = StdRng::seed_from_u64(1);

        let Selection::Fire(positive) = procedural.select(vec![candidate(0)], &config, &mut rng) else {
            panic!("expected a firing");
        };
        assert!((positive.utility - 1.0).abs() < 1e-12);

        let Selection::Fire(negative) = procedural.select(vec![candidate(1)], &config, &mut rng) else {
            panic!("expected a firing");
        };
        assert!((negative.utility + 1.0).abs() < 1e-12);
    }

    #[test]
    fn reward_moves_utilities_toward_discounted_reward() {
        let (mut procedural, _) = store(&[0.0, 0.0]);
        let config = ProceduralConfig {
            utility_learning: true,
            reward_window: 10,
            ..ProceduralConfig::default()
        };
        procedural.record_firing(0, 1.0, &config);
        procedural.record_firing(1, 2.0, &config);
        assert_eq!(procedural.apply_reward(10.0, 2.0, 0.5), 2);
        // p0: 0.5 * (10 - 1) ; p1: 0.5 * 10
        assert!((procedural.productions[0].utility - 4.5).abs() < 1e-12);
        assert!((procedural.productions[1].utility - 5.0).abs() < 1e-12);
        assert_eq!(procedural.apply_reward(10.0, 3.0, 0.5), 0);
        assert_eq!(procedural.productions[0].fired_count, 1);
    }

    #[test]
    fn window_is_bounded() {
        let (mut procedural, _) = store(&[0.0]);
        let config = ProceduralConfig {
            utility_learning: true,
            reward_window: 2,
            ..ProceduralConfig::default()
        };
        for t in 0..5 {
            procedural.record_firing(0, f64::from(t), &config);
        }
        assert_eq!(procedural.apply_reward(1.0, 5.0, 0.1), 2);
    }
}
