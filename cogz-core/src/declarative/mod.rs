//! Declarative memory: the chunk store and activation-ranked retrieval.
//!
//! Chunks are kept in insertion order, so iteration (and therefore
//! tie-breaking between equal activations) is deterministic. The store never
//! holds two structurally-equal chunks: [`DeclarativeMemory::add`] merges a
//! duplicate into the existing chunk and reports the discarded name so the
//! caller can rewrite buffer references.
//!
//! Retrieval filters candidates by the request's slots, `isa`, non-equality
//! constraints and the `:recently-retrieved` pseudo-slot, then picks the
//! candidate with the highest activation (see [`activation`]).

pub mod activation;

use std::collections::{HashMap, VecDeque};

use rand::Rng;
use tracing::debug;

use crate::chunk::{Chunk, ChunkTypes, SlotOp};
use crate::config::DeclarativeConfig;
use crate::event::Time;
use crate::symbol::{Interner, Symbol, sym};

pub use activation::{ActivationBreakdown, SpreadingSource};

/// Store consulted when no local chunk matches a retrieval request.
pub trait ExternalStore {
    /// Return a chunk satisfying `request`, if the store knows one.
    fn retrieve(&mut self, request: &Chunk, symbols: &mut Interner) -> Option<Chunk>;
}

/// Result of [`DeclarativeMemory::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOutcome {
    /// Name of the chunk now holding the content.
    pub name: Symbol,
    /// Name of a discarded duplicate whose references must be rewritten.
    pub merged_from: Option<Symbol>,
}

/// Inputs shared by every activation computation in one retrieval.
#[derive(Debug, Clone, Copy)]
pub struct ActivationContext<'a> {
    /// Current simulated time.
    pub now: Time,
    /// Declarative parameters.
    pub config: &'a DeclarativeConfig,
    /// Goal / imaginal spreading sources.
    pub sources: &'a [SpreadingSource],
}

/// One candidate considered during retrieval.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    /// Chunk name.
    pub name: Symbol,
    /// Activation terms.
    pub activation: ActivationBreakdown,
}

/// Outcome of a retrieval request.
#[derive(Debug, Clone)]
pub struct Retrieval {
    /// Retrieved chunk, or `None` on failure.
    pub chunk: Option<Symbol>,
    /// Activation of the retrieved chunk (threshold on failure).
    pub activation: f64,
    /// Seconds until the result is delivered.
    pub latency: Time,
    /// Every candidate that passed the filter, in store order.
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Copy)]
struct Finst {
    name: Symbol,
    marked_at: Time,
}

/// The chunk store.
#[derive(Default)]
pub struct DeclarativeMemory {
    chunks: Vec<Chunk>,
    index: HashMap<Symbol, usize>,
    finsts: VecDeque<Finst>,
    similarities: HashMap<(Symbol, Symbol), f64>,
    external: Option<Box<dyn ExternalStore>>,
}

impl DeclarativeMemory {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a store consulted when no local chunk matches.
    pub fn set_external(&mut self, store: Box<dyn ExternalStore>) {
        self.external = Some(store);
    }

    /// Number of stored chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Stored chunks in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    /// Look up a chunk by name.
    #[must_use]
    pub fn get(&self, name: Symbol) -> Option<&Chunk> {
        self.index.get(&name).map(|&i| &self.chunks[i])
    }

    /// Mutable lookup by name.
    pub fn get_mut(&mut self, name: Symbol) -> Option<&mut Chunk> {
        self.index.get(&name).map(|&i| &mut self.chunks[i])
    }

    /// Whether a chunk with this name is stored.
    #[must_use]
    pub fn contains(&self, name: Symbol) -> bool {
        self.index.contains_key(&name)
    }

    /// Fan of a value: the stored chunk's fan, or 1 for anything else.
    #[must_use]
    pub fn fan(&self, value: Symbol) -> u32 {
        self.get(value).map_or(1, |chunk| chunk.fan)
    }

    /// Add a chunk.
    ///
    /// With `allow_merge`, a structurally-equal existing chunk absorbs the
    /// new one: its use count goes up by one and the discarded name is
    /// returned in [`AddOutcome::merged_from`] (stored slot values are
    /// rewritten here; buffers are the caller's job). Otherwise the chunk is
    /// stamped with `now`, its fan is computed, and it is inserted. A name
    /// collision with a different chunk mints a fresh name.
    ///
    /// Slot-less chunks are atoms identified by name and never merge.
    pub fn add(
        &mut self,
        mut chunk: Chunk,
        allow_merge: bool,
        now: Time,
        keep_history: bool,
        symbols: &mut Interner,
    ) -> AddOutcome {
        if allow_merge && !chunk.slots.is_empty() {
            if let Some(i) = self.chunks.iter().position(|c| c.structurally_equal(&chunk)) {
                let existing = &mut self.chunks[i];
                existing.record_use(now, keep_history);
                let name = existing.name;
                let merged_from = (chunk.name != name).then_some(chunk.name);
                if let Some(old) = merged_from {
                    self.rewrite(old, name);
                    debug!(kept = %symbols.display(name), discarded = %symbols.display(old), "merged chunk");
                }
                return AddOutcome { name, merged_from };
            }
        }

        if self.contains(chunk.name) {
            let base = symbols.name(chunk.name).to_owned();
            chunk.name = symbols.fresh(&base);
        }

        chunk.creation_time = now;
        chunk.use_count = 1;
        chunk.use_times = if keep_history { vec![now] } else { Vec::new() };
        chunk.is_request = false;
        chunk.constraints.clear();
        chunk.fan = 1;

        for value in chunk.slots.values() {
            if let Some(referenced) = self.get_mut(*value) {
                referenced.fan += 1;
            }
        }
        let name = chunk.name;
        let referencing = self.chunks.iter().filter(|c| c.references(name)).count();
        chunk.fan += u32::try_from(referencing).unwrap_or(u32::MAX);

        self.index.insert(name, self.chunks.len());
        self.chunks.push(chunk);
        AddOutcome {
            name,
            merged_from: None,
        }
    }

    /// Replace every stored slot value `old` with `new`.
    pub fn rewrite(&mut self, old: Symbol, new: Symbol) {
        for chunk in &mut self.chunks {
            chunk.rewrite(old, new);
        }
    }

    /// Set the similarity between two values (symmetric).
    pub fn set_similarity(&mut self, a: Symbol, b: Symbol, value: f64) {
        self.similarities.insert((a, b), value);
        self.similarities.insert((b, a), value);
    }

    /// Similarity of two values: `max_similarity` when identical, the table
    /// entry when present, `max_difference` otherwise.
    #[must_use]
    pub fn similarity(&self, a: Symbol, b: Symbol, config: &DeclarativeConfig) -> f64 {
        if a == b {
            return config.max_similarity;
        }
        self.similarities
            .get(&(a, b))
            .copied()
            .unwrap_or(config.max_difference)
    }

    // -----------------------------------------------------------------------
    // Finsts
    // -----------------------------------------------------------------------

    /// Mark `name` as recently retrieved.
    pub fn add_finst(&mut self, name: Symbol, now: Time, config: &DeclarativeConfig) {
        self.finsts.retain(|f| f.name != name);
        self.finsts.push_back(Finst {
            name,
            marked_at: now,
        });
        self.prune_finsts(now, config);
    }

    /// Drop expired marks and keep at most `num_finsts`.
    pub fn prune_finsts(&mut self, now: Time, config: &DeclarativeConfig) {
        self.finsts.retain(|f| now - f.marked_at <= config.finst_span);
        while self.finsts.len() > config.num_finsts {
            self.finsts.pop_front();
        }
    }

    /// Whether `name` carries an unexpired retrieval mark.
    #[must_use]
    pub fn has_finst(&self, name: Symbol, now: Time, config: &DeclarativeConfig) -> bool {
        self.finsts
            .iter()
            .any(|f| f.name == name && now - f.marked_at <= config.finst_span)
    }

    /// Drop every retrieval mark.
    pub fn clear_finsts(&mut self) {
        self.finsts.clear();
    }

    // -----------------------------------------------------------------------
    // Retrieval
    // -----------------------------------------------------------------------

    /// Whether a stored chunk passes a request's hard filter.
    ///
    /// Under partial matching, plain equality slots are scored rather than
    /// required; `isa`, constraints and finsts always filter.
    #[must_use]
    pub fn satisfies(
        &self,
        chunk: &Chunk,
        request: &Chunk,
        ctx: &ActivationContext<'_>,
        types: &ChunkTypes,
        symbols: &Interner,
    ) -> bool {
        let partial = ctx.config.mismatch_penalty.is_some();
        let finst_ok = |wanted: bool| self.has_finst(chunk.name, ctx.now, ctx.config) == wanted;

        for (&slot, &wanted) in &request.slots {
            let ok = match slot {
                s if s == sym::ISA => chunk.chunk_type().is_some_and(|ty| types.is_a(ty, wanted)),
                s if s == sym::RECENTLY_RETRIEVED => finst_ok(wanted != sym::NIL),
                _ => partial || chunk.get(slot) == wanted,
            };
            if !ok {
                return false;
            }
        }
        request.constraints.iter().all(|c| {
            if c.slot == sym::RECENTLY_RETRIEVED {
                let marked = c.value != sym::NIL;
                match c.op {
                    SlotOp::Eq => finst_ok(marked),
                    SlotOp::Neq => finst_ok(!marked),
                    _ => false,
                }
            } else {
                c.op.test(chunk.get(c.slot), c.value, symbols)
            }
        })
    }

    /// Activation terms of one chunk for one request.
    pub fn activation<R: Rng + ?Sized>(
        &self,
        chunk: &Chunk,
        request: &Chunk,
        ctx: &ActivationContext<'_>,
        rng: &mut R,
    ) -> ActivationBreakdown {
        let config = ctx.config;
        ActivationBreakdown {
            base_level: activation::base_level(chunk, ctx.now, config),
            spreading: config
                .max_associative_strength
                .map_or(0.0, |s| activation::spreading(chunk, ctx.sources, s)),
            partial_match: config.mismatch_penalty.map_or(0.0, |p| {
                activation::partial_match(request, chunk, p, |a, b| self.similarity(a, b, config))
            }),
            noise: config
                .activation_noise
                .map_or(0.0, |s| activation::logistic_noise(s, rng)),
        }
    }

    /// Answer a retrieval request.
    ///
    /// The winner is the first candidate with the highest activation; it is
    /// returned only if that activation reaches the retrieval threshold.
    /// With no local candidate at all, the external store (if any) is asked
    /// and its answer is added to the store.
    pub fn find_retrieval<R: Rng + ?Sized>(
        &mut self,
        request: &Chunk,
        ctx: &ActivationContext<'_>,
        types: &ChunkTypes,
        symbols: &mut Interner,
        rng: &mut R,
    ) -> Retrieval {
        let config = ctx.config;
        let mut candidates = Vec::new();
        let mut best: Option<(Symbol, f64)> = None;
        for chunk in &self.chunks {
            if !self.satisfies(chunk, request, ctx, types, symbols) {
                continue;
            }
            let terms = self.activation(chunk, request, ctx, rng);
            let total = terms.total();
            if best.is_none_or(|(_, a)| total > a) {
                best = Some((chunk.name, total));
            }
            candidates.push(Candidate {
                name: chunk.name,
                activation: terms,
            });
        }

        if candidates.is_empty() {
            if let Some(found) = self.external.as_mut().and_then(|s| s.retrieve(request, symbols)) {
                let keep_history = config.base_level_decay.is_some() && !config.optimized_learning;
                let outcome = self.add(found, true, ctx.now, keep_history, symbols);
                debug!(chunk = %symbols.display(outcome.name), "retrieved from external store");
                return Retrieval {
                    chunk: Some(outcome.name),
                    activation: config.retrieval_threshold,
                    latency: activation::failure_latency(config),
                    candidates,
                };
            }
        }

        match best {
            Some((name, a)) if a >= config.retrieval_threshold => Retrieval {
                chunk: Some(name),
                activation: a,
                latency: activation::retrieval_latency(a, config),
                candidates,
            },
            _ => Retrieval {
                chunk: None,
                activation: config.retrieval_threshold,
                latency: activation::failure_latency(config),
                candidates,
            },
        }
    }

    /// Record a successful retrieval of `name` at `now`.
    pub fn mark_retrieved(&mut self, name: Symbol, now: Time, config: &DeclarativeConfig) {
        if let Some(chunk) = self.get_mut(name) {
            chunk.retrieved = true;
            chunk.retrieval_time = Some(now);
        }
        self.add_finst(name, now, config);
    }
}

impl std::fmt::Debug for DeclarativeMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeclarativeMemory")
            .field("chunks", &self.chunks.len())
            .field("finsts", &self.finsts.len())
            .field("external", &self.external.is_some())
            .finish_non_exhaustive()
    }
}
