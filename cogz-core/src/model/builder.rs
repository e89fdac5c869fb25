//! Assembling and validating a model.
//!
//! Everything is collected first and checked in [`ModelBuilder::build`].
//! Structural problems become [`Diagnostic`]s; fatal ones abort the build
//! with [`CogzError::Compile`], the rest are kept on the model and logged.

use std::collections::{BTreeSet, HashSet};

use tracing::{info, warn};

use crate::buffer::Buffers;
use crate::chunk::{Chunk, ChunkTypes, SlotOp};
use crate::config::{CogzConfig, ParamValue};
use crate::declarative::{DeclarativeMemory, ExternalStore};
use crate::error::{CogzError, Diagnostic, Result, SourceSpan};
use crate::event::EventQueue;
use crate::module::Module;
use crate::procedural::{Clause, Procedural, Production, Special};
use crate::symbol::{Interner, Symbol, sym};
use crate::task::Task;
use crate::trace::{TraceSink, TracingSink};

use super::{Model, RunStats, StopHandle};

/// A production written as clause text, parsed at build time.
#[derive(Debug, Clone)]
pub struct ProductionDraft {
    name: String,
    conditions: Vec<(String, String)>,
    actions: Vec<(String, String)>,
    span: Option<SourceSpan>,
}

impl ProductionDraft {
    /// Start a production called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            conditions: Vec::new(),
            actions: Vec::new(),
            span: None,
        }
    }

    /// Add a condition, e.g. `.when("=goal>", "state start")`.
    #[must_use]
    pub fn when(mut self, head: impl Into<String>, body: impl Into<String>) -> Self {
        self.conditions.push((head.into(), body.into()));
        self
    }

    /// Add an action, e.g. `.then("+retrieval>", "isa fact key =k")`.
    #[must_use]
    pub fn then(mut self, head: impl Into<String>, body: impl Into<String>) -> Self {
        self.actions.push((head.into(), body.into()));
        self
    }

    /// Record where this production was defined.
    #[must_use]
    pub fn at(mut self, line: u32, offset: usize) -> Self {
        self.span = Some(SourceSpan::new(line, offset));
        self
    }
}

struct ChunkDraft {
    name: String,
    slots: Vec<(String, String)>,
}

/// Builder for [`Model`].
pub struct ModelBuilder {
    config: CogzConfig,
    symbols: Interner,
    types: Vec<(String, Vec<String>)>,
    chunks: Vec<ChunkDraft>,
    prebuilt_chunks: Vec<Chunk>,
    goal: Option<String>,
    drafts: Vec<ProductionDraft>,
    prebuilt: Vec<Production>,
    production_parameters: Vec<(String, String, String)>,
    similarities: Vec<(String, String, f64)>,
    task: Option<Box<dyn Task>>,
    modules: Vec<Box<dyn Module>>,
    trace: Option<Box<dyn TraceSink>>,
    external: Option<Box<dyn ExternalStore>>,
    diagnostics: Vec<Diagnostic>,
}

impl ModelBuilder {
    /// Start from the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: CogzConfig::default(),
            symbols: Interner::new(),
            types: Vec::new(),
            chunks: Vec::new(),
            prebuilt_chunks: Vec::new(),
            goal: None,
            drafts: Vec::new(),
            prebuilt: Vec::new(),
            production_parameters: Vec::new(),
            similarities: Vec::new(),
            task: None,
            modules: Vec::new(),
            trace: None,
            external: None,
            diagnostics: Vec::new(),
        }
    }

    /// Reuse an interner from an earlier model. It is reset, so only the
    /// fresh-name counter carries over.
    #[must_use]
    pub fn with_interner(mut self, mut symbols: Interner) -> Self {
        symbols.reset();
        self.symbols = symbols;
        self
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn config(mut self, config: CogzConfig) -> Self {
        self.config = config;
        self
    }

    /// Set one global parameter (`:rt`, `:egs`, ...). Unknown keys and bad
    /// values are reported as warnings.
    #[must_use]
    pub fn parameter(mut self, key: &str, token: &str) -> Self {
        if let Err(e) = self.config.apply_parameter(key, &ParamValue::parse(token)) {
            self.diagnostics.push(Diagnostic::warning(e.to_string(), None));
        }
        self
    }

    /// Declare a chunk type with optional parent types.
    #[must_use]
    pub fn chunk_type(mut self, name: &str, parents: &[&str]) -> Self {
        self.types.push((
            name.to_owned(),
            parents.iter().map(|p| (*p).to_owned()).collect(),
        ));
        self
    }

    /// Add a chunk from `slot value slot value ...` text.
    #[must_use]
    pub fn chunk(mut self, name: &str, slots: &str) -> Self {
        let tokens: Vec<&str> = slots.split_whitespace().collect();
        if tokens.len() % 2 != 0 {
            self.diagnostics.push(Diagnostic::fatal(
                format!("chunk {name}: slot `{}` has no value", tokens.last().copied().unwrap_or_default()),
                None,
            ));
        }
        self.chunks.push(ChunkDraft {
            name: name.to_owned(),
            slots: tokens
                .chunks_exact(2)
                .map(|pair| (pair[0].to_owned(), pair[1].to_owned()))
                .collect(),
        });
        self
    }

    /// Add a chunk built from symbols of [`ModelBuilder::symbols_mut`].
    #[must_use]
    pub fn chunk_with(mut self, chunk: Chunk) -> Self {
        self.prebuilt_chunks.push(chunk);
        self
    }

    /// Put the chunk called `name` into the goal buffer at time 0.
    #[must_use]
    pub fn goal(mut self, name: &str) -> Self {
        self.goal = Some(name.to_owned());
        self
    }

    /// Add a production written as clause text.
    #[must_use]
    pub fn add_production(mut self, draft: ProductionDraft) -> Self {
        self.drafts.push(draft);
        self
    }

    /// Add a production built from symbols of [`ModelBuilder::symbols_mut`].
    #[must_use]
    pub fn production(mut self, production: Production) -> Self {
        self.prebuilt.push(production);
        self
    }

    /// Set `:u`, `:p`, `:reward` or `:break` on a production.
    #[must_use]
    pub fn production_parameter(mut self, production: &str, key: &str, token: &str) -> Self {
        self.production_parameters
            .push((production.to_owned(), key.to_owned(), token.to_owned()));
        self
    }

    /// Similarity between two chunks, for partial matching.
    #[must_use]
    pub fn similarity(mut self, a: &str, b: &str, value: f64) -> Self {
        self.similarities.push((a.to_owned(), b.to_owned(), value));
        self
    }

    /// Attach the task.
    #[must_use]
    pub fn task(mut self, task: impl Task + 'static) -> Self {
        self.task = Some(Box::new(task));
        self
    }

    /// Register a perceptual or motor module.
    #[must_use]
    pub fn module(mut self, module: impl Module + 'static) -> Self {
        self.modules.push(Box::new(module));
        self
    }

    /// Send the trace somewhere other than `tracing`.
    #[must_use]
    pub fn trace_sink(mut self, sink: impl TraceSink + 'static) -> Self {
        self.trace = Some(Box::new(sink));
        self
    }

    /// Attach a store consulted when retrieval finds no local candidate.
    #[must_use]
    pub fn external_store(mut self, store: impl ExternalStore + 'static) -> Self {
        self.external = Some(Box::new(store));
        self
    }

    /// The interner, for building chunks and productions from symbols.
    pub fn symbols_mut(&mut self) -> &mut Interner {
        &mut self.symbols
    }

    /// Validate everything and produce a runnable model.
    ///
    /// # Errors
    /// Returns [`CogzError::Compile`] with every diagnostic when any of them
    /// is fatal.
    pub fn build(self) -> Result<Model> {
        let Self {
            config,
            mut symbols,
            types: type_drafts,
            chunks: chunk_drafts,
            prebuilt_chunks,
            goal,
            drafts,
            prebuilt,
            production_parameters,
            similarities,
            task,
            mut modules,
            trace,
            external,
            mut diagnostics,
        } = self;

        let mut types = ChunkTypes::new();
        for (name, parents) in &type_drafts {
            let parents: Vec<Symbol> = parents.iter().map(|p| symbols.intern(p)).collect();
            types.define(symbols.intern(name), &parents);
        }

        modules.sort_by_key(|m| m.kind());
        let mut buffers = Buffers::new();
        for module in &modules {
            for name in module.buffers() {
                let buffer = symbols.intern(name);
                if buffers.module_of(buffer) != Some(module.kind()) {
                    buffers.register(buffer, module.kind());
                }
            }
        }

        let mut declarative = DeclarativeMemory::new();
        if let Some(store) = external {
            declarative.set_external(store);
        }
        let chunks = build_chunks(&chunk_drafts, prebuilt_chunks, &mut symbols, &mut diagnostics);
        let keep_history = config.declarative.base_level_decay.is_some() && !config.declarative.optimized_learning;
        for chunk in chunks {
            declarative.add(chunk, config.declarative.merge_chunks, 0.0, keep_history, &mut symbols);
        }
        for (a, b, value) in &similarities {
            let (a, b) = (symbols.intern(a), symbols.intern(b));
            declarative.set_similarity(a, b, *value);
        }

        let mut procedural = Procedural::new(config.fatigue.utility_scale);
        let mut seen = HashSet::new();
        let parsed = drafts
            .iter()
            .filter_map(|d| parse_draft(d, &mut symbols, &mut diagnostics).map(|p| (p, d.span)));
        let all: Vec<(Production, Option<SourceSpan>)> =
            parsed.chain(prebuilt.into_iter().map(|p| (p, None))).collect();
        for (mut production, span) in all {
            let name = symbols.name(production.name).to_owned();
            if !seen.insert(production.name) {
                diagnostics.push(Diagnostic::fatal(format!("duplicate production {name}"), span));
                continue;
            }
            production.bind_buffer_vars(&mut symbols);
            validate(&production, &name, span, &buffers, &symbols, &mut diagnostics);
            production.utility = config.procedural.initial_utility;
            production.initial_utility = config.procedural.initial_utility;
            procedural.add(production);
        }
        for (production, key, token) in &production_parameters {
            let target = symbols.get(production).and_then(|n| procedural.find(n));
            match target.and_then(|i| procedural.get_mut(i)) {
                Some(p) => {
                    if let Err(e) = apply_production_parameter(p, key, token) {
                        diagnostics.push(Diagnostic::warning(e.to_string(), None));
                    }
                }
                None => diagnostics.push(Diagnostic::warning(
                    format!("parameter {key} for unknown production {production}"),
                    None,
                )),
            }
        }

        if let Some(name) = &goal {
            match symbols.get(name).and_then(|g| declarative.get(g)) {
                Some(chunk) => buffers.set(sym::GOAL, chunk.clone(), 0.0),
                None => diagnostics.push(Diagnostic::fatal(format!("goal chunk {name} is not defined"), None)),
            }
        }

        if diagnostics.iter().any(|d| d.fatal) {
            return Err(CogzError::Compile(diagnostics));
        }
        for diagnostic in &diagnostics {
            warn!(%diagnostic, "model diagnostic");
        }

        let decaying = config.buffers.decaying.iter().map(|b| symbols.intern(b)).collect();
        let harvest_exempt = config
            .procedural
            .harvest_exempt
            .iter()
            .map(|b| symbols.intern(b))
            .collect();
        info!(
            chunks = declarative.len(),
            productions = procedural.len(),
            modules = modules.len(),
            "model built"
        );
        Ok(Model {
            rng: Model::rng_for(&config),
            config,
            symbols,
            events: EventQueue::new(),
            buffers,
            declarative,
            procedural,
            types,
            modules,
            task,
            trace: trace.unwrap_or_else(|| Box::new(TracingSink)),
            time: 0.0,
            stop: StopHandle::default(),
            halt: None,
            stats: RunStats::default(),
            started: false,
            lapse_pending: false,
            decaying,
            harvest_exempt,
            pending_reward: None,
            diagnostics,
        })
    }
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Intern chunk drafts; slot values naming nothing known become empty
/// chunks, with a warning.
fn build_chunks(
    drafts: &[ChunkDraft],
    prebuilt: Vec<Chunk>,
    symbols: &mut Interner,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = drafts
        .iter()
        .map(|draft| {
            let mut chunk = Chunk::new(symbols.intern(&draft.name));
            for (slot, value) in &draft.slots {
                chunk.set(symbols.intern(slot), symbols.intern(value));
            }
            chunk
        })
        .collect();
    chunks.extend(prebuilt);

    let defined: HashSet<Symbol> = chunks.iter().map(|c| c.name).collect();
    let mut missing = BTreeSet::new();
    for chunk in &chunks {
        for (&slot, &value) in &chunk.slots {
            let known = slot == sym::ISA
                || value == sym::NIL
                || value == sym::T
                || symbols.number(value).is_some()
                || defined.contains(&value);
            if !known {
                missing.insert(value);
            }
        }
    }
    for value in missing {
        diagnostics.push(Diagnostic::warning(
            format!("creating chunk {} with no slots", symbols.name(value)),
            None,
        ));
        chunks.push(Chunk::new(value));
    }
    chunks
}

fn parse_draft(
    draft: &ProductionDraft,
    symbols: &mut Interner,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<Production> {
    let mut production = Production::new(symbols.intern(&draft.name));
    let mut ok = true;
    for (side, clauses) in [(false, &draft.conditions), (true, &draft.actions)] {
        for (head, body) in clauses {
            match Clause::parse(head, body, symbols) {
                Ok(clause) if side => production.actions.push(clause),
                Ok(clause) => production.conditions.push(clause),
                Err(e) => {
                    diagnostics.push(Diagnostic::fatal(format!("{}: {e}", draft.name), draft.span));
                    ok = false;
                }
            }
        }
    }
    ok.then_some(production)
}

/// Structural checks on one production.
fn validate(
    production: &Production,
    name: &str,
    span: Option<SourceSpan>,
    buffers: &Buffers,
    symbols: &Interner,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let mut fatal = |message: String| diagnostics.push(Diagnostic::fatal(format!("{name}: {message}"), span));

    for clause in production.conditions.iter().chain(&production.actions) {
        if let Some(buffer) = clause.buffer() {
            if !buffers.contains(buffer) {
                fatal(format!("unknown buffer {}", symbols.name(buffer)));
            }
        }
    }
    for clause in &production.conditions {
        if matches!(clause, Clause::Request { .. } | Clause::Clear(_)) {
            fatal("requests and clears belong on the action side".to_owned());
        }
    }
    let matched: HashSet<Symbol> = production.matched_buffers().collect();
    for clause in &production.actions {
        match clause {
            Clause::Match(p) if !matched.contains(&p.buffer) => {
                fatal(format!("modifies {} without matching it", symbols.name(p.buffer)));
            }
            Clause::Query(_) => fatal("queries belong on the condition side".to_owned()),
            _ => {}
        }
    }

    let mut bound = production.bound_variables();
    for clause in &production.conditions {
        let needs: BTreeSet<Symbol> = match clause {
            Clause::Match(p) | Clause::Query(p) => p
                .slots
                .iter()
                .filter(|s| s.op != SlotOp::Eq)
                .filter_map(|s| s.value.var())
                .collect(),
            Clause::Special(Special::Bind { var, .. }) => {
                clause.variables().into_iter().filter(|v| v != var).collect()
            }
            other => other.variables(),
        };
        for var in needs.difference(&bound) {
            fatal(format!("variable {} is never bound", symbols.name(*var)));
        }
    }
    for clause in &production.actions {
        if let Clause::Special(Special::Bind { var, .. }) = clause {
            let needs: BTreeSet<Symbol> = clause.variables().into_iter().filter(|v| v != var).collect();
            for missing in needs.difference(&bound) {
                fatal(format!("variable {} is never bound", symbols.name(*missing)));
            }
            bound.insert(*var);
            continue;
        }
        for var in clause.variables().difference(&bound) {
            fatal(format!("variable {} is never bound", symbols.name(*var)));
        }
    }
}

/// Apply `:u`, `:p`, `:reward` or `:break` to one production.
pub(crate) fn apply_production_parameter(production: &mut Production, key: &str, token: &str) -> Result<()> {
    let value = ParamValue::parse(token);
    match key {
        ":u" => production.utility = value.as_number(key)?,
        ":p" => production.firing_probability = value.as_number(key)?.clamp(0.0, 1.0),
        ":reward" => production.reward = value.as_optional_number(key)?,
        ":break" => production.breakpoint = value.as_bool(key)?,
        _ => {
            return Err(CogzError::Parameter {
                key: key.to_owned(),
                reason: "unrecognized production parameter".to_owned(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(result: Result<Model>) -> Vec<String> {
        match result {
            Err(CogzError::Compile(diagnostics)) => {
                diagnostics.into_iter().filter(|d| d.fatal).map(|d| d.message).collect()
            }
            Err(other) => vec![other.to_string()],
            Ok(_) => Vec::new(),
        }
    }

    #[test]
    fn builds_a_minimal_model() {
        let model = ModelBuilder::new()
            .chunk("g", "state start")
            .goal("g")
            .add_production(
                ProductionDraft::new("go")
                    .when("=goal>", "state start")
                    .then("=goal>", "state done"),
            )
            .build()
            .expect("model");
        assert_eq!(model.procedural().len(), 1);
        assert_eq!(model.buffer_slot("goal", "state"), Some("start"));
        // `start` names no chunk, so it was created with a warning
        assert!(model.diagnostics().iter().any(|d| d.message.contains("start")));
    }

    #[test]
    fn unknown_parameters_are_warnings() {
        let model = ModelBuilder::new().parameter(":no-such-key", "1").build().expect("model");
        assert_eq!(model.diagnostics().len(), 1);
        assert!(!model.diagnostics()[0].fatal);
    }

    #[test]
    fn structural_errors_are_fatal() {
        let unbound = ModelBuilder::new().add_production(
            ProductionDraft::new("p")
                .when("=goal>", "state start")
                .then("=goal>", "value =x")
                .at(3, 40),
        );
        let errors = messages(unbound.build());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("=x"));

        let unmatched = ModelBuilder::new().add_production(
            ProductionDraft::new("p")
                .when("=goal>", "state start")
                .then("=imaginal>", "value 1"),
        );
        assert!(messages(unmatched.build())[0].contains("without matching"));

        let duplicate = ModelBuilder::new()
            .add_production(ProductionDraft::new("p").when("=goal>", "a 1"))
            .add_production(ProductionDraft::new("p").when("=goal>", "a 2"));
        assert!(messages(duplicate.build())[0].contains("duplicate"));

        let unknown_buffer =
            ModelBuilder::new().add_production(ProductionDraft::new("p").when("=nowhere>", "a 1"));
        assert!(messages(unknown_buffer.build())[0].contains("unknown buffer"));
    }

    #[test]
    fn bind_targets_count_as_bound() {
        let model = ModelBuilder::new()
            .add_production(
                ProductionDraft::new("p")
                    .when("=goal>", "n =n")
                    .when("!bind!", "=m (+ =n 1)")
                    .then("=goal>", "n =m"),
            )
            .build();
        assert!(model.is_ok());
    }

    #[test]
    fn production_parameters_apply() {
        let model = ModelBuilder::new()
            .add_production(ProductionDraft::new("p").when("=goal>", "a 1"))
            .production_parameter("p", ":u", "2.5")
            .production_parameter("p", ":break", "t")
            .build()
            .expect("model");
        let p = model.production("p").expect("production");
        assert!((p.utility - 2.5).abs() < 1e-12);
        assert!(p.breakpoint);
    }
}
