//! One cycle: event execution, production firing, and the built-in goal,
//! declarative and imaginal modules.

use rand::Rng;
use tracing::debug;

use crate::chunk::{Chunk, SlotConstraint, SlotOp};
use crate::declarative::{ActivationContext, SpreadingSource};
use crate::event::{Event, EventAction, ModuleKind, Time};
use crate::module::ModuleContext;
use crate::procedural::special;
use crate::procedural::{
    BufferPattern, Clause, CompileOutcome, Instantiation, MatchContext, Production, Selection,
    Special, Term,
};
use crate::procedural::Bindings;
use crate::symbol::{Symbol, sym};
use crate::task::TaskContext;
use crate::trace::TraceRecord;

use super::{Model, RunOutcome};

impl Model {
    pub(super) fn execute(&mut self, action: EventAction) {
        match action {
            EventAction::ConflictResolution => self.lapse_pending = false,
            EventAction::Fire(inst) => self.fire(*inst),
            EventAction::RetrievalComplete { chunk, activation } => {
                self.complete_retrieval(chunk, activation);
            }
            EventAction::ImaginalComplete(chunk) => {
                self.buffers.set(sym::IMAGINAL, chunk, self.time);
            }
            EventAction::Module { kind, token } => self.route_module_event(kind, token),
            EventAction::Callback(callback) => callback(self),
            EventAction::TaskUpdate | EventAction::Marker => {}
        }
    }

    fn trace_event(&mut self, module: ModuleKind, description: String) {
        if self.config.general.trace {
            self.trace.record(TraceRecord {
                time: self.time,
                module,
                description,
            });
        }
    }

    // -----------------------------------------------------------------------
    // Conflict resolution
    // -----------------------------------------------------------------------

    pub(super) fn conflict_resolution(&mut self) {
        let candidates = self.matching_instantiations();
        match self.procedural.select(candidates, &self.config, &mut self.rng) {
            Selection::Nothing => {}
            Selection::Lapse { best } => {
                self.stats.micro_lapses += 1;
                debug!(time = self.time, best, "micro-lapse");
                self.trace_event(ModuleKind::Procedural, "micro-lapse".to_owned());
                let delay = self.config.procedural.action_time;
                self.events.schedule(Event::new(
                    self.time + delay,
                    ModuleKind::Procedural,
                    "conflict-resolution",
                    EventAction::ConflictResolution,
                ));
                self.lapse_pending = true;
            }
            Selection::Fire(mut inst) => {
                let Some(production) = self.procedural.get(inst.production) else {
                    return;
                };
                let name = self.symbols.name(production.name).to_owned();
                let breakpoint = production.breakpoint;
                let delay = self.action_time();
                inst.time = self.time + delay;
                self.trace_event(ModuleKind::Procedural, format!("production-selected {name}"));
                self.events.schedule(Event::new(
                    inst.time,
                    ModuleKind::Procedural,
                    format!("production-fired {name}"),
                    EventAction::Fire(Box::new(inst)),
                ));
                if breakpoint {
                    self.halt = Some(RunOutcome::Breakpoint(name));
                }
            }
        }
    }

    fn action_time(&mut self) -> Time {
        let base = self.config.procedural.action_time;
        if self.config.procedural.randomize_time {
            base * self.rng.gen_range(2.0 / 3.0..=4.0 / 3.0)
        } else {
            base
        }
    }

    /// Instantiations against the exposed goal; with several goals, the
    /// least recently selected goal that yields any match.
    fn matching_instantiations(&mut self) -> Vec<Instantiation> {
        if self.buffers.goal_count() <= 1 {
            let thread = self.buffers.current_thread();
            let mut found = self.match_exposed_goal();
            for inst in &mut found {
                inst.thread = thread;
            }
            return found;
        }
        let original = self.buffers.current_goal_index();
        for index in self.buffers.sort_goals() {
            self.buffers.try_goal(index);
            let mut found = self.match_exposed_goal();
            if !found.is_empty() {
                self.buffers.mark_selected(self.time);
                let thread = self.buffers.current_thread();
                for inst in &mut found {
                    inst.thread = thread;
                }
                return found;
            }
        }
        self.buffers.try_goal(original);
        Vec::new()
    }

    fn match_exposed_goal(&mut self) -> Vec<Instantiation> {
        let mut ctx = MatchContext {
            buffers: &self.buffers,
            types: &self.types,
            symbols: &mut self.symbols,
            task: self.task.as_deref_mut(),
            fuzzy: self.config.procedural.fuzzy_matching,
        };
        self.procedural.find_instantiations(&mut ctx)
    }

    // -----------------------------------------------------------------------
    // Firing
    // -----------------------------------------------------------------------

    fn fire(&mut self, inst: Instantiation) {
        let Some(production) = self.procedural.get(inst.production).cloned() else {
            self.warn(ModuleKind::Procedural, format!("no production at index {}", inst.production));
            return;
        };
        if let Some(thread) = inst.thread {
            self.buffers.select_thread(thread);
        }

        for buffer in production.matched_buffers() {
            if !production.targets(buffer) && !self.harvest_exempt.contains(&buffer) {
                self.clear_and_store(buffer);
            }
        }

        let mut bindings = inst.bindings.clone();
        for action in &production.actions {
            self.apply_action(&production, action, &mut bindings);
        }

        self.stats.fired += 1;
        if let Some(reward) =
            self.procedural
                .record_firing(inst.production, self.time, &self.config.procedural)
        {
            self.pending_reward = Some(self.pending_reward.unwrap_or(0.0) + reward);
        }

        match self
            .procedural
            .compile_with_previous(&inst, self.time, &self.config, &mut self.symbols)
        {
            Some(CompileOutcome::Added(index)) => {
                self.stats.compilations += 1;
                if let Some(p) = self.procedural.get(index) {
                    let name = self.symbols.name(p.name).to_owned();
                    self.trace_event(ModuleKind::Procedural, format!("production-compiled {name}"));
                }
            }
            Some(CompileOutcome::Reinforced(_)) => self.stats.reinforcements += 1,
            Some(CompileOutcome::Vetoed(_)) | None => {}
        }
    }

    fn apply_action(&mut self, production: &Production, action: &Clause, bindings: &mut Bindings) {
        match action {
            Clause::Match(pattern) => self.modify(production, pattern, bindings),
            Clause::Request { pattern, copy } => {
                if let Some(chunk) = self.build_request(production, pattern, *copy, bindings) {
                    self.request(pattern.buffer, chunk);
                }
            }
            Clause::Clear(buffer) => self.clear_and_store(*buffer),
            Clause::Query(_) => {}
            Clause::Special(clause) => self.run_special(production, clause, bindings),
        }
    }

    fn resolve(&mut self, production: &Production, term: Term, bindings: &Bindings) -> Option<Symbol> {
        let value = term.resolve(bindings);
        if value.is_none() {
            let message = format!(
                "unbound variable {} in {}",
                self.symbols.name(term.symbol()),
                self.symbols.name(production.name)
            );
            self.warn(ModuleKind::Procedural, message);
        }
        value
    }

    fn modify(&mut self, production: &Production, pattern: &BufferPattern, bindings: &Bindings) {
        if self.buffers.get_filled(pattern.buffer).is_none() {
            let message = format!(
                "{} modifies empty buffer {}",
                self.symbols.name(production.name),
                self.symbols.name(pattern.buffer)
            );
            self.warn(ModuleKind::Procedural, message);
            return;
        }
        for spec in &pattern.slots {
            if let Some(value) = self.resolve(production, spec.value, bindings) {
                self.buffers.set_slot(pattern.buffer, spec.slot, value, self.time);
            }
        }
    }

    fn build_request(
        &mut self,
        production: &Production,
        pattern: &BufferPattern,
        copy: Option<Term>,
        bindings: &Bindings,
    ) -> Option<Chunk> {
        if let Some(term) = copy {
            let source = self.resolve(production, term, bindings)?;
            let original = self
                .declarative
                .get(source)
                .cloned()
                .or_else(|| {
                    self.buffers
                        .names()
                        .filter_map(|b| self.buffers.get_filled(b))
                        .find(|c| c.name == source)
                        .cloned()
                });
            let Some(original) = original else {
                let message = format!("copy of unknown chunk {}", self.symbols.name(source));
                self.warn(ModuleKind::Procedural, message);
                return None;
            };
            let base = self.symbols.name(original.name).to_owned();
            let mut chunk = Chunk::new(self.symbols.fresh(&format!("{base}-")));
            chunk.slots = original.slots;
            return Some(chunk);
        }

        let base = match pattern.value_of(sym::ISA) {
            Some(Term::Const(ty)) => self.symbols.name(ty).to_owned(),
            _ => self.symbols.name(pattern.buffer).to_owned(),
        };
        let mut chunk = Chunk::new(self.symbols.fresh(&base));
        for spec in &pattern.slots {
            let Some(value) = self.resolve(production, spec.value, bindings) else {
                continue;
            };
            if spec.op == SlotOp::Eq && value != sym::NIL {
                chunk.set(spec.slot, value);
            } else {
                chunk.constraints.push(SlotConstraint {
                    slot: spec.slot,
                    op: spec.op,
                    value,
                });
            }
        }
        Some(chunk)
    }

    /// Hand a request to the module owning `buffer`.
    fn request(&mut self, buffer: Symbol, mut chunk: Chunk) {
        match self.buffers.module_of(buffer) {
            Some(ModuleKind::Goal) => {
                chunk.is_request = false;
                let name = self.symbols.name(chunk.name).to_owned();
                if self.config.general.threaded_cognition {
                    let thread = self.buffers.add_goal(chunk, self.time);
                    debug!(%thread, goal = %name, "new goal thread");
                } else {
                    self.clear_and_store(sym::GOAL);
                    self.buffers.set(sym::GOAL, chunk, self.time);
                }
                self.trace_event(ModuleKind::Goal, format!("set-buffer-chunk goal {name}"));
            }
            Some(kind @ (ModuleKind::Declarative | ModuleKind::Imaginal)) => {
                self.clear_and_store(buffer);
                chunk.is_request = true;
                self.buffers.set(buffer, chunk, self.time);
                debug!(module = %kind, "request queued");
            }
            Some(kind) if self.modules.iter().any(|m| m.kind() == kind) => {
                self.clear_and_store(buffer);
                chunk.is_request = true;
                self.buffers.set(buffer, chunk, self.time);
            }
            Some(kind) => {
                self.warn(kind, format!("no {kind} module serves {}", self.symbols.name(buffer)));
                self.buffers.set_error(buffer);
            }
            None => {
                let message = format!("request to unknown buffer {}", self.symbols.name(buffer));
                self.warn(ModuleKind::Procedural, message);
            }
        }
    }

    fn run_special(&mut self, production: &Production, clause: &Special, bindings: &mut Bindings) {
        match clause {
            Special::Bind { var, expr } => {
                let value = special::bind_value(expr, bindings, &mut self.symbols, self.task.as_deref_mut());
                match value {
                    Some(value) => {
                        bindings.insert(*var, value);
                    }
                    None => {
                        let message = format!(
                            "!bind! {} in {} could not be evaluated",
                            expr.render(&self.symbols),
                            self.symbols.name(production.name)
                        );
                        self.warn(ModuleKind::Procedural, message);
                    }
                }
            }
            Special::Eval(expr) => {
                if !special::run_effect(expr, bindings, &mut self.symbols, self.task.as_deref_mut()) {
                    let message = format!("!eval! {} was not handled", expr.render(&self.symbols));
                    self.warn(ModuleKind::Procedural, message);
                }
            }
            Special::Output(terms) => {
                let text = special::render_output(terms, bindings, &self.symbols);
                self.trace.line(&text);
            }
            Special::Stop => {
                self.halt = Some(RunOutcome::Stopped);
            }
        }
    }

    /// Clear `buffer`, storing a real chunk into declarative memory.
    pub(super) fn clear_and_store(&mut self, buffer: Symbol) {
        if let Some(chunk) = self.buffers.clear(buffer, &mut self.events) {
            self.store(chunk);
        }
    }

    fn store(&mut self, chunk: Chunk) {
        let config = &self.config.declarative;
        let keep_history = config.base_level_decay.is_some() && !config.optimized_learning;
        let outcome = self.declarative.add(
            chunk,
            config.merge_chunks,
            self.time,
            keep_history,
            &mut self.symbols,
        );
        if let Some(old) = outcome.merged_from {
            let rewritten = self.buffers.rewrite(old, outcome.name);
            debug!(
                old = %self.symbols.display(old),
                new = %self.symbols.display(outcome.name),
                rewritten,
                "merged into existing chunk"
            );
        }
    }

    // -----------------------------------------------------------------------
    // Module updates
    // -----------------------------------------------------------------------

    pub(super) fn update_task(&mut self) {
        let Some(task) = self.task.as_mut() else {
            return;
        };
        let mut stop = false;
        let mut ctx = TaskContext {
            now: self.time,
            buffers: &mut self.buffers,
            events: &mut self.events,
            symbols: &mut self.symbols,
            reward: &mut self.pending_reward,
            stop: &mut stop,
        };
        task.update(self.time, &mut ctx);
        if stop {
            self.halt.get_or_insert(RunOutcome::Stopped);
        }
    }

    pub(super) fn update_modules(&mut self) {
        let mut modules = std::mem::take(&mut self.modules);
        for module in &mut modules {
            let mut ctx = self.module_context(module.kind());
            module.update(&mut ctx);
        }
        self.modules = modules;
    }

    fn route_module_event(&mut self, kind: ModuleKind, token: u64) {
        let mut modules = std::mem::take(&mut self.modules);
        match modules.iter_mut().find(|m| m.kind() == kind) {
            Some(module) => {
                let mut ctx = self.module_context(kind);
                module.on_event(token, &mut ctx);
            }
            None => debug!(module = %kind, token, "event for unregistered module"),
        }
        self.modules = modules;
    }

    fn module_context(&mut self, kind: ModuleKind) -> ModuleContext<'_> {
        ModuleContext {
            now: self.time,
            kind,
            buffers: &mut self.buffers,
            events: &mut self.events,
            symbols: &mut self.symbols,
            task: self.task.as_deref_mut(),
            trace: self.trace.as_mut(),
            tracing: self.config.general.trace,
        }
    }

    /// Serve a pending retrieval request, decay stale buffers and age finsts.
    pub(super) fn update_declarative(&mut self) {
        if let Some(request) = self.buffers.take_request(sym::RETRIEVAL) {
            self.start_retrieval(&request);
        }
        if let Some(lifetime) = self.config.buffers.decay_lifetime {
            let cleared = self
                .buffers
                .decay(self.time, lifetime, &self.decaying, &mut self.events);
            for buffer in cleared {
                debug!(buffer = %self.symbols.display(buffer), "buffer decayed");
            }
        }
        self.declarative.prune_finsts(self.time, &self.config.declarative);
    }

    fn start_retrieval(&mut self, request: &Chunk) {
        let sources = self.spreading_sources();
        let ctx = ActivationContext {
            now: self.time,
            config: &self.config.declarative,
            sources: &sources,
        };
        let retrieval = self.declarative.find_retrieval(
            request,
            &ctx,
            &self.types,
            &mut self.symbols,
            &mut self.rng,
        );
        self.stats.retrievals += 1;
        self.trace_event(ModuleKind::Declarative, "start-retrieval".to_owned());
        if self.config.general.activation_trace {
            for candidate in &retrieval.candidates {
                let a = candidate.activation;
                let line = format!(
                    "  chunk {} activation {:.3} (base {:.3} spread {:.3} partial {:.3} noise {:.3})",
                    self.symbols.name(candidate.name),
                    a.total(),
                    a.base_level,
                    a.spreading,
                    a.partial_match,
                    a.noise
                );
                self.trace.line(&line);
            }
        }
        let description = match retrieval.chunk {
            Some(name) => format!("retrieved-chunk {}", self.symbols.name(name)),
            None => "retrieval-failure".to_owned(),
        };
        self.events.schedule(Event::new(
            self.time + retrieval.latency,
            ModuleKind::Declarative,
            description,
            EventAction::RetrievalComplete {
                chunk: retrieval.chunk,
                activation: retrieval.activation,
            },
        ));
    }

    /// Spreading sources: the slot values of the goal and imaginal chunks,
    /// each buffer's source activation split evenly across its values.
    fn spreading_sources(&self) -> Vec<SpreadingSource> {
        if self.config.declarative.max_associative_strength.is_none() {
            return Vec::new();
        }
        let weights = [
            (sym::GOAL, self.config.declarative.goal_activation),
            (sym::IMAGINAL, self.config.declarative.imaginal_activation),
        ];
        let mut sources = Vec::new();
        for (buffer, weight) in weights {
            if weight == 0.0 {
                continue;
            }
            let Some(chunk) = self.buffers.get_filled(buffer) else {
                continue;
            };
            let values: Vec<Symbol> = chunk
                .slots
                .iter()
                .filter(|&(&slot, _)| slot != sym::ISA)
                .map(|(_, &value)| value)
                .collect();
            if values.is_empty() {
                continue;
            }
            let share = weight / values.len() as f64;
            sources.extend(values.into_iter().map(|value| SpreadingSource {
                value,
                weight: share,
                fan: self.declarative.fan(value),
            }));
        }
        sources
    }

    fn complete_retrieval(&mut self, chunk: Option<Symbol>, activation: f64) {
        let found = chunk.and_then(|name| self.declarative.get(name).cloned());
        match found {
            Some(mut retrieved) => {
                debug!(chunk = %self.symbols.display(retrieved.name), activation, "retrieved");
                retrieved.is_request = false;
                retrieved.constraints.clear();
                let name = retrieved.name;
                self.buffers.set(sym::RETRIEVAL, retrieved, self.time);
                self.declarative
                    .mark_retrieved(name, self.time, &self.config.declarative);
            }
            None => {
                debug!(activation, "retrieval failed");
                self.stats.retrieval_failures += 1;
                self.buffers.set_error(sym::RETRIEVAL);
            }
        }
    }

    /// Serve a pending imaginal request after the imaginal delay.
    pub(super) fn update_imaginal(&mut self) {
        let Some(mut chunk) = self.buffers.take_request(sym::IMAGINAL) else {
            return;
        };
        chunk.is_request = false;
        chunk.constraints.clear();
        let description = format!("set-buffer-chunk imaginal {}", self.symbols.name(chunk.name));
        self.events.schedule(Event::new(
            self.time + self.config.buffers.imaginal_delay,
            ModuleKind::Imaginal,
            description,
            EventAction::ImaginalComplete(chunk),
        ));
    }

    pub(super) fn deliver_reward(&mut self) {
        let Some(reward) = self.pending_reward.take() else {
            return;
        };
        let updated =
            self.procedural
                .apply_reward(reward, self.time, self.config.procedural.learning_rate);
        debug!(reward, updated, "reward delivered");
        self.trace_event(ModuleKind::Procedural, format!("reward {reward}"));
    }
}
