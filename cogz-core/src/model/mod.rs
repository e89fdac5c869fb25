//! The model: owner of every component and driver of the cycle.
//!
//! A model is built once with [`ModelBuilder`] and then advanced with
//! [`Model::step`], [`Model::run`] or [`Model::run_until_idle`]. Each step
//! pops one event and then gives every module a chance to react, in a fixed
//! order:
//!
//! ```text
//! event → task → vision → audition → manual → vocal → temporal
//!       → declarative → imaginal → procedural
//! ```
//!
//! Procedural runs last so conflict resolution sees every buffer change made
//! at the current time.

mod builder;
mod cycle;
mod realtime;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::buffer::Buffers;
use crate::chunk::{Chunk, ChunkTypes};
use crate::config::{CogzConfig, ParamValue};
use crate::declarative::DeclarativeMemory;
use crate::error::{Diagnostic, Result};
use crate::event::{Event, EventAction, EventQueue, ModuleKind, Time};
use crate::module::Module;
use crate::procedural::{Procedural, Production};
use crate::symbol::{Interner, Symbol};
use crate::task::{Task, TaskContext};
use crate::trace::{TraceRecord, TraceSink};

pub use builder::{ModelBuilder, ProductionDraft};

/// Why a run returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// Nothing left to do.
    Idle,
    /// The requested duration elapsed.
    TimeLimit,
    /// A stop was requested (stop handle, `!stop!`, or the task).
    Stopped,
    /// A production with a breakpoint was selected; it fires on resume.
    Breakpoint(String),
}

/// Counters accumulated over the model's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Productions fired.
    pub fired: u64,
    /// Retrieval requests serviced.
    pub retrievals: u64,
    /// Retrievals that failed.
    pub retrieval_failures: u64,
    /// Conflict resolutions below the utility threshold.
    pub micro_lapses: u64,
    /// Productions created by compilation.
    pub compilations: u64,
    /// Existing productions reinforced by compilation.
    pub reinforcements: u64,
    /// Events executed.
    pub events: u64,
}

/// Cross-thread stop request for a running model.
///
/// Cloning shares the flag. [`StopHandle::stop`] also wakes a model that is
/// waiting on the wall clock in [`Model::run_realtime`].
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopHandle {
    /// Request a stop at the next opportunity.
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Whether a stop is pending.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// A runnable cognitive model.
pub struct Model {
    pub(crate) config: CogzConfig,
    pub(crate) symbols: Interner,
    pub(crate) events: EventQueue,
    pub(crate) buffers: Buffers,
    pub(crate) declarative: DeclarativeMemory,
    pub(crate) procedural: Procedural,
    pub(crate) types: ChunkTypes,
    pub(crate) modules: Vec<Box<dyn Module>>,
    pub(crate) task: Option<Box<dyn Task>>,
    pub(crate) trace: Box<dyn TraceSink>,
    pub(crate) rng: StdRng,
    pub(crate) time: Time,
    pub(crate) stop: StopHandle,
    pub(crate) halt: Option<RunOutcome>,
    pub(crate) stats: RunStats,
    pub(crate) started: bool,
    pub(crate) lapse_pending: bool,
    pub(crate) decaying: Vec<Symbol>,
    pub(crate) harvest_exempt: Vec<Symbol>,
    pub(crate) pending_reward: Option<f64>,
    pub(crate) diagnostics: Vec<Diagnostic>,
}

impl Model {
    pub(crate) fn rng_for(config: &CogzConfig) -> StdRng {
        match config.general.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    // -----------------------------------------------------------------------
    // Running
    // -----------------------------------------------------------------------

    /// Run for `duration` simulated seconds.
    pub fn run(&mut self, duration: Time) -> RunOutcome {
        let end = self.time + duration;
        self.start();
        loop {
            if let Some(outcome) = self.interruption() {
                return outcome;
            }
            match self.events.peek_time() {
                None => return RunOutcome::Idle,
                Some(next) if next > end => {
                    self.time = end;
                    return RunOutcome::TimeLimit;
                }
                Some(_) => {
                    self.step();
                }
            }
        }
    }

    /// Run until nothing is left to do.
    ///
    /// A queue holding nothing but a micro-lapse retry counts as idle, since
    /// such a model would otherwise lapse forever.
    pub fn run_until_idle(&mut self) -> RunOutcome {
        self.start();
        loop {
            if let Some(outcome) = self.interruption() {
                return outcome;
            }
            if self.events.is_empty() || (self.lapse_pending && self.events.len() == 1) {
                return RunOutcome::Idle;
            }
            self.step();
        }
    }

    /// Execute one event and the module updates that follow it. Returns
    /// `false` when the queue was empty.
    pub fn step(&mut self) -> bool {
        self.start();
        let Some(event) = self.events.pop_earliest() else {
            return false;
        };
        self.time = self.time.max(event.time);
        self.stats.events += 1;
        if self.config.general.trace && !event.description.is_empty() {
            self.trace.record(TraceRecord {
                time: self.time,
                module: event.module,
                description: event.description,
            });
        }
        self.execute(event.action);
        self.update_task();
        self.update_modules();
        self.update_declarative();
        self.update_imaginal();
        self.deliver_reward();
        if self.halt.is_none() && !self.events.exists(ModuleKind::Procedural, None) {
            self.conflict_resolution();
        }
        true
    }

    fn interruption(&mut self) -> Option<RunOutcome> {
        if self.stop.is_stopped() {
            self.stop.reset();
            info!(time = self.time, "run stopped");
            return Some(RunOutcome::Stopped);
        }
        self.halt.take()
    }

    fn start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        if let Some(task) = self.task.as_mut() {
            let mut stop = false;
            let mut ctx = TaskContext {
                now: self.time,
                buffers: &mut self.buffers,
                events: &mut self.events,
                symbols: &mut self.symbols,
                reward: &mut self.pending_reward,
                stop: &mut stop,
            };
            task.start(&mut ctx);
            if stop {
                self.halt = Some(RunOutcome::Stopped);
            }
        }
        self.events.schedule(Event::new(
            self.time,
            ModuleKind::Procedural,
            "conflict-resolution",
            EventAction::ConflictResolution,
        ));
    }

    /// Handle for stopping this model from elsewhere.
    #[must_use]
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Deliver a reward to every firing in the learning window.
    pub fn trigger_reward(&mut self, reward: f64) {
        self.pending_reward = Some(self.pending_reward.unwrap_or(0.0) + reward);
        self.deliver_reward();
    }

    /// Schedule an arbitrary event.
    pub fn schedule(&mut self, event: Event) {
        self.events.schedule(event);
    }

    // -----------------------------------------------------------------------
    // Parameters
    // -----------------------------------------------------------------------

    /// Set a global parameter by key (`:rt`, `:egs`, ...).
    ///
    /// # Errors
    /// Returns `CogzError::Parameter` for an unknown key or a bad value.
    pub fn set_parameter(&mut self, key: &str, token: &str) -> Result<()> {
        self.config.apply_parameter(key, &ParamValue::parse(token))?;
        match key {
            ":fp" => self.procedural.reset_fatigue(self.config.fatigue.utility_scale),
            ":seed" => self.rng = Self::rng_for(&self.config),
            _ => {}
        }
        Ok(())
    }

    /// Set `:u`, `:p`, `:reward` or `:break` on one production.
    ///
    /// # Errors
    /// Returns `CogzError::ProductionNotFound` or `CogzError::Parameter`.
    pub fn set_production_parameter(&mut self, production: &str, key: &str, token: &str) -> Result<()> {
        let index = self
            .symbols
            .get(production)
            .and_then(|name| self.procedural.find(name))
            .ok_or_else(|| crate::error::CogzError::ProductionNotFound(production.to_owned()))?;
        let Some(p) = self.procedural.get_mut(index) else {
            return Err(crate::error::CogzError::ProductionNotFound(production.to_owned()));
        };
        builder::apply_production_parameter(p, key, token)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Current simulated time.
    #[must_use]
    pub fn time(&self) -> Time {
        self.time
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &CogzConfig {
        &self.config
    }

    /// Symbol table.
    #[must_use]
    pub fn symbols(&self) -> &Interner {
        &self.symbols
    }

    /// Mutable symbol table.
    pub fn symbols_mut(&mut self) -> &mut Interner {
        &mut self.symbols
    }

    /// Buffers.
    #[must_use]
    pub fn buffers(&self) -> &Buffers {
        &self.buffers
    }

    /// Mutable buffers.
    pub fn buffers_mut(&mut self) -> &mut Buffers {
        &mut self.buffers
    }

    /// Chunk held by the buffer named `buffer`.
    #[must_use]
    pub fn buffer_chunk(&self, buffer: &str) -> Option<&Chunk> {
        self.symbols.get(buffer).and_then(|b| self.buffers.get(b))
    }

    /// Slot value (by name) of the chunk in `buffer`.
    #[must_use]
    pub fn buffer_slot(&self, buffer: &str, slot: &str) -> Option<&str> {
        let buffer = self.symbols.get(buffer)?;
        let slot = self.symbols.get(slot)?;
        self.buffers
            .get_slot(buffer, slot)
            .map(|value| self.symbols.name(value))
    }

    /// Declarative memory.
    #[must_use]
    pub fn declarative(&self) -> &DeclarativeMemory {
        &self.declarative
    }

    /// Mutable declarative memory.
    pub fn declarative_mut(&mut self) -> &mut DeclarativeMemory {
        &mut self.declarative
    }

    /// Procedural memory.
    #[must_use]
    pub fn procedural(&self) -> &Procedural {
        &self.procedural
    }

    /// Production by name.
    #[must_use]
    pub fn production(&self, name: &str) -> Option<&Production> {
        self.symbols.get(name).and_then(|n| self.procedural.by_name(n))
    }

    /// Chunk type hierarchy.
    #[must_use]
    pub fn types(&self) -> &ChunkTypes {
        &self.types
    }

    /// Run statistics.
    #[must_use]
    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Non-fatal diagnostics collected while building.
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// The attached task.
    #[must_use]
    pub fn task(&self) -> Option<&dyn Task> {
        self.task.as_deref()
    }

    /// Detach the task (for batch analysis after a run).
    pub fn take_task(&mut self) -> Option<Box<dyn Task>> {
        self.task.take()
    }

    /// Pending events.
    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    pub(crate) fn warn(&mut self, module: ModuleKind, message: String) {
        warn!(time = self.time, module = %module, "{message}");
        if self.config.general.trace {
            self.trace.record(TraceRecord {
                time: self.time,
                module,
                description: format!("warning: {message}"),
            });
        }
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("time", &self.time)
            .field("events", &self.events.len())
            .field("productions", &self.procedural.len())
            .field("chunks", &self.declarative.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
