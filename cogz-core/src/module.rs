//! The contract for perceptual and motor modules.
//!
//! Declarative, goal, imaginal and procedural behavior is built into the
//! model. Everything else (vision, audition, manual, vocal, temporal) is a
//! [`Module`] registered with the builder. The model calls
//! [`Module::update`] on every cycle in fixed kind order and routes
//! [`EventAction::Module`] events back to [`Module::on_event`].
//!
//! A module serves its buffers' requests: a pending request is a chunk with
//! `is_request` set, left in the buffer by the firing production with the
//! buffer's status at `state busy`.

use crate::buffer::Buffers;
use crate::chunk::Chunk;
use crate::event::{Event, EventAction, EventQueue, ModuleKind, Time};
use crate::symbol::{Interner, Symbol, sym};
use crate::task::Task;
use crate::trace::{TraceRecord, TraceSink};

/// What a module may touch while it runs.
pub struct ModuleContext<'a> {
    /// Current simulated time.
    pub now: Time,
    /// The module being called.
    pub kind: ModuleKind,
    /// Model buffers.
    pub buffers: &'a mut Buffers,
    /// Event schedule.
    pub events: &'a mut EventQueue,
    /// Interner.
    pub symbols: &'a mut Interner,
    /// The task, if one is attached.
    pub task: Option<&'a mut (dyn Task + 'static)>,
    /// Simulation trace.
    pub trace: &'a mut dyn TraceSink,
    /// Whether trace records are written (`:trace`).
    pub tracing: bool,
}

impl ModuleContext<'_> {
    /// Schedule an event routed back to this module's `on_event`.
    pub fn schedule(&mut self, delay: Time, description: impl Into<String>, token: u64) {
        self.events.schedule(Event::new(
            self.now + delay,
            self.kind,
            description,
            EventAction::Module {
                kind: self.kind,
                token,
            },
        ));
    }

    /// Write a trace record attributed to this module, if tracing is on.
    pub fn trace(&mut self, description: impl Into<String>) {
        if !self.tracing {
            return;
        }
        self.trace.record(TraceRecord {
            time: self.now,
            module: self.kind,
            description: description.into(),
        });
    }

    /// Take the pending request from `buffer`. The buffer stays
    /// busy/requested until [`complete`](Self::complete). `None` if the
    /// buffer holds no request.
    pub fn take_request(&mut self, buffer: Symbol) -> Option<Chunk> {
        self.buffers.take_request(buffer)
    }

    /// Finish a request: mark `buffer` free again, filling it with `result`
    /// or leaving it empty.
    pub fn complete(&mut self, buffer: Symbol, result: Option<Chunk>) {
        match result {
            Some(chunk) => self.buffers.set(buffer, chunk, self.now),
            None => {
                self.buffers.set_status(buffer, sym::STATE, sym::FREE);
                self.buffers.set_status(buffer, sym::BUFFER, sym::EMPTY);
            }
        }
    }
}

/// A perceptual or motor module.
pub trait Module {
    /// Which module this is; fixes its place in the update order.
    fn kind(&self) -> ModuleKind;

    /// Names of the buffers this module owns.
    fn buffers(&self) -> &[&'static str];

    /// Called once per cycle.
    fn update(&mut self, ctx: &mut ModuleContext<'_>);

    /// Called when one of this module's events comes due.
    fn on_event(&mut self, _token: u64, _ctx: &mut ModuleContext<'_>) {}
}
