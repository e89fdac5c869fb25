//! Discrete-event schedule.
//!
//! Events are kept in a binary min-heap ordered by:
//!
//! 1. time, ascending;
//! 2. module priority: at equal times `task` events come first, so an
//!    externally driven task stays ahead of architecture bookkeeping;
//! 3. insertion sequence (FIFO).
//!
//! The order is total, so a run with a fixed seed replays bit-identically.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::chunk::Chunk;
use crate::model::Model;
use crate::procedural::Instantiation;
use crate::symbol::Symbol;

/// Simulated time in seconds.
pub type Time = f64;

/// Owner of an event, and of the buffers a module serves.
///
/// The declaration order is the fixed per-cycle update order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleKind {
    /// The embedding task environment.
    Task,
    /// Visual perception.
    Vision,
    /// Auditory perception.
    Audition,
    /// Hand movements.
    Manual,
    /// Speech.
    Vocal,
    /// Time perception.
    Temporal,
    /// Declarative memory (retrieval buffer).
    Declarative,
    /// Imaginal (problem state) module.
    Imaginal,
    /// Goal module.
    Goal,
    /// Procedural memory.
    Procedural,
}

impl ModuleKind {
    /// All module kinds in update order.
    pub const ALL: [ModuleKind; 10] = [
        Self::Task,
        Self::Vision,
        Self::Audition,
        Self::Manual,
        Self::Vocal,
        Self::Temporal,
        Self::Declarative,
        Self::Imaginal,
        Self::Goal,
        Self::Procedural,
    ];

    /// Tie-break rank at equal times: task events first, everything else after.
    #[must_use]
    pub fn priority(self) -> u8 {
        match self {
            Self::Task => 0,
            _ => 1,
        }
    }

    /// Lowercase name used in traces.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Task => "task",
            Self::Vision => "vision",
            Self::Audition => "audition",
            Self::Manual => "manual",
            Self::Vocal => "vocal",
            Self::Temporal => "temporal",
            Self::Declarative => "declarative",
            Self::Imaginal => "imaginal",
            Self::Goal => "goal",
            Self::Procedural => "procedural",
        }
    }

    /// Parse a trace name back into a kind.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happens when an event comes due.
pub enum EventAction {
    /// Match productions and schedule the winner.
    ConflictResolution,
    /// Fire a previously selected instantiation.
    Fire(Box<Instantiation>),
    /// Deliver the outcome of a retrieval request (`None` = failure).
    RetrievalComplete {
        /// Retrieved chunk name.
        chunk: Option<Symbol>,
        /// Activation at request time.
        activation: f64,
    },
    /// Place a chunk built by the imaginal module.
    ImaginalComplete(Chunk),
    /// Route back to an external module's `on_event`.
    Module {
        /// Module to notify.
        kind: ModuleKind,
        /// Module-defined token.
        token: u64,
    },
    /// Call `Task::update` at this time.
    TaskUpdate,
    /// Arbitrary model mutation supplied by a task or test.
    Callback(Box<dyn FnOnce(&mut Model)>),
    /// No effect; still wakes the cycle.
    Marker,
}

impl fmt::Debug for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConflictResolution => f.write_str("ConflictResolution"),
            Self::Fire(inst) => f.debug_tuple("Fire").field(&inst.production).finish(),
            Self::RetrievalComplete { chunk, activation } => f
                .debug_struct("RetrievalComplete")
                .field("chunk", chunk)
                .field("activation", activation)
                .finish(),
            Self::ImaginalComplete(chunk) => {
                f.debug_tuple("ImaginalComplete").field(&chunk.name).finish()
            }
            Self::Module { kind, token } => f
                .debug_struct("Module")
                .field("kind", kind)
                .field("token", token)
                .finish(),
            Self::TaskUpdate => f.write_str("TaskUpdate"),
            Self::Callback(_) => f.write_str("Callback(..)"),
            Self::Marker => f.write_str("Marker"),
        }
    }
}

/// A timestamped, owned, cancellable action.
#[derive(Debug)]
pub struct Event {
    /// When the event comes due.
    pub time: Time,
    /// Owning module; cancellation and tie-breaking key on this.
    pub module: ModuleKind,
    /// Trace text; also the key for prefix-based lookup.
    pub description: String,
    /// What to do.
    pub action: EventAction,
}

impl Event {
    /// Create a new event.
    #[must_use]
    pub fn new(
        time: Time,
        module: ModuleKind,
        description: impl Into<String>,
        action: EventAction,
    ) -> Self {
        Self {
            time,
            module,
            description: description.into(),
            action,
        }
    }

    fn matches(&self, module: ModuleKind, prefix: Option<&str>) -> bool {
        self.module == module && prefix.is_none_or(|p| self.description.starts_with(p))
    }
}

struct Entry {
    time: OrderedFloat<f64>,
    priority: u8,
    sequence: u64,
    event: Event,
}

impl Entry {
    fn key(&self) -> (OrderedFloat<f64>, u8, u64) {
        (self.time, self.priority, self.sequence)
    }
}

// BinaryHeap is a max-heap; invert so the earliest key is popped first.
impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.key().cmp(&self.key())
    }
}

/// Total-order event schedule.
#[derive(Default)]
pub struct EventQueue {
    heap: BinaryHeap<Entry>,
    next_sequence: u64,
}

impl EventQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an event. Returns its insertion sequence number.
    pub fn schedule(&mut self, event: Event) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(Entry {
            time: OrderedFloat(event.time),
            priority: event.module.priority(),
            sequence,
            event,
        });
        sequence
    }

    /// Remove and return the earliest event.
    pub fn pop_earliest(&mut self) -> Option<Event> {
        self.heap.pop().map(|entry| entry.event)
    }

    /// Time of the earliest event.
    #[must_use]
    pub fn peek_time(&self) -> Option<Time> {
        self.heap.peek().map(|entry| entry.time.into_inner())
    }

    /// Whether any event is pending.
    #[must_use]
    pub fn has_any(&self) -> bool {
        !self.heap.is_empty()
    }

    /// Number of pending events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Whether an event owned by `module` (optionally with a description
    /// starting with `prefix`) is pending.
    #[must_use]
    pub fn exists(&self, module: ModuleKind, prefix: Option<&str>) -> bool {
        self.heap.iter().any(|entry| entry.event.matches(module, prefix))
    }

    /// Move every matching event to `new_time`, keeping their relative order.
    /// Returns how many events moved.
    pub fn reschedule(&mut self, module: ModuleKind, prefix: Option<&str>, new_time: Time) -> usize {
        let mut moved = 0;
        let entries = std::mem::take(&mut self.heap).into_vec();
        self.heap = entries
            .into_iter()
            .map(|mut entry| {
                if entry.event.matches(module, prefix) {
                    entry.event.time = new_time;
                    entry.time = OrderedFloat(new_time);
                    moved += 1;
                }
                entry
            })
            .collect();
        moved
    }

    /// Drop every matching event. Returns how many were cancelled.
    pub fn cancel_all(&mut self, module: ModuleKind, prefix: Option<&str>) -> usize {
        let before = self.heap.len();
        self.heap.retain(|entry| !entry.event.matches(module, prefix));
        before - self.heap.len()
    }

    /// Drop every event.
    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("pending", &self.heap.len())
            .field("next_sequence", &self.next_sequence)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(time: Time, module: ModuleKind, description: &str) -> Event {
        Event::new(time, module, description, EventAction::Marker)
    }

    #[test]
    fn pops_in_time_order() {
        let mut queue = EventQueue::new();
        for t in [3.0, 1.0, 2.0] {
            queue.schedule(marker(t, ModuleKind::Declarative, "x"));
        }
        let times: Vec<_> = std::iter::from_fn(|| queue.pop_earliest().map(|e| e.time)).collect();
        assert_eq!(times, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn task_events_win_ties() {
        let mut queue = EventQueue::new();
        queue.schedule(marker(1.0, ModuleKind::Vision, "vision"));
        queue.schedule(marker(1.0, ModuleKind::Task, "task"));
        assert_eq!(queue.pop_earliest().map(|e| e.module), Some(ModuleKind::Task));
        assert_eq!(queue.pop_earliest().map(|e| e.module), Some(ModuleKind::Vision));
    }

    #[test]
    fn equal_keys_pop_in_insertion_order() {
        let mut queue = EventQueue::new();
        for name in ["first", "second", "third"] {
            queue.schedule(marker(0.5, ModuleKind::Manual, name));
        }
        let order: Vec<_> =
            std::iter::from_fn(|| queue.pop_earliest().map(|e| e.description)).collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[test]
    fn cancel_is_scoped_to_module_and_prefix() {
        let mut queue = EventQueue::new();
        queue.schedule(marker(1.0, ModuleKind::Declarative, "retrieved-chunk a"));
        queue.schedule(marker(1.0, ModuleKind::Declarative, "finst-expire a"));
        queue.schedule(marker(1.0, ModuleKind::Imaginal, "retrieved-chunk b"));

        assert_eq!(queue.cancel_all(ModuleKind::Declarative, Some("retrieved")), 1);
        assert!(queue.exists(ModuleKind::Declarative, Some("finst")));
        assert!(queue.exists(ModuleKind::Imaginal, None));
        assert_eq!(queue.cancel_all(ModuleKind::Declarative, None), 1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn reschedule_moves_matching_events() {
        let mut queue = EventQueue::new();
        queue.schedule(marker(5.0, ModuleKind::Procedural, "fire p1"));
        queue.schedule(marker(2.0, ModuleKind::Vision, "encode"));
        assert_eq!(queue.reschedule(ModuleKind::Procedural, Some("fire"), 1.0), 1);
        assert_eq!(queue.peek_time(), Some(1.0));
        assert_eq!(
            queue.pop_earliest().map(|e| e.description),
            Some("fire p1".to_string())
        );
    }
}
