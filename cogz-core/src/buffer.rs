//! Buffers: the shared blackboard between modules and the matcher.
//!
//! Each buffer holds at most one chunk and carries a status chunk with the
//! slots `state` (free / busy / error) and `buffer` (empty / full /
//! requested / unrequested), plus module extras. Productions read status
//! through `?buffer>` queries.
//!
//! The goal buffer is special: it can hold a queue of goal chunks, each
//! tagged with a [`ThreadId`]. Exactly one is exposed at a time; the matcher
//! rotates through them least-recently-selected first. This interleaves
//! independent goal lines without real concurrency.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chunk::Chunk;
use crate::event::{EventQueue, ModuleKind, Time};
use crate::symbol::{Symbol, sym};

/// Goal-lineage tag. Not an execution thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(pub u32);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread-{}", self.0)
    }
}

/// One queued goal.
#[derive(Debug, Clone)]
pub struct GoalEntry {
    /// The goal chunk.
    pub chunk: Chunk,
    /// Its lineage tag.
    pub thread: ThreadId,
    /// Last time the matcher selected this goal.
    pub last_selected: Time,
}

/// State of one buffer.
#[derive(Debug, Clone)]
pub struct BufferState {
    /// Owning module; clearing cancels its pending events.
    pub module: ModuleKind,
    /// Held chunk (unused for the goal buffer, see [`Buffers`]).
    pub chunk: Option<Chunk>,
    /// Status chunk (`state`, `buffer`, extras).
    pub status: Chunk,
    /// Last time the contents were set or modified.
    pub touched: Time,
}

/// All buffers of a model.
#[derive(Debug, Clone)]
pub struct Buffers {
    buffers: BTreeMap<Symbol, BufferState>,
    goals: Vec<GoalEntry>,
    current_goal: usize,
    next_thread: u32,
}

impl Buffers {
    /// Create the standard buffer set: goal, retrieval, imaginal, plus the
    /// perceptual-motor buffers served by external modules.
    #[must_use]
    pub fn new() -> Self {
        let mut buffers = Self {
            buffers: BTreeMap::new(),
            goals: Vec::new(),
            current_goal: 0,
            next_thread: 0,
        };
        buffers.register(sym::GOAL, ModuleKind::Goal);
        buffers.register(sym::RETRIEVAL, ModuleKind::Declarative);
        buffers.register(sym::IMAGINAL, ModuleKind::Imaginal);
        buffers.register(sym::VISUAL, ModuleKind::Vision);
        buffers.register(sym::VISUAL_LOCATION, ModuleKind::Vision);
        buffers.register(sym::AURAL, ModuleKind::Audition);
        buffers.register(sym::AURAL_LOCATION, ModuleKind::Audition);
        buffers.register(sym::MANUAL, ModuleKind::Manual);
        buffers.register(sym::VOCAL, ModuleKind::Vocal);
        buffers.register(sym::TEMPORAL, ModuleKind::Temporal);
        buffers
    }

    /// Add (or re-own) a buffer.
    pub fn register(&mut self, name: Symbol, module: ModuleKind) {
        let status = Chunk::new(name)
            .with_slot(sym::STATE, sym::FREE)
            .with_slot(sym::BUFFER, sym::EMPTY);
        self.buffers.insert(
            name,
            BufferState {
                module,
                chunk: None,
                status,
                touched: 0.0,
            },
        );
    }

    /// Whether a buffer with this name exists.
    #[must_use]
    pub fn contains(&self, name: Symbol) -> bool {
        self.buffers.contains_key(&name)
    }

    /// Module that owns a buffer.
    #[must_use]
    pub fn module_of(&self, name: Symbol) -> Option<ModuleKind> {
        self.buffers.get(&name).map(|b| b.module)
    }

    /// Names of all buffers, in symbol order.
    pub fn names(&self) -> impl Iterator<Item = Symbol> + '_ {
        self.buffers.keys().copied()
    }

    /// Chunk held by a buffer (pending requests included).
    #[must_use]
    pub fn get(&self, name: Symbol) -> Option<&Chunk> {
        if name == sym::GOAL {
            return self.goals.get(self.current_goal).map(|g| &g.chunk);
        }
        self.buffers.get(&name).and_then(|b| b.chunk.as_ref())
    }

    /// Mutable access to a held chunk.
    pub fn get_mut(&mut self, name: Symbol) -> Option<&mut Chunk> {
        if name == sym::GOAL {
            return self.goals.get_mut(self.current_goal).map(|g| &mut g.chunk);
        }
        self.buffers.get_mut(&name).and_then(|b| b.chunk.as_mut())
    }

    /// Chunk held by a buffer, ignoring unserviced requests.
    #[must_use]
    pub fn get_filled(&self, name: Symbol) -> Option<&Chunk> {
        self.get(name).filter(|chunk| !chunk.is_request)
    }

    /// Value of one slot of a held chunk.
    #[must_use]
    pub fn get_slot(&self, name: Symbol, slot: Symbol) -> Option<Symbol> {
        self.get_filled(name).map(|chunk| chunk.get(slot))
    }

    /// Install a chunk, replacing any previous one.
    ///
    /// An ordinary chunk flips status to free/full; a pending request flips
    /// it to busy/requested.
    pub fn set(&mut self, name: Symbol, chunk: Chunk, now: Time) {
        let is_request = chunk.is_request;
        if name == sym::GOAL {
            if let Some(entry) = self.goals.get_mut(self.current_goal) {
                entry.chunk = chunk;
            } else {
                let thread = self.mint_thread();
                self.goals.push(GoalEntry {
                    chunk,
                    thread,
                    last_selected: now,
                });
                self.current_goal = self.goals.len() - 1;
            }
        } else if let Some(state) = self.buffers.get_mut(&name) {
            state.chunk = Some(chunk);
        } else {
            debug!(buffer = name.index(), "set on unknown buffer ignored");
            return;
        }
        if let Some(state) = self.buffers.get_mut(&name) {
            state.touched = now;
            if is_request {
                state.status.set(sym::BUFFER, sym::REQUESTED);
                state.status.set(sym::STATE, sym::BUSY);
            } else {
                state.status.set(sym::BUFFER, sym::FULL);
                state.status.set(sym::STATE, sym::FREE);
            }
        }
    }

    /// Modify one slot of a held chunk. Returns `false` if the buffer is empty.
    pub fn set_slot(&mut self, name: Symbol, slot: Symbol, value: Symbol, now: Time) -> bool {
        let Some(chunk) = self.get_mut(name) else {
            return false;
        };
        chunk.set(slot, value);
        if let Some(state) = self.buffers.get_mut(&name) {
            state.touched = now;
        }
        true
    }

    /// Empty a buffer, cancel its module's pending events, and reset its
    /// status to free/empty. Returns the removed chunk.
    pub fn clear(&mut self, name: Symbol, events: &mut EventQueue) -> Option<Chunk> {
        let removed = if name == sym::GOAL {
            if self.goals.is_empty() {
                None
            } else {
                let entry = self.goals.remove(self.current_goal.min(self.goals.len() - 1));
                self.current_goal = 0;
                Some(entry.chunk)
            }
        } else {
            self.buffers.get_mut(&name).and_then(|b| b.chunk.take())
        };
        let goals_left = !self.goals.is_empty();
        if let Some(state) = self.buffers.get_mut(&name) {
            let cancelled = events.cancel_all(state.module, None);
            if cancelled > 0 {
                debug!(module = %state.module, cancelled, "cancelled events on buffer clear");
            }
            state.status.set(sym::STATE, sym::FREE);
            let fill = if name == sym::GOAL && goals_left { sym::FULL } else { sym::EMPTY };
            state.status.set(sym::BUFFER, fill);
        }
        removed.filter(|chunk| !chunk.is_request)
    }

    /// Take an unserviced request out of a buffer. The status stays
    /// busy/requested until the module fills the buffer, fails, or the
    /// buffer is cleared.
    pub fn take_request(&mut self, name: Symbol) -> Option<Chunk> {
        let state = self.buffers.get_mut(&name)?;
        if !state.chunk.as_ref().is_some_and(|c| c.is_request) {
            return None;
        }
        state.status.set(sym::BUFFER, sym::REQUESTED);
        state.status.set(sym::STATE, sym::BUSY);
        state.chunk.take()
    }

    /// Status chunk of a buffer.
    #[must_use]
    pub fn status(&self, name: Symbol) -> Option<&Chunk> {
        self.buffers.get(&name).map(|b| &b.status)
    }

    /// Set one status slot (`state`, `buffer`, or a module extra).
    pub fn set_status(&mut self, name: Symbol, slot: Symbol, value: Symbol) {
        if let Some(state) = self.buffers.get_mut(&name) {
            state.status.set(slot, value);
        }
    }

    /// Mark a failed request: state error, buffer empty.
    pub fn set_error(&mut self, name: Symbol) {
        if let Some(state) = self.buffers.get_mut(&name) {
            state.chunk = None;
            state.status.set(sym::STATE, sym::ERROR);
            state.status.set(sym::BUFFER, sym::EMPTY);
        }
    }

    /// Last time a buffer's contents changed.
    #[must_use]
    pub fn touched(&self, name: Symbol) -> Option<Time> {
        self.buffers.get(&name).map(|b| b.touched)
    }

    /// Silently clear decaying buffers untouched for longer than `lifetime`.
    /// Returns the names of the buffers cleared.
    pub fn decay(
        &mut self,
        now: Time,
        lifetime: Time,
        decaying: &[Symbol],
        events: &mut EventQueue,
    ) -> Vec<Symbol> {
        let expired: Vec<Symbol> = decaying
            .iter()
            .copied()
            .filter(|&name| {
                self.buffers.get(&name).is_some_and(|b| {
                    b.chunk.as_ref().is_some_and(|c| !c.is_request) && now - b.touched > lifetime
                })
            })
            .collect();
        for &name in &expired {
            self.clear(name, events);
        }
        expired
    }

    /// Rename every reference to `old` (chunk names and slot values) to `new`.
    /// Returns how many chunks changed.
    pub fn rewrite(&mut self, old: Symbol, new: Symbol) -> usize {
        let mut changed = 0;
        let held = self
            .buffers
            .values_mut()
            .filter_map(|b| b.chunk.as_mut())
            .chain(self.goals.iter_mut().map(|g| &mut g.chunk));
        for chunk in held {
            let mut touched = chunk.rewrite(old, new);
            if chunk.name == old {
                chunk.name = new;
                touched = true;
            }
            if touched {
                changed += 1;
            }
        }
        changed
    }

    // -----------------------------------------------------------------------
    // Goal threads
    // -----------------------------------------------------------------------

    fn mint_thread(&mut self) -> ThreadId {
        let thread = ThreadId(self.next_thread);
        self.next_thread += 1;
        thread
    }

    /// Queue a new goal on a new thread and expose it.
    pub fn add_goal(&mut self, chunk: Chunk, now: Time) -> ThreadId {
        let thread = self.mint_thread();
        self.goals.push(GoalEntry {
            chunk,
            thread,
            last_selected: now,
        });
        self.current_goal = self.goals.len() - 1;
        if let Some(state) = self.buffers.get_mut(&sym::GOAL) {
            state.touched = now;
            state.status.set(sym::BUFFER, sym::FULL);
            state.status.set(sym::STATE, sym::FREE);
        }
        thread
    }

    /// Number of queued goals.
    #[must_use]
    pub fn goal_count(&self) -> usize {
        self.goals.len()
    }

    /// Queued goals, in queue order.
    #[must_use]
    pub fn goals(&self) -> &[GoalEntry] {
        &self.goals
    }

    /// Goal indices ordered least-recently-selected first (ties by queue order).
    #[must_use]
    pub fn sort_goals(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.goals.len()).collect();
        order.sort_by(|&a, &b| {
            self.goals[a]
                .last_selected
                .total_cmp(&self.goals[b].last_selected)
                .then(a.cmp(&b))
        });
        order
    }

    /// Expose goal `index` as *the* goal. Returns `false` if out of range.
    pub fn try_goal(&mut self, index: usize) -> bool {
        if index < self.goals.len() {
            self.current_goal = index;
            true
        } else {
            false
        }
    }

    /// Index of the exposed goal.
    #[must_use]
    pub fn current_goal_index(&self) -> usize {
        self.current_goal
    }

    /// Thread of the exposed goal.
    #[must_use]
    pub fn current_thread(&self) -> Option<ThreadId> {
        self.goals.get(self.current_goal).map(|g| g.thread)
    }

    /// Expose the goal on `thread`. Returns `false` if no such goal is queued.
    pub fn select_thread(&mut self, thread: ThreadId) -> bool {
        match self.goals.iter().position(|g| g.thread == thread) {
            Some(index) => {
                self.current_goal = index;
                true
            }
            None => false,
        }
    }

    /// Stamp the exposed goal as selected at `now`.
    pub fn mark_selected(&mut self, now: Time) {
        if let Some(entry) = self.goals.get_mut(self.current_goal) {
            entry.last_selected = now;
        }
    }
}

impl Default for Buffers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, EventAction};
    use crate::symbol::Interner;

    fn status_of(buffers: &Buffers, name: Symbol) -> (Symbol, Symbol) {
        let status = buffers.status(name).expect("status");
        (status.get(sym::STATE), status.get(sym::BUFFER))
    }

    #[test]
    fn request_then_fill_then_clear() {
        let mut symbols = Interner::new();
        let mut buffers = Buffers::new();
        let mut events = EventQueue::new();

        let mut request = Chunk::new(symbols.fresh("request"));
        request.is_request = true;
        buffers.set(sym::RETRIEVAL, request, 0.0);
        assert_eq!(status_of(&buffers, sym::RETRIEVAL), (sym::BUSY, sym::REQUESTED));
        assert!(buffers.get_filled(sym::RETRIEVAL).is_none());

        assert!(buffers.take_request(sym::RETRIEVAL).is_some());
        assert_eq!(status_of(&buffers, sym::RETRIEVAL), (sym::BUSY, sym::REQUESTED));
        assert!(buffers.take_request(sym::RETRIEVAL).is_none());

        events.schedule(Event::new(0.3, ModuleKind::Declarative, "retrieved", EventAction::Marker));
        buffers.set(sym::RETRIEVAL, Chunk::new(symbols.intern("a")), 0.3);
        assert_eq!(status_of(&buffers, sym::RETRIEVAL), (sym::FREE, sym::FULL));

        let removed = buffers.clear(sym::RETRIEVAL, &mut events);
        assert!(removed.is_some());
        assert_eq!(status_of(&buffers, sym::RETRIEVAL), (sym::FREE, sym::EMPTY));
        assert!(!events.exists(ModuleKind::Declarative, None));
    }

    #[test]
    fn goals_rotate_least_recently_selected_first() {
        let mut symbols = Interner::new();
        let mut buffers = Buffers::new();
        let first = buffers.add_goal(Chunk::new(symbols.intern("g1")), 0.0);
        let second = buffers.add_goal(Chunk::new(symbols.intern("g2")), 1.0);
        assert_ne!(first, second);

        assert_eq!(buffers.sort_goals(), vec![0, 1]);
        assert!(buffers.try_goal(0));
        buffers.mark_selected(2.0);
        assert_eq!(buffers.sort_goals(), vec![1, 0]);
        assert_eq!(buffers.current_thread(), Some(first));
        assert!(buffers.select_thread(second));
        assert_eq!(buffers.get(sym::GOAL).map(|c| c.name), symbols.get("g2"));
    }

    #[test]
    fn rewrite_renames_held_chunks_and_references() {
        let mut symbols = Interner::new();
        let mut buffers = Buffers::new();
        let (old, new) = (symbols.intern("old"), symbols.intern("new"));
        let slot = symbols.intern("ref");
        buffers.set(sym::IMAGINAL, Chunk::new(old), 0.0);
        buffers.set(sym::GOAL, Chunk::new(symbols.intern("g")).with_slot(slot, old), 0.0);

        assert_eq!(buffers.rewrite(old, new), 2);
        assert_eq!(buffers.get(sym::IMAGINAL).map(|c| c.name), Some(new));
        assert_eq!(buffers.get_slot(sym::GOAL, slot), Some(new));
    }

    #[test]
    fn decay_clears_only_stale_buffers() {
        let mut symbols = Interner::new();
        let mut buffers = Buffers::new();
        let mut events = EventQueue::new();
        buffers.set(sym::RETRIEVAL, Chunk::new(symbols.intern("a")), 0.0);
        assert!(buffers.decay(0.5, 1.0, &[sym::RETRIEVAL], &mut events).is_empty());
        assert_eq!(buffers.decay(2.0, 1.0, &[sym::RETRIEVAL], &mut events), vec![sym::RETRIEVAL]);
        assert!(buffers.get(sym::RETRIEVAL).is_none());
    }
}
