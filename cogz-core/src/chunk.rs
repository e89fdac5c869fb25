//! Chunks and chunk types.
//!
//! A chunk is a named bundle of slot/value pairs: the atomic unit of
//! declarative memory and the only thing a buffer can hold. The `isa` slot
//! carries the chunk type; types form a multiple-inheritance hierarchy
//! queried through [`ChunkTypes::is_a`].

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::event::Time;
use crate::symbol::{Interner, Symbol, sym};

/// Comparison used by a slot test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SlotOp {
    /// Values are identical.
    Eq,
    /// Values differ.
    Neq,
    /// Stored value is numerically less than the wanted one.
    Lt,
    /// Stored value is numerically greater.
    Gt,
    /// Less than or equal.
    Le,
    /// Greater than or equal.
    Ge,
}

impl SlotOp {
    /// Test a stored value against a wanted value.
    ///
    /// Ordering comparisons fail when either side is not numeric.
    #[must_use]
    pub fn test(self, stored: Symbol, wanted: Symbol, symbols: &Interner) -> bool {
        match self {
            Self::Eq => stored == wanted,
            Self::Neq => stored != wanted,
            Self::Lt | Self::Gt | Self::Le | Self::Ge => {
                match (symbols.number(stored), symbols.number(wanted)) {
                    (Some(a), Some(b)) => match self {
                        Self::Lt => a < b,
                        Self::Gt => a > b,
                        Self::Le => a <= b,
                        _ => a >= b,
                    },
                    _ => false,
                }
            }
        }
    }

    /// Prefix used when printing (`-`, `<`, ...); empty for equality.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Eq => "",
            Self::Neq => "- ",
            Self::Lt => "< ",
            Self::Gt => "> ",
            Self::Le => "<= ",
            Self::Ge => ">= ",
        }
    }
}

/// A resolved non-equality test carried by a request chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotConstraint {
    /// Slot tested.
    pub slot: Symbol,
    /// Comparison.
    pub op: SlotOp,
    /// Value compared against.
    pub value: Symbol,
}

/// A declarative chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Identity.
    pub name: Symbol,
    /// Slot → value. A `nil` value is never stored: absent means `nil`.
    pub slots: BTreeMap<Symbol, Symbol>,
    /// When the chunk entered declarative memory (or was built).
    pub creation_time: Time,
    /// Number of presentations (creation counts as one).
    pub use_count: u32,
    /// Presentation times, kept only under the exact base-level policy.
    pub use_times: Vec<Time>,
    /// One plus the number of other chunks referencing this one.
    pub fan: u32,
    /// Whether this chunk is an unserviced request placed in a buffer.
    pub is_request: bool,
    /// Non-equality tests of a request; empty for ordinary chunks.
    pub constraints: Vec<SlotConstraint>,
    /// Whether the chunk has been retrieved at least once.
    pub retrieved: bool,
    /// Time of the most recent retrieval.
    pub retrieval_time: Option<Time>,
    /// Base level used when base-level learning is disabled.
    pub base_level: f64,
}

impl Chunk {
    /// Create an empty chunk.
    #[must_use]
    pub fn new(name: Symbol) -> Self {
        Self {
            name,
            slots: BTreeMap::new(),
            creation_time: 0.0,
            use_count: 1,
            use_times: Vec::new(),
            fan: 1,
            is_request: false,
            constraints: Vec::new(),
            retrieved: false,
            retrieval_time: None,
            base_level: 0.0,
        }
    }

    /// Builder-style slot assignment.
    #[must_use]
    pub fn with_slot(mut self, slot: Symbol, value: Symbol) -> Self {
        self.set(slot, value);
        self
    }

    /// Value of a slot; `nil` when absent.
    #[must_use]
    pub fn get(&self, slot: Symbol) -> Symbol {
        self.slots.get(&slot).copied().unwrap_or(sym::NIL)
    }

    /// Assign a slot. Assigning `nil` removes it.
    pub fn set(&mut self, slot: Symbol, value: Symbol) {
        if value == sym::NIL {
            self.slots.remove(&slot);
        } else {
            self.slots.insert(slot, value);
        }
    }

    /// The chunk type, if an `isa` slot is present.
    #[must_use]
    pub fn chunk_type(&self) -> Option<Symbol> {
        self.slots.get(&sym::ISA).copied()
    }

    /// Whether two chunks carry the same slot/value set.
    #[must_use]
    pub fn structurally_equal(&self, other: &Self) -> bool {
        self.slots == other.slots
    }

    /// Whether any slot of this chunk holds `name`.
    #[must_use]
    pub fn references(&self, name: Symbol) -> bool {
        self.slots.values().any(|&v| v == name)
    }

    /// Replace every slot value `old` with `new`. Returns whether anything changed.
    pub fn rewrite(&mut self, old: Symbol, new: Symbol) -> bool {
        let mut changed = false;
        for value in self.slots.values_mut() {
            if *value == old {
                *value = new;
                changed = true;
            }
        }
        changed
    }

    /// Record a presentation at `time`.
    pub fn record_use(&mut self, time: Time, keep_history: bool) {
        self.use_count += 1;
        if keep_history {
            self.use_times.push(time);
        }
    }

    /// One-line rendering: `name isa t slot value ...`.
    #[must_use]
    pub fn describe(&self, symbols: &Interner) -> String {
        let mut out = symbols.name(self.name).to_owned();
        if let Some(ty) = self.chunk_type() {
            out.push_str(" isa ");
            out.push_str(symbols.name(ty));
        }
        for (&slot, &value) in &self.slots {
            if slot == sym::ISA {
                continue;
            }
            out.push(' ');
            out.push_str(symbols.name(slot));
            out.push(' ');
            out.push_str(symbols.name(value));
        }
        for constraint in &self.constraints {
            out.push(' ');
            out.push_str(constraint.op.prefix());
            out.push_str(symbols.name(constraint.slot));
            out.push(' ');
            out.push_str(symbols.name(constraint.value));
        }
        out
    }
}

/// The chunk-type hierarchy.
#[derive(Debug, Clone, Default)]
pub struct ChunkTypes {
    parents: HashMap<Symbol, Vec<Symbol>>,
}

impl ChunkTypes {
    /// Create an empty hierarchy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Define (or extend) a type with the given parents.
    pub fn define(&mut self, name: Symbol, parents: &[Symbol]) {
        let entry = self.parents.entry(name).or_default();
        for parent in parents {
            if !entry.contains(parent) {
                entry.push(*parent);
            }
        }
    }

    /// Whether a type has been defined.
    #[must_use]
    pub fn is_defined(&self, name: Symbol) -> bool {
        name == sym::CHUNK || self.parents.contains_key(&name)
    }

    /// Whether `ty` is `ancestor` or inherits from it, transitively.
    ///
    /// Every type is a `chunk`.
    #[must_use]
    pub fn is_a(&self, ty: Symbol, ancestor: Symbol) -> bool {
        if ty == ancestor || ancestor == sym::CHUNK {
            return true;
        }
        let mut seen = HashSet::new();
        let mut frontier = VecDeque::from([ty]);
        while let Some(current) = frontier.pop_front() {
            if !seen.insert(current) {
                continue;
            }
            for &parent in self.parents.get(&current).map_or(&[][..], Vec::as_slice) {
                if parent == ancestor {
                    return true;
                }
                frontier.push_back(parent);
            }
        }
        false
    }

    /// Number of defined types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    /// Whether no types are defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_assignment_removes_slot() {
        let mut symbols = Interner::new();
        let name = symbols.intern("a");
        let slot = symbols.intern("first");
        let one = symbols.intern("1");
        let mut chunk = Chunk::new(name).with_slot(slot, one);
        assert_eq!(chunk.get(slot), one);
        chunk.set(slot, sym::NIL);
        assert!(chunk.slots.is_empty());
        assert_eq!(chunk.get(slot), sym::NIL);
    }

    #[test]
    fn structural_equality_ignores_names_and_bookkeeping() {
        let mut symbols = Interner::new();
        let (a, b) = (symbols.intern("a"), symbols.intern("b"));
        let slot = symbols.intern("first");
        let one = symbols.intern("1");
        let mut left = Chunk::new(a).with_slot(slot, one);
        left.use_count = 7;
        let right = Chunk::new(b).with_slot(slot, one);
        assert!(left.structurally_equal(&right));
    }

    #[test]
    fn is_a_follows_multiple_inheritance() {
        let mut symbols = Interner::new();
        let animal = symbols.intern("animal");
        let pet = symbols.intern("pet");
        let dog = symbols.intern("dog");
        let puppy = symbols.intern("puppy");
        let rock = symbols.intern("rock");

        let mut types = ChunkTypes::new();
        types.define(animal, &[]);
        types.define(pet, &[]);
        types.define(dog, &[animal, pet]);
        types.define(puppy, &[dog]);

        assert!(types.is_a(puppy, animal));
        assert!(types.is_a(puppy, pet));
        assert!(types.is_a(puppy, sym::CHUNK));
        assert!(!types.is_a(animal, dog));
        assert!(!types.is_a(rock, animal));
    }

    #[test]
    fn ordering_ops_need_numbers() {
        let mut symbols = Interner::new();
        let two = symbols.intern("2");
        let ten = symbols.intern("10");
        let word = symbols.intern("ten");
        assert!(SlotOp::Lt.test(two, ten, &symbols));
        assert!(SlotOp::Ge.test(ten, ten, &symbols));
        assert!(!SlotOp::Gt.test(word, two, &symbols));
        assert!(SlotOp::Neq.test(word, two, &symbols));
    }
}
