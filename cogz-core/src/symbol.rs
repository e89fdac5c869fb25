//! Symbol interning.
//!
//! Every chunk name, slot name and slot value is a [`Symbol`]: a small
//! `Copy` handle into an [`Interner`] owned by one model. Two symbols are
//! equal exactly when they were interned from equal strings by the same
//! interner in the same epoch.
//!
//! A fixed set of permanent symbols (see [`sym`]) is interned first by every
//! interner, so the engine can refer to `nil`, `state`, `goal`, ... as
//! constants without a lookup.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// An interned string handle. Compare with `==`; resolve with [`Interner::name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(u32);

impl Symbol {
    /// Position of this symbol in its interner's table.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Permanent symbols, interned at fixed indices by every [`Interner`].
pub mod sym {
    use super::Symbol;

    /// `nil`: the empty slot value.
    pub const NIL: Symbol = Symbol(0);
    /// `t`: boolean true.
    pub const T: Symbol = Symbol(1);
    /// `isa`: the chunk-type slot.
    pub const ISA: Symbol = Symbol(2);
    /// `state`: status slot.
    pub const STATE: Symbol = Symbol(3);
    /// `buffer`: status slot.
    pub const BUFFER: Symbol = Symbol(4);
    /// `free`: module state value.
    pub const FREE: Symbol = Symbol(5);
    /// `busy`: module state value.
    pub const BUSY: Symbol = Symbol(6);
    /// `error`: module state value.
    pub const ERROR: Symbol = Symbol(7);
    /// `empty`: buffer state value.
    pub const EMPTY: Symbol = Symbol(8);
    /// `full`: buffer state value.
    pub const FULL: Symbol = Symbol(9);
    /// `requested`: buffer state value.
    pub const REQUESTED: Symbol = Symbol(10);
    /// `unrequested`: buffer state value.
    pub const UNREQUESTED: Symbol = Symbol(11);
    /// `goal` buffer.
    pub const GOAL: Symbol = Symbol(12);
    /// `retrieval` buffer.
    pub const RETRIEVAL: Symbol = Symbol(13);
    /// `imaginal` buffer.
    pub const IMAGINAL: Symbol = Symbol(14);
    /// `visual` buffer.
    pub const VISUAL: Symbol = Symbol(15);
    /// `visual-location` buffer.
    pub const VISUAL_LOCATION: Symbol = Symbol(16);
    /// `aural` buffer.
    pub const AURAL: Symbol = Symbol(17);
    /// `aural-location` buffer.
    pub const AURAL_LOCATION: Symbol = Symbol(18);
    /// `manual` buffer.
    pub const MANUAL: Symbol = Symbol(19);
    /// `vocal` buffer.
    pub const VOCAL: Symbol = Symbol(20);
    /// `temporal` buffer.
    pub const TEMPORAL: Symbol = Symbol(21);
    /// `:recently-retrieved`: finst pseudo-slot for retrieval requests.
    pub const RECENTLY_RETRIEVED: Symbol = Symbol(22);
    /// `chunk`: the root chunk type.
    pub const CHUNK: Symbol = Symbol(23);
    /// `preparation`: motor status slot.
    pub const PREPARATION: Symbol = Symbol(24);
    /// `processor`: motor status slot.
    pub const PROCESSOR: Symbol = Symbol(25);
    /// `execution`: motor status slot.
    pub const EXECUTION: Symbol = Symbol(26);

    pub(super) const NAMES: &[&str] = &[
        "nil",
        "t",
        "isa",
        "state",
        "buffer",
        "free",
        "busy",
        "error",
        "empty",
        "full",
        "requested",
        "unrequested",
        "goal",
        "retrieval",
        "imaginal",
        "visual",
        "visual-location",
        "aural",
        "aural-location",
        "manual",
        "vocal",
        "temporal",
        ":recently-retrieved",
        "chunk",
        "preparation",
        "processor",
        "execution",
    ];
}

/// The symbol table for one model.
///
/// `reset` starts a new epoch: every non-permanent entry is dropped, but the
/// counter behind [`Interner::fresh`] keeps running so a minted name is never
/// handed out twice.
#[derive(Debug, Clone)]
pub struct Interner {
    names: Vec<String>,
    index: HashMap<String, Symbol>,
    next_fresh: u64,
    epoch: u32,
}

impl Interner {
    /// Create an interner holding only the permanent symbols.
    #[must_use]
    pub fn new() -> Self {
        let mut interner = Self {
            names: Vec::with_capacity(256),
            index: HashMap::with_capacity(256),
            next_fresh: 0,
            epoch: 0,
        };
        for name in sym::NAMES {
            interner.intern(name);
        }
        interner
    }

    /// Return the canonical handle for `s`, creating it if absent.
    ///
    /// Once every `u32` handle is taken, new names are not stored: they
    /// intern as `nil` with a warning.
    pub fn intern(&mut self, s: &str) -> Symbol {
        if let Some(&existing) = self.index.get(s) {
            return existing;
        }
        let Some(symbol) = next_symbol(self.names.len()) else {
            warn!(name = s, interned = self.names.len(), "symbol table full, interning as nil");
            return sym::NIL;
        };
        self.names.push(s.to_owned());
        self.index.insert(s.to_owned(), symbol);
        symbol
    }

    /// Look up `s` without creating it.
    #[must_use]
    pub fn get(&self, s: &str) -> Option<Symbol> {
        self.index.get(s).copied()
    }

    /// Mint a handle distinct from every existing one, named `base<N>`.
    pub fn fresh(&mut self, base: &str) -> Symbol {
        loop {
            let candidate = format!("{base}{}", self.next_fresh);
            self.next_fresh += 1;
            if !self.index.contains_key(&candidate) {
                return self.intern(&candidate);
            }
        }
    }

    /// Drop every non-permanent symbol and start a new epoch.
    pub fn reset(&mut self) {
        let next_fresh = self.next_fresh;
        let epoch = self.epoch + 1;
        *self = Self::new();
        self.next_fresh = next_fresh;
        self.epoch = epoch;
    }

    /// The string a symbol was interned from.
    ///
    /// Symbols from an earlier epoch may resolve to `"<stale>"`.
    #[must_use]
    pub fn name(&self, symbol: Symbol) -> &str {
        self.names
            .get(symbol.index())
            .map_or("<stale>", String::as_str)
    }

    /// Interpret a symbol as a number, if its text is numeric.
    #[must_use]
    pub fn number(&self, symbol: Symbol) -> Option<f64> {
        let text = self.name(symbol);
        let first = text.chars().next()?;
        if !(first.is_ascii_digit() || first == '-' || first == '+' || first == '.') {
            return None;
        }
        text.parse::<f64>().ok().filter(|v| v.is_finite())
    }

    /// Intern the canonical text of a number (`3`, not `3.0`).
    pub fn intern_number(&mut self, value: f64) -> Symbol {
        let text = format_number(value);
        self.intern(&text)
    }

    /// Whether a symbol names a production variable (`=x`).
    #[must_use]
    pub fn is_variable(&self, symbol: Symbol) -> bool {
        self.name(symbol).starts_with('=')
    }

    /// Number of live symbols, permanent ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the table is empty (never true: permanent symbols are always present).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// How many times `reset` has been called.
    #[must_use]
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// Borrow a symbol together with this interner for `Display`.
    #[must_use]
    pub fn display(&self, symbol: Symbol) -> Named<'_> {
        Named {
            interner: self,
            symbol,
        }
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

/// A symbol paired with its interner, printable with `{}`.
pub struct Named<'a> {
    interner: &'a Interner,
    symbol: Symbol,
}

impl fmt::Display for Named<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.interner.name(self.symbol))
    }
}

/// Canonical text for a number: integers print without a fraction.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Handle for the entry at `len`, if it fits in a `u32`.
fn next_symbol(len: usize) -> Option<Symbol> {
    u32::try_from(len).ok().map(Symbol)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_returns_identical_handles() {
        let mut symbols = Interner::new();
        let a = symbols.intern("x");
        let b = symbols.intern("x");
        assert_eq!(a, b);
        assert_ne!(a, symbols.intern("y"));
    }

    #[test]
    fn handles_stop_at_the_u32_range() {
        assert_eq!(next_symbol(7), Some(Symbol(7)));
        assert_eq!(next_symbol(u32::MAX as usize), Some(Symbol(u32::MAX)));
        if let Ok(past_end) = usize::try_from(u64::from(u32::MAX) + 1) {
            assert_eq!(next_symbol(past_end), None);
        }
    }

    #[test]
    fn permanent_symbols_sit_at_fixed_indices() {
        let symbols = Interner::new();
        assert_eq!(symbols.get("nil"), Some(sym::NIL));
        assert_eq!(symbols.get("goal"), Some(sym::GOAL));
        assert_eq!(symbols.get(":recently-retrieved"), Some(sym::RECENTLY_RETRIEVED));
        assert_eq!(symbols.get("execution"), Some(sym::EXECUTION));
    }

    #[test]
    fn fresh_never_collides_with_existing_names() {
        let mut symbols = Interner::new();
        symbols.intern("chunk0");
        let minted = symbols.fresh("chunk");
        assert_ne!(symbols.name(minted), "chunk0");
    }

    #[test]
    fn fresh_names_are_not_reissued_after_reset() {
        let mut symbols = Interner::new();
        let minted = symbols.fresh("goal");
        let before = symbols.name(minted).to_owned();
        symbols.reset();
        for _ in 0..10 {
            let after = symbols.fresh("goal");
            assert_ne!(symbols.name(after), before);
        }
        assert_eq!(symbols.epoch(), 1);
    }

    #[test]
    fn reset_drops_non_permanent_entries() {
        let mut symbols = Interner::new();
        symbols.intern("count-order");
        symbols.reset();
        assert!(symbols.get("count-order").is_none());
        assert_eq!(symbols.get("busy"), Some(sym::BUSY));
    }

    #[test]
    fn numbers_round_trip_through_canonical_text() {
        let mut symbols = Interner::new();
        let three = symbols.intern_number(3.0);
        assert_eq!(symbols.name(three), "3");
        assert_eq!(symbols.number(three), Some(3.0));
        let half = symbols.intern_number(0.5);
        assert_eq!(symbols.number(half), Some(0.5));
        let inf = symbols.intern("inf");
        assert_eq!(symbols.number(inf), None);
    }
}
