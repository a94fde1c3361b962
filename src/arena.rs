//! Interning arena for symbols and terms.
//!
//! Provides `SymbolId` and `TermId` (dense, total-orderable identifiers) and
//! `Interner` (contiguous storage with a content-addressed lookup table). An
//! interned value is never removed; the arena only grows.
//!
//! # Determinism
//! - Handles are assigned in first-seen order, so the same sequence of
//!   interning calls produces the same handles across runs.
//! - Handle ordering is by the inner `u32` and is *not* the reduction order;
//!   it exists so handles can key `BTreeMap`s.
//!
//! # Citations
//! - Hash consing: Filliâtre & Conchon, "Type-safe modular hash-consing" (2006)

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// Dense identifier of an interned symbol.
///
/// Two symbols are structurally equal iff their handles are equal.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SymbolId(u32);

impl SymbolId {
    /// Creates a new `SymbolId` from a raw `u32`.
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw `u32` index.
    #[inline]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    #[inline]
    pub(crate) fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SymbolId({})", self.0)
    }
}

/// Dense identifier of an interned, immutable term.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TermId(u32);

impl TermId {
    /// Creates a new `TermId` from a raw `u32`.
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw `u32` index.
    #[inline]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    #[inline]
    pub(crate) fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TermId({})", self.0)
    }
}

/// Append-only, content-addressed storage.
///
/// `intern` returns the existing slot for a value that was seen before and
/// allocates a new slot otherwise.
#[derive(Debug, Clone)]
pub struct Interner<T> {
    items: Vec<T>,
    lookup: HashMap<T, u32>,
}

impl<T: Clone + Eq + Hash> Interner<T> {
    /// Creates a new empty interner.
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            lookup: HashMap::new(),
        }
    }

    /// Interns `value`, returning its slot index.
    ///
    /// # Panics
    /// Panics if more than `u32::MAX` distinct values are interned.
    pub fn intern(&mut self, value: T) -> u32 {
        if let Some(&idx) = self.lookup.get(&value) {
            return idx;
        }
        let idx = u32::try_from(self.items.len()).unwrap_or_else(|_| {
            panic!("interner exhausted: more than u32::MAX distinct values")
        });
        self.items.push(value.clone());
        self.lookup.insert(value, idx);
        idx
    }

    /// Returns the slot index of `value` if it was interned before.
    pub fn find(&self, value: &T) -> Option<u32> {
        self.lookup.get(value).copied()
    }

    /// Returns the value stored at `idx`.
    ///
    /// # Panics
    /// Panics if `idx` was not produced by this interner.
    #[inline]
    pub fn get(&self, idx: u32) -> &T {
        &self.items[idx as usize]
    }

    /// Number of distinct values interned so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if nothing was interned yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Clone + Eq + Hash> Default for Interner<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_idempotent() {
        let mut interner = Interner::new();
        let a = interner.intern("alpha".to_string());
        let b = interner.intern("beta".to_string());
        let a2 = interner.intern("alpha".to_string());
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(interner.len(), 2);
        assert_eq!(interner.get(b), "beta");
    }

    #[test]
    fn test_handles_follow_first_seen_order() {
        let mut interner = Interner::new();
        for word in ["c", "a", "b", "a", "c"] {
            interner.intern(word);
        }
        let order: Vec<_> = (0..interner.len() as u32).map(|i| *interner.get(i)).collect();
        assert_eq!(order, vec!["c", "a", "b"]);
        assert_eq!(interner.find(&"b"), Some(2));
        assert_eq!(interner.find(&"z"), None);
    }

    #[test]
    fn test_handle_display() {
        assert_eq!(SymbolId::new(7).to_string(), "SymbolId(7)");
        assert_eq!(TermId::new(3).as_u32(), 3);
    }
}
