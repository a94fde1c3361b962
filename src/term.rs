//! Mutable terms: rewriting scratch space.
//!
//! Immutable terms are interned `Vec<SymbolId>` values addressed by
//! `TermId` (see `context`). `MutableTerm` is the owned form the simplifier
//! and the path evaluator edit in place.

use crate::arena::SymbolId;
use std::fmt;
use std::ops::Range;

/// An owned, editable sequence of symbol handles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct MutableTerm {
    symbols: Vec<SymbolId>,
}

impl MutableTerm {
    /// Creates an empty term.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing symbol vector.
    pub fn from_symbols(symbols: Vec<SymbolId>) -> Self {
        Self { symbols }
    }

    /// Creates a one-symbol term.
    pub fn single(symbol: SymbolId) -> Self {
        Self {
            symbols: vec![symbol],
        }
    }

    /// Concatenates two slices into a fresh term.
    pub fn concat(lhs: &[SymbolId], rhs: &[SymbolId]) -> Self {
        let mut symbols = Vec::with_capacity(lhs.len() + rhs.len());
        symbols.extend_from_slice(lhs);
        symbols.extend_from_slice(rhs);
        Self { symbols }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Borrows the symbols.
    #[inline]
    pub fn symbols(&self) -> &[SymbolId] {
        &self.symbols
    }

    pub fn first(&self) -> Option<SymbolId> {
        self.symbols.first().copied()
    }

    pub fn last(&self) -> Option<SymbolId> {
        self.symbols.last().copied()
    }

    pub fn push(&mut self, symbol: SymbolId) {
        self.symbols.push(symbol);
    }

    pub fn pop(&mut self) -> Option<SymbolId> {
        self.symbols.pop()
    }

    pub fn extend_from_slice(&mut self, symbols: &[SymbolId]) {
        self.symbols.extend_from_slice(symbols);
    }

    /// Returns the symbol at `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn get(&self, index: usize) -> SymbolId {
        self.symbols[index]
    }

    /// Overwrites the symbol at `index`.
    pub fn set(&mut self, index: usize, symbol: SymbolId) {
        self.symbols[index] = symbol;
    }

    /// Returns `true` if `pattern` occurs at `offset`.
    pub fn matches_at(&self, offset: usize, pattern: &[SymbolId]) -> bool {
        offset + pattern.len() <= self.symbols.len()
            && &self.symbols[offset..offset + pattern.len()] == pattern
    }

    pub fn starts_with(&self, prefix: &[SymbolId]) -> bool {
        self.symbols.starts_with(prefix)
    }

    pub fn ends_with(&self, suffix: &[SymbolId]) -> bool {
        self.symbols.ends_with(suffix)
    }

    /// Replaces `range` with `replacement`.
    pub fn splice(&mut self, range: Range<usize>, replacement: &[SymbolId]) {
        self.symbols.splice(range, replacement.iter().copied());
    }

    /// Drops the last `len` symbols.
    pub fn truncate(&mut self, len: usize) {
        self.symbols.truncate(len);
    }
}

impl From<&[SymbolId]> for MutableTerm {
    fn from(symbols: &[SymbolId]) -> Self {
        Self::from_symbols(symbols.to_vec())
    }
}

impl fmt::Display for MutableTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, sym) in self.symbols.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "#{}", sym.as_u32())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn term(raw: &[u32]) -> MutableTerm {
        MutableTerm::from_symbols(raw.iter().map(|&r| SymbolId::new(r)).collect())
    }

    #[test]
    fn test_splice_rewrites_subrange() {
        let mut t = term(&[1, 2, 3, 4]);
        t.splice(1..3, &[SymbolId::new(9)]);
        assert_eq!(t, term(&[1, 9, 4]));
    }

    #[test]
    fn test_matches_at_respects_bounds() {
        let t = term(&[1, 2, 3]);
        assert!(t.matches_at(1, &[SymbolId::new(2), SymbolId::new(3)]));
        assert!(!t.matches_at(2, &[SymbolId::new(3), SymbolId::new(4)]));
        assert!(t.matches_at(3, &[]));
    }

    #[test]
    fn test_prefix_and_suffix_edits() {
        let mut t = term(&[5, 6, 7]);
        assert!(t.starts_with(&[SymbolId::new(5)]));
        assert!(t.ends_with(&[SymbolId::new(6), SymbolId::new(7)]));
        t.splice(0..1, &[]);
        assert_eq!(t.to_string(), "#6.#7");
        t.truncate(1);
        assert_eq!(t.len(), 1);
    }
}
