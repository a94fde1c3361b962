//! Oriented rewrite rules.

use crate::arena::{SymbolId, TermId};
use crate::context::RewriteContext;
use crate::symbol::{Symbol, SymbolKind};

/// Lifecycle flags of a rule.
///
/// `permanent` and `explicit` are mutually exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RuleFlags {
    /// Structural rule, not a requirement; never deleted.
    pub permanent: bool,
    /// Came directly from a written or inferred requirement.
    pub explicit: bool,
    /// Superseded: excluded from rewriting and from the output.
    pub simplified: bool,
    /// Removable by homotopy reduction; still used for rewriting.
    pub redundant: bool,
    /// One side of an unsatisfiable property pair.
    pub conflicting: bool,
}

/// An oriented rule `lhs => rhs` with `lhs > rhs` in the reduction order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    lhs: TermId,
    rhs: TermId,
    depth: usize,
    flags: RuleFlags,
    /// Index of the structural requirement an explicit rule was built from.
    requirement: Option<usize>,
}

impl Rule {
    pub fn new(lhs: TermId, rhs: TermId, lhs_len: usize) -> Self {
        Self {
            lhs,
            rhs,
            depth: lhs_len.saturating_sub(1),
            flags: RuleFlags::default(),
            requirement: None,
        }
    }

    #[inline]
    pub fn lhs(&self) -> TermId {
        self.lhs
    }

    #[inline]
    pub fn rhs(&self) -> TermId {
        self.rhs
    }

    /// LHS length minus one.
    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn flags(&self) -> RuleFlags {
        self.flags
    }

    pub fn requirement(&self) -> Option<usize> {
        self.requirement
    }

    pub fn is_permanent(&self) -> bool {
        self.flags.permanent
    }

    pub fn is_explicit(&self) -> bool {
        self.flags.explicit
    }

    pub fn is_simplified(&self) -> bool {
        self.flags.simplified
    }

    pub fn is_redundant(&self) -> bool {
        self.flags.redundant
    }

    pub fn is_conflicting(&self) -> bool {
        self.flags.conflicting
    }

    pub fn mark_permanent(&mut self) {
        debug_assert!(!self.flags.explicit, "permanent rules are never explicit");
        self.flags.permanent = true;
    }

    pub fn mark_explicit(&mut self, requirement: Option<usize>) {
        debug_assert!(!self.flags.permanent, "explicit rules are never permanent");
        self.flags.explicit = true;
        self.requirement = requirement;
    }

    pub fn mark_simplified(&mut self) {
        self.flags.simplified = true;
    }

    pub fn mark_redundant(&mut self) {
        debug_assert!(!self.flags.permanent, "permanent rules are never redundant");
        self.flags.redundant = true;
    }

    pub fn mark_conflicting(&mut self) {
        self.flags.conflicting = true;
    }

    /// The property symbol of a rule shaped `X.[p] => X`.
    pub fn property_symbol(&self, ctx: &RewriteContext) -> Option<SymbolId> {
        let (lhs, rhs) = (ctx.term(self.lhs), ctx.term(self.rhs));
        if lhs.len() != rhs.len() + 1 || !lhs.starts_with(rhs) {
            return None;
        }
        let last = *lhs.last()?;
        ctx.symbol(last).is_property().then_some(last)
    }

    /// Returns `true` for `X.[P] => X`.
    pub fn is_protocol_conformance_rule(&self, ctx: &RewriteContext) -> bool {
        self.property_symbol(ctx)
            .map_or(false, |s| ctx.symbol(s).kind() == SymbolKind::Protocol)
    }

    /// Returns `true` if either side mentions an unresolved name.
    pub fn has_unresolved_name(&self, ctx: &RewriteContext) -> bool {
        ctx.has_unresolved_name(ctx.term(self.lhs)) || ctx.has_unresolved_name(ctx.term(self.rhs))
    }

    /// Shape `X.[P1:T] => X.[P2:T]`: same subject, associated types of the
    /// same name from different protocols.
    pub fn merged_associated_type_pair(&self, ctx: &RewriteContext) -> Option<(SymbolId, SymbolId)> {
        let (lhs, rhs) = (ctx.term(self.lhs), ctx.term(self.rhs));
        if lhs.len() != rhs.len() || lhs.is_empty() {
            return None;
        }
        let n = lhs.len();
        if lhs[..n - 1] != rhs[..n - 1] {
            return None;
        }
        match (ctx.symbol(lhs[n - 1]), ctx.symbol(rhs[n - 1])) {
            (
                Symbol::AssociatedType { name: a, .. },
                Symbol::AssociatedType { name: b, .. },
            ) if a == b => Some((lhs[n - 1], rhs[n - 1])),
            _ => None,
        }
    }

    pub fn format(&self, ctx: &RewriteContext) -> String {
        let mut out = format!(
            "{} => {}",
            ctx.format_term(ctx.term(self.lhs)),
            ctx.format_term(ctx.term(self.rhs))
        );
        let flags = self.flags;
        for (set, name) in [
            (flags.permanent, "permanent"),
            (flags.explicit, "explicit"),
            (flags.simplified, "simplified"),
            (flags.redundant, "redundant"),
            (flags.conflicting, "conflicting"),
        ] {
            if set {
                out.push_str(" [");
                out.push_str(name);
                out.push(']');
            }
        }
        out
    }
}
