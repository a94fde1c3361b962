//! Long-lived rewrite context: interning, reduction order, conversions.
//!
//! A `RewriteContext` owns the symbol and term arenas shared by every rewrite
//! system built during one compilation, together with the protocol ranks the
//! reduction order needs. Interning is content-addressed and append-only, so
//! the same structural input always yields the same handle.
//!
//! # Reduction order
//! Terms are ordered shortlex: shorter terms are smaller, equal-length terms
//! compare symbol by symbol. Symbols compare by kind rank first
//! (`SymbolKind` declaration order), then by payload. The order is total and
//! monotone under concatenation, which makes it a reduction order for string
//! rewriting.
//!
//! # Citations
//! - Shortlex orders: Sims, "Computation with Finitely Presented Groups" (1994), §2.1
//! - Hash consing: Filliâtre & Conchon, "Type-safe modular hash-consing" (2006)

use crate::arena::{Interner, SymbolId, TermId};
use crate::error::RequirementError;
use crate::protocol_graph::ProtocolGraph;
use crate::requirement::Type;
use crate::symbol::{GenericParamKey, LayoutConstraint, ProtocolId, Symbol, SymbolKind, TypePattern};
use crate::term::MutableTerm;
use std::cmp::Ordering;

/// Owner of the symbol/term arenas and of the protocol order.
#[derive(Debug, Clone)]
pub struct RewriteContext {
    symbols: Interner<Symbol>,
    terms: Interner<Vec<SymbolId>>,
    protocol_names: Vec<String>,
    /// Position of each protocol in protocol order, indexed by `ProtocolId`.
    protocol_ranks: Vec<u32>,
    /// Associated types visible in each protocol (own and inherited).
    visible_associated_types: Vec<Vec<String>>,
}

impl RewriteContext {
    /// Creates a context for the protocols declared in `graph`.
    pub fn new(graph: &ProtocolGraph) -> Self {
        let count = graph.protocol_count();
        let mut protocol_ranks = vec![0u32; count];
        for (rank, proto) in graph.protocol_order().into_iter().enumerate() {
            protocol_ranks[proto.0 as usize] = rank as u32;
        }
        let protocol_names = (0..count)
            .map(|i| graph.protocol(ProtocolId(i as u32)).name.clone())
            .collect();
        let visible_associated_types = (0..count)
            .map(|i| graph.visible_associated_types(ProtocolId(i as u32)))
            .collect();
        Self {
            symbols: Interner::new(),
            terms: Interner::new(),
            protocol_names,
            protocol_ranks,
            visible_associated_types,
        }
    }

    // ---------------------------------------------------------------------
    // Interning
    // ---------------------------------------------------------------------

    pub fn intern_symbol(&mut self, symbol: Symbol) -> SymbolId {
        SymbolId::new(self.symbols.intern(symbol))
    }

    #[inline]
    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        self.symbols.get(id.as_u32())
    }

    pub fn intern_term(&mut self, symbols: &[SymbolId]) -> TermId {
        debug_assert!(!symbols.is_empty(), "terms are non-empty");
        TermId::new(self.terms.intern(symbols.to_vec()))
    }

    /// Handle of an already interned term.
    pub fn find_term(&self, symbols: &[SymbolId]) -> Option<TermId> {
        self.terms.find(&symbols.to_vec()).map(TermId::new)
    }

    #[inline]
    pub fn term(&self, id: TermId) -> &[SymbolId] {
        self.terms.get(id.as_u32())
    }

    pub fn protocol_count(&self) -> usize {
        self.protocol_names.len()
    }

    pub fn protocol_name(&self, proto: ProtocolId) -> &str {
        &self.protocol_names[proto.0 as usize]
    }

    /// Returns `true` if `name` is an associated type of `proto` or one of its ancestors.
    pub fn is_visible_associated_type(&self, proto: ProtocolId, name: &str) -> bool {
        self.visible_associated_types
            .get(proto.0 as usize)
            .map_or(false, |names| names.iter().any(|n| n == name))
    }

    pub fn visible_associated_types(&self, proto: ProtocolId) -> &[String] {
        &self.visible_associated_types[proto.0 as usize]
    }

    // ---------------------------------------------------------------------
    // Symbol constructors
    // ---------------------------------------------------------------------

    pub fn protocol_symbol(&mut self, proto: ProtocolId) -> SymbolId {
        self.intern_symbol(Symbol::Protocol(proto))
    }

    /// `[P:A]`, or a merged `[P1&P2:A]` when several protocols are given.
    ///
    /// The protocol list is sorted into protocol order and deduplicated.
    pub fn associated_type_symbol(&mut self, protocols: &[ProtocolId], name: &str) -> SymbolId {
        let mut protocols = protocols.to_vec();
        protocols.sort_by_key(|p| (self.protocol_rank(*p), *p));
        protocols.dedup();
        self.intern_symbol(Symbol::AssociatedType {
            protocols,
            name: name.to_string(),
        })
    }

    pub fn generic_param_symbol(&mut self, key: GenericParamKey) -> SymbolId {
        self.intern_symbol(Symbol::GenericParam(key))
    }

    pub fn name_symbol(&mut self, name: &str) -> SymbolId {
        self.intern_symbol(Symbol::Name(name.to_string()))
    }

    pub fn layout_symbol(&mut self, layout: LayoutConstraint) -> SymbolId {
        self.intern_symbol(Symbol::Layout(layout))
    }

    /// Canonical `[concrete: C]` symbol.
    pub fn concrete_symbol(&mut self, pattern: TypePattern, substitutions: Vec<TermId>) -> SymbolId {
        let (pattern, substitutions) = canonicalize(pattern, substitutions);
        self.intern_symbol(Symbol::ConcreteType {
            pattern,
            substitutions,
        })
    }

    /// Canonical `[superclass: C]` symbol.
    pub fn superclass_symbol(&mut self, pattern: TypePattern, substitutions: Vec<TermId>) -> SymbolId {
        let (pattern, substitutions) = canonicalize(pattern, substitutions);
        self.intern_symbol(Symbol::Superclass {
            pattern,
            substitutions,
        })
    }

    /// Canonical `[concrete: C : P]` symbol.
    pub fn concrete_conformance_symbol(
        &mut self,
        pattern: TypePattern,
        substitutions: Vec<TermId>,
        protocol: ProtocolId,
    ) -> SymbolId {
        let (pattern, substitutions) = canonicalize(pattern, substitutions);
        self.intern_symbol(Symbol::ConcreteConformance {
            pattern,
            substitutions,
            protocol,
        })
    }

    /// Replaces the substitutions of `sym` verbatim, without canonicalizing.
    ///
    /// `Decompose` and its inverse must be exact inverses, so the placeholder
    /// structure is kept as is.
    pub fn with_substitutions(&mut self, sym: SymbolId, substitutions: Vec<TermId>) -> SymbolId {
        let rebuilt = self.symbol(sym).with_substitutions(substitutions);
        self.intern_symbol(rebuilt)
    }

    // ---------------------------------------------------------------------
    // Reduction order
    // ---------------------------------------------------------------------

    #[inline]
    pub fn protocol_rank(&self, proto: ProtocolId) -> u32 {
        self.protocol_ranks
            .get(proto.0 as usize)
            .copied()
            .unwrap_or(u32::MAX)
    }

    /// Compares two protocols in protocol order.
    pub fn compare_protocols(&self, a: ProtocolId, b: ProtocolId) -> Ordering {
        (self.protocol_rank(a), a).cmp(&(self.protocol_rank(b), b))
    }

    /// Total order on symbols.
    pub fn compare_symbols(&self, a: SymbolId, b: SymbolId) -> Ordering {
        if a == b {
            return Ordering::Equal;
        }
        let (sa, sb) = (self.symbol(a), self.symbol(b));
        let by_kind = sa.kind().cmp(&sb.kind());
        if by_kind != Ordering::Equal {
            return by_kind;
        }
        match (sa, sb) {
            (Symbol::Protocol(p), Symbol::Protocol(q)) => self.compare_protocols(*p, *q),
            (
                Symbol::AssociatedType {
                    protocols: ps,
                    name: n1,
                },
                Symbol::AssociatedType {
                    protocols: qs,
                    name: n2,
                },
            ) => {
                // More protocols means a merged, hence smaller, symbol.
                qs.len()
                    .cmp(&ps.len())
                    .then_with(|| {
                        ps.iter()
                            .zip(qs.iter())
                            .map(|(p, q)| self.compare_protocols(*p, *q))
                            .find(|o| *o != Ordering::Equal)
                            .unwrap_or(Ordering::Equal)
                    })
                    .then_with(|| n1.cmp(n2))
            }
            (Symbol::GenericParam(x), Symbol::GenericParam(y)) => x.cmp(y),
            (Symbol::Name(x), Symbol::Name(y)) => x.cmp(y),
            (Symbol::Layout(x), Symbol::Layout(y)) => x.cmp(y),
            _ => self.compare_concrete_like(sa, sb),
        }
    }

    fn compare_concrete_like(&self, sa: &Symbol, sb: &Symbol) -> Ordering {
        let (pa, pb) = match (sa.pattern(), sb.pattern()) {
            (Some(pa), Some(pb)) => (pa, pb),
            _ => return Ordering::Equal,
        };
        let subs_a = sa.substitutions().unwrap_or(&[]);
        let subs_b = sb.substitutions().unwrap_or(&[]);
        pa.cmp(pb)
            .then_with(|| subs_a.len().cmp(&subs_b.len()))
            .then_with(|| {
                subs_a
                    .iter()
                    .zip(subs_b.iter())
                    .map(|(x, y)| self.compare_term_ids(*x, *y))
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| match (sa.protocol(), sb.protocol()) {
                (Some(p), Some(q)) => self.compare_protocols(p, q),
                _ => Ordering::Equal,
            })
    }

    /// Shortlex comparison of two symbol sequences.
    pub fn compare_terms(&self, a: &[SymbolId], b: &[SymbolId]) -> Ordering {
        a.len().cmp(&b.len()).then_with(|| {
            a.iter()
                .zip(b.iter())
                .map(|(x, y)| self.compare_symbols(*x, *y))
                .find(|o| *o != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        })
    }

    pub fn compare_term_ids(&self, a: TermId, b: TermId) -> Ordering {
        if a == b {
            return Ordering::Equal;
        }
        self.compare_terms(self.term(a), self.term(b))
    }

    /// Protocol domain a term belongs to, if any.
    pub fn root_protocol(&self, term: &[SymbolId]) -> Option<ProtocolId> {
        match term.first().map(|s| self.symbol(*s)) {
            Some(Symbol::Protocol(p)) => Some(*p),
            Some(Symbol::AssociatedType { protocols, .. }) => protocols.first().copied(),
            _ => None,
        }
    }

    /// Returns `true` if any symbol of the term is an unresolved name.
    pub fn has_unresolved_name(&self, term: &[SymbolId]) -> bool {
        term.iter()
            .any(|s| matches!(self.symbol(*s), Symbol::Name(_)))
    }

    // ---------------------------------------------------------------------
    // Substitution surgery
    // ---------------------------------------------------------------------

    /// Prepends `prefix` to every substitution of `sym`.
    pub fn prefix_substitutions(&mut self, sym: SymbolId, prefix: &[SymbolId]) -> SymbolId {
        let subs = match self.symbol(sym).substitutions() {
            Some(subs) if !prefix.is_empty() => subs.to_vec(),
            _ => return sym,
        };
        let adjusted = subs
            .into_iter()
            .map(|s| {
                let joined = MutableTerm::concat(prefix, self.term(s));
                self.intern_term(joined.symbols())
            })
            .collect();
        self.with_substitutions(sym, adjusted)
    }

    /// Removes `prefix` from every substitution of `sym`.
    ///
    /// Returns `None` if some substitution does not start with `prefix`.
    pub fn strip_prefix_substitutions(&mut self, sym: SymbolId, prefix: &[SymbolId]) -> Option<SymbolId> {
        let subs = match self.symbol(sym).substitutions() {
            Some(subs) => subs.to_vec(),
            None => return Some(sym),
        };
        let mut stripped = Vec::with_capacity(subs.len());
        for s in subs {
            let term = self.term(s);
            if term.len() <= prefix.len() || !term.starts_with(prefix) {
                return None;
            }
            let rest = term[prefix.len()..].to_vec();
            stripped.push(self.intern_term(&rest));
        }
        Some(self.with_substitutions(sym, stripped))
    }

    /// Inlines substitutions ending in a concrete-type symbol and
    /// canonicalizes the result.
    ///
    /// Returns `None` when the symbol is already folded.
    pub fn fold_concrete_symbol(&mut self, sym: SymbolId) -> Option<SymbolId> {
        let symbol = self.symbol(sym).clone();
        let (pattern, subs) = match (symbol.pattern(), symbol.substitutions()) {
            (Some(p), Some(s)) => (p.clone(), s.to_vec()),
            _ => return None,
        };
        let mut new_subs: Vec<TermId> = Vec::new();
        let mut replacement: Vec<TypePattern> = Vec::with_capacity(subs.len());
        for s in &subs {
            let term = self.term(*s).to_vec();
            let inlined = term.split_last().and_then(|(last, _)| match self.symbol(*last) {
                Symbol::ConcreteType {
                    pattern,
                    substitutions,
                } => Some((pattern.clone(), substitutions.clone())),
                _ => None,
            });
            match inlined {
                Some((inner, inner_subs)) => {
                    let base = new_subs.len() as u32;
                    new_subs.extend(inner_subs);
                    replacement.push(inner.substitute(&mut |i| TypePattern::Placeholder(base + i)));
                }
                None => {
                    replacement.push(TypePattern::Placeholder(new_subs.len() as u32));
                    new_subs.push(*s);
                }
            }
        }
        let folded = pattern.substitute(&mut |i| replacement[i as usize].clone());
        let (folded, new_subs) = canonicalize(folded, new_subs);
        let rebuilt = match symbol {
            Symbol::ConcreteType { .. } => Symbol::ConcreteType {
                pattern: folded,
                substitutions: new_subs,
            },
            Symbol::Superclass { .. } => Symbol::Superclass {
                pattern: folded,
                substitutions: new_subs,
            },
            Symbol::ConcreteConformance { protocol, .. } => Symbol::ConcreteConformance {
                pattern: folded,
                substitutions: new_subs,
                protocol,
            },
            _ => return None,
        };
        let id = self.intern_symbol(rebuilt);
        (id != sym).then_some(id)
    }

    // ---------------------------------------------------------------------
    // Formatting
    // ---------------------------------------------------------------------

    pub fn format_symbol(&self, id: SymbolId) -> String {
        match self.symbol(id) {
            Symbol::GenericParam(key) => key.to_string(),
            Symbol::Name(name) => name.clone(),
            Symbol::Protocol(p) => format!("[{}]", self.protocol_name(*p)),
            Symbol::AssociatedType { protocols, name } => {
                let names: Vec<&str> = protocols.iter().map(|p| self.protocol_name(*p)).collect();
                format!("[{}:{}]", names.join("&"), name)
            }
            Symbol::Layout(layout) => format!("[layout: {}]", layout),
            Symbol::Superclass {
                pattern,
                substitutions,
            } => format!("[superclass: {}]", self.format_pattern(pattern, substitutions)),
            Symbol::ConcreteType {
                pattern,
                substitutions,
            } => format!("[concrete: {}]", self.format_pattern(pattern, substitutions)),
            Symbol::ConcreteConformance {
                pattern,
                substitutions,
                protocol,
            } => format!(
                "[concrete: {} : {}]",
                self.format_pattern(pattern, substitutions),
                self.protocol_name(*protocol)
            ),
        }
    }

    fn format_pattern(&self, pattern: &TypePattern, substitutions: &[TermId]) -> String {
        if substitutions.is_empty() {
            return pattern.to_string();
        }
        let subs: Vec<String> = substitutions
            .iter()
            .map(|s| self.format_term(self.term(*s)))
            .collect();
        format!("{} with <{}>", pattern, subs.join(", "))
    }

    pub fn format_term(&self, term: &[SymbolId]) -> String {
        term.iter()
            .map(|s| self.format_symbol(*s))
            .collect::<Vec<_>>()
            .join(".")
    }

    // ---------------------------------------------------------------------
    // Type <-> term conversion
    // ---------------------------------------------------------------------

    /// Converts a type parameter into a term.
    ///
    /// With `domain == Some(P)` the `Self` parameter becomes `[P]` and
    /// `Self.A` becomes `[P:A]`; otherwise parameters become generic
    /// parameter symbols.
    pub fn term_for_type(&mut self, ty: &Type, domain: Option<ProtocolId>) -> Result<MutableTerm, RequirementError> {
        match ty {
            Type::Param(key) => match domain {
                Some(proto) if *key == GenericParamKey::SELF => {
                    Ok(MutableTerm::single(self.protocol_symbol(proto)))
                }
                Some(_) => Err(RequirementError::UnknownGenericParam(*key)),
                None => Ok(MutableTerm::single(self.generic_param_symbol(*key))),
            },
            Type::Member {
                base,
                name,
                protocol,
            } => {
                let mut term = self.term_for_type(base, domain)?;
                let root_proto = match (term.len(), term.first().map(|s| self.symbol(s))) {
                    (1, Some(Symbol::Protocol(p))) => Some(*p),
                    _ => None,
                };
                if let Some(root) = root_proto {
                    if self.is_visible_associated_type(root, name) {
                        let sym = self.associated_type_symbol(&[root], name);
                        return Ok(MutableTerm::single(sym));
                    }
                }
                match protocol {
                    Some(proto) => {
                        if !self.is_visible_associated_type(*proto, name) {
                            return Err(RequirementError::UnknownAssociatedType {
                                protocol: self.protocol_name(*proto).to_string(),
                                name: name.clone(),
                            });
                        }
                        let sym = self.associated_type_symbol(&[*proto], name);
                        term.push(sym);
                    }
                    None => {
                        let sym = self.name_symbol(name);
                        term.push(sym);
                    }
                }
                Ok(term)
            }
            Type::Nominal { .. } => Err(RequirementError::NotATypeParameter(ty.clone())),
        }
    }

    /// Splits a concrete type into a canonical pattern and substitutions.
    pub fn concrete_parts(
        &mut self,
        ty: &Type,
        domain: Option<ProtocolId>,
    ) -> Result<(TypePattern, Vec<TermId>), RequirementError> {
        let mut subs = Vec::new();
        let pattern = self.pattern_for_type(ty, domain, &mut subs)?;
        Ok(canonicalize(pattern, subs))
    }

    fn pattern_for_type(
        &mut self,
        ty: &Type,
        domain: Option<ProtocolId>,
        subs: &mut Vec<TermId>,
    ) -> Result<TypePattern, RequirementError> {
        match ty {
            Type::Nominal { name, args } => {
                let mut out = Vec::with_capacity(args.len());
                for arg in args {
                    out.push(self.pattern_for_type(arg, domain, subs)?);
                }
                Ok(TypePattern::Nominal {
                    name: name.clone(),
                    args: out,
                })
            }
            _ => {
                let term = self.term_for_type(ty, domain)?;
                let id = self.intern_term(term.symbols());
                subs.push(id);
                Ok(TypePattern::Placeholder(subs.len() as u32 - 1))
            }
        }
    }

    /// Builds the canonical `[concrete: ty]` symbol.
    pub fn symbol_for_concrete_type(&mut self, ty: &Type, domain: Option<ProtocolId>) -> Result<SymbolId, RequirementError> {
        let (pattern, subs) = self.concrete_parts(ty, domain)?;
        Ok(self.concrete_symbol(pattern, subs))
    }

    /// Builds the canonical `[superclass: ty]` symbol.
    pub fn symbol_for_superclass(&mut self, ty: &Type, domain: Option<ProtocolId>) -> Result<SymbolId, RequirementError> {
        let (pattern, subs) = self.concrete_parts(ty, domain)?;
        Ok(self.superclass_symbol(pattern, subs))
    }

    /// Converts a term back into a type parameter.
    ///
    /// A leading `[P]` is the protocol `Self`; a leading `[P:A]` is `Self.A`.
    pub fn type_for_term(&self, term: &[SymbolId]) -> Type {
        let mut ty: Option<Type> = None;
        for sym in term {
            ty = Some(match (ty, self.symbol(*sym)) {
                (None, Symbol::GenericParam(key)) => Type::Param(*key),
                (None, Symbol::Protocol(_)) => Type::Param(GenericParamKey::SELF),
                (None, Symbol::AssociatedType { protocols, name }) => Type::Member {
                    base: Box::new(Type::Param(GenericParamKey::SELF)),
                    name: name.clone(),
                    protocol: protocols.first().copied(),
                },
                (None, Symbol::Name(name)) => Type::Member {
                    base: Box::new(Type::Param(GenericParamKey::SELF)),
                    name: name.clone(),
                    protocol: None,
                },
                (Some(base), Symbol::AssociatedType { protocols, name }) => Type::Member {
                    base: Box::new(base),
                    name: name.clone(),
                    protocol: protocols.first().copied(),
                },
                (Some(base), Symbol::Name(name)) => Type::Member {
                    base: Box::new(base),
                    name: name.clone(),
                    protocol: None,
                },
                // A property or protocol symbol inside a term has no type
                // spelling; it does not change the subject.
                (Some(base), _) => base,
                (None, _) => Type::Param(GenericParamKey::SELF),
            });
        }
        ty.unwrap_or(Type::Param(GenericParamKey::SELF))
    }

    /// Rebuilds the type written by a concrete-like symbol.
    pub fn type_for_symbol(&self, sym: SymbolId) -> Option<Type> {
        let symbol = self.symbol(sym);
        let pattern = symbol.pattern()?;
        let subs = symbol.substitutions().unwrap_or(&[]);
        Some(self.type_from_pattern(pattern, subs))
    }

    pub fn type_from_pattern(&self, pattern: &TypePattern, subs: &[TermId]) -> Type {
        match pattern {
            TypePattern::Placeholder(i) => match subs.get(*i as usize) {
                Some(term) => self.type_for_term(self.term(*term)),
                None => Type::Param(GenericParamKey::SELF),
            },
            TypePattern::Nominal { name, args } => Type::Nominal {
                name: name.clone(),
                args: args.iter().map(|a| self.type_from_pattern(a, subs)).collect(),
            },
        }
    }

    /// Returns `true` if `sym` is a concrete-like symbol of `kind`.
    pub fn is_kind(&self, sym: SymbolId, kind: SymbolKind) -> bool {
        self.symbol(sym).kind() == kind
    }
}

/// Renumbers placeholders in first-occurrence order, merging identical
/// substitutions and dropping unused ones.
pub fn canonicalize(pattern: TypePattern, substitutions: Vec<TermId>) -> (TypePattern, Vec<TermId>) {
    let mut new_subs: Vec<TermId> = Vec::new();
    let mut remap: Vec<Option<u32>> = vec![None; substitutions.len()];
    for old in pattern.placeholders() {
        let old = old as usize;
        if old >= substitutions.len() || remap[old].is_some() {
            continue;
        }
        let term = substitutions[old];
        let index = match new_subs.iter().position(|t| *t == term) {
            Some(pos) => pos as u32,
            None => {
                new_subs.push(term);
                new_subs.len() as u32 - 1
            }
        };
        remap[old] = Some(index);
    }
    let pattern = pattern.substitute(&mut |i| {
        TypePattern::Placeholder(remap.get(i as usize).copied().flatten().unwrap_or(i))
    });
    (pattern, new_subs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol_graph::ProtocolGraph;

    fn graph() -> (ProtocolGraph, ProtocolId, ProtocolId) {
        let mut graph = ProtocolGraph::new();
        let base = graph.add_protocol("Sequence");
        graph.add_associated_type(base, "Element");
        let derived = graph.add_protocol("Collection");
        graph.add_inherited(derived, base);
        (graph, base, derived)
    }

    #[test]
    fn test_interning_is_content_addressed() {
        let (graph, base, _) = graph();
        let mut ctx = RewriteContext::new(&graph);
        let a = ctx.protocol_symbol(base);
        let b = ctx.protocol_symbol(base);
        assert_eq!(a, b);
        let t1 = ctx.intern_term(&[a]);
        let t2 = ctx.intern_term(&[b]);
        assert_eq!(t1, t2);
    }

    #[test]
    fn test_concrete_conformance_symbol_is_canonical() {
        let (graph, base, _) = graph();
        let mut ctx = RewriteContext::new(&graph);
        let t0 = ctx.generic_param_symbol(GenericParamKey::new(0, 0));
        let t0 = ctx.intern_term(&[t0]);
        let pair = |a, b| TypePattern::nominal("Pair", vec![TypePattern::Placeholder(a), TypePattern::Placeholder(b)]);
        // Same substitution twice, unused third entry.
        let messy = ctx.concrete_conformance_symbol(pair(1, 2), vec![t0, t0, t0], base);
        let clean = ctx.concrete_conformance_symbol(pair(0, 0), vec![t0], base);
        assert_eq!(messy, clean);
        assert!(ctx.is_kind(clean, SymbolKind::ConcreteConformance));
        assert_eq!(ctx.symbol(clean).protocol(), Some(base));
    }

    #[test]
    fn test_more_inherited_protocol_is_smaller() {
        let (graph, base, derived) = graph();
        let mut ctx = RewriteContext::new(&graph);
        let b = ctx.protocol_symbol(base);
        let d = ctx.protocol_symbol(derived);
        assert_eq!(ctx.compare_symbols(d, b), Ordering::Less);
    }

    #[test]
    fn test_shortlex_prefers_length() {
        let (graph, base, _) = graph();
        let mut ctx = RewriteContext::new(&graph);
        let t = ctx.generic_param_symbol(GenericParamKey::new(0, 0));
        let p = ctx.protocol_symbol(base);
        let name = ctx.name_symbol("Element");
        let assoc = ctx.associated_type_symbol(&[base], "Element");
        assert_eq!(ctx.compare_terms(&[t, p], &[t]), Ordering::Greater);
        assert_eq!(ctx.compare_terms(&[t, name], &[t, assoc]), Ordering::Greater);
    }

    #[test]
    fn test_merged_associated_type_is_smaller() {
        let (graph, base, derived) = graph();
        let mut ctx = RewriteContext::new(&graph);
        let single = ctx.associated_type_symbol(&[base], "Element");
        let merged = ctx.associated_type_symbol(&[base, derived], "Element");
        assert_eq!(ctx.compare_symbols(merged, single), Ordering::Less);
        assert_eq!(ctx.format_symbol(merged), "[Collection&Sequence:Element]");
    }

    #[test]
    fn test_term_for_type_in_protocol_domain() {
        let (graph, base, derived) = graph();
        let mut ctx = RewriteContext::new(&graph);
        let self_elt = Type::member(Type::param(0, 0), "Element");
        let term = ctx.term_for_type(&self_elt, Some(derived)).unwrap();
        assert_eq!(ctx.format_term(term.symbols()), "[Collection:Element]");
        let term = ctx.term_for_type(&self_elt, Some(base)).unwrap();
        assert_eq!(ctx.format_term(term.symbols()), "[Sequence:Element]");
        assert_eq!(ctx.type_for_term(term.symbols()), Type::member_of(Type::param(0, 0), "Element", base));
    }

    #[test]
    fn test_unresolved_member_becomes_name() {
        let (graph, _, _) = graph();
        let mut ctx = RewriteContext::new(&graph);
        let ty = Type::member(Type::param(0, 1), "Element");
        let term = ctx.term_for_type(&ty, None).unwrap();
        assert_eq!(ctx.format_term(term.symbols()), "τ_0_1.Element");
        assert!(ctx.has_unresolved_name(term.symbols()));
    }

    #[test]
    fn test_concrete_symbol_canonicalizes_substitutions() {
        let (graph, _, _) = graph();
        let mut ctx = RewriteContext::new(&graph);
        let pair = Type::nominal("Pair", vec![Type::param(0, 1), Type::param(0, 1)]);
        let sym = ctx.symbol_for_concrete_type(&pair, None).unwrap();
        assert_eq!(ctx.format_symbol(sym), "[concrete: Pair<σ0, σ0> with <τ_0_1>]");
        assert_eq!(ctx.type_for_symbol(sym), Some(pair));
    }

    #[test]
    fn test_prefix_substitutions_round_trip() {
        let (graph, base, _) = graph();
        let mut ctx = RewriteContext::new(&graph);
        let elt = ctx.associated_type_symbol(&[base], "Element");
        let elt_term = ctx.intern_term(&[elt]);
        let array = ctx.concrete_symbol(
            TypePattern::nominal("Array", vec![TypePattern::Placeholder(0)]),
            vec![elt_term],
        );
        let t = ctx.generic_param_symbol(GenericParamKey::new(0, 0));
        let adjusted = ctx.prefix_substitutions(array, &[t]);
        assert_eq!(ctx.format_symbol(adjusted), "[concrete: Array<σ0> with <τ_0_0.[Sequence:Element]>]");
        assert_eq!(ctx.strip_prefix_substitutions(adjusted, &[t]), Some(array));
    }

    #[test]
    fn test_fold_inlines_concrete_substitution() {
        let (graph, _, _) = graph();
        let mut ctx = RewriteContext::new(&graph);
        let u = ctx.generic_param_symbol(GenericParamKey::new(0, 1));
        let int = ctx.symbol_for_concrete_type(&Type::nominal("Int", vec![]), None).unwrap();
        let inner = ctx.intern_term(&[u, int]);
        let outer = ctx.concrete_symbol(
            TypePattern::nominal("Array", vec![TypePattern::Placeholder(0)]),
            vec![inner],
        );
        let folded = ctx.fold_concrete_symbol(outer).unwrap();
        assert_eq!(ctx.format_symbol(folded), "[concrete: Array<Int>]");
        assert_eq!(ctx.fold_concrete_symbol(folded), None);
    }
}
