//! Property map: the constraints holding on each reduced subject.
//!
//! Every live property rule `X.[p] => X` contributes `p` to the bag of its
//! subject `X`. A subject also inherits the bag of its longest suffix that
//! is itself a subject, with substitutions re-rooted under the extra
//! prefix. Combining two properties of one subject either proves one of
//! them implied (recorded as a loop through a relation), derives new rules
//! (concrete unification, concrete conformances, type witnesses), or finds
//! a conflict, which flags the rules involved.
//!
//! Building is idempotent: the `(subject, property, property)` triples
//! already handled are remembered by the rewrite system, so a rebuild after
//! another completion round only looks at new combinations.

use crate::arena::{SymbolId, TermId};
use crate::config::EngineOptions;
use crate::context::RewriteContext;
use crate::path::{RewritePath, RewriteStep, StepKind, TypeWitness, WitnessRhs};
use crate::protocol_graph::{ProtocolGraph, WitnessDecl};
use crate::requirement::{concrete_conforms, Type};
use crate::rewrite_system::RewriteSystem;
use crate::symbol::{LayoutConstraint, ProtocolId, Symbol, SymbolKind, TypePattern};
use crate::term::MutableTerm;
use std::collections::BTreeMap;

/// Summary of the properties of one subject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyBag {
    pub conformances: Vec<ProtocolId>,
    pub layout: Option<LayoutConstraint>,
    pub superclass: Option<SymbolId>,
    pub concrete_type: Option<SymbolId>,
}

impl PropertyBag {
    pub fn is_empty(&self) -> bool {
        self.conformances.is_empty()
            && self.layout.is_none()
            && self.superclass.is_none()
            && self.concrete_type.is_none()
    }
}

/// What one build did to the rewrite system.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyMapResult {
    /// New rules were added; completion must run again.
    pub added_rules: bool,
    /// Rule pairs found to be mutually unsatisfiable.
    pub conflicts: Vec<(usize, usize)>,
    /// A derived concrete type exceeded `max_concrete_nesting`.
    pub nesting_exceeded: bool,
}

/// One property of a subject `X`, with a path from `X.[symbol]` to `X`.
#[derive(Debug, Clone)]
struct Property {
    symbol: SymbolId,
    path: RewritePath,
    /// Rule the property comes from, possibly through a suffix.
    rule: usize,
    inherited: bool,
}

#[derive(Debug, Clone, Default)]
struct KeyProperties {
    conformances: Vec<Property>,
    layout: Option<Property>,
    superclass: Option<Property>,
    concrete: Option<Property>,
}

impl KeyProperties {
    fn all(&self) -> Vec<Property> {
        let mut out: Vec<Property> = Vec::new();
        out.extend(self.layout.iter().cloned());
        out.extend(self.superclass.iter().cloned());
        out.extend(self.concrete.iter().cloned());
        out.extend(self.conformances.iter().cloned());
        out
    }
}

/// Per-subject property bags, rebuilt after each completion round.
#[derive(Debug, Clone, Default)]
pub struct PropertyMap {
    bags: BTreeMap<TermId, KeyProperties>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subjects with at least one property.
    pub fn len(&self) -> usize {
        self.bags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bags.is_empty()
    }

    /// Rebuilds the bags from the live property rules of `system`, feeding
    /// derived rules back into it.
    pub fn build(
        &mut self,
        ctx: &mut RewriteContext,
        system: &mut RewriteSystem,
        graph: &ProtocolGraph,
        options: &EngineOptions,
    ) -> PropertyMapResult {
        let _timer = options.debug.timer("property_map");
        let mut own: BTreeMap<TermId, Vec<(usize, SymbolId)>> = BTreeMap::new();
        for (id, rule) in system.live_rules() {
            if rule.is_conflicting() {
                continue;
            }
            let symbol = match rule.property_symbol(ctx) {
                Some(symbol) if !ctx.is_kind(symbol, SymbolKind::ConcreteConformance) => symbol,
                _ => continue,
            };
            own.entry(rule.rhs()).or_default().push((id, symbol));
        }
        let mut keys: Vec<TermId> = own.keys().copied().collect();
        keys.sort_by(|a, b| ctx.compare_term_ids(*a, *b));

        let rules_before = system.rule_count();
        let mut builder = Builder {
            ctx: &mut *ctx,
            system: &mut *system,
            graph,
            options,
            result: PropertyMapResult::default(),
        };
        let mut bags: BTreeMap<TermId, KeyProperties> = BTreeMap::new();
        for key in keys {
            let key_term = builder.ctx.term(key).to_vec();
            let mut props = KeyProperties::default();
            if let Some((suffix, prefix_len)) = longest_suffix_key(builder.ctx, &bags, &key_term, 1) {
                let prefix = key_term[..prefix_len].to_vec();
                for property in bags[&suffix].all() {
                    let property = builder.inherit(&prefix, &property);
                    builder.add_property(&key_term, key, &mut props, property);
                }
            }
            for &(rule, symbol) in &own[&key] {
                let property = Property {
                    symbol,
                    path: RewritePath::from_steps(vec![RewriteStep::rule(rule, 0, 0, false)]),
                    rule,
                    inherited: false,
                };
                builder.add_property(&key_term, key, &mut props, property);
            }
            bags.insert(key, props);
        }

        let mut result = builder.result;
        result.added_rules = system.rule_count() > rules_before;
        self.bags = bags;
        result
    }

    /// Properties of the reduced term `term`.
    pub fn lookup(&self, ctx: &mut RewriteContext, term: &[SymbolId]) -> PropertyBag {
        let (key, prefix_len) = match longest_suffix_key(ctx, &self.bags, term, 0) {
            Some(found) => found,
            None => return PropertyBag::default(),
        };
        let prefix = term[..prefix_len].to_vec();
        let props = &self.bags[&key];
        let mut bag = PropertyBag::default();
        for p in &props.conformances {
            bag.conformances.extend(ctx.symbol(p.symbol).protocol());
        }
        bag.conformances.sort();
        bag.conformances.dedup();
        if let Some(p) = &props.layout {
            if let Symbol::Layout(layout) = ctx.symbol(p.symbol) {
                bag.layout = Some(*layout);
            }
        }
        bag.superclass = props
            .superclass
            .as_ref()
            .map(|p| ctx.prefix_substitutions(p.symbol, &prefix));
        bag.concrete_type = props
            .concrete
            .as_ref()
            .map(|p| ctx.prefix_substitutions(p.symbol, &prefix));
        bag
    }
}

/// The longest suffix of `term` starting at or after `min_start` that is a
/// key, with the length of the prefix before it.
fn longest_suffix_key<V>(
    ctx: &RewriteContext,
    bags: &BTreeMap<TermId, V>,
    term: &[SymbolId],
    min_start: usize,
) -> Option<(TermId, usize)> {
    (min_start..term.len()).find_map(|start| {
        let id = ctx.find_term(&term[start..])?;
        bags.contains_key(&id).then_some((id, start))
    })
}

/// Placeholder-level facts two unified patterns induce.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Induced {
    SameType(TermId, TermId),
    Concrete(TermId, TypePattern, Vec<TermId>),
}

fn unify_patterns(
    p1: &TypePattern,
    s1: &[TermId],
    p2: &TypePattern,
    s2: &[TermId],
    out: &mut Vec<Induced>,
) -> bool {
    match (p1, p2) {
        (TypePattern::Placeholder(i), TypePattern::Placeholder(j)) => {
            match (s1.get(*i as usize), s2.get(*j as usize)) {
                (Some(a), Some(b)) => {
                    if a != b {
                        out.push(Induced::SameType(*a, *b));
                    }
                    true
                }
                _ => false,
            }
        }
        (TypePattern::Placeholder(i), nominal) => match s1.get(*i as usize) {
            Some(a) => {
                out.push(Induced::Concrete(*a, nominal.clone(), s2.to_vec()));
                true
            }
            None => false,
        },
        (nominal, TypePattern::Placeholder(j)) => match s2.get(*j as usize) {
            Some(b) => {
                out.push(Induced::Concrete(*b, nominal.clone(), s1.to_vec()));
                true
            }
            None => false,
        },
        (
            TypePattern::Nominal { name: n1, args: a1 },
            TypePattern::Nominal { name: n2, args: a2 },
        ) => {
            n1 == n2
                && a1.len() == a2.len()
                && a1
                    .iter()
                    .zip(a2.iter())
                    .all(|(x, y)| unify_patterns(x, s1, y, s2, out))
        }
    }
}

/// Rewrites a type written over a nominal's generic parameters into a
/// pattern over that nominal's arguments.
fn instantiate(ty: &Type, args: &[TypePattern]) -> Option<TypePattern> {
    match ty {
        Type::Param(key) if key.depth == 0 => args.get(key.index as usize).cloned(),
        Type::Nominal { name, args: inner } => {
            let inner = inner
                .iter()
                .map(|arg| instantiate(arg, args))
                .collect::<Option<Vec<_>>>()?;
            Some(TypePattern::Nominal {
                name: name.clone(),
                args: inner,
            })
        }
        _ => None,
    }
}

/// Walks the superclass chain of `pattern` up to the class named `ancestor`.
fn ancestor_pattern(graph: &ProtocolGraph, pattern: &TypePattern, ancestor: &str) -> Option<TypePattern> {
    let mut current = pattern.clone();
    for _ in 0..64 {
        let name = current.nominal_name()?.to_string();
        if name == ancestor {
            return Some(current);
        }
        let superclass = graph.superclass_of(&name)?;
        current = instantiate(superclass, current.args())?;
    }
    None
}

fn parts(ctx: &RewriteContext, symbol: SymbolId) -> (TypePattern, Vec<TermId>) {
    let symbol = ctx.symbol(symbol);
    (
        symbol.pattern().cloned().unwrap_or(TypePattern::Placeholder(0)),
        symbol.substitutions().map(<[_]>::to_vec).unwrap_or_default(),
    )
}

struct Builder<'a> {
    ctx: &'a mut RewriteContext,
    system: &'a mut RewriteSystem,
    graph: &'a ProtocolGraph,
    options: &'a EngineOptions,
    result: PropertyMapResult,
}

impl<'a> Builder<'a> {
    /// Re-roots a suffix property under `prefix`.
    fn inherit(&mut self, prefix: &[SymbolId], property: &Property) -> Property {
        let symbol = self.ctx.prefix_substitutions(property.symbol, prefix);
        let mut path = RewritePath::new();
        if symbol != property.symbol {
            path.push(RewriteStep::new(
                StepKind::AdjustConcreteType {
                    prefix_len: prefix.len(),
                },
                0,
                0,
                true,
            ));
        }
        path.append(&property.path.whiskered(prefix.len(), 0));
        Property {
            symbol,
            path,
            rule: property.rule,
            inherited: true,
        }
    }

    fn add_property(&mut self, key: &[SymbolId], key_id: TermId, props: &mut KeyProperties, property: Property) {
        let kind = self.ctx.symbol(property.symbol).kind();
        match kind {
            SymbolKind::Protocol => {
                if props.conformances.iter().any(|p| p.symbol == property.symbol) {
                    return;
                }
                if let Some(concrete) = props.concrete.clone() {
                    self.conformance_of_concrete(key, key_id, &concrete, &property);
                }
                if let Some(superclass) = props.superclass.clone() {
                    self.conformance_of_superclass(key, key_id, &superclass, &property);
                }
                props.conformances.push(property);
            }
            SymbolKind::Layout => {
                if let Some(concrete) = props.concrete.clone() {
                    self.concrete_and_layout(key, key_id, &concrete, &property);
                }
                if let Some(superclass) = props.superclass.clone() {
                    self.superclass_and_layout(key, key_id, &superclass, &property);
                }
                match props.layout.clone() {
                    None => props.layout = Some(property),
                    Some(existing) => {
                        if self.layout_pair(key, key_id, &existing, &property) {
                            props.layout = Some(property);
                        }
                    }
                }
            }
            SymbolKind::Superclass => {
                if let Some(concrete) = props.concrete.clone() {
                    self.concrete_and_superclass(key, key_id, &concrete, &property);
                }
                if let Some(layout) = props.layout.clone() {
                    self.superclass_and_layout(key, key_id, &property, &layout);
                }
                for conformance in props.conformances.clone() {
                    self.conformance_of_superclass(key, key_id, &property, &conformance);
                }
                match props.superclass.clone() {
                    None => props.superclass = Some(property),
                    Some(existing) => {
                        if self.superclass_pair(key, key_id, &existing, &property) {
                            props.superclass = Some(property);
                        }
                    }
                }
            }
            SymbolKind::ConcreteType => {
                if let Some(layout) = props.layout.clone() {
                    self.concrete_and_layout(key, key_id, &property, &layout);
                }
                if let Some(superclass) = props.superclass.clone() {
                    self.concrete_and_superclass(key, key_id, &property, &superclass);
                }
                for conformance in props.conformances.clone() {
                    self.conformance_of_concrete(key, key_id, &property, &conformance);
                }
                match props.concrete.clone() {
                    None => props.concrete = Some(property),
                    Some(existing) => self.concrete_pair(key, key_id, &existing, &property),
                }
            }
            _ => {}
        }
    }

    /// Returns `false` if the pair was handled before or both properties
    /// come from the same suffix.
    fn first_visit(&mut self, key_id: TermId, a: &Property, b: &Property) -> bool {
        if a.inherited && b.inherited {
            return false;
        }
        self.system
            .processed_properties
            .insert((key_id, a.symbol, b.symbol))
    }

    fn conflict(&mut self, key: &[SymbolId], first: usize, second: usize) {
        self.record_conflict(key, first, second, &[first, second]);
    }

    /// Records a conflict between `first` and `second`, marking only the
    /// rules in `marked` as conflicting.
    fn record_conflict(&mut self, key: &[SymbolId], first: usize, second: usize, marked: &[usize]) {
        for &rule in marked {
            if !self.system.is_imported(rule) && !self.system.rule(rule).is_permanent() {
                self.system.rule_mut(rule).mark_conflicting();
            }
        }
        self.result.conflicts.push((first, second));
        tracing::warn!(
            subject = %self.ctx.format_term(key),
            first = %self.system.rule(first).format(self.ctx),
            second = %self.system.rule(second).format(self.ctx),
            "conflicting requirements"
        );
    }

    /// Records that `implied` follows from `stronger` on `X`.
    ///
    /// The loop at `X.[b]` goes down to `X` along `b`'s own path and back up
    /// through `X.[a].[b] => X.[a]`.
    fn record_implied(&mut self, key: &[SymbolId], stronger: &Property, implied: &Property) {
        let relation = self.system.add_relation(
            self.ctx,
            &[stronger.symbol, implied.symbol],
            &[stronger.symbol],
        );
        if !self.system.records_loops() {
            return;
        }
        let mut up = stronger.path.inverted().whiskered(0, 1);
        up.push(RewriteStep::new(StepKind::Relation(relation), key.len(), 0, false));
        up.append(&stronger.path);
        let mut path = implied.path.clone();
        path.append(&up.inverted());
        let mut basepoint = MutableTerm::from(key);
        basepoint.push(implied.symbol);
        self.system.record_loop(basepoint, path);
    }

    fn add_rule(&mut self, lhs: MutableTerm, rhs: MutableTerm, path: Option<&RewritePath>) -> bool {
        self.system.add_rule(self.ctx, lhs, rhs, path)
    }

    fn nesting_ok(&mut self, pattern: &TypePattern) -> bool {
        if pattern.nesting_depth() > self.options.max_concrete_nesting {
            self.result.nesting_exceeded = true;
            return false;
        }
        true
    }

    // ---------------------------------------------------------------------
    // Pairs
    // ---------------------------------------------------------------------

    fn layout_pair(&mut self, key: &[SymbolId], key_id: TermId, existing: &Property, new: &Property) -> bool {
        let (a, b) = match (self.ctx.symbol(existing.symbol), self.ctx.symbol(new.symbol)) {
            (Symbol::Layout(a), Symbol::Layout(b)) => (*a, *b),
            _ => return false,
        };
        if !self.first_visit(key_id, existing, new) {
            return b.implies(a) && !a.implies(b);
        }
        if a.implies(b) {
            self.record_implied(key, existing, new);
            false
        } else if b.implies(a) {
            self.record_implied(key, new, existing);
            true
        } else {
            self.conflict(key, existing.rule, new.rule);
            false
        }
    }

    fn concrete_and_layout(&mut self, key: &[SymbolId], key_id: TermId, concrete: &Property, layout: &Property) {
        if !self.first_visit(key_id, concrete, layout) {
            return;
        }
        let l = match self.ctx.symbol(layout.symbol) {
            Symbol::Layout(l) => *l,
            _ => return,
        };
        let name = parts(self.ctx, concrete.symbol).0.nominal_name().map(str::to_string);
        let compatible = !l.is_class() || name.map_or(false, |n| self.graph.is_class(&n));
        if compatible {
            self.record_implied(key, concrete, layout);
        } else {
            self.conflict(key, concrete.rule, layout.rule);
        }
    }

    fn superclass_and_layout(&mut self, key: &[SymbolId], key_id: TermId, superclass: &Property, layout: &Property) {
        if !self.first_visit(key_id, superclass, layout) {
            return;
        }
        let l = match self.ctx.symbol(layout.symbol) {
            Symbol::Layout(l) => *l,
            _ => return,
        };
        if LayoutConstraint::Class.implies(l) {
            self.record_implied(key, superclass, layout);
        } else if !l.is_compatible_with(LayoutConstraint::Class) {
            self.conflict(key, superclass.rule, layout.rule);
        }
    }

    fn concrete_pair(&mut self, key: &[SymbolId], key_id: TermId, existing: &Property, new: &Property) {
        if !self.first_visit(key_id, existing, new) {
            return;
        }
        let (p1, s1) = parts(self.ctx, existing.symbol);
        let (p2, s2) = parts(self.ctx, new.symbol);
        self.unify(key, existing, &p1, &s1, new, &p2, &s2);
    }

    /// Unifies two concrete-like properties of `X`, adding the induced
    /// rules. If both symbols then join to the same symbol, the loop
    /// through the join proves `b` redundant given `a`.
    #[allow(clippy::too_many_arguments)]
    fn unify(
        &mut self,
        key: &[SymbolId],
        a: &Property,
        p1: &TypePattern,
        s1: &[TermId],
        b: &Property,
        p2: &TypePattern,
        s2: &[TermId],
    ) {
        let mut induced = Vec::new();
        if !unify_patterns(p1, s1, p2, s2, &mut induced) {
            self.conflict(key, a.rule, b.rule);
            return;
        }
        for fact in induced {
            match fact {
                Induced::SameType(x, y) => {
                    let (x, y) = (MutableTerm::from(self.ctx.term(x)), MutableTerm::from(self.ctx.term(y)));
                    self.add_rule(x, y, None);
                }
                Induced::Concrete(subject, pattern, subs) => {
                    if !self.nesting_ok(&pattern) {
                        continue;
                    }
                    let symbol = self.ctx.concrete_symbol(pattern, subs);
                    let rhs = MutableTerm::from(self.ctx.term(subject));
                    let mut lhs = rhs.clone();
                    lhs.push(symbol);
                    self.add_rule(lhs, rhs, None);
                }
            }
        }
        if !self.system.records_loops() {
            return;
        }
        let (ma, ja) = self.join(key, a.symbol);
        let (mb, jb) = self.join(key, b.symbol);
        if ma != mb {
            return;
        }
        let mut path = a.path.inverted();
        path.append(&ja);
        path.append(&jb.inverted());
        path.append(&b.path);
        self.system.record_loop(MutableTerm::from(key), path);
    }

    /// Normalizes the substitutions of `symbol` on `X`, replacing each
    /// substitution that has a concrete type by that type, and folds.
    /// Returns the final symbol and the path from `X.[symbol]` to it.
    fn join(&mut self, key: &[SymbolId], symbol: SymbolId) -> (SymbolId, RewritePath) {
        let subs = match self.ctx.symbol(symbol).substitutions() {
            Some(subs) if !subs.is_empty() => subs.to_vec(),
            _ => return (symbol, RewritePath::new()),
        };
        let count = subs.len();
        let mut path = RewritePath::from_steps(vec![RewriteStep::decompose(count, 0, false)]);
        let mut joined = subs.clone();
        let mut changed = false;
        for i in (0..count).rev() {
            let mut sub = MutableTerm::from(self.ctx.term(subs[i]));
            let mut sub_path = RewritePath::new();
            changed |= self.system.simplify(self.ctx, &mut sub, Some(&mut sub_path));
            path.append(&sub_path);
            if let Some((rule, concrete)) = self.system.concrete_type_rule(self.ctx, sub.symbols()) {
                path.push(RewriteStep::rule(rule, 0, 0, true));
                sub.push(concrete);
                changed = true;
            }
            joined[i] = self.ctx.intern_term(sub.symbols());
            path.push(RewriteStep::shift(false));
        }
        if !changed {
            return (symbol, RewritePath::new());
        }
        for _ in 0..count {
            path.push(RewriteStep::shift(true));
        }
        path.push(RewriteStep::decompose(count, 0, true));

        let mut current = self.ctx.with_substitutions(symbol, joined);
        while let Some(folded) = self.ctx.fold_concrete_symbol(current) {
            let relation = self.system.add_relation(self.ctx, &[current], &[folded]);
            path.push(RewriteStep::new(StepKind::Relation(relation), key.len(), 0, false));
            current = folded;
        }
        (current, path)
    }

    /// Keeps the more derived class. Returns `true` if `new` replaces
    /// `existing` as the subject's superclass.
    fn superclass_pair(&mut self, key: &[SymbolId], key_id: TermId, existing: &Property, new: &Property) -> bool {
        let (p1, s1) = parts(self.ctx, existing.symbol);
        let (p2, s2) = parts(self.ctx, new.symbol);
        let (n1, n2) = match (p1.nominal_name(), p2.nominal_name()) {
            (Some(a), Some(b)) => (a.to_string(), b.to_string()),
            _ => return false,
        };
        let new_is_derived = n1 != n2 && ancestor_pattern(self.graph, &p2, &n1).is_some();
        if !self.first_visit(key_id, existing, new) {
            return new_is_derived;
        }
        if n1 == n2 {
            self.unify(key, existing, &p1, &s1, new, &p2, &s2);
            return false;
        }
        if let Some(up) = ancestor_pattern(self.graph, &p1, &n2) {
            self.unify_ancestor(&up, &s1, &p2, &s2);
            self.record_implied(key, existing, new);
            return false;
        }
        if let Some(up) = ancestor_pattern(self.graph, &p2, &n1) {
            self.unify_ancestor(&up, &s2, &p1, &s1);
            self.record_implied(key, new, existing);
            return true;
        }
        self.conflict(key, existing.rule, new.rule);
        false
    }

    fn concrete_and_superclass(&mut self, key: &[SymbolId], key_id: TermId, concrete: &Property, superclass: &Property) {
        if !self.first_visit(key_id, concrete, superclass) {
            return;
        }
        let (pc, sc) = parts(self.ctx, concrete.symbol);
        let (ps, ss) = parts(self.ctx, superclass.symbol);
        let target = ps.nominal_name().map(str::to_string);
        let up = target.and_then(|t| ancestor_pattern(self.graph, &pc, &t));
        match up {
            Some(up) => {
                self.unify_ancestor(&up, &sc, &ps, &ss);
                self.record_implied(key, concrete, superclass);
            }
            None => self.conflict(key, concrete.rule, superclass.rule),
        }
    }

    /// Adds the rules induced by an ancestor instantiation. Mismatched
    /// arguments are left to the concrete pair check.
    fn unify_ancestor(&mut self, up: &TypePattern, s_up: &[TermId], other: &TypePattern, s_other: &[TermId]) {
        let mut induced = Vec::new();
        if !unify_patterns(up, s_up, other, s_other, &mut induced) {
            return;
        }
        for fact in induced {
            match fact {
                Induced::SameType(x, y) => {
                    let (x, y) = (MutableTerm::from(self.ctx.term(x)), MutableTerm::from(self.ctx.term(y)));
                    self.add_rule(x, y, None);
                }
                Induced::Concrete(subject, pattern, subs) => {
                    if !self.nesting_ok(&pattern) {
                        continue;
                    }
                    let symbol = self.ctx.concrete_symbol(pattern, subs);
                    let rhs = MutableTerm::from(self.ctx.term(subject));
                    let mut lhs = rhs.clone();
                    lhs.push(symbol);
                    self.add_rule(lhs, rhs, None);
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Concrete conformances
    // ---------------------------------------------------------------------

    fn conformance_of_concrete(&mut self, key: &[SymbolId], key_id: TermId, concrete: &Property, conformance: &Property) {
        if !self.first_visit(key_id, concrete, conformance) {
            return;
        }
        let proto = match self.ctx.symbol(conformance.symbol).protocol() {
            Some(proto) => proto,
            None => return,
        };
        let (pattern, subs) = parts(self.ctx, concrete.symbol);
        let name = match pattern.nominal_name() {
            Some(name) => name.to_string(),
            None => return,
        };
        if !concrete_conforms(self.graph, &name, proto) {
            self.record_conflict(key, conformance.rule, concrete.rule, &[conformance.rule]);
            return;
        }
        self.record_implied(key, concrete, conformance);
        let cc = self.add_concrete_conformance(key, concrete, conformance, proto, StepKind::ConcreteConformance);
        self.add_type_witnesses(key, cc, &name, proto, &pattern, &subs);
    }

    fn conformance_of_superclass(&mut self, key: &[SymbolId], key_id: TermId, superclass: &Property, conformance: &Property) {
        if !self.first_visit(key_id, superclass, conformance) {
            return;
        }
        let proto = match self.ctx.symbol(conformance.symbol).protocol() {
            Some(proto) => proto,
            None => return,
        };
        let name = match parts(self.ctx, superclass.symbol).0.nominal_name() {
            Some(name) => name.to_string(),
            None => return,
        };
        if concrete_conforms(self.graph, &name, proto) {
            self.add_concrete_conformance(key, superclass, conformance, proto, StepKind::SuperclassConformance);
        }
    }

    /// Adds `X.[concrete: C : P] => X`, justified by unfolding the
    /// conformance symbol and dropping both properties.
    fn add_concrete_conformance(
        &mut self,
        key: &[SymbolId],
        concrete: &Property,
        conformance: &Property,
        protocol: ProtocolId,
        step: StepKind,
    ) -> SymbolId {
        let (pattern, substitutions) = parts(self.ctx, concrete.symbol);
        let cc = self.ctx.intern_symbol(Symbol::ConcreteConformance {
            pattern,
            substitutions,
            protocol,
        });
        let mut path = RewritePath::from_steps(vec![RewriteStep::new(step, key.len(), 0, true)]);
        path.append(&concrete.path.whiskered(0, 1));
        path.append(&conformance.path);
        let mut lhs = MutableTerm::from(key);
        lhs.push(cc);
        self.add_rule(lhs, MutableTerm::from(key), Some(&path));
        cc
    }

    /// Derives a rule for each associated type of `proto` whose witness the
    /// conformance of `name` declares.
    fn add_type_witnesses(
        &mut self,
        key: &[SymbolId],
        cc: SymbolId,
        name: &str,
        proto: ProtocolId,
        pattern: &TypePattern,
        subs: &[TermId],
    ) {
        let mut subject = MutableTerm::from(key);
        subject.push(cc);
        let mut cc_path = RewritePath::new();
        let mut reduced = subject.clone();
        self.system.simplify(self.ctx, &mut reduced, Some(&mut cc_path));
        if reduced.symbols() != key {
            return;
        }

        let assoc_names: Vec<String> = self.ctx.visible_associated_types(proto).to_vec();
        for assoc_name in assoc_names {
            let witness = match self.graph.type_witness(name, proto, &assoc_name) {
                Some(witness) => witness.clone(),
                None => continue,
            };
            let assoc = self.ctx.associated_type_symbol(&[proto], &assoc_name);
            let mut lhs_term = subject.clone();
            lhs_term.push(assoc);
            let lhs_id = self.ctx.intern_term(lhs_term.symbols());
            let mut member = MutableTerm::from(key);
            member.push(assoc);

            // X.[P:A] => X.[concrete: C : P].[P:A]
            let mut path = cc_path.inverted().whiskered(0, 1);
            match witness {
                WitnessDecl::SelfType => {
                    let rhs = self.ctx.intern_term(subject.symbols());
                    let id = self.system.add_type_witness(TypeWitness {
                        lhs: lhs_id,
                        rhs: WitnessRhs::Term(rhs),
                    });
                    path.push(RewriteStep::new(StepKind::SameTypeWitness(id), 0, 0, false));
                    path.append(&cc_path);
                    self.add_rule(member, MutableTerm::from(key), Some(&path));
                }
                WitnessDecl::Type(ty) => {
                    let witness_pattern = match instantiate(&ty, pattern.args()) {
                        Some(p) => p,
                        None => continue,
                    };
                    match witness_pattern {
                        TypePattern::Placeholder(i) => {
                            let target = match subs.get(i as usize) {
                                Some(t) => *t,
                                None => continue,
                            };
                            let id = self.system.add_type_witness(TypeWitness {
                                lhs: lhs_id,
                                rhs: WitnessRhs::Term(target),
                            });
                            path.push(RewriteStep::new(StepKind::AbstractTypeWitness(id), 0, 0, false));
                            let rhs = MutableTerm::from(self.ctx.term(target));
                            self.add_rule(member, rhs, Some(&path));
                        }
                        nominal => {
                            if !self.nesting_ok(&nominal) {
                                continue;
                            }
                            let w = self.ctx.concrete_symbol(nominal, subs.to_vec());
                            let id = self.system.add_type_witness(TypeWitness {
                                lhs: lhs_id,
                                rhs: WitnessRhs::Concrete(w),
                            });
                            // X.[P:A].[w] => X.[cc].[P:A].[w] => X.[cc].[P:A] => X.[P:A]
                            let mut path = cc_path.inverted().whiskered(0, 2);
                            path.push(RewriteStep::new(StepKind::ConcreteTypeWitness(id), 0, 0, false));
                            path.append(&cc_path.whiskered(0, 1));
                            let mut lhs = member.clone();
                            lhs.push(w);
                            self.add_rule(lhs, member, Some(&path));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::DebugOptions;
    use crate::evaluator::RewritePathEvaluator;
    use crate::protocol_graph::{ConformanceDecl, NominalDecl};
    use crate::symbol::GenericParamKey;

    fn complete_with_properties(
        ctx: &mut RewriteContext,
        system: &mut RewriteSystem,
        graph: &ProtocolGraph,
    ) -> (PropertyMap, PropertyMapResult) {
        let options = EngineOptions::default();
        let mut map = PropertyMap::new();
        let mut conflicts = Vec::new();
        loop {
            system.complete(ctx, options.limits(), &DebugOptions::NONE);
            let result = map.build(ctx, system, graph, &options);
            conflicts.extend(result.conflicts.clone());
            if !result.added_rules {
                return (
                    map,
                    PropertyMapResult {
                        conflicts,
                        ..result
                    },
                );
            }
        }
    }

    fn int() -> TypePattern {
        TypePattern::nominal("Int", vec![])
    }

    #[test]
    fn test_conflicting_concrete_types_flag_both_rules() {
        let graph = ProtocolGraph::new();
        let mut ctx = RewriteContext::new(&graph);
        let t = ctx.generic_param_symbol(GenericParamKey::new(0, 0));
        let int = ctx.concrete_symbol(int(), vec![]);
        let string = ctx.concrete_symbol(TypePattern::nominal("String", vec![]), vec![]);
        let mut system = RewriteSystem::new(true);
        system.add_rule(&mut ctx, MutableTerm::from_symbols(vec![t, int]), MutableTerm::single(t), None);
        system.add_rule(&mut ctx, MutableTerm::from_symbols(vec![t, string]), MutableTerm::single(t), None);
        let (_, result) = complete_with_properties(&mut ctx, &mut system, &graph);
        assert_eq!(result.conflicts.len(), 1);
        assert!(system.rule(0).is_conflicting());
        assert!(system.rule(1).is_conflicting());
    }

    #[test]
    fn test_unification_induces_same_type_and_closes_loop() {
        let graph = ProtocolGraph::new();
        let mut ctx = RewriteContext::new(&graph);
        let t: Vec<SymbolId> = (0..3)
            .map(|i| ctx.generic_param_symbol(GenericParamKey::new(0, i)))
            .collect();
        let array = |i| TypePattern::nominal("Array", vec![TypePattern::Placeholder(i)]);
        let s1 = ctx.intern_term(&[t[1]]);
        let s2 = ctx.intern_term(&[t[2]]);
        let a1 = ctx.concrete_symbol(array(0), vec![s1]);
        let a2 = ctx.concrete_symbol(array(0), vec![s2]);
        let mut system = RewriteSystem::new(true);
        system.add_rule(&mut ctx, MutableTerm::from_symbols(vec![t[0], a1]), MutableTerm::single(t[0]), None);
        system.add_rule(&mut ctx, MutableTerm::from_symbols(vec![t[0], a2]), MutableTerm::single(t[0]), None);
        let (mut map, result) = complete_with_properties(&mut ctx, &mut system, &graph);
        assert!(result.conflicts.is_empty());

        let mut term = MutableTerm::single(t[2]);
        system.simplify(&mut ctx, &mut term, None);
        assert_eq!(term.symbols(), &[t[1]]);
        let bag = map.lookup(&mut ctx, &[t[0]]);
        assert_eq!(bag.concrete_type, Some(a1));
        for lp in system.loops().to_vec() {
            RewritePathEvaluator::verify_loop(&lp, &system, &mut ctx).unwrap();
        }
    }

    #[test]
    fn test_concrete_conformance_and_witness() {
        let mut graph = ProtocolGraph::new();
        let seq = graph.add_protocol("Sequence");
        graph.add_associated_type(seq, "Element");
        graph.add_nominal(NominalDecl::new("Array", 1));
        graph.add_conformance(
            "Array",
            seq,
            ConformanceDecl::new().with_witness("Element", WitnessDecl::Type(Type::param(0, 0))),
        );
        let mut ctx = RewriteContext::new(&graph);
        let t0 = ctx.generic_param_symbol(GenericParamKey::new(0, 0));
        let t1 = ctx.generic_param_symbol(GenericParamKey::new(0, 1));
        let ps = ctx.protocol_symbol(seq);
        let s1 = ctx.intern_term(&[t1]);
        let array = ctx.concrete_symbol(TypePattern::nominal("Array", vec![TypePattern::Placeholder(0)]), vec![s1]);
        let mut system = RewriteSystem::new(true);
        system.add_rule(&mut ctx, MutableTerm::from_symbols(vec![t0, ps]), MutableTerm::single(t0), None);
        system.add_rule(&mut ctx, MutableTerm::from_symbols(vec![t0, array]), MutableTerm::single(t0), None);
        let (_, result) = complete_with_properties(&mut ctx, &mut system, &graph);
        assert!(result.conflicts.is_empty());

        // τ_0_0.[Sequence:Element] reduces to τ_0_1.
        let element = ctx.associated_type_symbol(&[seq], "Element");
        let mut term = MutableTerm::from_symbols(vec![t0, element]);
        system.simplify(&mut ctx, &mut term, None);
        assert_eq!(term.symbols(), &[t1]);
        assert_eq!(system.type_witness_count(), 1);
        for lp in system.loops().to_vec() {
            RewritePathEvaluator::verify_loop(&lp, &system, &mut ctx).unwrap();
        }
    }

    #[test]
    fn test_non_conforming_concrete_type_conflicts() {
        let mut graph = ProtocolGraph::new();
        let p = graph.add_protocol("P");
        graph.add_nominal(NominalDecl::new("Int", 0));
        let mut ctx = RewriteContext::new(&graph);
        let t0 = ctx.generic_param_symbol(GenericParamKey::new(0, 0));
        let ps = ctx.protocol_symbol(p);
        let int = ctx.concrete_symbol(int(), vec![]);
        let mut system = RewriteSystem::new(false);
        system.add_rule(&mut ctx, MutableTerm::from_symbols(vec![t0, ps]), MutableTerm::single(t0), None);
        system.add_rule(&mut ctx, MutableTerm::from_symbols(vec![t0, int]), MutableTerm::single(t0), None);
        let (_, result) = complete_with_properties(&mut ctx, &mut system, &graph);
        assert_eq!(result.conflicts, vec![(0, 1)]);
        assert!(system.rule(0).is_conflicting());
        assert!(!system.rule(1).is_conflicting());
    }

    #[test]
    fn test_suffix_properties_are_inherited() {
        let mut graph = ProtocolGraph::new();
        let p = graph.add_protocol("P");
        let q = graph.add_protocol("Q");
        graph.add_associated_type(p, "A");
        let mut ctx = RewriteContext::new(&graph);
        let t0 = ctx.generic_param_symbol(GenericParamKey::new(0, 0));
        let ps = ctx.protocol_symbol(p);
        let qs = ctx.protocol_symbol(q);
        let pa = ctx.associated_type_symbol(&[p], "A");
        let mut system = RewriteSystem::new(false);
        system.add_rule(&mut ctx, MutableTerm::from_symbols(vec![pa, qs]), MutableTerm::single(pa), None);
        system.add_rule(&mut ctx, MutableTerm::from_symbols(vec![t0, ps]), MutableTerm::single(t0), None);
        let (mut map, _) = complete_with_properties(&mut ctx, &mut system, &graph);
        let bag = map.lookup(&mut ctx, &[t0, pa]);
        assert_eq!(bag.conformances, vec![q]);
        assert!(map.lookup(&mut ctx, &[t0]).conformances.contains(&p));
    }

    #[test]
    fn test_rebuild_adds_nothing() {
        let graph = ProtocolGraph::new();
        let mut ctx = RewriteContext::new(&graph);
        let t = ctx.generic_param_symbol(GenericParamKey::new(0, 0));
        let class = ctx.layout_symbol(LayoutConstraint::Class);
        let native = ctx.layout_symbol(LayoutConstraint::NativeClass);
        let mut system = RewriteSystem::new(true);
        system.add_rule(&mut ctx, MutableTerm::from_symbols(vec![t, class]), MutableTerm::single(t), None);
        system.add_rule(&mut ctx, MutableTerm::from_symbols(vec![t, native]), MutableTerm::single(t), None);
        let (mut map, result) = complete_with_properties(&mut ctx, &mut system, &graph);
        assert!(result.conflicts.is_empty());
        assert_eq!(map.lookup(&mut ctx, &[t]).layout, Some(LayoutConstraint::NativeClass));
        let loops = system.loops().len();
        assert_eq!(loops, 1);
        let again = map.build(&mut ctx, &mut system, &graph, &EngineOptions::default());
        assert!(!again.added_rules);
        assert_eq!(system.loops().len(), loops);
        for lp in system.loops().to_vec() {
            RewritePathEvaluator::verify_loop(&lp, &system, &mut ctx).unwrap();
        }
    }
}
