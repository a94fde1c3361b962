//! Rule store, simplification and loop bookkeeping.
//!
//! A `RewriteSystem` owns the rules of one machine, the trie indexing their
//! left-hand sides, the critical-pair worklist, and (when recording) the
//! loops that later drive minimization. Rules are append-only: a rule that
//! stops being useful is flagged, never removed, so rule indices stay valid
//! inside recorded paths.
//!
//! Completion lives in `completion`, homotopy reduction in `minimization`.
//!
//! # Citations
//! - Knuth & Bendix, "Simple word problems in universal algebras" (1970)
//! - Book & Otto, "String-Rewriting Systems" (1993), §2.2 (interreduction)

use crate::arena::{Interner, SymbolId, TermId};
use crate::context::RewriteContext;
use crate::error::{fatal, InvariantViolation};
use crate::fingerprint::{rule_set_fingerprint, HashValue};
use crate::path::{RewriteLoop, RewritePath, RewriteStep, StepKind, TypeWitness};
use crate::rule::Rule;
use crate::symbol::SymbolKind;
use crate::term::MutableTerm;
use crate::trie::Trie;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::Write as _;

/// Counters kept across completion rounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompletionStats {
    /// Critical pairs examined.
    pub iterations: usize,
    /// Rules added after initialization.
    pub rules_added: usize,
    /// Associated-type pairs merged.
    pub merged: usize,
}

/// The rules of one requirement machine.
#[derive(Debug, Clone)]
pub struct RewriteSystem {
    pub(crate) rules: Vec<Rule>,
    pub(crate) trie: Trie,
    /// Ordered rule pairs awaiting overlap checks.
    pub(crate) worklist: VecDeque<(usize, usize)>,
    pub(crate) loops: Vec<RewriteLoop>,
    record_loops: bool,
    relations: Interner<(TermId, TermId)>,
    witnesses: Vec<TypeWitness>,
    witness_index: BTreeMap<TermId, usize>,
    /// Rules below this index were imported from protocol machines.
    first_local_rule: usize,
    pub(crate) merge_enabled: bool,
    /// Rules shaped `X.[P1:T] => X.[P2:T]` awaiting a merge.
    pub(crate) merge_queue: VecDeque<usize>,
    pub(crate) merged_symbols: BTreeSet<(SymbolId, SymbolId)>,
    /// `(key, property, property)` triples the property map already handled.
    pub(crate) processed_properties: BTreeSet<(TermId, SymbolId, SymbolId)>,
    pub(crate) stats: CompletionStats,
}

impl RewriteSystem {
    pub fn new(record_loops: bool) -> Self {
        Self {
            rules: Vec::new(),
            trie: Trie::new(),
            worklist: VecDeque::new(),
            loops: Vec::new(),
            record_loops,
            relations: Interner::new(),
            witnesses: Vec::new(),
            witness_index: BTreeMap::new(),
            first_local_rule: 0,
            merge_enabled: false,
            merge_queue: VecDeque::new(),
            merged_symbols: BTreeSet::new(),
            processed_properties: BTreeSet::new(),
            stats: CompletionStats::default(),
        }
    }

    /// Enables associated-type merging. Ignored when loops are recorded.
    pub fn with_merging(mut self, enabled: bool) -> Self {
        self.merge_enabled = enabled && !self.record_loops;
        self
    }

    /// Loads the starting rule set.
    ///
    /// `imported` rules come from already completed protocol machines and
    /// are taken as is. `explicit` entries carry the index of the structural
    /// requirement they were built from. Returns the requirement indices
    /// whose rules were already implied on insertion.
    pub fn initialize(
        &mut self,
        ctx: &mut RewriteContext,
        imported: &[(TermId, TermId)],
        permanent: Vec<(MutableTerm, MutableTerm)>,
        explicit: Vec<(MutableTerm, MutableTerm, Option<usize>)>,
    ) -> Vec<usize> {
        for &(lhs, rhs) in imported {
            self.import_rule(ctx, lhs, rhs);
        }
        for (lhs, rhs) in permanent {
            self.add_permanent_rule(ctx, lhs, rhs);
        }
        let mut implied = Vec::new();
        for (lhs, rhs, requirement) in explicit {
            if !self.add_explicit_rule(ctx, lhs, rhs, requirement) {
                implied.extend(requirement);
            }
        }
        implied
    }

    fn import_rule(&mut self, ctx: &RewriteContext, lhs: TermId, rhs: TermId) {
        debug_assert_eq!(self.first_local_rule, self.rules.len(), "imports precede local rules");
        let id = self.rules.len();
        let key = ctx.term(lhs);
        if let Some(existing) = self.trie.insert(key, id) {
            fatal(
                InvariantViolation::DuplicateRuleLhs {
                    lhs: ctx.format_term(key),
                    existing,
                    new: id,
                },
                &self.dump(ctx),
            );
        }
        self.rules.push(Rule::new(lhs, rhs, key.len()));
        self.first_local_rule = self.rules.len();
    }

    pub fn add_permanent_rule(&mut self, ctx: &mut RewriteContext, lhs: MutableTerm, rhs: MutableTerm) {
        let before = self.rules.len();
        if self.add_rule(ctx, lhs, rhs, None) {
            self.rules[before].mark_permanent();
        }
    }

    /// Adds a rule for a written or inferred requirement.
    ///
    /// Returns `false` when the requirement already follows from the rules
    /// added before it.
    pub fn add_explicit_rule(
        &mut self,
        ctx: &mut RewriteContext,
        lhs: MutableTerm,
        rhs: MutableTerm,
        requirement: Option<usize>,
    ) -> bool {
        let before = self.rules.len();
        if self.add_rule(ctx, lhs, rhs, None) {
            self.rules[before].mark_explicit(requirement);
            true
        } else {
            false
        }
    }

    /// Adds the rule `lhs == rhs`.
    ///
    /// Both sides are simplified first; if they meet, nothing is added and
    /// `path` (a rewrite path from `lhs` to `rhs`) closes into a loop.
    /// Otherwise the sides are oriented, the rule is indexed and paired with
    /// every live rule for the overlap check, and `path` together with the
    /// new rule forms a loop. Returns whether a rule was added.
    pub fn add_rule(
        &mut self,
        ctx: &mut RewriteContext,
        mut lhs: MutableTerm,
        mut rhs: MutableTerm,
        path: Option<&RewritePath>,
    ) -> bool {
        let record = self.record_loops && path.is_some();
        let mut lhs_path = RewritePath::new();
        let mut rhs_path = RewritePath::new();
        self.simplify(ctx, &mut lhs, record.then_some(&mut lhs_path));
        self.simplify(ctx, &mut rhs, record.then_some(&mut rhs_path));

        let mut loop_path = RewritePath::new();
        if let (true, Some(path)) = (record, path) {
            loop_path = lhs_path.inverted();
            loop_path.append(path);
            loop_path.append(&rhs_path);
        }

        let order = ctx.compare_terms(lhs.symbols(), rhs.symbols());
        if order == Ordering::Equal {
            if record {
                self.record_loop(lhs, loop_path);
            }
            return false;
        }
        if order == Ordering::Less {
            std::mem::swap(&mut lhs, &mut rhs);
            loop_path.invert();
        }

        let id = self.rules.len();
        let lhs_id = ctx.intern_term(lhs.symbols());
        let rhs_id = ctx.intern_term(rhs.symbols());
        if let Some(existing) = self.trie.insert(lhs.symbols(), id) {
            fatal(
                InvariantViolation::DuplicateRuleLhs {
                    lhs: ctx.format_term(lhs.symbols()),
                    existing,
                    new: id,
                },
                &self.dump(ctx),
            );
        }
        let rule = Rule::new(lhs_id, rhs_id, lhs.len());
        let merge = self.merge_enabled && rule.merged_associated_type_pair(ctx).is_some();
        self.rules.push(rule);
        self.stats.rules_added += 1;

        if record {
            loop_path.push(RewriteStep::rule(id, 0, 0, true));
            self.record_loop(lhs, loop_path);
        }

        for other in 0..id {
            if self.rules[other].is_simplified() {
                continue;
            }
            self.worklist.push_back((id, other));
            self.worklist.push_back((other, id));
        }
        self.worklist.push_back((id, id));
        if merge {
            self.merge_queue.push_back(id);
        }
        true
    }

    /// Stores a loop after free reduction. Empty loops are dropped.
    pub(crate) fn record_loop(&mut self, basepoint: MutableTerm, mut path: RewritePath) {
        if !self.record_loops {
            return;
        }
        path.compute_freely_reduced_form();
        if path.is_empty() {
            return;
        }
        self.loops.push(RewriteLoop::new(basepoint, path));
    }

    /// Reduces `term` to normal form.
    ///
    /// Each pass takes the leftmost position where some rule's LHS matches,
    /// applies the longest such rule and rescans from the beginning. When no
    /// rule applies, the substitutions of a trailing concrete symbol are
    /// simplified. Returns whether the term changed; `path` receives the
    /// steps taken.
    pub fn simplify(
        &mut self,
        ctx: &mut RewriteContext,
        term: &mut MutableTerm,
        mut path: Option<&mut RewritePath>,
    ) -> bool {
        let mut changed = false;
        loop {
            let mut progress = false;
            let mut start = 0;
            while start < term.len() {
                match self.trie.find_longest(term.symbols(), start) {
                    Some(id) => {
                        let rule = &self.rules[id];
                        let lhs_len = ctx.term(rule.lhs()).len();
                        let rhs = ctx.term(rule.rhs()).to_vec();
                        let end = term.len() - start - lhs_len;
                        term.splice(start..start + lhs_len, &rhs);
                        if let Some(path) = path.as_deref_mut() {
                            path.push(RewriteStep::rule(id, start, end, false));
                        }
                        progress = true;
                        start = 0;
                    }
                    None => start += 1,
                }
            }
            if self.simplify_substitutions(ctx, term, path.as_deref_mut()) {
                progress = true;
            }
            if !progress {
                break;
            }
            changed = true;
        }
        changed
    }

    /// Simplifies the substitutions of the trailing symbol of `term`, then
    /// folds substitutions that became concrete into its pattern.
    pub(crate) fn simplify_substitutions(
        &mut self,
        ctx: &mut RewriteContext,
        term: &mut MutableTerm,
        mut path: Option<&mut RewritePath>,
    ) -> bool {
        let last = match term.last() {
            Some(last) => last,
            None => return false,
        };
        let subs = match ctx.symbol(last).substitutions() {
            Some(subs) if !subs.is_empty() => subs.to_vec(),
            _ => return false,
        };

        let count = subs.len();
        let mut block = RewritePath::from_steps(vec![RewriteStep::decompose(count, 0, false)]);
        let mut simplified = subs.clone();
        let mut any = false;
        for i in (0..count).rev() {
            let mut sub = MutableTerm::from(ctx.term(subs[i]));
            let mut sub_path = RewritePath::new();
            if self.simplify(ctx, &mut sub, path.is_some().then_some(&mut sub_path)) {
                simplified[i] = ctx.intern_term(sub.symbols());
                any = true;
            }
            block.append(&sub_path);
            block.push(RewriteStep::shift(false));
        }
        for _ in 0..count {
            block.push(RewriteStep::shift(true));
        }
        block.push(RewriteStep::decompose(count, 0, true));

        let mut current = last;
        let mut changed = false;
        if any {
            current = ctx.with_substitutions(last, simplified);
            if let Some(path) = path.as_deref_mut() {
                path.append(&block);
            }
            changed = true;
        }
        while let Some(folded) = ctx.fold_concrete_symbol(current) {
            let relation = self.add_relation(ctx, &[current], &[folded]);
            if let Some(path) = path.as_deref_mut() {
                path.push(RewriteStep::new(StepKind::Relation(relation), term.len() - 1, 0, false));
            }
            current = folded;
            changed = true;
        }
        if changed {
            let at = term.len() - 1;
            term.set(at, current);
        }
        changed
    }

    /// Interreduces the local rules after completion.
    ///
    /// A rule whose LHS contains another rule's LHS is marked simplified and
    /// unindexed. A rule whose LHS substitutions are reducible is replaced by
    /// one over the reduced LHS. A rule whose RHS is reducible is replaced by
    /// a rule to the RHS normal form. Every replacement records the loop
    /// relating old and new rule.
    pub fn simplify_rewrite_system(&mut self, ctx: &mut RewriteContext) {
        let record = self.record_loops;
        let end = self.rules.len();
        for id in self.first_local_rule..end {
            if self.rules[id].is_simplified() {
                continue;
            }
            let lhs = ctx.term(self.rules[id].lhs()).to_vec();
            let reducible = (0..lhs.len()).any(|start| {
                self.trie
                    .find_all_prefixes(&lhs, start)
                    .into_iter()
                    .any(|other| other != id)
            });
            if reducible {
                self.retire(&lhs, id);
                continue;
            }

            let mut reduced_lhs = MutableTerm::from(lhs.as_slice());
            let mut subst_path = RewritePath::new();
            if self.simplify_substitutions(ctx, &mut reduced_lhs, record.then_some(&mut subst_path)) {
                let rhs = MutableTerm::from(ctx.term(self.rules[id].rhs()));
                self.retire(&lhs, id);
                let mut path = subst_path.inverted();
                path.push(RewriteStep::rule(id, 0, 0, false));
                self.add_rule(ctx, reduced_lhs, rhs, Some(&path));
                continue;
            }

            let mut rhs = MutableTerm::from(ctx.term(self.rules[id].rhs()));
            let mut rhs_path = RewritePath::new();
            if self.simplify(ctx, &mut rhs, record.then_some(&mut rhs_path)) {
                let new_id = self.rules.len();
                let old = &self.rules[id];
                let mut rule = Rule::new(old.lhs(), ctx.intern_term(rhs.symbols()), lhs.len());
                if old.is_permanent() {
                    rule.mark_permanent();
                }
                if old.is_explicit() {
                    rule.mark_explicit(old.requirement());
                }
                if old.is_conflicting() {
                    rule.mark_conflicting();
                }
                self.rules[id].mark_simplified();
                self.rules.push(rule);
                self.trie.replace(&lhs, new_id);
                if record {
                    let mut path = RewritePath::from_steps(vec![RewriteStep::rule(id, 0, 0, false)]);
                    path.append(&rhs_path);
                    path.push(RewriteStep::rule(new_id, 0, 0, true));
                    self.record_loop(MutableTerm::from(lhs.as_slice()), path);
                }
            }
        }
    }

    fn retire(&mut self, lhs: &[SymbolId], id: usize) {
        self.rules[id].mark_simplified();
        if self.trie.get(lhs) == Some(id) {
            self.trie.remove(lhs);
        }
    }

    // ---------------------------------------------------------------------
    // Relations and type witnesses
    // ---------------------------------------------------------------------

    /// Interns the relation `lhs => rhs` and returns its index.
    pub(crate) fn add_relation(&mut self, ctx: &mut RewriteContext, lhs: &[SymbolId], rhs: &[SymbolId]) -> usize {
        let lhs = ctx.intern_term(lhs);
        let rhs = ctx.intern_term(rhs);
        self.relations.intern((lhs, rhs)) as usize
    }

    pub fn relation(&self, id: usize) -> (TermId, TermId) {
        *self.relations.get(id as u32)
    }

    /// Registers a type witness, reusing one already keyed by the same LHS.
    pub(crate) fn add_type_witness(&mut self, witness: TypeWitness) -> usize {
        if let Some(&id) = self.witness_index.get(&witness.lhs) {
            return id;
        }
        let id = self.witnesses.len();
        self.witnesses.push(witness);
        self.witness_index.insert(witness.lhs, id);
        id
    }

    pub fn type_witness(&self, id: usize) -> &TypeWitness {
        &self.witnesses[id]
    }

    pub fn type_witness_count(&self) -> usize {
        self.witnesses.len()
    }

    // ---------------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------------

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule(&self, id: usize) -> &Rule {
        &self.rules[id]
    }

    pub(crate) fn rule_mut(&mut self, id: usize) -> &mut Rule {
        &mut self.rules[id]
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn first_local_rule(&self) -> usize {
        self.first_local_rule
    }

    pub fn is_imported(&self, id: usize) -> bool {
        id < self.first_local_rule
    }

    pub fn loops(&self) -> &[RewriteLoop] {
        &self.loops
    }

    pub fn records_loops(&self) -> bool {
        self.record_loops
    }

    pub fn stats(&self) -> CompletionStats {
        self.stats
    }

    /// Live rules, in index order.
    pub fn live_rules(&self) -> impl Iterator<Item = (usize, &Rule)> {
        self.rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| !rule.is_simplified())
    }

    /// Rule exactly keyed by `lhs`, if indexed.
    pub fn rule_for_lhs(&self, lhs: &[SymbolId]) -> Option<usize> {
        self.trie.get(lhs)
    }

    /// The live rule `term.[concrete: C] => term`, with its concrete symbol.
    pub fn concrete_type_rule(&self, ctx: &RewriteContext, term: &[SymbolId]) -> Option<(usize, SymbolId)> {
        let term_id = ctx.find_term(term)?;
        self.trie
            .extensions(term)
            .into_iter()
            .find(|(sym, id)| ctx.is_kind(*sym, SymbolKind::ConcreteType) && self.rules[*id].rhs() == term_id)
            .map(|(sym, id)| (id, sym))
    }

    /// Checks that every live rule is oriented `lhs > rhs`.
    pub fn verify_orientation(&self, ctx: &RewriteContext) -> Result<(), InvariantViolation> {
        for (id, rule) in self.live_rules() {
            if ctx.compare_term_ids(rule.lhs(), rule.rhs()) != Ordering::Greater {
                return Err(InvariantViolation::InvalidRuleOrientation { rule: id });
            }
        }
        Ok(())
    }

    /// Fingerprint of the live rule set.
    pub fn fingerprint(&self, ctx: &RewriteContext) -> HashValue {
        rule_set_fingerprint(ctx, self.live_rules().map(|(_, rule)| rule))
    }

    /// Rule table for logs and fatal dumps.
    pub fn dump(&self, ctx: &RewriteContext) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "rewrite system: {} rules ({} imported), {} loops, {} relations, {} witnesses",
            self.rules.len(),
            self.first_local_rule,
            self.loops.len(),
            self.relations.len(),
            self.witnesses.len()
        );
        for (id, rule) in self.rules.iter().enumerate() {
            let _ = writeln!(out, "  ({}) {}", id, rule.format(ctx));
        }
        out
    }
}
