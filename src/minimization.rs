//! Homotopy reduction.
//!
//! A loop in which some rule occurs exactly once, applied to the whole
//! term, proves that rule derivable from the rest of the loop. Deleting
//! the rule splices that derivation into every other loop mentioning it,
//! so later deletions only ever consult rules that are still present.
//!
//! Rules are deleted in three passes: rules still mentioning unresolved
//! names, then everything but conformance rules, then conformance rules.
//! The last pass only accepts derivations that stay inside the protocol a
//! conformance rule is rooted in, when that protocol is being minimized.
//!
//! # Citations
//! - Squier, Otto & Kobayashi, "A finiteness condition for rewriting
//!   systems" (1994) (homotopy bases)

use crate::context::RewriteContext;
use crate::debug::DebugOptions;
use crate::error::{fatal, InvariantViolation};
use crate::evaluator::RewritePathEvaluator;
use crate::path::{RewritePath, StepKind};
use crate::rewrite_system::RewriteSystem;
use crate::symbol::ProtocolId;
use std::cmp::Ordering;

/// Which rules a reduction pass may delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinimizationPass {
    UnresolvedNames,
    NonConformances,
    Conformances,
}

impl MinimizationPass {
    fn name(self) -> &'static str {
        match self {
            MinimizationPass::UnresolvedNames => "unresolved-names",
            MinimizationPass::NonConformances => "non-conformances",
            MinimizationPass::Conformances => "minimal-conformances",
        }
    }
}

impl RewriteSystem {
    /// Marks every rule that the recorded loops prove derivable as
    /// redundant. `domains` lists the protocols whose requirement
    /// signatures are being built; it is empty for generic signatures.
    ///
    /// # Panics
    /// If loops were not recorded, or the minimized system fails
    /// verification.
    pub fn minimize(&mut self, ctx: &mut RewriteContext, domains: &[ProtocolId], debug: &DebugOptions) {
        let _timer = debug.timer("minimization");
        if !self.records_loops() {
            fatal(InvariantViolation::LoopsNotRecorded, &self.dump(ctx));
        }
        for pass in [
            MinimizationPass::UnresolvedNames,
            MinimizationPass::NonConformances,
            MinimizationPass::Conformances,
        ] {
            let deleted = self.homotopy_reduction(ctx, pass, domains, debug);
            if debug.dump_minimization {
                tracing::debug!(pass = pass.name(), deleted, "minimization pass finished");
            }
        }

        // Whatever will not be emitted is redundant as far as the output
        // is concerned.
        for id in self.first_local_rule()..self.rule_count() {
            let rule = self.rule(id);
            if rule.is_permanent() || rule.is_redundant() {
                continue;
            }
            if rule.is_simplified() || rule.is_conflicting() || rule.has_unresolved_name(ctx) {
                self.rule_mut(id).mark_redundant();
            }
        }

        let has_conflicts = self.rules().iter().any(|r| r.is_conflicting());
        if !has_conflicts {
            if let Err(violation) = self.verify_minimized_rules(ctx) {
                fatal(violation, &self.dump(ctx));
            }
        }
        if debug.dump_rules {
            tracing::debug!(rules = %self.dump(ctx), "after minimization");
        }
    }

    /// Deletes rules allowed by `pass` until no loop proves another one
    /// redundant. Returns the number of rules deleted.
    fn homotopy_reduction(
        &mut self,
        ctx: &mut RewriteContext,
        pass: MinimizationPass,
        domains: &[ProtocolId],
        debug: &DebugOptions,
    ) -> usize {
        let mut deleted = 0;
        while let Some((loop_id, rule)) = self.find_rule_to_delete(ctx, pass, domains) {
            if debug.dump_minimization {
                tracing::debug!(
                    pass = pass.name(),
                    loop_id,
                    rule = %self.rule(rule).format(ctx),
                    "deleting rule"
                );
            }
            self.delete_rule(loop_id, rule);
            deleted += 1;
        }
        deleted
    }

    fn may_delete(&self, ctx: &RewriteContext, pass: MinimizationPass, rule: usize) -> bool {
        let r = self.rule(rule);
        if self.is_imported(rule) || r.is_permanent() || r.is_redundant() {
            return false;
        }
        match pass {
            MinimizationPass::UnresolvedNames => r.has_unresolved_name(ctx),
            MinimizationPass::NonConformances => !r.is_protocol_conformance_rule(ctx),
            MinimizationPass::Conformances => r.is_protocol_conformance_rule(ctx),
        }
    }

    /// A conformance rule rooted in a protocol being minimized may only be
    /// derived from permanent rules, imported rules, or rules rooted in the
    /// same protocol.
    fn respects_domain(&self, ctx: &RewriteContext, domains: &[ProtocolId], loop_id: usize, rule: usize) -> bool {
        let root = match ctx.root_protocol(ctx.term(self.rule(rule).lhs())) {
            Some(root) if domains.contains(&root) => root,
            _ => return true,
        };
        self.loops[loop_id].path().rules().filter(|&other| other != rule).all(|other| {
            let r = self.rule(other);
            r.is_permanent()
                || self.is_imported(other)
                || ctx.root_protocol(ctx.term(r.lhs())) == Some(root)
        })
    }

    /// `true` if `a` should be deleted in preference to `b`.
    fn prefer_deleting(&self, ctx: &RewriteContext, a: usize, b: usize) -> bool {
        let (ra, rb) = (self.rule(a), self.rule(b));
        if ra.is_simplified() != rb.is_simplified() {
            return ra.is_simplified();
        }
        if ra.is_explicit() != rb.is_explicit() {
            return !ra.is_explicit();
        }
        match ctx
            .compare_term_ids(ra.lhs(), rb.lhs())
            .then_with(|| ctx.compare_term_ids(ra.rhs(), rb.rhs()))
        {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => a > b,
        }
    }

    /// The best deletion candidate across all live loops, with the loop
    /// that proves it redundant.
    pub fn find_rule_to_delete(
        &mut self,
        ctx: &RewriteContext,
        pass: MinimizationPass,
        domains: &[ProtocolId],
    ) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize)> = None;
        for loop_id in 0..self.loops.len() {
            if self.loops[loop_id].is_deleted() {
                continue;
            }
            let candidates = self.loops[loop_id].candidates().to_vec();
            for rule in candidates {
                if !self.may_delete(ctx, pass, rule) {
                    continue;
                }
                if pass == MinimizationPass::Conformances && !self.respects_domain(ctx, domains, loop_id, rule) {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some((_, current)) => current != rule && self.prefer_deleting(ctx, rule, current),
                };
                if better {
                    best = Some((loop_id, rule));
                }
            }
        }
        best
    }

    /// The derivation of `rule` that loop `loop_id` provides: a path from
    /// the rule's LHS to its RHS not using the rule.
    pub fn split_cycle_at_rule(&self, loop_id: usize, rule: usize) -> RewritePath {
        let lp = &self.loops[loop_id];
        let (before, step, after) = match lp.path().split_at_rule(rule) {
            Some(split) => split,
            None => fatal(
                InvariantViolation::PathStepMismatch {
                    step: format!("{:?}", StepKind::Rule(rule)),
                    term: format!("loop {}", loop_id),
                },
                "",
            ),
        };
        // before . step . after is the identity at the basepoint, and step
        // acts on the whole term, so after . before goes from the step's
        // target back to its source.
        let mut around = after;
        around.append(&before);
        if step.inverse {
            around
        } else {
            around.inverted()
        }
    }

    /// Deletes `rule` using loop `loop_id`: the loop is retired and every
    /// other live loop has the rule replaced by its derivation.
    pub fn delete_rule(&mut self, loop_id: usize, rule: usize) {
        let replacement = self.split_cycle_at_rule(loop_id, rule);
        self.loops[loop_id].mark_deleted();
        for (id, lp) in self.loops.iter_mut().enumerate() {
            if id == loop_id || lp.is_deleted() {
                continue;
            }
            lp.replace_rule(rule, &replacement);
        }
        self.rule_mut(rule).mark_redundant();
    }

    /// Checks the state minimization leaves behind: no permanent rule is
    /// redundant and every live loop still evaluates back to its basepoint.
    pub fn verify_minimized_rules(&self, ctx: &mut RewriteContext) -> Result<(), InvariantViolation> {
        if let Some(id) = self.rules().iter().position(|r| r.is_permanent() && r.is_redundant()) {
            return Err(InvariantViolation::RedundantPermanentRule { rule: id });
        }
        for lp in self.loops.iter().filter(|lp| !lp.is_deleted()) {
            RewritePathEvaluator::verify_loop(lp, self, ctx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::SymbolId;
    use crate::config::EngineOptions;
    use crate::protocol_graph::ProtocolGraph;
    use crate::symbol::GenericParamKey;
    use crate::term::MutableTerm;

    fn params(ctx: &mut RewriteContext, n: u32) -> Vec<SymbolId> {
        (0..n)
            .map(|i| ctx.generic_param_symbol(GenericParamKey::new(0, i)))
            .collect()
    }

    fn explicit(system: &mut RewriteSystem, ctx: &mut RewriteContext, lhs: Vec<SymbolId>, rhs: Vec<SymbolId>) {
        system.add_explicit_rule(ctx, MutableTerm::from_symbols(lhs), MutableTerm::from_symbols(rhs), None);
    }

    #[test]
    fn test_conformance_implied_by_same_type_is_redundant() {
        // τ1 == τ0, τ0: P, τ1: P. The last one follows from the first two.
        let mut graph = ProtocolGraph::new();
        let p = graph.add_protocol("P");
        let mut ctx = RewriteContext::new(&graph);
        let t = params(&mut ctx, 2);
        let ps = ctx.protocol_symbol(p);
        let mut system = RewriteSystem::new(true);
        explicit(&mut system, &mut ctx, vec![t[1]], vec![t[0]]);
        explicit(&mut system, &mut ctx, vec![t[0], ps], vec![t[0]]);
        let before = system.rule_count();
        system.add_rule(
            &mut ctx,
            MutableTerm::from_symbols(vec![t[1], ps]),
            MutableTerm::single(t[1]),
            None,
        );
        assert_eq!(system.rule_count(), before);

        system.complete(&mut ctx, EngineOptions::default().limits(), &DebugOptions::NONE);
        system.minimize(&mut ctx, &[], &DebugOptions::NONE);
        assert!(!system.rule(0).is_redundant());
        assert!(!system.rule(1).is_redundant());
    }

    #[test]
    fn test_completion_rule_is_deleted_before_explicit_ones() {
        // τ0.[P] => τ0 and [P].[Q] => [P] imply τ0.[Q] => τ0 only through
        // the overlap, so the derived rule goes and both inputs stay.
        let mut graph = ProtocolGraph::new();
        let p = graph.add_protocol("P");
        let q = graph.add_protocol("Q");
        graph.add_inherited(p, q);
        let mut ctx = RewriteContext::new(&graph);
        let t = params(&mut ctx, 1);
        let ps = ctx.protocol_symbol(p);
        let qs = ctx.protocol_symbol(q);
        let mut system = RewriteSystem::new(true);
        system.add_permanent_rule(&mut ctx, MutableTerm::from_symbols(vec![ps, qs]), MutableTerm::single(ps));
        explicit(&mut system, &mut ctx, vec![t[0], ps], vec![t[0]]);
        system.complete(&mut ctx, EngineOptions::default().limits(), &DebugOptions::NONE);
        let derived = system
            .rule_for_lhs(&[t[0], qs])
            .expect("completion derives the inherited conformance");
        system.minimize(&mut ctx, &[], &DebugOptions::NONE);
        assert!(system.rule(derived).is_redundant());
        assert!(!system.rule(1).is_redundant());
        assert!(!system.rule(0).is_redundant());
    }

    #[test]
    fn test_tie_break_prefers_non_explicit_then_larger() {
        let graph = ProtocolGraph::new();
        let mut ctx = RewriteContext::new(&graph);
        let t = params(&mut ctx, 3);
        let mut system = RewriteSystem::new(true);
        explicit(&mut system, &mut ctx, vec![t[1]], vec![t[0]]);
        system.add_rule(&mut ctx, MutableTerm::single(t[2]), MutableTerm::single(t[0]), None);
        explicit(&mut system, &mut ctx, vec![t[0], t[2]], vec![t[0]]);
        assert!(system.prefer_deleting(&ctx, 1, 0));
        assert!(!system.prefer_deleting(&ctx, 0, 1));
        // Both explicit: the larger LHS goes first.
        assert!(system.prefer_deleting(&ctx, 2, 0));
    }

    #[test]
    fn test_split_cycle_gives_derivation() {
        let mut graph = ProtocolGraph::new();
        let p = graph.add_protocol("P");
        let q = graph.add_protocol("Q");
        let mut ctx = RewriteContext::new(&graph);
        let t = params(&mut ctx, 1);
        let ps = ctx.protocol_symbol(p);
        let qs = ctx.protocol_symbol(q);
        let mut system = RewriteSystem::new(true);
        system.add_permanent_rule(&mut ctx, MutableTerm::from_symbols(vec![ps, qs]), MutableTerm::single(ps));
        explicit(&mut system, &mut ctx, vec![t[0], ps], vec![t[0]]);
        system.complete(&mut ctx, EngineOptions::default().limits(), &DebugOptions::NONE);
        let derived = system.rule_for_lhs(&[t[0], qs]).unwrap();
        let loop_id = system
            .loops()
            .iter()
            .position(|lp| lp.path().rules_in_empty_context().contains(&derived))
            .unwrap();

        let derivation = system.split_cycle_at_rule(loop_id, derived);
        assert!(!derivation.contains_rule(derived));
        let mut eval = RewritePathEvaluator::new(MutableTerm::from_symbols(vec![t[0], qs]));
        eval.apply_path(&derivation, &system, &mut ctx).unwrap();
        assert_eq!(eval.current_term().map(|t| t.symbols().to_vec()), Some(vec![t[0]]));
    }

    #[test]
    #[should_panic(expected = "requirement machine invariant violated")]
    fn test_minimize_requires_loops() {
        let graph = ProtocolGraph::new();
        let mut ctx = RewriteContext::new(&graph);
        let mut system = RewriteSystem::new(false);
        system.minimize(&mut ctx, &[], &DebugOptions::NONE);
    }
}
