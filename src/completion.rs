//! Knuth–Bendix completion.
//!
//! Completion pops ordered rule pairs off the FIFO worklist, computes the
//! critical pairs of their left-hand sides and adds a rule for every pair
//! whose sides do not already meet. Each added rule re-seeds the worklist,
//! so the loop is a closure computation bounded by `CompletionLimits`.
//!
//! In machines that do not record loops, rules shaped `X.[P1:T] => X.[P2:T]`
//! are queued and, once the worklist drains, replaced by rules over the
//! merged symbol `[P1&P2:T]`.

use crate::arena::SymbolId;
use crate::config::CompletionLimits;
use crate::context::RewriteContext;
use crate::debug::DebugOptions;
use crate::path::{RewritePath, RewriteStep};
use crate::rewrite_system::RewriteSystem;
use crate::symbol::{ProtocolId, Symbol};
use crate::term::MutableTerm;
use std::fmt;

/// Outcome of a completion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionResult {
    /// The rule set is locally confluent.
    Success,
    /// More than `max_iterations` critical pairs were processed.
    MaxIterations,
    /// A rule deeper than `max_depth` was added.
    MaxDepth,
    /// A concrete type nested deeper than `max_concrete_nesting` was derived.
    MaxConcreteNesting,
}

impl CompletionResult {
    pub fn is_success(self) -> bool {
        self == CompletionResult::Success
    }
}

impl fmt::Display for CompletionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionResult::Success => write!(f, "success"),
            CompletionResult::MaxIterations => write!(f, "maximum iteration count exceeded"),
            CompletionResult::MaxDepth => write!(f, "maximum rule depth exceeded"),
            CompletionResult::MaxConcreteNesting => write!(f, "maximum concrete type nesting exceeded"),
        }
    }
}

/// Two terms reachable from one overlap term, with the path between them.
#[derive(Debug, Clone)]
pub(crate) struct CriticalPair {
    pub t1: MutableTerm,
    pub t2: MutableTerm,
    /// Path from `t1` to `t2` through the overlap term.
    pub path: RewritePath,
}

impl RewriteSystem {
    /// Runs completion until the worklist and merge queue drain or a limit
    /// is hit, then interreduces the rules.
    pub fn complete(
        &mut self,
        ctx: &mut RewriteContext,
        limits: CompletionLimits,
        debug: &DebugOptions,
    ) -> CompletionResult {
        let _timer = debug.timer("completion");
        let result = self.run_completion(ctx, limits, debug);
        if result.is_success() {
            self.simplify_rewrite_system(ctx);
        } else {
            tracing::warn!(
                %result,
                rules = self.rule_count(),
                iterations = self.stats.iterations,
                "completion failed"
            );
        }
        if debug.dump_completion {
            tracing::debug!(
                %result,
                rules = self.rule_count(),
                iterations = self.stats.iterations,
                added = self.stats.rules_added,
                merged = self.stats.merged,
                "completion round finished"
            );
        }
        if debug.dump_rules {
            tracing::debug!(rules = %self.dump(ctx), "rules after completion");
        }
        result
    }

    fn run_completion(
        &mut self,
        ctx: &mut RewriteContext,
        limits: CompletionLimits,
        debug: &DebugOptions,
    ) -> CompletionResult {
        loop {
            while let Some((i, j)) = self.worklist.pop_front() {
                if self.rules[i].is_simplified() || self.rules[j].is_simplified() {
                    continue;
                }
                for pair in self.critical_pairs(ctx, i, j) {
                    self.stats.iterations += 1;
                    if self.stats.iterations > limits.max_iterations {
                        return CompletionResult::MaxIterations;
                    }
                    let before = self.rules.len();
                    if !self.add_rule(ctx, pair.t1, pair.t2, Some(&pair.path)) {
                        continue;
                    }
                    if debug.dump_completion {
                        tracing::debug!(
                            rule = %self.rules[before].format(ctx),
                            first = i,
                            second = j,
                            "critical pair added rule"
                        );
                    }
                    if self.rules[before..].iter().any(|r| r.depth() > limits.max_depth) {
                        return CompletionResult::MaxDepth;
                    }
                }
            }
            if self.merge_queue.is_empty() {
                return CompletionResult::Success;
            }
            self.process_merged_associated_types(ctx, debug);
        }
    }

    /// Critical pairs of `lhs(i)` overlapped by `lhs(j)`.
    ///
    /// For each position `k` in `lhs(i)`, either `lhs(j)` fits entirely
    /// inside `lhs(i)` at `k` (inclusion), or a suffix of `lhs(i)` is a
    /// proper prefix of `lhs(j)` (overlap). A rule trivially overlaps itself
    /// at `k = 0`; that position is skipped.
    pub(crate) fn critical_pairs(&self, ctx: &RewriteContext, i: usize, j: usize) -> Vec<CriticalPair> {
        let (first, second) = (&self.rules[i], &self.rules[j]);
        let l1 = ctx.term(first.lhs());
        let r1 = ctx.term(first.rhs());
        let l2 = ctx.term(second.lhs());
        let r2 = ctx.term(second.rhs());

        let mut out = Vec::new();
        for k in 0..l1.len() {
            if k == 0 && i == j {
                continue;
            }
            let tail = &l1[k..];
            if tail.len() >= l2.len() {
                if !tail.starts_with(l2) {
                    continue;
                }
                // lhs(j) sits inside lhs(i).
                let end = l1.len() - k - l2.len();
                let t1 = MutableTerm::from(r1);
                let mut t2 = MutableTerm::from(l1);
                t2.splice(k..k + l2.len(), r2);
                let path = RewritePath::from_steps(vec![
                    RewriteStep::rule(i, 0, 0, true),
                    RewriteStep::rule(j, k, end, false),
                ]);
                out.push(CriticalPair { t1, t2, path });
            } else {
                // At k = 0 this is an inclusion of lhs(i) in lhs(j), found
                // from the other ordering of the pair.
                if k == 0 || !l2.starts_with(tail) {
                    continue;
                }
                // lhs(i) = A.B, lhs(j) = B.C; the overlap term is A.B.C.
                let rest = &l2[tail.len()..];
                let t1 = MutableTerm::concat(r1, rest);
                let t2 = MutableTerm::concat(&l1[..k], r2);
                let path = RewritePath::from_steps(vec![
                    RewriteStep::rule(i, 0, rest.len(), true),
                    RewriteStep::rule(j, k, 0, false),
                ]);
                out.push(CriticalPair { t1, t2, path });
            }
        }
        out
    }

    /// Replaces each queued `X.[P1:T] => X.[P2:T]` by rules over the merged
    /// symbol `[P1&P2:T]`.
    fn process_merged_associated_types(&mut self, ctx: &mut RewriteContext, debug: &DebugOptions) {
        while let Some(id) = self.merge_queue.pop_front() {
            if self.rules[id].is_simplified() {
                continue;
            }
            let (lhs_sym, rhs_sym) = match self.rules[id].merged_associated_type_pair(ctx) {
                Some(pair) => pair,
                None => continue,
            };
            if !self.merged_symbols.insert((lhs_sym, rhs_sym)) {
                continue;
            }
            let merged = match merged_symbol(ctx, lhs_sym, rhs_sym) {
                Some(merged) => merged,
                None => continue,
            };
            if debug.dump_completion {
                tracing::debug!(
                    first = %ctx.format_symbol(lhs_sym),
                    second = %ctx.format_symbol(rhs_sym),
                    merged = %ctx.format_symbol(merged),
                    "merging associated types"
                );
            }

            // X.[P2:T] => X.[P1&P2:T]
            let rhs = ctx.term(self.rules[id].rhs()).to_vec();
            let mut target = rhs.clone();
            if let Some(last) = target.last_mut() {
                *last = merged;
            }
            self.add_rule(ctx, MutableTerm::from(rhs.as_slice()), MutableTerm::from(target.as_slice()), None);

            // [P1:T].[p] => [P1:T] and [P2:T].[p] => [P2:T] carry over to the
            // merged symbol. Properties with substitutions are rooted at the
            // old symbol and are rederived by completion instead.
            let mut inherited: Vec<SymbolId> = Vec::new();
            for rule in &self.rules {
                if rule.is_simplified() {
                    continue;
                }
                let (lhs, rhs) = (ctx.term(rule.lhs()), ctx.term(rule.rhs()));
                if lhs.len() != 2 || rhs.len() != 1 || (rhs[0] != lhs_sym && rhs[0] != rhs_sym) || lhs[0] != rhs[0] {
                    continue;
                }
                let property = lhs[1];
                let symbol = ctx.symbol(property);
                if symbol.is_property() && symbol.substitutions().map_or(true, <[_]>::is_empty) {
                    inherited.push(property);
                }
            }
            for property in inherited {
                self.add_rule(
                    ctx,
                    MutableTerm::from_symbols(vec![merged, property]),
                    MutableTerm::single(merged),
                    None,
                );
            }
            self.stats.merged += 1;
        }
    }

    /// Returns `true` if every critical pair of the live rules joins.
    pub fn is_locally_confluent(&self, ctx: &mut RewriteContext) -> bool {
        let mut scratch = self.clone();
        let live: Vec<usize> = self.live_rules().map(|(id, _)| id).collect();
        for &i in &live {
            for &j in &live {
                for pair in self.critical_pairs(ctx, i, j) {
                    let (mut t1, mut t2) = (pair.t1, pair.t2);
                    scratch.simplify(ctx, &mut t1, None);
                    scratch.simplify(ctx, &mut t2, None);
                    if t1 != t2 {
                        return false;
                    }
                }
            }
        }
        true
    }
}

/// The associated-type symbol over the union of both symbols' protocols.
fn merged_symbol(ctx: &mut RewriteContext, a: SymbolId, b: SymbolId) -> Option<SymbolId> {
    let (name, mut protocols): (String, Vec<ProtocolId>) = match (ctx.symbol(a), ctx.symbol(b)) {
        (
            Symbol::AssociatedType { name, protocols: pa },
            Symbol::AssociatedType { protocols: pb, .. },
        ) => (name.clone(), pa.iter().chain(pb.iter()).copied().collect()),
        _ => return None,
    };
    protocols.sort();
    protocols.dedup();
    Some(ctx.associated_type_symbol(&protocols, &name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol_graph::ProtocolGraph;
    use crate::symbol::GenericParamKey;

    const LIMITS: CompletionLimits = CompletionLimits {
        max_iterations: 1000,
        max_depth: 10,
    };

    fn term(syms: &[SymbolId]) -> MutableTerm {
        MutableTerm::from(syms)
    }

    #[test]
    fn test_inclusion_and_overlap_pairs() {
        let mut graph = ProtocolGraph::new();
        let p = graph.add_protocol("P");
        let mut ctx = RewriteContext::new(&graph);
        let t0 = ctx.generic_param_symbol(GenericParamKey::new(0, 0));
        let t1 = ctx.generic_param_symbol(GenericParamKey::new(0, 1));
        let ps = ctx.protocol_symbol(p);
        let mut system = RewriteSystem::new(true);
        system.add_rule(&mut ctx, term(&[t1, ps]), term(&[t1]), None);
        system.add_rule(&mut ctx, term(&[t1]), term(&[t0]), None);

        // τ_0_1 sits inside τ_0_1.[P].
        let pairs = system.critical_pairs(&ctx, 0, 1);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].t1.symbols(), &[t1]);
        assert_eq!(pairs[0].t2.symbols(), &[t0, ps]);
        assert!(system.critical_pairs(&ctx, 1, 0).is_empty());
    }

    #[test]
    fn test_completion_derives_transported_conformance() {
        let mut graph = ProtocolGraph::new();
        let p = graph.add_protocol("P");
        let mut ctx = RewriteContext::new(&graph);
        let t0 = ctx.generic_param_symbol(GenericParamKey::new(0, 0));
        let t1 = ctx.generic_param_symbol(GenericParamKey::new(0, 1));
        let ps = ctx.protocol_symbol(p);
        let mut system = RewriteSystem::new(true);
        system.add_rule(&mut ctx, term(&[t1, ps]), term(&[t1]), None);
        system.add_rule(&mut ctx, term(&[t1]), term(&[t0]), None);

        let result = system.complete(&mut ctx, LIMITS, &DebugOptions::NONE);
        assert_eq!(result, CompletionResult::Success);
        assert!(system.rule(0).is_simplified());
        let derived = system.rule_for_lhs(&[t0, ps]).unwrap();
        assert_eq!(ctx.term(system.rule(derived).rhs()), &[t0]);
        assert!(system.is_locally_confluent(&mut ctx));
        assert!(!system.loops().is_empty());
        for lp in system.loops().to_vec() {
            crate::evaluator::RewritePathEvaluator::verify_loop(&lp, &system, &mut ctx).unwrap();
        }
    }

    #[test]
    fn test_depth_limit_stops_completion() {
        let graph = ProtocolGraph::new();
        let mut ctx = RewriteContext::new(&graph);
        let t: Vec<SymbolId> = (0..6)
            .map(|i| ctx.generic_param_symbol(GenericParamKey::new(0, i)))
            .collect();
        let mut system = RewriteSystem::new(false);
        system.add_rule(&mut ctx, term(&[t[4], t[3]]), term(&[t[0]]), None);
        system.add_rule(&mut ctx, term(&[t[3], t[5]]), term(&[t[1], t[2]]), None);
        let limits = CompletionLimits {
            max_iterations: 100,
            max_depth: 1,
        };
        // τ_0_4.τ_0_3.τ_0_5 resolves to τ_0_4.τ_0_1.τ_0_2 => τ_0_0.τ_0_5
        assert_eq!(
            system.complete(&mut ctx, limits, &DebugOptions::NONE),
            CompletionResult::MaxDepth
        );
    }

    #[test]
    fn test_iteration_limit_counts_critical_pairs() {
        let graph = ProtocolGraph::new();
        let mut ctx = RewriteContext::new(&graph);
        let t0 = ctx.generic_param_symbol(GenericParamKey::new(0, 0));
        let mut system = RewriteSystem::new(false);
        system.add_rule(&mut ctx, term(&[t0, t0]), term(&[t0]), None);
        let limits = CompletionLimits {
            max_iterations: 0,
            max_depth: 10,
        };
        assert_eq!(
            system.complete(&mut ctx, limits, &DebugOptions::NONE),
            CompletionResult::MaxIterations
        );
        assert_eq!(system.stats().iterations, 1);
    }

    #[test]
    fn test_merging_introduces_merged_symbol() {
        let mut graph = ProtocolGraph::new();
        let p = graph.add_protocol("P");
        let q = graph.add_protocol("Q");
        graph.add_associated_type(p, "T");
        graph.add_associated_type(q, "T");
        let mut ctx = RewriteContext::new(&graph);
        let x = ctx.generic_param_symbol(GenericParamKey::new(0, 0));
        let pt = ctx.associated_type_symbol(&[p], "T");
        let qt = ctx.associated_type_symbol(&[q], "T");
        let merged = ctx.associated_type_symbol(&[p, q], "T");
        let ps = ctx.protocol_symbol(p);
        let mut system = RewriteSystem::new(false).with_merging(true);
        system.add_rule(&mut ctx, term(&[pt, ps]), term(&[pt]), None);
        system.add_rule(&mut ctx, term(&[x, qt]), term(&[x, pt]), None);

        let result = system.complete(&mut ctx, LIMITS, &DebugOptions::NONE);
        assert!(result.is_success());
        assert_eq!(system.stats().merged, 1);
        let mut reduced = term(&[x, qt]);
        system.simplify(&mut ctx, &mut reduced, None);
        assert_eq!(reduced.symbols(), &[x, merged]);
        assert!(system.rule_for_lhs(&[merged, ps]).is_some());
    }

    #[test]
    fn test_loop_recording_machines_never_merge() {
        let system = RewriteSystem::new(true).with_merging(true);
        assert!(!system.merge_enabled);
    }
}
