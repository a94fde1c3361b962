//! Replay of rewrite paths.
//!
//! The evaluator keeps two stacks of terms. Steps edit the top of the
//! primary stack; `Shift` moves terms between the stacks while a
//! decomposed concrete symbol's substitutions are rewritten one at a time.
//! Every step is checked against the exact term shape it expects, so a
//! corrupted path is caught at the first bad step.

use crate::arena::SymbolId;
use crate::context::RewriteContext;
use crate::error::{fatal, InvariantViolation};
use crate::path::{RewriteLoop, RewritePath, RewriteStep, StepKind, WitnessRhs};
use crate::rewrite_system::RewriteSystem;
use crate::symbol::Symbol;
use crate::term::MutableTerm;

/// Two-stack path evaluator.
#[derive(Debug, Clone)]
pub struct RewritePathEvaluator {
    primary: Vec<MutableTerm>,
    secondary: Vec<MutableTerm>,
}

impl RewritePathEvaluator {
    pub fn new(basepoint: MutableTerm) -> Self {
        Self {
            primary: vec![basepoint],
            secondary: Vec::new(),
        }
    }

    /// Returns `true` while substitutions are stacked above the base.
    pub fn is_in_context(&self) -> bool {
        self.primary.len() > 1 || !self.secondary.is_empty()
    }

    /// The term on top of the primary stack.
    pub fn current_term(&self) -> Option<&MutableTerm> {
        self.primary.last()
    }

    /// Human-readable state for fatal dumps.
    pub fn dump(&self, ctx: &RewriteContext) -> String {
        let fmt = |stack: &[MutableTerm]| {
            stack
                .iter()
                .map(|t| ctx.format_term(t.symbols()))
                .collect::<Vec<_>>()
                .join(" | ")
        };
        format!("primary: [{}] secondary: [{}]", fmt(&self.primary), fmt(&self.secondary))
    }

    fn mismatch(&self, ctx: &RewriteContext, step: &RewriteStep) -> InvariantViolation {
        InvariantViolation::PathStepMismatch {
            step: format!("{:?}", step),
            term: self.dump(ctx),
        }
    }

    fn underflow(step: &RewriteStep) -> InvariantViolation {
        InvariantViolation::EvaluatorStackUnderflow {
            step: format!("{:?}", step),
        }
    }

    /// Applies one step.
    pub fn apply(
        &mut self,
        step: &RewriteStep,
        system: &RewriteSystem,
        ctx: &mut RewriteContext,
    ) -> Result<(), InvariantViolation> {
        match step.kind {
            StepKind::Shift => {
                let (from, to) = if step.inverse {
                    (&mut self.secondary, &mut self.primary)
                } else {
                    (&mut self.primary, &mut self.secondary)
                };
                let term = from.pop().ok_or_else(|| Self::underflow(step))?;
                to.push(term);
                Ok(())
            }
            StepKind::Decompose { count } => self.apply_decompose(step, count, ctx),
            StepKind::Rule(id) => {
                let rule = system.rule(id);
                let (from, to) = if step.inverse {
                    (rule.rhs(), rule.lhs())
                } else {
                    (rule.lhs(), rule.rhs())
                };
                let (from, to) = (ctx.term(from).to_vec(), ctx.term(to).to_vec());
                self.splice(step, &from, &to, ctx)
            }
            StepKind::Relation(id) => {
                let (lhs, rhs) = system.relation(id);
                let (from, to) = if step.inverse { (rhs, lhs) } else { (lhs, rhs) };
                let (from, to) = (ctx.term(from).to_vec(), ctx.term(to).to_vec());
                self.splice(step, &from, &to, ctx)
            }
            StepKind::AdjustConcreteType { prefix_len } => {
                let term = self.primary.last().ok_or_else(|| Self::underflow(step))?;
                if step.start_offset + prefix_len + step.end_offset >= term.len() {
                    return Err(self.mismatch(ctx, step));
                }
                let at = term.len() - step.end_offset - 1;
                let prefix = term.symbols()[step.start_offset..step.start_offset + prefix_len].to_vec();
                let sym = term.get(at);
                let adjusted = if step.inverse {
                    ctx.strip_prefix_substitutions(sym, &prefix)
                } else if ctx.symbol(sym).has_substitutions() {
                    Some(ctx.prefix_substitutions(sym, &prefix))
                } else {
                    None
                };
                let adjusted = adjusted.ok_or_else(|| self.mismatch(ctx, step))?;
                if let Some(top) = self.primary.last_mut() {
                    top.set(at, adjusted);
                }
                Ok(())
            }
            StepKind::ConcreteConformance | StepKind::SuperclassConformance => {
                self.apply_conformance_step(step, ctx)
            }
            StepKind::ConcreteTypeWitness(id) => {
                let witness = system.type_witness(id);
                let lhs = ctx.term(witness.lhs).to_vec();
                let sym = match witness.rhs {
                    WitnessRhs::Concrete(sym) => sym,
                    WitnessRhs::Term(_) => return Err(self.mismatch(ctx, step)),
                };
                let mut with_sym = lhs.clone();
                with_sym.push(sym);
                let (from, to) = if step.inverse { (lhs, with_sym) } else { (with_sym, lhs) };
                self.splice(step, &from, &to, ctx)
            }
            StepKind::SameTypeWitness(id) | StepKind::AbstractTypeWitness(id) => {
                let witness = system.type_witness(id);
                let lhs = ctx.term(witness.lhs).to_vec();
                let rhs = match witness.rhs {
                    WitnessRhs::Term(t) => ctx.term(t).to_vec(),
                    WitnessRhs::Concrete(_) => return Err(self.mismatch(ctx, step)),
                };
                let (from, to) = if step.inverse { (rhs, lhs) } else { (lhs, rhs) };
                self.splice(step, &from, &to, ctx)
            }
        }
    }

    /// Replaces `from` by `to` at the step's offsets, checking the match.
    fn splice(
        &mut self,
        step: &RewriteStep,
        from: &[SymbolId],
        to: &[SymbolId],
        ctx: &RewriteContext,
    ) -> Result<(), InvariantViolation> {
        let ok = match self.primary.last() {
            Some(term) => {
                term.len() == step.start_offset + from.len() + step.end_offset
                    && term.matches_at(step.start_offset, from)
            }
            None => return Err(Self::underflow(step)),
        };
        if !ok {
            return Err(self.mismatch(ctx, step));
        }
        if let Some(term) = self.primary.last_mut() {
            term.splice(step.start_offset..step.start_offset + from.len(), to);
        }
        Ok(())
    }

    fn apply_decompose(
        &mut self,
        step: &RewriteStep,
        count: usize,
        ctx: &mut RewriteContext,
    ) -> Result<(), InvariantViolation> {
        if !step.inverse {
            let term = self.primary.last().ok_or_else(|| Self::underflow(step))?;
            if step.end_offset >= term.len() {
                return Err(self.mismatch(ctx, step));
            }
            let sym = term.get(term.len() - step.end_offset - 1);
            let subs = match ctx.symbol(sym).substitutions() {
                Some(subs) if subs.len() == count => subs.to_vec(),
                _ => return Err(self.mismatch(ctx, step)),
            };
            for sub in subs {
                self.primary.push(MutableTerm::from(ctx.term(sub)));
            }
            return Ok(());
        }

        if self.primary.len() < count + 1 {
            return Err(Self::underflow(step));
        }
        let popped: Vec<MutableTerm> = self.primary.split_off(self.primary.len() - count);
        let term = match self.primary.last() {
            Some(term) if step.end_offset < term.len() => term,
            _ => return Err(self.mismatch(ctx, step)),
        };
        let at = term.len() - step.end_offset - 1;
        let sym = term.get(at);
        if ctx.symbol(sym).substitutions().map(<[_]>::len) != Some(count) {
            return Err(self.mismatch(ctx, step));
        }
        let subs = popped.iter().map(|t| ctx.intern_term(t.symbols())).collect();
        let rebuilt = ctx.with_substitutions(sym, subs);
        if let Some(top) = self.primary.last_mut() {
            top.set(at, rebuilt);
        }
        Ok(())
    }

    fn apply_conformance_step(&mut self, step: &RewriteStep, ctx: &mut RewriteContext) -> Result<(), InvariantViolation> {
        let term = self.primary.last().ok_or_else(|| Self::underflow(step))?.clone();
        let superclass = step.kind == StepKind::SuperclassConformance;
        if !step.inverse {
            // [concrete: C].[P] => [concrete: C : P]
            if term.len() != step.start_offset + 2 + step.end_offset {
                return Err(self.mismatch(ctx, step));
            }
            let (c, p) = (term.get(step.start_offset), term.get(step.start_offset + 1));
            let proto = match ctx.symbol(p) {
                Symbol::Protocol(proto) => *proto,
                _ => return Err(self.mismatch(ctx, step)),
            };
            let (pattern, subs) = match (ctx.symbol(c), superclass) {
                (
                    Symbol::ConcreteType {
                        pattern,
                        substitutions,
                    },
                    false,
                )
                | (
                    Symbol::Superclass {
                        pattern,
                        substitutions,
                    },
                    true,
                ) => (pattern.clone(), substitutions.clone()),
                _ => return Err(self.mismatch(ctx, step)),
            };
            let cc = ctx.intern_symbol(Symbol::ConcreteConformance {
                pattern,
                substitutions: subs,
                protocol: proto,
            });
            if let Some(top) = self.primary.last_mut() {
                top.splice(step.start_offset..step.start_offset + 2, &[cc]);
            }
            return Ok(());
        }

        if term.len() != step.start_offset + 1 + step.end_offset {
            return Err(self.mismatch(ctx, step));
        }
        let cc = term.get(step.start_offset);
        let (pattern, subs, proto) = match ctx.symbol(cc) {
            Symbol::ConcreteConformance {
                pattern,
                substitutions,
                protocol,
            } => (pattern.clone(), substitutions.clone(), *protocol),
            _ => return Err(self.mismatch(ctx, step)),
        };
        let c = if superclass {
            ctx.intern_symbol(Symbol::Superclass {
                pattern,
                substitutions: subs,
            })
        } else {
            ctx.intern_symbol(Symbol::ConcreteType {
                pattern,
                substitutions: subs,
            })
        };
        let p = ctx.protocol_symbol(proto);
        if let Some(top) = self.primary.last_mut() {
            top.splice(step.start_offset..step.start_offset + 1, &[c, p]);
        }
        Ok(())
    }

    /// Applies a step, aborting on mismatch.
    pub fn apply_or_die(&mut self, step: &RewriteStep, system: &RewriteSystem, ctx: &mut RewriteContext) {
        if let Err(violation) = self.apply(step, system, ctx) {
            let dump = format!("{}\n{}", self.dump(ctx), system.dump(ctx));
            fatal(violation, &dump);
        }
    }

    /// Applies every step of `path`.
    pub fn apply_path(
        &mut self,
        path: &RewritePath,
        system: &RewriteSystem,
        ctx: &mut RewriteContext,
    ) -> Result<(), InvariantViolation> {
        for step in path.steps() {
            self.apply(step, system, ctx)?;
        }
        Ok(())
    }

    /// Checks that `lp` returns to its basepoint with balanced stacks.
    pub fn verify_loop(lp: &RewriteLoop, system: &RewriteSystem, ctx: &mut RewriteContext) -> Result<(), InvariantViolation> {
        let mut evaluator = RewritePathEvaluator::new(lp.basepoint.clone());
        evaluator.apply_path(lp.path(), system, ctx)?;
        let balanced = evaluator.primary.len() == 1 && evaluator.secondary.is_empty();
        if !balanced || evaluator.current_term() != Some(&lp.basepoint) {
            return Err(InvariantViolation::UnbalancedLoop {
                basepoint: ctx.format_term(lp.basepoint.symbols()),
                end: evaluator.dump(ctx),
            });
        }
        Ok(())
    }

    /// Consumes the evaluator, returning the final term of a balanced run.
    pub fn into_term(mut self) -> Option<MutableTerm> {
        if self.primary.len() == 1 && self.secondary.is_empty() {
            self.primary.pop()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol_graph::ProtocolGraph;
    use crate::symbol::{GenericParamKey, TypePattern};

    fn setup() -> (RewriteContext, RewriteSystem, Vec<SymbolId>) {
        let mut graph = ProtocolGraph::new();
        let p = graph.add_protocol("P");
        let mut ctx = RewriteContext::new(&graph);
        let t0 = ctx.generic_param_symbol(GenericParamKey::new(0, 0));
        let t1 = ctx.generic_param_symbol(GenericParamKey::new(0, 1));
        let ps = ctx.protocol_symbol(p);
        let mut system = RewriteSystem::new(true);
        // τ_0_1 => τ_0_0
        system.add_rule(&mut ctx, MutableTerm::single(t1), MutableTerm::single(t0), None);
        (ctx, system, vec![t0, t1, ps])
    }

    #[test]
    fn test_rule_step_and_inverse_restore_term() {
        let (mut ctx, system, syms) = setup();
        let (t0, t1, ps) = (syms[0], syms[1], syms[2]);
        let start = MutableTerm::from_symbols(vec![t1, ps]);
        let mut ev = RewritePathEvaluator::new(start.clone());
        let step = RewriteStep::rule(0, 0, 1, false);
        ev.apply(&step, &system, &mut ctx).unwrap();
        assert_eq!(ev.current_term().unwrap().symbols(), &[t0, ps]);
        ev.apply(&step.inverted(), &system, &mut ctx).unwrap();
        assert_eq!(ev.current_term(), Some(&start));
    }

    #[test]
    fn test_decompose_compose_round_trip() {
        let (mut ctx, system, syms) = setup();
        let (t0, t1) = (syms[0], syms[1]);
        let sub = ctx.intern_term(&[t1]);
        let array = ctx.concrete_symbol(TypePattern::nominal("Array", vec![TypePattern::Placeholder(0)]), vec![sub]);
        let mut ev = RewritePathEvaluator::new(MutableTerm::from_symbols(vec![t0, array]));
        let path = RewritePath::from_steps(vec![
            RewriteStep::decompose(1, 0, false),
            RewriteStep::rule(0, 0, 0, false),
            RewriteStep::shift(false),
            RewriteStep::shift(true),
            RewriteStep::decompose(1, 0, true),
        ]);
        ev.apply_path(&path, &system, &mut ctx).unwrap();
        assert!(!ev.is_in_context());
        let out = ev.into_term().unwrap();
        assert_eq!(ctx.format_term(out.symbols()), "τ_0_0.[concrete: Array<σ0> with <τ_0_0>]");
    }

    #[test]
    fn test_mismatched_step_is_reported() {
        let (mut ctx, system, syms) = setup();
        let mut ev = RewritePathEvaluator::new(MutableTerm::single(syms[0]));
        let err = ev
            .apply(&RewriteStep::rule(0, 0, 0, false), &system, &mut ctx)
            .unwrap_err();
        assert!(matches!(err, InvariantViolation::PathStepMismatch { .. }));
        let err = ev.apply(&RewriteStep::shift(true), &system, &mut ctx).unwrap_err();
        assert!(matches!(err, InvariantViolation::EvaluatorStackUnderflow { .. }));
    }

    #[test]
    #[should_panic(expected = "does not apply")]
    fn test_apply_or_die_aborts_on_corrupt_path() {
        let (mut ctx, system, syms) = setup();
        let mut ev = RewritePathEvaluator::new(MutableTerm::single(syms[2]));
        ev.apply_or_die(&RewriteStep::rule(0, 0, 0, true), &system, &mut ctx);
    }

    #[test]
    fn test_conformance_step_round_trip() {
        let (mut ctx, system, syms) = setup();
        let (t0, ps) = (syms[0], syms[2]);
        let int = ctx.concrete_symbol(TypePattern::nominal("Int", vec![]), vec![]);
        let start = MutableTerm::from_symbols(vec![t0, int, ps]);
        let mut ev = RewritePathEvaluator::new(start.clone());
        let step = RewriteStep::new(StepKind::ConcreteConformance, 1, 0, false);
        ev.apply(&step, &system, &mut ctx).unwrap();
        assert_eq!(
            ctx.format_term(ev.current_term().unwrap().symbols()),
            "τ_0_0.[concrete: Int : P]"
        );
        ev.apply(&step.inverted(), &system, &mut ctx).unwrap();
        assert_eq!(ev.current_term(), Some(&start));
    }
}
