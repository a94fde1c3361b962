//! Rewrite steps, paths and loops.
//!
//! A `RewriteStep` is one reversible edit of the term on top of the
//! evaluator's primary stack. A `RewritePath` composes steps into a 2-cell
//! between two terms; a `RewriteLoop` is a path that returns to its
//! basepoint, i.e. a 3-cell witnessing that some rule is derivable from the
//! others.
//!
//! Offsets locate where a step applies: the step edits the subterm
//! `[start_offset, len - end_offset)` of its term. Symbol-level steps
//! (`AdjustConcreteType`, `Decompose`) act on the symbol at
//! `len - end_offset - 1`.
//!
//! # Citations
//! - Squier, Otto & Kobayashi, "A finiteness condition for rewriting systems" (1994)
//! - Guiraud & Malbos, "Higher-dimensional normalisation strategies for acyclicity" (2012)

use crate::arena::{SymbolId, TermId};
use crate::term::MutableTerm;
use std::collections::BTreeMap;

/// Kind and payload of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepKind {
    /// Apply rule `id` (forward: LHS to RHS).
    Rule(usize),
    /// Prepend the `prefix_len` symbols at `start_offset` to every
    /// substitution of the symbol at the end.
    AdjustConcreteType { prefix_len: usize },
    /// Move the primary top onto the secondary stack.
    Shift,
    /// Push the `count` substitutions of the symbol at the end onto the
    /// primary stack. The inverse is `Compose`.
    Decompose { count: usize },
    /// Replace relation `id`'s LHS by its RHS.
    Relation(usize),
    /// `[concrete: C].[P]` to `[concrete: C : P]`.
    ConcreteConformance,
    /// `[superclass: C].[P]` to `[concrete: C : P]`.
    SuperclassConformance,
    /// Drop the concrete symbol after a type witness LHS.
    ConcreteTypeWitness(usize),
    /// Replace a witness LHS by the conforming subject.
    SameTypeWitness(usize),
    /// Replace a witness LHS by the witness term.
    AbstractTypeWitness(usize),
}

/// One step with its location and direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RewriteStep {
    pub kind: StepKind,
    pub start_offset: usize,
    pub end_offset: usize,
    pub inverse: bool,
}

impl RewriteStep {
    pub fn new(kind: StepKind, start_offset: usize, end_offset: usize, inverse: bool) -> Self {
        Self {
            kind,
            start_offset,
            end_offset,
            inverse,
        }
    }

    pub fn rule(id: usize, start_offset: usize, end_offset: usize, inverse: bool) -> Self {
        Self::new(StepKind::Rule(id), start_offset, end_offset, inverse)
    }

    pub fn shift(inverse: bool) -> Self {
        Self::new(StepKind::Shift, 0, 0, inverse)
    }

    pub fn decompose(count: usize, end_offset: usize, inverse: bool) -> Self {
        Self::new(StepKind::Decompose { count }, 0, end_offset, inverse)
    }

    pub fn inverted(self) -> Self {
        Self {
            inverse: !self.inverse,
            ..self
        }
    }

    pub fn rule_id(&self) -> Option<usize> {
        match self.kind {
            StepKind::Rule(id) => Some(id),
            _ => None,
        }
    }

    /// Change in the number of terms stacked above the base.
    fn stack_delta(&self) -> isize {
        match (self.kind, self.inverse) {
            (StepKind::Decompose { count }, false) => count as isize,
            (StepKind::Decompose { count }, true) => -(count as isize),
            (StepKind::Shift, false) => -1,
            (StepKind::Shift, true) => 1,
            _ => 0,
        }
    }

    /// Whether the step edits the base term, given how many terms sit above it.
    fn acts_on_base(&self, above: isize) -> bool {
        match (self.kind, self.inverse) {
            (StepKind::Shift, _) => false,
            (StepKind::Decompose { count }, true) => above == count as isize,
            _ => above == 0,
        }
    }

    fn is_inverse_of(&self, other: &RewriteStep) -> bool {
        self.kind == other.kind
            && self.start_offset == other.start_offset
            && self.end_offset == other.end_offset
            && self.inverse != other.inverse
    }
}

/// A composed sequence of steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RewritePath {
    steps: Vec<RewriteStep>,
}

impl RewritePath {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_steps(steps: Vec<RewriteStep>) -> Self {
        Self { steps }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn steps(&self) -> &[RewriteStep] {
        &self.steps
    }

    pub fn push(&mut self, step: RewriteStep) {
        self.steps.push(step);
    }

    pub fn append(&mut self, other: &RewritePath) {
        self.steps.extend_from_slice(&other.steps);
    }

    /// Reverses the step order and inverts every step.
    pub fn invert(&mut self) {
        self.steps.reverse();
        for step in &mut self.steps {
            step.inverse = !step.inverse;
        }
    }

    pub fn inverted(&self) -> RewritePath {
        let mut out = self.clone();
        out.invert();
        out
    }

    /// The same path applied inside `start` symbols of prefix and `end`
    /// symbols of suffix. Only steps acting on the base term move.
    pub fn whiskered(&self, start: usize, end: usize) -> RewritePath {
        if start == 0 && end == 0 {
            return self.clone();
        }
        let mut above: isize = 0;
        let steps = self
            .steps
            .iter()
            .map(|step| {
                let mut step = *step;
                if step.acts_on_base(above) {
                    step.start_offset += start;
                    step.end_offset += end;
                }
                above += step.stack_delta();
                step
            })
            .collect();
        RewritePath { steps }
    }

    /// Replaces every occurrence of `rule` by `replacement`, whiskered to
    /// the occurrence's offsets. Returns whether anything changed.
    pub fn replace_rule_with_path(&mut self, rule: usize, replacement: &RewritePath) -> bool {
        if !self.contains_rule(rule) {
            return false;
        }
        let inverse = replacement.inverted();
        let mut out = Vec::with_capacity(self.steps.len() + replacement.len());
        for step in &self.steps {
            if step.kind == StepKind::Rule(rule) {
                let body = if step.inverse { &inverse } else { replacement };
                out.extend(body.whiskered(step.start_offset, step.end_offset).steps);
            } else {
                out.push(*step);
            }
        }
        self.steps = out;
        true
    }

    /// Cancels adjacent step/inverse pairs. Returns whether anything changed.
    pub fn compute_freely_reduced_form(&mut self) -> bool {
        let mut out: Vec<RewriteStep> = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            match out.last() {
                Some(prev) if prev.is_inverse_of(step) => {
                    out.pop();
                }
                _ => out.push(*step),
            }
        }
        let changed = out.len() != self.steps.len();
        self.steps = out;
        changed
    }

    pub fn contains_rule(&self, rule: usize) -> bool {
        self.steps.iter().any(|s| s.kind == StepKind::Rule(rule))
    }

    /// Rule identifiers in step order, with repetitions.
    pub fn rules(&self) -> impl Iterator<Item = usize> + '_ {
        self.steps.iter().filter_map(RewriteStep::rule_id)
    }

    /// Rules occurring exactly once, with that occurrence applied to the
    /// whole base term (offsets zero, nothing stacked). Sorted.
    pub fn rules_in_empty_context(&self) -> Vec<usize> {
        let mut multiplicity: BTreeMap<usize, (usize, bool)> = BTreeMap::new();
        let mut above: isize = 0;
        let mut shifted: isize = 0;
        for step in &self.steps {
            if let StepKind::Rule(id) = step.kind {
                let empty = above == 0 && shifted == 0 && step.start_offset == 0 && step.end_offset == 0;
                let entry = multiplicity.entry(id).or_insert((0, false));
                entry.0 += 1;
                entry.1 = empty;
            }
            match (step.kind, step.inverse) {
                (StepKind::Shift, false) => shifted += 1,
                (StepKind::Shift, true) => shifted -= 1,
                _ => {}
            }
            above += step.stack_delta();
        }
        multiplicity
            .into_iter()
            .filter(|(_, (count, empty))| *count == 1 && *empty)
            .map(|(id, _)| id)
            .collect()
    }

    /// Splits the path around its single occurrence of `rule`:
    /// returns `(before, occurrence, after)`.
    pub fn split_at_rule(&self, rule: usize) -> Option<(RewritePath, RewriteStep, RewritePath)> {
        let pos = self.steps.iter().position(|s| s.kind == StepKind::Rule(rule))?;
        Some((
            RewritePath::from_steps(self.steps[..pos].to_vec()),
            self.steps[pos],
            RewritePath::from_steps(self.steps[pos + 1..].to_vec()),
        ))
    }
}

/// A closed path: replaying `path` from `basepoint` returns to `basepoint`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteLoop {
    pub basepoint: MutableTerm,
    path: RewritePath,
    deleted: bool,
    /// Cached `rules_in_empty_context`; `None` when dirty.
    candidates: Option<Vec<usize>>,
}

impl RewriteLoop {
    pub fn new(basepoint: MutableTerm, path: RewritePath) -> Self {
        Self {
            basepoint,
            path,
            deleted: false,
            candidates: None,
        }
    }

    pub fn path(&self) -> &RewritePath {
        &self.path
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn mark_deleted(&mut self) {
        self.deleted = true;
    }

    /// Replaces `rule` in the loop path and re-reduces it.
    pub fn replace_rule(&mut self, rule: usize, replacement: &RewritePath) -> bool {
        if self.path.replace_rule_with_path(rule, replacement) {
            self.path.compute_freely_reduced_form();
            self.candidates = None;
            true
        } else {
            false
        }
    }

    /// Rules that this loop proves removable, recomputed when dirty.
    pub fn candidates(&mut self) -> &[usize] {
        if self.candidates.is_none() {
            self.candidates = Some(self.path.rules_in_empty_context());
        }
        self.candidates.as_deref().unwrap_or(&[])
    }

    pub fn contains_rule(&self, rule: usize) -> bool {
        self.path.contains_rule(rule)
    }
}

/// Right-hand side of a type witness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WitnessRhs {
    /// A concrete witness symbol appended to the LHS.
    Concrete(SymbolId),
    /// A replacement term for the whole LHS.
    Term(TermId),
}

/// Cached associated-type witness of a concrete conformance.
///
/// `lhs` is the absolute term `X.[concrete: C : P].[P:A]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeWitness {
    pub lhs: TermId,
    pub rhs: WitnessRhs,
}
