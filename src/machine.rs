//! Requirement machines.
//!
//! A machine is one rewrite system together with the requirements it was
//! built from. Building runs completion and the property map to a fixpoint;
//! machines that record loops can then be minimized and turned back into
//! requirements. Query machines skip loop recording and merge associated
//! types instead.

use crate::arena::{SymbolId, TermId};
use crate::completion::CompletionResult;
use crate::config::EngineOptions;
use crate::context::RewriteContext;
use crate::diagnostics::{Diagnostic, DiagnosticKind, SourceLoc};
use crate::error::RequirementError;
use crate::property_map::{PropertyBag, PropertyMap};
use crate::protocol_graph::ProtocolGraph;
use crate::requirement::{concrete_conforms, desugar, requirement_for_rule, rule_for_requirement, Requirement, StructuralRequirement, Type};
use crate::rewrite_system::RewriteSystem;
use crate::signature::{GenericParamDecl, GenericSignatureErrors, RequirementSignature};
use crate::symbol::{GenericParamKey, LayoutConstraint, ProtocolId, SymbolKind};
use crate::term::MutableTerm;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

/// What a machine is built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineKind {
    /// Minimizes the requirement signatures of a protocol component. The
    /// requirements come from the protocol declarations.
    RequirementSignatures(Vec<ProtocolId>),
    /// Minimizes a generic signature.
    GenericSignature(Vec<GenericParamDecl>),
    /// Answers queries about an already minimal generic signature.
    Query(Vec<GenericParamDecl>),
}

impl MachineKind {
    pub fn records_loops(&self) -> bool {
        !matches!(self, MachineKind::Query(_))
    }

    /// Protocols whose conformance rules are constrained during
    /// minimization.
    pub fn domains(&self) -> &[ProtocolId] {
        match self {
            MachineKind::RequirementSignatures(protos) => protos,
            _ => &[],
        }
    }

    pub fn params(&self) -> &[GenericParamDecl] {
        match self {
            MachineKind::GenericSignature(params) | MachineKind::Query(params) => params,
            MachineKind::RequirementSignatures(_) => &[],
        }
    }
}

/// Kind rank used for canonical requirement order.
fn kind_rank(ctx: &RewriteContext, symbol: Option<SymbolId>) -> u8 {
    match symbol.map(|s| ctx.symbol(s).kind()) {
        Some(SymbolKind::Superclass) => 0,
        Some(SymbolKind::Layout) => 1,
        Some(SymbolKind::Protocol) => 2,
        _ => 3,
    }
}

#[derive(Debug)]
pub struct RequirementMachine {
    kind: MachineKind,
    system: RewriteSystem,
    map: PropertyMap,
    options: EngineOptions,
    /// Desugared input; explicit rules index into it.
    requirements: Vec<StructuralRequirement>,
    invalid: Vec<(SourceLoc, RequirementError, bool)>,
    /// Written requirements found redundant before any rule was built.
    trivially_redundant: Vec<StructuralRequirement>,
    /// Requirements whose rule was implied at insertion.
    implied: Vec<usize>,
    conflicts: Vec<(usize, usize)>,
    result: CompletionResult,
    errors: GenericSignatureErrors,
    minimized: bool,
}

impl RequirementMachine {
    /// Builds the rule set and runs completion to a fixpoint.
    ///
    /// `requirements` are the generic signature's requirements; protocol
    /// components take theirs from `graph`. `imported` holds the rules of
    /// the protocols this machine depends on, already complete.
    pub fn build(
        ctx: &mut RewriteContext,
        graph: &ProtocolGraph,
        kind: MachineKind,
        requirements: &[StructuralRequirement],
        imported: &[(TermId, TermId)],
        options: &EngineOptions,
    ) -> Self {
        let record = kind.records_loops();
        let system = RewriteSystem::new(record).with_merging(options.merge_associated_types);
        let mut machine = RequirementMachine {
            kind,
            system,
            map: PropertyMap::new(),
            options: options.clone(),
            requirements: Vec::new(),
            invalid: Vec::new(),
            trivially_redundant: Vec::new(),
            implied: Vec::new(),
            conflicts: Vec::new(),
            result: CompletionResult::Success,
            errors: GenericSignatureErrors::empty(),
            minimized: false,
        };

        let groups = machine.input_groups(graph, requirements);
        let mut explicit = Vec::new();
        let mut protocols: BTreeSet<ProtocolId> = machine.kind.domains().iter().copied().collect();
        for (domain, input) in groups {
            let desugared = desugar(graph, machine.kind.params(), &input);
            for (loc, error) in desugared.errors {
                let inferred = input.iter().any(|r| r.loc == loc && r.inferred);
                machine.invalid.push((loc, error, inferred));
            }
            machine
                .trivially_redundant
                .extend(desugared.redundant.into_iter().filter(|r| !r.inferred));
            for req in desugared.requirements {
                match machine.rule_sides(ctx, &req.requirement, domain) {
                    Ok((lhs, rhs)) => {
                        req.requirement.collect_protocols(&mut protocols);
                        explicit.push((lhs, rhs, Some(machine.requirements.len())));
                        machine.requirements.push(req);
                    }
                    Err(error) => machine.invalid.push((req.loc, error, req.inferred)),
                }
            }
        }
        if !machine.invalid.is_empty() {
            machine.errors.insert(GenericSignatureErrors::HAS_INVALID_REQUIREMENTS);
        }

        let roots: Vec<ProtocolId> = protocols.iter().copied().collect();
        protocols.extend(graph.transitive_dependencies(&roots));
        let permanent = permanent_rules(ctx, graph, &protocols);
        machine.implied = machine.system.initialize(ctx, imported, permanent, explicit);
        machine.result = machine.compute_completion(ctx, graph);
        machine
    }

    /// Requirements to build, each with the protocol whose `Self` it is
    /// written on.
    fn input_groups(
        &self,
        graph: &ProtocolGraph,
        requirements: &[StructuralRequirement],
    ) -> Vec<(Option<ProtocolId>, Vec<StructuralRequirement>)> {
        match &self.kind {
            MachineKind::RequirementSignatures(protos) => protos
                .iter()
                .map(|&proto| {
                    let decl = graph.protocol(proto);
                    let mut input: Vec<StructuralRequirement> = decl
                        .inherited
                        .iter()
                        .map(|&q| {
                            StructuralRequirement::inferred(
                                Requirement::conformance(Type::Param(GenericParamKey::SELF), q),
                                SourceLoc::default(),
                            )
                        })
                        .collect();
                    input.extend(decl.requirements.iter().cloned());
                    (Some(proto), input)
                })
                .collect(),
            _ => vec![(None, requirements.to_vec())],
        }
    }

    fn rule_sides(
        &self,
        ctx: &mut RewriteContext,
        requirement: &Requirement,
        domain: Option<ProtocolId>,
    ) -> Result<(MutableTerm, MutableTerm), RequirementError> {
        let limit = self.options.max_concrete_nesting;
        let constraint = match requirement {
            Requirement::SameType { second, .. } if !second.is_type_parameter() => Some(second),
            Requirement::Superclass { superclass, .. } => Some(superclass),
            _ => None,
        };
        if let Some(ty) = constraint {
            if ty.nesting_depth() > limit {
                return Err(RequirementError::ExcessiveNesting { ty: ty.clone(), limit });
            }
        }
        rule_for_requirement(ctx, requirement, domain)
    }

    /// Completion and property map, alternated until the property map adds
    /// nothing.
    fn compute_completion(&mut self, ctx: &mut RewriteContext, graph: &ProtocolGraph) -> CompletionResult {
        let result = loop {
            let result = self.system.complete(ctx, self.options.limits(), &self.options.debug);
            if !result.is_success() {
                break result;
            }
            let built = self.map.build(ctx, &mut self.system, graph, &self.options);
            self.conflicts.extend(built.conflicts);
            if built.nesting_exceeded {
                tracing::warn!(limit = self.options.max_concrete_nesting, "concrete type nesting limit exceeded");
                break CompletionResult::MaxConcreteNesting;
            }
            if !built.added_rules {
                break CompletionResult::Success;
            }
        };
        if !result.is_success() {
            self.errors.insert(GenericSignatureErrors::COMPLETION_FAILED);
        }
        if !self.conflicts.is_empty() {
            self.errors.insert(GenericSignatureErrors::HAS_CONFLICTS);
        }
        result
    }

    /// Homotopy reduction. Does nothing for query machines or when
    /// completion failed.
    pub fn minimize(&mut self, ctx: &mut RewriteContext) {
        if self.minimized || !self.kind.records_loops() || !self.result.is_success() {
            return;
        }
        self.system.minimize(ctx, self.kind.domains(), &self.options.debug);
        self.minimized = true;
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn reduced_term(&mut self, ctx: &mut RewriteContext, term: &[SymbolId]) -> MutableTerm {
        let mut term = MutableTerm::from(term);
        self.system.simplify(ctx, &mut term, None);
        term
    }

    fn reduced_param(&mut self, ctx: &mut RewriteContext, ty: &Type) -> Option<MutableTerm> {
        let term = ctx.term_for_type(ty, None).ok()?;
        Some(self.reduced_term(ctx, term.symbols()))
    }

    fn properties(&mut self, ctx: &mut RewriteContext, ty: &Type) -> PropertyBag {
        match self.reduced_param(ctx, ty) {
            Some(term) => self.map.lookup(ctx, term.symbols()),
            None => PropertyBag::default(),
        }
    }

    /// The canonical spelling of `ty`: type parameters are reduced and
    /// replaced by their concrete type when they have one.
    pub fn reduced_type(&mut self, ctx: &mut RewriteContext, ty: &Type) -> Option<Type> {
        self.reduced_type_at(ctx, ty, 0)
    }

    fn reduced_type_at(&mut self, ctx: &mut RewriteContext, ty: &Type, depth: usize) -> Option<Type> {
        if depth > self.options.max_concrete_nesting {
            return None;
        }
        if let Type::Nominal { name, args } = ty {
            let args = args
                .iter()
                .map(|arg| self.reduced_type_at(ctx, arg, depth + 1))
                .collect::<Option<Vec<_>>>()?;
            return Some(Type::Nominal {
                name: name.clone(),
                args,
            });
        }
        let term = self.reduced_param(ctx, ty)?;
        match self.map.lookup(ctx, term.symbols()).concrete_type {
            Some(concrete) => {
                let concrete = ctx.type_for_symbol(concrete)?;
                self.reduced_type_at(ctx, &concrete, depth + 1)
            }
            None => Some(ctx.type_for_term(term.symbols())),
        }
    }

    pub fn is_equivalent(&mut self, ctx: &mut RewriteContext, a: &Type, b: &Type) -> bool {
        match (self.reduced_type(ctx, a), self.reduced_type(ctx, b)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Returns `true` if `ty` conforms to `proto`, either through a
    /// conformance requirement or because its concrete type or superclass
    /// conforms.
    pub fn requires_protocol(
        &mut self,
        ctx: &mut RewriteContext,
        graph: &ProtocolGraph,
        ty: &Type,
        proto: ProtocolId,
    ) -> bool {
        let bag = self.properties(ctx, ty);
        if bag.conformances.contains(&proto) {
            return true;
        }
        [bag.concrete_type, bag.superclass]
            .into_iter()
            .flatten()
            .any(|symbol| match ctx.type_for_symbol(symbol) {
                Some(Type::Nominal { name, .. }) => concrete_conforms(graph, &name, proto),
                _ => false,
            })
    }

    pub fn concrete_type(&mut self, ctx: &mut RewriteContext, ty: &Type) -> Option<Type> {
        let concrete = self.properties(ctx, ty).concrete_type?;
        ctx.type_for_symbol(concrete)
    }

    pub fn superclass(&mut self, ctx: &mut RewriteContext, ty: &Type) -> Option<Type> {
        let superclass = self.properties(ctx, ty).superclass?;
        ctx.type_for_symbol(superclass)
    }

    pub fn layout(&mut self, ctx: &mut RewriteContext, ty: &Type) -> Option<LayoutConstraint> {
        self.properties(ctx, ty).layout
    }

    // ---------------------------------------------------------------------
    // Output
    // ---------------------------------------------------------------------

    /// Local rules that state a requirement of the minimized signature, in
    /// canonical order: subject, then kind, then constraint.
    fn emitted_rules(&self, ctx: &RewriteContext) -> Vec<usize> {
        let mut ids: Vec<usize> = (self.system.first_local_rule()..self.system.rule_count())
            .filter(|&id| {
                let rule = self.system.rule(id);
                !(rule.is_permanent()
                    || rule.is_redundant()
                    || rule.is_conflicting()
                    || rule.is_simplified()
                    || rule.has_unresolved_name(ctx)
                    || rule
                        .property_symbol(ctx)
                        .map_or(false, |s| ctx.is_kind(s, SymbolKind::ConcreteConformance)))
            })
            .collect();
        ids.sort_by(|&a, &b| self.compare_emitted(ctx, a, b));
        ids
    }

    fn compare_emitted(&self, ctx: &RewriteContext, a: usize, b: usize) -> Ordering {
        let (ra, rb) = (self.system.rule(a), self.system.rule(b));
        let (pa, pb) = (ra.property_symbol(ctx), rb.property_symbol(ctx));
        ctx.compare_term_ids(ra.rhs(), rb.rhs())
            .then_with(|| kind_rank(ctx, pa).cmp(&kind_rank(ctx, pb)))
            .then_with(|| match (pa, pb) {
                (Some(x), Some(y)) => ctx.compare_symbols(x, y),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => ctx.compare_term_ids(ra.lhs(), rb.lhs()),
            })
    }

    fn requirement_for(&self, ctx: &RewriteContext, id: usize) -> Option<Requirement> {
        let rule = self.system.rule(id);
        requirement_for_rule(ctx, ctx.term(rule.lhs()), ctx.term(rule.rhs()))
    }

    /// The minimized generic signature's requirements.
    pub fn minimal_requirements(&self, ctx: &RewriteContext) -> Vec<Requirement> {
        self.emitted_rules(ctx)
            .into_iter()
            .filter_map(|id| self.requirement_for(ctx, id))
            .collect()
    }

    /// One entry per protocol of the component, including empty ones.
    pub fn requirement_signatures(&self, ctx: &RewriteContext, graph: &ProtocolGraph) -> Vec<RequirementSignature> {
        let mut by_protocol: BTreeMap<ProtocolId, Vec<Requirement>> = BTreeMap::new();
        for id in self.emitted_rules(ctx) {
            let root = ctx.root_protocol(ctx.term(self.system.rule(id).lhs()));
            if let (Some(root), Some(req)) = (root, self.requirement_for(ctx, id)) {
                by_protocol.entry(root).or_default().push(req);
            }
        }
        self.kind
            .domains()
            .iter()
            .map(|&proto| {
                let mut sig = RequirementSignature::empty(proto);
                sig.type_aliases = graph.protocol(proto).type_aliases.clone();
                sig.errors = self.errors;
                if self.result.is_success() {
                    sig.requirements = by_protocol.remove(&proto).unwrap_or_default();
                }
                sig
            })
            .collect()
    }

    /// Rules later machines import: live, consistent, rooted in a protocol
    /// of this component. Empty when completion failed.
    pub fn exported_rules(&self, ctx: &RewriteContext) -> BTreeMap<ProtocolId, Vec<(TermId, TermId)>> {
        let mut out: BTreeMap<ProtocolId, Vec<(TermId, TermId)>> =
            self.kind.domains().iter().map(|&p| (p, Vec::new())).collect();
        if !self.result.is_success() {
            return out;
        }
        for (id, rule) in self.system.live_rules() {
            if self.system.is_imported(id) || rule.is_permanent() || rule.is_conflicting() {
                continue;
            }
            if let Some(list) = ctx.root_protocol(ctx.term(rule.lhs())).and_then(|p| out.get_mut(&p)) {
                list.push((rule.lhs(), rule.rhs()));
            }
        }
        out
    }

    /// Same-type requirements between two type parameters that are both
    /// fixed to one concrete type, rewritten as two concrete requirements.
    /// Returns `None` when no requirement needs splitting.
    pub fn split_concrete_equivalence_classes(
        &mut self,
        ctx: &mut RewriteContext,
        requirements: &[Requirement],
    ) -> Option<Vec<Requirement>> {
        let mut split = false;
        let mut out = Vec::with_capacity(requirements.len());
        for req in requirements {
            if let Requirement::SameType { first, second } = req {
                if second.is_type_parameter() {
                    if let Some(concrete) = self.concrete_type(ctx, first) {
                        out.push(Requirement::same_type(first.clone(), concrete.clone()));
                        out.push(Requirement::same_type(second.clone(), concrete));
                        split = true;
                        continue;
                    }
                }
            }
            out.push(req.clone());
        }
        split.then_some(out)
    }

    /// Diagnostics for the written requirements: invalid ones, redundant
    /// ones, conflicts and completion failure.
    pub fn diagnostics(&self, ctx: &RewriteContext) -> Vec<Diagnostic> {
        let mut out = Vec::new();
        for (loc, error, inferred) in &self.invalid {
            if !inferred {
                out.push(Diagnostic {
                    loc: *loc,
                    kind: DiagnosticKind::InvalidRequirement,
                    payload: error.to_string(),
                });
            }
        }
        let redundant = |req: &StructuralRequirement| Diagnostic {
            loc: req.loc,
            kind: DiagnosticKind::RedundantRequirement,
            payload: req.requirement.to_string(),
        };
        out.extend(self.trivially_redundant.iter().map(redundant));
        for &index in &self.implied {
            let req = &self.requirements[index];
            if !req.inferred {
                out.push(redundant(req));
            }
        }
        if self.minimized {
            for (id, rule) in self.system.rules().iter().enumerate() {
                if !rule.is_explicit()
                    || !rule.is_redundant()
                    || rule.is_conflicting()
                    || rule.is_simplified()
                    || rule.has_unresolved_name(ctx)
                {
                    continue;
                }
                if let Some(req) = rule.requirement().map(|i| &self.requirements[i]) {
                    if !req.inferred && !self.system.is_imported(id) {
                        out.push(redundant(req));
                    }
                }
            }
        }
        for &(a, b) in &self.conflicts {
            let written = [b, a]
                .into_iter()
                .filter_map(|id| self.system.rule(id).requirement())
                .map(|i| &self.requirements[i])
                .find(|req| !req.inferred);
            if let Some(req) = written {
                out.push(Diagnostic {
                    loc: req.loc,
                    kind: DiagnosticKind::ConflictingRequirement,
                    payload: format!(
                        "{} conflicts with {}",
                        self.system.rule(a).format(ctx),
                        self.system.rule(b).format(ctx)
                    ),
                });
            }
        }
        if !self.result.is_success() {
            let loc = self
                .requirements
                .iter()
                .find(|r| !r.inferred)
                .map(|r| r.loc)
                .unwrap_or_default();
            let last = self.system.rules().last().map(|r| r.format(ctx)).unwrap_or_default();
            out.push(Diagnostic {
                loc,
                kind: DiagnosticKind::CompletionFailed,
                payload: format!("{}: {}", self.result, last),
            });
        }
        out
    }

    pub fn had_error(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> GenericSignatureErrors {
        self.errors
    }

    pub fn completion_result(&self) -> CompletionResult {
        self.result
    }

    pub fn kind(&self) -> &MachineKind {
        &self.kind
    }

    pub fn system(&self) -> &RewriteSystem {
        &self.system
    }

    pub fn dump(&self, ctx: &RewriteContext) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "requirement machine {:?}: {} ({}), {} conflicts, rules {}",
            self.kind,
            self.result,
            self.errors,
            self.conflicts.len(),
            self.system.fingerprint(ctx)
        );
        out.push_str(&self.system.dump(ctx));
        out
    }
}

/// Structural rules for each protocol in `protocols`:
/// - `[P].[P] => [P]`;
/// - `[P].A => [P:A]` for each associated type `A` visible in `P`;
/// - `[P].[Q:A] => [P:A]` for each inherited `Q` and its associated types.
fn permanent_rules(
    ctx: &mut RewriteContext,
    graph: &ProtocolGraph,
    protocols: &BTreeSet<ProtocolId>,
) -> Vec<(MutableTerm, MutableTerm)> {
    let mut out = Vec::new();
    for &proto in protocols {
        let p = ctx.protocol_symbol(proto);
        out.push((MutableTerm::from_symbols(vec![p, p]), MutableTerm::single(p)));
        for name in graph.visible_associated_types(proto) {
            let assoc = ctx.associated_type_symbol(&[proto], &name);
            let unresolved = ctx.name_symbol(&name);
            out.push((MutableTerm::from_symbols(vec![p, unresolved]), MutableTerm::single(assoc)));
        }
        for ancestor in graph.inherited_closure(proto) {
            for name in graph.visible_associated_types(ancestor) {
                let inherited = ctx.associated_type_symbol(&[ancestor], &name);
                let own = ctx.associated_type_symbol(&[proto], &name);
                out.push((MutableTerm::from_symbols(vec![p, inherited]), MutableTerm::single(own)));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol_graph::{ConformanceDecl, NominalDecl, WitnessDecl};

    fn written(requirement: Requirement, loc: u32) -> StructuralRequirement {
        StructuralRequirement::written(requirement, SourceLoc(loc))
    }

    fn params(n: u32) -> Vec<GenericParamDecl> {
        (0..n).map(|i| GenericParamDecl::new(0, i)).collect()
    }

    fn generic(
        ctx: &mut RewriteContext,
        graph: &ProtocolGraph,
        n: u32,
        reqs: &[StructuralRequirement],
    ) -> RequirementMachine {
        let mut machine = RequirementMachine::build(
            ctx,
            graph,
            MachineKind::GenericSignature(params(n)),
            reqs,
            &[],
            &EngineOptions::default(),
        );
        machine.minimize(ctx);
        machine
    }

    #[test]
    fn test_single_conformance_is_kept() {
        let mut graph = ProtocolGraph::new();
        let eq = graph.add_protocol("Equatable");
        let mut ctx = RewriteContext::new(&graph);
        let req = Requirement::conformance(Type::param(0, 0), eq);
        let machine = generic(&mut ctx, &graph, 1, &[written(req.clone(), 1)]);
        assert_eq!(machine.completion_result(), CompletionResult::Success);
        assert_eq!(machine.minimal_requirements(&ctx), vec![req]);
        assert!(machine.diagnostics(&ctx).is_empty());
        assert!(!machine.had_error());
    }

    #[test]
    fn test_written_duplicate_is_diagnosed() {
        let mut graph = ProtocolGraph::new();
        let eq = graph.add_protocol("Equatable");
        let mut ctx = RewriteContext::new(&graph);
        let req = Requirement::conformance(Type::param(0, 0), eq);
        let machine = generic(&mut ctx, &graph, 1, &[written(req.clone(), 1), written(req.clone(), 2)]);
        assert_eq!(machine.minimal_requirements(&ctx), vec![req]);
        let diags = machine.diagnostics(&ctx);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].loc, SourceLoc(2));
        assert_eq!(diags[0].kind, DiagnosticKind::RedundantRequirement);
    }

    #[test]
    fn test_member_type_resolves_through_name() {
        let mut graph = ProtocolGraph::new();
        let collection = graph.add_protocol("Collection");
        graph.add_associated_type(collection, "Element");
        graph.add_nominal(NominalDecl::new("Int", 0));
        let mut ctx = RewriteContext::new(&graph);
        let element = Type::member(Type::param(0, 0), "Element");
        let machine_reqs = [
            written(Requirement::conformance(Type::param(0, 0), collection), 1),
            written(Requirement::same_type(element.clone(), Type::nominal("Int", vec![])), 2),
        ];
        let mut machine = generic(&mut ctx, &graph, 1, &machine_reqs);
        assert!(!machine.had_error());
        assert_eq!(
            machine.concrete_type(&mut ctx, &element),
            Some(Type::nominal("Int", vec![]))
        );
        assert_eq!(machine.minimal_requirements(&ctx).len(), 2);
    }

    #[test]
    fn test_non_conforming_concrete_type_names_both_rules() {
        let mut graph = ProtocolGraph::new();
        let p = graph.add_protocol("P");
        graph.add_nominal(NominalDecl::new("Int", 0));
        let mut ctx = RewriteContext::new(&graph);
        let int = Type::nominal("Int", vec![]);
        let reqs = [
            written(Requirement::same_type(Type::param(0, 0), int.clone()), 1),
            written(Requirement::conformance(Type::param(0, 0), p), 2),
        ];
        let mut machine = generic(&mut ctx, &graph, 1, &reqs);
        assert!(machine.errors().contains(GenericSignatureErrors::HAS_CONFLICTS));
        let diags = machine.diagnostics(&ctx);
        let conflict = diags
            .iter()
            .find(|d| d.kind == DiagnosticKind::ConflictingRequirement)
            .expect("conflict is diagnosed");
        let (first, second) = conflict.payload.split_once(" conflicts with ").unwrap();
        assert_ne!(first, second);
        assert!(second.contains("Int"));
        assert_eq!(machine.concrete_type(&mut ctx, &Type::param(0, 0)), Some(int));
        assert!(!machine.requires_protocol(&mut ctx, &graph, &Type::param(0, 0), p));
    }

    #[test]
    fn test_invalid_requirement_sets_flag() {
        let mut graph = ProtocolGraph::new();
        let p = graph.add_protocol("P");
        graph.add_nominal(NominalDecl::new("Int", 0));
        let mut ctx = RewriteContext::new(&graph);
        let machine = generic(
            &mut ctx,
            &graph,
            1,
            &[written(Requirement::conformance(Type::nominal("Int", vec![]), p), 4)],
        );
        assert!(machine.errors().contains(GenericSignatureErrors::HAS_INVALID_REQUIREMENTS));
        let diags = machine.diagnostics(&ctx);
        assert_eq!(diags[0].kind, DiagnosticKind::InvalidRequirement);
        assert_eq!(diags[0].loc, SourceLoc(4));
    }

    #[test]
    fn test_protocol_component_signature() {
        let mut graph = ProtocolGraph::new();
        let seq = graph.add_protocol("Sequence");
        let it = graph.add_protocol("IteratorProtocol");
        graph.add_associated_type(seq, "Iterator");
        graph.add_requirement(
            seq,
            Requirement::conformance(Type::member_of(Type::param(0, 0), "Iterator", seq), it),
        );
        let mut ctx = RewriteContext::new(&graph);
        let mut machine = RequirementMachine::build(
            &mut ctx,
            &graph,
            MachineKind::RequirementSignatures(vec![seq]),
            &[],
            &[],
            &EngineOptions::default(),
        );
        machine.minimize(&mut ctx);
        let sigs = machine.requirement_signatures(&ctx, &graph);
        assert_eq!(sigs.len(), 1);
        assert_eq!(sigs[0].protocol, seq);
        assert_eq!(sigs[0].requirements.len(), 1);
        assert_eq!(machine.exported_rules(&ctx)[&seq].len(), 1);
    }

    #[test]
    fn test_type_aliases_pass_through() {
        let mut graph = ProtocolGraph::new();
        let p = graph.add_protocol("P");
        graph.add_nominal(NominalDecl::new("Int", 0));
        graph.add_type_alias(p, "Index", Type::nominal("Int", vec![]));
        let mut ctx = RewriteContext::new(&graph);
        let mut machine = RequirementMachine::build(
            &mut ctx,
            &graph,
            MachineKind::RequirementSignatures(vec![p]),
            &[],
            &[],
            &EngineOptions::default(),
        );
        machine.minimize(&mut ctx);
        let sigs = machine.requirement_signatures(&ctx, &graph);
        assert!(sigs[0].requirements.is_empty());
        assert_eq!(sigs[0].type_aliases.len(), 1);
        assert_eq!(sigs[0].type_aliases[0].name, "Index");
    }

    #[test]
    fn test_split_same_type_with_shared_concrete_type() {
        let mut graph = ProtocolGraph::new();
        graph.add_nominal(NominalDecl::new("Int", 0));
        let mut ctx = RewriteContext::new(&graph);
        let int = Type::nominal("Int", vec![]);
        let reqs = [
            written(Requirement::same_type(Type::param(0, 0), Type::param(0, 1)), 1),
            written(Requirement::same_type(Type::param(0, 1), int.clone()), 2),
        ];
        let mut machine = generic(&mut ctx, &graph, 2, &reqs);
        let minimal = machine.minimal_requirements(&ctx);
        let split = machine
            .split_concrete_equivalence_classes(&mut ctx, &minimal)
            .expect("τ_0_0 == τ_0_1 must split");
        assert!(split.contains(&Requirement::same_type(Type::param(0, 0), int.clone())));
        assert!(split.contains(&Requirement::same_type(Type::param(0, 1), int)));
    }

    #[test]
    fn test_type_witness_rewrites_member() {
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
        let array = Type::nominal("Array", vec![Type::param(0, 1)]);
        let reqs = [
            written(Requirement::conformance(Type::param(0, 0), seq), 1),
            written(Requirement::same_type(Type::param(0, 0), array), 2),
        ];
        let mut machine = generic(&mut ctx, &graph, 2, &reqs);
        assert!(!machine.had_error());
        assert!(machine.is_equivalent(
            &mut ctx,
            &Type::member_of(Type::param(0, 0), "Element", seq),
            &Type::param(0, 1)
        ));
        let minimal = machine.minimal_requirements(&ctx);
        assert!(minimal.contains(&Requirement::same_type(
            Type::param(0, 0),
            Type::nominal("Array", vec![Type::param(0, 1)])
        )));
        assert!(machine.requires_protocol(&mut ctx, &graph, &Type::param(0, 0), seq));
    }
}
