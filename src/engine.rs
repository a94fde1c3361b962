//! Request orchestration.
//!
//! The engine owns the declaration graph and the interning context. It
//! builds one machine per strongly connected component of protocols, in
//! dependency order, and one machine per generic signature request. Built
//! generic signature machines are cached by signature fingerprint and
//! answer later queries.

use crate::arena::TermId;
use crate::config::EngineOptions;
use crate::context::RewriteContext;
use crate::diagnostics::{DiagnosticSink, SourceLoc};
use crate::error::{fatal, ConfigError, InvariantViolation};
use crate::fingerprint::HashValue;
use crate::machine::{MachineKind, RequirementMachine};
use crate::protocol_graph::ProtocolGraph;
use crate::requirement::{Requirement, StructuralRequirement, Type};
use crate::signature::{GenericParamDecl, GenericSignature, GenericSignatureErrors, RequirementSignature};
use crate::symbol::{LayoutConstraint, ProtocolId};
use std::collections::{BTreeMap, BTreeSet};

/// Input of a generic signature computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenericSignatureRequest {
    /// Requirements built by the compiler itself. Nothing is diagnosed.
    Abstract {
        params: Vec<GenericParamDecl>,
        requirements: Vec<Requirement>,
    },
    /// Requirements written on a declaration.
    Explicit {
        params: Vec<GenericParamDecl>,
        requirements: Vec<StructuralRequirement>,
    },
    /// A nested declaration: the parent's parameters and requirements come
    /// first and are never diagnosed.
    Inferred {
        parent: Option<GenericSignature>,
        params: Vec<GenericParamDecl>,
        requirements: Vec<StructuralRequirement>,
    },
}

impl GenericSignatureRequest {
    /// Parameters, structural input and the requirements to fall back on
    /// when completion fails.
    fn into_parts(self) -> (Vec<GenericParamDecl>, Vec<StructuralRequirement>, Vec<Requirement>) {
        match self {
            GenericSignatureRequest::Abstract { params, requirements } => {
                let input = requirements
                    .iter()
                    .cloned()
                    .map(|r| StructuralRequirement::inferred(r, SourceLoc::default()))
                    .collect();
                (params, input, Vec::new())
            }
            GenericSignatureRequest::Explicit { params, requirements } => (params, requirements, Vec::new()),
            GenericSignatureRequest::Inferred {
                parent,
                params,
                requirements,
            } => {
                let (mut all_params, inherited) = match parent {
                    Some(parent) => (parent.params, parent.requirements),
                    None => (Vec::new(), Vec::new()),
                };
                all_params.extend(params);
                let mut input: Vec<StructuralRequirement> = inherited
                    .iter()
                    .cloned()
                    .map(|r| StructuralRequirement::inferred(r, SourceLoc::default()))
                    .collect();
                input.extend(requirements);
                (all_params, input, inherited)
            }
        }
    }
}

pub struct RequirementEngine<S: DiagnosticSink> {
    graph: ProtocolGraph,
    ctx: RewriteContext,
    options: EngineOptions,
    sink: S,
    requirement_signatures: BTreeMap<ProtocolId, RequirementSignature>,
    /// Rules each finished protocol contributes to machines that use it.
    exported: BTreeMap<ProtocolId, Vec<(TermId, TermId)>>,
    machines: BTreeMap<HashValue, RequirementMachine>,
}

impl<S: DiagnosticSink> RequirementEngine<S> {
    pub fn new(graph: ProtocolGraph, options: EngineOptions, sink: S) -> Result<Self, ConfigError> {
        options.validate()?;
        let ctx = RewriteContext::new(&graph);
        Ok(Self {
            graph,
            ctx,
            options,
            sink,
            requirement_signatures: BTreeMap::new(),
            exported: BTreeMap::new(),
            machines: BTreeMap::new(),
        })
    }

    pub fn graph(&self) -> &ProtocolGraph {
        &self.graph
    }

    pub fn context(&self) -> &RewriteContext {
        &self.ctx
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Number of cached generic signature machines.
    pub fn cached_machines(&self) -> usize {
        self.machines.len()
    }

    // ---------------------------------------------------------------------
    // Protocols
    // ---------------------------------------------------------------------

    /// The minimized requirement signature of `proto`. Computes the
    /// protocol's whole component, and everything it depends on, on first
    /// use.
    pub fn requirement_signature(&mut self, proto: ProtocolId) -> RequirementSignature {
        if !self.graph.contains_protocol(proto) {
            tracing::warn!(%proto, "requirement signature of an unknown protocol");
            let mut sig = RequirementSignature::empty(proto);
            sig.errors.insert(GenericSignatureErrors::HAS_INVALID_REQUIREMENTS);
            return sig;
        }
        self.ensure_component(proto);
        self.requirement_signatures
            .get(&proto)
            .cloned()
            .unwrap_or_else(|| RequirementSignature::empty(proto))
    }

    fn ensure_component(&mut self, proto: ProtocolId) {
        if self.requirement_signatures.contains_key(&proto) {
            return;
        }
        let component = self.graph.component_of(proto);
        let members: BTreeSet<ProtocolId> = component.iter().copied().collect();
        let deps: BTreeSet<ProtocolId> = members
            .iter()
            .flat_map(|&p| self.graph.dependencies(p))
            .filter(|p| !members.contains(p))
            .collect();
        for dep in deps {
            self.ensure_component(dep);
        }

        let _timer = self.options.debug.timer("request");
        let imported = self.imported_rules(self.graph.transitive_dependencies(&component));
        let mut machine = RequirementMachine::build(
            &mut self.ctx,
            &self.graph,
            MachineKind::RequirementSignatures(component.clone()),
            &[],
            &imported,
            &self.options,
        );
        machine.minimize(&mut self.ctx);
        for diagnostic in machine.diagnostics(&self.ctx) {
            self.sink.emit(diagnostic);
        }
        if machine.had_error() {
            tracing::warn!(
                protocols = ?component,
                errors = %machine.errors(),
                "requirement signature computed with errors"
            );
        }
        for sig in machine.requirement_signatures(&self.ctx, &self.graph) {
            tracing::debug!(
                protocol = self.ctx.protocol_name(sig.protocol),
                requirements = sig.requirements.len(),
                fingerprint = %sig.fingerprint(),
                "requirement signature built"
            );
            self.requirement_signatures.insert(sig.protocol, sig);
        }
        self.exported.extend(machine.exported_rules(&self.ctx));
        for p in component {
            self.requirement_signatures
                .entry(p)
                .or_insert_with(|| RequirementSignature::empty(p));
            self.exported.entry(p).or_default();
        }
    }

    fn imported_rules(&self, protocols: BTreeSet<ProtocolId>) -> Vec<(TermId, TermId)> {
        protocols
            .iter()
            .filter_map(|p| self.exported.get(p))
            .flatten()
            .copied()
            .collect()
    }

    /// Computes every protocol mentioned by `requirements` and returns the
    /// rules a machine over them imports.
    fn prepare_protocols(&mut self, requirements: &[StructuralRequirement]) -> Vec<(TermId, TermId)> {
        let mut mentioned = BTreeSet::new();
        for req in requirements {
            req.requirement.collect_protocols(&mut mentioned);
        }
        mentioned.retain(|&p| self.graph.contains_protocol(p));
        for &p in &mentioned {
            self.ensure_component(p);
        }
        let roots: Vec<ProtocolId> = mentioned.iter().copied().collect();
        let mut all = self.graph.transitive_dependencies(&roots);
        all.extend(roots);
        self.imported_rules(all)
    }

    // ---------------------------------------------------------------------
    // Generic signatures
    // ---------------------------------------------------------------------

    /// Computes a minimized generic signature.
    ///
    /// When two type parameters of the result are made equal and also fixed
    /// to one concrete type, the machine is rebuilt from the split
    /// requirements. More than `max_split_attempts` rebuilds is fatal.
    /// Diagnostics are emitted for the first build only.
    pub fn generic_signature(&mut self, request: GenericSignatureRequest) -> GenericSignature {
        let _timer = self.options.debug.timer("request");
        let (params, mut input, fallback) = request.into_parts();
        let mut attempt = 0;
        loop {
            let imported = self.prepare_protocols(&input);
            let mut machine = RequirementMachine::build(
                &mut self.ctx,
                &self.graph,
                MachineKind::GenericSignature(params.clone()),
                &input,
                &imported,
                &self.options,
            );
            machine.minimize(&mut self.ctx);
            if attempt == 0 {
                for diagnostic in machine.diagnostics(&self.ctx) {
                    self.sink.emit(diagnostic);
                }
            }

            if !machine.completion_result().is_success() {
                tracing::warn!(
                    result = %machine.completion_result(),
                    "generic signature falls back to its parent requirements"
                );
                let mut sig = GenericSignature::new(params, fallback);
                sig.errors = machine.errors();
                return sig;
            }

            let minimal = machine.minimal_requirements(&self.ctx);
            if let Some(split) = machine.split_concrete_equivalence_classes(&mut self.ctx, &minimal) {
                attempt += 1;
                if attempt > self.options.max_split_attempts {
                    fatal(
                        InvariantViolation::SplitRetryLimitExceeded { attempts: attempt },
                        &machine.dump(&self.ctx),
                    );
                }
                tracing::debug!(attempt, "splitting concrete equivalence classes");
                input = split
                    .into_iter()
                    .map(|r| StructuralRequirement::inferred(r, SourceLoc::default()))
                    .collect();
                continue;
            }

            let mut sig = GenericSignature::new(params, minimal);
            sig.errors = machine.errors();
            if !machine.had_error() {
                self.machines.insert(sig.fingerprint(), machine);
            }
            return sig;
        }
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    fn with_machine<R>(
        &mut self,
        sig: &GenericSignature,
        f: impl FnOnce(&mut RequirementMachine, &mut RewriteContext, &ProtocolGraph) -> R,
    ) -> R {
        let key = sig.fingerprint();
        if let Some(machine) = self.machines.get_mut(&key) {
            return f(machine, &mut self.ctx, &self.graph);
        }
        let input: Vec<StructuralRequirement> = sig
            .requirements
            .iter()
            .cloned()
            .map(|r| StructuralRequirement::inferred(r, SourceLoc::default()))
            .collect();
        let imported = self.prepare_protocols(&input);
        let mut machine = RequirementMachine::build(
            &mut self.ctx,
            &self.graph,
            MachineKind::Query(sig.params.clone()),
            &input,
            &imported,
            &self.options,
        );
        let result = f(&mut machine, &mut self.ctx, &self.graph);
        if !machine.had_error() {
            self.machines.insert(key, machine);
        }
        result
    }

    pub fn is_equivalent(&mut self, sig: &GenericSignature, a: &Type, b: &Type) -> bool {
        self.with_machine(sig, |machine, ctx, _| machine.is_equivalent(ctx, a, b))
    }

    pub fn requires_protocol(&mut self, sig: &GenericSignature, ty: &Type, proto: ProtocolId) -> bool {
        self.with_machine(sig, |machine, ctx, graph| machine.requires_protocol(ctx, graph, ty, proto))
    }

    pub fn concrete_type(&mut self, sig: &GenericSignature, ty: &Type) -> Option<Type> {
        self.with_machine(sig, |machine, ctx, _| machine.concrete_type(ctx, ty))
    }

    pub fn superclass(&mut self, sig: &GenericSignature, ty: &Type) -> Option<Type> {
        self.with_machine(sig, |machine, ctx, _| machine.superclass(ctx, ty))
    }

    pub fn layout(&mut self, sig: &GenericSignature, ty: &Type) -> Option<LayoutConstraint> {
        self.with_machine(sig, |machine, ctx, _| machine.layout(ctx, ty))
    }

    pub fn reduced_type(&mut self, sig: &GenericSignature, ty: &Type) -> Option<Type> {
        self.with_machine(sig, |machine, ctx, _| machine.reduced_type(ctx, ty))
    }
}
