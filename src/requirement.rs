//! Types, requirements and their translation to and from rules.
//!
//! The type checker writes requirements over `Type` values. Before rule
//! building they are desugared: concrete-on-concrete requirements are
//! decomposed or rejected, conformances of concrete subjects are checked
//! against the conformance table, and pack/scalar mismatches are caught.
//! What survives becomes a pair of terms.

use crate::context::RewriteContext;
use crate::diagnostics::SourceLoc;
use crate::error::RequirementError;
use crate::protocol_graph::ProtocolGraph;
use crate::signature::GenericParamDecl;
use crate::symbol::{GenericParamKey, LayoutConstraint, ProtocolId, Symbol};
use crate::term::MutableTerm;
use crate::arena::SymbolId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A type as written by the type checker.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Type {
    /// A generic parameter.
    Param(GenericParamKey),
    /// A member type `base.name`, optionally resolved to the protocol
    /// declaring it.
    Member {
        base: Box<Type>,
        name: String,
        protocol: Option<ProtocolId>,
    },
    /// A nominal type applied to generic arguments.
    Nominal { name: String, args: Vec<Type> },
}

impl Type {
    pub fn param(depth: u32, index: u32) -> Self {
        Type::Param(GenericParamKey::new(depth, index))
    }

    /// Unresolved member `base.name`.
    pub fn member(base: Type, name: &str) -> Self {
        Type::Member {
            base: Box::new(base),
            name: name.to_string(),
            protocol: None,
        }
    }

    /// Member `base.name` resolved to the associated type of `protocol`.
    pub fn member_of(base: Type, name: &str, protocol: ProtocolId) -> Self {
        Type::Member {
            base: Box::new(base),
            name: name.to_string(),
            protocol: Some(protocol),
        }
    }

    pub fn nominal(name: &str, args: Vec<Type>) -> Self {
        Type::Nominal {
            name: name.to_string(),
            args,
        }
    }

    /// Returns `true` for generic parameters and their member types.
    pub fn is_type_parameter(&self) -> bool {
        match self {
            Type::Param(_) => true,
            Type::Member { base, .. } => base.is_type_parameter(),
            Type::Nominal { .. } => false,
        }
    }

    /// The generic parameter a type parameter is rooted in.
    pub fn root_param(&self) -> Option<GenericParamKey> {
        match self {
            Type::Param(key) => Some(*key),
            Type::Member { base, .. } => base.root_param(),
            Type::Nominal { .. } => None,
        }
    }

    /// Nesting depth of nominal applications.
    pub fn nesting_depth(&self) -> usize {
        match self {
            Type::Nominal { args, .. } => 1 + args.iter().map(Type::nesting_depth).max().unwrap_or(0),
            _ => 0,
        }
    }

    /// Collects protocols named by member annotations.
    pub fn collect_protocols(&self, out: &mut BTreeSet<ProtocolId>) {
        match self {
            Type::Param(_) => {}
            Type::Member { base, protocol, .. } => {
                base.collect_protocols(out);
                if let Some(p) = protocol {
                    out.insert(*p);
                }
            }
            Type::Nominal { args, .. } => {
                for arg in args {
                    arg.collect_protocols(out);
                }
            }
        }
    }

    /// Replaces generic parameters for which `f` returns a type.
    pub fn substitute_params(&self, f: &dyn Fn(GenericParamKey) -> Option<Type>) -> Type {
        match self {
            Type::Param(key) => f(*key).unwrap_or_else(|| self.clone()),
            Type::Member {
                base,
                name,
                protocol,
            } => Type::Member {
                base: Box::new(base.substitute_params(f)),
                name: name.clone(),
                protocol: *protocol,
            },
            Type::Nominal { name, args } => Type::Nominal {
                name: name.clone(),
                args: args.iter().map(|a| a.substitute_params(f)).collect(),
            },
        }
    }

    /// Drops protocol annotations from member types.
    pub fn erase_protocols(&self) -> Type {
        match self {
            Type::Param(_) => self.clone(),
            Type::Member { base, name, .. } => Type::Member {
                base: Box::new(base.erase_protocols()),
                name: name.clone(),
                protocol: None,
            },
            Type::Nominal { name, args } => Type::Nominal {
                name: name.clone(),
                args: args.iter().map(Type::erase_protocols).collect(),
            },
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Param(key) => write!(f, "{}", key),
            Type::Member { base, name, .. } => write!(f, "{}.{}", base, name),
            Type::Nominal { name, args } => {
                write!(f, "{}", name)?;
                if !args.is_empty() {
                    write!(f, "<")?;
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", arg)?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
        }
    }
}

/// Requirement kinds, declared in canonical output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RequirementKind {
    Superclass,
    Layout,
    Conformance,
    SameType,
}

/// A generic requirement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Requirement {
    /// `subject: protocol`
    Conformance { subject: Type, protocol: ProtocolId },
    /// `first == second`; `second` may be concrete.
    SameType { first: Type, second: Type },
    /// `subject: superclass`
    Superclass { subject: Type, superclass: Type },
    /// `subject: layout`
    Layout {
        subject: Type,
        layout: LayoutConstraint,
    },
}

impl Requirement {
    pub fn conformance(subject: Type, protocol: ProtocolId) -> Self {
        Requirement::Conformance { subject, protocol }
    }

    pub fn same_type(first: Type, second: Type) -> Self {
        Requirement::SameType { first, second }
    }

    pub fn superclass(subject: Type, superclass: Type) -> Self {
        Requirement::Superclass {
            subject,
            superclass,
        }
    }

    pub fn layout(subject: Type, layout: LayoutConstraint) -> Self {
        Requirement::Layout { subject, layout }
    }

    pub fn kind(&self) -> RequirementKind {
        match self {
            Requirement::Conformance { .. } => RequirementKind::Conformance,
            Requirement::SameType { .. } => RequirementKind::SameType,
            Requirement::Superclass { .. } => RequirementKind::Superclass,
            Requirement::Layout { .. } => RequirementKind::Layout,
        }
    }

    pub fn subject(&self) -> &Type {
        match self {
            Requirement::Conformance { subject, .. }
            | Requirement::Superclass { subject, .. }
            | Requirement::Layout { subject, .. } => subject,
            Requirement::SameType { first, .. } => first,
        }
    }

    pub fn collect_protocols(&self, out: &mut BTreeSet<ProtocolId>) {
        match self {
            Requirement::Conformance { subject, protocol } => {
                subject.collect_protocols(out);
                out.insert(*protocol);
            }
            Requirement::SameType { first, second } => {
                first.collect_protocols(out);
                second.collect_protocols(out);
            }
            Requirement::Superclass {
                subject,
                superclass,
            } => {
                subject.collect_protocols(out);
                superclass.collect_protocols(out);
            }
            Requirement::Layout { subject, .. } => subject.collect_protocols(out),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Conformance { subject, protocol } => write!(f, "{} : {}", subject, protocol),
            Requirement::SameType { first, second } => write!(f, "{} == {}", first, second),
            Requirement::Superclass {
                subject,
                superclass,
            } => write!(f, "{} : {}", subject, superclass),
            Requirement::Layout { subject, layout } => write!(f, "{} : {}", subject, layout),
        }
    }
}

/// A requirement together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralRequirement {
    pub requirement: Requirement,
    pub loc: SourceLoc,
    /// Inferred requirements never produce redundancy diagnostics.
    pub inferred: bool,
}

impl StructuralRequirement {
    pub fn written(requirement: Requirement, loc: SourceLoc) -> Self {
        Self {
            requirement,
            loc,
            inferred: false,
        }
    }

    pub fn inferred(requirement: Requirement, loc: SourceLoc) -> Self {
        Self {
            requirement,
            loc,
            inferred: true,
        }
    }
}

/// Result of desugaring a requirement list.
#[derive(Debug, Clone, Default)]
pub struct Desugared {
    /// Requirements ready for rule building.
    pub requirements: Vec<StructuralRequirement>,
    /// Invalid requirements with the reason.
    pub errors: Vec<(SourceLoc, RequirementError)>,
    /// Written requirements that hold trivially.
    pub redundant: Vec<StructuralRequirement>,
}

impl Desugared {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Desugars `input` against the declarations in `graph`.
///
/// `params` is consulted for pack checks; an empty slice skips them.
pub fn desugar(graph: &ProtocolGraph, params: &[GenericParamDecl], input: &[StructuralRequirement]) -> Desugared {
    let mut out = Desugared::default();
    for req in input {
        desugar_one(graph, params, req, &req.requirement, &mut out);
    }
    out
}

fn is_pack(params: &[GenericParamDecl], ty: &Type) -> Option<bool> {
    let root = ty.root_param()?;
    params.iter().find(|p| p.key == root).map(|p| p.is_pack)
}

fn push_derived(out: &mut Desugared, origin: &StructuralRequirement, requirement: Requirement) {
    out.requirements.push(StructuralRequirement {
        requirement,
        loc: origin.loc,
        inferred: origin.inferred,
    });
}

fn desugar_one(
    graph: &ProtocolGraph,
    params: &[GenericParamDecl],
    origin: &StructuralRequirement,
    requirement: &Requirement,
    out: &mut Desugared,
) {
    match requirement {
        Requirement::Conformance { subject, protocol } => {
            if !graph.contains_protocol(*protocol) {
                out.errors.push((origin.loc, RequirementError::UnknownProtocol(*protocol)));
                return;
            }
            match subject {
                Type::Nominal { name, .. } => {
                    if concrete_conforms(graph, name, *protocol) {
                        out.redundant.push(origin.clone());
                    } else {
                        out.errors.push((
                            origin.loc,
                            RequirementError::NonConformingConcreteType {
                                ty: subject.clone(),
                                protocol: graph.protocol(*protocol).name.clone(),
                            },
                        ));
                    }
                }
                _ => push_derived(out, origin, requirement.clone()),
            }
        }
        Requirement::SameType { first, second } => {
            if first == second {
                out.redundant.push(origin.clone());
                return;
            }
            match (first.is_type_parameter(), second.is_type_parameter()) {
                (true, true) => {
                    if let (Some(a), Some(b)) = (is_pack(params, first), is_pack(params, second)) {
                        if a != b {
                            out.errors.push((
                                origin.loc,
                                RequirementError::PackMismatch {
                                    lhs: first.clone(),
                                    rhs: second.clone(),
                                },
                            ));
                            return;
                        }
                    }
                    push_derived(out, origin, requirement.clone());
                }
                (true, false) => push_derived(out, origin, requirement.clone()),
                (false, true) => push_derived(out, origin, Requirement::same_type(second.clone(), first.clone())),
                (false, false) => match (first, second) {
                    (
                        Type::Nominal { name: n1, args: a1 },
                        Type::Nominal { name: n2, args: a2 },
                    ) if n1 == n2 && a1.len() == a2.len() => {
                        for (x, y) in a1.iter().zip(a2.iter()) {
                            if x != y {
                                desugar_one(graph, params, origin, &Requirement::same_type(x.clone(), y.clone()), out);
                            }
                        }
                    }
                    _ => out.errors.push((
                        origin.loc,
                        RequirementError::ConcreteMismatch {
                            lhs: first.clone(),
                            rhs: second.clone(),
                        },
                    )),
                },
            }
        }
        Requirement::Superclass {
            subject,
            superclass,
        } => {
            let class_name = match superclass {
                Type::Nominal { name, .. } if graph.is_class(name) => name,
                _ => {
                    out.errors.push((origin.loc, RequirementError::NotAClass(superclass.clone())));
                    return;
                }
            };
            match subject {
                Type::Nominal { name, .. } => {
                    if inherits_class(graph, name, class_name) {
                        out.redundant.push(origin.clone());
                    } else {
                        out.errors.push((
                            origin.loc,
                            RequirementError::ConcreteMismatch {
                                lhs: subject.clone(),
                                rhs: superclass.clone(),
                            },
                        ));
                    }
                }
                _ => push_derived(out, origin, requirement.clone()),
            }
        }
        Requirement::Layout { subject, layout } => match subject {
            Type::Nominal { name, .. } => {
                if !layout.is_class() || graph.is_class(name) {
                    out.redundant.push(origin.clone());
                } else {
                    out.errors.push((
                        origin.loc,
                        RequirementError::LayoutMismatch {
                            ty: subject.clone(),
                            layout: *layout,
                        },
                    ));
                }
            }
            _ => push_derived(out, origin, requirement.clone()),
        },
    }
}

/// Returns `true` if `nominal` or one of its superclasses conforms to `proto`.
pub fn concrete_conforms(graph: &ProtocolGraph, nominal: &str, proto: ProtocolId) -> bool {
    let mut current = Some(nominal.to_string());
    let mut guard = 0;
    while let Some(name) = current {
        if graph.lookup_conformance(&name, proto).is_some() {
            return true;
        }
        current = match graph.superclass_of(&name) {
            Some(Type::Nominal { name, .. }) => Some(name.clone()),
            _ => None,
        };
        guard += 1;
        if guard > 64 {
            break;
        }
    }
    false
}

/// Returns `true` if class `nominal` is `ancestor` or a subclass of it.
pub fn inherits_class(graph: &ProtocolGraph, nominal: &str, ancestor: &str) -> bool {
    let mut current = Some(nominal.to_string());
    let mut guard = 0;
    while let Some(name) = current {
        if name == ancestor {
            return true;
        }
        current = match graph.superclass_of(&name) {
            Some(Type::Nominal { name, .. }) => Some(name.clone()),
            _ => None,
        };
        guard += 1;
        if guard > 64 {
            break;
        }
    }
    false
}

/// Builds the rule sides for a desugared requirement.
///
/// The returned pair is unoriented; `RewriteSystem::add_rule` orients it.
pub fn rule_for_requirement(
    ctx: &mut RewriteContext,
    requirement: &Requirement,
    domain: Option<ProtocolId>,
) -> Result<(MutableTerm, MutableTerm), RequirementError> {
    match requirement {
        Requirement::Conformance { subject, protocol } => {
            let rhs = ctx.term_for_type(subject, domain)?;
            let mut lhs = rhs.clone();
            lhs.push(ctx.protocol_symbol(*protocol));
            Ok((lhs, rhs))
        }
        Requirement::SameType { first, second } => {
            let subject = ctx.term_for_type(first, domain)?;
            if second.is_type_parameter() {
                let other = ctx.term_for_type(second, domain)?;
                return Ok((subject, other));
            }
            let concrete = ctx.symbol_for_concrete_type(second, domain)?;
            let mut lhs = subject.clone();
            lhs.push(concrete);
            Ok((lhs, subject))
        }
        Requirement::Superclass {
            subject,
            superclass,
        } => {
            let rhs = ctx.term_for_type(subject, domain)?;
            let sym = ctx.symbol_for_superclass(superclass, domain)?;
            let mut lhs = rhs.clone();
            lhs.push(sym);
            Ok((lhs, rhs))
        }
        Requirement::Layout { subject, layout } => {
            let rhs = ctx.term_for_type(subject, domain)?;
            let mut lhs = rhs.clone();
            lhs.push(ctx.layout_symbol(*layout));
            Ok((lhs, rhs))
        }
    }
}

/// Reconstructs the requirement a rule `lhs => rhs` states.
///
/// Returns `None` for concrete-conformance rules, which have no spelling.
pub fn requirement_for_rule(ctx: &RewriteContext, lhs: &[SymbolId], rhs: &[SymbolId]) -> Option<Requirement> {
    if lhs.len() == rhs.len() + 1 && lhs.starts_with(rhs) {
        let subject = ctx.type_for_term(rhs);
        let last = *lhs.last()?;
        match ctx.symbol(last) {
            Symbol::Protocol(p) => return Some(Requirement::conformance(subject, *p)),
            Symbol::Layout(l) => return Some(Requirement::layout(subject, *l)),
            Symbol::Superclass { .. } => {
                return Some(Requirement::superclass(subject, ctx.type_for_symbol(last)?))
            }
            Symbol::ConcreteType { .. } => {
                return Some(Requirement::same_type(subject, ctx.type_for_symbol(last)?))
            }
            Symbol::ConcreteConformance { .. } => return None,
            _ => {}
        }
    }
    Some(Requirement::same_type(ctx.type_for_term(rhs), ctx.type_for_term(lhs)))
}
