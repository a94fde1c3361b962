//! Declaration model consumed by the engine.
//!
//! The surrounding type checker hands the engine protocols (with their
//! inherited protocols, associated types, structural requirements and type
//! aliases) and nominal types (with generic arity, class-ness, superclass and
//! conformance tables). The graph answers the structural questions the
//! engine needs: inheritance closure, protocol order, strongly connected
//! components of mutually dependent protocols and conformance lookup.
//!
//! # Citations
//! - Tarjan, "Depth-first search and linear graph algorithms" (1972)

use crate::diagnostics::SourceLoc;
use crate::requirement::{Requirement, StructuralRequirement, Type};
use crate::symbol::ProtocolId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A type alias declared inside a protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeAlias {
    pub name: String,
    pub underlying: Type,
}

/// A protocol declaration.
#[derive(Debug, Clone, Default)]
pub struct ProtocolDecl {
    pub name: String,
    /// Directly inherited protocols.
    pub inherited: Vec<ProtocolId>,
    /// Associated types declared by this protocol itself.
    pub associated_types: Vec<String>,
    /// Requirements written on `Self` and its members.
    pub requirements: Vec<StructuralRequirement>,
    pub type_aliases: Vec<TypeAlias>,
}

/// Witness of an associated type in a conformance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WitnessDecl {
    /// A type written over the conforming type's generic arguments, where
    /// `Param(τ_0_k)` is the `k`-th argument.
    Type(Type),
    /// The conforming type itself.
    SelfType,
}

/// Conformance of a nominal type to one protocol.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConformanceDecl {
    pub witnesses: BTreeMap<String, WitnessDecl>,
}

impl ConformanceDecl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a witness, builder style.
    pub fn with_witness(mut self, name: &str, witness: WitnessDecl) -> Self {
        self.witnesses.insert(name.to_string(), witness);
        self
    }
}

/// A nominal (struct, enum or class) declaration.
#[derive(Debug, Clone, Default)]
pub struct NominalDecl {
    pub name: String,
    pub generic_params: u32,
    pub is_class: bool,
    /// Superclass written over this type's generic parameters.
    pub superclass: Option<Type>,
    pub conformances: BTreeMap<ProtocolId, ConformanceDecl>,
}

impl NominalDecl {
    pub fn new(name: &str, generic_params: u32) -> Self {
        Self {
            name: name.to_string(),
            generic_params,
            ..Self::default()
        }
    }

    pub fn class(name: &str, generic_params: u32, superclass: Option<Type>) -> Self {
        Self {
            name: name.to_string(),
            generic_params,
            is_class: true,
            superclass,
            ..Self::default()
        }
    }
}

/// Protocols and nominal types known to the engine.
#[derive(Debug, Clone, Default)]
pub struct ProtocolGraph {
    protocols: Vec<ProtocolDecl>,
    nominals: BTreeMap<String, NominalDecl>,
}

impl ProtocolGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a protocol and returns its identifier.
    pub fn add_protocol(&mut self, name: &str) -> ProtocolId {
        let id = ProtocolId(self.protocols.len() as u32);
        self.protocols.push(ProtocolDecl {
            name: name.to_string(),
            ..ProtocolDecl::default()
        });
        id
    }

    pub fn add_inherited(&mut self, proto: ProtocolId, inherited: ProtocolId) {
        let decl = self.protocol_mut(proto);
        if !decl.inherited.contains(&inherited) {
            decl.inherited.push(inherited);
        }
    }

    pub fn add_associated_type(&mut self, proto: ProtocolId, name: &str) {
        let decl = self.protocol_mut(proto);
        if !decl.associated_types.iter().any(|n| n == name) {
            decl.associated_types.push(name.to_string());
        }
    }

    /// Adds a requirement written inside the protocol body.
    pub fn add_requirement(&mut self, proto: ProtocolId, requirement: Requirement) {
        let loc = SourceLoc(self.protocol(proto).requirements.len() as u32);
        self.protocol_mut(proto)
            .requirements
            .push(StructuralRequirement::written(requirement, loc));
    }

    pub fn add_type_alias(&mut self, proto: ProtocolId, name: &str, underlying: Type) {
        self.protocol_mut(proto).type_aliases.push(TypeAlias {
            name: name.to_string(),
            underlying,
        });
    }

    pub fn add_nominal(&mut self, decl: NominalDecl) {
        self.nominals.insert(decl.name.clone(), decl);
    }

    /// Records that `nominal` conforms to `proto`.
    ///
    /// Unknown nominal names are ignored.
    pub fn add_conformance(&mut self, nominal: &str, proto: ProtocolId, conformance: ConformanceDecl) {
        if let Some(decl) = self.nominals.get_mut(nominal) {
            decl.conformances.insert(proto, conformance);
        }
    }

    pub fn protocol_count(&self) -> usize {
        self.protocols.len()
    }

    /// # Panics
    /// Panics if `proto` was not produced by this graph.
    pub fn protocol(&self, proto: ProtocolId) -> &ProtocolDecl {
        &self.protocols[proto.0 as usize]
    }

    fn protocol_mut(&mut self, proto: ProtocolId) -> &mut ProtocolDecl {
        &mut self.protocols[proto.0 as usize]
    }

    pub fn contains_protocol(&self, proto: ProtocolId) -> bool {
        (proto.0 as usize) < self.protocols.len()
    }

    pub fn protocol_ids(&self) -> impl Iterator<Item = ProtocolId> {
        (0..self.protocols.len() as u32).map(ProtocolId)
    }

    pub fn nominal(&self, name: &str) -> Option<&NominalDecl> {
        self.nominals.get(name)
    }

    /// Every protocol `proto` inherits from, directly or indirectly.
    pub fn inherited_closure(&self, proto: ProtocolId) -> BTreeSet<ProtocolId> {
        let mut seen = BTreeSet::new();
        let mut stack = self.protocol(proto).inherited.clone();
        while let Some(next) = stack.pop() {
            if next != proto && seen.insert(next) {
                stack.extend(self.protocol(next).inherited.iter().copied());
            }
        }
        seen
    }

    /// Returns `true` if `proto` is `ancestor` or inherits from it.
    pub fn inherits_from(&self, proto: ProtocolId, ancestor: ProtocolId) -> bool {
        proto == ancestor || self.inherited_closure(proto).contains(&ancestor)
    }

    /// Associated types of `proto` and its ancestors, own names first.
    pub fn visible_associated_types(&self, proto: ProtocolId) -> Vec<String> {
        let mut names = self.protocol(proto).associated_types.clone();
        for ancestor in self.inherited_closure(proto) {
            for name in &self.protocol(ancestor).associated_types {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }
        names
    }

    /// Protocols sorted into protocol order: more ancestors first, then by
    /// name, then by identifier.
    pub fn protocol_order(&self) -> Vec<ProtocolId> {
        let mut ids: Vec<ProtocolId> = self.protocol_ids().collect();
        let depth: Vec<usize> = ids.iter().map(|p| self.inherited_closure(*p).len()).collect();
        ids.sort_by(|a, b| {
            depth[b.0 as usize]
                .cmp(&depth[a.0 as usize])
                .then_with(|| self.protocol(*a).name.cmp(&self.protocol(*b).name))
                .then_with(|| a.cmp(b))
        });
        ids
    }

    /// Protocols whose requirement signatures `proto` depends on.
    pub fn dependencies(&self, proto: ProtocolId) -> BTreeSet<ProtocolId> {
        let decl = self.protocol(proto);
        let mut deps: BTreeSet<ProtocolId> = decl.inherited.iter().copied().collect();
        for req in &decl.requirements {
            req.requirement.collect_protocols(&mut deps);
        }
        for alias in &decl.type_aliases {
            alias.underlying.collect_protocols(&mut deps);
        }
        deps.remove(&proto);
        deps.retain(|p| self.contains_protocol(*p));
        deps
    }

    /// Transitive dependencies of a set of protocols, excluding the set itself.
    pub fn transitive_dependencies(&self, roots: &[ProtocolId]) -> BTreeSet<ProtocolId> {
        let mut seen: BTreeSet<ProtocolId> = BTreeSet::new();
        let mut stack: Vec<ProtocolId> = roots.to_vec();
        while let Some(next) = stack.pop() {
            for dep in self.dependencies(next) {
                if !roots.contains(&dep) && seen.insert(dep) {
                    stack.push(dep);
                }
            }
        }
        seen
    }

    /// Strongly connected components of the dependency graph, dependencies
    /// before dependents. Members of each component are sorted.
    pub fn strongly_connected_components(&self) -> Vec<Vec<ProtocolId>> {
        let mut tarjan = Tarjan::new(self.protocols.len());
        for proto in self.protocol_ids() {
            if tarjan.index[proto.0 as usize].is_none() {
                tarjan.visit(self, proto);
            }
        }
        tarjan.components
    }

    /// The component containing `proto`.
    pub fn component_of(&self, proto: ProtocolId) -> Vec<ProtocolId> {
        self.strongly_connected_components()
            .into_iter()
            .find(|c| c.contains(&proto))
            .unwrap_or_else(|| vec![proto])
    }

    /// Finds the conformance of `nominal` to `proto`, directly or through a
    /// protocol that inherits `proto`.
    pub fn lookup_conformance(&self, nominal: &str, proto: ProtocolId) -> Option<&ConformanceDecl> {
        let decl = self.nominals.get(nominal)?;
        if let Some(conf) = decl.conformances.get(&proto) {
            return Some(conf);
        }
        decl.conformances
            .iter()
            .find(|(p, _)| self.inherits_from(**p, proto))
            .map(|(_, c)| c)
    }

    /// Looks up the witness for `assoc` in the conformance of `nominal` to
    /// `proto`, falling back to conformances to ancestors of `proto`.
    pub fn type_witness(&self, nominal: &str, proto: ProtocolId, assoc: &str) -> Option<&WitnessDecl> {
        let decl = self.nominals.get(nominal)?;
        let mut candidates: Vec<ProtocolId> = vec![proto];
        candidates.extend(self.inherited_closure(proto));
        candidates.extend(
            decl.conformances
                .keys()
                .copied()
                .filter(|p| *p != proto && self.inherits_from(*p, proto)),
        );
        candidates
            .into_iter()
            .filter_map(|p| decl.conformances.get(&p))
            .find_map(|c| c.witnesses.get(assoc))
    }

    pub fn is_class(&self, nominal: &str) -> bool {
        self.nominals.get(nominal).map_or(false, |d| d.is_class)
    }

    pub fn superclass_of(&self, nominal: &str) -> Option<&Type> {
        self.nominals.get(nominal).and_then(|d| d.superclass.as_ref())
    }
}

struct Tarjan {
    next_index: usize,
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<ProtocolId>,
    components: Vec<Vec<ProtocolId>>,
}

impl Tarjan {
    fn new(n: usize) -> Self {
        Self {
            next_index: 0,
            index: vec![None; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            components: Vec::new(),
        }
    }

    fn visit(&mut self, graph: &ProtocolGraph, proto: ProtocolId) {
        let v = proto.0 as usize;
        self.index[v] = Some(self.next_index);
        self.lowlink[v] = self.next_index;
        self.next_index += 1;
        self.stack.push(proto);
        self.on_stack[v] = true;

        for dep in graph.dependencies(proto) {
            let w = dep.0 as usize;
            match self.index[w] {
                None => {
                    self.visit(graph, dep);
                    self.lowlink[v] = self.lowlink[v].min(self.lowlink[w]);
                }
                Some(idx) if self.on_stack[w] => {
                    self.lowlink[v] = self.lowlink[v].min(idx);
                }
                Some(_) => {}
            }
        }

        if Some(self.lowlink[v]) == self.index[v] {
            let mut component = Vec::new();
            while let Some(w) = self.stack.pop() {
                self.on_stack[w.0 as usize] = false;
                component.push(w);
                if w == proto {
                    break;
                }
            }
            component.sort();
            self.components.push(component);
        }
    }
}
