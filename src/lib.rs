//! Reqmachine: a rewrite engine for generic requirements.
//!
//! Generic requirements (conformance, same-type, superclass and layout
//! constraints on type parameters) are turned into a string rewriting
//! system over interned symbols. Knuth-Bendix completion makes the system
//! confluent, so two type parameters are equivalent exactly when they
//! reduce to the same term. Every rule the completion procedure adds is
//! justified by a rewrite path, and the resulting loops drive homotopy
//! reduction: a rule that appears exactly once in some loop can be
//! rewritten away, and what survives is the minimal generic signature.
//!
//! # Layers
//!
//! - [`context`], [`symbol`], [`term`]: interned symbols and terms, and the
//!   reduction order.
//! - [`rewrite_system`], [`completion`], [`property_map`]: the confluent
//!   rule set and the properties attached to each subject.
//! - [`path`], [`evaluator`], [`minimization`]: rewrite paths, loops and
//!   homotopy reduction.
//! - [`machine`], [`engine`]: requirement machines and request
//!   orchestration over protocol components.
//!
//! # References
//!
//! - Knuth, Bendix. "Simple word problems in universal algebras" (1970)
//! - Squier, C. "Word problems and a homological finiteness condition for monoids" (1987)
//! - Guiraud, Malbos. "Higher-dimensional normalisation strategies for acyclicity" (2012)
//!
//! # Example
//!
//! ```
//! use reqmachine::prelude::*;
//!
//! let mut graph = ProtocolGraph::new();
//! let equatable = graph.add_protocol("Equatable");
//! let mut engine = RequirementEngine::new(graph, EngineOptions::default(), NullSink).unwrap();
//! let sig = engine.generic_signature(GenericSignatureRequest::Abstract {
//!     params: vec![GenericParamDecl::new(0, 0)],
//!     requirements: vec![Requirement::conformance(Type::param(0, 0), equatable)],
//! });
//! assert_eq!(sig.requirements.len(), 1);
//! ```

pub mod arena;
pub mod completion;
pub mod config;
pub mod context;
pub mod debug;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod fingerprint;
pub mod machine;
pub mod minimization;
pub mod path;
pub mod property_map;
pub mod protocol_graph;
pub mod requirement;
pub mod rewrite_system;
pub mod rule;
pub mod signature;
pub mod symbol;
pub mod term;
pub mod trie;

pub use arena::{SymbolId, TermId};
pub use completion::CompletionResult;
pub use config::EngineOptions;
pub use context::RewriteContext;
pub use diagnostics::{CollectingSink, Diagnostic, DiagnosticKind, DiagnosticSink, NullSink, SourceLoc};
pub use engine::{GenericSignatureRequest, RequirementEngine};
pub use error::{ConfigError, InvariantViolation, RequirementError};
pub use machine::{MachineKind, RequirementMachine};
pub use requirement::{Requirement, StructuralRequirement, Type};
pub use rewrite_system::RewriteSystem;
pub use signature::{GenericParamDecl, GenericSignature, GenericSignatureErrors, RequirementSignature};
pub use symbol::{GenericParamKey, LayoutConstraint, ProtocolId};

/// Prelude for convenient usage.
pub mod prelude {
    pub use crate::completion::CompletionResult;
    pub use crate::config::EngineOptions;
    pub use crate::context::RewriteContext;
    pub use crate::debug::DebugOptions;
    pub use crate::diagnostics::{CollectingSink, Diagnostic, DiagnosticKind, DiagnosticSink, NullSink, SourceLoc};
    pub use crate::engine::{GenericSignatureRequest, RequirementEngine};
    pub use crate::fingerprint::HashValue;
    pub use crate::machine::{MachineKind, RequirementMachine};
    pub use crate::protocol_graph::{ConformanceDecl, NominalDecl, ProtocolGraph, WitnessDecl};
    pub use crate::requirement::{Requirement, StructuralRequirement, Type};
    pub use crate::signature::{GenericParamDecl, GenericSignature, GenericSignatureErrors, RequirementSignature};
    pub use crate::symbol::{GenericParamKey, LayoutConstraint, ProtocolId};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use crate::evaluator::RewritePathEvaluator;
    use crate::path::RewriteLoop;
    use proptest::prelude::*;

    fn params(n: u32) -> Vec<GenericParamDecl> {
        (0..n).map(|i| GenericParamDecl::new(0, i)).collect()
    }

    fn written(requirement: Requirement, loc: u32) -> StructuralRequirement {
        StructuralRequirement::written(requirement, SourceLoc(loc))
    }

    fn t(i: u32) -> Type {
        Type::param(0, i)
    }

    /// A single conformance is its own minimal signature.
    #[test]
    fn single_conformance() {
        let mut graph = ProtocolGraph::new();
        let equatable = graph.add_protocol("Equatable");
        let mut engine = RequirementEngine::new(graph, EngineOptions::default(), CollectingSink::new()).unwrap();
        let sig = engine.generic_signature(GenericSignatureRequest::Explicit {
            params: params(1),
            requirements: vec![written(Requirement::conformance(t(0), equatable), 1)],
        });
        assert_eq!(sig.requirements, vec![Requirement::conformance(t(0), equatable)]);
        assert!(!sig.has_errors());
        assert!(engine.sink().is_empty());
        assert_eq!(sig.to_string(), "<τ_0_0 where τ_0_0 : ProtocolId(0)>");

        // Completion only meets the trivial overlaps of the two initial rules.
        let mut ctx = RewriteContext::new(engine.graph());
        let machine = RequirementMachine::build(
            &mut ctx,
            engine.graph(),
            MachineKind::GenericSignature(params(1)),
            &[written(Requirement::conformance(t(0), equatable), 1)],
            &[],
            &EngineOptions::default(),
        );
        let stats = machine.system().stats();
        assert_eq!(machine.completion_result(), CompletionResult::Success);
        assert_eq!(machine.system().rule_count(), 2);
        assert_eq!(stats.rules_added, 2);
        assert!(stats.iterations <= 2);
        assert_eq!(stats.merged, 0);
    }

    /// `T: Collection, T.Element == Int` keeps both requirements and the
    /// member type resolves to `Int`.
    #[test]
    fn member_type_with_concrete_type() {
        let mut graph = ProtocolGraph::new();
        let collection = graph.add_protocol("Collection");
        graph.add_associated_type(collection, "Element");
        graph.add_nominal(NominalDecl::new("Int", 0));
        let mut engine = RequirementEngine::new(graph, EngineOptions::default(), CollectingSink::new()).unwrap();
        let int = Type::nominal("Int", vec![]);
        let sig = engine.generic_signature(GenericSignatureRequest::Explicit {
            params: params(1),
            requirements: vec![
                written(Requirement::conformance(t(0), collection), 1),
                written(Requirement::same_type(Type::member(t(0), "Element"), int.clone()), 2),
            ],
        });
        assert_eq!(
            sig.requirements,
            vec![
                Requirement::conformance(t(0), collection),
                Requirement::same_type(Type::member_of(t(0), "Element", collection), int.clone()),
            ]
        );
        assert!(engine.sink().of_kind(DiagnosticKind::RedundantRequirement).next().is_none());
        assert_eq!(engine.concrete_type(&sig, &Type::member(t(0), "Element")), Some(int));
    }

    /// `T == U, U == V, T: Hashable`: the chain keeps two same-type
    /// requirements, and every parameter conforms.
    #[test]
    fn transitive_same_type_chain() {
        let mut graph = ProtocolGraph::new();
        let hashable = graph.add_protocol("Hashable");
        let mut engine = RequirementEngine::new(graph, EngineOptions::default(), CollectingSink::new()).unwrap();
        let sig = engine.generic_signature(GenericSignatureRequest::Explicit {
            params: params(3),
            requirements: vec![
                written(Requirement::same_type(t(0), t(1)), 1),
                written(Requirement::same_type(t(1), t(2)), 2),
                written(Requirement::conformance(t(0), hashable), 3),
            ],
        });
        assert_eq!(
            sig.requirements,
            vec![
                Requirement::conformance(t(0), hashable),
                Requirement::same_type(t(0), t(1)),
                Requirement::same_type(t(0), t(2)),
            ]
        );
        let same_type = sig
            .requirements
            .iter()
            .filter(|r| matches!(r, Requirement::SameType { .. }))
            .count();
        assert_eq!(same_type, 2);
        assert!(engine.requires_protocol(&sig, &t(2), hashable));
        assert!(engine.is_equivalent(&sig, &t(1), &t(2)));
    }

    /// Two different concrete types for one parameter conflict.
    #[test]
    fn conflicting_concrete_types() {
        let mut graph = ProtocolGraph::new();
        graph.add_nominal(NominalDecl::new("Int", 0));
        graph.add_nominal(NominalDecl::new("String", 0));
        let mut engine = RequirementEngine::new(graph, EngineOptions::default(), CollectingSink::new()).unwrap();
        let sig = engine.generic_signature(GenericSignatureRequest::Explicit {
            params: params(1),
            requirements: vec![
                written(Requirement::same_type(t(0), Type::nominal("Int", vec![])), 1),
                written(Requirement::same_type(t(0), Type::nominal("String", vec![])), 2),
            ],
        });
        assert!(sig.requirements.is_empty());
        assert!(sig.has_errors());
        assert!(sig.errors.contains(GenericSignatureErrors::HAS_CONFLICTS));
        assert_eq!(engine.sink().of_kind(DiagnosticKind::ConflictingRequirement).count(), 1);
    }

    /// Protocols that require each other's associated types complete to
    /// a finite confluent system.
    #[test]
    fn circular_protocol_requirements_terminate() {
        let mut graph = ProtocolGraph::new();
        let p = graph.add_protocol("P");
        let p2 = graph.add_protocol("P2");
        graph.add_associated_type(p, "A");
        graph.add_associated_type(p2, "A");
        graph.add_requirement(p, Requirement::conformance(Type::member_of(t(0), "A", p), p2));
        graph.add_requirement(p2, Requirement::conformance(Type::member_of(t(0), "A", p2), p));
        let options = EngineOptions {
            max_iterations: 500,
            max_depth: 8,
            ..EngineOptions::default()
        };

        let mut ctx = RewriteContext::new(&graph);
        let machine = RequirementMachine::build(
            &mut ctx,
            &graph,
            MachineKind::RequirementSignatures(vec![p, p2]),
            &[],
            &[],
            &options,
        );
        assert_eq!(machine.completion_result(), CompletionResult::Success);
        assert!(machine.system().is_locally_confluent(&mut ctx));

        let mut engine = RequirementEngine::new(graph, options, CollectingSink::new()).unwrap();
        let sig = engine.requirement_signature(p);
        assert!(sig.errors.is_empty());
        assert_eq!(sig.requirements.len(), 1);
        let other = engine.requirement_signature(p2);
        assert_eq!(other.errors, sig.errors);
        assert!(engine.sink().is_empty());
    }

    /// Options round-trip through a file and configure a working engine.
    #[test]
    fn options_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("options.cbor");
        let options = EngineOptions {
            max_split_attempts: 2,
            debug: DebugOptions::parse("completion,timers").unwrap(),
            ..EngineOptions::default()
        };
        options.save(&path).unwrap();
        let loaded = EngineOptions::load(&path).unwrap();
        assert_eq!(loaded, options);
        let engine = RequirementEngine::new(ProtocolGraph::new(), loaded, NullSink).unwrap();
        assert_eq!(engine.options().max_split_attempts, 2);
    }

    // Random requirement sets over three parameters, two protocols and one
    // concrete type.
    fn requirement_strategy() -> impl Strategy<Value = Vec<(u8, u32, u32)>> {
        prop::collection::vec((0u8..3, 0u32..3, 0u32..3), 1..6)
    }

    fn test_graph() -> (ProtocolGraph, [ProtocolId; 2]) {
        let mut graph = ProtocolGraph::new();
        let p = graph.add_protocol("P");
        let q = graph.add_protocol("Q");
        graph.add_inherited(q, p);
        graph.add_nominal(NominalDecl::new("Int", 0));
        graph.add_conformance("Int", p, ConformanceDecl::new());
        (graph, [p, q])
    }

    fn to_requirements(raw: &[(u8, u32, u32)], protos: [ProtocolId; 2]) -> Vec<StructuralRequirement> {
        raw.iter()
            .enumerate()
            .filter_map(|(i, &(kind, a, b))| {
                let req = match kind {
                    0 => Requirement::conformance(t(a), protos[(b % 2) as usize]),
                    1 if a != b => Requirement::same_type(t(a), t(b)),
                    2 => Requirement::same_type(t(a), Type::nominal("Int", vec![])),
                    _ => return None,
                };
                Some(written(req, i as u32))
            })
            .collect()
    }

    fn machine_for(raw: &[(u8, u32, u32)]) -> (RequirementMachine, RewriteContext) {
        let (graph, protos) = test_graph();
        let mut ctx = RewriteContext::new(&graph);
        let mut machine = RequirementMachine::build(
            &mut ctx,
            &graph,
            MachineKind::GenericSignature(params(3)),
            &to_requirements(raw, protos),
            &[],
            &EngineOptions::default(),
        );
        machine.minimize(&mut ctx);
        (machine, ctx)
    }

    proptest! {
        #[test]
        fn simplify_is_idempotent(raw in requirement_strategy()) {
            let (mut machine, mut ctx) = machine_for(&raw);
            for i in 0..3 {
                let term = ctx.term_for_type(&t(i), None).unwrap();
                let once = machine.reduced_term(&mut ctx, term.symbols());
                let twice = machine.reduced_term(&mut ctx, once.symbols());
                prop_assert_eq!(once, twice);
            }
        }

        #[test]
        fn rules_stay_oriented(raw in requirement_strategy()) {
            let (machine, ctx) = machine_for(&raw);
            prop_assert!(machine.system().verify_orientation(&ctx).is_ok());
        }

        #[test]
        fn loops_replay_in_both_directions(raw in requirement_strategy()) {
            let (machine, mut ctx) = machine_for(&raw);
            for lp in machine.system().loops().iter().filter(|lp| !lp.is_deleted()) {
                prop_assert!(RewritePathEvaluator::verify_loop(lp, machine.system(), &mut ctx).is_ok());
                let reversed = RewriteLoop::new(lp.basepoint.clone(), lp.path().inverted());
                prop_assert!(RewritePathEvaluator::verify_loop(&reversed, machine.system(), &mut ctx).is_ok());
            }
        }

        #[test]
        fn locally_confluent_after_success(raw in requirement_strategy()) {
            let (machine, mut ctx) = machine_for(&raw);
            if machine.completion_result() == CompletionResult::Success {
                prop_assert!(machine.system().is_locally_confluent(&mut ctx));
            }
        }

        #[test]
        fn minimized_signature_answers_like_its_input(raw in requirement_strategy()) {
            let (graph, protos) = test_graph();
            let mut original = RequirementEngine::new(graph, EngineOptions::default(), NullSink).unwrap();
            let sig = original.generic_signature(GenericSignatureRequest::Explicit {
                params: params(3),
                requirements: to_requirements(&raw, protos),
            });
            prop_assume!(!sig.has_errors());

            let (graph, _) = test_graph();
            let mut rebuilt = RequirementEngine::new(graph, EngineOptions::default(), NullSink).unwrap();
            let sig2 = GenericSignature::new(sig.params.clone(), sig.requirements.clone());
            for i in 0..3 {
                for j in 0..3 {
                    prop_assert_eq!(
                        original.is_equivalent(&sig, &t(i), &t(j)),
                        rebuilt.is_equivalent(&sig2, &t(i), &t(j))
                    );
                }
                for proto in protos {
                    prop_assert_eq!(
                        original.requires_protocol(&sig, &t(i), proto),
                        rebuilt.requires_protocol(&sig2, &t(i), proto)
                    );
                }
                prop_assert_eq!(original.concrete_type(&sig, &t(i)), rebuilt.concrete_type(&sig2, &t(i)));
            }
        }

        #[test]
        fn pipeline_is_deterministic(raw in requirement_strategy()) {
            let run = || {
                let (graph, protos) = test_graph();
                let mut engine = RequirementEngine::new(graph, EngineOptions::default(), CollectingSink::new()).unwrap();
                let sig = engine.generic_signature(GenericSignatureRequest::Explicit {
                    params: params(3),
                    requirements: to_requirements(&raw, protos),
                });
                (sig, engine.into_sink().diagnostics)
            };
            let (first, first_diags) = run();
            let (second, second_diags) = run();
            prop_assert_eq!(first.fingerprint(), second.fingerprint());
            prop_assert_eq!(first, second);
            prop_assert_eq!(first_diags, second_diags);
        }
    }
}
