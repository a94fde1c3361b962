//! Minimization benchmarks.
//!
//! Each iteration runs the full generic signature pipeline, so the numbers
//! include completion; the inputs are chosen so that homotopy reduction
//! dominates.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use reqmachine::prelude::*;

/// `τ_i == τ_j` for every `i < j`: all but `n - 1` requirements are
/// redundant.
fn transitive_same_type(n: u32) -> Vec<Requirement> {
    let mut out = Vec::new();
    for i in 0..n {
        for j in i + 1..n {
            out.push(Requirement::same_type(Type::param(0, i), Type::param(0, j)));
        }
    }
    out
}

fn bench_transitive_same_type(c: &mut Criterion) {
    let mut group = c.benchmark_group("minimize_transitive_same_type");
    for n in [4u32, 8, 12] {
        let reqs = transitive_same_type(n);
        let params: Vec<GenericParamDecl> = (0..n).map(|i| GenericParamDecl::new(0, i)).collect();
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let mut engine = RequirementEngine::new(ProtocolGraph::new(), EngineOptions::default(), NullSink).unwrap();
                let sig = engine.generic_signature(GenericSignatureRequest::Abstract {
                    params: params.clone(),
                    requirements: black_box(reqs.clone()),
                });
                assert_eq!(sig.requirements.len(), (n - 1) as usize);
            });
        });
    }
    group.finish();
}

/// A parameter conforming to every protocol of an inheritance chain: only
/// the most refined conformance survives.
fn bench_redundant_conformances(c: &mut Criterion) {
    let mut group = c.benchmark_group("minimize_redundant_conformances");
    for n in [4usize, 16, 32] {
        let mut graph = ProtocolGraph::new();
        let mut protos = Vec::new();
        for i in 0..n {
            let p = graph.add_protocol(&format!("P{}", i));
            if let Some(&prev) = protos.last() {
                graph.add_inherited(p, prev);
            }
            protos.push(p);
        }
        let reqs: Vec<Requirement> = protos
            .iter()
            .map(|&p| Requirement::conformance(Type::param(0, 0), p))
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let mut engine = RequirementEngine::new(graph.clone(), EngineOptions::default(), NullSink).unwrap();
                let sig = engine.generic_signature(GenericSignatureRequest::Abstract {
                    params: vec![GenericParamDecl::new(0, 0)],
                    requirements: black_box(reqs.clone()),
                });
                assert_eq!(sig.requirements.len(), 1);
            });
        });
    }
    group.finish();
}

criterion_group!(
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = bench_transitive_same_type, bench_redundant_conformances
);
criterion_main!(benches);
