// Benchmarks for rebuilding and pumping layered graphs.
//
// Each layer reads every name of the layer below, so a change at the bottom
// dirties the whole graph.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use sluice_core::graph::{CallGraph, Func, RegisterOptions};

const WIDTH: usize = 4;

fn name(layer: usize, column: usize) -> String {
    format!("n{layer}_{column}")
}

fn layered(depth: usize) -> CallGraph<i64> {
    let mut graph = CallGraph::new();
    for column in 0..WIDTH {
        let params = [format!("x{column}")];
        graph
            .register(
                Func::new(name(0, column), params, |a| Ok(a.iter().map(|(_, v)| *v).sum())),
                RegisterOptions::new(),
            )
            .expect("register");
    }
    for layer in 1..depth {
        for column in 0..WIDTH {
            let params: Vec<String> = (0..WIDTH).map(|below| name(layer - 1, below)).collect();
            graph
                .register(
                    Func::new(name(layer, column), params, |a| {
                        Ok(a.iter().map(|(_, v)| *v).sum::<i64>() % 1_000_003)
                    }),
                    RegisterOptions::new(),
                )
                .expect("register");
        }
    }
    graph.rebuild(true).expect("rebuild");
    graph
}

fn inject_inputs(graph: &mut CallGraph<i64>, value: i64) {
    graph.inject((0..WIDTH).map(|column| (format!("x{column}"), value)));
}

fn bench_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("rebuild");
    for depth in [4, 16, 64] {
        let mut graph = layered(depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| graph.rebuild(black_box(true)).expect("rebuild"))
        });
    }
    group.finish();
}

fn bench_pump(c: &mut Criterion) {
    let mut group = c.benchmark_group("pump");
    for depth in [4, 16, 64] {
        group.bench_with_input(BenchmarkId::new("full", depth), &depth, |b, &depth| {
            b.iter_batched(
                || {
                    let mut graph = layered(depth);
                    inject_inputs(&mut graph, 1);
                    graph
                },
                |mut graph| black_box(graph.pump_all().expect("pump")),
                BatchSize::SmallInput,
            )
        });

        let mut graph = layered(depth);
        inject_inputs(&mut graph, 1);
        graph.pump_all().expect("pump");
        group.bench_with_input(BenchmarkId::new("quiescent", depth), &depth, |b, _| {
            b.iter(|| black_box(graph.pump_all().expect("pump")))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_rebuild, bench_pump);
criterion_main!(benches);
