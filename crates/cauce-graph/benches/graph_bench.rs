//! Criterion benchmarks for the routing-graph scheduler.
//!
//! Measures scheduling overhead independently of DSP cost using a trivial
//! no-op processor. Two topology shapes:
//!
//! - **chain** — worst-case serialization (no parallelism to exploit)
//! - **fan** — fully independent nodes (best-case parallelism)
//!
//! Run with: `cargo bench -p cauce-graph -- cycle/`
#![allow(missing_docs)]

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use cauce_graph::{
    CycleContext, GraphEdges, GraphNode, GraphScheduler, ProcessOutcome, RouteProcessor,
    SchedulerConfig,
};

const NODE_COUNTS: &[usize] = &[8, 32, 128];

/// Trivial processor — isolates scheduler overhead from DSP cost.
struct Noop;

impl RouteProcessor for Noop {
    fn process(&self, _cycle: &CycleContext) -> ProcessOutcome {
        ProcessOutcome::default()
    }
    fn name(&self) -> &str {
        "noop"
    }
}

fn scheduler() -> GraphScheduler {
    GraphScheduler::new(&SchedulerConfig {
        threads: None,
        queue_capacity: 1024,
    })
    .expect("scheduler construction")
}

fn make_nodes(n: usize) -> Vec<Arc<GraphNode>> {
    (0..n).map(|_| GraphNode::new(Arc::new(Noop))).collect()
}

fn bench_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("cycle");

    for &n in NODE_COUNTS {
        group.bench_with_input(BenchmarkId::new("chain", n), &n, |b, &n| {
            let s = scheduler();
            let nodes = make_nodes(n);
            let mut edges = GraphEdges::new();
            for pair in nodes.windows(2) {
                edges.add(&pair[0], &pair[1]);
            }
            s.rechain(&nodes, &edges);
            b.iter(|| black_box(s.process_routes(256, 0, 256)));
        });

        group.bench_with_input(BenchmarkId::new("fan", n), &n, |b, &n| {
            let s = scheduler();
            let nodes = make_nodes(n);
            s.rechain(&nodes, &GraphEdges::new());
            b.iter(|| black_box(s.process_routes(256, 0, 256)));
        });
    }

    group.finish();
}

fn bench_rechain(c: &mut Criterion) {
    let mut group = c.benchmark_group("rechain");

    for &n in NODE_COUNTS {
        group.bench_with_input(BenchmarkId::new("chain", n), &n, |b, &n| {
            let s = scheduler();
            let nodes = make_nodes(n);
            let mut edges = GraphEdges::new();
            for pair in nodes.windows(2) {
                edges.add(&pair[0], &pair[1]);
            }
            b.iter(|| s.rechain(black_box(&nodes), &edges));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_cycle, bench_rechain);
criterion_main!(benches);
