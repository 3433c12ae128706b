use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pasarela::{ClusterConfig, ClusterTopology};
use std::collections::HashSet;
use std::time::Duration;

fn create_topology(node_count: usize) -> ClusterTopology {
    let endpoints: Vec<String> = (0..node_count)
        .map(|i| format!("http://10.0.0.{}:8529", i + 1))
        .collect();
    let config = ClusterConfig::new(&endpoints).unwrap();
    ClusterTopology::new(config, Duration::from_secs(30)).unwrap()
}

/// Node selection with every node healthy
fn bench_next_candidate_healthy(c: &mut Criterion) {
    let mut group = c.benchmark_group("next_candidate_healthy");

    for node_count in [1, 3, 16].iter() {
        let topology = create_topology(*node_count);
        let excluded = HashSet::new();
        group.bench_with_input(BenchmarkId::from_parameter(node_count), node_count, |b, _| {
            b.iter(|| black_box(topology.next_candidate(&excluded).unwrap()));
        });
    }

    group.finish();
}

/// Node selection when all but the last node are cooling down
fn bench_next_candidate_degraded(c: &mut Criterion) {
    let mut group = c.benchmark_group("next_candidate_degraded");

    for node_count in [3, 16].iter() {
        let topology = create_topology(*node_count);
        for node in &topology.nodes()[..node_count - 1] {
            topology.report_failure(node);
        }
        let excluded = HashSet::new();
        group.bench_with_input(BenchmarkId::from_parameter(node_count), node_count, |b, _| {
            b.iter(|| black_box(topology.next_candidate(&excluded).unwrap()));
        });
    }

    group.finish();
}

fn bench_failure_bookkeeping(c: &mut Criterion) {
    let topology = create_topology(3);
    let node = topology.nodes()[0].clone();

    c.bench_function("report_failure_then_success", |b| {
        b.iter(|| {
            topology.report_failure(black_box(&node));
            topology.report_success(black_box(&node));
        });
    });
}

criterion_group!(
    benches,
    bench_next_candidate_healthy,
    bench_next_candidate_degraded,
    bench_failure_bookkeeping
);
criterion_main!(benches);
