use bevy::prelude::Vec3;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

use destruction_core::cluster::{Cluster, ClusterPartitioner};
use destruction_core::config::{ConnectivityConfig, StressConfig};
use destruction_core::context::{IdAllocator, SimulationContext};
use destruction_core::graph::builder::AdjacencyBuilder;
use destruction_core::graph::ShardGraph;
use destruction_core::monitor::ConnectivityMonitor;
use destruction_core::shard::Shard;
use destruction_core::stress::StressPropagator;

/// side^3 unit cubes with the bottom layer pinned
fn grid(side: u32) -> Vec<Shard> {
    let mut shards = Vec::new();
    for x in 0..side {
        for y in 0..side {
            for z in 0..side {
                let id = (x * side + y) * side + z;
                let center = Vec3::new(x as f32, y as f32, z as f32);
                shards.push(Shard::cube(id, center, 1.0).with_unyielding(y == 0));
            }
        }
    }
    shards
}

fn connected_grid(side: u32) -> ShardGraph {
    let mut graph = ShardGraph::from_shards(grid(side)).unwrap();
    AdjacencyBuilder::from_config(&ConnectivityConfig::default()).build(&mut graph);
    graph
}

fn bench_adjacency(c: &mut Criterion) {
    let builder = AdjacencyBuilder::from_config(&ConnectivityConfig::default());
    c.bench_function("build_adjacency_10x10x10", |b| {
        b.iter(|| {
            let mut graph = ShardGraph::from_shards(grid(10)).unwrap();
            builder.build(black_box(&mut graph))
        })
    });
}

fn bench_partition(c: &mut Criterion) {
    let graph = connected_grid(10);
    c.bench_function("partition_10x10x10", |b| {
        b.iter(|| {
            let mut graph = graph.clone();
            let mut cluster = Cluster::new(1, graph.ids());
            let mut ids = IdAllocator::default();
            ClusterPartitioner::partition(&mut graph, black_box(&mut cluster), &mut ids)
        })
    });
}

fn bench_monitor_check(c: &mut Criterion) {
    let graph = connected_grid(10);
    c.bench_function("monitor_remove_column_10x10x10", |b| {
        b.iter(|| {
            let mut ctx = SimulationContext::headless(ConnectivityConfig::default());
            let mut monitor = ConnectivityMonitor::new(graph.clone(), &mut ctx).unwrap();
            for y in 0..10 {
                monitor.notify_removed((5 * 10 + y) * 10 + 5);
            }
            monitor.tick(&mut ctx).unwrap()
        })
    });
}

fn bench_stress(c: &mut Criterion) {
    let mut graph = connected_grid(8);
    StressPropagator::prepare(&mut graph);
    let config = StressConfig::default();
    c.bench_function("stress_relax_8x8x8", |b| {
        b.iter(|| StressPropagator::run(black_box(&graph), &config))
    });
}

criterion_group!(
    benches,
    bench_adjacency,
    bench_partition,
    bench_monitor_check,
    bench_stress
);
criterion_main!(benches);
