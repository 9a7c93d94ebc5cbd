//! Property-based tests using proptest
//!
//! Invariants that must hold for ALL structures:
//! - Adjacency stays symmetric under any removal sequence
//! - A check keeps exactly the shards connected to an anchor (union-find oracle)
//! - Every shard ends up either in the structure or in exactly one released body
//! - Removing a shard twice is the same as removing it once
//! - Collapse rate never goes backwards and removed edges stay removed
//! - Discard rolls depend only on the seed and the unordered pair

use std::collections::HashSet;

use bevy::prelude::Vec3;
use petgraph::unionfind::UnionFind;
use proptest::prelude::*;

use destruction_core::body::ReleasedBody;
use destruction_core::collapse::CollapseController;
use destruction_core::config::{CollapseConfig, CollapseMode, ConnectivityConfig};
use destruction_core::context::SimulationContext;
use destruction_core::error::ConnectivityError;
use destruction_core::graph::discard::{pair_hash, pair_roll, PairDiscard};
use destruction_core::graph::ShardGraph;
use destruction_core::monitor::ConnectivityMonitor;
use destruction_core::shard::{Shard, ShardId};

// ============================================================
// Strategies
// ============================================================

/// (shard count, edge list, anchor flags)
fn structure() -> impl Strategy<Value = (usize, Vec<(usize, usize)>, Vec<bool>)> {
    (2usize..24).prop_flat_map(|n| {
        (
            Just(n),
            prop::collection::vec((0..n, 0..n), 0..n * 3),
            prop::collection::vec(prop::bool::weighted(0.2), n),
        )
    })
}

fn build(n: usize, edges: &[(usize, usize)], anchors: &[bool]) -> ShardGraph {
    let mut graph = ShardGraph::from_shards((0..n).map(|i| {
        Shard::cube(i as ShardId, Vec3::X * (i as f32) * 3.0, 1.0).with_unyielding(anchors[i])
    }))
    .unwrap();
    for &(a, b) in edges {
        graph.connect(a as ShardId, b as ShardId, 1.0);
    }
    graph
}

/// Ids the oracle says must stay: every shard whose component holds an anchor
fn anchored_by_oracle(n: usize, edges: &[(usize, usize)], anchors: &[bool]) -> HashSet<ShardId> {
    let mut sets = UnionFind::<usize>::new(n);
    for &(a, b) in edges {
        sets.union(a, b);
    }
    let anchored_roots: HashSet<usize> = (0..n).filter(|i| anchors[*i]).map(|i| sets.find(i)).collect();
    (0..n)
        .filter(|i| anchored_roots.contains(&sets.find(*i)))
        .map(|i| i as ShardId)
        .collect()
}

// ============================================================
// Graph Properties
// ============================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_adjacency_stays_symmetric(
        (n, edges, anchors) in structure(),
        removals in prop::collection::vec(0usize..24, 0..10),
    ) {
        let mut graph = build(n, &edges, &anchors);
        prop_assert!(graph.check_symmetry().is_ok());
        for id in removals {
            graph.remove_shard(id as ShardId);
            prop_assert!(graph.check_symmetry().is_ok());
        }
        for (a, b) in edges {
            graph.disconnect(a as ShardId, b as ShardId);
            prop_assert!(graph.check_symmetry().is_ok());
        }
        prop_assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn prop_double_removal_is_idempotent((n, edges, anchors) in structure(), pick in 0usize..24) {
        let mut once = build(n, &edges, &anchors);
        let mut twice = build(n, &edges, &anchors);
        let id = (pick % n) as ShardId;
        prop_assert!(once.remove_shard(id).is_some());
        twice.remove_shard(id);
        prop_assert!(twice.remove_shard(id).is_none());
        prop_assert_eq!(once.ids(), twice.ids());
        prop_assert_eq!(once.edge_count(), twice.edge_count());
    }
}

// ============================================================
// Partition Properties
// ============================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_check_keeps_exactly_anchored_components((n, edges, anchors) in structure()) {
        let mut ctx = SimulationContext::headless(ConnectivityConfig::default());
        let mut monitor = ConnectivityMonitor::new(build(n, &edges, &anchors), &mut ctx).unwrap();
        monitor.request_check();
        let report = monitor.tick(&mut ctx).unwrap();

        let expected = anchored_by_oracle(n, &edges, &anchors);
        let kept: HashSet<ShardId> = monitor.root().members().iter().copied().collect();
        prop_assert_eq!(&kept, &expected);
        prop_assert_eq!(report.dissolved, expected.is_empty());

        // Every shard is either kept or released, never both, never twice
        let mut seen = kept.clone();
        for body in monitor.take_released() {
            for id in body.shard_ids() {
                prop_assert!(seen.insert(id), "shard {} accounted twice", id);
            }
        }
        prop_assert_eq!(seen.len(), n);
    }

    #[test]
    fn prop_released_activations_match_bodies((n, edges, anchors) in structure()) {
        let mut ctx = SimulationContext::headless(ConnectivityConfig::default());
        let mut monitor = ConnectivityMonitor::new(build(n, &edges, &anchors), &mut ctx).unwrap();
        monitor.request_check();
        let report = monitor.tick(&mut ctx).unwrap();
        let released: usize = monitor.take_released().iter().map(|b| b.shard_count()).sum();
        prop_assert_eq!(report.activated.len(), released);
        prop_assert!(report.activated.iter().all(|id| !anchors[*id as usize]));
    }
}

// ============================================================
// Collapse & Discard Properties
// ============================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_collapse_rate_is_monotonic(
        (n, edges, anchors) in structure(),
        rates in prop::collection::vec(0.0f32..=1.0, 1..6),
    ) {
        let mut ctx = SimulationContext::headless(ConnectivityConfig::default());
        let mut monitor = ConnectivityMonitor::new(build(n, &edges, &anchors), &mut ctx).unwrap();
        let config = CollapseConfig { mode: CollapseMode::Random, ..Default::default() };
        let mut collapse = CollapseController::new(&config, 3, 0.8);

        let mut sorted = rates.clone();
        sorted.sort_by(f32::total_cmp);
        let mut edges_left = monitor.graph().edge_count();
        let mut removed_so_far: Vec<(ShardId, ShardId)> = Vec::new();
        for rate in &sorted {
            collapse.step_collapse(&mut monitor, *rate, None).unwrap();
            let now = monitor.graph().edge_count();
            prop_assert!(now <= edges_left);
            edges_left = now;

            // The removed set only grows and nothing in it comes back
            let removed = collapse.removed_edges();
            prop_assert!(removed.len() >= removed_so_far.len());
            prop_assert_eq!(&removed[..removed_so_far.len()], removed_so_far.as_slice());
            for &(a, b) in removed {
                prop_assert!(!monitor.graph().has_edge(a, b));
                prop_assert!(!monitor.graph().has_edge(b, a));
            }
            removed_so_far = removed.to_vec();
        }

        let top = sorted[sorted.len() - 1];
        if top > 0.0 {
            let err = collapse.step_collapse(&mut monitor, top / 2.0, None).unwrap_err();
            let is_non_monotonic = matches!(err, ConnectivityError::NonMonotonicCollapse { .. });
            prop_assert!(is_non_monotonic);
        }
    }

    #[test]
    fn prop_discard_is_pair_keyed(seed in any::<u64>(), a in 0u32..10_000, b in 0u32..10_000, pct in 0.0f32..=100.0) {
        prop_assert_eq!(pair_hash(seed, a, b), pair_hash(seed, b, a));
        prop_assert_eq!(pair_roll(seed, a, b), pair_roll(seed, b, a));
        let discard = PairDiscard::new(seed, pct);
        let before = discard.discards(a, b);
        let _ = pair_roll(seed, a.wrapping_add(1), b);
        prop_assert_eq!(discard.discards(b, a), before);
    }
}
