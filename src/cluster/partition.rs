//! Connected-component partitioning of a cluster.
//!
//! Components are discovered by breadth-first search in member insertion
//! order, following only edges between members of the cluster. The first
//! component holding an unyielding shard stays in the parent; every other
//! component becomes a child cluster. A cluster without any unyielding member
//! moves everything into a single child so it is never treated as anchored.

use std::collections::{HashSet, VecDeque};

use tracing::debug;

use crate::cluster::Cluster;
use crate::context::IdAllocator;
use crate::error::Result;
use crate::graph::ShardGraph;
use crate::shard::ShardId;

pub struct ClusterPartitioner;

impl ClusterPartitioner {
    /// Connected components of `members`, each in discovery order. Every
    /// member lands in exactly one component; an id the graph no longer
    /// holds forms a component of its own.
    pub fn components(graph: &mut ShardGraph, members: &[ShardId]) -> Vec<Vec<ShardId>> {
        let member_set: HashSet<ShardId> = members.iter().copied().collect();
        graph.reset_unchecked_flags();

        let mut components = Vec::new();
        let mut missing = HashSet::new();
        let mut queue = VecDeque::new();
        for &start in members {
            if !graph.contains(start) {
                if missing.insert(start) {
                    debug!(
                        target: "destruction_core::cluster",
                        shard = start,
                        "member missing from graph"
                    );
                    components.push(vec![start]);
                }
                continue;
            }
            if graph.is_checked(start) {
                continue;
            }
            graph.mark_checked(start);
            queue.push_back(start);

            let mut component = Vec::new();
            while let Some(id) = queue.pop_front() {
                component.push(id);
                let next: Vec<ShardId> = match graph.get(id) {
                    Some(shard) => shard
                        .neighbor_ids()
                        .filter(|n| member_set.contains(n))
                        .collect(),
                    None => continue,
                };
                for neighbor in next {
                    if !graph.is_checked(neighbor) {
                        graph.mark_checked(neighbor);
                        queue.push_back(neighbor);
                    }
                }
            }
            components.push(component);
        }
        components
    }

    /// Members with no neighbors left that are free to fall. Unyielding solo
    /// shards anchor themselves and are not returned.
    pub fn solo_shards(graph: &ShardGraph, members: &[ShardId]) -> Vec<ShardId> {
        members
            .iter()
            .copied()
            .filter(|id| {
                graph
                    .get(*id)
                    .map(|s| s.neighbor_count() == 0 && !s.unyielding)
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Split `cluster` into its main group plus child clusters.
    /// Returns the number of children created; an empty cluster is a no-op.
    pub fn partition(
        graph: &mut ShardGraph,
        cluster: &mut Cluster,
        ids: &mut IdAllocator,
    ) -> Result<usize> {
        // Children left over from an earlier pass rejoin before re-splitting
        let leftovers = std::mem::take(&mut cluster.children);
        for child in leftovers {
            cluster.members_mut().extend(child.all_shard_ids());
        }

        if cluster.is_empty() {
            debug!(
                target: "destruction_core::cluster",
                cluster = cluster.id,
                "partition on empty cluster skipped"
            );
            return Ok(0);
        }

        let members = cluster.take_members();
        let anchored = cluster_has_unyielding(graph, &members);
        let components = Self::components(graph, &members);

        let mut children = Vec::new();
        if !anchored {
            children.push(Cluster::new(ids.next_cluster()?, members));
        } else {
            let mut main_found = false;
            for component in components {
                if !main_found && cluster_has_unyielding(graph, &component) {
                    *cluster.members_mut() = component;
                    main_found = true;
                } else {
                    children.push(Cluster::new(ids.next_cluster()?, component));
                }
            }
        }

        for child in &mut children {
            child.demolishable = cluster.demolishable;
            child.recompute_bound(graph);
        }
        cluster.children = children;
        cluster.assign_ownership(graph);
        cluster.recompute_bound(graph);

        debug!(
            target: "destruction_core::cluster",
            cluster = cluster.id,
            kept = cluster.len(),
            children = cluster.children.len(),
            "partitioned"
        );
        Ok(cluster.children.len())
    }
}

fn cluster_has_unyielding(graph: &ShardGraph, ids: &[ShardId]) -> bool {
    ids.iter()
        .any(|id| graph.get(*id).map(|s| s.unyielding).unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::Shard;
    use bevy::prelude::Vec3;

    fn chain(n: u32) -> (ShardGraph, Cluster) {
        let mut graph =
            ShardGraph::from_shards((0..n).map(|i| Shard::cube(i, Vec3::X * i as f32, 1.0)))
                .unwrap();
        for i in 1..n {
            graph.connect(i - 1, i, 1.0);
        }
        let cluster = Cluster::new(0, graph.ids());
        cluster.assign_ownership(&mut graph);
        (graph, cluster)
    }

    #[test]
    fn test_components_in_insertion_order() {
        let (mut graph, cluster) = chain(5);
        graph.disconnect(1, 2);
        let components = ClusterPartitioner::components(&mut graph, cluster.members());
        assert_eq!(components, vec![vec![0, 1], vec![2, 3, 4]]);
    }

    #[test]
    fn test_anchored_connected_cluster_has_no_children() {
        let (mut graph, mut cluster) = chain(4);
        graph.get_mut(3).unwrap().unyielding = true;
        let mut ids = IdAllocator::new(1);
        assert_eq!(ClusterPartitioner::partition(&mut graph, &mut cluster, &mut ids).unwrap(), 0);
        assert_eq!(cluster.members(), &[0, 1, 2, 3]);
    }

    #[test]
    fn test_unanchored_cluster_moves_into_one_child() {
        let (mut graph, mut cluster) = chain(4);
        graph.disconnect(1, 2);
        let mut ids = IdAllocator::new(1);
        assert_eq!(ClusterPartitioner::partition(&mut graph, &mut cluster, &mut ids).unwrap(), 1);
        assert!(cluster.is_empty());
        assert_eq!(cluster.children[0].members(), &[0, 1, 2, 3]);
        assert!(cluster.verify_ownership(&graph).is_ok());
    }

    #[test]
    fn test_first_anchored_component_stays() {
        let (mut graph, mut cluster) = chain(6);
        graph.disconnect(1, 2);
        graph.disconnect(3, 4);
        graph.get_mut(2).unwrap().unyielding = true;
        graph.get_mut(5).unwrap().unyielding = true;
        let mut ids = IdAllocator::new(10);
        ClusterPartitioner::partition(&mut graph, &mut cluster, &mut ids).unwrap();
        assert_eq!(cluster.members(), &[2, 3]);
        let children: Vec<Vec<ShardId>> = cluster
            .children
            .iter()
            .map(|c| c.members().to_vec())
            .collect();
        assert_eq!(children, vec![vec![0, 1], vec![4, 5]]);
        assert_eq!(cluster.children[0].id, 10);
    }

    #[test]
    fn test_components_cover_members_missing_from_graph() {
        let (mut graph, mut cluster) = chain(4);
        graph.remove_shard(3);
        cluster.members_mut().push(9);
        let components = ClusterPartitioner::components(&mut graph, cluster.members());
        assert_eq!(components, vec![vec![0, 1, 2], vec![3], vec![9]]);
        let total: usize = components.iter().map(Vec::len).sum();
        assert_eq!(total, cluster.len());
    }

    #[test]
    fn test_partition_past_id_space_is_an_error() {
        let (mut graph, mut cluster) = chain(3);
        let mut ids = IdAllocator::new(crate::cluster::ClusterId::MAX);
        assert_eq!(
            ClusterPartitioner::partition(&mut graph, &mut cluster, &mut ids),
            Err(crate::error::ConnectivityError::IdsExhausted)
        );
    }

    #[test]
    fn test_empty_cluster_is_noop() {
        let mut graph = ShardGraph::new();
        let mut cluster = Cluster::new(0, Vec::new());
        let mut ids = IdAllocator::new(1);
        assert_eq!(ClusterPartitioner::partition(&mut graph, &mut cluster, &mut ids).unwrap(), 0);
        assert!(cluster.children.is_empty());
    }

    #[test]
    fn test_solo_shards_skip_unyielding() {
        let (mut graph, cluster) = chain(3);
        graph.remove_shard(1);
        graph.get_mut(2).unwrap().unyielding = true;
        let members: Vec<ShardId> = cluster
            .members()
            .iter()
            .copied()
            .filter(|id| graph.contains(*id))
            .collect();
        assert_eq!(ClusterPartitioner::solo_shards(&graph, &members), vec![0]);
    }
}
