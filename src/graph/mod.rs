//! Shard Graph: arena of shards plus their symmetric adjacency.
//!
//! The graph owns every shard of one structure. Shards live in a flat slot
//! arena in insertion order; removed shards leave a tombstone so that the
//! order of the survivors never changes. Clusters refer to shards by id only.
//!
//! Every mutation keeps the adjacency symmetric: if A lists B then B lists A
//! with the same contact area. Removal is eager, so partitioning never walks
//! a stale neighbor.

pub mod builder;
pub mod discard;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConnectivityError, Result};
use crate::shard::{Shard, ShardId};

/// Undirected edge with `a < b`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub a: ShardId,
    pub b: ShardId,
    pub area: f32,
}

impl Edge {
    pub fn key(&self) -> (ShardId, ShardId) {
        (self.a, self.b)
    }
}

/// Canonical (low, high) ordering of a shard pair
pub fn edge_key(a: ShardId, b: ShardId) -> (ShardId, ShardId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ShardGraph {
    slots: Vec<Option<Shard>>,
    index: HashMap<ShardId, usize>,
}

impl ShardGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from shards in order, rejecting duplicate ids
    pub fn from_shards(shards: impl IntoIterator<Item = Shard>) -> Result<Self> {
        let mut graph = Self::new();
        for shard in shards {
            graph.add_shard(shard)?;
        }
        Ok(graph)
    }

    pub fn add_shard(&mut self, shard: Shard) -> Result<()> {
        if self.index.contains_key(&shard.id) {
            return Err(ConnectivityError::DuplicateId(shard.id));
        }
        self.index.insert(shard.id, self.slots.len());
        self.slots.push(Some(shard));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, id: ShardId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn get(&self, id: ShardId) -> Option<&Shard> {
        let slot = *self.index.get(&id)?;
        self.slots[slot].as_ref()
    }

    pub fn get_mut(&mut self, id: ShardId) -> Option<&mut Shard> {
        let slot = *self.index.get(&id)?;
        self.slots[slot].as_mut()
    }

    /// Live shards in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &Shard> {
        self.slots.iter().filter_map(|s| s.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Shard> {
        self.slots.iter_mut().filter_map(|s| s.as_mut())
    }

    /// Live shard ids in insertion order
    pub fn ids(&self) -> Vec<ShardId> {
        self.iter().map(|s| s.id).collect()
    }

    /// Add a symmetric edge. No-op for self-edges, non-positive areas, unknown
    /// shards and pairs that are already connected.
    pub fn connect(&mut self, a: ShardId, b: ShardId, area: f32) -> bool {
        if a == b || area.is_nan() || area <= 0.0 {
            return false;
        }
        let (Some(shard_a), Some(shard_b)) = (self.get(a), self.get(b)) else {
            return false;
        };
        if shard_a.has_neighbor(b) || shard_b.has_neighbor(a) {
            return false;
        }
        if let Some(shard) = self.get_mut(a) {
            shard.push_neighbor(b, area);
        }
        if let Some(shard) = self.get_mut(b) {
            shard.push_neighbor(a, area);
        }
        true
    }

    /// Remove the edge between `a` and `b` on both sides.
    /// Returns the contact area when the edge existed.
    pub fn disconnect(&mut self, a: ShardId, b: ShardId) -> Option<f32> {
        let forward = self.get_mut(a).and_then(|s| s.remove_neighbor(b));
        let backward = self.get_mut(b).and_then(|s| s.remove_neighbor(a));
        forward.or(backward)
    }

    /// Remove a shard and every back-edge pointing at it.
    /// Idempotent: removing an unknown id is a silent no-op.
    pub fn remove_shard(&mut self, id: ShardId) -> Option<Shard> {
        let slot = self.index.remove(&id)?;
        let mut shard = self.slots[slot].take()?;
        for neighbor in std::mem::take(shard.neighbors_mut()) {
            if let Some(other) = self.get_mut(neighbor.id) {
                other.remove_neighbor(id);
            }
        }
        shard.cluster = None;
        self.compact_if_sparse();
        Some(shard)
    }

    /// Move `ids` into a new graph. Edges between moved shards survive, edges
    /// crossing the boundary are cut on both sides. Unknown ids are skipped.
    pub fn extract(&mut self, ids: &[ShardId]) -> ShardGraph {
        let moving: std::collections::HashSet<ShardId> =
            ids.iter().copied().filter(|id| self.contains(*id)).collect();

        // Cut boundary edges first so both graphs stay symmetric
        for &id in ids {
            if !moving.contains(&id) {
                continue;
            }
            let outside: Vec<ShardId> = self
                .get(id)
                .map(|s| s.neighbor_ids().filter(|n| !moving.contains(n)).collect())
                .unwrap_or_default();
            for other in outside {
                self.disconnect(id, other);
            }
        }

        let mut extracted = ShardGraph::new();
        for &id in ids {
            if !moving.contains(&id) || extracted.contains(id) {
                continue;
            }
            let Some(slot) = self.index.remove(&id) else {
                continue;
            };
            if let Some(mut shard) = self.slots[slot].take() {
                shard.cluster = None;
                // Unique by construction
                let _ = extracted.add_shard(shard);
            }
        }
        self.compact_if_sparse();
        extracted
    }

    /// Clear the partitioner's visited flag on every shard
    pub fn reset_unchecked_flags(&mut self) {
        for shard in self.iter_mut() {
            shard.checked = false;
        }
    }

    pub(crate) fn is_checked(&self, id: ShardId) -> bool {
        self.get(id).map(|s| s.checked).unwrap_or(true)
    }

    pub(crate) fn mark_checked(&mut self, id: ShardId) {
        if let Some(shard) = self.get_mut(id) {
            shard.checked = true;
        }
    }

    /// Record `initial_neighbor_count` on shards that have none yet
    pub fn record_initial_neighbors(&mut self) {
        for shard in self.iter_mut() {
            shard.record_initial_neighbors();
        }
    }

    /// Every undirected edge once, ordered by the first shard's insertion order
    pub fn edges(&self) -> Vec<Edge> {
        let mut edges = Vec::new();
        for shard in self.iter() {
            for neighbor in shard.neighbors() {
                if shard.id < neighbor.id {
                    edges.push(Edge {
                        a: shard.id,
                        b: neighbor.id,
                        area: neighbor.area,
                    });
                }
            }
        }
        edges
    }

    pub fn edge_count(&self) -> usize {
        self.iter().map(|s| s.neighbor_count()).sum::<usize>() / 2
    }

    pub fn has_edge(&self, a: ShardId, b: ShardId) -> bool {
        self.get(a).map(|s| s.has_neighbor(b)).unwrap_or(false)
    }

    /// Verify adjacency symmetry, reporting the first violation
    pub fn check_symmetry(&self) -> Result<()> {
        for shard in self.iter() {
            for neighbor in shard.neighbors() {
                let Some(other) = self.get(neighbor.id) else {
                    return Err(ConnectivityError::MissingNeighbor {
                        shard: shard.id,
                        neighbor: neighbor.id,
                    });
                };
                match other.area_with(shard.id) {
                    Some(area) if area == neighbor.area => {}
                    _ => {
                        return Err(ConnectivityError::AsymmetricEdge {
                            a: shard.id,
                            b: neighbor.id,
                            area: neighbor.area,
                        })
                    }
                }
            }
        }
        Ok(())
    }

    /// Drop edges that reference shards no longer in the graph or whose
    /// counterpart is missing. Each dropped edge is logged as a warning.
    pub fn prune_dangling(&mut self) -> Vec<(ShardId, ShardId)> {
        let mut dangling = Vec::new();
        for shard in self.iter() {
            for neighbor in shard.neighbors() {
                let symmetric = self
                    .get(neighbor.id)
                    .map(|other| other.has_neighbor(shard.id))
                    .unwrap_or(false);
                if !symmetric {
                    dangling.push((shard.id, neighbor.id));
                }
            }
        }
        for &(shard, neighbor) in &dangling {
            let error = ConnectivityError::MissingNeighbor { shard, neighbor };
            warn!(target: "destruction_core::graph", %error, "dropping dangling edge");
            if let Some(s) = self.get_mut(shard) {
                s.remove_neighbor(neighbor);
            }
        }
        dangling
    }

    /// Rebuild the arena once more than half of the slots are tombstones
    fn compact_if_sparse(&mut self) {
        if self.slots.len() < 32 || self.index.len() * 2 > self.slots.len() {
            return;
        }
        self.slots.retain(|s| s.is_some());
        self.index.clear();
        for (slot, shard) in self.slots.iter().enumerate() {
            if let Some(shard) = shard {
                self.index.insert(shard.id, slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::prelude::Vec3;

    fn chain(n: u32) -> ShardGraph {
        let mut graph =
            ShardGraph::from_shards((0..n).map(|i| Shard::cube(i, Vec3::X * i as f32, 1.0)))
                .unwrap();
        for i in 1..n {
            graph.connect(i - 1, i, 1.0);
        }
        graph
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut graph = ShardGraph::new();
        graph.add_shard(Shard::cube(1, Vec3::ZERO, 1.0)).unwrap();
        let err = graph.add_shard(Shard::cube(1, Vec3::X, 1.0)).unwrap_err();
        assert_eq!(err, ConnectivityError::DuplicateId(1));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_connect_is_symmetric() {
        let mut graph = chain(2);
        assert_eq!(graph.get(0).unwrap().area_with(1), Some(1.0));
        assert_eq!(graph.get(1).unwrap().area_with(0), Some(1.0));
        assert!(graph.check_symmetry().is_ok());
        // Existing edge, self edge and zero area are no-ops
        assert!(!graph.connect(0, 1, 2.0));
        assert!(!graph.connect(0, 0, 1.0));
        graph.disconnect(0, 1);
        assert!(!graph.connect(0, 1, 0.0));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_remove_shard_eager_back_edges() {
        let mut graph = chain(3);
        let removed = graph.remove_shard(1).unwrap();
        assert_eq!(removed.neighbor_count(), 0);
        assert_eq!(graph.get(0).unwrap().neighbor_count(), 0);
        assert_eq!(graph.get(2).unwrap().neighbor_count(), 0);
        assert!(graph.check_symmetry().is_ok());
    }

    #[test]
    fn test_remove_shard_idempotent() {
        let mut graph = chain(4);
        graph.remove_shard(2);
        let edges_once = graph.edges();
        assert!(graph.remove_shard(2).is_none());
        assert_eq!(graph.edges(), edges_once);
        assert_eq!(graph.ids(), vec![0, 1, 3]);
    }

    #[test]
    fn test_insertion_order_survives_compaction() {
        let mut graph = chain(64);
        for id in (0..64).filter(|i| i % 3 != 0) {
            graph.remove_shard(id);
        }
        let ids = graph.ids();
        assert_eq!(ids, (0..64).filter(|i| i % 3 == 0).collect::<Vec<_>>());
        assert!(graph.get(63).is_some());
    }

    #[test]
    fn test_extract_keeps_internal_edges() {
        let mut graph = chain(5);
        let extracted = graph.extract(&[2, 3, 4]);
        assert_eq!(graph.ids(), vec![0, 1]);
        assert_eq!(extracted.ids(), vec![2, 3, 4]);
        assert!(extracted.has_edge(2, 3));
        assert!(extracted.has_edge(3, 4));
        assert!(!graph.get(1).unwrap().has_neighbor(2));
        assert!(graph.check_symmetry().is_ok());
        assert!(extracted.check_symmetry().is_ok());
    }

    #[test]
    fn test_prune_dangling_edges() {
        let mut graph = chain(3);
        // Forge a one-sided edge
        graph.get_mut(0).unwrap().push_neighbor(2, 0.5);
        assert!(graph.check_symmetry().is_err());
        let dropped = graph.prune_dangling();
        assert_eq!(dropped, vec![(0, 2)]);
        assert!(graph.check_symmetry().is_ok());
    }

    #[test]
    fn test_reset_unchecked_flags() {
        let mut graph = chain(3);
        graph.mark_checked(0);
        graph.mark_checked(2);
        assert!(graph.is_checked(0));
        graph.reset_unchecked_flags();
        assert!(graph.iter().all(|s| !s.checked));
    }
}
