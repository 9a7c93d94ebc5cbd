//! Clusters: groups of shards under one connectivity root.
//!
//! A cluster only stores shard ids; the shards themselves stay in the
//! structure's [`ShardGraph`] and point back at their owner through
//! `Shard::cluster`. After a partition pass the members and the members of
//! every child are disjoint and together equal the pre-partition member set.

pub mod partition;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConnectivityError, Result};
use crate::graph::ShardGraph;
use crate::shard::{Bounds, ShardId};

pub use partition::ClusterPartitioner;

pub type ClusterId = u32;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    members: Vec<ShardId>,
    pub children: Vec<Cluster>,
    pub bound: Option<Bounds>,
    pub demolishable: bool,
    pub initialized: bool,
}

impl Cluster {
    pub fn new(id: ClusterId, members: Vec<ShardId>) -> Self {
        Self {
            id,
            members,
            ..Default::default()
        }
    }

    pub fn members(&self) -> &[ShardId] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, id: ShardId) -> bool {
        self.members.contains(&id)
    }

    pub(crate) fn members_mut(&mut self) -> &mut Vec<ShardId> {
        &mut self.members
    }

    pub(crate) fn take_members(&mut self) -> Vec<ShardId> {
        std::mem::take(&mut self.members)
    }

    /// Keep members for which `keep` holds, preserving order. Returns how many went.
    pub(crate) fn retain_members(&mut self, mut keep: impl FnMut(ShardId) -> bool) -> usize {
        let before = self.members.len();
        self.members.retain(|id| keep(*id));
        before - self.members.len()
    }

    /// Ids of every shard in this cluster and its children
    pub fn all_shard_ids(&self) -> Vec<ShardId> {
        let mut ids = self.members.clone();
        for child in &self.children {
            ids.extend(child.all_shard_ids());
        }
        ids
    }

    /// Point every member's back-reference at this cluster
    pub fn assign_ownership(&self, graph: &mut ShardGraph) {
        for &id in &self.members {
            if let Some(shard) = graph.get_mut(id) {
                shard.cluster = Some(self.id);
            }
        }
        for child in &self.children {
            child.assign_ownership(graph);
        }
    }

    pub fn has_unyielding(&self, graph: &ShardGraph) -> bool {
        self.members
            .iter()
            .any(|id| graph.get(*id).map(|s| s.unyielding).unwrap_or(false))
    }

    pub fn recompute_bound(&mut self, graph: &ShardGraph) {
        self.bound = Bounds::enclosing(
            self.members
                .iter()
                .filter_map(|id| graph.get(*id))
                .map(|s| &s.bounds),
        );
    }

    /// Check that no shard appears twice across members and children, and that
    /// every back-reference names the cluster that actually lists the shard.
    pub fn verify_ownership(&self, graph: &ShardGraph) -> Result<()> {
        let mut seen = HashSet::new();
        self.verify_into(graph, &mut seen)
    }

    fn verify_into(&self, graph: &ShardGraph, seen: &mut HashSet<ShardId>) -> Result<()> {
        for &id in &self.members {
            let recorded = graph.get(id).and_then(|s| s.cluster);
            if !seen.insert(id) || recorded != Some(self.id) {
                return Err(ConnectivityError::OwnershipInconsistency {
                    shard: id,
                    observed: self.id,
                    recorded,
                });
            }
        }
        for child in &self.children {
            child.verify_into(graph, seen)?;
        }
        Ok(())
    }

    /// Reassign back-references to the structurally observed owner and drop
    /// duplicate listings (first listing wins). Returns the number of fixes.
    pub fn heal_ownership(&mut self, graph: &mut ShardGraph) -> usize {
        let mut seen = HashSet::new();
        self.heal_into(graph, &mut seen)
    }

    fn heal_into(&mut self, graph: &mut ShardGraph, seen: &mut HashSet<ShardId>) -> usize {
        let cluster = self.id;
        let mut fixes = 0;
        self.members.retain(|id| {
            if seen.insert(*id) {
                true
            } else {
                warn!(
                    target: "destruction_core::monitor",
                    shard = *id,
                    cluster,
                    "dropping duplicate cluster listing"
                );
                fixes += 1;
                false
            }
        });
        for &id in &self.members {
            if let Some(shard) = graph.get_mut(id) {
                if shard.cluster != Some(cluster) {
                    warn!(
                        target: "destruction_core::monitor",
                        shard = id,
                        cluster,
                        recorded = ?shard.cluster,
                        "healing cluster back-reference"
                    );
                    shard.cluster = Some(cluster);
                    fixes += 1;
                }
            }
        }
        for child in &mut self.children {
            fixes += child.heal_into(graph, seen);
        }
        fixes
    }
}
