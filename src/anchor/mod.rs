//! Anchor Resolver: unyielding zones confer anchoring by spatial overlap.
//!
//! Anchoring is independent of adjacency: a zone asks the broad-phase for
//! every collider overlapping its oriented box, restricted to the layers the
//! structure's colliders live on, and marks the matching shards unyielding.
//! Zone association is additive and zones are referenced by id only.

pub mod overlap;

use std::collections::HashSet;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::graph::ShardGraph;
use crate::shard::{Bounds, ColliderRef, ShardId, ZoneId};

pub use overlap::BoundsOverlapQuery;

/// Broad-phase collaborator. Implementations must return the same colliders
/// for the same transforms; order does not matter.
pub trait OverlapQuery: Send + Sync {
    fn query_overlap(
        &self,
        center: Vec3,
        half_extents: Vec3,
        rotation: Quat,
        layer_mask: u32,
    ) -> Vec<ColliderRef>;
}

/// Oriented box that anchors every shard it overlaps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorZone {
    pub id: ZoneId,
    pub center: Vec3,
    pub half_extents: Vec3,
    pub rotation: Quat,
    /// Overlapped shards become unyielding. When off the zone only tags them.
    pub unyielding: bool,
    /// Anchored shards may still be released manually
    pub activatable: bool,
}

impl AnchorZone {
    pub fn new(id: ZoneId, center: Vec3, half_extents: Vec3) -> Self {
        Self {
            id,
            center,
            half_extents: half_extents.abs(),
            rotation: Quat::IDENTITY,
            unyielding: true,
            activatable: false,
        }
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_unyielding(mut self, unyielding: bool) -> Self {
        self.unyielding = unyielding;
        self
    }

    pub fn with_activatable(mut self, activatable: bool) -> Self {
        self.activatable = activatable;
        self
    }

    /// Axis-aligned box enclosing the oriented zone
    pub fn aabb(&self) -> Bounds {
        let axes = Mat3::from_quat(self.rotation);
        let extent = axes.x_axis.abs() * self.half_extents.x
            + axes.y_axis.abs() * self.half_extents.y
            + axes.z_axis.abs() * self.half_extents.z;
        Bounds::new(self.center - extent, self.center + extent)
    }
}

/// Shards anchored by one zone during a resolve pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneHits {
    pub zone: ZoneId,
    pub shards: Vec<ShardId>,
}

pub struct AnchorResolver;

impl AnchorResolver {
    /// OR of `1 << layer` over every shard that has a collider
    pub fn layer_mask(graph: &ShardGraph) -> u32 {
        graph
            .iter()
            .filter(|s| s.collider.is_some())
            .fold(0u32, |mask, s| mask | (1u32 << (s.layer as u32 % 32)))
    }

    /// Record the zone id on every shard whose collider a zone overlaps and,
    /// for unyielding zones, pin the shard. Zones are applied in slice order,
    /// hits in graph insertion order.
    ///
    /// The first pin sets `activatable` from the zone. A shard that is already
    /// unyielding, whether from an earlier zone or from the caller, can only
    /// lose activatability: the zone's flag is ANDed in.
    pub fn resolve(
        graph: &mut ShardGraph,
        zones: &[AnchorZone],
        query: &dyn OverlapQuery,
    ) -> Vec<ZoneHits> {
        let mask = Self::layer_mask(graph);
        let mut report = Vec::with_capacity(zones.len());
        if mask == 0 {
            return report;
        }

        for zone in zones {
            let hits: HashSet<ColliderRef> = query
                .query_overlap(zone.center, zone.half_extents, zone.rotation, mask)
                .into_iter()
                .collect();

            let mut anchored = Vec::new();
            for shard in graph.iter_mut() {
                let Some(collider) = shard.collider else {
                    continue;
                };
                if !hits.contains(&collider) {
                    continue;
                }
                if shard.anchor_zones.contains(&zone.id) {
                    continue;
                }
                if zone.unyielding {
                    if shard.unyielding {
                        shard.activatable &= zone.activatable;
                    } else {
                        shard.activatable = zone.activatable;
                        shard.unyielding = true;
                    }
                }
                shard.anchor_zones.push(zone.id);
                anchored.push(shard.id);
            }

            debug!(
                target: "destruction_core::anchor",
                zone = zone.id,
                anchored = anchored.len(),
                "zone resolved"
            );
            report.push(ZoneHits {
                zone: zone.id,
                shards: anchored,
            });
        }
        report
    }

    /// Shards associated with `zone`, in graph order
    pub fn zone_shards(graph: &ShardGraph, zone: ZoneId) -> Vec<ShardId> {
        graph
            .iter()
            .filter(|s| s.anchor_zones.contains(&zone))
            .map(|s| s.id)
            .collect()
    }
}
