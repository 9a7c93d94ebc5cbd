//! Built-in overlap query over shard bounds.
//!
//! Used when no physics broad-phase is attached (headless simulation, tools,
//! tests). Zones are oriented boxes and shard colliders are approximated by
//! their AABBs, so the test is a separating-axis check between an OBB and an
//! AABB. Touching boxes count as overlapping.

use bevy::prelude::*;

use crate::anchor::OverlapQuery;
use crate::graph::ShardGraph;
use crate::shard::{Bounds, ColliderRef};

const AXIS_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Default)]
pub struct BoundsOverlapQuery {
    colliders: Vec<(ColliderRef, Bounds, u8)>,
}

impl BoundsOverlapQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every shard that carries a collider
    pub fn from_graph(graph: &ShardGraph) -> Self {
        let colliders = graph
            .iter()
            .filter_map(|s| s.collider.map(|c| (c, s.bounds, s.layer)))
            .collect();
        Self { colliders }
    }

    pub fn insert(&mut self, collider: ColliderRef, bounds: Bounds, layer: u8) {
        self.colliders.push((collider, bounds, layer));
    }

    pub fn len(&self) -> usize {
        self.colliders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colliders.is_empty()
    }
}

impl OverlapQuery for BoundsOverlapQuery {
    fn query_overlap(
        &self,
        center: Vec3,
        half_extents: Vec3,
        rotation: Quat,
        layer_mask: u32,
    ) -> Vec<ColliderRef> {
        self.colliders
            .iter()
            .filter(|(_, _, layer)| layer_mask & (1u32 << (*layer as u32 % 32)) != 0)
            .filter(|(_, bounds, _)| obb_intersects_aabb(center, half_extents, rotation, bounds))
            .map(|(collider, _, _)| *collider)
            .collect()
    }
}

/// Separating-axis test between an oriented box and an axis-aligned box
pub fn obb_intersects_aabb(center: Vec3, half_extents: Vec3, rotation: Quat, aabb: &Bounds) -> bool {
    let obb_axes = Mat3::from_quat(rotation);
    let obb_axes = [obb_axes.x_axis, obb_axes.y_axis, obb_axes.z_axis];
    let obb_half = half_extents.abs().to_array();
    let world_axes = [Vec3::X, Vec3::Y, Vec3::Z];
    let aabb_half = aabb.half_extents().to_array();
    let offset = center - aabb.center();

    let separated = |axis: Vec3| -> bool {
        if axis.length_squared() < AXIS_EPSILON {
            return false;
        }
        let r_aabb: f32 = (0..3).map(|i| aabb_half[i] * axis.dot(world_axes[i]).abs()).sum();
        let r_obb: f32 = (0..3).map(|i| obb_half[i] * axis.dot(obb_axes[i]).abs()).sum();
        offset.dot(axis).abs() > r_aabb + r_obb
    };

    for axis in world_axes.iter().chain(obb_axes.iter()) {
        if separated(*axis) {
            return false;
        }
    }
    for a in &world_axes {
        for b in &obb_axes {
            if separated(a.cross(*b)) {
                return false;
            }
        }
    }
    true
}
