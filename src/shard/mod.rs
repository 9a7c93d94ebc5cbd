//! Shard: one indivisible structural fragment tracked as a graph node.
//!
//! Shards carry their geometry (AABB, transform, size), the anchoring flags,
//! the simulation state the owning system should apply, and their adjacency.
//! Adjacency is an ordered list of [`Neighbor`] records so that the contact
//! area and the stress bookkeeping of an edge are always removed together.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cluster::ClusterId;
use crate::constants::BOUNDS_EXPAND;

/// Shard identifier, unique within its owning graph
pub type ShardId = u32;

/// Anchor zone identifier
pub type ZoneId = u32;

/// Opaque handle to a collider owned by the physics layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ColliderRef(pub u64);

/// Simulation state requested from the physics layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SimulationState {
    Static,
    Dynamic,
    Kinematic,
    #[default]
    Inactive,
    Sleeping,
}

impl SimulationState {
    /// States the connectivity monitor is allowed to release into free dynamics
    pub fn is_held(&self) -> bool {
        matches!(self, Self::Inactive | Self::Kinematic | Self::Static)
    }
}

// ============================================================================
// Bounds
// ============================================================================

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            min: Vec3::ZERO,
            max: Vec3::ZERO,
        }
    }
}

impl Bounds {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn from_center_size(center: Vec3, size: Vec3) -> Self {
        let half = size.abs() * 0.5;
        Self {
            min: center - half,
            max: center + half,
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn half_extents(&self) -> Vec3 {
        self.size() * 0.5
    }

    /// Grow every face outward by `amount` (total size grows by `amount` per axis)
    pub fn expanded(&self, amount: f32) -> Self {
        let half = Vec3::splat(amount * 0.5);
        Self {
            min: self.min - half,
            max: self.max + half,
        }
    }

    /// Inclusive intersection test (touching faces count)
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    pub fn union(&self, other: &Bounds) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Bound enclosing every box, `None` for an empty iterator
    pub fn enclosing<'a>(bounds: impl IntoIterator<Item = &'a Bounds>) -> Option<Bounds> {
        bounds.into_iter().fold(None, |acc, b| match acc {
            None => Some(*b),
            Some(a) => Some(a.union(b)),
        })
    }
}

// ============================================================================
// Adjacency
// ============================================================================

/// Where load arrives from, seen from the shard that owns the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadDirection {
    /// Neighbor sits above: the shard carries it
    Above,
    Side,
    /// Neighbor sits below: the shard rests on it
    Below,
}

/// Stress bookkeeping for one edge
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NeighborLoad {
    pub direction: LoadDirection,
    /// Neighbor size / own size (> 1 means the neighbor is bigger)
    pub ratio: f32,
}

/// One adjacency record: neighbor id, shared contact area and optional stress data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: ShardId,
    pub area: f32,
    pub load: Option<NeighborLoad>,
}

/// Triangle face summary used for mesh-based contact areas
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Face {
    pub area: f32,
    pub center: Vec3,
}

// ============================================================================
// Shard
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shard {
    pub id: ShardId,
    pub bounds: Bounds,
    pub position: Vec3,
    pub rotation: Quat,
    /// Bounding diagonal length
    pub size: f32,
    pub unyielding: bool,
    pub activatable: bool,
    pub simulation_state: SimulationState,
    pub use_gravity: bool,
    pub angular_velocity: Vec3,
    pub collider: Option<ColliderRef>,
    /// Physics layer index (0..32) used to build overlap masks
    pub layer: u8,
    /// Mesh faces, only needed while adjacency is being built
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub faces: Vec<Face>,
    pub(crate) neighbors: Vec<Neighbor>,
    pub(crate) initial_neighbor_count: Option<usize>,
    /// Shards explicitly declared as carrying this one
    pub supported_by: Vec<ShardId>,
    /// Anchor zones this shard overlaps (additive)
    pub anchor_zones: Vec<ZoneId>,
    pub(crate) cluster: Option<ClusterId>,
    #[serde(skip)]
    pub(crate) checked: bool,
}

impl Shard {
    /// Create a shard from its world bounds. The bounds are expanded slightly
    /// so that touching fragments intersect, and the size is measured after.
    pub fn new(id: ShardId, bounds: Bounds) -> Self {
        let bounds = bounds.expanded(BOUNDS_EXPAND);
        Self {
            id,
            position: bounds.center(),
            rotation: Quat::IDENTITY,
            size: bounds.size().length(),
            bounds,
            unyielding: false,
            activatable: false,
            simulation_state: SimulationState::Inactive,
            use_gravity: false,
            angular_velocity: Vec3::ZERO,
            collider: None,
            layer: 0,
            faces: Vec::new(),
            neighbors: Vec::new(),
            initial_neighbor_count: None,
            supported_by: Vec::new(),
            anchor_zones: Vec::new(),
            cluster: None,
            checked: false,
        }
    }

    /// Unit cube centered at `center` scaled by `size` on every axis
    pub fn cube(id: ShardId, center: Vec3, size: f32) -> Self {
        Self::new(id, Bounds::from_center_size(center, Vec3::splat(size)))
    }

    pub fn with_unyielding(mut self, unyielding: bool) -> Self {
        self.unyielding = unyielding;
        self
    }

    pub fn with_activatable(mut self, activatable: bool) -> Self {
        self.activatable = activatable;
        self
    }

    pub fn with_collider(mut self, collider: ColliderRef, layer: u8) -> Self {
        self.collider = Some(collider);
        self.layer = layer;
        self
    }

    pub fn with_faces(mut self, faces: Vec<Face>) -> Self {
        self.faces = faces;
        self
    }

    pub fn with_simulation_state(mut self, state: SimulationState) -> Self {
        self.simulation_state = state;
        self
    }

    pub fn neighbors(&self) -> &[Neighbor] {
        &self.neighbors
    }

    pub fn neighbor_ids(&self) -> impl Iterator<Item = ShardId> + '_ {
        self.neighbors.iter().map(|n| n.id)
    }

    pub fn neighbor_count(&self) -> usize {
        self.neighbors.len()
    }

    pub fn has_neighbor(&self, id: ShardId) -> bool {
        self.neighbors.iter().any(|n| n.id == id)
    }

    /// Contact area shared with `id`, if the edge exists
    pub fn area_with(&self, id: ShardId) -> Option<f32> {
        self.neighbors.iter().find(|n| n.id == id).map(|n| n.area)
    }

    pub fn initial_neighbor_count(&self) -> Option<usize> {
        self.initial_neighbor_count
    }

    /// Record the neighbor count once; later calls keep the first value
    pub(crate) fn record_initial_neighbors(&mut self) {
        if self.initial_neighbor_count.is_none() {
            self.initial_neighbor_count = Some(self.neighbors.len());
        }
    }

    /// Remaining neighbors as a fraction of the initial count (1.0 when unknown)
    pub fn integrity(&self) -> f32 {
        match self.initial_neighbor_count {
            Some(0) | None => 1.0,
            Some(initial) => self.neighbors.len() as f32 / initial as f32,
        }
    }

    pub fn cluster(&self) -> Option<ClusterId> {
        self.cluster
    }

    /// Unyielding without the activatable override: only a manual release moves it
    pub fn is_pinned(&self) -> bool {
        self.unyielding && !self.activatable
    }

    /// Stress bookkeeping is present on every remaining edge
    pub fn has_stress_data(&self) -> bool {
        !self.neighbors.is_empty() && self.neighbors.iter().all(|n| n.load.is_some())
    }

    pub(crate) fn push_neighbor(&mut self, id: ShardId, area: f32) {
        self.neighbors.push(Neighbor {
            id,
            area,
            load: None,
        });
    }

    /// Drop the edge to `id`, returning its area when it existed
    pub(crate) fn remove_neighbor(&mut self, id: ShardId) -> Option<f32> {
        let index = self.neighbors.iter().position(|n| n.id == id)?;
        Some(self.neighbors.remove(index).area)
    }

    pub(crate) fn neighbors_mut(&mut self) -> &mut Vec<Neighbor> {
        &mut self.neighbors
    }
}
