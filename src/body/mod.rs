//! Released bodies and the activation sink.
//!
//! Shards leaving a structure are grouped into a [`BodyKind`]: single shards,
//! manually released zone groups, connected clusters, or nested clusters that
//! carry their own graph and can be monitored again. Callers reach the common
//! behaviour through the [`ReleasedBody`] capability trait.

use std::sync::Arc;

use bevy::prelude::*;
use parking_lot::Mutex;
use rand::Rng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::cluster::ClusterId;
use crate::config::ActivationConfig;
use crate::graph::ShardGraph;
use crate::shard::{Bounds, Shard, ShardId, SimulationState, ZoneId};

/// Receives every shard handed to free dynamics. The receiver applies the
/// actual physics state (gravity, kinematic flag, collider convexity).
pub trait ActivationSink: Send + Sync {
    fn on_shard_activated(&mut self, shard: &Shard);

    /// Called once per released body after its shards were activated
    fn on_body_released(&mut self, _body: &BodyKind) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BodyTag {
    SingleMesh,
    MeshGroup,
    ConnectedCluster,
    NestedCluster,
}

#[derive(Debug, Clone)]
pub enum BodyKind {
    SingleMesh(Shard),
    /// Shards released together by a zone override
    MeshGroup { zone: Option<ZoneId>, shards: Vec<Shard> },
    /// A connected group released as one rigid body
    ConnectedCluster { cluster: ClusterId, shards: Vec<Shard> },
    /// A connected group that keeps its adjacency for further demolition
    NestedCluster { cluster: ClusterId, graph: ShardGraph },
}

/// Capabilities shared by every released body
pub trait ReleasedBody {
    fn tag(&self) -> BodyTag;
    fn shard_ids(&self) -> Vec<ShardId>;
    fn shard_count(&self) -> usize;
    fn bounds(&self) -> Option<Bounds>;
    /// Body can be handed to a new connectivity monitor
    fn is_demolishable(&self) -> bool;
}

impl BodyKind {
    fn for_each_shard(&self, mut f: impl FnMut(&Shard)) {
        match self {
            BodyKind::SingleMesh(shard) => f(shard),
            BodyKind::MeshGroup { shards, .. } | BodyKind::ConnectedCluster { shards, .. } => {
                shards.iter().for_each(f)
            }
            BodyKind::NestedCluster { graph, .. } => graph.iter().for_each(f),
        }
    }

    /// Graph of a nested cluster, ready to be monitored on its own
    pub fn into_graph(self) -> Option<(ClusterId, ShardGraph)> {
        match self {
            BodyKind::NestedCluster { cluster, graph } => Some((cluster, graph)),
            _ => None,
        }
    }
}

impl ReleasedBody for BodyKind {
    fn tag(&self) -> BodyTag {
        match self {
            BodyKind::SingleMesh(_) => BodyTag::SingleMesh,
            BodyKind::MeshGroup { .. } => BodyTag::MeshGroup,
            BodyKind::ConnectedCluster { .. } => BodyTag::ConnectedCluster,
            BodyKind::NestedCluster { .. } => BodyTag::NestedCluster,
        }
    }

    fn shard_ids(&self) -> Vec<ShardId> {
        let mut ids = Vec::new();
        self.for_each_shard(|s| ids.push(s.id));
        ids
    }

    fn shard_count(&self) -> usize {
        match self {
            BodyKind::SingleMesh(_) => 1,
            BodyKind::MeshGroup { shards, .. } | BodyKind::ConnectedCluster { shards, .. } => {
                shards.len()
            }
            BodyKind::NestedCluster { graph, .. } => graph.len(),
        }
    }

    fn bounds(&self) -> Option<Bounds> {
        let mut bounds: Option<Bounds> = None;
        self.for_each_shard(|s| {
            bounds = Some(match bounds {
                Some(b) => b.union(&s.bounds),
                None => s.bounds,
            });
        });
        bounds
    }

    fn is_demolishable(&self) -> bool {
        matches!(self, BodyKind::NestedCluster { .. })
    }
}

// ============================================================================
// Activation
// ============================================================================

/// Switch a shard to free dynamics. Pinned shards are skipped unless `force`
/// is set, and shards that are already dynamic are left alone.
/// Returns whether the shard changed state.
pub fn activate_shard(
    shard: &mut Shard,
    config: &ActivationConfig,
    rng: &mut Xoshiro256PlusPlus,
    force: bool,
) -> bool {
    if shard.is_pinned() && !force {
        return false;
    }
    if !shard.simulation_state.is_held() {
        return false;
    }
    shard.simulation_state = SimulationState::Dynamic;
    shard.use_gravity = true;
    if config.angular_nudge && shard.angular_velocity == Vec3::ZERO {
        let m = config.nudge_magnitude;
        shard.angular_velocity = Vec3::new(
            rng.gen_range(-1.0..=1.0) * m,
            rng.gen_range(-1.0..=1.0) * m,
            rng.gen_range(-1.0..=1.0) * m,
        );
    }
    trace!(target: "destruction_core::body", shard = shard.id, "activated");
    true
}

/// Sink that keeps everything it receives, for forwarding after a parallel tick
#[derive(Debug, Default)]
pub struct BufferedSink {
    pub shards: Vec<Shard>,
    pub bodies: Vec<BodyKind>,
}

impl BufferedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activated_ids(&self) -> Vec<ShardId> {
        self.shards.iter().map(|s| s.id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty() && self.bodies.is_empty()
    }

    /// Replay into `sink` in arrival order and clear the buffer
    pub fn drain_into(&mut self, sink: &mut dyn ActivationSink) {
        for shard in self.shards.drain(..) {
            sink.on_shard_activated(&shard);
        }
        for body in self.bodies.drain(..) {
            sink.on_body_released(&body);
        }
    }
}

impl ActivationSink for BufferedSink {
    fn on_shard_activated(&mut self, shard: &Shard) {
        self.shards.push(shard.clone());
    }

    fn on_body_released(&mut self, body: &BodyKind) {
        self.bodies.push(body.clone());
    }
}

/// Buffer shared between a forked context and whoever drains it afterwards
impl ActivationSink for Arc<Mutex<BufferedSink>> {
    fn on_shard_activated(&mut self, shard: &Shard) {
        self.lock().on_shard_activated(shard);
    }

    fn on_body_released(&mut self, body: &BodyKind) {
        self.lock().on_body_released(body);
    }
}
