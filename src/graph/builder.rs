//! Adjacency construction from shard geometry.
//!
//! Candidate pairs come from a sweep over the x axis of the (already
//! expanded) shard bounds; each overlapping pair is scored by the configured
//! connectivity type and filtered by size, area and the pair-keyed discard.
//! Edges are connected in insertion order of the lower shard so neighbor
//! lists are reproducible.

use crate::config::{ConnectivityConfig, ConnectivityType};
use crate::constants::{BOUNDING_AREA_DIVISOR, FACE_AREA_TOLERANCE, FACE_POSITION_TOLERANCE};
use crate::graph::discard::PairDiscard;
use crate::graph::ShardGraph;
use crate::shard::Shard;

#[derive(Debug, Clone, Copy)]
pub struct AdjacencyBuilder {
    pub connectivity: ConnectivityType,
    pub minimum_area: f32,
    pub minimum_size: f32,
    pub discard: PairDiscard,
}

impl AdjacencyBuilder {
    pub fn from_config(config: &ConnectivityConfig) -> Self {
        Self {
            connectivity: config.connectivity,
            minimum_area: config.minimum_area,
            minimum_size: config.minimum_size,
            discard: PairDiscard::new(config.seed, config.discard_percentage),
        }
    }

    /// Contact area between two shards under the configured connectivity type.
    /// Zero means "not connected".
    pub fn contact_area(&self, a: &Shard, b: &Shard) -> f32 {
        match self.connectivity {
            ConnectivityType::BoundingBox => bounding_area(a, b),
            ConnectivityType::Mesh => shared_face_area(a, b),
            ConnectivityType::BoundingBoxAndMesh => {
                if a.faces.is_empty() || b.faces.is_empty() {
                    bounding_area(a, b)
                } else {
                    shared_face_area(a, b)
                }
            }
        }
    }

    /// Connect every qualifying pair and record initial neighbor counts.
    /// Returns the number of edges added.
    pub fn build(&self, graph: &mut ShardGraph) -> usize {
        let shards: Vec<&Shard> = graph
            .iter()
            .filter(|s| s.size >= self.minimum_size)
            .collect();

        // Sweep: sort by min.x, compare while the next box starts before this one ends
        let mut order: Vec<usize> = (0..shards.len()).collect();
        order.sort_by(|&i, &j| shards[i].bounds.min.x.total_cmp(&shards[j].bounds.min.x));

        let mut pairs: Vec<(usize, usize, f32)> = Vec::new();
        for (k, &i) in order.iter().enumerate() {
            let a = shards[i];
            for &j in &order[k + 1..] {
                let b = shards[j];
                if b.bounds.min.x > a.bounds.max.x {
                    break;
                }
                if !a.bounds.intersects(&b.bounds) {
                    continue;
                }
                let area = self.contact_area(a, b);
                if area <= 0.0 || area < self.minimum_area {
                    continue;
                }
                if self.discard.discards(a.id, b.id) {
                    continue;
                }
                pairs.push((i.min(j), i.max(j), area));
            }
        }
        pairs.sort_by(|x, y| (x.0, x.1).cmp(&(y.0, y.1)));

        let ids: Vec<(u32, u32, f32)> = pairs
            .iter()
            .map(|&(i, j, area)| (shards[i].id, shards[j].id, area))
            .collect();

        let mut added = 0;
        for (a, b, area) in ids {
            if graph.connect(a, b, area) {
                added += 1;
            }
        }
        graph.record_initial_neighbors();
        tracing::debug!(
            target: "destruction_core::graph",
            shards = graph.len(),
            edges = added,
            mode = ?self.connectivity,
            "adjacency built"
        );
        added
    }
}

/// Rough contact estimate from the two bounding diagonals
pub fn bounding_area(a: &Shard, b: &Shard) -> f32 {
    (a.size + b.size) / BOUNDING_AREA_DIVISOR
}

/// Sum of the areas of faces of `a` that coincide with a face of `b`
pub fn shared_face_area(a: &Shard, b: &Shard) -> f32 {
    let mut area = 0.0;
    for face in &a.faces {
        let matched = b.faces.iter().any(|other| {
            (face.area - other.area).abs() < FACE_AREA_TOLERANCE
                && face.center.distance(other.center) < FACE_POSITION_TOLERANCE
        });
        if matched {
            area += face.area;
        }
    }
    area
}
