//! Stress Propagator: iterative support relaxation over the adjacency graph.
//!
//! Every shard carries a support value in `0..=1`. Unyielding shards and
//! shards that are declared as supporting another one are fixed sources with
//! full support. Every other shard combines the support offered by each
//! neighbor, weighted by where the neighbor sits (below carries the most,
//! above the least) and by the neighbor/own size ratio, attenuated per edge:
//!
//! ```text
//! offer(n)   = min(1, weight(dir) * min(ratio, cap) * decay * support(n))
//! support(i) = 1 - prod_n (1 - offer(n))
//! stress(i)  = 1 - support(i)
//! ```
//!
//! Every extra or bigger supporting neighbor shrinks the product, so stress
//! is monotonic in the way the collapse controller expects. Relaxation is a
//! Jacobi sweep repeated until the largest change drops below epsilon or the
//! iteration budget runs out; a [`StressRun`] can be stepped and cancelled
//! between sweeps.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::StressConfig;
use crate::constants::*;
use crate::context::CancelToken;
use crate::graph::ShardGraph;
use crate::logging::TimingSpan;
use crate::shard::{LoadDirection, NeighborLoad, Shard, ShardId};

/// Classify where `other` sits relative to `shard`
pub fn classify(shard: &Shard, other: &Shard) -> NeighborLoad {
    let bias = (shard.size + other.size) * 0.5 * DIRECTION_VERTICAL_BIAS;
    let dy = other.position.y - shard.position.y;
    let direction = if dy > bias {
        LoadDirection::Above
    } else if dy < -bias {
        LoadDirection::Below
    } else {
        LoadDirection::Side
    };
    let ratio = if shard.size > 0.0 {
        other.size / shard.size
    } else {
        1.0
    };
    NeighborLoad { direction, ratio }
}

fn direction_weight(direction: LoadDirection) -> f32 {
    match direction {
        LoadDirection::Below => SUPPORT_WEIGHT_BELOW,
        LoadDirection::Side => SUPPORT_WEIGHT_SIDE,
        LoadDirection::Above => SUPPORT_WEIGHT_ABOVE,
    }
}

/// Per-shard stress produced by a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StressField {
    pub stress: HashMap<ShardId, f32>,
    pub iterations: u32,
    pub converged: bool,
}

impl StressField {
    pub fn stress_of(&self, id: ShardId) -> Option<f32> {
        self.stress.get(&id).copied()
    }

    pub fn max_stress(&self) -> f32 {
        self.stress.values().copied().fold(0.0, f32::max)
    }

    /// Shards whose stress exceeds `threshold`
    pub fn over_threshold(&self, threshold: f32) -> HashSet<ShardId> {
        self.stress
            .iter()
            .filter(|(_, s)| **s > threshold)
            .map(|(id, _)| *id)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StressStatus {
    Running,
    Converged,
    Exhausted,
    Cancelled,
}

pub struct StressPropagator;

impl StressPropagator {
    /// Write direction and size ratio onto every edge
    pub fn prepare(graph: &mut ShardGraph) {
        let loads: Vec<(ShardId, Vec<Option<NeighborLoad>>)> = graph
            .iter()
            .map(|shard| {
                let loads = shard
                    .neighbors()
                    .iter()
                    .map(|n| graph.get(n.id).map(|other| classify(shard, other)))
                    .collect();
                (shard.id, loads)
            })
            .collect();
        for (id, loads) in loads {
            if let Some(shard) = graph.get_mut(id) {
                for (neighbor, load) in shard.neighbors_mut().iter_mut().zip(loads) {
                    neighbor.load = load;
                }
            }
        }
    }

    pub fn begin(graph: &ShardGraph, config: &StressConfig) -> StressRun {
        StressRun::new(graph, config)
    }

    /// Relax to completion
    pub fn run(graph: &ShardGraph, config: &StressConfig) -> StressField {
        let mut run = Self::begin(graph, config);
        while run.step(graph) == StressStatus::Running {}
        run.finish()
    }
}

/// One relaxation in progress
pub struct StressRun {
    order: Vec<ShardId>,
    index: HashMap<ShardId, usize>,
    fixed: Vec<bool>,
    support: Vec<f32>,
    iteration: u32,
    max_iterations: u32,
    epsilon: f32,
    status: StressStatus,
    cancel: CancelToken,
}

impl StressRun {
    fn new(graph: &ShardGraph, config: &StressConfig) -> Self {
        let order = graph.ids();
        let index: HashMap<ShardId, usize> =
            order.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let supporters: HashSet<ShardId> = graph
            .iter()
            .flat_map(|s| s.supported_by.iter().copied())
            .collect();
        let fixed: Vec<bool> = graph
            .iter()
            .map(|s| s.unyielding || supporters.contains(&s.id))
            .collect();
        let support = fixed.iter().map(|f| if *f { 1.0 } else { 0.0 }).collect();

        Self {
            order,
            index,
            fixed,
            support,
            iteration: 0,
            max_iterations: config.iterations.max(1),
            epsilon: config.epsilon,
            status: StressStatus::Running,
            cancel: CancelToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn status(&self) -> StressStatus {
        self.status
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    /// One Jacobi sweep. The graph must not change between steps.
    pub fn step(&mut self, graph: &ShardGraph) -> StressStatus {
        if self.status != StressStatus::Running {
            return self.status;
        }
        if self.cancel.is_cancelled() {
            self.status = StressStatus::Cancelled;
            return self.status;
        }

        let mut next = self.support.clone();
        let mut max_delta: f32 = 0.0;
        for (i, id) in self.order.iter().enumerate() {
            if self.fixed[i] {
                continue;
            }
            let Some(shard) = graph.get(*id) else {
                next[i] = 0.0;
                continue;
            };
            let mut unsupported = 1.0;
            for neighbor in shard.neighbors() {
                let Some(&j) = self.index.get(&neighbor.id) else {
                    continue;
                };
                let load = match neighbor.load {
                    Some(load) => load,
                    None => match graph.get(neighbor.id) {
                        Some(other) => classify(shard, other),
                        None => continue,
                    },
                };
                let offer = direction_weight(load.direction)
                    * load.ratio.min(STRESS_RATIO_CAP)
                    * STRESS_TRANSFER_DECAY
                    * self.support[j];
                unsupported *= 1.0 - offer.min(1.0);
            }
            // Manual declarations carry like a neighbor directly below
            for supporter in &shard.supported_by {
                if let Some(&j) = self.index.get(supporter) {
                    unsupported *= 1.0 - (SUPPORT_WEIGHT_BELOW * self.support[j]).min(1.0);
                }
            }
            next[i] = (1.0 - unsupported).clamp(0.0, 1.0);
            max_delta = max_delta.max((next[i] - self.support[i]).abs());
        }
        self.support = next;
        self.iteration += 1;

        if max_delta < self.epsilon {
            self.status = StressStatus::Converged;
        } else if self.iteration >= self.max_iterations {
            self.status = StressStatus::Exhausted;
        }
        self.status
    }

    pub fn finish(self) -> StressField {
        let _timing = TimingSpan::new("stress_finish");
        let stress = self
            .order
            .iter()
            .zip(&self.support)
            .map(|(id, support)| (*id, 1.0 - support))
            .collect();
        let field = StressField {
            stress,
            iterations: self.iteration,
            converged: self.status == StressStatus::Converged,
        };
        if field.converged {
            debug!(
                target: "destruction_core::stress",
                iterations = field.iterations,
                max = field.max_stress(),
                "stress converged"
            );
        } else {
            info!(
                target: "destruction_core::stress",
                iterations = field.iterations,
                status = ?self.status,
                "stress run ended before converging"
            );
        }
        field
    }
}
