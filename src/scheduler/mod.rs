//! Structure scheduler: one tick advances every structure.
//!
//! Destruction events may arrive from any thread at any time; they land in a
//! shared [`EventQueue`] and are applied only at the start of the next tick.
//! Structures never share shards, so they are ticked in parallel, each with a
//! forked context writing into its own buffer. Buffers are then replayed into
//! the owning context's sink in structure order, which keeps the activation
//! stream deterministic.

use std::sync::Arc;

use bevy::prelude::Resource;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::anchor::{BoundsOverlapQuery, OverlapQuery};
use crate::body::{ActivationSink, BodyKind, BufferedSink, ReleasedBody};
use crate::cluster::ClusterId;
use crate::collapse::CollapseController;
use crate::config::{ConnectivityConfig, StartTrigger};
use crate::context::SimulationContext;
use crate::error::Result;
use crate::monitor::{ConnectivityMonitor, GraphMutation, TickReport};
use crate::shard::ShardId;
use crate::stress::{StressField, StressPropagator, StressStatus};

/// Structures are addressed by the id of their root cluster
pub type StructureId = ClusterId;

// ============================================================================
// Event queue
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestructionEvent {
    pub structure: StructureId,
    pub mutation: GraphMutation,
}

/// Thread-safe buffer of destruction events awaiting the next tick
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    inner: Arc<Mutex<Vec<DestructionEvent>>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: DestructionEvent) {
        self.inner.lock().push(event);
    }

    pub fn shard_removed(&self, structure: StructureId, shard: ShardId) {
        self.push(DestructionEvent {
            structure,
            mutation: GraphMutation::RemoveShard(shard),
        });
    }

    pub fn edge_removed(&self, structure: StructureId, a: ShardId, b: ShardId) {
        self.push(DestructionEvent {
            structure,
            mutation: GraphMutation::RemoveEdge(a, b),
        });
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn drain(&self) -> Vec<DestructionEvent> {
        std::mem::take(&mut *self.inner.lock())
    }
}

// ============================================================================
// Structure
// ============================================================================

/// A monitored structure with its collapse and stress drivers
pub struct Structure {
    pub monitor: ConnectivityMonitor,
    pub collapse: CollapseController,
    stress: Option<StressField>,
    stress_started: bool,
    collapse_started: bool,
    ticks: u64,
}

impl Structure {
    pub fn new(monitor: ConnectivityMonitor, config: &ConnectivityConfig) -> Self {
        Self {
            monitor,
            collapse: CollapseController::new(&config.collapse, config.seed, config.stress.threshold),
            stress: None,
            stress_started: false,
            collapse_started: false,
            ticks: 0,
        }
    }

    pub fn id(&self) -> StructureId {
        self.monitor.cluster_id()
    }

    /// Stress from the latest completed run
    pub fn stress(&self) -> Option<&StressField> {
        self.stress.as_ref()
    }

    /// Manual collapse start
    pub fn start_collapse(&mut self) {
        self.collapse.start(&self.monitor);
        self.collapse_started = true;
    }

    /// Manual stress run, completed immediately
    pub fn run_stress(&mut self, ctx: &SimulationContext) -> Option<&StressField> {
        self.stress_started = true;
        self.relax(ctx);
        self.stress.as_ref()
    }

    fn relax(&mut self, ctx: &SimulationContext) {
        StressPropagator::prepare(self.monitor.graph_mut());
        let graph = self.monitor.graph();
        let mut run = StressPropagator::begin(graph, &ctx.config.stress);
        while run.step(graph) == StressStatus::Running {}
        self.stress = Some(run.finish());
    }

    fn fire_triggers(&mut self, ctx: &SimulationContext) {
        let first = self.ticks == 0;
        let integrity = self.monitor.integrity();
        let config = &ctx.config;

        let collapse_due = match config.collapse.trigger {
            StartTrigger::Manual => false,
            StartTrigger::AtStart => first,
            StartTrigger::ByIntegrity => integrity < config.collapse.integrity_threshold,
        };
        if collapse_due && !self.collapse_started {
            self.start_collapse();
        }

        if config.stress.enable && !self.stress_started {
            let stress_due = match config.stress.trigger {
                StartTrigger::Manual => false,
                StartTrigger::AtStart => first,
                StartTrigger::ByIntegrity => integrity < config.stress.integrity_threshold,
            };
            self.stress_started = stress_due;
        }
    }

    /// Triggers, stress relaxation, collapse step, then the monitor cycle
    pub fn tick(&mut self, ctx: &mut SimulationContext) -> Result<TickReport> {
        if self.monitor.is_dissolved() {
            return Ok(TickReport::default());
        }
        self.fire_triggers(ctx);

        if self.stress_started {
            self.relax(ctx);
        }

        let mut collapsed = 0;
        if self.collapse.in_progress() && !self.monitor.is_busy() {
            collapsed = self.collapse.advance(&mut self.monitor, self.stress.as_ref())?;
        }

        let mut report = self.monitor.tick(ctx)?;
        report.collapsed_edges = collapsed;
        report.stress_iterations = self.stress.as_ref().map(|s| s.iterations).unwrap_or(0);
        if report.dissolved {
            self.collapse.stop();
        }
        self.ticks += 1;
        Ok(report)
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Outcome of one scheduler tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchedulerReport {
    pub activated: Vec<(StructureId, ShardId)>,
    pub dissolved: Vec<StructureId>,
    pub spawned: Vec<StructureId>,
    pub collapsed_edges: usize,
}

#[derive(Resource)]
pub struct StructureScheduler {
    pub ctx: SimulationContext,
    structures: Vec<Structure>,
    events: EventQueue,
}

impl StructureScheduler {
    pub fn new(ctx: SimulationContext) -> Self {
        Self {
            ctx,
            structures: Vec::new(),
            events: EventQueue::new(),
        }
    }

    /// Handle for producers outside the tick
    pub fn events(&self) -> EventQueue {
        self.events.clone()
    }

    pub fn add(&mut self, monitor: ConnectivityMonitor) -> StructureId {
        let structure = Structure::new(monitor, &self.ctx.config);
        let id = structure.id();
        self.structures.push(structure);
        id
    }

    pub fn get(&self, id: StructureId) -> Option<&Structure> {
        self.structures.iter().find(|s| s.id() == id)
    }

    pub fn get_mut(&mut self, id: StructureId) -> Option<&mut Structure> {
        self.structures.iter_mut().find(|s| s.id() == id)
    }

    pub fn ids(&self) -> Vec<StructureId> {
        self.structures.iter().map(|s| s.id()).collect()
    }

    pub fn len(&self) -> usize {
        self.structures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }

    /// Apply buffered events, tick every structure in parallel, forward
    /// activations in structure order and adopt released nested clusters.
    pub fn tick(&mut self) -> Result<SchedulerReport> {
        for event in self.events.drain() {
            match self.get_mut(event.structure) {
                Some(structure) => {
                    structure.monitor.submit(event.mutation);
                }
                None => debug!(
                    target: "destruction_core::scheduler",
                    structure = event.structure,
                    "event for unknown structure dropped"
                ),
            }
        }

        let buffers: Vec<Arc<Mutex<BufferedSink>>> = self
            .structures
            .iter()
            .map(|_| Arc::new(Mutex::new(BufferedSink::new())))
            .collect();
        let mut forks = self.ctx.fork_all(buffers.iter().map(|buffer| {
            (
                Box::new(BoundsOverlapQuery::new()) as Box<dyn OverlapQuery>,
                Box::new(buffer.clone()) as Box<dyn ActivationSink>,
            )
        }))?;

        let results: Vec<Result<TickReport>> = self
            .structures
            .par_iter_mut()
            .zip(forks.par_iter_mut())
            .map(|(structure, ctx)| structure.tick(ctx))
            .collect();
        self.ctx.join(&forks)?;

        let mut report = SchedulerReport::default();
        let mut first_error = None;
        let mut nested = Vec::new();
        for ((structure, buffer), result) in self.structures.iter_mut().zip(&buffers).zip(results) {
            let id = structure.id();
            buffer.lock().drain_into(self.ctx.sink.as_mut());
            match result {
                Ok(tick) => {
                    report.activated.extend(tick.activated.iter().map(|s| (id, *s)));
                    report.collapsed_edges += tick.collapsed_edges;
                    if tick.dissolved {
                        report.dissolved.push(id);
                    }
                }
                Err(error) => {
                    first_error.get_or_insert(error);
                }
            }
            nested.extend(
                structure
                    .monitor
                    .take_released()
                    .into_iter()
                    .filter(|body| body.is_demolishable()),
            );
        }

        self.structures.retain(|s| !s.monitor.is_dissolved());
        for body in nested {
            if let Some(id) = self.adopt(body) {
                report.spawned.push(id);
            }
        }

        if !report.dissolved.is_empty() || !report.spawned.is_empty() {
            info!(
                target: "destruction_core::scheduler",
                dissolved = report.dissolved.len(),
                spawned = report.spawned.len(),
                remaining = self.structures.len(),
                "structures changed"
            );
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(report),
        }
    }

    /// Monitor a released nested cluster as a structure of its own
    fn adopt(&mut self, body: BodyKind) -> Option<StructureId> {
        let (cluster, graph) = body.into_graph()?;
        let monitor = ConnectivityMonitor::with_cluster_id(graph, cluster, &self.ctx);
        Some(self.add(monitor))
    }
}
