//! Connectivity Monitor: per-structure state machine.
//!
//! ```text
//! Stable -> DirtyMembers -> CheckRequested -> Activating -> Stable
//!                                                       \-> Dissolved
//! ```
//!
//! Removal notifications only record ids; the graph is touched when the
//! monitor purges them. A check sets aside solo shards, partitions the root
//! cluster, merges anchored children back and condemns the rest. Activation
//! releases condemned groups as bodies through the context's sink.
//!
//! Each call to [`ConnectivityMonitor::step`] advances exactly one phase so a
//! scheduler may yield between purge and partition. While a check is in
//! flight the monitor is busy: graph mutations are queued and applied once the
//! cycle completes.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::anchor::{AnchorResolver, AnchorZone};
use crate::body::{activate_shard, BodyKind, ReleasedBody};
use crate::cluster::{Cluster, ClusterId, ClusterPartitioner};
use crate::config::ConsistencyPolicy;
use crate::context::SimulationContext;
use crate::error::{ConnectivityError, Result};
use crate::graph::builder::AdjacencyBuilder;
use crate::graph::ShardGraph;
use crate::logging::TimingSpan;
use crate::shard::{Shard, ShardId, ZoneId};

/// Upper bound on phases advanced by one `tick`
const MAX_PHASES_PER_TICK: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MonitorState {
    Stable,
    DirtyMembers,
    CheckRequested,
    Activating,
    Dissolved,
}

/// Graph mutation requested from outside a check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphMutation {
    RemoveShard(ShardId),
    RemoveEdge(ShardId, ShardId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    Applied,
    /// Monitor is busy; applied when the current check completes
    Queued,
    /// Monitor is dissolved or the target does not exist
    Ignored,
}

/// What one `tick` did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    pub purged: Vec<ShardId>,
    pub activated: Vec<ShardId>,
    pub bodies_released: usize,
    pub dissolved: bool,
    /// Filled in by the scheduler when a collapse run is active
    pub collapsed_edges: usize,
    pub stress_iterations: u32,
}

/// Serializable view of a structure for the owning system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureReport {
    pub cluster: ClusterId,
    pub state: MonitorState,
    pub members: Vec<ShardId>,
    pub children: Vec<Vec<ShardId>>,
    pub shard_count: usize,
    pub edge_count: usize,
    pub initial_shard_count: usize,
    /// Percentage of the initial shard count still in the structure
    pub integrity: f32,
    pub busy: bool,
    pub pending_mutations: usize,
}

impl StructureReport {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

pub struct ConnectivityMonitor {
    graph: ShardGraph,
    root: Cluster,
    zones: Vec<AnchorZone>,
    state: MonitorState,
    busy: bool,
    recheck: bool,
    dirty: Vec<ShardId>,
    pending: Vec<GraphMutation>,
    solo: Vec<ShardId>,
    condemned: Vec<Cluster>,
    released: Vec<BodyKind>,
    initial_shard_count: usize,
    report: TickReport,
}

impl ConnectivityMonitor {
    /// Monitor an already connected graph. Every shard joins the root cluster.
    pub fn new(graph: ShardGraph, ctx: &mut SimulationContext) -> Result<Self> {
        let id = ctx.ids.next_cluster()?;
        Ok(Self::with_cluster_id(graph, id, ctx))
    }

    /// Like [`Self::new`] with a root id chosen by the caller, e.g. the id a
    /// nested cluster was released under.
    pub fn with_cluster_id(mut graph: ShardGraph, id: ClusterId, ctx: &SimulationContext) -> Self {
        graph.record_initial_neighbors();
        let mut root = Cluster::new(id, graph.ids());
        root.demolishable = ctx.config.demolishable;
        root.initialized = true;
        root.assign_ownership(&mut graph);
        root.recompute_bound(&graph);

        Self {
            initial_shard_count: graph.len(),
            graph,
            root,
            zones: Vec::new(),
            state: MonitorState::Stable,
            busy: false,
            recheck: false,
            dirty: Vec::new(),
            pending: Vec::new(),
            solo: Vec::new(),
            condemned: Vec::new(),
            released: Vec::new(),
            report: TickReport::default(),
        }
    }

    /// Full setup: build adjacency from the context's configuration, resolve
    /// anchor zones through the context's overlap query, then request a check
    /// so parts that are disconnected from the start fall on the first tick.
    pub fn from_shards(
        shards: impl IntoIterator<Item = Shard>,
        zones: Vec<AnchorZone>,
        ctx: &mut SimulationContext,
    ) -> Result<Self> {
        let mut graph = ShardGraph::from_shards(shards)?;
        AdjacencyBuilder::from_config(&ctx.config).build(&mut graph);
        AnchorResolver::resolve(&mut graph, &zones, ctx.overlap.as_ref());
        let mut monitor = Self::new(graph, ctx)?;
        monitor.zones = zones;
        monitor.request_check();
        info!(
            target: "destruction_core::monitor",
            cluster = monitor.root.id,
            shards = monitor.graph.len(),
            edges = monitor.graph.edge_count(),
            "structure initialized"
        );
        Ok(monitor)
    }

    pub fn with_zones(mut self, zones: Vec<AnchorZone>) -> Self {
        self.zones = zones;
        self
    }

    pub fn graph(&self) -> &ShardGraph {
        &self.graph
    }

    pub(crate) fn graph_mut(&mut self) -> &mut ShardGraph {
        &mut self.graph
    }

    pub fn root(&self) -> &Cluster {
        &self.root
    }

    pub fn cluster_id(&self) -> ClusterId {
        self.root.id
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn is_dissolved(&self) -> bool {
        self.state == MonitorState::Dissolved
    }

    pub fn zones(&self) -> &[AnchorZone] {
        &self.zones
    }

    pub fn pending_mutations(&self) -> &[GraphMutation] {
        &self.pending
    }

    /// Solo shards set aside by the last check and not yet released
    pub fn solo_shards(&self) -> &[ShardId] {
        &self.solo
    }

    /// Child clusters condemned by the last check and not yet released
    pub fn condemned(&self) -> &[Cluster] {
        &self.condemned
    }

    pub fn initial_shard_count(&self) -> usize {
        self.initial_shard_count
    }

    /// Current shards as a percentage of the initial count
    pub fn integrity(&self) -> f32 {
        if self.initial_shard_count == 0 {
            return 100.0;
        }
        self.graph.len() as f32 / self.initial_shard_count as f32 * 100.0
    }

    /// Bodies released since the last call
    pub fn take_released(&mut self) -> Vec<BodyKind> {
        std::mem::take(&mut self.released)
    }

    // ========================================================================
    // Inputs
    // ========================================================================

    /// A shard's backing object was destroyed. Purged on the next step.
    pub fn notify_removed(&mut self, id: ShardId) {
        if self.is_dissolved() || !self.graph.contains(id) || self.dirty.contains(&id) {
            return;
        }
        self.dirty.push(id);
        if !self.busy && matches!(self.state, MonitorState::Stable | MonitorState::CheckRequested) {
            self.transition(MonitorState::DirtyMembers);
        }
    }

    /// Ask for a re-partition. Coalesces with any check already pending.
    pub fn request_check(&mut self) {
        match self.state {
            MonitorState::Stable => self.transition(MonitorState::CheckRequested),
            MonitorState::Activating => self.recheck = true,
            MonitorState::CheckRequested if self.busy => self.recheck = true,
            _ => {}
        }
    }

    /// Apply a mutation now, or queue it while a check is in flight
    pub fn submit(&mut self, mutation: GraphMutation) -> MutationOutcome {
        if self.is_dissolved() {
            return MutationOutcome::Ignored;
        }
        if self.busy {
            debug!(
                target: "destruction_core::monitor",
                cluster = self.root.id,
                ?mutation,
                "queued while busy"
            );
            self.pending.push(mutation);
            return MutationOutcome::Queued;
        }
        self.apply(mutation)
    }

    fn apply(&mut self, mutation: GraphMutation) -> MutationOutcome {
        match mutation {
            GraphMutation::RemoveShard(id) => {
                if !self.graph.contains(id) {
                    return MutationOutcome::Ignored;
                }
                self.notify_removed(id);
                MutationOutcome::Applied
            }
            GraphMutation::RemoveEdge(a, b) => {
                if self.graph.disconnect(a, b).is_none() {
                    return MutationOutcome::Ignored;
                }
                self.request_check();
                MutationOutcome::Applied
            }
        }
    }

    /// Symmetric edge removal for in-tick collaborators (collapse).
    /// Refused while a check is in flight.
    pub fn remove_edge(&mut self, a: ShardId, b: ShardId) -> Result<Option<f32>> {
        if self.busy {
            return Err(ConnectivityError::ClusterBusy(self.root.id));
        }
        let area = self.graph.disconnect(a, b);
        if area.is_some() {
            self.request_check();
        }
        Ok(area)
    }

    // ========================================================================
    // State machine
    // ========================================================================

    /// Advance until the monitor settles (Stable or Dissolved)
    pub fn tick(&mut self, ctx: &mut SimulationContext) -> Result<TickReport> {
        self.report = TickReport::default();
        for _ in 0..MAX_PHASES_PER_TICK {
            if matches!(self.state, MonitorState::Stable | MonitorState::Dissolved) {
                break;
            }
            self.step(ctx)?;
        }
        Ok(std::mem::take(&mut self.report))
    }

    /// Advance exactly one phase and return the new state
    pub fn step(&mut self, ctx: &mut SimulationContext) -> Result<MonitorState> {
        match self.state {
            MonitorState::Stable | MonitorState::Dissolved => {}
            MonitorState::DirtyMembers => self.purge(),
            MonitorState::CheckRequested => self.check(ctx)?,
            MonitorState::Activating => self.activate(ctx)?,
        }
        Ok(self.state)
    }

    fn transition(&mut self, next: MonitorState) {
        if self.state != next {
            debug!(
                target: "destruction_core::monitor",
                cluster = self.root.id,
                from = ?self.state,
                to = ?next,
                "transition"
            );
            self.state = next;
        }
    }

    /// DirtyMembers: drop destroyed shards with their back-edges
    fn purge(&mut self) {
        self.busy = true;
        let dirty: HashSet<ShardId> = self.dirty.drain(..).collect();
        for &id in &dirty {
            if self.graph.remove_shard(id).is_some() {
                self.report.purged.push(id);
            }
        }
        self.root.retain_members(|id| !dirty.contains(&id));
        self.graph.prune_dangling();
        self.transition(MonitorState::CheckRequested);
    }

    /// CheckRequested: solo shards, partition, merge anchored children back
    fn check(&mut self, ctx: &mut SimulationContext) -> Result<()> {
        let _timing = TimingSpan::new("connectivity_check");
        self.busy = true;
        self.recheck = false;

        if let Err(error) = self.root.verify_ownership(&self.graph) {
            match ctx.config.consistency {
                ConsistencyPolicy::Strict => {
                    self.busy = false;
                    return Err(error);
                }
                ConsistencyPolicy::Heal => {
                    warn!(target: "destruction_core::monitor", %error, "healing ownership");
                    self.root.heal_ownership(&mut self.graph);
                }
            }
        }

        let solo = ClusterPartitioner::solo_shards(&self.graph, self.root.members());
        if !solo.is_empty() {
            let set: HashSet<ShardId> = solo.iter().copied().collect();
            self.root.retain_members(|id| !set.contains(&id));
            for &id in &solo {
                if let Some(shard) = self.graph.get_mut(id) {
                    shard.cluster = None;
                }
            }
        }
        self.solo = solo;

        if let Err(error) = ClusterPartitioner::partition(&mut self.graph, &mut self.root, &mut ctx.ids) {
            self.busy = false;
            return Err(error);
        }

        let children = std::mem::take(&mut self.root.children);
        for child in children {
            if child.has_unyielding(&self.graph) {
                self.root.members_mut().extend_from_slice(child.members());
            } else {
                self.condemned.push(child);
            }
        }
        self.root.assign_ownership(&mut self.graph);
        self.root.recompute_bound(&self.graph);

        debug!(
            target: "destruction_core::monitor",
            cluster = self.root.id,
            solo = self.solo.len(),
            condemned = self.condemned.len(),
            kept = self.root.len(),
            "check complete"
        );
        self.transition(MonitorState::Activating);
        Ok(())
    }

    /// Activating: release solo shards and condemned groups, then settle
    fn activate(&mut self, ctx: &mut SimulationContext) -> Result<()> {
        for id in std::mem::take(&mut self.solo) {
            let mut extracted = self.graph.extract(&[id]);
            if let Some(shard) = extracted.remove_shard(id) {
                self.release(BodyKind::SingleMesh(shard), ctx);
            }
        }

        for child in std::mem::take(&mut self.condemned) {
            self.release_condemned(child, ctx)?;
        }

        self.busy = false;
        if self.root.is_empty() && self.graph.is_empty() {
            info!(
                target: "destruction_core::monitor",
                cluster = self.root.id,
                "structure dissolved"
            );
            self.pending.clear();
            self.dirty.clear();
            self.report.dissolved = true;
            self.transition(MonitorState::Dissolved);
            return Ok(());
        }

        self.transition(MonitorState::Stable);
        for mutation in std::mem::take(&mut self.pending) {
            self.apply(mutation);
        }
        if !self.dirty.is_empty() {
            self.transition(MonitorState::DirtyMembers);
        } else if self.recheck {
            self.recheck = false;
            self.transition(MonitorState::CheckRequested);
        }
        Ok(())
    }

    /// Split a condemned child into its true components and release each one
    fn release_condemned(&mut self, child: Cluster, ctx: &mut SimulationContext) -> Result<()> {
        let components = ClusterPartitioner::components(&mut self.graph, child.members());
        for (index, component) in components.into_iter().enumerate() {
            let mut extracted = self.graph.extract(&component);
            if component.len() == 1 || !ctx.config.clusterize {
                for id in component {
                    if let Some(shard) = extracted.remove_shard(id) {
                        self.release(BodyKind::SingleMesh(shard), ctx);
                    }
                }
                continue;
            }
            let cluster = if index == 0 {
                child.id
            } else {
                ctx.ids.next_cluster()?
            };
            let body = if child.demolishable {
                BodyKind::NestedCluster {
                    cluster,
                    graph: extracted,
                }
            } else {
                let shards = component
                    .iter()
                    .filter_map(|id| extracted.get(*id).cloned())
                    .collect();
                BodyKind::ConnectedCluster { cluster, shards }
            };
            self.release(body, ctx);
        }
        Ok(())
    }

    /// Activate every shard of `body`, notify the sink and keep the body
    fn release(&mut self, mut body: BodyKind, ctx: &mut SimulationContext) {
        self.release_with(&mut body, ctx, false);
        self.released.push(body);
    }

    fn release_with(&mut self, body: &mut BodyKind, ctx: &mut SimulationContext, force: bool) {
        let activation = ctx.config.activation.clone();
        let mut activated = Vec::new();
        let mut visit = |shard: &mut Shard| {
            if activate_shard(shard, &activation, &mut ctx.rng, force) {
                ctx.sink.on_shard_activated(shard);
                activated.push(shard.id);
            }
        };
        match body {
            BodyKind::SingleMesh(shard) => visit(shard),
            BodyKind::MeshGroup { shards, .. } | BodyKind::ConnectedCluster { shards, .. } => {
                shards.iter_mut().for_each(&mut visit)
            }
            BodyKind::NestedCluster { graph, .. } => graph.iter_mut().for_each(&mut visit),
        }
        ctx.sink.on_body_released(body);
        debug!(
            target: "destruction_core::monitor",
            cluster = self.root.id,
            kind = ?body.tag(),
            shards = body.shard_count(),
            "body released"
        );
        self.report.activated.extend(activated);
        self.report.bodies_released += 1;
    }

    // ========================================================================
    // Manual overrides
    // ========================================================================

    /// Release every activatable shard anchored by `zone` as one mesh group
    pub fn release_zone(&mut self, zone: ZoneId, ctx: &mut SimulationContext) -> Result<Vec<ShardId>> {
        if self.busy {
            return Err(ConnectivityError::ClusterBusy(self.root.id));
        }
        let members = AnchorResolver::zone_shards(&self.graph, zone);
        if members.is_empty() && !self.zones.iter().any(|z| z.id == zone) {
            return Err(ConnectivityError::UnknownZone(zone));
        }
        let ids: Vec<ShardId> = members
            .into_iter()
            .filter(|id| self.graph.get(*id).map(|s| s.activatable).unwrap_or(false))
            .collect();
        if ids.is_empty() {
            return Ok(ids);
        }

        let mut extracted = self.graph.extract(&ids);
        let set: HashSet<ShardId> = ids.iter().copied().collect();
        self.root.retain_members(|id| !set.contains(&id));
        let shards = ids.iter().filter_map(|id| extracted.remove_shard(*id)).collect();
        let mut body = BodyKind::MeshGroup {
            zone: Some(zone),
            shards,
        };
        self.release_with(&mut body, ctx, true);
        self.released.push(body);

        info!(
            target: "destruction_core::monitor",
            cluster = self.root.id,
            zone,
            shards = ids.len(),
            "zone released"
        );
        self.request_check();
        Ok(ids)
    }

    /// Manual override: release one shard regardless of its anchoring
    pub fn force_release(&mut self, id: ShardId, ctx: &mut SimulationContext) -> Result<()> {
        if self.busy {
            return Err(ConnectivityError::ClusterBusy(self.root.id));
        }
        if !self.graph.contains(id) {
            return Err(ConnectivityError::UnknownShard(id));
        }
        let mut extracted = self.graph.extract(&[id]);
        self.root.retain_members(|member| member != id);
        if let Some(shard) = extracted.remove_shard(id) {
            let mut body = BodyKind::SingleMesh(shard);
            self.release_with(&mut body, ctx, true);
            self.released.push(body);
        }
        self.request_check();
        Ok(())
    }

    pub fn snapshot(&self) -> StructureReport {
        StructureReport {
            cluster: self.root.id,
            state: self.state,
            members: self.root.members().to_vec(),
            children: self
                .condemned
                .iter()
                .map(|c| c.members().to_vec())
                .collect(),
            shard_count: self.graph.len(),
            edge_count: self.graph.edge_count(),
            initial_shard_count: self.initial_shard_count,
            integrity: self.integrity(),
            busy: self.busy,
            pending_mutations: self.pending.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::ActivationSink;
    use crate::config::ConnectivityConfig;
    use bevy::prelude::Vec3;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn ctx() -> SimulationContext {
        let mut config = ConnectivityConfig::default();
        config.consistency = ConsistencyPolicy::Strict;
        SimulationContext::headless(config)
    }

    fn chain(n: u32, anchor: Option<ShardId>, ctx: &mut SimulationContext) -> ConnectivityMonitor {
        let mut graph =
            ShardGraph::from_shards((0..n).map(|i| Shard::cube(i, Vec3::X * i as f32, 1.0)))
                .unwrap();
        for i in 1..n {
            graph.connect(i - 1, i, 1.0);
        }
        if let Some(id) = anchor {
            graph.get_mut(id).unwrap().unyielding = true;
        }
        ConnectivityMonitor::new(graph, ctx).unwrap()
    }

    #[test]
    fn test_cut_chain_releases_tail() {
        let mut ctx = ctx();
        let mut monitor = chain(5, Some(0), &mut ctx);
        assert_eq!(monitor.submit(GraphMutation::RemoveEdge(1, 2)), MutationOutcome::Applied);
        assert_eq!(monitor.state(), MonitorState::CheckRequested);

        let report = monitor.tick(&mut ctx).unwrap();
        assert_eq!(monitor.state(), MonitorState::Stable);
        assert_eq!(monitor.root().members(), &[0, 1]);
        assert_eq!(report.activated, vec![2, 3, 4]);
        assert_eq!(report.bodies_released, 1);
        let bodies = monitor.take_released();
        assert!(matches!(&bodies[0], BodyKind::ConnectedCluster { shards, .. } if shards.len() == 3));
        assert_eq!(monitor.graph().len(), 2);
    }

    #[test]
    fn test_phases_step_one_at_a_time() {
        let mut ctx = ctx();
        let mut monitor = chain(3, Some(0), &mut ctx);
        monitor.notify_removed(1);
        assert_eq!(monitor.state(), MonitorState::DirtyMembers);
        assert_eq!(monitor.step(&mut ctx).unwrap(), MonitorState::CheckRequested);
        assert!(monitor.is_busy());
        assert_eq!(monitor.step(&mut ctx).unwrap(), MonitorState::Activating);
        assert_eq!(monitor.solo_shards(), &[2]);
        assert_eq!(monitor.step(&mut ctx).unwrap(), MonitorState::Stable);
        assert!(!monitor.is_busy());
        assert_eq!(monitor.root().members(), &[0]);
    }

    #[test]
    fn test_mutations_queue_while_busy() {
        let mut ctx = ctx();
        let mut monitor = chain(4, Some(0), &mut ctx);
        monitor.notify_removed(3);
        monitor.step(&mut ctx).unwrap();
        assert_eq!(monitor.submit(GraphMutation::RemoveEdge(0, 1)), MutationOutcome::Queued);
        assert!(matches!(monitor.remove_edge(0, 1), Err(ConnectivityError::ClusterBusy(_))));
        assert!(monitor.graph().has_edge(0, 1));

        monitor.tick(&mut ctx).unwrap();
        // The queued cut was applied after the cycle and checked in the same tick
        assert!(!monitor.graph().has_edge(0, 1));
        assert_eq!(monitor.root().members(), &[0]);
        assert!(monitor.pending_mutations().is_empty());
    }

    #[test]
    fn test_unanchored_structure_dissolves() {
        let mut ctx = ctx();
        let mut monitor = chain(3, None, &mut ctx);
        monitor.request_check();
        let report = monitor.tick(&mut ctx).unwrap();
        assert!(report.dissolved);
        assert!(monitor.is_dissolved());
        monitor.notify_removed(0);
        assert_eq!(monitor.submit(GraphMutation::RemoveShard(1)), MutationOutcome::Ignored);
        assert_eq!(monitor.state(), MonitorState::Dissolved);
    }

    #[test]
    fn test_pinned_shard_never_released() {
        let mut ctx = ctx();
        let mut monitor = chain(2, Some(0), &mut ctx);
        monitor.notify_removed(1);
        let report = monitor.tick(&mut ctx).unwrap();
        assert!(report.activated.is_empty());
        assert_eq!(monitor.root().members(), &[0]);
        assert_eq!(monitor.state(), MonitorState::Stable);
    }

    #[test]
    fn test_ownership_inconsistency_strict_and_heal() {
        let mut ctx = ctx();
        let mut monitor = chain(3, Some(0), &mut ctx);
        monitor.graph_mut().get_mut(2).unwrap().cluster = Some(999);
        monitor.request_check();
        let err = monitor.tick(&mut ctx).unwrap_err();
        assert!(matches!(err, ConnectivityError::OwnershipInconsistency { shard: 2, .. }));

        ctx.config.consistency = ConsistencyPolicy::Heal;
        monitor.tick(&mut ctx).unwrap();
        assert_eq!(monitor.graph().get(2).unwrap().cluster(), Some(monitor.cluster_id()));
        assert_eq!(monitor.state(), MonitorState::Stable);
    }

    #[test]
    fn test_clusterize_off_releases_single_meshes() {
        let mut ctx = ctx();
        ctx.config.clusterize = false;
        let mut monitor = chain(4, Some(0), &mut ctx);
        monitor.submit(GraphMutation::RemoveEdge(0, 1));
        let report = monitor.tick(&mut ctx).unwrap();
        assert_eq!(report.bodies_released, 3);
        assert!(monitor
            .take_released()
            .iter()
            .all(|b| b.tag() == crate::body::BodyTag::SingleMesh));
    }

    #[test]
    fn test_demolishable_child_keeps_graph() {
        let mut ctx = ctx();
        ctx.config.demolishable = true;
        let mut monitor = chain(5, Some(0), &mut ctx);
        monitor.submit(GraphMutation::RemoveEdge(1, 2));
        monitor.tick(&mut ctx).unwrap();
        let body = monitor.take_released().pop().unwrap();
        let (_, graph) = body.into_graph().unwrap();
        assert_eq!(graph.ids(), vec![2, 3, 4]);
        assert!(graph.has_edge(3, 4));
        assert!(graph.check_symmetry().is_ok());
    }

    #[test]
    fn test_force_release_and_zone_release() {
        let mut ctx = ctx();
        let mut monitor = chain(3, Some(0), &mut ctx);
        {
            let shard = monitor.graph_mut().get_mut(2).unwrap();
            shard.unyielding = true;
            shard.activatable = true;
            shard.anchor_zones.push(7);
        }
        let released = monitor.release_zone(7, &mut ctx).unwrap();
        assert_eq!(released, vec![2]);
        assert!(matches!(monitor.release_zone(99, &mut ctx), Err(ConnectivityError::UnknownZone(99))));

        monitor.force_release(0, &mut ctx).unwrap();
        assert!(matches!(monitor.force_release(0, &mut ctx), Err(ConnectivityError::UnknownShard(0))));
        monitor.tick(&mut ctx).unwrap();
        // Shard 1 lost both neighbors and its anchor
        assert!(monitor.is_dissolved());
    }

    #[test]
    fn test_snapshot_and_integrity() {
        let mut ctx = ctx();
        let mut monitor = chain(4, Some(0), &mut ctx);
        monitor.notify_removed(3);
        monitor.tick(&mut ctx).unwrap();
        let report = monitor.snapshot();
        assert_eq!(report.shard_count, 3);
        assert!((report.integrity - 75.0).abs() < 1e-4);
        assert_eq!(report.state, MonitorState::Stable);
        assert!(report.to_json().contains("\"integrity\""));
    }

    #[test]
    fn test_sink_receives_activations() {
        struct SharedSink(Arc<Mutex<Vec<ShardId>>>);

        impl ActivationSink for SharedSink {
            fn on_shard_activated(&mut self, shard: &Shard) {
                self.0.lock().push(shard.id);
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = ctx();
        ctx.sink = Box::new(SharedSink(seen.clone()));
        let mut monitor = chain(4, Some(0), &mut ctx);
        monitor.submit(GraphMutation::RemoveEdge(1, 2));
        monitor.tick(&mut ctx).unwrap();
        assert_eq!(*seen.lock(), vec![2, 3]);
        assert_eq!(monitor.take_released()[0].shard_ids(), vec![2, 3]);
    }
}
