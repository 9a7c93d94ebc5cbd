//! Collapse Controller: progressive, rate-limited edge removal.
//!
//! A collapse run captures the structure's range data (contact area and shard
//! size extremes) when it starts and then removes edges as its rate rises from
//! 0 to 1:
//!
//! - `ByArea`: edges whose contact area is below the interpolated area threshold
//! - `BySize`: edges whose smaller endpoint is below the interpolated size threshold
//! - `Random`: edges whose pair-keyed roll is below `rate * 100`
//!
//! The rate never decreases within a run, so removed edges never come back.
//! Edges touching over-stressed shards are considered first and at a boosted
//! rate. Every removal goes through the monitor, which requests a check; the
//! controller never partitions by itself.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{CollapseConfig, CollapseMode};
use crate::constants::{DISCARD_ROLL_RANGE, STRESS_RATE_BOOST};
use crate::context::CancelToken;
use crate::error::{ConnectivityError, Result};
use crate::graph::discard::pair_roll;
use crate::graph::{Edge, ShardGraph};
use crate::monitor::ConnectivityMonitor;
use crate::shard::ShardId;
use crate::stress::StressField;

/// Extremes of contact area and shard size over a structure
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeData {
    pub min_area: f32,
    pub max_area: f32,
    pub min_size: f32,
    pub max_size: f32,
}

impl RangeData {
    /// `None` when the graph has no edges
    pub fn from_graph(graph: &ShardGraph) -> Option<Self> {
        let edges = graph.edges();
        if edges.is_empty() {
            return None;
        }
        let mut range = RangeData {
            min_area: f32::MAX,
            max_area: f32::MIN,
            min_size: f32::MAX,
            max_size: f32::MIN,
        };
        for edge in &edges {
            range.min_area = range.min_area.min(edge.area);
            range.max_area = range.max_area.max(edge.area);
        }
        for shard in graph.iter() {
            range.min_size = range.min_size.min(shard.size);
            range.max_size = range.max_size.max(shard.size);
        }
        Some(range)
    }

    pub fn area_threshold(&self, rate: f32) -> f32 {
        self.min_area + (self.max_area - self.min_area) * rate.clamp(0.0, 1.0)
    }

    pub fn size_threshold(&self, rate: f32) -> f32 {
        self.min_size + (self.max_size - self.min_size) * rate.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollapseStatus {
    Idle,
    Running,
    Finished,
    Cancelled,
}

pub struct CollapseController {
    pub mode: CollapseMode,
    pub seed: u64,
    /// Rate added by each `advance`
    pub step: f32,
    pub stress_threshold: f32,
    rate: f32,
    range: Option<RangeData>,
    status: CollapseStatus,
    removed: Vec<(ShardId, ShardId)>,
    cancel: CancelToken,
}

impl CollapseController {
    pub fn new(config: &CollapseConfig, seed: u64, stress_threshold: f32) -> Self {
        Self {
            mode: config.mode,
            seed,
            step: config.step,
            stress_threshold,
            rate: 0.0,
            range: None,
            status: CollapseStatus::Idle,
            removed: Vec::new(),
            cancel: CancelToken::new(),
        }
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn status(&self) -> CollapseStatus {
        self.status
    }

    pub fn in_progress(&self) -> bool {
        self.status == CollapseStatus::Running
    }

    pub fn range(&self) -> Option<RangeData> {
        self.range
    }

    /// Every edge removed by this run, in removal order
    pub fn removed_edges(&self) -> &[(ShardId, ShardId)] {
        &self.removed
    }

    /// Handle that aborts the run between edge removals
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Begin a new run: capture range data and reset the rate
    pub fn start(&mut self, monitor: &ConnectivityMonitor) {
        self.range = RangeData::from_graph(monitor.graph());
        self.rate = 0.0;
        self.removed.clear();
        self.cancel.reset();
        self.status = CollapseStatus::Running;
        info!(
            target: "destruction_core::collapse",
            cluster = monitor.cluster_id(),
            mode = ?self.mode,
            "collapse started"
        );
    }

    /// Stop the run, keeping its rate so it can be resumed
    pub fn stop(&mut self) {
        if self.status == CollapseStatus::Running {
            self.cancel.cancel();
            self.status = CollapseStatus::Cancelled;
            info!(target: "destruction_core::collapse", rate = self.rate, "collapse stopped");
        }
    }

    /// Continue a stopped run from its current rate
    pub fn resume(&mut self) {
        if self.status == CollapseStatus::Cancelled {
            self.cancel.reset();
            self.status = CollapseStatus::Running;
        }
    }

    /// Raise the rate by one step and remove what the new rate allows
    pub fn advance(
        &mut self,
        monitor: &mut ConnectivityMonitor,
        stress: Option<&StressField>,
    ) -> Result<usize> {
        if !self.in_progress() {
            return Ok(0);
        }
        let next = (self.rate + self.step).min(1.0);
        let removed = self.step_collapse(monitor, next, stress)?;
        if self.rate >= 1.0 {
            self.status = CollapseStatus::Finished;
            info!(
                target: "destruction_core::collapse",
                cluster = monitor.cluster_id(),
                removed = self.removed.len(),
                "collapse finished"
            );
        }
        Ok(removed)
    }

    /// Remove every edge the given rate allows. Returns how many went.
    ///
    /// Fails with `NonMonotonicCollapse` if `rate` is below the current rate,
    /// with `ClusterBusy` while the monitor is mid-check and with
    /// `CollapseCancelled` once the run was aborted. Edges removed before an
    /// abort stay removed on both sides.
    pub fn step_collapse(
        &mut self,
        monitor: &mut ConnectivityMonitor,
        rate: f32,
        stress: Option<&StressField>,
    ) -> Result<usize> {
        if !rate.is_finite() {
            return Err(ConnectivityError::InvalidCollapseRate(rate));
        }
        if rate < self.rate {
            return Err(ConnectivityError::NonMonotonicCollapse {
                previous: self.rate,
                requested: rate,
            });
        }
        if self.cancel.is_cancelled() {
            self.status = CollapseStatus::Cancelled;
            return Err(ConnectivityError::CollapseCancelled);
        }
        if monitor.is_busy() {
            return Err(ConnectivityError::ClusterBusy(monitor.cluster_id()));
        }
        if self.status == CollapseStatus::Idle {
            self.start(monitor);
        }
        self.rate = rate.min(1.0);

        let stressed = stress
            .map(|field| field.over_threshold(self.stress_threshold))
            .unwrap_or_default();
        let candidates = self.candidates(monitor.graph(), &stressed);

        let mut removed = 0;
        for (a, b) in candidates {
            if self.cancel.is_cancelled() {
                self.status = CollapseStatus::Cancelled;
                break;
            }
            if monitor.remove_edge(a, b)?.is_some() {
                self.removed.push((a, b));
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Edges the current rate removes, over-stressed ones first
    fn candidates(&self, graph: &ShardGraph, stressed: &HashSet<ShardId>) -> Vec<(ShardId, ShardId)> {
        let (mut hot, mut cold): (Vec<Edge>, Vec<Edge>) = graph
            .edges()
            .into_iter()
            .partition(|e| stressed.contains(&e.a) || stressed.contains(&e.b));
        hot.retain(|e| self.qualifies(graph, e, (self.rate * STRESS_RATE_BOOST).min(1.0)));
        cold.retain(|e| self.qualifies(graph, e, self.rate));
        hot.into_iter().chain(cold).map(|e| e.key()).collect()
    }

    fn qualifies(&self, graph: &ShardGraph, edge: &Edge, rate: f32) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        match self.mode {
            CollapseMode::ByArea => match self.range {
                Some(range) => edge.area < range.area_threshold(rate),
                None => false,
            },
            CollapseMode::BySize => {
                let Some(range) = self.range else {
                    return false;
                };
                let smaller = [edge.a, edge.b]
                    .iter()
                    .filter_map(|id| graph.get(*id))
                    .map(|s| s.size)
                    .fold(f32::MAX, f32::min);
                smaller < range.size_threshold(rate)
            }
            CollapseMode::Random => {
                (pair_roll(self.seed, edge.a, edge.b) as f32) < rate * DISCARD_ROLL_RANGE as f32
            }
        }
    }
}
