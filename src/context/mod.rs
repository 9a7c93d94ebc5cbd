//! Simulation context passed explicitly to every structure.
//!
//! Owns the configuration, id allocation and the collaborator interfaces
//! (broad-phase overlap query and activation sink). There is no process-wide
//! manager: whoever drives the simulation owns a context and hands it to
//! monitors and the scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

use crate::anchor::{BoundsOverlapQuery, OverlapQuery};
use crate::body::{ActivationSink, BufferedSink};
use crate::cluster::ClusterId;
use crate::config::ConnectivityConfig;
use crate::error::{ConnectivityError, Result};

/// Cluster id source. A root allocator hands out consecutive ids. A forked
/// allocator owns one lane of an interleaved range (`base + lane`, then every
/// `stride` ids), so parallel forks never collide and the parent only advances
/// past ids that were actually issued.
#[derive(Debug, Clone)]
pub struct IdAllocator {
    next_cluster: ClusterId,
    stride: ClusterId,
    issued: Option<ClusterId>,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new(1)
    }
}

impl IdAllocator {
    pub fn new(first_cluster: ClusterId) -> Self {
        Self {
            next_cluster: first_cluster,
            stride: 1,
            issued: None,
        }
    }

    pub fn next_cluster(&mut self) -> Result<ClusterId> {
        let id = self.next_cluster;
        let next = id.checked_add(self.stride).ok_or(ConnectivityError::IdsExhausted)?;
        self.next_cluster = next;
        self.issued = Some(id);
        Ok(id)
    }

    pub fn peek_cluster(&self) -> ClusterId {
        self.next_cluster
    }

    /// Highest id handed out so far, if any
    pub fn last_issued(&self) -> Option<ClusterId> {
        self.issued
    }

    /// Allocator for lane `lane` of `lanes` interleaved forks starting at the
    /// current counter. The parent counter is not advanced; see [`Self::reclaim`].
    fn lane(&self, lane: ClusterId, lanes: ClusterId) -> Result<Self> {
        let first = self
            .next_cluster
            .checked_add(lane)
            .ok_or(ConnectivityError::IdsExhausted)?;
        Ok(Self {
            next_cluster: first,
            stride: lanes.max(1),
            issued: None,
        })
    }

    /// Move past every id a fork issued. Ids a fork never used are returned.
    fn reclaim(&mut self, fork: &IdAllocator) -> Result<()> {
        if let Some(last) = fork.last_issued() {
            let next = last.checked_add(1).ok_or(ConnectivityError::IdsExhausted)?;
            if next > self.next_cluster {
                self.next_cluster = next;
                self.issued = Some(last);
            }
        }
        Ok(())
    }
}

/// Cooperative cancellation flag for collapse and stress runs. Checked
/// between iterations, after the current edge removal has completed.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SimulationContext {
    pub config: ConnectivityConfig,
    pub ids: IdAllocator,
    pub overlap: Box<dyn OverlapQuery>,
    pub sink: Box<dyn ActivationSink>,
    /// Stream for the angular nudge given to activated shards
    pub rng: Xoshiro256PlusPlus,
}

impl SimulationContext {
    pub fn new(
        config: ConnectivityConfig,
        overlap: Box<dyn OverlapQuery>,
        sink: Box<dyn ActivationSink>,
    ) -> Self {
        let rng = Xoshiro256PlusPlus::seed_from_u64(config.seed);
        Self {
            config,
            ids: IdAllocator::default(),
            overlap,
            sink,
            rng,
        }
    }

    /// Headless context: bounds-based overlap query and a buffering sink
    pub fn headless(config: ConnectivityConfig) -> Self {
        Self::new(
            config,
            Box::new(BoundsOverlapQuery::new()),
            Box::new(BufferedSink::new()),
        )
    }

    /// Child contexts sharing the configuration, one per collaborator pair.
    /// Each fork gets its own lane of cluster ids, a derived rng stream and
    /// its own sink. Used to tick structures in parallel; forks are created in
    /// a fixed order so the streams are stable. Call [`Self::join`] afterwards.
    pub fn fork_all<I>(&mut self, collaborators: I) -> Result<Vec<Self>>
    where
        I: IntoIterator<Item = (Box<dyn OverlapQuery>, Box<dyn ActivationSink>)>,
    {
        let collaborators: Vec<_> = collaborators.into_iter().collect();
        let lanes = ClusterId::try_from(collaborators.len())
            .map_err(|_| ConnectivityError::IdsExhausted)?;
        collaborators
            .into_iter()
            .zip(0..lanes)
            .map(|((overlap, sink), lane)| {
                Ok(Self {
                    config: self.config.clone(),
                    ids: self.ids.lane(lane, lanes)?,
                    overlap,
                    sink,
                    rng: Xoshiro256PlusPlus::seed_from_u64(self.rng.gen()),
                })
            })
            .collect()
    }

    /// Advance the id counter past everything the forks issued
    pub fn join<'a>(&mut self, forks: impl IntoIterator<Item = &'a SimulationContext>) -> Result<()> {
        for fork in forks {
            self.ids.reclaim(&fork.ids)?;
        }
        Ok(())
    }
}
