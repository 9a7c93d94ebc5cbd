//! Tower Game - Destruction Core Library
//!
//! Structural connectivity for destructible structures made of shards:
//! - Shard adjacency graph (bounding-box / face contact, pair-keyed discard)
//! - Anchor zones that pin shards to the world
//! - Cluster partitioning into connected components
//! - Connectivity monitor (purge, check, activate state machine)
//! - Progressive collapse (by area, by size, random)
//! - Stress relaxation over the adjacency graph
//! - Parallel structure scheduler and Bevy plugin

pub mod anchor;
pub mod body;
pub mod cluster;
pub mod collapse;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod graph;
pub mod logging;
pub mod monitor;
pub mod plugin;
pub mod scheduler;
pub mod shard;
pub mod stress;
