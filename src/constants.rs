//! Centralized constants for the destruction core.
//!
//! Defaults for connectivity, collapse and stress configuration live here so
//! that `config` and the subsystems agree on a single source of truth.
//! Per-module tuning that nobody configures stays private to its module.

// =====================================================
// Shard geometry
// =====================================================

/// Bounds expansion applied to every shard AABB before the size is measured
pub const BOUNDS_EXPAND: f32 = 0.01;

/// Two mesh faces match when their areas differ by less than this
pub const FACE_AREA_TOLERANCE: f32 = 0.001;

/// Two mesh faces match when their centers are closer than this
pub const FACE_POSITION_TOLERANCE: f32 = 0.01;

/// Divisor of the summed shard sizes for the bounding-box contact estimate
pub const BOUNDING_AREA_DIVISOR: f32 = 4.0;

// =====================================================
// Connectivity
// =====================================================

/// Random discard rolls are drawn from `0..DISCARD_ROLL_RANGE`
pub const DISCARD_ROLL_RANGE: u32 = 100;

/// Default seed for the random discard filter and random collapse
pub const DEFAULT_SEED: u64 = 42;

/// Default integrity (percent) below which a ByIntegrity collapse starts
pub const DEFAULT_COLLAPSE_INTEGRITY: f32 = 50.0;

/// Default integrity (percent) below which a ByIntegrity stress run starts
pub const DEFAULT_STRESS_INTEGRITY: f32 = 70.0;

/// Lowest accepted integrity threshold (percent)
pub const MIN_INTEGRITY_THRESHOLD: f32 = 1.0;

/// Highest accepted integrity threshold (percent)
pub const MAX_INTEGRITY_THRESHOLD: f32 = 99.0;

// =====================================================
// Activation
// =====================================================

/// Magnitude of the random angular velocity given to a resting activated shard
pub const ANGULAR_NUDGE: f32 = 1.0;

// =====================================================
// Collapse
// =====================================================

/// Collapse progress added per tick while a collapse is running
pub const DEFAULT_COLLAPSE_STEP: f32 = 0.05;

// =====================================================
// Stress
// =====================================================

/// Upper bound on relaxation iterations per stress run
pub const DEFAULT_STRESS_ITERATIONS: u32 = 64;

/// Relaxation stops once the largest per-shard change falls below this
pub const DEFAULT_STRESS_EPSILON: f32 = 1e-4;

/// Shards whose stress exceeds this are prioritized for edge removal
pub const DEFAULT_STRESS_THRESHOLD: f32 = 0.8;

/// Support carried across one edge is scaled by this before it reaches the neighbor
pub const STRESS_TRANSFER_DECAY: f32 = 0.85;

/// Neighbor/own size ratio is clamped to this when weighting support
pub const STRESS_RATIO_CAP: f32 = 2.0;

/// Weight of support coming from a neighbor below the shard
pub const SUPPORT_WEIGHT_BELOW: f32 = 1.0;

/// Weight of support coming from a neighbor beside the shard
pub const SUPPORT_WEIGHT_SIDE: f32 = 0.5;

/// Weight of support coming from a neighbor above the shard (hanging)
pub const SUPPORT_WEIGHT_ABOVE: f32 = 0.2;

/// Vertical offset (as a fraction of the pair's mean size) that separates
/// "above"/"below" from "side"
pub const DIRECTION_VERTICAL_BIAS: f32 = 0.25;

/// Collapse rate multiplier for edges touching an over-stressed shard
pub const STRESS_RATE_BOOST: f32 = 2.0;
