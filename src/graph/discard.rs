//! Pair-keyed random discard.
//!
//! The roll for an edge depends only on the seed and the unordered pair of
//! shard ids, never on the order pairs are visited in. The pair is hashed the
//! same way floor hashes are derived from the tower seed, and the hash seeds a
//! fresh xoshiro stream for a single 0..100 roll.

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use sha3::{Digest, Sha3_256};

use crate::constants::DISCARD_ROLL_RANGE;
use crate::graph::edge_key;
use crate::shard::ShardId;

/// Deterministic 64-bit hash of (seed, low id, high id)
pub fn pair_hash(seed: u64, a: ShardId, b: ShardId) -> u64 {
    let (low, high) = edge_key(a, b);
    let mut hasher = Sha3_256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(low.to_le_bytes());
    hasher.update(high.to_le_bytes());
    let result = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&result[0..8]);
    u64::from_le_bytes(bytes)
}

/// Roll in `0..DISCARD_ROLL_RANGE` for the pair
pub fn pair_roll(seed: u64, a: ShardId, b: ShardId) -> u32 {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(pair_hash(seed, a, b));
    rng.gen_range(0..DISCARD_ROLL_RANGE)
}

/// Stateless discard filter shared by adjacency construction and random collapse
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairDiscard {
    pub seed: u64,
    /// Percentage of pairs to drop, clamped to 0..=100
    pub percentage: f32,
}

impl PairDiscard {
    pub fn new(seed: u64, percentage: f32) -> Self {
        Self {
            seed,
            percentage: percentage.clamp(0.0, 100.0),
        }
    }

    pub fn is_active(&self) -> bool {
        self.percentage > 0.0
    }

    pub fn discards(&self, a: ShardId, b: ShardId) -> bool {
        if !self.is_active() {
            return false;
        }
        (pair_roll(self.seed, a, b) as f32) < self.percentage
    }
}
