//! Error taxonomy for the destruction core.
//!
//! Structural invariant violations (ownership, symmetry) are surfaced as errors
//! and never silently patched unless the configured consistency policy says so.
//! Transient conditions (stale ids, already removed shards) are idempotent
//! no-ops and do not produce errors at all.

use std::path::PathBuf;

use crate::cluster::ClusterId;
use crate::shard::ShardId;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectivityError {
    #[error("shard {0} already exists in the graph")]
    DuplicateId(ShardId),
    #[error("shard {0} is not in the graph")]
    UnknownShard(ShardId),
    #[error("anchor zone {0} is not registered")]
    UnknownZone(u32),
    #[error("shard {shard} lists missing neighbor {neighbor}")]
    MissingNeighbor { shard: ShardId, neighbor: ShardId },
    #[error("edge {a} -> {b} has no symmetric counterpart (area {area})")]
    AsymmetricEdge { a: ShardId, b: ShardId, area: f32 },
    #[error(
        "shard {shard} is owned by cluster {observed} but its back-reference points at {recorded:?}"
    )]
    OwnershipInconsistency {
        shard: ShardId,
        observed: ClusterId,
        recorded: Option<ClusterId>,
    },
    #[error("cluster {0} has no members to partition")]
    EmptyClusterPartition(ClusterId),
    #[error("collapse threshold would decrease from {previous} to {requested}")]
    NonMonotonicCollapse { previous: f32, requested: f32 },
    #[error("cluster {0} is busy with a connectivity check")]
    ClusterBusy(ClusterId),
    #[error("collapse run was cancelled")]
    CollapseCancelled,
    #[error("collapse rate {0} is not a finite number")]
    InvalidCollapseRate(f32),
    #[error("cluster id space exhausted")]
    IdsExhausted,
}

pub type Result<T> = std::result::Result<T, ConnectivityError>;

/// Configuration loading and validation failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("RON error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("RON serialization error: {0}")]
    RonWrite(#[from] ron::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported config format: {0:?}")]
    UnsupportedFormat(PathBuf),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = ConnectivityError::DuplicateId(7);
        assert_eq!(err.to_string(), "shard 7 already exists in the graph");

        let err = ConnectivityError::NonMonotonicCollapse {
            previous: 0.5,
            requested: 0.25,
        };
        assert!(err.to_string().contains("0.5"));
        assert!(err.to_string().contains("0.25"));
    }

    #[test]
    fn test_config_error_from_json() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{nope");
        let err: ConfigError = parse.unwrap_err().into();
        assert!(matches!(err, ConfigError::Json(_)));
    }
}
