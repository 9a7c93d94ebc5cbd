//! Connectivity configuration.
//!
//! One `ConnectivityConfig` drives a structure: how adjacency is built, when
//! collapse and stress runs start, how activated shards are nudged and how
//! ownership inconsistencies are handled. Configs load from RON or JSON and
//! are validated before use.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::ConfigError;

/// How the contact area between two intersecting shards is measured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectivityType {
    #[default]
    BoundingBox,
    Mesh,
    BoundingBoxAndMesh,
}

/// When a collapse or stress run starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StartTrigger {
    #[default]
    Manual,
    AtStart,
    /// Starts once structure integrity drops below the configured threshold
    ByIntegrity,
}

/// Which edges a collapse run removes first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CollapseMode {
    #[default]
    ByArea,
    BySize,
    Random,
}

/// What to do when a shard's cluster back-reference disagrees with its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsistencyPolicy {
    /// Surface `OwnershipInconsistency` as an error
    Strict,
    /// Reassign ownership to the observed cluster and log a warning
    Heal,
}

impl Default for ConsistencyPolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Strict
        } else {
            Self::Heal
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollapseConfig {
    pub trigger: StartTrigger,
    /// Integrity percentage below which a ByIntegrity collapse starts
    pub integrity_threshold: f32,
    pub mode: CollapseMode,
    /// Rate added per tick while a collapse is running
    pub step: f32,
}

impl Default for CollapseConfig {
    fn default() -> Self {
        Self {
            trigger: StartTrigger::Manual,
            integrity_threshold: DEFAULT_COLLAPSE_INTEGRITY,
            mode: CollapseMode::ByArea,
            step: DEFAULT_COLLAPSE_STEP,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StressConfig {
    pub enable: bool,
    pub trigger: StartTrigger,
    pub integrity_threshold: f32,
    /// Shards above this stress (0..1) are prioritized by collapse
    pub threshold: f32,
    pub iterations: u32,
    pub epsilon: f32,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            enable: false,
            trigger: StartTrigger::ByIntegrity,
            integrity_threshold: DEFAULT_STRESS_INTEGRITY,
            threshold: DEFAULT_STRESS_THRESHOLD,
            iterations: DEFAULT_STRESS_ITERATIONS,
            epsilon: DEFAULT_STRESS_EPSILON,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationConfig {
    /// Give resting activated shards a small random spin
    pub angular_nudge: bool,
    pub nudge_magnitude: f32,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            angular_nudge: true,
            nudge_magnitude: ANGULAR_NUDGE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    pub connectivity: ConnectivityType,
    pub minimum_area: f32,
    pub minimum_size: f32,
    /// Percentage (0..100) of candidate pairs dropped by the seeded roll
    pub discard_percentage: f32,
    pub seed: u64,
    /// Release condemned groups as connected bodies instead of single shards
    pub clusterize: bool,
    /// Released connected bodies are monitored again as their own structures
    pub demolishable: bool,
    pub collapse: CollapseConfig,
    pub stress: StressConfig,
    pub activation: ActivationConfig,
    pub consistency: ConsistencyPolicy,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            connectivity: ConnectivityType::BoundingBox,
            minimum_area: 0.0,
            minimum_size: 0.0,
            discard_percentage: 0.0,
            seed: DEFAULT_SEED,
            clusterize: true,
            demolishable: false,
            collapse: CollapseConfig::default(),
            stress: StressConfig::default(),
            activation: ActivationConfig::default(),
            consistency: ConsistencyPolicy::default(),
        }
    }
}

impl ConnectivityConfig {
    pub fn from_ron_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load by extension: `.ron` or `.json`
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("ron") => Self::from_ron_str(&source),
            Some("json") => Self::from_json_str(&source),
            _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    pub fn to_ron_string(&self) -> Result<String, ConfigError> {
        Ok(ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::default(),
        )?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_negative = [
            ("minimum_area", self.minimum_area),
            ("minimum_size", self.minimum_size),
            ("activation.nudge_magnitude", self.activation.nudge_magnitude),
        ];
        for (name, value) in non_negative {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be finite and >= 0, got {value}"
                )));
            }
        }
        if !(0.0..=100.0).contains(&self.discard_percentage) {
            return Err(ConfigError::Invalid(format!(
                "discard_percentage must be within 0..=100, got {}",
                self.discard_percentage
            )));
        }
        let thresholds = [
            ("collapse.integrity_threshold", self.collapse.integrity_threshold),
            ("stress.integrity_threshold", self.stress.integrity_threshold),
        ];
        for (name, value) in thresholds {
            if !(MIN_INTEGRITY_THRESHOLD..=MAX_INTEGRITY_THRESHOLD).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within {MIN_INTEGRITY_THRESHOLD}..={MAX_INTEGRITY_THRESHOLD}, got {value}"
                )));
            }
        }
        if !(self.collapse.step > 0.0 && self.collapse.step <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "collapse.step must be within (0, 1], got {}",
                self.collapse.step
            )));
        }
        if !(0.0..=1.0).contains(&self.stress.threshold) {
            return Err(ConfigError::Invalid(format!(
                "stress.threshold must be within 0..=1, got {}",
                self.stress.threshold
            )));
        }
        if self.stress.iterations == 0
            || !(self.stress.epsilon > 0.0 && self.stress.epsilon.is_finite())
        {
            return Err(ConfigError::Invalid(
                "stress.iterations and stress.epsilon must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ConnectivityConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.seed, DEFAULT_SEED);
        assert_eq!(config.collapse.integrity_threshold, 50.0);
        assert_eq!(config.stress.integrity_threshold, 70.0);
    }

    #[test]
    fn test_ron_roundtrip() {
        let mut config = ConnectivityConfig::default();
        config.connectivity = ConnectivityType::BoundingBoxAndMesh;
        config.collapse.mode = CollapseMode::Random;
        let text = config.to_ron_string().unwrap();
        let restored = ConnectivityConfig::from_ron_str(&text).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn test_json_partial_uses_defaults() {
        let config =
            ConnectivityConfig::from_json_str(r#"{ "discard_percentage": 25.0, "seed": 9 }"#)
                .unwrap();
        assert_eq!(config.discard_percentage, 25.0);
        assert_eq!(config.seed, 9);
        assert_eq!(config.collapse, CollapseConfig::default());
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut config = ConnectivityConfig::default();
        config.discard_percentage = 150.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = ConnectivityConfig::default();
        config.collapse.integrity_threshold = 0.0;
        assert!(config.validate().is_err());

        let mut config = ConnectivityConfig::default();
        config.minimum_area = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_finite() {
        let mut config = ConnectivityConfig::default();
        config.collapse.step = f32::NAN;
        assert!(config.validate().is_err());

        let mut config = ConnectivityConfig::default();
        config.stress.threshold = f32::NAN;
        assert!(config.validate().is_err());

        let mut config = ConnectivityConfig::default();
        config.stress.epsilon = f32::INFINITY;
        assert!(config.validate().is_err());

        let mut config = ConnectivityConfig::default();
        config.activation.nudge_magnitude = f32::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let ron_path = dir.path().join("structure.ron");
        let json_path = dir.path().join("structure.json");
        let toml_path = dir.path().join("structure.toml");
        let config = ConnectivityConfig::default();
        std::fs::write(&ron_path, config.to_ron_string().unwrap()).unwrap();
        std::fs::write(&json_path, config.to_json().unwrap()).unwrap();
        std::fs::write(&toml_path, "seed = 1").unwrap();

        assert_eq!(ConnectivityConfig::load(&ron_path).unwrap(), config);
        assert_eq!(ConnectivityConfig::load(&json_path).unwrap(), config);
        assert!(matches!(
            ConnectivityConfig::load(&toml_path),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }
}
