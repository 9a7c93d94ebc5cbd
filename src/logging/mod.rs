//! Structured logging for the destruction core.
//!
//! Every subsystem logs through `tracing` under its own target
//! (`destruction_core::monitor`, `destruction_core::collapse`, ...), so the
//! owning application can tune the noisy per-shard events independently.
//! Initialization is idempotent: the first call wins and later calls are no-ops.

use std::sync::Once;
use std::time::Instant;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

pub struct LoggingPlugin;

impl Plugin for LoggingPlugin {
    fn build(&self, _app: &mut App) {
        init_tracing_default();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration for tracing initialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    pub default_level: LogLevel,
    pub module_filters: Vec<(String, LogLevel)>,
    pub show_thread_ids: bool,
    pub show_targets: bool,
    pub show_file_line: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_level: LogLevel::Info,
            module_filters: vec![
                ("destruction_core::graph".to_string(), LogLevel::Warn),
                ("destruction_core::monitor".to_string(), LogLevel::Info),
                ("destruction_core::collapse".to_string(), LogLevel::Info),
                ("destruction_core::stress".to_string(), LogLevel::Info),
                ("destruction_core::scheduler".to_string(), LogLevel::Info),
                // Per-shard activation events are trace-level
                ("destruction_core::body".to_string(), LogLevel::Warn),
            ],
            show_thread_ids: false,
            show_targets: true,
            show_file_line: false,
        }
    }
}

impl TracingConfig {
    /// Verbose preset used while debugging a single structure
    pub fn verbose() -> Self {
        Self {
            default_level: LogLevel::Debug,
            module_filters: vec![("destruction_core".to_string(), LogLevel::Trace)],
            show_thread_ids: true,
            show_targets: true,
            show_file_line: true,
        }
    }

    pub fn to_env_filter_string(&self) -> String {
        let mut parts = vec![self.default_level.as_str().to_string()];
        for (module, level) in &self.module_filters {
            parts.push(format!("{}={}", module, level.as_str()));
        }
        parts.join(",")
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(json: &str) -> Option<Self> {
        serde_json::from_str(json).ok()
    }
}

static TRACING_INIT: Once = Once::new();

/// Initialize tracing with default settings (idempotent)
pub fn init_tracing_default() {
    init_tracing(&TracingConfig::default());
}

/// Initialize tracing with a custom config. `RUST_LOG` overrides the filter.
pub fn init_tracing(config: &TracingConfig) {
    let config = config.clone();
    TRACING_INIT.call_once(move || {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.to_env_filter_string()));

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(config.show_targets)
            .with_thread_ids(config.show_thread_ids)
            .with_file(config.show_file_line)
            .with_line_number(config.show_file_line)
            .compact();

        // A global subscriber may already be installed by the host app
        let _ = subscriber.try_init();
    });
}

/// Span guard around a monitor check or stress run.
/// Logs the elapsed time at DEBUG when dropped.
pub struct TimingSpan {
    name: &'static str,
    started: Instant,
    _span: tracing::span::EnteredSpan,
}

impl TimingSpan {
    pub fn new(name: &'static str) -> Self {
        let span = tracing::debug_span!("destruction", op = name);
        Self {
            name,
            started: Instant::now(),
            _span: span.entered(),
        }
    }

    pub fn elapsed_micros(&self) -> u128 {
        self.started.elapsed().as_micros()
    }
}

impl Drop for TimingSpan {
    fn drop(&mut self) {
        tracing::debug!(
            target: "destruction_core::timing",
            op = self.name,
            micros = self.elapsed_micros() as u64,
            "operation finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_string() {
        let config = TracingConfig::default();
        let filter = config.to_env_filter_string();
        assert!(filter.starts_with("info"));
        assert!(filter.contains("destruction_core::graph=warn"));
        assert!(filter.contains("destruction_core::monitor=info"));
    }

    #[test]
    fn test_verbose_preset() {
        let filter = TracingConfig::verbose().to_env_filter_string();
        assert_eq!(filter, "debug,destruction_core=trace");
    }

    #[test]
    fn test_tracing_config_json_roundtrip() {
        let config = TracingConfig::default();
        let restored = TracingConfig::from_json(&config.to_json()).unwrap();
        assert_eq!(restored.default_level, config.default_level);
        assert_eq!(restored.module_filters, config.module_filters);
        assert!(TracingConfig::from_json("not json").is_none());
    }

    #[test]
    fn test_init_tracing_idempotent() {
        init_tracing_default();
        init_tracing_default();
        init_tracing(&TracingConfig::verbose());
    }

    #[test]
    fn test_timing_span() {
        init_tracing_default();
        let span = TimingSpan::new("test_operation");
        let sum: u64 = (0..100).sum();
        assert!(sum > 0);
        assert!(span.elapsed_micros() < 10_000_000);
    }
}
