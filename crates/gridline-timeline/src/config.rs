//! Configuration loading and typed config structures for Gridline.
//!
//! The configuration lives in a single YAML file (`gridline.yaml` by
//! default). Every section is optional; missing sections and keys fall back
//! to the defaults below.

use std::path::{Path, PathBuf};

use gridline_state::TopologyConfig;
use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The file parsed but a value is out of range.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GridlineConfig {
    /// Timeline window and derivation settings.
    #[serde(default)]
    pub timeline: TimelineConfig,

    /// Playback loop settings.
    #[serde(default)]
    pub playback: PlaybackConfig,

    /// Node slot capacities.
    #[serde(default)]
    pub topology: TopologyConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Where the engine binary reads snapshots from.
    #[serde(default)]
    pub ingest: IngestConfig,
}

impl GridlineConfig {
    /// Load and validate configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges across all sections.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::Invalid {
            reason: reason.to_owned(),
        };
        if self.timeline.max_snapshots == 0 {
            return Err(invalid("timeline.max_snapshots must be at least 1"));
        }
        if self.timeline.dedup_capacity == 0 {
            return Err(invalid("timeline.dedup_capacity must be at least 1"));
        }
        if self.playback.tick_interval_ms == 0 {
            return Err(invalid("playback.tick_interval_ms must be at least 1"));
        }
        if !self.playback.initial_speed.is_finite() || self.playback.initial_speed <= 0.0 {
            return Err(invalid("playback.initial_speed must be positive and finite"));
        }
        self.topology
            .validate()
            .map_err(|reason| ConfigError::Invalid { reason })
    }
}

/// Timeline window and derivation settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TimelineConfig {
    /// Maximum number of retained snapshots.
    #[serde(default = "default_max_snapshots")]
    pub max_snapshots: usize,

    /// A snapshot is retained only if sampled strictly more than this many
    /// milliseconds after the last retained one. Every snapshot is derived.
    #[serde(default)]
    pub min_snapshot_spacing_ms: u64,

    /// How far behind the newest data the live offset sits.
    #[serde(default = "default_live_lag_ms")]
    pub live_lag_ms: u64,

    /// Capacity of the event dedup cache.
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            max_snapshots: default_max_snapshots(),
            min_snapshot_spacing_ms: 0,
            live_lag_ms: default_live_lag_ms(),
            dedup_capacity: default_dedup_capacity(),
        }
    }
}

/// Playback loop settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlaybackConfig {
    /// Wall-clock milliseconds between playback ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Milliseconds between polls while waiting for the window to settle.
    #[serde(default = "default_stale_backoff_ms")]
    pub stale_backoff_ms: u64,

    /// Speed multiplier a new controller starts with.
    #[serde(default = "default_initial_speed")]
    pub initial_speed: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            stale_backoff_ms: default_stale_backoff_ms(),
            initial_speed: default_initial_speed(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: `text` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Snapshot ingestion settings for the engine binary.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IngestConfig {
    /// Directory of `*.json` snapshot files.
    #[serde(default = "default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            snapshot_dir: default_snapshot_dir(),
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

const fn default_max_snapshots() -> usize {
    100
}

const fn default_live_lag_ms() -> u64 {
    5_000
}

const fn default_dedup_capacity() -> usize {
    100_000
}

const fn default_tick_interval_ms() -> u64 {
    50
}

const fn default_stale_backoff_ms() -> u64 {
    500
}

const fn default_initial_speed() -> f64 {
    1.0
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_log_format() -> String {
    "text".to_owned()
}

fn default_snapshot_dir() -> PathBuf {
    PathBuf::from("snapshots")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = GridlineConfig::default();
        assert_eq!(config.timeline.max_snapshots, 100);
        assert_eq!(config.timeline.min_snapshot_spacing_ms, 0);
        assert_eq!(config.timeline.live_lag_ms, 5_000);
        assert_eq!(config.timeline.dedup_capacity, 100_000);
        assert_eq!(config.playback.tick_interval_ms, 50);
        assert_eq!(config.playback.stale_backoff_ms, 500);
        assert!((config.playback.initial_speed - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r"
timeline:
  max_snapshots: 12
  min_snapshot_spacing_ms: 300000
  live_lag_ms: 1000
  dedup_capacity: 500

playback:
  tick_interval_ms: 20
  stale_backoff_ms: 100
  initial_speed: 60.0

topology:
  nodes:
    h04u15: 32
  node_sets:
    - prefix: f00u
      first: 1
      last: 4
      width: 2
      slots: 8

logging:
  level: debug
  format: json

ingest:
  snapshot_dir: /var/lib/gridline
";
        let config = GridlineConfig::parse(yaml).unwrap();
        assert_eq!(config.timeline.max_snapshots, 12);
        assert_eq!(config.timeline.min_snapshot_spacing_ms, 300_000);
        assert_eq!(config.playback.tick_interval_ms, 20);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.ingest.snapshot_dir, PathBuf::from("/var/lib/gridline"));

        let topology = config.topology.build();
        assert_eq!(topology.len(), 5);
        assert_eq!(topology.capacity("f00u04"), Some(8));
        assert_eq!(topology.capacity("h04u15"), Some(32));
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = GridlineConfig::parse("timeline:\n  max_snapshots: 3\n").unwrap();
        assert_eq!(config.timeline.max_snapshots, 3);
        assert_eq!(config.timeline.live_lag_ms, 5_000);
        assert_eq!(config.playback, PlaybackConfig::default());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        for yaml in [
            "timeline:\n  max_snapshots: 0\n",
            "timeline:\n  dedup_capacity: 0\n",
            "playback:\n  tick_interval_ms: 0\n",
            "playback:\n  initial_speed: -2.0\n",
            "topology:\n  nodes:\n    n1: 0\n",
        ] {
            let err = GridlineConfig::parse(yaml).unwrap_err();
            assert!(matches!(err, ConfigError::Invalid { .. }), "{yaml}");
        }
    }

    #[test]
    fn bad_yaml_is_a_parse_error() {
        let err = GridlineConfig::parse("timeline: [unclosed").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml { .. }));
    }

    #[test]
    fn shipped_config_file_parses() {
        let config = GridlineConfig::parse(include_str!("../../../gridline.yaml")).unwrap();
        let topology = config.topology.build();
        assert_eq!(topology.len(), 17);
        assert_eq!(topology.capacity("f00u16"), Some(8));
        assert_eq!(topology.capacity("login01"), Some(4));
        assert_eq!(config.timeline, TimelineConfig::default());
        assert!((config.playback.initial_speed - 60.0).abs() < f64::EPSILON);
    }
}
