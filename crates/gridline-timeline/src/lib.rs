//! Event derivation and the bounded timeline for the Gridline replay engine.
//!
//! Snapshots go in one at a time through [`Timeline::add_snapshot`]. The
//! [`EventDeriver`] compares each one with the accumulated state and infers
//! the SUB, START and END events that explain the difference. The timeline
//! stores them by offset next to a window of the raw snapshots, so a
//! playback consumer can rebuild the cluster at any retained instant.
//!
//! # Modules
//!
//! - [`config`] -- YAML configuration for the whole system
//! - [`deriver`] -- Snapshot-diff event inference and offset clamping
//! - [`error`] -- Ingestion errors
//! - [`series`] -- Change-only step functions for aggregate counts
//! - [`timeline`] -- The [`Timeline`] window itself

pub mod config;
pub mod deriver;
pub mod error;
pub mod series;
pub mod timeline;

pub use config::{
    ConfigError, GridlineConfig, IngestConfig, LoggingConfig, PlaybackConfig, TimelineConfig,
};
pub use deriver::{Bracket, Derivation, EventDeriver};
pub use error::TimelineError;
pub use series::StepSeries;
pub use timeline::{EventMap, IngestSummary, Timeline};
