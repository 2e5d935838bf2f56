//! Shared value types for the Gridline replay engine.
//!
//! This crate is the single source of truth for the data that flows
//! between snapshot producers, the timeline, and playback consumers.
//! Types shown to the rendering layer derive `ts-rs` for TypeScript
//! bindings.
//!
//! # Modules
//!
//! - [`ids`] -- [`FullJobId`] and the [`Offset`] time coordinate
//! - [`enums`] -- Lifecycle event kinds and playback states
//! - [`snapshot`] -- Sampled jobs, nodes, and whole-cluster snapshots
//! - [`event`] -- Lifecycle events and snapshot markers

pub mod enums;
pub mod event;
pub mod ids;
pub mod snapshot;

// Re-export all public types at crate root for convenience.
pub use enums::{JobEventKind, PlayState};
pub use event::{EventKey, JobEvent, TimelineEvent};
pub use ids::{FullJobId, Offset, offset_between};
pub use snapshot::{Snapshot, SnapshotJob, SnapshotNode};
