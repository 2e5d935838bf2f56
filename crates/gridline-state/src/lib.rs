//! Point-in-time cluster state for the Gridline replay engine.
//!
//! A [`GridState`] holds nodes with fixed slot arrays, the jobs placed on
//! them, the pending queue, and per-owner slot usage. Lifecycle events from
//! `gridline-types` are applied to it one at a time; an event that does not
//! fit the state is reported as a [`StateError`] and leaves it unchanged.
//!
//! # Modules
//!
//! - [`diff`] -- [`StateDiscrepancy`] values produced by state comparison
//! - [`error`] -- Error types for construction and event application
//! - [`job`] -- [`GridJob`], the stateful view of a job
//! - [`node`] -- [`GridNode`] slot arrays with first-fit placement
//! - [`state`] -- [`GridState`] itself
//! - [`topology`] -- [`NodeTopology`] slot capacities and their config section

pub mod diff;
pub mod error;
pub mod job;
pub mod node;
pub mod state;
pub mod topology;

pub use diff::StateDiscrepancy;
pub use error::StateError;
pub use job::{GridJob, UNKNOWN_OWNER};
pub use node::{GridNode, SlotAssignment};
pub use state::GridState;
pub use topology::{MAX_NODE_SET_LEN, MAX_NODE_SLOTS, NodeSetConfig, NodeTopology, TopologyConfig};
