//! Error types for the `gridline-state` crate.
//!
//! [`StateError::MissingTopology`] is fatal at construction time. Every
//! other variant is a data inconsistency: the event that produced it is
//! skipped by the caller and processing continues.

use gridline_types::{FullJobId, JobEventKind};

/// Errors that can occur while building a state or applying events to it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// A node has no slot-capacity mapping in the topology.
    #[error("no topology entry for node {node}")]
    MissingTopology {
        /// Short name of the unmapped node.
        node: String,
    },

    /// The event references a job the state does not know.
    #[error("cannot apply {kind} to unknown job {job}")]
    JobNotFound {
        /// The event type being applied.
        kind: JobEventKind,
        /// The missing job.
        job: FullJobId,
    },

    /// The event references a node the state does not have.
    #[error("job {job} references node {node} which is not in the state")]
    NodeNotFound {
        /// The job being started.
        job: FullJobId,
        /// The missing node.
        node: String,
    },

    /// A SUB or START event carries no sampled job.
    #[error("{kind} event for {job} carries no sampled job")]
    MissingSampledJob {
        /// The event type.
        kind: JobEventKind,
        /// The affected job.
        job: FullJobId,
    },

    /// A START event's sampled job was not observed on any node.
    #[error("cannot start job {job} without a node")]
    MissingNode {
        /// The affected job.
        job: FullJobId,
    },
}

impl StateError {
    /// Whether this error should abort construction rather than skip one event.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::MissingTopology { .. })
    }
}
