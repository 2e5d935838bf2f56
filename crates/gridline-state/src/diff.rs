//! Discrepancies between two states.
//!
//! [`GridState::diff_against`](crate::GridState::diff_against) reports every
//! difference as a [`StateDiscrepancy`] value; callers decide whether to log,
//! count or assert on them.

use std::collections::BTreeSet;

use gridline_types::FullJobId;

/// One difference found when comparing two states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateDiscrepancy {
    /// A node holds different jobs in the two states. A node missing from
    /// one side counts as empty there.
    NodeJobs {
        /// Node short name.
        node: String,
        /// Jobs on the node in this state.
        ours: BTreeSet<FullJobId>,
        /// Jobs on the node in the other state.
        theirs: BTreeSet<FullJobId>,
    },
    /// A job is queued here but not in the other state.
    QueuedOnlyInOurs {
        /// The job.
        job: FullJobId,
    },
    /// A job is queued in the other state but not here.
    QueuedOnlyInTheirs {
        /// The job.
        job: FullJobId,
    },
    /// A job is queued in both states with different details.
    QueuedMismatch {
        /// The job.
        job: FullJobId,
        /// This state's rendering of the job.
        ours: String,
        /// The other state's rendering of the job.
        theirs: String,
    },
}

fn join(ids: &BTreeSet<FullJobId>) -> String {
    ids.iter().map(FullJobId::as_str).collect::<Vec<_>>().join(", ")
}

impl core::fmt::Display for StateDiscrepancy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NodeJobs { node, ours, theirs } => {
                write!(f, "node {node} differs: [{}] <> [{}]", join(ours), join(theirs))
            }
            Self::QueuedOnlyInOurs { job } => write!(f, "job {job} is queued only in this state"),
            Self::QueuedOnlyInTheirs { job } => {
                write!(f, "job {job} is queued only in the other state")
            }
            Self::QueuedMismatch { job, ours, theirs } => {
                write!(f, "queued job {job} differs: {ours} <> {theirs}")
            }
        }
    }
}
