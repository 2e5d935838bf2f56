//! The stateful view of a job.
//!
//! A [`GridJob`] is created from the first [`SnapshotJob`] that mentions a
//! job and then accumulates field changes from later samples through
//! [`GridJob::update`]. Its [`node`](GridJob::node) is set when a START is
//! applied and cleared never: a job leaves the state entirely on END.

use chrono::{DateTime, Utc};
use gridline_types::{FullJobId, SnapshotJob};
use tracing::{trace, warn};

/// Owner name used for usage accounting when a job reports none.
pub const UNKNOWN_OWNER: &str = "unknown";

/// A job as tracked across time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridJob {
    /// Numeric scheduler job id.
    pub job_id: u64,
    /// Task index, if any.
    pub tasks: Option<String>,
    /// Job name.
    pub name: Option<String>,
    /// Scheduler state string.
    pub state: Option<String>,
    /// Submitting user.
    pub owner: Option<String>,
    /// Whether the job requested exclusive node access.
    pub exclusive: bool,
    /// Number of slots requested.
    pub slots: u32,
    /// Submission time.
    pub sub_time: Option<DateTime<Utc>>,
    /// Start time.
    pub start_time: Option<DateTime<Utc>>,
    /// Short name of the node the job runs on. `None` while queued.
    pub node: Option<String>,
}

impl GridJob {
    /// Build the stateful view from a sample. The node is not copied; it is
    /// set by the state when the job is placed.
    pub fn from_sampled(job: &SnapshotJob) -> Self {
        Self {
            job_id: job.job_id,
            tasks: job.tasks.clone().filter(|t| !t.is_empty()),
            name: job.name.clone(),
            state: job.state.clone(),
            owner: job.owner.clone(),
            exclusive: job.exclusive.unwrap_or(false),
            slots: job.slots,
            sub_time: job.sub_time,
            start_time: job.start_time,
            node: None,
        }
    }

    /// `<job_id>` or `<job_id>.<task>`.
    pub fn full_id(&self) -> FullJobId {
        FullJobId::new(self.job_id, self.tasks.as_deref())
    }

    /// Owner name for usage accounting.
    pub fn owner_key(&self) -> &str {
        self.owner.as_deref().unwrap_or(UNKNOWN_OWNER)
    }

    /// Whether the job is placed on a node.
    pub const fn is_running(&self) -> bool {
        self.node.is_some()
    }

    /// Merge the non-empty fields of a newer sample into this job.
    ///
    /// Returns whether anything changed. A sample for a different numeric
    /// job id is refused and leaves the job untouched.
    pub fn update(&mut self, job: &SnapshotJob) -> bool {
        if job.job_id != self.job_id {
            warn!(
                job = %self.full_id(),
                sampled = job.job_id,
                "Refusing to update job from a different job id"
            );
            return false;
        }

        let mut changed = false;
        changed |= merge(&mut self.name, job.name.as_ref(), "name");
        changed |= merge(&mut self.state, job.state.as_ref(), "state");
        changed |= merge(&mut self.owner, job.owner.as_ref(), "owner");
        changed |= merge(
            &mut self.tasks,
            job.tasks.as_ref().filter(|t| !t.is_empty()),
            "tasks",
        );
        changed |= merge(&mut self.sub_time, job.sub_time.as_ref(), "sub_time");
        changed |= merge(&mut self.start_time, job.start_time.as_ref(), "start_time");

        if let Some(exclusive) = job.exclusive.filter(|e| *e != self.exclusive) {
            trace!(from = self.exclusive, to = exclusive, "Updating exclusive");
            self.exclusive = exclusive;
            changed = true;
        }
        if job.slots > 0 && self.slots != job.slots {
            trace!(from = self.slots, to = job.slots, "Updating slots");
            self.slots = job.slots;
            changed = true;
        }
        changed
    }
}

fn merge<T>(field: &mut Option<T>, incoming: Option<&T>, what: &'static str) -> bool
where
    T: Clone + PartialEq + core::fmt::Debug,
{
    match incoming {
        Some(value) if field.as_ref() != Some(value) => {
            trace!(field = what, from = ?field, to = ?value, "Updating job field");
            *field = Some(value.clone());
            true
        }
        _ => false,
    }
}

impl core::fmt::Display for GridJob {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "GridJob[{}, {}, {}, slots={}, state={}]",
            self.full_id(),
            self.node.as_deref().unwrap_or(""),
            self.owner.as_deref().unwrap_or(""),
            self.slots,
            self.state.as_deref().unwrap_or("")
        )
    }
}
