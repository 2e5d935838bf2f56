//! Timestamped occurrences on the timeline.
//!
//! A [`TimelineEvent`] is either a job lifecycle transition ([`JobEvent`])
//! or a structural marker recording where a snapshot landed. Markers are
//! diagnostic only and never mutate state.

use crate::enums::JobEventKind;
use crate::ids::{FullJobId, Offset};
use crate::snapshot::SnapshotJob;

/// Identity of a lifecycle event for deduplication: `(type, job, offset)`.
pub type EventKey = (JobEventKind, FullJobId, Offset);

/// A job lifecycle transition at an offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobEvent {
    /// Milliseconds since the timeline baseline.
    pub offset: Offset,
    /// Which transition this is.
    pub kind: JobEventKind,
    /// The job the event applies to.
    pub job_id: FullJobId,
    /// The sampled job that produced a SUB or START. `None` for END.
    pub job: Option<Box<SnapshotJob>>,
}

impl JobEvent {
    /// A submission derived from a sampled job.
    pub fn sub(offset: Offset, job: &SnapshotJob) -> Self {
        Self {
            offset,
            kind: JobEventKind::Sub,
            job_id: job.full_id(),
            job: Some(Box::new(job.clone())),
        }
    }

    /// A start derived from a sampled job.
    pub fn start(offset: Offset, job: &SnapshotJob) -> Self {
        Self {
            offset,
            kind: JobEventKind::Start,
            job_id: job.full_id(),
            job: Some(Box::new(job.clone())),
        }
    }

    /// An end, identified by full job id only.
    pub const fn end(offset: Offset, job_id: FullJobId) -> Self {
        Self {
            offset,
            kind: JobEventKind::End,
            job_id,
            job: None,
        }
    }

    /// The dedup key for this event.
    pub fn key(&self) -> EventKey {
        (self.kind, self.job_id.clone(), self.offset)
    }

    /// Human-readable key, `TYPE_jobid@offset`, used in timeline dumps.
    pub fn cache_key(&self) -> String {
        format!("{}_{}@{}", self.kind, self.job_id, self.offset)
    }
}

impl core::fmt::Display for JobEvent {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "JobEvent[{}]", self.cache_key())
    }
}

/// Anything stored in the timeline's event log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineEvent {
    /// A lifecycle transition.
    Job(JobEvent),
    /// A snapshot landed at this offset.
    SnapshotMarker {
        /// Offset of the snapshot's sampling time.
        offset: Offset,
    },
}

impl TimelineEvent {
    /// The event's offset.
    pub const fn offset(&self) -> Offset {
        match self {
            Self::Job(e) => e.offset,
            Self::SnapshotMarker { offset } => *offset,
        }
    }

    /// The lifecycle event, if this is one.
    pub const fn as_job(&self) -> Option<&JobEvent> {
        match self {
            Self::Job(e) => Some(e),
            Self::SnapshotMarker { .. } => None,
        }
    }
}

impl From<JobEvent> for TimelineEvent {
    fn from(event: JobEvent) -> Self {
        Self::Job(event)
    }
}
