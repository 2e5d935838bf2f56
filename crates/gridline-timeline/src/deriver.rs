//! Infer lifecycle events from the difference between the accumulated state
//! and a newly arrived snapshot.
//!
//! Snapshots are coarse: a job seen queued in one poll and running in the
//! next started somewhere in between, and a job that vanished ended
//! somewhere in between. Every inferred event is therefore clamped into the
//! bracket `(prev, current]` of the two snapshot offsets that produced it.
//!
//! Order of emission, which is also the application order within one
//! offset:
//!
//! 1. END for every known job missing from the snapshot, at `prev + 1` or
//!    at the parallel-split time for an aggregate job that fragmented.
//! 2. SUB + START for running jobs seen for the first time.
//! 3. START for known jobs that have started since.
//! 4. SUB for queued jobs seen for the first time. Known queued jobs have
//!    their fields refreshed in place with no event.

use chrono::{DateTime, Utc};
use gridline_state::GridState;
use gridline_types::{FullJobId, JobEvent, Offset, Snapshot, offset_between};
use tracing::{debug, error, trace};

/// The offsets of the previous and the incoming snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bracket {
    /// Offset of the last snapshot derived.
    pub prev: Offset,
    /// Offset of the incoming snapshot.
    pub current: Offset,
}

impl Bracket {
    /// Bracket between two snapshot offsets.
    pub const fn new(prev: Offset, current: Offset) -> Self {
        Self { prev, current }
    }

    /// Move `offset` into `(prev, current]`. When the bracket is empty
    /// (`current <= prev`) everything collapses onto `current`.
    pub fn clamp(self, offset: Offset) -> Offset {
        offset.max(self.prev.saturating_add(1)).min(self.current)
    }

    /// Whether `offset` lies inside `(prev, current]`.
    pub const fn contains(self, offset: Offset) -> bool {
        offset > self.prev && offset <= self.current
    }
}

/// Derives lifecycle events for one snapshot.
#[derive(Debug, Clone, Copy)]
pub struct EventDeriver {
    baseline: DateTime<Utc>,
    bracket: Bracket,
}

/// Events inferred for one snapshot, in emission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Derivation {
    /// Candidate events, not yet deduplicated.
    pub events: Vec<JobEvent>,
    /// Running jobs skipped because they carried no start time.
    pub missing_start_times: usize,
    /// Known queued jobs whose fields were refreshed in place.
    pub updated_jobs: usize,
}

impl EventDeriver {
    /// A deriver for a snapshot landing in `bracket`.
    pub const fn new(baseline: DateTime<Utc>, bracket: Bracket) -> Self {
        Self { baseline, bracket }
    }

    fn clamped(&self, time: DateTime<Utc>) -> Offset {
        self.bracket.clamp(offset_between(self.baseline, time))
    }

    /// Compute the events that move `state` towards `snapshot`.
    ///
    /// `state` is only touched to refresh the fields of known queued jobs.
    pub fn derive(&self, state: &mut GridState, snapshot: &Snapshot) -> Derivation {
        let mut out = Derivation::default();
        let present = snapshot.full_job_ids();
        let default_end = self.bracket.clamp(self.bracket.prev.saturating_add(1));

        // Known jobs that vanished.
        let gone: Vec<(FullJobId, Offset)> = state
            .jobs()
            .filter(|job| !present.contains(&job.full_id()))
            .map(|job| {
                let split_at = if job.tasks.is_none() {
                    snapshot.parallel_job_starts().get(&job.job_id)
                } else {
                    None
                };
                let offset = split_at.map_or(default_end, |at| self.clamped(*at));
                (job.full_id(), offset)
            })
            .collect();
        for (full_id, offset) in gone {
            trace!(job = %full_id, offset, "Known job ended");
            out.events.push(JobEvent::end(offset, full_id));
        }

        // Running jobs.
        for ss_job in snapshot.running_jobs() {
            let full_id = ss_job.full_id();
            let known = state.job(&full_id);
            let Some(start_time) = ss_job.start_time else {
                if known.is_none_or(|job| !job.is_running()) {
                    error!(job = %ss_job, "Job running on a node does not have a start time");
                    out.missing_start_times = out.missing_start_times.saturating_add(1);
                }
                continue;
            };
            let offset = self.clamped(start_time);
            match known {
                None => {
                    trace!(job = %full_id, offset, "New job submitted and started");
                    out.events.push(JobEvent::sub(offset, ss_job));
                    out.events.push(JobEvent::start(offset, ss_job));
                }
                Some(job) if !job.is_running() || job.start_time.is_none() => {
                    trace!(job = %full_id, offset, "Known job started");
                    out.events.push(JobEvent::start(offset, ss_job));
                }
                Some(_) => {}
            }
        }

        // Queued jobs.
        for ss_job in snapshot.queued_jobs() {
            let full_id = ss_job.full_id();
            if state.job(&full_id).is_some() {
                if state.update_job(&full_id, ss_job) {
                    debug!(job = %full_id, "Queued job fields updated");
                    out.updated_jobs = out.updated_jobs.saturating_add(1);
                }
                continue;
            }
            let offset = ss_job
                .sub_time
                .or(ss_job.start_time)
                .map_or(default_end, |at| self.clamped(at));
            trace!(job = %full_id, offset, "New job submitted");
            out.events.push(JobEvent::sub(offset, ss_job));
        }

        out
    }
}
