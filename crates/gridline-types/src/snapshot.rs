//! One polled observation of cluster occupancy.
//!
//! A [`Snapshot`] holds the sampling time, the nodes with the jobs running
//! on them, and the pending queue. Snapshots are immutable once
//! [`finalize`](Snapshot::finalize)d; the only mutation afterwards is
//! [`erase_job`](Snapshot::erase_job), used when history is corrected.
//!
//! # Parallel jobs
//!
//! A parallel job may be reported as one aggregate allocation on a single
//! node and, a poll later, as many per-task allocations spread over several
//! nodes. Finalisation detects the latter shape (the same task-less job id
//! on more than one node), gives each instance a task index, and records
//! the job's start time in the parallel-split hint map so the deriver can
//! end the aggregate job at the moment it fragmented.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;
use ts_rs::TS;

use crate::ids::FullJobId;

// ---------------------------------------------------------------------------
// SnapshotJob
// ---------------------------------------------------------------------------

/// A job as seen in a single snapshot (the sampled view).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SnapshotJob {
    /// Numeric scheduler job id.
    pub job_id: u64,
    /// Task index for array or split parallel jobs.
    #[serde(default)]
    pub tasks: Option<String>,
    /// Job name as submitted.
    #[serde(default)]
    pub name: Option<String>,
    /// Scheduler state string (e.g. `r`, `qw`).
    #[serde(default)]
    pub state: Option<String>,
    /// Submitting user.
    #[serde(default)]
    pub owner: Option<String>,
    /// Whether the job requested exclusive node access, if reported.
    #[serde(default)]
    pub exclusive: Option<bool>,
    /// Number of slots requested.
    #[serde(default)]
    pub slots: u32,
    /// Submission time, if reported.
    #[serde(default)]
    pub sub_time: Option<DateTime<Utc>>,
    /// Start time, if the job is running.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    /// Short name of the node the job was sampled on. Filled in by
    /// [`SnapshotNode::add_job`] and [`Snapshot::finalize`].
    #[serde(default)]
    pub node: Option<String>,
}

impl SnapshotJob {
    /// A running job with a start time.
    pub fn running(job_id: u64, owner: &str, slots: u32, start_time: DateTime<Utc>) -> Self {
        Self {
            job_id,
            owner: Some(owner.to_owned()),
            state: Some("r".to_owned()),
            slots,
            start_time: Some(start_time),
            ..Self::default()
        }
    }

    /// A pending job with a submission time.
    pub fn queued(job_id: u64, owner: &str, slots: u32, sub_time: DateTime<Utc>) -> Self {
        Self {
            job_id,
            owner: Some(owner.to_owned()),
            state: Some("qw".to_owned()),
            slots,
            sub_time: Some(sub_time),
            ..Self::default()
        }
    }

    /// Set the task index.
    #[must_use]
    pub fn with_task(mut self, task: &str) -> Self {
        self.tasks = Some(task.to_owned());
        self
    }

    /// Whether the job carries a non-empty task index.
    pub fn has_task(&self) -> bool {
        self.tasks.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// The job's identity across snapshots.
    pub fn full_id(&self) -> FullJobId {
        FullJobId::new(self.job_id, self.tasks.as_deref())
    }
}

impl core::fmt::Display for SnapshotJob {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "SnapshotJob[{}, {}, {}, slots={}, state={}]",
            self.full_id(),
            self.node.as_deref().unwrap_or(""),
            self.owner.as_deref().unwrap_or(""),
            self.slots,
            self.state.as_deref().unwrap_or("")
        )
    }
}

// ---------------------------------------------------------------------------
// SnapshotNode
// ---------------------------------------------------------------------------

/// A node in a snapshot and the jobs running on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SnapshotNode {
    /// Queue instance name, `<queue>@<hostname>`, or a bare hostname.
    pub name: String,
    /// Jobs running on this node.
    #[serde(default)]
    pub jobs: Vec<SnapshotJob>,
}

impl SnapshotNode {
    /// Create a node with no jobs.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            jobs: Vec::new(),
        }
    }

    /// Host part of the name up to its first `.`.
    ///
    /// `all.q@f00u25.cluster.org` becomes `f00u25`.
    pub fn short_name(&self) -> &str {
        let host = self
            .name
            .split_once('@')
            .map_or(self.name.as_str(), |(_, host)| host);
        host.split('.').next().unwrap_or(host)
    }

    /// Attach a running job, recording this node on it.
    pub fn add_job(&mut self, mut job: SnapshotJob) {
        job.node = Some(self.short_name().to_owned());
        self.jobs.push(job);
    }

    /// Builder form of [`add_job`](Self::add_job).
    #[must_use]
    pub fn with_job(mut self, job: SnapshotJob) -> Self {
        self.add_job(job);
        self
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// One poll result: sampling time, running jobs by node, queued jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    sampling_time: DateTime<Utc>,
    #[serde(default)]
    nodes: Vec<SnapshotNode>,
    #[serde(default)]
    queued_jobs: Vec<SnapshotJob>,
    /// Job id to the time it is known to have fragmented into per-task jobs.
    #[serde(default)]
    parallel_job_starts: BTreeMap<u64, DateTime<Utc>>,
}

impl Snapshot {
    /// Create an empty snapshot sampled at `sampling_time`.
    pub const fn new(sampling_time: DateTime<Utc>) -> Self {
        Self {
            sampling_time,
            nodes: Vec::new(),
            queued_jobs: Vec::new(),
            parallel_job_starts: BTreeMap::new(),
        }
    }

    /// Add a node. Call [`finalize`](Self::finalize) once all data is in.
    pub fn add_node(&mut self, node: SnapshotNode) {
        self.nodes.push(node);
    }

    /// Add a pending job.
    pub fn add_queued_job(&mut self, mut job: SnapshotJob) {
        job.node = None;
        self.queued_jobs.push(job);
    }

    /// Builder form of [`add_node`](Self::add_node).
    #[must_use]
    pub fn with_node(mut self, node: SnapshotNode) -> Self {
        self.add_node(node);
        self
    }

    /// Builder form of [`add_queued_job`](Self::add_queued_job).
    #[must_use]
    pub fn with_queued_job(mut self, job: SnapshotJob) -> Self {
        self.add_queued_job(job);
        self
    }

    /// Record that `job_id` fragmented into per-task jobs at `at`.
    ///
    /// Normally produced by [`finalize`](Self::finalize); exposed for
    /// producers that learn about splits out of band.
    pub fn add_parallel_split(&mut self, job_id: u64, at: DateTime<Utc>) {
        self.parallel_job_starts.insert(job_id, at);
    }

    /// Complete construction: stamp node names on running jobs and split
    /// task-less jobs found on several nodes into numbered tasks.
    ///
    /// Idempotent: a second call finds every duplicated job already
    /// carrying a task index.
    pub fn finalize(&mut self) {
        for node in &mut self.nodes {
            let short = node.short_name().to_owned();
            for job in &mut node.jobs {
                job.node = Some(short.clone());
            }
        }

        let mut counts: BTreeMap<FullJobId, usize> = BTreeMap::new();
        for job in self.nodes.iter().flat_map(|n| n.jobs.iter()) {
            if job.has_task() {
                continue;
            }
            let count = counts.entry(job.full_id()).or_insert(0);
            *count = count.saturating_add(1);
        }

        let parallel: BTreeSet<FullJobId> = counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(id, _)| id)
            .collect();
        if parallel.is_empty() {
            return;
        }

        let mut order: Vec<usize> = (0..self.nodes.len()).collect();
        order.sort_by(|a, b| {
            let na = self.nodes.get(*a).map(SnapshotNode::short_name);
            let nb = self.nodes.get(*b).map(SnapshotNode::short_name);
            na.cmp(&nb)
        });

        for full_id in &parallel {
            trace!(job = %full_id, "Parallel job detected, adding task numbers");
            let mut index: u32 = 1;
            for node_idx in &order {
                let Some(node) = self.nodes.get_mut(*node_idx) else {
                    continue;
                };
                for job in &mut node.jobs {
                    if job.has_task() || job.full_id() != *full_id {
                        continue;
                    }
                    if let Some(start) = job.start_time {
                        self.parallel_job_starts.insert(job.job_id, start);
                    }
                    job.tasks = Some(index.to_string());
                    index = index.saturating_add(1);
                }
            }
        }
    }

    /// Builder form of [`finalize`](Self::finalize).
    #[must_use]
    pub fn finalized(mut self) -> Self {
        self.finalize();
        self
    }

    /// When this snapshot was sampled.
    pub const fn sampling_time(&self) -> DateTime<Utc> {
        self.sampling_time
    }

    /// Nodes in the order they were reported.
    pub fn nodes(&self) -> &[SnapshotNode] {
        &self.nodes
    }

    /// Pending jobs in the order they were reported.
    pub fn queued_jobs(&self) -> &[SnapshotJob] {
        &self.queued_jobs
    }

    /// The parallel-split hint map.
    pub const fn parallel_job_starts(&self) -> &BTreeMap<u64, DateTime<Utc>> {
        &self.parallel_job_starts
    }

    /// Every running job, node by node.
    pub fn running_jobs(&self) -> impl Iterator<Item = &SnapshotJob> {
        self.nodes.iter().flat_map(|n| n.jobs.iter())
    }

    /// Full ids of every running and queued job.
    pub fn full_job_ids(&self) -> BTreeSet<FullJobId> {
        self.running_jobs()
            .chain(self.queued_jobs.iter())
            .map(SnapshotJob::full_id)
            .collect()
    }

    /// Find a job anywhere in the snapshot.
    pub fn job(&self, full_id: &FullJobId) -> Option<&SnapshotJob> {
        self.running_jobs()
            .chain(self.queued_jobs.iter())
            .find(|j| j.full_id() == *full_id)
    }

    /// Remove every occurrence of a job. Returns how many were removed.
    pub fn erase_job(&mut self, full_id: &FullJobId) -> usize {
        let mut removed: usize = 0;
        for node in &mut self.nodes {
            let before = node.jobs.len();
            node.jobs.retain(|j| j.full_id() != *full_id);
            removed = removed.saturating_add(before.saturating_sub(node.jobs.len()));
        }
        let before = self.queued_jobs.len();
        self.queued_jobs.retain(|j| j.full_id() != *full_id);
        removed = removed.saturating_add(before.saturating_sub(self.queued_jobs.len()));
        if removed > 0 {
            tracing::debug!(job = %full_id, sampled_at = %self.sampling_time, "Erased job from snapshot");
        }
        removed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[test]
    fn short_name_strips_queue_and_domain() {
        assert_eq!(SnapshotNode::new("all.q@f00u25.cluster.org").short_name(), "f00u25");
        assert_eq!(SnapshotNode::new("h04u15").short_name(), "h04u15");
        assert_eq!(SnapshotNode::new("short.q@f01u02").short_name(), "f01u02");
    }

    #[test]
    fn add_job_stamps_node() {
        let node = SnapshotNode::new("all.q@n1.example").with_job(SnapshotJob::running(1, "amy", 1, at(0)));
        assert_eq!(node.jobs.first().unwrap().node.as_deref(), Some("n1"));
    }

    #[test]
    fn queued_jobs_have_no_node() {
        let mut job = SnapshotJob::queued(5, "bob", 2, at(0));
        job.node = Some("stale".to_owned());
        let snapshot = Snapshot::new(at(10)).with_queued_job(job);
        assert!(snapshot.queued_jobs().first().unwrap().node.is_none());
    }

    #[test]
    fn duplicated_job_is_split_into_tasks() {
        let start = at(50);
        let snapshot = Snapshot::new(at(100))
            .with_node(SnapshotNode::new("q@n2").with_job(SnapshotJob::running(42, "amy", 1, start)))
            .with_node(SnapshotNode::new("q@n1").with_job(SnapshotJob::running(42, "amy", 1, start)))
            .with_node(SnapshotNode::new("q@n3").with_job(SnapshotJob::running(7, "bob", 4, start)))
            .finalized();

        let ids: BTreeSet<String> = snapshot
            .full_job_ids()
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        assert!(ids.contains("42.1"));
        assert!(ids.contains("42.2"));
        assert!(ids.contains("7"));
        assert!(!ids.contains("42"));

        // Tasks are numbered in node short-name order.
        let n1 = snapshot.nodes().iter().find(|n| n.short_name() == "n1").unwrap();
        assert_eq!(n1.jobs.first().unwrap().tasks.as_deref(), Some("1"));
        assert_eq!(snapshot.parallel_job_starts().get(&42), Some(&start));
        assert!(!snapshot.parallel_job_starts().contains_key(&7));
    }

    #[test]
    fn finalize_is_idempotent() {
        let start = at(5);
        let once = Snapshot::new(at(10))
            .with_node(SnapshotNode::new("q@a").with_job(SnapshotJob::running(3, "u", 1, start)))
            .with_node(SnapshotNode::new("q@b").with_job(SnapshotJob::running(3, "u", 1, start)))
            .finalized();
        let twice = once.clone().finalized();
        assert_eq!(once, twice);
    }

    #[test]
    fn erase_job_removes_everywhere() {
        let mut snapshot = Snapshot::new(at(0))
            .with_node(SnapshotNode::new("q@a").with_job(SnapshotJob::running(1, "u", 1, at(0))))
            .with_queued_job(SnapshotJob::queued(2, "u", 1, at(0)));
        assert_eq!(snapshot.erase_job(&FullJobId::from("1")), 1);
        assert_eq!(snapshot.erase_job(&FullJobId::from("2")), 1);
        assert_eq!(snapshot.erase_job(&FullJobId::from("3")), 0);
        assert!(snapshot.full_job_ids().is_empty());
    }

    #[test]
    fn deserialized_snapshot_is_stamped_on_finalize() {
        let json = r#"{
            "sampling_time": "2024-01-01T00:00:00Z",
            "nodes": [{"name": "all.q@f00u01.local", "jobs": [{"job_id": 9, "slots": 2, "start_time": "2023-12-31T23:59:00Z"}]}],
            "queued_jobs": [{"job_id": 10, "slots": 1}]
        }"#;
        let snapshot: Snapshot = serde_json::from_str::<Snapshot>(json).unwrap().finalized();
        let job = snapshot.job(&FullJobId::from("9")).unwrap();
        assert_eq!(job.node.as_deref(), Some("f00u01"));
        assert_eq!(snapshot.queued_jobs().len(), 1);
    }
}
