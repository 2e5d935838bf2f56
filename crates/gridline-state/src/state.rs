//! The point-in-time cluster state that lifecycle events are applied to.
//!
//! A [`GridState`] is used two ways: as the long-lived accumulator the
//! timeline derives events against, and as the disposable replay target a
//! playback controller rebuilds from a snapshot. It has no mode of its own;
//! it is data plus event application.
//!
//! Nodes are created from the snapshot the state is built from. A START on
//! a node that appeared later is placed on a node created on demand from
//! the topology the state was built with.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use gridline_types::{FullJobId, JobEvent, JobEventKind, Snapshot, SnapshotJob};
use tracing::{debug, trace};

use crate::diff::StateDiscrepancy;
use crate::error::StateError;
use crate::job::GridJob;
use crate::node::GridNode;
use crate::topology::NodeTopology;

/// Nodes, jobs, the queue and per-owner slot usage at one instant.
#[derive(Debug, Clone)]
pub struct GridState {
    name: String,
    topology: Arc<NodeTopology>,
    nodes: BTreeMap<String, GridNode>,
    jobs: BTreeMap<FullJobId, GridJob>,
    queued: BTreeSet<FullJobId>,
    slots_used_by_owner: BTreeMap<String, u64>,
}

impl GridState {
    /// An empty state with no nodes.
    pub fn empty(topology: &Arc<NodeTopology>, name: &str) -> Self {
        Self {
            name: name.to_owned(),
            topology: Arc::clone(topology),
            nodes: BTreeMap::new(),
            jobs: BTreeMap::new(),
            queued: BTreeSet::new(),
            slots_used_by_owner: BTreeMap::new(),
        }
    }

    /// Build the state a snapshot describes.
    ///
    /// Nodes that appear twice under the same short name are merged.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::MissingTopology`] if any node in the snapshot
    /// has no slot capacity in `topology`.
    pub fn from_snapshot(
        snapshot: &Snapshot,
        topology: &Arc<NodeTopology>,
        name: &str,
    ) -> Result<Self, StateError> {
        let mut state = Self::empty(topology, name);

        for ss_node in snapshot.nodes() {
            let short = ss_node.short_name().to_owned();
            state.ensure_node(&short)?;
            for ss_job in &ss_node.jobs {
                state.place_sampled_job(ss_job, &short);
            }
        }

        for ss_job in snapshot.queued_jobs() {
            let full_id = ss_job.full_id();
            if state.jobs.contains_key(&full_id) {
                debug!(state = %state.name, job = %full_id, "Queued job already running, ignoring");
                continue;
            }
            trace!(state = %state.name, job = %full_id, "Adding queued job");
            state.jobs.insert(full_id.clone(), GridJob::from_sampled(ss_job));
            state.queued.insert(full_id);
        }

        debug!(
            state = %state.name,
            nodes = state.nodes.len(),
            running = state.num_running_jobs(),
            queued = state.num_queued_jobs(),
            "Built state from snapshot"
        );
        Ok(state)
    }

    /// Add an empty node if the state does not have one by this name.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::MissingTopology`] if the node is unmapped.
    pub fn ensure_node(&mut self, short_name: &str) -> Result<(), StateError> {
        if self.nodes.contains_key(short_name) {
            return Ok(());
        }
        let capacity = self
            .topology
            .capacity(short_name)
            .ok_or_else(|| StateError::MissingTopology {
                node: short_name.to_owned(),
            })?;
        self.nodes
            .insert(short_name.to_owned(), GridNode::new(short_name, capacity));
        Ok(())
    }

    fn place_sampled_job(&mut self, ss_job: &SnapshotJob, short: &str) {
        let full_id = ss_job.full_id();
        if let Some(previous) = self.jobs.get(&full_id) {
            debug!(state = %self.name, job = %full_id, previous = %previous, "Job sampled twice, replacing");
            self.release(&full_id);
        }
        let mut job = GridJob::from_sampled(ss_job);
        job.node = Some(short.to_owned());
        if let Some(node) = self.nodes.get_mut(short) {
            node.assign_job_to_slots(&full_id, job.slots);
        }
        self.add_usage(job.owner_key(), job.slots);
        trace!(state = %self.name, job = %job, "Added running job");
        self.jobs.insert(full_id, job);
    }

    // -----------------------------------------------------------------------
    // Event application
    // -----------------------------------------------------------------------

    /// Apply one lifecycle event.
    ///
    /// - SUB queues the job, or refreshes its fields if it is already known.
    /// - START takes the job off the queue and places it first-fit on the
    ///   sampled node. A shortfall is logged and the partial placement kept.
    /// - END removes the job from its node and from the state.
    ///
    /// # Errors
    ///
    /// Returns a [`StateError`] describing the inconsistency when the event
    /// cannot be applied. The state is unchanged in that case.
    pub fn apply_event(&mut self, event: &JobEvent) -> Result<(), StateError> {
        match event.kind {
            JobEventKind::Sub => self.apply_sub(event),
            JobEventKind::Start => self.apply_start(event),
            JobEventKind::End => self.apply_end(event),
        }
    }

    fn sampled<'e>(event: &'e JobEvent) -> Result<&'e SnapshotJob, StateError> {
        event
            .job
            .as_deref()
            .ok_or_else(|| StateError::MissingSampledJob {
                kind: event.kind,
                job: event.job_id.clone(),
            })
    }

    fn apply_sub(&mut self, event: &JobEvent) -> Result<(), StateError> {
        let ss_job = Self::sampled(event)?;
        if let Some(existing) = self.jobs.get_mut(&event.job_id) {
            existing.update(ss_job);
            debug!(state = %self.name, offset = event.offset, job = %event.job_id, "Re-submitted known job");
            return Ok(());
        }
        let job = GridJob::from_sampled(ss_job);
        debug!(state = %self.name, offset = event.offset, job = %job, "Queued job");
        self.jobs.insert(event.job_id.clone(), job);
        self.queued.insert(event.job_id.clone());
        Ok(())
    }

    fn apply_start(&mut self, event: &JobEvent) -> Result<(), StateError> {
        if !self.jobs.contains_key(&event.job_id) {
            return Err(StateError::JobNotFound {
                kind: event.kind,
                job: event.job_id.clone(),
            });
        }
        let ss_job = Self::sampled(event)?;
        let node_name = ss_job.node.clone().ok_or_else(|| StateError::MissingNode {
            job: event.job_id.clone(),
        })?;
        if self.ensure_node(&node_name).is_err() {
            return Err(StateError::NodeNotFound {
                job: event.job_id.clone(),
                node: node_name,
            });
        }

        self.release(&event.job_id);
        self.queued.remove(&event.job_id);

        let Some(job) = self.jobs.get_mut(&event.job_id) else {
            return Ok(());
        };
        job.update(ss_job);
        job.node = Some(node_name.clone());
        let slots = job.slots;
        let owner = job.owner_key().to_owned();
        debug!(state = %self.name, offset = event.offset, job = %job, "Started job");

        if let Some(node) = self.nodes.get_mut(&node_name) {
            node.assign_job_to_slots(&event.job_id, slots);
        }
        self.add_usage(&owner, slots);
        Ok(())
    }

    fn apply_end(&mut self, event: &JobEvent) -> Result<(), StateError> {
        if !self.jobs.contains_key(&event.job_id) {
            return Err(StateError::JobNotFound {
                kind: event.kind,
                job: event.job_id.clone(),
            });
        }
        debug!(state = %self.name, offset = event.offset, job = %event.job_id, "Ended job");
        self.remove(&event.job_id);
        Ok(())
    }

    /// Take a running job off its node and out of the usage counter. The
    /// job stays in the job map with no node.
    fn release(&mut self, full_id: &FullJobId) {
        let Some(job) = self.jobs.get_mut(full_id) else {
            return;
        };
        let Some(node_name) = job.node.take() else {
            return;
        };
        let slots = job.slots;
        let owner = job.owner_key().to_owned();
        if let Some(node) = self.nodes.get_mut(&node_name) {
            node.remove_job(full_id);
        }
        self.sub_usage(&owner, slots);
    }

    fn remove(&mut self, full_id: &FullJobId) -> bool {
        self.release(full_id);
        self.queued.remove(full_id);
        self.jobs.remove(full_id).is_some()
    }

    /// Merge a newer sample into a known job without a lifecycle transition.
    /// Returns whether any field changed.
    pub fn update_job(&mut self, full_id: &FullJobId, ss_job: &SnapshotJob) -> bool {
        self.jobs
            .get_mut(full_id)
            .is_some_and(|job| job.update(ss_job))
    }

    /// Remove a job from every node, the queue and the job map, whatever
    /// state it is in. Returns whether the job was known.
    pub fn erase_job(&mut self, full_id: &FullJobId) -> bool {
        let erased = self.remove(full_id);
        if erased {
            debug!(state = %self.name, job = %full_id, "Erased job from state");
        }
        erased
    }

    // -----------------------------------------------------------------------
    // Owner usage
    // -----------------------------------------------------------------------

    fn add_usage(&mut self, owner: &str, slots: u32) {
        let used = self.slots_used_by_owner.entry(owner.to_owned()).or_insert(0);
        *used = used.saturating_add(u64::from(slots));
    }

    fn sub_usage(&mut self, owner: &str, slots: u32) {
        if let Some(used) = self.slots_used_by_owner.get_mut(owner) {
            *used = used.saturating_sub(u64::from(slots));
            if *used == 0 {
                self.slots_used_by_owner.remove(owner);
            }
        }
    }

    /// Slots in use per owner, maintained incrementally.
    pub const fn slots_used_by_owner(&self) -> &BTreeMap<String, u64> {
        &self.slots_used_by_owner
    }

    /// Slots in use per owner, recomputed from the running jobs.
    pub fn compute_owner_usage(&self) -> BTreeMap<String, u64> {
        let mut usage: BTreeMap<String, u64> = BTreeMap::new();
        for job in self.jobs.values().filter(|j| j.is_running()) {
            let used = usage.entry(job.owner_key().to_owned()).or_insert(0);
            *used = used.saturating_add(u64::from(job.slots));
        }
        usage
    }

    /// Replace the incremental counter with a fresh recount.
    pub fn recompute_owner_usage(&mut self) {
        self.slots_used_by_owner = self.compute_owner_usage();
    }

    /// Owners with running jobs, heaviest first, ties by name.
    pub fn owners_by_usage(&self) -> Vec<(String, u64)> {
        let mut owners: Vec<(String, u64)> = self
            .slots_used_by_owner
            .iter()
            .map(|(owner, used)| (owner.clone(), *used))
            .collect();
        owners.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        owners
    }

    // -----------------------------------------------------------------------
    // Comparison
    // -----------------------------------------------------------------------

    /// Report every difference between this state and `other`: per-node job
    /// sets, then queue membership and queued job details.
    pub fn diff_against(&self, other: &Self) -> Vec<StateDiscrepancy> {
        let mut found = Vec::new();

        let names: BTreeSet<&String> = self.nodes.keys().chain(other.nodes.keys()).collect();
        for name in names {
            let ours = self.nodes.get(name).map(GridNode::job_ids).unwrap_or_default();
            let theirs = other.nodes.get(name).map(GridNode::job_ids).unwrap_or_default();
            if ours != theirs {
                found.push(StateDiscrepancy::NodeJobs {
                    node: name.clone(),
                    ours,
                    theirs,
                });
            }
        }

        for full_id in &self.queued {
            if !other.queued.contains(full_id) {
                found.push(StateDiscrepancy::QueuedOnlyInOurs {
                    job: full_id.clone(),
                });
                continue;
            }
            if let (Some(ours), Some(theirs)) = (self.jobs.get(full_id), other.jobs.get(full_id)) {
                let (ours, theirs) = (ours.to_string(), theirs.to_string());
                if ours != theirs {
                    found.push(StateDiscrepancy::QueuedMismatch {
                        job: full_id.clone(),
                        ours,
                        theirs,
                    });
                }
            }
        }
        for full_id in other.queued.difference(&self.queued) {
            found.push(StateDiscrepancy::QueuedOnlyInTheirs {
                job: full_id.clone(),
            });
        }

        found
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Label used in log lines.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The topology this state sizes nodes from.
    pub const fn topology(&self) -> &Arc<NodeTopology> {
        &self.topology
    }

    /// A node by short name.
    pub fn node(&self, short_name: &str) -> Option<&GridNode> {
        self.nodes.get(short_name)
    }

    /// All nodes, ordered by short name.
    pub fn nodes(&self) -> impl Iterator<Item = &GridNode> {
        self.nodes.values()
    }

    /// A job by full id, queued or running.
    pub fn job(&self, full_id: &FullJobId) -> Option<&GridJob> {
        self.jobs.get(full_id)
    }

    /// All known jobs, ordered by full id.
    pub fn jobs(&self) -> impl Iterator<Item = &GridJob> {
        self.jobs.values()
    }

    /// Whether the job is waiting in the queue.
    pub fn is_queued(&self, full_id: &FullJobId) -> bool {
        self.queued.contains(full_id)
    }

    /// Queued jobs, ordered by full id.
    pub fn queued_jobs(&self) -> impl Iterator<Item = &GridJob> {
        self.queued.iter().filter_map(|id| self.jobs.get(id))
    }

    /// Number of jobs not in the queue.
    pub fn num_running_jobs(&self) -> usize {
        self.jobs.len().saturating_sub(self.queued.len())
    }

    /// Number of queued jobs.
    pub fn num_queued_jobs(&self) -> usize {
        self.queued.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use gridline_types::{SnapshotJob, SnapshotNode};

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn topology() -> Arc<NodeTopology> {
        Arc::new(NodeTopology::from_entries([("n1", 4), ("n2", 2)]))
    }

    fn sampled_on(job: SnapshotJob, node: &str) -> SnapshotJob {
        SnapshotJob {
            node: Some(node.to_owned()),
            ..job
        }
    }

    fn base() -> GridState {
        let snapshot = Snapshot::new(at(0))
            .with_node(SnapshotNode::new("q@n1.local").with_job(SnapshotJob::running(1, "amy", 2, at(0))))
            .with_node(SnapshotNode::new("q@n2.local"))
            .with_queued_job(SnapshotJob::queued(2, "bob", 1, at(0)))
            .finalized();
        GridState::from_snapshot(&snapshot, &topology(), "test").unwrap()
    }

    #[test]
    fn from_snapshot_places_and_counts() {
        let state = base();
        assert_eq!(state.num_running_jobs(), 1);
        assert_eq!(state.num_queued_jobs(), 1);
        assert_eq!(state.node("n1").unwrap().free_slots(), 2);
        assert_eq!(state.slots_used_by_owner().get("amy"), Some(&2));
        assert!(state.is_queued(&FullJobId::from("2")));
    }

    #[test]
    fn unmapped_node_is_fatal() {
        let snapshot = Snapshot::new(at(0)).with_node(SnapshotNode::new("q@mystery"));
        let err = GridState::from_snapshot(&snapshot, &topology(), "test").unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(
            err,
            StateError::MissingTopology {
                node: "mystery".to_owned()
            }
        );
    }

    #[test]
    fn sub_start_end_lifecycle() {
        let mut state = base();
        let job = SnapshotJob::queued(3, "cat", 2, at(5));
        state.apply_event(&JobEvent::sub(5, &job)).unwrap();
        assert_eq!(state.num_queued_jobs(), 2);

        let running = sampled_on(SnapshotJob::running(3, "cat", 2, at(8)), "n2");
        state.apply_event(&JobEvent::start(8, &running)).unwrap();
        let id = FullJobId::from("3");
        assert!(!state.is_queued(&id));
        assert_eq!(state.job(&id).unwrap().node.as_deref(), Some("n2"));
        assert_eq!(state.node("n2").unwrap().free_slots(), 0);
        assert_eq!(state.slots_used_by_owner().get("cat"), Some(&2));

        state.apply_event(&JobEvent::end(9, id.clone())).unwrap();
        assert!(state.job(&id).is_none());
        assert_eq!(state.node("n2").unwrap().free_slots(), 2);
        assert!(!state.slots_used_by_owner().contains_key("cat"));
    }

    #[test]
    fn ending_a_queued_job_leaves_usage_alone() {
        let mut state = base();
        state.apply_event(&JobEvent::end(3, FullJobId::from("2"))).unwrap();
        assert_eq!(state.num_queued_jobs(), 0);
        assert_eq!(state.slots_used_by_owner().get("amy"), Some(&2));
    }

    #[test]
    fn inconsistent_events_are_rejected_without_change() {
        let mut state = base();

        let err = state.apply_event(&JobEvent::end(1, FullJobId::from("99"))).unwrap_err();
        assert!(matches!(err, StateError::JobNotFound { .. }));

        let unknown = sampled_on(SnapshotJob::running(99, "x", 1, at(0)), "n1");
        let err = state.apply_event(&JobEvent::start(1, &unknown)).unwrap_err();
        assert!(matches!(err, StateError::JobNotFound { .. }));

        let nowhere = SnapshotJob::running(2, "bob", 1, at(0));
        let err = state.apply_event(&JobEvent::start(1, &nowhere)).unwrap_err();
        assert!(matches!(err, StateError::MissingNode { .. }));
        assert!(state.is_queued(&FullJobId::from("2")));

        let off_grid = sampled_on(SnapshotJob::running(2, "bob", 1, at(0)), "n9");
        let err = state.apply_event(&JobEvent::start(1, &off_grid)).unwrap_err();
        assert!(matches!(err, StateError::NodeNotFound { .. }));
        assert!(state.is_queued(&FullJobId::from("2")));

        let bare = JobEvent {
            kind: JobEventKind::Sub,
            ..JobEvent::end(1, FullJobId::from("2"))
        };
        let err = state.apply_event(&bare).unwrap_err();
        assert!(matches!(err, StateError::MissingSampledJob { .. }));
    }

    #[test]
    fn over_allocation_is_kept() {
        let mut state = base();
        let big = SnapshotJob::queued(4, "dan", 5, at(1));
        state.apply_event(&JobEvent::sub(1, &big)).unwrap();
        let big = sampled_on(SnapshotJob::running(4, "dan", 5, at(2)), "n2");
        state.apply_event(&JobEvent::start(2, &big)).unwrap();
        let node = state.node("n2").unwrap();
        assert_eq!(node.free_slots(), 0);
        assert!(node.contains(&FullJobId::from("4")));
    }

    #[test]
    fn restart_moves_job_between_nodes() {
        let mut state = base();
        let moved = sampled_on(SnapshotJob::running(1, "amy", 2, at(0)), "n2");
        state.apply_event(&JobEvent::start(4, &moved)).unwrap();
        assert!(!state.node("n1").unwrap().contains(&FullJobId::from("1")));
        assert!(state.node("n2").unwrap().contains(&FullJobId::from("1")));
        assert_eq!(state.slots_used_by_owner().get("amy"), Some(&2));
    }

    #[test]
    fn start_on_late_node_creates_it_from_topology() {
        let snapshot = Snapshot::new(at(0)).with_queued_job(SnapshotJob::queued(5, "eve", 1, at(0)));
        let mut state = GridState::from_snapshot(&snapshot, &topology(), "late").unwrap();
        let running = sampled_on(SnapshotJob::running(5, "eve", 1, at(1)), "n1");
        state.apply_event(&JobEvent::start(1, &running)).unwrap();
        assert_eq!(state.node("n1").unwrap().capacity(), 4);
    }

    #[test]
    fn erase_removes_everywhere() {
        let mut state = base();
        assert!(state.erase_job(&FullJobId::from("1")));
        assert!(state.erase_job(&FullJobId::from("2")));
        assert!(!state.erase_job(&FullJobId::from("3")));
        assert_eq!(state.num_running_jobs(), 0);
        assert_eq!(state.num_queued_jobs(), 0);
        assert_eq!(state.node("n1").unwrap().free_slots(), 4);
        assert!(state.slots_used_by_owner().is_empty());
    }

    #[test]
    fn owners_ordered_by_usage_then_name() {
        let snapshot = Snapshot::new(at(0))
            .with_node(
                SnapshotNode::new("q@n1")
                    .with_job(SnapshotJob::running(1, "zed", 1, at(0)))
                    .with_job(SnapshotJob::running(2, "amy", 1, at(0)))
                    .with_job(SnapshotJob::running(3, "bob", 2, at(0))),
            )
            .finalized();
        let state = GridState::from_snapshot(&snapshot, &topology(), "usage").unwrap();
        let owners: Vec<String> = state.owners_by_usage().into_iter().map(|(o, _)| o).collect();
        assert_eq!(owners, vec!["bob", "amy", "zed"]);
        assert_eq!(&state.compute_owner_usage(), state.slots_used_by_owner());
    }

    #[test]
    fn diff_reports_each_kind() {
        let ours = base();
        let mut theirs = base();
        assert!(ours.diff_against(&theirs).is_empty());

        theirs.erase_job(&FullJobId::from("1"));
        let mut changed = SnapshotJob::queued(2, "bob", 1, at(0));
        changed.state = Some("hqw".to_owned());
        theirs.apply_event(&JobEvent::sub(1, &changed)).unwrap();
        theirs
            .apply_event(&JobEvent::sub(1, &SnapshotJob::queued(8, "bob", 1, at(0))))
            .unwrap();

        let found = ours.diff_against(&theirs);
        assert!(found.iter().any(|d| matches!(d, StateDiscrepancy::NodeJobs { node, .. } if node == "n1")));
        assert!(found.iter().any(|d| matches!(d, StateDiscrepancy::QueuedMismatch { .. })));
        assert!(found.iter().any(
            |d| matches!(d, StateDiscrepancy::QueuedOnlyInTheirs { job } if job.as_str() == "8")
        ));
        assert_eq!(found.len(), 3);
    }
}
