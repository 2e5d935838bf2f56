//! A node's fixed array of job slots.

use std::collections::BTreeSet;

use gridline_types::FullJobId;
use tracing::{debug, error, trace};

/// Result of placing a job on a node.
///
/// A non-zero `shortfall` means the node ran out of free slots. The job
/// keeps the slots it did get; nothing is rolled back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotAssignment {
    /// Slot indices now holding the job, in array order.
    pub assigned: Vec<usize>,
    /// Requested slots that could not be placed.
    pub shortfall: u32,
}

impl SlotAssignment {
    /// Whether every requested slot was placed.
    pub const fn is_complete(&self) -> bool {
        self.shortfall == 0
    }
}

/// A node in a [`GridState`](crate::GridState).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridNode {
    short_name: String,
    slots: Vec<Option<FullJobId>>,
}

impl GridNode {
    /// An empty node with `capacity` slots.
    pub fn new(short_name: &str, capacity: u32) -> Self {
        let len = usize::try_from(capacity).unwrap_or(usize::MAX);
        Self {
            short_name: short_name.to_owned(),
            slots: vec![None; len],
        }
    }

    /// The node's short name.
    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    /// Slot contents in array order.
    pub fn slots(&self) -> &[Option<FullJobId>] {
        &self.slots
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of empty slots.
    pub fn free_slots(&self) -> usize {
        self.slots.iter().filter(|s| s.is_none()).count()
    }

    /// Distinct jobs occupying at least one slot.
    pub fn job_ids(&self) -> BTreeSet<FullJobId> {
        self.slots.iter().flatten().cloned().collect()
    }

    /// Whether `job` holds any slot here.
    pub fn contains(&self, job: &FullJobId) -> bool {
        self.slots.iter().flatten().any(|s| s == job)
    }

    /// First-fit placement: fill free slots in array order until `requested`
    /// slots are taken or the array is exhausted. A running job always
    /// takes at least one slot.
    pub fn assign_job_to_slots(&mut self, job: &FullJobId, requested: u32) -> SlotAssignment {
        let mut remaining = requested.max(1);
        let mut assigned = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if remaining == 0 {
                break;
            }
            if slot.is_none() {
                *slot = Some(job.clone());
                assigned.push(index);
                remaining = remaining.saturating_sub(1);
            }
        }

        if remaining > 0 {
            let occupants: Vec<String> = self.job_ids().iter().map(ToString::to_string).collect();
            debug!(node = %self, "Node state at over-allocation");
            error!(
                node = %self.short_name,
                job = %job,
                shortfall = remaining,
                occupants = ?occupants,
                "Cannot allocate slots, other jobs are running"
            );
        } else {
            trace!(node = %self.short_name, job = %job, slots = ?assigned, "Assigned job to slots");
        }

        SlotAssignment {
            assigned,
            shortfall: remaining,
        }
    }

    /// Clear every slot referencing `job`. Returns how many were cleared.
    pub fn remove_job(&mut self, job: &FullJobId) -> usize {
        let mut cleared: usize = 0;
        for slot in &mut self.slots {
            if slot.as_ref() == Some(job) {
                *slot = None;
                cleared = cleared.saturating_add(1);
            }
        }
        if cleared > 0 {
            trace!(node = %self.short_name, job = %job, cleared, "Removed job from node");
        }
        cleared
    }
}

impl core::fmt::Display for GridNode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "GridNode[{}, (", self.short_name)?;
        for (i, slot) in self.slots.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match slot {
                Some(job) => write!(f, "{job}")?,
                None => f.write_str("empty")?,
            }
        }
        f.write_str(")]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> FullJobId {
        FullJobId::from(s)
    }

    #[test]
    fn first_fit_fills_gaps_in_order() {
        let mut node = GridNode::new("n1", 4);
        node.assign_job_to_slots(&id("1"), 1);
        node.assign_job_to_slots(&id("2"), 1);
        node.assign_job_to_slots(&id("3"), 1);
        assert_eq!(node.remove_job(&id("2")), 1);

        let placed = node.assign_job_to_slots(&id("4"), 2);
        assert_eq!(placed.assigned, vec![1, 3]);
        assert!(placed.is_complete());
        assert_eq!(node.free_slots(), 0);
    }

    #[test]
    fn over_allocation_keeps_partial_placement() {
        let mut node = GridNode::new("n1", 2);
        node.assign_job_to_slots(&id("1"), 1);
        let placed = node.assign_job_to_slots(&id("2"), 3);
        assert_eq!(placed.assigned, vec![1]);
        assert_eq!(placed.shortfall, 2);
        assert!(node.contains(&id("2")));
    }

    #[test]
    fn remove_clears_only_that_job() {
        let mut node = GridNode::new("n1", 3);
        node.assign_job_to_slots(&id("1"), 2);
        node.assign_job_to_slots(&id("2"), 1);
        assert_eq!(node.remove_job(&id("1")), 2);
        assert_eq!(node.job_ids().into_iter().collect::<Vec<_>>(), vec![id("2")]);
        assert_eq!(node.remove_job(&id("9")), 0);
    }

    #[test]
    fn display_lists_slots() {
        let mut node = GridNode::new("n1", 2);
        node.assign_job_to_slots(&id("5.1"), 1);
        assert_eq!(node.to_string(), "GridNode[n1, (5.1 empty)]");
    }
}
