//! Immutable views of a playback state handed to the rendering layer.
//!
//! A [`PlaybackFrame`] is built once per tick and published through a
//! `tokio::sync::watch` channel. Nothing in it borrows from the controller.

use chrono::{DateTime, Utc};
use gridline_state::{GridJob, GridNode};
use gridline_types::{FullJobId, Offset, PlayState};
use serde::Serialize;
use ts_rs::TS;

/// Everything a renderer needs to draw one instant of playback.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PlaybackFrame {
    /// Controller state when the frame was taken.
    pub state: PlayState,
    /// Playback position in milliseconds since the timeline baseline.
    pub position: Offset,
    /// Speed multiplier.
    pub speed: f64,
    /// Whether playback is tailing the live edge.
    pub live: bool,
    /// Nodes in name order with their slot contents.
    pub nodes: Vec<NodeFrame>,
    /// Pending jobs, earliest submission first.
    pub queue: Vec<QueuedJobFrame>,
    /// Owners with running jobs, heaviest first.
    pub usage: Vec<OwnerUsage>,
}

impl PlaybackFrame {
    /// A frame with no cluster contents.
    pub const fn empty(state: PlayState, position: Offset, speed: f64) -> Self {
        Self {
            state,
            position,
            speed,
            live: false,
            nodes: Vec::new(),
            queue: Vec::new(),
            usage: Vec::new(),
        }
    }

    /// Total number of occupied slots across all nodes.
    pub fn used_slots(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| n.slots.iter().filter(|s| s.is_some()).count())
            .sum()
    }
}

/// One node's slot array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct NodeFrame {
    /// Short node name.
    pub name: String,
    /// Occupant of each slot, by full job id.
    pub slots: Vec<Option<FullJobId>>,
}

impl From<&GridNode> for NodeFrame {
    fn from(node: &GridNode) -> Self {
        Self {
            name: node.short_name().to_owned(),
            slots: node.slots().to_vec(),
        }
    }
}

/// A pending job as shown in the queue list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct QueuedJobFrame {
    /// Full job id.
    pub job: FullJobId,
    /// Submitting user, if known.
    pub owner: Option<String>,
    /// Slots requested.
    pub slots: u32,
    /// Submission time, if reported.
    pub sub_time: Option<DateTime<Utc>>,
}

impl From<&GridJob> for QueuedJobFrame {
    fn from(job: &GridJob) -> Self {
        Self {
            job: job.full_id(),
            owner: job.owner.clone(),
            slots: job.slots,
            sub_time: job.sub_time,
        }
    }
}

/// Slots held by one owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct OwnerUsage {
    /// Owner name.
    pub owner: String,
    /// Slots in use.
    pub slots: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn serializes_for_the_renderer() {
        let mut frame = PlaybackFrame::empty(PlayState::Playing, 1_500, 2.0);
        frame.nodes.push(NodeFrame {
            name: "n1".to_owned(),
            slots: vec![Some(FullJobId::from("7.2")), None],
        });
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["state"], "PLAYING");
        assert_eq!(json["position"], 1_500);
        assert_eq!(json["nodes"][0]["slots"][0], "7.2");
        assert!(json["nodes"][0]["slots"][1].is_null());
        assert_eq!(frame.used_slots(), 1);
    }
}
