//! Applying hand-written event sequences brings a state built from one
//! snapshot into agreement with a state built from a later one.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use gridline_state::{GridState, NodeTopology};
use gridline_types::{FullJobId, JobEvent, Snapshot, SnapshotJob, SnapshotNode};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap()
}

fn topology() -> Arc<NodeTopology> {
    Arc::new(NodeTopology::from_entries([("a", 2), ("b", 2)]))
}

fn on(job: SnapshotJob, node: &str) -> SnapshotJob {
    SnapshotJob {
        node: Some(node.to_owned()),
        ..job
    }
}

#[test]
fn replay_converges_on_later_snapshot() {
    let first = Snapshot::new(at(0))
        .with_node(SnapshotNode::new("q@a").with_job(SnapshotJob::running(1, "amy", 1, at(0))))
        .with_node(SnapshotNode::new("q@b"))
        .with_queued_job(SnapshotJob::queued(2, "bob", 2, at(0)))
        .finalized();
    let second = Snapshot::new(at(60))
        .with_node(SnapshotNode::new("q@a").with_job(SnapshotJob::running(3, "cat", 1, at(40))))
        .with_node(SnapshotNode::new("q@b").with_job(SnapshotJob::running(2, "bob", 2, at(30))))
        .finalized();

    let topology = topology();
    let mut replay = GridState::from_snapshot(&first, &topology, "replay").unwrap();
    let truth = GridState::from_snapshot(&second, &topology, "truth").unwrap();
    assert!(!replay.diff_against(&truth).is_empty());

    let sub3 = SnapshotJob::running(3, "cat", 1, at(40));
    let events = [
        JobEvent::end(1, FullJobId::from("1")),
        JobEvent::start(30_000, &on(SnapshotJob::running(2, "bob", 2, at(30)), "b")),
        JobEvent::sub(40_000, &sub3),
        JobEvent::start(40_000, &on(sub3.clone(), "a")),
    ];
    for event in &events {
        replay.apply_event(event).unwrap();
    }

    assert!(replay.diff_against(&truth).is_empty());
    assert_eq!(replay.owners_by_usage(), truth.owners_by_usage());
    assert_eq!(replay.num_running_jobs(), 2);
    assert_eq!(replay.num_queued_jobs(), 0);
}

#[test]
fn failed_event_does_not_block_later_ones() {
    let snapshot = Snapshot::new(at(0)).with_node(SnapshotNode::new("q@a")).finalized();
    let mut state = GridState::from_snapshot(&snapshot, &topology(), "skip").unwrap();

    let job = SnapshotJob::running(9, "dan", 1, at(5));
    assert!(state.apply_event(&JobEvent::start(5, &on(job.clone(), "a"))).is_err());
    state.apply_event(&JobEvent::sub(5, &job)).unwrap();
    state.apply_event(&JobEvent::start(5, &on(job, "a"))).unwrap();
    assert!(state.node("a").unwrap().contains(&FullJobId::from("9")));
}
