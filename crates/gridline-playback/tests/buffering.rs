//! Buffering picks the right snapshot, replays up to and including the
//! requested position, and agrees with a controller that played there.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use gridline_playback::{PlaybackController, Transition};
use gridline_state::{GridState, NodeTopology};
use gridline_timeline::{Timeline, TimelineConfig};
use gridline_types::{FullJobId, PlayState, Snapshot, SnapshotJob, SnapshotNode};

fn at(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(1_650_000_000_000 + ms).single().unwrap()
}

fn node(name: &str) -> SnapshotNode {
    SnapshotNode::new(&format!("all.q@{name}.cluster"))
}

/// Snapshots at 0 and 60000. Jobs 1 and 2 are queued at 0 and start at
/// 45000 and 50000; job 3 runs from before 0 and is gone at 60000.
fn timeline() -> Arc<Timeline> {
    let t = Arc::new(Timeline::new(
        TimelineConfig::default(),
        Arc::new(NodeTopology::from_entries([("n1", 4), ("n2", 4)])),
    ));
    t.add_snapshot(
        Snapshot::new(at(0))
            .with_node(node("n1").with_job(SnapshotJob::running(3, "cat", 4, at(-90_000))))
            .with_node(node("n2"))
            .with_queued_job(SnapshotJob::queued(1, "amy", 2, at(-10_000)))
            .with_queued_job(SnapshotJob::queued(2, "bob", 1, at(-5_000))),
    )
    .unwrap();
    t.add_snapshot(
        Snapshot::new(at(60_000))
            .with_node(node("n1").with_job(SnapshotJob::running(1, "amy", 2, at(45_000))))
            .with_node(node("n2").with_job(SnapshotJob::running(2, "bob", 1, at(50_000)))),
    )
    .unwrap();
    t
}

fn running(state: &GridState, id: &str) -> bool {
    state.job(&FullJobId::from(id)).is_some_and(|j| j.is_running())
}

#[test]
fn buffers_from_the_earlier_snapshot_through_the_position() {
    let t = timeline();
    assert_eq!(t.get_indexed_snapshots().len(), 2);
    let mut c = PlaybackController::new(t, 1.0);

    assert_eq!(c.buffer_at_position(45_000), Transition::Applied);
    assert_eq!(c.state(), PlayState::Ready);
    assert_eq!(c.position(), 45_000);

    // Job 3 ended at 1 and job 1 started at exactly 45000; job 2 has not
    // started yet.
    assert!(c.grid().job(&FullJobId::from("3")).is_none());
    assert!(running(c.grid(), "1"));
    assert!(!running(c.grid(), "2"));
    assert_eq!(c.queue(), &[FullJobId::from("2")]);
    assert_eq!(c.grid().owners_by_usage(), vec![("amy".to_owned(), 2)]);
}

#[test]
fn position_before_every_snapshot_uses_the_earliest() {
    let mut c = PlaybackController::new(timeline(), 1.0);
    assert!(c.buffer_at_position(-5_000).is_applied());
    assert_eq!(c.position(), -5_000);
    assert!(running(c.grid(), "3"));
    assert_eq!(c.grid().num_queued_jobs(), 2);
}

#[test]
fn position_past_the_last_snapshot_uses_the_last() {
    let mut c = PlaybackController::new(timeline(), 1.0);
    assert!(c.buffer_at_position(90_000).is_applied());
    assert!(running(c.grid(), "1"));
    assert!(running(c.grid(), "2"));
    assert_eq!(c.grid().num_queued_jobs(), 0);
}

#[test]
fn playing_to_a_position_matches_buffering_there() {
    let t = timeline();
    let mut player = PlaybackController::new(Arc::clone(&t), 1.0);
    player.buffer_at_position(0);
    player.play();

    for _ in 0..12 {
        player.advance(Duration::from_millis(4_999));
        let mut seeker = PlaybackController::new(Arc::clone(&t), 1.0);
        seeker.buffer_at_position(player.position());
        assert!(
            player.grid().diff_against(seeker.grid()).is_empty(),
            "position {}",
            player.position()
        );
        assert_eq!(player.queue(), seeker.queue());
    }
    assert_eq!(player.position(), 59_988);
}

#[test]
fn same_time_redelivery_is_seen_by_seeking_and_playing() {
    let t = timeline();
    t.add_snapshot(
        Snapshot::new(at(60_000))
            .with_node(node("n1").with_job(SnapshotJob::running(1, "amy", 2, at(45_000))))
            .with_node(node("n2").with_job(SnapshotJob::running(2, "bob", 1, at(50_000))))
            .with_queued_job(SnapshotJob::queued(7, "dan", 1, at(30_000))),
    )
    .unwrap();
    assert_eq!(t.get_indexed_snapshots().len(), 2);

    let mut player = PlaybackController::new(Arc::clone(&t), 1.0);
    player.buffer_at_position(59_000);
    player.play();
    player.advance(Duration::from_secs(1));
    assert_eq!(player.position(), 60_000);
    assert_eq!(player.grid().num_queued_jobs(), 1);

    let mut seeker = PlaybackController::new(Arc::clone(&t), 1.0);
    seeker.buffer_at_position(60_000);
    assert_eq!(seeker.grid().num_queued_jobs(), 1);
    assert!(player.grid().diff_against(seeker.grid()).is_empty());
    assert_eq!(player.queue(), &[FullJobId::from("7")]);
    assert_eq!(player.queue(), seeker.queue());
}
