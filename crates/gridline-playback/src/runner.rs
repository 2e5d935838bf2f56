//! The playback tick loop.
//!
//! [`run_playback`] drives one [`PlaybackController`] on a fixed wall-clock
//! tick. Each iteration:
//!
//! 1. Honors an end request, then applies queued [`PlaybackCommand`]s.
//! 2. Exits if the controller reached END.
//! 3. Advances by the wall-clock time since the previous iteration.
//! 4. Publishes a [`PlaybackFrame`] on the watch channel.
//! 5. Sleeps for the tick interval or until a new command arrives.
//!
//! When the window has been evicted past the playback position the loop
//! waits, polling with the configured backoff, until the timeline's first
//! offset stops moving, then re-buffers there and keeps playing.

use std::sync::Arc;
use std::time::Duration;

use gridline_timeline::{PlaybackConfig, Timeline};
use gridline_types::{Offset, PlayState};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, trace};

use crate::controller::{Advance, PlaybackController};
use crate::frame::PlaybackFrame;
use crate::handle::{PlaybackCommand, PlaybackHandle};

/// Result of a playback run.
#[derive(Debug, Clone)]
pub struct PlaybackResult {
    /// Iterations of the tick loop.
    pub ticks: u64,
    /// The frame published last.
    pub final_frame: PlaybackFrame,
}

/// Run the tick loop until the controller reaches END.
///
/// The loop never fails: invalid requests are ignored by the controller
/// and replay inconsistencies are logged and skipped.
pub async fn run_playback(
    controller: &mut PlaybackController,
    handle: &Arc<PlaybackHandle>,
    config: &PlaybackConfig,
    frames: &watch::Sender<PlaybackFrame>,
) -> PlaybackResult {
    let tick = Duration::from_millis(config.tick_interval_ms.max(1));
    let backoff = Duration::from_millis(config.stale_backoff_ms.max(1));
    let mut ticks: u64 = 0;
    let mut last = Instant::now();

    info!(
        tick_interval_ms = config.tick_interval_ms,
        position = controller.position(),
        speed = controller.speed(),
        state = %controller.state(),
        "Playback loop starting"
    );

    loop {
        // --- Commands ---
        if handle.is_end_requested() {
            controller.end();
        }
        for command in handle.drain().await {
            apply_command(controller, command);
        }

        // --- End ---
        if controller.state() == PlayState::End {
            let final_frame = controller.frame();
            frames.send_replace(final_frame.clone());
            info!(ticks, position = final_frame.position, "Playback loop ended");
            return PlaybackResult { ticks, final_frame };
        }

        // --- Advance ---
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(last);
        last = now;
        match controller.advance(elapsed) {
            Advance::Stale {
                position,
                first_offset,
            } => {
                info!(
                    position,
                    first_offset, "Playback fell behind the window, waiting for it to settle"
                );
                if let Some(settled) =
                    wait_for_stable_window(controller.timeline(), handle, backoff).await
                {
                    controller.recover_stale(settled);
                }
                last = Instant::now();
            }
            Advance::Moved {
                from,
                to,
                applied,
                inconsistencies,
            } if applied > 0 || inconsistencies > 0 => {
                trace!(from, to, applied, inconsistencies, "Playback tick");
            }
            Advance::Moved { .. } | Advance::Idle => {}
        }

        ticks = ticks.saturating_add(1);
        frames.send_replace(controller.frame());

        // --- Sleep ---
        tokio::select! {
            () = tokio::time::sleep(tick) => {}
            () = handle.notified() => {}
        }
    }
}

fn apply_command(controller: &mut PlaybackController, command: PlaybackCommand) {
    debug!(?command, state = %controller.state(), "Playback command");
    match command {
        PlaybackCommand::Seek(position) => {
            controller.seek(position);
        }
        PlaybackCommand::Play => {
            controller.play();
        }
        PlaybackCommand::Pause => {
            controller.pause();
        }
        PlaybackCommand::SetSpeed(speed) => {
            if controller.set_speed(speed) {
                let position = controller.position();
                if controller.buffer_at_position(position).is_applied() {
                    controller.play();
                }
            }
        }
        PlaybackCommand::GoLive => {
            controller.go_live();
        }
    }
}

/// Poll until the first offset is the same twice in a row. Returns `None`
/// if an end request arrives first.
async fn wait_for_stable_window(
    timeline: &Timeline,
    handle: &PlaybackHandle,
    backoff: Duration,
) -> Option<Offset> {
    let mut first = timeline.get_first_offset();
    loop {
        tokio::time::sleep(backoff).await;
        if handle.is_end_requested() {
            return None;
        }
        let next = timeline.get_first_offset();
        if next == first {
            return Some(next);
        }
        info!(first_offset = next, "Window still moving");
        first = next;
    }
}

/// Log the end of a playback run.
pub fn log_playback_end(result: &PlaybackResult) {
    let frame = &result.final_frame;
    info!(
        ticks = result.ticks,
        position = frame.position,
        speed = frame.speed,
        nodes = frame.nodes.len(),
        used_slots = frame.used_slots(),
        queued = frame.queue.len(),
        owners = frame.usage.len(),
        "Playback ended"
    );
    if let Some(top) = frame.usage.first() {
        info!(owner = %top.owner, slots = top.slots, "Heaviest owner at end of playback");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use gridline_state::NodeTopology;
    use gridline_timeline::TimelineConfig;
    use gridline_types::{Snapshot, SnapshotJob, SnapshotNode};

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn node() -> SnapshotNode {
        SnapshotNode::new("all.q@n1")
    }

    fn timeline(max_snapshots: usize) -> Arc<Timeline> {
        let t = Arc::new(Timeline::new(
            TimelineConfig {
                max_snapshots,
                ..TimelineConfig::default()
            },
            Arc::new(NodeTopology::from_entries([("n1", 4)])),
        ));
        t.add_snapshot(
            Snapshot::new(at(0))
                .with_node(node())
                .with_queued_job(SnapshotJob::queued(1, "amy", 2, at(-10))),
        )
        .unwrap();
        t.add_snapshot(
            Snapshot::new(at(60)).with_node(node().with_job(SnapshotJob::running(1, "amy", 2, at(40)))),
        )
        .unwrap();
        t
    }

    fn start(
        controller: PlaybackController,
    ) -> (
        Arc<PlaybackHandle>,
        watch::Receiver<PlaybackFrame>,
        tokio::task::JoinHandle<PlaybackResult>,
    ) {
        let handle = Arc::new(PlaybackHandle::new());
        let (tx, rx) = watch::channel(controller.frame());
        let task = {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move {
                let mut controller = controller;
                run_playback(&mut controller, &handle, &PlaybackConfig::default(), &tx).await
            })
        };
        (handle, rx, task)
    }

    #[tokio::test(start_paused = true)]
    async fn end_before_first_tick() {
        let (handle, _rx, task) = start(PlaybackController::new(timeline(10), 1.0));
        handle.end();
        let result = task.await.unwrap();
        assert_eq!(result.final_frame.state, PlayState::End);
    }

    #[tokio::test(start_paused = true)]
    async fn plays_in_wall_clock_time() {
        let mut controller = PlaybackController::new(timeline(10), 1.0);
        controller.buffer_at_position(0);
        controller.play();
        let (handle, rx, task) = start(controller);

        tokio::time::sleep(Duration::from_secs(45)).await;
        let frame = rx.borrow().clone();
        assert_eq!(frame.state, PlayState::Playing);
        assert!(frame.position >= 40_000, "position {}", frame.position);
        assert_eq!(frame.used_slots(), 2);

        handle.end();
        let result = task.await.unwrap();
        log_playback_end(&result);
        assert!(result.ticks > 0);
        assert_eq!(rx.borrow().state, PlayState::End);
    }

    #[tokio::test(start_paused = true)]
    async fn speed_change_rebuffers_and_resumes() {
        let mut controller = PlaybackController::new(timeline(10), 1.0);
        controller.buffer_at_position(0);
        controller.play();
        let (handle, rx, task) = start(controller);

        tokio::time::sleep(Duration::from_secs(1)).await;
        handle.set_speed(8.0).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        let frame = rx.borrow().clone();
        assert_eq!(frame.state, PlayState::Playing);
        assert!((frame.speed - 8.0).abs() < f64::EPSILON);
        assert!(frame.position > 1_000, "position {}", frame.position);

        handle.pause().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        let paused_at = rx.borrow().position;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(rx.borrow().position, paused_at);

        handle.end();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stale_window_rebuffers_at_first_offset() {
        let t = timeline(2);
        let mut controller = PlaybackController::new(Arc::clone(&t), 1.0);
        controller.buffer_at_position(0);
        controller.play();
        let (handle, rx, task) = start(controller);

        tokio::time::sleep(Duration::from_millis(100)).await;
        t.add_snapshot(Snapshot::new(at(120)).with_node(node())).unwrap();
        assert_eq!(t.get_first_offset(), 60_000);

        tokio::time::sleep(Duration::from_secs(3)).await;
        let frame = rx.borrow().clone();
        assert_eq!(frame.state, PlayState::Playing);
        assert!(frame.position >= 60_000, "position {}", frame.position);

        handle.end();
        let result = task.await.unwrap();
        assert_eq!(result.final_frame.state, PlayState::End);
    }
}
