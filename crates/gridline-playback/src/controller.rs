//! The playback state machine.
//!
//! A [`PlaybackController`] owns a private [`GridState`] and moves it
//! through a shared [`Timeline`] by applying event slices. It never
//! touches the timeline's accumulated state, so any number of controllers
//! can replay the same timeline while ingestion continues.
//!
//! # States
//!
//! ```text
//! PAUSED --seek--> BUFFERING --done--> READY --play--> PLAYING
//!   ^  \_____________________play_______________________^  |
//!   \________________________pause_________________________/
//! any --end--> END
//! ```
//!
//! A request that does not fit the current state is logged and ignored.
//! The caller gets [`Transition::Ignored`] back, never an error.
//!
//! # Slices
//!
//! Buffering at position `P` from a snapshot at offset `S` replays the
//! events in `(S, P]`. Each playing tick from `P` to `Q` replays `(P, Q]`.
//! Consecutive slices therefore cover the timeline exactly once.

use std::sync::Arc;
use std::time::Duration;

use gridline_state::GridState;
use gridline_timeline::Timeline;
use gridline_types::{FullJobId, Offset, PlayState};
use tracing::{debug, error, info, warn};

use crate::frame::{NodeFrame, OwnerUsage, PlaybackFrame, QueuedJobFrame};

/// Outcome of a state-changing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The request was carried out.
    Applied,
    /// The request is not valid in the current state and changed nothing.
    Ignored {
        /// State the controller was in.
        from: PlayState,
        /// State the request would have led to.
        requested: PlayState,
    },
    /// Buffering started but could not finish; the controller is PAUSED.
    Aborted {
        /// Position that was requested.
        position: Offset,
    },
}

impl Transition {
    /// Whether the request was carried out.
    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Outcome of one playing tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// The controller is not playing.
    Idle,
    /// The position moved and the slice in between was applied.
    Moved {
        /// Position before the tick.
        from: Offset,
        /// Position after the tick.
        to: Offset,
        /// Lifecycle events applied.
        applied: usize,
        /// Events that did not fit the state and were skipped.
        inconsistencies: usize,
    },
    /// The window was evicted past the position. Nothing was applied.
    Stale {
        /// Current position.
        position: Offset,
        /// The timeline's first offset when the condition was seen.
        first_offset: Offset,
    },
}

/// Replays a [`Timeline`] into a private [`GridState`].
#[derive(Debug)]
pub struct PlaybackController {
    timeline: Arc<Timeline>,
    state: PlayState,
    position: Offset,
    speed: f64,
    live: bool,
    grid: GridState,
    queue: Vec<FullJobId>,
    /// Scaled time not yet turned into whole milliseconds.
    carry: Duration,
}

impl PlaybackController {
    /// A PAUSED controller at offset 0 with an empty state.
    ///
    /// A speed that is not a positive finite number falls back to 1.0.
    pub fn new(timeline: Arc<Timeline>, speed: f64) -> Self {
        let speed = if valid_speed(speed) {
            speed
        } else {
            warn!(speed, "Invalid initial speed, using 1.0");
            1.0
        };
        let grid = GridState::empty(timeline.topology(), "playback");
        Self {
            timeline,
            state: PlayState::Paused,
            position: 0,
            speed,
            live: false,
            grid,
            queue: Vec::new(),
            carry: Duration::ZERO,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Current state.
    pub const fn state(&self) -> PlayState {
        self.state
    }

    /// Current position.
    pub const fn position(&self) -> Offset {
        self.position
    }

    /// Current speed multiplier.
    pub const fn speed(&self) -> f64 {
        self.speed
    }

    /// Whether live tailing is on.
    pub const fn is_live(&self) -> bool {
        self.live
    }

    /// The replayed cluster state.
    pub const fn grid(&self) -> &GridState {
        &self.grid
    }

    /// Pending jobs, earliest submission first, unknown submission last.
    pub fn queue(&self) -> &[FullJobId] {
        &self.queue
    }

    /// The timeline being replayed.
    pub const fn timeline(&self) -> &Arc<Timeline> {
        &self.timeline
    }

    /// An owned view of the current state for rendering.
    pub fn frame(&self) -> PlaybackFrame {
        PlaybackFrame {
            state: self.state,
            position: self.position,
            speed: self.speed,
            live: self.live,
            nodes: self.grid.nodes().map(NodeFrame::from).collect(),
            queue: self
                .queue
                .iter()
                .filter_map(|id| self.grid.job(id))
                .map(QueuedJobFrame::from)
                .collect(),
            usage: self
                .grid
                .owners_by_usage()
                .into_iter()
                .map(|(owner, slots)| OwnerUsage { owner, slots })
                .collect(),
        }
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    fn ignore(&self, requested: PlayState) -> Transition {
        error!(from = %self.state, requested = %requested, "Invalid playback transition, ignoring");
        Transition::Ignored {
            from: self.state,
            requested,
        }
    }

    fn enter(&mut self, next: PlayState) {
        debug!(from = %self.state, to = %next, position = self.position, "Playback state change");
        self.state = next;
    }

    /// Rebuild the state at `position`. Valid only from PAUSED.
    ///
    /// Starts from the latest retained snapshot at or before `position`
    /// (the earliest one if none is), replays the events after it up to and
    /// including `position`, and ends READY with the position set exactly.
    /// On an empty timeline the controller falls back to PAUSED.
    pub fn buffer_at_position(&mut self, position: Offset) -> Transition {
        if self.state != PlayState::Paused {
            return self.ignore(PlayState::Buffering);
        }
        self.enter(PlayState::Buffering);
        self.buffer(position)
    }

    fn buffer(&mut self, position: Offset) -> Transition {
        let snapshots = self.timeline.get_indexed_snapshots();
        let chosen = snapshots
            .iter()
            .rev()
            .find(|(offset, _)| *offset <= position)
            .or_else(|| snapshots.first());
        let Some((snapshot_offset, snapshot)) = chosen else {
            error!(position, "Cannot buffer, the timeline has no snapshots");
            self.enter(PlayState::Paused);
            return Transition::Aborted { position };
        };

        match GridState::from_snapshot(snapshot, self.timeline.topology(), "playback") {
            Ok(grid) => self.grid = grid,
            Err(err) => {
                error!(position, snapshot_offset, error = %err, "Cannot build state from snapshot");
                self.enter(PlayState::Paused);
                return Transition::Aborted { position };
            }
        }
        let (applied, inconsistencies) = self.apply_slice(*snapshot_offset, position);
        self.position = position;
        self.carry = Duration::ZERO;
        self.refresh_views();

        info!(
            position,
            snapshot_offset,
            applied,
            inconsistencies,
            "Buffered playback state"
        );
        self.enter(PlayState::Ready);
        Transition::Applied
    }

    /// Start advancing. Valid from PAUSED or READY.
    pub fn play(&mut self) -> Transition {
        match self.state {
            PlayState::Paused | PlayState::Ready => {
                self.carry = Duration::ZERO;
                self.enter(PlayState::Playing);
                Transition::Applied
            }
            _ => self.ignore(PlayState::Playing),
        }
    }

    /// Stop advancing. Valid from PLAYING or PAUSED.
    pub fn pause(&mut self) -> Transition {
        match self.state {
            PlayState::Playing | PlayState::Paused => {
                self.enter(PlayState::Paused);
                Transition::Applied
            }
            _ => self.ignore(PlayState::Paused),
        }
    }

    /// Terminate playback. Valid from every state; END is never left.
    pub fn end(&mut self) -> Transition {
        if self.state != PlayState::End {
            self.live = false;
            self.enter(PlayState::End);
        }
        Transition::Applied
    }

    /// Disable live tailing and stop any playback in progress. READY drops
    /// back to PAUSED too, so a new buffer cycle can start.
    ///
    /// Returns the state before the call.
    pub fn go_dead(&mut self) -> PlayState {
        let before = self.state;
        self.live = false;
        if matches!(before, PlayState::Playing | PlayState::Ready) {
            self.enter(PlayState::Paused);
        }
        before
    }

    /// Go dead, then buffer at `position`.
    pub fn seek(&mut self, position: Offset) -> Transition {
        if self.state == PlayState::End {
            return self.ignore(PlayState::Buffering);
        }
        self.go_dead();
        self.buffer_at_position(position)
    }

    /// Go dead, then change the speed multiplier.
    ///
    /// Returns whether playback was running before, so the caller can
    /// re-buffer and resume. A speed that is not a positive finite number
    /// is refused and changes nothing.
    pub fn set_speed(&mut self, speed: f64) -> bool {
        if self.state == PlayState::End {
            self.ignore(self.state);
            return false;
        }
        if !valid_speed(speed) {
            warn!(speed, "Refusing invalid playback speed");
            return false;
        }
        let was_playing = self.go_dead() == PlayState::Playing;
        info!(from = self.speed, to = speed, "Playback speed changed");
        self.speed = speed;
        was_playing
    }

    /// Jump to the timeline's live offset and play from there.
    pub fn go_live(&mut self) -> Transition {
        if self.state == PlayState::End {
            return self.ignore(PlayState::Playing);
        }
        self.go_dead();
        let target = self.timeline.get_live_offset();
        let buffered = self.buffer_at_position(target);
        if !buffered.is_applied() {
            return buffered;
        }
        let played = self.play();
        if played.is_applied() {
            self.live = true;
            info!(position = target, "Tailing live edge");
        }
        played
    }

    // -----------------------------------------------------------------------
    // Playing
    // -----------------------------------------------------------------------

    /// Advance by `elapsed` wall-clock time scaled by the speed.
    ///
    /// Fractions of a millisecond are carried to the next tick. If the
    /// window no longer holds the events right after the position, nothing
    /// moves and [`Advance::Stale`] is returned; see
    /// [`recover_stale`](Self::recover_stale).
    pub fn advance(&mut self, elapsed: Duration) -> Advance {
        if self.state != PlayState::Playing {
            return Advance::Idle;
        }
        let first_offset = self.timeline.get_first_offset();
        if self.position.saturating_add(1) < first_offset {
            return Advance::Stale {
                position: self.position,
                first_offset,
            };
        }

        let scaled =
            Duration::try_from_secs_f64(elapsed.as_secs_f64() * self.speed).unwrap_or(Duration::MAX);
        self.carry = self.carry.saturating_add(scaled);
        let whole_ms = u64::try_from(self.carry.as_millis()).unwrap_or(u64::MAX);
        self.carry = self.carry.saturating_sub(Duration::from_millis(whole_ms));
        let step = i64::try_from(whole_ms).unwrap_or(i64::MAX);

        let from = self.position;
        let to = from.saturating_add(step);
        let (applied, inconsistencies) = self.apply_slice(from, to);
        self.position = to;
        if applied > 0 || inconsistencies > 0 {
            self.refresh_views();
        }
        Advance::Moved {
            from,
            to,
            applied,
            inconsistencies,
        }
    }

    /// Re-buffer at `first_offset` after the window moved past the position,
    /// then keep playing. Valid only from PLAYING.
    pub fn recover_stale(&mut self, first_offset: Offset) -> Transition {
        if self.state != PlayState::Playing {
            return self.ignore(PlayState::Buffering);
        }
        info!(
            position = self.position,
            first_offset, "Window moved past playback, re-buffering"
        );
        self.enter(PlayState::Buffering);
        let buffered = self.buffer(first_offset);
        if buffered.is_applied() {
            self.enter(PlayState::Playing);
        }
        buffered
    }

    /// Apply the lifecycle events in `(from, to]`.
    fn apply_slice(&mut self, from: Offset, to: Offset) -> (usize, usize) {
        let mut applied: usize = 0;
        let mut inconsistencies: usize = 0;
        for event in self
            .timeline
            .get_events(from.saturating_add(1), to.saturating_add(1))
        {
            let Some(job_event) = event.as_job() else {
                continue;
            };
            match self.grid.apply_event(job_event) {
                Ok(()) => applied = applied.saturating_add(1),
                Err(err) => {
                    inconsistencies = inconsistencies.saturating_add(1);
                    error!(event = %job_event.cache_key(), error = %err, "Data inconsistency during playback, skipping event");
                }
            }
        }
        (applied, inconsistencies)
    }

    /// Recount owner usage from scratch and rebuild the ordered queue.
    fn refresh_views(&mut self) {
        self.grid.recompute_owner_usage();
        let mut queued: Vec<_> = self.grid.queued_jobs().collect();
        queued.sort_by(|a, b| {
            a.sub_time
                .is_none()
                .cmp(&b.sub_time.is_none())
                .then_with(|| a.sub_time.cmp(&b.sub_time))
                .then_with(|| a.full_id().cmp(&b.full_id()))
        });
        self.queue = queued.into_iter().map(|job| job.full_id()).collect();
    }
}

const fn valid_speed(speed: f64) -> bool {
    speed.is_finite() && speed > 0.0
}
